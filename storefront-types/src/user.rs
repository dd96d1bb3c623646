use serde::{Deserialize, Serialize};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;

#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[Id(get_id, ref_id)]
pub struct Customer {
    #[id]
    pub id: i64,
    pub email: String,
}

/// Whoever issued the current request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RequestUser {
    #[default]
    Anonymous,
    Authenticated(Customer),
}

impl RequestUser {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn customer(&self) -> Option<&Customer> {
        match self {
            Self::Authenticated(c) => Some(c),
            Self::Anonymous => None,
        }
    }
}

impl From<Option<Customer>> for RequestUser {
    fn from(c: Option<Customer>) -> Self {
        c.map(Self::Authenticated).unwrap_or_default()
    }
}
