use crate::product::Product;
use crate::user::{Customer, RequestUser};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use typesafe_repository::IdentityOf;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Unconfirmed,
    Active,
    Cancelled,
    Closed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfirmed => "unconfirmed",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "active" => Self::Active,
            "cancelled" => Self::Cancelled,
            "closed" => Self::Closed,
            _ => Self::Unconfirmed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductAlert {
    pub id: i64,
    pub product_id: IdentityOf<Product>,
    pub user_id: Option<IdentityOf<Customer>>,
    pub email: Option<String>,
    pub status: AlertStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewProductAlert {
    pub product_id: IdentityOf<Product>,
    pub user_id: Option<IdentityOf<Customer>>,
    pub email: Option<String>,
    pub status: AlertStatus,
    pub created_at: i64,
}

#[async_trait]
pub trait ProductAlertRepository: Send + Sync {
    async fn add(&self, alert: NewProductAlert) -> anyhow::Result<ProductAlert>;
    async fn exists(
        &self,
        product_id: IdentityOf<Product>,
        user_id: IdentityOf<Customer>,
        status: AlertStatus,
    ) -> anyhow::Result<bool>;
}

/// Data for the "notify me" form shown on a product page.
///
/// Signed-in customers subscribe with their account; everyone else has to
/// leave an email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductAlertForm {
    pub product_id: IdentityOf<Product>,
    pub email: Option<String>,
    pub requires_email: bool,
    pub action: String,
}

impl ProductAlertForm {
    pub fn new(user: &RequestUser, product: &Product) -> Self {
        let customer = user.customer();
        Self {
            product_id: product.id,
            email: customer.map(|c| c.email.clone()),
            requires_email: customer.is_none(),
            action: format!("/customer/alerts/create/{}/", product.id),
        }
    }
}
