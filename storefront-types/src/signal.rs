use crate::product::Product;
use crate::user::Customer;
use actix::prelude::*;
use actix_broker::{Broker, SystemBroker};
use async_trait::async_trait;
use typesafe_repository::IdentityOf;

/// Issued after a product page has been rendered.
#[derive(Message, Clone, Debug, PartialEq, Eq)]
#[rtype(result = "()")]
pub struct ProductViewed {
    pub product_id: IdentityOf<Product>,
    pub upc: String,
    pub user: Option<Customer>,
    pub path: String,
    pub status: u16,
}

/// Where view notifications go. Publishing must not block or fail the caller.
pub trait ViewSignal: Send + Sync {
    fn product_viewed(&self, event: ProductViewed);
}

/// Publishes on the actix system broker; listeners subscribe with
/// `subscribe_system_async::<ProductViewed>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BrokerViewSignal;

impl ViewSignal for BrokerViewSignal {
    fn product_viewed(&self, event: ProductViewed) {
        log::debug!("Product {} viewed at {}", event.product_id, event.path);
        Broker::<SystemBroker>::issue_async(event);
    }
}

/// Products a customer has looked at, built from earlier `ProductViewed` events.
#[async_trait]
pub trait ViewHistory: Send + Sync {
    /// Most recent first, each product once.
    async fn recently_viewed(
        &self,
        user_id: IdentityOf<Customer>,
        limit: usize,
    ) -> anyhow::Result<Vec<IdentityOf<Product>>>;
}
