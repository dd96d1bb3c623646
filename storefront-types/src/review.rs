use crate::product::Product;
use crate::user::Customer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use typesafe_repository::IdentityOf;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    ForModeration,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::ForModeration => "for_moderation",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    /// Unknown values are treated as awaiting moderation so they are never shown.
    pub fn from_str(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "approved" => ReviewStatus::Approved,
            "rejected" => ReviewStatus::Rejected,
            _ => ReviewStatus::ForModeration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReview {
    pub id: i64,
    pub product_id: IdentityOf<Product>,
    pub title: String,
    pub body: String,
    pub score: i64,
    pub user_id: Option<IdentityOf<Customer>>,
    pub name: String,
    pub status: ReviewStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub product_id: IdentityOf<Product>,
    pub title: String,
    pub body: String,
    pub score: i64,
    pub user_id: Option<IdentityOf<Customer>>,
    pub name: String,
    pub status: ReviewStatus,
    pub created_at: i64,
}

#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn add(&self, item: NewReview) -> anyhow::Result<ProductReview>;
    /// Reviews of `product_id` whose status is exactly `status`, newest first.
    async fn list_for_product(
        &self,
        product_id: IdentityOf<Product>,
        status: ReviewStatus,
    ) -> anyhow::Result<Vec<ProductReview>>;
}
