use crate::category::Category;
use crate::{encode_path, slugify};
use async_trait::async_trait;
use derive_more::{Display, Error};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use typesafe_repository::async_ops::{Get, Save, Select};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{SelectBy, Selector};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    #[default]
    #[display("standalone")]
    Standalone,
    #[display("parent")]
    Parent,
    #[display("child")]
    Child,
}

impl Structure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Parent => "parent",
            Self::Child => "child",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "parent" => Self::Parent,
            "child" => Self::Child,
            _ => Self::Standalone,
        }
    }
}

#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[Id(get_id, ref_id)]
pub struct ProductClass {
    #[id]
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub requires_shipping: bool,
}

#[derive(Id, Clone, Debug)]
#[Id(get_id, ref_id)]
pub struct Product {
    #[id]
    pub id: i64,
    /// Empty when the product has no UPC.
    pub upc: String,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub structure: Structure,
    /// Loaded together with the child, so variants never need a second lookup.
    pub parent: Option<Box<Product>>,
    pub product_class: Option<ProductClass>,
    pub price: Option<Decimal>,
    pub categories: Vec<IdentityOf<Category>>,
}

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum ProductValidationError {
    #[display("Your product must have a title")]
    MissingTitle,
    #[display("Your product must have a product class")]
    MissingProductClass,
    #[display("Only child products can have a parent")]
    UnexpectedParent,
    #[display("A child product needs a parent")]
    MissingParent,
    #[display("A child product's parent must be a parent product")]
    InvalidParent,
}

impl Product {
    pub fn normalize_upc(upc: Option<&str>) -> String {
        upc.map(str::trim).unwrap_or_default().to_string()
    }

    pub fn is_variant(&self) -> bool {
        self.structure == Structure::Child
    }

    pub fn is_parent(&self) -> bool {
        self.structure == Structure::Parent
    }

    pub fn is_browsable(&self) -> bool {
        !self.is_variant()
    }

    pub fn parent_id(&self) -> Option<IdentityOf<Product>> {
        self.parent.as_ref().map(|p| p.id)
    }

    /// Own title, falling back to the parent's for variants.
    pub fn title(&self) -> &str {
        match &self.parent {
            Some(parent) if self.title.trim().is_empty() => parent.title(),
            _ => &self.title,
        }
    }

    pub fn product_class(&self) -> Option<&ProductClass> {
        match (&self.product_class, &self.parent) {
            (Some(class), _) => Some(class),
            (None, Some(parent)) if self.is_variant() => parent.product_class(),
            _ => None,
        }
    }

    pub fn is_shipping_required(&self) -> bool {
        self.product_class()
            .map(|c| c.requires_shipping)
            .unwrap_or(true)
    }

    pub fn slug(&self) -> String {
        if self.slug.trim().is_empty() {
            slugify(self.title())
        } else {
            self.slug.clone()
        }
    }

    pub fn canonical_url(&self) -> String {
        encode_path(format!("/product/{}_{}/", self.slug(), self.id))
    }

    pub fn validate(&self) -> Result<(), ProductValidationError> {
        match self.structure {
            Structure::Standalone | Structure::Parent => {
                if self.parent.is_some() {
                    return Err(ProductValidationError::UnexpectedParent);
                }
                if self.title.trim().is_empty() {
                    return Err(ProductValidationError::MissingTitle);
                }
                if self.product_class.is_none() {
                    return Err(ProductValidationError::MissingProductClass);
                }
                Ok(())
            }
            Structure::Child => match &self.parent {
                None => Err(ProductValidationError::MissingParent),
                Some(parent) if !parent.is_parent() => Err(ProductValidationError::InvalidParent),
                Some(_) => Ok(()),
            },
        }
    }

    pub fn price_cents(&self) -> Option<u64> {
        use rust_decimal::prelude::ToPrimitive;
        self.price
            .and_then(|p| (p * Decimal::ONE_HUNDRED).round().to_u64())
    }
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Product {}

impl std::hash::Hash for Product {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        self.id.hash(state)
    }
}

/// Top-level products, optionally restricted to those in any of `categories`.
///
/// An empty category list means no restriction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Browsable {
    pub categories: Vec<IdentityOf<Category>>,
}

impl Browsable {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_categories<I: IntoIterator<Item = IdentityOf<Category>>>(categories: I) -> Self {
        Self {
            categories: categories.into_iter().collect(),
        }
    }
}

impl Selector for Browsable {}
impl SelectBy<Browsable> for Product {}

#[async_trait]
pub trait ProductRepository:
    Repository<Product, Error = anyhow::Error>
    + Get<Product>
    + Save<Product>
    + Select<Product, Browsable>
    + Send
    + Sync
{
    async fn save_class(&self, class: ProductClass) -> Result<(), Self::Error>;
    async fn count_by(&self, by: &Browsable) -> Result<usize, Self::Error>;
    async fn select_page(
        &self,
        by: &Browsable,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Product>, Self::Error>;
    /// Fetches several products in one round trip, keeping the order of `ids`.
    async fn get_many(&self, ids: &[IdentityOf<Product>]) -> Result<Vec<Product>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn clothing() -> ProductClass {
        ProductClass {
            id: 1,
            name: "Clothing".to_string(),
            slug: "clothing".to_string(),
            requires_shipping: true,
        }
    }

    fn product(id: i64, title: &str, structure: Structure) -> Product {
        Product {
            id,
            upc: String::new(),
            title: title.to_string(),
            slug: String::new(),
            description: None,
            structure,
            parent: None,
            product_class: Some(clothing()),
            price: None,
            categories: vec![],
        }
    }

    fn child_of(parent: &Product) -> Product {
        Product {
            title: String::new(),
            product_class: None,
            parent: Some(Box::new(parent.clone())),
            ..product(parent.id + 1, "", Structure::Child)
        }
    }

    #[test]
    fn missing_upc_becomes_empty_string() {
        assert_eq!(Product::normalize_upc(None), "");
        assert_eq!(Product::normalize_upc(Some("  bah ")), "bah");
    }

    #[test]
    fn top_level_products_need_title_and_class() {
        let mut p = product(1, "", Structure::Standalone);
        assert_eq!(p.validate(), Err(ProductValidationError::MissingTitle));
        p.title = "Kopfhörer".to_string();
        p.product_class = None;
        assert_eq!(p.validate(), Err(ProductValidationError::MissingProductClass));
        p.product_class = Some(clothing());
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn children_need_neither_title_nor_class() {
        let parent = product(10, "Parent product", Structure::Parent);
        let child = child_of(&parent);
        assert_eq!(child.validate(), Ok(()));
        assert_eq!(child.title(), "Parent product");
        assert_eq!(child.product_class().map(|c| c.name.as_str()), Some("Clothing"));
        assert!(child.is_shipping_required());
        assert!(!child.is_browsable());
    }

    #[test]
    fn child_needs_a_parent_product() {
        let orphan = product(3, "", Structure::Child);
        assert_eq!(orphan.validate(), Err(ProductValidationError::MissingParent));
        let standalone = product(4, "Standalone", Structure::Standalone);
        assert_eq!(
            child_of(&standalone).validate(),
            Err(ProductValidationError::InvalidParent)
        );
    }

    #[test]
    fn canonical_url_uses_slug_and_id() {
        let mut p = product(42, "Red Shirt", Structure::Standalone);
        assert_eq!(p.canonical_url(), "/product/red-shirt_42/");
        p.slug = "shirt".to_string();
        assert_eq!(p.canonical_url(), "/product/shirt_42/");
    }

    #[test]
    fn price_in_cents() {
        let mut p = product(1, "Book", Structure::Standalone);
        p.price = Some(dec!(19.99));
        assert_eq!(p.price_cents(), Some(1999));
    }
}
