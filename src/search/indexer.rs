use super::{IndexedProduct, TantivySearchBackend};
use std::collections::BTreeSet;
use storefront_types::category::{ancestors_in, Category, CategoryRepository, Lineage};
use storefront_types::product::{Browsable, Product, ProductRepository};
use typesafe_repository::async_ops::{List, Select};

/// Category full names a product is findable under: each of its categories
/// and every ancestor of them.
pub fn category_names(product: &Product, snapshot: &[Category]) -> Vec<String> {
    let mut names = BTreeSet::new();
    for id in &product.categories {
        let Some(category) = snapshot.iter().find(|c| &c.id == id) else {
            log::warn!("Product {} references missing category {id}", product.id);
            continue;
        };
        let lineage = ancestors_in(snapshot, category);
        for depth in 1..=lineage.len() {
            names.insert(Lineage::new(lineage[..depth].to_vec()).full_name());
        }
    }
    names.into_iter().collect()
}

pub fn to_indexed(product: &Product, snapshot: &[Category]) -> IndexedProduct {
    IndexedProduct {
        id: product.id,
        title: product.title().to_string(),
        description: product.description.clone().unwrap_or_default(),
        product_class: product.product_class().map(|c| c.name.clone()),
        categories: category_names(product, snapshot),
        price_cents: product.price_cents(),
    }
}

/// Reindexes every browsable product from the repositories.
pub async fn rebuild_index(
    backend: &TantivySearchBackend,
    products: &dyn ProductRepository,
    categories: &dyn CategoryRepository,
) -> anyhow::Result<usize> {
    let snapshot = categories.list().await?;
    let documents = products
        .select(&Browsable::all())
        .await?
        .iter()
        .map(|p| to_indexed(p, &snapshot))
        .collect::<Vec<_>>();
    let count = backend.replace_all(documents)?;
    log::info!("Search index rebuilt with {count} products");
    Ok(count)
}
