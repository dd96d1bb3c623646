use crate::encode_path;
use async_trait::async_trait;
use derive_more::Deref;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use typesafe_repository::async_ops::{Get, List, Remove, Save, Select};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{SelectBy, Selector};

pub const FULL_NAME_SEPARATOR: &str = " > ";

#[derive(Id, Serialize, Deserialize, Clone, Debug)]
#[Id(get_id, ref_id)]
pub struct Category {
    #[id]
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<IdentityOf<Category>>,
    pub description: Option<String>,
}

pub struct ByParentId(pub IdentityOf<Category>);
pub struct BySlug(pub String);
pub struct TopLevel;

impl Selector for ByParentId {}
impl SelectBy<ByParentId> for Category {}

impl Selector for BySlug {}
impl SelectBy<BySlug> for Category {}

impl Selector for TopLevel {}
impl SelectBy<TopLevel> for Category {}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Category {}

impl std::hash::Hash for Category {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        self.id.hash(state)
    }
}

/// A category together with all of its ancestors, root first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deref)]
pub struct Lineage(Vec<Category>);

impl Lineage {
    /// Drops repeated categories, keeping the first occurrence.
    pub fn new(categories: Vec<Category>) -> Self {
        let mut seen = HashSet::new();
        Self(
            categories
                .into_iter()
                .filter(|c| seen.insert(c.id))
                .collect(),
        )
    }

    /// The category this lineage ends with.
    pub fn category(&self) -> Option<&Category> {
        self.0.last()
    }

    pub fn full_name(&self) -> String {
        self.0.iter().map(|c| c.name.as_str()).join(FULL_NAME_SEPARATOR)
    }

    pub fn full_slug(&self) -> String {
        self.0.iter().map(|c| c.slug.as_str()).join("/")
    }

    pub fn canonical_url(&self) -> Option<String> {
        self.category()
            .map(|c| encode_path(format!("/catalogue/{}_{}/", self.full_slug(), c.id)))
    }

    pub fn into_inner(self) -> Vec<Category> {
        self.0
    }
}

/// Walks `category` up to its root using an in-memory snapshot.
///
/// Stops at a missing parent or at the first repeated id.
pub fn ancestors_in<'a, T>(categories: &'a T, category: &Category) -> Lineage
where
    T: ?Sized,
    &'a T: IntoIterator<Item = &'a Category> + 'a,
{
    let mut backtrace = vec![category.clone()];
    let mut current = category;
    while let Some(parent_id) = &current.parent_id {
        if backtrace.iter().any(|c| &c.id == parent_id) {
            break;
        }
        match categories.into_iter().find(|c| &c.id == parent_id) {
            Some(parent) => {
                backtrace.push(parent.clone());
                current = parent;
            }
            None => break,
        }
    }
    backtrace.reverse();
    Lineage(backtrace)
}

/// `category` followed by every category below it, breadth first.
pub fn descendants_in<'a, T>(categories: &'a T, category: &Category) -> Vec<Category>
where
    T: ?Sized,
    &'a T: IntoIterator<Item = &'a Category> + 'a,
{
    let mut children: HashMap<IdentityOf<Category>, Vec<&Category>> = HashMap::new();
    for c in categories {
        if let Some(parent_id) = c.parent_id {
            children.entry(parent_id).or_default().push(c);
        }
    }
    let mut seen = HashSet::from([category.id]);
    let mut res = vec![category.clone()];
    let mut queue = VecDeque::from([category.id]);
    while let Some(id) = queue.pop_front() {
        for child in children.get(&id).into_iter().flatten() {
            if seen.insert(child.id) {
                res.push((*child).clone());
                queue.push_back(child.id);
            }
        }
    }
    res
}

#[async_trait]
pub trait CategoryRepository:
    Repository<Category, Error = anyhow::Error>
    + Save<Category>
    + Get<Category>
    + List<Category>
    + Select<Category, ByParentId>
    + Select<Category, BySlug>
    + Select<Category, TopLevel>
    + Remove<Category>
    + Send
    + Sync
{
    /// The category with all of its ancestors, root first. Empty if `id` is unknown.
    async fn ancestors(&self, id: &IdentityOf<Category>) -> Result<Lineage, Self::Error>;
    /// The category followed by its whole subtree. Empty if `id` is unknown.
    async fn descendants(&self, id: &IdentityOf<Category>) -> Result<Vec<Category>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: i64, name: &str, parent_id: Option<i64>) -> Category {
        Category {
            id,
            name: name.to_string(),
            slug: crate::slugify(name),
            parent_id,
            description: None,
        }
    }

    fn tree() -> Vec<Category> {
        vec![
            category(1, "Books", None),
            category(2, "Fiction", Some(1)),
            category(3, "Sci-Fi", Some(2)),
            category(4, "Non-Fiction", Some(1)),
            category(5, "Clothing", None),
        ]
    }

    #[test]
    fn ancestors_are_root_first_and_include_self() {
        let categories = tree();
        let lineage = ancestors_in(&categories, &categories[2]);
        let ids = lineage.iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(lineage.full_name(), "Books > Fiction > Sci-Fi");
        assert_eq!(lineage.full_slug(), "books/fiction/sci-fi");
        assert_eq!(
            lineage.canonical_url().as_deref(),
            Some("/catalogue/books/fiction/sci-fi_3/")
        );
    }

    #[test]
    fn ancestors_survive_cycles() {
        let categories = vec![category(1, "A", Some(2)), category(2, "B", Some(1))];
        let lineage = ancestors_in(&categories, &categories[0]);
        let ids = lineage.iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn descendants_include_whole_subtree() {
        let categories = tree();
        let ids = descendants_in(&categories, &categories[0])
            .into_iter()
            .map(|c| c.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 4, 3]);
    }

    #[test]
    fn lineage_drops_duplicates() {
        let categories = tree();
        let lineage = Lineage::new(vec![
            categories[0].clone(),
            categories[1].clone(),
            categories[0].clone(),
        ]);
        assert_eq!(lineage.len(), 2);
        assert_eq!(lineage.category().map(|c| c.id), Some(2));
    }

    #[test]
    fn empty_lineage_has_no_url() {
        assert_eq!(Lineage::default().canonical_url(), None);
        assert_eq!(Lineage::default().full_name(), "");
    }
}
