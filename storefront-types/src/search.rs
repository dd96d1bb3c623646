use crate::product::Product;
use async_trait::async_trait;
use itertools::Itertools;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::str::FromStr;
use typesafe_repository::IdentityOf;

pub const CATEGORY_FACET: &str = "category";
pub const PRODUCT_CLASS_FACET: &str = "product_class";
pub const PRICE_FACET: &str = "price";

/// Name of the untokenized index field backing a facet.
pub fn exact_field(field: &str) -> String {
    format!("{field}_exact")
}

/// Inclusive price bounds, written the Solr way: `[20 TO 40]`, `[60 TO *]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PriceRange {
    pub from: Option<Decimal>,
    pub to: Option<Decimal>,
}

impl PriceRange {
    pub fn new(from: Option<Decimal>, to: Option<Decimal>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, price: Decimal) -> bool {
        self.from.map_or(true, |f| price >= f) && self.to.map_or(true, |t| price <= t)
    }

    pub fn as_query(&self) -> String {
        let bound = |b: Option<Decimal>| b.map_or("*".to_string(), |d| d.normalize().to_string());
        format!("[{} TO {}]", bound(self.from), bound(self.to))
    }

    pub fn parse(s: &str) -> Option<Self> {
        let inner = s.trim().strip_prefix('[')?.strip_suffix(']')?;
        let (from, to) = inner.split_once(" TO ")?;
        let bound = |b: &str| match b.trim() {
            "*" => Some(None),
            v => Decimal::from_str(v).ok().map(Some),
        };
        Some(Self::new(bound(from)?, bound(to)?))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Clause {
    Exact(String),
    Range(PriceRange),
}

impl Clause {
    fn as_query(&self) -> String {
        match self {
            Clause::Exact(v) => format!("\"{}\"", v.replace('"', "\\\"")),
            Clause::Range(r) => r.as_query(),
        }
    }
}

/// Restricts results to documents where `field` matches any of `clauses`.
///
/// Unlike free text this never affects ranking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NarrowFilter {
    pub field: String,
    pub clauses: Vec<Clause>,
}

impl NarrowFilter {
    pub fn any_of<F, I, S>(field: F, values: I) -> Self
    where
        F: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: field.into(),
            clauses: values.into_iter().map(|v| Clause::Exact(v.into())).collect(),
        }
    }

    pub fn any_range<F, I>(field: F, ranges: I) -> Self
    where
        F: Into<String>,
        I: IntoIterator<Item = PriceRange>,
    {
        Self {
            field: field.into(),
            clauses: ranges.into_iter().map(Clause::Range).collect(),
        }
    }

    pub fn expression(&self) -> String {
        format!(
            "{}:({})",
            self.field,
            self.clauses.iter().map(Clause::as_query).join(" OR ")
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub narrows: Vec<NarrowFilter>,
    /// Resolve every hit to its product in one batch.
    pub load_all: bool,
}

impl SearchQuery {
    /// Matches every indexed product.
    pub fn base() -> Self {
        Self::default()
    }

    pub fn text<S: Into<String>>(mut self, text: S) -> Self {
        self.text = Some(text.into()).filter(|t: &String| !t.trim().is_empty());
        self
    }

    pub fn narrow(mut self, filter: NarrowFilter) -> Self {
        if !filter.clauses.is_empty() {
            self.narrows.push(filter);
        }
        self
    }

    pub fn load_all(mut self) -> Self {
        self.load_all = true;
        self
    }
}

/// Raw facet counts as returned by a backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FacetCounts {
    /// Facet key to `(value, count)` pairs, most frequent first.
    pub fields: BTreeMap<String, Vec<(String, usize)>>,
    /// `"{field}_exact:{query}"` to count.
    pub queries: BTreeMap<String, usize>,
}

#[derive(Clone, Debug)]
pub struct SearchHit {
    pub product_id: IdentityOf<Product>,
    pub score: f32,
    pub object: Option<Product>,
}

#[derive(Clone, Debug, Default)]
pub struct SearchResultPage {
    pub hits: Vec<SearchHit>,
    pub total: usize,
    pub facet_counts: FacetCounts,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldFacet {
    pub key: String,
    pub name: String,
    pub field: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFacet {
    pub key: String,
    pub name: String,
    pub field: String,
    pub queries: Vec<(String, PriceRange)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FacetSettings {
    pub fields: Vec<FieldFacet>,
    pub queries: Vec<QueryFacet>,
}

impl Default for FacetSettings {
    fn default() -> Self {
        let field = |key: &str, name: &str| FieldFacet {
            key: key.to_string(),
            name: name.to_string(),
            field: key.to_string(),
        };
        let range = |label: &str, from, to| (label.to_string(), PriceRange::new(from, to));
        Self {
            fields: vec![
                field(PRODUCT_CLASS_FACET, "Type"),
                field(CATEGORY_FACET, "Category"),
            ],
            queries: vec![QueryFacet {
                key: "price_range".to_string(),
                name: "Price range".to_string(),
                field: PRICE_FACET.to_string(),
                queries: vec![
                    range("0 to 20", Some(dec!(0)), Some(dec!(20))),
                    range("20 to 40", Some(dec!(20)), Some(dec!(40))),
                    range("40 to 60", Some(dec!(40)), Some(dec!(60))),
                    range("60+", Some(dec!(60)), None),
                ],
            }],
        }
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<SearchResultPage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_expression_is_a_disjunction() {
        let filter = NarrowFilter::any_of(
            exact_field(CATEGORY_FACET),
            ["Books > Fiction", "Books > Fiction > Sci-Fi"],
        );
        assert_eq!(
            filter.expression(),
            r#"category_exact:("Books > Fiction" OR "Books > Fiction > Sci-Fi")"#
        );
    }

    #[test]
    fn narrow_expression_escapes_quotes() {
        let filter = NarrowFilter::any_of("category_exact", [r#"12" Vinyl"#]);
        assert_eq!(filter.expression(), r#"category_exact:("12\" Vinyl")"#);
    }

    #[test]
    fn price_ranges_round_trip_through_queries() {
        let range = PriceRange::parse("[60 TO *]").unwrap();
        assert_eq!(range, PriceRange::new(Some(dec!(60)), None));
        assert_eq!(range.as_query(), "[60 TO *]");
        assert!(range.contains(dec!(60)));
        assert!(!range.contains(dec!(59.99)));
        assert_eq!(PriceRange::parse("60 TO *"), None);
        assert_eq!(PriceRange::parse("[a TO 2]"), None);
    }

    #[test]
    fn empty_narrows_are_ignored() {
        let query = SearchQuery::base().narrow(NarrowFilter::any_of("category_exact", Vec::<String>::new()));
        assert!(query.narrows.is_empty());
    }
}
