use anyhow::Context;
use async_trait::async_trait;
use itertools::Itertools;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use storefront_types::product::ProductRepository;
use storefront_types::search::{
    exact_field, Clause, FacetCounts, FacetSettings, NarrowFilter, PriceRange, SearchBackend,
    SearchHit, SearchQuery, SearchResultPage,
};
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, RangeQuery, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, NumericOptions, Schema, TantivyDocument, Value, STORED, STRING, TEXT,
};
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, Term};

pub mod indexer;

const WRITER_MEMORY: usize = 50_000_000;

#[derive(Clone, Copy, Debug)]
pub struct SearchFields {
    pub id: Field,
    pub title: Field,
    pub description: Field,
    pub product_class: Field,
    pub category: Field,
    pub price_cents: Field,
}

impl SearchFields {
    fn build_schema() -> (Schema, Self) {
        let mut builder = Schema::builder();
        let numeric = NumericOptions::default()
            .set_stored()
            .set_indexed()
            .set_fast();
        let id = builder.add_u64_field("id", numeric.clone());
        let title = builder.add_text_field("title", TEXT | STORED);
        let description = builder.add_text_field("description", TEXT);
        let product_class =
            builder.add_text_field(&exact_field(storefront_types::search::PRODUCT_CLASS_FACET), STRING | STORED);
        let category =
            builder.add_text_field(&exact_field(storefront_types::search::CATEGORY_FACET), STRING | STORED);
        let price_cents = builder.add_u64_field("price_cents", numeric);
        (
            builder.build(),
            Self {
                id,
                title,
                description,
                product_class,
                category,
                price_cents,
            },
        )
    }
}

/// A product flattened into the values the index knows about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexedProduct {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub product_class: Option<String>,
    /// Full names of every category the product is listed under, ancestors included.
    pub categories: Vec<String>,
    pub price_cents: Option<u64>,
}

pub struct TantivySearchBackend {
    index: Index,
    reader: IndexReader,
    fields: SearchFields,
    facets: FacetSettings,
    products: Arc<dyn ProductRepository>,
}

impl TantivySearchBackend {
    pub fn new(facets: FacetSettings, products: Arc<dyn ProductRepository>) -> anyhow::Result<Self> {
        let (schema, fields) = SearchFields::build_schema();
        let index = Index::create_in_ram(schema);
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Unable to create search index reader")?;
        Ok(Self {
            index,
            reader,
            fields,
            facets,
            products,
        })
    }

    /// Drops every indexed document and writes `documents` in their place.
    pub fn replace_all(&self, documents: Vec<IndexedProduct>) -> anyhow::Result<usize> {
        let mut writer: IndexWriter = self
            .index
            .writer_with_num_threads(1, WRITER_MEMORY)
            .context("Unable to create search index writer")?;
        writer.delete_all_documents()?;
        let count = documents.len();
        for product in documents {
            writer.add_document(self.to_document(product))?;
        }
        writer.commit().context("Unable to commit search index")?;
        self.reader.reload()?;
        Ok(count)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn to_document(&self, product: IndexedProduct) -> TantivyDocument {
        let f = self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_u64(f.id, product.id.max(0) as u64);
        doc.add_text(f.title, &product.title);
        doc.add_text(f.description, &product.description);
        if let Some(class) = &product.product_class {
            doc.add_text(f.product_class, class);
        }
        for category in &product.categories {
            doc.add_text(f.category, category);
        }
        if let Some(cents) = product.price_cents {
            doc.add_u64(f.price_cents, cents);
        }
        doc
    }

    fn build_query(&self, query: &SearchQuery) -> anyhow::Result<Box<dyn Query>> {
        let base: Box<dyn Query> = match &query.text {
            Some(text) => {
                let parser =
                    QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.description]);
                let (parsed, errors) = parser.parse_query_lenient(text);
                if !errors.is_empty() {
                    log::debug!("Lenient parse of {text:?} dropped {} clause(s)", errors.len());
                }
                parsed
            }
            None => Box::new(AllQuery),
        };
        if query.narrows.is_empty() {
            return Ok(base);
        }
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, base)];
        for narrow in &query.narrows {
            clauses.push((Occur::Must, self.narrow_query(narrow)?));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn narrow_query(&self, narrow: &NarrowFilter) -> anyhow::Result<Box<dyn Query>> {
        let schema = self.index.schema();
        let mut should: Vec<(Occur, Box<dyn Query>)> = vec![];
        for clause in &narrow.clauses {
            let query: Box<dyn Query> = match clause {
                Clause::Exact(value) => {
                    let field = schema
                        .get_field(&narrow.field)
                        .with_context(|| format!("Unknown search field {}", narrow.field))?;
                    Box::new(TermQuery::new(
                        Term::from_field_text(field, value),
                        IndexRecordOption::Basic,
                    ))
                }
                Clause::Range(range) => Box::new(self.price_query(range)),
            };
            should.push((Occur::Should, query));
        }
        Ok(Box::new(BooleanQuery::new(should)))
    }

    fn price_query(&self, range: &PriceRange) -> RangeQuery {
        let bound = |price: Option<Decimal>| match price.and_then(to_cents) {
            Some(cents) => Bound::Included(Term::from_field_u64(self.fields.price_cents, cents)),
            None => Bound::Unbounded,
        };
        RangeQuery::new(bound(range.from), bound(range.to))
    }

    fn count_facets(
        &self,
        searcher: &Searcher,
        docs: impl IntoIterator<Item = DocAddress>,
    ) -> anyhow::Result<FacetCounts> {
        let fields_by_key = self
            .facets
            .fields
            .iter()
            .filter_map(|facet| {
                self.index
                    .schema()
                    .get_field(&exact_field(&facet.field))
                    .ok()
                    .map(|field| (facet.key.clone(), field))
            })
            .collect::<Vec<_>>();
        let mut fields: BTreeMap<String, HashMap<String, usize>> = BTreeMap::new();
        let mut prices = vec![];
        for address in docs {
            let doc = searcher.doc::<TantivyDocument>(address)?;
            for (key, field) in &fields_by_key {
                let counts = fields.entry(key.clone()).or_default();
                for value in doc.get_all(*field).filter_map(|v| v.as_str()).unique() {
                    *counts.entry(value.to_string()).or_default() += 1;
                }
            }
            if let Some(cents) = doc.get_first(self.fields.price_cents).and_then(|v| v.as_u64()) {
                prices.push(Decimal::new(cents as i64, 2));
            }
        }

        let mut queries = BTreeMap::new();
        for facet in &self.facets.queries {
            for (_, range) in &facet.queries {
                let count = prices.iter().filter(|p| range.contains(**p)).count();
                if count > 0 {
                    queries.insert(format!("{}:{}", exact_field(&facet.field), range.as_query()), count);
                }
            }
        }

        Ok(FacetCounts {
            fields: fields
                .into_iter()
                .map(|(key, counts)| {
                    let values = counts
                        .into_iter()
                        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
                        .collect();
                    (key, values)
                })
                .collect(),
            queries,
        })
    }
}

fn to_cents(price: Decimal) -> Option<u64> {
    (price * Decimal::ONE_HUNDRED).round().max(Decimal::ZERO).to_u64()
}

#[async_trait]
impl SearchBackend for TantivySearchBackend {
    async fn search(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<SearchResultPage> {
        let searcher = self.reader.searcher();
        let tantivy_query = self.build_query(query)?;
        // The collector reserves offset + limit slots up front.
        let num_docs = searcher.num_docs() as usize;
        let top = TopDocs::with_limit(limit.min(num_docs).max(1)).and_offset(offset.min(num_docs));
        let (total, top_docs, matched) =
            searcher.search(&tantivy_query, &(Count, top, DocSetCollector))?;

        let mut hits = vec![];
        for (score, address) in top_docs.into_iter().take(limit) {
            let doc = searcher.doc::<TantivyDocument>(address)?;
            match doc.get_first(self.fields.id).and_then(|v| v.as_u64()) {
                Some(id) => hits.push(SearchHit {
                    product_id: id as i64,
                    score,
                    object: None,
                }),
                None => log::warn!("Indexed document {address:?} has no product id"),
            }
        }

        if query.load_all && !hits.is_empty() {
            let ids = hits.iter().map(|h| h.product_id).collect::<Vec<_>>();
            let mut products = self
                .products
                .get_many(&ids)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect::<HashMap<_, _>>();
            for hit in &mut hits {
                hit.object = products.remove(&hit.product_id);
            }
        }

        Ok(SearchResultPage {
            hits,
            total,
            facet_counts: self.count_facets(&searcher, matched)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::product::tests as products;
    use storefront_types::search::CATEGORY_FACET;
    use typesafe_repository::async_ops::Save;

    pub(crate) fn entry(id: i64, title: &str, categories: &[&str], price_cents: u64) -> IndexedProduct {
        IndexedProduct {
            id,
            title: title.to_string(),
            description: format!("{title} description"),
            product_class: Some("Books".to_string()),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            price_cents: Some(price_cents),
        }
    }

    async fn backend() -> TantivySearchBackend {
        let repo = products::repo().await;
        for (id, title) in [(1, "Dune"), (2, "Foundation"), (3, "Cosmos")] {
            repo.save(products::product(id, title, vec![])).await.unwrap();
        }
        let backend = TantivySearchBackend::new(FacetSettings::default(), Arc::new(repo)).unwrap();
        backend
            .replace_all(vec![
                entry(1, "Dune", &["Books", "Books > Fiction", "Books > Fiction > Sci-Fi"], 1500),
                entry(2, "Foundation", &["Books", "Books > Fiction"], 2500),
                entry(3, "Cosmos", &["Books", "Books > Non-Fiction"], 6500),
            ])
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn narrows_by_any_category() {
        let backend = backend().await;
        let query = SearchQuery::base().narrow(NarrowFilter::any_of(
            exact_field(CATEGORY_FACET),
            ["Books > Fiction > Sci-Fi", "Books > Non-Fiction"],
        ));
        let page = backend.search(&query, 0, 10).await.unwrap();
        assert_eq!(page.total, 2);
        let ids = page.hits.iter().map(|h| h.product_id).sorted().collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 3]);
        assert!(page.hits.iter().all(|h| h.object.is_none()));
    }

    #[tokio::test]
    async fn load_all_attaches_products() {
        let backend = backend().await;
        let page = backend
            .search(&SearchQuery::base().text("dune").load_all(), 0, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].object.as_ref().map(|p| p.title.as_str()), Some("Dune"));
    }

    #[tokio::test]
    async fn counts_facets_over_all_matches() {
        let backend = backend().await;
        let page = backend.search(&SearchQuery::base(), 0, 1).await.unwrap();
        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.total, 3);

        let categories = &page.facet_counts.fields["category"];
        assert_eq!(categories[0], ("Books".to_string(), 3));
        assert_eq!(categories[1], ("Books > Fiction".to_string(), 2));
        assert_eq!(page.facet_counts.fields["product_class"], vec![("Books".to_string(), 3)]);
        assert_eq!(page.facet_counts.queries.get("price_exact:[0 TO 20]"), Some(&1));
        assert_eq!(page.facet_counts.queries.get("price_exact:[20 TO 40]"), Some(&1));
        assert_eq!(page.facet_counts.queries.get("price_exact:[40 TO 60]"), None);
        assert_eq!(page.facet_counts.queries.get("price_exact:[60 TO *]"), Some(&1));
    }

    #[tokio::test]
    async fn narrows_by_price_range() {
        let backend = backend().await;
        let range = PriceRange::parse("[20 TO 40]").unwrap();
        let query = SearchQuery::base().narrow(NarrowFilter::any_range("price_exact", [range]));
        let page = backend.search(&query, 0, 10).await.unwrap();
        assert_eq!(page.hits.iter().map(|h| h.product_id).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn offsets_past_the_index_return_no_hits() {
        let backend = backend().await;
        let page = backend
            .search(&SearchQuery::base(), 100_000_000_000_000, 20)
            .await
            .unwrap();
        assert!(page.hits.is_empty());
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn replace_all_drops_old_documents() {
        let backend = backend().await;
        assert_eq!(backend.num_docs(), 3);
        backend.replace_all(vec![entry(9, "Solaris", &[], 100)]).unwrap();
        assert_eq!(backend.num_docs(), 1);
    }
}
