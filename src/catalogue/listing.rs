use super::Error;
use async_trait::async_trait;
use std::sync::Arc;
use storefront_types::category::Category;
use storefront_types::product::{Browsable, Product, ProductRepository};
use storefront_types::search::{
    exact_field, FacetCounts, NarrowFilter, SearchBackend, SearchQuery, CATEGORY_FACET,
};
use typesafe_repository::IdentityOf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageRequest {
    Number(usize),
    Last,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::Number(1)
    }
}

impl PageRequest {
    /// `None` means the first page; anything but a positive number or
    /// `last` is not a page.
    pub fn parse(raw: Option<&str>) -> Result<Self, Error> {
        match raw.map(str::trim) {
            None => Ok(Self::default()),
            Some("last") => Ok(Self::Last),
            Some(n) => match n.parse::<usize>() {
                Ok(n) if n > 0 => Ok(Self::Number(n)),
                _ => Err(Error::NotFound),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Paginator {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl Paginator {
    /// Fails for pages past the end. The first page always exists.
    pub fn new(request: PageRequest, per_page: usize, total: usize) -> Result<Self, Error> {
        let per_page = per_page.max(1);
        let num_pages = Self::pages_for(per_page, total);
        let page = match request {
            PageRequest::Last => num_pages,
            PageRequest::Number(n) if n <= num_pages => n,
            PageRequest::Number(_) => return Err(Error::NotFound),
        };
        Ok(Self {
            page,
            per_page,
            total,
        })
    }

    fn pages_for(per_page: usize, total: usize) -> usize {
        total.div_ceil(per_page).max(1)
    }

    pub fn num_pages(&self) -> usize {
        Self::pages_for(self.per_page, self.total)
    }

    pub fn offset(&self) -> usize {
        (self.page - 1) * self.per_page
    }

    pub fn has_next(&self) -> bool {
        self.page < self.num_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn next_page(&self) -> Option<usize> {
        self.has_next().then_some(self.page + 1)
    }

    pub fn previous_page(&self) -> Option<usize> {
        self.has_previous().then(|| self.page - 1)
    }

    pub fn is_paginated(&self) -> bool {
        self.num_pages() > 1
    }
}

/// Categories whose products make up a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListingScope {
    pub ids: Vec<IdentityOf<Category>>,
    /// Full names of the same categories, as indexed for search.
    pub full_names: Vec<String>,
}

impl ListingScope {
    pub fn is_unrestricted(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ListingRequest {
    pub scope: ListingScope,
    pub page: PageRequest,
    pub per_page: usize,
    /// Facet selections; only search-backed listings can honour them.
    pub narrows: Vec<NarrowFilter>,
}

#[derive(Clone, Debug)]
pub struct ListingPage {
    pub products: Vec<Product>,
    pub paginator: Paginator,
    pub facet_counts: Option<FacetCounts>,
}

#[async_trait]
pub trait ProductListingSource: Send + Sync {
    async fn page(&self, request: &ListingRequest) -> Result<ListingPage, Error>;
}

pub struct DatabaseListingSource {
    pub products: Arc<dyn ProductRepository>,
}

#[async_trait]
impl ProductListingSource for DatabaseListingSource {
    async fn page(&self, request: &ListingRequest) -> Result<ListingPage, Error> {
        let by = Browsable::in_categories(request.scope.ids.iter().copied());
        let total = self.products.count_by(&by).await?;
        let paginator = Paginator::new(request.page, request.per_page, total)?;
        let products = self
            .products
            .select_page(&by, paginator.offset(), paginator.per_page)
            .await?;
        Ok(ListingPage {
            products,
            paginator,
            facet_counts: None,
        })
    }
}

pub struct SearchListingSource {
    pub backend: Arc<dyn SearchBackend>,
}

impl SearchListingSource {
    pub fn query(request: &ListingRequest) -> SearchQuery {
        let mut query = SearchQuery::base();
        if !request.scope.full_names.is_empty() {
            query = query.narrow(NarrowFilter::any_of(
                exact_field(CATEGORY_FACET),
                request.scope.full_names.iter().cloned(),
            ));
        }
        request
            .narrows
            .iter()
            .cloned()
            .fold(query, SearchQuery::narrow)
            .load_all()
    }
}

#[async_trait]
impl ProductListingSource for SearchListingSource {
    async fn page(&self, request: &ListingRequest) -> Result<ListingPage, Error> {
        let query = Self::query(request);
        let per_page = request.per_page.max(1);
        // Any page past the first is checked against the total before the
        // backend is asked for it.
        let page = match request.page {
            PageRequest::Number(1) => 1,
            page => {
                let total = self.backend.search(&query, 0, 0).await?.total;
                Paginator::new(page, per_page, total)?.page
            }
        };
        let offset = (page - 1) * per_page;
        let results = self.backend.search(&query, offset, per_page).await?;
        let paginator = Paginator::new(PageRequest::Number(page), per_page, results.total)?;
        let products = results
            .hits
            .into_iter()
            .filter_map(|hit| {
                if hit.object.is_none() {
                    log::warn!("Search hit {} has no product, index is stale", hit.product_id);
                }
                hit.object
            })
            .collect();
        Ok(ListingPage {
            products,
            paginator,
            facet_counts: Some(results.facet_counts),
        })
    }
}
