use super::listing::{
    DatabaseListingSource, ListingPage, ListingRequest, ListingScope, PageRequest, Paginator,
    ProductListingSource, SearchListingSource,
};
use super::{Catalogue, Error, PageResponse};
use crate::facets::{self, FacetData, FacetMunger, QueryUrl, SelectedFacets, PAGE_PARAM};
use storefront_types::category::{ancestors_in, BySlug, Category, CategoryRepository, Lineage};
use storefront_types::normalize_path;
use storefront_types::product::Product;
use typesafe_repository::async_ops::{Get, Select};
use typesafe_repository::IdentityOf;

/// How the request names its category, if at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategoryParams {
    pub id: Option<IdentityOf<Category>>,
    pub slug: Option<String>,
}

impl CategoryParams {
    /// Reads `{path}_{id}/`, a bare `{path}/` whose last segment is a slug,
    /// or an empty path for the whole catalogue.
    pub fn from_path(path: &str) -> Self {
        let Some(last) = path.trim_matches('/').rsplit('/').next().filter(|s| !s.is_empty()) else {
            return Self::default();
        };
        match last.rsplit_once('_') {
            Some((slug, id)) if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) => Self {
                id: id.parse().ok(),
                slug: Some(slug.to_string()),
            },
            _ => Self {
                id: None,
                slug: Some(last.to_string()),
            },
        }
    }
}

/// The parts of the request a listing depends on.
#[derive(Clone, Copy, Debug)]
pub struct BrowseRequest<'r> {
    pub path: &'r str,
    /// Path with query string, used to build facet and page links.
    pub full_path: &'r str,
}

#[derive(Clone, Debug)]
pub struct CategoryContext {
    pub category: Option<Category>,
    pub lineage: Lineage,
    pub summary: String,
    pub products: Vec<Product>,
    pub paginator: Paginator,
    pub facet_data: FacetData,
    pub has_facets: bool,
    pub previous_url: Option<String>,
    pub next_url: Option<String>,
}

pub struct Listing {
    pub source: Box<dyn ProductListingSource>,
    pub scope: ListingScope,
}

#[derive(Clone, Debug, Default)]
pub struct ShapedResults {
    pub facet_data: FacetData,
    pub has_facets: bool,
    pub products: Vec<Product>,
}

/// Serves one category listing request.
pub struct CategoryPresenter<'a> {
    catalogue: &'a Catalogue,
    category: Option<Option<Category>>,
    lineage: Option<Lineage>,
}

impl<'a> CategoryPresenter<'a> {
    pub fn new(catalogue: &'a Catalogue) -> Self {
        Self {
            catalogue,
            category: None,
            lineage: None,
        }
    }

    /// By id first, then by slug. Naming a category that does not exist is
    /// an error; naming none means the whole catalogue.
    pub async fn resolve_category(
        &mut self,
        params: &CategoryParams,
    ) -> Result<Option<Category>, Error> {
        if let Some(category) = &self.category {
            return Ok(category.clone());
        }
        let categories = &self.catalogue.categories;
        let category = match (params.id, &params.slug) {
            (Some(id), _) => Some(categories.get_one(&id).await?.ok_or(Error::NotFound)?),
            (None, Some(slug)) => Some(
                categories
                    .select(&BySlug(slug.clone()))
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(Error::NotFound)?,
            ),
            (None, None) => None,
        };
        self.category = Some(category.clone());
        Ok(category)
    }

    /// The category and its ancestors, root first. Computed once per request.
    pub async fn ancestor_lineage(&mut self, category: Option<&Category>) -> Result<Lineage, Error> {
        if let Some(lineage) = &self.lineage {
            return Ok(lineage.clone());
        }
        let lineage = match category {
            Some(category) => {
                let lineage = self.catalogue.categories.ancestors(&category.id).await?;
                if lineage.is_empty() {
                    Lineage::new(vec![category.clone()])
                } else {
                    lineage
                }
            }
            None => Lineage::default(),
        };
        self.lineage = Some(lineage.clone());
        Ok(lineage)
    }

    pub async fn canonicalize(
        &mut self,
        current_path: &str,
        category: Option<&Category>,
    ) -> Result<Option<String>, Error> {
        if category.is_none() || !self.catalogue.config.enforce_paths {
            return Ok(None);
        }
        let lineage = self.ancestor_lineage(category).await?;
        Ok(lineage
            .canonical_url()
            .filter(|expected| normalize_path(expected) != normalize_path(current_path)))
    }

    pub fn summary_label(&self, category: Option<&Category>) -> String {
        match category {
            Some(category) => category.name.clone(),
            None => self.catalogue.config.all_products_label.clone(),
        }
    }

    /// The category and its whole subtree, with the full names search knows
    /// them by. Search indexes every ancestor name of a product's categories,
    /// so both backends list the same products.
    pub async fn listing_scope(&mut self, category: Option<&Category>) -> Result<ListingScope, Error> {
        let Some(category) = category else {
            return Ok(ListingScope::default());
        };
        let lineage = self.ancestor_lineage(Some(category)).await?;
        let mut listed = self.catalogue.categories.descendants(&category.id).await?;
        if listed.is_empty() {
            listed.push(category.clone());
        }
        let snapshot = lineage.iter().chain(listed.iter()).cloned().collect::<Vec<_>>();
        Ok(ListingScope {
            ids: listed.iter().map(|c| c.id).collect(),
            full_names: listed
                .iter()
                .map(|c| ancestors_in(&snapshot, c).full_name())
                .collect(),
        })
    }

    pub async fn choose_listing(&mut self, category: Option<&Category>) -> Result<Listing, Error> {
        let scope = self.listing_scope(category).await?;
        let source: Box<dyn ProductListingSource> = if self.catalogue.config.use_search_backend {
            Box::new(SearchListingSource {
                backend: self.catalogue.search.clone(),
            })
        } else {
            Box::new(DatabaseListingSource {
                products: self.catalogue.products.clone(),
            })
        };
        Ok(Listing { source, scope })
    }

    pub fn shape_search_results(
        &self,
        full_path: &str,
        selected: &SelectedFacets,
        page: ListingPage,
    ) -> ShapedResults {
        let facet_data = match &page.facet_counts {
            Some(counts) => {
                FacetMunger::new(full_path, selected, counts, &self.catalogue.config.facets)
                    .facet_data()
            }
            None => FacetData::default(),
        };
        ShapedResults {
            has_facets: facet_data.has_facets(),
            facet_data,
            products: page.products,
        }
    }

    pub async fn build_context(
        &mut self,
        category: Option<&Category>,
        request: BrowseRequest<'_>,
    ) -> Result<CategoryContext, Error> {
        let config = self.catalogue.config.clone();
        let url = QueryUrl::parse(request.full_path);
        let page = PageRequest::parse(url.values(PAGE_PARAM).last())?;
        let selected = facets::selected_facets(&url, &config.facets);

        let listing = self.choose_listing(category).await?;
        let listing_page = listing
            .source
            .page(&ListingRequest {
                scope: listing.scope,
                page,
                per_page: config.per_page,
                narrows: facets::narrows(&selected, &config.facets),
            })
            .await?;
        let paginator = listing_page.paginator;
        let shaped = self.shape_search_results(request.full_path, &selected, listing_page);

        let page_url = |n: usize| url.without(PAGE_PARAM).append(PAGE_PARAM, &n.to_string()).to_string();
        Ok(CategoryContext {
            category: category.cloned(),
            lineage: self.ancestor_lineage(category).await?,
            summary: self.summary_label(category),
            products: shaped.products,
            paginator,
            facet_data: shaped.facet_data,
            has_facets: shaped.has_facets,
            previous_url: paginator.previous_page().map(page_url),
            next_url: paginator.next_page().map(page_url),
        })
    }

    pub async fn present(
        &mut self,
        params: &CategoryParams,
        request: BrowseRequest<'_>,
    ) -> Result<PageResponse, Error> {
        let category = self.resolve_category(params).await?;
        if let Some(url) = self.canonicalize(request.path, category.as_ref()).await? {
            return Ok(PageResponse::Redirect(url));
        }
        let ctx = self.build_context(category.as_ref(), request).await?;
        let templates = [format!("{}/browse.html", self.catalogue.config.template_folder)];
        let page = self.catalogue.category_renderer.render(&templates, &ctx)?;
        Ok(PageResponse::Rendered(page))
    }
}
