use crate::config::CatalogueConfig;
use anyhow::anyhow;
use derive_more::Display;
use std::collections::HashMap;
use std::sync::Arc;
use storefront_types::alert::ProductAlertRepository;
use storefront_types::category::CategoryRepository;
use storefront_types::product::ProductRepository;
use storefront_types::review::ReviewRepository;
use storefront_types::search::SearchBackend;
use storefront_types::signal::{ViewHistory, ViewSignal};

pub mod category;
pub mod listing;
pub mod product;

use category::CategoryContext;
use product::ProductContext;

#[derive(Debug, Display, derive_more::Error)]
pub enum Error {
    NotFound,
    #[error(ignore)]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub template: String,
    pub body: String,
}

/// What a presenter wants sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageResponse {
    /// Permanent redirect to a canonical URL.
    Redirect(String),
    Rendered(RenderedPage),
}

pub trait Renderer<C>: Send + Sync {
    /// Renders with the first of `candidates` that exists.
    fn render(&self, candidates: &[String], ctx: &C) -> Result<RenderedPage, Error>;
}

type RenderFn<C> = Box<dyn Fn(&C) -> askama::Result<String> + Send + Sync>;

/// Template names mapped to compiled askama templates.
pub struct TemplateRegistry<C> {
    templates: HashMap<String, RenderFn<C>>,
}

impl<C> Default for TemplateRegistry<C> {
    fn default() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }
}

impl<C> TemplateRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S, F>(mut self, name: S, render: F) -> Self
    where
        S: Into<String>,
        F: Fn(&C) -> askama::Result<String> + Send + Sync + 'static,
    {
        self.templates.insert(name.into(), Box::new(render));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }
}

impl<C> Renderer<C> for TemplateRegistry<C> {
    fn render(&self, candidates: &[String], ctx: &C) -> Result<RenderedPage, Error> {
        let (template, render) = candidates
            .iter()
            .find_map(|name| self.templates.get(name).map(|r| (name, r)))
            .ok_or_else(|| anyhow!("None of the templates {candidates:?} exist"))?;
        let body = render(ctx).map_err(|err| anyhow!("Unable to render {template}: {err}"))?;
        Ok(RenderedPage {
            template: template.clone(),
            body,
        })
    }
}

/// Everything a catalogue page talks to. Shared between workers.
#[derive(Clone)]
pub struct Catalogue {
    pub products: Arc<dyn ProductRepository>,
    pub categories: Arc<dyn CategoryRepository>,
    pub reviews: Arc<dyn ReviewRepository>,
    pub alerts: Arc<dyn ProductAlertRepository>,
    pub search: Arc<dyn SearchBackend>,
    pub product_renderer: Arc<dyn Renderer<ProductContext>>,
    pub category_renderer: Arc<dyn Renderer<CategoryContext>>,
    pub signal: Arc<dyn ViewSignal>,
    pub history: Arc<dyn ViewHistory>,
    pub config: Arc<CatalogueConfig>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::category::tests as categories;
    use crate::product::tests as products;
    use crate::search::TantivySearchBackend;
    use crate::tracking::SqliteViewStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use storefront_types::alert::{AlertStatus, NewProductAlert, ProductAlert};
    use storefront_types::product::Product;
    use storefront_types::review::{NewReview, ProductReview, ReviewStatus};
    use storefront_types::search::{FacetSettings, SearchQuery, SearchResultPage};
    use storefront_types::signal::ProductViewed;
    use storefront_types::user::Customer;
    use typesafe_repository::IdentityOf;

    #[derive(Default)]
    pub(crate) struct CountingReviews {
        pub calls: AtomicUsize,
        pub reviews: Vec<ProductReview>,
    }

    #[async_trait]
    impl ReviewRepository for CountingReviews {
        async fn add(&self, _: NewReview) -> anyhow::Result<ProductReview> {
            Err(anyhow!("read only"))
        }

        async fn list_for_product(
            &self,
            product_id: IdentityOf<Product>,
            status: ReviewStatus,
        ) -> anyhow::Result<Vec<ProductReview>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .reviews
                .iter()
                .filter(|r| r.product_id == product_id && r.status == status)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub(crate) struct CountingAlerts {
        pub calls: AtomicUsize,
        pub active: Vec<(IdentityOf<Product>, IdentityOf<Customer>)>,
    }

    #[async_trait]
    impl ProductAlertRepository for CountingAlerts {
        async fn add(&self, _: NewProductAlert) -> anyhow::Result<ProductAlert> {
            Err(anyhow!("read only"))
        }

        async fn exists(
            &self,
            product_id: IdentityOf<Product>,
            user_id: IdentityOf<Customer>,
            status: AlertStatus,
        ) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(status == AlertStatus::Active && self.active.contains(&(product_id, user_id)))
        }
    }

    /// Wraps a real backend and remembers every query it was asked.
    pub(crate) struct RecordingSearch {
        pub inner: TantivySearchBackend,
        pub queries: Mutex<Vec<SearchQuery>>,
    }

    #[async_trait]
    impl SearchBackend for RecordingSearch {
        async fn search(
            &self,
            query: &SearchQuery,
            offset: usize,
            limit: usize,
        ) -> anyhow::Result<SearchResultPage> {
            self.queries.lock().unwrap().push(query.clone());
            self.inner.search(query, offset, limit).await
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSignal {
        pub events: Mutex<Vec<ProductViewed>>,
    }

    impl ViewSignal for RecordingSignal {
        fn product_viewed(&self, event: ProductViewed) {
            self.events.lock().unwrap().push(event);
        }
    }

    pub(crate) struct Fixture {
        pub catalogue: Catalogue,
        pub views: SqliteViewStore,
        pub reviews: Arc<CountingReviews>,
        pub alerts: Arc<CountingAlerts>,
        pub search: Arc<RecordingSearch>,
        pub signal: Arc<RecordingSignal>,
    }

    impl Fixture {
        pub(crate) fn search_calls(&self) -> usize {
            self.search.queries.lock().unwrap().len()
        }
    }

    fn echo_registry<C: 'static>(names: &[&str], describe: fn(&C) -> String) -> TemplateRegistry<C> {
        names.iter().fold(TemplateRegistry::new(), |registry, name| {
            let name = name.to_string();
            let template = name.clone();
            registry.register(name, move |ctx| Ok(format!("{template}: {}", describe(ctx))))
        })
    }

    /// Books > Fiction > Sci-Fi, Books > Non-Fiction and Clothing, with
    /// products spread over them and indexed for search.
    pub(crate) async fn fixture(config: CatalogueConfig) -> Fixture {
        fixture_with(config, vec![], vec![]).await
    }

    pub(crate) async fn fixture_with(
        config: CatalogueConfig,
        reviews: Vec<ProductReview>,
        active_alerts: Vec<(IdentityOf<Product>, IdentityOf<Customer>)>,
    ) -> Fixture {
        use typesafe_repository::async_ops::Save;

        let category_repo = Arc::new(categories::repo().await);
        let product_repo = Arc::new(products::repo().await);
        for p in [
            products::product(1, "Dune", vec![3]),
            products::product(2, "Foundation", vec![2]),
            products::product(3, "Cosmos", vec![4]),
            products::product(4, "Shirt", vec![5]),
        ] {
            product_repo.save(p).await.unwrap();
        }

        let backend = TantivySearchBackend::new(FacetSettings::default(), product_repo.clone()).unwrap();
        crate::search::indexer::rebuild_index(&backend, product_repo.as_ref(), category_repo.as_ref())
            .await
            .unwrap();
        let search = Arc::new(RecordingSearch {
            inner: backend,
            queries: Mutex::default(),
        });

        let reviews = Arc::new(CountingReviews {
            calls: AtomicUsize::new(0),
            reviews,
        });
        let alerts = Arc::new(CountingAlerts {
            calls: AtomicUsize::new(0),
            active: active_alerts,
        });
        let signal = Arc::new(RecordingSignal::default());
        let views = SqliteViewStore::init(tokio_rusqlite::Connection::open_in_memory().await.unwrap())
            .await
            .unwrap();
        let product_renderer = echo_registry::<ProductContext>(
            &["catalogue/detail.html", "catalogue/detail-for-class-books.html"],
            |ctx| ctx.product.title().to_string(),
        );
        let category_renderer = echo_registry::<CategoryContext>(&["catalogue/browse.html"], |ctx| {
            ctx.products.iter().map(|p| p.title().to_string()).collect::<Vec<_>>().join(",")
        });

        Fixture {
            catalogue: Catalogue {
                products: product_repo,
                categories: category_repo,
                reviews: reviews.clone(),
                alerts: alerts.clone(),
                search: search.clone(),
                product_renderer: Arc::new(product_renderer),
                category_renderer: Arc::new(category_renderer),
                signal: signal.clone(),
                history: Arc::new(views.clone()),
                config: Arc::new(config),
            },
            views,
            reviews,
            alerts,
            search,
            signal,
        }
    }

    #[test]
    fn registry_picks_first_existing_candidate() {
        let registry = TemplateRegistry::<String>::new()
            .register("catalogue/detail.html", |ctx: &String| Ok(format!("generic {ctx}")))
            .register("catalogue/detail-for-class-books.html", |ctx: &String| Ok(format!("books {ctx}")));
        let candidates = [
            "catalogue/detail-for-upc-ABC123.html".to_string(),
            "catalogue/detail-for-class-books.html".to_string(),
            "catalogue/detail.html".to_string(),
        ];
        let page = registry.render(&candidates, &"Dune".to_string()).unwrap();
        assert_eq!(page.template, "catalogue/detail-for-class-books.html");
        assert_eq!(page.body, "books Dune");
        assert!(registry.contains("catalogue/detail.html"));
    }

    #[test]
    fn registry_fails_without_candidates() {
        let registry = TemplateRegistry::<String>::new();
        let res = registry.render(&["catalogue/detail.html".to_string()], &String::new());
        assert!(matches!(res, Err(Error::Internal(_))));
    }
}
