use super::{Catalogue, Error, PageResponse};
use log_error::LogError;
use storefront_types::alert::{AlertStatus, ProductAlertForm, ProductAlertRepository};
use storefront_types::normalize_path;
use storefront_types::product::Product;
use storefront_types::review::{ProductReview, ReviewRepository, ReviewStatus};
use storefront_types::signal::ProductViewed;
use storefront_types::user::{Customer, RequestUser};
use typesafe_repository::async_ops::Get;
use typesafe_repository::IdentityOf;

#[derive(Clone, Debug)]
pub struct ProductContext {
    pub product: Product,
    pub reviews: Vec<ProductReview>,
    pub alert_form: ProductAlertForm,
    pub has_active_alert: bool,
    /// The customer's other recently viewed products, most recent first.
    pub recently_viewed: Vec<Product>,
}

/// Serves one product detail request.
pub struct ProductPresenter<'a> {
    catalogue: &'a Catalogue,
    product: Option<Product>,
}

impl<'a> ProductPresenter<'a> {
    pub fn new(catalogue: &'a Catalogue) -> Self {
        Self {
            catalogue,
            product: None,
        }
    }

    /// Looked up once; later calls reuse the first result.
    pub async fn resolve(&mut self, id: IdentityOf<Product>) -> Result<&Product, Error> {
        if self.product.is_none() {
            let product = self
                .catalogue
                .products
                .get_one(&id)
                .await?
                .ok_or(Error::NotFound)?;
            self.product = Some(product);
        }
        self.product.as_ref().ok_or(Error::NotFound)
    }

    /// Where the request should go instead, if anywhere.
    ///
    /// Variants always send visitors to their parent.
    pub fn canonicalize(&self, current_path: &str, product: &Product) -> Option<String> {
        if !self.catalogue.config.enforce_paths {
            return None;
        }
        if product.is_variant() {
            if let Some(parent) = &product.parent {
                return Some(parent.canonical_url());
            }
            log::warn!("Variant {} has no parent loaded", product.id);
        }
        let expected = product.canonical_url();
        if normalize_path(&expected) != normalize_path(current_path) {
            Some(expected)
        } else {
            None
        }
    }

    pub async fn build_context(
        &self,
        product: &Product,
        user: &RequestUser,
    ) -> Result<ProductContext, Error> {
        let reviews = self
            .catalogue
            .reviews
            .list_for_product(product.id, ReviewStatus::Approved)
            .await?;
        let has_active_alert = match user.customer() {
            Some(customer) => {
                self.catalogue
                    .alerts
                    .exists(product.id, customer.id, AlertStatus::Active)
                    .await?
            }
            None => false,
        };
        let recently_viewed = match user.customer() {
            Some(customer) => self
                .recently_viewed(customer, product)
                .await
                .log_error("Unable to load recently viewed products")
                .unwrap_or_default(),
            None => vec![],
        };
        Ok(ProductContext {
            product: product.clone(),
            reviews,
            alert_form: ProductAlertForm::new(user, product),
            has_active_alert,
            recently_viewed,
        })
    }

    /// Excludes the product being shown. Ids whose product is gone are skipped.
    async fn recently_viewed(
        &self,
        customer: &Customer,
        product: &Product,
    ) -> anyhow::Result<Vec<Product>> {
        let limit = self.catalogue.config.recently_viewed;
        if limit == 0 {
            return Ok(vec![]);
        }
        let ids = self
            .catalogue
            .history
            .recently_viewed(customer.id, limit + 1)
            .await?
            .into_iter()
            .filter(|id| *id != product.id)
            .take(limit)
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.catalogue.products.get_many(&ids).await
    }

    /// Most specific first.
    pub fn select_templates(&self, product: &Product) -> Vec<String> {
        let config = &self.catalogue.config;
        if let Some(template) = &config.detail_template {
            return vec![template.clone()];
        }
        let folder = &config.template_folder;
        let mut names = vec![];
        if !product.upc.is_empty() {
            names.push(format!("{folder}/detail-for-upc-{}.html", product.upc));
        }
        if let Some(class) = product.product_class() {
            names.push(format!("{folder}/detail-for-class-{}.html", class.slug));
        }
        names.push(format!("{folder}/detail.html"));
        names
    }

    pub fn on_rendered(&self, product: &Product, user: &RequestUser, path: &str, status: u16) {
        self.catalogue.signal.product_viewed(ProductViewed {
            product_id: product.id,
            upc: product.upc.clone(),
            user: user.customer().cloned(),
            path: path.to_string(),
            status,
        });
    }

    pub async fn present(
        &mut self,
        id: IdentityOf<Product>,
        current_path: &str,
        user: &RequestUser,
    ) -> Result<PageResponse, Error> {
        let product = self.resolve(id).await?.clone();
        if let Some(url) = self.canonicalize(current_path, &product) {
            return Ok(PageResponse::Redirect(url));
        }
        let ctx = self.build_context(&product, user).await?;
        let page = self
            .catalogue
            .product_renderer
            .render(&self.select_templates(&product), &ctx)?;
        self.on_rendered(&product, user, current_path, 200);
        Ok(PageResponse::Rendered(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::tests::{fixture, fixture_with};
    use crate::config::CatalogueConfig;
    use std::sync::atomic::Ordering;
    use storefront_types::product::Structure;
    use typesafe_repository::async_ops::Save;

    fn customer() -> RequestUser {
        RequestUser::Authenticated(Customer {
            id: 7,
            email: "reader@example.com".to_string(),
        })
    }

    fn review(id: i64, status: ReviewStatus) -> ProductReview {
        ProductReview {
            id,
            product_id: 1,
            title: format!("Review {id}"),
            body: String::new(),
            score: 5,
            user_id: None,
            name: String::new(),
            status,
            created_at: id,
        }
    }

    #[tokio::test]
    async fn resolves_once_per_request() {
        let f = fixture(CatalogueConfig::default()).await;
        let mut presenter = ProductPresenter::new(&f.catalogue);
        assert_eq!(presenter.resolve(1).await.unwrap().title, "Dune");
        // a second lookup would find nothing for this id
        assert_eq!(presenter.resolve(99).await.unwrap().id, 1);

        let mut presenter = ProductPresenter::new(&f.catalogue);
        assert!(matches!(presenter.resolve(99).await, Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn variants_redirect_to_parent_whatever_the_path() {
        let f = fixture(CatalogueConfig::default()).await;
        let mut parent = crate::product::tests::product(10, "Shirt", vec![]);
        parent.structure = Structure::Parent;
        let variant = Product {
            id: 11,
            title: String::new(),
            product_class: None,
            structure: Structure::Child,
            parent: Some(Box::new(parent.clone())),
            ..parent.clone()
        };
        let presenter = ProductPresenter::new(&f.catalogue);
        for path in ["/product/shirt_11/", "/product/anything/", "/product/shirt_10/"] {
            assert_eq!(
                presenter.canonicalize(path, &variant).as_deref(),
                Some("/product/shirt_10/")
            );
        }
    }

    #[tokio::test]
    async fn canonical_comparison_ignores_escaping() {
        let f = fixture(CatalogueConfig::default()).await;
        let mut product = crate::product::tests::product(5, "Kopfhörer", vec![]);
        product.slug = "kopfhörer".to_string();
        let presenter = ProductPresenter::new(&f.catalogue);
        assert_eq!(presenter.canonicalize("/product/kopfh%C3%B6rer_5/", &product), None);
        assert_eq!(presenter.canonicalize("/product/kopfhörer_5/", &product), None);
        assert_eq!(
            presenter.canonicalize("/product/old_5/", &product).as_deref(),
            Some("/product/kopfh%C3%B6rer_5/")
        );

        let relaxed = fixture(CatalogueConfig {
            enforce_paths: false,
            ..Default::default()
        })
        .await;
        let presenter = ProductPresenter::new(&relaxed.catalogue);
        assert_eq!(presenter.canonicalize("/product/old_5/", &product), None);
    }

    #[tokio::test]
    async fn anonymous_users_skip_alert_lookup() {
        let f = fixture_with(
            CatalogueConfig::default(),
            vec![
                review(1, ReviewStatus::Approved),
                review(2, ReviewStatus::ForModeration),
                review(3, ReviewStatus::Rejected),
            ],
            vec![(1, 7)],
        )
        .await;
        let presenter = ProductPresenter::new(&f.catalogue);
        let product = crate::product::tests::product(1, "Dune", vec![]);

        let ctx = presenter.build_context(&product, &RequestUser::Anonymous).await.unwrap();
        assert!(!ctx.has_active_alert);
        assert!(ctx.alert_form.requires_email);
        assert_eq!(f.alerts.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.reviews.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);

        let ctx = presenter.build_context(&product, &customer()).await.unwrap();
        assert!(ctx.has_active_alert);
        assert_eq!(ctx.alert_form.email.as_deref(), Some("reader@example.com"));
        assert_eq!(f.alerts.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn customers_see_their_other_recent_views() {
        let f = fixture(CatalogueConfig::default()).await;
        for (product_id, at) in [(2, 10), (1, 20), (3, 30), (2, 40)] {
            f.views.record_for_user(7, product_id, at).await.unwrap();
        }
        f.views.record_for_user(8, 4, 50).await.unwrap();
        let product = f.catalogue.products.get_one(&1).await.unwrap().unwrap();
        let presenter = ProductPresenter::new(&f.catalogue);

        let ctx = presenter.build_context(&product, &customer()).await.unwrap();
        let titles = ctx.recently_viewed.iter().map(|p| p.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Foundation", "Cosmos"]);

        let ctx = presenter.build_context(&product, &RequestUser::Anonymous).await.unwrap();
        assert!(ctx.recently_viewed.is_empty());

        let limited = fixture(CatalogueConfig {
            recently_viewed: 1,
            ..Default::default()
        })
        .await;
        for (product_id, at) in [(3, 10), (1, 20), (2, 30)] {
            limited.views.record_for_user(7, product_id, at).await.unwrap();
        }
        let ctx = ProductPresenter::new(&limited.catalogue)
            .build_context(&product, &customer())
            .await
            .unwrap();
        assert_eq!(ctx.recently_viewed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn templates_go_from_upc_to_class_to_generic() {
        let f = fixture(CatalogueConfig::default()).await;
        let presenter = ProductPresenter::new(&f.catalogue);
        let mut product = crate::product::tests::product(1, "Dune", vec![]);
        product.upc = "ABC123".to_string();
        assert_eq!(
            presenter.select_templates(&product),
            vec![
                "catalogue/detail-for-upc-ABC123.html",
                "catalogue/detail-for-class-books.html",
                "catalogue/detail.html",
            ]
        );

        let custom = fixture(CatalogueConfig {
            detail_template: Some("shop/product.html".to_string()),
            ..Default::default()
        })
        .await;
        let presenter = ProductPresenter::new(&custom.catalogue);
        assert_eq!(presenter.select_templates(&product), vec!["shop/product.html"]);
    }

    #[tokio::test]
    async fn renders_and_signals_view() {
        let f = fixture(CatalogueConfig::default()).await;
        let mut presenter = ProductPresenter::new(&f.catalogue);
        let res = presenter.present(1, "/product/dune_1/", &customer()).await.unwrap();
        let page = match res {
            PageResponse::Rendered(page) => page,
            other => panic!("expected a rendered page, got {other:?}"),
        };
        assert_eq!(page.template, "catalogue/detail-for-class-books.html");
        assert_eq!(page.body, "catalogue/detail-for-class-books.html: Dune");

        let events = f.signal.events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].product_id, 1);
        assert_eq!(events[0].status, 200);
        assert_eq!(events[0].user.as_ref().map(|c| c.id), Some(7));
    }

    #[tokio::test]
    async fn redirects_skip_rendering_and_signals() {
        let f = fixture(CatalogueConfig::default()).await;
        let mut presenter = ProductPresenter::new(&f.catalogue);
        let res = presenter
            .present(2, "/product/old-name_2/", &RequestUser::Anonymous)
            .await
            .unwrap();
        assert_eq!(res, PageResponse::Redirect("/product/foundation_2/".to_string()));
        assert!(f.signal.events.lock().unwrap().is_empty());
        assert_eq!(f.reviews.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn saved_variant_redirects_through_presenter() {
        let f = fixture(CatalogueConfig::default()).await;
        let mut parent = crate::product::tests::product(10, "Shirt", vec![]);
        parent.structure = Structure::Parent;
        f.catalogue.products.save(parent.clone()).await.unwrap();
        f.catalogue
            .products
            .save(Product {
                id: 11,
                title: String::new(),
                product_class: None,
                structure: Structure::Child,
                parent: Some(Box::new(parent)),
                ..crate::product::tests::product(11, "", vec![])
            })
            .await
            .unwrap();
        let mut presenter = ProductPresenter::new(&f.catalogue);
        let res = presenter
            .present(11, "/product/shirt_11/", &RequestUser::Anonymous)
            .await
            .unwrap();
        assert_eq!(res, PageResponse::Redirect("/product/shirt_10/".to_string()));
    }
}
