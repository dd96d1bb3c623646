use crate::catalogue::category::{BrowseRequest, CategoryContext, CategoryParams, CategoryPresenter};
use crate::catalogue::product::{ProductContext, ProductPresenter};
use crate::catalogue::{Catalogue, PageResponse, TemplateRegistry};
use crate::control::{moved_permanently, ControllerError, CurrentUser, Response};
use actix_web::http::header::ContentType;
use actix_web::web::{Data, Path};
use actix_web::{get, HttpRequest, HttpResponse};
use askama::Template;
use storefront_types::product::Product;
use typesafe_repository::IdentityOf;

#[derive(Template)]
#[template(path = "catalogue/detail.html")]
pub struct ProductDetailPage<'a> {
    pub ctx: &'a ProductContext,
}

#[derive(Template)]
#[template(path = "catalogue/browse.html")]
pub struct BrowsePage<'a> {
    pub ctx: &'a CategoryContext,
}

/// Compiled detail templates, keyed the way product pages look them up.
pub fn product_templates(folder: &str) -> TemplateRegistry<ProductContext> {
    TemplateRegistry::new().register(format!("{folder}/detail.html"), |ctx: &ProductContext| {
        ProductDetailPage { ctx }.render()
    })
}

pub fn category_templates(folder: &str) -> TemplateRegistry<CategoryContext> {
    TemplateRegistry::new().register(format!("{folder}/browse.html"), |ctx: &CategoryContext| {
        BrowsePage { ctx }.render()
    })
}

/// `{slug}_{id}` from the last path segment. The slug may be empty.
pub fn product_id(key: &str) -> Option<IdentityOf<Product>> {
    let last = key.trim_matches('/').rsplit('/').next()?;
    let (_, id) = last.rsplit_once('_')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

fn into_response(page: PageResponse) -> HttpResponse {
    match page {
        PageResponse::Redirect(location) => moved_permanently(&location),
        PageResponse::Rendered(page) => HttpResponse::Ok()
            .content_type(ContentType::html())
            .body(page.body),
    }
}

fn full_path(req: &HttpRequest) -> &str {
    req.uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_else(|| req.path())
}

#[get("/product/{key:.*}")]
pub async fn product_detail(
    req: HttpRequest,
    key: Path<String>,
    user: CurrentUser,
    catalogue: Data<Catalogue>,
) -> Response {
    let id = product_id(&key).ok_or(ControllerError::NotFound)?;
    let page = ProductPresenter::new(&catalogue)
        .present(id, req.path(), &user.0)
        .await?;
    Ok(into_response(page))
}

#[get("/catalogue/{path:.*}")]
pub async fn browse(req: HttpRequest, path: Path<String>, catalogue: Data<Catalogue>) -> Response {
    let params = CategoryParams::from_path(&path);
    let request = BrowseRequest {
        path: req.path(),
        full_path: full_path(&req),
    };
    let page = CategoryPresenter::new(&catalogue)
        .present(&params, request)
        .await?;
    Ok(into_response(page))
}
