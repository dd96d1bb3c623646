use actix::fut::{ready, Ready};
use actix_session::{Session, SessionExt};
use actix_web::{
    dev::Payload,
    http::{header::ContentType, StatusCode},
    FromRequest, HttpRequest, HttpResponse,
};
use anyhow::anyhow;
use askama::Template;
use derive_more::{Display, Error};
use log_error::LogError;
use storefront_types::user::{Customer, RequestUser};

pub mod catalogue;

pub type Response = Result<HttpResponse, ControllerError>;

/// Session key holding the signed-in [`Customer`].
pub const CUSTOMER_SESSION_KEY: &str = "customer";

#[derive(Debug, Display, Error)]
pub enum ControllerError {
    NotFound,
    #[error(ignore)]
    InternalServerError(anyhow::Error),
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

impl From<crate::catalogue::Error> for ControllerError {
    fn from(err: crate::catalogue::Error) -> Self {
        use crate::catalogue::Error;
        match err {
            Error::NotFound => Self::NotFound,
            Error::Internal(err) => Self::InternalServerError(err),
        }
    }
}

impl actix_web::error::ResponseError for ControllerError {
    fn error_response(&self) -> HttpResponse {
        log::warn!("{self:?}\n");
        use ControllerError::*;
        match self {
            NotFound => NotFoundPage { user: None }
                .render()
                .log_error("Unable to render error template")
                .map(|res| {
                    HttpResponse::NotFound()
                        .content_type(ContentType::html())
                        .body(res)
                })
                .unwrap_or_else(|| HttpResponse::NotFound().body(())),
            InternalServerError(err) => InternalServerErrorPage {
                error: format!("{err:?}"),
                user: None,
            }
            .render()
            .log_error("Unable to render error template")
            .map(|res| {
                HttpResponse::InternalServerError()
                    .content_type(ContentType::html())
                    .body(res)
            })
            .unwrap_or_else(|| HttpResponse::InternalServerError().body(err.to_string())),
        }
    }
}

#[derive(Template)]
#[template(path = "500.html")]
pub struct InternalServerErrorPage {
    error: String,
    user: Option<Customer>,
}

#[derive(Template)]
#[template(path = "404.html")]
pub struct NotFoundPage {
    user: Option<Customer>,
}

pub async fn not_found(user: CurrentUser) -> Response {
    let mut res = render_template(NotFoundPage {
        user: user.0.customer().cloned(),
    })?;
    *res.status_mut() = StatusCode::NOT_FOUND;
    Ok(res)
}

pub fn render_template(t: impl Template) -> Result<HttpResponse, ControllerError> {
    let result = t
        .render()
        .map_err(|x| ControllerError::InternalServerError(anyhow!(x)))?;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(result))
}

pub fn moved_permanently(location: &str) -> HttpResponse {
    HttpResponse::MovedPermanently()
        .insert_header(("Location", location))
        .finish()
}

/// Whoever the session says issued the request. Unreadable sessions count
/// as anonymous.
#[derive(Clone, Debug, Default)]
pub struct CurrentUser(pub RequestUser);

impl CurrentUser {
    pub fn from_session(session: &Session) -> Self {
        match session.get::<Customer>(CUSTOMER_SESSION_KEY) {
            Ok(customer) => Self(customer.into()),
            Err(err) => {
                log::error!("Unable to extract customer from session:\n{err:?}");
                Self::default()
            }
        }
    }
}

impl FromRequest for CurrentUser {
    type Error = ControllerError;
    type Future = Ready<Result<Self, Self::Error>>;

    #[inline]
    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(Self::from_session(&req.get_session())))
    }
}
