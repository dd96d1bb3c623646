use actix::prelude::*;
use actix_session::storage::CookieSessionStore;
use actix_session::SessionMiddleware;
use actix_web::cookie::Key;
use actix_web::middleware::TrailingSlash;
use actix_web::{web::Data, App, HttpServer};
use anyhow::Context as AnyhowContext;
use rand::{distributions, Rng};
use std::env;
use std::io::Write;
use std::sync::Arc;
use storefront::{
    alert::SqliteProductAlertRepository,
    catalogue::Catalogue,
    category::SqliteCategoryRepository,
    config::{CatalogueConfig, ServerConfig},
    control,
    product::SqliteProductRepository,
    review::SqliteReviewRepository,
    search::{indexer, TantivySearchBackend},
    tracking::{ProductViewTracker, SqliteViewStore},
};
use storefront_types::category::CategoryRepository;
use storefront_types::product::ProductRepository;
use storefront_types::signal::BrokerViewSignal;
use tokio_rusqlite::Connection;

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO,tantivy=warn");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::File::create(".env")?;
            envmnt::load_file(".env")?;
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }

    let server_config = ServerConfig::from_env();
    let catalogue_config = CatalogueConfig::from_env();
    if let Some(dir) = std::path::Path::new(&server_config.database).parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Unable to create {}", dir.display()))?;
    }

    // Each repository owns its connection to the same database file.
    let db = server_config.database.as_str();
    let product_repository: Arc<dyn ProductRepository> =
        Arc::new(SqliteProductRepository::init(Connection::open(db).await?).await?);
    let category_repository: Arc<dyn CategoryRepository> =
        Arc::new(SqliteCategoryRepository::init(Connection::open(db).await?).await?);
    let review_repository = Arc::new(SqliteReviewRepository::init(Connection::open(db).await?).await?);
    let alert_repository =
        Arc::new(SqliteProductAlertRepository::init(Connection::open(db).await?).await?);
    let view_store = SqliteViewStore::init(Connection::open(db).await?).await?;

    let search = Arc::new(TantivySearchBackend::new(
        catalogue_config.facets.clone(),
        product_repository.clone(),
    )?);
    if server_config.rebuild_index_on_startup {
        indexer::rebuild_index(
            &search,
            product_repository.as_ref(),
            category_repository.as_ref(),
        )
        .await
        .context("Unable to build search index")?;
    } else {
        log::warn!("Search index is empty until it is rebuilt");
    }

    let _tracker = ProductViewTracker::new(view_store.clone()).start();

    let folder = catalogue_config.template_folder.clone();
    let catalogue = Catalogue {
        products: product_repository,
        categories: category_repository,
        reviews: review_repository,
        alerts: alert_repository,
        search,
        product_renderer: Arc::new(control::catalogue::product_templates(&folder)),
        category_renderer: Arc::new(control::catalogue::category_templates(&folder)),
        signal: Arc::new(BrokerViewSignal),
        history: Arc::new(view_store),
        config: Arc::new(catalogue_config),
    };

    let secret_key = match envmnt::get_parse("SESSION_KEY") {
        Ok(v) => v,
        Err(envmnt::errors::EnvmntError::Missing(_)) => {
            let key = rand::thread_rng()
                .sample_iter(distributions::Alphanumeric)
                .take(64)
                .map(char::from)
                .collect::<String>();
            let mut f = std::fs::File::options().append(true).open(".env")?;
            f.write_all(format!("SESSION_KEY={key}\n").as_bytes())?;
            key
        }
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to read secret key: {err}"));
        }
    };
    let secret_key = Key::from(secret_key.as_bytes());

    let address = (server_config.host.clone(), server_config.port);
    log::info!("Listening on {}:{}", address.0, address.1);
    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Compress::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), secret_key.clone())
                    .cookie_http_only(true)
                    .cookie_secure(false)
                    .build(),
            )
            // canonical URLs end with a slash, so only duplicate slashes are merged
            .wrap(actix_web::middleware::NormalizePath::new(
                TrailingSlash::MergeOnly,
            ))
            .app_data(Data::new(catalogue.clone()))
            .service(actix_files::Files::new("/static", "static"))
            .service(control::catalogue::product_detail)
            .service(control::catalogue::browse)
            .default_service(actix_web::web::to(control::not_found))
    })
    .bind(address.clone())
    .with_context(|| format!("Failed to bind server to {}:{}", address.0, address.1))?
    .run()
    .await?;
    Ok(())
}
