use storefront_types::search::FacetSettings;

pub const DEFAULT_PER_PAGE: usize = 20;
pub const DEFAULT_TEMPLATE_FOLDER: &str = "catalogue";
pub const DEFAULT_ALL_PRODUCTS_LABEL: &str = "All products";
pub const DEFAULT_RECENTLY_VIEWED: usize = 20;

#[derive(Clone, Debug)]
pub struct CatalogueConfig {
    pub per_page: usize,
    /// Redirect requests that do not use a canonical URL.
    pub enforce_paths: bool,
    pub use_search_backend: bool,
    /// Replaces the computed detail template candidates when set.
    pub detail_template: Option<String>,
    pub template_folder: String,
    pub all_products_label: String,
    /// How many recently viewed products a product page shows; 0 turns it off.
    pub recently_viewed: usize,
    pub facets: FacetSettings,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            enforce_paths: true,
            use_search_backend: true,
            detail_template: None,
            template_folder: DEFAULT_TEMPLATE_FOLDER.to_string(),
            all_products_label: DEFAULT_ALL_PRODUCTS_LABEL.to_string(),
            recently_viewed: DEFAULT_RECENTLY_VIEWED,
            facets: FacetSettings::default(),
        }
    }
}

impl CatalogueConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            per_page: envmnt::get_parse("CATALOGUE_PER_PAGE")
                .ok()
                .filter(|v: &usize| *v > 0)
                .unwrap_or(defaults.per_page),
            enforce_paths: env_flag("CATALOGUE_ENFORCE_PATHS", defaults.enforce_paths),
            use_search_backend: env_flag("CATALOGUE_USE_SEARCH", defaults.use_search_backend),
            detail_template: envmnt::get_parse("CATALOGUE_DETAIL_TEMPLATE")
                .ok()
                .filter(|t: &String| !t.trim().is_empty()),
            template_folder: envmnt::get_parse("CATALOGUE_TEMPLATE_FOLDER")
                .unwrap_or(defaults.template_folder),
            all_products_label: envmnt::get_parse("CATALOGUE_ALL_PRODUCTS_LABEL")
                .unwrap_or(defaults.all_products_label),
            recently_viewed: envmnt::get_parse("CATALOGUE_RECENTLY_VIEWED")
                .unwrap_or(defaults.recently_viewed),
            facets: defaults.facets,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub rebuild_index_on_startup: bool,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: envmnt::get_parse("HOST").unwrap_or("0.0.0.0".to_string()),
            port: envmnt::get_parse("PORT").unwrap_or(8080),
            database: envmnt::get_parse("DATABASE").unwrap_or("storage/storefront.db".to_string()),
            rebuild_index_on_startup: env_flag("REBUILD_INDEX_ON_STARTUP", true),
        }
    }
}

pub fn env_flag(key: &str, default_value: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => parse_flag(&raw).unwrap_or(default_value),
        Err(_) => default_value,
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
