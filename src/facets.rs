use std::collections::BTreeMap;
use storefront_types::search::{
    exact_field, FacetCounts, FacetSettings, FieldFacet, NarrowFilter, PriceRange, QueryFacet,
};
use url::form_urlencoded;

pub const SELECTED_FACETS_PARAM: &str = "selected_facets";
pub const PAGE_PARAM: &str = "page";

/// `{field}_exact` to the values picked for it, in request order.
pub type SelectedFacets = BTreeMap<String, Vec<String>>;

/// A request path with its query string split into ordered pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryUrl {
    path: String,
    pairs: Vec<(String, String)>,
}

impl QueryUrl {
    pub fn parse(full_path: &str) -> Self {
        let (path, query) = full_path.split_once('?').unwrap_or((full_path, ""));
        Self {
            path: path.to_string(),
            pairs: form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn append(&self, key: &str, value: &str) -> Self {
        let mut url = self.clone();
        url.pairs.push((key.to_string(), value.to_string()));
        url
    }

    /// Drops every `key=value` pair.
    pub fn remove(&self, key: &str, value: &str) -> Self {
        let mut url = self.clone();
        url.pairs.retain(|(k, v)| !(k == key && v == value));
        url
    }

    /// Drops `key` whatever its value.
    pub fn without(&self, key: &str) -> Self {
        let mut url = self.clone();
        url.pairs.retain(|(k, _)| k != key);
        url
    }
}

impl std::fmt::Display for QueryUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.pairs.is_empty() {
            return write!(f, "{}", self.path);
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish();
        write!(f, "{}?{}", self.path, query)
    }
}

/// Reads `selected_facets=field:value` pairs, keeping only configured facets.
///
/// Query facet values must be one of the configured queries since they are
/// handed to the backend as range expressions.
pub fn selected_facets(url: &QueryUrl, settings: &FacetSettings) -> SelectedFacets {
    let mut selected = SelectedFacets::new();
    for raw in url.values(SELECTED_FACETS_PARAM) {
        let Some((field, value)) = raw.split_once(':') else {
            continue;
        };
        let known_field = settings.fields.iter().any(|f| exact_field(&f.field) == field);
        let known_query = settings.queries.iter().any(|q| {
            exact_field(&q.field) == field && q.queries.iter().any(|(_, r)| r.as_query() == value)
        });
        if !known_field && !known_query {
            log::debug!("Ignoring unknown facet selection {raw:?}");
            continue;
        }
        let values = selected.entry(field.to_string()).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }
    selected
}

/// Search restrictions implied by the selected facets.
pub fn narrows(selected: &SelectedFacets, settings: &FacetSettings) -> Vec<NarrowFilter> {
    selected
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(field, values)| {
            let is_query = settings.queries.iter().any(|q| &exact_field(&q.field) == field);
            if is_query {
                NarrowFilter::any_range(field.clone(), values.iter().filter_map(|v| PriceRange::parse(v)))
            } else {
                NarrowFilter::any_of(field.clone(), values.iter().cloned())
            }
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FacetResult {
    pub name: String,
    pub count: usize,
    pub show_count: bool,
    pub disabled: bool,
    pub selected: bool,
    pub select_url: Option<String>,
    pub deselect_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Facet {
    pub key: String,
    pub name: String,
    pub results: Vec<FacetResult>,
}

/// Facets in configuration order, field facets first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FacetData(pub Vec<Facet>);

impl FacetData {
    pub fn has_facets(&self) -> bool {
        self.0.iter().any(|f| !f.results.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&Facet> {
        self.0.iter().find(|f| f.key == key)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Facet> {
        self.0.iter()
    }
}

/// Turns raw backend counts into facet data with select/deselect links
/// relative to the current request.
pub struct FacetMunger<'a> {
    base_url: QueryUrl,
    selected: &'a SelectedFacets,
    counts: &'a FacetCounts,
    settings: &'a FacetSettings,
}

impl<'a> FacetMunger<'a> {
    pub fn new(
        full_path: &str,
        selected: &'a SelectedFacets,
        counts: &'a FacetCounts,
        settings: &'a FacetSettings,
    ) -> Self {
        Self {
            base_url: QueryUrl::parse(full_path),
            selected,
            counts,
            settings,
        }
    }

    pub fn facet_data(&self) -> FacetData {
        // nothing came back, so there is nothing to offer
        if self.counts.fields.is_empty() && self.counts.queries.is_empty() {
            return FacetData::default();
        }
        let fields = self.settings.fields.iter().map(|f| self.field_facet(f));
        let queries = self.settings.queries.iter().map(|q| self.query_facet(q));
        FacetData(fields.chain(queries).collect())
    }

    fn is_selected(&self, field_name: &str, value: &str) -> bool {
        self.selected
            .get(field_name)
            .is_some_and(|values| values.iter().any(|v| v == value))
    }

    fn link(&self, selected: bool, field_name: &str, value: &str, datum: &mut FacetResult) {
        let facet = format!("{field_name}:{value}");
        if selected {
            datum.deselect_url = Some(strip_pagination(
                &self.base_url.remove(SELECTED_FACETS_PARAM, &facet),
            ));
        } else {
            datum.select_url = Some(strip_pagination(
                &self.base_url.append(SELECTED_FACETS_PARAM, &facet),
            ));
        }
    }

    fn field_facet(&self, facet: &FieldFacet) -> Facet {
        let field_name = exact_field(&facet.field);
        let already_faceted = self.selected.contains_key(&field_name);
        let results = self
            .counts
            .fields
            .get(&facet.key)
            .into_iter()
            .flatten()
            .map(|(value, count)| {
                let selected = self.is_selected(&field_name, value);
                let mut datum = FacetResult {
                    name: value.clone(),
                    count: *count,
                    show_count: !already_faceted,
                    disabled: *count == 0 && !already_faceted,
                    selected,
                    ..Default::default()
                };
                self.link(selected, &field_name, value, &mut datum);
                datum
            })
            .collect();
        Facet {
            key: facet.key.clone(),
            name: facet.name.clone(),
            results,
        }
    }

    fn query_facet(&self, facet: &QueryFacet) -> Facet {
        let field_name = exact_field(&facet.field);
        let already_faceted = self.selected.contains_key(&field_name);
        let results = facet
            .queries
            .iter()
            .map(|(label, range)| {
                let query = range.as_query();
                match self.counts.queries.get(&format!("{field_name}:{query}")) {
                    None => FacetResult {
                        name: label.clone(),
                        count: 0,
                        show_count: true,
                        disabled: true,
                        ..Default::default()
                    },
                    Some(count) => {
                        let selected = self.is_selected(&field_name, &query);
                        let mut datum = FacetResult {
                            name: label.clone(),
                            count: *count,
                            show_count: selected || !already_faceted,
                            disabled: *count == 0 && !already_faceted,
                            selected,
                            ..Default::default()
                        };
                        self.link(selected, &field_name, &query, &mut datum);
                        datum
                    }
                }
            })
            .collect();
        Facet {
            key: facet.key.clone(),
            name: facet.name.clone(),
            results,
        }
    }
}

pub fn strip_pagination(url: &QueryUrl) -> String {
    url.without(PAGE_PARAM).to_string()
}
