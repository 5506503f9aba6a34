//! Restaurant documents: cached listing with fuzzy search and media filters,
//! and the create/edit/delete operations behind the admin forms.

use serde::Serialize;
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::backends::EnvBackends;
use crate::cache::{EnvCaches, MediaFolder};
use crate::config::Config;
use crate::error::{AdminError, Result};
use crate::firestore::{Document, DocumentStore, Fields};
use crate::import::transform::to_list;
use crate::media::{self, MediaInfo};
use crate::pagination::{paginate, Page};

const NAME_KEYS: [&str; 3] = ["name", "Name", "nom"];
const SEARCH_NAME_KEYS: [&str; 7] = ["raw_name", "Raw_name", "rawName", "name", "Name", "nom", "NOM"];

/// Form inputs that are never stored.
const RESERVED_FORM_KEYS: [&str; 3] = ["csrfmiddlewaretoken", "action", "id"];

/// Fills `name`, `address` and `raw_name` from their legacy spellings.
pub fn normalize_document(mut doc: Document) -> Document {
    let fallbacks: [(&str, &[&str]); 3] = [
        ("name", &["Name", "nom", "NOM"]),
        ("address", &["adresse", "Address"]),
        ("raw_name", &["Raw_name", "rawName"]),
    ];
    for (key, legacy) in fallbacks {
        if doc.get_str(key).is_some_and(|v| !v.trim().is_empty()) {
            continue;
        }
        if let Some(value) = doc.first_str(legacy).map(str::to_string) {
            doc.fields.insert(key.to_string(), Value::String(value));
        }
    }
    doc
}

/// The restaurants collection, normalized and cached per environment.
pub async fn load_restaurants(
    backends: &EnvBackends,
    caches: &EnvCaches,
    collection: &str,
    force_refresh: bool,
) -> Result<Arc<Vec<Document>>> {
    if !force_refresh {
        if let Some(cached) = caches.restaurants.get(&backends.env).await {
            return Ok(cached);
        }
    }
    let docs: Vec<Document> = backends
        .documents
        .list(collection)
        .await?
        .into_iter()
        .map(normalize_document)
        .collect();
    info!(env = %backends.env, count = docs.len(), "Restaurants loaded");
    let docs = Arc::new(docs);
    caches.restaurants.insert(backends.env, docs.clone()).await;
    Ok(docs)
}

pub fn display_name(doc: &Document) -> &str {
    doc.first_str(&NAME_KEYS).unwrap_or(&doc.id)
}

fn search_name(doc: &Document) -> String {
    doc.first_str(&SEARCH_NAME_KEYS)
        .unwrap_or_default()
        .to_lowercase()
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        current[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            current[j] = (previous[j] + 1)
                .min(current[j - 1] + 1)
                .min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Tolerant name match, from the strictest test to the loosest: exact,
/// prefix, substring, all words present, a close word (typo), a close
/// fragment inside a longer word, then any significant word present.
pub fn fuzzy_match(name: &str, search: &str) -> bool {
    let name = name.trim().to_lowercase();
    let search = search.trim().to_lowercase();
    if search.is_empty() {
        return true;
    }
    if name.is_empty() {
        return false;
    }
    if name == search || name.starts_with(&search) || name.contains(&search) {
        return true;
    }

    let search_words: Vec<&str> = search.split_whitespace().collect();
    let significant: Vec<&str> = search_words
        .iter()
        .copied()
        .filter(|w| w.chars().count() > 2)
        .collect();
    if search_words.len() > 1
        && !significant.is_empty()
        && significant.iter().all(|w| name.contains(w))
    {
        return true;
    }

    let search_len = search.chars().count();
    if search_len >= 4 {
        let word_threshold = (search_len / 3).clamp(1, 2);
        let name_words: Vec<&str> = name.split_whitespace().collect();
        if name_words
            .iter()
            .any(|word| levenshtein(&search, word) <= word_threshold)
        {
            return true;
        }

        let window_threshold = (search_len / 4).max(1);
        for word in &name_words {
            let chars: Vec<char> = word.chars().collect();
            if chars.len() <= search_len {
                continue;
            }
            let close = chars.windows(search_len).any(|window| {
                let fragment: String = window.iter().collect();
                levenshtein(&search, &fragment) <= window_threshold
            });
            if close {
                return true;
            }
        }
    }

    significant.iter().any(|w| name.contains(w))
}

#[derive(Debug, Clone, Default)]
pub struct RestaurantQuery {
    pub search: String,
    pub missing_photos: bool,
    pub missing_logos: bool,
    pub page: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestaurantRow {
    pub id: String,
    pub name: String,
    pub address: String,
    pub arrondissement: String,
    pub media: MediaInfo,
}

/// Filtered, sorted and paginated restaurants with the media of the page.
pub async fn list_restaurants(
    backends: &EnvBackends,
    caches: &EnvCaches,
    config: &Config,
    query: &RestaurantQuery,
) -> Result<Page<RestaurantRow>> {
    let docs = load_restaurants(backends, caches, &config.import.collection, false).await?;
    let ids: HashSet<String> = docs.iter().map(|d| d.id.clone()).collect();

    let mut selected: Vec<&Document> = docs
        .iter()
        .filter(|d| fuzzy_match(&search_name(d), &query.search))
        .collect();

    if query.missing_photos {
        let missing =
            media::missing_media(backends, caches, &config.storage, &ids, MediaFolder::Photos).await?;
        selected.retain(|d| missing.contains(&d.id));
    }
    if query.missing_logos {
        let missing =
            media::missing_media(backends, caches, &config.storage, &ids, MediaFolder::Logos).await?;
        selected.retain(|d| missing.contains(&d.id));
    }
    selected.sort_by_cached_key(|d| display_name(d).to_lowercase());
    debug!(search = %query.search, matched = selected.len(), "Restaurant filter applied");

    let page = paginate(selected, query.page, config.server.restaurants_page_size);
    let index = media::media_index(backends, caches, &config.storage, &ids).await?;
    Ok(page.map(|doc| RestaurantRow {
        id: doc.id.clone(),
        name: display_name(doc).to_string(),
        address: doc.get_str("address").unwrap_or_default().to_string(),
        arrondissement: doc
            .fields
            .get("arrondissement")
            .map(value_to_text)
            .unwrap_or_default(),
        media: index.info(&doc.id),
    }))
}

pub async fn get_restaurant(store: &dyn DocumentStore, collection: &str, id: &str) -> Result<Document> {
    store
        .get(collection, id)
        .await?
        .map(normalize_document)
        .ok_or_else(|| AdminError::NotFound(format!("Restaurant {}", id)))
}

/// Field values sorted by key for display, arrays joined with `, `.
pub fn display_fields(doc: &Document) -> BTreeMap<String, String> {
    doc.fields
        .iter()
        .map(|(k, v)| (k.clone(), value_to_text(v)))
        .collect()
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_to_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// Types a form value: booleans, integers and decimals are recognised,
/// everything else stays a string.
pub fn parse_form_value(value: &str) -> Value {
    let value = value.trim();
    match value.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    if !unsigned.is_empty() && unsigned.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = value.parse::<i64>() {
            return Value::Number(n.into());
        }
    }
    if unsigned.matches('.').count() == 1
        && unsigned.chars().all(|c| c.is_ascii_digit() || c == '.')
        && unsigned.chars().any(|c| c.is_ascii_digit())
    {
        if let Some(n) = value.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(value.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit,
}

/// Builds document fields from submitted form pairs.
///
/// `custom_field_name_N` / `custom_field_value_N` pairs add arbitrary fields.
/// On create empty values are dropped; on edit they clear the field. Fields
/// that are arrays on the existing document stay arrays.
pub fn form_to_fields(form: &[(String, String)], mode: FormMode, existing: Option<&Fields>) -> Fields {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut custom_names: BTreeMap<String, String> = BTreeMap::new();
    let mut custom_values: BTreeMap<String, String> = BTreeMap::new();

    for (key, value) in form {
        if let Some(n) = key.strip_prefix("custom_field_name_") {
            custom_names.insert(n.to_string(), value.trim().to_string());
        } else if let Some(n) = key.strip_prefix("custom_field_value_") {
            custom_values.insert(n.to_string(), value.clone());
        } else if !RESERVED_FORM_KEYS.contains(&key.as_str()) {
            pairs.push((key.clone(), value.clone()));
        }
    }
    for (n, name) in custom_names {
        if !name.is_empty() {
            pairs.push((name, custom_values.remove(&n).unwrap_or_default()));
        }
    }

    let mut fields = Fields::new();
    for (key, raw) in pairs {
        if raw.trim().is_empty() {
            if mode == FormMode::Edit {
                fields.insert(key, Value::Null);
            }
            continue;
        }
        let is_array = existing
            .and_then(|f| f.get(&key))
            .is_some_and(Value::is_array);
        let value = if is_array {
            Value::Array(to_list(&raw).into_iter().map(Value::String).collect())
        } else {
            parse_form_value(&raw)
        };
        fields.insert(key, value);
    }
    fields
}

pub async fn create_restaurant(
    backends: &EnvBackends,
    caches: &EnvCaches,
    collection: &str,
    form: &[(String, String)],
) -> Result<String> {
    let fields = form_to_fields(form, FormMode::Create, None);
    if fields.is_empty() {
        return Err(AdminError::Validation("Aucun champ renseigné".to_string()));
    }
    let id = backends.documents.add(collection, &fields).await?;
    caches.invalidate_restaurants(backends.env).await;
    info!(env = %backends.env, id = %id, "Restaurant created");
    Ok(id)
}

pub async fn update_restaurant(
    backends: &EnvBackends,
    caches: &EnvCaches,
    collection: &str,
    id: &str,
    form: &[(String, String)],
) -> Result<()> {
    let existing = get_restaurant(backends.documents.as_ref(), collection, id).await?;
    let fields = form_to_fields(form, FormMode::Edit, Some(&existing.fields));
    backends.documents.update(collection, id, &fields).await?;
    caches.invalidate_restaurants(backends.env).await;
    info!(env = %backends.env, id = %id, fields = fields.len(), "Restaurant updated");
    Ok(())
}

pub async fn delete_restaurant(
    backends: &EnvBackends,
    caches: &EnvCaches,
    collection: &str,
    id: &str,
) -> Result<()> {
    get_restaurant(backends.documents.as_ref(), collection, id).await?;
    backends.documents.delete(collection, id).await?;
    caches.invalidate_restaurants(backends.env).await;
    info!(env = %backends.env, id = %id, "Restaurant deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendProvider, MemoryBackends};
    use crate::environment::FirebaseEnv;
    use serde_json::json;

    fn pairs(values: &[(&str, &str)]) -> Vec<(String, String)> {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn fuzzy_search_tolerates_typos_and_word_order() {
        assert!(fuzzy_match("Le Petit Zinc", "petit"));
        assert!(fuzzy_match("Le Petit Zinc", "zinc petit"));
        assert!(fuzzy_match("Chez Janou", "janu"));
        assert!(fuzzy_match("Boulangerie Utopie", "utopei"));
        assert!(fuzzy_match("Pizzeria Popolare", "popolar"));
        assert!(!fuzzy_match("Chez Janou", "sushi"));
        assert!(fuzzy_match("Anything", ""));
        assert!(!fuzzy_match("", "zinc"));
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("café", "cafe"), 1);
    }

    #[test]
    fn form_values_are_typed() {
        assert_eq!(parse_form_value("TRUE"), json!(true));
        assert_eq!(parse_form_value("42"), json!(42));
        assert_eq!(parse_form_value("48.85"), json!(48.85));
        assert_eq!(parse_form_value("1.2.3"), json!("1.2.3"));
        assert_eq!(parse_form_value("75011 Paris"), json!("75011 Paris"));
    }

    #[test]
    fn form_fields_for_create_and_edit() {
        let form = pairs(&[
            ("name", "Zinc"),
            ("phone", ""),
            ("csrfmiddlewaretoken", "x"),
            ("custom_field_name_1", "note"),
            ("custom_field_value_1", "5"),
            ("types", "Bar, Bistrot"),
        ]);
        let created = form_to_fields(&form, FormMode::Create, None);
        assert_eq!(created.len(), 3);
        assert_eq!(created["note"], json!(5));
        assert_eq!(created["types"], json!("Bar, Bistrot"));

        let existing = json!({"types": ["Bar"]}).as_object().unwrap().clone();
        let edited = form_to_fields(&form, FormMode::Edit, Some(&existing));
        assert_eq!(edited["phone"], Value::Null);
        assert_eq!(edited["types"], json!(["Bar", "Bistrot"]));
    }

    #[test]
    fn legacy_names_are_normalized() {
        let doc = Document::new(
            "A",
            json!({"Name": "Zinc", "adresse": "1 rue A", "rawName": "zinc"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let doc = normalize_document(doc);
        assert_eq!(doc.get_str("name"), Some("Zinc"));
        assert_eq!(doc.get_str("address"), Some("1 rue A"));
        assert_eq!(doc.get_str("raw_name"), Some("zinc"));
    }

    #[tokio::test]
    async fn listing_filters_and_reports_media() {
        let backends = MemoryBackends::new();
        let dev = backends.for_env(FirebaseEnv::Dev).unwrap();
        let caches = EnvCaches::new(&Config::default().server);
        let config = Config::default();
        for (id, name) in [("ZINC", "Le Zinc"), ("BEAN", "Bean Bar"), ("ALPHA", "Alpha")] {
            let fields = json!({"name": name}).as_object().unwrap().clone();
            dev.documents.set("restaurants", id, &fields, false).await.unwrap();
        }
        dev.blobs.upload("Logos/ZINC1.png", vec![1], "image/png").await.unwrap();
        dev.blobs
            .upload("Photos restaurants/ZINC1.webp", vec![1], "image/webp")
            .await
            .unwrap();

        let all = list_restaurants(&dev, &caches, &config, &RestaurantQuery::default())
            .await
            .unwrap();
        let names: Vec<&str> = all.items.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Bean Bar", "Le Zinc"]);
        assert!(all.items[2].media.has_logo);
        assert_eq!(all.items[2].media.photos, vec![1]);

        let query = RestaurantQuery {
            missing_logos: true,
            ..Default::default()
        };
        let missing = list_restaurants(&dev, &caches, &config, &query).await.unwrap();
        assert_eq!(missing.total, 2);

        let query = RestaurantQuery {
            search: "bean".to_string(),
            ..Default::default()
        };
        let found = list_restaurants(&dev, &caches, &config, &query).await.unwrap();
        assert_eq!(found.items[0].id, "BEAN");
    }

    #[tokio::test]
    async fn create_edit_delete_round() {
        let backends = MemoryBackends::new();
        let dev = backends.for_env(FirebaseEnv::Dev).unwrap();
        let caches = EnvCaches::new(&Config::default().server);

        let id = create_restaurant(&dev, &caches, "restaurants", &pairs(&[("name", "Zinc"), ("rating", "4.5")]))
            .await
            .unwrap();
        update_restaurant(&dev, &caches, "restaurants", &id, &pairs(&[("rating", "")]))
            .await
            .unwrap();
        let doc = get_restaurant(dev.documents.as_ref(), "restaurants", &id).await.unwrap();
        assert_eq!(doc.fields["rating"], Value::Null);
        assert_eq!(doc.get_str("name"), Some("Zinc"));

        delete_restaurant(&dev, &caches, "restaurants", &id).await.unwrap();
        let err = delete_restaurant(&dev, &caches, "restaurants", &id).await.unwrap_err();
        assert!(matches!(err, AdminError::NotFound(_)));
    }
}
