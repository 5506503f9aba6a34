//! Onboarding restaurants: a short list (name, tag, lieu, spécialité) imported
//! from its own workbook into its own collection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::backends::EnvBackends;
use crate::environment::FirebaseEnv;
use crate::error::{AdminError, Result};
use crate::firestore::{Document, DocumentStore, Fields};
use crate::import::sheet::{read_sheet, Sheet, SheetRow};

const NAME_COLUMNS: [&str; 4] = ["Nom du restaurant", "Nom", "nom du restaurant", "nom"];
const TAG_COLUMNS: [&str; 3] = ["Tag", "tag", "TAG"];
const LIEU_COLUMNS: [&str; 3] = ["Lieu", "lieu", "LIEU"];
const SPECIALITE_COLUMNS: [&str; 5] = ["Spécialité", "Specialité", "specialite", "Spécialite", "SPECIALITE"];

pub const LIEU_COFFEE_SHOP: &str = "Coffee shop";
pub const LIEU_BAR: &str = "Bar";
pub const LIEU_RESTAURANT: &str = "Restaurant";

pub const CSV_HEADERS: [&str; 4] = ["Nom du restaurant", "Tag", "Lieu", "Spécialité"];
pub const CSV_FILE_NAME: &str = "onboarding_restaurants.csv";

/// Trimmed cell text, `None` for blanks and spreadsheet null markers.
fn clean_cell(value: &str) -> Option<String> {
    let cleaned = value.replace('\u{00a0}', " ").replace('\u{200b}', "");
    let cleaned = cleaned.trim();
    match cleaned.to_ascii_lowercase().as_str() {
        "" | "nan" | "none" | "null" => None,
        _ => Some(cleaned.to_string()),
    }
}

/// Canonical lieu for the accepted spellings, `None` when unknown.
pub fn normalize_lieu(value: &str) -> Option<&'static str> {
    match value.trim().to_lowercase().as_str() {
        "coffee shop" | "coffeeshop" | "coffee" | "café" | "cafe" => Some(LIEU_COFFEE_SHOP),
        "bar" | "bars" => Some(LIEU_BAR),
        "restaurant" | "resto" => Some(LIEU_RESTAURANT),
        _ => None,
    }
}

fn lieu_rank(lieu: &str) -> u8 {
    match lieu {
        LIEU_COFFEE_SHOP => 0,
        LIEU_BAR => 1,
        LIEU_RESTAURANT => 2,
        _ => 9,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnboardingRecord {
    pub id: String,
    pub name: String,
    pub tag: String,
    pub lieu: String,
    pub specialite: Option<String>,
}

impl OnboardingRecord {
    pub fn to_fields(&self, now: &str) -> Fields {
        let value = json!({
            "id": self.id,
            "name": self.name,
            "tag": self.tag,
            "lieu": self.lieu,
            "specialite": self.specialite,
            "logo_url": Value::Null,
            "image_urls": [],
            "created_at": now,
            "updated_at": now,
        });
        match value {
            Value::Object(fields) => fields,
            _ => Fields::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OnboardingReport {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub skipped_rows: usize,
    pub errors: Vec<String>,
    pub by_lieu: BTreeMap<String, usize>,
    pub by_specialite: BTreeMap<String, usize>,
    pub sheet_name: String,
    pub available_sheets: Vec<String>,
    pub columns_found: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct OnboardingPreview {
    pub env: FirebaseEnv,
    pub prepared_at: DateTime<Utc>,
    pub source_name: String,
    pub records: Vec<OnboardingRecord>,
    pub report: OnboardingReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnboardingOutcome {
    pub success: bool,
    pub imported: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
    pub env: FirebaseEnv,
}

fn find_column<'a>(headers: &'a [String], aliases: &[&str]) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| aliases.contains(&h.as_str()))
        .map(String::as_str)
}

/// Validates the sheet rows into records and a report.
pub fn parse_sheet(sheet: &Sheet) -> Result<(Vec<OnboardingRecord>, OnboardingReport)> {
    let mut missing = Vec::new();
    for (label, aliases) in [
        ("Nom du restaurant", &NAME_COLUMNS[..]),
        ("Tag", &TAG_COLUMNS[..]),
        ("Lieu", &LIEU_COLUMNS[..]),
    ] {
        if find_column(&sheet.headers, aliases).is_none() {
            missing.push(label);
        }
    }
    if !missing.is_empty() {
        return Err(AdminError::Validation(format!(
            "Colonnes manquantes: {}. Colonnes trouvées: {}",
            missing.join(", "),
            sheet.headers.join(", ")
        )));
    }

    let mut report = OnboardingReport {
        total_rows: sheet.rows.len(),
        sheet_name: sheet.name.clone(),
        available_sheets: sheet.available_sheets.clone(),
        columns_found: sheet.headers.iter().filter(|h| !h.is_empty()).cloned().collect(),
        ..Default::default()
    };
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for row in &sheet.rows {
        match parse_row(row, &mut report.errors) {
            Some(record) if seen.insert(record.id.clone()) => {
                *report.by_lieu.entry(record.lieu.clone()).or_default() += 1;
                if let Some(specialite) = &record.specialite {
                    *report.by_specialite.entry(specialite.clone()).or_default() += 1;
                }
                records.push(record);
            }
            Some(record) => {
                report
                    .errors
                    .push(format!("Ligne {}: Tag dupliqué '{}'", row.line, record.id));
                report.skipped_rows += 1;
            }
            None => report.skipped_rows += 1,
        }
    }
    report.valid_rows = records.len();
    Ok((records, report))
}

fn parse_row(row: &SheetRow, errors: &mut Vec<String>) -> Option<OnboardingRecord> {
    let name = clean_cell(row.first(&NAME_COLUMNS));
    let tag = clean_cell(row.first(&TAG_COLUMNS));
    let lieu = clean_cell(row.first(&LIEU_COLUMNS));
    let specialite = clean_cell(row.first(&SPECIALITE_COLUMNS));

    let tag = match (tag, &name) {
        (None, None) => return None,
        (None, Some(name)) => {
            errors.push(format!("Ligne {}: Tag manquant pour '{}'", row.line, name));
            return None;
        }
        (Some(tag), _) => tag.to_uppercase(),
    };

    let lieu = match lieu {
        None => LIEU_RESTAURANT.to_string(),
        Some(raw) => match normalize_lieu(&raw) {
            Some(canonical) => canonical.to_string(),
            None => {
                errors.push(format!("Ligne {}: Lieu inconnu '{}' pour {}", row.line, raw, tag));
                raw
            }
        },
    };

    Some(OnboardingRecord {
        id: tag.clone(),
        name: name.unwrap_or_else(|| tag.clone()),
        tag,
        lieu,
        specialite,
    })
}

/// Reads an `.xlsx`, `.xls` or `.csv` file into a preview bound to `env`.
pub fn prepare(env: FirebaseEnv, path: &Path, source_name: &str, sheet: Option<&str>) -> Result<OnboardingPreview> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !matches!(extension.as_str(), "xlsx" | "xls" | "csv") {
        return Err(AdminError::Validation(
            "Format non supporté. Utilisez .xlsx, .xls ou .csv".to_string(),
        ));
    }
    let sheet = read_sheet(path, sheet, 1)?;
    let (records, report) = parse_sheet(&sheet)?;
    info!(
        env = %env,
        valid = report.valid_rows,
        skipped = report.skipped_rows,
        errors = report.errors.len(),
        "Onboarding sheet parsed"
    );
    Ok(OnboardingPreview {
        env,
        prepared_at: Utc::now(),
        source_name: source_name.to_string(),
        records,
        report,
    })
}

/// Replaces the onboarding collection with the preview's records.
#[instrument(skip(backends, preview), fields(env = %backends.env))]
pub async fn confirm(
    backends: &EnvBackends,
    collection: &str,
    batch_size: usize,
    preview: &OnboardingPreview,
) -> Result<OnboardingOutcome> {
    if preview.env != backends.env {
        return Err(AdminError::EnvironmentMismatch {
            prepared: preview.env,
            active: backends.env,
        });
    }
    let deleted = backends.documents.delete_all(collection, batch_size).await?;
    let now = Utc::now().to_rfc3339();
    let mut imported = 0;
    let mut errors = Vec::new();
    for record in &preview.records {
        match backends
            .documents
            .set(collection, &record.id, &record.to_fields(&now), false)
            .await
        {
            Ok(()) => imported += 1,
            Err(e) => {
                warn!(id = %record.id, "Onboarding write failed: {}", e);
                errors.push(format!("{}: {}", record.id, e));
            }
        }
    }
    info!(imported, deleted, failed = errors.len(), "Onboarding import done");
    Ok(OnboardingOutcome {
        success: errors.is_empty(),
        imported,
        deleted,
        errors,
        env: backends.env,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OnboardingStats {
    pub total: usize,
    pub coffee_shops: usize,
    pub bars: usize,
    pub restaurants: usize,
    pub with_photos: usize,
    pub with_logos: usize,
}

fn has_items(doc: &Document, key: &str) -> bool {
    match doc.fields.get(key) {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        _ => false,
    }
}

pub fn stats(docs: &[Document]) -> OnboardingStats {
    let mut stats = OnboardingStats {
        total: docs.len(),
        ..Default::default()
    };
    for doc in docs {
        match doc.get_str("lieu") {
            Some(LIEU_COFFEE_SHOP) => stats.coffee_shops += 1,
            Some(LIEU_BAR) => stats.bars += 1,
            Some(LIEU_RESTAURANT) => stats.restaurants += 1,
            _ => {}
        }
        if has_items(doc, "image_urls") {
            stats.with_photos += 1;
        }
        if has_items(doc, "logo_url") {
            stats.with_logos += 1;
        }
    }
    stats
}

fn sort_key(doc: &Document) -> (u8, String) {
    (
        lieu_rank(doc.get_str("lieu").unwrap_or("")),
        doc.get_str("name").unwrap_or("").to_lowercase(),
    )
}

/// All onboarding restaurants, optionally restricted to one lieu, with stats
/// over the whole collection.
pub async fn list(
    store: &dyn DocumentStore,
    collection: &str,
    lieu: Option<&str>,
) -> Result<(Vec<Document>, OnboardingStats)> {
    let mut docs = store.list(collection).await?;
    let stats = stats(&docs);
    if let Some(lieu) = lieu.filter(|l| !l.is_empty()) {
        docs.retain(|d| d.get_str("lieu") == Some(lieu));
    }
    docs.sort_by_cached_key(sort_key);
    Ok((docs, stats))
}

pub async fn get(store: &dyn DocumentStore, collection: &str, id: &str) -> Result<Document> {
    store
        .get(collection, id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("Restaurant onboarding {}", id)))
}

pub async fn delete(store: &dyn DocumentStore, collection: &str, id: &str) -> Result<()> {
    get(store, collection, id).await?;
    store.delete(collection, id).await
}

/// CSV export with a UTF-8 BOM so spreadsheet tools pick the right encoding.
pub fn export_csv(docs: &[Document]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADERS)?;
    for doc in docs {
        writer.write_record([
            doc.get_str("name").unwrap_or(""),
            doc.get_str("tag").unwrap_or(&doc.id),
            doc.get_str("lieu").unwrap_or(""),
            doc.get_str("specialite").unwrap_or(""),
        ])?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| AdminError::Io(e.into_error()))?;
    let mut out = "\u{feff}".as_bytes().to_vec();
    out.extend(body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendProvider, MemoryBackends};
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn rows_are_validated() {
        let file = write_csv(
            "Nom du restaurant,Tag,Lieu,Spécialité\n\
             Le Café,cafe1,coffee,Brunch\n\
             Sans Tag,,Bar,\n\
             Bis,CAFE1,Bar,\n\
             Chez X,chezx,Péniche,nan\n\
             ,solo,,\n",
        );
        let preview = prepare(FirebaseEnv::Dev, file.path(), "f.csv", None).unwrap();
        let ids: Vec<&str> = preview.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["CAFE1", "CHEZX", "SOLO"]);
        assert_eq!(preview.records[0].lieu, LIEU_COFFEE_SHOP);
        assert_eq!(preview.records[1].lieu, "Péniche");
        assert_eq!(preview.records[1].specialite, None);
        assert_eq!(preview.records[2].name, "SOLO");
        assert_eq!(preview.records[2].lieu, LIEU_RESTAURANT);

        let report = &preview.report;
        assert_eq!(report.total_rows, 5);
        assert_eq!(report.valid_rows, 3);
        assert_eq!(report.skipped_rows, 2);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].contains("Tag manquant pour 'Sans Tag'"));
        assert!(report.errors[1].contains("Tag dupliqué 'CAFE1'"));
        assert_eq!(report.by_specialite.get("Brunch"), Some(&1));
    }

    #[test]
    fn missing_columns_are_reported() {
        let file = write_csv("Nom,Adresse\nA,1 rue\n");
        let err = prepare(FirebaseEnv::Dev, file.path(), "f.csv", None).unwrap_err();
        assert!(err.to_string().contains("Colonnes manquantes: Tag, Lieu"));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = prepare(FirebaseEnv::Dev, Path::new("list.txt"), "list.txt", None).unwrap_err();
        assert!(matches!(err, AdminError::Validation(_)));
    }

    #[tokio::test]
    async fn confirm_replaces_collection_and_lists_in_lieu_order() {
        let backends = MemoryBackends::new();
        let dev = backends.for_env(FirebaseEnv::Dev).unwrap();
        let old = json!({"name": "Old"});
        dev.documents
            .set("onboarding", "OLD", old.as_object().unwrap(), false)
            .await
            .unwrap();

        let file = write_csv("Nom,Tag,Lieu\nZinc,zinc,bar\nAlpha,alpha,resto\nBean,bean,café\n");
        let preview = prepare(FirebaseEnv::Dev, file.path(), "f.csv", None).unwrap();
        let outcome = confirm(&dev, "onboarding", 400, &preview).await.unwrap();
        assert_eq!(outcome.imported, 3);
        assert_eq!(outcome.deleted, 1);

        let (docs, stats) = list(dev.documents.as_ref(), "onboarding", None).await.unwrap();
        let names: Vec<&str> = docs.iter().filter_map(|d| d.get_str("name")).collect();
        assert_eq!(names, vec!["Bean", "Zinc", "Alpha"]);
        assert_eq!(stats.bars, 1);
        assert_eq!(stats.with_photos, 0);
        assert!(docs[0].fields.contains_key("created_at"));

        let (bars, _) = list(dev.documents.as_ref(), "onboarding", Some("Bar")).await.unwrap();
        assert_eq!(bars.len(), 1);

        let csv = export_csv(&docs).unwrap();
        let text = String::from_utf8(csv).unwrap();
        assert!(text.starts_with("\u{feff}Nom du restaurant,Tag,Lieu,Spécialité"));
        assert!(text.contains("Bean,BEAN,Coffee shop,"));
    }

    #[tokio::test]
    async fn confirm_refuses_other_environment() {
        let backends = MemoryBackends::new();
        let prod = backends.for_env(FirebaseEnv::Prod).unwrap();
        let file = write_csv("Nom,Tag,Lieu\nZinc,zinc,bar\n");
        let preview = prepare(FirebaseEnv::Dev, file.path(), "f.csv", None).unwrap();
        let err = confirm(&prod, "onboarding", 400, &preview).await.unwrap_err();
        assert!(matches!(err, AdminError::EnvironmentMismatch { .. }));
        assert_eq!(backends.project(FirebaseEnv::Prod).documents.count("onboarding"), 0);
    }
}
