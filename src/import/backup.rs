//! Collection backups and converted-record exports written before an import.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::transform::RestaurantRecord;
use crate::error::Result;
use crate::firestore::{Document, DocumentStore};

const BACKUP_CSV_COLUMNS: [&str; 5] = ["id", "name", "address", "arrondissement", "tag"];

const RECORD_CSV_COLUMNS: [&str; 35] = [
    "id",
    "tag",
    "name",
    "raw_name",
    "address",
    "arrondissement",
    "latitude",
    "longitude",
    "phone",
    "website",
    "google_link",
    "reservation_link",
    "instagram_link",
    "instagram_video_link",
    "lien_menu",
    "more_info",
    "hours",
    "affichage",
    "specialite_affichage",
    "types",
    "moments",
    "lieux",
    "ambiance",
    "price_range",
    "cuisines",
    "preferences",
    "recommended_by",
    "tag_initial",
    "restaurant_type",
    "location_type",
    "extras",
    "has_terrace",
    "terrace_locs",
    "specialite_tag",
    "lieu_tag",
];

pub const RECORDS_BASENAME: &str = "restaurants_from_excel_by_tag";

#[derive(Debug, Clone, Serialize)]
pub struct BackupMeta {
    pub collection: String,
    pub count: usize,
    pub json: String,
    pub ndjson: String,
    pub csv: String,
    pub timestamp: String,
    pub sha256_json: String,
    pub sha256_ndjson: String,
    #[serde(skip)]
    pub dir: PathBuf,
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn timestamp() -> String {
    Utc::now().format("%d %b %Y à %H:%M:%S UTC").to_string()
}

/// `<base>/<collection>_<YYYYmmdd_HHMMSS>`, one directory per run.
pub fn run_dir(base: &Path, collection: &str) -> PathBuf {
    base.join(format!("{}_{}", collection, Utc::now().format("%Y%m%d_%H%M%S")))
}

/// Flattens a value for a CSV cell: arrays are joined with `, `.
fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

/// Writes `rows` as pretty JSON, NDJSON and a CSV restricted to `columns`.
fn write_exports(dir: &Path, basename: &str, rows: &[Value], columns: &[&str]) -> Result<(PathBuf, PathBuf, PathBuf)> {
    fs::create_dir_all(dir)?;
    let json_path = dir.join(format!("{}.json", basename));
    let ndjson_path = dir.join(format!("{}.ndjson", basename));
    let csv_path = dir.join(format!("{}.csv", basename));

    fs::write(&json_path, serde_json::to_string_pretty(rows)?)?;

    let mut ndjson = fs::File::create(&ndjson_path)?;
    for row in rows {
        writeln!(ndjson, "{}", serde_json::to_string(row)?)?;
    }

    let mut writer = csv::Writer::from_path(&csv_path)?;
    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(columns.iter().map(|c| csv_cell(row.get(*c))))?;
    }
    writer.flush()?;
    Ok((json_path, ndjson_path, csv_path))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Dumps `collection` into `dir` and writes `backup_meta.json` next to it.
pub async fn export_collection(
    store: &dyn DocumentStore,
    collection: &str,
    dir: &Path,
) -> Result<BackupMeta> {
    let documents = store.list(collection).await?;
    export_documents(collection, &documents, dir)
}

pub fn export_documents(collection: &str, documents: &[Document], dir: &Path) -> Result<BackupMeta> {
    let rows: Vec<Value> = documents.iter().map(Document::to_json).collect();
    let (json_path, ndjson_path, csv_path) = write_exports(dir, collection, &rows, &BACKUP_CSV_COLUMNS)?;
    let meta = BackupMeta {
        collection: collection.to_string(),
        count: documents.len(),
        json: file_name(&json_path),
        ndjson: file_name(&ndjson_path),
        csv: file_name(&csv_path),
        timestamp: timestamp(),
        sha256_json: sha256_file(&json_path)?,
        sha256_ndjson: sha256_file(&ndjson_path)?,
        dir: dir.to_path_buf(),
    };
    fs::write(dir.join("backup_meta.json"), serde_json::to_string_pretty(&meta)?)?;
    Ok(meta)
}

/// Writes the converted records. Returns the CSV path.
pub fn export_records(records: &[RestaurantRecord], dir: &Path) -> Result<PathBuf> {
    let rows: Vec<Value> = records.iter().map(|r| Value::Object(r.fields.clone())).collect();
    let (_, _, csv_path) = write_exports(dir, RECORDS_BASENAME, &rows, &RECORD_CSV_COLUMNS)?;
    Ok(csv_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::MemoryDocumentStore;
    use serde_json::json;

    #[tokio::test]
    async fn backup_writes_all_formats_with_checksums() {
        let store = MemoryDocumentStore::new();
        let fields = json!({"name": "Chez A", "tag": "a", "types": ["Bar", "Fast"]});
        store
            .set("restaurants", "A", fields.as_object().unwrap(), false)
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();

        let meta = export_collection(&store, "restaurants", dir.path()).await.unwrap();
        assert_eq!(meta.count, 1);
        assert_eq!(meta.json, "restaurants.json");
        assert_eq!(meta.sha256_json, sha256_file(&dir.path().join("restaurants.json")).unwrap());

        let dumped: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(dir.path().join("restaurants.json")).unwrap()).unwrap();
        assert_eq!(dumped[0]["id"], "A");
        let csv = fs::read_to_string(dir.path().join("restaurants.csv")).unwrap();
        assert_eq!(csv.lines().next(), Some("id,name,address,arrondissement,tag"));
        assert!(csv.contains("A,Chez A,,,a"));
        assert!(dir.path().join("backup_meta.json").exists());
    }

    #[test]
    fn array_cells_are_joined() {
        assert_eq!(csv_cell(Some(&json!(["Bar", "Fast"]))), "Bar, Fast");
        assert_eq!(csv_cell(Some(&json!(true))), "true");
        assert_eq!(csv_cell(Some(&Value::Null)), "");
    }
}
