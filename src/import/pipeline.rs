//! Spreadsheet to Firestore import: prepare a preview, then commit it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use super::backup::{self, export_collection, export_records, timestamp, BackupMeta};
use super::diff::{diff_fields, Change};
use super::favorites::{recompute_favorite_counts, FavoriteStats};
use super::geocode::Geocoder;
use super::photos::{match_photos, PhotoMatches, PhotoUpload};
use super::run_log::RunLog;
use super::sheet::read_sheet;
use super::transform::{row_to_document, RestaurantRecord};
use crate::backends::EnvBackends;
use crate::config::Config;
use crate::environment::FirebaseEnv;
use crate::error::{AdminError, Result};
use crate::firestore::Fields;
use crate::metrics;

/// The restaurants workbook has a group header row above the column names.
pub const RESTAURANTS_HEADER_LINE: usize = 2;

const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Write new and changed documents, keep documents absent from the sheet.
    #[default]
    Upsert,
    /// Empty the collection, then write every record.
    Replace,
}

impl ImportMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "upsert" => Some(ImportMode::Upsert),
            "replace" => Some(ImportMode::Replace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMode::Upsert => "upsert",
            ImportMode::Replace => "replace",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub sheet: Option<String>,
    pub dedupe_ids: bool,
    pub header_line: usize,
}

impl ImportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sheet: Some(config.import.default_sheet.clone()),
            dedupe_ids: config.import.dedupe_ids,
            header_line: RESTAURANTS_HEADER_LINE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GeocodingStats {
    pub with_coords: usize,
    pub needs_geocoding: usize,
    pub no_address: usize,
    pub geocoded: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewEntry {
    pub record: RestaurantRecord,
    pub change: Change,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PreviewCounts {
    pub create: usize,
    pub update: usize,
    pub unchanged: usize,
    pub stale: usize,
}

/// Everything a commit needs, computed against one environment.
#[derive(Debug, Serialize)]
pub struct ImportPreview {
    pub env: FirebaseEnv,
    pub prepared_at: DateTime<Utc>,
    pub source_name: String,
    pub collection: String,
    pub sheet_name: String,
    pub available_sheets: Vec<String>,
    pub total_rows: usize,
    pub entries: Vec<PreviewEntry>,
    pub duplicates: Vec<String>,
    pub missing_tag_rows: Vec<usize>,
    /// Stored ids absent from the sheet.
    pub stale: Vec<String>,
    pub geocoding: GeocodingStats,
    pub photos: PhotoMatches,
}

impl ImportPreview {
    pub fn counts(&self) -> PreviewCounts {
        let mut counts = PreviewCounts {
            stale: self.stale.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.change {
                Change::Create => counts.create += 1,
                Change::Update { .. } => counts.update += 1,
                Change::Unchanged => counts.unchanged += 1,
            }
        }
        counts
    }

    pub fn records(&self) -> impl Iterator<Item = &RestaurantRecord> {
        self.entries.iter().map(|e| &e.record)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub env: FirebaseEnv,
    pub mode: ImportMode,
    pub imported: usize,
    pub failed: usize,
    pub unchanged_skipped: usize,
    pub deleted: usize,
    pub photos_uploaded: usize,
    pub photo_failures: Vec<String>,
    pub backup_dir: PathBuf,
    pub log_file: PathBuf,
    pub backup_count: usize,
    pub duplicates: usize,
    pub missing_tag_rows: usize,
    pub favorite_stats: Option<FavoriteStats>,
    pub favorite_error: Option<String>,
}

/// Ids seen more than once, in order of first appearance.
pub fn find_duplicates(records: &[RestaurantRecord]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order = Vec::new();
    for record in records {
        let count = counts.entry(record.id.as_str()).or_default();
        *count += 1;
        if *count == 2 {
            order.push(record.id.clone());
        }
    }
    order
}

/// Renames later occurrences of an id to `ID-2`, `ID-3` ...
pub fn dedupe_ids(records: &mut [RestaurantRecord]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for record in records.iter_mut() {
        let count = seen.entry(record.id.clone()).or_default();
        *count += 1;
        if *count > 1 {
            let renamed = format!("{}-{}", record.id, count);
            record.set_id(renamed);
        }
    }
}

/// Keeps only the last row of each id, in sheet order.
pub fn keep_last_occurrence(records: &mut Vec<RestaurantRecord>) {
    let last: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();
    let mut index = 0;
    records.retain(|r| {
        let keep = last.get(&r.id) == Some(&index);
        index += 1;
        keep
    });
}

pub struct ImportPipeline<'a> {
    backends: &'a EnvBackends,
    config: &'a Config,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(backends: &'a EnvBackends, config: &'a Config) -> Self {
        Self { backends, config }
    }

    fn collection(&self) -> &str {
        &self.config.import.collection
    }

    /// Parses, converts, geocodes and diffs the sheet. Nothing is written.
    #[instrument(skip(self, uploads, options, geocoder), fields(env = %self.backends.env))]
    pub async fn prepare(
        &self,
        sheet_path: &Path,
        source_name: &str,
        uploads: Vec<PhotoUpload>,
        options: &ImportOptions,
        geocoder: &dyn Geocoder,
    ) -> Result<ImportPreview> {
        let env = self.backends.env;
        let sheet = read_sheet(sheet_path, options.sheet.as_deref(), options.header_line)?;
        info!(sheet = %sheet.name, rows = sheet.rows.len(), "Converting rows");

        let mut records = Vec::new();
        let mut missing_tag_rows = Vec::new();
        for row in &sheet.rows {
            match row_to_document(row) {
                Some(record) => records.push(record),
                None => missing_tag_rows.push(row.line),
            }
        }
        metrics::import::rows_converted(env.as_str(), records.len());
        metrics::import::rows_skipped(env.as_str(), missing_tag_rows.len());
        if !missing_tag_rows.is_empty() {
            warn!(rows = ?missing_tag_rows, "Rows without Ref skipped");
        }
        if records.is_empty() {
            return Err(AdminError::Validation(
                "La conversion a produit 0 enregistrement".to_string(),
            ));
        }

        let duplicates = find_duplicates(&records);
        if !duplicates.is_empty() {
            warn!(ids = ?duplicates, "Duplicate ids detected");
            if options.dedupe_ids {
                dedupe_ids(&mut records);
            } else {
                keep_last_occurrence(&mut records);
            }
        }

        let geocoding = geocode_missing(&mut records, geocoder).await;

        let existing: HashMap<String, Fields> = self
            .backends
            .documents
            .list(self.collection())
            .await?
            .into_iter()
            .map(|d| (d.id, d.fields))
            .collect();
        let record_ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut stale: Vec<String> = existing
            .keys()
            .filter(|id| !record_ids.contains(*id))
            .cloned()
            .collect();
        stale.sort();

        let entries: Vec<PreviewEntry> = records
            .into_iter()
            .map(|record| {
                let change = diff_fields(&record.fields, existing.get(&record.id));
                PreviewEntry { record, change }
            })
            .collect();

        let photos = match_photos(uploads, &record_ids);
        let preview = ImportPreview {
            env,
            prepared_at: Utc::now(),
            source_name: source_name.to_string(),
            collection: self.collection().to_string(),
            sheet_name: sheet.name,
            available_sheets: sheet.available_sheets,
            total_rows: sheet.rows.len(),
            entries,
            duplicates,
            missing_tag_rows,
            stale,
            geocoding,
            photos,
        };
        let counts = preview.counts();
        info!(
            create = counts.create,
            update = counts.update,
            unchanged = counts.unchanged,
            stale = counts.stale,
            photos = preview.photos.matched.len(),
            "Import preview ready"
        );
        Ok(preview)
    }

    /// Applies a preview. Refuses when the preview was prepared against
    /// another environment than the one these backends point to.
    #[instrument(skip(self, preview), fields(env = %self.backends.env, mode = mode.as_str()))]
    pub async fn commit(&self, preview: &ImportPreview, mode: ImportMode) -> Result<ImportOutcome> {
        let env = self.backends.env;
        if preview.env != env {
            return Err(AdminError::EnvironmentMismatch {
                prepared: preview.env,
                active: env,
            });
        }
        metrics::import::run_started(env.as_str());

        let collection = self.collection();
        let run_dir = backup::run_dir(&self.config.import.backup_dir, collection);
        let log = RunLog::create(&run_dir.join("import_run.log"))?;
        log.info(format!(
            "Import start: {} ({} records) into '{}' on {} in {} mode",
            preview.source_name,
            preview.entries.len(),
            collection,
            env.label(),
            mode.as_str()
        ));
        if !preview.duplicates.is_empty() {
            log.warn(format!("Duplicate ids: {:?}", preview.duplicates));
        }
        if !preview.missing_tag_rows.is_empty() {
            log.warn(format!("Rows without Ref: {:?}", preview.missing_tag_rows));
        }

        let backup = match export_collection(self.backends.documents.as_ref(), collection, &run_dir).await {
            Ok(meta) => {
                log.info(format!("Backup OK ({} docs) in {}", meta.count, run_dir.display()));
                meta
            }
            Err(e) => {
                log.error(format!("Backup failed: {}", e));
                return Err(e);
            }
        };
        let records: Vec<RestaurantRecord> = preview.records().cloned().collect();
        let records_csv = export_records(&records, &run_dir)?;

        let mut deleted = 0;
        if mode == ImportMode::Replace {
            deleted = self
                .backends
                .documents
                .delete_all(collection, self.config.import.batch_size)
                .await
                .inspect_err(|e| log.error(format!("Collection delete failed: {}", e)))?;
            log.info(format!("Deleted {} documents", deleted));
        }

        let (imported, failed, unchanged_skipped) = self.write_records(preview, mode, &log).await;
        log.info(format!(
            "Import done: {} written, {} failed, {} unchanged",
            imported, failed, unchanged_skipped
        ));

        let (photos_uploaded, photo_failures) = self.upload_photos(preview, &log).await;

        self.write_import_log(preview, mode, &backup, &records_csv, imported, failed, &log)
            .await;

        let (favorite_stats, favorite_error) = match recompute_favorite_counts(
            self.backends.documents.as_ref(),
            collection,
            &self.config.import.favorites_collection,
        )
        .await
        {
            Ok(stats) => {
                log.info(format!("Favorite counts updated on {} restaurants", stats.updated));
                (Some(stats), None)
            }
            Err(e) => {
                log.warn(format!("Favorite count update failed: {}", e));
                (None, Some(e.to_string()))
            }
        };

        log.info("Import workflow finished");
        Ok(ImportOutcome {
            env,
            mode,
            imported,
            failed,
            unchanged_skipped,
            deleted,
            photos_uploaded,
            photo_failures,
            backup_dir: run_dir,
            log_file: log.path().to_path_buf(),
            backup_count: backup.count,
            duplicates: preview.duplicates.len(),
            missing_tag_rows: preview.missing_tag_rows.len(),
            favorite_stats,
            favorite_error,
        })
    }

    async fn write_records(&self, preview: &ImportPreview, mode: ImportMode, log: &RunLog) -> (usize, usize, usize) {
        let env = self.backends.env.as_str();
        let (mut imported, mut failed, mut unchanged) = (0, 0, 0);
        for entry in &preview.entries {
            if mode == ImportMode::Upsert && !entry.change.needs_write() {
                unchanged += 1;
                continue;
            }
            let record = &entry.record;
            match self
                .backends
                .documents
                .set(self.collection(), &record.id, &record.fields, true)
                .await
            {
                Ok(()) => {
                    imported += 1;
                    metrics::import::document_written(env);
                    if imported % PROGRESS_EVERY == 0 {
                        log.info(format!("Written: {}", imported));
                    }
                }
                Err(e) => {
                    failed += 1;
                    metrics::import::document_failed(env);
                    log.error(format!("Document {} (line {}) failed: {}", record.id, record.line, e));
                }
            }
        }
        (imported, failed, unchanged)
    }

    async fn upload_photos(&self, preview: &ImportPreview, log: &RunLog) -> (usize, Vec<String>) {
        let mut uploaded = 0;
        let mut failures = Vec::new();
        for photo in &preview.photos.matched {
            let path = photo.storage_path(&self.config.storage);
            match self
                .backends
                .blobs
                .upload(&path, photo.upload.bytes.clone(), photo.content_type)
                .await
            {
                Ok(_) => {
                    uploaded += 1;
                    metrics::import::photo_uploaded(self.backends.env.as_str());
                }
                Err(e) => {
                    log.error(format!("Upload of {} failed: {}", path, e));
                    failures.push(photo.file_name.clone());
                }
            }
        }
        if !preview.photos.matched.is_empty() {
            log.info(format!("Photos uploaded: {}/{}", uploaded, preview.photos.matched.len()));
        }
        (uploaded, failures)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_import_log(
        &self,
        preview: &ImportPreview,
        mode: ImportMode,
        backup: &BackupMeta,
        records_csv: &Path,
        imported: usize,
        failed: usize,
        log: &RunLog,
    ) {
        let payload = json!({
            "collection": self.collection(),
            "env": self.backends.env.as_str(),
            "mode": mode.as_str(),
            "imported_count": imported,
            "failed_count": failed,
            "source": records_csv.file_name().map(|n| n.to_string_lossy().into_owned()),
            "spreadsheet": preview.source_name,
            "timestamp": timestamp(),
            "server_timestamp": Utc::now().to_rfc3339(),
            "backup_dir": backup.dir.display().to_string(),
            "backup_count": backup.count,
            "backup_json_sha256": backup.sha256_json,
            "backup_ndjson_sha256": backup.sha256_ndjson,
            "duplicates_count": preview.duplicates.len(),
            "missing_tag_rows": preview.missing_tag_rows,
        });
        let Value::Object(fields) = payload else {
            return;
        };
        match self
            .backends
            .documents
            .add(&self.config.import.logs_collection, &fields)
            .await
        {
            Ok(id) => log.info(format!("Import log written ({})", id)),
            Err(e) => log.error(format!("Import log write failed: {}", e)),
        }
    }
}

/// Fills missing coordinates of each record's first address.
async fn geocode_missing(records: &mut [RestaurantRecord], geocoder: &dyn Geocoder) -> GeocodingStats {
    let mut stats = GeocodingStats::default();
    for record in records.iter() {
        if record.has_coordinates() {
            stats.with_coords += 1;
        } else if !record.address().is_empty() {
            stats.needs_geocoding += 1;
        } else {
            stats.no_address += 1;
        }
    }
    info!(
        with_coords = stats.with_coords,
        needs_geocoding = stats.needs_geocoding,
        no_address = stats.no_address,
        "Geocoding pre-pass"
    );

    for record in records.iter_mut() {
        if record.has_coordinates() || record.address().is_empty() {
            continue;
        }
        let label = if record.name().is_empty() { record.id.clone() } else { record.name().to_string() };
        let address = record.address().to_string();
        match geocoder.geocode(&address, &label).await {
            Some((lat, lon)) => {
                record.fill_coordinates(lat, lon);
                stats.geocoded += 1;
            }
            None => stats.failed.push(record.id.clone()),
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::sheet::SheetRow;

    fn record(tag: &str) -> RestaurantRecord {
        let mut row = SheetRow::new(3);
        row.insert("Ref", tag);
        row.insert("Adresse", "1 rue A");
        row_to_document(&row).unwrap()
    }

    #[test]
    fn duplicates_are_reported_once_in_order() {
        let records = vec![record("B"), record("A"), record("B"), record("A"), record("B")];
        assert_eq!(find_duplicates(&records), vec!["B", "A"]);
    }

    #[test]
    fn dedupe_renames_later_occurrences() {
        let mut records = vec![record("A"), record("A"), record("B"), record("A")];
        dedupe_ids(&mut records);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "A-2", "B", "A-3"]);
        assert_eq!(records[1].fields["id"], "A-2");
    }

    #[test]
    fn last_row_of_a_duplicated_id_is_kept() {
        let mut records = vec![record("A"), record("B"), record("A")];
        records[0].line = 3;
        records[2].line = 5;
        keep_last_occurrence(&mut records);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert_eq!(records[1].line, 5);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(ImportMode::parse("Replace"), Some(ImportMode::Replace));
        assert_eq!(ImportMode::parse("upsert"), Some(ImportMode::Upsert));
        assert_eq!(ImportMode::parse("merge"), None);
        assert_eq!(ImportMode::default(), ImportMode::Upsert);
    }

    #[tokio::test]
    async fn geocoding_fills_rows_without_coordinates() {
        let geocoder = crate::import::geocode::MemoryGeocoder::default();
        geocoder.insert("1 rue A", (48.8, 2.3));
        let mut records = vec![record("A")];
        let stats = geocode_missing(&mut records, &geocoder).await;
        assert_eq!(stats.needs_geocoding, 1);
        assert_eq!(stats.geocoded, 1);
        assert_eq!(records[0].coordinates(), (Some(48.8), Some(2.3)));
    }
}
