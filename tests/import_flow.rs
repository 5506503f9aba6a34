use anyhow::Result;
use butter_admin::backends::{BackendProvider, MemoryBackends};
use butter_admin::cache::EnvCaches;
use butter_admin::config::Config;
use butter_admin::environment::{self, FirebaseEnv};
use butter_admin::error::AdminError;
use butter_admin::import::{
    Change, ImportMode, ImportOptions, ImportPipeline, MemoryGeocoder, PhotoUpload,
};
use butter_admin::session::SessionStore;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, NamedTempFile, TempDir};

const HEADER: &str = "Ref,Nom de base,Adresse,Latitude,Longitude";

fn write_sheet(rows: &[&str]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
    writeln!(file, "Base restaurants,,,,")?;
    writeln!(file, "{}", HEADER)?;
    for row in rows {
        writeln!(file, "{}", row)?;
    }
    file.flush()?;
    Ok(file)
}

fn test_config(backups: &TempDir) -> Config {
    let mut config = Config::default();
    config.import.backup_dir = backups.path().to_path_buf();
    config
}

#[tokio::test]
async fn rows_without_ref_are_skipped_and_photos_uploaded() -> Result<()> {
    let backups = tempdir()?;
    let config = test_config(&backups);
    let provider = MemoryBackends::new();
    let backends = provider.for_env(FirebaseEnv::Dev)?;
    let geocoder = MemoryGeocoder::default();

    let sheet = write_sheet(&[
        "bistrot,Le Bistrot,1 rue A,48.85,2.35",
        ",Sans tag,2 rue B,48.86,2.36",
        "cafe,Le Café,3 rue C,48.87,2.37",
    ])?;
    let uploads = vec![PhotoUpload {
        file_name: "BISTROT1.webp".to_string(),
        bytes: vec![1, 2, 3],
    }];

    let pipeline = ImportPipeline::new(&backends, &config);
    let options = ImportOptions::from_config(&config);
    let preview = pipeline
        .prepare(sheet.path(), "base.csv", uploads, &options, &geocoder)
        .await?;
    assert_eq!(preview.entries.len(), 2);
    assert_eq!(preview.missing_tag_rows.len(), 1);
    assert_eq!(preview.counts().create, 2);
    assert_eq!(preview.photos.matched.len(), 1);

    let outcome = pipeline.commit(&preview, ImportMode::Upsert).await?;
    assert_eq!(outcome.imported, 2);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.photos_uploaded, 1);
    assert!(outcome.backup_dir.starts_with(backups.path()));

    let project = provider.project(FirebaseEnv::Dev);
    assert_eq!(project.documents.count("restaurants"), 2);
    assert!(backends.documents.get("restaurants", "BISTROT").await?.is_some());
    assert!(project
        .blobs
        .names()
        .iter()
        .any(|name| name.ends_with("BISTROT1.webp")));
    Ok(())
}

#[tokio::test]
async fn reimport_updates_instead_of_duplicating() -> Result<()> {
    let backups = tempdir()?;
    let config = test_config(&backups);
    let provider = MemoryBackends::new();
    let backends = provider.for_env(FirebaseEnv::Dev)?;
    let geocoder = MemoryGeocoder::default();
    let pipeline = ImportPipeline::new(&backends, &config);
    let options = ImportOptions::from_config(&config);

    let first = write_sheet(&["bistrot,Le Bistrot,1 rue A,48.85,2.35"])?;
    let preview = pipeline
        .prepare(first.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    pipeline.commit(&preview, ImportMode::Upsert).await?;

    let same = pipeline
        .prepare(first.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    assert_eq!(same.entries[0].change, Change::Unchanged);
    let outcome = pipeline.commit(&same, ImportMode::Upsert).await?;
    assert_eq!(outcome.imported, 0);
    assert_eq!(outcome.unchanged_skipped, 1);

    let moved = write_sheet(&["bistrot,Le Bistrot,9 rue Z,48.85,2.35"])?;
    let preview = pipeline
        .prepare(moved.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    match &preview.entries[0].change {
        Change::Update { changed_fields } => assert!(changed_fields.iter().any(|f| f == "address")),
        other => panic!("expected an update, got {:?}", other),
    }
    pipeline.commit(&preview, ImportMode::Upsert).await?;

    assert_eq!(provider.project(FirebaseEnv::Dev).documents.count("restaurants"), 1);
    let doc = backends.documents.get("restaurants", "BISTROT").await?.unwrap();
    assert_eq!(doc.get_str("address"), Some("9 rue Z"));
    Ok(())
}

#[tokio::test]
async fn replace_mode_removes_restaurants_absent_from_the_sheet() -> Result<()> {
    let backups = tempdir()?;
    let config = test_config(&backups);
    let provider = MemoryBackends::new();
    let backends = provider.for_env(FirebaseEnv::Dev)?;
    let geocoder = MemoryGeocoder::default();
    let pipeline = ImportPipeline::new(&backends, &config);
    let options = ImportOptions::from_config(&config);

    let both = write_sheet(&[
        "bistrot,Le Bistrot,1 rue A,48.85,2.35",
        "cafe,Le Café,3 rue C,48.87,2.37",
    ])?;
    let preview = pipeline
        .prepare(both.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    pipeline.commit(&preview, ImportMode::Upsert).await?;

    let one = write_sheet(&["cafe,Le Café,3 rue C,48.87,2.37"])?;
    let preview = pipeline
        .prepare(one.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    assert_eq!(preview.stale, vec!["BISTROT".to_string()]);

    let outcome = pipeline.commit(&preview, ImportMode::Replace).await?;
    assert_eq!(outcome.deleted, 2);
    assert_eq!(outcome.backup_count, 2);
    assert!(backends.documents.get("restaurants", "BISTROT").await?.is_none());
    assert!(backends.documents.get("restaurants", "CAFE").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn environment_switch_redirects_writes_and_rejects_stale_previews() -> Result<()> {
    let backups = tempdir()?;
    let config = test_config(&backups);
    let provider = MemoryBackends::new();
    let geocoder = MemoryGeocoder::default();
    let options = ImportOptions::from_config(&config);
    let sheet = write_sheet(&["bistrot,Le Bistrot,1 rue A,48.85,2.35"])?;

    let sessions = SessionStore::new(Duration::from_secs(60));
    let caches = EnvCaches::new(&config.server);
    let session_id = sessions.create().await;

    let dev = provider.for_env(FirebaseEnv::Dev)?;
    let preview = Arc::new(
        ImportPipeline::new(&dev, &config)
            .prepare(sheet.path(), "base.csv", Vec::new(), &options, &geocoder)
            .await?,
    );
    let pending = preview.clone();
    sessions
        .update(&session_id, |s| s.pending_import = Some(pending))
        .await?;

    let env = environment::switch(&sessions, &caches, &session_id, "prod").await?;
    assert_eq!(env, FirebaseEnv::Prod);
    let session = sessions.get(&session_id).await.unwrap();
    assert_eq!(session.firebase_env, Some(FirebaseEnv::Prod));
    assert!(session.pending_import.is_none());

    let prod = provider.for_env(env)?;
    let err = ImportPipeline::new(&prod, &config)
        .commit(&preview, ImportMode::Upsert)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AdminError::EnvironmentMismatch {
            prepared: FirebaseEnv::Dev,
            active: FirebaseEnv::Prod
        }
    ));
    assert_eq!(provider.project(FirebaseEnv::Prod).documents.count("restaurants"), 0);
    assert_eq!(provider.project(FirebaseEnv::Dev).documents.count("restaurants"), 0);

    let err = environment::switch(&sessions, &caches, &session_id, "staging")
        .await
        .unwrap_err();
    assert!(matches!(err, AdminError::Validation(_)));
    let session = sessions.get(&session_id).await.unwrap();
    assert_eq!(session.firebase_env, Some(FirebaseEnv::Prod));
    Ok(())
}

#[tokio::test]
async fn last_row_of_a_duplicated_ref_wins() -> Result<()> {
    let backups = tempdir()?;
    let config = test_config(&backups);
    let provider = MemoryBackends::new();
    let backends = provider.for_env(FirebaseEnv::Dev)?;
    let geocoder = MemoryGeocoder::default();
    let pipeline = ImportPipeline::new(&backends, &config);
    let options = ImportOptions::from_config(&config);
    assert!(!options.dedupe_ids);

    let first = write_sheet(&["zinc,Old,1 rue A,48.85,2.35"])?;
    let preview = pipeline
        .prepare(first.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    pipeline.commit(&preview, ImportMode::Upsert).await?;

    let twice = write_sheet(&[
        "zinc,New,1 rue A,48.85,2.35",
        "zinc,Old,1 rue A,48.85,2.35",
    ])?;
    let preview = pipeline
        .prepare(twice.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    assert_eq!(preview.duplicates, vec!["ZINC".to_string()]);
    assert_eq!(preview.entries.len(), 1);
    assert_eq!(preview.entries[0].change, Change::Unchanged);
    let counts = preview.counts();
    assert_eq!((counts.create, counts.update, counts.unchanged), (0, 0, 1));

    pipeline.commit(&preview, ImportMode::Upsert).await?;
    let doc = backends.documents.get("restaurants", "ZINC").await?.unwrap();
    assert_eq!(doc.get_str("name"), Some("Old"));

    let reversed = write_sheet(&[
        "zinc,Old,1 rue A,48.85,2.35",
        "zinc,New,1 rue A,48.85,2.35",
    ])?;
    let preview = pipeline
        .prepare(reversed.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    let outcome = pipeline.commit(&preview, ImportMode::Upsert).await?;
    assert_eq!(outcome.imported, 1);
    assert_eq!(outcome.duplicates, 1);
    let doc = backends.documents.get("restaurants", "ZINC").await?.unwrap();
    assert_eq!(doc.get_str("name"), Some("New"));
    assert_eq!(provider.project(FirebaseEnv::Dev).documents.count("restaurants"), 1);
    Ok(())
}

#[tokio::test]
async fn upsert_keeps_restaurants_absent_from_the_sheet() -> Result<()> {
    let backups = tempdir()?;
    let config = test_config(&backups);
    let provider = MemoryBackends::new();
    let backends = provider.for_env(FirebaseEnv::Dev)?;
    let geocoder = MemoryGeocoder::default();
    let pipeline = ImportPipeline::new(&backends, &config);
    let options = ImportOptions::from_config(&config);

    let both = write_sheet(&[
        "bistrot,Le Bistrot,1 rue A,48.85,2.35",
        "cafe,Le Café,3 rue C,48.87,2.37",
    ])?;
    let preview = pipeline
        .prepare(both.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    pipeline.commit(&preview, ImportMode::Upsert).await?;

    let one = write_sheet(&["cafe,Le Café,3 rue C,48.87,2.37"])?;
    let preview = pipeline
        .prepare(one.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    assert_eq!(preview.stale, vec!["BISTROT".to_string()]);
    assert_eq!(preview.counts().stale, 1);

    let outcome = pipeline.commit(&preview, ImportMode::Upsert).await?;
    assert_eq!(outcome.deleted, 0);
    assert!(backends.documents.get("restaurants", "BISTROT").await?.is_some());
    assert_eq!(provider.project(FirebaseEnv::Dev).documents.count("restaurants"), 2);
    Ok(())
}

#[tokio::test]
async fn failed_document_write_is_counted_and_the_run_continues() -> Result<()> {
    let backups = tempdir()?;
    let config = test_config(&backups);
    let provider = MemoryBackends::new();
    let backends = provider.for_env(FirebaseEnv::Dev)?;
    let geocoder = MemoryGeocoder::default();
    provider.project(FirebaseEnv::Dev).documents.fail_writes_for("BISTROT");

    let sheet = write_sheet(&[
        "bistrot,Le Bistrot,1 rue A,48.85,2.35",
        "cafe,Le Café,3 rue C,48.87,2.37",
        "zinc,Le Zinc,5 rue E,48.88,2.38",
    ])?;
    let pipeline = ImportPipeline::new(&backends, &config);
    let options = ImportOptions::from_config(&config);
    let preview = pipeline
        .prepare(sheet.path(), "base.csv", Vec::new(), &options, &geocoder)
        .await?;
    let outcome = pipeline.commit(&preview, ImportMode::Upsert).await?;

    assert_eq!(outcome.imported, 2);
    assert_eq!(outcome.failed, 1);
    assert!(backends.documents.get("restaurants", "BISTROT").await?.is_none());
    assert!(backends.documents.get("restaurants", "ZINC").await?.is_some());
    let log = std::fs::read_to_string(&outcome.log_file)?;
    assert!(log.contains("BISTROT"));
    Ok(())
}

#[tokio::test]
async fn prepare_alone_writes_nothing() -> Result<()> {
    let backups = tempdir()?;
    let config = test_config(&backups);
    let provider = MemoryBackends::new();
    let backends = provider.for_env(FirebaseEnv::Dev)?;
    let geocoder = MemoryGeocoder::default();

    let sheet = write_sheet(&["bistrot,Le Bistrot,1 rue A,48.85,2.35"])?;
    let uploads = vec![PhotoUpload {
        file_name: "BISTROT1.webp".to_string(),
        bytes: vec![1, 2, 3],
    }];
    let preview = ImportPipeline::new(&backends, &config)
        .prepare(sheet.path(), "base.csv", uploads, &ImportOptions::from_config(&config), &geocoder)
        .await?;
    assert_eq!(preview.counts().create, 1);

    let project = provider.project(FirebaseEnv::Dev);
    assert_eq!(project.documents.count("restaurants"), 0);
    assert_eq!(project.documents.count(&config.import.logs_collection), 0);
    assert!(project.blobs.names().is_empty());
    assert_eq!(std::fs::read_dir(backups.path())?.count(), 0);
    Ok(())
}
