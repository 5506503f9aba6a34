use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use butter_admin::backends::{BackendProvider, GoogleBackends};
use butter_admin::config::Config;
use butter_admin::environment::{Environments, FirebaseEnv};
use butter_admin::import::backup::{export_collection, run_dir};
use butter_admin::import::favorites::recompute_favorite_counts;
use butter_admin::import::photos::read_photo_dir;
use butter_admin::import::{ImportMode, ImportOptions, ImportPipeline, NominatimGeocoder};
use butter_admin::logging;
use butter_admin::metrics;
use butter_admin::revenuecat::{RevenueCatClient, RevenueCatService, RevenueCatStore};
use butter_admin::web::{self, AppState};

#[derive(Parser)]
#[command(name = "butter_admin")]
#[command(about = "Administration console for the Butter restaurant app")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web console
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Import a restaurant spreadsheet into Firestore
    Import {
        /// Excel or CSV file
        #[arg(long)]
        file: PathBuf,
        /// Sheet name (defaults to the configured sheet, then the first one)
        #[arg(long)]
        sheet: Option<String>,
        /// Target environment: dev or prod
        #[arg(long)]
        env: Option<String>,
        /// upsert (default) or replace
        #[arg(long, default_value = "upsert")]
        mode: String,
        /// Folder of <ID><n>.webp photos and <ID><n>.png logos to upload
        #[arg(long)]
        photos_dir: Option<PathBuf>,
        /// Rename duplicated tags to TAG-2, TAG-3...
        #[arg(long)]
        dedupe_ids: bool,
        /// Prepare and report without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Export the restaurants collection to JSON, NDJSON and CSV
    Backup {
        #[arg(long)]
        env: Option<String>,
    },
    /// Recompute favorite_count on every restaurant
    Favorites {
        #[arg(long)]
        env: Option<String>,
    },
    /// Show the configured environments and their credentials
    EnvStatus,
    /// Refresh every user's RevenueCat status
    RcScan {
        #[arg(long)]
        env: Option<String>,
    },
}

fn resolve_env(config: &Config, requested: Option<&str>) -> anyhow::Result<FirebaseEnv> {
    match requested {
        None => Ok(config.default_env()),
        Some(value) => FirebaseEnv::parse(value)
            .ok_or_else(|| anyhow!("Unknown environment '{}', expected dev or prod", value)),
    }
}

fn revenuecat_service(config: &Config) -> anyhow::Result<Arc<RevenueCatService>> {
    let api = Arc::new(RevenueCatClient::new(config.revenuecat.clone())?);
    let store = Arc::new(
        RevenueCatStore::open(&config.revenuecat.sqlite_path)
            .with_context(|| format!("opening {}", config.revenuecat.sqlite_path.display()))?,
    );
    Ok(Arc::new(RevenueCatService::new(api, store, config.revenuecat.clone())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let mut config = Config::load()?;
    let _guard = logging::init_logging(&config.server.log_dir);
    metrics::init_metrics();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if config.admin.password_sha256.is_empty() {
                warn!("No admin password hash configured, every login will be refused");
            }
            let config = Arc::new(config);
            let backends: Arc<dyn BackendProvider> = Arc::new(GoogleBackends::new(config.clone())?);
            let geocoder = Arc::new(NominatimGeocoder::new(&config.import)?);
            let revenuecat = revenuecat_service(&config)?;
            let state = AppState::new(config.clone(), backends, geocoder, revenuecat);
            info!(default_env = %config.default_env(), "Starting admin console");
            web::start_server(state).await?;
        }
        Commands::Import {
            file,
            sheet,
            env,
            mode,
            photos_dir,
            dedupe_ids,
            dry_run,
        } => {
            let env = resolve_env(&config, env.as_deref())?;
            let mode = ImportMode::parse(&mode).ok_or_else(|| anyhow!("Unknown mode '{}'", mode))?;
            let config = Arc::new(config);
            let provider = GoogleBackends::new(config.clone())?;
            let backends = provider.for_env(env)?;
            let geocoder = NominatimGeocoder::new(&config.import)?;

            let mut options = ImportOptions::from_config(&config);
            if sheet.is_some() {
                options.sheet = sheet;
            }
            options.dedupe_ids |= dedupe_ids;
            let uploads = match &photos_dir {
                Some(dir) => read_photo_dir(dir)
                    .with_context(|| format!("reading photos from {}", dir.display()))?,
                None => Vec::new(),
            };

            let source_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            println!("🔄 Preparing import of {} on {}...", source_name, env.label());
            let pipeline = ImportPipeline::new(&backends, &config);
            let preview = pipeline
                .prepare(&file, &source_name, uploads, &options, &geocoder)
                .await?;
            let counts = preview.counts();
            println!("\n📊 Preview for sheet '{}':", preview.sheet_name);
            println!("   Rows read: {}", preview.total_rows);
            println!("   Create: {}", counts.create);
            println!("   Update: {}", counts.update);
            println!("   Unchanged: {}", counts.unchanged);
            println!("   Absent from file: {}", counts.stale);
            println!("   Duplicated tags: {}", preview.duplicates.len());
            println!("   Rows without tag: {}", preview.missing_tag_rows.len());
            println!("   Geocoding failures: {}", preview.geocoding.failed.len());
            println!(
                "   Photos matched: {} (unmatched: {})",
                preview.photos.matched.len(),
                preview.photos.unmatched.len()
            );

            if dry_run {
                println!("\n✅ Dry run, nothing written");
                return Ok(());
            }

            let outcome = pipeline.commit(&preview, mode).await?;
            println!("\n✅ Import completed on {} ({} mode)", outcome.env.label(), mode.as_str());
            println!("   Written: {}", outcome.imported);
            println!("   Failed: {}", outcome.failed);
            println!("   Unchanged skipped: {}", outcome.unchanged_skipped);
            println!("   Deleted: {}", outcome.deleted);
            println!("   Photos uploaded: {}", outcome.photos_uploaded);
            println!("   Backup: {}", outcome.backup_dir.display());
            println!("   Log: {}", outcome.log_file.display());
            if let Some(err) = &outcome.favorite_error {
                warn!("Favorite counts not recomputed: {}", err);
            }
            if !outcome.photo_failures.is_empty() {
                println!("\n⚠️  Photo uploads failed:");
                for failure in &outcome.photo_failures {
                    println!("   - {}", failure);
                }
            }
        }
        Commands::Backup { env } => {
            let env = resolve_env(&config, env.as_deref())?;
            let provider = GoogleBackends::new(Arc::new(config.clone()))?;
            let backends = provider.for_env(env)?;
            let collection = &config.import.collection;
            let dir = run_dir(&config.import.backup_dir, collection);
            let meta = export_collection(backends.documents.as_ref(), collection, &dir).await?;
            println!(
                "✅ {} documents of '{}' on {} exported to {}",
                meta.count,
                collection,
                env.label(),
                dir.display()
            );
        }
        Commands::Favorites { env } => {
            let env = resolve_env(&config, env.as_deref())?;
            let provider = GoogleBackends::new(Arc::new(config.clone()))?;
            let backends = provider.for_env(env)?;
            let stats = recompute_favorite_counts(
                backends.documents.as_ref(),
                &config.import.collection,
                &config.import.favorites_collection,
            )
            .await?;
            println!("✅ Favorite counts recomputed on {}", env.label());
            println!("   Favorites: {} ({} active)", stats.total_favorites, stats.active_favorites);
            println!("   Restaurants with favorites: {}", stats.restaurants_with_favorites);
            println!("   Updated: {}", stats.updated);
            println!("   Errors: {}", stats.errors);
        }
        Commands::EnvStatus => {
            let environments = Environments::from_config(&config);
            println!("Default environment: {}", environments.default_env().label());
            for env in FirebaseEnv::ALL {
                let status = environments.status(env);
                let marker = if status.file_exists { "✅" } else { "❌" };
                println!(
                    "{} {}: {} (project {}, bucket {})",
                    marker, status.label, status.file_path, status.project_id, status.bucket
                );
            }
        }
        Commands::RcScan { env } => {
            let env = resolve_env(&config, env.as_deref())?;
            let provider = GoogleBackends::new(Arc::new(config.clone()))?;
            let backends = provider.for_env(env)?;
            let service = revenuecat_service(&config)?;
            println!("🔄 Scanning RevenueCat subscribers on {}...", env.label());
            let progress = service.run_scan(&backends).await;
            if progress.status.starts_with("error") {
                error!("RevenueCat scan failed: {}", progress.status);
            }
            println!("\n📊 Scan {}:", progress.status);
            println!("   Users checked: {} / {}", progress.current, progress.total);
            println!("   Found in RevenueCat: {}", progress.found_total);
            println!("   Active: {}", progress.found_active);
        }
    }
    Ok(())
}
