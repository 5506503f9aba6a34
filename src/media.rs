//! Photos and logos in the storage bucket: listing, upload, rename, deletion,
//! PNG to WebP conversion and missing-media analysis.

use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::backends::EnvBackends;
use crate::cache::{EnvCaches, MediaFolder};
use crate::config::StorageConfig;
use crate::error::{AdminError, Result};
use crate::import::photos::split_media_stem;
use crate::storage::BlobInfo;

pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "gif"];
const MAX_ERROR_DETAILS: usize = 10;

pub fn folder_prefix(storage: &StorageConfig, folder: MediaFolder) -> &str {
    match folder {
        MediaFolder::Logos => &storage.logos_folder,
        MediaFolder::Photos => &storage.photos_folder,
    }
}

pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Replaces path separators and spaces so the name stays inside its folder.
pub fn sanitize_file_name(name: &str) -> String {
    name.trim().replace([' ', '/', '\\'], "_")
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Weight {
    Ok,
    Heavy,
    VeryHeavy,
}

impl Weight {
    pub fn css_class(&self) -> &'static str {
        match self {
            Weight::Ok => "weight-ok",
            Weight::Heavy => "weight-heavy",
            Weight::VeryHeavy => "weight-very-heavy",
        }
    }
}

pub fn weight(size: u64, storage: &StorageConfig) -> Weight {
    if size >= storage.very_heavy_image_bytes {
        Weight::VeryHeavy
    } else if size >= storage.heavy_image_bytes {
        Weight::Heavy
    } else {
        Weight::Ok
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoItem {
    pub name: String,
    pub full_path: String,
    pub size: u64,
    pub size_kb: f64,
    pub content_type: String,
    pub time_created: Option<String>,
    pub updated: Option<String>,
    pub weight: Weight,
    pub url: String,
}

impl PhotoItem {
    pub fn from_blob(blob: &BlobInfo, url: String, storage: &StorageConfig) -> Self {
        Self {
            name: blob.file_name().to_string(),
            full_path: blob.name.clone(),
            size: blob.size,
            size_kb: (blob.size as f64 / 1024.0 * 10.0).round() / 10.0,
            content_type: blob
                .content_type
                .clone()
                .unwrap_or_else(|| "image/png".to_string()),
            time_created: blob.time_created.map(|t| t.to_rfc3339()),
            updated: blob.updated.map(|t| t.to_rfc3339()),
            weight: weight(blob.size, storage),
            url,
        }
    }
}

/// Objects of one folder sorted by name, cached per environment.
pub async fn list_media(
    backends: &EnvBackends,
    caches: &EnvCaches,
    storage: &StorageConfig,
    folder: MediaFolder,
    force_refresh: bool,
) -> Result<Arc<Vec<BlobInfo>>> {
    let key = (backends.env, folder);
    if !force_refresh {
        if let Some(cached) = caches.photos.get(&key).await {
            return Ok(cached);
        }
    }
    let prefix = folder_prefix(storage, folder);
    let mut blobs: Vec<BlobInfo> = backends
        .blobs
        .list(prefix)
        .await?
        .into_iter()
        .filter(|b| b.name != prefix && !b.name.ends_with('/'))
        .collect();
    blobs.sort_by(|a, b| a.file_name().cmp(b.file_name()));
    info!(env = %backends.env, folder = folder.as_str(), count = blobs.len(), "Media listed");
    let blobs = Arc::new(blobs);
    caches.photos.insert(key, blobs.clone()).await;
    Ok(blobs)
}

/// Case-insensitive substring match on the file name.
pub fn search_media<'a>(blobs: &'a [BlobInfo], query: &str) -> Vec<&'a BlobInfo> {
    let q = query.trim().to_lowercase();
    blobs
        .iter()
        .filter(|b| q.is_empty() || b.file_name().to_lowercase().contains(&q))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoDetail {
    #[serde(flatten)]
    pub item: PhotoItem,
    pub folder: &'static str,
    pub bucket: String,
}

pub async fn photo_detail(
    backends: &EnvBackends,
    storage: &StorageConfig,
    folder: MediaFolder,
    name: &str,
) -> Result<PhotoDetail> {
    let path = format!("{}{}", folder_prefix(storage, folder), name);
    let blob = backends
        .blobs
        .metadata(&path)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("Photo {}", path)))?;
    let url = backends.blobs.download_url(&blob);
    Ok(PhotoDetail {
        item: PhotoItem::from_blob(&blob, url, storage),
        folder: folder.as_str(),
        bucket: backends.blobs.bucket().to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub success: bool,
    pub message: String,
    pub filename: String,
    pub full_path: String,
    pub size: u64,
}

/// Uploads one image. The name is sanitized and must carry an allowed
/// extension; the content type follows the extension.
pub async fn upload_photo(
    backends: &EnvBackends,
    caches: &EnvCaches,
    storage: &StorageConfig,
    folder: MediaFolder,
    file_name: &str,
    bytes: Vec<u8>,
) -> Result<UploadResult> {
    let file_name = sanitize_file_name(file_name);
    let extension = extension_of(&file_name)
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| {
            AdminError::Validation(format!(
                "Type de fichier non autorisé. Extensions acceptées: {}",
                ALLOWED_EXTENSIONS.join(", ")
            ))
        })?;
    if bytes.is_empty() {
        return Err(AdminError::Validation("Fichier vide".to_string()));
    }
    if bytes.len() as u64 > storage.max_image_bytes {
        return Err(AdminError::Validation(format!(
            "Fichier trop volumineux ({} Ko, maximum {} Ko)",
            bytes.len() / 1024,
            storage.max_image_bytes / 1024
        )));
    }

    let path = format!("{}{}", folder_prefix(storage, folder), file_name);
    let blob = backends
        .blobs
        .upload(&path, bytes, content_type_for(&extension))
        .await?;
    caches.invalidate_media(backends.env, folder).await;
    info!(env = %backends.env, path = %path, size = blob.size, "Photo uploaded");
    Ok(UploadResult {
        success: true,
        message: format!("Photo '{}' uploadée avec succès", file_name),
        filename: file_name,
        full_path: blob.name,
        size: blob.size,
    })
}

pub async fn delete_photo(
    backends: &EnvBackends,
    caches: &EnvCaches,
    storage: &StorageConfig,
    folder: MediaFolder,
    name: &str,
) -> Result<()> {
    let path = format!("{}{}", folder_prefix(storage, folder), name);
    if !backends.blobs.exists(&path).await? {
        return Err(AdminError::NotFound(format!("Photo {}", path)));
    }
    backends.blobs.delete(&path).await?;
    caches.invalidate_media(backends.env, folder).await;
    info!(env = %backends.env, path = %path, "Photo deleted");
    Ok(())
}

/// Renames by copy then delete. A new name without extension keeps the old one.
pub async fn rename_photo(
    backends: &EnvBackends,
    caches: &EnvCaches,
    storage: &StorageConfig,
    folder: MediaFolder,
    old_name: &str,
    new_name: &str,
) -> Result<BlobInfo> {
    let mut new_name = sanitize_file_name(new_name);
    if new_name.is_empty() {
        return Err(AdminError::Validation("Nouveau nom requis".to_string()));
    }
    if extension_of(&new_name).is_none() {
        if let Some(ext) = extension_of(old_name) {
            new_name = format!("{}.{}", new_name, ext);
        }
    }
    let prefix = folder_prefix(storage, folder);
    let from = format!("{}{}", prefix, old_name);
    let to = format!("{}{}", prefix, new_name);
    if from == to {
        return Err(AdminError::Validation("Le nouveau nom est identique".to_string()));
    }
    if !backends.blobs.exists(&from).await? {
        return Err(AdminError::NotFound(format!("Photo {}", from)));
    }
    if backends.blobs.exists(&to).await? {
        return Err(AdminError::Validation(format!("'{}' existe déjà", new_name)));
    }
    let blob = backends.blobs.copy(&from, &to).await?;
    backends.blobs.delete(&from).await?;
    caches.invalidate_media(backends.env, folder).await;
    info!(env = %backends.env, from = %from, to = %to, "Photo renamed");
    Ok(blob)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkDeleteResult {
    pub deleted: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
}

pub async fn bulk_delete(
    backends: &EnvBackends,
    caches: &EnvCaches,
    storage: &StorageConfig,
    folder: MediaFolder,
    names: &[String],
) -> Result<BulkDeleteResult> {
    if names.is_empty() {
        return Err(AdminError::Validation("Aucune photo sélectionnée".to_string()));
    }
    let prefix = folder_prefix(storage, folder);
    let mut result = BulkDeleteResult::default();
    for name in names {
        let path = format!("{}{}", prefix, name);
        match backends.blobs.delete(&path).await {
            Ok(()) => result.deleted += 1,
            Err(e) => {
                warn!(path = %path, "Bulk delete failed: {}", e);
                result.errors += 1;
                if result.error_details.len() < MAX_ERROR_DETAILS {
                    result.error_details.push(format!("{}: {}", name, e));
                }
            }
        }
    }
    caches.invalidate_media(backends.env, folder).await;
    info!(env = %backends.env, deleted = result.deleted, errors = result.errors, "Bulk delete done");
    Ok(result)
}

/// Decodes an image, shrinks it to fit `max_width`×`max_height`, flattens
/// transparency onto white and encodes lossless WebP.
pub fn png_to_webp(bytes: &[u8], max_width: u32, max_height: u32) -> Result<Vec<u8>> {
    let mut img = image::load_from_memory(bytes)?;
    let (width, height) = img.dimensions();
    if width > max_width || height > max_height {
        img = img.resize(max_width, max_height, FilterType::Lanczos3);
    }
    let rgb = flatten_on_white(&img);
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(rgb).write_with_encoder(WebPEncoder::new_lossless(&mut out))?;
    Ok(out)
}

fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionDetail {
    pub original: String,
    pub webp: String,
    pub original_kb: f64,
    pub webp_kb: f64,
    pub reduction_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    pub total: usize,
    pub converted: usize,
    pub errors: usize,
    pub total_original_size_mb: f64,
    pub total_webp_size_mb: f64,
    pub space_saved_mb: f64,
    pub overall_reduction_percent: f64,
    pub details: Vec<ConversionDetail>,
    pub error_details: Vec<String>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn to_mb(bytes: u64) -> f64 {
    round2(bytes as f64 / (1024.0 * 1024.0))
}

/// Converts every PNG of the photos folder to WebP, uploading the WebP and
/// deleting the PNG. Each file is independent; failures are counted.
#[instrument(skip(backends, caches, storage), fields(env = %backends.env))]
pub async fn convert_photos_to_webp(
    backends: &EnvBackends,
    caches: &EnvCaches,
    storage: &StorageConfig,
) -> Result<ConversionStats> {
    let folder = MediaFolder::Photos;
    let blobs = list_media(backends, caches, storage, folder, true).await?;
    let pngs: Vec<&BlobInfo> = blobs
        .iter()
        .filter(|b| b.extension().as_deref() == Some("png"))
        .collect();
    let mut stats = ConversionStats {
        total: pngs.len(),
        ..Default::default()
    };
    let (mut original_bytes, mut webp_bytes) = (0u64, 0u64);

    for blob in pngs {
        match convert_one(backends, storage, blob).await {
            Ok((webp_name, original, webp)) => {
                stats.converted += 1;
                original_bytes += original;
                webp_bytes += webp;
                if stats.details.len() < MAX_ERROR_DETAILS {
                    let reduction = if original > 0 {
                        round2((1.0 - webp as f64 / original as f64) * 100.0)
                    } else {
                        0.0
                    };
                    stats.details.push(ConversionDetail {
                        original: blob.file_name().to_string(),
                        webp: webp_name,
                        original_kb: round2(original as f64 / 1024.0),
                        webp_kb: round2(webp as f64 / 1024.0),
                        reduction_percent: reduction,
                    });
                }
            }
            Err(e) => {
                error!(file = %blob.name, "Conversion failed: {}", e);
                stats.errors += 1;
                if stats.error_details.len() < MAX_ERROR_DETAILS {
                    stats.error_details.push(format!("{}: {}", blob.file_name(), e));
                }
            }
        }
    }

    stats.total_original_size_mb = to_mb(original_bytes);
    stats.total_webp_size_mb = to_mb(webp_bytes);
    stats.space_saved_mb = to_mb(original_bytes.saturating_sub(webp_bytes));
    if original_bytes > 0 {
        stats.overall_reduction_percent =
            round2((1.0 - webp_bytes as f64 / original_bytes as f64) * 100.0);
    }
    caches.invalidate_media(backends.env, folder).await;
    info!(
        converted = stats.converted,
        errors = stats.errors,
        saved_mb = stats.space_saved_mb,
        "PNG to WebP conversion done"
    );
    Ok(stats)
}

async fn convert_one(
    backends: &EnvBackends,
    storage: &StorageConfig,
    blob: &BlobInfo,
) -> Result<(String, u64, u64)> {
    let bytes = backends.blobs.download(&blob.name).await?;
    let original = bytes.len() as u64;
    let webp = png_to_webp(&bytes, storage.max_width, storage.max_height)?;
    let webp_size = webp.len() as u64;

    let stem = blob.name.rsplit_once('.').map_or(blob.name.as_str(), |(s, _)| s);
    let webp_path = format!("{}.webp", stem);
    let uploaded = backends.blobs.upload(&webp_path, webp, "image/webp").await?;
    backends.blobs.delete(&blob.name).await?;
    Ok((uploaded.file_name().to_string(), original, webp_size))
}

/// Media present per restaurant id, derived from object names.
#[derive(Debug, Clone, Default)]
pub struct MediaIndex {
    photos: HashMap<String, BTreeSet<u32>>,
    logos: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub has_logo: bool,
    pub logo_count: usize,
    pub photo_count: usize,
    pub photos: Vec<u32>,
}

impl MediaIndex {
    /// `<ID><n>.webp` in `photos` count as photos, `<ID><n>.png` in `logos`
    /// as logos. Names are matched case-insensitively against `ids`.
    pub fn build(ids: &HashSet<String>, photos: &[BlobInfo], logos: &[BlobInfo]) -> Self {
        let mut index = MediaIndex::default();
        for (blob, wanted) in photos
            .iter()
            .map(|b| (b, "webp"))
            .chain(logos.iter().map(|b| (b, "png")))
        {
            if blob.extension().as_deref() != Some(wanted) {
                continue;
            }
            let file = blob.file_name();
            let stem = file.rsplit_once('.').map_or(file, |(s, _)| s).to_uppercase();
            let Some((id, number)) = split_media_stem(&stem, ids) else {
                continue;
            };
            if wanted == "webp" {
                index.photos.entry(id.to_string()).or_default().insert(number);
            } else {
                *index.logos.entry(id.to_string()).or_default() += 1;
            }
        }
        index
    }

    pub fn info(&self, id: &str) -> MediaInfo {
        let photos: Vec<u32> = self
            .photos
            .get(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let logo_count = self.logos.get(id).copied().unwrap_or(0);
        MediaInfo {
            has_logo: logo_count > 0,
            logo_count,
            photo_count: photos.len(),
            photos,
        }
    }

    /// No photo at all, or a gap in the numbering between 2 and the highest.
    pub fn is_missing_photos(&self, id: &str) -> bool {
        match self.photos.get(id) {
            None => true,
            Some(numbers) => match numbers.last() {
                None => true,
                Some(&max) => (2..=max).any(|n| !numbers.contains(&n)),
            },
        }
    }

    pub fn is_missing_logo(&self, id: &str) -> bool {
        !self.logos.contains_key(id)
    }

    pub fn missing(&self, ids: &HashSet<String>, folder: MediaFolder) -> HashSet<String> {
        ids.iter()
            .filter(|id| match folder {
                MediaFolder::Photos => self.is_missing_photos(id),
                MediaFolder::Logos => self.is_missing_logo(id),
            })
            .cloned()
            .collect()
    }
}

/// Loads both folders and indexes them against `ids`.
pub async fn media_index(
    backends: &EnvBackends,
    caches: &EnvCaches,
    storage: &StorageConfig,
    ids: &HashSet<String>,
) -> Result<MediaIndex> {
    let photos = list_media(backends, caches, storage, MediaFolder::Photos, false).await?;
    let logos = list_media(backends, caches, storage, MediaFolder::Logos, false).await?;
    Ok(MediaIndex::build(ids, &photos, &logos))
}

/// Restaurant ids missing photos or logos, cached per environment and folder.
pub async fn missing_media(
    backends: &EnvBackends,
    caches: &EnvCaches,
    storage: &StorageConfig,
    ids: &HashSet<String>,
    folder: MediaFolder,
) -> Result<Arc<HashSet<String>>> {
    let key = (backends.env, folder);
    if let Some(cached) = caches.missing_media.get(&key).await {
        return Ok(cached);
    }
    let index = media_index(backends, caches, storage, ids).await?;
    let missing = Arc::new(index.missing(ids, folder));
    caches.missing_media.insert(key, missing.clone()).await;
    Ok(missing)
}
