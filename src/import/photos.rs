//! Matching uploaded image files to imported restaurants.
//!
//! Photos are named `<ID><n>.webp` and land in the photos folder, logos are
//! `<ID><n>.png` and land in the logos folder.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::cache::MediaFolder;
use crate::config::StorageConfig;
use crate::error::Result;

/// Splits `CHEZNOUS12` into (`CHEZNOUS`, 12) using the longest id in `ids`
/// followed by a non-empty run of digits.
pub fn split_media_stem<'a>(stem: &'a str, ids: &HashSet<String>) -> Option<(&'a str, u32)> {
    (1..stem.len())
        .rev()
        .filter(|&i| stem.is_char_boundary(i))
        .find_map(|i| {
            let (id, digits) = stem.split_at(i);
            if !ids.contains(id) || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok().map(|n| (id, n))
        })
}

pub struct PhotoUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for PhotoUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoUpload")
            .field("file_name", &self.file_name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub struct MatchedPhoto {
    pub record_id: String,
    pub number: u32,
    pub folder: &'static str,
    /// Normalised object name, `<ID><n>.<ext>`.
    pub file_name: String,
    pub content_type: &'static str,
    #[serde(skip)]
    pub upload: PhotoUpload,
}

impl MatchedPhoto {
    pub fn media_folder(&self) -> MediaFolder {
        MediaFolder::from_param(self.folder)
    }

    pub fn storage_path(&self, storage: &StorageConfig) -> String {
        let prefix = match self.media_folder() {
            MediaFolder::Logos => &storage.logos_folder,
            MediaFolder::Photos => &storage.photos_folder,
        };
        format!("{}{}", prefix, self.file_name)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct PhotoMatches {
    pub matched: Vec<MatchedPhoto>,
    pub unmatched: Vec<String>,
}

/// Assigns each upload to a record id. Unknown extensions and names that do
/// not start with a known id are reported as unmatched.
pub fn match_photos(uploads: Vec<PhotoUpload>, ids: &HashSet<String>) -> PhotoMatches {
    let mut matches = PhotoMatches::default();
    for upload in uploads {
        let Some((stem, ext)) = upload.file_name.rsplit_once('.') else {
            matches.unmatched.push(upload.file_name);
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        let (folder, content_type) = match ext.as_str() {
            "webp" => (MediaFolder::Photos, "image/webp"),
            "png" => (MediaFolder::Logos, "image/png"),
            _ => {
                matches.unmatched.push(upload.file_name);
                continue;
            }
        };
        let stem = stem.trim().to_uppercase();
        match split_media_stem(&stem, ids) {
            Some((id, number)) => {
                debug!(file = %upload.file_name, record = id, "Photo matched");
                matches.matched.push(MatchedPhoto {
                    record_id: id.to_string(),
                    number,
                    folder: folder.as_str(),
                    file_name: format!("{}{}.{}", id, number, ext),
                    content_type,
                    upload,
                });
            }
            None => matches.unmatched.push(upload.file_name),
        }
    }
    matches
}

/// Loads every regular file of `dir` as an upload.
pub fn read_photo_dir(dir: &Path) -> Result<Vec<PhotoUpload>> {
    let mut uploads = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        uploads.push(PhotoUpload {
            file_name: entry.file_name().to_string_lossy().into_owned(),
            bytes: fs::read(entry.path())?,
        });
    }
    uploads.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(uploads)
}
