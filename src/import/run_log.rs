use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;

/// Plain-text log of one import run, kept next to its backup. Every line is
/// also emitted as a tracing event.
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, level: &str, message: &str) {
        let line = format!("{} [{}] {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"), level, message);
        if let Ok(mut file) = self.file.lock() {
            if let Err(e) = file.write_all(line.as_bytes()) {
                error!(path = %self.path.display(), "Failed to write run log: {}", e);
            }
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(target: "butter_admin::import", "{}", message);
        self.write("INFO", message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(target: "butter_admin::import", "{}", message);
        self.write("WARN", message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(target: "butter_admin::import", "{}", message);
        self.write("ERROR", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/import_run.log");
        let log = RunLog::create(&path).unwrap();
        log.info("started");
        log.warn("duplicate ids: A");
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INFO] started"));
        assert!(lines[1].contains("[WARN] duplicate ids: A"));
    }
}
