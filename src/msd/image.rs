//! Mount images directory
//!
//! Maps image names to files inside the configured mount images directory
//! and lists what is there.

use std::fs;
use std::path::{Path, PathBuf};

use super::types::ImageInfo;
use crate::error::{AppError, Result};

/// Image Manager
#[derive(Debug, Clone)]
pub struct ImageManager {
    /// Mount images directory
    images_path: PathBuf,
}

impl ImageManager {
    pub fn new(images_path: impl Into<PathBuf>) -> Self {
        Self {
            images_path: images_path.into(),
        }
    }

    /// Ensure images directory exists
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.images_path).map_err(|e| {
            AppError::Internal(format!(
                "Failed to create images directory {}: {}",
                self.images_path.display(),
                e
            ))
        })
    }

    pub fn images_path(&self) -> &Path {
        &self.images_path
    }

    /// Path of the image called `name`
    ///
    /// Only bare file names are accepted, so a name can never point outside
    /// the images directory.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.images_path.join(name))
    }

    /// Name of `path` relative to the images directory, if it lives there
    pub fn name_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.images_path).ok()?;
        let name = relative.to_string_lossy().trim_start_matches('/').to_string();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// All images, sorted by name
    pub fn list(&self) -> Result<Vec<ImageInfo>> {
        if !self.images_path.is_dir() {
            return Ok(Vec::new());
        }

        let mut images = Vec::new();
        for entry in fs::read_dir(&self.images_path)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            // Hidden files are in-progress atomic packs
            if name.starts_with('.') || !path.is_file() {
                continue;
            }
            let metadata = entry.metadata()?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            images.push(ImageInfo {
                name,
                size: metadata.len(),
                mtime,
            });
        }

        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }
}

/// Reject anything that is not a plain file name
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(AppError::BadRequest(format!(
            "invalid image name '{}'",
            name
        )));
    }
    Ok(())
}
