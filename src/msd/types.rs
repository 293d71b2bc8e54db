//! Mount image data types

use serde::{Deserialize, Serialize};
use std::fmt;

/// File entry inside a mount image
///
/// Produced by listing operations only; a read projection of the image
/// contents at the time of the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name (long name when the tool reports one)
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, size: u64, mtime: i64) -> Self {
        Self {
            name: name.into(),
            size,
            mtime,
        }
    }
}

/// Mount image file in the images directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// File name inside the images directory
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
}

/// Mount state of an image relative to the USB gadget
///
/// Always derived from the gadget's bound path and the image's presence on
/// disk, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountStatus {
    /// The image is what the gadget exposes
    Mounted,
    /// The image exists and nothing is bound
    Unmounted,
    /// The image file does not exist
    NoImage,
    /// The image cannot be listed (only reported by status queries)
    BadImage,
    /// The gadget exposes a different file
    OtherImageMounted,
}

impl MountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mounted => "mounted",
            Self::Unmounted => "unmounted",
            Self::NoImage => "no_image",
            Self::BadImage => "bad_image",
            Self::OtherImageMounted => "other_image_mounted",
        }
    }
}

impl fmt::Display for MountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of what the gadget currently exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountReport {
    pub status: MountStatus,
    /// Image name relative to the mount images directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub listing: Vec<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MountReport {
    pub fn new(status: MountStatus) -> Self {
        Self {
            status,
            file: None,
            listing: Vec::new(),
            error: None,
        }
    }
}
