//! Sysfs / ConfigFS file operations for the USB gadget

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// ConfigFS base path for USB gadgets
pub const CONFIGFS_PATH: &str = "/sys/kernel/config/usb_gadget";

/// Check if ConfigFS is available
pub fn is_configfs_available() -> bool {
    Path::new(CONFIGFS_PATH).exists()
}

/// Write string content to a sysfs attribute
///
/// Sysfs attributes require a single write() syscall: the kernel processes
/// the value on the first write, so the buffer (including the trailing
/// newline) is built before writing.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    // Retry without O_TRUNC: it fails on some write-only attributes
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .or_else(|_| OpenOptions::new().write(true).open(path))
        .or_else(|e| {
            if path.exists() {
                Err(e)
            } else {
                File::create(path)
            }
        })
        .map_err(|e| AppError::Internal(format!("Failed to open {}: {}", path.display(), e)))?;

    let data: std::borrow::Cow<[u8]> = if content.ends_with('\n') {
        content.as_bytes().into()
    } else {
        let mut buf = content.as_bytes().to_vec();
        buf.push(b'\n');
        buf.into()
    };

    file.write_all(&data)
        .map_err(|e| AppError::Internal(format!("Failed to write to {}: {}", path.display(), e)))?;

    file.flush()
        .map_err(|e| AppError::Internal(format!("Failed to flush {}: {}", path.display(), e)))?;

    Ok(())
}

/// Read a path-valued attribute; missing or blank means nothing is bound
pub fn read_bound_path(path: &Path) -> io::Result<Option<PathBuf>> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let content = content.trim();
            if content.is_empty() {
                Ok(None)
            } else {
                Ok(Some(PathBuf::from(content)))
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
