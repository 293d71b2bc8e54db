//! FAT mount image
//!
//! A mount image is a single FAT-formatted file handed to the USB gadget.
//! All reads and writes of its contents go through mtools, which work on
//! the file directly and need no root privileges.

use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::listing::parse_listing;
use super::types::FileEntry;
use crate::config::ToolsConfig;
use crate::error::{AppError, Result};
use crate::utils::run_tool;

/// Sectors per track used for image sizing
pub const SECTORS_PER_TRACK: u64 = 32;

/// Sector size in bytes
pub const SECTOR_SIZE: u64 = 512;

/// Image sizes are aligned down to whole tracks (16 KiB)
pub const SECTOR_ALIGNMENT: u64 = SECTORS_PER_TRACK * SECTOR_SIZE;

/// Room for FAT structures on top of the payload (1 MiB)
pub const BUFFER_SPACE: u64 = 1024 * 1024;

/// mtools name of the image root directory
const IMAGE_ROOT: &str = "::";

/// Size of an image packed from files totalling `payload` bytes
///
/// The payload is rounded down to the track alignment before the buffer is
/// added; the buffer absorbs the difference.
pub fn packed_image_size(payload: u64) -> u64 {
    payload - payload % SECTOR_ALIGNMENT + BUFFER_SPACE
}

/// One FAT mount image file
///
/// Holds no state besides its path: every query goes back to the file
/// system or the external tools.
#[derive(Debug, Clone)]
pub struct MountImage {
    imagefile: PathBuf,
    tools: ToolsConfig,
}

impl MountImage {
    /// Image using the default tool command lines
    pub fn new(imagefile: impl Into<PathBuf>) -> Self {
        Self::with_tools(imagefile, ToolsConfig::default())
    }

    pub fn with_tools(imagefile: impl Into<PathBuf>, tools: ToolsConfig) -> Self {
        Self {
            imagefile: imagefile.into(),
            tools,
        }
    }

    pub fn imagefile(&self) -> &Path {
        &self.imagefile
    }

    /// Whether the image path is a regular file
    pub fn exists(&self) -> bool {
        self.imagefile.is_file()
    }

    /// Image file size in bytes
    pub fn size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.imagefile)?.len())
    }

    /// Remove the image file; a missing file is not an error
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.imagefile) {
            Ok(()) => {
                info!("Deleted mount image: {}", self.imagefile.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List the files in the image root, in the tool's order
    pub fn list(&self) -> Result<Vec<FileEntry>> {
        let output = run_tool(
            &self.tools.mdir,
            [OsStr::new("-i"), self.imagefile.as_os_str()],
        )?;
        Ok(parse_listing(&output.stdout))
    }

    /// Whether the image can be listed
    pub fn is_valid(&self) -> bool {
        match self.list() {
            Ok(_) => true,
            Err(e) => {
                debug!("Image {} is not valid: {}", self.imagefile.display(), e);
                false
            }
        }
    }

    /// Rebuild the image from `files`, copied into the root in the given order
    ///
    /// The old image is deleted before the new one is built. Any failure
    /// leaves whatever the last successful step produced on disk; treat the
    /// image as suspect and repack or delete it. See [`Self::pack_atomic`]
    /// for the variant that keeps the old image on failure.
    pub fn pack<P: AsRef<Path>>(&self, files: &[P]) -> Result<()> {
        let size = packed_image_size(payload_size(files)?);
        self.delete()?;
        self.build(&self.imagefile, size, files)?;
        info!(
            "Packed {} file(s) into {} ({} bytes)",
            files.len(),
            self.imagefile.display(),
            size
        );
        Ok(())
    }

    /// Like [`Self::pack`], but builds into a temporary sibling file and
    /// renames it over the image only once every step succeeded
    pub fn pack_atomic<P: AsRef<Path>>(&self, files: &[P]) -> Result<()> {
        let size = packed_image_size(payload_size(files)?);
        let temp_path = self.temp_path()?;

        if let Err(e) = self.build(&temp_path, size, files) {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(
                        "Failed to remove temp image {}: {}",
                        temp_path.display(),
                        cleanup
                    );
                }
            }
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &self.imagefile) {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                warn!(
                    "Failed to remove temp image {}: {}",
                    temp_path.display(),
                    cleanup
                );
            }
            return Err(e.into());
        }

        info!(
            "Packed {} file(s) into {} ({} bytes, atomic)",
            files.len(),
            self.imagefile.display(),
            size
        );
        Ok(())
    }

    /// Copy every file of the image into `destdir`
    pub fn unpack(&self, destdir: &Path) -> Result<()> {
        for entry in self.list()? {
            self.copy_out(&entry.name, destdir)?;
        }
        Ok(())
    }

    /// Copy the single file `name` to exactly `destfile`
    pub fn unpack_file(&self, name: &str, destfile: &Path) -> Result<()> {
        if destfile.is_dir() {
            return Err(AppError::Action(format!(
                "target path '{}' is a directory",
                destfile.display()
            )));
        }
        self.copy_out(name, destfile)
    }

    fn copy_out(&self, name: &str, dest: &Path) -> Result<()> {
        let source = OsString::from(format!("{}/{}", IMAGE_ROOT, name));
        run_tool(
            &self.tools.mcopy,
            [
                OsStr::new("-i"),
                self.imagefile.as_os_str(),
                OsStr::new("-n"),
                source.as_os_str(),
                dest.as_os_str(),
            ],
        )?;
        Ok(())
    }

    /// Zero-fill `target` to `size`, format it and copy `files` in
    fn build<P: AsRef<Path>>(&self, target: &Path, size: u64, files: &[P]) -> Result<()> {
        create_zeroed(target, size)?;
        run_tool(&self.tools.mkfs, [target.as_os_str()])?;
        for file in files {
            let file = file.as_ref();
            debug!("Copying {} into {}", file.display(), target.display());
            run_tool(
                &self.tools.mcopy,
                [
                    OsStr::new("-i"),
                    target.as_os_str(),
                    file.as_os_str(),
                    OsStr::new(IMAGE_ROOT),
                ],
            )?;
        }
        Ok(())
    }

    fn temp_path(&self) -> Result<PathBuf> {
        let name = self.imagefile.file_name().ok_or_else(|| {
            AppError::BadRequest(format!(
                "image path '{}' has no file name",
                self.imagefile.display()
            ))
        })?;
        let temp_name = format!(
            ".{}.{}.packing",
            name.to_string_lossy(),
            uuid::Uuid::new_v4()
        );
        Ok(self.imagefile.with_file_name(temp_name))
    }
}

fn payload_size<P: AsRef<Path>>(files: &[P]) -> Result<u64> {
    let mut total = 0u64;
    for file in files {
        let file = file.as_ref();
        let metadata = fs::metadata(file).map_err(|e| {
            AppError::NotFound(format!("cannot stat '{}': {}", file.display(), e))
        })?;
        total += metadata.len();
    }
    Ok(total)
}

fn create_zeroed(path: &Path, size: u64) -> Result<()> {
    let file = File::create(path)?;
    file.set_len(size)?;
    file.sync_all()?;
    Ok(())
}
