//! Mount state machine
//!
//! A [`Mount`] pairs one target image with the gadget binding. Its state is
//! never cached: every call compares what the gadget reports right now
//! against the target path and the file system.
//!
//! ```text
//!              mount()                unmount()
//!  Unmounted ───────────▶ Mounted ───────────────▶ Unmounted
//!      ▲                                                 │
//!      │ pack                       delete_image()       ▼
//!   NoImage ◀──────────────────────────────────────── (any)
//! ```
//!
//! `OtherImageMounted` blocks `mount()` until the foreign binding is
//! released; nothing here ever preempts it.

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::mount_image::MountImage;
use super::types::{FileEntry, MountStatus};
use crate::config::ToolsConfig;
use crate::error::{AppError, Result};
use crate::otg::GadgetMounter;

pub struct Mount {
    mounter: Arc<dyn GadgetMounter>,
    image: MountImage,
}

impl Mount {
    pub fn new(image: MountImage, mounter: Arc<dyn GadgetMounter>) -> Self {
        Self { mounter, image }
    }

    /// Whatever the gadget exposes right now, or `None` if nothing is bound
    ///
    /// The bound file may be unknown to this application.
    pub fn current(mounter: Arc<dyn GadgetMounter>, tools: ToolsConfig) -> Option<Self> {
        let imagefile = mounter.mounted()?;
        Some(Self::new(MountImage::with_tools(imagefile, tools), mounter))
    }

    pub fn imagefile(&self) -> &Path {
        self.image.imagefile()
    }

    /// Current state of the target image
    ///
    /// Precedence: bound here, then missing image, then foreign binding.
    /// Never returns [`MountStatus::BadImage`].
    pub fn state(&self) -> MountStatus {
        let mounted = self.mounter.mounted();
        let bound_here = mounted.as_deref() == Some(self.image.imagefile());
        let bound_elsewhere = mounted.is_some() && !bound_here;

        match (bound_here, self.image.exists(), bound_elsewhere) {
            (true, _, _) => MountStatus::Mounted,
            (false, false, _) => MountStatus::NoImage,
            (false, true, true) => MountStatus::OtherImageMounted,
            (false, true, false) => MountStatus::Unmounted,
        }
    }

    /// Expose the target image to the USB host; no-op if it already is
    pub fn mount(&self) -> Result<()> {
        match self.state() {
            MountStatus::Mounted => Ok(()),
            MountStatus::OtherImageMounted => Err(AppError::Action(
                "an image is already mounted; unmount it first".to_string(),
            )),
            MountStatus::NoImage => Err(AppError::Action(
                "image doesn't exist, cannot mount".to_string(),
            )),
            MountStatus::BadImage => Err(AppError::InvalidImage(
                self.image.imagefile().display().to_string(),
            )),
            MountStatus::Unmounted => {
                self.mounter.mount(self.image.imagefile())?;
                info!("Mounted {}", self.image.imagefile().display());
                Ok(())
            }
        }
    }

    /// Detach the target image; fails unless it is the one mounted
    pub fn unmount(&self) -> Result<()> {
        if self.state() != MountStatus::Mounted {
            return Err(AppError::Action(
                "cannot unmount when not mounted".to_string(),
            ));
        }
        self.mounter.unmount()?;
        info!("Unmounted {}", self.image.imagefile().display());
        Ok(())
    }

    /// Files in the target image; empty when the image does not exist
    pub fn list(&self) -> Result<Vec<FileEntry>> {
        if self.image.exists() {
            self.image.list()
        } else {
            Ok(Vec::new())
        }
    }

    /// Delete the target image file regardless of mount state
    pub fn delete_image(&self) -> Result<()> {
        self.image.delete()
    }
}
