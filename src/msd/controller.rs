//! Mount controller
//!
//! Async facade over the blocking mount-image core, used by front ends.
//! Manages:
//! - Name resolution inside the mount images directory
//! - Mount status reporting
//! - Image mounting, unmounting and quick mounting
//! - Packing, unpacking and deleting images
//!
//! Every operation holds the operation lock and runs on the blocking pool.
//! The lock only serialises callers inside this process; other processes
//! can still change the gadget binding underneath.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::image::ImageManager;
use super::mount::Mount;
use super::mount_image::MountImage;
use super::types::{FileEntry, ImageInfo, MountReport, MountStatus};
use crate::config::{AppConfig, ToolsConfig};
use crate::error::{AppError, Result};
use crate::otg::GadgetMounter;

/// Name of the scratch image used by [`MountController::quickmount`]
pub const QUICKMOUNT_IMAGE: &str = ".QUICKMOUNT";

/// Options for [`MountController::pack`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PackOptions {
    /// Repack an existing image instead of refusing
    pub replace: bool,
    /// Build into a temporary file and rename into place
    pub atomic: bool,
}

/// Mount Controller
pub struct MountController {
    images: ImageManager,
    tools: ToolsConfig,
    mounter: Arc<dyn GadgetMounter>,
    /// Operation lock (prevents concurrent operations)
    operation_lock: Arc<RwLock<()>>,
}

impl MountController {
    pub fn new(
        images_path: impl Into<PathBuf>,
        tools: ToolsConfig,
        mounter: Arc<dyn GadgetMounter>,
    ) -> Self {
        Self {
            images: ImageManager::new(images_path),
            tools,
            mounter,
            operation_lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn from_config(config: &AppConfig, mounter: Arc<dyn GadgetMounter>) -> Self {
        Self::new(
            config.storage.mount_images_dir(),
            config.tools.clone(),
            mounter,
        )
    }

    /// Create the mount images directory
    pub async fn init(&self) -> Result<()> {
        let images = self.images.clone();
        run_blocking(move || images.ensure_dir()).await?;
        debug!(
            "Mount images directory: {}",
            self.images.images_path().display()
        );
        Ok(())
    }

    pub fn mount_images_dir(&self) -> &std::path::Path {
        self.images.images_path()
    }

    /// Path of the image called `name` in the mount images directory
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        self.images.path_for(name)
    }

    fn image(&self, name: &str) -> Result<MountImage> {
        Ok(MountImage::with_tools(self.resolve(name)?, self.tools.clone()))
    }

    fn existing_image(&self, name: &str) -> Result<MountImage> {
        let image = self.image(name)?;
        if !image.exists() {
            return Err(AppError::NotFound(format!("image not found: {}", name)));
        }
        Ok(image)
    }

    /// What the gadget exposes right now
    ///
    /// Listing failures are reported as [`MountStatus::BadImage`] rather than
    /// returned as errors.
    pub async fn status(&self) -> Result<MountReport> {
        let _op_guard = self.operation_lock.read().await;
        let images = self.images.clone();
        let tools = self.tools.clone();
        let mounter = self.mounter.clone();

        run_blocking(move || {
            let Some(mount) = Mount::current(mounter, tools) else {
                return Ok(MountReport::new(MountStatus::Unmounted));
            };

            let Some(name) = images.name_of(mount.imagefile()) else {
                let mut report = MountReport::new(MountStatus::OtherImageMounted);
                report.error = Some("mounted image is unknown to the app".to_string());
                return Ok(report);
            };

            match mount.list() {
                Ok(listing) => Ok(MountReport {
                    status: mount.state(),
                    file: Some(name),
                    listing,
                    error: None,
                }),
                Err(e) => {
                    warn!("Cannot list mounted image {}: {}", name, e);
                    Ok(MountReport {
                        status: MountStatus::BadImage,
                        file: Some(name),
                        listing: Vec::new(),
                        error: Some(e.to_string()),
                    })
                }
            }
        })
        .await
    }

    /// Mount the image called `name`
    pub async fn mount(&self, name: &str) -> Result<()> {
        let _op_guard = self.operation_lock.write().await;
        let image = self.existing_image(name)?;
        let mounter = self.mounter.clone();

        run_blocking(move || mount_valid_image(image, mounter)).await
    }

    /// Unmount whatever is mounted
    pub async fn unmount(&self) -> Result<()> {
        let _op_guard = self.operation_lock.write().await;
        let tools = self.tools.clone();
        let mounter = self.mounter.clone();

        run_blocking(move || match Mount::current(mounter, tools) {
            Some(mount) if mount.state() == MountStatus::Mounted => mount.unmount(),
            _ => Err(AppError::Action(
                "cannot unmount as nothing is mounted".to_string(),
            )),
        })
        .await
    }

    /// Images in the mount images directory
    pub async fn images(&self) -> Result<Vec<ImageInfo>> {
        let _op_guard = self.operation_lock.read().await;
        let images = self.images.clone();
        run_blocking(move || images.list()).await
    }

    /// Files inside the image called `name`
    pub async fn list_image(&self, name: &str) -> Result<Vec<FileEntry>> {
        let _op_guard = self.operation_lock.read().await;
        let image = self.existing_image(name)?;
        run_blocking(move || image.list()).await
    }

    /// Pack `files` into the image called `name`, in the given order
    pub async fn pack(&self, name: &str, files: Vec<PathBuf>, options: PackOptions) -> Result<()> {
        let _op_guard = self.operation_lock.write().await;
        if files.is_empty() {
            return Err(AppError::BadRequest("no files specified".to_string()));
        }
        if let Some(missing) = files.iter().find(|f| !f.is_file()) {
            return Err(AppError::BadRequest(format!(
                "'{}' not found",
                missing.display()
            )));
        }

        let image = self.image(name)?;
        if image.exists() && !options.replace {
            return Err(AppError::BadRequest(format!(
                "image '{}' already exists",
                name
            )));
        }
        let images = self.images.clone();

        run_blocking(move || {
            images.ensure_dir()?;
            if options.atomic {
                image.pack_atomic(&files)
            } else {
                image.pack(&files)
            }
        })
        .await
    }

    /// Copy every file of the image called `name` into `destdir`
    pub async fn unpack(&self, name: &str, destdir: PathBuf) -> Result<()> {
        let _op_guard = self.operation_lock.read().await;
        let image = self.existing_image(name)?;
        run_blocking(move || image.unpack(&destdir)).await
    }

    /// Copy `entry` out of the image called `name` to exactly `dest`
    pub async fn unpack_file(&self, name: &str, entry: &str, dest: PathBuf) -> Result<()> {
        let _op_guard = self.operation_lock.read().await;
        let image = self.existing_image(name)?;
        let entry = entry.to_string();
        run_blocking(move || image.unpack_file(&entry, &dest)).await
    }

    /// Delete the image called `name`
    ///
    /// Mount state is not checked; deleting the mounted image is allowed.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let _op_guard = self.operation_lock.write().await;
        let image = self.existing_image(name)?;
        let mounter = self.mounter.clone();
        run_blocking(move || Mount::new(image, mounter).delete_image()).await
    }

    /// Replace whatever is mounted with a fresh scratch image of `files`
    ///
    /// Unmounts the current image if this program can, repacks the hidden
    /// scratch image and mounts it.
    pub async fn quickmount(&self, files: Vec<PathBuf>) -> Result<()> {
        let _op_guard = self.operation_lock.write().await;
        if let Some(missing) = files.iter().find(|f| !f.is_file()) {
            return Err(AppError::NotFound(format!(
                "'{}' cannot be found",
                missing.display()
            )));
        }

        let image = self.image(QUICKMOUNT_IMAGE)?;
        let images = self.images.clone();
        let tools = self.tools.clone();
        let mounter = self.mounter.clone();

        run_blocking(move || {
            if let Some(current) = Mount::current(mounter.clone(), tools) {
                if current.state() == MountStatus::Mounted {
                    current.unmount()?;
                }
            }
            images.ensure_dir()?;
            image.pack(&files)?;
            info!("Quick mounting {} file(s)", files.len());
            Mount::new(image, mounter).mount()
        })
        .await
    }
}

/// Mount `image` after checking it can be listed
fn mount_valid_image(image: MountImage, mounter: Arc<dyn GadgetMounter>) -> Result<()> {
    if !image.is_valid() {
        return Err(AppError::InvalidImage(
            "tried to mount an invalid mass storage image".to_string(),
        ));
    }
    Mount::new(image, mounter).mount()
}

/// Run blocking core work on the blocking thread pool
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otg::{FakeGadgetState, FakeMounter};
    use crate::test_util::{failing_tool, fake_tools, logged_calls};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        state: FakeGadgetState,
        controller: MountController,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_tools(|_| {})
        }

        fn with_tools(adjust: impl FnOnce(&mut ToolsConfig)) -> Self {
            let dir = TempDir::new().unwrap();
            let mut tools = fake_tools(dir.path());
            adjust(&mut tools);
            let state = FakeGadgetState::new();
            let mounter: Arc<dyn GadgetMounter> = Arc::new(FakeMounter::new(state.clone()));
            let controller = MountController::new(dir.path().join("mount_images"), tools, mounter);
            Self {
                dir,
                state,
                controller,
            }
        }

        fn images_dir(&self) -> PathBuf {
            self.dir.path().join("mount_images")
        }

        fn add_image(&self, name: &str) -> PathBuf {
            fs::create_dir_all(self.images_dir()).unwrap();
            let path = self.images_dir().join(name);
            fs::write(&path, b"image").unwrap();
            path
        }

        fn add_source(&self, name: &str, len: usize) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, vec![1u8; len]).unwrap();
            path
        }
    }

    #[tokio::test]
    async fn test_init_creates_dir() {
        let fx = Fixture::new();
        fx.controller.init().await.unwrap();
        assert!(fx.images_dir().is_dir());
    }

    #[test]
    fn test_resolve() {
        let fx = Fixture::new();
        assert_eq!(
            fx.controller.resolve("games.img").unwrap(),
            fx.images_dir().join("games.img")
        );
        assert!(fx.controller.resolve("a/b.img").is_err());
    }

    #[tokio::test]
    async fn test_status_nothing_mounted() {
        let fx = Fixture::new();
        let report = fx.controller.status().await.unwrap();
        assert_eq!(report, MountReport::new(MountStatus::Unmounted));
    }

    #[tokio::test]
    async fn test_status_foreign_image() {
        let fx = Fixture::new();
        fx.state
            .set_mounted(Some(PathBuf::from("/media/usb/foreign.img")));

        let report = fx.controller.status().await.unwrap();
        assert_eq!(report.status, MountStatus::OtherImageMounted);
        assert_eq!(report.file, None);
        assert!(report.error.unwrap().contains("unknown"));
    }

    #[tokio::test]
    async fn test_mount_and_status() {
        let fx = Fixture::new();
        let path = fx.add_image("games.img");

        fx.controller.mount("games.img").await.unwrap();
        assert_eq!(fx.state.mounted(), Some(path));

        let report = fx.controller.status().await.unwrap();
        assert_eq!(report.status, MountStatus::Mounted);
        assert_eq!(report.file.as_deref(), Some("games.img"));
        assert_eq!(report.listing.len(), 2);
        assert_eq!(report.error, None);
    }

    #[tokio::test]
    async fn test_status_bad_image() {
        let fx = Fixture::with_tools(|tools| {
            tools.mdir = failing_tool("mdir", "init: non DOS media");
        });
        let path = fx.add_image("broken.img");
        fx.state.set_mounted(Some(path));

        let report = fx.controller.status().await.unwrap();
        assert_eq!(report.status, MountStatus::BadImage);
        assert_eq!(report.file.as_deref(), Some("broken.img"));
        assert!(report.error.unwrap().contains("non DOS media"));
    }

    #[tokio::test]
    async fn test_status_mounted_image_deleted() {
        let fx = Fixture::new();
        fx.add_image("games.img");
        fx.controller.mount("games.img").await.unwrap();
        fx.controller.delete("games.img").await.unwrap();

        // Binding still points at the path, so it stays mounted with no files
        let report = fx.controller.status().await.unwrap();
        assert_eq!(report.status, MountStatus::Mounted);
        assert_eq!(report.file.as_deref(), Some("games.img"));
        assert!(report.listing.is_empty());
    }

    #[tokio::test]
    async fn test_mount_missing_image() {
        let fx = Fixture::new();
        let err = fx.controller.mount("nope.img").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mount_rejects_traversal() {
        let fx = Fixture::new();
        let err = fx.controller.mount("../secret.img").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_mount_invalid_image() {
        let fx = Fixture::with_tools(|tools| {
            tools.mdir = failing_tool("mdir", "init: non DOS media");
        });
        fx.add_image("broken.img");
        let err = fx.controller.mount("broken.img").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidImage(_)));
        assert_eq!(fx.state.mounted(), None);
    }

    #[tokio::test]
    async fn test_mount_over_other_image() {
        let fx = Fixture::new();
        let first = fx.add_image("first.img");
        fx.add_image("second.img");
        fx.controller.mount("first.img").await.unwrap();

        let err = fx.controller.mount("second.img").await.unwrap_err();
        assert!(matches!(err, AppError::Action(_)));
        assert_eq!(fx.state.mounted(), Some(first));
    }

    #[tokio::test]
    async fn test_unmount() {
        let fx = Fixture::new();
        let err = fx.controller.unmount().await.unwrap_err();
        assert!(err.is_client_error());

        fx.add_image("games.img");
        fx.controller.mount("games.img").await.unwrap();
        fx.controller.unmount().await.unwrap();
        assert_eq!(fx.state.mounted(), None);
    }

    #[tokio::test]
    async fn test_unmount_foreign_image() {
        let fx = Fixture::new();
        fx.state
            .set_mounted(Some(PathBuf::from("/media/usb/foreign.img")));
        fx.controller.unmount().await.unwrap();
        assert_eq!(fx.state.mounted(), None);
    }

    #[tokio::test]
    async fn test_pack() {
        let fx = Fixture::new();
        let a = fx.add_source("a.adf", 901_120);
        let b = fx.add_source("b.adf", 901_120);

        fx.controller
            .pack("games.img", vec![b.clone(), a.clone()], PackOptions::default())
            .await
            .unwrap();

        let images = fx.controller.images().await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "games.img");
        assert_eq!(images[0].size, 1_802_240 + 1_048_576);

        let calls = logged_calls(fx.dir.path());
        assert!(calls[1].ends_with(&format!("{} ::", b.display())));
        assert!(calls[2].ends_with(&format!("{} ::", a.display())));
    }

    #[tokio::test]
    async fn test_pack_validation() {
        let fx = Fixture::new();
        let a = fx.add_source("a.adf", 10);
        fx.add_image("games.img");

        let err = fx
            .controller
            .pack("new.img", Vec::new(), PackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = fx
            .controller
            .pack(
                "new.img",
                vec![fx.dir.path().join("missing.adf")],
                PackOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = fx
            .controller
            .pack("games.img", vec![a.clone()], PackOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let options = PackOptions {
            replace: true,
            atomic: true,
        };
        fx.controller
            .pack("games.img", vec![a], options)
            .await
            .unwrap();
        let size = fs::metadata(fx.images_dir().join("games.img")).unwrap().len();
        assert_eq!(size, 1_048_576);
    }

    #[tokio::test]
    async fn test_list_image() {
        let fx = Fixture::new();
        fx.add_image("games.img");
        let listing = fx.controller.list_image("games.img").await.unwrap();
        assert_eq!(listing[1].name, "Barbarian Plus 6.adf");

        let err = fx.controller.list_image("nope.img").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unpack_file() {
        let fx = Fixture::new();
        fx.add_image("games.img");
        let dest = fx.dir.path().join("out.adf");

        fx.controller
            .unpack_file("games.img", "5years1.adf", dest.clone())
            .await
            .unwrap();
        let calls = logged_calls(fx.dir.path());
        assert!(calls[0].contains("-n ::/5years1.adf"));
        assert!(calls[0].ends_with(&dest.display().to_string()));

        let err = fx
            .controller
            .unpack_file("games.img", "5years1.adf", fx.dir.path().to_path_buf())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Action(_)));
    }

    #[tokio::test]
    async fn test_unpack() {
        let fx = Fixture::new();
        fx.add_image("games.img");
        fx.controller
            .unpack("games.img", fx.dir.path().join("out"))
            .await
            .unwrap();
        assert_eq!(logged_calls(fx.dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let fx = Fixture::new();
        let path = fx.add_image("games.img");
        fx.controller.delete("games.img").await.unwrap();
        assert!(!path.exists());

        let err = fx.controller.delete("games.img").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_quickmount_replaces_mounted_image() {
        let fx = Fixture::new();
        fx.add_image("games.img");
        fx.controller.mount("games.img").await.unwrap();
        let adf = fx.add_source("Workbench.adf", 901_120);

        fx.controller.quickmount(vec![adf]).await.unwrap();

        let scratch = fx.images_dir().join(QUICKMOUNT_IMAGE);
        assert_eq!(fx.state.mounted(), Some(scratch.clone()));
        assert!(scratch.is_file());
        // Scratch image is hidden from the image list
        let names: Vec<String> = fx
            .controller
            .images()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["games.img"]);
    }

    #[tokio::test]
    async fn test_quickmount_missing_file() {
        let fx = Fixture::new();
        let err = fx
            .controller
            .quickmount(vec![Path::new("/nonexistent/x.adf").to_path_buf()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(fx.state.bind_count(), 0);
    }
}
