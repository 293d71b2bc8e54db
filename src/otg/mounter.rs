//! USB mass-storage gadget binding
//!
//! The gadget exposes at most one backing file to the USB host. A
//! [`GadgetMounter`] reads and changes that binding. Real backends talk to
//! the kernel; [`FakeMounter`] keeps the binding in memory for hosts
//! without gadget support.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::configfs::{is_configfs_available, read_bound_path, write_file};
use crate::config::{GadgetBackend, GadgetConfig};
use crate::error::{AppError, Result};
use crate::utils::run_tool;

/// Environment variable forcing the fake backend under `auto`
pub const FAKE_ENV: &str = "ADFOTG_FAKE";

/// Binds a single image file to the host's USB mass-storage gadget
pub trait GadgetMounter: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Path currently exposed to the USB host, if any
    fn mounted(&self) -> Option<PathBuf>;

    /// Unbind whatever is bound, then bind `imagefile`
    ///
    /// Always performs the full cycle, even if `imagefile` is already bound.
    fn mount(&self, imagefile: &Path) -> Result<()>;

    /// Unbind unconditionally
    fn unmount(&self) -> Result<()>;
}

/// Legacy `g_mass_storage` module backend
///
/// The module is loaded with `file=<image>` to bind and removed to unbind.
/// The bound file is exposed in `/sys/module/g_mass_storage/parameters/file`,
/// which only exists while the module is loaded.
/// Loading and unloading modules requires root, hence the optional sudo.
#[derive(Debug, Clone)]
pub struct ModprobeMounter {
    module: String,
    file_param: PathBuf,
    use_sudo: bool,
    modprobe: Vec<String>,
}

impl ModprobeMounter {
    pub fn new(module: impl Into<String>, file_param: impl Into<PathBuf>, use_sudo: bool) -> Self {
        Self {
            module: module.into(),
            file_param: file_param.into(),
            use_sudo,
            modprobe: vec!["modprobe".to_string()],
        }
    }

    /// Replace the `modprobe` program (and fixed leading arguments)
    pub fn with_command(mut self, modprobe: Vec<String>) -> Self {
        self.modprobe = modprobe;
        self
    }

    pub fn from_config(config: &GadgetConfig) -> Self {
        Self::new(
            config.module.clone(),
            config.module_file_param.clone(),
            config.use_sudo,
        )
        .with_command(config.modprobe.clone())
    }

    fn modprobe_command(&self) -> Vec<String> {
        let mut command = Vec::with_capacity(self.modprobe.len() + 1);
        if self.use_sudo {
            command.push("sudo".to_string());
        }
        command.extend(self.modprobe.iter().cloned());
        command
    }

    /// Whether the module is loaded; `modprobe -r` fails when it is not
    fn is_loaded(&self) -> bool {
        self.file_param.exists()
    }

    /// Arguments that load the module with `imagefile` as backing file
    fn bind_args(&self, imagefile: &Path) -> Vec<String> {
        vec![
            self.module.clone(),
            file_param_arg(imagefile),
            "stall=0".to_string(),
            "removable=1".to_string(),
        ]
    }
}

/// `file=<path>`; whitespace would split the kernel parameter, so such
/// paths are double quoted
fn file_param_arg(imagefile: &Path) -> String {
    let path = imagefile.to_string_lossy();
    if path.chars().any(char::is_whitespace) {
        format!("file=\"{}\"", path)
    } else {
        format!("file={}", path)
    }
}

impl GadgetMounter for ModprobeMounter {
    fn name(&self) -> &'static str {
        "modprobe"
    }

    fn mounted(&self) -> Option<PathBuf> {
        match read_bound_path(&self.file_param) {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot read {}: {}", self.file_param.display(), e);
                None
            }
        }
    }

    fn mount(&self, imagefile: &Path) -> Result<()> {
        if self.is_loaded() {
            self.unmount()?;
        }
        run_tool(&self.modprobe_command(), self.bind_args(imagefile))?;
        info!("Loaded {} with {}", self.module, imagefile.display());
        Ok(())
    }

    fn unmount(&self) -> Result<()> {
        if !self.is_loaded() {
            debug!("{} not loaded, nothing to unbind", self.module);
            return Ok(());
        }
        run_tool(&self.modprobe_command(), ["-r", self.module.as_str()])?;
        debug!("Removed {}", self.module);
        Ok(())
    }
}

/// ConfigFS backend for a composite gadget set up outside this program
///
/// Binds by writing the image path to `lun.0/file` of an existing
/// `mass_storage` function.
#[derive(Debug, Clone)]
pub struct ConfigfsMounter {
    function_path: PathBuf,
}

impl ConfigfsMounter {
    pub fn new(function_path: impl Into<PathBuf>) -> Self {
        Self {
            function_path: function_path.into(),
        }
    }

    fn lun_path(&self) -> PathBuf {
        self.function_path.join("lun.0")
    }

    /// Write the LUN backing file, retrying while the host holds the device
    fn write_lun_file(&self, imagefile: &Path) -> Result<()> {
        let file_attr = self.lun_path().join("file");
        let value = imagefile.to_string_lossy();

        for attempt in 0..5u32 {
            match write_file(&file_attr, value.as_ref()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let message = e.to_string();
                    let busy = message.contains("Device or resource busy")
                        || message.contains("os error 16");
                    if !busy || attempt == 4 {
                        return Err(e);
                    }
                    warn!("LUN file write busy, retrying (attempt {}/5)", attempt + 1);
                    // 50, 100, 200, 400ms
                    std::thread::sleep(Duration::from_millis(50 << attempt));
                }
            }
        }
        Ok(())
    }
}

impl GadgetMounter for ConfigfsMounter {
    fn name(&self) -> &'static str {
        "configfs"
    }

    fn mounted(&self) -> Option<PathBuf> {
        let file_attr = self.lun_path().join("file");
        match read_bound_path(&file_attr) {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot read {}: {}", file_attr.display(), e);
                None
            }
        }
    }

    fn mount(&self, imagefile: &Path) -> Result<()> {
        if !self.function_path.is_dir() {
            return Err(AppError::NotFound(format!(
                "mass storage function {} does not exist",
                self.function_path.display()
            )));
        }
        self.unmount()?;
        // Give the USB stack a moment to see the medium go away
        std::thread::sleep(Duration::from_millis(50));
        self.write_lun_file(imagefile)?;
        info!("LUN 0 bound to {}", imagefile.display());
        Ok(())
    }

    fn unmount(&self) -> Result<()> {
        let lun_path = self.lun_path();
        if !lun_path.exists() {
            return Ok(());
        }

        // forced_eject detaches regardless of host state
        let forced_eject = lun_path.join("forced_eject");
        if forced_eject.exists() {
            match write_file(&forced_eject, "1") {
                Ok(()) => {
                    debug!("forced_eject write succeeded");
                    return Ok(());
                }
                Err(e) => warn!("forced_eject write failed: {}, clearing file instead", e),
            }
        }
        write_file(&lun_path.join("file"), "")?;
        debug!("LUN 0 unbound");
        Ok(())
    }
}

/// Shared in-memory gadget binding for [`FakeMounter`]
///
/// The real binding is host-wide, so every fake mounter created from
/// clones of one handle sees the same binding.
#[derive(Debug, Clone, Default)]
pub struct FakeGadgetState {
    inner: Arc<FakeInner>,
}

#[derive(Debug, Default)]
struct FakeInner {
    mounted: Mutex<Option<PathBuf>>,
    binds: AtomicUsize,
}

impl FakeGadgetState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mounted(&self) -> Option<PathBuf> {
        self.inner.mounted.lock().clone()
    }

    /// Replace the binding directly, as another process on the host would
    pub fn set_mounted(&self, path: Option<PathBuf>) {
        *self.inner.mounted.lock() = path;
    }

    /// Number of bind operations performed so far
    pub fn bind_count(&self) -> usize {
        self.inner.binds.load(Ordering::SeqCst)
    }
}

/// In-memory gadget for development hosts and tests
#[derive(Debug, Clone)]
pub struct FakeMounter {
    state: FakeGadgetState,
}

impl FakeMounter {
    pub fn new(state: FakeGadgetState) -> Self {
        Self { state }
    }
}

impl GadgetMounter for FakeMounter {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn mounted(&self) -> Option<PathBuf> {
        self.state.mounted()
    }

    fn mount(&self, imagefile: &Path) -> Result<()> {
        self.unmount()?;
        self.state.inner.binds.fetch_add(1, Ordering::SeqCst);
        self.state.set_mounted(Some(imagefile.to_path_buf()));
        debug!("Fake gadget bound to {}", imagefile.display());
        Ok(())
    }

    fn unmount(&self) -> Result<()> {
        self.state.set_mounted(None);
        Ok(())
    }
}

/// Whether this host can drive a real gadget
///
/// Gadget-capable boards (Raspberry Pi Zero and friends) are ARM; anything
/// else is a development machine.
pub fn host_supports_gadget() -> bool {
    let arch = std::env::consts::ARCH;
    arch.starts_with("arm") || arch == "aarch64"
}

/// Resolve `auto` into a concrete backend
pub fn resolve_backend(backend: GadgetBackend) -> GadgetBackend {
    match backend {
        GadgetBackend::Auto => {
            if std::env::var_os(FAKE_ENV).is_some() || !host_supports_gadget() {
                GadgetBackend::Fake
            } else {
                GadgetBackend::Modprobe
            }
        }
        other => other,
    }
}

/// Build the configured mounter
///
/// `fake_state` is only used by the fake backend; pass the same handle to
/// every call so all fakes share one binding.
pub fn create_mounter(
    config: &GadgetConfig,
    fake_state: &FakeGadgetState,
) -> Arc<dyn GadgetMounter> {
    let mounter: Arc<dyn GadgetMounter> = match resolve_backend(config.backend) {
        GadgetBackend::Modprobe => Arc::new(ModprobeMounter::from_config(config)),
        GadgetBackend::Configfs => {
            if !is_configfs_available() {
                warn!("ConfigFS gadget directory not found; is libcomposite loaded?");
            }
            Arc::new(ConfigfsMounter::new(config.configfs_function.clone()))
        }
        GadgetBackend::Fake | GadgetBackend::Auto => Arc::new(FakeMounter::new(fake_state.clone())),
    };
    info!("Using {} gadget backend", mounter.name());
    mounter
}
