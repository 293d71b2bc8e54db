use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Storage directories
    pub storage: StorageConfig,
    /// External mtools/dosfstools command lines
    pub tools: ToolsConfig,
    /// USB mass-storage gadget settings
    pub gadget: GadgetConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base working directory
    pub work_dir: PathBuf,
    /// Directory holding mount images (defaults to `<work_dir>/mount_images`)
    pub mount_images_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/var/lib/adfotg"),
            mount_images_dir: None,
        }
    }
}

impl StorageConfig {
    /// Effective mount images directory
    pub fn mount_images_dir(&self) -> PathBuf {
        self.mount_images_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("mount_images"))
    }
}

/// External tool command lines
///
/// Each entry is the program followed by any fixed leading arguments,
/// e.g. `["busybox", "mkdosfs"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// FAT directory lister
    pub mdir: Vec<String>,
    /// FAT file copier
    pub mcopy: Vec<String>,
    /// FAT formatter
    pub mkfs: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mdir: vec!["mdir".to_string()],
            mcopy: vec!["mcopy".to_string()],
            mkfs: vec!["mkdosfs".to_string()],
        }
    }
}

/// Gadget backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GadgetBackend {
    /// Fake off-target (or with ADFOTG_FAKE set), modprobe on ARM hosts
    #[default]
    Auto,
    /// Legacy `g_mass_storage` kernel module
    Modprobe,
    /// Pre-existing ConfigFS composite gadget
    Configfs,
    /// In-memory test double
    Fake,
}

/// USB mass-storage gadget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetConfig {
    /// Backend selection
    pub backend: GadgetBackend,
    /// Kernel module name for the modprobe backend
    pub module: String,
    /// Module parameter exposing the bound file
    pub module_file_param: PathBuf,
    /// modprobe command line (program and fixed leading arguments)
    pub modprobe: Vec<String>,
    /// Run modprobe through sudo
    pub use_sudo: bool,
    /// ConfigFS mass_storage function directory for the configfs backend
    pub configfs_function: PathBuf,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            backend: GadgetBackend::Auto,
            module: "g_mass_storage".to_string(),
            module_file_param: PathBuf::from("/sys/module/g_mass_storage/parameters/file"),
            modprobe: vec!["modprobe".to_string()],
            use_sudo: true,
            configfs_function: PathBuf::from(
                "/sys/kernel/config/usb_gadget/adfotg/functions/mass_storage.usb0",
            ),
        }
    }
}
