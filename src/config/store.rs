use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration file name searched in the default locations
pub const CONFIG_FILENAME: &str = "adfotg.toml";

/// Configuration store backed by a TOML file
///
/// The configuration is read once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    /// File the configuration was read from (None for built-in defaults)
    path: Option<PathBuf>,
    config: Arc<AppConfig>,
}

impl ConfigStore {
    /// Load configuration
    ///
    /// An explicit path must exist and parse. Without one, the first
    /// existing file among [`default_locations`] is used, falling back to
    /// built-in defaults when none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let config = Self::read_file(path)?;
            return Ok(Self {
                path: Some(path.to_path_buf()),
                config: Arc::new(config),
            });
        }

        let locations = default_locations();
        for location in &locations {
            if location.is_file() {
                let config = Self::read_file(location)?;
                return Ok(Self {
                    path: Some(location.clone()),
                    config: Arc::new(config),
                });
            }
        }

        warn!(
            "No config file found in any of: {}; using defaults",
            locations
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self::from_config(AppConfig::default()))
    }

    /// Wrap an already built configuration
    pub fn from_config(config: AppConfig) -> Self {
        Self {
            path: None,
            config: Arc::new(config),
        }
    }

    fn read_file(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = parse(&content)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Get current configuration
    pub fn get(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Source file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Parse and validate TOML configuration text
pub fn parse(content: &str) -> std::result::Result<AppConfig, String> {
    let config: AppConfig = toml::from_str(content).map_err(|e| e.to_string())?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> std::result::Result<(), String> {
    let tools = &config.tools;
    for (name, command) in [
        ("mdir", &tools.mdir),
        ("mcopy", &tools.mcopy),
        ("mkfs", &tools.mkfs),
    ] {
        if command.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(format!("tools.{} must name a program", name));
        }
    }
    if config.gadget.modprobe.first().map_or(true, |p| p.trim().is_empty()) {
        return Err("gadget.modprobe must name a program".to_string());
    }
    if config.gadget.module.trim().is_empty() {
        return Err("gadget.module must not be empty".to_string());
    }
    Ok(())
}

/// Default configuration file locations, in lookup order
pub fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(".").join(CONFIG_FILENAME)];
    if let Ok(home) = std::env::var("HOME") {
        locations.push(PathBuf::from(home).join(".config").join(CONFIG_FILENAME));
    }
    locations.push(PathBuf::from("/etc/adfotg").join(CONFIG_FILENAME));
    locations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GadgetBackend;
    use tempfile::tempdir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.storage.work_dir, PathBuf::from("/var/lib/adfotg"));
        assert_eq!(
            config.storage.mount_images_dir(),
            PathBuf::from("/var/lib/adfotg/mount_images")
        );
        assert_eq!(config.tools.mkfs, vec!["mkdosfs".to_string()]);
        assert_eq!(config.gadget.backend, GadgetBackend::Auto);
    }

    #[test]
    fn test_parse_overrides() {
        let config = parse(
            r#"
            [storage]
            work_dir = "/srv/adfotg"

            [tools]
            mkfs = ["busybox", "mkdosfs"]

            [gadget]
            backend = "fake"
            use_sudo = false
            "#,
        )
        .unwrap();
        assert_eq!(
            config.storage.mount_images_dir(),
            PathBuf::from("/srv/adfotg/mount_images")
        );
        assert_eq!(config.tools.mkfs, vec!["busybox", "mkdosfs"]);
        assert_eq!(config.tools.mdir, vec!["mdir"]);
        assert_eq!(config.gadget.backend, GadgetBackend::Fake);
        assert!(!config.gadget.use_sudo);
    }

    #[test]
    fn test_parse_rejects_empty_tool() {
        let err = parse("[tools]\nmdir = []\n").unwrap_err();
        assert!(err.contains("tools.mdir"));
    }

    #[test]
    fn test_parse_modprobe_command() {
        assert_eq!(parse("").unwrap().gadget.modprobe, vec!["modprobe"]);
        let config = parse("[gadget]\nmodprobe = [\"/sbin/modprobe\", \"-q\"]\n").unwrap();
        assert_eq!(config.gadget.modprobe, vec!["/sbin/modprobe", "-q"]);
        let err = parse("[gadget]\nmodprobe = []\n").unwrap_err();
        assert!(err.contains("gadget.modprobe"));
    }

    #[test]
    fn test_parse_rejects_unknown_backend() {
        assert!(parse("[gadget]\nbackend = \"usbip\"\n").is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("adfotg.toml");
        std::fs::write(&path, "[storage]\nmount_images_dir = \"/data/img\"\n").unwrap();

        let store = ConfigStore::load(Some(&path)).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(
            store.get().storage.mount_images_dir(),
            PathBuf::from("/data/img")
        );
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let dir = tempdir().unwrap();
        let err = ConfigStore::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
