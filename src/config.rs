//! Session configuration.
//!
//! Loaded from `<config dir>/coqpod/config.json` when present, then
//! overridden by environment variables:
//! - `COQPOD_BINARY_ROOT` - Where the kernel image and bundled packages live
//! - `COQPOD_KERNEL_IMAGE` - Kernel image, relative to the binary root or absolute
//! - `COQPOD_VFS_ROOT` - Host directory backing the sandbox
//! - `COQPOD_LIB_ROOT` - Virtual library root (default `/lib`)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::vfs::DEFAULT_LIB_ROOT;

const APP_NAME: &str = "coqpod";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodConfig {
    /// Base location (URL or host path) of the kernel binaries.
    pub binary_root: String,
    /// Kernel image to fetch, relative to `binary_root` unless absolute.
    pub kernel_image: String,
    /// Virtual path the image is installed at.
    pub image_path: String,
    /// Shared native stubs preloaded next to the image.
    pub stubs: Vec<String>,
    /// Extra arguments for an out-of-process kernel.
    pub kernel_args: Vec<String>,
    /// Host directory backing the sandbox.
    pub vfs_root: PathBuf,
    /// Virtual library root; relative paths resolve below it.
    pub lib_root: String,
    /// Directory packages are installed into, relative to the library root.
    pub pkg_dir: String,
    /// Packages installed right after boot.
    pub init_pkgs: Vec<String>,
    /// Virtual path of the interrupt marker file, if the kernel needs one.
    pub interrupt_marker: Option<String>,
}

impl Default for PodConfig {
    fn default() -> Self {
        Self {
            binary_root: "./bin".to_string(),
            kernel_image: "coq/kernel.img".to_string(),
            image_path: "/bin/kernel.img".to_string(),
            stubs: Vec::new(),
            kernel_args: Vec::new(),
            vfs_root: default_vfs_root(),
            lib_root: DEFAULT_LIB_ROOT.to_string(),
            pkg_dir: String::new(),
            init_pkgs: Vec::new(),
            interrupt_marker: None,
        }
    }
}

impl PodConfig {
    /// Configuration file merged with environment overrides.
    pub fn from_env() -> Self {
        Self::load().with_env_overrides()
    }

    /// Load configuration from the user's config directory.
    /// Returns default config if file doesn't exist or fails to parse.
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    fn try_load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    /// Load from `config_path`; a missing file yields the defaults.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).context("Failed to read config file")?;

        let config = serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save the current configuration to disk.
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = get_config_path()?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("COQPOD_BINARY_ROOT") {
            self.binary_root = root;
        }
        if let Ok(image) = std::env::var("COQPOD_KERNEL_IMAGE") {
            self.kernel_image = image;
        }
        if let Ok(root) = std::env::var("COQPOD_VFS_ROOT") {
            self.vfs_root = PathBuf::from(root);
        }
        if let Ok(root) = std::env::var("COQPOD_LIB_ROOT") {
            self.lib_root = root;
        }
        self
    }

    /// Full location of a binary resource named relative to `binary_root`.
    pub fn locate(&self, name: &str) -> String {
        if name.contains("://") || name.starts_with('/') {
            name.to_string()
        } else {
            format!("{}/{}", self.binary_root.trim_end_matches('/'), name)
        }
    }

    /// Virtual path a stub is preloaded at: next to the image, same file name.
    pub fn stub_path(&self, stub: &str) -> String {
        let name = stub.rsplit('/').next().unwrap_or(stub);
        let dir = self
            .image_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("");
        format!("{}/{}", dir, name)
    }
}

fn default_vfs_root() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("vfs"))
        .unwrap_or_else(|| std::env::temp_dir().join("coqpod-vfs"))
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
