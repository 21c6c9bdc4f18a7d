//! Configuration file support for SHMSEG
//!
//! Lets processes agree on segment names and sizes through a shared TOML or
//! YAML file instead of hardcoding them on both sides.

use crate::backend::{AnyBackend, BackendKind, FileBackend};
use crate::error::{SegmentError, SegmentResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn default_host() -> bool {
    true
}

/// One segment definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Segment name shared by every participant
    pub name: String,

    /// Size in bytes
    pub size: usize,

    /// Place the segment in the system-wide namespace
    #[serde(default)]
    pub global: bool,

    /// Create (and later destroy) the backing object
    #[serde(default = "default_host")]
    pub host: bool,

    /// Backend family (overridden by `SHMSEG_BACKEND`)
    #[serde(default)]
    pub backend: BackendKind,

    /// Base directory for the file backend
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

/// Full configuration file with multiple segment definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShmsegConfig {
    /// Map of key -> segment config
    #[serde(default)]
    pub segments: HashMap<String, SegmentConfig>,
}

impl SegmentConfig {
    pub fn new<S: Into<String>>(name: S, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            global: false,
            host: true,
            backend: BackendKind::Native,
            base_dir: None,
        }
    }

    /// Same definition seen from the attaching side
    pub fn as_client(&self) -> Self {
        Self {
            host: false,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> SegmentResult<()> {
        if self.name.is_empty() {
            return Err(SegmentError::invalid_argument("segment name must not be empty"));
        }
        if self.size == 0 {
            return Err(SegmentError::invalid_argument(format!(
                "segment '{}' must have a size greater than zero",
                self.name
            )));
        }
        Ok(())
    }

    /// Backend after applying the environment override
    pub fn effective_backend(&self) -> BackendKind {
        BackendKind::from_env().unwrap_or(self.backend)
    }

    /// Instantiate the backend this definition selects
    pub fn to_backend(&self) -> AnyBackend {
        match self.effective_backend() {
            BackendKind::Native => AnyBackend::native(),
            BackendKind::File => AnyBackend::file(match &self.base_dir {
                Some(dir) => FileBackend::new(dir.clone()),
                None => FileBackend::default(),
            }),
        }
    }
}

impl ShmsegConfig {
    /// Load config from a file (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> SegmentResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SegmentError::config(format!("Failed to read config file: {}", e)))?;

        // Auto-detect format based on extension
        let extension = path.extension().and_then(|s| s.to_str());
        let config = match extension {
            Some("toml") => Self::from_toml(&contents)?,
            Some("yaml") | Some("yml") => Self::from_yaml(&contents)?,
            _ => Self::from_toml(&contents).or_else(|_| Self::from_yaml(&contents))?,
        };
        log::debug!(
            "Loaded {} segment definition(s) from {}",
            config.segments.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse config from TOML string
    pub fn from_toml(contents: &str) -> SegmentResult<Self> {
        toml::from_str(contents)
            .map_err(|e| SegmentError::config(format!("Failed to parse TOML: {}", e)))
    }

    /// Parse config from YAML string
    pub fn from_yaml(contents: &str) -> SegmentResult<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| SegmentError::config(format!("Failed to parse YAML: {}", e)))
    }

    /// Find and load config file from standard search paths
    ///
    /// Search order:
    /// 1. ./shmseg.toml or ./shmseg.yaml
    /// 2. ~/.shmseg/config.toml or ~/.shmseg/config.yaml
    /// 3. /etc/shmseg/config.toml or /etc/shmseg/config.yaml
    pub fn find_and_load() -> SegmentResult<Self> {
        for path in Self::get_search_paths() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(SegmentError::config("No config file found in standard locations"))
    }

    /// Get standard config file search paths
    pub fn get_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("shmseg.toml"),
            PathBuf::from("shmseg.yaml"),
            PathBuf::from("shmseg.yml"),
        ];

        if let Some(home) = dirs::home_dir() {
            let user_dir = home.join(".shmseg");
            paths.push(user_dir.join("config.toml"));
            paths.push(user_dir.join("config.yaml"));
            paths.push(user_dir.join("config.yml"));
        }

        paths.push(PathBuf::from("/etc/shmseg/config.toml"));
        paths.push(PathBuf::from("/etc/shmseg/config.yaml"));

        paths
    }

    /// Get a segment config by key
    pub fn get_segment(&self, key: &str) -> SegmentResult<&SegmentConfig> {
        self.segments
            .get(key)
            .ok_or_else(|| SegmentError::config(format!("Segment '{}' not found in config", key)))
    }
}
