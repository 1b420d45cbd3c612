use facewatch_core::DEFAULT_DISTANCE_THRESHOLD;
use facewatch_hw::CameraRequest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Application configuration.
///
/// Values come from an optional TOML file, then `FACEWATCH_*` environment
/// variables, then defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Mean Euclidean distance above which a face is reported as unknown.
    pub match_threshold: f32,
    /// Delay between live recognition scans.
    pub scan_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            model_dir: data_dir.join("models"),
            db_path: data_dir.join("faces.db"),
            match_threshold: DEFAULT_DISTANCE_THRESHOLD,
            scan_interval_ms: 100,
        }
    }
}

impl Config {
    /// Load from `path` (if given, else defaults) and apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(device) = lookup("FACEWATCH_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(dir) = lookup("FACEWATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("FACEWATCH_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        self.camera_width = parse_or(&lookup, "FACEWATCH_CAMERA_WIDTH", self.camera_width);
        self.camera_height = parse_or(&lookup, "FACEWATCH_CAMERA_HEIGHT", self.camera_height);
        self.match_threshold = parse_or(&lookup, "FACEWATCH_MATCH_THRESHOLD", self.match_threshold);
        self.scan_interval_ms = parse_or(&lookup, "FACEWATCH_SCAN_INTERVAL_MS", self.scan_interval_ms);
        self
    }

    pub fn camera_request(&self) -> CameraRequest {
        CameraRequest {
            width: self.camera_width,
            height: self.camera_height,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(1))
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch")
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
