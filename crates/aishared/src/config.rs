use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Daemon configuration.
///
/// Defaults are overridden by an optional TOML file named by
/// `AISHARE_CONFIG`, which is in turn overridden by `AISHARE_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server listens on (default: 0.0.0.0:5000).
    pub bind_addr: SocketAddr,
    /// Root directory of the per-person model files.
    pub model_root: PathBuf,
    /// Directory containing the SCRFD and ArcFace ONNX files.
    pub onnx_dir: PathBuf,
    /// Maximum embedding distance for a positive match.
    pub match_threshold: f32,
    /// Request body limit for multipart uploads, in bytes.
    pub max_upload_bytes: usize,
    /// TrueType font for labels; system fonts are searched when unset.
    pub font_path: Option<PathBuf>,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            model_root: PathBuf::from("face_models"),
            onnx_dir: aishare_core::default_onnx_dir(),
            match_threshold: aishare_core::MATCH_THRESHOLD,
            max_upload_bytes: 32 * 1024 * 1024,
            font_path: None,
            intra_threads: 2,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration with `lookup` standing in for the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("AISHARE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(v) = lookup("AISHARE_BIND_ADDR") {
            config.bind_addr = parse("AISHARE_BIND_ADDR", v)?;
        }
        if let Some(v) = lookup("AISHARE_MODEL_ROOT") {
            config.model_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("AISHARE_ONNX_DIR") {
            config.onnx_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("AISHARE_MATCH_THRESHOLD") {
            config.match_threshold = parse("AISHARE_MATCH_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("AISHARE_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = parse("AISHARE_MAX_UPLOAD_BYTES", v)?;
        }
        if let Some(v) = lookup("AISHARE_FONT_PATH") {
            config.font_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("AISHARE_INTRA_THREADS") {
            config.intra_threads = parse("AISHARE_INTRA_THREADS", v)?;
        }

        if config.match_threshold.is_nan() || config.match_threshold <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "match_threshold",
                value: config.match_threshold.to_string(),
            });
        }
        Ok(config)
    }

    /// Read a TOML file; keys it omits keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
