use facegrab_core::FaceSelection;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 1.3;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key}={value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(key: &str, value: impl Display, reason: impl Display) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Storage and matching configuration, loaded from `FACEGRAB_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root for persisted state.
    pub data_dir: PathBuf,
    /// Vector index file.
    pub index_path: PathBuf,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Directory receiving every uploaded image.
    pub upload_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Squared-L2 cutoff above which a nearest neighbour is not a match.
    /// `None` disables the gate.
    pub distance_threshold: Option<f32>,
    /// Fixed embedding dimension; inferred from the first insert when unset.
    pub dimension: Option<usize>,
    pub face_selection: FaceSelection,
}

impl Config {
    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup, then validate.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = lookup("FACEGRAB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(&lookup));
        let path_or = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);

        let distance_threshold = match lookup("FACEGRAB_DISTANCE_THRESHOLD") {
            Some(v) if matches!(v.trim(), "off" | "none") => None,
            Some(v) => Some(parse_value("FACEGRAB_DISTANCE_THRESHOLD", &v)?),
            None => Some(DEFAULT_DISTANCE_THRESHOLD),
        };

        let config = Self {
            index_path: path_or("FACEGRAB_INDEX_PATH", data_dir.join("face_index.fgix")),
            db_path: path_or("FACEGRAB_DB_PATH", data_dir.join("face_metadata.db")),
            upload_dir: path_or("FACEGRAB_UPLOAD_DIR", data_dir.join("images")),
            model_dir: path_or("FACEGRAB_MODEL_DIR", facegrab_core::default_model_dir()),
            distance_threshold,
            dimension: parse_var(&lookup, "FACEGRAB_DIMENSION")?,
            face_selection: parse_var(&lookup, "FACEGRAB_FACE_SELECTION")?.unwrap_or_default(),
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.distance_threshold {
            if !t.is_finite() || t <= 0.0 {
                return Err(ConfigError::invalid(
                    "FACEGRAB_DISTANCE_THRESHOLD",
                    t,
                    "must be a positive finite number",
                ));
            }
        }
        if self.dimension == Some(0) {
            return Err(ConfigError::invalid("FACEGRAB_DIMENSION", 0, "must be positive"));
        }
        Ok(())
    }
}

/// Parse an optional variable; present-but-malformed values are errors.
pub fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(key).map(|v| parse_value(key, &v)).transpose()
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::invalid(key, value, e))
}

fn default_data_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegrab")
}
