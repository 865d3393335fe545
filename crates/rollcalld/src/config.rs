use rollcall_core::{ModePreference, Thresholds};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "system" => Ok(Self::System),
            other => Err(format!("unknown bus {other:?} (expected session or system)")),
        }
    }
}

/// Daemon configuration.
///
/// Built from defaults, then the TOML file named by `ROLLCALL_CONFIG` (if
/// set), then individual `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One reference photo per student; the file stem is the identity.
    pub images_dir: PathBuf,
    /// CSV attendance log.
    pub attendance_path: PathBuf,
    /// Directory containing the SCRFD and ArcFace ONNX models.
    pub model_dir: PathBuf,
    /// Representation mode: auto, embedding or hash.
    pub mode: ModePreference,
    /// Euclidean distance below which an embedding match is accepted.
    pub embedding_threshold: f32,
    /// Maximum perceptual-hash bit difference for an accepted match.
    pub hash_threshold: u32,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = rollcall_core::data_home().join("rollcall");
        let thresholds = Thresholds::default();
        Self {
            images_dir: data_dir.join("images"),
            attendance_path: data_dir.join("attendance.csv"),
            model_dir: rollcall_core::default_model_dir(),
            mode: ModePreference::Auto,
            embedding_threshold: thresholds.embedding,
            hash_threshold: thresholds.hash,
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlay `ROLLCALL_*` variables. Unparseable values are logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_IMAGES_DIR") {
            self.images_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_ATTENDANCE_PATH") {
            self.attendance_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        env_parse(&lookup, "ROLLCALL_MODE", &mut self.mode);
        env_parse(&lookup, "ROLLCALL_EMBEDDING_THRESHOLD", &mut self.embedding_threshold);
        env_parse(&lookup, "ROLLCALL_HASH_THRESHOLD", &mut self.hash_threshold);
        env_parse(&lookup, "ROLLCALL_BUS", &mut self.bus);
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            embedding: self.embedding_threshold,
            hash: self.hash_threshold,
        }
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid environment override")
        }
    }
}
