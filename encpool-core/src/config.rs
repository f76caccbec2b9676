use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::chooser::ChooserKind;
use crate::chooser::least_loaded::{DEFAULT_AFFINITY_PENALTY, MAX_AFFINITY_DEVICES};
use crate::device::{DeviceParseError, DevicePool};

pub const CONFIG_PATH_ENV: &str = "ENCPOOL_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "ENCPOOL_CONFIG_JSON";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("device pool is empty")]
    EmptyPool,

    #[error(transparent)]
    Device(#[from] DeviceParseError),

    #[error("least_loaded tracks affinity for at most {max} devices, got {count}")]
    TooManyDevices { count: usize, max: usize },

    #[error("idle timeout must be greater than zero")]
    ZeroIdleTimeout,

    #[error("affinity penalty must be a finite number >= 1.0, got {0}")]
    InvalidPenalty(f64),
}

/// Source that produced the balancer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => f.write_str("built-in defaults"),
            Self::EnvPath(path) => write!(f, "${CONFIG_PATH_ENV} ({})", path.display()),
            Self::EnvInline => write!(f, "${CONFIG_JSON_ENV}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

fn default_devices() -> Vec<String> {
    vec!["software".to_string()]
}

fn default_work_dir() -> PathBuf {
    env::temp_dir().join("encpool")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(list) => vec![list],
        OneOrMany::Many(list) => list,
    })
}

/// Pool and session settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Ordered device targets: `software`, `<kind>:<ordinal>` or a bare
    /// NVENC ordinal. Entries may be comma separated (`"0,1,2"`). Position in
    /// the list is the device id.
    #[serde(deserialize_with = "string_or_list")]
    pub devices: Vec<String>,
    /// Idle window (ms) after which a session with no requests is torn down
    /// and its device charge released.
    pub idle_timeout_ms: u64,
    /// Multiplier applied to a job's cost on devices it has no session on.
    /// Higher values keep jobs stickier at the expense of balance.
    pub affinity_penalty: f64,
    pub chooser: ChooserKind,
    /// Root for per-session ffmpeg scratch directories.
    pub work_dir: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            idle_timeout_ms: 60_000,
            affinity_penalty: DEFAULT_AFFINITY_PENALTY,
            chooser: ChooserKind::default(),
            work_dir: default_work_dir(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl BalancerConfig {
    /// Load configuration using environment variables.
    /// Evaluation order:
    /// 1) `$ENCPOOL_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$ENCPOOL_CONFIG_JSON` (inline JSON),
    /// 3) the first existing default file,
    /// 4) defaults.
    pub fn load_from_env() -> Result<(Self, ConfigSource), ConfigError> {
        if let Ok(path_str) = env::var(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.display().to_string();

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents).map_err(|err| ConfigError::Parse {
                origin,
                message: err.to_string(),
            }),
            Some("toml") | Some("tml") => {
                toml::from_str(&contents).map_err(|err| ConfigError::Parse {
                    origin,
                    message: err.to_string(),
                })
            }
            _ => Self::parse_from_str(&contents, &origin),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        // TOML first, then JSON.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| ConfigError::Parse {
                origin: origin.to_string(),
                message: format!("toml error: {toml_err}; json error: {json_err}"),
            })
        })
    }

    pub fn parse_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError::Parse {
            origin: CONFIG_JSON_ENV.to_string(),
            message: err.to_string(),
        })
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "encpool.toml",
            "encpool.json",
            "config/encpool.toml",
            "config/encpool.json",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }

    /// Check the settings and build the device pool they describe.
    pub fn validate(&self) -> Result<DevicePool, ConfigError> {
        let pool = DevicePool::parse(&self.devices)?;
        if pool.is_empty() {
            return Err(ConfigError::EmptyPool);
        }
        if self.chooser == ChooserKind::LeastLoaded && pool.len() > MAX_AFFINITY_DEVICES {
            return Err(ConfigError::TooManyDevices {
                count: pool.len(),
                max: MAX_AFFINITY_DEVICES,
            });
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        if !self.affinity_penalty.is_finite() || self.affinity_penalty < 1.0 {
            return Err(ConfigError::InvalidPenalty(self.affinity_penalty));
        }
        Ok(pool)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceTarget;
    use std::io::Write;

    #[test]
    fn defaults_validate_to_a_single_software_device() {
        let config = BalancerConfig::default();
        let pool = config.validate().unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.iter().next().unwrap().target, DeviceTarget::Software);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn toml_accepts_a_comma_separated_device_string() {
        let config = BalancerConfig::parse_from_str(
            r#"
                devices = "0,1,sw"
                idle_timeout_ms = 500
                chooser = "round_robin"
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.validate().unwrap().len(), 3);
        assert_eq!(config.chooser, ChooserKind::RoundRobin);
        assert_eq!(config.affinity_penalty, DEFAULT_AFFINITY_PENALTY);
    }

    #[test]
    fn json_falls_back_after_toml() {
        let config = BalancerConfig::parse_from_str(
            r#"{"devices": ["vaapi:/dev/dri/renderD128", "nvenc:1"], "affinity_penalty": 2.0}"#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.affinity_penalty, 2.0);
    }

    #[test]
    fn garbage_reports_both_parsers() {
        let err = BalancerConfig::parse_from_str("devices = [", "inline").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("toml error"), "{message}");
        assert!(message.contains("json error"), "{message}");
    }

    #[test]
    fn load_from_file_uses_the_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"idle_timeout_ms": 1500}}"#).unwrap();
        let config = BalancerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.idle_timeout(), Duration::from_millis(1500));

        let missing = BalancerConfig::load_from_file(Path::new("/nonexistent/encpool.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let empty = BalancerConfig {
            devices: vec![" , ".to_string()],
            ..BalancerConfig::default()
        };
        assert!(matches!(empty.validate(), Err(ConfigError::EmptyPool)));

        let bad_kind = BalancerConfig {
            devices: vec!["cuda:0".to_string()],
            ..BalancerConfig::default()
        };
        assert!(matches!(bad_kind.validate(), Err(ConfigError::Device(_))));

        let idle = BalancerConfig {
            idle_timeout_ms: 0,
            ..BalancerConfig::default()
        };
        assert!(matches!(idle.validate(), Err(ConfigError::ZeroIdleTimeout)));

        for penalty in [0.5, f64::NAN, f64::INFINITY] {
            let config = BalancerConfig {
                affinity_penalty: penalty,
                ..BalancerConfig::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::InvalidPenalty(_))));
        }
    }

    #[test]
    fn bitmap_chooser_caps_the_pool_size() {
        let devices: Vec<String> = (0..65).map(|i| i.to_string()).collect();
        let least_loaded = BalancerConfig {
            devices: devices.clone(),
            ..BalancerConfig::default()
        };
        assert!(matches!(
            least_loaded.validate(),
            Err(ConfigError::TooManyDevices { count: 65, max: 64 })
        ));

        let round_robin = BalancerConfig {
            devices,
            chooser: ChooserKind::RoundRobin,
            ..BalancerConfig::default()
        };
        assert_eq!(round_robin.validate().unwrap().len(), 65);
    }
}
