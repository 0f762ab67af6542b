use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::FetchSettings;

pub const DEFAULT_CONFIG_FILENAME: &str = "tracker.ron";
pub const TOKEN_ENV: &str = "SCRAPER_API_TOKEN";
pub const BASE_URL_ENV: &str = "SCRAPER_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// How often a remote batch is attempted before its failure becomes final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(with = "duration_secs")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Operator-triggered runs report the first failure immediately.
    pub fn interactive() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Scheduled runs retry a few times with a fixed pause.
    pub fn background() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(60),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::background()
    }
}

/// Timeouts for one local extraction: page navigation, then rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionProfile {
    #[serde(with = "duration_secs")]
    pub navigation_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub wait_timeout: Duration,
}

impl ExtractionProfile {
    pub fn interactive() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(5),
        }
    }

    pub fn production() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(15),
        }
    }

    /// Upper bound on one whole extraction call.
    pub fn call_timeout(&self) -> Duration {
        self.navigation_timeout + self.wait_timeout
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings::default().with_navigation_timeout(self.navigation_timeout)
    }
}

impl Default for ExtractionProfile {
    fn default() -> Self {
        Self::interactive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub service_base_url: String,
    pub api_token: Option<String>,
    #[serde(with = "duration_secs")]
    pub batch_timeout: Duration,
    pub retry: RetryPolicy,
    pub extraction: ExtractionProfile,
    pub local_concurrency: usize,
    pub store_path: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            service_base_url: "http://127.0.0.1:8001".to_string(),
            api_token: None,
            batch_timeout: Duration::from_secs(60),
            retry: RetryPolicy::background(),
            extraction: ExtractionProfile::interactive(),
            local_concurrency: 4,
            store_path: PathBuf::from("datapoints.json"),
        }
    }
}

impl TrackerConfig {
    /// Load from a RON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text).map_err(|message| ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn from_ron(text: &str) -> Result<Self, String> {
        ron::from_str(text).map_err(|err| err.to_string())
    }

    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::new())
    }

    /// Apply `SCRAPER_API_TOKEN` / `SCRAPER_BASE_URL` from the process environment.
    pub fn with_process_env(self) -> Self {
        self.with_env(|key| std::env::var(key).ok())
    }

    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup(TOKEN_ENV).filter(|value| !value.trim().is_empty()) {
            self.api_token = Some(token);
        }
        if let Some(base) = lookup(BASE_URL_ENV).filter(|value| !value.trim().is_empty()) {
            self.service_base_url = base;
        }
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
