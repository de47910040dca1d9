use crate::{error::AppResult, types::FingerprintPolicy};
use config::{Config, Environment as ConfigEnv, File as ConfigFile};
use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};
use std::{default::Default, path::PathBuf, time::Duration};

mod roots;

pub use roots::RootsSource;

pub const DEFAULT_TRUST_STORE: &str = "certificate.json";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppConfig {
    pub workers: Option<usize>,

    #[serde(default = "default_trust_store")]
    pub trust_store: PathBuf,

    #[serde(default)]
    pub fingerprint_policy: FingerprintPolicy,

    #[serde(default)]
    pub roots: RootsSource,

    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub connect_timeout: Duration,

    /// Unanswered prompts are rejected after this long.
    #[serde(
        default = "default_prompt_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub prompt_timeout: Duration,

    #[serde(default)]
    pub targets: Vec<String>,
}

impl AppConfig {
    pub fn load_config() -> AppResult<Self> {
        let cfg = Config::builder()
            .add_source(ConfigFile::with_name("/etc/certificate-trust-store/config").required(false))
            .add_source(ConfigFile::with_name("config").required(false))
            .add_source(environment())
            .build()?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: Config) -> AppResult<Self> {
        Ok(cfg.try_deserialize()?)
    }
}

/// `CTS_TRUST_STORE=...`, `CTS_TARGETS=https://a,https://b`. Nested keys use `__`.
fn environment() -> ConfigEnv {
    ConfigEnv::with_prefix("CTS")
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("targets")
        .try_parsing(true)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workers: Default::default(),
            trust_store: default_trust_store(),
            fingerprint_policy: Default::default(),
            roots: Default::default(),
            connect_timeout: default_connect_timeout(),
            prompt_timeout: default_prompt_timeout(),
            targets: Default::default(),
        }
    }
}

fn default_trust_store() -> PathBuf {
    PathBuf::from(DEFAULT_TRUST_STORE)
}

const fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

const fn default_prompt_timeout() -> Duration {
    DEFAULT_PROMPT_TIMEOUT
}
