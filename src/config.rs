// Configuration for the inventory provider, the dump cache, search and booking
// Every component takes its config explicitly; only credentials come from the environment

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PROVIDER_URL: &str = "https://api.worldota.net/api/b2b/v3";
pub const DEFAULT_PAYMENT_URL: &str = "https://api.stripe.com/v1";

pub const ENV_KEY_ID: &str = "HOTEL_PROVIDER_KEY_ID";
pub const ENV_API_KEY: &str = "HOTEL_PROVIDER_API_KEY";
pub const ENV_BASE_URL: &str = "HOTEL_PROVIDER_BASE_URL";
pub const ENV_PAYMENT_SECRET: &str = "PAYMENT_SECRET_KEY";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing provider credentials: {0} is not set")]
    MissingCredentials(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn check_url(name: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be an http(s) URL, got '{}'", name, url)))
    }
}

// Provider connection settings
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub key_id: String,
    pub api_key: String,
    pub timeout: Duration,
    pub language: String,
}

impl ProviderConfig {
    pub fn new(key_id: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let key_id = key_id.into();
        let api_key = api_key.into();
        if key_id.trim().is_empty() {
            return Err(ConfigError::MissingCredentials(ENV_KEY_ID));
        }
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredentials(ENV_API_KEY));
        }

        Ok(Self {
            base_url: DEFAULT_PROVIDER_URL.to_string(),
            key_id,
            api_key,
            timeout: Duration::from_secs(30),
            language: "en".to_string(),
        })
    }

    // Reads credentials from the environment; the base URL override is optional
    pub fn from_env() -> Result<Self, ConfigError> {
        let key_id =
            std::env::var(ENV_KEY_ID).map_err(|_| ConfigError::MissingCredentials(ENV_KEY_ID))?;
        let api_key =
            std::env::var(ENV_API_KEY).map_err(|_| ConfigError::MissingCredentials(ENV_API_KEY))?;

        let mut config = Self::new(key_id, api_key)?;
        if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
            check_url(ENV_BASE_URL, &base_url)?;
            config = config.with_base_url(base_url);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

// Where and how often the bulk hotel dump is refreshed
#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub data_dir: PathBuf,
    pub max_age: chrono::Duration,
    pub language: String,
}

impl DumpConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn compressed_path(&self) -> PathBuf {
        self.data_dir.join("hotel_dump.jsonl.zst")
    }

    pub fn decompressed_path(&self) -> PathBuf {
        self.data_dir.join("hotel_dump.jsonl")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.data_dir.join("hotel_dump.meta.json")
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_age: chrono::Duration::hours(24),
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub markup_percent: f64,
    pub max_results: usize,
    pub geo_radius_meters: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            markup_percent: 10.0,
            max_results: 20,
            geo_radius_meters: 10_000,
        }
    }
}

// Bounded status polling; the provider itself gives no completion deadline
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub drift_threshold_percent: f64,
    pub poll: PollConfig,
    pub language: String,
    pub user_ip: String,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            drift_threshold_percent: 5.0,
            poll: PollConfig::default(),
            language: "en".to_string(),
            user_ip: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub base_url: String,
    pub secret_key: String,
    pub timeout: Duration,
}

impl PaymentConfig {
    pub fn new(secret_key: impl Into<String>) -> Result<Self, ConfigError> {
        let secret_key = secret_key.into();
        if secret_key.trim().is_empty() {
            return Err(ConfigError::MissingCredentials(ENV_PAYMENT_SECRET));
        }
        Ok(Self {
            base_url: DEFAULT_PAYMENT_URL.to_string(),
            secret_key,
            timeout: Duration::from_secs(20),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = std::env::var(ENV_PAYMENT_SECRET)
            .map_err(|_| ConfigError::MissingCredentials(ENV_PAYMENT_SECRET))?;
        Self::new(secret)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}
