use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigBuilder, ConfigError, File};
use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::{
    deserialize_number_from_string, deserialize_option_number_from_string,
};

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub earthdata: EarthdataSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub simulator: SimulatorSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    #[serde(default)]
    pub seed_sample_locations: bool,
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct AuthSettings {
    pub username: String,
    pub password: Secret<String>,
}

#[derive(serde::Deserialize, Clone)]
pub struct EarthdataSettings {
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<Secret<String>>,
    #[serde(default)]
    pub api_key: Option<Secret<String>>,
}

impl EarthdataSettings {
    /// Username and password, when both are set and non-empty.
    pub fn credentials(&self) -> Option<AuthSettings> {
        let username = self.username.as_deref().map(str::trim).unwrap_or_default();
        let password = self.password.as_ref()?;
        if username.is_empty() || password.expose_secret().is_empty() {
            return None;
        }
        Some(AuthSettings {
            username: username.to_string(),
            password: password.clone(),
        })
    }

    pub fn api_key(&self) -> Option<&Secret<String>> {
        self.api_key
            .as_ref()
            .filter(|key| !key.expose_secret().is_empty())
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct ProviderSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_ms: u64,
    /// Requests per rolling minute; unset means unlimited.
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub rate_limit: Option<u32>,
    /// Seconds a live reading stays cached; zero disables the cache.
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub cache_timeout: u64,
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_timeout)
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            rate_limit: None,
            cache_timeout: 0,
        }
    }
}

#[derive(serde::Deserialize, Clone, Default)]
pub struct SimulatorSettings {
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub seed: Option<u64>,
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgrest,
}

#[derive(serde::Deserialize, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgrest: Option<PostgrestSettings>,
}

#[derive(serde::Deserialize, Clone)]
pub struct PostgrestSettings {
    pub uri: String,
    pub key: Secret<String>,
}

#[derive(serde::Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AlertSettings {
    pub aqi_warning: f64,
    pub aqi_danger: f64,
    pub flood_risk_danger: f64,
    pub groundwater_stress_cm: f64,
    pub ndvi_sparse: f64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            aqi_warning: 100.0,
            aqi_danger: 150.0,
            flood_risk_danger: 0.66,
            groundwater_stress_cm: -15.0,
            ndvi_sparse: 0.1,
        }
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| ConfigError::Message(format!("Failed to determine the current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    let builder = layered_sources(&configuration_directory, &environment);
    let config = credential_overrides(builder)?.build()?;

    config.try_deserialize()
}

fn layered_sources(
    configuration_directory: &Path,
    environment: &Environment,
) -> ConfigBuilder<config::builder::DefaultState> {
    Config::builder()
        .add_source(File::from(configuration_directory.join("base")).required(true))
        .add_source(File::from(configuration_directory.join(environment.as_str())).required(true))
        .add_source(app_overrides())
}

/// `APP_PROVIDER__TIMEOUT_MS=900` sets `provider.timeout_ms`.
fn app_overrides() -> config::Environment {
    config::Environment::with_prefix("APP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// The provider credentials keep their conventional unprefixed names.
fn credential_overrides(
    builder: ConfigBuilder<config::builder::DefaultState>,
) -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    builder
        .set_override_option("earthdata.username", var("EARTHDATA_USERNAME"))?
        .set_override_option("earthdata.password", var("EARTHDATA_PASSWORD"))?
        .set_override_option("earthdata.api_key", var("API_KEY"))?
        .set_override_option("provider.rate_limit", var("RATE_LIMIT"))?
        .set_override_option("provider.cache_timeout", var("CACHE_TIMEOUT"))
}

pub enum Environment {
    Local,
    Production,
}
impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}
impl TryFrom<String> for Environment {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}
