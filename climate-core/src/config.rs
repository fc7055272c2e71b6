use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::ClimateError,
    export::{OutputFormat, OutputLayout, location_slug},
    model::{Frequency, Location, Source, SourceMode, TemperatureUnit, Variable, VariableSet},
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

/// Configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    /// Falls back to the provider's public endpoint when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl ProviderConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

/// Resolved, immutable view of a provider section handed to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl ProviderSettings {
    pub fn default_base_url(source: Source) -> &'static str {
        match source {
            Source::Primary => "https://api.openweathermap.org/data/2.5",
            Source::Secondary => "https://apitempo.inmet.gov.br/api",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub source_mode: SourceMode,
    pub output_format: OutputFormat,
    pub output_layout: OutputLayout,
    pub output_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            source_mode: SourceMode::default(),
            output_format: OutputFormat::default(),
            output_layout: OutputLayout::default(),
            output_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableConfig {
    pub name: Variable,
    /// "celsius"/"fahrenheit" for temperature; informational for the others.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub active: bool,
    pub years: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { active: false, years: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    pub kind: Frequency,
    /// Days before today collected by a daily run.
    pub lookback_days: u32,
    pub history: HistoryConfig,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self { kind: Frequency::Daily, lookback_days: 7, history: HistoryConfig::default() }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub locations: Vec<Location>,
    pub variables: Vec<VariableConfig>,
    pub frequency: FrequencyConfig,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "${OPENWEATHER_API_KEY}"
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            locations: Vec::new(),
            variables: vec![
                VariableConfig {
                    name: Variable::Temperature,
                    unit: Some("celsius".into()),
                    active: true,
                },
                VariableConfig {
                    name: Variable::Precipitation,
                    unit: Some("mm".into()),
                    active: true,
                },
                VariableConfig {
                    name: Variable::Humidity,
                    unit: Some("percent".into()),
                    active: true,
                },
            ],
            frequency: FrequencyConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Command-line overrides applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub source_mode: Option<SourceMode>,
    pub output_format: Option<OutputFormat>,
    pub output_layout: Option<OutputLayout>,
    pub output_dir: Option<PathBuf>,
    pub frequency: Option<Frequency>,
    pub history_active: Option<bool>,
    pub history_years: Option<u32>,
}

impl Config {
    /// Parse a TOML document, substituting `${VAR}` API keys from the environment.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut cfg: Config =
            toml::from_str(contents).context("Failed to parse configuration TOML")?;
        cfg.substitute_env_with(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    /// Load config from an explicit path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load config from the platform directory, or return an empty default if it doesn't exist yet.
    pub fn load_default() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "climate-collector", "climate-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Starter configuration written by `climate init-config`.
    pub fn default_template() -> Self {
        let mut cfg = Self::default();
        cfg.locations.push(Location::new("São Paulo", -23.5505, -46.6333));
        for source in Source::all() {
            let var = format!("${{{}_API_KEY}}", source.provider_key().to_uppercase());
            let mut provider = ProviderConfig::with_api_key(var);
            provider.base_url = Some(ProviderSettings::default_base_url(*source).to_string());
            cfg.providers.insert(source.provider_key().to_string(), provider);
        }
        cfg
    }

    fn substitute_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (name, provider) in &mut self.providers {
            let Some(var) = provider
                .api_key
                .strip_prefix("${")
                .and_then(|rest| rest.strip_suffix('}'))
            else {
                continue;
            };

            match lookup(var) {
                Some(value) => provider.api_key = value,
                None => {
                    tracing::warn!(
                        provider = %name,
                        variable = var,
                        "environment variable not set"
                    );
                    provider.api_key.clear();
                }
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(mode) = overrides.source_mode {
            self.general.source_mode = mode;
        }
        if let Some(format) = overrides.output_format {
            self.general.output_format = format;
        }
        if let Some(layout) = overrides.output_layout {
            self.general.output_layout = layout;
        }
        if let Some(dir) = &overrides.output_dir {
            self.general.output_dir = dir.clone();
        }
        if let Some(frequency) = overrides.frequency {
            self.frequency.kind = frequency;
        }
        if let Some(active) = overrides.history_active {
            self.frequency.history.active = active;
        }
        if let Some(years) = overrides.history_years {
            self.frequency.history.years = years;
        }
    }

    /// Checks everything a collection run depends on.
    pub fn validate(&self) -> Result<(), ClimateError> {
        if self.locations.is_empty() {
            return Err(ClimateError::configuration("No locations configured"));
        }
        // Records and output files are keyed by name.
        let mut seen = HashSet::new();
        for location in &self.locations {
            location.validate()?;
            if !seen.insert(location_slug(&location.name)) {
                return Err(ClimateError::configuration(format!(
                    "Duplicate location name '{}'",
                    location.name
                )));
            }
        }
        self.active_variables()?.validate()?;

        for source in self.general.source_mode.required_sources() {
            if !self.has_provider(*source) {
                return Err(ClimateError::configuration(format!(
                    "Provider '{}' is required by the configured source mode but is not configured",
                    source.provider_key()
                )));
            }
        }
        Ok(())
    }

    pub fn temperature_unit(&self) -> Result<TemperatureUnit, ClimateError> {
        let unit = self
            .variables
            .iter()
            .find(|v| v.name == Variable::Temperature)
            .and_then(|v| v.unit.as_deref());

        match unit.map(str::to_lowercase).as_deref() {
            None | Some("celsius") | Some("c") => Ok(TemperatureUnit::Celsius),
            Some("fahrenheit") | Some("f") => Ok(TemperatureUnit::Fahrenheit),
            Some(other) => Err(ClimateError::configuration(format!(
                "Unsupported temperature unit '{other}'"
            ))),
        }
    }

    pub fn active_variables(&self) -> Result<VariableSet, ClimateError> {
        Ok(VariableSet::new(
            self.variables.iter().filter(|v| v.active).map(|v| v.name),
            self.temperature_unit()?,
        ))
    }

    pub fn has_provider(&self, source: Source) -> bool {
        self.providers.contains_key(source.provider_key())
    }

    pub fn provider_config(&self, source: Source) -> Option<&ProviderConfig> {
        self.providers.get(source.provider_key())
    }

    pub fn provider_settings(&self, source: Source) -> Option<ProviderSettings> {
        self.provider_config(source).map(|cfg| ProviderSettings {
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| ProviderSettings::default_base_url(source).to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: cfg.api_key.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            max_attempts: cfg.max_attempts.max(1),
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        })
    }

    /// Set/replace a provider API key, keeping its other settings.
    pub fn upsert_provider_api_key(&mut self, source: Source, api_key: String) {
        self.providers
            .entry(source.provider_key().to_string())
            .and_modify(|cfg| cfg.api_key = api_key.clone())
            .or_insert_with(|| ProviderConfig::with_api_key(api_key));
    }

    pub fn is_provider_configured(&self, source: Source) -> bool {
        self.provider_config(source).is_some_and(|cfg| !cfg.api_key.is_empty())
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_true() -> bool {
    true
}
