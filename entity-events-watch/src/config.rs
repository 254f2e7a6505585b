use crate::cli::RunCmd;
use anyhow::{Context, Result};
use entity_events_connector::{
    config::ConnectorConfig,
    feed::FilterRule,
    Credentials, UpdatePolicy, WILDCARD,
};
use entity_events_logger::LogConfig;
use serde::Deserialize;
use serde_json::Value;
use std::{collections::BTreeMap, fmt, time::Duration};

/// Prefix of environment variables that override file settings,
/// e.g. `ENTITY_EVENTS__CONNECTOR__ENDPOINT__HOST`.
///
/// Environment keys arrive in snake_case, so every multi-word setting also
/// accepts its snake_case spelling (`..__RECONNECT__BASE_DELAY_MS`).
pub const ENV_PREFIX: &str = "ENTITY_EVENTS";

/// The top-level configuration for the watch binary.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct WatchConfig {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub watch: WatchSettings,
}

/// Contains settings that are unique to the watch binary.
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WatchSettings {
    #[serde(alias = "event_types")]
    pub event_types: Vec<String>,
    pub token: Option<String>,
    #[serde(alias = "tenant_id")]
    pub tenant_id: Option<String>,
    /// Zero disables throttling.
    #[serde(alias = "throttle_ms")]
    pub throttle_ms: u64,
    pub batch: Option<BatchSettings>,
    #[serde(alias = "poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// `data` keys that must equal the given value for an update to be printed.
    pub filters: BTreeMap<String, Value>,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct BatchSettings {
    pub size: usize,
    #[serde(alias = "timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            event_types: vec![WILDCARD.to_string()],
            token: None,
            tenant_id: None,
            throttle_ms: 0,
            batch: None,
            poll_interval_ms: 5000,
            filters: BTreeMap::new(),
            log: LogConfig::default(),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            size: 10,
            timeout_ms: 1000,
        }
    }
}

impl fmt::Debug for WatchSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchSettings")
            .field("event_types", &self.event_types)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("tenant_id", &self.tenant_id)
            .field("throttle_ms", &self.throttle_ms)
            .field("batch", &self.batch)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("filters", &self.filters)
            .field("log", &self.log)
            .finish()
    }
}

impl WatchSettings {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.token.clone(), self.tenant_id.clone())
    }

    /// Builds and validates the feed policy described by these settings.
    pub fn update_policy(&self) -> Result<UpdatePolicy> {
        let mut policy = UpdatePolicy::for_events(self.event_types.iter().cloned())
            .interval(Duration::from_millis(self.poll_interval_ms));
        if self.throttle_ms > 0 {
            policy = policy.throttle(Duration::from_millis(self.throttle_ms));
        }
        if let Some(batch) = &self.batch {
            policy = policy.batch(batch.size, Duration::from_millis(batch.timeout_ms));
        }
        for (key, value) in &self.filters {
            policy = policy.filter(key.clone(), FilterRule::equals(value.clone()));
        }
        policy.validate().context("Invalid watch settings")?;
        Ok(policy)
    }

    /// Command-line values take precedence over the file and environment.
    pub fn apply_overrides(&mut self, cmd: &RunCmd) {
        if let Some(token) = &cmd.token {
            self.token = Some(token.clone());
        }
        if let Some(tenant) = &cmd.tenant {
            self.tenant_id = Some(tenant.clone());
        }
        if !cmd.events.is_empty() {
            self.event_types = cmd.events.clone();
        }
        if let Some(throttle_ms) = cmd.throttle_ms {
            self.throttle_ms = throttle_ms;
        }
        if cmd.batch_size.is_some() || cmd.batch_timeout_ms.is_some() {
            let batch = self.batch.get_or_insert_with(BatchSettings::default);
            if let Some(size) = cmd.batch_size {
                batch.size = size;
            }
            if let Some(timeout_ms) = cmd.batch_timeout_ms {
                batch.timeout_ms = timeout_ms;
            }
        }
    }
}

/// Loads the watch configuration from an optional TOML file, then applies
/// `ENTITY_EVENTS__`-prefixed environment overrides.
///
/// Without a file, every setting not given in the environment keeps its default.
pub fn load_config(path: Option<&str>) -> Result<WatchConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    }
    builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

    let settings: WatchConfig = builder
        .build()
        .context(match path {
            Some(path) => format!("Failed to build configuration from '{}'", path),
            None => "Failed to build configuration from the environment".to_string(),
        })?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
