//! Dashboard configuration.
//!
//! Provides a unified `DashboardConfig` used by every shadowdash client to
//! locate the identity provider and shadow store, list the devices to show
//! and tune the shadow protocol.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Locale;
use crate::latency::{LatencyThresholds, DEFAULT_OK_MS, DEFAULT_SLOW_MS};
use crate::models::DeviceId;
use crate::shadow::{SeqSeed, ShadowOptions, DEFAULT_SOURCE};
use crate::store::ReconnectPolicy;
use crate::util::normalize_text_option;

pub const ENV_API_KEY: &str = "SHADOWDASH_FIREBASE_API_KEY";
pub const ENV_PROJECT_ID: &str = "SHADOWDASH_FIREBASE_PROJECT_ID";
pub const ENV_DEVICES: &str = "SHADOWDASH_DEVICES";

const DEFAULT_DEVICE: &str = "luz_do_quarto";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How the first sequence number of a device is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqSeedMode {
    #[default]
    WallClockSeconds,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DashboardConfig {
    /// Public Web API key of the Firebase project.
    pub firebase_api_key: Option<String>,
    pub firebase_project_id: Option<String>,
    /// Override of the Firestore REST endpoint (emulator).
    pub firestore_base_url: Option<String>,
    pub known_devices: Vec<String>,
    pub source_label: String,
    pub seq_seed: SeqSeedMode,
    pub seq_seed_value: i64,
    pub latency_ok_ms: i64,
    pub latency_slow_ms: i64,
    pub poll_interval_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub locale: Locale,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            firebase_api_key: None,
            firebase_project_id: None,
            firestore_base_url: None,
            known_devices: vec![DEFAULT_DEVICE.to_string()],
            source_label: DEFAULT_SOURCE.to_string(),
            seq_seed: SeqSeedMode::default(),
            seq_seed_value: 0,
            latency_ok_ms: DEFAULT_OK_MS,
            latency_slow_ms: DEFAULT_SLOW_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reconnect: ReconnectPolicy::default(),
            locale: Locale::default(),
        }
    }
}

impl DashboardConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = read_json::<Self>(path)?.unwrap_or_default();
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let mut normalized = self.clone();
        normalized.normalize();
        write_json(path, &normalized)
    }

    /// Apply `SHADOWDASH_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_key) = normalize_text_option(lookup(ENV_API_KEY)) {
            self.firebase_api_key = Some(api_key);
        }
        if let Some(project_id) = normalize_text_option(lookup(ENV_PROJECT_ID)) {
            self.firebase_project_id = Some(project_id);
        }
        if let Some(devices) = normalize_text_option(lookup(ENV_DEVICES)) {
            self.known_devices = devices
                .split(',')
                .map(str::trim)
                .filter(|device| !device.is_empty())
                .map(ToString::to_string)
                .collect();
        }
    }

    pub fn normalize(&mut self) {
        self.firebase_api_key = normalize_text_option(self.firebase_api_key.take());
        self.firebase_project_id = normalize_text_option(self.firebase_project_id.take());
        self.firestore_base_url = normalize_text_option(self.firestore_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.source_label = normalize_text_option(Some(std::mem::take(&mut self.source_label)))
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());

        let mut devices = Vec::with_capacity(self.known_devices.len());
        for device in self.known_devices.drain(..) {
            let device = device.trim().to_string();
            if !device.is_empty() && !devices.contains(&device) {
                devices.push(device);
            }
        }
        self.known_devices = devices;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.devices()?;
        if self.latency_ok_ms <= 0 || self.latency_ok_ms >= self.latency_slow_ms {
            return Err(ConfigError::Invalid(format!(
                "latency_ok_ms ({}) must be positive and below latency_slow_ms ({})",
                self.latency_ok_ms, self.latency_slow_ms
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(url) = &self.firestore_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(
                    "firestore_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn devices(&self) -> Result<Vec<DeviceId>, ConfigError> {
        self.known_devices
            .iter()
            .map(|device| {
                DeviceId::parse(device).map_err(|error| ConfigError::Invalid(error.to_string()))
            })
            .collect()
    }

    pub const fn seq_seed(&self) -> SeqSeed {
        match self.seq_seed {
            SeqSeedMode::WallClockSeconds => SeqSeed::WallClockSeconds,
            SeqSeedMode::Fixed => SeqSeed::Fixed(self.seq_seed_value),
        }
    }

    pub fn shadow_options(&self) -> ShadowOptions {
        ShadowOptions {
            seq_seed: self.seq_seed(),
            source: self.source_label.clone(),
            reconnect: self.reconnect,
        }
    }

    pub const fn latency_thresholds(&self) -> LatencyThresholds {
        LatencyThresholds {
            ok_ms: self.latency_ok_ms,
            slow_ms: self.latency_slow_ms,
        }
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `(api_key, project_id)` when both are configured.
    pub fn firebase_credentials(&self) -> Option<(String, String)> {
        Some((
            normalize_text_option(self.firebase_api_key.clone())?,
            normalize_text_option(self.firebase_project_id.clone())?,
        ))
    }
}

/// Read a JSON file; `None` when it does not exist yet.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `value` as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let write_error = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    let serialized = serde_json::to_string_pretty(value)
        .map_err(|error| ConfigError::Invalid(format!("Failed to serialize config: {error}")))?;
    std::fs::write(path, serialized).map_err(write_error)
}
