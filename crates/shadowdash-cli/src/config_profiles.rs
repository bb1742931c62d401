//! Named dashboard profiles kept in the user's config directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shadowdash_core::config::{read_json, write_json, ConfigError, DashboardConfig};

const CONFIG_DIR_NAME: &str = "shadowdash";
const CONFIG_FILE_NAME: &str = "cli-config.json";
const CONFIG_VERSION: u32 = 1;

pub const PROFILE_ENV: &str = "SHADOWDASH_PROFILE";
pub const DEFAULT_PROFILE: &str = "default";

/// Every profile the CLI knows about, plus the one used when none is named.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, DashboardConfig>,
}

impl Default for CliProfilesConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            active_profile: None,
            profiles: BTreeMap::new(),
        }
    }
}

const fn config_version() -> u32 {
    CONFIG_VERSION
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::Invalid("could not resolve the user config directory".to_string())
    })?;
    Ok(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Trimmed profile name, `None` when blank.
pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = read_json::<Self>(path)?.unwrap_or_default();
        config.normalize();
        Ok(config)
    }

    /// Save to the default location and return where it went.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let mut normalized = self.clone();
        normalized.normalize();
        write_json(path, &normalized)
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        self.resolve_profile_name_with(explicit, std::env::var(PROFILE_ENV).ok().as_deref())
    }

    /// `explicit`, then the environment, then the active profile, then `default`.
    pub fn resolve_profile_name_with(&self, explicit: Option<&str>, from_env: Option<&str>) -> String {
        [explicit, from_env, self.active_profile.as_deref()]
            .into_iter()
            .find_map(normalize_profile_name)
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&DashboardConfig> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut DashboardConfig {
        self.profiles.entry(name.to_string()).or_default()
    }

    /// Profile `name` with `SHADOWDASH_*` overrides applied. Unknown profiles
    /// start from the defaults, so a profile can live in the environment only.
    pub fn effective_profile(&self, name: &str) -> DashboardConfig {
        let mut profile = self.profile(name).cloned().unwrap_or_default();
        profile.apply_env_overrides();
        profile
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        self.profiles.values_mut().for_each(DashboardConfig::normalize);
    }
}
