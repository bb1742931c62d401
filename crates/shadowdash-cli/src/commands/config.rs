use shadowdash_core::config::{DashboardConfig, SeqSeedMode, ENV_API_KEY, ENV_PROJECT_ID};
use shadowdash_core::util::normalize_text_option;

use crate::cli::{ConfigCommands, LocaleArg};
use crate::commands::common::{locale_from_arg, resolve_profile};
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

/// Values passed to `config init`.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub devices: Vec<String>,
    pub locale: Option<LocaleArg>,
    pub firestore_url: Option<String>,
}

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_key,
            project_id,
            devices,
            locale,
            firestore_url,
            no_activate,
        } => {
            let update = ProfileUpdate {
                api_key: api_key.or_else(|| std::env::var(ENV_API_KEY).ok()),
                project_id: project_id.or_else(|| std::env::var(ENV_PROJECT_ID).ok()),
                devices,
                locale,
                firestore_url,
            };
            run_config_init(global_profile, update, no_activate)
        }
        ConfigCommands::Show { json } => run_config_show(global_profile, json),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile_name);

    let profile = config.profile_mut_or_default(&profile_name);
    apply_profile_update(profile, update)?;
    let missing_fields = missing_fields(profile);

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save()?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    if missing_fields.is_empty() {
        println!(
            "Profile '{profile_name}' is ready. Run `shadowdash auth login --email <email> --password <password>`."
        );
    } else {
        println!(
            "Profile '{}' is missing: {}",
            profile_name,
            missing_fields.join(", ")
        );
    }

    Ok(())
}

pub fn apply_profile_update(
    profile: &mut DashboardConfig,
    update: ProfileUpdate,
) -> Result<(), CliError> {
    if let Some(api_key) = normalize_text_option(update.api_key) {
        profile.firebase_api_key = Some(api_key);
    }
    if let Some(project_id) = normalize_text_option(update.project_id) {
        profile.firebase_project_id = Some(project_id);
    }
    if !update.devices.is_empty() {
        profile.known_devices = update.devices;
    }
    if let Some(locale) = update.locale {
        profile.locale = locale_from_arg(locale);
    }
    if let Some(url) = normalize_text_option(update.firestore_url) {
        profile.firestore_base_url = Some(url);
    }

    profile.normalize();
    profile.validate()?;
    Ok(())
}

pub fn missing_fields(profile: &DashboardConfig) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if normalize_text_option(profile.firebase_api_key.clone()).is_none() {
        missing.push("api_key");
    }
    if normalize_text_option(profile.firebase_project_id.clone()).is_none() {
        missing.push("project_id");
    }
    if profile.known_devices.is_empty() {
        missing.push("devices");
    }
    missing
}

fn run_config_show(global_profile: Option<&str>, as_json: bool) -> Result<(), CliError> {
    let profile = resolve_profile(global_profile)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&profile.config)?);
        return Ok(());
    }

    for line in describe_profile(&profile.name, &profile.config) {
        println!("{line}");
    }
    Ok(())
}

pub fn describe_profile(name: &str, config: &DashboardConfig) -> Vec<String> {
    let unset = || "(unset)".to_string();
    let seed = match config.seq_seed {
        SeqSeedMode::WallClockSeconds => "wall clock seconds".to_string(),
        SeqSeedMode::Fixed => format!("fixed {}", config.seq_seed_value),
    };
    vec![
        format!("profile:   {name}"),
        format!(
            "project:   {}",
            config.firebase_project_id.clone().unwrap_or_else(unset)
        ),
        format!(
            "api key:   {}",
            if config.firebase_api_key.is_some() { "set" } else { "(unset)" }
        ),
        format!(
            "firestore: {}",
            config.firestore_base_url.clone().unwrap_or_else(|| "default".to_string())
        ),
        format!("devices:   {}", config.known_devices.join(", ")),
        format!("source:    {}", config.source_label),
        format!("seq seed:  {seed}"),
        format!(
            "latency:   ok < {} ms, slow < {} ms",
            config.latency_ok_ms, config.latency_slow_ms
        ),
        format!("locale:    {:?}", config.locale),
    ]
}
