use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shadowdash_core::auth::{AuthGate, AuthSession, Locale};
use shadowdash_core::config::DashboardConfig;
use shadowdash_core::dashboard::{Dashboard, DashboardEvent, DeviceCard};
use shadowdash_core::shadow::ShadowClient;
use shadowdash_core::store::{FirestoreShadowStore, ShadowStore};
use shadowdash_core::DeviceId;
use tokio::sync::broadcast;

use crate::auth::{auth_client_for_profile, CliAuthClient};
use crate::cli::LocaleArg;
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

const LOAD_TIMEOUT: Duration = Duration::from_secs(15);

pub type CliDashboard = Dashboard<CliAuthClient>;

/// A profile resolved from the config file and the environment.
pub struct ResolvedProfile {
    pub name: String,
    pub config: DashboardConfig,
}

pub fn resolve_profile(global_profile: Option<&str>) -> Result<ResolvedProfile, CliError> {
    let profiles = CliProfilesConfig::load()?;
    let name = profiles.resolve_profile_name(global_profile);
    let config = profiles.effective_profile(&name);
    config.validate()?;
    Ok(ResolvedProfile { name, config })
}

/// Everything a device command needs: a signed-in dashboard and the store
/// whose bearer token follows the session.
pub struct Workspace {
    pub profile: ResolvedProfile,
    pub dashboard: Arc<CliDashboard>,
    pub store: Arc<FirestoreShadowStore>,
    session: AuthSession,
}

impl Workspace {
    pub async fn open(global_profile: Option<&str>) -> Result<Self, CliError> {
        let profile = resolve_profile(global_profile)?;
        let (_, project_id) = profile
            .config
            .firebase_credentials()
            .ok_or_else(|| CliError::NotConfigured(profile.name.clone()))?;

        let gate = Arc::new(AuthGate::new(auth_client_for_profile(
            &profile.name,
            &profile.config,
        )?));
        let session = gate
            .restore()
            .await
            .map_err(|error| CliError::Auth(error.user_message(profile.config.locale)))?
            .ok_or_else(|| CliError::NotSignedIn(profile.name.clone()))?;

        let store = match &profile.config.firestore_base_url {
            Some(base_url) => FirestoreShadowStore::with_base_url(base_url, &project_id),
            None => FirestoreShadowStore::new(&project_id),
        }
        .map_err(|error| CliError::Core(error.into()))?
        .with_poll_interval(profile.config.poll_interval());
        let store = Arc::new(store);
        store.set_id_token(Some(session.id_token.clone()));

        let shadow = ShadowClient::new(
            Arc::clone(&store) as Arc<dyn ShadowStore>,
            profile.config.shadow_options(),
        );
        let dashboard = Dashboard::new(shadow, gate, profile.config.devices()?)
            .with_thresholds(profile.config.latency_thresholds())
            .with_locale(profile.config.locale);

        Ok(Self {
            profile,
            dashboard: Arc::new(dashboard),
            store,
            session,
        })
    }

    /// Mount the session's subscriptions; the receiver sees every event
    /// from the first card on.
    pub fn mount(&self) -> broadcast::Receiver<DashboardEvent> {
        let events = self.dashboard.subscribe_events();
        self.dashboard.apply_session(Some(&self.session));
        events
    }

    /// Tear down every subscription without signing out.
    pub fn unmount(&self) {
        self.dashboard.apply_session(None);
    }

    /// Wait until both shadow documents of every device in `devices` arrived.
    pub async fn wait_until_loaded(
        &self,
        events: &mut broadcast::Receiver<DashboardEvent>,
        devices: &[DeviceId],
    ) -> Result<(), CliError> {
        let loaded = |dashboard: &CliDashboard| {
            devices.iter().all(|device| {
                dashboard
                    .card(device)
                    .is_some_and(|card| card.loaded)
            })
        };

        tokio::time::timeout(LOAD_TIMEOUT, async {
            while !loaded(&self.dashboard) {
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
        .await
        .map_err(|_| CliError::Timeout("the initial device state".to_string()))
    }

    /// Resolve `id` against the profile's devices.
    pub fn device(&self, id: &str) -> Result<DeviceId, CliError> {
        resolve_device(self.dashboard.devices(), id)
    }

    /// Refresh the id token when it is about to expire.
    pub async fn keep_token_fresh(&self) -> Result<(), CliError> {
        let session = self
            .dashboard
            .gate()
            .valid_session()
            .await
            .map_err(|error| CliError::Auth(error.user_message(self.profile.config.locale)))?;
        self.store.set_id_token(Some(session.id_token));
        Ok(())
    }
}

pub fn resolve_device(devices: &[DeviceId], id: &str) -> Result<DeviceId, CliError> {
    let id = id.trim();
    devices
        .iter()
        .find(|device| device.as_str() == id)
        .cloned()
        .ok_or_else(|| CliError::UnknownDevice(id.to_string()))
}

pub const fn locale_from_arg(locale: LocaleArg) -> Locale {
    match locale {
        LocaleArg::En => Locale::En,
        LocaleArg::PtBr => Locale::PtBr,
    }
}

#[derive(Debug, Serialize)]
pub struct CardItem<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub power: &'a str,
    pub reported_power: &'a str,
    pub seq: &'a str,
    pub updated: &'a str,
    pub source: &'a str,
    pub by: &'a str,
    pub latency: &'a str,
    pub latency_band: &'a str,
    pub latency_ms: Option<i64>,
    pub busy: bool,
}

pub fn card_to_item(card: &DeviceCard) -> CardItem<'_> {
    CardItem {
        id: card.device.as_str(),
        title: &card.title,
        power: card.status_label,
        reported_power: card.reported_power.label(),
        seq: &card.seq_label,
        updated: &card.updated_label,
        source: &card.source_label,
        by: &card.by_label,
        latency: &card.latency_label,
        latency_band: card.latency.band.name(),
        latency_ms: card.latency.millis,
        busy: card.busy,
    }
}

pub fn format_card_lines(cards: &[DeviceCard]) -> Vec<String> {
    cards.iter().map(DeviceCard::render_line).collect()
}
