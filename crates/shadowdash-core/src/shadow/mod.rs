//! Desired/reported shadow protocol.
//!
//! Clients express intent by writing the `desired` document inside a
//! transaction that bumps its sequence number; a device agent acts on it and
//! writes `reported`. Both documents are observed through independent
//! realtime subscriptions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    DesiredState, DeviceId, FieldValue, Fields, Principal, ReportedState, ShadowSlot,
};
use crate::store::{DocumentWrite, ReconnectPolicy, ShadowStore, Snapshot, StoreError};

mod subscription;

pub use subscription::{DeviceSubscription, SlotEvent, SlotHandler, SlotSubscription};

/// Source label written with every desired-state update.
pub const DEFAULT_SOURCE: &str = "web";

#[derive(Debug, Error)]
pub enum ShadowError {
    /// The read-modify-write of `desired` did not commit.
    #[error("Failed to update desired state of {device}: {source}")]
    Transaction {
        device: DeviceId,
        #[source]
        source: StoreError,
    },
    #[error("Failed to read {slot} state of {device}: {source}")]
    Read {
        device: DeviceId,
        slot: ShadowSlot,
        #[source]
        source: StoreError,
    },
}

/// First sequence number used when `desired` has no usable `seq` yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqSeed {
    /// Whole seconds since the Unix epoch at write time.
    WallClockSeconds,
    Fixed(i64),
}

impl SeqSeed {
    pub const fn value_at(self, now: DateTime<Utc>) -> i64 {
        match self {
            Self::WallClockSeconds => now.timestamp(),
            Self::Fixed(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowOptions {
    pub seq_seed: SeqSeed,
    pub source: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for ShadowOptions {
    fn default() -> Self {
        Self {
            seq_seed: SeqSeed::WallClockSeconds,
            source: DEFAULT_SOURCE.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Result of a manual refresh of the reported state.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Synced(ReportedState),
    NoReportedYet,
}

type ErrorCallback = Arc<dyn Fn(ShadowSlot, &StoreError) + Send + Sync>;

/// Callbacks of a device subscription.
pub struct ShadowHandlers {
    on_desired: Box<dyn FnMut(Option<DesiredState>) + Send>,
    on_reported: Box<dyn FnMut(Option<ReportedState>) + Send>,
    on_error: Option<ErrorCallback>,
}

impl ShadowHandlers {
    /// `None` is delivered while the document does not exist.
    pub fn new(
        on_desired: impl FnMut(Option<DesiredState>) + Send + 'static,
        on_reported: impl FnMut(Option<ReportedState>) + Send + 'static,
    ) -> Self {
        Self {
            on_desired: Box::new(on_desired),
            on_reported: Box::new(on_reported),
            on_error: None,
        }
    }

    /// Called when a slot's listener cannot be re-established.
    #[must_use]
    pub fn on_error(mut self, on_error: impl Fn(ShadowSlot, &StoreError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }
}

/// Sequence number for the next desired write given the stored pre-image.
///
/// Whole doubles count as a stored seq; anything else restarts from `seed`.
pub fn next_seq(pre_image: &Snapshot, seed: i64) -> i64 {
    let Some(stored) = pre_image.fields.as_ref().and_then(|fields| fields.get("seq")) else {
        return seed;
    };
    stored.as_whole_number().map_or_else(
        || {
            tracing::warn!(
                "Ignoring non-integer seq {:?} on {}, restarting at {}",
                stored,
                pre_image.path,
                seed
            );
            seed
        },
        |seq| seq.saturating_add(1),
    )
}

/// Merge-write of a desired-state update.
pub fn desired_write(on: bool, seq: i64, principal: &Principal, source: &str) -> DocumentWrite {
    let mut updated_by = Fields::new();
    updated_by.insert("source".to_string(), source.into());
    updated_by.insert("uid".to_string(), principal.as_str().into());

    let mut fields = Fields::new();
    fields.insert("on".to_string(), on.into());
    fields.insert("seq".to_string(), seq.into());
    fields.insert("updatedAt".to_string(), FieldValue::ServerTimestamp);
    fields.insert("updatedBy".to_string(), updated_by.into());
    fields.insert("source".to_string(), source.into());
    fields.insert("uid".to_string(), principal.as_str().into());
    DocumentWrite::merge(fields)
}

/// Client side of the shadow protocol.
#[derive(Clone)]
pub struct ShadowClient {
    store: Arc<dyn ShadowStore>,
    options: ShadowOptions,
}

impl ShadowClient {
    pub fn new(store: Arc<dyn ShadowStore>, options: ShadowOptions) -> Self {
        Self { store, options }
    }

    pub const fn options(&self) -> &ShadowOptions {
        &self.options
    }

    /// Set the desired power state of `device`.
    ///
    /// Runs one read-modify-write transaction that increments `seq` from the
    /// stored value (or seeds it). Failures are returned as
    /// [`ShadowError::Transaction`] and never retried here.
    pub async fn set_desired(
        &self,
        device: &DeviceId,
        on: bool,
        principal: &Principal,
    ) -> Result<DesiredState, ShadowError> {
        let path = device.path(ShadowSlot::Desired);
        let seed = self.options.seq_seed.value_at(Utc::now());
        let source = self.options.source.as_str();
        let mutator = move |pre_image: &Snapshot| {
            desired_write(on, next_seq(pre_image, seed), principal, source)
        };

        let committed = self
            .store
            .run_transaction(&path, &mutator)
            .await
            .map_err(|source| ShadowError::Transaction {
                device: device.clone(),
                source,
            })?;

        let desired = committed
            .fields
            .as_ref()
            .map(DesiredState::from_fields)
            .unwrap_or_default();
        tracing::info!(
            "Desired state of {} set to {} (seq {:?})",
            device,
            if on { "on" } else { "off" },
            desired.seq
        );
        Ok(desired)
    }

    pub async fn fetch_desired(&self, device: &DeviceId) -> Result<Option<DesiredState>, ShadowError> {
        let snapshot = self.read(device, ShadowSlot::Desired).await?;
        Ok(snapshot.fields.as_ref().map(DesiredState::from_fields))
    }

    pub async fn fetch_reported(
        &self,
        device: &DeviceId,
    ) -> Result<Option<ReportedState>, ShadowError> {
        let snapshot = self.read(device, ShadowSlot::Reported).await?;
        Ok(snapshot.fields.as_ref().map(ReportedState::from_fields))
    }

    /// One-off read of `reported`, outside the realtime subscription.
    pub async fn refresh(&self, device: &DeviceId) -> Result<RefreshOutcome, ShadowError> {
        Ok(match self.fetch_reported(device).await? {
            Some(reported) => RefreshOutcome::Synced(reported),
            None => RefreshOutcome::NoReportedYet,
        })
    }

    /// Subscribe to both shadow documents of `device`.
    ///
    /// Each slot delivers its current document first and then every change;
    /// the two slots are not ordered relative to each other.
    pub fn subscribe(&self, device: &DeviceId, handlers: ShadowHandlers) -> DeviceSubscription {
        let ShadowHandlers {
            mut on_desired,
            mut on_reported,
            on_error,
        } = handlers;
        let policy = self.options.reconnect;

        let desired_error = on_error.clone();
        let desired = SlotSubscription::spawn(
            Arc::clone(&self.store),
            device.path(ShadowSlot::Desired),
            policy,
            Box::new(move |event| match event {
                SlotEvent::Snapshot(snapshot) => {
                    on_desired(snapshot.fields.as_ref().map(DesiredState::from_fields));
                }
                SlotEvent::Failed(error) => report_failure(desired_error.as_ref(), ShadowSlot::Desired, &error),
            }),
        );

        let reported = SlotSubscription::spawn(
            Arc::clone(&self.store),
            device.path(ShadowSlot::Reported),
            policy,
            Box::new(move |event| match event {
                SlotEvent::Snapshot(snapshot) => {
                    on_reported(snapshot.fields.as_ref().map(ReportedState::from_fields));
                }
                SlotEvent::Failed(error) => report_failure(on_error.as_ref(), ShadowSlot::Reported, &error),
            }),
        );

        tracing::debug!("Subscribed to shadow of {}", device);
        DeviceSubscription::new(desired, reported)
    }

    async fn read(&self, device: &DeviceId, slot: ShadowSlot) -> Result<Snapshot, ShadowError> {
        self.store
            .get(&device.path(slot))
            .await
            .map_err(|source| ShadowError::Read {
                device: device.clone(),
                slot,
                source,
            })
    }
}

fn report_failure(callback: Option<&ErrorCallback>, slot: ShadowSlot, error: &StoreError) {
    match callback {
        Some(callback) => callback(slot, error),
        None => tracing::error!("{} subscription failed: {}", slot, error),
    }
}

#[cfg(test)]
mod tests;
