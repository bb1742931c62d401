//! Long-lived realtime subscriptions to shadow documents.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::models::{ShadowPath, ShadowSlot};
use crate::store::{ReconnectPolicy, ShadowStore, Snapshot, StoreError};

/// What a slot subscription hands to its handler.
#[derive(Debug)]
pub enum SlotEvent {
    Snapshot(Snapshot),
    /// The listener dropped and the reconnect policy gave up.
    Failed(StoreError),
}

pub type SlotHandler = Box<dyn FnMut(SlotEvent) + Send>;

/// Subscription to one shadow document.
///
/// Handlers run on a Tokio task. Once [`SlotSubscription::unsubscribe`]
/// returns, the handler never runs again. A handler must not unsubscribe its
/// own subscription.
pub struct SlotSubscription {
    path: ShadowPath,
    handler: Arc<Mutex<Option<SlotHandler>>>,
    task: Option<JoinHandle<()>>,
}

impl SlotSubscription {
    pub fn spawn(
        store: Arc<dyn ShadowStore>,
        path: ShadowPath,
        policy: ReconnectPolicy,
        handler: SlotHandler,
    ) -> Self {
        let handler = Arc::new(Mutex::new(Some(handler)));
        let task = tokio::spawn(run_listener(
            store,
            path.clone(),
            policy,
            Arc::clone(&handler),
        ));
        Self {
            path,
            handler,
            task: Some(task),
        }
    }

    pub const fn path(&self) -> &ShadowPath {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    pub fn unsubscribe(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        // Waits for an in-flight handler call to finish.
        match self.handler.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
        task.abort();
        tracing::debug!("Unsubscribed from {}", self.path);
    }
}

impl Drop for SlotSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SlotSubscription {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SlotSubscription")
            .field("path", &self.path.to_string())
            .field("active", &self.is_active())
            .finish()
    }
}

/// The desired and reported subscriptions of one device.
#[derive(Debug)]
pub struct DeviceSubscription {
    desired: SlotSubscription,
    reported: SlotSubscription,
}

impl DeviceSubscription {
    pub const fn new(desired: SlotSubscription, reported: SlotSubscription) -> Self {
        Self { desired, reported }
    }

    pub fn unsubscribe_slot(&mut self, slot: ShadowSlot) {
        match slot {
            ShadowSlot::Desired => self.desired.unsubscribe(),
            ShadowSlot::Reported => self.reported.unsubscribe(),
        }
    }

    pub fn unsubscribe(&mut self) {
        self.desired.unsubscribe();
        self.reported.unsubscribe();
    }

    pub fn is_active(&self, slot: ShadowSlot) -> bool {
        match slot {
            ShadowSlot::Desired => self.desired.is_active(),
            ShadowSlot::Reported => self.reported.is_active(),
        }
    }
}

fn deliver(handler: &Mutex<Option<SlotHandler>>, event: SlotEvent) -> bool {
    let Ok(mut guard) = handler.lock() else {
        return false;
    };
    match guard.as_mut() {
        Some(handler) => {
            handler(event);
            true
        }
        None => false,
    }
}

async fn run_listener(
    store: Arc<dyn ShadowStore>,
    path: ShadowPath,
    policy: ReconnectPolicy,
    handler: Arc<Mutex<Option<SlotHandler>>>,
) {
    let mut failures = 0u32;
    let mut last_error = None;

    loop {
        match store.listen(&path) {
            Ok(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(snapshot) => {
                            failures = 0;
                            tracing::debug!("Snapshot for {} (exists={})", path, snapshot.exists());
                            if !deliver(&handler, SlotEvent::Snapshot(snapshot)) {
                                return;
                            }
                        }
                        Err(error) => {
                            tracing::warn!("Listener for {} dropped: {}", path, error);
                            last_error = Some(error);
                            break;
                        }
                    }
                }
            }
            Err(error) => {
                tracing::warn!("Failed to listen to {}: {}", path, error);
                last_error = Some(error);
            }
        }

        failures = failures.saturating_add(1);
        let Some(delay) = policy.delay_for(failures) else {
            let error = last_error
                .take()
                .unwrap_or_else(|| StoreError::Disconnected(path.to_string()));
            tracing::warn!(
                "Giving up on listener for {} after {} attempt(s)",
                path,
                failures
            );
            deliver(&handler, SlotEvent::Failed(error));
            return;
        };
        tracing::info!(
            "Reconnecting listener for {} in {:?} (attempt {})",
            path,
            delay,
            failures
        );
        tokio::time::sleep(delay).await;
    }
}
