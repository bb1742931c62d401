//! Subscriptions owned by a signed-in session.

use std::collections::HashMap;

use crate::auth::AuthUser;
use crate::models::{DeviceId, Principal};
use crate::shadow::DeviceSubscription;

/// Live device subscriptions, keyed by device.
///
/// Every handle is torn down when it is replaced, removed, cleared or when
/// the registry is dropped.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<DeviceId, DeviceSubscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: DeviceId, subscription: DeviceSubscription) {
        if let Some(mut previous) = self.entries.insert(device.clone(), subscription) {
            tracing::debug!("Replacing subscription of {}", device);
            previous.unsubscribe();
        }
    }

    pub fn remove(&mut self, device: &DeviceId) -> bool {
        self.entries.remove(device).is_some_and(|mut subscription| {
            subscription.unsubscribe();
            true
        })
    }

    pub fn contains(&self, device: &DeviceId) -> bool {
        self.entries.contains_key(device)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        for (_, mut subscription) in self.entries.drain() {
            subscription.unsubscribe();
        }
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Everything that lives exactly as long as one signed-in user.
#[derive(Debug)]
pub struct SessionScope {
    user: AuthUser,
    principal: Principal,
    registry: SubscriptionRegistry,
}

impl SessionScope {
    pub fn new(user: AuthUser) -> Self {
        let principal = Principal::from_uid(Some(&user.uid));
        Self {
            user,
            principal,
            registry: SubscriptionRegistry::new(),
        }
    }

    pub const fn user(&self) -> &AuthUser {
        &self.user
    }

    pub const fn principal(&self) -> &Principal {
        &self.principal
    }

    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SubscriptionRegistry {
        &mut self.registry
    }

    /// Tear down every subscription of the session.
    pub fn close(mut self) {
        let count = self.registry.len();
        self.registry.clear();
        tracing::info!(uid = %self.user.uid, "Closed session scope ({} device(s))", count);
    }
}
