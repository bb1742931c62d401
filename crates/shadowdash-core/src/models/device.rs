//! Device identifiers and shadow document paths

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a device, used as the document key under `devices/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse and validate a device identifier.
    ///
    /// Identifiers are trimmed and must be non-empty, without `/` or
    /// whitespace, since they become a single document path segment.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, InvalidDeviceId> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return Err(InvalidDeviceId("device id must not be empty".to_string()));
        }
        if value.contains('/') {
            return Err(InvalidDeviceId(format!(
                "device id '{value}' must not contain '/'"
            )));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(InvalidDeviceId(format!(
                "device id '{value}' must not contain whitespace"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable card title (`luz_do_quarto` -> `luz do quarto`).
    pub fn display_name(&self) -> String {
        self.0.replace('_', " ")
    }

    /// Path of one of this device's shadow documents.
    pub fn path(&self, slot: ShadowSlot) -> ShadowPath {
        ShadowPath::new(self.clone(), slot)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = InvalidDeviceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = InvalidDeviceId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

/// Rejected device identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid device id: {0}")]
pub struct InvalidDeviceId(String);

/// The two shadow documents kept per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowSlot {
    /// Latest client intent
    Desired,
    /// Latest state observed by the device agent
    Reported,
}

impl ShadowSlot {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Desired => "desired",
            Self::Reported => "reported",
        }
    }
}

impl fmt::Display for ShadowSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of a shadow document: `devices/{deviceId}/shadow/{slot}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShadowPath {
    device: DeviceId,
    slot: ShadowSlot,
}

impl ShadowPath {
    pub const fn new(device: DeviceId, slot: ShadowSlot) -> Self {
        Self { device, slot }
    }

    pub const fn device(&self) -> &DeviceId {
        &self.device
    }

    pub const fn slot(&self) -> ShadowSlot {
        self.slot
    }

    /// Path segments, unescaped.
    pub fn segments(&self) -> [&str; 4] {
        ["devices", self.device.as_str(), "shadow", self.slot.as_str()]
    }
}

impl fmt::Display for ShadowPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments().join("/"))
    }
}
