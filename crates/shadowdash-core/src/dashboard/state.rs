//! Per-device state record.

use serde::Serialize;

use crate::models::{DesiredState, DeviceId, ReportedState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerStatus {
    #[default]
    Unknown,
    Off,
    On,
}

impl PowerStatus {
    pub const fn from_on(on: Option<bool>) -> Self {
        match on {
            Some(true) => Self::On,
            Some(false) => Self::Off,
            None => Self::Unknown,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Unknown => "—",
        }
    }

    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

/// What the dashboard knows about one device.
///
/// Desired and reported snapshots land in separate fields, so the two
/// subscriptions never overwrite each other's data.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    device: DeviceId,
    desired: Option<DesiredState>,
    reported: Option<ReportedState>,
    desired_loaded: bool,
    reported_loaded: bool,
    busy: bool,
}

impl DeviceState {
    pub const fn new(device: DeviceId) -> Self {
        Self {
            device,
            desired: None,
            reported: None,
            desired_loaded: false,
            reported_loaded: false,
            busy: false,
        }
    }

    pub const fn device(&self) -> &DeviceId {
        &self.device
    }

    pub const fn desired(&self) -> Option<&DesiredState> {
        self.desired.as_ref()
    }

    pub const fn reported(&self) -> Option<&ReportedState> {
        self.reported.as_ref()
    }

    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// Both slots have delivered at least one snapshot.
    pub const fn is_loaded(&self) -> bool {
        self.desired_loaded && self.reported_loaded
    }

    pub fn apply_desired(&mut self, desired: Option<DesiredState>) {
        self.desired = desired;
        self.desired_loaded = true;
    }

    pub fn apply_reported(&mut self, reported: Option<ReportedState>) {
        self.reported = reported;
        self.reported_loaded = true;
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Power the device was last asked for.
    pub fn power(&self) -> PowerStatus {
        PowerStatus::from_on(self.desired.as_ref().and_then(|desired| desired.on))
    }

    /// Power the device last said it has.
    pub fn reported_power(&self) -> PowerStatus {
        PowerStatus::from_on(self.reported.as_ref().and_then(|reported| reported.on))
    }

    /// Target of a toggle: anything but `On` turns the device on.
    pub fn toggle_target(&self) -> bool {
        !self.power().is_on()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn desired(on: bool) -> DesiredState {
        DesiredState {
            on: Some(on),
            seq: Some(1),
            ..DesiredState::default()
        }
    }

    fn state() -> DeviceState {
        DeviceState::new(DeviceId::parse("luz_do_quarto").unwrap())
    }

    #[test]
    fn power_follows_desired_snapshots() {
        let mut state = state();
        assert_eq!(state.power(), PowerStatus::Unknown);
        assert!(state.toggle_target());
        assert!(!state.is_loaded());

        state.apply_desired(Some(desired(false)));
        assert_eq!(state.power(), PowerStatus::Off);
        assert!(state.toggle_target());

        state.apply_desired(Some(desired(true)));
        assert_eq!(state.power(), PowerStatus::On);
        assert!(!state.toggle_target());

        state.apply_desired(None);
        assert_eq!(state.power(), PowerStatus::Unknown);
    }

    #[test]
    fn reported_updates_do_not_touch_desired() {
        let mut state = state();
        state.apply_desired(Some(desired(true)));
        state.apply_reported(Some(ReportedState {
            on: Some(false),
            by: Some("esp32".to_string()),
            ..ReportedState::default()
        }));

        assert_eq!(state.power(), PowerStatus::On);
        assert_eq!(state.reported_power(), PowerStatus::Off);

        state.apply_reported(None);
        assert!(state.is_loaded());
        assert_eq!(state.desired(), Some(&desired(true)));
        assert_eq!(state.reported_power(), PowerStatus::Unknown);
    }

    #[test]
    fn labels() {
        assert_eq!(PowerStatus::On.label(), "ON");
        assert_eq!(PowerStatus::Off.label(), "OFF");
        assert_eq!(PowerStatus::Unknown.label(), "—");
    }
}
