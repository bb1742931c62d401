//! Card view of a device, projected from its state record.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::{DeviceState, PowerStatus};
use crate::latency::{compute_latency, Latency, LatencyThresholds};
use crate::models::DeviceId;
use crate::util::format_relative;

const PLACEHOLDER: &str = "—";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceCard {
    pub device: DeviceId,
    pub title: String,
    pub power: PowerStatus,
    pub status_label: &'static str,
    pub checked: bool,
    pub seq_label: String,
    pub updated_label: String,
    pub source_label: String,
    pub by_label: String,
    pub reported_power: PowerStatus,
    pub latency: Latency,
    pub latency_label: String,
    pub latency_class: &'static str,
    pub busy: bool,
    /// Both shadow documents have been received at least once.
    pub loaded: bool,
}

impl DeviceCard {
    pub fn project(state: &DeviceState, thresholds: LatencyThresholds, now: DateTime<Utc>) -> Self {
        let desired = state.desired();
        let reported = state.reported();
        let power = state.power();
        let latency = compute_latency(
            desired.and_then(|desired| desired.updated_at),
            reported.and_then(|reported| reported.updated_at),
            thresholds,
        );

        Self {
            device: state.device().clone(),
            title: state.device().display_name(),
            power,
            status_label: power.label(),
            checked: power.is_on(),
            seq_label: desired
                .and_then(|desired| desired.seq)
                .map_or_else(|| PLACEHOLDER.to_string(), |seq| seq.to_string()),
            updated_label: desired
                .and_then(|desired| desired.updated_at)
                .map_or_else(|| PLACEHOLDER.to_string(), |at| format_relative(at, now)),
            source_label: placeholder_or(desired.and_then(|desired| desired.source.as_deref())),
            by_label: placeholder_or(reported.and_then(|reported| reported.by.as_deref())),
            reported_power: state.reported_power(),
            latency,
            latency_label: latency.label(),
            latency_class: latency.band.css_class(),
            busy: state.is_busy(),
            loaded: state.is_loaded(),
        }
    }

    /// One-line rendering for terminals.
    pub fn render_line(&self) -> String {
        let mut line = format!(
            "{:<16} [{:>3}] SEQ {:<12} updated {:<4} source {:<6} by {:<10} reported {:<3} {}",
            self.title,
            self.status_label,
            self.seq_label,
            self.updated_label,
            self.source_label,
            self.by_label,
            self.reported_power.label(),
            self.latency_label,
        );
        if !self.latency_class.is_empty() {
            line.push_str(&format!(" ({})", self.latency_class));
        }
        if self.busy {
            line.push_str(" …");
        }
        line
    }
}

fn placeholder_or(value: Option<&str>) -> String {
    value
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(PLACEHOLDER)
        .to_string()
}
