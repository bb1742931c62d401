//! Freshness of the reported state relative to the last desired change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OK_MS: i64 = 4_000;
pub const DEFAULT_SLOW_MS: i64 = 15_000;

/// Band boundaries in milliseconds: `ok` below `ok_ms`, `slow` below `slow_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyThresholds {
    pub ok_ms: i64,
    pub slow_ms: i64,
}

impl Default for LatencyThresholds {
    fn default() -> Self {
        Self {
            ok_ms: DEFAULT_OK_MS,
            slow_ms: DEFAULT_SLOW_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyBand {
    /// One of the two timestamps is missing
    Unknown,
    Ok,
    Slow,
    Stale,
}

impl LatencyBand {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ok => "ok",
            Self::Slow => "slow",
            Self::Stale => "stale",
        }
    }

    /// Indicator class; stale readings carry no class.
    pub const fn css_class(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Slow => "slow",
            Self::Unknown | Self::Stale => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Latency {
    pub band: LatencyBand,
    /// Absolute distance between the two timestamps; `None` when unknown.
    pub millis: Option<i64>,
}

impl Latency {
    pub const UNKNOWN: Self = Self {
        band: LatencyBand::Unknown,
        millis: None,
    };

    #[allow(clippy::cast_precision_loss)]
    pub fn label(&self) -> String {
        match self.millis {
            Some(millis) => format!("lat {:.1}s", millis as f64 / 1000.0),
            None => "lat —".to_string(),
        }
    }
}

/// Classify `|reported - desired|`.
pub fn compute_latency(
    desired_at: Option<DateTime<Utc>>,
    reported_at: Option<DateTime<Utc>>,
    thresholds: LatencyThresholds,
) -> Latency {
    let (Some(desired_at), Some(reported_at)) = (desired_at, reported_at) else {
        return Latency::UNKNOWN;
    };

    let millis = (reported_at - desired_at).num_milliseconds().abs();
    let band = if millis < thresholds.ok_ms {
        LatencyBand::Ok
    } else if millis < thresholds.slow_ms {
        LatencyBand::Slow
    } else {
        LatencyBand::Stale
    };
    Latency {
        band,
        millis: Some(millis),
    }
}
