//! Desired and reported shadow documents

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::value::{FieldValue, Fields};

/// Who issued a desired-state write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatedBy {
    pub source: String,
    pub uid: String,
}

impl UpdatedBy {
    fn from_fields(fields: &Fields) -> Option<Self> {
        Some(Self {
            source: fields.get("source")?.as_str()?.to_string(),
            uid: fields.get("uid")?.as_str()?.to_string(),
        })
    }
}

/// The latest client intent for a device (`devices/{id}/shadow/desired`).
///
/// Decoding is lenient: fields written by other clients with an unexpected
/// type are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    pub on: Option<bool>,
    pub seq: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<UpdatedBy>,
    pub source: Option<String>,
    pub uid: Option<String>,
}

impl DesiredState {
    pub fn from_fields(fields: &Fields) -> Self {
        Self {
            on: fields.get("on").and_then(FieldValue::as_bool),
            seq: fields.get("seq").and_then(FieldValue::as_whole_number),
            updated_at: fields.get("updatedAt").and_then(FieldValue::as_timestamp),
            updated_by: fields
                .get("updatedBy")
                .and_then(FieldValue::as_map)
                .and_then(UpdatedBy::from_fields),
            source: string_field(fields, "source"),
            uid: string_field(fields, "uid"),
        }
    }
}

/// The state last observed by the device agent (`devices/{id}/shadow/reported`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportedState {
    pub on: Option<bool>,
    pub by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    /// Fields this client does not interpret.
    pub extra: Fields,
}

impl ReportedState {
    pub fn from_fields(fields: &Fields) -> Self {
        let extra = fields
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "on" | "by" | "updatedAt" | "reason"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            on: fields.get("on").and_then(FieldValue::as_bool),
            by: string_field(fields, "by"),
            updated_at: fields.get("updatedAt").and_then(FieldValue::as_timestamp),
            reason: string_field(fields, "reason"),
            extra,
        }
    }
}

/// The user a write is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(String);

impl Principal {
    /// Attribution used when nobody is signed in.
    pub const ANONYMOUS: &'static str = "web";

    pub fn from_uid(uid: Option<&str>) -> Self {
        match uid.map(str::trim).filter(|uid| !uid.is_empty()) {
            Some(uid) => Self(uid.to_string()),
            None => Self(Self::ANONYMOUS.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn string_field(fields: &Fields, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(FieldValue::as_str)
        .map(ToString::to_string)
}
