//! Transient user notifications.

use serde::Serialize;

use crate::auth::Locale;
use crate::models::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    DesiredUpdated { on: bool },
    UpdateFailed,
    ReportedSynced,
    NoReportedYet,
    RefreshFailed,
    RealtimeLost { device: DeviceId },
}

impl NoticeKind {
    pub const fn level(&self) -> NoticeLevel {
        match self {
            Self::DesiredUpdated { .. } | Self::ReportedSynced => NoticeLevel::Success,
            Self::NoReportedYet => NoticeLevel::Warning,
            Self::UpdateFailed | Self::RefreshFailed | Self::RealtimeLost { .. } => {
                NoticeLevel::Error
            }
        }
    }

    pub fn message(&self, locale: Locale) -> String {
        match (self, locale) {
            (Self::DesiredUpdated { on: true }, Locale::En) => "Light on (desired)".to_string(),
            (Self::DesiredUpdated { on: false }, Locale::En) => "Light off (desired)".to_string(),
            (Self::DesiredUpdated { on: true }, Locale::PtBr) => "Luz ligada (desired)".to_string(),
            (Self::DesiredUpdated { on: false }, Locale::PtBr) => {
                "Luz desligada (desired)".to_string()
            }
            (Self::UpdateFailed, Locale::En) => "Update failed".to_string(),
            (Self::UpdateFailed, Locale::PtBr) => "Falha ao atualizar".to_string(),
            (Self::ReportedSynced, Locale::En) => "Reported state synced".to_string(),
            (Self::ReportedSynced, Locale::PtBr) => "Estado (reported) sincronizado".to_string(),
            (Self::NoReportedYet, Locale::En) => "No reported state yet".to_string(),
            (Self::NoReportedYet, Locale::PtBr) => "Ainda sem reported".to_string(),
            (Self::RefreshFailed, Locale::En) => "Query failed".to_string(),
            (Self::RefreshFailed, Locale::PtBr) => "Erro ao consultar".to_string(),
            (Self::RealtimeLost { device }, Locale::En) => {
                format!("Lost realtime updates for {}", device.display_name())
            }
            (Self::RealtimeLost { device }, Locale::PtBr) => {
                format!("Atualizações em tempo real perdidas: {}", device.display_name())
            }
        }
    }
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(kind: &NoticeKind, locale: Locale) -> Self {
        Self {
            level: kind.level(),
            message: kind.message(locale),
        }
    }
}
