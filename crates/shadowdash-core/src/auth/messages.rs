//! Provider error codes and their user-facing text.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "en")]
    En,
    #[serde(rename = "pt-br")]
    PtBr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorCode {
    InvalidCredential,
    UserNotFound,
    WrongPassword,
    EmailAlreadyInUse,
    WeakPassword,
    PopupClosedByUser,
    NetworkRequestFailed,
    TooManyRequests,
    UserDisabled,
    Other(String),
}

impl AuthErrorCode {
    /// Parse either a REST error message (`EMAIL_EXISTS`, `WEAK_PASSWORD : ...`)
    /// or a web SDK code (`auth/email-already-in-use`).
    pub fn from_provider_code(raw: &str) -> Self {
        let raw = raw.trim();
        let code = raw.split_once(" : ").map_or(raw, |(code, _)| code).trim();
        match code {
            "auth/invalid-credential" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_IDP_RESPONSE" => {
                Self::InvalidCredential
            }
            "auth/user-not-found" | "EMAIL_NOT_FOUND" => Self::UserNotFound,
            "auth/wrong-password" | "INVALID_PASSWORD" => Self::WrongPassword,
            "auth/email-already-in-use" | "EMAIL_EXISTS" => Self::EmailAlreadyInUse,
            "auth/weak-password" | "WEAK_PASSWORD" => Self::WeakPassword,
            "auth/popup-closed-by-user" => Self::PopupClosedByUser,
            "auth/network-request-failed" => Self::NetworkRequestFailed,
            "auth/too-many-requests" | "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyRequests,
            "auth/user-disabled" | "USER_DISABLED" => Self::UserDisabled,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_code(&self) -> &str {
        match self {
            Self::InvalidCredential => "auth/invalid-credential",
            Self::UserNotFound => "auth/user-not-found",
            Self::WrongPassword => "auth/wrong-password",
            Self::EmailAlreadyInUse => "auth/email-already-in-use",
            Self::WeakPassword => "auth/weak-password",
            Self::PopupClosedByUser => "auth/popup-closed-by-user",
            Self::NetworkRequestFailed => "auth/network-request-failed",
            Self::TooManyRequests => "auth/too-many-requests",
            Self::UserDisabled => "auth/user-disabled",
            Self::Other(raw) => raw,
        }
    }

    /// Unknown codes render as the raw code.
    pub fn message(&self, locale: Locale) -> String {
        let text = match (self, locale) {
            (Self::Other(raw), _) => return raw.clone(),
            (Self::InvalidCredential, Locale::En) => "Invalid credentials",
            (Self::InvalidCredential, Locale::PtBr) => "Credenciais inválidas",
            (Self::UserNotFound, Locale::En) => "User not found",
            (Self::UserNotFound, Locale::PtBr) => "Usuário não encontrado",
            (Self::WrongPassword, Locale::En) => "Wrong password",
            (Self::WrongPassword, Locale::PtBr) => "Senha incorreta",
            (Self::EmailAlreadyInUse, Locale::En) => "Email already registered",
            (Self::EmailAlreadyInUse, Locale::PtBr) => "Email já cadastrado",
            (Self::WeakPassword, Locale::En) => "Weak password (min. 6 chars)",
            (Self::WeakPassword, Locale::PtBr) => "Senha fraca (mín. 6 chars)",
            (Self::PopupClosedByUser, Locale::En) => "Popup closed",
            (Self::PopupClosedByUser, Locale::PtBr) => "Popup fechado",
            (Self::NetworkRequestFailed, Locale::En) => "Network failure",
            (Self::NetworkRequestFailed, Locale::PtBr) => "Falha de rede",
            (Self::TooManyRequests, Locale::En) => "Too many attempts, try again later",
            (Self::TooManyRequests, Locale::PtBr) => "Muitas tentativas, tente mais tarde",
            (Self::UserDisabled, Locale::En) => "User disabled",
            (Self::UserDisabled, Locale::PtBr) => "Usuário desativado",
        };
        text.to_string()
    }
}
