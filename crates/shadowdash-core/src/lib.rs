//! shadowdash-core - Core library for shadowdash
//!
//! This crate contains the shadow document model, the shadow store boundary,
//! the desired/reported update protocol, and the authenticated dashboard
//! session logic shared by every shadowdash interface.

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod latency;
pub mod models;
pub mod shadow;
pub mod store;
pub mod util;

pub use error::{Error, Result};
pub use models::{DesiredState, DeviceId, ReportedState, ShadowPath, ShadowSlot};
