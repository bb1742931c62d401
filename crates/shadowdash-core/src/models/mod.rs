//! Data models for shadowdash

mod device;
mod shadow;
mod value;

pub use device::{DeviceId, InvalidDeviceId, ShadowPath, ShadowSlot};
pub use shadow::{DesiredState, Principal, ReportedState, UpdatedBy};
pub use value::{merge_fields, resolve_server_timestamps, FieldValue, Fields};
