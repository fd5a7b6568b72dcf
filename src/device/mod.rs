//! Device discovery and readiness
//!
//! A device handle from the cloud session is not addressable until it has
//! signalled readiness. [`await_ready`] bounds that wait and is the only way
//! to obtain a [`ReadyDevice`]; [`DeviceRegistry`] runs it over every device
//! the session enumerates.

mod readiness;
mod registry;

pub use readiness::{ReadyDevice, await_ready};
pub use registry::{DeviceRegistry, check_capacity};
