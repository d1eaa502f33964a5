#![doc = include_str!("../README.md")]

pub use vcam_capture as capture;
pub use vcam_core as core;

mod caps;
pub mod config;
mod device;
mod metrics;

pub use caps::{Capabilities, DeviceCapability, InputInfo, InputKind, VideoStandard};
pub use device::VirtualCamera;

pub mod prelude {
    pub use crate::config::DeviceConfig;
    pub use crate::metrics::{StreamMetrics, StreamSnapshot};
    pub use crate::{
        Capabilities, DeviceCapability, InputInfo, InputKind, VideoStandard, VirtualCamera,
    };
    pub use vcam_capture::prelude::*;
}
