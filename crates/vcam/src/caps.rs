use bitflags::bitflags;

bitflags! {
    /// Capability bits, numerically compatible with a kernel video node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const VIDEO_CAPTURE = 0x0000_0001;
        const READWRITE = 0x0100_0000;
        const STREAMING = 0x0400_0000;
        /// `device_caps` is populated.
        const DEVICE_CAPS = 0x8000_0000;
    }
}

bitflags! {
    /// Analog video standards an input accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VideoStandard: u64 {
        const PAL_M = 0x0000_0100;
        const PAL_60 = 0x0000_0800;
        const NTSC_M = 0x0000_1000;
        const NTSC_M_JP = 0x0000_2000;
        const NTSC_443 = 0x0000_4000;
        const NTSC_M_KR = 0x0000_8000;
        const NTSC = Self::NTSC_M.bits() | Self::NTSC_M_JP.bits() | Self::NTSC_M_KR.bits();
        const STD_525_60 = Self::PAL_M.bits()
            | Self::PAL_60.bits()
            | Self::NTSC.bits()
            | Self::NTSC_443.bits();
    }
}

/// Answer to a capability query.
///
/// # Example
/// ```rust
/// use vcam::prelude::*;
///
/// let cam = VirtualCamera::open(DeviceConfig::new().schedule(ScheduleMode::Manual));
/// let caps = cam.query_capabilities();
/// assert!(caps.capabilities.contains(Capabilities::STREAMING));
/// assert!(!caps.device_caps.contains(Capabilities::DEVICE_CAPS));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapability {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: u32,
    /// Capabilities of the physical device.
    pub capabilities: Capabilities,
    /// Capabilities of this node.
    pub device_caps: Capabilities,
}

impl DeviceCapability {
    pub(crate) fn new(driver: &str, card: &str, bus_info: &str, version: u32) -> Self {
        let device_caps =
            Capabilities::VIDEO_CAPTURE | Capabilities::STREAMING | Capabilities::READWRITE;
        Self {
            driver: driver.to_string(),
            card: card.to_string(),
            bus_info: bus_info.to_string(),
            version,
            capabilities: device_caps | Capabilities::DEVICE_CAPS,
            device_caps,
        }
    }
}

/// Kind of signal an input carries; this device only has camera inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InputKind {
    Camera,
}

/// One selectable input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputInfo {
    pub index: u32,
    pub name: String,
    pub kind: InputKind,
    pub std: VideoStandard,
}

/// The device exposes exactly one camera input.
pub(crate) fn input(index: u32) -> Option<InputInfo> {
    (index == 0).then(|| InputInfo {
        index,
        name: format!("Camera {index}"),
        kind: InputKind::Camera,
        std: VideoStandard::STD_525_60,
    })
}
