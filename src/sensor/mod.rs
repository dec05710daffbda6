//! Sensor - image sensor collaborator boundary
//!
//! ## Responsibilities
//!
//! - Trait seam for the hardware image sensor driver
//! - Control-name dispatch table (exposure, gain, white balance, ...)
//! - Software pattern sensor for hosts without camera hardware
//!
//! The actual hardware driver lives outside this crate; anything that
//! captures JPEG frames and answers the control table can be plugged in.

use bytes::Bytes;

use crate::error::Result;

pub mod pattern;

#[cfg(test)]
pub mod mock;

pub use pattern::PatternSensor;

/// Sensor silicon variant, detected at init
///
/// The alternate variant ships with different default tuning (flipped
/// mount, dimmer pipeline) and gets corrective defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorVariant {
    Standard,
    Alternate,
}

/// Pixel format of a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Jpeg,
    Other,
}

/// One captured frame, in sensor-owned memory
///
/// `data` is a refcounted handle; holding it keeps the capture alive.
#[derive(Debug, Clone)]
pub struct SensorFrame {
    pub data: Bytes,
    pub format: PixelFormat,
}

/// Hardware sensor controls, dispatched by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorControl {
    Aec,
    Aec2,
    AecValue,
    AeLevel,
    Agc,
    AgcGain,
    Awb,
    AwbGain,
    Bpc,
    Brightness,
    Colorbar,
    Contrast,
    Dcw,
    FrameSize,
    GainCeiling,
    HMirror,
    Lenc,
    Quality,
    RawGma,
    Saturation,
    Sharpness,
    SpecialEffect,
    VFlip,
    WbMode,
    Wpc,
}

impl SensorControl {
    /// Every hardware control, in `/status` field order
    pub const ALL: [SensorControl; 25] = [
        SensorControl::Aec,
        SensorControl::Aec2,
        SensorControl::AecValue,
        SensorControl::AeLevel,
        SensorControl::Agc,
        SensorControl::AgcGain,
        SensorControl::Awb,
        SensorControl::AwbGain,
        SensorControl::Bpc,
        SensorControl::Brightness,
        SensorControl::Colorbar,
        SensorControl::Contrast,
        SensorControl::Dcw,
        SensorControl::FrameSize,
        SensorControl::GainCeiling,
        SensorControl::HMirror,
        SensorControl::Lenc,
        SensorControl::Quality,
        SensorControl::RawGma,
        SensorControl::Saturation,
        SensorControl::Sharpness,
        SensorControl::SpecialEffect,
        SensorControl::VFlip,
        SensorControl::WbMode,
        SensorControl::Wpc,
    ];

    /// Wire name, as used by `/status` and `/control`
    pub fn name(&self) -> &'static str {
        match self {
            SensorControl::Aec => "aec",
            SensorControl::Aec2 => "aec2",
            SensorControl::AecValue => "aec_value",
            SensorControl::AeLevel => "ae_level",
            SensorControl::Agc => "agc",
            SensorControl::AgcGain => "agc_gain",
            SensorControl::Awb => "awb",
            SensorControl::AwbGain => "awb_gain",
            SensorControl::Bpc => "bpc",
            SensorControl::Brightness => "brightness",
            SensorControl::Colorbar => "colorbar",
            SensorControl::Contrast => "contrast",
            SensorControl::Dcw => "dcw",
            SensorControl::FrameSize => "framesize",
            SensorControl::GainCeiling => "gainceiling",
            SensorControl::HMirror => "hmirror",
            SensorControl::Lenc => "lenc",
            SensorControl::Quality => "quality",
            SensorControl::RawGma => "raw_gma",
            SensorControl::Saturation => "saturation",
            SensorControl::Sharpness => "sharpness",
            SensorControl::SpecialEffect => "special_effect",
            SensorControl::VFlip => "vflip",
            SensorControl::WbMode => "wb_mode",
            SensorControl::Wpc => "wpc",
        }
    }

    /// Parse a wire name; unknown names get `None`
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }
}

/// Image sensor driver interface
///
/// Implementations synchronize internally; the frame cache serializes
/// control access and capture access with its own locks, but the two may
/// overlap with each other.
pub trait Sensor: Send + Sync {
    /// Power up and configure the sensor; returns the detected variant
    fn init(&self) -> Result<SensorVariant>;

    /// Full reinitialization, as after `/reset`
    fn reinit(&self) -> Result<SensorVariant>;

    /// Capture one frame
    fn capture(&self) -> Result<SensorFrame>;

    /// Write one hardware control
    fn set(&self, control: SensorControl, value: i32) -> Result<()>;

    /// Read one hardware control
    fn get(&self, control: SensorControl) -> Result<i32>;

    /// Drive the flash output pin
    fn set_flash_pin(&self, on: bool) -> Result<()>;
}
