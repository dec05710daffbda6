//! Scriptable sensor for frame cache and registry tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::{Error, Result};

use super::{PixelFormat, Sensor, SensorControl, SensorFrame, SensorVariant};

/// Test sensor: every capture yields a distinct payload carrying a counter
pub struct MockSensor {
    pub captures: AtomicU32,
    pub variant: SensorVariant,
    pub emit_format: PixelFormat,
    pub fail_capture: AtomicBool,
    controls: Mutex<HashMap<SensorControl, i32>>,
    flash_pin: AtomicBool,
}

impl MockSensor {
    pub fn new() -> Self {
        Self {
            captures: AtomicU32::new(0),
            variant: SensorVariant::Standard,
            emit_format: PixelFormat::Jpeg,
            fail_capture: AtomicBool::new(false),
            controls: Mutex::new(HashMap::new()),
            flash_pin: AtomicBool::new(false),
        }
    }

    pub fn alternate() -> Self {
        Self {
            variant: SensorVariant::Alternate,
            ..Self::new()
        }
    }

    pub fn non_jpeg() -> Self {
        Self {
            emit_format: PixelFormat::Other,
            ..Self::new()
        }
    }

    pub fn capture_count(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn flash_pin(&self) -> bool {
        self.flash_pin.load(Ordering::SeqCst)
    }

    pub fn control(&self, control: SensorControl) -> Option<i32> {
        self.controls.lock().unwrap().get(&control).copied()
    }
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for MockSensor {
    fn init(&self) -> Result<SensorVariant> {
        Ok(self.variant)
    }

    fn reinit(&self) -> Result<SensorVariant> {
        self.controls.lock().unwrap().clear();
        Ok(self.variant)
    }

    fn capture(&self) -> Result<SensorFrame> {
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(Error::Sensor("mock capture failure".into()));
        }
        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(format!("frame-{}", n).as_bytes());
        Ok(SensorFrame {
            data: Bytes::from(data),
            format: self.emit_format,
        })
    }

    fn set(&self, control: SensorControl, value: i32) -> Result<()> {
        self.controls.lock().unwrap().insert(control, value);
        Ok(())
    }

    fn get(&self, control: SensorControl) -> Result<i32> {
        Ok(self
            .controls
            .lock()
            .unwrap()
            .get(&control)
            .copied()
            .unwrap_or(0))
    }

    fn set_flash_pin(&self, on: bool) -> Result<()> {
        self.flash_pin.store(on, Ordering::SeqCst);
        Ok(())
    }
}
