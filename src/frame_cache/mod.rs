//! FrameCache - shared "current frame" resource
//!
//! ## Responsibilities
//!
//! - Turn the rate-limited hardware capture into a shared cached frame
//! - Serialize sensor control access separately from frame access
//! - Name-dispatched control get/set, including the software-only
//!   `flash` and `fps` parameters
//!
//! Two locks guard the cache: the settings lock serializes control
//! traffic, the frame lock serializes capture and consumption. `reset`
//! is the only operation that takes both, always settings first, so no
//! lock cycle exists. `grab` returns a [`FrameGuard`]; dropping the guard
//! is the dispose step, so a consumer cannot forget to release the frame.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::sensor::{PixelFormat, Sensor, SensorControl, SensorVariant};

/// Frame cache tuning
#[derive(Debug, Clone)]
pub struct FrameCacheConfig {
    /// Default target frame rate
    pub fps_default: u32,
    /// Lower clamp for the `fps` control
    pub fps_min: u32,
    /// Upper clamp for the `fps` control
    pub fps_max: u32,
    /// Captures discarded before the first kept frame, letting the
    /// auto-exposure pipeline settle
    pub warmup_frames: u32,
}

impl Default for FrameCacheConfig {
    fn default() -> Self {
        Self {
            fps_default: 4,
            fps_min: 1,
            fps_max: 60,
            warmup_frames: 4,
        }
    }
}

/// The cached frame plus its capture bookkeeping, guarded by the frame lock
#[derive(Debug, Default)]
struct FrameSlot {
    /// Most recent kept capture
    current: Option<CachedFrame>,
    /// When the current frame was captured; `None` means never captured
    last_capture: Option<Instant>,
    /// Whether the warm-up discards have been performed
    warmed: bool,
}

#[derive(Debug, Clone)]
struct CachedFrame {
    data: Bytes,
    timestamp: Instant,
}

/// Exclusive read access to the cached frame
///
/// Holds the frame lock; dropping the guard releases it. Expected hold
/// times are microseconds, so acquisition blocks without a bound.
pub struct FrameGuard<'a> {
    _slot: MutexGuard<'a, FrameSlot>,
    data: Bytes,
    timestamp: Instant,
}

impl FrameGuard<'_> {
    /// JPEG bytes of the cached frame
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Capture timestamp (monotonic)
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

/// Frame cache service
pub struct FrameCache {
    sensor: Arc<dyn Sensor>,
    config: FrameCacheConfig,
    /// Serializes control traffic to the sensor
    settings: Mutex<()>,
    /// Guards the cached frame and capture pacing
    frame: Mutex<FrameSlot>,
    /// Snapshot fields, written only under the settings lock (or during
    /// `reset`, which also holds it); readable without any lock
    fps: AtomicU32,
    flash: AtomicBool,
    alt_variant: AtomicBool,
}

impl FrameCache {
    /// Create an uninitialized cache; call [`FrameCache::initialize`]
    /// before first use
    pub fn new(sensor: Arc<dyn Sensor>, config: FrameCacheConfig) -> Self {
        let fps_default = config.fps_default;
        Self {
            sensor,
            config,
            settings: Mutex::new(()),
            frame: Mutex::new(FrameSlot::default()),
            fps: AtomicU32::new(fps_default),
            flash: AtomicBool::new(false),
            alt_variant: AtomicBool::new(false),
        }
    }

    /// Configure the sensor and apply defaults
    pub fn initialize(&self) -> Result<()> {
        let _settings = self.lock_settings()?;
        let mut slot = self.lock_frame()?;
        self.init_sensor_locked(&mut slot, false)?;
        tracing::info!(
            fps = self.fps(),
            alt_variant = self.is_alt_variant(),
            "Frame cache initialized"
        );
        Ok(())
    }

    /// Discard cached state and fully reinitialize the sensor
    ///
    /// Takes the settings lock, then the frame lock. `ctrl_set` only takes
    /// the settings lock and `grab` only the frame lock, so this fixed
    /// order cannot deadlock against either.
    pub fn reset(&self) -> Result<()> {
        let _settings = self.lock_settings()?;
        let mut slot = self.lock_frame()?;
        slot.current = None;
        slot.last_capture = None;
        slot.warmed = false;
        self.init_sensor_locked(&mut slot, true)?;
        tracing::info!("Frame cache reset");
        Ok(())
    }

    /// Grab the current frame, refreshing it first if the frame period has
    /// elapsed since the last capture
    ///
    /// The returned guard holds the frame lock until dropped.
    pub fn grab(&self, now: Instant) -> Result<FrameGuard<'_>> {
        let mut slot = self.lock_frame()?;

        let due = match slot.last_capture {
            None => true,
            Some(last) => now.duration_since(last) >= self.frame_period(),
        };

        if due {
            // release the previous capture before taking a new one
            slot.current = None;

            if !slot.warmed {
                for _ in 0..self.config.warmup_frames {
                    let _ = self.sensor.capture()?;
                }
                slot.warmed = true;
                tracing::debug!(
                    discarded = self.config.warmup_frames,
                    "Sensor warm-up complete"
                );
            }

            let frame = self.sensor.capture()?;
            if frame.format != PixelFormat::Jpeg {
                return Err(Error::Sensor("unsupported camera pixel format".into()));
            }

            slot.current = Some(CachedFrame {
                data: frame.data,
                timestamp: now,
            });
            slot.last_capture = Some(now);
        }

        // `current` is always present past this point: either just captured
        // or left over from an earlier grab within the same period
        let cached = slot
            .current
            .clone()
            .ok_or_else(|| Error::Internal("frame cache slot empty after capture".into()))?;

        Ok(FrameGuard {
            _slot: slot,
            data: cached.data,
            timestamp: cached.timestamp,
        })
    }

    /// Apply one named control
    pub fn ctrl_set(&self, name: &str, value: i32) -> Result<()> {
        let _settings = self.lock_settings()?;

        match name {
            "flash" => {
                let on = value != 0;
                self.sensor.set_flash_pin(on)?;
                self.flash.store(on, Ordering::Release);
            }
            "fps" => {
                let clamped = (value.max(0) as u32)
                    .clamp(self.config.fps_min, self.config.fps_max);
                self.fps.store(clamped, Ordering::Release);
            }
            _ => {
                let control = SensorControl::from_name(name)
                    .ok_or_else(|| Error::Validation(format!("unknown control: {}", name)))?;
                self.sensor.set(control, value)?;
            }
        }

        tracing::info!(control = %name, value = value, "Control set");
        Ok(())
    }

    /// Read one named control
    pub fn ctrl_get(&self, name: &str) -> Result<i32> {
        match name {
            "flash" => Ok(self.flash.load(Ordering::Acquire) as i32),
            "fps" => Ok(self.fps() as i32),
            _ => {
                let control = SensorControl::from_name(name)
                    .ok_or_else(|| Error::Validation(format!("unknown control: {}", name)))?;
                let _settings = self.lock_settings()?;
                self.sensor.get(control)
            }
        }
    }

    /// All control values as a JSON object, field names verbatim
    pub fn status_json(&self) -> Result<Value> {
        let mut map = Map::new();
        {
            let _settings = self.lock_settings()?;
            for control in SensorControl::ALL {
                map.insert(control.name().into(), self.sensor.get(control)?.into());
            }
        }
        map.insert("flash".into(), (self.flash.load(Ordering::Acquire) as i32).into());
        map.insert("fps".into(), (self.fps() as i32).into());
        Ok(Value::Object(map))
    }

    /// Whether the alternate sensor variant was detected
    pub fn is_alt_variant(&self) -> bool {
        self.alt_variant.load(Ordering::Acquire)
    }

    /// Current target frame rate
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Acquire)
    }

    /// Interval between captures at the current frame rate
    pub fn frame_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps().max(1)))
    }

    /// Shared init path for `initialize` and `reset`; both locks held
    fn init_sensor_locked(&self, _slot: &mut FrameSlot, reinit: bool) -> Result<()> {
        let variant = if reinit {
            self.sensor.reinit()?
        } else {
            self.sensor.init()?
        };

        if variant == SensorVariant::Alternate {
            // corrective defaults for the alternate silicon
            self.sensor.set(SensorControl::VFlip, 1)?;
            self.sensor.set(SensorControl::Brightness, 1)?;
            self.sensor.set(SensorControl::Saturation, -2)?;
        }

        self.sensor.set_flash_pin(false)?;
        self.alt_variant
            .store(variant == SensorVariant::Alternate, Ordering::Release);
        self.flash.store(false, Ordering::Release);
        self.fps.store(self.config.fps_default, Ordering::Release);
        Ok(())
    }

    fn lock_settings(&self) -> Result<MutexGuard<'_, ()>> {
        self.settings
            .lock()
            .map_err(|_| Error::Internal("settings lock poisoned".into()))
    }

    fn lock_frame(&self) -> Result<MutexGuard<'_, FrameSlot>> {
        self.frame
            .lock()
            .map_err(|_| Error::Internal("frame lock poisoned".into()))
    }
}
