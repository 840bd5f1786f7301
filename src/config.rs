//! Device configuration and rate normalization
//!
//! The VN-100 produces IMU samples at a fixed base rate of 800 Hz. Output
//! and sync-out rates are obtained by decimation, so both must divide the
//! base rate. [`normalize`] reconciles the requested values once at setup.

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, Vn100Error};

/// Fixed internal sampling rate of the device (Hz)
pub const BASE_IMU_RATE: i32 = 800;
pub const DEFAULT_IMU_RATE: i32 = 100;
pub const DEFAULT_SYNC_OUT_RATE: i32 = 20;
pub const DEFAULT_PULSE_WIDTH_US: u32 = 500_000;
pub const MAX_PULSE_WIDTH_US: u32 = 10_000_000;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// User-facing driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port path
    pub port: String,
    /// Target serial baud rate, applied after connecting at 115200
    pub baud_rate: u32,
    /// Frame id stamped on every published message
    pub frame_id: String,
    /// Requested output rate (Hz)
    pub imu_rate: i32,
    /// Requested sync-out pulse rate (Hz); zero or negative disables sync out
    pub sync_out_rate: i32,
    pub sync_out_pulse_width_us: u32,
    pub enable_mag: bool,
    pub enable_pres: bool,
    pub enable_temp: bool,
    /// Binary output (true) or text output (false)
    pub binary_output: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            frame_id: "imu".to_string(),
            imu_rate: DEFAULT_IMU_RATE,
            sync_out_rate: DEFAULT_SYNC_OUT_RATE,
            sync_out_pulse_width_us: DEFAULT_PULSE_WIDTH_US,
            enable_mag: true,
            enable_pres: true,
            enable_temp: true,
            binary_output: true,
        }
    }
}

impl DeviceConfig {
    /// Load a configuration from a JSON file. Missing keys take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Vn100Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| Vn100Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// Sync-out settings derived from a positive sync-out rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOut {
    pub rate: u32,
    /// Base-rate samples skipped between pulses (decimation factor - 1)
    pub skip_count: u32,
}

/// Rates derived from a [`DeviceConfig`] by [`normalize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedRates {
    pub imu_rate: u32,
    /// `None` when sync output is disabled
    pub sync_out: Option<SyncOut>,
    pub sync_out_pulse_width_us: u32,
}

impl NormalizedRates {
    /// Sync-out rate, or 0 when disabled
    pub fn sync_out_rate(&self) -> u32 {
        self.sync_out.map_or(0, |s| s.rate)
    }

    /// Decimation factor programmed into the binary output register
    pub fn rate_divisor(&self) -> u32 {
        BASE_IMU_RATE as u32 / self.imu_rate
    }
}

/// Reconcile the requested rates and pulse width against the base rate.
///
/// Corrections are logged, never returned as errors.
pub fn normalize(config: &DeviceConfig) -> NormalizedRates {
    NormalizedRates {
        imu_rate: fix_imu_rate(config.imu_rate),
        sync_out: fix_sync_out_rate(config.sync_out_rate),
        sync_out_pulse_width_us: fix_pulse_width(config.sync_out_pulse_width_us),
    }
}

/// Note: `B / (B / R)` with integer division does not always land on a
/// divisor of the base rate (250 becomes 266). The arithmetic is kept as is.
fn fix_imu_rate(requested: i32) -> u32 {
    let mut rate = requested;
    if rate <= 0 {
        warn!("Imu rate {} is <= 0. Set to {}", rate, DEFAULT_IMU_RATE);
        rate = DEFAULT_IMU_RATE;
    }

    if rate > BASE_IMU_RATE {
        warn!("Imu rate {} exceeds base rate {}. Set to {}", rate, BASE_IMU_RATE, BASE_IMU_RATE);
        rate = BASE_IMU_RATE;
    }

    if BASE_IMU_RATE % rate != 0 {
        let old = rate;
        rate = BASE_IMU_RATE / (BASE_IMU_RATE / old);
        warn!(
            "Imu rate {} cannot evenly decimate base rate {}, reset to {}",
            old, BASE_IMU_RATE, rate
        );
    }

    rate as u32
}

fn fix_sync_out_rate(requested: i32) -> Option<SyncOut> {
    if requested <= 0 {
        return None;
    }

    let mut rate = requested.min(BASE_IMU_RATE);
    if rate != requested {
        info!("Sync out rate {} exceeds base rate. Set to {}", requested, rate);
    }

    if BASE_IMU_RATE % rate != 0 {
        rate = (f64::from(BASE_IMU_RATE) / f64::from(BASE_IMU_RATE / rate)).floor() as i32;
        info!("Set sync out rate to {}", rate);
    }

    let skip_count = (f64::from(BASE_IMU_RATE) / f64::from(rate) + 0.5).floor() as u32 - 1;

    Some(SyncOut {
        rate: rate as u32,
        skip_count,
    })
}

fn fix_pulse_width(requested_us: u32) -> u32 {
    if requested_us > MAX_PULSE_WIDTH_US {
        info!(
            "Sync out pulse width {} us is over {} us. Reset to {} us",
            requested_us, MAX_PULSE_WIDTH_US, DEFAULT_PULSE_WIDTH_US
        );
        return DEFAULT_PULSE_WIDTH_US;
    }
    requested_us
}
