//! Driver adapter for the VectorNav VN-100 IMU
//!
//! This library configures a VN-100 over its vendor SDK and republishes each
//! measurement frame as IMU, magnetic-field, pressure and temperature
//! messages, ticking a diagnostics sink once per published message.
//!
//! # Quick Start
//!
//! ## Streaming
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use vn100_driver::{DeviceConfig, OutputFormat, SimulatedVn100, TickRecorder, Vn100, WriterPublisher};
//!
//! let config = DeviceConfig {
//!     baud_rate: 921_600,
//!     imu_rate: 200,
//!     ..DeviceConfig::default()
//! };
//! let recorder = Arc::new(Mutex::new(TickRecorder::new()));
//!
//! let mut imu = Vn100::open(
//!     SimulatedVn100::new().with_generator(),
//!     config,
//!     WriterPublisher::stdout(OutputFormat::JsonLines),
//!     recorder.clone(),
//! )?;
//!
//! // Frames are published from the SDK's I/O thread until stop()
//! imu.start(true)?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! imu.stop()?;
//! # Ok::<(), vn100_driver::Vn100Error>(())
//! ```
//!
//! ## One-Shot Reads
//! ```no_run
//! use vn100_driver::{DeviceConfig, OutputFormat, SimulatedVn100, TickRecorder, Vn100, WriterPublisher};
//!
//! let mut imu = Vn100::open(
//!     SimulatedVn100::new(),
//!     DeviceConfig::default(),
//!     WriterPublisher::stdout(OutputFormat::Text),
//!     TickRecorder::new(),
//! )?;
//!
//! if let Some(reading) = imu.request_once()? {
//!     println!("Gyro Z: {:.4} rad/s", reading.angular_velocity.z);
//! }
//! # Ok::<(), vn100_driver::Vn100Error>(())
//! ```
//!
//! ## Rate Normalization
//! ```
//! use vn100_driver::{normalize, DeviceConfig};
//!
//! let rates = normalize(&DeviceConfig {
//!     imu_rate: 250,
//!     sync_out_rate: 30,
//!     ..DeviceConfig::default()
//! });
//!
//! // Only integer divisors of 800 Hz are reachable
//! assert_eq!(rates.imu_rate, 266);
//! assert_eq!(rates.sync_out_rate(), 30);
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod pipeline;
pub mod publish;
pub mod registry;
pub mod sdk;
pub mod sim;
pub mod sync;
pub mod translate;
pub mod vn100;

// Re-export public API
pub use config::{normalize, DeviceConfig, NormalizedRates, SyncOut};
pub use diagnostics::{Diagnostics, TickRecorder};
pub use error::{Result, Severity, Vn100Error, VnErrorCode};
pub use publish::{Message, OutputFormat, PublishError, Publisher, Topic, WriterPublisher};
pub use sdk::Vn100Sdk;
pub use sim::SimulatedVn100;
pub use translate::SensorReading;
pub use vn100::{DeviceIdentity, StreamState, Vn100};
