//! VN-100 driver session
//!
//! [`Vn100::initialize`] brings the device from an unknown state to a
//! configured, idle one. [`Vn100::start`] and [`Vn100::stop`] then toggle
//! asynchronous output. Configuration writes are only issued while no
//! frame listener is registered, so they never race the SDK's I/O thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::{normalize, DeviceConfig, NormalizedRates};
use crate::diagnostics::Diagnostics;
use crate::error::{ensure, Result, Vn100Error};
use crate::pipeline::FramePipeline;
use crate::publish::Publisher;
use crate::registry::{self, SharedPipeline};
use crate::sdk::*;
use crate::translate::SensorReading;

/// Baud rate the device is first contacted at
pub const BOOTSTRAP_BAUD_RATE: u32 = 115_200;

/// Time the device needs to apply a baud-rate change
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

const HARDWARE_ID_PREFIX: &str = "vn100-";

/// Output state of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Configured, no listener registered
    Idle,
    StreamingBinary,
    StreamingText,
    /// Streaming was stopped; device powered but silent
    Muted,
}

impl StreamState {
    pub fn is_streaming(self) -> bool {
        matches!(self, StreamState::StreamingBinary | StreamState::StreamingText)
    }
}

/// Identity registers read during initialization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub model_number: String,
    pub hardware_revision: i32,
    pub serial_number: String,
    pub firmware_version: String,
}

impl DeviceIdentity {
    /// Key handed to the diagnostics sink
    pub fn hardware_id(&self) -> String {
        format!("{}{}{}", HARDWARE_ID_PREFIX, self.model_number, self.serial_number)
    }
}

/// One driver session owning one device handle
pub struct Vn100<S: Vn100Sdk> {
    sdk: S,
    config: DeviceConfig,
    rates: NormalizedRates,
    pipeline: SharedPipeline,
    identity: Option<DeviceIdentity>,
    state: StreamState,
    settle_delay: Duration,
    connected: bool,
    initialized: bool,
    /// A fatal error hit a stream operation; `initialize()` must run again
    faulted: bool,
}

impl<S: Vn100Sdk> Vn100<S> {
    /// Create a session without touching the device.
    ///
    /// Call [`initialize`](Self::initialize) before streaming.
    pub fn new<P, D>(sdk: S, config: DeviceConfig, publisher: P, diagnostics: D) -> Self
    where
        P: Publisher + 'static,
        D: Diagnostics + 'static,
    {
        let rates = normalize(&config);
        let pipeline = FramePipeline::new(&config, Box::new(publisher), Box::new(diagnostics));

        Self {
            sdk,
            config,
            rates,
            pipeline: Arc::new(Mutex::new(pipeline)),
            identity: None,
            state: StreamState::Idle,
            settle_delay: SETTLE_DELAY,
            connected: false,
            initialized: false,
            faulted: false,
        }
    }

    /// Create a session and run the configuration sequence
    pub fn open<P, D>(sdk: S, config: DeviceConfig, publisher: P, diagnostics: D) -> Result<Self>
    where
        P: Publisher + 'static,
        D: Diagnostics + 'static,
    {
        let mut driver = Self::new(sdk, config, publisher, diagnostics);
        driver.initialize()?;
        Ok(driver)
    }

    /// Override the wait applied around baud-rate changes
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    fn pipeline(&self) -> MutexGuard<'_, FramePipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the configuration. Takes effect on the next `initialize()`.
    pub fn set_config(&mut self, config: DeviceConfig) -> Result<()> {
        if self.state.is_streaming() {
            return Err(Vn100Error::InvalidState(
                "cannot change configuration while streaming".to_string(),
            ));
        }
        self.config = config;
        self.initialized = false;
        Ok(())
    }

    /// Run the configuration sequence.
    ///
    /// Connects at the bootstrap baud rate, switches the device to the
    /// configured baud rate and reconnects, idles the device, reads its
    /// identity, programs sync-out, and finally opens one channel per
    /// enabled quantity. A fatal SDK error aborts the sequence and leaves
    /// the device in whatever state the failed call produced.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state.is_streaming() {
            return Err(Vn100Error::InvalidState(
                "cannot initialize while streaming".to_string(),
            ));
        }

        self.initialized = false;
        self.rates = normalize(&self.config);
        self.pipeline().reconfigure(&self.config);

        let port = self.config.port.clone();
        let baud_rate = self.config.baud_rate;

        if self.connected {
            debug!("Closing the previous link");
            if let Err(code) = self.sdk.disconnect() {
                warn!("VN: disconnect returned {}, continuing", code);
            }
            self.connected = false;
            thread::sleep(self.settle_delay);
        }

        debug!("Connecting to device");
        ensure("connect", self.sdk.connect(&port, BOOTSTRAP_BAUD_RATE))?;
        self.connected = true;
        thread::sleep(self.settle_delay);
        info!("Connected to device at {}", port);

        if let Some(old) = ensure("get serial baud rate", self.sdk.serial_baud_rate())? {
            info!("Default serial baudrate: {}", old);
        }

        info!("Set serial baudrate to {}", baud_rate);
        ensure("set serial baud rate", self.sdk.set_serial_baud_rate(baud_rate, true))?;

        debug!("Disconnecting the device");
        if let Err(code) = self.sdk.disconnect() {
            warn!("VN: disconnect returned {}, continuing", code);
        }
        self.connected = false;
        thread::sleep(self.settle_delay);

        debug!("Reconnecting to device");
        ensure("connect", self.sdk.connect(&port, baud_rate))?;
        self.connected = true;
        thread::sleep(self.settle_delay);
        info!("Connected to device at {}", port);

        if let Some(new) = ensure("get serial baud rate", self.sdk.serial_baud_rate())? {
            info!("New serial baudrate: {}", new);
        }

        // Some firmware rejects register writes while streaming
        ensure("pause async outputs", self.sdk.pause_async_outputs(true))?;

        let identity = self.read_identity()?;

        if let Some(sync_out) = self.rates.sync_out {
            info!("Set Synchronization Control Register (id:32).");
            let control = SynchronizationControl {
                sync_in_mode: SyncInMode::Count,
                sync_in_edge: SyncInEdge::Rising,
                sync_in_skip_factor: 0,
                sync_out_mode: SyncOutMode::ImuStart,
                sync_out_polarity: SyncOutPolarity::Positive,
                sync_out_skip_factor: sync_out.skip_count,
                sync_out_pulse_width: self.rates.sync_out_pulse_width_us,
            };
            ensure(
                "set synchronization control",
                self.sdk.set_synchronization_control(&control, true),
            )?;

            if !self.config.binary_output {
                info!("Set Communication Protocol Control Register (id:30).");
                let control = CommunicationProtocolControl {
                    serial_count: SerialCount::SyncOutCount,
                    serial_status: SerialStatus::Off,
                    spi_count: SpiCount::None,
                    spi_status: SpiStatus::Off,
                    serial_checksum: Checksum::Checksum8Bit,
                    spi_checksum: Checksum::Checksum8Bit,
                    error_mode: ErrorMode::Send,
                };
                ensure(
                    "set communication protocol control",
                    self.sdk.set_communication_protocol_control(&control, true),
                )?;
            }
        }

        let hardware_id = identity.hardware_id();
        self.pipeline().open_channels(&hardware_id, &self.rates)?;

        self.identity = Some(identity);
        self.state = StreamState::Idle;
        self.initialized = true;
        self.faulted = false;
        Ok(())
    }

    fn read_identity(&mut self) -> Result<DeviceIdentity> {
        info!("Fetching device info.");
        let mut buffer = [0u8; IDENTITY_BUFFER_LEN];

        ensure("get model number", self.sdk.model_number(&mut buffer))?;
        let model_number = buffer_to_string(&buffer);
        info!("Model number: {}", model_number);

        let hardware_revision =
            ensure("get hardware revision", self.sdk.hardware_revision())?.unwrap_or_default();
        info!("Hardware revision: {}", hardware_revision);

        buffer.fill(0);
        ensure("get serial number", self.sdk.serial_number(&mut buffer))?;
        let serial_number = buffer_to_string(&buffer);
        info!("Serial number: {}", serial_number);

        buffer.fill(0);
        ensure("get firmware version", self.sdk.firmware_version(&mut buffer))?;
        let firmware_version = buffer_to_string(&buffer);
        info!("Firmware version: {}", firmware_version);

        Ok(DeviceIdentity {
            model_number,
            hardware_revision,
            serial_number,
            firmware_version,
        })
    }

    fn check_ready(&self) -> Result<()> {
        if self.faulted {
            return Err(Vn100Error::ReinitializeRequired);
        }
        if !self.initialized {
            return Err(Vn100Error::InvalidState("device is not initialized".to_string()));
        }
        Ok(())
    }

    /// Record a fatal error from a stream operation: frames stop being
    /// routed and the session refuses further stream operations.
    fn track_fatal<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(Vn100Error::Device { operation, code }) = &result {
            warn!("Fatal error during {} ({}), stream terminated", operation, code);
            registry::unregister(self.sdk.handle());
            self.state = StreamState::Idle;
            self.faulted = true;
        }
        result
    }

    /// Start output.
    ///
    /// With `async_output` the device streams binary or text frames at the
    /// normalized rate and every frame is published from the SDK's
    /// callback. Without it a single sample is requested and published.
    pub fn start(&mut self, async_output: bool) -> Result<()> {
        self.check_ready()?;
        if self.state.is_streaming() {
            return Err(Vn100Error::InvalidState("already streaming".to_string()));
        }

        if async_output {
            let result = self.start_async();
            self.track_fatal(result)
        } else {
            self.request_once().map(|_| ())
        }
    }

    fn start_async(&mut self) -> Result<()> {
        ensure("pause async outputs", self.sdk.pause_async_outputs(true))?;
        ensure(
            "set async data output type",
            self.sdk.set_async_data_output_type(AsyncOutputType::Off, true),
        )?;

        if self.config.binary_output {
            let output = BinaryOutputConfig {
                async_mode: BinaryAsyncMode::Serial2,
                rate_divisor: self.rates.rate_divisor(),
                group1: BinaryGroup1::QTN
                    | BinaryGroup1::IMU
                    | BinaryGroup1::MAG_PRES
                    | BinaryGroup1::SYNC_IN_CNT,
                group3: BinaryGroup3::empty(),
                group5: BinaryGroup5::empty(),
            };
            ensure(
                "set binary output 1 configuration",
                self.sdk.set_binary_output_1_configuration(&output, true),
            )?;
        } else {
            ensure(
                "set async data output type",
                self.sdk.set_async_data_output_type(AsyncOutputType::VnImu, true),
            )?;
        }

        // Route before the SDK can deliver the first frame
        registry::register(self.sdk.handle(), Arc::clone(&self.pipeline));
        ensure(
            "register async data listener",
            self.sdk.register_async_data_listener(registry::dispatch),
        )?;

        info!("Setting IMU rate to {}", self.rates.imu_rate);
        ensure(
            "set async data output frequency",
            self.sdk.set_async_data_output_frequency(self.rates.imu_rate, true),
        )?;

        ensure("resume async outputs", self.sdk.resume_async_outputs(true))?;

        self.state = if self.config.binary_output {
            StreamState::StreamingBinary
        } else {
            StreamState::StreamingText
        };
        Ok(())
    }

    /// Mute the device: disable async output and drop the frame listener.
    pub fn stop(&mut self) -> Result<()> {
        self.check_ready()?;
        if !self.state.is_streaming() {
            return Err(Vn100Error::InvalidState("not streaming".to_string()));
        }
        let result = self.stop_async();
        self.track_fatal(result)
    }

    fn stop_async(&mut self) -> Result<()> {
        ensure("pause async outputs", self.sdk.pause_async_outputs(true))?;

        debug!("Mute the device");
        ensure(
            "set async data output type",
            self.sdk.set_async_data_output_type(AsyncOutputType::Off, true),
        )?;
        ensure(
            "unregister async data listener",
            self.sdk.unregister_async_data_listener(registry::dispatch),
        )?;
        registry::unregister(self.sdk.handle());

        ensure("resume async outputs", self.sdk.resume_async_outputs(true))?;

        self.pipeline().flush();
        self.state = StreamState::Muted;
        Ok(())
    }

    /// Request one sample with a blocking read and publish it.
    ///
    /// Returns `None` if the read failed with a recoverable code.
    pub fn request_once(&mut self) -> Result<Option<SensorReading>> {
        self.check_ready()?;
        if self.state.is_streaming() {
            return Err(Vn100Error::InvalidState(
                "one-shot read while streaming".to_string(),
            ));
        }

        let result = self.read_once();
        self.track_fatal(result)
    }

    fn read_once(&mut self) -> Result<Option<SensorReading>> {
        ensure("pause async outputs", self.sdk.pause_async_outputs(true))?;
        let data = ensure("read composite data", self.sdk.read_composite())?;
        let reading = data.map(|data| self.pipeline().handle_frame(&data, Utc::now()));
        ensure("resume async outputs", self.sdk.resume_async_outputs(true))?;
        Ok(reading)
    }

    /// Pause async outputs without changing the output configuration
    pub fn idle(&mut self, wait_for_response: bool) -> Result<()> {
        ensure("pause async outputs", self.sdk.pause_async_outputs(wait_for_response))?;
        Ok(())
    }

    pub fn resume(&mut self, wait_for_response: bool) -> Result<()> {
        ensure("resume async outputs", self.sdk.resume_async_outputs(wait_for_response))?;
        Ok(())
    }

    /// Reset volatile registers and close the link
    pub fn disconnect(&mut self) -> Result<()> {
        registry::unregister(self.sdk.handle());
        self.state = StreamState::Idle;
        self.initialized = false;

        ensure("reset", self.sdk.reset())?;
        ensure("disconnect", self.sdk.disconnect())?;
        self.connected = false;
        Ok(())
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn rates(&self) -> &NormalizedRates {
        &self.rates
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn hardware_id(&self) -> Option<String> {
        self.identity.as_ref().map(DeviceIdentity::hardware_id)
    }

    /// Normalized sync-out rate, 0 when disabled
    pub fn sync_out_rate(&self) -> u32 {
        self.rates.sync_out_rate()
    }

    /// Last observed sync-in counter
    pub fn sync_count(&self) -> u32 {
        self.pipeline().sync().count()
    }

    /// Time the sync-in counter last changed
    pub fn sync_time(&self) -> Option<DateTime<Utc>> {
        self.pipeline().sync().time()
    }

    /// Frames published since the session was created
    pub fn frames(&self) -> u64 {
        self.pipeline().frames()
    }

    pub fn sdk(&self) -> &S {
        &self.sdk
    }
}

impl<S: Vn100Sdk> Drop for Vn100<S> {
    fn drop(&mut self) {
        registry::unregister(self.sdk.handle());
        if self.connected {
            let _ = self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::TickRecorder;
    use crate::error::VnErrorCode;
    use crate::publish::{Channels, Message, PublishError, Topic};
    use crate::sim::{SdkCall, SdkOp, SimIdentity, SimProbe, SimulatedVn100, FACTORY_BAUD_RATE};
    use std::time::Instant;

    #[derive(Default)]
    struct Capture {
        advertised: Vec<Topic>,
        messages: Vec<Message>,
    }

    impl Publisher for Capture {
        fn advertise(&mut self, topic: Topic) -> std::result::Result<(), PublishError> {
            self.advertised.push(topic);
            Ok(())
        }

        fn publish(&mut self, message: &Message) -> std::result::Result<(), PublishError> {
            self.messages.push(message.clone());
            Ok(())
        }
    }

    struct Harness {
        driver: Vn100<SimulatedVn100>,
        probe: SimProbe,
        capture: Arc<Mutex<Capture>>,
        recorder: Arc<Mutex<TickRecorder>>,
    }

    fn harness(config: DeviceConfig) -> Harness {
        let sim = SimulatedVn100::with_identity(SimIdentity {
            model_number: "VN-100T".to_string(),
            hardware_revision: 2,
            serial_number: "0100012345".to_string(),
            firmware_version: "2.1.0.0".to_string(),
        });
        let probe = sim.probe();
        let capture = Arc::new(Mutex::new(Capture::default()));
        let recorder = Arc::new(Mutex::new(TickRecorder::new()));
        let driver = Vn100::new(sim, config, capture.clone(), recorder.clone())
            .with_settle_delay(Duration::ZERO);

        Harness {
            driver,
            probe,
            capture,
            recorder,
        }
    }

    fn fast_config() -> DeviceConfig {
        DeviceConfig {
            baud_rate: 921_600,
            ..DeviceConfig::default()
        }
    }

    fn frame(sync_in_cnt: u32) -> CompositeData {
        CompositeData {
            quaternion: VnQuaternion {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 1.0,
            },
            acceleration_uncompensated: VnVector3::new(0.1, 0.2, -9.8),
            angular_rate_uncompensated: VnVector3::new(0.01, 0.02, 0.03),
            magnetic: VnVector3::new(0.2, 0.0, 0.4),
            pressure: 101.3,
            temperature: 22.5,
            sync_in_cnt,
            ..CompositeData::default()
        }
    }

    const INIT_PREFIX: [SdkOp; 11] = [
        SdkOp::Connect,
        SdkOp::GetSerialBaudRate,
        SdkOp::SetSerialBaudRate,
        SdkOp::Disconnect,
        SdkOp::Connect,
        SdkOp::GetSerialBaudRate,
        SdkOp::PauseAsyncOutputs,
        SdkOp::GetModelNumber,
        SdkOp::GetHardwareRevision,
        SdkOp::GetSerialNumber,
        SdkOp::GetFirmwareVersion,
    ];

    #[test]
    fn test_initialize_sequence_binary() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();

        let mut expected = INIT_PREFIX.to_vec();
        expected.push(SdkOp::SetSynchronizationControl);
        assert_eq!(h.probe.ops(), expected);

        let calls = h.probe.calls();
        assert_eq!(
            calls[0],
            SdkCall::Connect {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: BOOTSTRAP_BAUD_RATE
            }
        );
        assert_eq!(calls[2], SdkCall::SetSerialBaudRate { baud_rate: 921_600 });
        assert_eq!(
            calls[4],
            SdkCall::Connect {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 921_600
            }
        );
        assert_eq!(
            calls[11],
            SdkCall::SetSynchronizationControl(SynchronizationControl {
                sync_in_mode: SyncInMode::Count,
                sync_in_edge: SyncInEdge::Rising,
                sync_in_skip_factor: 0,
                sync_out_mode: SyncOutMode::ImuStart,
                sync_out_polarity: SyncOutPolarity::Positive,
                sync_out_skip_factor: 39,
                sync_out_pulse_width: 500_000,
            })
        );

        assert_eq!(h.probe.device_baud_rate(), 921_600);
        assert_eq!(h.driver.state(), StreamState::Idle);
    }

    #[test]
    fn test_initialize_text_mode_sets_protocol_control() {
        let mut h = harness(DeviceConfig {
            binary_output: false,
            ..fast_config()
        });
        h.driver.initialize().unwrap();

        let calls = h.probe.calls();
        assert_eq!(calls.len(), INIT_PREFIX.len() + 2);
        assert_eq!(
            calls.last(),
            Some(&SdkCall::SetCommunicationProtocolControl(CommunicationProtocolControl {
                serial_count: SerialCount::SyncOutCount,
                serial_status: SerialStatus::Off,
                spi_count: SpiCount::None,
                spi_status: SpiStatus::Off,
                serial_checksum: Checksum::Checksum8Bit,
                spi_checksum: Checksum::Checksum8Bit,
                error_mode: ErrorMode::Send,
            }))
        );
    }

    #[test]
    fn test_initialize_without_sync_out_skips_sync_registers() {
        let mut h = harness(DeviceConfig {
            sync_out_rate: 0,
            binary_output: false,
            ..fast_config()
        });
        h.driver.initialize().unwrap();

        assert_eq!(h.probe.ops(), INIT_PREFIX.to_vec());
        assert_eq!(h.driver.sync_out_rate(), 0);
    }

    #[test]
    fn test_identity_and_hardware_id() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();

        let identity = h.driver.identity().unwrap();
        assert_eq!(identity.model_number, "VN-100T");
        assert_eq!(identity.hardware_revision, 2);
        assert_eq!(identity.firmware_version, "2.1.0.0");
        assert_eq!(h.driver.hardware_id().as_deref(), Some("vn100-VN-100T0100012345"));
        assert_eq!(h.recorder.lock().unwrap().hardware_id(), "vn100-VN-100T0100012345");
    }

    #[test]
    fn test_initialize_opens_enabled_channels() {
        let mut h = harness(DeviceConfig {
            enable_mag: false,
            enable_temp: false,
            ..fast_config()
        });
        h.driver.initialize().unwrap();

        assert_eq!(h.capture.lock().unwrap().advertised, vec![Topic::Imu, Topic::Pressure]);
        let recorder = h.recorder.lock().unwrap();
        assert!(recorder.topic(Topic::Imu).is_some());
        assert!(recorder.topic(Topic::Pressure).is_some());
        assert!(recorder.topic(Topic::MagneticField).is_none());
    }

    #[test]
    fn test_fatal_connect_aborts() {
        let mut h = harness(fast_config());
        h.probe.fail_on(SdkOp::Connect, VnErrorCode::PermissionDenied);

        let err = h.driver.initialize().unwrap_err();
        assert!(matches!(
            err,
            Vn100Error::Device {
                code: VnErrorCode::PermissionDenied,
                ..
            }
        ));
        assert_eq!(h.probe.ops(), vec![SdkOp::Connect]);
        assert!(h.capture.lock().unwrap().advertised.is_empty());
    }

    #[test]
    fn test_fatal_mid_sequence_leaves_partial_state() {
        let mut h = harness(fast_config());
        h.probe.fail_on(SdkOp::GetModelNumber, VnErrorCode::NotConnected);

        assert!(h.driver.initialize().is_err());
        assert_eq!(h.probe.ops().last(), Some(&SdkOp::GetModelNumber));
        // No rollback: the new baud rate stays applied
        assert_eq!(h.probe.device_baud_rate(), 921_600);
        assert!(matches!(h.driver.start(true), Err(Vn100Error::InvalidState(_))));
    }

    #[test]
    fn test_recoverable_errors_do_not_abort() {
        let mut h = harness(fast_config());
        h.probe.fail_on(SdkOp::GetSerialBaudRate, VnErrorCode::Timeout);
        h.probe.fail_on(SdkOp::GetSerialNumber, VnErrorCode::InvalidValue);
        h.probe.fail_on(SdkOp::GetHardwareRevision, VnErrorCode::Other(1234));

        h.driver.initialize().unwrap();

        let identity = h.driver.identity().unwrap();
        assert_eq!(identity.serial_number, "");
        assert_eq!(identity.hardware_revision, 0);
        assert_eq!(h.driver.hardware_id().as_deref(), Some("vn100-VN-100T"));
    }

    #[test]
    fn test_settle_delays_applied() {
        let mut h = harness(fast_config());
        h.driver.settle_delay = Duration::from_millis(20);

        let started = Instant::now();
        h.driver.initialize().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_start_binary_sequence() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.probe.clear_calls();

        h.driver.start(true).unwrap();

        assert_eq!(
            h.probe.calls(),
            vec![
                SdkCall::PauseAsyncOutputs,
                SdkCall::SetAsyncDataOutputType(AsyncOutputType::Off),
                SdkCall::SetBinaryOutput1Configuration(BinaryOutputConfig {
                    async_mode: BinaryAsyncMode::Serial2,
                    rate_divisor: 8,
                    group1: BinaryGroup1::from_bits_retain(0x2610),
                    group3: BinaryGroup3::empty(),
                    group5: BinaryGroup5::empty(),
                }),
                SdkCall::RegisterAsyncDataListener,
                SdkCall::SetAsyncDataOutputFrequency(100),
                SdkCall::ResumeAsyncOutputs,
            ]
        );
        assert_eq!(h.driver.state(), StreamState::StreamingBinary);
        assert!(registry::is_registered(h.probe.handle()));
    }

    #[test]
    fn test_start_text_sequence() {
        let mut h = harness(DeviceConfig {
            binary_output: false,
            imu_rate: 50,
            ..fast_config()
        });
        h.driver.initialize().unwrap();
        h.probe.clear_calls();

        h.driver.start(true).unwrap();

        assert_eq!(
            h.probe.calls(),
            vec![
                SdkCall::PauseAsyncOutputs,
                SdkCall::SetAsyncDataOutputType(AsyncOutputType::Off),
                SdkCall::SetAsyncDataOutputType(AsyncOutputType::VnImu),
                SdkCall::RegisterAsyncDataListener,
                SdkCall::SetAsyncDataOutputFrequency(50),
                SdkCall::ResumeAsyncOutputs,
            ]
        );
        assert_eq!(h.driver.state(), StreamState::StreamingText);
    }

    #[test]
    fn test_stop_mutes_device() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.driver.start(true).unwrap();
        h.probe.clear_calls();

        h.driver.stop().unwrap();

        assert_eq!(
            h.probe.ops(),
            vec![
                SdkOp::PauseAsyncOutputs,
                SdkOp::SetAsyncDataOutputType,
                SdkOp::UnregisterAsyncDataListener,
                SdkOp::ResumeAsyncOutputs,
            ]
        );
        assert_eq!(h.driver.state(), StreamState::Muted);
        assert!(!registry::is_registered(h.probe.handle()));
        assert!(!h.probe.emit(&frame(0)));
        assert!(h.capture.lock().unwrap().messages.is_empty());

        // Muted sessions can stream again
        h.driver.start(true).unwrap();
        assert_eq!(h.driver.state(), StreamState::StreamingBinary);
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.driver.start(true).unwrap();

        assert!(matches!(h.driver.start(true), Err(Vn100Error::InvalidState(_))));
        assert!(matches!(h.driver.initialize(), Err(Vn100Error::InvalidState(_))));
        assert!(matches!(
            h.driver.set_config(DeviceConfig::default()),
            Err(Vn100Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_start_before_initialize_rejected() {
        let mut h = harness(fast_config());
        assert!(matches!(h.driver.start(true), Err(Vn100Error::InvalidState(_))));
        assert!(h.probe.calls().is_empty());
    }

    #[test]
    fn test_end_to_end_binary_frame() {
        let mut h = harness(DeviceConfig {
            imu_rate: 100,
            sync_out_rate: 20,
            binary_output: true,
            enable_mag: true,
            enable_pres: true,
            enable_temp: true,
            ..fast_config()
        });
        h.driver.initialize().unwrap();
        h.driver.start(true).unwrap();
        assert_eq!(h.driver.state(), StreamState::StreamingBinary);
        assert_eq!(h.driver.sync_count(), crate::sync::SYNC_COUNT_UNSET);

        assert!(h.probe.emit(&frame(4)));

        let capture = h.capture.lock().unwrap();
        let topics: Vec<Topic> = capture.messages.iter().map(Message::topic).collect();
        assert_eq!(
            topics,
            vec![Topic::Imu, Topic::MagneticField, Topic::Pressure, Topic::Temperature]
        );
        let stamp = capture.messages[0].header().stamp;
        for message in &capture.messages {
            assert_eq!(message.header().stamp, stamp);
            assert_eq!(message.header().frame_id, "imu");
        }
        match &capture.messages[0] {
            Message::Imu(imu) => {
                assert!(imu.orientation.is_some());
                assert_eq!(imu.angular_velocity.z, -9.8);
                assert_eq!(imu.linear_acceleration.z, 0.03);
            }
            other => panic!("expected IMU message, got {:?}", other),
        }
        drop(capture);

        let recorder = h.recorder.lock().unwrap();
        for topic in Channels::all().topics() {
            assert_eq!(recorder.ticks(topic), 1, "{}", topic);
        }
        assert_eq!(recorder.updates(), 1);
        drop(recorder);

        assert_eq!(h.driver.sync_count(), 4);
        assert_eq!(h.driver.sync_time(), Some(stamp));
        assert_eq!(h.driver.frames(), 1);
    }

    #[test]
    fn test_fatal_during_start_requires_reinitialize() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.probe.fail_on(SdkOp::SetAsyncDataOutputFrequency, VnErrorCode::NotConnected);

        assert!(matches!(h.driver.start(true), Err(Vn100Error::Device { .. })));
        assert!(!registry::is_registered(h.probe.handle()));
        assert!(matches!(h.driver.start(true), Err(Vn100Error::ReinitializeRequired)));
        assert!(matches!(h.driver.stop(), Err(Vn100Error::ReinitializeRequired)));

        h.probe.clear_failures();
        h.driver.initialize().unwrap();
        h.driver.start(true).unwrap();
        assert!(h.driver.is_streaming());
    }

    #[test]
    fn test_recoverable_during_start_keeps_streaming() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.probe.fail_on(SdkOp::SetBinaryOutput1Configuration, VnErrorCode::SensorInvalidParameter);

        h.driver.start(true).unwrap();
        assert_eq!(h.driver.state(), StreamState::StreamingBinary);
    }

    #[test]
    fn test_one_shot_read() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.probe.clear_calls();

        h.driver.start(false).unwrap();

        assert_eq!(
            h.probe.ops(),
            vec![
                SdkOp::PauseAsyncOutputs,
                SdkOp::ReadComposite,
                SdkOp::ResumeAsyncOutputs
            ]
        );
        assert_eq!(h.driver.state(), StreamState::Idle);
        assert_eq!(h.capture.lock().unwrap().messages.len(), 4);

        let reading = h.driver.request_once().unwrap().unwrap();
        assert!(reading.orientation.is_some());
        assert_eq!(h.driver.frames(), 2);
    }

    #[test]
    fn test_disconnect_resets_then_closes() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.driver.start(true).unwrap();
        h.probe.clear_calls();

        h.driver.disconnect().unwrap();

        assert_eq!(h.probe.ops(), vec![SdkOp::Reset, SdkOp::Disconnect]);
        assert!(!h.probe.is_connected());
        assert!(!registry::is_registered(h.probe.handle()));
        assert_eq!(h.driver.state(), StreamState::Idle);
    }

    #[test]
    fn test_drop_disconnects() {
        let h = harness(fast_config());
        let Harness { mut driver, probe, .. } = h;
        driver.initialize().unwrap();
        drop(driver);

        assert!(!probe.is_connected());
        assert_eq!(probe.ops().last(), Some(&SdkOp::Disconnect));
    }

    #[test]
    fn test_reinitialize_with_new_config() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();

        h.driver
            .set_config(DeviceConfig {
                imu_rate: 250,
                ..fast_config()
            })
            .unwrap();
        assert!(matches!(h.driver.start(true), Err(Vn100Error::InvalidState(_))));

        h.driver.initialize().unwrap();
        assert_eq!(h.driver.rates().imu_rate, 266);
        assert_eq!(h.probe.device_baud_rate(), 921_600);
    }

    #[test]
    fn test_reinitialize_closes_previous_link() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.driver
            .set_config(DeviceConfig {
                imu_rate: 50,
                ..fast_config()
            })
            .unwrap();
        h.probe.clear_calls();

        h.driver.initialize().unwrap();

        let calls = h.probe.calls();
        assert_eq!(calls[0], SdkCall::Disconnect);
        assert_eq!(
            calls[1],
            SdkCall::Connect {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: BOOTSTRAP_BAUD_RATE
            }
        );
        let connects = calls.iter().filter(|c| c.op() == SdkOp::Connect).count();
        let disconnects = calls.iter().filter(|c| c.op() == SdkOp::Disconnect).count();
        assert_eq!(connects, disconnects);
        assert!(h.probe.is_connected());
    }

    #[test]
    fn test_first_initialize_does_not_disconnect() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        assert_eq!(h.probe.ops()[0], SdkOp::Connect);
    }

    #[test]
    fn test_reinitialize_drops_disabled_channel_tracker() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        assert!(h.recorder.lock().unwrap().topic(Topic::MagneticField).is_some());

        h.driver
            .set_config(DeviceConfig {
                enable_mag: false,
                ..fast_config()
            })
            .unwrap();
        h.driver.initialize().unwrap();

        let recorder = h.recorder.lock().unwrap();
        assert!(recorder.topic(Topic::MagneticField).is_none());
        let topics: Vec<Topic> = recorder.topics().map(|(t, _)| t).collect();
        assert_eq!(topics, vec![Topic::Imu, Topic::Pressure, Topic::Temperature]);
    }

    #[test]
    fn test_reinitialize_resets_sync_tracker() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.driver.start(true).unwrap();
        assert!(h.probe.emit(&frame(4)));
        h.driver.stop().unwrap();
        assert_eq!(h.driver.sync_count(), 4);

        h.driver.initialize().unwrap();
        assert_eq!(h.driver.sync_count(), crate::sync::SYNC_COUNT_UNSET);
        assert_eq!(h.driver.sync_time(), None);
    }

    #[test]
    fn test_stop_requires_streaming() {
        let mut h = harness(fast_config());
        h.driver.initialize().unwrap();
        h.probe.clear_calls();

        assert!(matches!(h.driver.stop(), Err(Vn100Error::InvalidState(_))));
        assert!(h.probe.calls().is_empty());
        assert_eq!(h.driver.state(), StreamState::Idle);

        h.driver.start(true).unwrap();
        h.driver.stop().unwrap();
        h.probe.clear_calls();

        assert!(matches!(h.driver.stop(), Err(Vn100Error::InvalidState(_))));
        assert!(h.probe.calls().is_empty());
        assert_eq!(h.driver.state(), StreamState::Muted);
    }

    #[test]
    fn test_factory_baud_rate_default() {
        let mut h = harness(DeviceConfig::default());
        h.driver.initialize().unwrap();
        assert_eq!(h.probe.device_baud_rate(), FACTORY_BAUD_RATE);
    }
}
