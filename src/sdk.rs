//! Interface to the VectorNav vendor SDK
//!
//! The SDK owns the serial link, frame decoding and checksum validation.
//! This module only describes the calls the driver makes into it and the
//! register values it writes.

use bitflags::bitflags;

use crate::error::VnErrorCode;

/// Result of a single SDK call
pub type VnResult<T> = std::result::Result<T, VnErrorCode>;

/// Size of the text buffers handed to identity register reads
pub const IDENTITY_BUFFER_LEN: usize = 30;

/// Opaque identity of one connected device, passed back as the callback sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u64);

/// Three-component vector as delivered by the SDK
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VnVector3 {
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
}

impl VnVector3 {
    pub const fn new(c0: f64, c1: f64, c2: f64) -> Self {
        Self { c0, c1, c2 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VnQuaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// Composite data record: one decoded sample with every measured quantity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompositeData {
    pub quaternion: VnQuaternion,
    /// Magnetic field (Gauss)
    pub magnetic: VnVector3,
    /// Compensated acceleration (m/s^2)
    pub acceleration: VnVector3,
    /// Compensated angular rate (rad/s)
    pub angular_rate: VnVector3,
    pub acceleration_uncompensated: VnVector3,
    pub angular_rate_uncompensated: VnVector3,
    /// Temperature (C)
    pub temperature: f64,
    /// Barometric pressure (kPa)
    pub pressure: f64,
    /// Number of sync-in trigger edges seen by the device
    pub sync_in_cnt: u32,
}

/// Callback invoked from the SDK's I/O thread for every received frame.
///
/// The SDK passes no user context, only the handle of the sending device.
pub type AsyncDataListener = fn(DeviceHandle, &CompositeData);

// Synchronization control register (id 32)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncInMode {
    /// Count trigger edges
    Count,
    /// Start an IMU measurement on each edge
    Imu,
    AsyncOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncInEdge {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutMode {
    None,
    /// Pulse at the start of each IMU measurement
    ImuStart,
    ImuReady,
    Ahrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutPolarity {
    Negative,
    Positive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizationControl {
    pub sync_in_mode: SyncInMode,
    pub sync_in_edge: SyncInEdge,
    pub sync_in_skip_factor: u32,
    pub sync_out_mode: SyncOutMode,
    pub sync_out_polarity: SyncOutPolarity,
    pub sync_out_skip_factor: u32,
    pub sync_out_pulse_width: u32,
}

// Communication protocol control register (id 30)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialCount {
    None,
    SyncInCount,
    SyncInTime,
    SyncOutCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialStatus {
    Off,
    VpeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiCount {
    None,
    SyncInCount,
    SyncOutCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiStatus {
    Off,
    VpeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    Off,
    Checksum8Bit,
    Crc16Bit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    Ignore,
    Send,
    AdorOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunicationProtocolControl {
    pub serial_count: SerialCount,
    pub serial_status: SerialStatus,
    pub spi_count: SpiCount,
    pub spi_status: SpiStatus,
    pub serial_checksum: Checksum,
    pub spi_checksum: Checksum,
    pub error_mode: ErrorMode,
}

// Binary output register 1 (id 75)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryAsyncMode {
    None,
    Serial1,
    Serial2,
    Both,
}

bitflags! {
    /// Group 1 (common) field selection bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BinaryGroup1: u16 {
        const TIME_STARTUP = 0x0001;
        const TIME_GPS = 0x0002;
        const TIME_SYNC_IN = 0x0004;
        const YPR = 0x0008;
        const QTN = 0x0010;
        const ANGULAR_RATE = 0x0020;
        const POSITION = 0x0040;
        const VELOCITY = 0x0080;
        const ACCEL = 0x0100;
        const IMU = 0x0200;
        const MAG_PRES = 0x0400;
        const DELTA_THETA = 0x0800;
        const INS_STATUS = 0x1000;
        const SYNC_IN_CNT = 0x2000;
        const TIME_GPS_PPS = 0x4000;
    }
}

bitflags! {
    /// Group 3 (IMU) field selection bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BinaryGroup3: u16 {
        const UNCOMP_MAG = 0x0001;
        const UNCOMP_ACCEL = 0x0002;
        const UNCOMP_GYRO = 0x0004;
        const TEMP = 0x0008;
        const PRES = 0x0010;
        const DELTA_THETA = 0x0020;
        const DELTA_V = 0x0040;
        const MAG = 0x0080;
        const ACCEL = 0x0100;
        const ANGULAR_RATE = 0x0200;
    }
}

bitflags! {
    /// Group 5 (attitude) field selection bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BinaryGroup5: u16 {
        const VPE_STATUS = 0x0001;
        const YPR = 0x0002;
        const QUATERNION = 0x0004;
        const DCM = 0x0008;
        const MAG_NED = 0x0010;
        const ACCEL_NED = 0x0020;
        const LINEAR_ACCEL_BODY = 0x0040;
        const LINEAR_ACCEL_NED = 0x0080;
        const YPR_U = 0x0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryOutputConfig {
    pub async_mode: BinaryAsyncMode,
    /// Base-rate decimation factor
    pub rate_divisor: u32,
    pub group1: BinaryGroup1,
    pub group3: BinaryGroup3,
    pub group5: BinaryGroup5,
}

/// Async data output type register (id 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncOutputType {
    Off,
    /// Text-mode calibrated IMU measurements
    VnImu,
}

/// Calls the driver makes into the vendor SDK.
///
/// Every call is a blocking round trip to the device. Methods taking
/// `wait_for_response` block until the device acknowledges the write.
pub trait Vn100Sdk: Send {
    /// Handle the SDK passes as callback sender for this device
    fn handle(&self) -> DeviceHandle;

    fn connect(&mut self, port: &str, baud_rate: u32) -> VnResult<()>;
    fn disconnect(&mut self) -> VnResult<()>;
    /// Restore factory state of volatile registers
    fn reset(&mut self) -> VnResult<()>;

    fn serial_baud_rate(&mut self) -> VnResult<u32>;
    fn set_serial_baud_rate(&mut self, baud_rate: u32, wait_for_response: bool) -> VnResult<()>;

    /// Fill `buffer` with a NUL-terminated model number
    fn model_number(&mut self, buffer: &mut [u8]) -> VnResult<()>;
    fn hardware_revision(&mut self) -> VnResult<i32>;
    fn serial_number(&mut self, buffer: &mut [u8]) -> VnResult<()>;
    fn firmware_version(&mut self, buffer: &mut [u8]) -> VnResult<()>;

    fn pause_async_outputs(&mut self, wait_for_response: bool) -> VnResult<()>;
    fn resume_async_outputs(&mut self, wait_for_response: bool) -> VnResult<()>;

    fn set_synchronization_control(
        &mut self,
        control: &SynchronizationControl,
        wait_for_response: bool,
    ) -> VnResult<()>;
    fn set_communication_protocol_control(
        &mut self,
        control: &CommunicationProtocolControl,
        wait_for_response: bool,
    ) -> VnResult<()>;
    fn set_binary_output_1_configuration(
        &mut self,
        config: &BinaryOutputConfig,
        wait_for_response: bool,
    ) -> VnResult<()>;
    fn set_async_data_output_type(
        &mut self,
        output: AsyncOutputType,
        wait_for_response: bool,
    ) -> VnResult<()>;
    fn set_async_data_output_frequency(
        &mut self,
        frequency: u32,
        wait_for_response: bool,
    ) -> VnResult<()>;

    fn register_async_data_listener(&mut self, listener: AsyncDataListener) -> VnResult<()>;
    fn unregister_async_data_listener(&mut self, listener: AsyncDataListener) -> VnResult<()>;

    /// Blocking request for a single composite sample
    fn read_composite(&mut self) -> VnResult<CompositeData>;
}

/// Decode a NUL-terminated identity buffer
pub fn buffer_to_string(buffer: &[u8]) -> String {
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}
