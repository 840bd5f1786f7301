//! Simulated VN-100
//!
//! An in-process stand-in for the vendor SDK and device. It records every
//! call, can be told to fail a given operation with a given code, and can
//! either deliver frames on demand ([`SimProbe::emit`]) or run a generator
//! thread that streams synthetic frames like the SDK's I/O thread does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::error::VnErrorCode;
use crate::sdk::*;

/// Baud rate the device powers up with
pub const FACTORY_BAUD_RATE: u32 = 115_200;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Kind of SDK call, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkOp {
    Connect,
    Disconnect,
    Reset,
    GetSerialBaudRate,
    SetSerialBaudRate,
    GetModelNumber,
    GetHardwareRevision,
    GetSerialNumber,
    GetFirmwareVersion,
    PauseAsyncOutputs,
    ResumeAsyncOutputs,
    SetSynchronizationControl,
    SetCommunicationProtocolControl,
    SetBinaryOutput1Configuration,
    SetAsyncDataOutputType,
    SetAsyncDataOutputFrequency,
    RegisterAsyncDataListener,
    UnregisterAsyncDataListener,
    ReadComposite,
}

/// One recorded SDK call with its arguments
#[derive(Debug, Clone, PartialEq)]
pub enum SdkCall {
    Connect { port: String, baud_rate: u32 },
    Disconnect,
    Reset,
    GetSerialBaudRate,
    SetSerialBaudRate { baud_rate: u32 },
    GetModelNumber,
    GetHardwareRevision,
    GetSerialNumber,
    GetFirmwareVersion,
    PauseAsyncOutputs,
    ResumeAsyncOutputs,
    SetSynchronizationControl(SynchronizationControl),
    SetCommunicationProtocolControl(CommunicationProtocolControl),
    SetBinaryOutput1Configuration(BinaryOutputConfig),
    SetAsyncDataOutputType(AsyncOutputType),
    SetAsyncDataOutputFrequency(u32),
    RegisterAsyncDataListener,
    UnregisterAsyncDataListener,
    ReadComposite,
}

impl SdkCall {
    pub fn op(&self) -> SdkOp {
        match self {
            SdkCall::Connect { .. } => SdkOp::Connect,
            SdkCall::Disconnect => SdkOp::Disconnect,
            SdkCall::Reset => SdkOp::Reset,
            SdkCall::GetSerialBaudRate => SdkOp::GetSerialBaudRate,
            SdkCall::SetSerialBaudRate { .. } => SdkOp::SetSerialBaudRate,
            SdkCall::GetModelNumber => SdkOp::GetModelNumber,
            SdkCall::GetHardwareRevision => SdkOp::GetHardwareRevision,
            SdkCall::GetSerialNumber => SdkOp::GetSerialNumber,
            SdkCall::GetFirmwareVersion => SdkOp::GetFirmwareVersion,
            SdkCall::PauseAsyncOutputs => SdkOp::PauseAsyncOutputs,
            SdkCall::ResumeAsyncOutputs => SdkOp::ResumeAsyncOutputs,
            SdkCall::SetSynchronizationControl(_) => SdkOp::SetSynchronizationControl,
            SdkCall::SetCommunicationProtocolControl(_) => SdkOp::SetCommunicationProtocolControl,
            SdkCall::SetBinaryOutput1Configuration(_) => SdkOp::SetBinaryOutput1Configuration,
            SdkCall::SetAsyncDataOutputType(_) => SdkOp::SetAsyncDataOutputType,
            SdkCall::SetAsyncDataOutputFrequency(_) => SdkOp::SetAsyncDataOutputFrequency,
            SdkCall::RegisterAsyncDataListener => SdkOp::RegisterAsyncDataListener,
            SdkCall::UnregisterAsyncDataListener => SdkOp::UnregisterAsyncDataListener,
            SdkCall::ReadComposite => SdkOp::ReadComposite,
        }
    }
}

/// Identity strings reported by the simulated device
#[derive(Debug, Clone)]
pub struct SimIdentity {
    pub model_number: String,
    pub hardware_revision: i32,
    pub serial_number: String,
    pub firmware_version: String,
}

impl Default for SimIdentity {
    fn default() -> Self {
        Self {
            model_number: "VN-100T-SIM".to_string(),
            hardware_revision: 1,
            serial_number: "0100000001".to_string(),
            firmware_version: "2.1.0.0".to_string(),
        }
    }
}

struct SimState {
    identity: SimIdentity,
    /// Link is open
    connected: bool,
    /// Baud rate the host side of the link runs at
    link_baud_rate: u32,
    /// Baud rate the device's serial port is set to
    device_baud_rate: u32,
    paused: bool,
    output_type: AsyncOutputType,
    binary_output: Option<BinaryOutputConfig>,
    frequency: u32,
    listener: Option<AsyncDataListener>,
    samples: u64,
    calls: Vec<SdkCall>,
    failures: HashMap<SdkOp, VnErrorCode>,
}

impl SimState {
    /// Record `call`, then apply an injected failure or the link checks
    fn begin(&mut self, call: SdkCall) -> VnResult<()> {
        let op = call.op();
        self.calls.push(call);

        if let Some(code) = self.failures.get(&op) {
            return Err(*code);
        }

        match op {
            SdkOp::Connect | SdkOp::Disconnect => Ok(()),
            _ if !self.connected => Err(VnErrorCode::NotConnected),
            _ if self.link_baud_rate != self.device_baud_rate => Err(VnErrorCode::Timeout),
            _ => Ok(()),
        }
    }

    fn is_streaming(&self) -> bool {
        let output_enabled = self.output_type != AsyncOutputType::Off
            || self
                .binary_output
                .is_some_and(|c| c.async_mode != BinaryAsyncMode::None);
        self.connected && !self.paused && self.listener.is_some() && self.frequency > 0 && output_enabled
    }

    fn next_frame(&mut self) -> CompositeData {
        let frame = synthetic_frame(self.samples, self.frequency.max(1));
        self.samples += 1;
        frame
    }
}

/// Deterministic frame for sample index `n` at `rate` Hz
fn synthetic_frame(n: u64, rate: u32) -> CompositeData {
    let t = n as f64 / f64::from(rate);
    let yaw = 0.1 * t;
    let (s, c) = (0.5 * yaw).sin_cos();

    CompositeData {
        quaternion: VnQuaternion { x: 0.0, y: 0.0, z: s, w: c },
        magnetic: VnVector3::new(0.21 * yaw.cos(), -0.21 * yaw.sin(), 0.43),
        acceleration: VnVector3::new(0.0, 0.0, -9.81),
        angular_rate: VnVector3::new(0.0, 0.0, 0.1),
        acceleration_uncompensated: VnVector3::new(0.01 * t.sin(), 0.01 * t.cos(), -9.81),
        angular_rate_uncompensated: VnVector3::new(0.002, -0.001, 0.1),
        temperature: 25.0 + 0.01 * t,
        pressure: 101.325,
        // One external trigger edge per second
        sync_in_cnt: (n / u64::from(rate)) as u32,
    }
}

fn copy_identity(buffer: &mut [u8], value: &str) {
    buffer.fill(0);
    let len = value.len().min(buffer.len().saturating_sub(1));
    buffer[..len].copy_from_slice(&value.as_bytes()[..len]);
}

struct Generator {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Read access to a simulated device after it has been moved into a driver
#[derive(Clone)]
pub struct SimProbe {
    handle: DeviceHandle,
    state: Arc<Mutex<SimState>>,
}

impl SimProbe {
    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<SdkCall> {
        self.state().calls.clone()
    }

    pub fn ops(&self) -> Vec<SdkOp> {
        self.state().calls.iter().map(SdkCall::op).collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make every later `op` call fail with `code`
    pub fn fail_on(&self, op: SdkOp, code: VnErrorCode) {
        self.state().failures.insert(op, code);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn device_baud_rate(&self) -> u32 {
        self.state().device_baud_rate
    }

    pub fn has_listener(&self) -> bool {
        self.state().listener.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.state().is_streaming()
    }

    /// Deliver `data` to the registered listener the way the SDK's I/O
    /// thread would. Returns false if no listener is registered.
    pub fn emit(&self, data: &CompositeData) -> bool {
        let listener = self.state().listener;
        match listener {
            Some(listener) => {
                listener(self.handle, data);
                true
            }
            None => false,
        }
    }
}

/// Simulated device implementing [`Vn100Sdk`]
pub struct SimulatedVn100 {
    handle: DeviceHandle,
    state: Arc<Mutex<SimState>>,
    generate: bool,
    generator: Option<Generator>,
}

impl SimulatedVn100 {
    pub fn new() -> Self {
        Self::with_identity(SimIdentity::default())
    }

    pub fn with_identity(identity: SimIdentity) -> Self {
        let handle = DeviceHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
        let state = SimState {
            identity,
            connected: false,
            link_baud_rate: 0,
            device_baud_rate: FACTORY_BAUD_RATE,
            paused: false,
            output_type: AsyncOutputType::Off,
            binary_output: None,
            frequency: 0,
            listener: None,
            samples: 0,
            calls: Vec::new(),
            failures: HashMap::new(),
        };

        Self {
            handle,
            state: Arc::new(Mutex::new(state)),
            generate: false,
            generator: None,
        }
    }

    /// Stream synthetic frames from a background thread while outputs are live
    pub fn with_generator(mut self) -> Self {
        self.generate = true;
        self
    }

    pub fn probe(&self) -> SimProbe {
        SimProbe {
            handle: self.handle,
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start or stop the generator to match the current output settings
    fn refresh_generator(&mut self) {
        let streaming = self.generate && self.state().is_streaming();

        if !streaming {
            self.stop_generator();
            return;
        }
        if self.generator.is_some() {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let state = Arc::clone(&self.state);
        let handle = self.handle;

        debug!("Starting frame generator for {:?}", handle);
        let thread = thread::spawn(move || {
            while flag.load(Ordering::SeqCst) {
                let (listener, frame, period) = {
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    if !state.is_streaming() {
                        break;
                    }
                    let period = Duration::from_secs_f64(1.0 / f64::from(state.frequency));
                    (state.listener, state.next_frame(), period)
                };
                if let Some(listener) = listener {
                    listener(handle, &frame);
                }
                thread::sleep(period);
            }
        });

        self.generator = Some(Generator { running, thread });
    }

    fn stop_generator(&mut self) {
        if let Some(generator) = self.generator.take() {
            generator.running.store(false, Ordering::SeqCst);
            let _ = generator.thread.join();
            debug!("Stopped frame generator for {:?}", self.handle);
        }
    }
}

impl Default for SimulatedVn100 {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimulatedVn100 {
    fn drop(&mut self) {
        self.stop_generator();
    }
}

impl Vn100Sdk for SimulatedVn100 {
    fn handle(&self) -> DeviceHandle {
        self.handle
    }

    fn connect(&mut self, port: &str, baud_rate: u32) -> VnResult<()> {
        let mut state = self.state();
        state.begin(SdkCall::Connect {
            port: port.to_string(),
            baud_rate,
        })?;
        state.connected = true;
        state.link_baud_rate = baud_rate;
        Ok(())
    }

    fn disconnect(&mut self) -> VnResult<()> {
        self.state().begin(SdkCall::Disconnect)?;
        self.stop_generator();
        self.state().connected = false;
        Ok(())
    }

    fn reset(&mut self) -> VnResult<()> {
        {
            let mut state = self.state();
            state.begin(SdkCall::Reset)?;
            state.output_type = AsyncOutputType::Off;
            state.binary_output = None;
            state.frequency = 0;
            state.paused = false;
        }
        self.refresh_generator();
        Ok(())
    }

    fn serial_baud_rate(&mut self) -> VnResult<u32> {
        let mut state = self.state();
        state.begin(SdkCall::GetSerialBaudRate)?;
        Ok(state.device_baud_rate)
    }

    fn set_serial_baud_rate(&mut self, baud_rate: u32, _wait_for_response: bool) -> VnResult<()> {
        let mut state = self.state();
        state.begin(SdkCall::SetSerialBaudRate { baud_rate })?;
        state.device_baud_rate = baud_rate;
        Ok(())
    }

    fn model_number(&mut self, buffer: &mut [u8]) -> VnResult<()> {
        let mut state = self.state();
        state.begin(SdkCall::GetModelNumber)?;
        copy_identity(buffer, &state.identity.model_number);
        Ok(())
    }

    fn hardware_revision(&mut self) -> VnResult<i32> {
        let mut state = self.state();
        state.begin(SdkCall::GetHardwareRevision)?;
        Ok(state.identity.hardware_revision)
    }

    fn serial_number(&mut self, buffer: &mut [u8]) -> VnResult<()> {
        let mut state = self.state();
        state.begin(SdkCall::GetSerialNumber)?;
        copy_identity(buffer, &state.identity.serial_number);
        Ok(())
    }

    fn firmware_version(&mut self, buffer: &mut [u8]) -> VnResult<()> {
        let mut state = self.state();
        state.begin(SdkCall::GetFirmwareVersion)?;
        copy_identity(buffer, &state.identity.firmware_version);
        Ok(())
    }

    fn pause_async_outputs(&mut self, _wait_for_response: bool) -> VnResult<()> {
        {
            let mut state = self.state();
            state.begin(SdkCall::PauseAsyncOutputs)?;
            state.paused = true;
        }
        self.refresh_generator();
        Ok(())
    }

    fn resume_async_outputs(&mut self, _wait_for_response: bool) -> VnResult<()> {
        {
            let mut state = self.state();
            state.begin(SdkCall::ResumeAsyncOutputs)?;
            state.paused = false;
        }
        self.refresh_generator();
        Ok(())
    }

    fn set_synchronization_control(
        &mut self,
        control: &SynchronizationControl,
        _wait_for_response: bool,
    ) -> VnResult<()> {
        self.state().begin(SdkCall::SetSynchronizationControl(*control))
    }

    fn set_communication_protocol_control(
        &mut self,
        control: &CommunicationProtocolControl,
        _wait_for_response: bool,
    ) -> VnResult<()> {
        self.state().begin(SdkCall::SetCommunicationProtocolControl(*control))
    }

    fn set_binary_output_1_configuration(
        &mut self,
        config: &BinaryOutputConfig,
        _wait_for_response: bool,
    ) -> VnResult<()> {
        let mut state = self.state();
        state.begin(SdkCall::SetBinaryOutput1Configuration(*config))?;
        state.binary_output = Some(*config);
        Ok(())
    }

    fn set_async_data_output_type(
        &mut self,
        output: AsyncOutputType,
        _wait_for_response: bool,
    ) -> VnResult<()> {
        {
            let mut state = self.state();
            state.begin(SdkCall::SetAsyncDataOutputType(output))?;
            state.output_type = output;
            if output == AsyncOutputType::Off {
                state.binary_output = None;
            }
        }
        self.refresh_generator();
        Ok(())
    }

    fn set_async_data_output_frequency(
        &mut self,
        frequency: u32,
        _wait_for_response: bool,
    ) -> VnResult<()> {
        let mut state = self.state();
        state.begin(SdkCall::SetAsyncDataOutputFrequency(frequency))?;
        state.frequency = frequency;
        Ok(())
    }

    fn register_async_data_listener(&mut self, listener: AsyncDataListener) -> VnResult<()> {
        let mut state = self.state();
        state.begin(SdkCall::RegisterAsyncDataListener)?;
        state.listener = Some(listener);
        Ok(())
    }

    fn unregister_async_data_listener(&mut self, _listener: AsyncDataListener) -> VnResult<()> {
        {
            let mut state = self.state();
            state.begin(SdkCall::UnregisterAsyncDataListener)?;
            state.listener = None;
        }
        self.refresh_generator();
        Ok(())
    }

    fn read_composite(&mut self) -> VnResult<CompositeData> {
        let mut state = self.state();
        state.begin(SdkCall::ReadComposite)?;
        Ok(state.next_frame())
    }
}
