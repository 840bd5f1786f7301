//! VN-100 reader - Streams IMU frames as JSON lines
//!
//! Configures the device, streams until Ctrl+C or the requested duration,
//! then prints how many messages each channel published.
//!
//! Usage:
//!   vn100-reader --baud 921600 --rate 200 --duration 10

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use vn100_driver::{
    DeviceConfig, OutputFormat, SimulatedVn100, TickRecorder, Vn100, Vn100Error, WriterPublisher,
};

#[derive(Parser, Debug)]
#[command(name = "vn100-reader")]
#[command(about = "Stream VN-100 IMU data to stdout", long_about = None)]
struct Args {
    /// JSON configuration file (flags override its values)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the device
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate to switch the device to
    #[arg(short, long)]
    baud: Option<u32>,

    #[arg(long)]
    frame_id: Option<String>,

    /// IMU output rate in Hz (rounded to a divisor of 800)
    #[arg(short, long)]
    rate: Option<i32>,

    /// Sync-out pulse rate in Hz, 0 disables
    #[arg(long)]
    sync_out_rate: Option<i32>,

    /// Sync-out pulse width in microseconds
    #[arg(long)]
    pulse_width: Option<u32>,

    #[arg(long)]
    no_mag: bool,

    #[arg(long)]
    no_pres: bool,

    #[arg(long)]
    no_temp: bool,

    /// Use the text (VNIMU) output instead of binary output
    #[arg(long)]
    text: bool,

    /// Print human-readable lines instead of JSON
    #[arg(long)]
    pretty: bool,

    /// Duration in seconds (optional, runs until Ctrl+C if omitted)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn device_config(&self) -> Result<DeviceConfig, Vn100Error> {
        let mut config = match &self.config {
            Some(path) => DeviceConfig::from_json_file(path)?,
            None => DeviceConfig::default(),
        };

        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(frame_id) = &self.frame_id {
            config.frame_id = frame_id.clone();
        }
        if let Some(rate) = self.rate {
            config.imu_rate = rate;
        }
        if let Some(rate) = self.sync_out_rate {
            config.sync_out_rate = rate;
        }
        if let Some(width) = self.pulse_width {
            config.sync_out_pulse_width_us = width;
        }
        config.enable_mag &= !self.no_mag;
        config.enable_pres &= !self.no_pres;
        config.enable_temp &= !self.no_temp;
        config.binary_output &= !self.text;

        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    let config = args.device_config()?;
    let format = if args.pretty {
        OutputFormat::Text
    } else {
        OutputFormat::JsonLines
    };

    eprintln!("VN-100 Reader");
    eprintln!("=============");
    eprintln!("Port: {} @ {} baud", config.port, config.baud_rate);
    eprintln!(
        "Output: {}",
        if config.binary_output { "binary" } else { "text" }
    );
    if let Some(duration) = args.duration {
        eprintln!("Duration: {} seconds", duration);
    } else {
        eprintln!("Duration: continuous (Ctrl+C to stop)");
    }
    eprintln!();

    let recorder = Arc::new(Mutex::new(TickRecorder::new()));
    let mut imu = Vn100::new(
        SimulatedVn100::new().with_generator(),
        config,
        WriterPublisher::stdout(format),
        recorder.clone(),
    );

    eprintln!("Initializing device...");
    if let Err(e) = imu.initialize() {
        eprintln!("Error initializing device: {}", e);
        return Err(Box::new(e));
    }
    eprintln!(
        "Device {} ready, IMU rate {} Hz, sync-out {} Hz\n",
        imu.hardware_id().unwrap_or_default(),
        imu.rates().imu_rate,
        imu.sync_out_rate()
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping stream...");
        r.store(false, Ordering::SeqCst);
    })?;

    let started = Instant::now();
    let end_time = args.duration.map(|d| started + Duration::from_secs(d));

    imu.start(true)?;

    while running.load(Ordering::SeqCst) {
        if end_time.is_some_and(|end| Instant::now() >= end) {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    imu.stop()?;
    let elapsed = started.elapsed().as_secs_f64();

    eprintln!("\nStream stopped after {:.2} seconds", elapsed);
    eprintln!("Frames: {}", imu.frames());

    let recorder = recorder.lock().unwrap_or_else(|e| e.into_inner());
    for (topic, record) in recorder.topics() {
        match record.observed_rate() {
            Some(rate) => eprintln!("  {:<16} {:>8} msgs  {:>7.1} Hz", topic.name(), record.ticks, rate),
            None => eprintln!("  {:<16} {:>8} msgs", topic.name(), record.ticks),
        }
    }

    Ok(())
}
