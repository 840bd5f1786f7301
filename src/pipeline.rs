//! Per-frame processing chain
//!
//! Each frame delivered by the SDK is translated, published on every
//! enabled channel, fed to the sync tracker and ticked into diagnostics.
//! The whole chain runs under one lock as a single unit of work.

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::config::{DeviceConfig, NormalizedRates};
use crate::diagnostics::{Diagnostics, FrequencyStatusParam, TimeStampStatusParam};
use crate::error::Result;
use crate::publish::{Channels, Message, Publisher};
use crate::sdk::CompositeData;
use crate::sync::SyncTracker;
use crate::translate::{translate, SensorReading};

pub struct FramePipeline {
    frame_id: String,
    binary_output: bool,
    channels: Channels,
    sync_enabled: bool,
    publisher: Box<dyn Publisher>,
    diagnostics: Box<dyn Diagnostics>,
    sync: SyncTracker,
    frames: u64,
}

impl FramePipeline {
    pub fn new(
        config: &DeviceConfig,
        publisher: Box<dyn Publisher>,
        diagnostics: Box<dyn Diagnostics>,
    ) -> Self {
        let mut pipeline = Self {
            frame_id: String::new(),
            binary_output: true,
            channels: Channels::all(),
            sync_enabled: false,
            publisher,
            diagnostics,
            sync: SyncTracker::new(),
            frames: 0,
        };
        pipeline.reconfigure(config);
        pipeline
    }

    /// Take over frame id, output mode and channel selection from `config`
    pub fn reconfigure(&mut self, config: &DeviceConfig) {
        self.frame_id = config.frame_id.clone();
        self.binary_output = config.binary_output;
        self.channels = Channels {
            mag: config.enable_mag,
            pres: config.enable_pres,
            temp: config.enable_temp,
        };
        self.sync_enabled = config.sync_out_rate > 0;
        self.sync = SyncTracker::new();
    }

    /// Advertise one channel per enabled quantity and register a
    /// diagnostic tracker for each, expecting the normalized rate.
    pub fn open_channels(&mut self, hardware_id: &str, rates: &NormalizedRates) -> Result<()> {
        let rate = f64::from(rates.imu_rate);
        let frequency = FrequencyStatusParam::expected(rate);
        let timestamp = TimeStampStatusParam::for_rate(rate);

        self.sync_enabled = rates.sync_out.is_some();
        self.diagnostics.clear_topics();
        self.diagnostics.set_hardware_id(hardware_id);

        for topic in self.channels.topics() {
            debug!("Opening channel {}", topic);
            self.publisher.advertise(topic)?;
            self.diagnostics.add_topic(topic, frequency, timestamp);
        }

        Ok(())
    }

    /// Process one frame stamped at `stamp`
    pub fn handle_frame(&mut self, data: &CompositeData, stamp: DateTime<Utc>) -> SensorReading {
        let reading = translate(data, stamp, self.binary_output, &self.channels);

        for message in Message::from_reading(&reading, &self.frame_id) {
            match self.publisher.publish(&message) {
                Ok(()) => self.diagnostics.tick(message.topic(), stamp),
                Err(e) => warn!("Failed to publish {}: {}", message.topic(), e),
            }
        }

        if self.sync_enabled {
            self.sync.update(data.sync_in_cnt, stamp);
        }

        self.diagnostics.update();
        self.frames += 1;

        reading
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.publisher.flush() {
            warn!("Failed to flush publisher: {}", e);
        }
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn sync(&self) -> &SyncTracker {
        &self.sync
    }

    /// Frames processed since construction
    pub fn frames(&self) -> u64 {
        self.frames
    }
}
