//! Per-channel health bookkeeping
//!
//! The driver records one tick per published message. Aggregating ticks
//! into frequency and timestamp health belongs to the host framework; the
//! parameters below are what it needs to do so.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::warn;

use crate::publish::Topic;

/// Allowed relative deviation from the expected frequency
pub const FREQUENCY_TOLERANCE: f64 = 0.01;
/// Number of ticks the frequency check averages over
pub const FREQUENCY_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyStatusParam {
    pub min_freq: f64,
    pub max_freq: f64,
    pub tolerance: f64,
    pub window_size: usize,
}

impl FrequencyStatusParam {
    /// Expect exactly `rate` Hz, within [`FREQUENCY_TOLERANCE`]
    pub fn expected(rate: f64) -> Self {
        Self {
            min_freq: rate,
            max_freq: rate,
            tolerance: FREQUENCY_TOLERANCE,
            window_size: FREQUENCY_WINDOW,
        }
    }
}

/// Acceptable delay between a message stamp and its publication (seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStampStatusParam {
    pub min_acceptable: f64,
    pub max_acceptable: f64,
}

impl TimeStampStatusParam {
    /// Half a sample period at `rate` Hz
    pub fn for_rate(rate: f64) -> Self {
        Self {
            min_acceptable: 0.0,
            max_acceptable: 0.5 / rate,
        }
    }
}

/// Health sink provided by the host framework
pub trait Diagnostics: Send {
    fn set_hardware_id(&mut self, hardware_id: &str);

    /// Register a tracker for `topic`. Called once per enabled channel.
    fn add_topic(
        &mut self,
        topic: Topic,
        frequency: FrequencyStatusParam,
        timestamp: TimeStampStatusParam,
    );

    /// Drop every registered tracker. Called before channels are reopened.
    fn clear_topics(&mut self);

    /// One message was published on `topic` with header stamp `stamp`
    fn tick(&mut self, topic: Topic, stamp: DateTime<Utc>);

    /// Called once per processed frame, after all ticks
    fn update(&mut self) {}
}

impl<D: Diagnostics> Diagnostics for Arc<Mutex<D>> {
    fn set_hardware_id(&mut self, hardware_id: &str) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_hardware_id(hardware_id);
    }

    fn add_topic(
        &mut self,
        topic: Topic,
        frequency: FrequencyStatusParam,
        timestamp: TimeStampStatusParam,
    ) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_topic(topic, frequency, timestamp);
    }

    fn clear_topics(&mut self) {
        self.lock().unwrap_or_else(PoisonError::into_inner).clear_topics();
    }

    fn tick(&mut self, topic: Topic, stamp: DateTime<Utc>) {
        self.lock().unwrap_or_else(PoisonError::into_inner).tick(topic, stamp);
    }

    fn update(&mut self) {
        self.lock().unwrap_or_else(PoisonError::into_inner).update();
    }
}

/// Tick history of one topic
#[derive(Debug, Clone)]
pub struct TopicRecord {
    pub frequency: FrequencyStatusParam,
    pub timestamp: TimeStampStatusParam,
    pub ticks: u64,
    pub first_stamp: Option<DateTime<Utc>>,
    pub last_stamp: Option<DateTime<Utc>>,
}

impl TopicRecord {
    fn new(frequency: FrequencyStatusParam, timestamp: TimeStampStatusParam) -> Self {
        Self {
            frequency,
            timestamp,
            ticks: 0,
            first_stamp: None,
            last_stamp: None,
        }
    }

    /// Mean tick rate between the first and last stamp
    pub fn observed_rate(&self) -> Option<f64> {
        let (first, last) = (self.first_stamp?, self.last_stamp?);
        let span = (last - first).num_microseconds()? as f64 / 1e6;
        if self.ticks < 2 || span <= 0.0 {
            return None;
        }
        Some((self.ticks - 1) as f64 / span)
    }
}

/// In-memory [`Diagnostics`] that keeps per-topic tick counts
#[derive(Debug, Default)]
pub struct TickRecorder {
    hardware_id: String,
    topics: BTreeMap<Topic, TopicRecord>,
    updates: u64,
}

impl TickRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hardware_id(&self) -> &str {
        &self.hardware_id
    }

    pub fn topic(&self, topic: Topic) -> Option<&TopicRecord> {
        self.topics.get(&topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = (Topic, &TopicRecord)> {
        self.topics.iter().map(|(topic, record)| (*topic, record))
    }

    pub fn ticks(&self, topic: Topic) -> u64 {
        self.topics.get(&topic).map_or(0, |r| r.ticks)
    }

    /// Number of `update()` calls, one per processed frame
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl Diagnostics for TickRecorder {
    fn set_hardware_id(&mut self, hardware_id: &str) {
        self.hardware_id = hardware_id.to_string();
    }

    fn add_topic(
        &mut self,
        topic: Topic,
        frequency: FrequencyStatusParam,
        timestamp: TimeStampStatusParam,
    ) {
        self.topics.insert(topic, TopicRecord::new(frequency, timestamp));
    }

    fn clear_topics(&mut self) {
        self.topics.clear();
    }

    fn tick(&mut self, topic: Topic, stamp: DateTime<Utc>) {
        match self.topics.get_mut(&topic) {
            Some(record) => {
                record.ticks += 1;
                record.first_stamp.get_or_insert(stamp);
                record.last_stamp = Some(stamp);
            }
            None => warn!("Tick for unregistered topic {}", topic),
        }
    }

    fn update(&mut self) {
        self.updates += 1;
    }
}
