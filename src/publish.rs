//! Publication channels and message types
//!
//! One channel exists per enabled quantity: IMU always, magnetic field,
//! pressure and temperature on request. The host framework is reached
//! through the [`Publisher`] trait.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::translate::{Quaternion, SensorReading, Vector3};

/// A published quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Imu,
    MagneticField,
    Pressure,
    Temperature,
}

impl Topic {
    pub fn name(self) -> &'static str {
        match self {
            Topic::Imu => "imu",
            Topic::MagneticField => "magnetic_field",
            Topic::Pressure => "pressure",
            Topic::Temperature => "temperature",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which optional channels are enabled. IMU is always on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub mag: bool,
    pub pres: bool,
    pub temp: bool,
}

impl Channels {
    pub fn all() -> Self {
        Self {
            mag: true,
            pres: true,
            temp: true,
        }
    }

    pub fn imu_only() -> Self {
        Self {
            mag: false,
            pres: false,
            temp: false,
        }
    }

    /// Enabled topics in publication order
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics = vec![Topic::Imu];
        if self.mag {
            topics.push(Topic::MagneticField);
        }
        if self.pres {
            topics.push(Topic::Pressure);
        }
        if self.temp {
            topics.push(Topic::Temperature);
        }
        topics
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImuMessage {
    pub header: Header,
    pub orientation: Option<Quaternion>,
    pub angular_velocity: Vector3,
    pub linear_acceleration: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MagneticFieldMessage {
    pub header: Header,
    pub magnetic_field: Vector3,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FluidPressureMessage {
    pub header: Header,
    pub fluid_pressure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureMessage {
    pub header: Header,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Message {
    Imu(ImuMessage),
    MagneticField(MagneticFieldMessage),
    Pressure(FluidPressureMessage),
    Temperature(TemperatureMessage),
}

impl Message {
    pub fn topic(&self) -> Topic {
        match self {
            Message::Imu(_) => Topic::Imu,
            Message::MagneticField(_) => Topic::MagneticField,
            Message::Pressure(_) => Topic::Pressure,
            Message::Temperature(_) => Topic::Temperature,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Message::Imu(m) => &m.header,
            Message::MagneticField(m) => &m.header,
            Message::Pressure(m) => &m.header,
            Message::Temperature(m) => &m.header,
        }
    }

    /// Split a reading into one message per quantity it carries.
    ///
    /// All messages share the IMU header.
    pub fn from_reading(reading: &SensorReading, frame_id: &str) -> Vec<Message> {
        let header = Header {
            stamp: reading.stamp,
            frame_id: frame_id.to_string(),
        };

        let mut messages = Vec::with_capacity(4);
        messages.push(Message::Imu(ImuMessage {
            header: header.clone(),
            orientation: reading.orientation,
            angular_velocity: reading.angular_velocity,
            linear_acceleration: reading.linear_acceleration,
        }));

        if let Some(magnetic_field) = reading.magnetic_field {
            messages.push(Message::MagneticField(MagneticFieldMessage {
                header: header.clone(),
                magnetic_field,
            }));
        }
        if let Some(fluid_pressure) = reading.fluid_pressure {
            messages.push(Message::Pressure(FluidPressureMessage {
                header: header.clone(),
                fluid_pressure,
            }));
        }
        if let Some(temperature) = reading.temperature {
            messages.push(Message::Temperature(TemperatureMessage {
                header,
                temperature,
            }));
        }

        messages
    }
}

/// Errors that can occur during publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Publication on a channel that was never advertised
    #[error("topic not advertised: {0}")]
    NotAdvertised(Topic),
}

/// Sink for sensor messages provided by the host framework
pub trait Publisher: Send {
    /// Open the channel for `topic`. Called once per enabled channel during setup.
    fn advertise(&mut self, _topic: Topic) -> Result<(), PublishError> {
        Ok(())
    }

    fn publish(&mut self, message: &Message) -> Result<(), PublishError>;

    fn flush(&mut self) -> Result<(), PublishError> {
        Ok(())
    }
}

impl<P: Publisher> Publisher for Arc<Mutex<P>> {
    fn advertise(&mut self, topic: Topic) -> Result<(), PublishError> {
        self.lock().unwrap_or_else(PoisonError::into_inner).advertise(topic)
    }

    fn publish(&mut self, message: &Message) -> Result<(), PublishError> {
        self.lock().unwrap_or_else(PoisonError::into_inner).publish(message)
    }

    fn flush(&mut self) -> Result<(), PublishError> {
        self.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

/// Output format for [`WriterPublisher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON object per line
    JsonLines,
    /// Human-readable text
    Text,
}

/// Publisher that writes each message to an `io::Write`
pub struct WriterPublisher<W: Write + Send> {
    writer: W,
    format: OutputFormat,
    advertised: Vec<Topic>,
    published: u64,
}

impl WriterPublisher<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write + Send> WriterPublisher<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            writer,
            format,
            advertised: Vec::new(),
            published: 0,
        }
    }

    /// Number of messages written so far
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn format_message(&self, message: &Message) -> Result<String, PublishError> {
        match self.format {
            OutputFormat::JsonLines => {
                serde_json::to_string(message).map_err(|e| PublishError::Serialization(e.to_string()))
            }
            OutputFormat::Text => Ok(format_text(message)),
        }
    }
}

fn format_text(message: &Message) -> String {
    let header = message.header();
    let prefix = format!("[{}] {}/{}:", header.stamp.to_rfc3339(), header.frame_id, message.topic());

    match message {
        Message::Imu(m) => {
            let orientation = match m.orientation {
                Some(q) => format!(" q=({:.4}, {:.4}, {:.4}, {:.4})", q.x, q.y, q.z, q.w),
                None => String::new(),
            };
            format!(
                "{}{} gyro=({:.4}, {:.4}, {:.4}) accel=({:.4}, {:.4}, {:.4})",
                prefix,
                orientation,
                m.angular_velocity.x,
                m.angular_velocity.y,
                m.angular_velocity.z,
                m.linear_acceleration.x,
                m.linear_acceleration.y,
                m.linear_acceleration.z
            )
        }
        Message::MagneticField(m) => format!(
            "{} mag=({:.4}, {:.4}, {:.4})",
            prefix, m.magnetic_field.x, m.magnetic_field.y, m.magnetic_field.z
        ),
        Message::Pressure(m) => format!("{} pressure={:.3}", prefix, m.fluid_pressure),
        Message::Temperature(m) => format!("{} temperature={:.2}", prefix, m.temperature),
    }
}

impl<W: Write + Send> Publisher for WriterPublisher<W> {
    fn advertise(&mut self, topic: Topic) -> Result<(), PublishError> {
        if !self.advertised.contains(&topic) {
            self.advertised.push(topic);
        }
        Ok(())
    }

    fn publish(&mut self, message: &Message) -> Result<(), PublishError> {
        if !self.advertised.contains(&message.topic()) {
            return Err(PublishError::NotAdvertised(message.topic()));
        }

        let formatted = self.format_message(message)?;
        writeln!(self.writer, "{}", formatted)?;
        self.published += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PublishError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(channels: Channels) -> SensorReading {
        SensorReading {
            stamp: Utc::now(),
            orientation: None,
            angular_velocity: Vector3 { x: 1.0, y: 2.0, z: 3.0 },
            linear_acceleration: Vector3 { x: 0.0, y: 0.0, z: 9.81 },
            magnetic_field: channels.mag.then_some(Vector3 { x: 0.2, y: 0.0, z: 0.4 }),
            fluid_pressure: channels.pres.then_some(101.325),
            temperature: channels.temp.then_some(23.0),
        }
    }

    #[test]
    fn test_topics_order() {
        assert_eq!(
            Channels::all().topics(),
            vec![Topic::Imu, Topic::MagneticField, Topic::Pressure, Topic::Temperature]
        );
        assert_eq!(Channels::imu_only().topics(), vec![Topic::Imu]);
    }

    #[test]
    fn test_messages_share_header() {
        let reading = reading(Channels::all());
        let messages = Message::from_reading(&reading, "imu_link");

        assert_eq!(messages.len(), 4);
        for message in &messages {
            assert_eq!(message.header().stamp, reading.stamp);
            assert_eq!(message.header().frame_id, "imu_link");
        }
    }

    #[test]
    fn test_messages_skip_missing_quantities() {
        let reading = reading(Channels {
            mag: false,
            pres: true,
            temp: false,
        });
        let topics: Vec<Topic> = Message::from_reading(&reading, "imu")
            .iter()
            .map(Message::topic)
            .collect();
        assert_eq!(topics, vec![Topic::Imu, Topic::Pressure]);
    }

    #[test]
    fn test_json_lines_output() {
        let mut publisher = WriterPublisher::new(Vec::new(), OutputFormat::JsonLines);
        publisher.advertise(Topic::Pressure).unwrap();

        let reading = reading(Channels::all());
        let message = Message::from_reading(&reading, "imu")
            .into_iter()
            .find(|m| m.topic() == Topic::Pressure)
            .unwrap();
        publisher.publish(&message).unwrap();
        assert_eq!(publisher.published(), 1);

        let output = String::from_utf8(publisher.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["topic"], "pressure");
        assert_eq!(value["fluid_pressure"], 101.325);
        assert_eq!(value["header"]["frame_id"], "imu");
    }

    #[test]
    fn test_text_output() {
        let mut publisher = WriterPublisher::new(Vec::new(), OutputFormat::Text);
        publisher.advertise(Topic::Temperature).unwrap();

        let reading = reading(Channels::all());
        let message = Message::from_reading(&reading, "imu").pop().unwrap();
        publisher.publish(&message).unwrap();

        let output = String::from_utf8(publisher.into_inner()).unwrap();
        assert!(output.contains("imu/temperature:"));
        assert!(output.contains("temperature=23.00"));
    }

    #[test]
    fn test_publish_requires_advertise() {
        let mut publisher = WriterPublisher::new(Vec::new(), OutputFormat::JsonLines);
        let message = Message::from_reading(&reading(Channels::imu_only()), "imu").remove(0);

        let err = publisher.publish(&message).unwrap_err();
        assert!(matches!(err, PublishError::NotAdvertised(Topic::Imu)));
    }
}
