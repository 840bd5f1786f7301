//! Conversion of SDK composite records into sensor readings

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::publish::Channels;
use crate::sdk::{CompositeData, VnQuaternion, VnVector3};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<VnVector3> for Vector3 {
    fn from(v: VnVector3) -> Self {
        Self {
            x: v.c0,
            y: v.c1,
            z: v.c2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl From<VnQuaternion> for Quaternion {
    fn from(q: VnQuaternion) -> Self {
        Self {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        }
    }
}

/// One translated sample, built per frame and consumed by publication
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub stamp: DateTime<Utc>,
    /// Only available in binary output mode
    pub orientation: Option<Quaternion>,
    pub angular_velocity: Vector3,
    pub linear_acceleration: Vector3,
    pub magnetic_field: Option<Vector3>,
    pub fluid_pressure: Option<f64>,
    pub temperature: Option<f64>,
}

/// Translate a composite record.
///
/// In binary mode the angular velocity is taken from the uncompensated
/// *acceleration* field and the linear acceleration from the uncompensated
/// *angular rate* field. This swap matches what the device has always been
/// published as and is kept until it is verified against hardware.
///
/// Auxiliary quantities are copied only for enabled channels.
pub fn translate(
    data: &CompositeData,
    stamp: DateTime<Utc>,
    binary_output: bool,
    channels: &Channels,
) -> SensorReading {
    let (orientation, angular_velocity, linear_acceleration): (Option<Quaternion>, Vector3, Vector3) =
        if binary_output {
            (
                Some(data.quaternion.into()),
                data.acceleration_uncompensated.into(),
                data.angular_rate_uncompensated.into(),
            )
        } else {
            (None, data.angular_rate.into(), data.acceleration.into())
        };

    SensorReading {
        stamp,
        orientation,
        angular_velocity,
        linear_acceleration,
        magnetic_field: channels.mag.then(|| data.magnetic.into()),
        fluid_pressure: channels.pres.then_some(data.pressure),
        temperature: channels.temp.then_some(data.temperature),
    }
}
