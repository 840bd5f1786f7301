//! Routing of SDK callbacks to the owning driver session
//!
//! The SDK's data callback is a plain function that only receives the
//! sender's device handle. Sessions register their frame pipeline here
//! under that handle, and [`dispatch`] is what gets handed to the SDK.
//! Several devices can stream at once as long as their handles differ.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use chrono::Utc;
use log::debug;

use crate::pipeline::FramePipeline;
use crate::sdk::{CompositeData, DeviceHandle};

pub type SharedPipeline = Arc<Mutex<FramePipeline>>;

fn listeners() -> &'static Mutex<HashMap<DeviceHandle, SharedPipeline>> {
    static LISTENERS: OnceLock<Mutex<HashMap<DeviceHandle, SharedPipeline>>> = OnceLock::new();
    LISTENERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Route frames from `handle` to `pipeline`, replacing any previous route
pub fn register(handle: DeviceHandle, pipeline: SharedPipeline) -> Option<SharedPipeline> {
    listeners()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(handle, pipeline)
}

pub fn unregister(handle: DeviceHandle) -> Option<SharedPipeline> {
    listeners()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&handle)
}

pub fn is_registered(handle: DeviceHandle) -> bool {
    listeners()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&handle)
}

/// SDK data callback. Stamps the frame on arrival and runs it through the
/// sender's pipeline.
pub fn dispatch(sender: DeviceHandle, data: &CompositeData) {
    // Release the registry before the frame is processed
    let pipeline = listeners()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&sender)
        .cloned();

    match pipeline {
        Some(pipeline) => {
            pipeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handle_frame(data, Utc::now());
        }
        None => debug!("Dropping frame from unregistered device {:?}", sender),
    }
}
