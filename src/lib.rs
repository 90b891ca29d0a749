//! Head pose readout driven by a face landmark detector.
//!
//! A [`controller::PoseController`] owns the webcam session. Each rendered
//! frame goes to a [`detector::Detector`], and yaw, pitch, roll and mouth
//! openness derived from the first face are written to a [`surface::Surface`].

use log::LevelFilter;
use thiserror::Error;

pub mod camera;
pub mod config;
pub mod controller;
pub mod detector;
pub mod landmark;
pub mod pose;
pub mod session;
pub mod surface;
pub mod zenoh_detector;

pub use camera::{Camera, CameraSource, VideoFrame, VideoStream};
pub use controller::{PoseController, ReadoutConfig};
pub use detector::{Detector, LandmarkerOptions, ModelLoader};
pub use landmark::{DetectionResult, Landmark};
pub use pose::{AngleMode, HeadPose};
pub use surface::{ConsoleSurface, HighguiSurface, Surface, UiEvent};

#[derive(Error, Debug)]
pub enum ErrorWrapper {
    #[error("Zenoh error {0:?}")]
    ZenohError(#[from] zenoh::Error),
}

/// Logs to stderr, the calling binary and this crate at debug, zenoh at warn.
///
/// `RUST_LOG` overrides these. Does nothing if a logger is already set.
pub fn init_logger(calling_crate: &str) {
    env_logger::Builder::new()
        .filter(Some(calling_crate), LevelFilter::Debug)
        .filter(Some(env!("CARGO_CRATE_NAME")), LevelFilter::Debug)
        .filter(Some("zenoh"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}
