use crate::camera::{Camera, CameraError, VideoFrame, VideoStream};
use crate::detector::{Detector, DetectorError, ModelLoader};
use crate::landmark::{face_contours, Color, Connection};
use crate::pose::{AngleMode, HeadPose};
use crate::session::{LoopState, Session};
use crate::surface::{Surface, SurfaceError, UiEvent, DISABLE_LABEL, ENABLE_LABEL};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::MissedTickBehavior;

/// Smallest step between two frame timestamps, in milliseconds.
const MIN_TIMESTAMP_STEP_MS: f64 = 0.001;

/// `tokio::time::interval` rejects a zero period.
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

pub const MODEL_NOT_READY_MESSAGE: &str = "Face Landmarker not loaded yet.";

#[derive(Error, Debug)]
pub enum PoseError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// What the readout shows and how often it refreshes.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutConfig {
    pub angle_mode: AngleMode,
    pub mouth: bool,
    pub mesh_color: Color,
    pub frame_interval: Duration,
}

impl Default for ReadoutConfig {
    fn default() -> Self {
        Self {
            angle_mode: AngleMode::Raw,
            mouth: true,
            mesh_color: Color::GREEN,
            frame_interval: Duration::from_secs(1) / 30,
        }
    }
}

/// Milliseconds since creation, strictly increasing between calls.
pub struct FrameClock {
    started: Instant,
    last: Option<f64>,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last: None,
        }
    }

    pub fn next_timestamp(&mut self) -> f64 {
        let now = self.started.elapsed().as_secs_f64() * 1000.0;
        let timestamp = match self.last {
            Some(last) if now <= last => last + MIN_TIMESTAMP_STEP_MS,
            _ => now,
        };
        self.last = Some(timestamp);
        timestamp
    }
}

type FrameOf<C> = <<C as Camera>::Stream as VideoStream>::Frame;

/// Drives the webcam session and the per-frame inference loop.
pub struct PoseController<C: Camera, D, S> {
    camera: C,
    models: ModelLoader<D>,
    surface: S,
    session: Session<C::Stream>,
    config: ReadoutConfig,
    clock: FrameClock,
    contours: Vec<Connection>,
}

impl<C, D, S> PoseController<C, D, S>
where
    C: Camera,
    D: Detector<FrameOf<C>>,
    S: Surface<FrameOf<C>>,
{
    pub fn new(camera: C, models: ModelLoader<D>, mut surface: S, config: ReadoutConfig) -> Self {
        surface.set_toggle_label(ENABLE_LABEL);
        Self {
            camera,
            models,
            surface,
            session: Session::default(),
            config,
            clock: FrameClock::new(),
            contours: face_contours(),
        }
    }

    pub fn session(&self) -> &Session<C::Stream> {
        &self.session
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn models_mut(&mut self) -> &mut ModelLoader<D> {
        &mut self.models
    }

    /// Handles one click of the enable/disable control.
    pub async fn toggle(&mut self) {
        if self.session.is_running() {
            self.disable();
        } else {
            self.enable().await;
        }
    }

    /// Requests the camera and attaches its stream.
    ///
    /// A missing model or a refused camera is reported through an alert and
    /// leaves the session disabled.
    pub async fn enable(&mut self) {
        if !self.models.is_ready() {
            self.surface.alert(MODEL_NOT_READY_MESSAGE);
            return;
        }

        self.surface.set_loading(true);
        // opening the camera can block for a while, show the indicator first
        if let Err(err) = self.surface.present(None) {
            warn!("Failed to show loading indicator: {}", err);
        }
        // never hold two streams, even if a stale one survived
        self.session.stop_stream();
        match self.camera.request_stream().await {
            Ok(stream) => {
                self.session.start(stream);
                self.surface.set_toggle_label(DISABLE_LABEL);
                info!("Webcam enabled");
            }
            Err(err) => {
                self.session.stop();
                self.surface
                    .alert(&format!("Could not access webcam: {}", err));
            }
        }
        self.surface.set_loading(false);
    }

    pub fn disable(&mut self) {
        self.session.stop();
        self.surface.set_toggle_label(ENABLE_LABEL);
        self.surface.clear_overlay();
        self.surface.set_readout("");
        info!("Webcam disabled");
    }

    /// One iteration of the inference loop, run once per rendered frame.
    pub async fn animation_frame(&mut self) -> Result<(), PoseError> {
        if !self.session.is_running() {
            self.surface.present(None)?;
            return Ok(());
        }
        let Some(stream) = self.session.stream_mut() else {
            return Ok(());
        };
        let Some(frame) = stream.next_frame()? else {
            self.surface.present(None)?;
            return Ok(());
        };
        if self.session.loop_state() == LoopState::AwaitingFirstFrame {
            debug!("First frame decoded, starting inference");
            self.session.mark_streaming();
        }

        let (width, height) = frame.dimensions();
        self.surface.resize_overlay(width, height);

        let timestamp = self.clock.next_timestamp();
        let Some(detector) = self.models.detector_mut() else {
            return Ok(());
        };
        let result = match detector.detect_for_video(&frame, timestamp).await {
            Ok(result) => result,
            Err(err) => {
                // the video keeps playing, only this frame's landmarks are lost
                self.surface.clear_overlay();
                self.surface.present(Some(&frame))?;
                return Err(err.into());
            }
        };

        self.surface.clear_overlay();
        if let Some(face) = result.first_face() {
            match HeadPose::from_face(face, self.config.mouth) {
                Some(pose) => self
                    .surface
                    .set_readout(&pose.readout(self.config.angle_mode)),
                None => debug!("Skipping face with only {} landmarks", face.len()),
            }
            self.surface
                .draw_connectors(face, &self.contours, self.config.mesh_color);
        }

        self.surface.present(Some(&frame))?;
        Ok(())
    }

    /// Ticks at the configured frame rate until the user quits.
    ///
    /// A failed frame is logged and dropped, the next tick carries on.
    pub async fn run(&mut self) -> Result<(), PoseError> {
        let mut ticker =
            tokio::time::interval(self.config.frame_interval.max(MIN_FRAME_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.surface.poll_event()? {
                Some(UiEvent::Toggle) => self.toggle().await,
                Some(UiEvent::Quit) => {
                    if self.session.is_running() {
                        self.disable();
                    }
                    info!("Quitting");
                    return Ok(());
                }
                None => {}
            }
            if let Err(err) = self.animation_frame().await {
                error!("Dropped frame: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_clock_is_strictly_increasing() {
        let mut clock = FrameClock::new();
        let mut last = clock.next_timestamp();
        for _ in 0..1000 {
            let next = clock.next_timestamp();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn default_readout_matches_web_variant() {
        let config = ReadoutConfig::default();
        assert_eq!(config.angle_mode, AngleMode::Raw);
        assert_eq!(config.mesh_color, Color::GREEN);
        assert!(config.mouth);
    }
}
