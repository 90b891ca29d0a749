use crate::camera::VIDEO_WIDTH;
use crate::landmark::{Color, Connection, Landmark};
use log::{info, warn};
use opencv::core::{Mat, Point, Scalar, CV_8UC3};
use opencv::prelude::*;
use opencv::{highgui, imgproc};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

pub const ENABLE_LABEL: &str = "Enable Webcam";
pub const DISABLE_LABEL: &str = "Disable Webcam";

const IDLE_HEIGHT: i32 = 360;
const ALERT_DURATION: Duration = Duration::from_secs(3);

const KEY_ENTER: i32 = 13;
const KEY_ESCAPE: i32 = 27;
const KEY_SPACE: i32 = 32;

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("OpenCV error {0}")]
    OpenCv(#[from] opencv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    /// The enable/disable control was activated
    Toggle,
    Quit,
}

/// Everything the controller shows to the user.
pub trait Surface<F> {
    /// Next pending user input, never blocks
    fn poll_event(&mut self) -> Result<Option<UiEvent>, SurfaceError>;

    fn set_toggle_label(&mut self, label: &str);

    fn alert(&mut self, message: &str);

    fn set_loading(&mut self, visible: bool);

    /// Empty text clears the readout
    fn set_readout(&mut self, text: &str);

    fn resize_overlay(&mut self, width: u32, height: u32);

    fn clear_overlay(&mut self);

    fn draw_connectors(&mut self, landmarks: &[Landmark], connections: &[Connection], color: Color);

    /// Shows the current frame, if any, with the overlay on top.
    fn present(&mut self, frame: Option<&F>) -> Result<(), SurfaceError>;
}

fn to_scalar(color: Color) -> Scalar {
    Scalar::new(color.b as f64, color.g as f64, color.r as f64, 0.0)
}

/// Maps landmark connections onto pixel segments of a `width` x `height` overlay.
pub fn connector_segments(
    landmarks: &[Landmark],
    connections: &[Connection],
    width: u32,
    height: u32,
) -> Vec<(Point, Point)> {
    let to_pixel = |landmark: &Landmark| {
        Point::new(
            (landmark.x * width as f32).round() as i32,
            (landmark.y * height as f32).round() as i32,
        )
    };
    connections
        .iter()
        .filter_map(|(start, end)| {
            let start = landmarks.get(*start)?;
            let end = landmarks.get(*end)?;
            Some((to_pixel(start), to_pixel(end)))
        })
        .collect()
}

/// OpenCV window standing in for the video element, canvas and controls.
pub struct HighguiSurface {
    window: String,
    overlay_size: (u32, u32),
    segments: Vec<(Point, Point, Scalar)>,
    readout: String,
    toggle_label: String,
    loading: bool,
    alert: Option<(String, Instant)>,
    /// Key read while pumping the window outside of `poll_event`
    pending_key: Option<i32>,
}

impl HighguiSurface {
    pub fn new(window: &str) -> Result<Self, SurfaceError> {
        highgui::named_window_def(window)?;
        Ok(Self {
            window: window.to_owned(),
            overlay_size: (0, 0),
            segments: Vec::new(),
            readout: String::new(),
            toggle_label: ENABLE_LABEL.to_owned(),
            loading: false,
            alert: None,
            pending_key: None,
        })
    }

    fn put_line(canvas: &mut Mat, text: &str, origin: Point, color: Color) -> opencv::Result<()> {
        // hershey fonts have no degree sign
        let text = text.replace('°', " deg");
        imgproc::put_text(
            canvas,
            &text,
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            to_scalar(color),
            1,
            imgproc::LINE_AA,
            false,
        )
    }
}

impl Surface<Mat> for HighguiSurface {
    fn poll_event(&mut self) -> Result<Option<UiEvent>, SurfaceError> {
        let key = match self.pending_key.take() {
            Some(key) => key,
            None => highgui::poll_key()?,
        };
        let event = match key {
            KEY_SPACE | KEY_ENTER => Some(UiEvent::Toggle),
            KEY_ESCAPE => Some(UiEvent::Quit),
            _ if key == 'e' as i32 => Some(UiEvent::Toggle),
            _ if key == 'q' as i32 => Some(UiEvent::Quit),
            _ => None,
        };
        Ok(event)
    }

    fn set_toggle_label(&mut self, label: &str) {
        self.toggle_label = label.to_owned();
    }

    fn alert(&mut self, message: &str) {
        warn!("{}", message);
        self.alert = Some((message.to_owned(), Instant::now()));
    }

    fn set_loading(&mut self, visible: bool) {
        self.loading = visible;
    }

    fn set_readout(&mut self, text: &str) {
        self.readout = text.to_owned();
    }

    fn resize_overlay(&mut self, width: u32, height: u32) {
        if self.overlay_size != (width, height) {
            self.overlay_size = (width, height);
            self.segments.clear();
        }
    }

    fn clear_overlay(&mut self) {
        self.segments.clear();
    }

    fn draw_connectors(&mut self, landmarks: &[Landmark], connections: &[Connection], color: Color) {
        let (width, height) = self.overlay_size;
        let color = to_scalar(color);
        self.segments.extend(
            connector_segments(landmarks, connections, width, height)
                .into_iter()
                .map(|(start, end)| (start, end, color)),
        );
    }

    fn present(&mut self, frame: Option<&Mat>) -> Result<(), SurfaceError> {
        let mut canvas = match frame {
            Some(frame) => frame.clone(),
            None => Mat::new_rows_cols_with_default(
                IDLE_HEIGHT,
                VIDEO_WIDTH as i32,
                CV_8UC3,
                Scalar::all(0.0),
            )?,
        };
        let canvas_height = canvas.rows();

        for (start, end, color) in &self.segments {
            imgproc::line(&mut canvas, *start, *end, *color, 1, imgproc::LINE_AA, 0)?;
        }

        for (i, line) in self.readout.lines().enumerate() {
            Self::put_line(&mut canvas, line, Point::new(10, 20 + 20 * i as i32), Color::WHITE)?;
        }

        if self.loading {
            Self::put_line(
                &mut canvas,
                "Loading...",
                Point::new(10, canvas_height / 2),
                Color::WHITE,
            )?;
        }

        if matches!(&self.alert, Some((_, shown_at)) if shown_at.elapsed() >= ALERT_DURATION) {
            self.alert = None;
        }
        if let Some((message, _)) = &self.alert {
            Self::put_line(
                &mut canvas,
                message,
                Point::new(10, canvas_height - 40),
                Color::RED,
            )?;
        }

        let label = format!("[space] {}", self.toggle_label);
        Self::put_line(
            &mut canvas,
            &label,
            Point::new(10, canvas_height - 15),
            Color::GREEN,
        )?;

        highgui::imshow(&self.window, &canvas)?;
        if self.loading {
            // nothing else runs the window event loop while the camera opens
            let key = highgui::poll_key()?;
            if key >= 0 {
                self.pending_key = Some(key);
            }
        }
        Ok(())
    }
}

/// Headless surface that prints one line per readout.
pub struct ConsoleSurface {
    events: mpsc::UnboundedReceiver<UiEvent>,
}

impl ConsoleSurface {
    /// Returns the surface and a handle to feed it events.
    pub fn new() -> (Self, mpsc::UnboundedSender<UiEvent>) {
        let (sender, events) = mpsc::unbounded_channel();
        (Self { events }, sender)
    }

    /// Single line form of a multi line readout.
    pub fn format_line(text: &str) -> String {
        text.lines()
            .map(|line| line.trim_end_matches('°'))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl<F> Surface<F> for ConsoleSurface {
    fn poll_event(&mut self) -> Result<Option<UiEvent>, SurfaceError> {
        Ok(self.events.try_recv().ok())
    }

    fn set_toggle_label(&mut self, label: &str) {
        info!("Control: {}", label);
    }

    fn alert(&mut self, message: &str) {
        warn!("{}", message);
    }

    fn set_loading(&mut self, visible: bool) {
        if visible {
            info!("Waiting for camera");
        }
    }

    fn set_readout(&mut self, text: &str) {
        if !text.is_empty() {
            println!("{}", Self::format_line(text));
        }
    }

    fn resize_overlay(&mut self, _width: u32, _height: u32) {}

    fn clear_overlay(&mut self) {}

    fn draw_connectors(
        &mut self,
        _landmarks: &[Landmark],
        _connections: &[Connection],
        _color: Color,
    ) {
    }

    fn present(&mut self, _frame: Option<&F>) -> Result<(), SurfaceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_scale_to_overlay() {
        let landmarks = [Landmark::new(0.0, 0.0, 0.0), Landmark::new(0.5, 0.25, 0.0)];
        let segments = connector_segments(&landmarks, &[(0, 1)], 480, 360);
        assert_eq!(segments, vec![(Point::new(0, 0), Point::new(240, 90))]);
    }

    #[test]
    fn segments_skip_missing_landmarks() {
        let landmarks = [Landmark::new(0.1, 0.1, 0.0)];
        assert!(connector_segments(&landmarks, &[(0, 5)], 100, 100).is_empty());
    }

    #[test]
    fn console_line_matches_embedded_format() {
        assert_eq!(
            ConsoleSurface::format_line("Yaw: 1.00°\nPitch: -2.50°\nRoll: 0.00°"),
            "Yaw: 1.00 | Pitch: -2.50 | Roll: 0.00"
        );
    }

    #[test]
    fn console_events_arrive_in_order() {
        let (mut surface, events) = ConsoleSurface::new();
        events.send(UiEvent::Toggle).unwrap();
        events.send(UiEvent::Quit).unwrap();
        let mut poll = || Surface::<()>::poll_event(&mut surface).unwrap();
        assert_eq!(poll(), Some(UiEvent::Toggle));
        assert_eq!(poll(), Some(UiEvent::Quit));
        assert_eq!(poll(), None);
    }
}
