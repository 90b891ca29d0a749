use async_trait::async_trait;
use log::{info, warn};
use opencv::prelude::*;
use opencv::videoio;
use thiserror::Error;

/// Preview width requested from the camera.
pub const VIDEO_WIDTH: u32 = 480;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera {0} is unavailable")]
    Unavailable(i32),
    #[error("OpenCV error {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("Camera open task failed {0}")]
    OpenTask(#[from] tokio::task::JoinError),
}

pub trait VideoFrame {
    /// Width and height in pixels
    fn dimensions(&self) -> (u32, u32);
}

impl VideoFrame for Mat {
    fn dimensions(&self) -> (u32, u32) {
        (self.cols().max(0) as u32, self.rows().max(0) as u32)
    }
}

/// A live camera stream. Dropping it must release the device.
pub trait VideoStream {
    type Frame: VideoFrame;

    /// `None` until the stream has decoded a frame.
    fn next_frame(&mut self) -> Result<Option<Self::Frame>, CameraError>;

    fn active_tracks(&self) -> usize;

    /// Stops every track. Calling it twice is a no-op.
    fn stop(&mut self);
}

#[async_trait(?Send)]
pub trait Camera {
    type Stream: VideoStream;

    /// Asks for a video stream, may wait on the user or the device.
    async fn request_stream(&mut self) -> Result<Self::Stream, CameraError>;
}

pub struct CameraSource {
    index: i32,
}

impl CameraSource {
    pub fn new(index: i32) -> Self {
        Self { index }
    }
}

/// Blocks until the device answers, can take seconds on some backends.
fn open_capture(index: i32) -> Result<videoio::VideoCapture, CameraError> {
    let mut cam = videoio::VideoCapture::new(index, videoio::CAP_ANY)?;
    if !videoio::VideoCapture::is_opened(&cam)? {
        return Err(CameraError::Unavailable(index));
    }
    if !cam.set(videoio::CAP_PROP_FRAME_WIDTH, VIDEO_WIDTH as f64)? {
        warn!("Camera {} ignored requested width {}", index, VIDEO_WIDTH);
    }
    Ok(cam)
}

#[async_trait(?Send)]
impl Camera for CameraSource {
    type Stream = CameraStream;

    async fn request_stream(&mut self) -> Result<CameraStream, CameraError> {
        let index = self.index;
        let cam = tokio::task::spawn_blocking(move || open_capture(index)).await??;
        info!("Opened camera {}", self.index);
        Ok(CameraStream {
            index: self.index,
            capture: Some(cam),
        })
    }
}

pub struct CameraStream {
    index: i32,
    capture: Option<videoio::VideoCapture>,
}

impl VideoStream for CameraStream {
    type Frame = Mat;

    fn next_frame(&mut self) -> Result<Option<Mat>, CameraError> {
        let Some(cam) = self.capture.as_mut() else {
            return Ok(None);
        };
        let mut frame = Mat::default();
        // blocking, returns once the device has the next frame ready
        cam.read(&mut frame)?;
        if frame.size()?.width == 0 {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.capture.is_some())
    }

    fn stop(&mut self) {
        if let Some(mut cam) = self.capture.take() {
            if let Err(err) = cam.release() {
                warn!("Failed to release camera {}: {}", self.index, err);
            }
            info!("Released camera {}", self.index);
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_camera_fails_without_stalling_the_runtime() {
        let mut source = CameraSource::new(i32::MAX);
        let ticker = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        });
        assert!(source.request_stream().await.is_err());
        ticker.await.unwrap();
    }

    #[test]
    fn stopped_stream_has_no_tracks() {
        let mut stream = CameraStream {
            index: 0,
            capture: None,
        };
        assert_eq!(stream.active_tracks(), 0);
        assert!(stream.next_frame().unwrap().is_none());
        stream.stop();
    }
}
