use crate::landmark::DetectionResult;
use crate::ErrorWrapper;
use async_trait::async_trait;
use clap::ValueEnum;
use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

pub const DEFAULT_MODEL_ASSET_PATH: &str = "https://storage.googleapis.com/mediapipe-models/face_landmarker/face_landmarker/float16/1/face_landmarker.task";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Transport error {0}")]
    Transport(#[from] ErrorWrapper),
    #[error("OpenCV error {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("Failed to encode frame")]
    Encode,
    #[error("Malformed landmark reply: {0}")]
    MalformedReply(String),
    #[error("Serialization error {0}")]
    Serde(#[from] serde_json::Error),
    #[error("No landmark reply within {0:?}")]
    Timeout(std::time::Duration),
    #[error("Landmark reply channel closed")]
    Disconnected,
    #[error("No face landmarker service: {0}")]
    NoService(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum Delegate {
    #[default]
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunningMode {
    Image,
    #[default]
    Video,
}

/// Configuration handed to the landmark model when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandmarkerOptions {
    pub model_asset_path: String,
    pub delegate: Delegate,
    pub running_mode: RunningMode,
    pub num_faces: u32,
    pub output_face_blendshapes: bool,
}

impl Default for LandmarkerOptions {
    fn default() -> Self {
        Self {
            model_asset_path: DEFAULT_MODEL_ASSET_PATH.to_owned(),
            delegate: Delegate::Gpu,
            running_mode: RunningMode::Video,
            num_faces: 1,
            output_face_blendshapes: false,
        }
    }
}

/// A face landmark model running in video mode.
///
/// Timestamps passed to consecutive calls must be strictly increasing.
#[async_trait(?Send)]
pub trait Detector<F> {
    async fn detect_for_video(
        &mut self,
        frame: &F,
        timestamp_ms: f64,
    ) -> Result<DetectionResult, DetectorError>;
}

/// Builds a [`Detector`] from [`LandmarkerOptions`].
#[async_trait]
pub trait LandmarkerFactory: Send + 'static {
    type Detector: Send + 'static;

    async fn create(self, options: LandmarkerOptions) -> Result<Self::Detector, DetectorError>;
}

enum LoaderState<D> {
    Loading(oneshot::Receiver<Result<D, DetectorError>>),
    Ready(D),
    Failed,
}

/// Holds the detector while it loads in the background.
pub struct ModelLoader<D> {
    state: LoaderState<D>,
}

impl<D: Send + 'static> ModelLoader<D> {
    /// Starts creating the detector on a separate task.
    pub fn spawn<F>(factory: F, options: LandmarkerOptions) -> Self
    where
        F: LandmarkerFactory<Detector = D>,
    {
        let (sender, receiver) = oneshot::channel();
        tokio::spawn(async move {
            info!("Loading face landmarker {:?}", options);
            let result = factory.create(options).await;
            // receiver is gone if the controller already shut down
            _ = sender.send(result);
        });
        Self {
            state: LoaderState::Loading(receiver),
        }
    }
}

impl<D> ModelLoader<D> {
    /// Loader with an already created detector
    pub fn ready(detector: D) -> Self {
        Self {
            state: LoaderState::Ready(detector),
        }
    }

    /// Checks for a finished load without waiting.
    pub fn is_ready(&mut self) -> bool {
        self.poll();
        matches!(self.state, LoaderState::Ready(_))
    }

    pub fn detector_mut(&mut self) -> Option<&mut D> {
        self.poll();
        match &mut self.state {
            LoaderState::Ready(detector) => Some(detector),
            _ => None,
        }
    }

    /// Waits for loading to finish. Returns whether a detector is available.
    pub async fn wait(&mut self) -> bool {
        if let LoaderState::Loading(receiver) = &mut self.state {
            let result = receiver.await;
            self.finish(result.ok());
        }
        matches!(self.state, LoaderState::Ready(_))
    }

    fn poll(&mut self) {
        if let LoaderState::Loading(receiver) = &mut self.state {
            match receiver.try_recv() {
                Ok(result) => self.finish(Some(result)),
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => self.finish(None),
            }
        }
    }

    fn finish(&mut self, result: Option<Result<D, DetectorError>>) {
        self.state = match result {
            Some(Ok(detector)) => {
                info!("Face landmarker ready");
                LoaderState::Ready(detector)
            }
            Some(Err(err)) => {
                error!("Failed to load face landmarker: {}", err);
                LoaderState::Failed
            }
            None => {
                error!("Face landmarker loading task ended without a result");
                LoaderState::Failed
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFactory(Result<u32, ()>);

    #[async_trait]
    impl LandmarkerFactory for StaticFactory {
        type Detector = u32;

        async fn create(self, options: LandmarkerOptions) -> Result<u32, DetectorError> {
            assert_eq!(options.num_faces, 1);
            self.0.map_err(|_| DetectorError::Disconnected)
        }
    }

    struct NeverFactory;

    #[async_trait]
    impl LandmarkerFactory for NeverFactory {
        type Detector = u32;

        async fn create(self, _options: LandmarkerOptions) -> Result<u32, DetectorError> {
            std::future::pending().await
        }
    }

    #[test]
    fn options_serialize_like_landmarker_config() {
        let json = serde_json::to_value(LandmarkerOptions::default()).unwrap();
        assert_eq!(json["delegate"], "GPU");
        assert_eq!(json["runningMode"], "VIDEO");
        assert_eq!(json["numFaces"], 1);
        assert_eq!(json["outputFaceBlendshapes"], false);
        assert_eq!(json["modelAssetPath"], DEFAULT_MODEL_ASSET_PATH);
    }

    #[tokio::test]
    async fn loader_becomes_ready() {
        let mut loader = ModelLoader::spawn(StaticFactory(Ok(7)), LandmarkerOptions::default());
        assert!(loader.wait().await);
        assert!(loader.is_ready());
        assert_eq!(loader.detector_mut(), Some(&mut 7));
    }

    #[tokio::test]
    async fn failed_load_is_never_ready() {
        let mut loader = ModelLoader::spawn(StaticFactory(Err(())), LandmarkerOptions::default());
        assert!(!loader.wait().await);
        assert!(!loader.is_ready());
        assert!(loader.detector_mut().is_none());
    }

    #[tokio::test]
    async fn pending_load_is_not_ready() {
        let mut loader = ModelLoader::spawn(NeverFactory, LandmarkerOptions::default());
        tokio::task::yield_now().await;
        assert!(!loader.is_ready());
    }
}
