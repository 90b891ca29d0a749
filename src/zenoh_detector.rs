//! Face landmarks from a detector service reachable over zenoh.
//!
//! Frames go out as JPEG on `<prefix>/frame` prefixed with a small binary
//! header, landmarks come back as JSON on `<prefix>/landmarks`. The options
//! the detector should run with are sent as the payload of a query on
//! `<prefix>/options`, the service's queryable answering it is what makes the
//! landmarker ready.

use crate::camera::VideoFrame;
use crate::detector::{Detector, DetectorError, LandmarkerFactory, LandmarkerOptions};
use crate::landmark::DetectionResult;
use crate::ErrorWrapper;
use async_trait::async_trait;
use log::{debug, info, warn};
use opencv::core::Mat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use zenoh::config::Config;
use zenoh::prelude::r#async::*;
use zenoh::publication::Publisher;
use zenoh::query::Reply;
use zenoh::sample::Sample;
use zenoh::subscriber::Subscriber;
use zenoh::Session;

pub const DEFAULT_KEY_PREFIX: &str = "pose-readout";

/// timestamp (f64) + width (u32) + height (u32), all little endian
pub const FRAME_HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest<'a> {
    pub timestamp_ms: f64,
    pub width: u32,
    pub height: u32,
    pub jpeg: &'a [u8],
}

pub fn encode_frame_request(timestamp_ms: f64, width: u32, height: u32, jpeg: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(FRAME_HEADER_LEN + jpeg.len());
    payload.extend_from_slice(&timestamp_ms.to_le_bytes());
    payload.extend_from_slice(&width.to_le_bytes());
    payload.extend_from_slice(&height.to_le_bytes());
    payload.extend_from_slice(jpeg);
    payload
}

pub fn decode_frame_request(payload: &[u8]) -> Option<FrameRequest<'_>> {
    if payload.len() < FRAME_HEADER_LEN {
        return None;
    }
    let (header, jpeg) = payload.split_at(FRAME_HEADER_LEN);
    let timestamp_ms = f64::from_le_bytes(header[0..8].try_into().ok()?);
    let width = u32::from_le_bytes(header[8..12].try_into().ok()?);
    let height = u32::from_le_bytes(header[12..16].try_into().ok()?);
    Some(FrameRequest {
        timestamp_ms,
        width,
        height,
        jpeg,
    })
}

/// Landmarks for the frame sent at `timestamp_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandmarkReply {
    pub timestamp_ms: f64,
    #[serde(flatten)]
    pub result: DetectionResult,
}

pub struct ZenohLandmarkerFactory {
    config: Config,
    key_prefix: String,
    reply_timeout: Duration,
}

impl ZenohLandmarkerFactory {
    pub fn new(config: Config, key_prefix: &str, reply_timeout: Duration) -> Self {
        Self {
            config,
            key_prefix: key_prefix.trim_end_matches('/').to_owned(),
            reply_timeout,
        }
    }
}

#[async_trait]
impl LandmarkerFactory for ZenohLandmarkerFactory {
    type Detector = ZenohLandmarker;

    async fn create(self, options: LandmarkerOptions) -> Result<ZenohLandmarker, DetectorError> {
        let zenoh_session = zenoh::open(self.config)
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        let zenoh_session = zenoh_session.into_arc();

        let frame_publisher = zenoh_session
            .declare_publisher(format!("{}/frame", self.key_prefix))
            .congestion_control(CongestionControl::Drop)
            .priority(Priority::InteractiveHigh)
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;

        let (sender, replies) = mpsc::unbounded_channel();
        let landmark_subscriber = zenoh_session
            .declare_subscriber(format!("{}/landmarks", self.key_prefix))
            .best_effort()
            .callback(move |sample: Sample| {
                let payload: Result<Vec<u8>, _> = sample.value.try_into();
                match payload {
                    Ok(payload) => {
                        // receiver only goes away with the landmarker
                        _ = sender.send(payload);
                    }
                    Err(err) => warn!("Unreadable landmark reply {:?}", err),
                }
            })
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;

        let (ack_sender, mut acks) = mpsc::unbounded_channel();
        zenoh_session
            .get(format!("{}/options", self.key_prefix))
            .with_value(serde_json::to_vec(&options)?)
            .timeout(self.reply_timeout)
            .callback(move |reply: Reply| {
                let ack = match reply.sample {
                    Ok(sample) => Vec::<u8>::try_from(sample.value)
                        .map(|payload| payload.len())
                        .map_err(|err| format!("{:?}", err)),
                    Err(err) => Err(format!("{:?}", err)),
                };
                // dropped after the first answer
                _ = ack_sender.send(ack);
            })
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;
        first_ack(&mut acks, self.reply_timeout).await?;

        info!("Face landmarker connected under {:?}", self.key_prefix);
        Ok(ZenohLandmarker {
            _zenoh_session: zenoh_session,
            frame_publisher,
            _landmark_subscriber: landmark_subscriber,
            replies,
            reply_timeout: self.reply_timeout,
        })
    }
}

pub struct ZenohLandmarker {
    _zenoh_session: Arc<Session>,
    frame_publisher: Publisher<'static>,
    _landmark_subscriber: Subscriber<'static, ()>,
    replies: mpsc::UnboundedReceiver<Vec<u8>>,
    reply_timeout: Duration,
}

/// Waits for the detector service to acknowledge the options query.
///
/// The query ends without an answer when nothing serves `<prefix>/options`,
/// which closes the channel.
async fn first_ack(
    acks: &mut mpsc::UnboundedReceiver<Result<usize, String>>,
    reply_timeout: Duration,
) -> Result<(), DetectorError> {
    let ack = tokio::time::timeout(reply_timeout, acks.recv())
        .await
        .map_err(|_| {
            DetectorError::NoService(format!(
                "no answer to options query within {:?}",
                reply_timeout
            ))
        })?
        .ok_or_else(|| DetectorError::NoService("options query got no answer".to_owned()))?;
    match ack {
        Ok(len) => {
            debug!("Detector accepted options, {} byte answer", len);
            Ok(())
        }
        Err(err) => Err(DetectorError::NoService(format!("options rejected {}", err))),
    }
}

/// Waits for the reply to `timestamp_ms`, skipping replies to older frames.
async fn await_reply(
    replies: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    timestamp_ms: f64,
    reply_timeout: Duration,
) -> Result<DetectionResult, DetectorError> {
    let deadline = tokio::time::Instant::now() + reply_timeout;
    loop {
        let payload = tokio::time::timeout_at(deadline, replies.recv())
            .await
            .map_err(|_| DetectorError::Timeout(reply_timeout))?
            .ok_or(DetectorError::Disconnected)?;
        let reply: LandmarkReply = serde_json::from_slice(&payload)
            .map_err(|err| DetectorError::MalformedReply(err.to_string()))?;
        if reply.timestamp_ms < timestamp_ms {
            debug!("Skipping stale reply for {:.3} ms", reply.timestamp_ms);
            continue;
        }
        return Ok(reply.result);
    }
}

#[async_trait(?Send)]
impl Detector<Mat> for ZenohLandmarker {
    async fn detect_for_video(
        &mut self,
        frame: &Mat,
        timestamp_ms: f64,
    ) -> Result<DetectionResult, DetectorError> {
        // replies to frames that already timed out
        while self.replies.try_recv().is_ok() {}

        let mut buffer: opencv::core::Vector<u8> = Default::default();
        if !opencv::imgcodecs::imencode_def(".jpg", frame, &mut buffer)? {
            return Err(DetectorError::Encode);
        }
        let (width, height) = frame.dimensions();
        let payload = encode_frame_request(timestamp_ms, width, height, &buffer.to_vec());

        self.frame_publisher
            .put(payload)
            .res()
            .await
            .map_err(ErrorWrapper::ZenohError)?;

        await_reply(&mut self.replies, timestamp_ms, self.reply_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::Landmark;

    fn reply_json(timestamp_ms: f64, x: f32) -> Vec<u8> {
        serde_json::to_vec(&LandmarkReply {
            timestamp_ms,
            result: DetectionResult::new(vec![vec![Landmark::new(x, 0.5, 0.0)]]),
        })
        .unwrap()
    }

    #[test]
    fn frame_request_header() {
        let payload = encode_frame_request(1234.5, 480, 360, &[0xFF, 0xD8]);
        assert_eq!(payload.len(), FRAME_HEADER_LEN + 2);
        let request = decode_frame_request(&payload).unwrap();
        assert_eq!(request.timestamp_ms, 1234.5);
        assert_eq!((request.width, request.height), (480, 360));
        assert_eq!(request.jpeg, &[0xFF, 0xD8]);
        assert!(decode_frame_request(&payload[..10]).is_none());
    }

    #[test]
    fn reply_uses_landmarker_field_names() {
        let reply: LandmarkReply = serde_json::from_str(
            r#"{"timestampMs": 16.5, "faceLandmarks": [[{"x": 0.1, "y": 0.2, "z": -0.01}]]}"#,
        )
        .unwrap();
        assert_eq!(reply.timestamp_ms, 16.5);
        assert_eq!(
            reply.result.first_face().unwrap()[0],
            Landmark::new(0.1, 0.2, -0.01)
        );
    }

    #[tokio::test]
    async fn stale_replies_are_skipped() {
        let (sender, mut replies) = mpsc::unbounded_channel();
        sender.send(reply_json(10.0, 0.1)).unwrap();
        sender.send(reply_json(20.0, 0.2)).unwrap();
        let result = await_reply(&mut replies, 20.0, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(result.first_face().unwrap()[0].x, 0.2);
    }

    #[tokio::test]
    async fn missing_reply_times_out() {
        let (_sender, mut replies) = mpsc::unbounded_channel();
        let err = await_reply(&mut replies, 1.0, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectorError::Timeout(_)));
    }

    #[tokio::test]
    async fn accepted_options_make_the_landmarker_ready() {
        let (sender, mut acks) = mpsc::unbounded_channel();
        sender.send(Ok(42)).unwrap();
        first_ack(&mut acks, Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn unanswered_options_query_fails_loading() {
        let (sender, mut acks) = mpsc::unbounded_channel::<Result<usize, String>>();
        drop(sender);
        let err = first_ack(&mut acks, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectorError::NoService(_)));

        let (_sender, mut acks) = mpsc::unbounded_channel::<Result<usize, String>>();
        let err = first_ack(&mut acks, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectorError::NoService(_)));
    }

    #[tokio::test]
    async fn rejected_options_fail_loading() {
        let (sender, mut acks) = mpsc::unbounded_channel();
        sender.send(Err("unknown delegate".to_owned())).unwrap();
        let err = first_ack(&mut acks, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown delegate"));
    }

    #[tokio::test]
    async fn garbage_reply_fails_the_frame() {
        let (sender, mut replies) = mpsc::unbounded_channel();
        sender.send(b"not json".to_vec()).unwrap();
        let err = await_reply(&mut replies, 1.0, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectorError::MalformedReply(_)));
    }
}
