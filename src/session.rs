use crate::camera::VideoStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No stream, nothing scheduled
    Idle,
    /// Stream attached, waiting for its first decoded frame
    AwaitingFirstFrame,
    /// Inference runs once per rendered frame
    Running,
}

/// Webcam session state.
///
/// The session exclusively owns the active stream, so there is never more
/// than one. Clearing `running` is the single cancellation point for the
/// inference loop.
pub struct Session<S: VideoStream> {
    running: bool,
    stream: Option<S>,
    loop_state: LoopState,
}

impl<S: VideoStream> Default for Session<S> {
    fn default() -> Self {
        Self {
            running: false,
            stream: None,
            loop_state: LoopState::Idle,
        }
    }
}

impl<S: VideoStream> Session<S> {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    pub fn stream_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    pub fn active_tracks(&self) -> usize {
        self.stream.as_ref().map_or(0, |stream| stream.active_tracks())
    }

    /// Attaches a new stream, stopping whatever was attached before.
    pub fn start(&mut self, stream: S) {
        self.stop_stream();
        self.stream = Some(stream);
        self.running = true;
        self.loop_state = LoopState::AwaitingFirstFrame;
    }

    /// First frame decoded, the loop can start.
    pub fn mark_streaming(&mut self) {
        if self.running {
            self.loop_state = LoopState::Running;
        }
    }

    /// Clears the running flag and tears the stream down.
    pub fn stop(&mut self) {
        self.running = false;
        self.loop_state = LoopState::Idle;
        self.stop_stream();
    }

    pub(crate) fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, VideoFrame};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Frame;

    impl VideoFrame for Frame {
        fn dimensions(&self) -> (u32, u32) {
            (1, 1)
        }
    }

    struct CountingStream {
        live: Rc<Cell<usize>>,
        stopped: bool,
    }

    impl CountingStream {
        fn new(live: &Rc<Cell<usize>>) -> Self {
            live.set(live.get() + 1);
            Self {
                live: live.clone(),
                stopped: false,
            }
        }
    }

    impl VideoStream for CountingStream {
        type Frame = Frame;

        fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            Ok(Some(Frame))
        }

        fn active_tracks(&self) -> usize {
            usize::from(!self.stopped)
        }

        fn stop(&mut self) {
            if !self.stopped {
                self.stopped = true;
                self.live.set(self.live.get() - 1);
            }
        }
    }

    #[test]
    fn start_replaces_previous_stream() {
        let live = Rc::new(Cell::new(0));
        let mut session = Session::default();
        session.start(CountingStream::new(&live));
        session.start(CountingStream::new(&live));
        assert_eq!(live.get(), 1);
        assert_eq!(session.active_tracks(), 1);
        assert!(session.is_running());
        assert_eq!(session.loop_state(), LoopState::AwaitingFirstFrame);
    }

    #[test]
    fn stop_clears_everything() {
        let live = Rc::new(Cell::new(0));
        let mut session = Session::default();
        session.start(CountingStream::new(&live));
        session.mark_streaming();
        assert_eq!(session.loop_state(), LoopState::Running);
        session.stop();
        assert_eq!(live.get(), 0);
        assert_eq!(session.active_tracks(), 0);
        assert!(!session.is_running());
        assert!(session.stream_mut().is_none());
        session.mark_streaming();
        assert_eq!(session.loop_state(), LoopState::Idle);
    }
}
