//! Per-viewer connection handling.
//!
//! A [`ViewerConnection`] wraps one remote viewer's outbound transport. The
//! transport itself is abstracted behind [`FrameSink`] and [`FrameStream`]
//! so the session core can be driven in tests without sockets.

use std::sync::atomic::{AtomicU8, Ordering};

use protocol::Message;
use thiserror::Error;

/// Errors from a viewer's transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The connection is closed or closing.
    #[error("transport closed")]
    Closed,

    /// Sending a frame failed.
    #[error("transport send failed: {0}")]
    Send(String),

    /// Receiving a frame failed.
    #[error("transport receive failed: {0}")]
    Recv(String),
}

/// Outbound half of a viewer transport: delivers one encoded message per
/// frame.
#[allow(async_fn_in_trait)]
pub trait FrameSink: Send + Sync {
    /// Sends one frame. May suspend while the transport applies
    /// backpressure.
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Closes the transport. Best-effort, called at most once.
    async fn close(&self);
}

/// Inbound half of a viewer transport: yields one frame per inbound
/// message, `None` at end of stream.
#[allow(async_fn_in_trait)]
pub trait FrameStream: Send {
    /// Waits for the next inbound frame.
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>>;
}

/// Lifecycle of a viewer connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    /// Registered and receiving output.
    Connected,
    /// Teardown has begun; no further sends.
    Closing,
    /// The transport has been closed.
    Closed,
}

const STATE_CONNECTED: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// One connected viewer.
///
/// Owned by the session broadcaster for its registered lifetime. Sends go
/// through [`send`](ViewerConnection::send), which refuses once teardown has
/// begun.
pub struct ViewerConnection<T> {
    /// Unique connection id, assigned at registration.
    id: u64,

    /// Outbound transport.
    sink: T,

    /// Current [`ViewerState`].
    state: AtomicU8,
}

impl<T: FrameSink> ViewerConnection<T> {
    /// Wraps a transport sink as a connected viewer.
    pub fn new(id: u64, sink: T) -> Self {
        Self {
            id,
            sink,
            state: AtomicU8::new(STATE_CONNECTED),
        }
    }

    /// Returns the connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ViewerState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CONNECTED => ViewerState::Connected,
            STATE_CLOSING => ViewerState::Closing,
            _ => ViewerState::Closed,
        }
    }

    /// Encodes `msg` and sends it as one frame.
    ///
    /// Fails with [`TransportError::Closed`] once teardown has begun.
    pub async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        if self.state() != ViewerState::Connected {
            return Err(TransportError::Closed);
        }

        let frame = protocol::encode(msg).map_err(|e| TransportError::Send(e.to_string()))?;
        self.sink.send(frame).await
    }

    /// Marks the connection as closing.
    ///
    /// Returns true if this call made the transition, false if teardown had
    /// already begun.
    pub fn mark_closing(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_CONNECTED,
                STATE_CLOSING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Closes the underlying transport. Idempotent: only the call that
    /// moves the state to `Closed` touches the sink.
    pub async fn close(&self) {
        let prev = self.state.swap(STATE_CLOSED, Ordering::SeqCst);
        if prev != STATE_CLOSED {
            self.sink.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        closes: Arc<AtomicUsize>,
    }

    impl FrameSink for RecordingSink {
        async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
            self.frames.lock().await.push(frame);
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_send_delivers_encoded_frame() {
        let sink = RecordingSink::default();
        let frames = Arc::clone(&sink.frames);
        let viewer = ViewerConnection::new(1, sink);

        viewer.send(&Message::write(b"hello")).await.unwrap();

        let frames = frames.lock().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(protocol::decode(&frames[0]).unwrap(), Message::write(b"hello"));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let sink = RecordingSink::default();
        let frames = Arc::clone(&sink.frames);
        let viewer = ViewerConnection::new(1, sink);

        viewer.close().await;

        let result = viewer.send(&Message::win_size(80, 24)).await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(frames.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let sink = RecordingSink::default();
        let closes = Arc::clone(&sink.closes);
        let viewer = ViewerConnection::new(1, sink);

        viewer.close().await;
        viewer.close().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(viewer.state(), ViewerState::Closed);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let viewer = ViewerConnection::new(1, RecordingSink::default());
        assert_eq!(viewer.state(), ViewerState::Connected);

        assert!(viewer.mark_closing());
        assert_eq!(viewer.state(), ViewerState::Closing);
        assert!(!viewer.mark_closing());

        viewer.close().await;
        assert_eq!(viewer.state(), ViewerState::Closed);
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Closed.to_string(), "transport closed");
        assert_eq!(
            TransportError::Send("broken pipe".to_string()).to_string(),
            "transport send failed: broken pipe"
        );
        assert_eq!(
            TransportError::Recv("reset".to_string()).to_string(),
            "transport receive failed: reset"
        );
    }
}
