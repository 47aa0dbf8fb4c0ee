//! Session output fan-out.
//!
//! This module broadcasts PTY output to every connected viewer and routes
//! viewer input back to the shared terminal. Viewers join and leave freely
//! mid-broadcast: the registry lock is only ever held to snapshot or mutate
//! the viewer map, never across a transport send.

use std::collections::BTreeMap;
use std::sync::Arc;

use protocol::{Message, ProtocolError};
use tokio::sync::{Mutex, RwLock};

use super::viewer::{FrameSink, FrameStream, ViewerConnection};
use super::InputSink;

/// Registered viewers plus the last-known window size.
struct Registry<T> {
    /// Next connection id to hand out.
    next_id: u64,

    /// Viewers by connection id. Ordered, so fan-out visits viewers in
    /// registration order.
    viewers: BTreeMap<u64, Arc<ViewerConnection<T>>>,

    /// Last-known terminal size as (cols, rows), sent to joining viewers.
    win_size: (u16, u16),
}

/// Fans one terminal byte stream out to every registered viewer.
///
/// Input routing goes through the injected [`InputSink`]; transports only
/// need to implement [`FrameSink`]/[`FrameStream`], so the whole engine runs
/// in tests without sockets.
pub struct SessionBroadcaster<I, T> {
    /// Routes viewer keystrokes and refresh requests to the process.
    input: I,

    /// Viewer registry. Held briefly, never across a send.
    registry: RwLock<Registry<T>>,

    /// Serializes complete fan-out operations (broadcast, size update,
    /// registration) so no viewer ever observes interleaved messages.
    fanout_gate: Mutex<()>,
}

impl<I: InputSink, T: FrameSink> SessionBroadcaster<I, T> {
    /// Creates a broadcaster with no viewers and the given initial size.
    pub fn new(input: I, cols: u16, rows: u16) -> Self {
        Self {
            input,
            registry: RwLock::new(Registry {
                next_id: 0,
                viewers: BTreeMap::new(),
                win_size: (cols, rows),
            }),
            fanout_gate: Mutex::new(()),
        }
    }

    /// Registers a viewer and sends it the current window size.
    ///
    /// Both steps happen under the fan-out gate, so a concurrent broadcast
    /// cannot deliver terminal bytes ahead of the initial size message.
    pub async fn register(&self, sink: T) -> Arc<ViewerConnection<T>> {
        let _gate = self.fanout_gate.lock().await;

        let (viewer, (cols, rows)) = {
            let mut registry = self.registry.write().await;
            let id = registry.next_id;
            registry.next_id += 1;
            let viewer = Arc::new(ViewerConnection::new(id, sink));
            registry.viewers.insert(id, Arc::clone(&viewer));
            (viewer, registry.win_size)
        };

        if let Err(e) = viewer.send(&Message::win_size(cols, rows)).await {
            // The viewer's read loop will notice the dead transport and
            // unregister shortly.
            tracing::debug!(viewer_id = viewer.id(), error = %e, "Initial size send failed");
        }

        tracing::debug!(viewer_id = viewer.id(), cols, rows, "Viewer registered");
        viewer
    }

    /// Removes a viewer from the registry. Idempotent.
    ///
    /// Deliberately does not take the fan-out gate: a viewer leaving during
    /// an in-flight broadcast must not wait for it. The snapshot discipline
    /// means it may still receive the message being fanned out.
    pub async fn unregister(&self, id: u64) {
        let removed = self.registry.write().await.viewers.remove(&id).is_some();
        if removed {
            tracing::debug!(viewer_id = id, "Viewer unregistered");
        }
    }

    /// Delivers terminal output to every registered viewer.
    pub async fn broadcast(&self, data: &[u8]) {
        let _gate = self.fanout_gate.lock().await;
        self.fan_out(&Message::write(data)).await;
    }

    /// Updates the stored window size and announces it to every viewer.
    pub async fn set_window_size(&self, cols: u16, rows: u16) {
        let _gate = self.fanout_gate.lock().await;
        self.registry.write().await.win_size = (cols, rows);
        self.fan_out(&Message::win_size(cols, rows)).await;
    }

    /// Snapshot the registry, send to each viewer outside the lock, then
    /// drop viewers whose send failed. Callers hold the fan-out gate.
    async fn fan_out(&self, msg: &Message) {
        let viewers: Vec<Arc<ViewerConnection<T>>> = {
            let registry = self.registry.read().await;
            registry.viewers.values().cloned().collect()
        };

        let mut failed = Vec::new();
        for viewer in &viewers {
            if let Err(e) = viewer.send(msg).await {
                tracing::debug!(
                    viewer_id = viewer.id(),
                    error = %e,
                    "Dropping viewer after failed send"
                );
                failed.push(viewer.id());
            }
        }

        if !failed.is_empty() {
            let mut registry = self.registry.write().await;
            for id in failed {
                registry.viewers.remove(&id);
            }
        }
    }

    /// Forwards viewer keystrokes to the process input.
    pub fn write_input(&self, data: &[u8]) {
        if let Err(e) = self.input.write_input(data) {
            tracing::warn!(error = %e, "Failed to forward viewer input");
        }
    }

    /// Asks the process to repaint, on behalf of a viewer.
    pub fn request_refresh(&self) {
        self.input.request_refresh();
    }

    /// Handles one inbound frame from a viewer.
    ///
    /// `Write` carries keystrokes for the process. `WinSize`, like any other
    /// recognized-but-unexpected control event, is a redraw request: the
    /// shared terminal's size is server-driven, viewers never resize it.
    /// Undecodable frames are dropped.
    pub fn dispatch_frame(&self, frame: &[u8]) {
        match protocol::decode(frame) {
            Ok(Message::Write(write)) => self.write_input(&write.data),
            Ok(Message::WinSize(_)) => self.request_refresh(),
            Err(ProtocolError::UnknownMessageType { msg_type }) => {
                tracing::debug!(msg_type, "Unrecognized viewer event, requesting refresh");
                self.request_refresh();
            }
            Err(e) => {
                tracing::debug!(error = %e, "Dropping undecodable viewer frame");
            }
        }
    }

    /// Runs one viewer's full lifetime: register, pump inbound frames,
    /// unregister, close. Returns when the transport ends.
    pub async fn attach<S: FrameStream>(&self, sink: T, mut stream: S) {
        let viewer = self.register(sink).await;

        // Ask the process to repaint so the newcomer sees content. After
        // registration, so the pulse's size events cannot outrun the
        // initial size message.
        self.request_refresh();

        while let Some(result) = stream.next_frame().await {
            match result {
                Ok(frame) => self.dispatch_frame(&frame),
                Err(e) => {
                    tracing::debug!(viewer_id = viewer.id(), error = %e, "Viewer transport error");
                    break;
                }
            }
        }

        // Refuse further sends, then unregister before closing so no
        // fan-out targets a closed sink.
        viewer.mark_closing();
        self.unregister(viewer.id()).await;
        viewer.close().await;
        tracing::info!(viewer_id = viewer.id(), "Viewer disconnected");
    }

    /// Returns the number of registered viewers.
    pub async fn viewer_count(&self) -> usize {
        self.registry.read().await.viewers.len()
    }

    /// Returns the last-known window size as (cols, rows).
    pub async fn window_size(&self) -> (u16, u16) {
        self.registry.read().await.win_size
    }
}
