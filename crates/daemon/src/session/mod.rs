//! Session management module.
//!
//! This module provides the shared-terminal session core: the PTY-attached
//! child process, the per-viewer connection wrapper, and the broadcaster
//! fanning one output stream out to every connected viewer.

pub mod broadcaster;
pub mod pty;
pub mod viewer;

pub use broadcaster::SessionBroadcaster;
pub use pty::{PtyError, PtyProcess};
pub use viewer::{FrameSink, FrameStream, TransportError, ViewerConnection, ViewerState};

use std::sync::Arc;

/// Capability for routing viewer activity back to the shared terminal.
///
/// The two operations the broadcaster needs from the process side.
pub trait InputSink: Send + Sync {
    /// Writes viewer keystrokes to the process input.
    ///
    /// Returns the number of bytes written.
    fn write_input(&self, data: &[u8]) -> Result<usize, PtyError>;

    /// Asks the process to repaint its screen.
    fn request_refresh(&self);
}

impl InputSink for Arc<PtyProcess> {
    fn write_input(&self, data: &[u8]) -> Result<usize, PtyError> {
        self.write(data)
    }

    fn request_refresh(&self) {
        PtyProcess::refresh(self);
    }
}
