//! PTY process management.
//!
//! This module owns the single child process behind a shared session. The
//! child runs attached to a pseudo-terminal: output is drained by one
//! blocking reader task and handed to the session pump over a bounded
//! channel, input arrives through [`PtyProcess::write`], and every size
//! change is reported on a size-event channel the session turns into
//! viewer broadcasts.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Errors that can occur during PTY operations.
#[derive(Error, Debug)]
pub enum PtyError {
    /// Failed to allocate the PTY pair.
    #[error("failed to open PTY: {0}")]
    OpenPty(String),

    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Failed to write to the child's input.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to read the child's output.
    #[error("failed to read from PTY: {0}")]
    ReadFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to deliver a signal to the child.
    #[error("failed to signal process: {0}")]
    SignalFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Buffer size for reading from the PTY master.
const READ_BUFFER_SIZE: usize = 4096;

/// Capacity of the output channel between the reader and the session pump.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// How long the refresh pulse holds the shrunken size before restoring.
const REFRESH_PULSE_DELAY: Duration = Duration::from_millis(50);

/// Polling interval while waiting for the child to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A child process attached to a pseudo-terminal.
///
/// One session owns exactly one `PtyProcess`. Once the child has exited the
/// process cannot be restarted; the owning session tears down instead.
pub struct PtyProcess {
    /// The PTY master handle.
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,

    /// Writer to the child's input. Guarded so keystrokes from concurrent
    /// viewers cannot interleave mid-write.
    writer: std::sync::Mutex<Box<dyn Write + Send>>,

    /// The child process.
    child: Mutex<Box<dyn Child + Send + Sync>>,

    /// Sender feeding the session pump with output chunks. Taken by the
    /// reader task so the channel closes when the output stream ends.
    output_tx: std::sync::Mutex<Option<mpsc::Sender<Vec<u8>>>>,

    /// Size events consumed by the session's size pump.
    size_tx: mpsc::UnboundedSender<(u16, u16)>,

    /// False once the child has exited or the output stream ended.
    running: Arc<AtomicBool>,

    /// Current terminal size as (cols, rows).
    size: std::sync::Mutex<(u16, u16)>,

    /// True while a refresh pulse is in flight. Concurrent refresh requests
    /// coalesce into the running pulse.
    refresh_active: AtomicBool,

    /// Process ID of the child.
    pid: Option<u32>,
}

impl PtyProcess {
    /// Spawns `command` with `args` inside a fresh PTY of the given size.
    ///
    /// The child gets the slave side as its controlling terminal and sees
    /// `TERMSHARE=1` in its environment. Extra environment variables can be
    /// passed through `env`.
    ///
    /// Returns the process handle, the receiver carrying output chunks, and
    /// the receiver carrying size events. Every resize (including refresh
    /// pulses) shows up as one `(cols, rows)` event.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: Vec<(String, String)>,
        cols: u16,
        rows: u16,
    ) -> Result<
        (
            Self,
            mpsc::Receiver<Vec<u8>>,
            mpsc::UnboundedReceiver<(u16, u16)>,
        ),
        PtyError,
    > {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::OpenPty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.env("TERMSHARE", "1");
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        // Close our copy of the slave so master reads end when the child
        // exits.
        drop(pair.slave);

        let pid = child.process_id();

        let writer = match pair.master.take_writer() {
            Ok(writer) => writer,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PtyError::SpawnFailed(e.to_string()));
            }
        };

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (size_tx, size_rx) = mpsc::unbounded_channel();

        let process = PtyProcess {
            master: Arc::new(Mutex::new(pair.master)),
            writer: std::sync::Mutex::new(writer),
            child: Mutex::new(child),
            output_tx: std::sync::Mutex::new(Some(output_tx)),
            size_tx,
            running: Arc::new(AtomicBool::new(true)),
            size: std::sync::Mutex::new((cols, rows)),
            refresh_active: AtomicBool::new(false),
            pid,
        };

        tracing::info!(command, pid, cols, rows, "Spawned PTY process");

        Ok((process, output_rx, size_rx))
    }

    /// Returns the process ID of the child, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns the current terminal size as (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap()
    }

    /// Returns whether the child is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Writes data to the child's input and returns the number of bytes
    /// written.
    ///
    /// Writes are serialized; two viewers typing at once produce two whole
    /// writes, never an interleaving.
    pub fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        if !self.is_running() {
            return Err(PtyError::WriteFailed("process has exited".to_string()));
        }

        let mut writer = self.writer.lock().unwrap();
        writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;

        Ok(data.len())
    }

    /// Starts the read loop draining the child's output.
    ///
    /// A single blocking task reads from the master and hands each chunk to
    /// the output channel. The loop ends at end-of-stream (the child exited
    /// and the master drained) or when the receiving side is dropped; either
    /// way the output channel closes. A second call does nothing.
    pub fn start_read_loop(&self) {
        let Some(output_tx) = self.output_tx.lock().unwrap().take() else {
            tracing::warn!("Read loop already started");
            return;
        };
        let master = Arc::clone(&self.master);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let reader = {
                let master = master.lock().await;
                match master.try_clone_reader() {
                    Ok(reader) => reader,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to get PTY reader");
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            };

            let result = tokio::task::spawn_blocking(move || -> Result<(), PtyError> {
                let mut reader = reader;
                let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                loop {
                    match reader.read(&mut buffer) {
                        Ok(0) => return Ok(()),
                        Ok(n) => {
                            if output_tx.blocking_send(buffer[..n].to_vec()).is_err() {
                                // Pump gone, session is tearing down.
                                return Ok(());
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(PtyError::ReadFailed(e.to_string())),
                    }
                }
            })
            .await;

            match result {
                Ok(Ok(())) => tracing::info!("PTY output stream ended"),
                // Linux reports EIO on the master once the child is gone, so
                // this is the normal exit path too.
                Ok(Err(e)) => tracing::debug!(error = %e, "PTY output stream ended"),
                Err(e) => tracing::error!(error = %e, "PTY reader task panicked"),
            }

            running.store(false, Ordering::SeqCst);
        });
    }

    /// Resizes the PTY to the given dimensions.
    ///
    /// Best-effort: a resize after the child has exited is ignored. On
    /// success the new size is reported on the size-event channel.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if !self.is_running() {
            tracing::debug!(cols, rows, "Ignoring resize, process has exited");
            return Ok(());
        }

        let master = self.master.lock().await;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))?;

        // The size event goes out while the master lock is still held so
        // events arrive in the same order the kernel saw the resizes.
        *self.size.lock().unwrap() = (cols, rows);
        let _ = self.size_tx.send((cols, rows));

        tracing::debug!(cols, rows, "Resized PTY");

        Ok(())
    }

    /// Forces the child's interactive application to repaint.
    ///
    /// There is no portable repaint signal, so the terminal is shrunk by one
    /// row and restored shortly after, which makes full-screen programs
    /// redraw. Both resizes surface as size events.
    pub fn refresh(self: &Arc<Self>) {
        if self.refresh_active.swap(true, Ordering::SeqCst) {
            // A pulse is already in flight; it repaints for everyone.
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let (cols, rows) = this.size();
            if rows > 1 && this.resize(cols, rows - 1).await.is_ok() {
                tokio::time::sleep(REFRESH_PULSE_DELAY).await;
                // A real resize may have landed during the pulse. It
                // supersedes the restore.
                if this.size() == (cols, rows - 1) {
                    let _ = this.resize(cols, rows).await;
                }
            }
            this.refresh_active.store(false, Ordering::SeqCst);
        });
    }

    /// Delivers a signal to the child process.
    pub fn signal(&self, signal: Signal) -> Result<(), PtyError> {
        let pid = self
            .pid
            .ok_or_else(|| PtyError::SignalFailed("no process id".to_string()))?;
        signal::kill(Pid::from_raw(pid as i32), signal)
            .map_err(|e| PtyError::SignalFailed(e.to_string()))
    }

    /// Waits for the child to exit and returns its exit code.
    ///
    /// Polls rather than blocking on the child so a concurrent `shutdown`
    /// can still take the child lock to kill. Harmless to call again after
    /// the child has exited.
    pub async fn wait(&self) -> Result<u32, PtyError> {
        loop {
            {
                let mut child = self.child.lock().await;
                match child.try_wait() {
                    Ok(Some(status)) => {
                        self.running.store(false, Ordering::SeqCst);
                        let code = status.exit_code();
                        tracing::info!(code, "Child process exited");
                        return Ok(code);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.running.store(false, Ordering::SeqCst);
                        return Err(PtyError::Io(e));
                    }
                }
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    /// Terminates the child: SIGTERM first, then SIGKILL if it is still
    /// alive after `grace`.
    ///
    /// Signal delivery failures are logged and the escalation continues.
    /// Returns the child's exit code.
    pub async fn shutdown(&self, grace: Duration) -> Result<u32, PtyError> {
        if self.is_running() {
            tracing::debug!(pid = self.pid, "Sending SIGTERM to child");
            if let Err(e) = self.signal(Signal::SIGTERM) {
                tracing::warn!(error = %e, "Failed to signal child");
            }
        }

        match tokio::time::timeout(grace, self.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Child did not exit within grace period, killing"
                );
                {
                    let mut child = self.child.lock().await;
                    if let Err(e) = child.kill() {
                        tracing::warn!(error = %e, "Failed to kill child");
                    }
                }
                self.wait().await
            }
        }
    }
}
