//! # termshare Server Library
//!
//! This crate implements the termshare server: it runs one command inside a
//! pseudo-terminal and shares that live session with remote viewers over
//! WebSockets.
//!
//! ## Overview
//!
//! The server owns a single terminal session end to end:
//!
//! - **PTY Process**: spawn the shared command, pump its output, resize it
//! - **Session Broadcasting**: fan output out to every connected viewer and
//!   route viewer keystrokes back in
//! - **WebSocket Endpoint**: accept viewers at `/s/{name}/ws`
//! - **Local Terminal**: mirror the session on the operator's terminal,
//!   forwarding raw keystrokes and window size changes
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       termshare-server                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │   ┌──────────────┐    output     ┌────────────────────────┐  │
//! │   │  PtyProcess  │──────────────▶│   SessionBroadcaster   │  │
//! │   │ (the shell)  │◀──────────────│   (viewer registry)    │  │
//! │   └──────────────┘    input      └───────────┬────────────┘  │
//! │          ▲                                   │ fan-out        │
//! │          │ keystrokes             ┌──────────┴──────────┐    │
//! │          │                        ▼                     ▼    │
//! │   operator terminal        WebSocket viewer    WebSocket ... │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::config::Config;
//! use daemon::session::{PtyProcess, SessionBroadcaster};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     // Spawn the shared command inside a PTY
//!     let (pty, mut output, _sizes) = PtyProcess::spawn(
//!         &config.terminal.command,
//!         &config.terminal.args,
//!         Vec::new(),
//!         config.terminal.cols,
//!         config.terminal.rows,
//!     )?;
//!     let pty = Arc::new(pty);
//!     pty.start_read_loop();
//!
//!     // Fan its output out to every connected viewer
//!     let broadcaster = Arc::new(SessionBroadcaster::new(
//!         Arc::clone(&pty),
//!         config.terminal.cols,
//!         config.terminal.rows,
//!     ));
//!
//!     // Accept viewers over WebSocket
//!     let app = daemon::server::router(Arc::clone(&broadcaster), &config.server.session_name);
//!     let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
//!     tokio::spawn(daemon::server::serve(listener, app, CancellationToken::new()));
//!
//!     while let Some(chunk) = output.recv().await {
//!         broadcaster.broadcast(&chunk).await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, validation, and defaults
//! - [`session`]: PTY process lifecycle and viewer fan-out
//! - [`server`]: WebSocket endpoint for remote viewers
//! - [`term`]: Local terminal raw mode and size queries

pub mod config;
pub mod server;
pub mod session;
pub mod term;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError, ServerConfig, TerminalConfig};

// Re-export session types for convenience
pub use session::{
    FrameSink, FrameStream, InputSink, PtyError, PtyProcess, SessionBroadcaster, TransportError,
    ViewerConnection, ViewerState,
};

// Re-export server types for convenience
pub use server::{router, serve, WsFrameSink, WsFrameStream};

// Re-export terminal helpers for convenience
pub use term::{stdin_is_tty, terminal_size, RawModeGuard};
