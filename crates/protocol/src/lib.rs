//! # termshare Protocol Library
//!
//! This crate provides the wire protocol for the termshare terminal sharing
//! system.
//!
//! ## Overview
//!
//! The protocol crate is the foundation of termshare's communication layer,
//! providing:
//!
//! - **Message Definitions**: Terminal data and window size message types
//! - **Envelope Codec**: Two-stage JSON encoding with base64 byte fields
//! - **Error Types**: Decode failures callers can drop without tearing down
//!   a connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │    Typed Messages (Write, WinSize)      │  JSON-encoded payload
//! ├─────────────────────────────────────────┤
//! │      Envelope ("Type" + "Data")         │  JSON, base64 byte fields
//! ├─────────────────────────────────────────┤
//! │       Transport (WebSocket text)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{decode, encode, Message};
//!
//! // Wrap terminal output for the wire
//! let frame = encode(&Message::write(b"hello\r\n")).unwrap();
//!
//! // The receiving side gets the same message back
//! let msg = decode(&frame).unwrap();
//! assert_eq!(msg, Message::write(b"hello\r\n"));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Protocol message definitions and the envelope codec
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    decode, encode, Envelope, Message, TermWrite, WinSize, MSG_TYPE_WINSIZE, MSG_TYPE_WRITE,
};
