//! WebSocket endpoint for remote viewers.
//!
//! Exposes the shared session at `/s/{name}/ws`. Each accepted upgrade
//! becomes one registered viewer: the socket's outbound half delivers
//! fan-out frames, the inbound half feeds keystrokes back to the process.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::session::{FrameSink, FrameStream, InputSink, SessionBroadcaster, TransportError};

/// Shared handler state: the session engine plus the name it answers to.
pub struct ServerState<I> {
    broadcaster: Arc<SessionBroadcaster<I, WsFrameSink>>,
    session_name: Arc<str>,
}

impl<I> Clone for ServerState<I> {
    fn clone(&self) -> Self {
        Self {
            broadcaster: Arc::clone(&self.broadcaster),
            session_name: Arc::clone(&self.session_name),
        }
    }
}

/// Builds the viewer-facing router for one session.
pub fn router<I: InputSink + 'static>(
    broadcaster: Arc<SessionBroadcaster<I, WsFrameSink>>,
    session_name: &str,
) -> Router {
    let state = ServerState {
        broadcaster,
        session_name: session_name.into(),
    };

    Router::new()
        .route("/s/{name}/ws", any(ws_handler::<I>))
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// The route is registered with [`any`] so non-GET requests reach us
/// instead of axum's default 405: session endpoints answer those with 403,
/// revealing nothing about whether the session exists.
async fn ws_handler<I: InputSink + 'static>(
    method: Method,
    Path(name): Path<String>,
    State(state): State<ServerState<I>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if method != Method::GET {
        tracing::debug!(%method, "Rejecting non-GET request to session endpoint");
        return StatusCode::FORBIDDEN.into_response();
    }

    if name != *state.session_name {
        tracing::debug!(requested = %name, "Unknown session name");
        return StatusCode::NOT_FOUND.into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| handle_viewer(socket, state.broadcaster))
}

async fn handle_viewer<I: InputSink + 'static>(
    socket: WebSocket,
    broadcaster: Arc<SessionBroadcaster<I, WsFrameSink>>,
) {
    let (sender, receiver) = socket.split();
    let sink = WsFrameSink {
        sender: Mutex::new(sender),
    };
    let stream = WsFrameStream { receiver };

    broadcaster.attach(sink, stream).await;
}

/// Outbound WebSocket half. Frames are JSON, sent as text messages.
pub struct WsFrameSink {
    sender: Mutex<SplitSink<WebSocket, WsMessage>>,
}

impl FrameSink for WsFrameSink {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8(frame).map_err(|e| TransportError::Send(e.to_string()))?;
        self.sender
            .lock()
            .await
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.sender.lock().await.send(WsMessage::Close(None)).await;
    }
}

/// Inbound WebSocket half.
pub struct WsFrameStream {
    receiver: SplitStream<WebSocket>,
}

impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(Ok(text.as_bytes().to_vec())),
                Some(Ok(WsMessage::Binary(data))) => return Some(Ok(data.to_vec())),
                Some(Ok(WsMessage::Close(_))) | None => return None,
                // Ping and pong keepalives are answered by the transport.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(Err(TransportError::Recv(e.to_string()))),
            }
        }
    }
}
