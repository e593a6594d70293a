//! WebSocket upgrade handling.
//!
//! # Responsibilities
//! - Enforce the origin allow-list on upgrade requests
//! - Complete the upgrade handshake and hand the socket to a `Session`
//! - Adapt the upgraded socket to `FrameSource`/`FrameSink`
//!
//! # Data Flow
//! ```text
//! GET /ws (bearer already validated by the gate)
//!     → origin check
//!     → WebSocketUpgrade::on_upgrade
//!     → socket.split() → WsFrameSource + WsFrameSink → Session::run
//! ```
//!
//! # Design Decisions
//! - The socket delivers whole messages; each is handed to the session as
//!   buffer-sized fragments with the last one marking end of message
//! - Ping/pong stays at the protocol layer and is invisible to sessions

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};

use crate::http::response;
use crate::http::server::AppState;
use crate::security::gate::AuthContext;
use crate::session::channel::{FrameSink, FrameSource, MessageKind, Received, TransportError};
use crate::session::engine::Session;

const CLOSE_REASON: &str = "Session closed";

/// Receiving half of an upgraded socket.
pub struct WsFrameSource {
    stream: SplitStream<WebSocket>,
    carry: Option<(Bytes, usize)>,
}

impl WsFrameSource {
    pub fn new(stream: SplitStream<WebSocket>) -> Self {
        Self {
            stream,
            carry: None,
        }
    }
}

/// Copy the next chunk of `data` starting at `offset` into `buffer`.
///
/// Returns the fragment and the remainder still to deliver.
fn chunk(data: Bytes, offset: usize, buffer: &mut [u8]) -> (Received, Option<(Bytes, usize)>) {
    let count = (data.len() - offset).min(buffer.len());
    buffer[..count].copy_from_slice(&data[offset..offset + count]);
    let consumed = offset + count;

    if consumed < data.len() {
        (
            Received::Fragment {
                count,
                end_of_message: false,
            },
            Some((data, consumed)),
        )
    } else {
        (
            Received::Fragment {
                count,
                end_of_message: true,
            },
            None,
        )
    }
}

impl FrameSource for WsFrameSource {
    fn receive<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> BoxFuture<'a, Result<Received, TransportError>> {
        async move {
            if let Some((data, offset)) = self.carry.take() {
                let (received, rest) = chunk(data, offset, buffer);
                self.carry = rest;
                return Ok(received);
            }

            loop {
                let data = match self.stream.next().await {
                    Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                        message.into_data()
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => return Ok(Received::Closed),
                    Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                };

                let (received, rest) = chunk(data, 0, buffer);
                self.carry = rest;
                return Ok(received);
            }
        }
        .boxed()
    }
}

/// Sending half of an upgraded socket.
pub struct WsFrameSink {
    sink: SplitSink<WebSocket, Message>,
}

impl WsFrameSink {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

impl FrameSink for WsFrameSink {
    fn send_message(
        &mut self,
        payload: Bytes,
        kind: MessageKind,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            let message = match kind {
                MessageKind::Binary => Message::Binary(payload),
                MessageKind::Text => {
                    let text = String::from_utf8(payload.to_vec())
                        .map_err(|_| TransportError::InvalidText)?;
                    Message::Text(text.into())
                }
            };
            self.sink
                .send(message)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            self.sink
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: Utf8Bytes::from_static(CLOSE_REASON),
                })))
                .await
                .map_err(|e| TransportError::Io(e.to_string()))
        }
        .boxed()
    }
}

/// Whether `origin` may upgrade. An empty allow-list admits everything.
pub fn origin_allowed(allowed: &[String], origin: Option<&HeaderValue>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(origin) = origin.and_then(|o| o.to_str().ok()) else {
        return false;
    };
    let origin = origin.trim_end_matches('/');
    allowed
        .iter()
        .any(|a| a == "*" || a.trim_end_matches('/').eq_ignore_ascii_case(origin))
}

/// Upgrade handler for the duplex endpoint.
///
/// Requests that are not upgrades are passed to the unhandled response.
pub async fn upgrade_handler(State(state): State<AppState>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Not a WebSocket upgrade request");
            return state
                .unhandled
                .handle(Request::from_parts(parts, body))
                .await;
        }
    };

    let origin = parts.headers.get(header::ORIGIN);
    if !origin_allowed(&state.allowed_origins, origin) {
        tracing::info!(origin = ?origin, "WebSocket upgrade from disallowed origin");
        return response::failure(StatusCode::FORBIDDEN);
    }

    let auth = parts.extensions.get::<AuthContext>().cloned();
    upgrade.on_upgrade(move |socket| run_session(state, socket, auth))
}

async fn run_session(state: AppState, socket: WebSocket, auth: Option<AuthContext>) {
    let (sink, stream) = socket.split();
    let session = Session::new(
        Box::new(WsFrameSource::new(stream)),
        Box::new(WsFrameSink::new(sink)),
        state.pool.clone(),
        state.handler.clone(),
        state.ticker.clone(),
        state.session_settings,
        auth,
    );

    let _registration = state.sessions.register(session.handle());
    session.run().await;
}
