//! WebSocket relay that lets Mechmaze devices on different networks share a
//! session. The relay understands only its own control frames; peer payloads
//! are forwarded opaquely between members of a join-code room.

pub mod relay;

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};

use mechmaze_core::net::messages::{RelayErrorMsg, RelayMessage};
use mechmaze_core::net::protocol::{MAX_MESSAGE_SIZE, PROTOCOL_VERSION, decode_relay_message};
use mechmaze_core::player::PeerId;
use mechmaze_core::room::{generate_join_code, normalize_join_code};

use relay::{RelayState, SharedRelayState, send_frame};

/// Attempts at finding an unused join code before giving up.
const CODE_ATTEMPTS: usize = 8;

/// Build the relay router (`GET /relay`).
pub fn build_app(max_rooms: usize) -> Router {
    let state: SharedRelayState = Arc::new(RwLock::new(RelayState::new(max_rooms)));
    Router::new()
        .route("/relay", axum::routing::get(relay_ws_handler))
        .with_state(state)
}

/// Serve the relay on an already-bound listener until it fails.
pub async fn serve(listener: TcpListener, max_rooms: usize) -> std::io::Result<()> {
    axum::serve(listener, build_app(max_rooms)).await
}

async fn relay_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedRelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_relay_socket(socket, state))
}

async fn handle_relay_socket(socket: WebSocket, state: SharedRelayState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    spawn_relay_writer(ws_sender, rx);

    // First frame must be a Join.
    let join = match ws_receiver.next().await {
        Some(Ok(Message::Binary(data))) => match decode_relay_message(&data) {
            Ok(RelayMessage::Join(j)) => j,
            Ok(other) => {
                tracing::debug!(kind = ?other.message_type(), "Expected relay join");
                return;
            },
            Err(e) => {
                tracing::debug!(error = %e, "Undecodable relay join");
                return;
            },
        },
        _ => return,
    };

    if join.protocol_version != PROTOCOL_VERSION {
        reject(&tx, format!("protocol version {} not supported", join.protocol_version));
        return;
    }

    let joined = if join.join_code.is_empty() {
        create_room(&state, tx.clone()).await
    } else {
        match normalize_join_code(&join.join_code) {
            Ok(code) => {
                let mut relay = state.write().await;
                relay
                    .join_room(&code, tx.clone())
                    .map(|id| (code, id))
                    .map_err(|e| e.to_string())
            },
            Err(e) => Err(e.to_string()),
        }
    };
    let (code, peer) = match joined {
        Ok(j) => j,
        Err(reason) => {
            tracing::warn!(join_code = %join.join_code, %reason, "Relay join refused");
            reject(&tx, reason);
            return;
        },
    };
    tracing::info!(join_code = %code, peer, "Peer joined relay room");

    member_read_loop(&mut ws_receiver, &state, &code, peer).await;

    let destroyed = state.write().await.leave_room(&code, peer);
    tracing::info!(join_code = %code, peer, destroyed, "Peer left relay room");
}

async fn create_room(
    state: &SharedRelayState,
    tx: relay::MemberTx,
) -> Result<(String, PeerId), String> {
    let mut relay = state.write().await;
    let mut last_err = String::from("no join code available");
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_join_code();
        match relay.create_room(code.clone(), tx.clone()) {
            Ok(id) => return Ok((code, id)),
            Err(relay::RelayError::RoomExists(_)) => continue,
            Err(e) => {
                last_err = e.to_string();
                break;
            },
        }
    }
    Err(last_err)
}

fn reject(tx: &relay::MemberTx, reason: String) {
    send_frame(tx, &RelayMessage::Error(RelayErrorMsg { reason }));
}

fn spawn_relay_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64,
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Forward a member's frames until it disconnects. Only `Forward` frames
/// are accepted after the join.
async fn member_read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &SharedRelayState,
    code: &str,
    peer: PeerId,
) {
    // A 60 Hz state stream plus outcomes, with headroom.
    let mut rate_limiter = RateLimiter::new(240.0, 120.0);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };

        if data.is_empty() {
            continue;
        }

        if data.len() > MAX_MESSAGE_SIZE {
            tracing::warn!(join_code = code, peer, size = data.len(), "Oversized frame dropped");
            continue;
        }

        if !rate_limiter.allow() {
            tracing::warn!(join_code = code, peer, "Peer rate limited");
            continue;
        }

        match decode_relay_message(&data) {
            Ok(RelayMessage::Forward(fwd)) => {
                let mut relay = state.write().await;
                relay.forward(code, peer, fwd.to, fwd.payload);
            },
            Ok(other) => {
                tracing::debug!(join_code = code, peer, kind = ?other.message_type(), "Unexpected relay frame");
            },
            Err(e) => {
                tracing::debug!(join_code = code, peer, error = %e, "Undecodable relay frame");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_refuses_burst_beyond_capacity() {
        let mut limiter = RateLimiter::new(3.0, 0.0);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test]
    async fn create_room_returns_fresh_code() {
        let state: SharedRelayState = Arc::new(RwLock::new(RelayState::new(4)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let (code, id) = create_room(&state, tx).await.unwrap();
        assert_eq!(id, 1);
        assert!(normalize_join_code(&code).is_ok());
        assert!(state.read().await.room_exists(&code));
    }

    #[tokio::test]
    async fn create_room_reports_limit() {
        let state: SharedRelayState = Arc::new(RwLock::new(RelayState::new(0)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = create_room(&state, tx).await.unwrap_err();
        assert_eq!(err, "maximum room limit reached");
    }
}
