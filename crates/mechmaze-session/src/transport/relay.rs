use std::collections::BTreeSet;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use mechmaze_core::net::messages::{RelayForwardMsg, RelayJoinMsg, RelayMessage};
use mechmaze_core::net::protocol::{PROTOCOL_VERSION, decode_relay_message, encode_relay_message};
use mechmaze_core::player::PeerId;
use mechmaze_core::room::normalize_join_code;

use super::{Invitation, SendTarget, Transport, TransportError, TransportEvent};
use crate::config::TransportConfig;

/// What the relay has told us about our room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatus {
    pub join_code: Option<String>,
    pub peer_id: Option<PeerId>,
    pub peers: BTreeSet<PeerId>,
    /// Why the last connection attempt failed or the relay refused us.
    pub last_error: Option<String>,
}

enum Outgoing {
    Frame(Bytes),
    Close,
}

/// Transport that reaches other devices through a `mechmaze-relay` server.
///
/// Hosting creates a room and browsing joins the room named by the join code.
/// Room membership is the connection, so every member is connected to every
/// other one without an invitation round.
pub struct RelayTransport {
    url: String,
    join_code: Option<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    status_tx: watch::Sender<RelayStatus>,
    status: watch::Receiver<RelayStatus>,
    suspended: bool,
}

impl RelayTransport {
    pub fn new(url: &str) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(RelayStatus::default());
        (
            Self {
                url: url.to_string(),
                join_code: None,
                events,
                outgoing: None,
                status_tx,
                status,
                suspended: false,
            },
            events_rx,
        )
    }

    /// Relay transport for the configured `relay_url`, if one is set.
    pub fn from_config(
        config: &TransportConfig,
    ) -> Option<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        config.relay_url.as_deref().map(Self::new)
    }

    /// Room to join when browsing.
    pub fn set_join_code(&mut self, code: &str) -> Result<(), TransportError> {
        let code = normalize_join_code(code).map_err(|e| TransportError::Connect(e.to_string()))?;
        self.join_code = Some(code);
        Ok(())
    }

    /// Follow the room state (join code, own id, members) as the relay
    /// reports it.
    pub fn status(&self) -> watch::Receiver<RelayStatus> {
        self.status.clone()
    }

    /// Start a connection unless one is already running. A connection whose
    /// task has ended (failed connect, relay closed) is replaced.
    fn open(&mut self, join_code: String) -> Result<(), TransportError> {
        if let Some(tx) = &self.outgoing
            && !tx.is_closed()
        {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.outgoing = Some(tx);
        self.status_tx.send_modify(|s| s.last_error = None);
        let join = RelayJoinMsg {
            join_code,
            protocol_version: PROTOCOL_VERSION,
        };
        runtime.spawn(run_relay_connection(
            self.url.clone(),
            join,
            self.events.clone(),
            rx,
            self.status_tx.clone(),
        ));
        Ok(())
    }

    fn push(&self, out: Outgoing) {
        match &self.outgoing {
            Some(tx) => {
                if tx.send(out).is_err() {
                    tracing::debug!("Relay connection closed, frame dropped");
                }
            },
            None => tracing::debug!("Relay not connected, frame dropped"),
        }
    }
}

impl Transport for RelayTransport {
    fn start_hosting(&mut self) -> Result<(), TransportError> {
        self.open(String::new())
    }

    fn start_browsing(&mut self) -> Result<(), TransportError> {
        let code = self
            .join_code
            .clone()
            .ok_or_else(|| TransportError::Connect("no join code set".to_string()))?;
        self.open(code)
    }

    fn invite(&mut self, peer: PeerId) -> Result<(), TransportError> {
        if self.status.borrow().peers.contains(&peer) {
            Ok(())
        } else {
            Err(TransportError::UnknownPeer(peer))
        }
    }

    fn accept(&mut self, invitation: &Invitation) -> Result<(), TransportError> {
        Err(TransportError::NoInvitation(invitation.from))
    }

    fn send(&mut self, payload: Bytes, to: SendTarget) {
        if self.suspended {
            return;
        }
        let msg = RelayMessage::Forward(RelayForwardMsg {
            to: match to {
                SendTarget::All => None,
                SendTarget::Peer(p) => Some(p),
            },
            payload: payload.to_vec(),
        });
        match encode_relay_message(&msg) {
            Ok(data) => self.push(Outgoing::Frame(Bytes::from(data))),
            Err(e) => tracing::warn!(error = %e, "Failed to encode relay frame"),
        }
    }

    fn suspend(&mut self) {
        self.suspended = true;
    }

    fn resume(&mut self) {
        self.suspended = false;
    }

    fn disconnect_all(&mut self) {
        self.push(Outgoing::Close);
        self.outgoing = None;
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.status.borrow().peers.iter().copied().collect()
    }
}

async fn run_relay_connection(
    url: String,
    join: RelayJoinMsg,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    status: watch::Sender<RelayStatus>,
) {
    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Relay connect failed");
            // Closed before the failure is visible, so a retry sees it.
            drop(outgoing);
            status.send_modify(|s| s.last_error = Some(format!("connect failed: {e}")));
            return;
        },
    };
    let (mut sink, mut stream) = ws.split();

    match encode_relay_message(&RelayMessage::Join(join)) {
        Ok(data) => {
            if sink.send(Message::Binary(data.into())).await.is_err() {
                return;
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode relay join");
            return;
        },
    }

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Frame(data)) => {
                    if sink.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                },
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                },
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Binary(data))) => handle_relay_frame(&data, &events, &status),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Relay connection error");
                    break;
                },
            },
        }
    }

    let mut gone = BTreeSet::new();
    status.send_modify(|s| gone = std::mem::take(&mut s.peers));
    for peer in gone {
        let _ = events.send(TransportEvent::PeerDisconnected(peer));
    }
    tracing::debug!("Relay connection closed");
}

fn handle_relay_frame(
    data: &[u8],
    events: &mpsc::UnboundedSender<TransportEvent>,
    status: &watch::Sender<RelayStatus>,
) {
    let msg = match decode_relay_message(data) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping undecodable relay frame");
            return;
        },
    };
    match msg {
        RelayMessage::Welcome(w) => {
            tracing::info!(join_code = %w.join_code, peer = w.peer_id, "Joined relay room");
            status.send_modify(|s| {
                s.join_code = Some(w.join_code.clone());
                s.peer_id = Some(w.peer_id);
                s.peers.extend(w.peers.iter().copied());
                s.last_error = None;
            });
            for peer in w.peers {
                let _ = events.send(TransportEvent::PeerConnected(peer));
            }
        },
        RelayMessage::PeerJoined(p) => {
            status.send_modify(|s| {
                s.peers.insert(p.peer_id);
            });
            let _ = events.send(TransportEvent::PeerConnected(p.peer_id));
        },
        RelayMessage::PeerLeft(p) => {
            status.send_modify(|s| {
                s.peers.remove(&p.peer_id);
            });
            let _ = events.send(TransportEvent::PeerDisconnected(p.peer_id));
        },
        RelayMessage::Deliver(d) => {
            let _ = events.send(TransportEvent::Message {
                from: d.from,
                payload: Bytes::from(d.payload),
            });
        },
        RelayMessage::Error(e) => {
            tracing::warn!(reason = %e.reason, "Relay refused request");
            status.send_modify(|s| s.last_error = Some(e.reason));
        },
        RelayMessage::Join(_) | RelayMessage::Forward(_) => {
            tracing::debug!("Ignoring peer-bound relay frame");
        },
    }
}
