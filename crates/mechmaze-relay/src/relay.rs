use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};

use mechmaze_core::net::messages::{
    MessageType, RelayDeliverMsg, RelayMessage, RelayPeerMsg, RelayWelcomeMsg,
};
use mechmaze_core::net::protocol::encode_relay_message;
use mechmaze_core::player::PeerId;
use mechmaze_core::room::{Room, RoomConfig, RoomState};

/// Channel to one member's socket writer.
pub type MemberTx = mpsc::UnboundedSender<Bytes>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    RoomLimit,
    RoomExists(String),
    RoomNotFound(String),
    RoomFull(String),
    GameInProgress(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoomLimit => write!(f, "maximum room limit reached"),
            Self::RoomExists(code) => write!(f, "room {code} already exists"),
            Self::RoomNotFound(code) => write!(f, "room {code} not found"),
            Self::RoomFull(code) => write!(f, "room {code} is full"),
            Self::GameInProgress(code) => write!(f, "room {code} has already started"),
        }
    }
}

impl std::error::Error for RelayError {}

/// A relay room. All members are equal; the creator is only special in that
/// its join created the code.
struct RelayRoom {
    room: Room,
    members: BTreeMap<PeerId, MemberTx>,
    next_id: PeerId,
}

impl RelayRoom {
    fn new(room: Room) -> Self {
        Self {
            room,
            members: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn add_member(&mut self, tx: MemberTx) -> PeerId {
        let id = self.next_id;
        self.next_id += 1;
        self.members.insert(id, tx);
        id
    }

    /// Send a relay control frame to every member except `skip`.
    fn announce(&self, msg: &RelayMessage, skip: PeerId) {
        let data = match encode_relay_message(msg) {
            Ok(d) => Bytes::from(d),
            Err(e) => {
                tracing::error!(room = %self.room.code, error = %e, "Failed to encode relay frame");
                return;
            },
        };
        for (id, tx) in &self.members {
            if *id != skip {
                let _ = tx.send(data.clone());
            }
        }
    }
}

/// Manages all relay rooms.
pub struct RelayState {
    rooms: HashMap<String, RelayRoom>,
    max_rooms: usize,
    room_config: RoomConfig,
}

impl RelayState {
    pub fn new(max_rooms: usize) -> Self {
        Self::with_room_config(max_rooms, RoomConfig::default())
    }

    pub fn with_room_config(max_rooms: usize, room_config: RoomConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            max_rooms,
            room_config,
        }
    }

    /// Create a room under `code` with its creator as the first member.
    /// The creator is sent its `Welcome`.
    pub fn create_room(&mut self, code: String, tx: MemberTx) -> Result<PeerId, RelayError> {
        if self.rooms.len() >= self.max_rooms {
            return Err(RelayError::RoomLimit);
        }
        if self.rooms.contains_key(&code) {
            return Err(RelayError::RoomExists(code));
        }
        let mut room = RelayRoom::new(Room::new(code.clone(), self.room_config.clone()));
        let id = room.add_member(tx.clone());
        send_frame(
            &tx,
            &RelayMessage::Welcome(RelayWelcomeMsg {
                join_code: code.clone(),
                peer_id: id,
                peers: Vec::new(),
            }),
        );
        self.rooms.insert(code, room);
        Ok(id)
    }

    /// Join an existing lobby. The newcomer is welcomed with the current
    /// members and every member hears `PeerJoined`.
    pub fn join_room(&mut self, code: &str, tx: MemberTx) -> Result<PeerId, RelayError> {
        let room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| RelayError::RoomNotFound(code.to_string()))?;
        if room.room.state == RoomState::InGame {
            return Err(RelayError::GameInProgress(code.to_string()));
        }
        if room.members.len() >= room.room.config.max_players as usize {
            return Err(RelayError::RoomFull(code.to_string()));
        }
        let peers: Vec<PeerId> = room.members.keys().copied().collect();
        let id = room.add_member(tx.clone());
        send_frame(
            &tx,
            &RelayMessage::Welcome(RelayWelcomeMsg {
                join_code: code.to_string(),
                peer_id: id,
                peers,
            }),
        );
        room.announce(&RelayMessage::PeerJoined(RelayPeerMsg { peer_id: id }), id);
        Ok(id)
    }

    /// Remove a member and tell the rest. Returns true if the room was
    /// destroyed because it became empty.
    pub fn leave_room(&mut self, code: &str, peer: PeerId) -> bool {
        let Some(room) = self.rooms.get_mut(code) else {
            return false;
        };
        if room.members.remove(&peer).is_none() {
            return false;
        }
        if room.members.is_empty() {
            self.rooms.remove(code);
            return true;
        }
        room.announce(&RelayMessage::PeerLeft(RelayPeerMsg { peer_id: peer }), peer);
        false
    }

    /// Deliver `payload` from `from` to `to`, or to every other member.
    /// Returns the number of members it was queued for.
    pub fn forward(&mut self, code: &str, from: PeerId, to: Option<PeerId>, payload: Vec<u8>) -> usize {
        let Some(room) = self.rooms.get_mut(code) else {
            return 0;
        };
        if payload.first().copied().and_then(MessageType::from_byte) == Some(MessageType::GameStart)
            && room.room.state == RoomState::Lobby
        {
            room.room.state = RoomState::InGame;
            tracing::info!(room = %code, "Room closed to new members");
        }
        let msg = RelayMessage::Deliver(RelayDeliverMsg { from, payload });
        let data = match encode_relay_message(&msg) {
            Ok(d) => Bytes::from(d),
            Err(e) => {
                tracing::warn!(room = %code, error = %e, "Failed to encode delivery");
                return 0;
            },
        };
        let mut delivered = 0;
        for (id, tx) in &room.members {
            if *id == from || to.is_some_and(|t| t != *id) {
                continue;
            }
            if tx.send(data.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn room_exists(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn member_count(&self, code: &str) -> usize {
        self.rooms.get(code).map_or(0, |r| r.members.len())
    }

    pub fn room_state(&self, code: &str) -> Option<RoomState> {
        self.rooms.get(code).map(|r| r.room.state)
    }
}

/// Shared relay state behind an async RwLock.
pub type SharedRelayState = Arc<RwLock<RelayState>>;

/// Encode and queue one relay frame for a single member.
pub fn send_frame(tx: &MemberTx, msg: &RelayMessage) {
    match encode_relay_message(msg) {
        Ok(data) => {
            let _ = tx.send(Bytes::from(data));
        },
        Err(e) => tracing::error!(error = %e, "Failed to encode relay frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mechmaze_core::net::protocol::decode_relay_message;

    fn next(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> RelayMessage {
        decode_relay_message(&rx.try_recv().unwrap()).unwrap()
    }

    fn room_with_two() -> (
        RelayState,
        mpsc::UnboundedReceiver<Bytes>,
        mpsc::UnboundedReceiver<Bytes>,
    ) {
        let mut state = RelayState::new(10);
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        state.create_room("ABCDEF".to_string(), tx1).unwrap();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        state.join_room("ABCDEF", tx2).unwrap();
        // Welcome, PeerJoined / Welcome
        next(&mut rx1);
        next(&mut rx1);
        next(&mut rx2);
        (state, rx1, rx2)
    }

    #[test]
    fn create_welcomes_creator() {
        let mut state = RelayState::new(10);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = state.create_room("ABCDEF".to_string(), tx).unwrap();
        assert_eq!(id, 1);
        match next(&mut rx) {
            RelayMessage::Welcome(w) => {
                assert_eq!(w.join_code, "ABCDEF");
                assert_eq!(w.peer_id, 1);
                assert!(w.peers.is_empty());
            },
            other => panic!("Expected Welcome, got {other:?}"),
        }
    }

    #[test]
    fn join_lists_members_and_announces() {
        let mut state = RelayState::new(10);
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        state.create_room("ABCDEF".to_string(), tx1).unwrap();
        let _ = next(&mut rx1);

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let id = state.join_room("ABCDEF", tx2).unwrap();
        assert_eq!(id, 2);
        match next(&mut rx2) {
            RelayMessage::Welcome(w) => assert_eq!(w.peers, vec![1]),
            other => panic!("Expected Welcome, got {other:?}"),
        }
        assert_eq!(
            next(&mut rx1),
            RelayMessage::PeerJoined(RelayPeerMsg { peer_id: 2 })
        );
        assert_eq!(state.member_count("ABCDEF"), 2);
    }

    #[test]
    fn join_nonexistent_room_fails() {
        let mut state = RelayState::new(10);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            state.join_room("ZZZZZZ", tx),
            Err(RelayError::RoomNotFound("ZZZZZZ".to_string()))
        );
    }

    #[test]
    fn max_rooms_enforced() {
        let mut state = RelayState::new(1);
        let (tx1, _rx1) = mpsc::unbounded_channel();
        state.create_room("AAAAAA".to_string(), tx1).unwrap();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert_eq!(
            state.create_room("BBBBBB".to_string(), tx2),
            Err(RelayError::RoomLimit)
        );
    }

    #[test]
    fn room_capacity_enforced() {
        let mut state = RelayState::new(10);
        let (tx, _rx) = mpsc::unbounded_channel();
        state.create_room("ABCDEF".to_string(), tx).unwrap();
        let mut keep = Vec::new();
        for _ in 1..RoomConfig::default().max_players {
            let (tx, rx) = mpsc::unbounded_channel();
            state.join_room("ABCDEF", tx).unwrap();
            keep.push(rx);
        }
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            state.join_room("ABCDEF", tx),
            Err(RelayError::RoomFull("ABCDEF".to_string()))
        );
    }

    #[test]
    fn forward_broadcasts_to_others_only() {
        let (mut state, mut rx1, mut rx2) = room_with_two();
        assert_eq!(state.forward("ABCDEF", 1, None, vec![0x10, 0x01]), 1);
        assert_eq!(
            next(&mut rx2),
            RelayMessage::Deliver(RelayDeliverMsg {
                from: 1,
                payload: vec![0x10, 0x01]
            })
        );
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn forward_to_target() {
        let (mut state, mut rx1, mut rx2) = room_with_two();
        assert_eq!(state.forward("ABCDEF", 2, Some(1), vec![0x01]), 1);
        assert!(matches!(next(&mut rx1), RelayMessage::Deliver(d) if d.from == 2));
        assert!(rx2.try_recv().is_err());
        assert_eq!(state.forward("ABCDEF", 2, Some(9), vec![0x01]), 0);
    }

    #[test]
    fn leave_announces_and_last_member_destroys() {
        let (mut state, mut rx1, _rx2) = room_with_two();
        assert!(!state.leave_room("ABCDEF", 2));
        assert_eq!(
            next(&mut rx1),
            RelayMessage::PeerLeft(RelayPeerMsg { peer_id: 2 })
        );
        assert!(state.leave_room("ABCDEF", 1));
        assert!(!state.room_exists("ABCDEF"));
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn game_start_closes_the_room() {
        let (mut state, _rx1, _rx2) = room_with_two();
        state.forward("ABCDEF", 1, None, vec![MessageType::GameStart as u8, 0x00]);
        assert_eq!(state.room_state("ABCDEF"), Some(RoomState::InGame));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            state.join_room("ABCDEF", tx),
            Err(RelayError::GameInProgress("ABCDEF".to_string()))
        );
    }
}
