use serde::{Deserialize, Serialize};

use super::messages::{
    GameStartMsg, GoodbyeMsg, HelloMsg, MessageType, OutcomeMsg, PeerMessage, PlayerStateMsg,
    ReadyMsg, RelayDeliverMsg, RelayErrorMsg, RelayForwardMsg, RelayJoinMsg, RelayMessage,
    RelayPeerMsg, RelayWelcomeMsg,
};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default sync tick rate in Hz.
pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

/// Maximum message payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `PeerMessage` to wire format.
pub fn encode_peer_message(msg: &PeerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        PeerMessage::Hello(m) => encode_message(MessageType::Hello, m),
        PeerMessage::Goodbye(m) => encode_message(MessageType::Goodbye, m),
        PeerMessage::Ready(m) => encode_message(MessageType::Ready, m),
        PeerMessage::PlayerState(m) => encode_message(MessageType::PlayerState, m),
        PeerMessage::GameStart(m) => encode_message(MessageType::GameStart, m),
        PeerMessage::Outcome(m) => encode_message(MessageType::Outcome, m),
    }
}

/// Encode a `RelayMessage` to wire format.
pub fn encode_relay_message(msg: &RelayMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        RelayMessage::Join(m) => encode_message(MessageType::RelayJoin, m),
        RelayMessage::Welcome(m) => encode_message(MessageType::RelayWelcome, m),
        RelayMessage::PeerJoined(m) => encode_message(MessageType::RelayPeerJoined, m),
        RelayMessage::PeerLeft(m) => encode_message(MessageType::RelayPeerLeft, m),
        RelayMessage::Forward(m) => encode_message(MessageType::RelayForward, m),
        RelayMessage::Deliver(m) => encode_message(MessageType::RelayDeliver, m),
        RelayMessage::Error(m) => encode_message(MessageType::RelayError, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    MessageType::from_byte(data[0]).ok_or(ProtocolError::UnknownMessageType(data[0]))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `PeerMessage`.
pub fn decode_peer_message(data: &[u8]) -> Result<PeerMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::Hello => Ok(PeerMessage::Hello(decode_payload::<HelloMsg>(data)?)),
        MessageType::Goodbye => Ok(PeerMessage::Goodbye(decode_payload::<GoodbyeMsg>(data)?)),
        MessageType::Ready => Ok(PeerMessage::Ready(decode_payload::<ReadyMsg>(data)?)),
        MessageType::PlayerState => Ok(PeerMessage::PlayerState(decode_payload::<
            PlayerStateMsg,
        >(data)?)),
        MessageType::GameStart => Ok(PeerMessage::GameStart(decode_payload::<GameStartMsg>(
            data,
        )?)),
        MessageType::Outcome => Ok(PeerMessage::Outcome(decode_payload::<OutcomeMsg>(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

/// Decode raw wire data into a `RelayMessage`.
pub fn decode_relay_message(data: &[u8]) -> Result<RelayMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::RelayJoin => Ok(RelayMessage::Join(decode_payload::<RelayJoinMsg>(data)?)),
        MessageType::RelayWelcome => Ok(RelayMessage::Welcome(decode_payload::<
            RelayWelcomeMsg,
        >(data)?)),
        MessageType::RelayPeerJoined => Ok(RelayMessage::PeerJoined(decode_payload::<
            RelayPeerMsg,
        >(data)?)),
        MessageType::RelayPeerLeft => Ok(RelayMessage::PeerLeft(decode_payload::<RelayPeerMsg>(
            data,
        )?)),
        MessageType::RelayForward => Ok(RelayMessage::Forward(decode_payload::<
            RelayForwardMsg,
        >(data)?)),
        MessageType::RelayDeliver => Ok(RelayMessage::Deliver(decode_payload::<
            RelayDeliverMsg,
        >(data)?)),
        MessageType::RelayError => Ok(RelayMessage::Error(decode_payload::<RelayErrorMsg>(
            data,
        )?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}
