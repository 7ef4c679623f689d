// Membership protocol message kinds and their wire tags.
use core::fmt;

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder as _, Encoder as _};

use crate::codec::{CodecError, MessageCodec};
use crate::identity::Identity;
use crate::members::MemberEntry;

/// One protocol message. JoinReply and Heartbeat both carry a full snapshot
/// of the sender's membership table; a JoinReply is, on the receiving side,
/// a Heartbeat that additionally completes the join handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    JoinRequest { sender: Identity, heartbeat: u64 },
    JoinReply { snapshot: Vec<MemberEntry> },
    Heartbeat { snapshot: Vec<MemberEntry> },
}

impl Message {
    pub(crate) fn message_type(&self) -> MessageType {
        match self {
            Message::JoinRequest { .. } => MessageType::JoinRequest,
            Message::JoinReply { .. } => MessageType::JoinReply,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
        }
    }

    /// Encodes the message into the wire representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Decodes one message from a received datagram.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        let mut codec = MessageCodec::new();
        let mut bytes = BytesMut::from(data);
        codec.decode(&mut bytes)?.ok_or(CodecError::Truncated)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    JoinRequest = 0,
    JoinReply = 1,
    Heartbeat = 2,
}

impl MessageType {
    pub(crate) fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(MessageType::JoinRequest),
            1 => Ok(MessageType::JoinReply),
            2 => Ok(MessageType::Heartbeat),
            _ => Err(CodecError::UnknownMessageType(value)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::JoinRequest => write!(f, "JOIN_REQUEST"),
            MessageType::JoinReply => write!(f, "JOIN_REPLY"),
            MessageType::Heartbeat => write!(f, "HEARTBEAT"),
        }
    }
}
