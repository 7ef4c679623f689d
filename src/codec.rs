use thiserror::Error;
use tokio_util::bytes::{Buf as _, BufMut as _, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::identity::{Identity, TOKEN_LEN};
use crate::members::MemberEntry;
use crate::message::{Message, MessageType};

// Wire layout, little-endian throughout:
//   header: 1 type-tag byte
//   JoinRequest body: 6-byte identity token, u64 heartbeat
//   JoinReply/Heartbeat body: u32 entry count, then per entry
//     u32 id, u16 port, u64 heartbeat, u64 timestamp
const JOIN_REQUEST_BODY_LEN: usize = TOKEN_LEN + 8;
const COUNT_LEN: usize = 4;
const ENTRY_LEN: usize = 4 + 2 + 8 + 8;

/// Decode failures. Malformed inbound messages are dropped by the engine
/// without a response; nothing here is fatal.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("buffer too short for declared message type")]
    Truncated,
    #[error("unknown message type tag: {0}")]
    UnknownMessageType(u8),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) struct MessageCodec;

impl MessageCodec {
    pub(crate) fn new() -> Self {
        MessageCodec
    }

    /// Read a fixed number of bytes, or fail if the buffer runs short.
    fn read_bytes(src: &mut BytesMut, size: usize) -> Result<BytesMut, CodecError> {
        if src.remaining() < size {
            return Err(CodecError::Truncated);
        }
        Ok(src.split_to(size))
    }

    fn encode_snapshot(snapshot: &[MemberEntry], dst: &mut BytesMut) {
        dst.put_u32_le(snapshot.len() as u32);
        for entry in snapshot {
            dst.put_u32_le(entry.identity.id);
            dst.put_u16_le(entry.identity.port);
            dst.put_u64_le(entry.heartbeat);
            dst.put_u64_le(entry.last_update);
        }
    }

    fn decode_snapshot(src: &mut BytesMut) -> Result<Vec<MemberEntry>, CodecError> {
        let count = Self::read_bytes(src, COUNT_LEN)?.get_u32_le() as usize;
        let mut body = Self::read_bytes(src, count * ENTRY_LEN)?;

        let mut snapshot = Vec::with_capacity(count);
        for _ in 0..count {
            let id = body.get_u32_le();
            let port = body.get_u16_le();
            let heartbeat = body.get_u64_le();
            let last_update = body.get_u64_le();
            snapshot.push(MemberEntry {
                identity: Identity::new(id, port),
                heartbeat,
                last_update,
            });
        }
        Ok(snapshot)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_u8(item.message_type() as u8);

        match item {
            Message::JoinRequest { sender, heartbeat } => {
                dst.extend_from_slice(&sender.to_token());
                dst.put_u64_le(heartbeat);
            }
            Message::JoinReply { snapshot } | Message::Heartbeat { snapshot } => {
                Self::encode_snapshot(&snapshot, dst);
            }
        }
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let message_type = MessageType::from_u8(src.get_u8())?;
        let message = match message_type {
            MessageType::JoinRequest => {
                let mut body = Self::read_bytes(src, JOIN_REQUEST_BODY_LEN)?;
                let mut token = [0u8; TOKEN_LEN];
                token.copy_from_slice(&body.split_to(TOKEN_LEN));
                let sender = Identity::from_token(token);
                let heartbeat = body.get_u64_le();
                Message::JoinRequest { sender, heartbeat }
            }
            MessageType::JoinReply => Message::JoinReply {
                snapshot: Self::decode_snapshot(src)?,
            },
            MessageType::Heartbeat => Message::Heartbeat {
                snapshot: Self::decode_snapshot(src)?,
            },
        };

        Ok(Some(message))
    }
}
