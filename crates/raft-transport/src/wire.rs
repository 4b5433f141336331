//! # wire
//!
//! why: replicated payloads travel as separate contents, not inside the encoded envelope
//! relations: used by fragmenter.rs to split outbound messages and by composer.rs to rebuild inbound ones
//! what: MessageHeader codec, content extraction and re-attachment

use bytes::{Buf, BufMut, Bytes, BytesMut};
use raft_core::{ClusterId, MessageType, RaftMessage};

use crate::error::ProtocolError;

pub const MESSAGE_HEADER_SIZE: usize = 16 + 1 + 4;

/// leading part of every logical message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub cluster_id: ClusterId,
    pub message_type: MessageType,
    /// envelope plus one content per replicated payload
    pub content_count: u32,
}

impl MessageHeader {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE);
        buf.put_slice(self.cluster_id.as_bytes());
        buf.put_u8(self.message_type as u8);
        buf.put_u32(self.content_count);
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, ProtocolError> {
        if bytes.len() != MESSAGE_HEADER_SIZE {
            return Err(ProtocolError::MalformedChunk(format!(
                "message header is {} bytes, expected {MESSAGE_HEADER_SIZE}",
                bytes.len()
            )));
        }
        let mut id = [0u8; 16];
        bytes.copy_to_slice(&mut id);
        let raw_type = bytes.get_u8();
        let message_type =
            MessageType::try_from(raw_type).map_err(ProtocolError::UnknownMessageType)?;
        let content_count = bytes.get_u32();
        if content_count == 0 {
            return Err(ProtocolError::MalformedChunk("message without envelope".into()));
        }
        Ok(Self { cluster_id: ClusterId::from_bytes(id), message_type, content_count })
    }
}

/// move every replicated payload out of `message`, in wire order
pub fn take_contents(message: &mut RaftMessage) -> Vec<Vec<u8>> {
    match message {
        RaftMessage::AppendEntriesRequest { entries, .. } => {
            entries.iter_mut().map(|e| std::mem::take(&mut e.content)).collect()
        }
        RaftMessage::NewEntryRequest { content, .. } => vec![std::mem::take(content)],
        RaftMessage::NewBatchRequest { contents, .. } => contents.iter_mut().map(std::mem::take).collect(),
        _ => Vec::new(),
    }
}

/// number of payload slots an envelope expects back
pub fn content_slots(message: &RaftMessage) -> usize {
    match message {
        RaftMessage::AppendEntriesRequest { entries, .. } => entries.len(),
        RaftMessage::NewEntryRequest { .. } => 1,
        RaftMessage::NewBatchRequest { contents, .. } => contents.len(),
        _ => 0,
    }
}

/// put payloads back into the slots `take_contents` emptied
pub fn attach_contents(
    message: &mut RaftMessage,
    payloads: impl IntoIterator<Item = Bytes>,
) -> Result<(), ProtocolError> {
    let slots: Vec<&mut Vec<u8>> = match message {
        RaftMessage::AppendEntriesRequest { entries, .. } => {
            entries.iter_mut().map(|e| &mut e.content).collect()
        }
        RaftMessage::NewEntryRequest { content, .. } => vec![content],
        RaftMessage::NewBatchRequest { contents, .. } => contents.iter_mut().collect(),
        _ => Vec::new(),
    };

    let mut payloads = payloads.into_iter();
    for slot in slots {
        let payload = payloads
            .next()
            .ok_or_else(|| ProtocolError::MalformedChunk("fewer contents than the envelope expects".into()))?;
        *slot = payload.to_vec();
    }
    if payloads.next().is_some() {
        return Err(ProtocolError::MalformedChunk("more contents than the envelope expects".into()));
    }
    Ok(())
}
