//! # composer
//!
//! why: a logical message may arrive split across many frames and many reads
//! relations: fed by pipeline.rs with chunks from chunk.rs; rebuilds what fragmenter.rs split using wire.rs
//! what: ChunkComposer (chunks to byte messages), RaftMessageComposer (byte messages to RaftMessage)
//!
//! Both stages are plain state objects with a synchronous `handle`, so they
//! run the same on an I/O task and in unit tests.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use raft_core::{ClusterIdAwareMessage, RaftMessage};
use tracing::trace;

use crate::chunk::{Chunk, ChunkKind};
use crate::error::ProtocolError;
use crate::wire::{self, MessageHeader};

/// the byte-exact concatenation of one run of chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub kind: ChunkKind,
    pub content: Bytes,
}

/// joins chunk payloads until a chunk flagged last arrives
#[derive(Debug)]
pub struct ChunkComposer {
    in_progress: Option<ChunkKind>,
    buffer: BytesMut,
    max_message_bytes: usize,
}

impl ChunkComposer {
    pub fn new(max_message_bytes: usize) -> Self {
        Self { in_progress: None, buffer: BytesMut::new(), max_message_bytes }
    }

    /// `None` while more chunks are expected; an error discards the partial message
    pub fn handle(&mut self, chunk: Chunk) -> Result<Option<ComposedMessage>, ProtocolError> {
        let result = self.accept(chunk);
        if result.is_err() {
            self.in_progress = None;
            self.buffer.clear();
        }
        result
    }

    fn accept(&mut self, chunk: Chunk) -> Result<Option<ComposedMessage>, ProtocolError> {
        let kind = match self.in_progress {
            Some(kind) if kind != chunk.kind => {
                return Err(ProtocolError::MalformedChunk(format!(
                    "{:?} chunk inside a {kind:?} message",
                    chunk.kind
                )));
            }
            Some(kind) => kind,
            None => chunk.kind,
        };

        let size = self.buffer.len() + chunk.payload.len();
        if size > self.max_message_bytes {
            return Err(ProtocolError::MessageTooLarge { actual: size, max: self.max_message_bytes });
        }
        self.buffer.extend_from_slice(&chunk.payload);

        if !chunk.is_last {
            self.in_progress = Some(kind);
            return Ok(None);
        }
        self.in_progress = None;
        Ok(Some(ComposedMessage { kind, content: self.buffer.split().freeze() }))
    }

    /// no partial message buffered
    pub fn is_idle(&self) -> bool {
        self.in_progress.is_none()
    }
}

/// turns a header plus its contents into a RaftMessage
#[derive(Debug, Default)]
pub struct RaftMessageComposer {
    header: Option<MessageHeader>,
    contents: VecDeque<Bytes>,
}

impl RaftMessageComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the header and all of its contents arrived
    ///
    /// an error drops the waiting header and every queued content
    pub fn handle(
        &mut self,
        composed: ComposedMessage,
    ) -> Result<Option<ClusterIdAwareMessage>, ProtocolError> {
        let result = self.accept(composed);
        if result.is_err() {
            self.header = None;
            self.contents.clear();
        }
        result
    }

    fn accept(&mut self, composed: ComposedMessage) -> Result<Option<ClusterIdAwareMessage>, ProtocolError> {
        match composed.kind {
            ChunkKind::Header => {
                if self.header.is_some() {
                    return Err(ProtocolError::ComposerStateConflict);
                }
                self.header = Some(MessageHeader::decode(composed.content)?);
            }
            ChunkKind::Content => self.contents.push_back(composed.content),
        }

        match self.header {
            Some(header) if self.contents.len() >= header.content_count as usize => {
                self.header = None;
                self.build(header).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn build(&mut self, header: MessageHeader) -> Result<ClusterIdAwareMessage, ProtocolError> {
        let envelope = self
            .contents
            .pop_front()
            .ok_or_else(|| ProtocolError::MalformedChunk("message without envelope".into()))?;
        let mut message: RaftMessage = bincode::deserialize(&envelope)?;
        if message.message_type() != header.message_type {
            return Err(ProtocolError::MalformedChunk(format!(
                "header announces {:?} but envelope holds {:?}",
                header.message_type,
                message.message_type()
            )));
        }

        let slots = wire::content_slots(&message);
        if slots + 1 != header.content_count as usize {
            return Err(ProtocolError::MalformedChunk(format!(
                "header announces {} contents, envelope needs {}",
                header.content_count,
                slots + 1
            )));
        }
        wire::attach_contents(&mut message, self.contents.drain(..slots))?;

        if !self.contents.is_empty() {
            return Err(ProtocolError::ComposerResourceLeak { leftover: self.contents.len() });
        }

        trace!(message_type = ?header.message_type, contents = slots, "composed raft message");
        Ok(ClusterIdAwareMessage::new(header.cluster_id, message))
    }

    /// no header waiting and no content queued
    pub fn is_idle(&self) -> bool {
        self.header.is_none() && self.contents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;
    use raft_core::{ClusterId, MessageType};

    fn int_chunk(is_last: bool, value: i32) -> Chunk {
        Chunk::new(is_last, ChunkKind::Content, value.to_be_bytes().to_vec())
    }

    #[test]
    fn two_chunks_compose_in_order() {
        let mut composer = ChunkComposer::new(1024);

        assert_eq!(composer.handle(int_chunk(false, 1)).unwrap(), None);
        let mut composed = composer.handle(int_chunk(true, 2)).unwrap().unwrap();

        assert_eq!(composed.content.get_i32(), 1);
        assert_eq!(composed.content.get_i32(), 2);
        assert_eq!(composed.content.remaining(), 0);
        assert!(composer.is_idle());
    }

    #[test]
    fn kind_change_mid_message_is_malformed() {
        let mut composer = ChunkComposer::new(1024);
        composer.handle(int_chunk(false, 1)).unwrap();

        let header_chunk = Chunk::new(true, ChunkKind::Header, vec![0; 4]);
        assert!(matches!(composer.handle(header_chunk), Err(ProtocolError::MalformedChunk(_))));
    }

    #[test]
    fn rejected_chunk_discards_the_partial_message() {
        let mut composer = ChunkComposer::new(6);
        composer.handle(int_chunk(false, 1)).unwrap();
        assert!(composer.handle(int_chunk(true, 2)).is_err());
        assert!(composer.is_idle());

        let mut composed = composer.handle(int_chunk(true, 3)).unwrap().unwrap();

        assert_eq!(composed.content.get_i32(), 3);
        assert_eq!(composed.content.remaining(), 0);
    }

    #[test]
    fn message_bound_is_enforced() {
        let mut composer = ChunkComposer::new(6);
        composer.handle(int_chunk(false, 1)).unwrap();

        assert!(matches!(
            composer.handle(int_chunk(true, 2)),
            Err(ProtocolError::MessageTooLarge { actual: 8, max: 6 })
        ));
    }

    #[test]
    fn second_header_conflicts() {
        let header = MessageHeader {
            cluster_id: ClusterId::new(),
            message_type: MessageType::Heartbeat,
            content_count: 1,
        };
        let mut composer = RaftMessageComposer::new();
        let composed = ComposedMessage { kind: ChunkKind::Header, content: header.encode() };

        assert!(composer.handle(composed.clone()).unwrap().is_none());
        let err = composer.handle(composed).unwrap_err();

        assert!(matches!(err, ProtocolError::ComposerStateConflict));
        assert_eq!(err.to_string(), "Pipeline already contains message header waiting to build");
    }

    #[test]
    fn unclaimed_content_is_a_leak() {
        let envelope = bincode::serialize(&RaftMessage::HeartbeatResponse { from: 2 }).unwrap();
        let header = MessageHeader {
            cluster_id: ClusterId::new(),
            message_type: MessageType::HeartbeatResponse,
            content_count: 1,
        };
        let mut composer = RaftMessageComposer::new();

        composer
            .handle(ComposedMessage { kind: ChunkKind::Content, content: Bytes::from(envelope) })
            .unwrap();
        composer
            .handle(ComposedMessage { kind: ChunkKind::Content, content: Bytes::from_static(b"stray") })
            .unwrap();
        let result = composer.handle(ComposedMessage { kind: ChunkKind::Header, content: header.encode() });

        assert!(matches!(result, Err(ProtocolError::ComposerResourceLeak { leftover: 1 })));
        assert!(composer.is_idle());
    }

    #[test]
    fn garbage_envelope_leaves_the_composer_ready_for_the_next_message() {
        let cluster_id = ClusterId::new();
        let mut composer = RaftMessageComposer::new();
        let waiting = MessageHeader { cluster_id, message_type: MessageType::NewEntryRequest, content_count: 2 };

        composer.handle(ComposedMessage { kind: ChunkKind::Header, content: waiting.encode() }).unwrap();
        composer
            .handle(ComposedMessage { kind: ChunkKind::Content, content: Bytes::from_static(&[0xFF; 3]) })
            .unwrap();
        let result = composer.handle(ComposedMessage { kind: ChunkKind::Content, content: Bytes::from_static(b"x") });
        assert!(matches!(result, Err(ProtocolError::Envelope(_))));
        assert!(composer.is_idle());

        let header = MessageHeader { cluster_id, message_type: MessageType::HeartbeatResponse, content_count: 1 };
        let envelope = bincode::serialize(&RaftMessage::HeartbeatResponse { from: 2 }).unwrap();
        composer.handle(ComposedMessage { kind: ChunkKind::Header, content: header.encode() }).unwrap();
        let message = composer
            .handle(ComposedMessage { kind: ChunkKind::Content, content: Bytes::from(envelope) })
            .unwrap()
            .unwrap();

        assert_eq!(message.message, RaftMessage::HeartbeatResponse { from: 2 });
        assert!(composer.is_idle());
    }
}
