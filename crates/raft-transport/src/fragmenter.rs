//! # fragmenter
//!
//! why: outbound messages must respect the chunk payload bound the receiver enforces
//! relations: inverse of composer.rs; used by runtime.rs outbound implementations and by tests
//! what: MessageFragmenter

use bytes::{Bytes, BytesMut};
use raft_core::{ClusterId, RaftMessage};

use crate::chunk::{Chunk, ChunkKind};
use crate::error::ProtocolError;
use crate::wire::{self, MessageHeader};

/// splits a RaftMessage into header and content chunks
#[derive(Debug, Clone)]
pub struct MessageFragmenter {
    max_chunk_payload: usize,
}

impl MessageFragmenter {
    pub fn new(max_chunk_payload: usize) -> Self {
        Self { max_chunk_payload: max_chunk_payload.max(1) }
    }

    pub fn fragment(&self, cluster_id: ClusterId, message: &RaftMessage) -> Result<Vec<Chunk>, ProtocolError> {
        let mut envelope = message.clone();
        let contents = wire::take_contents(&mut envelope);
        let encoded = bincode::serialize(&envelope)?;

        let header = MessageHeader {
            cluster_id,
            message_type: message.message_type(),
            content_count: 1 + contents.len() as u32,
        };

        let mut chunks = Vec::new();
        self.split(ChunkKind::Header, header.encode(), &mut chunks);
        self.split(ChunkKind::Content, Bytes::from(encoded), &mut chunks);
        for content in contents {
            self.split(ChunkKind::Content, Bytes::from(content), &mut chunks);
        }
        Ok(chunks)
    }

    /// all frames of `message` back to back, ready to write to a stream
    pub fn encode(&self, cluster_id: ClusterId, message: &RaftMessage) -> Result<Bytes, ProtocolError> {
        let chunks = self.fragment(cluster_id, message)?;
        let mut buf = BytesMut::with_capacity(chunks.iter().map(Chunk::encoded_len).sum());
        for chunk in &chunks {
            chunk.encode_into(&mut buf);
        }
        Ok(buf.freeze())
    }

    fn split(&self, kind: ChunkKind, mut payload: Bytes, chunks: &mut Vec<Chunk>) {
        while payload.len() > self.max_chunk_payload {
            let head = payload.split_to(self.max_chunk_payload);
            chunks.push(Chunk::new(false, kind, head));
        }
        chunks.push(Chunk::new(true, kind, payload));
    }
}
