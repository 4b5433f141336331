//! # pipeline
//!
//! why: one place per connection turns raw bytes into messages for the local cluster
//! relations: chains chunk.rs and composer.rs; driven by connection.rs
//! what: InboundPipeline

use raft_core::{ClusterId, ClusterIdAwareMessage};
use tracing::warn;

use crate::chunk::{Chunk, ChunkDecoder};
use crate::composer::{ChunkComposer, RaftMessageComposer};
use crate::config::TransportConfig;
use crate::error::ProtocolError;

/// decoder and both composer stages of one inbound connection
#[derive(Debug)]
pub struct InboundPipeline {
    local: ClusterId,
    decoder: ChunkDecoder,
    chunks: ChunkComposer,
    messages: RaftMessageComposer,
}

impl InboundPipeline {
    pub fn new(local: ClusterId, config: &TransportConfig) -> Self {
        Self {
            local,
            decoder: ChunkDecoder::new(config.max_chunk_payload),
            chunks: ChunkComposer::new(config.max_message_bytes),
            messages: RaftMessageComposer::new(),
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.local
    }

    /// feed bytes as read from the network; returns every message they completed
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ClusterIdAwareMessage>, ProtocolError> {
        self.decoder.extend(bytes);
        let mut completed = Vec::new();
        while let Some(chunk) = self.decoder.decode_next()? {
            if let Some(message) = self.push_chunk(chunk)? {
                completed.push(message);
            }
        }
        Ok(completed)
    }

    /// feed one already framed chunk
    pub fn push_chunk(&mut self, chunk: Chunk) -> Result<Option<ClusterIdAwareMessage>, ProtocolError> {
        let Some(composed) = self.chunks.handle(chunk)? else {
            return Ok(None);
        };
        let Some(message) = self.messages.handle(composed)? else {
            return Ok(None);
        };

        if message.cluster_id != self.local {
            warn!(
                local = %self.local,
                received = %message.cluster_id,
                message_type = ?message.message.message_type(),
                "rejecting message for another cluster"
            );
            return Err(ProtocolError::ClusterIdMismatch {
                local: self.local,
                received: message.cluster_id,
            });
        }
        Ok(Some(message))
    }

    /// nothing partially received
    pub fn is_idle(&self) -> bool {
        self.decoder.buffered() == 0 && self.chunks.is_idle() && self.messages.is_idle()
    }
}
