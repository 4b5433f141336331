//! # chunk
//!
//! why: logical messages travel as one or more bounded frames over a byte stream
//! relations: frames produced by fragmenter.rs, consumed by composer.rs through pipeline.rs
//! what: ChunkKind, Chunk, ChunkDecoder
//!
//! Frame layout, integers big-endian:
//!
//! ```text
//! is_last u8 | payload_len u32 | kind u8 | payload[payload_len]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

pub const CHUNK_HEADER_SIZE: usize = 1 + 4 + 1;

/// what a chunk's payload belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkKind {
    /// the fixed message header
    Header = 0,
    /// one message content
    Content = 1,
}

impl TryFrom<u8> for ChunkKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChunkKind::Header),
            1 => Ok(ChunkKind::Content),
            other => Err(ProtocolError::MalformedChunk(format!("unknown chunk kind {other}"))),
        }
    }
}

/// one network-level fragment of a logical message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub is_last: bool,
    pub kind: ChunkKind,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(is_last: bool, kind: ChunkKind, payload: impl Into<Bytes>) -> Self {
        Self { is_last, kind, payload: payload.into() }
    }

    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_SIZE + self.payload.len()
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(u8::from(self.is_last));
        dst.put_u32(self.payload.len() as u32);
        dst.put_u8(self.kind as u8);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

/// cuts whole frames out of bytes that arrive in arbitrary pieces
#[derive(Debug)]
pub struct ChunkDecoder {
    buffer: BytesMut,
    max_payload: usize,
}

impl ChunkDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self { buffer: BytesMut::new(), max_payload }
    }

    /// feed bytes read from the network
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// bytes received but not yet part of a whole frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// the next whole frame, `None` until enough bytes arrived
    pub fn decode_next(&mut self) -> Result<Option<Chunk>, ProtocolError> {
        if self.buffer.len() < CHUNK_HEADER_SIZE {
            return Ok(None);
        }

        let is_last = match self.buffer[0] {
            0 => false,
            1 => true,
            other => {
                return Err(ProtocolError::MalformedChunk(format!("invalid last-chunk flag {other}")))
            }
        };
        let payload_len =
            u32::from_be_bytes([self.buffer[1], self.buffer[2], self.buffer[3], self.buffer[4]]) as usize;
        if payload_len > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge { actual: payload_len, max: self.max_payload });
        }
        let kind = ChunkKind::try_from(self.buffer[5])?;

        if self.buffer.len() < CHUNK_HEADER_SIZE + payload_len {
            return Ok(None);
        }
        self.buffer.advance(CHUNK_HEADER_SIZE);
        let payload = self.buffer.split_to(payload_len).freeze();
        Ok(Some(Chunk { is_last, kind, payload }))
    }
}
