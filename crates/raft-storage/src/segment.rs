//! # segment
//!
//! why: define the versioned binary layout of log segment files
//! relations: used by segmented_log.rs for writing, recovery and reads
//! what: segment header and crc-protected record codec
//!
//! Segment file `segment.<n>`:
//!
//! ```text
//! header (28 bytes): magic "RLOG" | version u32 | base_index i64 | prev_term u64 | reserved u32
//! record:            length u32 | crc32 u32 | index i64 | term u64 | content[length]
//! ```
//!
//! All integers are little-endian. The crc covers `index | term | content`.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use raft_core::{LogIndex, RaftLogEntry, Term};

pub const MAGIC: [u8; 4] = *b"RLOG";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 4;
pub const RECORD_HEADER_SIZE: usize = 4 + 4 + 8 + 8;

const SEGMENT_PREFIX: &str = "segment.";

pub fn segment_file_name(number: u64) -> String {
    format!("{SEGMENT_PREFIX}{number}")
}

/// Segment number from a file name, `None` for anything that isn't a segment.
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?.parse().ok()
}

/// First bytes of every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Index of the first record in the segment
    pub base_index: LogIndex,
    /// Term of the entry at `base_index - 1`
    pub prev_term: Term,
}

impl SegmentHeader {
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.write_all(&MAGIC)?;
        buf.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        buf.write_i64::<LittleEndian>(self.base_index)?;
        buf.write_u64::<LittleEndian>(self.prev_term)?;
        buf.write_u32::<LittleEndian>(0)?;
        Ok(buf)
    }

    /// Parse a header; the error is a human readable reason.
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < HEADER_SIZE {
            return Err(format!("header too short: {} bytes", bytes.len()));
        }
        let mut cursor = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(|e| e.to_string())?;
        if magic != MAGIC {
            return Err(format!("bad magic {magic:?}"));
        }
        let version = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
        if version != FORMAT_VERSION {
            return Err(format!("unsupported format version {version}"));
        }
        let base_index = cursor.read_i64::<LittleEndian>().map_err(|e| e.to_string())?;
        let prev_term = cursor.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
        Ok(Self { base_index, prev_term })
    }
}

/// Encode one log entry as a record.
pub fn encode_record(index: LogIndex, entry: &RaftLogEntry) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(16 + entry.content.len());
    body.write_i64::<LittleEndian>(index)?;
    body.write_u64::<LittleEndian>(entry.term)?;
    body.write_all(&entry.content)?;

    let crc = crc32fast::hash(&body);

    let mut record = Vec::with_capacity(8 + body.len());
    record.write_u32::<LittleEndian>(entry.content.len() as u32)?;
    record.write_u32::<LittleEndian>(crc)?;
    record.write_all(&body)?;
    Ok(record)
}

/// Result of decoding the bytes at a record position.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Record {
        index: LogIndex,
        entry: RaftLogEntry,
        /// Bytes consumed, header included
        size: usize,
    },
    /// The bytes end before the record does
    Incomplete,
    /// The record is complete but its checksum doesn't match
    ChecksumMismatch { size: usize },
}

/// Decode the record at the start of `bytes`.
pub fn decode_record(bytes: &[u8]) -> io::Result<Decoded> {
    if bytes.len() < RECORD_HEADER_SIZE {
        return Ok(Decoded::Incomplete);
    }
    let mut cursor = Cursor::new(bytes);
    let length = cursor.read_u32::<LittleEndian>()? as usize;
    let stored_crc = cursor.read_u32::<LittleEndian>()?;

    let size = RECORD_HEADER_SIZE + length;
    if bytes.len() < size {
        return Ok(Decoded::Incomplete);
    }
    let body = &bytes[8..size];
    if crc32fast::hash(body) != stored_crc {
        return Ok(Decoded::ChecksumMismatch { size });
    }

    let index = cursor.read_i64::<LittleEndian>()?;
    let term = cursor.read_u64::<LittleEndian>()?;
    let content = bytes[RECORD_HEADER_SIZE..size].to_vec();
    Ok(Decoded::Record { index, entry: RaftLogEntry::new(term, content), size })
}
