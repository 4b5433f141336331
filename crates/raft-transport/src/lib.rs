//! # raft-transport
//!
//! why: carry raft messages between members and run each raft group on its own thread
//! relations: frames raft-core messages, runs RaftNode over raft-storage or in-memory state
//! what: chunk framing, composers, fragmenter, inbound pipeline, connection reader, group runtime, config, tracing setup

pub mod chunk;
pub mod composer;
pub mod config;
pub mod connection;
pub mod error;
pub mod fragmenter;
pub mod pipeline;
pub mod runtime;
pub mod telemetry;
pub mod wire;

pub use chunk::{Chunk, ChunkDecoder, ChunkKind};
pub use composer::{ChunkComposer, ComposedMessage, RaftMessageComposer};
pub use config::{GroupConfig, TransportConfig};
pub use connection::{read_connection, write_message};
pub use error::{ProtocolError, TransportError, TransportResult};
pub use fragmenter::MessageFragmenter;
pub use pipeline::InboundPipeline;
pub use runtime::{spawn_group, GroupStatus, Outbound, RaftGroupHandle};
pub use telemetry::init_tracing;
