//! Ring-buffered chunk store
//!
//! One producer appends byte chunks, each tagged with the instant it becomes
//! eligible for delivery (its embargo). Any number of readers follow along at
//! their own position:
//! - `ChunkStore` owns the fixed arena of slots behind a single `RwLock`
//! - `ChunkReader` is one listener's cursor; it owns no shared state
//! - `BufferStatus` is a read-only snapshot for observability

mod reader;
mod store;

pub use reader::ChunkReader;
pub use store::{BufferStatus, ChunkStore, SAFETY_MARGIN};

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One immutable unit of buffered audio
#[derive(Debug, Clone)]
pub struct Chunk {
    pub contents: Bytes,
    pub embargo: DateTime<Utc>,
    pub seqno: u64,
}

/// What a reader finds when it asks for a sequence number
#[derive(Debug, Clone)]
pub enum SlotState {
    /// The producer has not written this chunk yet
    Pending,
    /// The chunk is retained and can be delivered once its embargo passes
    Ready(Chunk),
    /// The chunk has been overwritten; `oldest` is the oldest one still retained
    Evicted { oldest: u64 },
}

/// A `SlotState` combined with the store's terminal state, read under one lock
#[derive(Debug, Clone)]
pub(crate) enum Poll {
    Ready(Chunk),
    Evicted { oldest: u64 },
    Pending,
    /// No more chunks will come; `None` is a normal end of stream
    Finished(Option<String>),
}
