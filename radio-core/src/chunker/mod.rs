//! Chunkers - turn a continuous audio stream into paced, buffered chunks
//!
//! Both chunkers accept PCM through `std::io::Write` and keep the result in a
//! `ChunkStore`:
//! - `PcmChunker` stores the PCM itself in fixed-duration blocks
//! - `Mp3Chunker` pipes it through an encoder and stores whole MPEG frames

pub mod frame;
pub mod mp3;
pub mod pcm;

pub use frame::FrameHeader;
pub use mp3::{FrameSplitter, Mp3ChunkConfig, Mp3Chunker};
pub use pcm::{PcmChunkConfig, PcmChunker};

use chrono::TimeDelta;
use std::io::Write;
use std::sync::Arc;

use crate::chunk::{BufferStatus, ChunkReader, ChunkStore};
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;

/// Anything PCM audio can be written into
pub trait PcmSink: Write + Send {
    fn format(&self) -> StreamFormat;

    /// Announce the start of a stream, with its total size if known
    fn init(&mut self, fixed_size: Option<u64>) -> Result<()>;

    /// Finish the stream. `None` is a normal end; anything else is
    /// propagated to whoever consumes the output.
    fn close_with_error(&mut self, err: Option<AudioError>) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        self.close_with_error(None)
    }
}

/// A `PcmSink` that buffers its output for any number of listeners
pub trait Chunker: PcmSink {
    type Tag: Clone + Send + Sync + 'static;

    fn store(&self) -> &Arc<ChunkStore<Self::Tag>>;

    fn new_stream(&self) -> Result<ChunkReader<Self::Tag>> {
        self.store().new_stream()
    }

    fn new_stream_with_offset(&self, offset: TimeDelta) -> Result<ChunkReader<Self::Tag>> {
        self.store().new_stream_with_offset(offset)
    }

    fn set_associated_data(&self, tag: Self::Tag) {
        self.store().set_associated_data(tag)
    }

    fn associated_data(&self) -> Option<Self::Tag> {
        self.store().associated_data()
    }

    fn buffer_status(&self) -> BufferStatus {
        self.store().buffer_status()
    }
}

impl<S: PcmSink + ?Sized> PcmSink for Box<S> {
    fn format(&self) -> StreamFormat {
        (**self).format()
    }

    fn init(&mut self, fixed_size: Option<u64>) -> Result<()> {
        (**self).init(fixed_size)
    }

    fn close_with_error(&mut self, err: Option<AudioError>) -> Result<()> {
        (**self).close_with_error(err)
    }
}
