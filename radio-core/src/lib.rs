//! Live audio play-out engine
//!
//! A scheduler decodes performances from a library and writes them into a
//! chunker. The chunker paces the audio into a ring-buffered `ChunkStore`,
//! from which any number of listeners read at their own position.

pub mod chunk;
pub mod chunker;
pub mod clock;
pub mod error;
pub mod format;
pub mod library;
pub mod process;
pub mod scheduler;
pub mod wav;

pub use chunk::{BufferStatus, Chunk, ChunkReader, ChunkStore, SlotState, SAFETY_MARGIN};
pub use chunker::{
    Chunker, FrameHeader, FrameSplitter, Mp3ChunkConfig, Mp3Chunker, PcmChunkConfig, PcmChunker,
    PcmSink,
};
pub use clock::{system_clock, ManualClock, SystemClock, TimeSource};
pub use error::{AudioError, ErrorKind, Result};
pub use format::{StreamFormat, CD, DAT, HI_RES};
pub use library::{Catalog, ContentResolver, DirectoryLibrary, Performance, PerformanceId};
pub use process::{EncoderConfig, FlacDecoder, Mp3Encoder, ToolsConfig};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use wav::{PcmSource, WavReader, WavTarget, WavWriter};

pub use tokio_util::sync::CancellationToken;
