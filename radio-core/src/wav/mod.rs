//! PCM container codec and stream plumbing
//!
//! - `WavReader` parses RIFF/WAVE headers from any byte source
//! - `WavWriter` writes them, fixing up sizes afterwards when it can seek
//! - `pcm_pipe` connects a PCM producer thread to a consumer
//! - `Converter` changes channel count, sample rate and bit depth on the fly

mod convert;
mod pipe;
mod reader;
pub mod sample;
mod writer;

pub use convert::{convert, Converter};
pub use pipe::{pcm_pipe, PipeReader, PipeWriter};
pub use reader::WavReader;
pub use writer::WavWriter;

use std::fs::File;
use std::io::{Cursor, Read, Seek, Write};
use std::process::ChildStdin;

use crate::error::Result;
use crate::format::{StreamFormat, FORMAT_PCM};

/// Length of the canonical header written by `encode_header`
pub const HEADER_LEN: usize = 44;

/// Data size written when the final size is not known yet
pub const PLACEHOLDER_SIZE: u32 = 0x7fff_ffd3;

/// A stream of PCM audio in a known format
pub trait PcmSource: Read + Send {
    fn format(&self) -> StreamFormat;

    /// Bytes of audio left to read, when known
    fn size(&self) -> Option<u64>;
}

impl<S: PcmSource + ?Sized> PcmSource for Box<S> {
    fn format(&self) -> StreamFormat {
        (**self).format()
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }
}

pub trait SeekWrite: Write + Seek {}

impl<T: Write + Seek> SeekWrite for T {}

/// Somewhere a `WavWriter` can put its output
pub trait WavTarget: Write + Send {
    /// The same destination as a seekable handle, if it is one
    fn seekable(&mut self) -> Option<&mut dyn SeekWrite> {
        None
    }

    /// Called once when the writer is closed
    fn finish(&mut self, _err: Option<&crate::error::AudioError>) -> Result<()> {
        self.flush()?;
        Ok(())
    }
}

impl WavTarget for File {
    fn seekable(&mut self) -> Option<&mut dyn SeekWrite> {
        Some(self)
    }
}

impl WavTarget for Cursor<Vec<u8>> {
    fn seekable(&mut self) -> Option<&mut dyn SeekWrite> {
        Some(self)
    }
}

impl WavTarget for Vec<u8> {}

impl WavTarget for ChildStdin {}

/// A canonical 44-byte WAV header. `None` writes the streaming placeholder.
pub fn encode_header(format: &StreamFormat, data_size: Option<u64>) -> [u8; HEADER_LEN] {
    let data_size = data_size
        .map(|s| s.min(u32::MAX as u64 - 36) as u32)
        .unwrap_or(PLACEHOLDER_SIZE);
    let block_align = format.bytes_per_frame() as u16;
    let byte_rate = format.rate * block_align as u32;

    let mut b = [0u8; HEADER_LEN];
    b[0..4].copy_from_slice(b"RIFF");
    b[4..8].copy_from_slice(&(data_size + 36).to_le_bytes());
    b[8..12].copy_from_slice(b"WAVE");
    b[12..16].copy_from_slice(b"fmt ");
    b[16..20].copy_from_slice(&16u32.to_le_bytes());
    b[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
    b[22..24].copy_from_slice(&format.channels.to_le_bytes());
    b[24..28].copy_from_slice(&format.rate.to_le_bytes());
    b[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    b[32..34].copy_from_slice(&block_align.to_le_bytes());
    b[34..36].copy_from_slice(&format.bits.to_le_bytes());
    b[36..40].copy_from_slice(b"data");
    b[40..44].copy_from_slice(&data_size.to_le_bytes());
    b
}
