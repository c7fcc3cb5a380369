use std::io::{self, Read};

use super::{PcmSource, PLACEHOLDER_SIZE};
use crate::error::{AudioError, Result};
use crate::format::{StreamFormat, FORMAT_EXTENSIBLE, FORMAT_PCM};

/// Largest `fmt ` chunk accepted; real ones are 16, 18 or 40 bytes
const MAX_FMT_LEN: u32 = 1024;

/// Tail shared by every WAVE_FORMAT_EXTENSIBLE sub-format GUID
const SUBFORMAT_SUFFIX: [u8; 14] = [
    0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
];

/// Reads PCM data out of a WAV stream.
///
/// The header is parsed up front; reads return only the contents of the
/// `data` chunk.
pub struct WavReader<R> {
    source: R,
    format: StreamFormat,
    size: Option<u64>,
    remaining: Option<u64>,
}

fn read_exact_or_parse<R: Read>(source: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    source.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => AudioError::Parse(format!("truncated {}", what)),
        _ => AudioError::from_io(e),
    })
}

fn u16_at(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn u32_at(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn parse_fmt(chunk: &[u8]) -> Result<StreamFormat> {
    if chunk.len() < 16 {
        return Err(AudioError::Parse(format!(
            "format chunk of {} bytes is too short",
            chunk.len()
        )));
    }

    let tag = u16_at(chunk, 0);
    match tag {
        FORMAT_PCM => {}
        FORMAT_EXTENSIBLE => {
            if chunk.len() < 40 {
                return Err(AudioError::Parse(
                    "extensible format chunk is too short".to_string(),
                ));
            }
            let sub = u16_at(chunk, 24);
            if sub != FORMAT_PCM || chunk[26..40] != SUBFORMAT_SUFFIX {
                return Err(AudioError::UnsupportedFormat(format!(
                    "extensible sub-format {:#06x}",
                    sub
                )));
            }
        }
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "format tag {:#06x}",
                other
            )))
        }
    }

    let format = StreamFormat::new(u16_at(chunk, 2), u32_at(chunk, 4), u16_at(chunk, 14));
    if !format.is_valid() {
        return Err(AudioError::Parse(format!("invalid stream format {}", format)));
    }

    let byte_rate = u32_at(chunk, 8) as u64;
    let block_align = u16_at(chunk, 12) as usize;
    if block_align != format.bytes_per_frame() {
        return Err(AudioError::Parse(format!(
            "block align is {}; expected {} for {}",
            block_align,
            format.bytes_per_frame(),
            format
        )));
    }
    if byte_rate != format.bytes_per_second() as u64 {
        return Err(AudioError::Parse(format!(
            "byte rate is {}; expected {} for {}",
            byte_rate,
            format.bytes_per_second(),
            format
        )));
    }

    Ok(format)
}

impl<R: Read> WavReader<R> {
    pub fn new(mut source: R) -> Result<Self> {
        let mut riff = [0u8; 12];
        read_exact_or_parse(&mut source, &mut riff, "RIFF header")?;
        if &riff[0..4] != b"RIFF" {
            return Err(AudioError::Parse(format!(
                "expected \"RIFF\", got {:02x?}",
                &riff[0..4]
            )));
        }
        if &riff[8..12] != b"WAVE" {
            return Err(AudioError::Parse(format!(
                "expected \"WAVE\", got {:02x?}",
                &riff[8..12]
            )));
        }
        let riff_size = u32_at(&riff, 4) as u64;

        // bytes of the RIFF body seen so far, "WAVE" included
        let mut consumed = 4u64;
        let mut format = None;

        loop {
            let mut head = [0u8; 8];
            read_exact_or_parse(&mut source, &mut head, "chunk header")?;
            let id = [head[0], head[1], head[2], head[3]];
            let len = u32_at(&head, 4);
            consumed += 8;

            match &id {
                b"fmt " => {
                    if len > MAX_FMT_LEN {
                        return Err(AudioError::Parse(format!(
                            "format chunk of {} bytes is too long",
                            len
                        )));
                    }
                    let mut chunk = vec![0u8; len as usize + (len as usize & 1)];
                    read_exact_or_parse(&mut source, &mut chunk, "format chunk")?;
                    format = Some(parse_fmt(&chunk[..len as usize])?);
                    consumed += chunk.len() as u64;
                }
                b"data" => {
                    let format = format.ok_or_else(|| {
                        AudioError::Parse("data chunk before format chunk".to_string())
                    })?;

                    let streaming = len >= PLACEHOLDER_SIZE || riff_size >= u32::MAX as u64;
                    let size = if streaming {
                        None
                    } else {
                        if riff_size < consumed + len as u64 {
                            return Err(AudioError::Parse(format!(
                                "RIFF size {} cannot hold {} bytes of data",
                                riff_size, len
                            )));
                        }
                        Some(len as u64)
                    };

                    return Ok(Self {
                        source,
                        format,
                        size,
                        remaining: size,
                    });
                }
                _ => {
                    let skip = len as u64 + (len as u64 & 1);
                    tracing::trace!("Skipping {:?} chunk of {} bytes", id, len);
                    let copied = io::copy(&mut (&mut source).take(skip), &mut io::sink())
                        .map_err(AudioError::from_io)?;
                    if copied < skip {
                        return Err(AudioError::Parse("no data chunk found".to_string()));
                    }
                    consumed += skip;
                }
            }
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Declared size of the audio data; `None` for streamed files
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: Read> Read for WavReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = match self.remaining {
            Some(0) => return Ok(0),
            Some(left) => buf.len().min(left.min(usize::MAX as u64) as usize),
            None => buf.len(),
        };
        let n = self.source.read(&mut buf[..limit])?;
        if let Some(left) = self.remaining.as_mut() {
            if n == 0 && limit > 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("WAV data ends {} bytes early", left),
                ));
            }
            *left -= n as u64;
        }
        Ok(n)
    }
}

impl<R: Read + Send> PcmSource for WavReader<R> {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn size(&self) -> Option<u64> {
        self.remaining
    }
}
