use std::io::{self, Seek, SeekFrom, Write};

use super::{encode_header, WavTarget};
use crate::chunker::PcmSink;
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;

/// Writes PCM audio with a WAV header in front.
///
/// When the final size is unknown the header carries a placeholder size.
/// On close the header is rewritten with the real size, but only if the
/// target can seek.
pub struct WavWriter<W> {
    target: W,
    format: StreamFormat,
    header: Option<Option<u64>>,
    written: u64,
    closed: bool,
}

impl<W: WavTarget> WavWriter<W> {
    pub fn new(target: W, format: StreamFormat) -> Self {
        Self {
            target,
            format,
            header: None,
            written: 0,
            closed: false,
        }
    }

    /// Bytes of audio written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.target
    }

    fn write_header(&mut self, size: Option<u64>) -> Result<()> {
        self.target.write_all(&encode_header(&self.format, size))?;
        self.header = Some(size);
        Ok(())
    }

    fn fix_header(&mut self) -> Result<()> {
        let header = encode_header(&self.format, Some(self.written));
        match self.target.seekable() {
            Some(seekable) => {
                seekable.seek(SeekFrom::Start(0))?;
                seekable.write_all(&header)?;
                seekable.seek(SeekFrom::End(0))?;
                self.header = Some(Some(self.written));
            }
            None => tracing::trace!("WAV target cannot seek; keeping placeholder size"),
        }
        Ok(())
    }
}

impl<W: WavTarget> Write for WavWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(AudioError::Closed("WAV writer is closed".to_string()).into_io());
        }
        if self.header.is_none() {
            self.write_header(None).map_err(AudioError::into_io)?;
        }
        let n = self.target.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.target.flush()
    }
}

impl<W: WavTarget> PcmSink for WavWriter<W> {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn init(&mut self, fixed_size: Option<u64>) -> Result<()> {
        if self.header.is_some() {
            return Err(AudioError::Config("WAV header already written".to_string()));
        }
        self.write_header(fixed_size)
    }

    fn close_with_error(&mut self, err: Option<AudioError>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let fixed = match self.header {
            None => {
                let written = self.written;
                self.write_header(Some(written))?;
                true
            }
            Some(size) => size == Some(self.written),
        };
        if !fixed {
            self.fix_header()?;
        }

        let finished = self.target.finish(err.as_ref());
        match err {
            Some(err) => Err(err),
            None => finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{StreamFormat, CD};
    use crate::wav::{WavReader, PLACEHOLDER_SIZE};
    use std::io::{Cursor, Read};

    #[test]
    fn test_round_trip_fixed_size() {
        let format = StreamFormat::new(1, 22_050, 16);
        let mut writer = WavWriter::new(Vec::new(), format);
        writer.init(Some(8)).unwrap();
        writer.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        writer.close().unwrap();

        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 44 + 8);
        let mut reader = WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.format(), format);
        assert_eq!(reader.size(), Some(8));
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_seekable_target_gets_real_size() {
        let mut file = tempfile::tempfile().unwrap();
        let mut writer = WavWriter::new(file.try_clone().unwrap(), CD);
        writer.write_all(&[0u8; 400]).unwrap();
        writer.close().unwrap();

        file.rewind().unwrap();
        let reader = WavReader::new(&mut file).unwrap();
        assert_eq!(reader.format(), CD);
        assert_eq!(reader.size(), Some(400));
    }

    #[test]
    fn test_stream_keeps_placeholder() {
        let mut writer = WavWriter::new(Vec::new(), CD);
        writer.write_all(&[0u8; 400]).unwrap();
        writer.close().unwrap();

        let bytes = writer.into_inner();
        assert_eq!(
            u32::from_le_bytes(bytes[40..44].try_into().unwrap()),
            PLACEHOLDER_SIZE
        );
        let mut reader = WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.size(), None);
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data.len(), 400);
    }

    #[test]
    fn test_close_without_data() {
        let mut writer = WavWriter::new(Vec::new(), CD);
        writer.close().unwrap();
        let reader = WavReader::new(Cursor::new(writer.into_inner())).unwrap();
        assert_eq!(reader.size(), Some(0));
    }

    #[test]
    fn test_close_with_error_is_reported() {
        let mut writer = WavWriter::new(Vec::new(), CD);
        let err = writer.close_with_error(Some(AudioError::Process("flac".into())));
        assert!(matches!(err, Err(AudioError::Process(_))));
        assert!(writer.write(&[0; 4]).is_err());
    }
}
