use bytes::{Buf, Bytes};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{self, Read, Write};

use super::{PcmSource, WavTarget};
use crate::chunker::PcmSink;
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;

/// Blocks in flight before the writer has to wait
const PIPE_DEPTH: usize = 64;

type Message = std::result::Result<Bytes, AudioError>;

/// In-process PCM pipe. Whatever the writer closes with, the reader sees
/// after the last byte: end of stream or the error.
pub fn pcm_pipe(format: StreamFormat) -> (PipeReader, PipeWriter) {
    let (tx, rx) = bounded(PIPE_DEPTH);
    (
        PipeReader {
            rx,
            format,
            pending: Bytes::new(),
            failed: None,
        },
        PipeWriter {
            tx: Some(tx),
            format,
        },
    )
}

pub struct PipeReader {
    rx: Receiver<Message>,
    format: StreamFormat,
    pending: Bytes,
    failed: Option<String>,
}

pub struct PipeWriter {
    tx: Option<Sender<Message>>,
    format: StreamFormat,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            if let Some(msg) = &self.failed {
                return Err(AudioError::Closed(msg.clone()).into_io());
            }
            match self.rx.recv() {
                Ok(Ok(bytes)) => self.pending = bytes,
                Ok(Err(err)) => {
                    self.failed = Some(err.to_string());
                    return Err(err.into_io());
                }
                // every writer is gone
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

impl PcmSource for PipeReader {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn size(&self) -> Option<u64> {
        None
    }
}

impl PipeWriter {
    fn send(&self, msg: Message) -> io::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(msg)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "PCM pipe reader is gone")),
            None => Err(AudioError::Closed("PCM pipe is closed".to_string()).into_io()),
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() {
            self.send(Ok(Bytes::copy_from_slice(buf)))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PcmSink for PipeWriter {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn init(&mut self, _fixed_size: Option<u64>) -> Result<()> {
        Ok(())
    }

    fn close_with_error(&mut self, err: Option<AudioError>) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        match err {
            None => Ok(()),
            Some(err) => {
                let reported = AudioError::Closed(err.to_string());
                // a vanished reader has nothing left to be told
                let _ = tx.send(Err(err));
                Err(reported)
            }
        }
    }
}

impl WavTarget for PipeWriter {
    fn finish(&mut self, err: Option<&AudioError>) -> Result<()> {
        // the WavWriter reports the error to its caller; the reader gets a copy
        let _ = self.close_with_error(err.map(|e| AudioError::Closed(e.to_string())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DAT;

    #[test]
    fn test_pipe_carries_bytes() {
        let (mut reader, mut writer) = pcm_pipe(DAT);
        let handle = std::thread::spawn(move || {
            for i in 0..100u8 {
                writer.write_all(&[i; 10]).unwrap();
            }
            writer.close().unwrap();
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        handle.join().unwrap();
        assert_eq!(out.len(), 1000);
        assert_eq!(out[995], 99);
    }

    #[test]
    fn test_pipe_carries_errors() {
        let (mut reader, mut writer) = pcm_pipe(DAT);
        writer.write_all(b"abcd").unwrap();
        assert!(writer
            .close_with_error(Some(AudioError::Process("flac exited with 1".into())))
            .is_err());

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        let err = reader.read(&mut buf).unwrap_err();
        match AudioError::from_io(err) {
            AudioError::Process(msg) => assert!(msg.contains("flac")),
            other => panic!("unexpected {other:?}"),
        }
        // and stays failed
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn test_dropped_reader_breaks_pipe() {
        let (reader, mut writer) = pcm_pipe(DAT);
        drop(reader);
        let err = writer.write(b"abcd").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
