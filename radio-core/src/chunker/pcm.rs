use chrono::{DateTime, TimeDelta, Utc};
use std::io::{self, Write};
use std::sync::Arc;

use super::{Chunker, PcmSink};
use crate::chunk::{ChunkStore, SAFETY_MARGIN};
use crate::clock::TimeSource;
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;

/// Settings for a raw PCM chunker
#[derive(Debug, Clone)]
pub struct PcmChunkConfig {
    pub format: StreamFormat,
    /// How far the producer may run ahead of the wall clock
    pub read_ahead: TimeDelta,
    /// How much already-played audio stays buffered
    pub read_behind: TimeDelta,
}

impl Default for PcmChunkConfig {
    fn default() -> Self {
        Self {
            format: StreamFormat::default(),
            read_ahead: TimeDelta::seconds(30),
            read_behind: TimeDelta::seconds(15),
        }
    }
}

impl PcmChunkConfig {
    /// Duration and byte length of one block for this format
    pub fn block_layout(&self) -> (TimeDelta, usize) {
        let frame = self.format.bytes_per_frame();
        if self.format.rate % 100 == 0 {
            (
                TimeDelta::milliseconds(10),
                (self.format.rate / 100) as usize * frame,
            )
        } else {
            (TimeDelta::seconds(1), self.format.rate as usize * frame)
        }
    }

    /// Slots needed to hold the read-ahead and read-behind horizons
    pub fn capacity(&self) -> usize {
        let (block, _) = self.block_layout();
        let horizon = self.read_ahead + self.read_behind;
        let blocks = horizon.num_milliseconds() / block.num_milliseconds().max(1);
        blocks.max(1) as usize + 2 + SAFETY_MARGIN
    }
}

/// Paces fixed-duration blocks of raw PCM into a `ChunkStore`
pub struct PcmChunker<T> {
    format: StreamFormat,
    store: Arc<ChunkStore<T>>,
    partial: Vec<u8>,
    block_len: usize,
    block_duration: TimeDelta,
    read_ahead: TimeDelta,
    embargo: DateTime<Utc>,
    closed: bool,
}

impl<T: Clone + Send + Sync + 'static> PcmChunker<T> {
    pub fn new(config: PcmChunkConfig, clock: Arc<dyn TimeSource>) -> Result<Self> {
        if !config.format.is_valid() {
            return Err(AudioError::Config(format!(
                "cannot chunk PCM in format {}",
                config.format
            )));
        }
        let mut config = config;
        if config.read_ahead < TimeDelta::milliseconds(1) {
            config.read_ahead = TimeDelta::seconds(30);
        }
        if config.read_behind < TimeDelta::milliseconds(1) {
            config.read_behind = TimeDelta::seconds(15);
        }

        let (block_duration, block_len) = config.block_layout();
        let capacity = config.capacity();
        tracing::info!(
            "PCM chunker reading {}s ahead; {} chunks of {} bytes each",
            config.read_ahead.num_seconds(),
            capacity,
            block_len
        );

        let embargo = clock.now();
        Ok(Self {
            format: config.format,
            store: Arc::new(ChunkStore::new(capacity, clock)),
            partial: Vec::with_capacity(block_len),
            block_len,
            block_duration,
            read_ahead: config.read_ahead,
            embargo,
            closed: false,
        })
    }

    /// Embargo the next block will get
    pub fn embargo(&self) -> DateTime<Utc> {
        self.embargo
    }

    fn admit_block(&mut self) {
        self.store.throttle(self.embargo, self.read_ahead);
        self.store.add_chunk(&self.partial, self.embargo);
        self.embargo += self.format.duration_of(self.partial.len()).min(self.block_duration);
        self.partial.clear();
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed || self.store.is_closed() {
            let err = self
                .store
                .error()
                .unwrap_or_else(|| AudioError::Closed("chunker is closed".to_string()));
            return Err(err.into_io());
        }
        Ok(())
    }
}

impl<T: Clone + Send + Sync + 'static> Write for PcmChunker<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;

        let mut rest = buf;
        while !rest.is_empty() {
            let n = (self.block_len - self.partial.len()).min(rest.len());
            self.partial.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            if self.partial.len() == self.block_len {
                self.admit_block();
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Clone + Send + Sync + 'static> PcmSink for PcmChunker<T> {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn init(&mut self, _fixed_size: Option<u64>) -> Result<()> {
        self.check_open().map_err(AudioError::from_io)
    }

    fn close_with_error(&mut self, err: Option<AudioError>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let frame = self.format.bytes_per_frame();
        self.partial.truncate(self.partial.len() / frame * frame);
        if !self.partial.is_empty() {
            self.admit_block();
        }

        match err {
            None => {
                tracing::debug!("PCM chunker closed at end of stream");
                self.store.close();
                Ok(())
            }
            Some(err) => {
                tracing::warn!("PCM chunker closed: {}", err);
                self.store.close_with_error(&err);
                Err(err)
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Chunker for PcmChunker<T> {
    type Tag = T;

    fn store(&self) -> &Arc<ChunkStore<T>> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::format::{CD, DAT};
    use std::io::Read;

    fn chunker(format: StreamFormat, clock: Arc<ManualClock>) -> PcmChunker<u32> {
        let config = PcmChunkConfig {
            format,
            ..Default::default()
        };
        PcmChunker::new(config, clock).unwrap()
    }

    #[test]
    fn test_block_layout() {
        let config = PcmChunkConfig::default();
        assert_eq!(config.block_layout(), (TimeDelta::milliseconds(10), 1920));
        // 45 s of 10 ms blocks, plus slack
        assert_eq!(config.capacity(), 4500 + 2 + SAFETY_MARGIN);

        let odd = PcmChunkConfig {
            format: StreamFormat::new(1, 22_050 + 1, 16),
            ..Default::default()
        };
        assert_eq!(odd.block_layout(), (TimeDelta::seconds(1), 22_051 * 2));
    }

    #[test]
    fn test_paces_blocks() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let mut chunker = chunker(CD, clock.clone());

        let second = vec![0u8; CD.bytes_per_second()];
        chunker.write_all(&second).unwrap();
        chunker.write_all(&second[..1000]).unwrap();

        let status = chunker.buffer_status();
        assert_eq!(status.chunks, 100);
        assert_eq!(status.tmin, Some(start));
        assert_eq!(status.tmax, Some(start + TimeDelta::milliseconds(990)));
        assert_eq!(chunker.embargo(), start + TimeDelta::seconds(1));
        assert!(!clock.has_slept());
    }

    #[test]
    fn test_producer_is_throttled() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let config = PcmChunkConfig {
            format: DAT,
            read_ahead: TimeDelta::seconds(1),
            read_behind: TimeDelta::seconds(1),
        };
        let mut chunker: PcmChunker<()> = PcmChunker::new(config, clock.clone()).unwrap();

        chunker.write_all(&vec![0u8; DAT.bytes_per_second() * 3]).unwrap();
        assert!(clock.has_slept());
        // the last block went in once it was within a second of now
        let last = start + TimeDelta::milliseconds(2990);
        assert!(clock.now() + TimeDelta::seconds(1) >= last);
    }

    #[test]
    fn test_close_flushes_whole_frames() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let mut chunker = chunker(DAT, clock.clone());
        let mut reader = chunker.store().reader_at(0, clock, TimeDelta::zero());

        chunker.write_all(&[1u8; 1920 + 7]).unwrap();
        chunker.close().unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 1920 + 4);

        assert!(chunker.write(&[0; 4]).is_err());
    }

    #[test]
    fn test_close_with_error_reaches_readers() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut chunker = chunker(DAT, clock);
        let mut reader = chunker.new_stream().unwrap();

        let err = chunker.close_with_error(Some(AudioError::Process("flac died".into())));
        assert!(err.is_err());
        match reader.next_chunk() {
            Err(AudioError::Closed(msg)) => assert!(msg.contains("flac died")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_associated_data_follows_writes() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let mut chunker = chunker(DAT, clock.clone());

        chunker.set_associated_data(1);
        chunker.write_all(&vec![0u8; DAT.bytes_per_second()]).unwrap();
        chunker.set_associated_data(2);
        chunker.write_all(&vec![0u8; DAT.bytes_per_second()]).unwrap();

        assert_eq!(chunker.associated_data(), Some(1));
        clock.advance(TimeDelta::milliseconds(1500));
        assert_eq!(chunker.associated_data(), Some(2));
    }
}
