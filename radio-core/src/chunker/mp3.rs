use bytes::{Bytes, BytesMut};
use chrono::{DateTime, TimeDelta, Utc};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::frame::FrameHeader;
use super::{Chunker, PcmSink};
use crate::chunk::ChunkStore;
use crate::clock::TimeSource;
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;
use crate::process::{EncoderConfig, Mp3Encoder, ToolsConfig};

/// Bytes the splitter may hold while looking for a confirming header
pub const SCAN_BUFFER: usize = 4096;

/// Settings for the compressed stream
#[derive(Debug, Clone)]
pub struct Mp3ChunkConfig {
    /// Format of the PCM written into the chunker
    pub format: StreamFormat,
    pub encoder: EncoderConfig,
    pub tools: ToolsConfig,
    /// Frames retained; roughly 26 ms each
    pub capacity: usize,
    pub read_ahead: TimeDelta,
}

impl Default for Mp3ChunkConfig {
    fn default() -> Self {
        Self {
            format: StreamFormat::default(),
            encoder: EncoderConfig::default(),
            tools: ToolsConfig::default(),
            capacity: 4000,
            read_ahead: TimeDelta::seconds(30),
        }
    }
}

/// One complete MPEG audio frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub data: Bytes,
}

/// Cuts a continuous MPEG audio byte stream into whole frames
pub struct FrameSplitter<R> {
    source: R,
    buf: BytesMut,
    last: Option<FrameHeader>,
    eof: bool,
    discarded: usize,
    /// Bytes dropped since the last emitted frame
    unsynced: usize,
}

impl<R: Read> FrameSplitter<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: BytesMut::with_capacity(SCAN_BUFFER),
            last: None,
            eof: false,
            discarded: 0,
            unsynced: 0,
        }
    }

    /// Header of the most recently emitted frame
    pub fn last_header(&self) -> Option<&FrameHeader> {
        self.last.as_ref()
    }

    /// Bytes dropped because they did not belong to any frame
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// The next whole frame, or `None` once the source is exhausted
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(Some(frame));
            }
            if self.eof {
                if !self.buf.is_empty() {
                    tracing::debug!("Dropping {} trailing bytes", self.buf.len());
                    self.discard(self.buf.len());
                }
                return Ok(None);
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        if self.buf.len() >= SCAN_BUFFER {
            return Err(AudioError::NoFrameSync(SCAN_BUFFER));
        }
        let mut tmp = [0u8; SCAN_BUFFER];
        let room = SCAN_BUFFER - self.buf.len();
        let n = loop {
            match self.source.read(&mut tmp[..room]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(AudioError::from_io(e)),
            }
        };
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&tmp[..n]);
        }
        Ok(())
    }

    fn discard(&mut self, n: usize) {
        let _ = self.buf.split_to(n);
        self.discarded += n;
    }

    /// Drop `n` bytes that belong to no frame. Fails once a whole scan
    /// buffer's worth has gone by without a frame.
    fn drop_unsynced(&mut self, n: usize) -> Result<()> {
        self.discard(n);
        self.unsynced += n;
        if self.unsynced >= SCAN_BUFFER {
            return Err(AudioError::NoFrameSync(SCAN_BUFFER));
        }
        Ok(())
    }

    fn accepts(&self, header: &FrameHeader) -> bool {
        self.last.map_or(true, |last| last.is_compatible(header))
    }

    /// Offset of the first acceptable header at or after `from`
    fn find_header(&self, from: usize) -> Option<usize> {
        (from..self.buf.len().saturating_sub(FrameHeader::LEN - 1)).find(|&i| {
            FrameHeader::parse(&self.buf[i..])
                .map(|h| self.accepts(&h))
                .unwrap_or(false)
        })
    }

    fn emit(&mut self, header: FrameHeader, len: usize) -> Frame {
        self.last = Some(header);
        self.unsynced = 0;
        Frame {
            header,
            data: self.buf.split_to(len).freeze(),
        }
    }

    /// Try to cut one frame from the front of the buffer. `Ok(None)` means
    /// more input is needed.
    fn take_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            // align on a header, dropping whatever comes before it
            let header = match FrameHeader::parse(&self.buf).filter(|h| self.accepts(h)) {
                Some(header) => header,
                None => match self.find_header(1) {
                    Some(i) => {
                        tracing::debug!("Skipping {} bytes to the next frame header", i);
                        self.drop_unsynced(i)?;
                        continue;
                    }
                    None => {
                        let keep = FrameHeader::LEN - 1;
                        if self.buf.len() > keep {
                            self.drop_unsynced(self.buf.len() - keep)?;
                        }
                        return Ok(None);
                    }
                },
            };

            let size = header.frame_size();
            if self.buf.len() < size + FrameHeader::LEN {
                if self.eof && self.buf.len() >= size {
                    return Ok(Some(self.emit(header, size)));
                }
                return Ok(None);
            }

            // fast path: the next header sits right where this frame ends
            if let Some(next) = FrameHeader::parse(&self.buf[size..]) {
                if header.is_compatible(&next) {
                    return Ok(Some(self.emit(header, size)));
                }
            }

            if self.last.is_none() {
                // an unconfirmed first header is most likely noise
                self.drop_unsynced(1)?;
                continue;
            }

            // slow path: the frame runs up to the next acceptable header
            match self.find_header(FrameHeader::LEN) {
                Some(next) => return Ok(Some(self.emit(header, next))),
                None if self.eof => return Ok(Some(self.emit(header, size))),
                None => return Ok(None),
            }
        }
    }

    /// Add every frame to `store`, each embargoed at the running total of
    /// the durations before it, starting at `start`. Returns the embargo
    /// following the last frame.
    pub fn pace_into<T: Clone + Send + Sync + 'static>(
        &mut self,
        store: &ChunkStore<T>,
        start: DateTime<Utc>,
        read_ahead: TimeDelta,
    ) -> Result<DateTime<Utc>> {
        let mut embargo = start;
        let mut frames = 0u64;
        while let Some(frame) = self.next_frame()? {
            if frames == 0 {
                tracing::info!("MP3 stream: {}", frame.header);
            }
            store.add_chunk(&frame.data, embargo);
            embargo += frame.header.duration();
            store.throttle(embargo, read_ahead);
            frames += 1;
        }
        tracing::debug!("Split {} frames", frames);
        Ok(embargo)
    }
}

impl<R: Read> Iterator for FrameSplitter<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Encodes PCM to MP3 and buffers the stream one frame per chunk.
///
/// PCM written here goes to the encoder; a background thread splits the
/// encoder's output into frames and is the only thing adding chunks.
pub struct Mp3Chunker<T> {
    input: Box<dyn PcmSink>,
    store: Arc<ChunkStore<T>>,
    splitter: Option<JoinHandle<()>>,
    closed: bool,
}

impl<T: Clone + Send + Sync + 'static> Mp3Chunker<T> {
    pub fn new(config: Mp3ChunkConfig, clock: Arc<dyn TimeSource>) -> Result<Self> {
        let (encoder, output) = Mp3Encoder::spawn(&config.tools, &config.encoder, config.format)?;
        Self::with_encoder(Box::new(encoder), output, &config, clock)
    }

    /// Build on an already running encoder: PCM goes into `input`, MP3 comes
    /// out of `output`.
    pub fn with_encoder<R>(
        input: Box<dyn PcmSink>,
        output: R,
        config: &Mp3ChunkConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let start = clock.now();
        let store = Arc::new(ChunkStore::new(config.capacity, clock));
        tracing::info!(
            "MP3 chunker reading {}s ahead; {} frames",
            config.read_ahead.num_seconds(),
            store.capacity()
        );

        let read_ahead = config.read_ahead;
        let producer = store.clone();
        let splitter = std::thread::Builder::new()
            .name("mp3-splitter".to_string())
            .spawn(move || {
                let mut splitter = FrameSplitter::new(output);
                match splitter.pace_into(&producer, start, read_ahead) {
                    Ok(_) => producer.close(),
                    Err(e) => {
                        tracing::warn!("MP3 splitter stopped: {}", e);
                        producer.close_with_error(&e);
                    }
                }
            })?;

        Ok(Self {
            input,
            store,
            splitter: Some(splitter),
            closed: false,
        })
    }

    fn join_splitter(&mut self) {
        if let Some(handle) = self.splitter.take() {
            if handle.join().is_err() {
                tracing::error!("MP3 splitter thread panicked");
                self.store
                    .close_with_error(&AudioError::Closed("splitter panicked".to_string()));
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Write for Mp3Chunker<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(err) = self.store.error() {
            return Err(err.into_io());
        }
        if self.closed {
            return Err(AudioError::Closed("chunker is closed".to_string()).into_io());
        }
        self.input.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.input.flush()
    }
}

impl<T: Clone + Send + Sync + 'static> PcmSink for Mp3Chunker<T> {
    fn format(&self) -> StreamFormat {
        self.input.format()
    }

    fn init(&mut self, fixed_size: Option<u64>) -> Result<()> {
        if let Some(err) = self.store.error() {
            return Err(err);
        }
        self.input.init(fixed_size)
    }

    fn close_with_error(&mut self, err: Option<AudioError>) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match err {
            None => {
                // the splitter drains what the encoder still holds, then closes the store
                let result = self.input.close();
                if let Err(e) = &result {
                    self.store.close_with_error(e);
                }
                self.join_splitter();
                result
            }
            Some(err) => {
                self.store.close_with_error(&err);
                let result = self.input.close_with_error(Some(err));
                self.join_splitter();
                result
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Chunker for Mp3Chunker<T> {
    type Tag = T;

    fn store(&self) -> &Arc<ChunkStore<T>> {
        &self.store
    }
}

impl<T> Drop for Mp3Chunker<T> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.input.close_with_error(Some(AudioError::Closed(
                "chunker dropped".to_string(),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::frame::{encode_header, Layer, MpegVersion};
    use crate::clock::ManualClock;
    use crate::format::DAT;
    use crate::wav::pcm_pipe;
    use std::io::Cursor;

    /// A frame of the given header, with a payload that contains no sync
    fn frame(header: [u8; 4]) -> Vec<u8> {
        let size = FrameHeader::parse(&header).unwrap().frame_size();
        let mut out = header.to_vec();
        out.resize(size, 0x55);
        out
    }

    fn cbr_stream(frames: usize) -> Vec<u8> {
        let header = encode_header(MpegVersion::Mpeg1, Layer::III, 9, 0, false);
        let padded = encode_header(MpegVersion::Mpeg1, Layer::III, 9, 0, true);
        (0..frames)
            .flat_map(|i| frame(if i % 3 == 0 { padded } else { header }))
            .collect()
    }

    #[test]
    fn test_splits_whole_frames() {
        let stream = cbr_stream(10);
        let frames: Vec<Frame> = FrameSplitter::new(Cursor::new(stream.clone()))
            .map(|f| f.unwrap())
            .collect();

        assert_eq!(frames.len(), 10);
        assert_eq!(frames[0].data.len(), 418);
        assert_eq!(frames[1].data.len(), 417);
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.data.to_vec()).collect();
        assert_eq!(joined, stream);
    }

    #[test]
    fn test_skips_leading_junk() {
        let mut stream = b"ID3\x04\x00\x00\x00\x00\x00\x10\xff\xfe junk".to_vec();
        stream.extend(cbr_stream(4));

        let mut splitter = FrameSplitter::new(Cursor::new(stream));
        let frames: Vec<Frame> = splitter.by_ref().map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(splitter.discarded(), 17);
    }

    #[test]
    fn test_drops_incomplete_final_frame() {
        let mut stream = cbr_stream(3);
        stream.truncate(stream.len() - 10);
        let frames: Vec<Frame> = FrameSplitter::new(Cursor::new(stream))
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_rejects_incompatible_sync() {
        // a stray header with another sample rate inside the stream is payload
        let mut stream = frame(encode_header(MpegVersion::Mpeg1, Layer::III, 9, 0, false));
        let mut second = frame(encode_header(MpegVersion::Mpeg1, Layer::III, 9, 0, false));
        second[100..104].copy_from_slice(&encode_header(MpegVersion::Mpeg2, Layer::III, 9, 1, false));
        stream.extend(second);
        stream.extend(cbr_stream(2));

        let frames: Vec<Frame> = FrameSplitter::new(Cursor::new(stream))
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(frames.len(), 4);
        assert!(frames.iter().all(|f| f.data.len() >= 417));
    }

    #[test]
    fn test_no_frame_sync() {
        // a valid header followed by a payload far larger than its frame
        let mut stream = encode_header(MpegVersion::Mpeg1, Layer::III, 9, 0, false).to_vec();
        stream.extend(std::iter::repeat(0x55).take(413));
        stream.extend(frame(encode_header(MpegVersion::Mpeg1, Layer::III, 9, 0, false)));
        stream.extend(std::iter::repeat(0x55).take(2 * SCAN_BUFFER));

        let mut splitter = FrameSplitter::new(Cursor::new(stream));
        let mut result = Ok(None);
        for _ in 0..4 {
            result = splitter.next_frame();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(AudioError::NoFrameSync(SCAN_BUFFER))));
    }

    #[test]
    fn test_no_frame_sync_in_junk() {
        let mut splitter = FrameSplitter::new(Cursor::new(vec![0u8; 3 * SCAN_BUFFER]));
        let result = splitter.next_frame();
        assert!(matches!(result, Err(AudioError::NoFrameSync(SCAN_BUFFER))));
        assert!(splitter.discarded() >= SCAN_BUFFER);
    }

    #[test]
    fn test_short_junk_before_first_frame() {
        let mut stream = vec![0u8; SCAN_BUFFER / 2];
        stream.extend(cbr_stream(3));
        let frames: Vec<Frame> = FrameSplitter::new(Cursor::new(stream))
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn test_sync_lost_mid_stream() {
        let mut stream = cbr_stream(3);
        stream.extend(vec![0u8; 2 * SCAN_BUFFER]);
        stream.extend(cbr_stream(3));

        let mut splitter = FrameSplitter::new(Cursor::new(stream));
        let mut frames = 0;
        let err = loop {
            match splitter.next_frame() {
                Ok(Some(_)) => frames += 1,
                Ok(None) => panic!("stream ended without a sync error"),
                Err(e) => break e,
            }
        };
        assert!(frames <= 3);
        assert!(matches!(err, AudioError::NoFrameSync(SCAN_BUFFER)));
    }

    #[test]
    fn test_paced_duration_matches_recording() {
        // 10 minutes of 128 kbps 44.1 kHz audio
        let frames = (600.0 / 0.026_122_449_f64).ceil() as usize;
        let stream = cbr_stream(frames);

        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store: ChunkStore<()> = ChunkStore::new(100, clock.clone());
        let end = FrameSplitter::new(Cursor::new(stream))
            .pace_into(&store, start, TimeDelta::days(1))
            .unwrap();

        let drift = (end - start).num_milliseconds() - 600_000;
        assert!(drift.abs() < 1000, "drift {drift}ms");
        assert!(!clock.has_slept());
    }

    #[test]
    fn test_chunker_buffers_encoder_output() {
        // a pass-through "encoder": whatever is written comes straight back out
        let (reader, writer) = pcm_pipe(DAT);
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let config = Mp3ChunkConfig {
            capacity: 64,
            ..Default::default()
        };
        let mut chunker: Mp3Chunker<&str> =
            Mp3Chunker::with_encoder(Box::new(writer), reader, &config, clock.clone()).unwrap();
        let mut listener = chunker.new_stream().unwrap();

        chunker.set_associated_data("BWV 1007");
        chunker.write_all(&cbr_stream(20)).unwrap();
        chunker.close().unwrap();

        let mut count = 0;
        while let Some(chunk) = listener.next_chunk().unwrap() {
            assert!(FrameHeader::parse(&chunk).is_some());
            count += 1;
        }
        assert_eq!(count, 20);
        assert_eq!(chunker.associated_data(), Some("BWV 1007"));
        assert!(chunker.write(&[0; 4]).is_err());
    }

    #[test]
    fn test_chunker_error_reaches_listeners() {
        let (reader, writer) = pcm_pipe(DAT);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut chunker: Mp3Chunker<()> = Mp3Chunker::with_encoder(
            Box::new(writer),
            reader,
            &Mp3ChunkConfig::default(),
            clock,
        )
        .unwrap();
        let mut listener = chunker.new_stream().unwrap();

        let err = chunker.close_with_error(Some(AudioError::Process("lame exited".into())));
        assert!(err.is_err());
        assert!(matches!(listener.next_chunk(), Err(AudioError::Closed(_))));
    }
}
