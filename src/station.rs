//! The live station
//!
//! Two long-running threads keep the buffers full:
//! - the scheduler decodes performances into the PCM chunker
//! - the relay follows the PCM chunker a fixed lead ahead of real time and
//!   feeds the MP3 chunker, carrying performance tags along

use chrono::TimeDelta;
use radio_core::{
    AudioError, BufferStatus, CancellationToken, Catalog, ChunkReader, ChunkStore, Chunker,
    DirectoryLibrary, Mp3Chunker, PcmChunker, PcmSink, Performance, Scheduler, StreamFormat,
    TimeSource,
};
use std::io::Write;
use std::sync::Arc;
use std::thread;

use crate::config::ServerConfig;
use crate::error::Result;

/// What every chunk in the station is tagged with
pub type Tag = Arc<Performance>;

pub struct Station {
    scheduler: Arc<Scheduler<DirectoryLibrary>>,
    pcm: Arc<ChunkStore<Tag>>,
    mp3: Arc<ChunkStore<Tag>>,
    format: StreamFormat,
    cancel: CancellationToken,
}

impl Station {
    /// Scan the library and start the scheduler and relay threads
    pub fn start(config: &ServerConfig, clock: Arc<dyn TimeSource>) -> Result<Self> {
        let library = DirectoryLibrary::new(config.library.dir.clone(), config.tools.clone())?;
        if library.performances().is_empty() {
            return Err(AudioError::EmptyCatalog.into());
        }
        let scheduler = Arc::new(Scheduler::new(Arc::new(library), config.scheduler_config()));
        let cancel = CancellationToken::new();

        let mut pcm_chunker: PcmChunker<Tag> =
            PcmChunker::new(config.pcm_chunk_config(), clock.clone())?;
        let pcm = pcm_chunker.store().clone();

        let mut mp3_chunker: Mp3Chunker<Tag> =
            Mp3Chunker::new(config.mp3_chunk_config(), clock)?;
        let mp3 = mp3_chunker.store().clone();

        let lead = config.stream.mp3_lead();
        let reader = pcm.new_stream_with_offset(lead)?;

        let worker = scheduler.clone();
        let stop = cancel.clone();
        thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || {
                let closed = match worker.run(&mut pcm_chunker, &stop) {
                    Ok(()) => pcm_chunker.close(),
                    Err(e) => {
                        tracing::error!("Scheduler stopped: {}", e);
                        pcm_chunker.close_with_error(Some(e))
                    }
                };
                if let Err(e) = closed {
                    tracing::debug!("PCM chunker closed with: {}", e);
                }
            })?;

        let source = pcm.clone();
        thread::Builder::new()
            .name("mp3-relay".to_string())
            .spawn(move || {
                let closed = match relay(&source, reader, &mut mp3_chunker, lead) {
                    Ok(()) => mp3_chunker.close(),
                    Err(e) => {
                        tracing::error!("MP3 relay stopped: {}", e);
                        mp3_chunker.close_with_error(Some(e))
                    }
                };
                if let Err(e) = closed {
                    tracing::debug!("MP3 chunker closed with: {}", e);
                }
            })?;

        tracing::info!(
            "Station on air: {} performances, {}, MP3 lead {}s",
            scheduler.library().performances().len(),
            config.stream.format(),
            lead.num_seconds()
        );

        Ok(Self::from_parts(scheduler, pcm, mp3, config.stream.format(), cancel))
    }

    /// A station over buffers that something else fills
    pub(crate) fn from_parts(
        scheduler: Arc<Scheduler<DirectoryLibrary>>,
        pcm: Arc<ChunkStore<Tag>>,
        mp3: Arc<ChunkStore<Tag>>,
        format: StreamFormat,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            pcm,
            mp3,
            format,
            cancel,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<DirectoryLibrary>> {
        &self.scheduler
    }

    pub fn library(&self) -> &Arc<DirectoryLibrary> {
        self.scheduler.library()
    }

    pub fn pcm(&self) -> &Arc<ChunkStore<Tag>> {
        &self.pcm
    }

    pub fn mp3(&self) -> &Arc<ChunkStore<Tag>> {
        &self.mp3
    }

    /// Format of the PCM stream
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// What listeners of the MP3 stream hear right now
    pub fn now_playing(&self) -> Option<Tag> {
        self.mp3.associated_data()
    }

    /// Buffer states, leaving out buffers that hold nothing yet
    pub fn buffer_status(&self) -> (Option<BufferStatus>, Option<BufferStatus>) {
        let non_empty = |status: BufferStatus| (!status.is_empty()).then_some(status);
        (
            non_empty(self.mp3.buffer_status()),
            non_empty(self.pcm.buffer_status()),
        )
    }

    /// Stop scheduling once the current performance is done
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Copy PCM from `reader` into `mp3` until the PCM stream ends. A lapped
/// reader starts over at the current position.
fn relay<C>(
    pcm: &Arc<ChunkStore<Tag>>,
    mut reader: ChunkReader<Tag>,
    mp3: &mut C,
    lead: TimeDelta,
) -> radio_core::Result<()>
where
    C: Chunker<Tag = Tag>,
{
    let mut current: Option<Tag> = None;
    loop {
        let chunk = match reader.next_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return Ok(()),
            Err(AudioError::Desynchronized { expected, oldest }) => {
                tracing::warn!(expected, oldest, "MP3 relay fell behind; resynchronizing");
                reader = pcm.new_stream_with_offset(lead)?;
                continue;
            }
            Err(e) => return Err(e),
        };

        // the tag lands on the next frame the splitter emits, while the
        // encoder may still hold a few frames of the previous performance
        if let Some(tag) = reader.associated_data() {
            let changed = current.as_ref().map_or(true, |c| !Arc::ptr_eq(c, &tag));
            if changed {
                tracing::debug!("Relaying {}", tag.title);
                mp3.set_associated_data(tag.clone());
                current = Some(tag);
            }
        }
        mp3.write_all(&chunk).map_err(AudioError::from_io)?;
    }
}
