//! Continuous play-out
//!
//! The scheduler keeps a chunker fed: queued requests first, in order, then
//! random picks from the whole catalog.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::chunker::Chunker;
use crate::error::{AudioError, Result};
use crate::library::{Catalog, ContentResolver, Performance, PerformanceId};
use crate::wav::convert;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause after a performance fails to play
    pub failure_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_backoff: Duration::from_secs(1),
        }
    }
}

pub struct Scheduler<L> {
    library: Arc<L>,
    config: SchedulerConfig,
    queue: Mutex<VecDeque<PerformanceId>>,
    rng: Mutex<StdRng>,
}

impl<L: Catalog + ContentResolver> Scheduler<L> {
    pub fn new(library: Arc<L>, config: SchedulerConfig) -> Self {
        Self::with_rng(library, config, StdRng::from_entropy())
    }

    /// Scheduler with reproducible random picks
    pub fn with_seed(library: Arc<L>, config: SchedulerConfig, seed: u64) -> Self {
        Self::with_rng(library, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(library: Arc<L>, config: SchedulerConfig, rng: StdRng) -> Self {
        Self {
            library,
            config,
            queue: Mutex::new(VecDeque::new()),
            rng: Mutex::new(rng),
        }
    }

    pub fn library(&self) -> &Arc<L> {
        &self.library
    }

    /// Add a performance to the end of the play queue
    pub fn enqueue(&self, id: PerformanceId) -> Result<()> {
        if self.library.performance(&id).is_none() {
            return Err(AudioError::NotFound(id.to_string()));
        }
        tracing::debug!("Enqueued {}", id);
        self.queue.lock().push_back(id);
        Ok(())
    }

    /// Snapshot of the play queue, front first
    pub fn queue(&self) -> Vec<PerformanceId> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Pick what plays next: the queue front if there is one, otherwise a
    /// uniformly random performance.
    pub fn next_performance(&self) -> Result<Performance> {
        loop {
            let Some(id) = self.queue.lock().pop_front() else {
                break;
            };
            match self.library.performance(&id) {
                Some(performance) => return Ok(performance),
                None => tracing::warn!("Queued performance {} is gone; skipping", id),
            }
        }

        let mut performances = self.library.performances();
        if performances.is_empty() {
            return Err(AudioError::EmptyCatalog);
        }
        let i = self.rng.lock().gen_range(0..performances.len());
        Ok(performances.swap_remove(i))
    }

    /// Feed `chunker` until `cancel` is raised. A performance that is
    /// already playing is always finished first.
    ///
    /// Failing performances are logged and skipped. Only an empty catalog or
    /// a closed chunker ends the loop with an error.
    pub fn run<C>(&self, chunker: &mut C, cancel: &CancellationToken) -> Result<()>
    where
        C: Chunker<Tag = Arc<Performance>>,
    {
        while !cancel.is_cancelled() {
            let performance = self.next_performance()?;
            if let Err(e) = self.play(&performance, chunker) {
                if chunker.store().is_closed() {
                    tracing::info!("Chunker closed; scheduler stopping");
                    return Err(e);
                }
                tracing::warn!("Skipping {}: {}", performance.id, e);
                chunker.store().clock().sleep(self.config.failure_backoff);
            }
        }
        tracing::info!("Scheduler cancelled");
        Ok(())
    }

    fn play<C>(&self, performance: &Performance, chunker: &mut C) -> Result<()>
    where
        C: Chunker<Tag = Arc<Performance>>,
    {
        let source = self.library.open(performance)?;
        let mut source = convert(source, chunker.format())?;

        chunker.set_associated_data(Arc::new(performance.clone()));
        tracing::info!("Queued: {}", performance.title);

        io::copy(&mut source, chunker).map_err(AudioError::from_io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{PcmChunkConfig, PcmChunker, PcmSink};
    use crate::clock::ManualClock;
    use crate::format::{StreamFormat, CD};
    use crate::wav::PcmSource;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::io::{Cursor, Read};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Memory {
        format: StreamFormat,
        data: Cursor<Vec<u8>>,
    }

    impl Read for Memory {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.data.read(buf)
        }
    }

    impl PcmSource for Memory {
        fn format(&self) -> StreamFormat {
            self.format
        }

        fn size(&self) -> Option<u64> {
            Some(self.data.get_ref().len() as u64 - self.data.position())
        }
    }

    /// Performances named after their sample value; "broken" fails to open
    #[derive(Default)]
    struct TestLibrary {
        performances: Mutex<Vec<Performance>>,
        opened: AtomicUsize,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl TestLibrary {
        fn with(ids: &[&str]) -> Self {
            let library = Self::default();
            for id in ids {
                library.add(id);
            }
            library
        }

        fn add(&self, id: &str) {
            self.performances.lock().push(Performance {
                id: PerformanceId::from(id),
                title: id.to_uppercase(),
                parts: vec![PathBuf::from(id)],
            });
        }

        fn remove(&self, id: &str) {
            self.performances.lock().retain(|p| p.id.0 != id);
        }
    }

    impl Catalog for TestLibrary {
        fn performances(&self) -> Vec<Performance> {
            self.performances.lock().clone()
        }
    }

    impl ContentResolver for TestLibrary {
        fn open(&self, performance: &Performance) -> Result<Box<dyn PcmSource>> {
            let opened = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, flag)) = &self.cancel_after {
                if opened >= *limit {
                    flag.cancel();
                }
            }
            if performance.id.0 == "broken" {
                return Err(AudioError::Process("flac exited with 1".into()));
            }
            let value = performance.id.0.as_bytes()[0];
            Ok(Box::new(Memory {
                format: CD,
                data: Cursor::new(vec![value; 1764]),
            }))
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            failure_backoff: Duration::ZERO,
        }
    }

    fn chunker() -> PcmChunker<Arc<Performance>> {
        let config = PcmChunkConfig {
            format: CD,
            ..Default::default()
        };
        PcmChunker::new(config, Arc::new(ManualClock::new(Utc::now()))).unwrap()
    }

    #[test]
    fn test_queue_is_fifo() {
        let library = Arc::new(TestLibrary::with(&["a", "b", "c"]));
        let scheduler = Scheduler::with_seed(library, config(), 7);

        scheduler.enqueue(PerformanceId::from("b")).unwrap();
        scheduler.enqueue(PerformanceId::from("a")).unwrap();
        assert_eq!(
            scheduler.queue(),
            [PerformanceId::from("b"), PerformanceId::from("a")]
        );

        assert_eq!(scheduler.next_performance().unwrap().id.0, "b");
        assert_eq!(scheduler.next_performance().unwrap().id.0, "a");
        assert!(scheduler.queue().is_empty());
    }

    #[test]
    fn test_enqueue_unknown() {
        let scheduler = Scheduler::new(Arc::new(TestLibrary::with(&["a"])), config());
        assert!(matches!(
            scheduler.enqueue(PerformanceId::from("zzz")),
            Err(AudioError::NotFound(_))
        ));
        assert!(scheduler.queue().is_empty());
    }

    #[test]
    fn test_vanished_queue_entries_are_skipped() {
        let library = Arc::new(TestLibrary::with(&["a", "b"]));
        let scheduler = Scheduler::with_seed(library.clone(), config(), 1);
        scheduler.enqueue(PerformanceId::from("a")).unwrap();
        scheduler.enqueue(PerformanceId::from("b")).unwrap();
        library.remove("a");
        assert_eq!(scheduler.next_performance().unwrap().id.0, "b");
    }

    #[test]
    fn test_random_picks_are_uniform() {
        let library = Arc::new(TestLibrary::with(&["a", "b", "c"]));
        let scheduler = Scheduler::with_seed(library, config(), 42);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..3000 {
            let pick = scheduler.next_performance().unwrap();
            *counts.entry(pick.id.0).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        for (id, count) in counts {
            assert!((850..1150).contains(&count), "{id} picked {count} times");
        }
    }

    #[test]
    fn test_empty_catalog_fails() {
        let scheduler = Scheduler::new(Arc::new(TestLibrary::default()), config());
        assert!(matches!(
            scheduler.next_performance(),
            Err(AudioError::EmptyCatalog)
        ));

        let mut chunker = chunker();
        let cancel = CancellationToken::new();
        assert!(matches!(
            scheduler.run(&mut chunker, &cancel),
            Err(AudioError::EmptyCatalog)
        ));
    }

    #[test]
    fn test_run_plays_until_cancelled() {
        let cancel = CancellationToken::new();
        let library = TestLibrary {
            cancel_after: Some((3, cancel.clone())),
            ..TestLibrary::with(&["a", "broken", "c"])
        };
        let scheduler = Scheduler::with_seed(Arc::new(library), config(), 3);
        scheduler.enqueue(PerformanceId::from("a")).unwrap();
        scheduler.enqueue(PerformanceId::from("broken")).unwrap();
        scheduler.enqueue(PerformanceId::from("c")).unwrap();

        let mut chunker = chunker();
        let mut reader = chunker.new_stream().unwrap();

        scheduler.run(&mut chunker, &cancel).unwrap();
        assert!(cancel.is_cancelled());
        chunker.close().unwrap();

        // "c" was already playing when the flag went up, and still finished
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(data.len(), 2 * 1764);
        assert!(data[..1764].iter().all(|&b| b == b'a'));
        assert!(data[1764..].iter().all(|&b| b == b'c'));

        // the reader has caught up with the last block
        assert_eq!(chunker.associated_data().unwrap().id.0, "c");
    }

    #[test]
    fn test_cancelled_before_start() {
        let scheduler = Scheduler::new(Arc::new(TestLibrary::with(&["a"])), config());
        let mut chunker = chunker();
        let cancel = CancellationToken::new();
        cancel.cancel();
        scheduler.run(&mut chunker, &cancel).unwrap();
        assert!(chunker.associated_data().is_none());
        assert_eq!(scheduler.library().opened.load(Ordering::SeqCst), 0);
    }
}
