use bytes::{Buf, Bytes};
use chrono::TimeDelta;
use std::io::{self, Read};
use std::sync::Arc;

use super::{ChunkStore, Poll};
use crate::clock::{sleep_until, TimeSource, TICK};
use crate::error::{AudioError, Result};

/// One listener's cursor into a `ChunkStore`.
///
/// Delivers every chunk in sequence order, each no earlier than its embargo
/// as seen by this reader's clock shifted by its offset.
pub struct ChunkReader<T> {
    store: Arc<ChunkStore<T>>,
    clock: Arc<dyn TimeSource>,
    offset: TimeDelta,
    seqno: u64,
    /// Unread tail of the last chunk handed out through `Read`
    leftover: Bytes,
    /// Set once the reader has been lapped; it never recovers
    lapped: Option<(u64, u64)>,
}

impl<T: Clone + Send + Sync + 'static> ChunkReader<T> {
    pub(crate) fn new(
        store: Arc<ChunkStore<T>>,
        clock: Arc<dyn TimeSource>,
        offset: TimeDelta,
        seqno: u64,
    ) -> Self {
        Self {
            store,
            clock,
            offset,
            seqno,
            leftover: Bytes::new(),
            lapped: None,
        }
    }

    /// Sequence number of the next chunk this reader will deliver
    pub fn position(&self) -> u64 {
        self.seqno
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }

    pub fn store(&self) -> &Arc<ChunkStore<T>> {
        &self.store
    }

    /// Tag of the chunk most recently delivered
    pub fn associated_data(&self) -> Option<T> {
        let last = self.seqno.checked_sub(1)?;
        self.store.associated_data_for(last)
    }

    /// Block until the next chunk is both written and out of embargo.
    ///
    /// Returns `Ok(None)` once the store was closed normally and everything
    /// has been delivered.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if let Some((expected, oldest)) = self.lapped {
            return Err(AudioError::Desynchronized { expected, oldest });
        }

        loop {
            match self.store.poll(self.seqno) {
                Poll::Ready(chunk) => {
                    sleep_until(self.clock.as_ref(), chunk.embargo, self.offset);
                    self.seqno += 1;
                    return Ok(Some(chunk.contents));
                }
                Poll::Evicted { oldest } => {
                    tracing::debug!(expected = self.seqno, oldest, "chunk reader lapped");
                    self.lapped = Some((self.seqno, oldest));
                    return Err(AudioError::Desynchronized {
                        expected: self.seqno,
                        oldest,
                    });
                }
                Poll::Pending => self.clock.sleep(TICK),
                Poll::Finished(None) => return Ok(None),
                Poll::Finished(Some(msg)) => return Err(AudioError::Closed(msg)),
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Read for ChunkReader<T> {
    /// Copies from at most one chunk per call.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.leftover.is_empty() {
            match self.next_chunk().map_err(AudioError::into_io)? {
                Some(chunk) => self.leftover = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.advance(n);
        Ok(n)
    }
}

impl<T: Clone + Send + Sync + 'static> Iterator for ChunkReader<T> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
