use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{Chunk, ChunkReader, Poll, SlotState};
use crate::clock::{sleep_until, TimeSource};
use crate::error::{AudioError, Result};

/// Slots kept out of the readable window so the slot being overwritten is
/// never the one a reader considers the oldest.
pub const SAFETY_MARGIN: usize = 5;

/// Snapshot of what a chunk store currently holds
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BufferStatus {
    /// Embargo of the oldest retained chunk
    pub tmin: Option<DateTime<Utc>>,
    /// Embargo of the newest retained chunk
    pub tmax: Option<DateTime<Utc>>,
    /// Bytes whose embargo has passed
    pub bytes_behind: usize,
    /// Bytes still under embargo
    pub bytes_ahead: usize,
    pub total_bytes: usize,
    pub chunks: usize,
    pub capacity: usize,
}

impl BufferStatus {
    pub fn is_empty(&self) -> bool {
        self.chunks == 0
    }
}

#[derive(Debug, Clone)]
enum Terminal {
    EndOfStream,
    Failed(String),
}

/// The arena itself. All index arithmetic lives here.
struct Ring<T> {
    slots: Vec<Option<Chunk>>,
    /// Sequence number the next appended chunk gets
    next_seqno: u64,
    /// Number of chunks in the readable window
    retained: usize,
    /// (first seqno the tag applies to, tag), ascending
    timeline: VecDeque<(u64, T)>,
    /// Last tag pruned from the timeline; still valid for evicted audio
    primordial: Option<T>,
    terminal: Option<Terminal>,
}

impl<T: Clone> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            next_seqno: 0,
            retained: 0,
            timeline: VecDeque::new(),
            primordial: None,
            terminal: None,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn window(&self) -> usize {
        self.capacity() - SAFETY_MARGIN
    }

    fn index(&self, seqno: u64) -> usize {
        (seqno % self.capacity() as u64) as usize
    }

    /// Slot index of the oldest retained chunk
    fn start(&self) -> usize {
        self.index(self.oldest_seqno())
    }

    /// Slot index the next append writes to
    fn end(&self) -> usize {
        self.index(self.next_seqno)
    }

    fn oldest_seqno(&self) -> u64 {
        self.next_seqno - self.retained as u64
    }

    fn push(&mut self, contents: Bytes, embargo: DateTime<Utc>) -> u64 {
        let seqno = self.next_seqno;
        let end = self.end();
        self.slots[end] = Some(Chunk {
            contents,
            embargo,
            seqno,
        });
        self.next_seqno += 1;
        self.retained = (self.retained + 1).min(self.window());
        self.prune_timeline();

        debug_assert_eq!(self.end(), self.index(self.next_seqno));
        debug_assert!(self.retained == 0 || self.start() != self.end());
        seqno
    }

    fn prune_timeline(&mut self) {
        let oldest = self.oldest_seqno();
        while self.timeline.len() >= 2 && self.timeline[1].0 <= oldest {
            if let Some((_, tag)) = self.timeline.pop_front() {
                self.primordial = Some(tag);
            }
        }
    }

    fn slot_state(&self, seqno: u64) -> SlotState {
        if seqno >= self.next_seqno {
            return SlotState::Pending;
        }
        let oldest = self.oldest_seqno();
        if seqno < oldest {
            return SlotState::Evicted { oldest };
        }
        match &self.slots[self.index(seqno)] {
            Some(chunk) if chunk.seqno == seqno => SlotState::Ready(chunk.clone()),
            _ => SlotState::Evicted { oldest },
        }
    }

    fn retained_chunks(&self) -> impl DoubleEndedIterator<Item = &Chunk> + '_ {
        (self.oldest_seqno()..self.next_seqno)
            .filter_map(move |seqno| self.slots[self.index(seqno)].as_ref())
    }

    /// Newest retained chunk whose embargo is at or before `time`
    fn latest_eligible(&self, time: DateTime<Utc>) -> Option<u64> {
        self.retained_chunks()
            .rev()
            .find(|chunk| chunk.embargo <= time)
            .map(|chunk| chunk.seqno)
    }

    fn tag_for(&self, seqno: Option<u64>) -> Option<T> {
        if let Some(seqno) = seqno {
            if let Some((_, tag)) = self.timeline.iter().rev().find(|(from, _)| *from <= seqno) {
                return Some(tag.clone());
            }
        }
        self.primordial
            .clone()
            .or_else(|| self.timeline.front().map(|(_, tag)| tag.clone()))
    }
}

/// Fixed-capacity, time-indexed circular buffer of audio chunks.
///
/// One producer calls `add_chunk`; every listener gets its own
/// `ChunkReader`. Chunks are never removed, only overwritten when the ring
/// wraps.
pub struct ChunkStore<T> {
    ring: RwLock<Ring<T>>,
    clock: Arc<dyn TimeSource>,
}

impl<T: Clone + Send + Sync + 'static> ChunkStore<T> {
    /// Create a store with `capacity` slots. Capacities at or below the
    /// safety margin are raised so at least one chunk stays readable.
    pub fn new(capacity: usize, clock: Arc<dyn TimeSource>) -> Self {
        let capacity = capacity.max(SAFETY_MARGIN + 1);
        Self {
            ring: RwLock::new(Ring::new(capacity)),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    pub fn capacity(&self) -> usize {
        self.ring.read().capacity()
    }

    /// Copy `contents` into the next slot. Returns the chunk's sequence number.
    pub fn add_chunk(&self, contents: &[u8], embargo: DateTime<Utc>) -> u64 {
        let contents = Bytes::copy_from_slice(contents);
        self.ring.write().push(contents, embargo)
    }

    /// Block the producer while `embargo` lies more than `read_ahead` past now.
    /// Never holds the lock while sleeping.
    pub fn throttle(&self, embargo: DateTime<Utc>, read_ahead: TimeDelta) {
        sleep_until(self.clock.as_ref(), embargo, read_ahead);
    }

    /// Where a reader asking for `seqno` stands right now
    pub fn slot_state(&self, seqno: u64) -> SlotState {
        self.ring.read().slot_state(seqno)
    }

    pub(crate) fn poll(&self, seqno: u64) -> Poll {
        let ring = self.ring.read();
        match ring.slot_state(seqno) {
            SlotState::Ready(chunk) => Poll::Ready(chunk),
            SlotState::Evicted { oldest } => Poll::Evicted { oldest },
            SlotState::Pending => match &ring.terminal {
                None => Poll::Pending,
                Some(Terminal::EndOfStream) => Poll::Finished(None),
                Some(Terminal::Failed(msg)) => Poll::Finished(Some(msg.clone())),
            },
        }
    }

    /// A reader at the live edge
    pub fn new_stream(self: &Arc<Self>) -> Result<ChunkReader<T>> {
        self.new_stream_with_offset(TimeDelta::zero())
    }

    /// A reader positioned at the newest chunk eligible at `now + offset`.
    ///
    /// Negative offsets lag behind the live edge; positive ones read ahead
    /// into audio that is still under embargo for everyone else.
    pub fn new_stream_with_offset(self: &Arc<Self>, offset: TimeDelta) -> Result<ChunkReader<T>> {
        self.new_stream_with_clock(self.clock.clone(), offset)
    }

    pub fn new_stream_with_clock(
        self: &Arc<Self>,
        clock: Arc<dyn TimeSource>,
        offset: TimeDelta,
    ) -> Result<ChunkReader<T>> {
        let at = clock.now() + offset;
        let start = {
            let ring = self.ring.read();
            match &ring.terminal {
                Some(Terminal::EndOfStream) => {
                    return Err(AudioError::Closed("end of stream".to_string()))
                }
                Some(Terminal::Failed(msg)) => return Err(AudioError::Closed(msg.clone())),
                None => {}
            }
            ring.latest_eligible(at).unwrap_or_else(|| ring.oldest_seqno())
        };
        Ok(ChunkReader::new(self.clone(), clock, offset, start))
    }

    /// Reader starting at an explicit sequence number
    pub(crate) fn reader_at(
        self: &Arc<Self>,
        seqno: u64,
        clock: Arc<dyn TimeSource>,
        offset: TimeDelta,
    ) -> ChunkReader<T> {
        ChunkReader::new(self.clone(), clock, offset, seqno)
    }

    /// Tag everything appended from now on with `tag`
    pub fn set_associated_data(&self, tag: T) {
        let mut ring = self.ring.write();
        let from = ring.next_seqno;
        let replace = matches!(ring.timeline.back(), Some((seqno, _)) if *seqno == from);
        if replace {
            if let Some(last) = ring.timeline.back_mut() {
                last.1 = tag;
            }
        } else {
            ring.timeline.push_back((from, tag));
        }
    }

    /// The tag of whatever is audible right now
    pub fn associated_data(&self) -> Option<T> {
        self.associated_data_at(self.clock.now())
    }

    /// The most recent tag set at or before the chunk audible at `time`
    pub fn associated_data_at(&self, time: DateTime<Utc>) -> Option<T> {
        let ring = self.ring.read();
        ring.tag_for(ring.latest_eligible(time))
    }

    /// The tag in effect for chunk `seqno`
    pub fn associated_data_for(&self, seqno: u64) -> Option<T> {
        self.ring.read().tag_for(Some(seqno))
    }

    pub fn buffer_status(&self) -> BufferStatus {
        let now = self.clock.now();
        let ring = self.ring.read();

        let mut status = BufferStatus {
            capacity: ring.capacity(),
            ..Default::default()
        };
        for chunk in ring.retained_chunks() {
            status.tmin = Some(status.tmin.map_or(chunk.embargo, |t| t.min(chunk.embargo)));
            status.tmax = Some(status.tmax.map_or(chunk.embargo, |t| t.max(chunk.embargo)));
            if chunk.embargo <= now {
                status.bytes_behind += chunk.contents.len();
            } else {
                status.bytes_ahead += chunk.contents.len();
            }
            status.total_bytes += chunk.contents.len();
            status.chunks += 1;
        }
        status
    }

    /// Mark a normal end of stream. The first terminal state wins.
    pub fn close(&self) {
        let mut ring = self.ring.write();
        if ring.terminal.is_none() {
            ring.terminal = Some(Terminal::EndOfStream);
        }
    }

    /// Mark the stream failed; every reader sees `err` once it runs dry.
    pub fn close_with_error(&self, err: &AudioError) {
        let mut ring = self.ring.write();
        if ring.terminal.is_none() {
            ring.terminal = Some(Terminal::Failed(err.to_string()));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.ring.read().terminal.is_some()
    }

    /// The terminal error, if the store was closed by one
    pub fn error(&self) -> Option<AudioError> {
        match &self.ring.read().terminal {
            Some(Terminal::Failed(msg)) => Some(AudioError::Closed(msg.clone())),
            _ => None,
        }
    }
}
