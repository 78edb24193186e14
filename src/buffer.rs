//! Bounded, quality-ranked cache of candidate frames for one episode.
//!
//! Entries are ordered by `(quality_score, insertion sequence)` so that two
//! frames with numerically identical scores are both retained. When several
//! entries share the maximum score, `best()` resolves to the one inserted
//! first.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use crate::error::{MonitorError, MonitorResult};
use crate::frame::DetectionSignal;

/// Ordering key: score ascending, then older entries above newer ones so the
/// last key in the map is the best frame.
#[derive(Clone, Copy, Debug)]
struct ScoreKey {
    score: f64,
    sequence: u64,
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoreKey {}

/// A frame held in the buffer together with its ranking data.
#[derive(Clone, Debug)]
pub struct CachedFrame<F> {
    pub quality_score: f64,
    pub sequence: u64,
    pub frame: F,
}

pub struct EpisodeBuffer<F> {
    entries: BTreeMap<ScoreKey, F>,
    capacity: NonZeroUsize,
    next_sequence: u64,
}

impl<F> EpisodeBuffer<F> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
            next_sequence: 0,
        }
    }

    /// Admit `frame` if it carries at least one match and there is room.
    pub fn offer(&mut self, signal: &DetectionSignal, frame: F) -> bool {
        if !signal.is_detection() || self.is_full() {
            return false;
        }
        let key = ScoreKey {
            score: signal.quality_score,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.insert(key, frame);
        true
    }

    /// Highest-scoring buffered frame.
    pub fn best(&self) -> MonitorResult<&F> {
        self.entries
            .last_key_value()
            .map(|(_, frame)| frame)
            .ok_or(MonitorError::EmptyBuffer)
    }

    pub fn best_score(&self) -> Option<f64> {
        self.entries.last_key_value().map(|(key, _)| key.score)
    }

    /// Remove and return the best entry, leaving the rest in place.
    pub fn take_best(&mut self) -> MonitorResult<CachedFrame<F>> {
        let (key, frame) = self.entries.pop_last().ok_or(MonitorError::EmptyBuffer)?;
        Ok(CachedFrame {
            quality_score: key.score,
            sequence: key.sequence,
            frame,
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity.get()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Buffered scores, best first.
    pub fn scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.keys().rev().map(|key| key.score)
    }
}
