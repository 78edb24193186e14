//! Episode trigger policy.
//!
//! `EpisodePolicy::step` consumes one frame's `DetectionSignal` and decides
//! whether the current episode is over. It performs no I/O and never sleeps;
//! the monitor loop owns capture, emission and cooldown.
//!
//! Evaluation order per frame:
//! 1. A frame with matches is offered to the buffer and resets the silence
//!    counter, even when the buffer rejected it for capacity.
//! 2. A frame without matches increments the silence counter.
//! 3. The episode flushes when the buffer is full, or when the silence
//!    counter reached the threshold and the buffer holds at least one frame.
//!    A flush hands out the best frame, clears the buffer and resets the
//!    counter.
//!
//! `finish` closes whatever episode is still open when the source runs dry.

use std::fmt;
use std::num::NonZeroUsize;

use crate::buffer::EpisodeBuffer;
use crate::config::EngineConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::frame::DetectionSignal;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpisodeState {
    /// Nothing buffered.
    Idle,
    /// At least one candidate frame buffered.
    Accumulating,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushReason {
    /// The silence threshold was reached.
    Silence,
    /// The buffer filled up before the episode went quiet.
    CapacityReached,
    /// The source ran out while frames were still buffered.
    EndOfStream,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushReason::Silence => write!(f, "silence"),
            FlushReason::CapacityReached => write!(f, "capacity"),
            FlushReason::EndOfStream => write!(f, "end of stream"),
        }
    }
}

/// The frame chosen to represent a closed episode.
#[derive(Debug)]
pub struct Flush<F> {
    pub frame: F,
    pub quality_score: f64,
    /// Number of frames buffered when the episode closed.
    pub episode_frames: usize,
    pub reason: FlushReason,
}

pub struct EpisodePolicy<F> {
    buffer: EpisodeBuffer<F>,
    consecutive_empty_frames: u32,
    empty_frames_threshold: u32,
}

impl<F> EpisodePolicy<F> {
    pub fn new(max_cache_size: usize, empty_frames_threshold: u32) -> MonitorResult<Self> {
        let capacity = NonZeroUsize::new(max_cache_size).ok_or_else(|| {
            MonitorError::initialization("max_cache_size must be greater than zero")
        })?;
        if empty_frames_threshold == 0 {
            return Err(MonitorError::initialization(
                "empty_frames_threshold must be greater than zero",
            ));
        }
        Ok(Self {
            buffer: EpisodeBuffer::new(capacity),
            consecutive_empty_frames: 0,
            empty_frames_threshold,
        })
    }

    pub fn from_config(config: &EngineConfig) -> MonitorResult<Self> {
        Self::new(config.max_cache_size, config.empty_frames_threshold)
    }

    /// Advance the policy by one frame.
    ///
    /// Returns `Some(Flush)` when this frame closed the episode. The only error
    /// is `EmptyBuffer`, which cannot happen unless the flush guard is broken.
    pub fn step(&mut self, signal: DetectionSignal, frame: F) -> MonitorResult<Option<Flush<F>>> {
        if signal.is_detection() {
            let accepted = self.buffer.offer(&signal, frame);
            if accepted {
                log::debug!(
                    "added frame to cache - empty frames count: {} - cached frames: {}",
                    self.consecutive_empty_frames,
                    self.buffer.size()
                );
            } else {
                log::debug!(
                    "cache full, frame dropped - cached frames: {}",
                    self.buffer.size()
                );
            }
            self.consecutive_empty_frames = 0;
        } else {
            self.consecutive_empty_frames = self.consecutive_empty_frames.saturating_add(1);
            log::debug!(
                "detected empty frame - empty frames count: {} - cached frames: {}",
                self.consecutive_empty_frames,
                self.buffer.size()
            );
        }

        let reason = if self.buffer.is_full() {
            FlushReason::CapacityReached
        } else if self.consecutive_empty_frames >= self.empty_frames_threshold
            && !self.buffer.is_empty()
        {
            FlushReason::Silence
        } else {
            return Ok(None);
        };

        self.flush(reason).map(Some)
    }

    /// Close the open episode, if any, without waiting for silence.
    pub fn finish(&mut self) -> MonitorResult<Option<Flush<F>>> {
        if self.buffer.is_empty() {
            self.consecutive_empty_frames = 0;
            return Ok(None);
        }
        self.flush(FlushReason::EndOfStream).map(Some)
    }

    fn flush(&mut self, reason: FlushReason) -> MonitorResult<Flush<F>> {
        let episode_frames = self.buffer.size();
        let best = self.buffer.take_best()?;
        self.reset();

        Ok(Flush {
            frame: best.frame,
            quality_score: best.quality_score,
            episode_frames,
            reason,
        })
    }

    /// Drop every buffered frame and zero the silence counter.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.consecutive_empty_frames = 0;
    }

    pub fn state(&self) -> EpisodeState {
        if self.buffer.is_empty() {
            EpisodeState::Idle
        } else {
            EpisodeState::Accumulating
        }
    }

    pub fn consecutive_empty_frames(&self) -> u32 {
        self.consecutive_empty_frames
    }

    pub fn buffer(&self) -> &EpisodeBuffer<F> {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(score: f64) -> DetectionSignal {
        DetectionSignal::new(1, score)
    }

    fn miss() -> DetectionSignal {
        DetectionSignal::empty()
    }

    #[test]
    fn flushes_once_after_silence_threshold() {
        let mut policy = EpisodePolicy::new(10, 5).unwrap();
        assert!(policy.step(hit(2.0), 1).unwrap().is_none());

        let mut flushes = Vec::new();
        for i in 0..5 {
            if let Some(flush) = policy.step(miss(), 100 + i).unwrap() {
                flushes.push(flush);
            }
        }
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0].frame, 1);
        assert_eq!(flushes[0].reason, FlushReason::Silence);
        assert_eq!(policy.buffer().size(), 0);
        assert_eq!(policy.consecutive_empty_frames(), 0);
    }

    #[test]
    fn flushes_when_buffer_fills() {
        let mut policy = EpisodePolicy::new(3, 50).unwrap();
        assert!(policy.step(hit(1.0), "a").unwrap().is_none());
        assert!(policy.step(hit(5.0), "b").unwrap().is_none());
        let flush = policy.step(hit(3.0), "c").unwrap().expect("flush on third");
        assert_eq!(flush.frame, "b");
        assert_eq!(flush.quality_score, 5.0);
        assert_eq!(flush.episode_frames, 3);
        assert_eq!(flush.reason, FlushReason::CapacityReached);
        assert_eq!(policy.state(), EpisodeState::Idle);
    }

    #[test]
    fn a_match_resets_the_silence_counter() {
        let mut policy = EpisodePolicy::new(10, 5).unwrap();
        policy.step(hit(1.0), 0).unwrap();
        for _ in 0..4 {
            assert!(policy.step(miss(), 0).unwrap().is_none());
        }
        assert_eq!(policy.consecutive_empty_frames(), 4);

        assert!(policy.step(hit(2.0), 0).unwrap().is_none());
        assert_eq!(policy.consecutive_empty_frames(), 0);

        for _ in 0..4 {
            assert!(policy.step(miss(), 0).unwrap().is_none());
        }
        assert_eq!(policy.buffer().size(), 2);
    }

    #[test]
    fn silence_without_detections_never_flushes() {
        let mut policy = EpisodePolicy::<u32>::new(3, 2).unwrap();
        for i in 0..1_000 {
            assert!(policy.step(miss(), i).unwrap().is_none());
        }
        assert_eq!(policy.state(), EpisodeState::Idle);
        assert_eq!(policy.consecutive_empty_frames(), 1_000);
    }

    #[test]
    fn threshold_two_capacity_two_scenario() {
        let mut policy = EpisodePolicy::new(2, 2).unwrap();

        assert!(policy.step(hit(5.0), "f1").unwrap().is_none());
        assert_eq!(policy.buffer().size(), 1);

        assert!(policy.step(miss(), "f2").unwrap().is_none());
        assert_eq!(policy.consecutive_empty_frames(), 1);

        let flush = policy.step(miss(), "f3").unwrap().expect("flush on frame 3");
        assert_eq!(flush.frame, "f1");
        assert_eq!(flush.quality_score, 5.0);
        assert_eq!(policy.buffer().size(), 0);
        assert_eq!(policy.consecutive_empty_frames(), 0);

        assert!(policy.step(hit(8.0), "f4").unwrap().is_none());
        assert_eq!(policy.buffer().scores().collect::<Vec<_>>(), vec![8.0]);
    }

    #[test]
    fn finish_hands_out_the_open_episode() {
        let mut policy = EpisodePolicy::new(50, 50).unwrap();
        policy.step(hit(1.0), "a").unwrap();
        policy.step(hit(4.0), "b").unwrap();
        policy.step(miss(), "c").unwrap();

        let flush = policy.finish().unwrap().expect("open episode");
        assert_eq!(flush.frame, "b");
        assert_eq!(flush.episode_frames, 2);
        assert_eq!(flush.reason, FlushReason::EndOfStream);
        assert_eq!(policy.state(), EpisodeState::Idle);
        assert_eq!(policy.consecutive_empty_frames(), 0);

        assert!(policy.finish().unwrap().is_none());
    }

    #[test]
    fn state_tracks_buffer_occupancy() {
        let mut policy = EpisodePolicy::new(4, 3).unwrap();
        assert_eq!(policy.state(), EpisodeState::Idle);
        policy.step(hit(1.0), ()).unwrap();
        assert_eq!(policy.state(), EpisodeState::Accumulating);
        policy.reset();
        assert_eq!(policy.state(), EpisodeState::Idle);
    }

    #[test]
    fn zero_sized_config_is_rejected() {
        assert!(EpisodePolicy::<()>::new(0, 5).is_err());
        assert!(EpisodePolicy::<()>::new(5, 0).is_err());
        let cfg = EngineConfig::default();
        let policy = EpisodePolicy::<()>::from_config(&cfg).unwrap();
        assert_eq!(policy.buffer().capacity(), cfg.max_cache_size);
    }
}
