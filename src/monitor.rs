//! The capture loop.
//!
//! `Monitor` owns one frame source, one detector, one emitter and the episode
//! policy for that stream. Each iteration pulls a frame, turns it into a
//! `DetectionSignal`, steps the policy and emits the frame of any episode that
//! closed. Per-frame failures are logged and skipped; the loop only returns an
//! error for initialization failures or a broken buffer contract.

use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::detect::DetectorBackend;
use crate::error::{MonitorError, MonitorResult};
use crate::frame::{DetectionSignal, Frame};
use crate::ingest::FrameSource;
use crate::policy::{EpisodePolicy, Flush, FlushReason};
use crate::quality::laplacian_variance;
use crate::sink::{EmitReceipt, Emitter};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound on how long a sleep goes without checking the shutdown flag.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Counters reported by `Monitor::run`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Frames handed to analysis.
    pub frames_read: u64,
    /// Frames dropped because preprocessing, detection or scoring failed.
    pub frames_skipped: u64,
    /// Source reads that returned an error.
    pub read_failures: u64,
    /// Frames with at least one qualifying match.
    pub detections: u64,
    pub flushes: u64,
    pub sink_failures: u64,
}

/// Summary of one closed episode.
#[derive(Clone, Debug)]
pub struct FlushReport {
    pub reason: FlushReason,
    pub quality_score: f64,
    pub episode_frames: usize,
    /// `None` when the emitter failed.
    pub receipt: Option<EmitReceipt>,
}

/// What happened to a single frame.
#[derive(Clone, Debug)]
pub enum FrameOutcome {
    /// Analysis failed; the policy did not see the frame.
    Skipped,
    /// The frame had matches and the episode is still open.
    Buffered,
    /// No qualifying matches.
    Empty,
    /// This frame closed an episode.
    Flushed(FlushReport),
}

pub struct Monitor {
    config: EngineConfig,
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    emitter: Box<dyn Emitter>,
    policy: EpisodePolicy<RgbImage>,
    shutdown: Arc<AtomicBool>,
    stats: MonitorStats,
    retry_delay: Duration,
    health_interval: Duration,
}

impl Monitor {
    pub fn new(
        config: EngineConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        emitter: Box<dyn Emitter>,
    ) -> MonitorResult<Self> {
        let policy = EpisodePolicy::from_config(&config)?;
        Ok(Self {
            config,
            source,
            detector,
            emitter,
            policy,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: MonitorStats::default(),
            retry_delay: DEFAULT_RETRY_DELAY,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        })
    }

    /// Share an externally owned cancellation flag (e.g. set by a signal handler).
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Delay after a failed source read.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_health_interval(mut self, health_interval: Duration) -> Self {
        self.health_interval = health_interval;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    pub fn policy(&self) -> &EpisodePolicy<RgbImage> {
        &self.policy
    }

    /// Run until the source is exhausted or shutdown is requested.
    ///
    /// An episode still open when the source runs out is flushed before
    /// returning; shutdown leaves it unflushed.
    pub fn run(&mut self) -> MonitorResult<MonitorStats> {
        self.source
            .connect()
            .map_err(|err| MonitorError::initialization(format!("{:#}", err)))?;
        log::info!(
            "monitor running: source={} detector={} max_cache_size={} empty_frames_threshold={} cooldown={:?}",
            self.source.stats().source,
            self.detector.name(),
            self.config.max_cache_size,
            self.config.empty_frames_threshold,
            self.config.cooldown
        );

        let mut last_health_log = Instant::now();
        while !self.shutdown_requested() {
            match self.source.next_frame() {
                Ok(Some(image)) => {
                    if let FrameOutcome::Flushed(_) = self.process_frame(image)? {
                        self.pause(self.config.cooldown);
                    }
                }
                Ok(None) => {
                    log::info!("source exhausted");
                    if let Some(flush) = self.policy.finish()? {
                        self.emit_flush(flush);
                    }
                    break;
                }
                Err(err) => {
                    self.stats.read_failures += 1;
                    log::warn!("frame read failed: {:#}", err);
                    self.pause(self.retry_delay);
                }
            }

            if last_health_log.elapsed() >= self.health_interval {
                self.log_health();
                last_health_log = Instant::now();
            }
        }

        if self.shutdown_requested() {
            log::info!("shutdown requested");
        }
        log::info!("monitor stopped: {:?}", self.stats);
        Ok(self.stats)
    }

    /// Analyze one frame, advance the episode and emit on flush.
    ///
    /// Only `MonitorError::EmptyBuffer` escapes; analysis and sink failures
    /// are absorbed and counted.
    pub fn process_frame(&mut self, image: RgbImage) -> MonitorResult<FrameOutcome> {
        self.stats.frames_read += 1;
        let (signal, image) = match self.analyze(image) {
            Ok(analyzed) => analyzed,
            Err(err) => {
                self.stats.frames_skipped += 1;
                log::warn!("skipping frame: {}", err);
                return Ok(FrameOutcome::Skipped);
            }
        };
        if signal.is_detection() {
            self.stats.detections += 1;
        }

        let Some(flush) = self.policy.step(signal, image)? else {
            return Ok(if signal.is_detection() {
                FrameOutcome::Buffered
            } else {
                FrameOutcome::Empty
            });
        };
        Ok(FrameOutcome::Flushed(self.emit_flush(flush)))
    }

    fn emit_flush(&mut self, flush: Flush<RgbImage>) -> FlushReport {
        self.stats.flushes += 1;
        log::info!(
            "episode closed ({}): best score {:.2} of {} frames",
            flush.reason,
            flush.quality_score,
            flush.episode_frames
        );
        let receipt = match self.emitter.emit(&flush.frame) {
            Ok(receipt) => Some(receipt),
            Err(err) => {
                self.stats.sink_failures += 1;
                log::error!("{}", err);
                None
            }
        };

        FlushReport {
            reason: flush.reason,
            quality_score: flush.quality_score,
            episode_frames: flush.episode_frames,
            receipt,
        }
    }

    fn analyze(&mut self, image: RgbImage) -> MonitorResult<(DetectionSignal, RgbImage)> {
        let frame = Frame::from_rgb(image)?;
        let detection = self
            .detector
            .detect(&frame)
            .map_err(|err| MonitorError::transient(format!("detection failed: {:#}", err)))?;
        let match_count = detection.count_at_least(self.config.min_match_size);
        let quality_score = laplacian_variance(frame.gray())?;
        Ok((
            DetectionSignal::new(match_count, quality_score),
            frame.into_image(),
        ))
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if shutdown is requested.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn log_health(&self) {
        let source = self.source.stats();
        log::info!(
            "source health={} captured={} source={} read={} skipped={} detections={} flushes={} buffered={}",
            self.source.is_healthy(),
            source.frames_captured,
            source.source,
            self.stats.frames_read,
            self.stats.frames_skipped,
            self.stats.detections,
            self.stats.flushes,
            self.policy.buffer().size()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::ingest::SourceStats;
    use anyhow::Result;

    struct NullSource;

    impl FrameSource for NullSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            Ok(None)
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                source: "null".to_string(),
            }
        }
    }

    struct CountingEmitter(usize);

    impl Emitter for CountingEmitter {
        fn emit(&mut self, _frame: &RgbImage) -> MonitorResult<EmitReceipt> {
            self.0 += 1;
            Ok(EmitReceipt {
                artifact_name: format!("{}.jpg", self.0),
                blob_path: format!("c/cam/{}.jpg", self.0),
                bytes: 0,
            })
        }
    }

    fn monitor(pattern: Vec<usize>, cache: usize, threshold: u32) -> Monitor {
        let config = EngineConfig {
            max_cache_size: cache,
            empty_frames_threshold: threshold,
            cooldown: Duration::ZERO,
            min_match_size: 4,
        };
        Monitor::new(
            config,
            Box::new(NullSource),
            Box::new(StubBackend::new(pattern, 4).unwrap()),
            Box::new(CountingEmitter(0)),
        )
        .unwrap()
    }

    fn textured() -> RgbImage {
        RgbImage::from_fn(16, 16, |x, y| {
            let v = if (x + y) % 2 == 0 { 255 } else { 0 };
            image::Rgb([v, v, v])
        })
    }

    #[test]
    fn capacity_flush_reports_receipt() {
        let mut monitor = monitor(vec![1], 2, 10);
        assert!(matches!(
            monitor.process_frame(textured()).unwrap(),
            FrameOutcome::Buffered
        ));
        match monitor.process_frame(textured()).unwrap() {
            FrameOutcome::Flushed(report) => {
                assert_eq!(report.reason, FlushReason::CapacityReached);
                assert_eq!(report.episode_frames, 2);
                assert_eq!(report.receipt.unwrap().artifact_name, "1.jpg");
            }
            other => panic!("expected flush, got {other:?}"),
        }
        assert_eq!(monitor.stats().flushes, 1);
        assert_eq!(monitor.stats().detections, 2);
    }

    #[test]
    fn zero_sized_frame_is_skipped() {
        let mut monitor = monitor(vec![1], 5, 5);
        let outcome = monitor.process_frame(RgbImage::new(0, 0)).unwrap();
        assert!(matches!(outcome, FrameOutcome::Skipped));
        assert_eq!(monitor.stats().frames_skipped, 1);
        assert_eq!(monitor.policy().buffer().size(), 0);
    }

    #[test]
    fn exhausted_source_ends_run() {
        let mut monitor = monitor(vec![0], 5, 5);
        let stats = monitor.run().unwrap();
        assert_eq!(stats, MonitorStats::default());
    }

    #[test]
    fn pause_returns_early_on_shutdown() {
        let monitor = monitor(vec![0], 5, 5);
        monitor.shutdown_handle().store(true, Ordering::SeqCst);
        let started = Instant::now();
        monitor.pause(Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
