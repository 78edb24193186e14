//! Access Monitor
//!
//! Watches a camera, groups consecutive detections into episodes and emits the
//! sharpest frame of each episode to blob storage.
//!
//! # Pipeline
//!
//! 1. A [`FrameSource`] yields RGB frames (synthetic, file replay, V4L2, HTTP).
//! 2. [`Frame::from_rgb`] converts to grayscale and equalizes the histogram.
//! 3. A [`DetectorBackend`] finds target regions; regions smaller than
//!    `min_match_size` on either side are ignored.
//! 4. [`laplacian_variance`] scores the sharpness of every analyzed frame; the
//!    policy only looks at the score of frames with matches.
//! 5. [`EpisodePolicy`] buffers candidates in an [`EpisodeBuffer`] and closes
//!    the episode on silence, when the buffer fills, or when a finite source
//!    runs out.
//! 6. An [`Emitter`] stages the winning frame as JPEG, uploads it and removes
//!    the staged copy.
//!
//! # Module Structure
//!
//! - `buffer`, `policy`, `quality`, `frame`: the episode engine (no I/O)
//! - `ingest`: frame sources
//! - `detect`: detector backends
//! - `sink`: artifact emitter and blob sinks
//! - `monitor`: the capture loop tying everything together
//! - `config`, `error`: configuration and error taxonomy

pub mod buffer;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod policy;
pub mod quality;
pub mod sink;

pub use buffer::{CachedFrame, EpisodeBuffer};
pub use config::{EngineConfig, MonitorConfig};
pub use detect::{build_backend, DetectionResult, DetectorBackend, MatchRegion};
pub use error::{MonitorError, MonitorResult};
pub use frame::{DetectionSignal, Frame};
pub use ingest::{open_source, FrameSource, SourceStats};
pub use monitor::{FlushReport, FrameOutcome, Monitor, MonitorStats};
pub use policy::{EpisodePolicy, EpisodeState, Flush, FlushReason};
pub use quality::laplacian_variance;
pub use sink::{build_emitter, BlobSink, ConnectionString, Credential, EmitReceipt, Emitter};
