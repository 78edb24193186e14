//! Error taxonomy for the episode engine.
//!
//! Per-frame failures never escape the monitor loop. Only initialization
//! failures (before the loop starts) and a violated buffer contract are fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// A single frame failed to capture, preprocess, detect or score.
    /// The frame is skipped; episode counters are left untouched.
    #[error("transient frame error: {0}")]
    TransientFrame(String),

    /// `best()` was called on an empty episode buffer. The trigger policy
    /// never does this, so seeing it means the evaluation order was broken.
    #[error("episode buffer is empty")]
    EmptyBuffer,

    /// The flushed frame could not be persisted or uploaded.
    #[error("sink error for {blob}: {reason}")]
    Sink { blob: String, reason: String },

    /// A collaborator (source, detector, sink) could not be constructed.
    #[error("initialization error: {0}")]
    Initialization(String),
}

impl MonitorError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::TransientFrame(err.to_string())
    }

    pub fn initialization(err: impl std::fmt::Display) -> Self {
        Self::Initialization(err.to_string())
    }

    /// Errors the monitor loop recovers from locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransientFrame(_) | Self::Sink { .. })
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_frame_and_sink_errors_are_recoverable() {
        assert!(MonitorError::transient("bad frame").is_recoverable());
        assert!(MonitorError::Sink {
            blob: "cam/a.jpg".to_string(),
            reason: "timeout".to_string()
        }
        .is_recoverable());
        assert!(!MonitorError::EmptyBuffer.is_recoverable());
        assert!(!MonitorError::initialization("no device").is_recoverable());
    }

    #[test]
    fn sink_error_names_the_blob() {
        let err = MonitorError::Sink {
            blob: "camera_01/x.jpg".to_string(),
            reason: "403".to_string(),
        };
        assert_eq!(err.to_string(), "sink error for camera_01/x.jpg: 403");
    }
}
