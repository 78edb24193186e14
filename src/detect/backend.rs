use anyhow::Result;

use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Backends receive the preprocessed frame (grayscale, equalized) alongside
/// the color capture, and report the regions that match the target class.
/// Backends are configured with a minimum match size at construction and
/// must not report smaller regions.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// An `Err` marks the frame as unusable; the monitor skips it without
    /// touching episode state.
    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult>;

    /// Optional warm-up hook, run once before the monitor loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
