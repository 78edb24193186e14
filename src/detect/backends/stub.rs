use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionResult, MatchRegion};
use crate::frame::Frame;

/// Stub backend for testing and dry runs.
///
/// Ignores pixel content and cycles through a fixed pattern of match counts,
/// one entry per frame. Reported regions are exactly the minimum match size.
pub struct StubBackend {
    pattern: Vec<usize>,
    position: usize,
    min_match_size: u32,
}

impl StubBackend {
    pub fn new(pattern: Vec<usize>, min_match_size: u32) -> Result<Self> {
        if pattern.is_empty() {
            return Err(anyhow!("stub detector pattern cannot be empty"));
        }
        Ok(Self {
            pattern,
            position: 0,
            min_match_size,
        })
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<DetectionResult> {
        let count = self.pattern[self.position];
        self.position = (self.position + 1) % self.pattern.len();

        let matches = (0..count)
            .map(|_| MatchRegion {
                x: 0,
                y: 0,
                width: self.min_match_size,
                height: self.min_match_size,
                confidence: 1.0,
            })
            .collect();
        Ok(DetectionResult::new(matches))
    }
}
