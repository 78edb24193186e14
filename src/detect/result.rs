/// Regions found by a detector on one frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    pub matches: Vec<MatchRegion>,
}

/// Axis-aligned match region in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

impl MatchRegion {
    /// True when both sides reach `min_size` pixels.
    pub fn fits(&self, min_size: u32) -> bool {
        self.width >= min_size && self.height >= min_size
    }
}

impl DetectionResult {
    pub fn new(matches: Vec<MatchRegion>) -> Self {
        Self { matches }
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Count of regions whose sides are both at least `min_size` pixels.
    pub fn count_at_least(&self, min_size: u32) -> usize {
        self.matches.iter().filter(|m| m.fits(min_size)).count()
    }

    pub fn retain_min_size(&mut self, min_size: u32) {
        self.matches.retain(|m| m.fits(min_size));
    }
}
