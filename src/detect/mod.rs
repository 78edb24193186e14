//! Detection primitives.
//!
//! A backend turns one preprocessed frame into a set of match regions. The
//! episode engine only consumes the number of regions that pass the
//! configured minimum match size.

mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{DetectionResult, MatchRegion};

use crate::config::DetectorSettings;

/// Build and warm up the backend named in `settings`.
pub fn build_backend(
    settings: &DetectorSettings,
    min_match_size: u32,
) -> Result<Box<dyn DetectorBackend>> {
    let mut backend: Box<dyn DetectorBackend> = match settings.backend.as_str() {
        "cpu" => Box::new(CpuBackend::new(min_match_size)),
        "stub" => Box::new(StubBackend::new(settings.stub_pattern.clone(), min_match_size)?),
        "tract" => build_tract(settings, min_match_size)?,
        other => {
            return Err(anyhow!(
                "unknown detector backend '{}'; expected cpu, stub or tract",
                other
            ))
        }
    };
    backend.warm_up()?;
    log::info!(
        "detector backend '{}' ready (min match size {}px)",
        backend.name(),
        min_match_size
    );
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings, min_match_size: u32) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires detector.model_path"))?;
    let backend = TractBackend::new(model_path, min_match_size)?
        .with_threshold(settings.confidence_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings, _min_match_size: u32) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("tract backend requires the backend-tract feature"))
}
