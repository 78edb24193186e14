//! Artifact emission and blob sinks.
//!
//! A flushed frame leaves the engine through an [`Emitter`]. The production
//! emitter, [`ArtifactEmitter`], encodes the frame as JPEG into a staging
//! directory, uploads the bytes through a [`BlobSink`] and removes the staged
//! file whether or not the upload succeeded.
//!
//! Remote layout: `<container>/<camera_id>/<uuid>_<YYYY-MM-DD-HH-MM-SS>.jpg`.

mod azure;
mod directory;
mod emitter;
pub mod naming;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::config::{MonitorConfig, SinkKind, SinkSettings};
use crate::error::MonitorResult;

pub use azure::{ConnectionString, Credential};
#[cfg(feature = "sink-http")]
pub use azure::HttpBlobSink;
pub use directory::DirectorySink;
pub use emitter::ArtifactEmitter;

/// Persists one flushed frame. Called at most once per flush.
pub trait Emitter {
    fn emit(&mut self, frame: &RgbImage) -> MonitorResult<EmitReceipt>;
}

/// Where an emitted frame ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmitReceipt {
    pub artifact_name: String,
    /// `<container>/<camera_id>/<artifact_name>`
    pub blob_path: String,
    pub bytes: usize,
}

/// Remote (or mirrored) object storage addressed by container-relative names.
pub trait BlobSink {
    fn name(&self) -> &'static str;

    fn container(&self) -> &str;

    /// Store `bytes` under `blob_name` inside the container, replacing any
    /// existing object.
    fn upload(&mut self, blob_name: &str, bytes: &[u8]) -> Result<()>;
}

/// Build the configured blob sink.
pub fn build_sink(settings: &SinkSettings) -> Result<Box<dyn BlobSink>> {
    match settings.kind {
        SinkKind::Directory => {
            let sink = DirectorySink::new(&settings.directory, &settings.container)
                .with_context(|| format!("open sink directory {}", settings.directory.display()))?;
            Ok(Box::new(sink))
        }
        SinkKind::Http => build_http_sink(settings),
    }
}

#[cfg(feature = "sink-http")]
fn build_http_sink(settings: &SinkSettings) -> Result<Box<dyn BlobSink>> {
    let raw = settings
        .connection_string
        .as_deref()
        .ok_or_else(|| anyhow!("http sink requires a connection string"))?;
    let connection = ConnectionString::parse(raw)?;
    Ok(Box::new(HttpBlobSink::new(connection, &settings.container)))
}

#[cfg(not(feature = "sink-http"))]
fn build_http_sink(_settings: &SinkSettings) -> Result<Box<dyn BlobSink>> {
    Err(anyhow!("http sink requires the sink-http feature"))
}

/// Build the artifact emitter for a validated config.
pub fn build_emitter(config: &MonitorConfig) -> Result<ArtifactEmitter> {
    let sink = build_sink(&config.sink)?;
    log::info!(
        "sink: {} (container {})",
        sink.name(),
        sink.container()
    );
    ArtifactEmitter::new(
        &config.emit.staging_dir,
        &config.camera_id,
        config.emit.jpeg_quality,
        sink,
    )
}
