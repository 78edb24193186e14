use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{naming, BlobSink, EmitReceipt, Emitter};
use crate::error::{MonitorError, MonitorResult};

/// Stages the frame as a JPEG, uploads it and removes the staged copy.
pub struct ArtifactEmitter {
    staging_dir: PathBuf,
    camera_id: String,
    jpeg_quality: u8,
    sink: Box<dyn BlobSink>,
}

impl ArtifactEmitter {
    pub fn new<P: AsRef<Path>>(
        staging_dir: P,
        camera_id: &str,
        jpeg_quality: u8,
        sink: Box<dyn BlobSink>,
    ) -> Result<Self> {
        let staging_dir = staging_dir.as_ref().to_path_buf();
        fs::create_dir_all(&staging_dir)
            .with_context(|| format!("create staging dir {}", staging_dir.display()))?;
        Ok(Self {
            staging_dir,
            camera_id: camera_id.to_string(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
            sink,
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn emit_named(&mut self, frame: &RgbImage, artifact_name: String) -> MonitorResult<EmitReceipt> {
        let blob_name = format!("{}/{}", self.camera_id, artifact_name);
        let blob_path = format!("{}/{}", self.sink.container(), blob_name);

        let artifact = LocalArtifact::write(
            self.staging_dir.join(&artifact_name),
            frame,
            self.jpeg_quality,
        )
        .map_err(|err| sink_error(&blob_path, err))?;
        let bytes = artifact
            .read()
            .map_err(|err| sink_error(&blob_path, err))?;
        self.sink
            .upload(&blob_name, &bytes)
            .map_err(|err| sink_error(&blob_path, err))?;

        log::info!(
            "uploaded {} via {} ({} bytes)",
            blob_path,
            self.sink.name(),
            bytes.len()
        );
        Ok(EmitReceipt {
            artifact_name,
            blob_path,
            bytes: bytes.len(),
        })
    }
}

impl Emitter for ArtifactEmitter {
    fn emit(&mut self, frame: &RgbImage) -> MonitorResult<EmitReceipt> {
        self.emit_named(frame, naming::artifact_name())
    }
}

fn sink_error(blob: &str, err: anyhow::Error) -> MonitorError {
    MonitorError::Sink {
        blob: blob.to_string(),
        reason: format!("{:#}", err),
    }
}

/// A staged JPEG that is removed when dropped.
struct LocalArtifact {
    path: PathBuf,
}

impl LocalArtifact {
    fn write(path: PathBuf, frame: &RgbImage, quality: u8) -> Result<Self> {
        let file = File::create(&path)
            .with_context(|| format!("create artifact {}", path.display()))?;
        let artifact = Self { path };
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, quality)
            .encode_image(frame)
            .context("encode jpeg")?;
        writer.flush().context("flush artifact")?;
        Ok(artifact)
    }

    fn read(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("read artifact {}", self.path.display()))
    }
}

impl Drop for LocalArtifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed local artifact {}", self.path.display()),
            Err(err) => log::warn!(
                "failed to remove local artifact {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}
