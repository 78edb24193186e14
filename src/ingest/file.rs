//! Local image replay.
//!
//! `FileSource` replays a single image or every JPEG/PNG in a directory, in
//! file-name order. Replay ends with `Ok(None)` unless looping is enabled.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use super::{FramePacer, FrameSource, SourceStats};
use crate::config::SourceSettings;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct FileSource {
    path: PathBuf,
    loop_files: bool,
    pacer: FramePacer,
    files: Vec<PathBuf>,
    position: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P, settings: &SourceSettings) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(anyhow!("file source path cannot be empty"));
        }
        Ok(Self {
            path: path.to_path_buf(),
            loop_files: settings.loop_files,
            pacer: FramePacer::new(settings.target_fps),
            files: Vec::new(),
            position: 0,
            frame_count: 0,
            last_error: None,
        })
    }

    /// Files queued for replay, in order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn scan(&self) -> Result<Vec<PathBuf>> {
        if self.path.is_file() {
            return Ok(vec![self.path.clone()]);
        }
        let entries = std::fs::read_dir(&self.path)
            .with_context(|| format!("read image directory {}", self.path.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        let files = self.scan()?;
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", self.path.display()));
        }
        log::info!(
            "FileSource: connected to {} ({} images{})",
            self.path.display(),
            files.len(),
            if self.loop_files { ", looping" } else { "" }
        );
        self.files = files;
        self.position = 0;
        self.last_error = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.files.is_empty() {
            return Err(anyhow!("file source not connected"));
        }
        if self.position >= self.files.len() {
            if !self.loop_files {
                return Ok(None);
            }
            self.position = 0;
        }

        let path = &self.files[self.position];
        self.position += 1;
        self.pacer.wait();

        let image = image::open(path)
            .with_context(|| format!("decode {}", path.display()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                err
            })?;
        self.last_error = None;
        self.frame_count += 1;
        Ok(Some(image.into_rgb8()))
    }

    fn is_healthy(&self) -> bool {
        !self.files.is_empty() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.display().to_string(),
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
