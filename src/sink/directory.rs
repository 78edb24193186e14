use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use super::BlobSink;

/// Mirrors the remote blob layout under a local directory:
/// `<root>/<container>/<blob_name>`.
pub struct DirectorySink {
    container_dir: PathBuf,
    container: String,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(root: P, container: &str) -> Result<Self> {
        crate::config::validate_container(container)?;
        let container_dir = root.as_ref().join(container);
        fs::create_dir_all(&container_dir)?;
        Ok(Self {
            container_dir,
            container: container.to_string(),
        })
    }

    /// Local path a blob name maps to.
    pub fn blob_path(&self, blob_name: &str) -> Result<PathBuf> {
        let relative = Path::new(blob_name);
        let safe = !blob_name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(anyhow!("invalid blob name '{}'", blob_name));
        }
        Ok(self.container_dir.join(relative))
    }
}

impl BlobSink for DirectorySink {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn container(&self) -> &str {
        &self.container
    }

    fn upload(&mut self, blob_name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(blob_name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        write_atomic(&path, bytes).with_context(|| format!("write {}", path.display()))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_mirrors_blob_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = DirectorySink::new(dir.path(), "accessmonitorblob")?;
        sink.upload("camera_01/a.jpg", b"jpeg")?;

        let stored = dir.path().join("accessmonitorblob/camera_01/a.jpg");
        assert_eq!(fs::read(stored)?, b"jpeg");
        assert!(!dir.path().join("accessmonitorblob/camera_01/a.tmp").exists());
        Ok(())
    }

    #[test]
    fn upload_replaces_existing_blob() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = DirectorySink::new(dir.path(), "accessmonitorblob")?;
        sink.upload("cam/a.jpg", b"old")?;
        sink.upload("cam/a.jpg", b"new")?;
        assert_eq!(fs::read(sink.blob_path("cam/a.jpg")?)?, b"new");
        Ok(())
    }

    #[test]
    fn escaping_blob_names_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = DirectorySink::new(dir.path(), "accessmonitorblob")?;
        assert!(sink.upload("../outside.jpg", b"x").is_err());
        assert!(sink.upload("/etc/passwd", b"x").is_err());
        assert!(sink.upload("", b"x").is_err());
        Ok(())
    }

    #[test]
    fn invalid_container_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(DirectorySink::new(dir.path(), "Bad_Container").is_err());
        Ok(())
    }
}
