use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::sink::ConnectionString;

pub const DEFAULT_MAX_CACHE_SIZE: usize = 50;
pub const DEFAULT_EMPTY_FRAMES_THRESHOLD: u32 = 50;
pub const DEFAULT_COOLDOWN_SECS: u64 = 5;
pub const DEFAULT_MIN_MATCH_SIZE: u32 = 70;

const DEFAULT_CAMERA_ID: &str = "camera_01";
const DEFAULT_SOURCE_URL: &str = "stub://camera_01";
const DEFAULT_SOURCE_WIDTH: u32 = 1280;
const DEFAULT_SOURCE_HEIGHT: u32 = 720;
const DEFAULT_SOURCE_FPS: u32 = 10;
/// Bright-region detector; a test rig, not a face detector.
const DEFAULT_DETECTOR: &str = "cpu";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;
const DEFAULT_STAGING_DIR: &str = "resources/images";
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_SINK_KIND: &str = "directory";
const DEFAULT_SINK_DIR: &str = "resources/uploads";
const DEFAULT_CONTAINER: &str = "accessmonitorblob";

// ----------------------------------------------------------------------------
// On-disk representation (every field optional)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    camera_id: Option<String>,
    engine: Option<EngineConfigFile>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    emit: Option<EmitConfigFile>,
    sink: Option<SinkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    max_cache_size: Option<usize>,
    empty_frames_threshold: Option<u32>,
    cooldown_secs: Option<u64>,
    min_match_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    #[serde(rename = "loop")]
    loop_files: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    stub_pattern: Option<Vec<usize>>,
}

#[derive(Debug, Deserialize, Default)]
struct EmitConfigFile {
    staging_dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    kind: Option<String>,
    directory: Option<PathBuf>,
    container: Option<String>,
    connection_string: Option<String>,
}

// ----------------------------------------------------------------------------
// Resolved configuration
// ----------------------------------------------------------------------------

/// Tunables of the episode engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Buffer capacity; reaching it forces a flush.
    pub max_cache_size: usize,
    /// Consecutive frames without a match that close an episode.
    pub empty_frames_threshold: u32,
    /// Pause after each flush before pulling the next frame.
    pub cooldown: Duration,
    /// Minimum width and height, in pixels, of a region that counts as a match.
    pub min_match_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            empty_frames_threshold: DEFAULT_EMPTY_FRAMES_THRESHOLD,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            min_match_size: DEFAULT_MIN_MATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// `stub://name`, a local file or directory path, `/dev/videoN`, or `http(s)://`.
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Restart file replay from the first image once exhausted.
    pub loop_files: bool,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `cpu`, `stub` or `tract`.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    /// Match counts the stub backend cycles through.
    pub stub_pattern: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct EmitSettings {
    pub staging_dir: PathBuf,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    Directory,
    Http,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub directory: PathBuf,
    pub container: String,
    pub connection_string: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub camera_id: String,
    pub engine: EngineConfig,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub emit: EmitSettings,
    pub sink: SinkSettings,
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ACCESS_MONITOR_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load an explicit config file (or defaults), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::load_unvalidated(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like `load_from`, but leaves `validate` to the caller so further
    /// overrides (command-line flags) can be applied first.
    pub fn load_unvalidated(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let camera_id = file
            .camera_id
            .unwrap_or_else(|| DEFAULT_CAMERA_ID.to_string());

        let engine_file = file.engine.unwrap_or_default();
        let engine = EngineConfig {
            max_cache_size: engine_file
                .max_cache_size
                .unwrap_or(DEFAULT_MAX_CACHE_SIZE),
            empty_frames_threshold: engine_file
                .empty_frames_threshold
                .unwrap_or(DEFAULT_EMPTY_FRAMES_THRESHOLD),
            cooldown: Duration::from_secs(
                engine_file.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            min_match_size: engine_file
                .min_match_size
                .unwrap_or(DEFAULT_MIN_MATCH_SIZE),
        };

        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            loop_files: source_file.loop_files.unwrap_or(false),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            model_path: detector_file.model_path,
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            stub_pattern: detector_file.stub_pattern.unwrap_or_else(|| vec![1]),
        };

        let emit_file = file.emit.unwrap_or_default();
        let emit = EmitSettings {
            staging_dir: emit_file
                .staging_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_DIR)),
            jpeg_quality: emit_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let sink_file = file.sink.unwrap_or_default();
        let sink = SinkSettings {
            kind: parse_sink_kind(sink_file.kind.as_deref().unwrap_or(DEFAULT_SINK_KIND))?,
            directory: sink_file
                .directory
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SINK_DIR)),
            container: sink_file
                .container
                .unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
            connection_string: sink_file.connection_string,
        };

        Ok(Self {
            camera_id,
            engine,
            source,
            detector,
            emit,
            sink,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(camera_id) = non_empty_env("ACCESS_MONITOR_CAMERA_ID") {
            self.camera_id = camera_id;
        }
        if let Some(url) = non_empty_env("ACCESS_MONITOR_SOURCE") {
            self.source.url = url;
        }
        if let Some(width) = parse_env::<u32>("ACCESS_MONITOR_WIDTH")? {
            self.source.width = width;
        }
        if let Some(height) = parse_env::<u32>("ACCESS_MONITOR_HEIGHT")? {
            self.source.height = height;
        }
        if let Some(size) = parse_env::<usize>("ACCESS_MONITOR_MAX_CACHE_SIZE")? {
            self.engine.max_cache_size = size;
        }
        if let Some(threshold) = parse_env::<u32>("ACCESS_MONITOR_EMPTY_FRAMES_THRESHOLD")? {
            self.engine.empty_frames_threshold = threshold;
        }
        if let Some(secs) = parse_env::<u64>("ACCESS_MONITOR_COOLDOWN_SECS")? {
            self.engine.cooldown = Duration::from_secs(secs);
        }
        if let Some(backend) = non_empty_env("ACCESS_MONITOR_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(dir) = non_empty_env("ACCESS_MONITOR_SINK_DIR") {
            self.sink.directory = PathBuf::from(dir);
        }
        if let Some(conn) = non_empty_env("AZURESTORAGE_CONNECTION_STRING") {
            self.sink.connection_string = Some(conn);
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        validate_camera_id(&self.camera_id)?;
        self.camera_id = self.camera_id.to_lowercase();

        if self.engine.max_cache_size == 0 {
            return Err(anyhow!("max_cache_size must be greater than zero"));
        }
        if self.engine.empty_frames_threshold == 0 {
            return Err(anyhow!("empty_frames_threshold must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source resolution must be non-zero"));
        }
        if !(1..=100).contains(&self.emit.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within 0..=1"));
        }
        validate_container(&self.sink.container)?;
        if self.sink.kind == SinkKind::Http {
            let conn = self.sink.connection_string.as_deref().ok_or_else(|| {
                anyhow!("http sink requires AZURESTORAGE_CONNECTION_STRING or sink.connection_string")
            })?;
            ConnectionString::parse(conn)?;
        }
        Ok(())
    }
}

/// Camera ids become blob prefixes: 1..64 of `[a-z0-9_-]`.
pub fn validate_camera_id(camera_id: &str) -> Result<()> {
    static CAMERA_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAMERA_ID_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,64}$").unwrap());
    if !re.is_match(&camera_id.to_lowercase()) {
        return Err(anyhow!("camera_id must match ^[a-z0-9_-]{{1,64}}$"));
    }
    Ok(())
}

/// Blob container naming rules: 3..63 lowercase letters, digits or hyphens,
/// starting and ending with a letter or digit.
pub fn validate_container(container: &str) -> Result<()> {
    static CONTAINER_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CONTAINER_RE
        .get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$").unwrap());
    if !re.is_match(container) || container.contains("--") {
        return Err(anyhow!(
            "container '{}' is not a valid blob container name",
            container
        ));
    }
    Ok(())
}

fn parse_sink_kind(kind: &str) -> Result<SinkKind> {
    match kind.trim().to_lowercase().as_str() {
        "directory" | "dir" => Ok(SinkKind::Directory),
        "http" | "azure" => Ok(SinkKind::Http),
        other => Err(anyhow!(
            "unknown sink kind '{}'; expected directory or http",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match non_empty_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> MonitorConfig {
        MonitorConfig::from_file(MonitorConfigFile::default()).expect("default config")
    }

    #[test]
    fn defaults_match_documented_values() {
        let engine = EngineConfig::default();
        assert_eq!(engine.max_cache_size, 50);
        assert_eq!(engine.empty_frames_threshold, 50);
        assert_eq!(engine.cooldown, Duration::from_secs(5));
        assert_eq!(engine.min_match_size, 70);

        let cfg = defaults();
        assert_eq!(cfg.camera_id, "camera_01");
        assert_eq!(cfg.sink.container, "accessmonitorblob");
        assert_eq!(cfg.sink.kind, SinkKind::Directory);
        assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut cfg = defaults();
        cfg.engine.max_cache_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let mut cfg = defaults();
        cfg.engine.empty_frames_threshold = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn http_sink_needs_credentials() {
        let mut cfg = defaults();
        cfg.sink.kind = SinkKind::Http;
        cfg.sink.connection_string = None;
        assert!(cfg.validate().is_err());
        cfg.sink.connection_string =
            Some("BlobEndpoint=https://x.blob.core.windows.net;SharedAccessSignature=sv=1".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn camera_ids_are_restricted() {
        assert!(validate_camera_id("camera_01").is_ok());
        assert!(validate_camera_id("Front-Door").is_ok());
        assert!(validate_camera_id("../etc").is_err());
        assert!(validate_camera_id("").is_err());
    }

    #[test]
    fn container_names_follow_blob_rules() {
        assert!(validate_container("accessmonitorblob").is_ok());
        assert!(validate_container("access-monitor").is_ok());
        assert!(validate_container("ab").is_err());
        assert!(validate_container("-leading").is_err());
        assert!(validate_container("double--hyphen").is_err());
        assert!(validate_container("Upper").is_err());
    }

    #[test]
    fn toml_files_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(
            &path,
            r#"
camera_id = "porch"

[engine]
max_cache_size = 12
empty_frames_threshold = 4

[sink]
container = "porch-frames"
"#,
        )
        .unwrap();
        let file = read_config_file(&path).unwrap();
        let cfg = MonitorConfig::from_file(file).unwrap();
        assert_eq!(cfg.camera_id, "porch");
        assert_eq!(cfg.engine.max_cache_size, 12);
        assert_eq!(cfg.engine.empty_frames_threshold, 4);
        assert_eq!(cfg.engine.min_match_size, DEFAULT_MIN_MATCH_SIZE);
        assert_eq!(cfg.sink.container, "porch-frames");
    }

    #[test]
    fn unknown_sink_kind_fails() {
        assert!(parse_sink_kind("s3").is_err());
        assert_eq!(parse_sink_kind("Azure").unwrap(), SinkKind::Http);
    }
}
