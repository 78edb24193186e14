//! access_monitor - episode capture daemon
//!
//! This daemon:
//! 1. Loads configuration (file, environment, then command-line overrides)
//! 2. Opens the frame source, detector backend and blob sink
//! 3. Groups detections into episodes and uploads the sharpest frame of each
//! 4. Stops on Ctrl-C, or when a finite source (image directory) runs out

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use access_monitor::{build_backend, build_emitter, open_source, Monitor, MonitorConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture the best frame of every detection episode")]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "ACCESS_MONITOR_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Camera id used as the blob prefix.
    #[arg(long)]
    camera_id: Option<String>,

    /// Frame source: stub://name, a file or directory, /dev/videoN, or http(s) url.
    #[arg(long)]
    source: Option<String>,

    /// Replay image files in a loop.
    #[arg(long = "loop")]
    loop_files: bool,

    /// Detector backend: tract (ONNX face model, needs --model and the
    /// backend-tract feature), cpu (bright-region test rig, the default) or stub.
    #[arg(long)]
    detector: Option<String>,

    /// ONNX model for the tract backend.
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    #[arg(long)]
    max_cache_size: Option<usize>,

    #[arg(long)]
    empty_frames_threshold: Option<u32>,

    #[arg(long)]
    cooldown_secs: Option<u64>,

    /// Root directory for the directory sink.
    #[arg(long, value_name = "PATH")]
    sink_dir: Option<PathBuf>,
}

impl Args {
    fn apply(&self, cfg: &mut MonitorConfig) {
        if let Some(camera_id) = &self.camera_id {
            cfg.camera_id = camera_id.clone();
        }
        if let Some(source) = &self.source {
            cfg.source.url = source.clone();
        }
        if self.loop_files {
            cfg.source.loop_files = true;
        }
        if let Some(detector) = &self.detector {
            cfg.detector.backend = detector.clone();
        }
        if let Some(model) = &self.model {
            cfg.detector.model_path = Some(model.clone());
        }
        if let Some(size) = self.max_cache_size {
            cfg.engine.max_cache_size = size;
        }
        if let Some(threshold) = self.empty_frames_threshold {
            cfg.engine.empty_frames_threshold = threshold;
        }
        if let Some(secs) = self.cooldown_secs {
            cfg.engine.cooldown = Duration::from_secs(secs);
        }
        if let Some(dir) = &self.sink_dir {
            cfg.sink.directory = dir.clone();
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg =
        MonitorConfig::load_unvalidated(args.config.as_deref()).context("load config")?;
    args.apply(&mut cfg);
    cfg.validate().context("invalid configuration")?;

    let source = open_source(&cfg.source).context("open frame source")?;
    let detector = build_backend(&cfg.detector, cfg.engine.min_match_size)
        .context("build detector backend")?;
    let emitter = build_emitter(&cfg).context("build emitter")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    log::info!(
        "access_monitor {} starting for camera {}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera_id
    );
    let mut monitor = Monitor::new(cfg.engine.clone(), source, detector, Box::new(emitter))?
        .with_shutdown(shutdown);
    let stats = monitor.run()?;

    println!("access_monitor summary:");
    println!("  frames read: {}", stats.frames_read);
    println!("  frames skipped: {}", stats.frames_skipped);
    println!("  read failures: {}", stats.read_failures);
    println!("  detections: {}", stats.detections);
    println!("  episodes flushed: {}", stats.flushes);
    println!("  sink failures: {}", stats.sink_failures);
    Ok(())
}
