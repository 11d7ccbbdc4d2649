//! Media transformation: duration probing, trimming, and thumbnails.
//!
//! Video work shells out to ffmpeg/ffprobe. Image thumbnails are produced in
//! process with the `image` crate. All subprocess transforms degrade to the
//! original bytes on failure so ingestion never blocks on a broken tool.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use serde::Deserialize;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

/// Knobs for the transform stage.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Videos longer than this are trimmed down to it.
    pub max_video_seconds: f64,
    pub thumbnail_max_width: u32,
    pub thumbnail_max_height: u32,
    pub thumbnail_jpeg_quality: u8,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_video_seconds: 60.0,
            thumbnail_max_width: 300,
            thumbnail_max_height: 300,
            thumbnail_jpeg_quality: 80,
        }
    }
}

/// Whether a probed duration is over the trim ceiling.
pub fn exceeds_ceiling(duration_seconds: f64, ceiling_seconds: f64) -> bool {
    duration_seconds > ceiling_seconds
}

fn tool_path(name: &str) -> Result<std::path::PathBuf> {
    which::which(name).with_context(|| format!("{name} not found on PATH"))
}

async fn run_tool(command: &mut Command, name: &str) -> Result<Vec<u8>> {
    let output = command
        .output()
        .await
        .with_context(|| format!("failed to spawn {name}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("{name} exited with {}: {stderr}", output.status));
    }

    Ok(output.stdout)
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Probes a video file's duration with ffprobe.
pub async fn probe_duration(path: &Path) -> Result<Option<f64>> {
    let ffprobe = tool_path("ffprobe")?;

    let stdout = run_tool(
        Command::new(ffprobe)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg(path),
        "ffprobe",
    )
    .await?;

    let probe: ProbeOutput = serde_json::from_slice(&stdout).context("unparseable ffprobe output")?;
    Ok(probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok()))
}

/// Re-encodes a video trimmed to the ceiling, returning the trimmed bytes.
async fn trim_video(path: &Path, ceiling_seconds: f64, scratch: &Path) -> Result<Vec<u8>> {
    let ffmpeg = tool_path("ffmpeg")?;
    let out_path = scratch.join("trimmed.mp4");

    run_tool(
        Command::new(ffmpeg)
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-t")
            .arg(format!("{ceiling_seconds}"))
            .arg(&out_path),
        "ffmpeg",
    )
    .await?;

    tokio::fs::read(&out_path)
        .await
        .context("failed to read trimmed output")
}

/// The outcome of preparing video bytes for storage.
pub struct PreparedVideo {
    pub bytes: Vec<u8>,
    pub duration_seconds: Option<f64>,
}

/// Probes the video and trims it when it exceeds the configured ceiling.
///
/// Any probe or trim failure logs a warning and passes the original bytes
/// through untouched.
pub async fn prepare_video(bytes: Vec<u8>, config: &TransformConfig) -> PreparedVideo {
    let scratch = match TempDir::new() {
        Ok(dir) => dir,
        Err(e) => {
            warn!(error = %e, "Failed to create scratch dir, skipping video transform");
            return PreparedVideo {
                bytes,
                duration_seconds: None,
            };
        }
    };
    let in_path = scratch.path().join("input.mp4");
    if let Err(e) = tokio::fs::write(&in_path, &bytes).await {
        warn!(error = %e, "Failed to stage video, skipping transform");
        return PreparedVideo {
            bytes,
            duration_seconds: None,
        };
    }

    let duration = match probe_duration(&in_path).await {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "Duration probe failed, storing video as-is");
            return PreparedVideo {
                bytes,
                duration_seconds: None,
            };
        }
    };

    let Some(duration_seconds) = duration else {
        return PreparedVideo {
            bytes,
            duration_seconds: None,
        };
    };

    if !exceeds_ceiling(duration_seconds, config.max_video_seconds) {
        return PreparedVideo {
            bytes,
            duration_seconds: Some(duration_seconds),
        };
    }

    debug!(
        duration = duration_seconds,
        ceiling = config.max_video_seconds,
        "Trimming over-length video"
    );

    match trim_video(&in_path, config.max_video_seconds, scratch.path()).await {
        Ok(trimmed) => PreparedVideo {
            bytes: trimmed,
            duration_seconds: Some(config.max_video_seconds),
        },
        Err(e) => {
            warn!(error = %e, "Trim failed, storing original video");
            PreparedVideo {
                bytes,
                duration_seconds: Some(duration_seconds),
            }
        }
    }
}

/// Extracts a single scaled frame from a video as JPEG bytes.
pub async fn video_thumbnail(bytes: &[u8], config: &TransformConfig) -> Result<Vec<u8>> {
    let ffmpeg = tool_path("ffmpeg")?;
    let scratch = TempDir::new()?;
    let in_path = scratch.path().join("input.mp4");
    let out_path = scratch.path().join("thumb.jpg");
    tokio::fs::write(&in_path, bytes).await?;

    run_tool(
        Command::new(ffmpeg)
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg("1")
            .arg("-i")
            .arg(&in_path)
            .arg("-vf")
            .arg(format!("scale={}:-2", config.thumbnail_max_width))
            .arg("-frames:v")
            .arg("1")
            .arg(&out_path),
        "ffmpeg",
    )
    .await?;

    tokio::fs::read(&out_path)
        .await
        .context("failed to read thumbnail output")
}

/// Produces a bounded JPEG thumbnail from image bytes. Never upscales.
pub fn image_thumbnail(bytes: &[u8], config: &TransformConfig) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("unreadable image")?;

    let (w, h) = (img.width(), img.height());
    let resized = if w > config.thumbnail_max_width || h > config.thumbnail_max_height {
        img.resize(
            config.thumbnail_max_width,
            config.thumbnail_max_height,
            FilterType::Lanczos3,
        )
    } else {
        img
    };

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, config.thumbnail_jpeg_quality);
    resized
        .to_rgb8()
        .write_with_encoder(encoder)
        .context("failed to encode thumbnail")?;
    Ok(out)
}

/// Rough sanity timeout for subprocess transforms, re-exported for callers
/// that want to bound the whole stage.
pub const TRANSFORM_TIMEOUT: Duration = Duration::from_secs(120);
