//! Media probing and preview frames, backed by the ffprobe/ffmpeg binaries.

use std::{error::Error, fmt, path::Path, process::Stdio, time::Duration};

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::validate::{check_media, MediaInfo, Rejection, Warning};
use log::debug;
use serde::Deserialize;
use tokio::{process::Command, time::timeout};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub const PREVIEW_WIDTH: u32 = 320;
pub const PREVIEW_HEIGHT: u32 = 180;
/// Where the preview frame is taken from, in seconds.
pub const PREVIEW_TIMESTAMP: f64 = 1.0;
pub const PREVIEW_QUALITY: f32 = 0.8;

const DEFAULT_FPS: f64 = 30.0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeError {
    /// The probe binary could not be found or started.
    NotInstalled(String),
    /// The probe ran but could not make sense of the file.
    Failed(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled(s) => write!(f, "media probe not available: {s}"),
            Self::Failed(s) => write!(f, "media probe failed: {s}"),
        }
    }
}

impl Error for ProbeError {}

#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;

    /// A `data:image/jpeg;base64,...` still of the video.
    async fn thumbnail(&self, path: &Path, info: &MediaInfo) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

/// Parses `num/den`; `0/0` and other degenerate rates give `None`.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    let fps = num / den;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Turns `ffprobe -print_format json -show_format -show_streams` output into
/// [`MediaInfo`]. A file without a video stream reports a 0×0 picture.
pub fn parse_ffprobe_json(json: &[u8]) -> Result<MediaInfo, ProbeError> {
    let output: FfprobeOutput = serde_json::from_slice(json)
        .map_err(|e| ProbeError::Failed(format!("unparseable ffprobe output: {e}")))?;

    let duration = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok());

    let video = output
        .streams
        .as_ref()
        .and_then(|streams| streams.iter().find(|s| s.codec_type.as_deref() == Some("video")));
    let fps = video.and_then(|s| {
        s.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate))
    });

    Ok(MediaInfo {
        duration,
        width: video.and_then(|s| s.width).unwrap_or(0),
        height: video.and_then(|s| s.height).unwrap_or(0),
        fps,
    })
}

/// Seek position for the preview frame: one second in, or the start of the
/// last frame when the clip is shorter than that.
pub fn preview_timestamp(info: &MediaInfo) -> f64 {
    let duration = match info.duration {
        Some(d) if d.is_finite() => d,
        _ => return PREVIEW_TIMESTAMP,
    };
    let fps = info.fps.filter(|f| f.is_finite() && *f > 0.0).unwrap_or(DEFAULT_FPS);
    PREVIEW_TIMESTAMP.min(duration - 1.0 / fps).max(0.0)
}

/// Maps a 0..=1 JPEG quality onto ffmpeg's `-q:v` scale (2 best, 31 worst).
pub fn jpeg_qscale(quality: f32) -> u8 {
    let quality = quality.clamp(0.0, 1.0);
    (2.0 + (1.0 - quality) * 29.0).round() as u8
}

pub fn jpeg_data_uri(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg))
}

/// Runs the probe under [`PROBE_TIMEOUT`] and judges the result.
// Outside: Err if the probe could not run at all.
// Inside: the verdict on the file, with the probed metadata when it passed.
pub async fn check_file_contents(
    inspector: &dyn MediaInspector,
    path: &Path,
    size: u64,
) -> Result<Result<(MediaInfo, Option<Warning>), Rejection>> {
    match timeout(PROBE_TIMEOUT, inspector.probe(path)).await {
        Err(_) => Ok(Err(Rejection::TimedOut)),
        Ok(Err(ProbeError::NotInstalled(reason))) => bail!("cannot validate video: {reason}"),
        Ok(Err(e)) => {
            debug!("{}: {e}", path.display());
            Ok(Err(Rejection::Unreadable))
        }
        Ok(Ok(info)) => {
            debug!("{}: {info:?}", path.display());
            Ok(check_media(&info, size).map(|warning| (info, warning)))
        }
    }
}

/// The system's ffprobe and ffmpeg. Child processes are killed when the
/// future driving them is dropped.
pub struct Ffmpeg {
    ffprobe: String,
    ffmpeg: String,
}

impl Ffmpeg {
    pub fn new(ffprobe: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }
}

#[async_trait]
impl MediaInspector for Ffmpeg {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let ffprobe = which::which(&self.ffprobe)
            .map_err(|e| ProbeError::NotInstalled(format!("{}: {e}", self.ffprobe)))?;
        let output = Command::new(ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProbeError::NotInstalled(format!("{}: {e}", self.ffprobe)))?;

        if !output.status.success() {
            return Err(ProbeError::Failed(format!(
                "{} ({})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_ffprobe_json(&output.stdout)
    }

    async fn thumbnail(&self, path: &Path, info: &MediaInfo) -> Result<String> {
        let ffmpeg = which::which(&self.ffmpeg)?;
        let seek = format!("{:.3}", preview_timestamp(info));
        let scale = format!("scale={PREVIEW_WIDTH}:{PREVIEW_HEIGHT}");
        let quality = jpeg_qscale(PREVIEW_QUALITY).to_string();
        let output = Command::new(ffmpeg)
            .args(["-nostdin", "-v", "error", "-ss", seek.as_str(), "-i"])
            .arg(path)
            .args(["-frames:v", "1", "-vf", scale.as_str(), "-q:v", quality.as_str()])
            .args(["-f", "image2pipe", "-c:v", "mjpeg", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            bail!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if output.stdout.is_empty() {
            bail!("ffmpeg produced no frame at {seek}s");
        }
        Ok(jpeg_data_uri(&output.stdout))
    }
}
