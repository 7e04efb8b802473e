//! Duration probing for media files.
//!
//! Runs ffprobe against a file and extracts its duration in seconds. Probing
//! never fails loudly: anything that goes wrong yields "unknown" (`None`),
//! which callers treat as zero.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute or exited unsuccessfully.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// Output parsed but carried no usable duration.
    #[error("no duration in ffprobe output")]
    NoDuration,

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of media durations.
pub trait DurationProbe: Send + Sync {
    /// Duration of `path` in seconds, or `None` when it cannot be determined.
    fn duration(&self, path: &Path) -> Option<f64>;
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub duration: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

fn parse_seconds(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// Extracts the duration from ffprobe JSON output.
///
/// The container duration wins; otherwise the first stream that reports one
/// is used (stream 0 is commonly the video).
pub fn parse_ffprobe_duration(json_str: &str) -> Result<f64, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    if let Some(secs) = ffprobe
        .format
        .as_ref()
        .and_then(|f| parse_seconds(f.duration.as_deref()))
    {
        return Ok(secs);
    }

    ffprobe
        .streams
        .unwrap_or_default()
        .iter()
        .find_map(|s| parse_seconds(s.duration.as_deref()))
        .ok_or(ProbeError::NoDuration)
}

/// Duration probe backed by the ffprobe executable.
#[derive(Debug, Clone)]
pub struct FfprobeDuration {
    executable: String,
}

impl FfprobeDuration {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Runs `ffprobe -v quiet -print_format json -show_format -show_streams <path>`.
    pub fn probe(&self, path: &Path) -> Result<f64, ProbeError> {
        let output = Command::new(&self.executable)
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
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "{} exited with status {}: {}",
                self.executable,
                output.status,
                stderr.trim()
            )));
        }

        parse_ffprobe_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for FfprobeDuration {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl DurationProbe for FfprobeDuration {
    fn duration(&self, path: &Path) -> Option<f64> {
        if !path.is_file() {
            debug!(path = %path.display(), "not probing missing file");
            return None;
        }
        match self.probe(path) {
            Ok(secs) => {
                debug!(path = %path.display(), secs, "probed duration");
                Some(secs)
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "duration unknown");
                None
            }
        }
    }
}

/// Fixed path -> duration table, for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedDurations {
    durations: HashMap<PathBuf, f64>,
}

impl FixedDurations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<PathBuf>, secs: f64) -> Self {
        self.durations.insert(path.into(), secs);
        self
    }
}

impl DurationProbe for FixedDurations {
    fn duration(&self, path: &Path) -> Option<f64> {
        self.durations.get(path).copied()
    }
}
