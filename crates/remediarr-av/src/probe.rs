//! FFprobe-based validity checks.
//!
//! A file counts as playable when ffprobe can open it and finds at least one
//! video stream. This is the success criterion for both repair and remux.

use crate::{Error, Result, Toolbox};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
}

/// What ffprobe could see inside a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaSummary {
    pub container: String,
    pub duration: Option<Duration>,
    pub video_codecs: Vec<String>,
    pub audio_streams: usize,
    pub subtitle_streams: usize,
}

impl MediaSummary {
    pub fn has_video(&self) -> bool {
        !self.video_codecs.is_empty()
    }
}

/// Run ffprobe against `path` and summarise its streams.
pub async fn analyze(
    tools: &Toolbox,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<MediaSummary> {
    if !path.exists() {
        return Err(Error::file_not_found(path));
    }

    let output = tools
        .command(tools.ffprobe()?)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .cancel_on(cancel)
        .execute()
        .await?;

    parse_ffprobe_output(&output.stdout)
}

/// Check that `path` opens cleanly and carries a video stream.
///
/// # Errors
///
/// Returns [`Error::Unplayable`] when ffprobe rejects the file or finds no
/// video stream. Timeouts and cancellation are passed through unchanged.
pub async fn verify_playable(
    tools: &Toolbox,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<MediaSummary> {
    let summary = match analyze(tools, path, cancel).await {
        Ok(summary) => summary,
        Err(Error::ToolFailed { message, .. }) | Err(Error::ParseError { message, .. }) => {
            return Err(Error::unplayable(path, message))
        }
        Err(e) => return Err(e),
    };

    if !summary.has_video() {
        return Err(Error::unplayable(path, "no video stream"));
    }

    tracing::debug!(
        "Verified {:?}: {} with video {:?}",
        path,
        summary.container,
        summary.video_codecs
    );
    Ok(summary)
}

fn parse_ffprobe_output(json: &str) -> Result<MediaSummary> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::parse_error("ffprobe", e.to_string()))?;

    let format = output
        .format
        .ok_or_else(|| Error::parse_error("ffprobe", "no format section"))?;

    let mut summary = MediaSummary {
        container: format.format_name,
        duration: format
            .duration
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64),
        ..Default::default()
    };

    for stream in output.streams {
        match stream.codec_type.as_str() {
            "video" => summary
                .video_codecs
                .push(stream.codec_name.unwrap_or_else(|| "unknown".to_string())),
            "audio" => summary.audio_streams += 1,
            "subtitle" => summary.subtitle_streams += 1,
            _ => {}
        }
    }

    Ok(summary)
}
