//! Salvage actions.
//!
//! Both actions write a new Matroska file next to the input and only report
//! success once that file passes [`verify_playable`](crate::verify_playable).
//! The input is never modified; a failed attempt leaves no partial output.

mod remux;
mod repair;

pub use remux::remux;
pub use repair::repair;

use crate::{verify_playable, Result, Toolbox};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Stream selection shared by every ffmpeg invocation. Matroska rejects data
/// streams, so only video, audio and subtitles are carried over.
const STREAM_MAP: &[&str] = &["-map", "0:v", "-map", "0:a?", "-map", "0:s?"];

/// Validate `output` after a tool run, removing it on any failure.
async fn finish(
    tools: &Toolbox,
    output: PathBuf,
    produced: Result<()>,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    if let Err(e) = produced {
        discard(&output).await;
        return Err(e);
    }

    match verify_playable(tools, &output, cancel).await {
        Ok(_) => Ok(output),
        Err(e) => {
            discard(&output).await;
            Err(e)
        }
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed partial output {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove partial output {:?}: {}", path, e),
    }
}
