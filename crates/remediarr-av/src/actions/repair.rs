//! Error-concealing re-mux for files ffprobe cannot analyze.

use super::{finish, STREAM_MAP};
use crate::{Error, Result, Toolbox};
use remediarr_common::paths::derived_path;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Decoder flags that let ffmpeg read past damaged packets and regenerate
/// missing timestamps instead of aborting.
const RECOVERY_FLAGS: &[&str] = &["-err_detect", "ignore_err", "-fflags", "+genpts+discardcorrupt"];

/// Rewrite `input` into `<stem>.repaired.mkv`, dropping corrupt packets.
///
/// Streams are copied, never re-encoded. Returns the repaired file once
/// ffprobe accepts it.
pub async fn repair(tools: &Toolbox, input: &Path, cancel: &CancellationToken) -> Result<PathBuf> {
    if !input.exists() {
        return Err(Error::file_not_found(input));
    }

    let output = derived_path(input, "repaired", "mkv")?;
    tracing::info!("Repairing {:?} -> {:?}", input, output);

    let produced = run_ffmpeg(tools, input, &output, cancel).await;
    let output = finish(tools, output, produced, cancel).await?;

    tracing::info!("Repair complete: {:?}", output);
    Ok(output)
}

async fn run_ffmpeg(
    tools: &Toolbox,
    input: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    tools
        .command(tools.ffmpeg()?)
        .args(["-hide_banner", "-nostdin", "-y", "-v", "error"])
        .args(RECOVERY_FLAGS)
        .arg("-i")
        .arg(input)
        .args(STREAM_MAP)
        .args(["-c", "copy", "-max_muxing_queue_size", "9999", "-f", "matroska"])
        .arg(output)
        .cancel_on(cancel)
        .execute()
        .await?;

    Ok(())
}
