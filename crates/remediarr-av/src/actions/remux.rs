//! Container remuxing into Matroska.

use super::{discard, finish, STREAM_MAP};
use crate::{Error, Result, Toolbox};
use remediarr_common::paths::derived_path;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Copy every stream of `input` into a fresh `<stem>.remux.mkv`.
///
/// Uses mkvmerge when available (better at rebuilding broken indexes) and
/// falls back to ffmpeg stream copy. Returns the path of the new file.
pub async fn remux(tools: &Toolbox, input: &Path, cancel: &CancellationToken) -> Result<PathBuf> {
    if !input.exists() {
        return Err(Error::file_not_found(input));
    }

    let output = derived_path(input, "remux", "mkv")?;
    tracing::info!("Remuxing {:?} -> {:?}", input, output);

    let produced = match tools.mkvmerge() {
        Some(mkvmerge) => match remux_with_mkvmerge(tools, mkvmerge, input, &output, cancel).await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!("mkvmerge failed, falling back to ffmpeg: {}", e);
                discard(&output).await;
                remux_with_ffmpeg(tools, input, &output, cancel).await
            }
        },
        None => remux_with_ffmpeg(tools, input, &output, cancel).await,
    };

    let output = finish(tools, output, produced, cancel).await?;
    tracing::info!("Remux complete: {:?}", output);
    Ok(output)
}

async fn remux_with_mkvmerge(
    tools: &Toolbox,
    mkvmerge: &Path,
    input: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::debug!("Remuxing with mkvmerge: {:?} -> {:?}", input, output);

    // mkvmerge returns 0 for success, 1 for warnings (still OK), 2 for errors
    tools
        .command(mkvmerge)
        .arg("-q")
        .arg("-o")
        .arg(output)
        .arg(input)
        .accept_exit_code(1)
        .cancel_on(cancel)
        .execute()
        .await?;

    Ok(())
}

async fn remux_with_ffmpeg(
    tools: &Toolbox,
    input: &Path,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::debug!("Remuxing with ffmpeg: {:?} -> {:?}", input, output);

    tools
        .command(tools.ffmpeg()?)
        .args(["-hide_banner", "-nostdin", "-y", "-v", "error", "-i"])
        .arg(input)
        .args(STREAM_MAP)
        .args(["-c", "copy", "-f", "matroska"])
        .arg(output)
        .cancel_on(cancel)
        .execute()
        .await?;

    Ok(())
}
