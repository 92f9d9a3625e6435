use crate::resolver::OperationError;
use async_trait::async_trait;
use remediarr_av::{actions, Toolbox};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Produces a salvaged sibling of a broken file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn repair(&self, input: &Path, cancel: &CancellationToken)
        -> Result<PathBuf, OperationError>;

    async fn remux(&self, input: &Path, cancel: &CancellationToken)
        -> Result<PathBuf, OperationError>;
}

/// ffmpeg/mkvmerge backed transcoder.
pub struct FfmpegTranscoder {
    tools: Toolbox,
}

impl FfmpegTranscoder {
    pub fn new(tools: Toolbox) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn repair(
        &self,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, OperationError> {
        actions::repair(&self.tools, input, cancel)
            .await
            .map_err(from_av)
    }

    async fn remux(
        &self,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, OperationError> {
        actions::remux(&self.tools, input, cancel)
            .await
            .map_err(from_av)
    }
}

pub(crate) fn from_av(err: remediarr_av::Error) -> OperationError {
    if err.is_cancelled() {
        OperationError::Cancelled
    } else if err.is_transient() {
        OperationError::transient(err)
    } else {
        OperationError::fatal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn av_errors_are_classified() {
        assert_eq!(
            from_av(remediarr_av::Error::Cancelled {
                tool: "ffmpeg".into()
            }),
            OperationError::Cancelled
        );
        assert!(matches!(
            from_av(remediarr_av::Error::Timeout {
                tool: "ffmpeg".into(),
                after: Duration::from_secs(1)
            }),
            OperationError::Transient(_)
        ));
        assert!(matches!(
            from_av(remediarr_av::Error::tool_not_found("mkvmerge")),
            OperationError::Fatal(_)
        ));
    }

    #[tokio::test]
    async fn missing_input_is_fatal() {
        let transcoder = FfmpegTranscoder::new(Toolbox::from_paths(
            Some("ffmpeg".into()),
            Some("ffprobe".into()),
            None,
        ));
        let result = transcoder
            .repair(Path::new("/nonexistent/a.mkv"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(OperationError::Fatal(_))));
    }
}
