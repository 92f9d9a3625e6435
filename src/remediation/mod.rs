//! The operations behind each action verb.
//!
//! [`Remediation`] is the production [`Remediator`]: salvage verbs go to a
//! [`Transcoder`], filesystem verbs act on the implicated file directly, and
//! backend verbs go to whichever Radarr/Sonarr instance owns the file.

mod transcode;

pub use transcode::{FfmpegTranscoder, Transcoder};

use crate::arr::{ArrError, MediaBackend};
use crate::context::{ItemRef, MediaFileContext};
use crate::resolver::{OperationError, Remediator};
use crate::rules::Verb;
use async_trait::async_trait;
use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Remediation {
    transcoder: Arc<dyn Transcoder>,
    backends: Vec<Arc<dyn MediaBackend>>,
    cancel: CancellationToken,
}

impl Remediation {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        backends: Vec<Arc<dyn MediaBackend>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transcoder,
            backends,
            cancel,
        }
    }

    /// Run a backend call, abandoning it if shutdown is requested.
    async fn backend_call<T>(
        &self,
        call: impl Future<Output = Result<T, ArrError>>,
    ) -> Result<T, OperationError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OperationError::Cancelled),
            result = call => result.map_err(from_arr),
        }
    }

    /// Look up (and cache) the backend item that owns the file.
    async fn owner(&self, ctx: &mut MediaFileContext) -> Result<ItemRef, OperationError> {
        if let Some(owner) = &ctx.owner {
            return Ok(owner.clone());
        }
        if self.backends.is_empty() {
            return Err(OperationError::fatal("no Radarr or Sonarr instance configured"));
        }

        let mut transient = None;
        for (idx, backend) in self.backends.iter().enumerate() {
            let found = self
                .backend_call(backend.find_item_for_path(&ctx.file_path))
                .await;
            match found {
                Ok(Some(item_id)) => {
                    let owner = ItemRef {
                        backend: idx,
                        backend_name: backend.name().to_string(),
                        item_id,
                    };
                    ctx.owner = Some(owner.clone());
                    return Ok(owner);
                }
                Ok(None) => {}
                Err(OperationError::Cancelled) => return Err(OperationError::Cancelled),
                Err(e) => {
                    tracing::warn!(backend = backend.name(), "Owner lookup failed: {}", e);
                    if matches!(e, OperationError::Transient(_)) {
                        transient = Some(e);
                    }
                }
            }
        }

        Err(transient.unwrap_or_else(|| {
            OperationError::fatal(format!(
                "no configured backend owns {}",
                ctx.file_path.display()
            ))
        }))
    }

    async fn with_owner<F, Fut>(&self, ctx: &mut MediaFileContext, call: F) -> Result<(), OperationError>
    where
        F: FnOnce(Arc<dyn MediaBackend>, i64) -> Fut,
        Fut: Future<Output = Result<(), ArrError>>,
    {
        let owner = self.owner(ctx).await?;
        let backend = self.backends[owner.backend].clone();
        self.backend_call(call(backend, owner.item_id)).await
    }

    async fn salvage(&self, verb: Verb, ctx: &mut MediaFileContext) -> Result<(), OperationError> {
        let produced = match verb {
            Verb::Repair => self.transcoder.repair(&ctx.file_path, &self.cancel).await?,
            _ => self.transcoder.remux(&ctx.file_path, &self.cancel).await?,
        };

        if let Some(previous) = ctx.replacement.replace(produced) {
            remove_stray(&previous).await;
        }
        Ok(())
    }

    /// Remove the original and promote any salvaged copy into its place.
    ///
    /// The copy is moved first, so a failed move leaves the original and
    /// the copy where they were.
    async fn delete(&self, ctx: &mut MediaFileContext) -> Result<(), OperationError> {
        let Some(replacement) = ctx.replacement.clone() else {
            return remove_original(&ctx.file_path).await;
        };

        let target = ctx.file_path.with_extension("mkv");
        tokio::fs::rename(&replacement, &target).await.map_err(|e| {
            OperationError::fatal(format!(
                "failed to move {} to {}: {}",
                replacement.display(),
                target.display(),
                e
            ))
        })?;
        ctx.replacement = None;
        tracing::info!("Promoted {} to {}", replacement.display(), target.display());

        // A .mkv original was replaced by the rename itself.
        if target != ctx.file_path {
            remove_original(&ctx.file_path).await?;
        }
        Ok(())
    }

    /// Drop the local copy and ask the owning backend for a new release.
    async fn replace(&self, ctx: &mut MediaFileContext) -> Result<(), OperationError> {
        let owner = self.owner(ctx).await?;

        remove_original(&ctx.file_path).await?;
        if let Some(replacement) = ctx.replacement.take() {
            remove_stray(&replacement).await;
        }

        let backend = self.backends[owner.backend].clone();
        self.backend_call(backend.rescan(owner.item_id)).await?;
        self.backend_call(backend.search(owner.item_id)).await?;
        tracing::info!(
            backend = %owner.backend_name,
            item_id = owner.item_id,
            "Requested a new release for {}",
            ctx.file_path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl Remediator for Remediation {
    async fn perform(&self, verb: Verb, ctx: &mut MediaFileContext) -> Result<(), OperationError> {
        if self.cancel.is_cancelled() {
            return Err(OperationError::Cancelled);
        }

        tracing::debug!(incident = %ctx.incident, %verb, "Starting: {}", ctx.file_path.display());

        match verb {
            Verb::Ignore => Ok(()),
            Verb::Repair | Verb::Remux => self.salvage(verb, ctx).await,
            Verb::Delete => self.delete(ctx).await,
            Verb::Replace => self.replace(ctx).await,
            Verb::Blacklist => {
                self.with_owner(ctx, |backend, id| async move { backend.blacklist(id).await })
                    .await
            }
            Verb::Rescan => {
                self.with_owner(ctx, |backend, id| async move { backend.rescan(id).await })
                    .await
            }
        }
    }
}

fn from_arr(err: ArrError) -> OperationError {
    if err.is_transient() {
        OperationError::transient(err)
    } else {
        OperationError::fatal(err)
    }
}

/// Deleting a file that is already gone counts as success.
async fn remove_original(path: &Path) -> Result<(), OperationError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!("Deleted {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!("{} already gone", path.display());
            Ok(())
        }
        Err(e) => Err(OperationError::fatal(format!(
            "failed to delete {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn remove_stray(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
