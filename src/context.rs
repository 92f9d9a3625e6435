//! Per-incident state carried through one resolution pass.

use std::path::PathBuf;
use uuid::Uuid;

/// The backend item that owns a file, once looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    /// Index into the remediation's backend list.
    pub backend: usize,
    pub backend_name: String,
    pub item_id: i64,
}

/// Everything an action tree needs to know about the implicated file.
///
/// Built fresh for every matched line and dropped when its tree finishes.
/// Operations may update it in place: REPAIR/REMUX record the salvaged copy
/// in `replacement`, and backend lookups cache the owner in `owner`.
#[derive(Debug, Clone)]
pub struct MediaFileContext {
    /// Correlates every audit record of one incident.
    pub incident: Uuid,
    pub container: String,
    pub rule: String,
    pub file_path: PathBuf,
    pub error_cause: String,
    pub replacement: Option<PathBuf>,
    pub owner: Option<ItemRef>,
}

impl MediaFileContext {
    pub fn new(
        container: impl Into<String>,
        rule: impl Into<String>,
        file_path: impl Into<PathBuf>,
        error_cause: impl Into<String>,
    ) -> Self {
        Self {
            incident: Uuid::new_v4(),
            container: container.into(),
            rule: rule.into(),
            file_path: file_path.into(),
            error_cause: error_cause.into(),
            replacement: None,
            owner: None,
        }
    }
}
