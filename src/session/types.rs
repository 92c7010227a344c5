use serde::{Deserialize, Serialize};

/// Non-fatal problems collected during a commit or rollback sweep.
/// Per-object remote failures never abort the sweep; they end up here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionWarning {
    /// A remote delete failed and the reference was retained in the
    /// saved record, so no stored object is ever silently dropped.
    RemoteDeleteFailed { key: String, reason: String },
    /// An object could not be removed and now sits unreferenced in
    /// remote storage.
    OrphanedObject { key: String, reason: String },
}

/// Per-operation-type outcome of [`EditSession::commit`].
///
/// [`EditSession::commit`]: super::EditSession::commit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitSummary {
    /// `Attach` entries finalized into the persisted record.
    pub attachments_linked: usize,
    /// `Detach` entries whose remote delete succeeded.
    pub detachments_completed: usize,
    /// `Detach` entries whose remote delete failed; the reference was
    /// retained in the saved record.
    pub detachments_failed: usize,
    /// Records removed by `DeleteRecord` entries.
    pub records_removed: usize,
    /// Attached files deleted while removing records.
    pub record_files_deleted: usize,
    /// Keys that remain in storage with no referencing record.
    pub orphaned_objects: Vec<String>,
    pub warnings: Vec<SessionWarning>,
}

/// Outcome of [`EditSession::rollback`].
///
/// [`EditSession::rollback`]: super::EditSession::rollback
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackSummary {
    /// Provisional uploads removed from remote storage.
    pub uploads_deleted: usize,
    /// Provisional uploads that could not be removed (left orphaned).
    pub uploads_not_deleted: usize,
    /// Detached references re-linked into the buffer.
    pub links_restored: usize,
    /// Records un-marked from pending deletion.
    pub records_unmarked: usize,
    pub warnings: Vec<SessionWarning>,
}

/// Outcome of the opportunistic orphaned-upload sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrphanSweep {
    pub objects_deleted: usize,
    pub objects_remaining: usize,
    pub warnings: Vec<SessionWarning>,
}
