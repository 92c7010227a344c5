use chrono::NaiveDateTime;
use rusqlite::Connection;
use uuid::Uuid;

use super::buffer::EditBuffer;
use super::pending::{PendingLog, PendingOperation};
use super::types::{CommitSummary, OrphanSweep, RollbackSummary, SessionWarning};
use super::SessionError;
use crate::db::{repository, DatabaseError};
use crate::models::{AttachmentRef, Patient, PatientUpdate};
use crate::storage::ObjectStore;

/// One editing session over one patient: the edit buffer plus the
/// pending operation log, exclusively owned by the screen that opened
/// it. Remote storage is touched only in [`commit`], [`rollback`] and
/// [`cleanup_orphaned_files`], one awaited call at a time in log
/// order.
///
/// [`commit`]: EditSession::commit
/// [`rollback`]: EditSession::rollback
/// [`cleanup_orphaned_files`]: EditSession::cleanup_orphaned_files
#[derive(Debug)]
pub struct EditSession {
    buffer: EditBuffer,
    log: PendingLog,
}

impl EditSession {
    /// Open a session over an already-loaded patient.
    pub fn open(patient: Patient) -> Self {
        Self {
            buffer: EditBuffer::load(patient),
            log: PendingLog::default(),
        }
    }

    /// Load the patient from persistence and open a session over it.
    pub fn load(conn: &Connection, patient_id: &Uuid) -> Result<Self, SessionError> {
        let patient = repository::get_patient(conn, patient_id)?.ok_or_else(|| {
            SessionError::Database(DatabaseError::NotFound {
                entity_type: "Patient".into(),
                id: patient_id.to_string(),
            })
        })?;
        Ok(Self::open(patient))
    }

    // ── Buffer queries ──────────────────────────────────────

    /// The current draft, including records still shown as pending
    /// removal.
    pub fn patient(&self) -> &Patient {
        self.buffer.draft()
    }

    pub fn snapshot(&self) -> &Patient {
        self.buffer.snapshot()
    }

    /// True iff the draft differs from the last loaded/committed
    /// snapshot, or any operation is still pending.
    pub fn has_unsaved_changes(&self) -> bool {
        !self.log.is_empty() || self.buffer.has_buffer_changes()
    }

    pub fn is_record_marked_for_deletion(&self, index: usize) -> bool {
        self.buffer.is_record_marked_deleted(index)
    }

    pub fn pending_operations(&self) -> &[PendingOperation] {
        self.log.entries()
    }

    /// Human-readable pending intents for confirmation dialogs.
    pub fn describe_pending(&self) -> Vec<String> {
        self.log.describe()
    }

    // ── Buffer edits (no I/O) ───────────────────────────────

    pub fn apply_update(&mut self, update: &PatientUpdate) {
        self.buffer.apply_update(update);
    }

    /// Append a history record; history re-sorts newest-first and
    /// pending operations are re-pointed. Returns the new record's
    /// index.
    pub fn add_record(&mut self, recorded_at: NaiveDateTime, note: impl Into<String>) -> usize {
        let (index, mapping) = self.buffer.add_record(recorded_at, note);
        self.log.remap_record_indices(&mapping);
        index
    }

    pub fn update_record_note(
        &mut self,
        index: usize,
        note: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.buffer.update_record_note(index, note)
    }

    /// Change a record's timestamp; history re-sorts and pending
    /// operations are re-pointed. Returns the record's new index.
    pub fn update_record_timestamp(
        &mut self,
        index: usize,
        recorded_at: NaiveDateTime,
    ) -> Result<usize, SessionError> {
        let mapping = self.buffer.update_record_timestamp(index, recorded_at)?;
        self.log.remap_record_indices(&mapping);
        Ok(mapping.get(index).copied().unwrap_or(index))
    }

    // ── Pending operation recording ─────────────────────────

    /// Link an already-uploaded object into a record and log the
    /// attach intent.
    pub fn record_attach(
        &mut self,
        record_index: usize,
        attachment: AttachmentRef,
    ) -> Result<(), SessionError> {
        self.buffer.link_attachment(record_index, attachment.clone())?;
        self.log.record(PendingOperation::Attach {
            record_index,
            attachment,
        });
        Ok(())
    }

    /// Remove a link from the buffer and log the detach intent. The
    /// remote object is deliberately left in place until commit.
    pub fn record_detach(
        &mut self,
        record_index: usize,
        attachment: &AttachmentRef,
    ) -> Result<(), SessionError> {
        self.buffer.unlink_attachment(record_index, attachment)?;
        self.log.record(PendingOperation::Detach {
            record_index,
            attachment: attachment.clone(),
        });
        Ok(())
    }

    /// Flag a record as pending deletion, capturing the attachment
    /// set it carries right now.
    pub fn mark_record_for_deletion(&mut self, record_index: usize) -> Result<(), SessionError> {
        let attachments = self.buffer.mark_record_deleted(record_index)?;
        self.log.record(PendingOperation::DeleteRecord {
            record_index,
            attachments,
        });
        Ok(())
    }

    /// Remove one pending operation and reverse its buffer-visible
    /// effect. No remote call is made; an upload undone here becomes
    /// an orphan candidate for [`cleanup_orphaned_files`].
    ///
    /// [`cleanup_orphaned_files`]: EditSession::cleanup_orphaned_files
    pub fn undo(&mut self, operation_index: usize) -> Result<(), SessionError> {
        match self.log.take(operation_index)? {
            PendingOperation::Attach {
                record_index,
                attachment,
            } => self.buffer.unlink_attachment(record_index, &attachment),
            PendingOperation::Detach {
                record_index,
                attachment,
            } => self.buffer.link_attachment(record_index, attachment),
            PendingOperation::DeleteRecord { record_index, .. } => {
                self.buffer.unmark_record_deleted(record_index)
            }
        }
    }

    // ── Commit / rollback ───────────────────────────────────

    /// Apply the pending log to remote storage and persist the buffer.
    ///
    /// Entries are processed in recorded order, one remote call at a
    /// time. Individual remote failures never abort the sweep: a
    /// failed detach keeps its reference in the saved record, a failed
    /// record-file delete leaves the key orphaned but the record is
    /// removed regardless. Flagged records leave the tree only after
    /// the whole log has been processed, so recorded indices stay
    /// valid throughout. On success the log is cleared and the saved
    /// state becomes the new baseline.
    pub async fn commit<S>(
        &mut self,
        conn: &mut Connection,
        store: &S,
    ) -> Result<CommitSummary, SessionError>
    where
        S: ObjectStore + ?Sized,
    {
        if self.log.is_empty() && !self.buffer.has_buffer_changes() {
            return Ok(CommitSummary::default());
        }
        validate_for_save(self.buffer.draft())?;

        let mut summary = CommitSummary::default();
        let mut persisted = self.buffer.draft().clone();

        for op in self.log.entries() {
            match op {
                PendingOperation::Attach { .. } => {
                    // Object already uploaded; the save below finalizes
                    // the link.
                    summary.attachments_linked += 1;
                }
                PendingOperation::Detach {
                    record_index,
                    attachment,
                } => match store.delete(attachment).await {
                    Ok(()) => summary.detachments_completed += 1,
                    Err(e) => {
                        // The object still exists: the reference stays
                        // in the saved record rather than being
                        // silently dropped.
                        summary.detachments_failed += 1;
                        summary.warnings.push(SessionWarning::RemoteDeleteFailed {
                            key: attachment.key.clone(),
                            reason: e.to_string(),
                        });
                        tracing::warn!(
                            key = %attachment.key,
                            error = %e,
                            "Remote delete failed; reference retained in saved record"
                        );
                        if let Some(record) = persisted.history.get_mut(*record_index) {
                            record.attachments.push(attachment.clone());
                        }
                    }
                },
                PendingOperation::DeleteRecord { attachments, .. } => {
                    for attachment in attachments {
                        match store.delete(attachment).await {
                            Ok(()) => summary.record_files_deleted += 1,
                            Err(e) => {
                                summary.orphaned_objects.push(attachment.key.clone());
                                summary.warnings.push(SessionWarning::OrphanedObject {
                                    key: attachment.key.clone(),
                                    reason: e.to_string(),
                                });
                                tracing::warn!(
                                    key = %attachment.key,
                                    error = %e,
                                    "Attachment of deleted record left orphaned in storage"
                                );
                            }
                        }
                    }
                }
            }
        }

        let before = persisted.history.len();
        persisted.history.retain(|r| !r.pending_deletion);
        summary.records_removed = before - persisted.history.len();

        repository::save_patient(conn, &persisted)?;
        self.buffer.adopt(persisted);
        self.log.clear();

        tracing::info!(
            patient_id = %self.buffer.draft().id,
            attached = summary.attachments_linked,
            detached = summary.detachments_completed,
            detach_failures = summary.detachments_failed,
            records_removed = summary.records_removed,
            orphaned = summary.orphaned_objects.len(),
            "Edit session committed"
        );
        Ok(summary)
    }

    /// Discard the session: reverse the pending log against remote
    /// storage and restore the buffer to the last snapshot.
    ///
    /// The log is processed in reverse recorded order so later
    /// operations are undone before the earlier ones they may depend
    /// on (a record must be un-marked before a link inside it can be
    /// restored). Remote failures are collected, never thrown, and the
    /// buffer is forced back to the snapshot no matter what happened
    /// to the individual reversals.
    pub async fn rollback<S>(&mut self, store: &S) -> RollbackSummary
    where
        S: ObjectStore + ?Sized,
    {
        let mut summary = RollbackSummary::default();
        let ops = self.log.drain_all();

        for op in ops.iter().rev() {
            match op {
                PendingOperation::Attach {
                    record_index,
                    attachment,
                } => {
                    match store.delete(attachment).await {
                        Ok(()) => summary.uploads_deleted += 1,
                        Err(e) => {
                            summary.uploads_not_deleted += 1;
                            summary.warnings.push(SessionWarning::OrphanedObject {
                                key: attachment.key.clone(),
                                reason: e.to_string(),
                            });
                            tracing::warn!(
                                key = %attachment.key,
                                error = %e,
                                "Unwanted upload could not be deleted during rollback"
                            );
                        }
                    }
                    if let Err(e) = self.buffer.unlink_attachment(*record_index, attachment) {
                        tracing::warn!(key = %attachment.key, error = %e, "Attach reversal skipped");
                    }
                }
                PendingOperation::Detach {
                    record_index,
                    attachment,
                } => match self
                    .buffer
                    .link_attachment(*record_index, attachment.clone())
                {
                    Ok(()) => summary.links_restored += 1,
                    Err(e) => {
                        tracing::warn!(key = %attachment.key, error = %e, "Detach reversal skipped")
                    }
                },
                PendingOperation::DeleteRecord { record_index, .. } => {
                    match self.buffer.unmark_record_deleted(*record_index) {
                        Ok(()) => summary.records_unmarked += 1,
                        Err(e) => {
                            tracing::warn!(record_index, error = %e, "Record un-mark skipped")
                        }
                    }
                }
            }
        }

        // Whatever happened above, the visible buffer ends at the last
        // known-good snapshot.
        self.buffer.restore_snapshot();

        tracing::info!(
            patient_id = %self.buffer.draft().id,
            uploads_deleted = summary.uploads_deleted,
            uploads_not_deleted = summary.uploads_not_deleted,
            "Edit session rolled back"
        );
        summary
    }

    /// Best-effort sweep of objects uploaded by still-pending `Attach`
    /// entries. Meant for opportunistic invocation when a session was
    /// abandoned without commit or rollback; swept entries leave the
    /// log, failed ones stay for a later sweep.
    pub async fn cleanup_orphaned_files<S>(&mut self, store: &S) -> OrphanSweep
    where
        S: ObjectStore + ?Sized,
    {
        let mut sweep = OrphanSweep::default();
        let attaches: Vec<(usize, AttachmentRef)> = self
            .log
            .entries()
            .iter()
            .filter_map(|op| match op {
                PendingOperation::Attach {
                    record_index,
                    attachment,
                } => Some((*record_index, attachment.clone())),
                _ => None,
            })
            .collect();

        let mut swept_keys = Vec::new();
        for (record_index, attachment) in attaches {
            match store.delete(&attachment).await {
                Ok(()) => {
                    sweep.objects_deleted += 1;
                    swept_keys.push(attachment.key.clone());
                    if let Err(e) = self.buffer.unlink_attachment(record_index, &attachment) {
                        tracing::warn!(key = %attachment.key, error = %e, "Swept upload was not linked");
                    }
                }
                Err(e) => {
                    sweep.objects_remaining += 1;
                    sweep.warnings.push(SessionWarning::OrphanedObject {
                        key: attachment.key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.log.retain(|op| match op {
            PendingOperation::Attach { attachment, .. } => {
                !swept_keys.contains(&attachment.key)
            }
            _ => true,
        });
        sweep
    }
}

/// Pre-flight check run before any remote or persistent mutation.
fn validate_for_save(patient: &Patient) -> Result<(), SessionError> {
    if patient.id.is_nil() || patient.clinic_id.is_nil() {
        return Err(SessionError::Validation(
            "patient and clinic identifiers are required".into(),
        ));
    }
    if patient.given_name.trim().is_empty() || patient.family_name.trim().is_empty() {
        return Err(SessionError::Validation(
            "patient given and family names are required".into(),
        ));
    }
    Ok(())
}
