use serde::{Deserialize, Serialize};

use super::SessionError;
use crate::models::AttachmentRef;

/// One not-yet-committed storage intent, carrying enough data to be
/// committed or reversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingOperation {
    /// A file already uploaded to remote storage, provisionally linked
    /// into the buffer. Reversing deletes the remote object.
    Attach {
        record_index: usize,
        attachment: AttachmentRef,
    },
    /// A link removed from the buffer; the remote object is untouched
    /// until commit. Reversing restores the link only.
    Detach {
        record_index: usize,
        attachment: AttachmentRef,
    },
    /// A whole record marked for removal, with the attachment set it
    /// carried at the moment of marking.
    DeleteRecord {
        record_index: usize,
        attachments: Vec<AttachmentRef>,
    },
}

impl PendingOperation {
    pub fn record_index(&self) -> usize {
        match self {
            Self::Attach { record_index, .. }
            | Self::Detach { record_index, .. }
            | Self::DeleteRecord { record_index, .. } => *record_index,
        }
    }

    fn record_index_mut(&mut self) -> &mut usize {
        match self {
            Self::Attach { record_index, .. }
            | Self::Detach { record_index, .. }
            | Self::DeleteRecord { record_index, .. } => record_index,
        }
    }

    /// Whether this entry holds an intent for the given
    /// (record, attachment) pair.
    fn addresses(&self, record_index: usize, key: &str) -> bool {
        match self {
            Self::Attach {
                record_index: idx,
                attachment,
            }
            | Self::Detach {
                record_index: idx,
                attachment,
            } => *idx == record_index && attachment.key == key,
            Self::DeleteRecord {
                record_index: idx,
                attachments,
            } => *idx == record_index && attachments.iter().any(|a| a.key == key),
        }
    }

    /// Human-readable intent, for confirmation dialogs. Record numbers
    /// are 1-based for display.
    pub fn describe(&self) -> String {
        match self {
            Self::Attach {
                record_index,
                attachment,
            } => format!(
                "Attach new file {} to record {}",
                attachment.key,
                record_index + 1
            ),
            Self::Detach {
                record_index,
                attachment,
            } => format!(
                "Remove {} from record {} (file deleted on save)",
                attachment.key,
                record_index + 1
            ),
            Self::DeleteRecord {
                record_index,
                attachments,
            } => format!(
                "Delete record {} and its {} attached file(s) on save",
                record_index + 1,
                attachments.len()
            ),
        }
    }
}

/// Ordered log of pending operations for one edit session.
///
/// Append-only while editing; entries leave only through a single-entry
/// undo or a full commit/rollback sweep. At most one intent exists per
/// (record, attachment) pair: recording over an existing pair replaces
/// the earlier entry instead of stacking a contradiction.
#[derive(Debug, Clone, Default)]
pub struct PendingLog {
    entries: Vec<PendingOperation>,
}

impl PendingLog {
    pub fn record(&mut self, op: PendingOperation) {
        match &op {
            PendingOperation::Attach {
                record_index,
                attachment,
            }
            | PendingOperation::Detach {
                record_index,
                attachment,
            } => {
                let (record_index, key) = (*record_index, attachment.key.clone());
                self.entries.retain(|e| !e.addresses(record_index, &key));
            }
            PendingOperation::DeleteRecord {
                record_index,
                attachments,
            } => {
                let record_index = *record_index;
                let keys: Vec<&str> = attachments.iter().map(|a| a.key.as_str()).collect();
                self.entries
                    .retain(|e| !keys.iter().any(|key| e.addresses(record_index, key)));
            }
        }
        self.entries.push(op);
    }

    /// Remove and return one entry for an undo.
    pub fn take(&mut self, index: usize) -> Result<PendingOperation, SessionError> {
        if index >= self.entries.len() {
            return Err(SessionError::StaleOperation(format!(
                "no pending operation at index {index}"
            )));
        }
        Ok(self.entries.remove(index))
    }

    pub fn entries(&self) -> &[PendingOperation] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn drain_all(&mut self) -> Vec<PendingOperation> {
        std::mem::take(&mut self.entries)
    }

    pub fn retain(&mut self, f: impl FnMut(&PendingOperation) -> bool) {
        self.entries.retain(f);
    }

    /// Re-point record indices after the buffer re-sorted its history.
    /// `mapping[old_index]` is the record's new index.
    pub fn remap_record_indices(&mut self, mapping: &[usize]) {
        for entry in &mut self.entries {
            let index = entry.record_index_mut();
            if let Some(new_index) = mapping.get(*index) {
                *index = *new_index;
            }
        }
    }

    pub fn describe(&self) -> Vec<String> {
        self.entries.iter().map(PendingOperation::describe).collect()
    }
}
