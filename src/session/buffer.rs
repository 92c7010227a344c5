use chrono::NaiveDateTime;

use super::SessionError;
use crate::models::{AttachmentRef, HistoryRecord, Patient, PatientUpdate};

/// In-memory, mutable copy of one patient's record tree, paired with
/// the last-loaded/last-committed snapshot. All user edits land here;
/// this component performs no I/O of any kind.
#[derive(Debug, Clone)]
pub struct EditBuffer {
    draft: Patient,
    snapshot: Patient,
}

impl EditBuffer {
    /// Initialize the buffer from a freshly loaded patient. History is
    /// ordered newest-first and all deletion marks are cleared.
    pub fn load(mut patient: Patient) -> Self {
        for record in &mut patient.history {
            record.pending_deletion = false;
        }
        patient
            .history
            .sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Self {
            snapshot: patient.clone(),
            draft: patient,
        }
    }

    pub fn draft(&self) -> &Patient {
        &self.draft
    }

    pub fn snapshot(&self) -> &Patient {
        &self.snapshot
    }

    /// True iff the draft differs from the snapshot.
    pub fn has_buffer_changes(&self) -> bool {
        self.draft != self.snapshot
    }

    pub fn apply_update(&mut self, update: &PatientUpdate) {
        if let Some(given_name) = &update.given_name {
            self.draft.given_name = given_name.clone();
        }
        if let Some(family_name) = &update.family_name {
            self.draft.family_name = family_name.clone();
        }
        if let Some(date_of_birth) = update.date_of_birth {
            self.draft.date_of_birth = date_of_birth;
        }
        if let Some(notes) = &update.notes {
            self.draft.notes = notes.clone();
        }
    }

    /// Append a new history record and re-sort. Returns the new
    /// record's index and the old-index → new-index mapping produced
    /// by the re-sort.
    pub fn add_record(
        &mut self,
        recorded_at: NaiveDateTime,
        note: impl Into<String>,
    ) -> (usize, Vec<usize>) {
        let old_index = self.draft.history.len();
        self.draft
            .history
            .push(HistoryRecord::new(recorded_at, note));
        let mapping = self.resort();
        (mapping[old_index], mapping)
    }

    pub fn update_record_note(
        &mut self,
        index: usize,
        note: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.editable_record_mut(index)?.note = note.into();
        Ok(())
    }

    /// Change a record's timestamp and re-sort. Returns the re-sort
    /// mapping so callers can re-point index references.
    pub fn update_record_timestamp(
        &mut self,
        index: usize,
        recorded_at: NaiveDateTime,
    ) -> Result<Vec<usize>, SessionError> {
        self.editable_record_mut(index)?.recorded_at = recorded_at;
        Ok(self.resort())
    }

    /// Flag a record as pending deletion without removing it, so the
    /// UI can keep showing it and indices stay stable. Returns the
    /// attachment set the record carries at this moment.
    pub fn mark_record_deleted(
        &mut self,
        index: usize,
    ) -> Result<Vec<AttachmentRef>, SessionError> {
        let record = self.record_mut(index)?;
        if record.pending_deletion {
            return Err(SessionError::Validation(format!(
                "record {index} is already marked for deletion"
            )));
        }
        record.pending_deletion = true;
        Ok(record.attachments.clone())
    }

    pub fn unmark_record_deleted(&mut self, index: usize) -> Result<(), SessionError> {
        self.record_mut(index)?.pending_deletion = false;
        Ok(())
    }

    pub fn is_record_marked_deleted(&self, index: usize) -> bool {
        self.draft
            .history
            .get(index)
            .is_some_and(|r| r.pending_deletion)
    }

    pub fn link_attachment(
        &mut self,
        index: usize,
        attachment: AttachmentRef,
    ) -> Result<(), SessionError> {
        let record = self.editable_record_mut(index)?;
        if record.attachments.iter().any(|a| a.key == attachment.key) {
            return Err(SessionError::Validation(format!(
                "attachment {} is already linked to record {index}",
                attachment.key
            )));
        }
        record.attachments.push(attachment);
        Ok(())
    }

    pub fn unlink_attachment(
        &mut self,
        index: usize,
        attachment: &AttachmentRef,
    ) -> Result<(), SessionError> {
        let record = self.editable_record_mut(index)?;
        let position = record
            .attachments
            .iter()
            .position(|a| a.key == attachment.key)
            .ok_or_else(|| {
                SessionError::StaleOperation(format!(
                    "attachment {} is not linked to record {index}",
                    attachment.key
                ))
            })?;
        record.attachments.remove(position);
        Ok(())
    }

    /// Force the draft back to the last known-good snapshot.
    pub fn restore_snapshot(&mut self) {
        self.draft = self.snapshot.clone();
    }

    /// Make the current draft the new baseline.
    pub fn rebaseline(&mut self) {
        self.snapshot = self.draft.clone();
    }

    /// Replace both draft and snapshot with the just-persisted state.
    pub fn adopt(&mut self, persisted: Patient) {
        self.snapshot = persisted.clone();
        self.draft = persisted;
    }

    /// Stable re-sort of history by timestamp descending. Returns
    /// `mapping` where `mapping[old_index]` is the record's new index.
    fn resort(&mut self) -> Vec<usize> {
        let mut indexed: Vec<(usize, HistoryRecord)> =
            self.draft.history.drain(..).enumerate().collect();
        indexed.sort_by(|a, b| b.1.recorded_at.cmp(&a.1.recorded_at));

        let mut mapping = vec![0; indexed.len()];
        for (new_index, (old_index, _)) in indexed.iter().enumerate() {
            mapping[*old_index] = new_index;
        }
        self.draft.history = indexed.into_iter().map(|(_, record)| record).collect();
        mapping
    }

    fn record_mut(&mut self, index: usize) -> Result<&mut HistoryRecord, SessionError> {
        self.draft.history.get_mut(index).ok_or_else(|| {
            SessionError::StaleOperation(format!("no history record at index {index}"))
        })
    }

    /// Like `record_mut`, but refuses records already marked for
    /// deletion: a flagged record takes no further edits.
    fn editable_record_mut(
        &mut self,
        index: usize,
    ) -> Result<&mut HistoryRecord, SessionError> {
        let record = self.record_mut(index)?;
        if record.pending_deletion {
            return Err(SessionError::Validation(format!(
                "record {index} is marked for deletion and cannot be edited"
            )));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn patient_with_records() -> Patient {
        let mut patient = Patient::new(Uuid::new_v4(), "Ana", "Silva");
        patient.history = vec![
            HistoryRecord::new(at(1), "oldest"),
            HistoryRecord::new(at(20), "newest"),
            HistoryRecord::new(at(10), "middle"),
        ];
        patient
    }

    #[test]
    fn load_sorts_newest_first_and_snapshots() {
        let buffer = EditBuffer::load(patient_with_records());
        let notes: Vec<&str> = buffer
            .draft()
            .history
            .iter()
            .map(|r| r.note.as_str())
            .collect();
        assert_eq!(notes, ["newest", "middle", "oldest"]);
        assert!(!buffer.has_buffer_changes());
    }

    #[test]
    fn scalar_update_marks_buffer_dirty() {
        let mut buffer = EditBuffer::load(patient_with_records());
        buffer.apply_update(&PatientUpdate {
            family_name: Some("Silva-Costa".into()),
            ..Default::default()
        });
        assert!(buffer.has_buffer_changes());
        assert_eq!(buffer.draft().family_name, "Silva-Costa");
        assert_eq!(buffer.snapshot().family_name, "Silva");
    }

    #[test]
    fn timestamp_change_resorts_and_reports_mapping() {
        let mut buffer = EditBuffer::load(patient_with_records());
        // Move "middle" (index 1 after load) past "newest".
        let mapping = buffer.update_record_timestamp(1, at(28)).unwrap();

        assert_eq!(buffer.draft().history[0].note, "middle");
        assert_eq!(mapping[1], 0);
        assert_eq!(mapping[0], 1);
        assert_eq!(mapping[2], 2);
    }

    #[test]
    fn add_record_returns_sorted_position() {
        let mut buffer = EditBuffer::load(patient_with_records());
        let (index, _mapping) = buffer.add_record(at(15), "inserted");
        assert_eq!(index, 1);
        assert_eq!(buffer.draft().history[1].note, "inserted");
    }

    #[test]
    fn equal_timestamps_keep_relative_order() {
        let mut buffer = EditBuffer::load(patient_with_records());
        let (index, _) = buffer.add_record(at(20), "tied");
        // Stable sort: the pre-existing day-20 record stays first.
        assert_eq!(index, 1);
        assert_eq!(buffer.draft().history[0].note, "newest");
    }

    #[test]
    fn marked_record_refuses_edits() {
        let mut buffer = EditBuffer::load(patient_with_records());
        let captured = buffer.mark_record_deleted(0).unwrap();
        assert!(captured.is_empty());
        assert!(buffer.is_record_marked_deleted(0));

        let result = buffer.update_record_note(0, "changed");
        assert!(matches!(result, Err(SessionError::Validation(_))));
        let result = buffer.link_attachment(0, AttachmentRef::new("k", "u"));
        assert!(matches!(result, Err(SessionError::Validation(_))));
    }

    #[test]
    fn marking_twice_is_rejected() {
        let mut buffer = EditBuffer::load(patient_with_records());
        buffer.mark_record_deleted(0).unwrap();
        assert!(matches!(
            buffer.mark_record_deleted(0),
            Err(SessionError::Validation(_))
        ));
    }

    #[test]
    fn unlink_missing_attachment_is_stale() {
        let mut buffer = EditBuffer::load(patient_with_records());
        let result = buffer.unlink_attachment(0, &AttachmentRef::new("ghost", "u"));
        assert!(matches!(result, Err(SessionError::StaleOperation(_))));
    }

    #[test]
    fn restore_snapshot_discards_everything() {
        let mut buffer = EditBuffer::load(patient_with_records());
        buffer
            .link_attachment(0, AttachmentRef::new("k", "u"))
            .unwrap();
        buffer.mark_record_deleted(1).unwrap();
        buffer.apply_update(&PatientUpdate {
            notes: Some(Some("scratch".into())),
            ..Default::default()
        });

        buffer.restore_snapshot();
        assert!(!buffer.has_buffer_changes());
        assert!(!buffer.is_record_marked_deleted(1));
        assert!(buffer.draft().history[0].attachments.is_empty());
    }
}
