//! Cascading patient deletion: remove a patient's database record and
//! every remote attachment it transitively owns, tolerating partial
//! storage failures.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{repository, DatabaseError};
use crate::storage::ObjectStore;

#[derive(Error, Debug)]
pub enum DeletionError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    #[error("Patient {patient_id} does not belong to clinic {clinic_id}")]
    ClinicMismatch { patient_id: Uuid, clinic_id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result of one cascading deletion attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionOutcome {
    pub files_deleted: u32,
    pub files_not_deleted: u32,
    /// Whether the database record itself was removed.
    pub success: bool,
}

/// Delete every remote attachment of the patient, then the database
/// record.
///
/// Storage deletes are issued one at a time across the whole history
/// tree; failures are counted, never fatal to the enumeration. Without
/// `force_delete`, any storage failure aborts before the database is
/// touched so the operator can retry or escalate; with it, the
/// database record goes regardless. One-shot: a failed non-forced
/// attempt keeps no state and can simply be re-invoked.
pub async fn delete_patient_cascade<S>(
    conn: &Connection,
    store: &S,
    patient_id: &Uuid,
    clinic_id: &Uuid,
    force_delete: bool,
) -> Result<DeletionOutcome, DeletionError>
where
    S: ObjectStore + ?Sized,
{
    if patient_id.is_nil() || clinic_id.is_nil() {
        return Err(DeletionError::Validation(
            "patient and clinic identifiers are required".into(),
        ));
    }

    let patient = repository::get_patient(conn, patient_id)?
        .ok_or(DeletionError::PatientNotFound(*patient_id))?;
    if patient.clinic_id != *clinic_id {
        return Err(DeletionError::ClinicMismatch {
            patient_id: *patient_id,
            clinic_id: *clinic_id,
        });
    }

    let mut files_deleted = 0u32;
    let mut files_not_deleted = 0u32;
    for attachment in patient.all_attachments() {
        match store.delete(attachment).await {
            Ok(()) => files_deleted += 1,
            Err(e) => {
                files_not_deleted += 1;
                tracing::warn!(
                    patient_id = %patient_id,
                    key = %attachment.key,
                    error = %e,
                    "Attachment delete failed during cascading deletion"
                );
            }
        }
    }

    if !force_delete && files_not_deleted > 0 {
        // The patient record stays intact so the operator can retry
        // or escalate to force mode.
        tracing::warn!(
            patient_id = %patient_id,
            files_deleted,
            files_not_deleted,
            "Cascading deletion aborted before database removal"
        );
        return Ok(DeletionOutcome {
            files_deleted,
            files_not_deleted,
            success: false,
        });
    }

    repository::delete_patient(conn, patient_id)?;

    tracing::info!(
        patient_id = %patient_id,
        clinic_id = %clinic_id,
        files_deleted,
        files_not_deleted,
        forced = force_delete,
        "Patient erased with all attachments"
    );
    Ok(DeletionOutcome {
        files_deleted,
        files_not_deleted,
        success: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{AttachmentRef, HistoryRecord, Patient};
    use crate::storage::InMemoryObjectStore;
    use chrono::NaiveDate;

    fn aref(key: &str) -> AttachmentRef {
        AttachmentRef::new(key, format!("https://store.example/{key}"))
    }

    async fn seeded_patient(conn: &mut Connection, store: &InMemoryObjectStore) -> Patient {
        let mut patient = Patient::new(Uuid::new_v4(), "Tomas", "Vacek");
        let mut first = HistoryRecord::new(
            NaiveDate::from_ymd_opt(2024, 2, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            "imaging",
        );
        first.attachments = vec![aref("x"), aref("y")];
        let mut second = HistoryRecord::new(
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            "bloodwork",
        );
        second.attachments = vec![aref("z")];
        patient.history = vec![first, second];

        for key in ["x", "y", "z"] {
            store.put(key, b"object data").await;
        }
        repository::insert_patient(conn, &patient).unwrap();
        patient
    }

    #[tokio::test]
    async fn deletes_all_files_and_the_patient() {
        let mut conn = open_memory_database().unwrap();
        let store = InMemoryObjectStore::new();
        let patient = seeded_patient(&mut conn, &store).await;

        let outcome =
            delete_patient_cascade(&conn, &store, &patient.id, &patient.clinic_id, false)
                .await
                .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.files_deleted, 3);
        assert_eq!(outcome.files_not_deleted, 0);
        assert_eq!(store.object_count().await, 0);
        assert!(repository::get_patient(&conn, &patient.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_failure_without_force_keeps_the_patient() {
        let mut conn = open_memory_database().unwrap();
        let store = InMemoryObjectStore::new();
        let patient = seeded_patient(&mut conn, &store).await;
        store.fail_deletes_for("y").await;

        let outcome =
            delete_patient_cascade(&conn, &store, &patient.id, &patient.clinic_id, false)
                .await
                .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.files_deleted, 2);
        assert_eq!(outcome.files_not_deleted, 1);
        assert!(repository::get_patient(&conn, &patient.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn force_removes_patient_even_when_every_delete_fails() {
        let mut conn = open_memory_database().unwrap();
        let store = InMemoryObjectStore::new();
        let patient = seeded_patient(&mut conn, &store).await;
        for key in ["x", "y", "z"] {
            store.fail_deletes_for(key).await;
        }

        let outcome =
            delete_patient_cascade(&conn, &store, &patient.id, &patient.clinic_id, true)
                .await
                .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.files_deleted, 0);
        assert_eq!(outcome.files_not_deleted, 3);
        assert!(repository::get_patient(&conn, &patient.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_attempt_can_be_reinvoked() {
        let mut conn = open_memory_database().unwrap();
        let store = InMemoryObjectStore::new();
        let patient = seeded_patient(&mut conn, &store).await;
        store.fail_deletes_for("z").await;

        let first =
            delete_patient_cascade(&conn, &store, &patient.id, &patient.clinic_id, false)
                .await
                .unwrap();
        assert!(!first.success);

        // Deleting the already-deleted x and y again is success, so
        // the retry under force finishes the job.
        let second =
            delete_patient_cascade(&conn, &store, &patient.id, &patient.clinic_id, true)
                .await
                .unwrap();
        assert!(second.success);
        assert_eq!(second.files_deleted, 2);
        assert_eq!(second.files_not_deleted, 1);
    }

    #[tokio::test]
    async fn clinic_mismatch_is_rejected_before_storage() {
        let mut conn = open_memory_database().unwrap();
        let store = InMemoryObjectStore::new();
        let patient = seeded_patient(&mut conn, &store).await;

        let result =
            delete_patient_cascade(&conn, &store, &patient.id, &Uuid::new_v4(), true).await;

        assert!(matches!(result, Err(DeletionError::ClinicMismatch { .. })));
        assert!(store.delete_calls().await.is_empty());
        assert!(repository::get_patient(&conn, &patient.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_patient_is_reported() {
        let conn = open_memory_database().unwrap();
        let store = InMemoryObjectStore::new();

        let result =
            delete_patient_cascade(&conn, &store, &Uuid::new_v4(), &Uuid::new_v4(), false).await;
        assert!(matches!(result, Err(DeletionError::PatientNotFound(_))));
    }

    #[tokio::test]
    async fn nil_identifiers_fail_validation() {
        let conn = open_memory_database().unwrap();
        let store = InMemoryObjectStore::new();

        let result =
            delete_patient_cascade(&conn, &store, &Uuid::nil(), &Uuid::new_v4(), false).await;
        assert!(matches!(result, Err(DeletionError::Validation(_))));
    }

    #[test]
    fn outcome_serializes_for_display() {
        let outcome = DeletionOutcome {
            files_deleted: 2,
            files_not_deleted: 1,
            success: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["files_deleted"], 2);
        assert_eq!(json["success"], false);
    }
}
