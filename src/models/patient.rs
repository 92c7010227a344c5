use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to one object in remote storage: an opaque storage key
/// plus the URL it is served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub key: String,
    pub url: String,
}

impl AttachmentRef {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
        }
    }
}

/// One entry in a patient's medical history: a timestamp, free-text
/// note, and the ordered list of attachment references it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub recorded_at: NaiveDateTime,
    pub note: String,
    pub attachments: Vec<AttachmentRef>,
    /// Set while an open edit session has this record marked for
    /// removal. Session state only — never persisted.
    #[serde(skip)]
    pub pending_deletion: bool,
}

impl HistoryRecord {
    pub fn new(recorded_at: NaiveDateTime, note: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at,
            note: note.into(),
            attachments: Vec::new(),
            pending_deletion: false,
        }
    }
}

/// A clinic patient: scalar demographics plus the history record tree,
/// ordered by `recorded_at` descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub given_name: String,
    pub family_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub notes: Option<String>,
    pub history: Vec<HistoryRecord>,
}

impl Patient {
    pub fn new(
        clinic_id: Uuid,
        given_name: impl Into<String>,
        family_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            clinic_id,
            given_name: given_name.into(),
            family_name: family_name.into(),
            date_of_birth: None,
            notes: None,
            history: Vec::new(),
        }
    }

    /// All attachment references across all history records, in
    /// record order.
    pub fn all_attachments(&self) -> impl Iterator<Item = &AttachmentRef> {
        self.history.iter().flat_map(|r| r.attachments.iter())
    }
}

/// Scalar field update applied to a patient draft. `None` fields are
/// left unchanged; `notes` uses a nested Option so it can be cleared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientUpdate {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub date_of_birth: Option<Option<NaiveDate>>,
    pub notes: Option<Option<String>>,
}

/// Compact listing row for the patient index screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSummary {
    pub id: Uuid,
    pub given_name: String,
    pub family_name: String,
    pub record_count: u32,
}
