//! Staged edit sessions over one patient's record tree.
//!
//! An [`EditSession`] holds an in-memory draft of the patient plus an
//! ordered log of not-yet-committed storage intents. Edits land in the
//! draft immediately; remote storage is only touched when the session
//! is saved ([`EditSession::commit`]) or discarded
//! ([`EditSession::rollback`]).

pub mod buffer;
pub mod engine;
pub mod pending;
pub mod types;

pub use buffer::EditBuffer;
pub use engine::EditSession;
pub use pending::{PendingLog, PendingOperation};
pub use types::{CommitSummary, OrphanSweep, RollbackSummary, SessionWarning};

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Pre-flight rejection. Nothing remote or persistent was touched.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An index into the buffer or pending log no longer matches an
    /// existing entry.
    #[error("Stale reference: {0}")]
    StaleOperation(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
