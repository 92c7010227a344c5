pub mod config;
pub mod models;
pub mod db;
pub mod storage;
pub mod session;
pub mod deletion;

pub use deletion::{delete_patient_cascade, DeletionError, DeletionOutcome};
pub use session::{EditSession, SessionError};
