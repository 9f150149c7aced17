//! Record identifiers and sharded-path utilities.
//!
//! Every record held by PMR (patients, encounters, programs, enrollments, merge logs) is keyed
//! by a *canonical* UUID: **32 lowercase hexadecimal characters** with no hyphens.
//!
//! This crate provides:
//! - [`RecordId`], a wrapper that guarantees the canonical format once constructed.
//! - The sharding rule used to place a patient's files on disk.
//!
//! ## Canonical form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Identifiers supplied from outside the core (CLI arguments, snapshot files) must already be
//! canonical. Uppercase, hyphenated or otherwise malformed values are rejected rather than
//! normalised, so the same record can never be reached through two spellings.
//!
//! ## Sharded directory layout
//! For a canonical id `u`, patient files live under:
//! `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`
//!
//! Example:
//! `patient_data/patients/55/0e/550e8400e29b41d4a716446655440000/`

mod record_id;

pub use record_id::RecordId;

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// The supplied string is not a canonical record id.
    #[error("invalid record id: {0}")]
    InvalidInput(String),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
