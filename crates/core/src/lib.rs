//! # PMR Core
//!
//! Core business logic for the PMR patient record system.
//!
//! This crate contains pure data operations:
//! - Patient, encounter, program and enrollment records
//! - Transaction scopes with nested savepoints and compensating undo
//! - Patient merging with per-step partial commit
//! - YAML snapshots under `PMR_PATIENT_DATA_DIR` using sharded patient directories
//!
//! **No API concerns**: command-line parsing and logging setup belong in `pmr-cli`.

pub mod config;
pub mod constants;
pub mod error;
pub mod merge;
pub mod patient;
pub mod records;
pub mod repositories;
pub mod transaction;
pub mod validation;

pub use config::CoreConfig;
pub use error::{PatientError, PatientResult, ValidationError};
pub use merge::MergeService;
pub use patient::PatientService;
pub use records::{Cohort, Encounter, MergeLog, Patient, Program, ProgramEnrollment};
pub use repositories::memory::RecordStore;
pub use transaction::Transaction;

pub use pmr_types::{NonEmptyText, TextError};
pub use pmr_uuid::RecordId;
