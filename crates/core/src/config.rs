//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services.
//! Nothing in this crate reads process-wide environment variables during an operation; the
//! binary reads them and hands the raw values to the helpers below.

use crate::constants::{
    DEFAULT_CREATOR, DEFAULT_PATIENT_DATA_DIR, MERGE_LOG_FILENAME, PATIENTS_DIR_NAME,
    PROGRAMS_FILENAME,
};
use crate::{NonEmptyText, PatientError, PatientResult};
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    patient_data_dir: PathBuf,
    creator: NonEmptyText,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`PatientError::InvalidInput`] if `patient_data_dir` is empty or points at an
    /// existing non-directory path.
    pub fn new(patient_data_dir: PathBuf, creator: NonEmptyText) -> PatientResult<Self> {
        if patient_data_dir.as_os_str().is_empty() {
            return Err(PatientError::InvalidInput(
                "patient_data_dir cannot be empty".into(),
            ));
        }

        if patient_data_dir.exists() && !patient_data_dir.is_dir() {
            return Err(PatientError::InvalidInput(format!(
                "patient_data_dir is not a directory: {}",
                patient_data_dir.display()
            )));
        }

        Ok(Self {
            patient_data_dir,
            creator,
        })
    }

    pub fn patient_data_dir(&self) -> &Path {
        &self.patient_data_dir
    }

    pub fn patients_dir(&self) -> PathBuf {
        self.patient_data_dir.join(PATIENTS_DIR_NAME)
    }

    pub fn programs_file(&self) -> PathBuf {
        self.patient_data_dir.join(PROGRAMS_FILENAME)
    }

    pub fn merge_log_file(&self) -> PathBuf {
        self.patient_data_dir.join(MERGE_LOG_FILENAME)
    }

    /// Name recorded as the creator of enrollments and merge logs.
    pub fn creator(&self) -> &NonEmptyText {
        &self.creator
    }
}

/// Resolve the patient data directory from an optional raw value.
///
/// `None` or a blank value falls back to [`DEFAULT_PATIENT_DATA_DIR`].
pub fn patient_data_dir_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PATIENT_DATA_DIR))
}

/// Resolve the creator name from an optional raw value.
///
/// `None` or a blank value falls back to [`DEFAULT_CREATOR`]; a multi-line value is rejected.
pub fn creator_from_env_value(value: Option<String>) -> PatientResult<NonEmptyText> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    Ok(NonEmptyText::new(value.as_deref().unwrap_or(DEFAULT_CREATOR))?)
}
