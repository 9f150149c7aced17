//! Constants used throughout the PMR core crate.
//!
//! Path and filename constants live here so the snapshot reader and writer cannot drift apart.

/// Default directory for patient data storage when no explicit directory is configured.
pub const DEFAULT_PATIENT_DATA_DIR: &str = "patient_data";

/// Creator recorded on merge logs and new enrollments when none is configured.
pub const DEFAULT_CREATOR: &str = "admin";

/// Directory name (under the patient data directory) holding sharded patient folders.
pub const PATIENTS_DIR_NAME: &str = "patients";

/// Staging directory a snapshot's patient tree is written into before it replaces
/// [`PATIENTS_DIR_NAME`].
pub const PATIENTS_STAGING_DIR_NAME: &str = "patients.staging";

/// Name the previous patient tree is moved to while the staged tree is swapped in.
pub const PATIENTS_RETIRED_DIR_NAME: &str = "patients.old";

/// Filename for a patient's demographic record.
pub const PATIENT_FILENAME: &str = "patient.yaml";

/// Filename for the encounters owned by a patient.
pub const ENCOUNTERS_FILENAME: &str = "encounters.yaml";

/// Filename for the program enrollments owned by a patient.
pub const ENROLLMENTS_FILENAME: &str = "enrollments.yaml";

/// Filename for the program catalogue.
pub const PROGRAMS_FILENAME: &str = "programs.yaml";

/// Filename for the merge audit log.
pub const MERGE_LOG_FILENAME: &str = "merge_log.yaml";

/// Prefix of the void reason written onto a patient absorbed by a merge.
pub const MERGE_VOID_REASON_PREFIX: &str = "Merged with patient";
