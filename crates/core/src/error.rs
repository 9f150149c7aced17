use chrono::{DateTime, Utc};
use pmr_uuid::RecordId;

/// A record was rejected on save because one of its fields is invalid.
///
/// Raised by [`crate::validation::validate_enrollment`] and surfaced through
/// [`PatientError::Validation`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("program enrollment must reference a program")]
    MissingProgram,
    #[error("program enrollment references unknown program {0}")]
    UnknownProgram(RecordId),
    #[error("program enrollment date {0} is in the future")]
    EnrolledInFuture(DateTime<Utc>),
    #[error("program completion date precedes the enrollment date")]
    CompletedBeforeEnrolled,
}

#[derive(Debug, thiserror::Error)]
pub enum PatientError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("patient {0} not found")]
    PatientNotFound(RecordId),
    #[error("program {0} not found")]
    ProgramNotFound(RecordId),
    #[error("cannot merge patient {0} into itself")]
    SamePatient(RecordId),
    #[error("patient {0} is voided")]
    PatientVoided(RecordId),

    #[error("record store lock poisoned")]
    StorePoisoned,

    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to remove stale storage directory: {0}")]
    StorageDirRemoval(std::io::Error),
    #[error("failed to swap in new storage directory: {0}")]
    StorageDirRename(std::io::Error),
    #[error("failed to write record file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read record file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),
    #[error("failed to deserialize YAML ({path}): {source}", path = path.display())]
    YamlDeserialization {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid record id: {0}")]
    Uuid(#[from] pmr_uuid::UuidError),
    #[error("invalid text: {0}")]
    Text(#[from] pmr_types::TextError),
}

pub type PatientResult<T> = std::result::Result<T, PatientError>;
