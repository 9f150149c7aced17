//! Save-time validation of records.

use crate::error::{PatientResult, ValidationError};
use crate::records::ProgramEnrollment;
use crate::repositories::ProgramRepository;
use chrono::{DateTime, Utc};

/// Checks a program enrollment before it is written.
///
/// An enrollment is rejected when:
/// - it has no program reference,
/// - the referenced program is not in the catalogue,
/// - its enrollment date is later than `now`,
/// - it was completed before it was enrolled.
///
/// Retired programs are still valid targets; existing enrollments must survive retirement.
///
/// # Errors
///
/// Returns [`crate::PatientError::Validation`] for the first failed rule, or a store error if
/// the program lookup itself fails.
pub fn validate_enrollment(
    enrollment: &ProgramEnrollment,
    programs: &dyn ProgramRepository,
    now: DateTime<Utc>,
) -> PatientResult<()> {
    let program_id = enrollment
        .program
        .as_ref()
        .ok_or(ValidationError::MissingProgram)?;

    if programs.get_program(program_id)?.is_none() {
        return Err(ValidationError::UnknownProgram(program_id.clone()).into());
    }

    if enrollment.date_enrolled > now {
        return Err(ValidationError::EnrolledInFuture(enrollment.date_enrolled).into());
    }

    if let Some(completed) = enrollment.date_completed {
        if completed < enrollment.date_enrolled {
            return Err(ValidationError::CompletedBeforeEnrolled.into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Program;
    use crate::repositories::memory::RecordStore;
    use crate::transaction::Transaction;
    use crate::{NonEmptyText, PatientError};
    use chrono::Duration;
    use pmr_uuid::RecordId;

    fn store_with_program() -> (RecordStore, Program) {
        let store = RecordStore::new();
        let program = Program::new(NonEmptyText::new("TB Program").unwrap(), None);
        let mut tx = Transaction::begin("fixture");
        store.save_program(&mut tx, program.clone()).unwrap();
        tx.commit().unwrap();
        (store, program)
    }

    fn enrollment(program: &Program) -> ProgramEnrollment {
        ProgramEnrollment::new(
            RecordId::new(),
            program.id.clone(),
            Utc::now() - Duration::days(30),
            NonEmptyText::new("admin").unwrap(),
        )
    }

    fn validation_error(result: PatientResult<()>) -> ValidationError {
        match result {
            Err(PatientError::Validation(e)) => e,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_enrollment_passes() {
        let (store, program) = store_with_program();
        validate_enrollment(&enrollment(&program), &store, Utc::now()).unwrap();
    }

    #[test]
    fn test_missing_program_is_rejected() {
        let (store, program) = store_with_program();
        let mut e = enrollment(&program);
        e.program = None;

        assert_eq!(
            validation_error(validate_enrollment(&e, &store, Utc::now())),
            ValidationError::MissingProgram
        );
    }

    #[test]
    fn test_unknown_program_is_rejected() {
        let (store, program) = store_with_program();
        let mut e = enrollment(&program);
        let stranger = RecordId::new();
        e.program = Some(stranger.clone());

        assert_eq!(
            validation_error(validate_enrollment(&e, &store, Utc::now())),
            ValidationError::UnknownProgram(stranger)
        );
    }

    #[test]
    fn test_future_enrollment_is_rejected() {
        let (store, program) = store_with_program();
        let now = Utc::now();
        let mut e = enrollment(&program);
        e.date_enrolled = now + Duration::days(1);

        assert!(matches!(
            validation_error(validate_enrollment(&e, &store, now)),
            ValidationError::EnrolledInFuture(_)
        ));
    }

    #[test]
    fn test_completion_before_enrollment_is_rejected() {
        let (store, program) = store_with_program();
        let mut e = enrollment(&program);
        e.date_completed = Some(e.date_enrolled - Duration::days(1));

        assert_eq!(
            validation_error(validate_enrollment(&e, &store, Utc::now())),
            ValidationError::CompletedBeforeEnrolled
        );
    }

    #[test]
    fn test_retired_program_is_still_accepted() {
        let (store, mut program) = store_with_program();
        program.retired = true;
        let mut tx = Transaction::begin("retire");
        store.save_program(&mut tx, program.clone()).unwrap();
        tx.commit().unwrap();

        validate_enrollment(&enrollment(&program), &store, Utc::now()).unwrap();
    }
}
