//! Repository seams.
//!
//! Services receive these traits as explicit dependencies. Reads see every write applied so
//! far, including writes inside scopes that are still open. Writes take the active
//! [`Transaction`] and must register an undo action with it, so a rollback of that scope
//! restores the previous state.

pub mod memory;
pub mod snapshot;

use crate::error::PatientResult;
use crate::records::{Cohort, Encounter, MergeLog, Patient, Program, ProgramEnrollment};
use crate::transaction::Transaction;
use pmr_uuid::RecordId;

pub trait PatientRepository {
    fn get_patient(&self, id: &RecordId) -> PatientResult<Option<Patient>>;

    fn list_patients(&self, include_voided: bool) -> PatientResult<Vec<Patient>>;

    fn save_patient(&self, tx: &mut Transaction<'_>, patient: Patient) -> PatientResult<Patient>;
}

pub trait EncounterRepository {
    fn get_encounter(&self, id: &RecordId) -> PatientResult<Option<Encounter>>;

    /// Non-voided encounters owned by `patient`, in recording order.
    fn encounters_by_patient(&self, patient: &RecordId) -> PatientResult<Vec<Encounter>>;

    fn save_encounter(
        &self,
        tx: &mut Transaction<'_>,
        encounter: Encounter,
    ) -> PatientResult<Encounter>;

    /// Moves every non-voided encounter of `from` to `to` and returns the ids moved.
    fn reassign_encounters(
        &self,
        tx: &mut Transaction<'_>,
        from: &RecordId,
        to: &RecordId,
    ) -> PatientResult<Vec<RecordId>> {
        let mut moved = Vec::new();
        for mut encounter in self.encounters_by_patient(from)? {
            encounter.patient = to.clone();
            moved.push(self.save_encounter(tx, encounter)?.id);
        }
        Ok(moved)
    }
}

pub trait ProgramRepository {
    fn get_program(&self, id: &RecordId) -> PatientResult<Option<Program>>;

    fn all_programs(&self, include_retired: bool) -> PatientResult<Vec<Program>>;

    fn save_program(&self, tx: &mut Transaction<'_>, program: Program) -> PatientResult<Program>;
}

pub trait ProgramEnrollmentRepository {
    /// Non-voided enrollments owned by `patient`, in enrollment order.
    fn enrollments_by_patient(&self, patient: &RecordId)
        -> PatientResult<Vec<ProgramEnrollment>>;

    /// Non-voided enrollments of cohort members in any of `programs`.
    fn enrollments_for_cohort(
        &self,
        cohort: &Cohort,
        programs: &[Program],
    ) -> PatientResult<Vec<ProgramEnrollment>>;

    /// Validates and writes `enrollment`.
    ///
    /// Implementations must reject an invalid enrollment with
    /// [`crate::PatientError::Validation`] before writing anything.
    fn save_enrollment(
        &self,
        tx: &mut Transaction<'_>,
        enrollment: ProgramEnrollment,
    ) -> PatientResult<ProgramEnrollment>;
}

pub trait MergeLogRepository {
    fn save_merge_log(&self, tx: &mut Transaction<'_>, log: MergeLog) -> PatientResult<MergeLog>;

    /// Merge logs where `preferred` absorbed another patient, oldest first.
    fn merge_logs_for(&self, preferred: &RecordId) -> PatientResult<Vec<MergeLog>>;
}
