//! Merge behaviour when one enrollment of the duplicate patient fails validation.

use chrono::{Duration, Utc};
use pmr_core::repositories::snapshot::{load_snapshot, save_snapshot};
use pmr_core::repositories::{
    EncounterRepository, MergeLogRepository, PatientRepository, ProgramEnrollmentRepository,
    ProgramRepository,
};
use pmr_core::{
    Cohort, CoreConfig, Encounter, MergeLog, MergeService, NonEmptyText, Patient, PatientError,
    PatientResult, Program, ProgramEnrollment, RecordId, RecordStore, Transaction,
    ValidationError,
};
use std::cell::Cell;
use tempfile::TempDir;

fn text(s: &str) -> NonEmptyText {
    NonEmptyText::new(s).expect("valid text")
}

/// Delegates to a store, but hands out the enrollment at `clear_index` with its program
/// removed, as if a caller had edited the fetched record in place.
struct ClearingEnrollments<'a> {
    store: &'a RecordStore,
    clear_index: usize,
}

impl ProgramEnrollmentRepository for ClearingEnrollments<'_> {
    fn enrollments_by_patient(&self, patient: &RecordId) -> PatientResult<Vec<ProgramEnrollment>> {
        let mut enrollments = self.store.enrollments_by_patient(patient)?;
        if let Some(e) = enrollments.get_mut(self.clear_index) {
            e.program = None;
        }
        Ok(enrollments)
    }

    fn enrollments_for_cohort(
        &self,
        cohort: &Cohort,
        programs: &[Program],
    ) -> PatientResult<Vec<ProgramEnrollment>> {
        self.store.enrollments_for_cohort(cohort, programs)
    }

    fn save_enrollment(
        &self,
        tx: &mut Transaction<'_>,
        enrollment: ProgramEnrollment,
    ) -> PatientResult<ProgramEnrollment> {
        self.store.save_enrollment(tx, enrollment)
    }
}

/// Delegates to a store, but fails the `fail_on`-th encounter save (1-based).
struct FailingEncounters<'a> {
    store: &'a RecordStore,
    fail_on: usize,
    saves: Cell<usize>,
}

impl EncounterRepository for FailingEncounters<'_> {
    fn get_encounter(&self, id: &RecordId) -> PatientResult<Option<Encounter>> {
        self.store.get_encounter(id)
    }

    fn encounters_by_patient(&self, patient: &RecordId) -> PatientResult<Vec<Encounter>> {
        self.store.encounters_by_patient(patient)
    }

    fn save_encounter(
        &self,
        tx: &mut Transaction<'_>,
        encounter: Encounter,
    ) -> PatientResult<Encounter> {
        let n = self.saves.get() + 1;
        self.saves.set(n);
        if n == self.fail_on {
            return Err(PatientError::StorePoisoned);
        }
        self.store.save_encounter(tx, encounter)
    }
}

/// Reads through to a store but refuses to write merge logs.
struct RejectingMergeLogs<'a> {
    store: &'a RecordStore,
}

impl MergeLogRepository for RejectingMergeLogs<'_> {
    fn save_merge_log(&self, _tx: &mut Transaction<'_>, _log: MergeLog) -> PatientResult<MergeLog> {
        Err(PatientError::InvalidInput("merge log is read-only".into()))
    }

    fn merge_logs_for(&self, preferred: &RecordId) -> PatientResult<Vec<MergeLog>> {
        self.store.merge_logs_for(preferred)
    }
}

struct Ward {
    store: RecordStore,
    preferred: Patient,
    duplicate: Patient,
}

/// Preferred patient with two encounters and one enrollment; duplicate with three encounters
/// and two enrollments.
fn ward() -> Ward {
    let store = RecordStore::new();
    let preferred = Patient::new(vec!["Horatio".into()], text("Hornblower"), None);
    let duplicate = Patient::new(vec!["Horatio".into()], text("Hornblowr"), None);
    let hiv = Program::new(text("HIV Program"), None);
    let tb = Program::new(text("TB Program"), None);
    let enrolled = Utc::now() - Duration::days(30);

    let mut tx = Transaction::begin("ward");
    store.save_patient(&mut tx, preferred.clone()).unwrap();
    store.save_patient(&mut tx, duplicate.clone()).unwrap();
    store.save_program(&mut tx, hiv.clone()).unwrap();
    store.save_program(&mut tx, tb.clone()).unwrap();
    for _ in 0..2 {
        store
            .save_encounter(
                &mut tx,
                Encounter::new(preferred.id.clone(), text("ADULTINITIAL"), Utc::now()),
            )
            .unwrap();
    }
    for _ in 0..3 {
        store
            .save_encounter(
                &mut tx,
                Encounter::new(duplicate.id.clone(), text("ADULTRETURN"), Utc::now()),
            )
            .unwrap();
    }
    store
        .save_enrollment(
            &mut tx,
            ProgramEnrollment::new(preferred.id.clone(), hiv.id.clone(), enrolled, text("admin")),
        )
        .unwrap();
    for program in [&hiv, &tb] {
        store
            .save_enrollment(
                &mut tx,
                ProgramEnrollment::new(
                    duplicate.id.clone(),
                    program.id.clone(),
                    enrolled,
                    text("admin"),
                ),
            )
            .unwrap();
    }
    tx.commit().unwrap();

    Ward {
        store,
        preferred,
        duplicate,
    }
}

fn enrollment_count(store: &RecordStore, patient: &RecordId) -> usize {
    let programs = store.all_programs(true).unwrap();
    store
        .enrollments_for_cohort(&Cohort::new([patient.clone()]), &programs)
        .unwrap()
        .len()
}

#[test]
fn test_failed_enrollment_save_keeps_earlier_savepoints() {
    let w = ward();
    let orig_pref_encounters = w.store.encounters_by_patient(&w.preferred.id).unwrap().len();
    let orig_dup_encounters = w.store.encounters_by_patient(&w.duplicate.id).unwrap().len();
    let orig_pref_enrollments = enrollment_count(&w.store, &w.preferred.id);
    let orig_dup_enrollments = enrollment_count(&w.store, &w.duplicate.id);

    let enrollments = ClearingEnrollments {
        store: &w.store,
        clear_index: 1,
    };
    let merge = MergeService::new(&w.store, &w.store, &enrollments, &w.store, text("admin"));

    let err = merge
        .merge(&w.preferred.id, &w.duplicate.id)
        .expect_err("merge must report the invalid enrollment");
    assert!(matches!(
        err,
        PatientError::Validation(ValidationError::MissingProgram)
    ));

    assert_eq!(
        w.store.encounters_by_patient(&w.preferred.id).unwrap().len(),
        orig_pref_encounters + orig_dup_encounters
    );
    assert_eq!(
        enrollment_count(&w.store, &w.preferred.id),
        orig_pref_enrollments + orig_dup_enrollments - 1
    );

    let duplicate = w.store.get_patient(&w.duplicate.id).unwrap().unwrap();
    assert!(!duplicate.voided);
}

#[test]
fn test_first_enrollment_invalid_still_keeps_encounters() {
    let w = ward();
    let enrollments = ClearingEnrollments {
        store: &w.store,
        clear_index: 0,
    };
    let merge = MergeService::new(&w.store, &w.store, &enrollments, &w.store, text("admin"));

    merge
        .merge(&w.preferred.id, &w.duplicate.id)
        .expect_err("merge must fail");

    assert_eq!(w.store.encounters_by_patient(&w.preferred.id).unwrap().len(), 5);
    assert!(w.store.encounters_by_patient(&w.duplicate.id).unwrap().is_empty());
    assert_eq!(enrollment_count(&w.store, &w.preferred.id), 1);
    assert_eq!(enrollment_count(&w.store, &w.duplicate.id), 2);
}

#[test]
fn test_all_valid_enrollments_merge_completely() {
    let w = ward();
    let merge = MergeService::new(&w.store, &w.store, &w.store, &w.store, text("admin"));

    let log = merge
        .merge(&w.preferred.id, &w.duplicate.id)
        .expect("merge should succeed");

    assert_eq!(log.moved_encounters.len(), 3);
    assert_eq!(log.moved_enrollments.len(), 2);
    assert_eq!(w.store.encounters_by_patient(&w.preferred.id).unwrap().len(), 5);
    assert_eq!(enrollment_count(&w.store, &w.preferred.id), 3);
    assert_eq!(enrollment_count(&w.store, &w.duplicate.id), 0);
    assert!(w.store.get_patient(&w.duplicate.id).unwrap().unwrap().voided);
}

#[test]
fn test_invalid_enrollment_loaded_from_snapshot() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cfg = CoreConfig::new(temp_dir.path().to_path_buf(), text("admin"))
        .expect("CoreConfig::new should succeed");

    let w = ward();
    let mut tables = w.store.tables().unwrap();
    let last = tables
        .enrollments
        .iter_mut()
        .rfind(|e| e.patient == w.duplicate.id)
        .expect("duplicate has enrollments");
    last.program = None;
    save_snapshot(&RecordStore::from_tables(tables), &cfg).unwrap();

    let store = load_snapshot(&cfg).unwrap();
    let merge = MergeService::new(&store, &store, &store, &store, text("admin"));
    let err = merge
        .merge(&w.preferred.id, &w.duplicate.id)
        .expect_err("merge must fail");
    assert!(matches!(
        err,
        PatientError::Validation(ValidationError::MissingProgram)
    ));

    assert_eq!(store.encounters_by_patient(&w.preferred.id).unwrap().len(), 5);
    assert_eq!(enrollment_count(&store, &w.preferred.id), 2);
    assert_eq!(enrollment_count(&store, &w.duplicate.id), 0);
    assert_eq!(store.enrollments_by_patient(&w.duplicate.id).unwrap().len(), 1);
}

#[test]
fn test_failed_encounter_reassignment_undoes_only_that_step() {
    let w = ward();
    let encounters = FailingEncounters {
        store: &w.store,
        fail_on: 2,
        saves: Cell::new(0),
    };
    let merge = MergeService::new(&w.store, &encounters, &w.store, &w.store, text("admin"));

    let err = merge
        .merge(&w.preferred.id, &w.duplicate.id)
        .expect_err("merge must fail");
    assert!(matches!(err, PatientError::StorePoisoned));
    assert_eq!(encounters.saves.get(), 2);

    assert_eq!(w.store.encounters_by_patient(&w.preferred.id).unwrap().len(), 2);
    assert_eq!(w.store.encounters_by_patient(&w.duplicate.id).unwrap().len(), 3);
    assert_eq!(enrollment_count(&w.store, &w.preferred.id), 1);
    assert_eq!(enrollment_count(&w.store, &w.duplicate.id), 2);
    assert!(!w.store.get_patient(&w.duplicate.id).unwrap().unwrap().voided);
    assert!(w.store.merge_logs_for(&w.preferred.id).unwrap().is_empty());
}

#[test]
fn test_failed_merge_log_keeps_moves_and_leaves_duplicate_active() {
    let w = ward();
    let logs = RejectingMergeLogs { store: &w.store };
    let merge = MergeService::new(&w.store, &w.store, &w.store, &logs, text("admin"));

    let err = merge
        .merge(&w.preferred.id, &w.duplicate.id)
        .expect_err("merge must fail");
    assert!(matches!(err, PatientError::InvalidInput(_)));

    assert_eq!(w.store.encounters_by_patient(&w.preferred.id).unwrap().len(), 5);
    assert!(w.store.encounters_by_patient(&w.duplicate.id).unwrap().is_empty());
    assert_eq!(enrollment_count(&w.store, &w.preferred.id), 3);
    assert_eq!(enrollment_count(&w.store, &w.duplicate.id), 0);

    let duplicate = w.store.get_patient(&w.duplicate.id).unwrap().unwrap();
    assert!(!duplicate.voided);
    assert_eq!(duplicate.void_reason, None);
    assert!(w.store.merge_logs_for(&w.preferred.id).unwrap().is_empty());
}
