//! Patient service.
//!
//! Facade over the record store used by the CLI. Every mutating call runs in its own
//! top-level [`Transaction`]; the merge is delegated to [`MergeService`].

use crate::config::CoreConfig;
use crate::error::{PatientError, PatientResult};
use crate::merge::MergeService;
use crate::records::{Cohort, Encounter, MergeLog, Patient, Program, ProgramEnrollment};
use crate::repositories::memory::RecordStore;
use crate::repositories::snapshot::{load_snapshot, save_snapshot};
use crate::repositories::{
    EncounterRepository, MergeLogRepository, PatientRepository, ProgramEnrollmentRepository,
    ProgramRepository,
};
use crate::transaction::Transaction;
use crate::NonEmptyText;
use chrono::{DateTime, NaiveDate, Utc};
use pmr_uuid::RecordId;
use std::sync::Arc;

/// Pure patient data operations - no API concerns
#[derive(Clone, Debug)]
pub struct PatientService {
    cfg: Arc<CoreConfig>,
    store: RecordStore,
}

impl PatientService {
    /// Creates a service over an empty in-memory store.
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self {
            cfg,
            store: RecordStore::new(),
        }
    }

    /// Creates a service over the snapshot stored in `cfg.patient_data_dir()`.
    pub fn open(cfg: Arc<CoreConfig>) -> PatientResult<Self> {
        let store = load_snapshot(&cfg)?;
        Ok(Self { cfg, store })
    }

    /// Writes the current state back to `cfg.patient_data_dir()`.
    pub fn persist(&self) -> PatientResult<()> {
        save_snapshot(&self.store, &self.cfg)
    }

    pub fn register_patient(
        &self,
        given: Vec<String>,
        family: NonEmptyText,
        birth_date: Option<NaiveDate>,
    ) -> PatientResult<Patient> {
        let given = given
            .into_iter()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();

        let mut tx = Transaction::begin("register_patient");
        let patient = self
            .store
            .save_patient(&mut tx, Patient::new(given, family, birth_date))?;
        tx.commit()?;
        Ok(patient)
    }

    pub fn record_encounter(
        &self,
        patient: &RecordId,
        encounter_type: NonEmptyText,
        at: DateTime<Utc>,
    ) -> PatientResult<Encounter> {
        self.require_patient(patient)?;

        let mut tx = Transaction::begin("record_encounter");
        let encounter = self
            .store
            .save_encounter(&mut tx, Encounter::new(patient.clone(), encounter_type, at))?;
        tx.commit()?;
        Ok(encounter)
    }

    pub fn create_program(
        &self,
        name: NonEmptyText,
        description: Option<String>,
    ) -> PatientResult<Program> {
        let exists = self
            .store
            .all_programs(true)?
            .iter()
            .any(|p| p.name.as_str().eq_ignore_ascii_case(name.as_str()));
        if exists {
            return Err(PatientError::InvalidInput(format!(
                "a program named '{}' already exists",
                name
            )));
        }

        let mut tx = Transaction::begin("create_program");
        let program = self
            .store
            .save_program(&mut tx, Program::new(name, description))?;
        tx.commit()?;
        Ok(program)
    }

    pub fn enroll(
        &self,
        patient: &RecordId,
        program: &RecordId,
        date_enrolled: DateTime<Utc>,
    ) -> PatientResult<ProgramEnrollment> {
        self.require_patient(patient)?;
        if self.store.get_program(program)?.is_none() {
            return Err(PatientError::ProgramNotFound(program.clone()));
        }

        let enrollment = ProgramEnrollment::new(
            patient.clone(),
            program.clone(),
            date_enrolled,
            self.cfg.creator().clone(),
        );

        let mut tx = Transaction::begin("enroll_patient");
        let enrollment = self.store.save_enrollment(&mut tx, enrollment)?;
        tx.commit()?;
        Ok(enrollment)
    }

    pub fn list_patients(&self, include_voided: bool) -> PatientResult<Vec<Patient>> {
        self.store.list_patients(include_voided)
    }

    pub fn encounters(&self, patient: &RecordId) -> PatientResult<Vec<Encounter>> {
        self.store.encounters_by_patient(patient)
    }

    pub fn programs(&self, include_retired: bool) -> PatientResult<Vec<Program>> {
        self.store.all_programs(include_retired)
    }

    /// Looks up each of `ids`, retired programs included, in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`PatientError::ProgramNotFound`] for the first id with no matching program.
    pub fn programs_by_id(&self, ids: &[RecordId]) -> PatientResult<Vec<Program>> {
        ids.iter()
            .map(|id| {
                self.store
                    .get_program(id)?
                    .ok_or_else(|| PatientError::ProgramNotFound(id.clone()))
            })
            .collect()
    }

    /// Enrollments of cohort members in `programs`, or in every program when `programs` is
    /// `None`.
    pub fn enrollments(
        &self,
        cohort: &Cohort,
        programs: Option<&[Program]>,
    ) -> PatientResult<Vec<ProgramEnrollment>> {
        match programs {
            Some(programs) => self.store.enrollments_for_cohort(cohort, programs),
            None => {
                let all = self.store.all_programs(true)?;
                self.store.enrollments_for_cohort(cohort, &all)
            }
        }
    }

    pub fn merge_logs(&self, preferred: &RecordId) -> PatientResult<Vec<MergeLog>> {
        self.store.merge_logs_for(preferred)
    }

    /// Merges `duplicate` into `preferred`. See [`MergeService::merge`] for partial-failure
    /// behaviour.
    pub fn merge_patients(
        &self,
        preferred: &RecordId,
        duplicate: &RecordId,
    ) -> PatientResult<MergeLog> {
        MergeService::new(
            &self.store,
            &self.store,
            &self.store,
            &self.store,
            self.cfg.creator().clone(),
        )
        .merge(preferred, duplicate)
    }

    fn require_patient(&self, id: &RecordId) -> PatientResult<Patient> {
        self.store
            .get_patient(id)?
            .ok_or_else(|| PatientError::PatientNotFound(id.clone()))
    }
}
