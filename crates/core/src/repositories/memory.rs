//! In-memory record store.
//!
//! `RecordStore` implements every repository trait over a shared set of tables. Writes are
//! applied immediately and journalled on the caller's [`Transaction`]; the undo action
//! restores the previous row, or removes the row when the write was an insert.
//!
//! Rows are kept in insertion order so that per-patient listings (and therefore the order in
//! which a merge saves enrollments) are deterministic.

use crate::error::{PatientError, PatientResult};
use crate::records::{
    Cohort, Encounter, Keyed, MergeLog, Patient, Program, ProgramEnrollment,
};
use crate::repositories::{
    EncounterRepository, MergeLogRepository, PatientRepository, ProgramEnrollmentRepository,
    ProgramRepository,
};
use crate::transaction::Transaction;
use crate::validation::validate_enrollment;
use chrono::Utc;
use pmr_uuid::RecordId;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Raw table contents. Also the unit the snapshot module reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    pub patients: Vec<Patient>,
    pub encounters: Vec<Encounter>,
    pub programs: Vec<Program>,
    pub enrollments: Vec<ProgramEnrollment>,
    pub merge_logs: Vec<MergeLog>,
}

type TableSelector<T> = fn(&mut Tables) -> &mut Vec<T>;

fn patients(t: &mut Tables) -> &mut Vec<Patient> {
    &mut t.patients
}

fn encounters(t: &mut Tables) -> &mut Vec<Encounter> {
    &mut t.encounters
}

fn programs(t: &mut Tables) -> &mut Vec<Program> {
    &mut t.programs
}

fn enrollments(t: &mut Tables) -> &mut Vec<ProgramEnrollment> {
    &mut t.enrollments
}

fn merge_logs(t: &mut Tables) -> &mut Vec<MergeLog> {
    &mut t.merge_logs
}

/// Shared handle to the in-memory tables. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    tables: Arc<RwLock<Tables>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps tables produced elsewhere (for example by the snapshot loader).
    ///
    /// Rows are taken as-is; nothing is validated.
    pub fn from_tables(tables: Tables) -> Self {
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Copies the current table contents.
    pub fn tables(&self) -> PatientResult<Tables> {
        Ok(self.read()?.clone())
    }

    fn read(&self) -> PatientResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| PatientError::StorePoisoned)
    }

    fn write(&self) -> PatientResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| PatientError::StorePoisoned)
    }

    /// Inserts or replaces `record` by id and journals the inverse on `tx`.
    fn upsert<T>(
        &self,
        tx: &mut Transaction<'_>,
        table: TableSelector<T>,
        record: T,
    ) -> PatientResult<T>
    where
        T: Keyed + Clone + Send + 'static,
    {
        let previous = {
            let mut guard = self.write()?;
            let rows = table(&mut *guard);
            match rows.iter().position(|r| r.id() == record.id()) {
                Some(pos) => Some(std::mem::replace(&mut rows[pos], record.clone())),
                None => {
                    rows.push(record.clone());
                    None
                }
            }
        };

        let tables = Arc::clone(&self.tables);
        let id = record.id().clone();
        tx.record_undo(move || {
            let mut guard = tables.write().map_err(|_| PatientError::StorePoisoned)?;
            let rows = table(&mut *guard);
            let pos = rows.iter().position(|r| r.id() == &id);
            match (previous, pos) {
                (Some(old), Some(pos)) => rows[pos] = old,
                (None, Some(pos)) => {
                    rows.remove(pos);
                }
                (Some(old), None) => rows.push(old),
                (None, None) => {}
            }
            Ok(())
        });

        Ok(record)
    }

    fn find<T, F>(&self, select: F, id: &RecordId) -> PatientResult<Option<T>>
    where
        T: Keyed + Clone,
        F: Fn(&Tables) -> &Vec<T>,
    {
        let guard = self.read()?;
        Ok(select(&*guard).iter().find(|r| r.id() == id).cloned())
    }
}

impl PatientRepository for RecordStore {
    fn get_patient(&self, id: &RecordId) -> PatientResult<Option<Patient>> {
        self.find(|t| &t.patients, id)
    }

    fn list_patients(&self, include_voided: bool) -> PatientResult<Vec<Patient>> {
        let guard = self.read()?;
        Ok(guard
            .patients
            .iter()
            .filter(|p| include_voided || !p.voided)
            .cloned()
            .collect())
    }

    fn save_patient(&self, tx: &mut Transaction<'_>, patient: Patient) -> PatientResult<Patient> {
        self.upsert(tx, patients, patient)
    }
}

impl EncounterRepository for RecordStore {
    fn get_encounter(&self, id: &RecordId) -> PatientResult<Option<Encounter>> {
        self.find(|t| &t.encounters, id)
    }

    fn encounters_by_patient(&self, patient: &RecordId) -> PatientResult<Vec<Encounter>> {
        let guard = self.read()?;
        Ok(guard
            .encounters
            .iter()
            .filter(|e| !e.voided && &e.patient == patient)
            .cloned()
            .collect())
    }

    fn save_encounter(
        &self,
        tx: &mut Transaction<'_>,
        encounter: Encounter,
    ) -> PatientResult<Encounter> {
        if self.get_patient(&encounter.patient)?.is_none() {
            return Err(PatientError::PatientNotFound(encounter.patient));
        }
        self.upsert(tx, encounters, encounter)
    }
}

impl ProgramRepository for RecordStore {
    fn get_program(&self, id: &RecordId) -> PatientResult<Option<Program>> {
        self.find(|t| &t.programs, id)
    }

    fn all_programs(&self, include_retired: bool) -> PatientResult<Vec<Program>> {
        let guard = self.read()?;
        Ok(guard
            .programs
            .iter()
            .filter(|p| include_retired || !p.retired)
            .cloned()
            .collect())
    }

    fn save_program(&self, tx: &mut Transaction<'_>, program: Program) -> PatientResult<Program> {
        self.upsert(tx, programs, program)
    }
}

impl ProgramEnrollmentRepository for RecordStore {
    fn enrollments_by_patient(
        &self,
        patient: &RecordId,
    ) -> PatientResult<Vec<ProgramEnrollment>> {
        let guard = self.read()?;
        Ok(guard
            .enrollments
            .iter()
            .filter(|e| !e.voided && &e.patient == patient)
            .cloned()
            .collect())
    }

    fn enrollments_for_cohort(
        &self,
        cohort: &Cohort,
        programs: &[Program],
    ) -> PatientResult<Vec<ProgramEnrollment>> {
        let guard = self.read()?;
        Ok(guard
            .enrollments
            .iter()
            .filter(|e| !e.voided && cohort.contains(&e.patient))
            .filter(|e| match &e.program {
                Some(program) => programs.iter().any(|p| &p.id == program),
                None => false,
            })
            .cloned()
            .collect())
    }

    fn save_enrollment(
        &self,
        tx: &mut Transaction<'_>,
        enrollment: ProgramEnrollment,
    ) -> PatientResult<ProgramEnrollment> {
        validate_enrollment(&enrollment, self, Utc::now())?;
        if self.get_patient(&enrollment.patient)?.is_none() {
            return Err(PatientError::PatientNotFound(enrollment.patient));
        }
        self.upsert(tx, enrollments, enrollment)
    }
}

impl MergeLogRepository for RecordStore {
    fn save_merge_log(&self, tx: &mut Transaction<'_>, log: MergeLog) -> PatientResult<MergeLog> {
        self.upsert(tx, merge_logs, log)
    }

    fn merge_logs_for(&self, preferred: &RecordId) -> PatientResult<Vec<MergeLog>> {
        let guard = self.read()?;
        Ok(guard
            .merge_logs
            .iter()
            .filter(|l| &l.preferred == preferred)
            .cloned()
            .collect())
    }
}
