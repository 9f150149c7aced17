//! Merging a duplicate patient record into a preferred one.
//!
//! The merge runs inside one top-level [`Transaction`] and opens a savepoint for each unit
//! of persistence:
//!
//! 1. all encounters of the duplicate are reassigned in one savepoint;
//! 2. each enrollment of the duplicate is reassigned and saved in its own savepoint;
//! 3. the duplicate is voided and a [`MergeLog`] recorded in a final savepoint.
//!
//! When a savepoint fails only its own writes are undone. The merge stops at that point, the
//! top-level transaction is committed with whatever earlier savepoints wrote, and the error is
//! returned. A merge that fails on its second enrollment therefore leaves the encounters and
//! the first enrollment with the preferred patient, and the duplicate unvoided.

use crate::constants::MERGE_VOID_REASON_PREFIX;
use crate::error::{PatientError, PatientResult};
use crate::records::{MergeLog, Patient};
use crate::repositories::{
    EncounterRepository, MergeLogRepository, PatientRepository, ProgramEnrollmentRepository,
};
use crate::transaction::Transaction;
use crate::NonEmptyText;
use chrono::Utc;
use pmr_uuid::RecordId;

/// Merges patient records over injected repositories.
pub struct MergeService<'r> {
    patients: &'r dyn PatientRepository,
    encounters: &'r dyn EncounterRepository,
    enrollments: &'r dyn ProgramEnrollmentRepository,
    merge_logs: &'r dyn MergeLogRepository,
    creator: NonEmptyText,
}

impl<'r> MergeService<'r> {
    pub fn new(
        patients: &'r dyn PatientRepository,
        encounters: &'r dyn EncounterRepository,
        enrollments: &'r dyn ProgramEnrollmentRepository,
        merge_logs: &'r dyn MergeLogRepository,
        creator: NonEmptyText,
    ) -> Self {
        Self {
            patients,
            encounters,
            enrollments,
            merge_logs,
            creator,
        }
    }

    /// Moves the duplicate's encounters and enrollments to the preferred patient, then voids
    /// the duplicate.
    ///
    /// # Errors
    ///
    /// Before anything is written:
    /// - [`PatientError::SamePatient`] if both ids are equal,
    /// - [`PatientError::PatientNotFound`] if either patient does not exist,
    /// - [`PatientError::PatientVoided`] if either patient is already voided.
    ///
    /// After writing has started, the first failing savepoint's error is returned, typically
    /// [`PatientError::Validation`] from an enrollment save. Savepoints committed before the
    /// failure stay committed.
    pub fn merge(&self, preferred: &RecordId, duplicate: &RecordId) -> PatientResult<MergeLog> {
        if preferred == duplicate {
            return Err(PatientError::SamePatient(preferred.clone()));
        }
        let preferred = self.require_active(preferred)?;
        let duplicate = self.require_active(duplicate)?;

        tracing::info!(
            preferred = %preferred.id,
            duplicate = %duplicate.id,
            "merging patients"
        );

        let mut tx = Transaction::begin("merge_patients");
        let outcome = self.merge_in(&mut tx, &preferred, duplicate);
        tx.commit()?;

        match &outcome {
            Ok(log) => tracing::info!(
                encounters = log.moved_encounters.len(),
                enrollments = log.moved_enrollments.len(),
                "merge complete"
            ),
            Err(e) => tracing::warn!("merge stopped; earlier steps remain committed: {}", e),
        }
        outcome
    }

    fn merge_in(
        &self,
        tx: &mut Transaction<'_>,
        preferred: &Patient,
        mut duplicate: Patient,
    ) -> PatientResult<MergeLog> {
        let moved_encounters = tx.savepoint("reassign_encounters", |tx| {
            self.encounters
                .reassign_encounters(tx, &duplicate.id, &preferred.id)
        })?;

        let mut moved_enrollments = Vec::new();
        for mut enrollment in self.enrollments.enrollments_by_patient(&duplicate.id)? {
            enrollment.patient = preferred.id.clone();
            let saved = tx.savepoint("save_enrollment", |tx| {
                self.enrollments.save_enrollment(tx, enrollment)
            })?;
            moved_enrollments.push(saved.id);
        }

        tx.savepoint("void_duplicate", |tx| {
            duplicate.void(format!("{} {}", MERGE_VOID_REASON_PREFIX, preferred.id));
            self.patients.save_patient(tx, duplicate.clone())?;

            self.merge_logs.save_merge_log(
                tx,
                MergeLog {
                    id: RecordId::new(),
                    preferred: preferred.id.clone(),
                    duplicate: duplicate.id.clone(),
                    moved_encounters,
                    moved_enrollments,
                    merged_at: Utc::now(),
                    creator: self.creator.clone(),
                },
            )
        })
    }

    fn require_active(&self, id: &RecordId) -> PatientResult<Patient> {
        let patient = self
            .patients
            .get_patient(id)?
            .ok_or_else(|| PatientError::PatientNotFound(id.clone()))?;
        if patient.voided {
            return Err(PatientError::PatientVoided(id.clone()));
        }
        Ok(patient)
    }
}
