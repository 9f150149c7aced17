//! YAML snapshot of the record store.
//!
//! The in-memory tables are written to the configured patient data directory so that the CLI
//! can carry state between invocations.
//!
//! ## Storage Layout
//!
//! ```text
//! <patient_data_dir>/
//!   programs.yaml
//!   merge_log.yaml
//!   patients/
//!     <s1>/
//!       <s2>/
//!         <id>/
//!           patient.yaml
//!           encounters.yaml
//!           enrollments.yaml
//! ```
//!
//! where `s1` and `s2` are the first four hex characters of the patient id. Encounters and
//! enrollments live in their owner's folder, so a merge shows up on disk as rows moving from
//! one patient folder to another.
//!
//! Saving stages a complete new `patients/` tree and swaps it in only after every file is
//! written. Loading skips (with a warning) any patient
//! folder that cannot be read or parsed, rather than refusing to start.

use crate::config::CoreConfig;
use crate::constants::{
    ENCOUNTERS_FILENAME, ENROLLMENTS_FILENAME, PATIENTS_RETIRED_DIR_NAME,
    PATIENTS_STAGING_DIR_NAME, PATIENT_FILENAME,
};
use crate::error::{PatientError, PatientResult};
use crate::records::{Encounter, Patient, ProgramEnrollment};
use crate::repositories::memory::{RecordStore, Tables};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes the current contents of `store` under `cfg.patient_data_dir()`.
///
/// The patient tree is staged next to `patients/` and only swapped in once every file has been
/// written, so a failed save leaves the previous snapshot loadable.
///
/// Encounters or enrollments whose owner is not in the patient table have nowhere to live in
/// this layout; they are dropped with a warning.
///
/// # Errors
///
/// Returns `PatientError` if a directory cannot be created, removed or swapped, or a file cannot
/// be serialised or written.
pub fn save_snapshot(store: &RecordStore, cfg: &CoreConfig) -> PatientResult<()> {
    let tables = store.tables()?;

    let data_dir = cfg.patient_data_dir();
    fs::create_dir_all(data_dir).map_err(PatientError::StorageDirCreation)?;

    let staging = data_dir.join(PATIENTS_STAGING_DIR_NAME);
    if staging.exists() {
        tracing::warn!("removing leftover staging directory {}", staging.display());
        fs::remove_dir_all(&staging).map_err(PatientError::StorageDirRemoval)?;
    }

    if let Err(e) = write_snapshot_files(&tables, cfg, &staging) {
        if staging.exists() {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::error!(
                    "failed to remove staging directory {}: {}",
                    staging.display(),
                    cleanup
                );
            }
        }
        return Err(e);
    }

    swap_in(&staging, &cfg.patients_dir(), &data_dir.join(PATIENTS_RETIRED_DIR_NAME))?;

    let known: HashSet<_> = tables.patients.iter().map(|p| &p.id).collect();
    let orphan_encounters = tables
        .encounters
        .iter()
        .filter(|e| !known.contains(&e.patient))
        .count();
    let orphan_enrollments = tables
        .enrollments
        .iter()
        .filter(|e| !known.contains(&e.patient))
        .count();
    if orphan_encounters + orphan_enrollments > 0 {
        tracing::warn!(
            orphan_encounters,
            orphan_enrollments,
            "dropped rows owned by unknown patients while saving snapshot"
        );
    }

    tracing::info!(
        patients = tables.patients.len(),
        dir = %data_dir.display(),
        "snapshot saved"
    );
    Ok(())
}

/// Writes the patient tree into `staging`, then the catalogue files.
fn write_snapshot_files(tables: &Tables, cfg: &CoreConfig, staging: &Path) -> PatientResult<()> {
    fs::create_dir_all(staging).map_err(PatientError::StorageDirCreation)?;

    for patient in &tables.patients {
        let dir = patient.id.sharded_dir(staging);
        fs::create_dir_all(&dir).map_err(PatientError::StorageDirCreation)?;

        let encounters: Vec<&Encounter> = tables
            .encounters
            .iter()
            .filter(|e| e.patient == patient.id)
            .collect();
        let enrollments: Vec<&ProgramEnrollment> = tables
            .enrollments
            .iter()
            .filter(|e| e.patient == patient.id)
            .collect();

        write_yaml(&dir.join(PATIENT_FILENAME), patient)?;
        write_yaml(&dir.join(ENCOUNTERS_FILENAME), &encounters)?;
        write_yaml(&dir.join(ENROLLMENTS_FILENAME), &enrollments)?;
    }

    write_yaml_replacing(&cfg.programs_file(), &tables.programs)?;
    write_yaml_replacing(&cfg.merge_log_file(), &tables.merge_logs)
}

/// Replaces `live` with `staging`, keeping the old tree at `retired` until the swap succeeds.
fn swap_in(staging: &Path, live: &Path, retired: &Path) -> PatientResult<()> {
    if retired.exists() {
        fs::remove_dir_all(retired).map_err(PatientError::StorageDirRemoval)?;
    }

    let had_live = live.exists();
    if had_live {
        fs::rename(live, retired).map_err(PatientError::StorageDirRename)?;
    }

    if let Err(e) = fs::rename(staging, live) {
        if had_live {
            if let Err(restore) = fs::rename(retired, live) {
                tracing::error!(
                    "failed to restore {} after aborted swap: {}",
                    live.display(),
                    restore
                );
            }
        }
        return Err(PatientError::StorageDirRename(e));
    }

    if had_live {
        if let Err(e) = fs::remove_dir_all(retired) {
            tracing::warn!("failed to remove {}: {}", retired.display(), e);
        }
    }
    Ok(())
}

/// Reads a snapshot from `cfg.patient_data_dir()` into a new store.
///
/// A missing directory yields an empty store. Rows are loaded as stored; they are not
/// re-validated, so a previously accepted enrollment whose program was later removed from the
/// catalogue is still loaded and will fail validation if it is saved again.
///
/// # Errors
///
/// Returns `PatientError` if `programs.yaml` or `merge_log.yaml` exists but cannot be read or
/// parsed. Problems inside individual patient folders are logged and skipped.
pub fn load_snapshot(cfg: &CoreConfig) -> PatientResult<RecordStore> {
    let mut tables = Tables {
        programs: read_yaml_or_default(&cfg.programs_file())?,
        merge_logs: read_yaml_or_default(&cfg.merge_log_file())?,
        ..Tables::default()
    };

    // A save interrupted mid-swap leaves only the retired tree behind.
    let mut patients_dir = cfg.patients_dir();
    let retired = cfg.patient_data_dir().join(PATIENTS_RETIRED_DIR_NAME);
    if !patients_dir.exists() && retired.is_dir() {
        tracing::warn!(
            "{} is missing; loading patients from {}",
            patients_dir.display(),
            retired.display()
        );
        patients_dir = retired;
    }

    let mut loaded = Vec::new();
    for patient_dir in sharded_record_dirs(&patients_dir) {
        match load_patient_dir(&patient_dir) {
            Ok(record) => loaded.push(record),
            Err(e) => {
                tracing::warn!(
                    "skipping patient directory {}: {}",
                    patient_dir.display(),
                    e
                );
            }
        }
    }

    // Directory walk order is filesystem dependent.
    loaded.sort_by(|a, b| (a.0.created_at, &a.0.id).cmp(&(b.0.created_at, &b.0.id)));

    for (patient, encounters, enrollments) in loaded {
        tables.patients.push(patient);
        tables.encounters.extend(encounters);
        tables.enrollments.extend(enrollments);
    }

    tracing::info!(
        patients = tables.patients.len(),
        programs = tables.programs.len(),
        dir = %cfg.patient_data_dir().display(),
        "snapshot loaded"
    );
    Ok(RecordStore::from_tables(tables))
}

type PatientRows = (Patient, Vec<Encounter>, Vec<ProgramEnrollment>);

fn load_patient_dir(dir: &Path) -> PatientResult<PatientRows> {
    let patient_path = dir.join(PATIENT_FILENAME);
    let patient: Patient = read_yaml(&patient_path)?;

    let dir_name = dir.file_name().and_then(|os| os.to_str()).unwrap_or("");
    if patient.id.to_string() != dir_name {
        return Err(PatientError::InvalidInput(format!(
            "patient id {} does not match its directory",
            patient.id
        )));
    }

    let mut encounters: Vec<Encounter> = read_yaml_or_default(&dir.join(ENCOUNTERS_FILENAME))?;
    let mut enrollments: Vec<ProgramEnrollment> =
        read_yaml_or_default(&dir.join(ENROLLMENTS_FILENAME))?;

    let before = encounters.len() + enrollments.len();
    encounters.retain(|e| e.patient == patient.id);
    enrollments.retain(|e| e.patient == patient.id);
    let misplaced = before - encounters.len() - enrollments.len();
    if misplaced > 0 {
        tracing::warn!(
            misplaced,
            "ignoring rows filed under patient {} that belong to another patient",
            patient.id
        );
    }

    Ok((patient, encounters, enrollments))
}

/// Lists `<base>/<s1>/<s2>/<id>/` directories. A missing base yields nothing; unreadable
/// shard folders are skipped with a warning.
fn sharded_record_dirs(base: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    let s1_iter = match fs::read_dir(base) {
        Ok(it) => it,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("cannot read {}: {}", base.display(), e);
            }
            return dirs;
        }
    };
    for s1 in s1_iter.flatten() {
        let s1_path = s1.path();
        if !s1_path.is_dir() {
            continue;
        }

        let s2_iter = match fs::read_dir(&s1_path) {
            Ok(it) => it,
            Err(e) => {
                tracing::warn!("skipping shard {}: {}", s1_path.display(), e);
                continue;
            }
        };
        for s2 in s2_iter.flatten() {
            let s2_path = s2.path();
            if !s2_path.is_dir() {
                continue;
            }

            let id_iter = match fs::read_dir(&s2_path) {
                Ok(it) => it,
                Err(e) => {
                    tracing::warn!("skipping shard {}: {}", s2_path.display(), e);
                    continue;
                }
            };
            for id_ent in id_iter.flatten() {
                let id_path = id_ent.path();
                if id_path.is_dir() {
                    dirs.push(id_path);
                }
            }
        }
    }

    dirs
}

fn write_yaml<T: Serialize + ?Sized>(path: &Path, value: &T) -> PatientResult<()> {
    let yaml = serde_yaml::to_string(value).map_err(PatientError::YamlSerialization)?;
    fs::write(path, yaml).map_err(PatientError::FileWrite)
}

/// Writes `value` beside `path` and renames it into place, so a failed write never truncates
/// the existing file.
fn write_yaml_replacing<T: Serialize + ?Sized>(path: &Path, value: &T) -> PatientResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    write_yaml(&tmp, value)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PatientError::FileWrite(e)
    })
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> PatientResult<T> {
    let contents = fs::read_to_string(path).map_err(PatientError::FileRead)?;
    serde_yaml::from_str(&contents).map_err(|source| PatientError::YamlDeserialization {
        path: path.to_path_buf(),
        source,
    })
}

fn read_yaml_or_default<T: DeserializeOwned + Default>(path: &Path) -> PatientResult<T> {
    if !path.is_file() {
        return Ok(T::default());
    }
    read_yaml(path)
}
