//! Record types held by the patient store.
//!
//! These are plain data: ownership rules (an encounter belongs to exactly one patient, an
//! enrollment must reference a program) are enforced by the repositories and by
//! [`crate::validation`], not by the types themselves. `ProgramEnrollment::program` is an
//! `Option` precisely so that an unset reference can exist in memory and be rejected on save.

use crate::NonEmptyText;
use chrono::{DateTime, NaiveDate, Utc};
use pmr_uuid::RecordId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Looks up the primary key of a stored record.
pub trait Keyed {
    fn id(&self) -> &RecordId;
}

/// A patient record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: RecordId,
    #[serde(default)]
    pub given: Vec<String>,
    pub family: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub voided: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub void_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_voided: Option<DateTime<Utc>>,
}

impl Patient {
    pub fn new(given: Vec<String>, family: NonEmptyText, birth_date: Option<NaiveDate>) -> Self {
        Self {
            id: RecordId::new(),
            given,
            family,
            birth_date,
            created_at: Utc::now(),
            voided: false,
            void_reason: None,
            date_voided: None,
        }
    }

    /// "Given Family", or just the family name when no given names are recorded.
    pub fn display_name(&self) -> String {
        if self.given.is_empty() {
            self.family.to_string()
        } else {
            format!("{} {}", self.given.join(" "), self.family)
        }
    }

    /// Marks the patient as voided. The record stays in the store but drops out of queries.
    pub fn void(&mut self, reason: impl Into<String>) {
        self.voided = true;
        self.void_reason = Some(reason.into());
        self.date_voided = Some(Utc::now());
    }
}

/// A clinical encounter. Belongs to exactly one patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: RecordId,
    pub patient: RecordId,
    pub encounter_type: NonEmptyText,
    pub encounter_datetime: DateTime<Utc>,
    #[serde(default)]
    pub voided: bool,
}

impl Encounter {
    pub fn new(
        patient: RecordId,
        encounter_type: NonEmptyText,
        encounter_datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RecordId::new(),
            patient,
            encounter_type,
            encounter_datetime,
            voided: false,
        }
    }
}

/// A clinical program a patient can be enrolled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: RecordId,
    pub name: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub retired: bool,
}

impl Program {
    pub fn new(name: NonEmptyText, description: Option<String>) -> Self {
        Self {
            id: RecordId::new(),
            name,
            description,
            retired: false,
        }
    }
}

/// Links a patient to a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEnrollment {
    pub id: RecordId,
    pub patient: RecordId,
    pub program: Option<RecordId>,
    pub date_enrolled: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_completed: Option<DateTime<Utc>>,
    pub creator: NonEmptyText,
    #[serde(default)]
    pub voided: bool,
}

impl ProgramEnrollment {
    pub fn new(
        patient: RecordId,
        program: RecordId,
        date_enrolled: DateTime<Utc>,
        creator: NonEmptyText,
    ) -> Self {
        Self {
            id: RecordId::new(),
            patient,
            program: Some(program),
            date_enrolled,
            date_completed: None,
            creator,
            voided: false,
        }
    }
}

/// Audit record of a completed merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeLog {
    pub id: RecordId,
    pub preferred: RecordId,
    pub duplicate: RecordId,
    #[serde(default)]
    pub moved_encounters: Vec<RecordId>,
    #[serde(default)]
    pub moved_enrollments: Vec<RecordId>,
    pub merged_at: DateTime<Utc>,
    pub creator: NonEmptyText,
}

/// A set of patient ids used to scope queries. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cohort {
    members: BTreeSet<RecordId>,
}

impl Cohort {
    pub fn new(members: impl IntoIterator<Item = RecordId>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }

    /// Parses a comma-separated list of canonical ids. Blank entries are ignored.
    pub fn parse(list: &str) -> Result<Self, pmr_uuid::UuidError> {
        let members = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(RecordId::parse)
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self { members })
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

macro_rules! impl_keyed {
    ($($ty:ty),* $(,)?) => {
        $(impl Keyed for $ty {
            fn id(&self) -> &RecordId {
                &self.id
            }
        })*
    };
}

impl_keyed!(Patient, Encounter, Program, ProgramEnrollment, MergeLog);
