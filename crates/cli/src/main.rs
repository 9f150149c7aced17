use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use pmr_core::config::{creator_from_env_value, patient_data_dir_from_env_value};
use pmr_core::{Cohort, CoreConfig, NonEmptyText, PatientService, RecordId};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pmr")]
#[command(about = "PMR patient record system CLI")]
struct Cli {
    /// Patient data directory (overrides PMR_PATIENT_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Name recorded as creator (overrides PMR_CREATOR)
    #[arg(long, global = true)]
    creator: Option<String>,
    /// Print records as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List patients
    List {
        /// Include voided patients
        #[arg(long)]
        all: bool,
    },
    /// Register a patient
    Register {
        /// Family name
        family: String,
        /// Given names (comma-separated)
        #[arg(long, default_value = "")]
        given: String,
        /// Date of birth (YYYY-MM-DD)
        #[arg(long)]
        birth_date: Option<String>,
    },
    /// Record an encounter
    Encounter {
        /// Patient id
        patient: String,
        /// Encounter type
        encounter_type: String,
        /// Encounter time (RFC 3339, defaults to now)
        #[arg(long)]
        at: Option<String>,
    },
    /// Create a program
    Program {
        /// Program name
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List programs
    Programs {
        /// Include retired programs
        #[arg(long)]
        all: bool,
    },
    /// Enroll a patient in a program
    Enroll {
        /// Patient id
        patient: String,
        /// Program id
        program: String,
        /// Enrollment date (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },
    /// List enrollments for a cohort
    Enrollments {
        /// Patient ids (comma-separated)
        cohort: String,
        /// Restrict to these program ids
        #[arg(long = "program")]
        programs: Vec<String>,
    },
    /// Merge a duplicate patient into a preferred one
    Merge {
        /// Patient id to keep
        preferred: String,
        /// Patient id to merge and void
        duplicate: String,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("pmr=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("Use 'pmr --help' for commands");
        return Ok(());
    };

    let patient_data_dir = cli.data_dir.unwrap_or_else(|| {
        patient_data_dir_from_env_value(std::env::var("PMR_PATIENT_DATA_DIR").ok())
    });
    let creator = creator_from_env_value(cli.creator.or_else(|| std::env::var("PMR_CREATOR").ok()))
        .context("invalid creator")?;
    let cfg = Arc::new(CoreConfig::new(patient_data_dir, creator)?);
    tracing::debug!(dir = %cfg.patient_data_dir().display(), creator = %cfg.creator(), "config resolved");
    let service = PatientService::open(cfg)?;
    let json = cli.json;

    match command {
        Commands::List { all } => {
            let patients = service.list_patients(all)?;
            if json {
                print_json(&patients)?;
            } else if patients.is_empty() {
                println!("No patients found.");
            } else {
                for patient in patients {
                    let status = if patient.voided { " (voided)" } else { "" };
                    println!(
                        "ID: {}, Name: {}, Created: {}{}",
                        patient.id,
                        patient.display_name(),
                        patient.created_at,
                        status
                    );
                }
            }
        }
        Commands::Register {
            family,
            given,
            birth_date,
        } => {
            let given = given.split(',').map(|s| s.to_string()).collect();
            let birth_date = birth_date.as_deref().map(parse_date).transpose()?;
            let patient = service.register_patient(given, NonEmptyText::new(&family)?, birth_date)?;
            service.persist()?;
            if json {
                print_json(&patient)?;
            } else {
                println!("Registered patient with ID: {}", patient.id);
            }
        }
        Commands::Encounter {
            patient,
            encounter_type,
            at,
        } => {
            let at = match at {
                Some(at) => DateTime::parse_from_rfc3339(&at)
                    .with_context(|| format!("invalid encounter time: {at}"))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            let encounter = service.record_encounter(
                &RecordId::parse(&patient)?,
                NonEmptyText::new(&encounter_type)?,
                at,
            )?;
            service.persist()?;
            if json {
                print_json(&encounter)?;
            } else {
                println!("Recorded encounter with ID: {}", encounter.id);
            }
        }
        Commands::Program { name, description } => {
            let program = service.create_program(NonEmptyText::new(&name)?, description)?;
            service.persist()?;
            if json {
                print_json(&program)?;
            } else {
                println!("Created program with ID: {}", program.id);
            }
        }
        Commands::Programs { all } => {
            let programs = service.programs(all)?;
            if json {
                print_json(&programs)?;
            } else if programs.is_empty() {
                println!("No programs found.");
            } else {
                for program in programs {
                    let status = if program.retired { " (retired)" } else { "" };
                    println!("ID: {}, Name: {}{}", program.id, program.name, status);
                }
            }
        }
        Commands::Enroll {
            patient,
            program,
            date,
        } => {
            let date_enrolled = match date {
                Some(date) => parse_date(&date)?.and_time(NaiveTime::MIN).and_utc(),
                None => Utc::now(),
            };
            let enrollment = service.enroll(
                &RecordId::parse(&patient)?,
                &RecordId::parse(&program)?,
                date_enrolled,
            )?;
            service.persist()?;
            if json {
                print_json(&enrollment)?;
            } else {
                println!("Enrolled with ID: {}", enrollment.id);
            }
        }
        Commands::Enrollments { cohort, programs } => {
            let cohort = Cohort::parse(&cohort)?;
            if cohort.is_empty() {
                anyhow::bail!("cohort must list at least one patient id");
            }
            let enrollments = if programs.is_empty() {
                service.enrollments(&cohort, None)?
            } else {
                let wanted = programs
                    .iter()
                    .map(|p| RecordId::parse(p))
                    .collect::<Result<Vec<_>, _>>()?;
                let selected = service.programs_by_id(&wanted)?;
                service.enrollments(&cohort, Some(&selected))?
            };
            if json {
                print_json(&enrollments)?;
            } else if enrollments.is_empty() {
                println!("No enrollments found.");
            } else {
                for e in enrollments {
                    let program = e
                        .program
                        .as_ref()
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".into());
                    println!(
                        "ID: {}, Patient: {}, Program: {}, Enrolled: {}",
                        e.id, e.patient, program, e.date_enrolled
                    );
                }
            }
        }
        Commands::Merge {
            preferred,
            duplicate,
        } => {
            let preferred = RecordId::parse(&preferred)?;
            let duplicate = RecordId::parse(&duplicate)?;
            let outcome = service.merge_patients(&preferred, &duplicate);
            // Savepoints committed before a failure are kept, so persist either way.
            service.persist()?;
            let log = outcome.context("merge did not complete")?;
            if json {
                print_json(&log)?;
            } else {
                println!(
                    "Merged {} into {}: {} encounters, {} enrollments moved",
                    log.duplicate,
                    log.preferred,
                    log.moved_encounters.len(),
                    log.moved_enrollments.len()
                );
            }
        }
    }

    Ok(())
}

fn parse_date(value: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("invalid date (expected YYYY-MM-DD): {value}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
