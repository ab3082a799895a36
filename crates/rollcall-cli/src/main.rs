use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use rollcall_core::ledger::TIMESTAMP_FORMAT;
use rollcall_core::{AddOutcome, AttendanceLedger, HistoryLookup, MarkOutcome, RegistryStore, Roster};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance administration")]
struct Cli {
    /// Directory holding faces.db, students.csv and the attendance ledger
    #[arg(long, env = "ROLLCALL_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every attendance record
    Attendance,
    /// Attendance history for one identity (exact or substring match)
    History { query: String },
    /// List the roster
    Students,
    /// Add a student to the roster
    AddStudent {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
    },
    /// List enrolled identities and their embedding counts
    Identities,
    /// Mark attendance for an identity by hand
    Mark {
        identity: String,
        /// Timestamp as "YYYY-MM-DD HH:MM:SS" (default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// List V4L2 capture devices
    Devices,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::debug!(error = ?e, "command failed");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let json = cli.json;
    tracing::debug!(data_dir = %data_dir.display(), json, "rollcall cli");

    match cli.command {
        Commands::Attendance => {
            let ledger = open_ledger(&data_dir)?;
            let records = ledger.records()?;
            if json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("No attendance records in {}", ledger.path().display());
            } else {
                for r in &records {
                    println!("{}  {}", r.timestamp, r.identity);
                }
                println!("{} record(s), format: {}", records.len(), ledger.format());
            }
        }
        Commands::History { query } => {
            let lookup = open_ledger(&data_dir)?.history(&query)?;
            if json {
                print_json(&lookup)?;
            } else {
                print_history(&query, &lookup);
            }
        }
        Commands::Students => {
            let students = open_roster(&data_dir)?.list()?;
            if json {
                print_json(&students)?;
            } else if students.is_empty() {
                println!("Roster is empty");
            } else {
                for s in &students {
                    println!("{:<12} {}", s.student_id, s.name);
                }
            }
        }
        Commands::AddStudent { id, name } => match open_roster(&data_dir)?.add(&id, &name)? {
            AddOutcome::Added(s) => println!("Added {} ({})", s.name, s.student_id),
            AddOutcome::AlreadyPresent(s) => {
                println!("Student id {} already on the roster as {}", s.student_id, s.name)
            }
        },
        Commands::Identities => {
            let path = data_dir.join("faces.db");
            let registry = RegistryStore::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?
                .load()?;
            if json {
                let rows: Vec<_> = registry
                    .records()
                    .iter()
                    .map(|r| serde_json::json!({ "identity": r.key, "encodings": r.embeddings.len() }))
                    .collect();
                print_json(&rows)?;
            } else if registry.records().is_empty() {
                println!("No identities enrolled");
            } else {
                for r in registry.records() {
                    println!("{:<32} {} encoding(s)", r.key, r.embeddings.len());
                }
            }
        }
        Commands::Mark { identity, at } => {
            let at = match at {
                Some(raw) => NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
                    .with_context(|| format!("timestamp must look like 2024-09-03 08:15:00, got {raw:?}"))?,
                None => Local::now().naive_local(),
            };
            match open_ledger(&data_dir)?.mark(&identity, at)? {
                MarkOutcome::Created(r) => println!("Marked {} at {}", r.identity, r.timestamp),
                MarkOutcome::Duplicate(r) => {
                    println!("{} already marked that day (at {})", r.identity, r.timestamp)
                }
            }
        }
        Commands::Devices => list_devices(json)?,
    }
    Ok(())
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn open_ledger(data_dir: &std::path::Path) -> Result<AttendanceLedger> {
    let ledger = AttendanceLedger::open(data_dir)
        .with_context(|| format!("failed to open ledger in {}", data_dir.display()))?;
    tracing::debug!(path = %ledger.path().display(), format = %ledger.format(), "using ledger");
    Ok(ledger)
}

fn open_roster(data_dir: &std::path::Path) -> Result<Roster> {
    let path = data_dir.join("students.csv");
    tracing::debug!(path = %path.display(), "using roster");
    Roster::open(&path).with_context(|| format!("failed to open roster {}", path.display()))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_history(query: &str, lookup: &HistoryLookup) {
    match lookup {
        HistoryLookup::Found(h) => {
            println!("{} record(s) for {}", h.total, h.identities.join(", "));
            for (day, count) in &h.date_counts {
                println!("  {day}  {count}");
            }
            println!("(columns: {} / {})", h.identity_column, h.timestamp_column);
        }
        HistoryLookup::NotFound {
            column,
            sample_values,
        } => {
            println!("No records match {query:?} in column {column:?}");
            if !sample_values.is_empty() {
                println!("Known values include: {}", sample_values.join(", "));
            }
        }
        HistoryLookup::Empty => println!("The ledger has no records"),
    }
}

#[cfg(feature = "v4l2")]
fn list_devices(json: bool) -> Result<()> {
    let devices = rollcall_hw::Camera::list_devices();
    tracing::debug!(count = devices.len(), "enumerated capture devices");
    if json {
        let rows: Vec<_> = devices
            .iter()
            .map(|d| serde_json::json!({ "path": d.path, "name": d.name, "driver": d.driver, "bus": d.bus }))
            .collect();
        return print_json(&rows);
    }
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

#[cfg(not(feature = "v4l2"))]
fn list_devices(_json: bool) -> Result<()> {
    anyhow::bail!("built without v4l2 support")
}
