use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use rollcall_core::{Embedding, EventKind};
use rollcall_store::{Database, LogRow};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance administration CLI")]
struct Cli {
    /// Database file (default: $ROLLCALL_DB_PATH or ~/.local/share/rollcall/employees.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print list, show and logs output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and tables if missing
    Init,
    /// Register an employee from per-photo embeddings
    Enroll {
        /// Institute id (unique)
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// JSON file holding an array of embeddings, one per sample photo
        #[arg(long)]
        samples: PathBuf,
        /// Profile photo stored alongside the record
        #[arg(long)]
        photo: Option<PathBuf>,
    },
    /// List registered employees
    List,
    /// Show attendance details for one employee
    Show {
        /// Institute id
        id: String,
    },
    /// Show entry/exit logs
    Logs {
        /// Only this kind (entry or exit)
        #[arg(long)]
        kind: Option<EventKind>,
        /// Only this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Most recent N rows per kind when no date is given
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Add a log row by hand
    Log {
        /// Institute id
        id: String,
        #[arg(long)]
        kind: EventKind,
        /// Event time, "YYYY-MM-DD HH:MM:SS" (default: now)
        #[arg(long, value_parser = parse_datetime)]
        at: Option<NaiveDateTime>,
    },
    /// Delete one log row
    DeleteLog {
        #[arg(long)]
        kind: EventKind,
        #[arg(long)]
        log_id: i64,
    },
    /// Remove an employee and all of their logs
    Remove {
        /// Institute id
        id: String,
    },
    /// Discard embedding drift: restore the registration embedding
    ResetDrift {
        /// Institute id
        id: String,
    },
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| format!("expected \"YYYY-MM-DD HH:MM:SS\": {e}"))
}

fn db_path(cli_db: Option<PathBuf>) -> PathBuf {
    cli_db
        .or_else(|| std::env::var("ROLLCALL_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(rollcall_store::default_db_path)
}

fn print_logs(rows: &[LogRow]) {
    if rows.is_empty() {
        println!("  (none)");
    }
    for row in rows {
        println!(
            "  #{:<6} {:<5} {}  {}",
            row.log_id,
            row.kind,
            row.time.format("%Y-%m-%d %H:%M:%S"),
            row.employee_name
        );
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let path = db_path(cli.db);
    let mut db = Database::open(&path).with_context(|| format!("opening {}", path.display()))?;

    match cli.command {
        Commands::Init => {
            println!("Database ready at {}", path.display());
        }
        Commands::Enroll { id, name, samples, photo } => {
            let text = std::fs::read_to_string(&samples)
                .with_context(|| format!("reading {}", samples.display()))?;
            let samples: Vec<Embedding> =
                serde_json::from_str(&text).context("samples must be a JSON array of embeddings")?;
            let embedding = Embedding::mean_normalized(&samples)?;
            let photo = photo
                .map(|p| std::fs::read(&p).with_context(|| format!("reading {}", p.display())))
                .transpose()?;

            let employee_id = db.register_employee(&id, &name, &embedding, photo.as_deref())?;
            tracing::info!(institute_id = %id, employee_id, samples = samples.len(), "enrolled from CLI");
            println!(
                "Registered {name} ({id}) as employee #{employee_id} from {} sample(s)",
                samples.len()
            );
        }
        Commands::List => {
            let employees = db.list_employees()?;
            if cli.json {
                return print_json(&employees);
            }
            if employees.is_empty() {
                println!("No employees registered");
            }
            for e in employees {
                println!("{:<16} {}", e.institute_id, e.name);
            }
        }
        Commands::Show { id } => {
            let Some(d) = db.employee_details(&id)? else {
                bail!("employee not found: {id}");
            };
            if cli.json {
                return print_json(&d);
            }
            println!("{} ({})", d.name, d.institute_id);
            println!("  entries: {}", d.entry_count);
            println!("  exits:   {}", d.exit_count);
            match (d.last_log_kind, d.last_log_time) {
                (Some(kind), Some(time)) => println!("  last:    {kind} at {}", time.format("%Y-%m-%d %H:%M:%S")),
                _ => println!("  last:    never logged"),
            }
            let status = match d.current_status() {
                Some(EventKind::Entry) => "inside",
                Some(EventKind::Exit) => "outside",
                None => "unknown",
            };
            println!("  status:  {status}");
            println!("  photo:   {} bytes", d.photo_bytes);
        }
        Commands::Logs { kind, date, limit } => {
            let kinds = match kind {
                Some(k) => vec![k],
                None => vec![EventKind::Entry, EventKind::Exit],
            };
            let mut all = Vec::new();
            for k in kinds {
                let rows = match date {
                    Some(day) => db.logs_on(k, day)?,
                    None => db.recent_logs(k, limit)?,
                };
                if cli.json {
                    all.extend(rows);
                } else {
                    println!("{k} logs:");
                    print_logs(&rows);
                }
            }
            if cli.json {
                print_json(&all)?;
            }
        }
        Commands::Log { id, kind, at } => {
            let at = at.unwrap_or_else(|| chrono::Local::now().naive_local());
            let event = rollcall_core::manual_log(&db, &id, kind, at)?;
            println!(
                "{kind} logged for {} at {}",
                event.name,
                event.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
        }
        Commands::DeleteLog { kind, log_id } => {
            if !db.delete_log(kind, log_id)? {
                bail!("no {kind} log with id {log_id}");
            }
            tracing::info!(kind = %kind, log_id, "log row deleted");
            println!("Deleted {kind} log #{log_id}");
        }
        Commands::Remove { id } => {
            if !db.remove_employee(&id)? {
                bail!("employee not found: {id}");
            }
            println!("Removed {id} and their logs");
        }
        Commands::ResetDrift { id } => {
            if !db.reset_embedding(&id)? {
                bail!("employee not found: {id}");
            }
            tracing::info!(institute_id = %id, "embedding reset to anchor");
            println!("Embedding for {id} restored to its registration anchor");
            println!("A running rollcalld keeps its cached roster until it receives {{\"op\":\"reload\"}}");
        }
    }

    Ok(())
}
