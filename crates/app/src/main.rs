use std::fmt;

use chrono::{DateTime, Utc};
use lms_core::model::{FormationId, LessonId, UserId};
use services::{AppConfig, AppServices, Clock};
use storage::sqlite::ensure_database_file;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
enum ArgsError {
    MissingCommand,
    UnknownCommand(String),
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidDue { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingCommand => write!(f, "a command is required"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidDue { raw } => {
                write!(f, "invalid --due value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Progress {
        user_id: UserId,
        formation_id: FormationId,
    },
    Record {
        user_id: UserId,
        lesson_id: LessonId,
        percentage: f64,
        completed: bool,
    },
    Status {
        user_id: UserId,
        formation_id: FormationId,
    },
    Assign {
        user_id: UserId,
        formation_id: FormationId,
        due_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug)]
struct Args {
    db_url: Option<String>,
    command: Command,
}

/// Flags shared by every command; each command checks which ones it needs.
#[derive(Default)]
struct Flags {
    db_url: Option<String>,
    user_id: Option<UserId>,
    formation_id: Option<FormationId>,
    lesson_id: Option<LessonId>,
    percentage: Option<f64>,
    completed: bool,
    due_at: Option<DateTime<Utc>>,
}

fn required<T>(value: Option<T>, flag: &'static str) -> Result<T, ArgsError> {
    value.ok_or(ArgsError::MissingFlag { flag })
}

impl Args {
    fn parse(argv: impl IntoIterator<Item = String>) -> Result<Self, ArgsError> {
        let mut args = argv.into_iter();
        let name = args.next().ok_or(ArgsError::MissingCommand)?;
        if matches!(name.as_str(), "--help" | "-h") {
            print_usage();
            std::process::exit(0);
        }

        let mut flags = Flags::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    flags.db_url = Some(value);
                }
                "--user" => flags.user_id = Some(UserId::new(parse_number(&mut args, "--user")?)),
                "--formation" => {
                    flags.formation_id =
                        Some(FormationId::new(parse_number(&mut args, "--formation")?));
                }
                "--lesson" => {
                    flags.lesson_id = Some(LessonId::new(parse_number(&mut args, "--lesson")?));
                }
                "--percentage" => flags.percentage = Some(parse_number(&mut args, "--percentage")?),
                "--completed" => flags.completed = true,
                "--due" => {
                    let value = require_value(&mut args, "--due")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidDue { raw: value.clone() })?
                        .with_timezone(&Utc);
                    flags.due_at = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let command = match name.as_str() {
            "progress" => Command::Progress {
                user_id: required(flags.user_id, "--user")?,
                formation_id: required(flags.formation_id, "--formation")?,
            },
            "record" => Command::Record {
                user_id: required(flags.user_id, "--user")?,
                lesson_id: required(flags.lesson_id, "--lesson")?,
                percentage: flags
                    .percentage
                    .unwrap_or(if flags.completed { 100.0 } else { 0.0 }),
                completed: flags.completed,
            },
            "status" => Command::Status {
                user_id: required(flags.user_id, "--user")?,
                formation_id: required(flags.formation_id, "--formation")?,
            },
            "assign" => Command::Assign {
                user_id: required(flags.user_id, "--user")?,
                formation_id: required(flags.formation_id, "--formation")?,
                due_at: flags.due_at,
            },
            _ => return Err(ArgsError::UnknownCommand(name)),
        };

        Ok(Self {
            db_url: flags.db_url,
            command,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- progress --user <id> --formation <id>");
    eprintln!("  cargo run -p app -- record   --user <id> --lesson <id> [--percentage <0-100>] [--completed]");
    eprintln!("  cargo run -p app -- status   --user <id> --formation <id>");
    eprintln!("  cargo run -p app -- assign   --user <id> --formation <id> [--due <rfc3339>]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>   Overrides LMS_DB_URL");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LMS_DB_URL, LMS_REDIS_URL, LMS_CACHE_PREFIX, LMS_CACHE_TTL_SECS,");
    eprintln!("  LMS_CACHE_TIMEOUT_MS, LMS_FALLBACK_MAX_ENTRIES,");
    eprintln!("  LMS_CACHE_HEALTH_INTERVAL_SECS, LMS_REOPEN_ON_REGRESSION, RUST_LOG");
}

async fn execute(
    services: &AppServices,
    command: Command,
) -> Result<String, Box<dyn std::error::Error>> {
    let output = match command {
        Command::Progress {
            user_id,
            formation_id,
        } => {
            let view = services
                .queries()
                .formation_progress(user_id, formation_id)
                .await?;
            serde_json::to_string_pretty(&view)?
        }
        Command::Record {
            user_id,
            lesson_id,
            percentage,
            completed,
        } => {
            let recorded = services
                .writes()
                .record_lesson_progress(user_id, lesson_id, percentage, completed)
                .await?;
            serde_json::to_string_pretty(&recorded)?
        }
        Command::Status {
            user_id,
            formation_id,
        } => {
            let status = services
                .queries()
                .assignment_status(user_id, formation_id)
                .await?;
            serde_json::to_string_pretty(&serde_json::json!({
                "user_id": user_id,
                "formation_id": formation_id,
                "status": status,
            }))?
        }
        Command::Assign {
            user_id,
            formation_id,
            due_at,
        } => {
            let assignment = services
                .resolver()
                .assign(user_id, formation_id, due_at)
                .await?;
            serde_json::to_string_pretty(&assignment)?
        }
    };
    Ok(output)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let mut config = AppConfig::from_env()?;
    if let Some(db_url) = args.db_url {
        config.db_url = db_url;
    }
    tracing::info!(
        db_url = %config.db_url,
        remote_cache = config.redis_url.is_some(),
        "loaded configuration"
    );

    ensure_database_file(&config.db_url)?;
    let services = AppServices::from_config(&config, Clock::system()).await?;
    let output = execute(&services, args.command).await?;
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "app=info,services=info,cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "command failed");
        std::process::exit(2);
    }
}
