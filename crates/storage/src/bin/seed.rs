use std::fmt;

use chrono::{DateTime, Duration, Utc};
use lms_core::model::{ContentKind, FormationId, LessonId, UserId};
use storage::repository::{ContentItemRecord, NewAssignmentRecord, Storage};
use storage::sqlite::ensure_database_file;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    formation_id: FormationId,
    lessons: u32,
    lessons_per_section: u32,
    user_id: Option<UserId>,
    due_in_days: Option<i64>,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("LMS_DB_URL").unwrap_or_else(|_| "sqlite://lms.sqlite3".into());
        let mut formation_id = FormationId::new(1);
        let mut lessons = 6;
        let mut lessons_per_section = 3;
        let mut user_id = None;
        let mut due_in_days = None;
        let mut now = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--formation-id" => {
                    formation_id = FormationId::new(parse_number(&mut args, "--formation-id")?);
                }
                "--lessons" => lessons = parse_number(&mut args, "--lessons")?,
                "--lessons-per-section" => {
                    lessons_per_section = parse_number(&mut args, "--lessons-per-section")?;
                }
                "--user-id" => user_id = Some(UserId::new(parse_number(&mut args, "--user-id")?)),
                "--due-in-days" => due_in_days = Some(parse_number(&mut args, "--due-in-days")?),
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            formation_id,
            lessons,
            lessons_per_section,
            user_id,
            due_in_days,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>             SQLite URL (default: sqlite://lms.sqlite3)");
    eprintln!("  --formation-id <id>           Formation to populate (default: 1)");
    eprintln!("  --lessons <n>                 Number of lessons (default: 6)");
    eprintln!("  --lessons-per-section <n>     Lessons between section markers (default: 3)");
    eprintln!("  --user-id <id>                Also assign the formation to this user");
    eprintln!("  --due-in-days <n>             Due date offset for the assignment (may be negative)");
    eprintln!("  --now <rfc3339>               Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                    Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LMS_DB_URL");
}

/// Item ids: lessons are `formation * 1000 + n`, sections `formation * 1000 + 500 + n`.
fn catalog(args: &Args) -> Vec<ContentItemRecord> {
    let base = args.formation_id.value() * 1000;
    let mut items = Vec::new();
    let mut position = 0;
    for n in 0..args.lessons {
        if args.lessons_per_section > 0 && n % args.lessons_per_section == 0 {
            let section = n / args.lessons_per_section + 1;
            items.push(ContentItemRecord {
                formation_id: args.formation_id,
                item_id: LessonId::new(base + 500 + u64::from(section)),
                kind: ContentKind::Section,
                position,
                title: format!("Section {section}"),
            });
            position += 1;
        }
        items.push(ContentItemRecord {
            formation_id: args.formation_id,
            item_id: LessonId::new(base + u64::from(n) + 1),
            kind: ContentKind::Lesson,
            position,
            title: format!("Lesson {}", n + 1),
        });
        position += 1;
    }
    items
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    ensure_database_file(&args.db_url)?;
    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let items = catalog(&args);
    for item in &items {
        storage.catalog.upsert_content_item(item).await?;
    }

    if let Some(user_id) = args.user_id {
        let assignment = storage
            .assignments
            .upsert_assignment(&NewAssignmentRecord {
                user_id,
                formation_id: args.formation_id,
                assigned_at: now,
                due_at: args.due_in_days.map(|days| now + Duration::days(days)),
            })
            .await?;
        println!(
            "Assigned formation {} to user {} (assignment {})",
            args.formation_id, user_id, assignment.id
        );
    }

    println!(
        "Seeded formation {} with {} content items into {}",
        args.formation_id,
        items.len(),
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
