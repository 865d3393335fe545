use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

// `#[zbus::proxy]` generates `RollcallProxy` (async) and `RollcallProxyBlocking`.
#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn verify(&self, image: &[u8]) -> zbus::Result<String>;
    async fn add_student(&self, name: &str, image: &[u8]) -> zbus::Result<String>;
    async fn remove_student(&self, name: &str) -> zbus::Result<String>;
    async fn rescan(&self) -> zbus::Result<String>;
    async fn list_students(&self) -> zbus::Result<String>;
    async fn attendance(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    /// Print raw JSON replies
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the person in a photo and mark them present
    Verify {
        image: PathBuf,
    },
    /// Register a student (or replace their photo)
    Add {
        name: String,
        /// Reference photo; a grey placeholder is stored when omitted
        image: Option<PathBuf>,
    },
    /// Remove a student's reference photo
    Remove {
        name: String,
    },
    /// Reload the images directory
    Rescan,
    /// List registered students
    List,
    /// Show the attendance log
    Attendance,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    tracing::debug!(system = cli.system, "connected to D-Bus");
    let proxy = RollcallProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    let (reply, render): (String, fn(&Value) -> String) = match cli.command {
        Commands::Verify { image } => {
            let bytes = read_image(&image)?;
            (proxy.verify(&bytes).await?, describe_verification)
        }
        Commands::Add { name, image } => {
            let bytes = match image {
                Some(path) => read_image(&path)?,
                None => Vec::new(),
            };
            (proxy.add_student(&name, &bytes).await?, describe_roster)
        }
        Commands::Remove { name } => (proxy.remove_student(&name).await?, describe_roster),
        Commands::Rescan => (proxy.rescan().await?, describe_roster),
        Commands::List => (proxy.list_students().await?, describe_students),
        Commands::Attendance => (proxy.attendance().await?, describe_attendance),
        Commands::Status => (proxy.status().await?, pretty),
    };

    tracing::debug!(reply = %reply, "daemon reply");
    let value: Value = serde_json::from_str(&reply).context("daemon returned invalid JSON")?;
    if cli.json {
        println!("{}", pretty(&value));
    } else {
        println!("{}", render(&value));
    }

    Ok(())
}

/// Read a photo from disk, refusing files that are not a recognised image format.
fn read_image(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    image::guess_format(&bytes)
        .with_context(|| format!("{} is not a supported image", path.display()))?;
    Ok(bytes)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn describe_verification(value: &Value) -> String {
    let identity = value["identity"].as_str().unwrap_or("?");
    let distance = value["distance"].as_f64().unwrap_or(f64::NAN);
    if !value["accepted"].as_bool().unwrap_or(false) {
        return format!("not recognised (nearest distance {distance:.2})");
    }

    let attendance = match &value["attendance"] {
        Value::String(s) if s == "recorded" => "attendance recorded".to_string(),
        Value::Object(o) => match o.get("failed").and_then(|f| f["error"].as_str()) {
            Some(err) => format!("attendance NOT recorded: {err}"),
            None => "attendance status unknown".to_string(),
        },
        _ => "attendance status unknown".to_string(),
    };
    format!("{identity} (distance {distance:.2}), {attendance}")
}

fn describe_students(value: &Value) -> String {
    match value.as_array() {
        Some(names) if names.is_empty() => "no students registered".to_string(),
        Some(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        None => pretty(value),
    }
}

fn describe_roster(value: &Value) -> String {
    let mut out = Vec::new();
    match value["removed"].as_bool() {
        Some(true) => out.push("removed".to_string()),
        Some(false) => out.push("no photo found for that name".to_string()),
        None => {}
    }
    out.push(describe_students(&value["students"]));

    if let Some(skipped) = value["skipped"].as_array() {
        for skip in skipped {
            let path = skip["path"].as_str().unwrap_or("?");
            let kind = skip["reason"]["kind"].as_str().unwrap_or("?");
            out.push(format!("skipped {path}: {kind}"));
        }
    }
    out.join("\n")
}

fn describe_attendance(value: &Value) -> String {
    match value.as_array() {
        Some(rows) if rows.is_empty() => "no attendance recorded".to_string(),
        Some(rows) => rows
            .iter()
            .map(|r| {
                format!(
                    "{} {}  {}",
                    r["date"].as_str().unwrap_or("?"),
                    r["time"].as_str().unwrap_or("?"),
                    r["identity"].as_str().unwrap_or("?")
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => pretty(value),
    }
}
