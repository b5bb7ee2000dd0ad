//! chrontic: CLI for reporting editor activity to the Chrontic daemon.
//!
//! Editor hooks call `activity` and `focus` on every qualifying event; both
//! are fire-and-forget and always exit 0 so a missing daemon never disturbs
//! the editor. The remaining subcommands are for people.
//!
//! ## Subcommands
//!
//! - `activity`: Report an editor event (save, edit, action, navigation)
//! - `focus`: Report whether the editor window has focus
//! - `status` / `health`: Query the daemon
//! - `reload`: Re-read settings and restart tracking
//! - `config show|set`: Inspect or change settings

mod config_cmd;
mod daemon_client;
mod logging;

use chrono::Utc;
use chrontic_daemon_protocol::{ActivityKind, ActivityOrigin, ActivityPayload};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chrontic")]
#[command(about = "Automatic work time tracking for git checkouts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report editor activity (called by editor hooks)
    Activity {
        #[arg(long, value_enum)]
        kind: KindArg,

        #[arg(long, value_enum, default_value_t = OriginArg::Foreground)]
        origin: OriginArg,

        /// Name of the editor action, if any
        #[arg(long)]
        action: Option<String>,
    },

    /// Report editor window focus
    Focus {
        #[arg(value_name = "FOCUSED", action = clap::ArgAction::Set)]
        focused: bool,
    },

    /// Show tracking status
    Status,

    /// Check that the daemon is reachable
    Health,

    /// Re-read settings and restart tracking
    Reload,

    /// Inspect or change settings
    Config {
        /// Settings file (defaults to ~/.chrontic/config.toml)
        #[arg(long, global = true)]
        file: Option<PathBuf>,

        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print effective settings with the API key redacted
    Show,

    /// Set one key (camelCase, as in the file)
    Set {
        key: String,
        value: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    DocumentSave,
    Edit,
    Action,
    Navigation,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OriginArg {
    Foreground,
    Background,
    Automatic,
    Scheduled,
}

impl From<KindArg> for ActivityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::DocumentSave => ActivityKind::DocumentSave,
            KindArg::Edit => ActivityKind::Edit,
            KindArg::Action => ActivityKind::Action,
            KindArg::Navigation => ActivityKind::Navigation,
        }
    }
}

impl From<OriginArg> for ActivityOrigin {
    fn from(origin: OriginArg) -> Self {
        match origin {
            OriginArg::Foreground => ActivityOrigin::Foreground,
            OriginArg::Background => ActivityOrigin::Background,
            OriginArg::Automatic => ActivityOrigin::Automatic,
            OriginArg::Scheduled => ActivityOrigin::Scheduled,
        }
    }
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Activity {
            kind,
            origin,
            action,
        } => {
            let payload = ActivityPayload {
                kind: kind.into(),
                origin: origin.into(),
                action,
                recorded_at: Some(Utc::now().to_rfc3339()),
            };
            // Hooks must never fail the editor: log and exit 0.
            match daemon_client::send_activity(&payload) {
                Ok(data) => tracing::debug!(counted = ?data.get("counted"), "Activity reported"),
                Err(e) => tracing::warn!(error = %e, "chrontic activity failed"),
            }
        }
        Commands::Focus { focused } => {
            if let Err(e) = daemon_client::send_focus(focused) {
                tracing::warn!(error = %e, focused, "chrontic focus failed");
            }
        }
        Commands::Status => print_or_exit(daemon_client::status(), "status"),
        Commands::Health => print_or_exit(daemon_client::health(), "health"),
        Commands::Reload => print_or_exit(daemon_client::reload(), "reload"),
        Commands::Config { file, command } => match command {
            ConfigCommand::Show => match config_cmd::show(file.as_deref()) {
                Ok(rendered) => print!("{}", rendered),
                Err(e) => fail("config show", &e),
            },
            ConfigCommand::Set { key, value } => {
                match config_cmd::set(file.as_deref(), &key, &value) {
                    Ok(path) => {
                        println!("Updated {} in {}", key, path.display());
                        println!("Run `chrontic reload` to apply it to a running daemon.");
                    }
                    Err(e) => fail("config set", &e),
                }
            }
        },
    }
}

fn print_or_exit(result: Result<Value, daemon_client::ClientError>, label: &str) {
    match result {
        Ok(data) => match serde_json::to_string_pretty(&data) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => fail(label, &e),
        },
        Err(e) => fail(label, &e),
    }
}

fn fail(label: &str, error: &dyn std::fmt::Display) -> ! {
    tracing::error!(error = %error, "chrontic {} failed", label);
    eprintln!("chrontic {}: {}", label, error);
    std::process::exit(1);
}
