//! CLI definitions for queuewatch.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// queuewatch CLI.
#[derive(Parser)]
#[command(name = "queuewatch")]
#[command(about = "Durable SQLite task queue and dispatcher")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: config/queuewatch.toml if present)
    #[arg(short, long, global = true, env = "QUEUEWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue database path, overriding `store.path`
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the dispatcher until interrupted
    Run {
        /// Poll interval in milliseconds when the queue is empty
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Claimant identity recorded on claimed items
        #[arg(long)]
        claimant: Option<String>,
    },

    /// Enqueue a task
    Enqueue {
        /// Task kind
        #[arg(short, long)]
        kind: String,

        /// Task data as JSON
        #[arg(short, long, default_value = "{}")]
        data: String,
    },

    /// Show item counts per status
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "queuewatch",
            "run",
            "--db",
            "/tmp/q.db",
            "--poll-interval-ms",
            "250",
            "--claimant",
            "w2",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/q.db")));
        match cli.command {
            Commands::Run {
                poll_interval_ms,
                claimant,
            } => {
                assert_eq!(poll_interval_ms, Some(250));
                assert_eq!(claimant.as_deref(), Some("w2"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_enqueue_defaults() {
        let cli = Cli::try_parse_from(["queuewatch", "enqueue", "--kind", "ping"]).unwrap();
        match cli.command {
            Commands::Enqueue { kind, data } => {
                assert_eq!(kind, "ping");
                assert_eq!(data, "{}");
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["queuewatch"]).is_err());
    }
}
