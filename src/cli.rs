//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand};

/// rtbackup - incremental backups of a remote tabular store
#[derive(Parser, Debug)]
#[command(name = "rtbackup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory holding backups, safety backups, summaries and logs
    #[arg(short, long, global = true)]
    pub root: Option<String>,

    /// Comma-separated tables, overriding TABLES and SCHEMA_FILE
    #[arg(short, long, global = true)]
    pub tables: Option<String>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a backup (incremental unless --force-full)
    Backup(BackupArgs),

    /// List regular backups, newest first
    List,

    /// Restore a backup into the remote store
    Restore(RestoreArgs),

    /// Roll back to a safety backup
    Rollback(RollbackArgs),

    /// List safety backups, newest first
    ListSafety,
}

/// Arguments for the backup command
#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Store every table in full, ignoring the previous backup
    #[arg(long)]
    pub force_full: bool,

    /// Tables fetched in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Write plain JSON instead of gzip
    #[arg(long)]
    pub no_compress: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the restore command
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Backup to restore, by id or file name
    #[arg(required_unless_present = "interactive")]
    pub snapshot: Option<String>,

    /// Pick the backup from a numbered timeline and confirm before restoring
    #[arg(short, long, conflicts_with = "snapshot")]
    pub interactive: bool,

    /// Skip the safety backup; the restore cannot be rolled back
    #[arg(long)]
    pub unsafe_skip_safety: bool,

    /// Batches written in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the rollback command
#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Safety backup to roll back to, by id or file name
    pub snapshot: String,

    /// Confirmation token; prompted for when absent
    #[arg(long)]
    pub confirm: Option<String>,

    /// Batches written in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_restore() {
        let cli = Cli::parse_from([
            "rtbackup",
            "restore",
            "snapshot_20260101_000000_000.json.gz",
            "--unsafe-skip-safety",
            "-w",
            "3",
        ]);
        match cli.command {
            Commands::Restore(args) => {
                assert_eq!(args.snapshot.as_deref(), Some("snapshot_20260101_000000_000.json.gz"));
                assert!(!args.interactive);
                assert!(args.unsafe_skip_safety);
                assert_eq!(args.workers, Some(3));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_interactive_restore() {
        let cli = Cli::parse_from(["rtbackup", "restore", "--interactive"]);
        match cli.command {
            Commands::Restore(args) => {
                assert!(args.interactive);
                assert!(args.snapshot.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_restore_requires_snapshot_or_interactive() {
        assert!(Cli::try_parse_from(["rtbackup", "restore"]).is_err());
        assert!(Cli::try_parse_from(["rtbackup", "restore", "x", "--interactive"]).is_err());
    }

    #[test]
    fn test_parse_list_safety_and_globals() {
        let cli = Cli::parse_from(["rtbackup", "list-safety", "--root", "/var/backups"]);
        assert!(matches!(cli.command, Commands::ListSafety));
        assert_eq!(cli.global.root.as_deref(), Some("/var/backups"));
    }

    #[test]
    fn test_parse_rollback_confirm() {
        let cli = Cli::parse_from(["rtbackup", "rollback", "20260101_000000_000", "--confirm", "ROLLBACK"]);
        match cli.command {
            Commands::Rollback(args) => assert_eq!(args.confirm.as_deref(), Some("ROLLBACK")),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
