//! Beacon store migration CLI
//!
//! Moves a legacy beacon store into redb or PostgreSQL, once.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use beacon_migrate::{audit_store, MigrationConfig, Pipeline, Target};

#[derive(Parser)]
#[command(name = "beacon-migrate")]
#[command(version)]
#[command(about = "Migrate a legacy beacon store into redb or PostgreSQL", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run(RunArgs),

    /// Validate the configuration without touching any store
    Validate(RunArgs),

    /// Report round gaps and repeated signatures in a store
    Audit {
        /// Store to scan
        #[arg(short, long, env = "BEACON_MIGRATE_SOURCE")]
        source: PathBuf,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "BEACON_MIGRATE_CONFIG")]
    config: Option<PathBuf>,

    /// Store to migrate
    #[arg(short, long, env = "BEACON_MIGRATE_SOURCE")]
    source: Option<PathBuf>,

    /// Beacon chain name
    #[arg(short, long, env = "BEACON_MIGRATE_BEACON")]
    beacon: Option<String>,

    /// Destination backend
    #[arg(short, long, value_enum, env = "BEACON_MIGRATE_TARGET")]
    target: Option<Target>,

    /// PostgreSQL connection string
    #[arg(long, env = "BEACON_MIGRATE_PG_DSN")]
    pg_dsn: Option<String>,

    /// Channel capacity: negative = default, 0 = size of the source
    #[arg(long, allow_negative_numbers = true, env = "BEACON_MIGRATE_BUFFER_SIZE")]
    buffer_size: Option<i64>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Audit the migrated store after commit (embedded target)
    #[arg(long)]
    audit: bool,
}

impl RunArgs {
    fn is_empty(&self) -> bool {
        self.config.is_none() && self.source.is_none() && self.beacon.is_none()
    }

    /// Loads the config file if any, then applies flag overrides.
    fn into_config(self) -> anyhow::Result<MigrationConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                MigrationConfig::from_file(path)
                    .with_context(|| format!("cannot load {}", path.display()))?
            }
            None => {
                let source = self
                    .source
                    .clone()
                    .context("--source is required without --config")?;
                let beacon = self
                    .beacon
                    .clone()
                    .context("--beacon is required without --config")?;
                MigrationConfig::new(source, beacon, self.target.unwrap_or(Target::Embedded))
            }
        };

        if let Some(source) = self.source {
            config.source = source;
        }
        if let Some(beacon) = self.beacon {
            config.beacon = beacon;
        }
        if let Some(target) = self.target {
            config.target = target;
        }
        if let Some(dsn) = self.pg_dsn {
            config.pg_dsn = dsn;
        }
        if let Some(size) = self.buffer_size {
            config.buffer_size = size;
        }
        if self.no_progress {
            config.show_progress = false;
        }
        if self.audit {
            config.audit = true;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging, RUST_LOG wins over --verbose
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping migration");
            on_signal.cancel();
        }
    });

    match cli.command {
        Some(Commands::Run(args)) => run_migration(args, &cancel).await?,
        Some(Commands::Validate(args)) => validate_config(args)?,
        Some(Commands::Audit { source }) => run_audit(&source, &cancel).await?,
        None => {
            if cli.run.is_empty() {
                eprintln!("Usage: beacon-migrate --source <PATH> --beacon <NAME> --target <TARGET>");
                eprintln!("Try 'beacon-migrate --help' for more information.");
                std::process::exit(1);
            }
            run_migration(cli.run, &cancel).await?;
        }
    }

    Ok(())
}

async fn run_migration(args: RunArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let config = args.into_config()?;
    config.validate()?;

    info!(
        source = %config.source.display(),
        beacon = %config.beacon,
        target = %config.target,
        "Starting migration..."
    );

    let mut pipeline = Pipeline::with_cancellation(config, cancel);
    let stats = match pipeline.run().await {
        Ok(stats) => stats,
        Err(e) if e.is_not_needed() => {
            println!("\nℹ️  Nothing to migrate, the store is already in its new format.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("\n✅ Migration Complete!");
    println!("   Read:       {}", stats.existing_rows);
    println!("   Written:    {}", stats.migrated_rows);
    println!("   Buffer:     {}", stats.buffer_size);
    println!("   Duration:   {:.2}s", stats.duration_secs);
    println!("   Throughput: {:.0} rounds/sec", stats.throughput());

    Ok(())
}

fn validate_config(args: RunArgs) -> anyhow::Result<()> {
    let config = args.into_config()?;
    config.validate()?;

    println!("✅ Configuration is valid!");
    println!("   Source:  {}", config.source.display());
    println!("   Beacon:  {}", config.beacon);
    println!("   Target:  {}", config.target);
    println!("   Buffer:  {}", config.buffer_size);

    Ok(())
}

async fn run_audit(source: &Path, cancel: &CancellationToken) -> anyhow::Result<()> {
    let source = source.to_path_buf();
    let cancel = cancel.clone();
    let report = tokio::task::spawn_blocking(move || audit_store(&source, &cancel)).await??;
    report.log_findings();

    println!("\n📊 Audit Report:");
    println!("   Records:     {}", report.records);
    println!(
        "   Rounds:      {}",
        match (report.first_round, report.last_round) {
            (Some(first), Some(last)) => format!("{first}..={last}"),
            _ => "none".to_string(),
        }
    );
    println!("   Gaps:        {}", report.gaps.len());
    println!("   Duplicates:  {}", report.duplicate_signatures.len());

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("migrate.yaml");
        std::fs::write(
            &file,
            "source: ./a.db\nbeacon: default\ntarget: embedded\nbuffer_size: 5\n",
        )
        .unwrap();

        let args = RunArgs {
            config: Some(file),
            target: Some(Target::Relational),
            buffer_size: Some(0),
            no_progress: true,
            ..RunArgs::default()
        };
        let config = args.into_config().unwrap();

        assert_eq!(config.source, PathBuf::from("./a.db"));
        assert_eq!(config.target, Target::Relational);
        assert_eq!(config.buffer_size, 0);
        assert!(!config.show_progress);
    }

    #[test]
    fn test_flags_without_file_require_source() {
        let args = RunArgs {
            beacon: Some("default".into()),
            ..RunArgs::default()
        };
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_cli_parses_target_aliases() {
        let cli = Cli::parse_from([
            "beacon-migrate",
            "--source",
            "a.db",
            "--beacon",
            "default",
            "--target",
            "postgres",
            "--buffer-size",
            "-1",
        ]);
        assert_eq!(cli.run.target, Some(Target::Relational));
        assert_eq!(cli.run.buffer_size, Some(-1));
    }
}
