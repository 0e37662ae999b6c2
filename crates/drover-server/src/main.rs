// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Drover operator binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use drover_migrate_core::{BatchId, RepositoryId};
use drover_server_config::ServerConfig;
use drover_server_db::{SqliteBatchStore, SqliteRepositoryStore};
use drover_server_migrate::MigrationOperations;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod version;

/// Drover - repository migration orchestration.
#[derive(Parser, Debug)]
#[command(name = "drover-server", about = "Repository migration orchestration", version)]
struct Args {
	/// Configuration file layered over the defaults.
	#[arg(long, env = "DROVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version and build information
	Version,
	/// Apply database migrations and exit
	MigrateDb,
	/// Recompute validation for one repository or all of them
	Revalidate {
		#[arg(long)]
		repo: Option<i64>,
	},
	/// Print the dependency wave plan for a batch
	Plan {
		#[arg(long)]
		batch: i64,
	},
	/// Batch operations
	#[command(subcommand)]
	Batch(BatchCommand),
	/// Repository operations
	#[command(subcommand)]
	Repo(RepoCommand),
}

#[derive(Subcommand, Debug)]
enum BatchCommand {
	/// Print progress counts as JSON
	Stats { id: i64 },
	/// Start the batch and queue its members for migration
	Start { id: i64 },
	/// Queue every eligible member for a dry run
	DryRun { id: i64 },
	/// Requeue failed members
	Retry { id: i64 },
	/// Detach members and delete the batch
	Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
enum RepoCommand {
	/// Roll back a migrated or failed repository
	Rollback {
		id: i64,
		#[arg(long)]
		reason: String,
	},
	/// Clear a stuck source lock
	Unlock { id: i64 },
}

fn init_tracing(config: &ServerConfig) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Command::Version = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => drover_server_config::load_config_with_file(path.clone()),
		None => drover_server_config::load_config(),
	}
	.context("failed to load configuration")?;

	init_tracing(&config);

	tracing::info!(database = %config.database.url, "starting drover-server");

	let pool = drover_server_db::create_pool(&config.database.url)
		.await
		.context("failed to open database")?;
	drover_server_db::run_migrations(&pool)
		.await
		.context("failed to apply database migrations")?;

	let repositories = Arc::new(SqliteRepositoryStore::new(pool.clone()));
	let batches = Arc::new(SqliteBatchStore::new(pool.clone()));
	let ops = MigrationOperations::new(batches, repositories, config.limits.validation_limits());

	let result = run(args.command, &ops).await;
	pool.close().await;
	result
}

async fn run(command: Command, ops: &MigrationOperations) -> anyhow::Result<()> {
	match command {
		Command::Version => println!("{}", version::format_version_info()),
		Command::MigrateDb => {
			tracing::info!("database migrations applied");
		}
		Command::Revalidate { repo: Some(id) } => {
			print_json(&ops.revalidate_repository(RepositoryId(id)).await?)?;
		}
		Command::Revalidate { repo: None } => {
			print_json(&ops.revalidate_all().await?)?;
		}
		Command::Plan { batch } => {
			print_json(&ops.plan_batch_waves(BatchId(batch)).await?)?;
		}
		Command::Batch(BatchCommand::Stats { id }) => {
			print_json(&ops.batch_manager().compute_stats(BatchId(id)).await?)?;
		}
		Command::Batch(BatchCommand::Start { id }) => {
			let queued = ops.start_batch(BatchId(id)).await?;
			println!("batch {id} started, {queued} repositories queued");
		}
		Command::Batch(BatchCommand::DryRun { id }) => {
			let queued = ops.dry_run_batch(BatchId(id)).await?;
			println!("batch {id}: {queued} repositories queued for dry run");
		}
		Command::Batch(BatchCommand::Retry { id }) => {
			let requeued = ops.retry_batch_failures(BatchId(id)).await?;
			println!("batch {id}: {requeued} repositories requeued");
		}
		Command::Batch(BatchCommand::Delete { id }) => {
			ops.batch_manager().delete(BatchId(id)).await?;
			println!("batch {id} deleted");
		}
		Command::Repo(RepoCommand::Rollback { id, reason }) => {
			let record = ops.rollback_repository(RepositoryId(id), &reason).await?;
			println!(
				"repository {id} rolled back from {} (history {})",
				record.previous_status, record.history_id
			);
		}
		Command::Repo(RepoCommand::Unlock { id }) => {
			let repo = ops.unlock_repository(RepositoryId(id)).await?;
			println!("repository {} unlocked", repo.full_name);
		}
	}
	Ok(())
}
