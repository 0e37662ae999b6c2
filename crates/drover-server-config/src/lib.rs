// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration management for the drover migration server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`DROVER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use drover_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("running {} workers", config.worker.worker_count);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub worker: WorkerConfig,
	pub limits: LimitsConfig,
	pub destination: DestinationConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`DROVER_*`)
/// 2. Config file (`/etc/drover/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let worker = layer.worker.unwrap_or_default().finalize();
	let limits = layer.limits.unwrap_or_default().finalize();
	let destination = layer.destination.unwrap_or_default().finalize();

	validate_config(&limits)?;

	info!(
		database = %database.url,
		worker_count = worker.worker_count,
		poll_interval_secs = worker.poll_interval_secs,
		dry_run_enabled = worker.dry_run_enabled,
		destination_org = ?destination.default_org,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		database,
		logging,
		worker,
		limits,
		destination,
	})
}

/// Validate cross-field configuration rules.
fn validate_config(limits: &LimitsConfig) -> Result<(), ConfigError> {
	if limits.large_file_warning_bytes >= limits.max_file_bytes {
		return Err(ConfigError::Validation(format!(
			"limits.large_file_warning_bytes ({}) must be below limits.max_file_bytes ({})",
			limits.large_file_warning_bytes, limits.max_file_bytes
		)));
	}

	for (key, value) in [
		("limits.max_repository_bytes", limits.max_repository_bytes),
		("limits.max_commit_bytes", limits.max_commit_bytes),
		("limits.max_file_bytes", limits.max_file_bytes),
	] {
		if value <= 0 {
			return Err(ConfigError::InvalidValue {
				key: key.to_string(),
				message: format!("must be positive, got {value}"),
			});
		}
	}

	Ok(())
}
