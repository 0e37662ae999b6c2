// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, DestinationConfigLayer, LimitsConfigLayer, LoggingConfigLayer,
	WorkerConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/drover/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: DROVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(load_database_from_env()),
			logging: Some(load_logging_from_env()),
			worker: Some(load_worker_from_env()?),
			limits: Some(load_limits_from_env()?),
			destination: Some(load_destination_from_env()),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {kind} value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	env_parse(name, "u32")
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	env_parse(name, "u64")
}

fn env_i64(name: &str) -> Result<Option<i64>, ConfigError> {
	env_parse(name, "i64")
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	env_parse(name, "usize")
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("DROVER_DATABASE_URL"),
	}
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("DROVER_LOG_LEVEL"),
	}
}

fn load_worker_from_env() -> Result<WorkerConfigLayer, ConfigError> {
	Ok(WorkerConfigLayer {
		poll_interval_secs: env_u64("DROVER_WORKER_POLL_INTERVAL_SECS")?,
		worker_count: env_u32("DROVER_WORKER_COUNT")?,
		status_poll_interval_secs: env_u64("DROVER_WORKER_STATUS_POLL_INTERVAL_SECS")?,
		dry_run_enabled: env_bool("DROVER_WORKER_DRY_RUN_ENABLED"),
	})
}

fn load_limits_from_env() -> Result<LimitsConfigLayer, ConfigError> {
	Ok(LimitsConfigLayer {
		max_repository_bytes: env_i64("DROVER_LIMITS_MAX_REPOSITORY_BYTES")?,
		max_commit_bytes: env_i64("DROVER_LIMITS_MAX_COMMIT_BYTES")?,
		max_file_bytes: env_i64("DROVER_LIMITS_MAX_FILE_BYTES")?,
		large_file_warning_bytes: env_i64("DROVER_LIMITS_LARGE_FILE_WARNING_BYTES")?,
		max_ref_name_len: env_usize("DROVER_LIMITS_MAX_REF_NAME_LEN")?,
	})
}

fn load_destination_from_env() -> DestinationConfigLayer {
	DestinationConfigLayer {
		default_org: env_var("DROVER_DESTINATION_ORG"),
	}
}
