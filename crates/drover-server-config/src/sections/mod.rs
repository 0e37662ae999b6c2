// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for drover-server.

pub mod database;
pub mod destination;
pub mod limits;
pub mod logging;
pub mod worker;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use destination::{DestinationConfig, DestinationConfigLayer};
pub use limits::{LimitsConfig, LimitsConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
pub use worker::{WorkerConfig, WorkerConfigLayer};
