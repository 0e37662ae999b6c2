// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};

use crate::error::DbError;

pub(crate) fn parse_ts(value: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(value)
		.map(|d| d.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp '{value}': {e}")))
}

pub(crate) fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
	value.as_deref().map(parse_ts).transpose()
}

pub(crate) fn opt_ts(value: Option<DateTime<Utc>>) -> Option<String> {
	value.map(|d| d.to_rfc3339())
}
