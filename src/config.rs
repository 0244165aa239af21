//! Layered daemon configuration, following the same private-field-plus-defaulting-accessor
//! pattern as the teacher's runtime config: fields are `Option<T>` so a partial config layer
//! (env, file, defaults) can be merged without clobbering unset values, and callers read
//! through an accessor that supplies the default rather than matching on `None` themselves.

use std::collections::HashMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::TickStatus;

#[derive(Debug, Clone, Serialize, Deserialize, Default, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
	/// Minimum wall-clock duration of one outer loop pass, in seconds. Default: 5.
	min_loop_interval_seconds: Option<u64>,
	/// How long an interrupted `STARTED` tick may be resumed after, in seconds. Default: 86400 (24h).
	max_time_to_resume_tick_seconds: Option<u64>,
	/// How many times a `FAILURE` tick with unsubmitted reservations may be resubmitted. Default: 1.
	max_failure_resubmission_retries: Option<u32>,
	/// Per-status tick retention, in days. Entries at or below 0 are treated as "never purge".
	tick_retention_days: Option<HashMap<String, i64>>,
	/// Number of sensors that may be evaluated concurrently. `None`/0 means run inline, no pool.
	evaluation_concurrency: Option<usize>,
	/// Number of run requests submitted concurrently within a single tick.
	submission_concurrency: Option<usize>,
}

impl DaemonConfig {
	pub fn min_loop_interval(&self) -> Duration {
		Duration::from_secs(self.min_loop_interval_seconds.unwrap_or(5))
	}

	pub fn max_time_to_resume_tick(&self) -> Duration {
		Duration::from_secs(self.max_time_to_resume_tick_seconds.unwrap_or(86_400))
	}

	pub fn max_failure_resubmission_retries(&self) -> u32 {
		self.max_failure_resubmission_retries.unwrap_or(1)
	}

	pub fn tick_retention_days(&self, status: TickStatus) -> Option<i64> {
		let days = self
			.tick_retention_days
			.as_ref()?
			.get(&status.to_string())
			.copied()?;

		(days > 0).then_some(days)
	}

	pub fn evaluation_concurrency(&self) -> Option<usize> {
		self.evaluation_concurrency.filter(|n| *n > 0)
	}

	pub fn submission_concurrency(&self) -> usize {
		self.submission_concurrency.unwrap_or(4).max(1)
	}

	/// Loads configuration by layering defaults, an optional JSON5 file, and environment
	/// variables prefixed `SENSOR_DAEMON_`, the same three-layer precedence the teacher's
	/// config crate applies to its runtime settings.
	pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
		let mut builder = config::Config::builder();

		if let Some(path) = path {
			builder = builder.add_source(
				config::File::from(path).format(config::FileFormat::Json5),
			);
		}

		builder = builder.add_source(
			config::Environment::with_prefix("SENSOR_DAEMON")
				.separator("__")
				.try_parsing(true),
		);

		let raw = builder.build()?;
		Ok(raw.try_deserialize()?)
	}
}
