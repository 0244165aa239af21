//! External collaborators the daemon core depends on but does not implement: durable storage
//! and remote sensor-code evaluation. Both are modeled as `async_trait` interfaces so the core
//! can be driven against an in-memory double in tests, the same seam the teacher draws around
//! its own `DatabaseHandle`/cache collaborators rather than reaching for them concretely.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{
	AutomationConditionEvaluation, InstigatorState, InstigatorStatus, PartitionBackfill, Run,
	SensorRuntimeData, Tick, TickStatus,
};

pub type StoreResult<T> = anyhow::Result<T>;

/// Durable state behind the daemon: instigator state, ticks, runs, backfills, and dynamic
/// partitions. A real implementation backs this with a database; tests back it with an
/// in-memory double (see `testing` support in `tests/`).
#[async_trait]
pub trait InstanceStore: Send + Sync {
	async fn all_sensor_states(&self) -> StoreResult<Vec<InstigatorState>>;
	async fn get_instigator_state(
		&self,
		origin_id: &str,
		selector_id: &str,
	) -> StoreResult<Option<InstigatorState>>;
	async fn put_instigator_state(&self, state: InstigatorState) -> StoreResult<()>;

	async fn create_tick(&self, tick: Tick) -> StoreResult<Tick>;
	async fn update_tick(&self, tick: &Tick) -> StoreResult<()>;
	async fn latest_tick(&self, origin_id: &str, selector_id: &str) -> StoreResult<Option<Tick>>;
	async fn purge_ticks(
		&self,
		origin_id: &str,
		selector_id: &str,
		before_timestamp: i64,
		statuses: &[TickStatus],
	) -> StoreResult<()>;
	async fn tick_retention_days(&self, status: TickStatus) -> StoreResult<Option<i64>>;

	async fn get_runs_by_tag(&self, key: &str, value: &str) -> StoreResult<Vec<Run>>;
	/// Creates a run if none with this run key exists yet, otherwise returns the existing one
	/// (`NotStarted` runs are returned for relaunch; any other status is the caller's cue to skip).
	async fn get_or_create_sensor_run(
		&self,
		reserved_id: Uuid,
		sensor_name: &str,
		run_key: Option<&str>,
		tags: HashMap<String, String>,
	) -> StoreResult<Run>;
	async fn submit_run(&self, run_id: Uuid) -> StoreResult<()>;

	async fn add_backfill(&self, backfill: PartitionBackfill) -> StoreResult<()>;

	async fn has_dynamic_partition(&self, def_name: &str, key: &str) -> StoreResult<bool>;
	async fn add_dynamic_partitions(&self, def_name: &str, keys: &[String]) -> StoreResult<()>;
	async fn delete_dynamic_partition(&self, def_name: &str, key: &str) -> StoreResult<()>;

	async fn report_runless_asset_event(&self, event: serde_json::Value) -> StoreResult<()>;
	async fn report_engine_event(&self, message: String, run_id: Uuid) -> StoreResult<()>;

	async fn supports_automation_condition_evaluations(&self) -> bool {
		false
	}
	async fn put_automation_condition_evaluations(
		&self,
		_tick_id: Uuid,
		_evaluations: Vec<AutomationConditionEvaluation>,
	) -> StoreResult<()> {
		Ok(())
	}
}

/// A resolved code location, capable of evaluating a sensor's user code and resolving jobs for
/// submission.
#[async_trait]
pub trait CodeLocation: Send + Sync {
	async fn get_external_sensor_execution_data(
		&self,
		sensor_name: &str,
		last_tick_timestamp: Option<i64>,
		last_run_key: Option<&str>,
		cursor: Option<&str>,
		log_key: Option<&str>,
		last_sensor_start_timestamp: Option<i64>,
	) -> StoreResult<SensorRuntimeData>;

	async fn resolve_stale_assets(&self, asset_selection: &[String]) -> StoreResult<Vec<String>>;
}

/// The set of code locations currently visible in the workspace, re-snapshotted once per
/// iteration to tolerate locations being added, removed, or redeployed mid-run.
#[async_trait]
pub trait WorkspaceContext: Send + Sync {
	async fn snapshot_sensors(&self) -> StoreResult<Vec<crate::model::Sensor>>;
	async fn get_code_location(&self, name: &str) -> StoreResult<std::sync::Arc<dyn CodeLocation>>;
}

pub fn default_sensor_status(status: InstigatorStatus) -> bool {
	matches!(status, InstigatorStatus::Running | InstigatorStatus::DeclaredInCode)
}
