//! Core data model: sensors, instigator state, ticks, and the requests a tick produces.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Stable identity of a sensor: which code location and repository it lives in, plus its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorSelector {
	pub code_location: String,
	pub repository: String,
	pub sensor_name: String,
}

impl SensorSelector {
	/// Stable hash of the selector, used as the instigator's `selector_id`.
	pub fn selector_id(&self) -> String {
		use std::hash::{Hash, Hasher};
		let mut hasher = std::collections::hash_map::DefaultHasher::new();
		self.hash(&mut hasher);
		format!("{:016x}", hasher.finish())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum SensorType {
	Standard,
	RunStatus,
	AssetReconciliation,
	Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InstigatorStatus {
	DeclaredInCode,
	Running,
	Stopped,
}

/// Externally declared sensor definition (returned by the workspace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
	pub selector: SensorSelector,
	pub min_interval_seconds: Option<u64>,
	pub sensor_type: SensorType,
	pub default_status: InstigatorStatus,
	/// When true this sensor is owned by the asset-materialization daemon and must never be
	/// processed here.
	pub handled_by_asset_daemon: bool,
}

/// Mutable per-sensor bookkeeping persisted alongside `InstigatorState`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorData {
	pub last_tick_timestamp: Option<i64>,
	pub last_tick_start_timestamp: Option<i64>,
	pub last_tick_success_timestamp: Option<i64>,
	pub last_sensor_start_timestamp: Option<i64>,
	pub last_run_key: Option<String>,
	pub cursor: Option<String>,
	pub min_interval: Option<u64>,
	pub sensor_type: Option<SensorType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstigatorState {
	pub origin_id: String,
	pub selector_id: String,
	pub instigator_name: String,
	pub status: InstigatorStatus,
	pub instigator_data: Option<SensorData>,
}

impl InstigatorState {
	pub fn sensor_data(&self) -> SensorData {
		self.instigator_data.clone().unwrap_or_default()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TickStatus {
	Started,
	Skipped,
	Success,
	Failure,
}

impl TickStatus {
	pub fn is_terminal(self) -> bool {
		matches!(self, TickStatus::Skipped | TickStatus::Success | TickStatus::Failure)
	}
}

/// A single reservation made before launch: the id assigned to a not-yet-submitted request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedRun {
	pub reserved_id: Uuid,
	pub request: RunRequest,
	pub is_backfill: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicPartitionsRequestResult {
	pub partitions_def_name: String,
	pub added_partitions: Vec<String>,
	pub deleted_partitions: Vec<String>,
	pub skipped_partitions: Vec<String>,
}

/// Durable audit record of one evaluation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
	pub tick_id: Uuid,
	pub origin_id: String,
	pub selector_id: String,
	pub instigator_name: String,
	pub status: TickStatus,
	pub timestamp: i64,
	pub end_timestamp: Option<i64>,
	pub run_ids: Vec<Uuid>,
	pub run_keys: Vec<String>,
	pub reserved_runs: Vec<ReservedRun>,
	pub cursor: Option<String>,
	pub skip_reason: Option<String>,
	pub origin_run_id: Option<Uuid>,
	pub log_key: Option<String>,
	pub error: Option<String>,
	pub failure_count: u32,
	pub dynamic_partitions_request_results: Vec<DynamicPartitionsRequestResult>,
	/// Set when this tick's cursor must be persisted even though it ended in failure
	/// (only run-reaction processing sets this).
	pub should_update_cursor_on_failure: bool,
}

impl Tick {
	pub fn new(origin_id: String, selector_id: String, instigator_name: String, timestamp: i64) -> Self {
		Tick {
			tick_id: Uuid::new_v4(),
			origin_id,
			selector_id,
			instigator_name,
			status: TickStatus::Started,
			timestamp,
			end_timestamp: None,
			run_ids: Vec::new(),
			run_keys: Vec::new(),
			reserved_runs: Vec::new(),
			cursor: None,
			skip_reason: None,
			origin_run_id: None,
			log_key: None,
			error: None,
			failure_count: 0,
			dynamic_partitions_request_results: Vec::new(),
			should_update_cursor_on_failure: false,
		}
	}

	/// Reserved runs that have not yet had a run id recorded in `run_ids`.
	pub fn unsubmitted_reservations(&self) -> Vec<&ReservedRun> {
		self.reserved_runs
			.iter()
			.filter(|r| !self.run_ids.contains(&r.reserved_id))
			.collect()
	}

	pub fn has_unsubmitted_reservations(&self) -> bool {
		!self.unsubmitted_reservations().is_empty()
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
	pub run_key: Option<String>,
	pub run_config: Option<serde_json::Value>,
	pub asset_selection: Option<Vec<String>>,
	pub asset_check_keys: Option<Vec<String>>,
	pub tags: HashMap<String, String>,
	pub stale_assets_only: bool,
	/// Presence marks this request as a backfill.
	pub asset_graph_subset: Option<Vec<String>>,
}

impl RunRequest {
	pub fn is_backfill(&self) -> bool {
		self.asset_graph_subset.is_some()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
	NotStarted,
	Starting,
	Running,
	Success,
	Failure,
	Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
	pub run_id: Uuid,
	pub status: RunStatus,
	pub tags: HashMap<String, String>,
	pub origin_selector_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionBackfill {
	pub backfill_id: Uuid,
	pub asset_graph_subset: Vec<String>,
	pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConditionEvaluation {
	pub evaluation_id: Uuid,
	pub asset_key: String,
	pub run_ids: Vec<Uuid>,
}

/// A single status-change reaction emitted by run-status sensors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReaction {
	pub run_id: Uuid,
	pub run_status: RunStatus,
	pub error: Option<String>,
}

/// Outcome of one accepted `RunRequest`/`ReservedRun` submission attempt.
#[derive(Debug, Clone)]
pub enum SubmitRunRequestResult {
	Launched { reserved_id: Uuid, run_id: Uuid },
	Skipped { reserved_id: Uuid, run_key: String },
	BackfillLaunched { reserved_id: Uuid, backfill_id: Uuid },
	Errored { reserved_id: Uuid, error: String },
}

pub const RUN_KEY_TAG: &str = "dagster/sensor_run_key";
pub const SENSOR_NAME_TAG: &str = "dagster/sensor_name";
pub const TICK_ID_TAG: &str = "sensor_daemon/tick_id";

/// Output of evaluating a sensor's user code for one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorRuntimeData {
	pub log_key: Option<String>,
	pub asset_events: Vec<serde_json::Value>,
	pub dynamic_partitions_requests: Vec<DynamicPartitionsMutationRequest>,
	pub run_requests: Vec<RunRequest>,
	pub automation_condition_evaluations: Vec<AutomationConditionEvaluation>,
	pub run_reactions: Vec<RunReaction>,
	pub skip_message: Option<String>,
	pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamicPartitionMutationKind {
	Add,
	Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicPartitionsMutationRequest {
	pub partitions_def_name: String,
	pub kind: DynamicPartitionMutationKind,
	pub partition_keys: Vec<String>,
}
