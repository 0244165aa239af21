//! In-memory doubles for `InstanceStore`/`WorkspaceContext`, used to drive the daemon core
//! through full scenarios without a real database or workspace process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sensor_daemon::model::*;
use sensor_daemon::store::{CodeLocation, InstanceStore, StoreResult, WorkspaceContext};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
	states: HashMap<(String, String), InstigatorState>,
	ticks: HashMap<Uuid, Tick>,
	ticks_by_selector: HashMap<(String, String), Vec<Uuid>>,
	runs: HashMap<Uuid, Run>,
	backfills: Vec<PartitionBackfill>,
	dynamic_partitions: HashMap<String, Vec<String>>,
	engine_events: Vec<(String, Uuid)>,
}

pub struct FakeStore {
	inner: Mutex<Inner>,
}

impl FakeStore {
	pub fn new() -> Arc<Self> {
		Arc::new(FakeStore { inner: Mutex::new(Inner::default()) })
	}

	pub async fn seed_state(&self, state: InstigatorState) {
		let mut inner = self.inner.lock().await;
		inner.states.insert((state.origin_id.clone(), state.selector_id.clone()), state);
	}

	pub async fn seed_run(&self, run: Run) {
		let mut inner = self.inner.lock().await;
		inner.runs.insert(run.run_id, run);
	}

	pub async fn state(&self, origin_id: &str, selector_id: &str) -> Option<InstigatorState> {
		self.inner.lock().await.states.get(&(origin_id.to_string(), selector_id.to_string())).cloned()
	}

	pub async fn ticks_for(&self, origin_id: &str, selector_id: &str) -> Vec<Tick> {
		let inner = self.inner.lock().await;
		inner
			.ticks_by_selector
			.get(&(origin_id.to_string(), selector_id.to_string()))
			.into_iter()
			.flatten()
			.map(|id| inner.ticks[id].clone())
			.collect()
	}

	pub async fn engine_events(&self) -> Vec<(String, Uuid)> {
		self.inner.lock().await.engine_events.clone()
	}
}

#[async_trait]
impl InstanceStore for FakeStore {
	async fn all_sensor_states(&self) -> StoreResult<Vec<InstigatorState>> {
		Ok(self.inner.lock().await.states.values().cloned().collect())
	}

	async fn get_instigator_state(
		&self,
		origin_id: &str,
		selector_id: &str,
	) -> StoreResult<Option<InstigatorState>> {
		Ok(self
			.inner
			.lock()
			.await
			.states
			.get(&(origin_id.to_string(), selector_id.to_string()))
			.cloned())
	}

	async fn put_instigator_state(&self, state: InstigatorState) -> StoreResult<()> {
		let mut inner = self.inner.lock().await;
		inner.states.insert((state.origin_id.clone(), state.selector_id.clone()), state);
		Ok(())
	}

	async fn create_tick(&self, tick: Tick) -> StoreResult<Tick> {
		let mut inner = self.inner.lock().await;
		inner
			.ticks_by_selector
			.entry((tick.origin_id.clone(), tick.selector_id.clone()))
			.or_default()
			.push(tick.tick_id);
		inner.ticks.insert(tick.tick_id, tick.clone());
		Ok(tick)
	}

	async fn update_tick(&self, tick: &Tick) -> StoreResult<()> {
		let mut inner = self.inner.lock().await;
		if !inner.ticks.contains_key(&tick.tick_id) {
			inner
				.ticks_by_selector
				.entry((tick.origin_id.clone(), tick.selector_id.clone()))
				.or_default()
				.push(tick.tick_id);
		}
		inner.ticks.insert(tick.tick_id, tick.clone());
		Ok(())
	}

	async fn latest_tick(&self, origin_id: &str, selector_id: &str) -> StoreResult<Option<Tick>> {
		let inner = self.inner.lock().await;
		Ok(inner
			.ticks_by_selector
			.get(&(origin_id.to_string(), selector_id.to_string()))
			.and_then(|ids| ids.last())
			.map(|id| inner.ticks[id].clone()))
	}

	async fn purge_ticks(
		&self,
		origin_id: &str,
		selector_id: &str,
		before_timestamp: i64,
		statuses: &[TickStatus],
	) -> StoreResult<()> {
		let mut inner = self.inner.lock().await;
		let key = (origin_id.to_string(), selector_id.to_string());
		if let Some(ids) = inner.ticks_by_selector.get(&key).cloned() {
			let keep: Vec<Uuid> = ids
				.into_iter()
				.filter(|id| {
					let t = &inner.ticks[id];
					!(statuses.contains(&t.status) && t.timestamp < before_timestamp)
				})
				.collect();
			inner.ticks_by_selector.insert(key, keep);
		}
		Ok(())
	}

	async fn tick_retention_days(&self, _status: TickStatus) -> StoreResult<Option<i64>> {
		Ok(None)
	}

	async fn get_runs_by_tag(&self, key: &str, value: &str) -> StoreResult<Vec<Run>> {
		let inner = self.inner.lock().await;
		Ok(inner
			.runs
			.values()
			.filter(|r| r.tags.get(key).map(String::as_str) == Some(value))
			.cloned()
			.collect())
	}

	async fn get_or_create_sensor_run(
		&self,
		reserved_id: Uuid,
		sensor_name: &str,
		run_key: Option<&str>,
		tags: HashMap<String, String>,
	) -> StoreResult<Run> {
		let mut inner = self.inner.lock().await;

		if let Some(run_key) = run_key {
			if let Some(existing) = inner.runs.values().find(|r| {
				r.tags.get(RUN_KEY_TAG).map(String::as_str) == Some(run_key)
					&& r.tags.get(SENSOR_NAME_TAG).map(String::as_str) == Some(sensor_name)
			}) {
				return Ok(existing.clone());
			}
		}

		let run = Run {
			run_id: reserved_id,
			status: RunStatus::NotStarted,
			tags,
			origin_selector_id: None,
		};
		inner.runs.insert(reserved_id, run.clone());
		Ok(run)
	}

	async fn submit_run(&self, run_id: Uuid) -> StoreResult<()> {
		let mut inner = self.inner.lock().await;
		if let Some(run) = inner.runs.get_mut(&run_id) {
			run.status = RunStatus::Running;
		}
		Ok(())
	}

	async fn add_backfill(&self, backfill: PartitionBackfill) -> StoreResult<()> {
		self.inner.lock().await.backfills.push(backfill);
		Ok(())
	}

	async fn has_dynamic_partition(&self, def_name: &str, key: &str) -> StoreResult<bool> {
		Ok(self
			.inner
			.lock()
			.await
			.dynamic_partitions
			.get(def_name)
			.map_or(false, |keys| keys.contains(&key.to_string())))
	}

	async fn add_dynamic_partitions(&self, def_name: &str, keys: &[String]) -> StoreResult<()> {
		let mut inner = self.inner.lock().await;
		let entry = inner.dynamic_partitions.entry(def_name.to_string()).or_default();
		for key in keys {
			if !entry.contains(key) {
				entry.push(key.clone());
			}
		}
		Ok(())
	}

	async fn delete_dynamic_partition(&self, def_name: &str, key: &str) -> StoreResult<()> {
		let mut inner = self.inner.lock().await;
		if let Some(entry) = inner.dynamic_partitions.get_mut(def_name) {
			entry.retain(|k| k != key);
		}
		Ok(())
	}

	async fn report_runless_asset_event(&self, _event: serde_json::Value) -> StoreResult<()> {
		Ok(())
	}

	async fn report_engine_event(&self, message: String, run_id: Uuid) -> StoreResult<()> {
		self.inner.lock().await.engine_events.push((message, run_id));
		Ok(())
	}
}

/// Scripted sensor evaluation outputs, consumed one per call, last one repeating once exhausted.
pub struct FakeCodeLocation {
	pub responses: Mutex<Vec<SensorRuntimeData>>,
	pub stale_assets: Vec<String>,
	pub fail_unreachable: bool,
}

impl FakeCodeLocation {
	pub fn new(responses: Vec<SensorRuntimeData>) -> Arc<Self> {
		Arc::new(FakeCodeLocation {
			responses: Mutex::new(responses),
			stale_assets: Vec::new(),
			fail_unreachable: false,
		})
	}

	pub fn unreachable() -> Arc<Self> {
		Arc::new(FakeCodeLocation {
			responses: Mutex::new(Vec::new()),
			stale_assets: Vec::new(),
			fail_unreachable: true,
		})
	}
}

#[async_trait]
impl CodeLocation for FakeCodeLocation {
	async fn get_external_sensor_execution_data(
		&self,
		sensor_name: &str,
		_last_tick_timestamp: Option<i64>,
		_last_run_key: Option<&str>,
		_cursor: Option<&str>,
		_log_key: Option<&str>,
		_last_sensor_start_timestamp: Option<i64>,
	) -> StoreResult<SensorRuntimeData> {
		if self.fail_unreachable {
			return Err(sensor_daemon::error::DaemonError::UserCodeServerUnreachable(
				sensor_name.to_string(),
			)
			.into());
		}

		let mut responses = self.responses.lock().await;
		if responses.len() > 1 {
			Ok(responses.remove(0))
		} else {
			Ok(responses.first().cloned().unwrap_or_default())
		}
	}

	async fn resolve_stale_assets(&self, selection: &[String]) -> StoreResult<Vec<String>> {
		Ok(selection.iter().filter(|k| self.stale_assets.contains(k)).cloned().collect())
	}
}

pub struct FakeWorkspace {
	pub sensors: Vec<Sensor>,
	pub code_location: Arc<FakeCodeLocation>,
}

#[async_trait]
impl WorkspaceContext for FakeWorkspace {
	async fn snapshot_sensors(&self) -> StoreResult<Vec<Sensor>> {
		Ok(self.sensors.clone())
	}

	async fn get_code_location(&self, _name: &str) -> StoreResult<Arc<dyn CodeLocation>> {
		Ok(self.code_location.clone())
	}
}

pub fn test_sensor(name: &str, min_interval_seconds: Option<u64>) -> Sensor {
	Sensor {
		selector: SensorSelector {
			code_location: "repo.py".into(),
			repository: "__repository__".into(),
			sensor_name: name.into(),
		},
		min_interval_seconds,
		sensor_type: SensorType::Standard,
		default_status: InstigatorStatus::Running,
		handled_by_asset_daemon: false,
	}
}
