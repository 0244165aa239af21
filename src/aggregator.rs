//! C11: state aggregator. The two write points for `InstigatorState` outside of the launch
//! context's own close: creating a declared-in-code state, and marking a tick's start.

use crate::model::{InstigatorState, InstigatorStatus, Sensor, SensorData};
use crate::store::InstanceStore;

pub fn origin_id(sensor: &Sensor) -> String {
	format!("{}::{}", sensor.selector.code_location, sensor.selector.repository)
}

pub async fn ensure_declared_state(
	store: &dyn InstanceStore,
	sensor: &Sensor,
) -> anyhow::Result<InstigatorState> {
	let origin_id = origin_id(sensor);
	let selector_id = sensor.selector.selector_id();

	if let Some(existing) = store.get_instigator_state(&origin_id, &selector_id).await? {
		return Ok(existing);
	}

	let state = InstigatorState {
		origin_id,
		selector_id,
		instigator_name: sensor.selector.sensor_name.clone(),
		status: InstigatorStatus::DeclaredInCode,
		instigator_data: Some(SensorData {
			min_interval: sensor.min_interval_seconds,
			sensor_type: Some(sensor.sensor_type),
			..Default::default()
		}),
	};

	store.put_instigator_state(state.clone()).await?;
	Ok(state)
}

/// Persisted before evaluation starts: records that this sensor is being evaluated right now,
/// clearing the "last success" marker so a crash mid-evaluation is detectable by the selector.
pub async fn mark_start(
	store: &dyn InstanceStore,
	state: &InstigatorState,
	now: i64,
) -> anyhow::Result<InstigatorState> {
	let mut updated = state.clone();
	let mut data = updated.sensor_data();

	data.last_tick_start_timestamp = Some(now);
	data.last_tick_success_timestamp = None;
	if data.last_sensor_start_timestamp.is_none() {
		data.last_sensor_start_timestamp = Some(now);
	}

	updated.instigator_data = Some(data);
	store.put_instigator_state(updated.clone()).await?;

	Ok(updated)
}
