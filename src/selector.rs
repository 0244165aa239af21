//! C2: tick selector. Decides whether to resume an interrupted tick, clone a retried failure,
//! or start fresh -- the crash-safety core of the daemon.

use crate::config::DaemonConfig;
use crate::model::{SensorData, Tick, TickStatus};
use crate::store::InstanceStore;

/// Selects the tick to run this evaluation against.
///
/// `origin_id`/`selector_id`/`instigator_name` identify the sensor; `evaluation_timestamp` is
/// the time this evaluation started.
pub async fn select_tick(
	store: &dyn InstanceStore,
	config: &DaemonConfig,
	origin_id: &str,
	selector_id: &str,
	instigator_name: &str,
	data: &SensorData,
	evaluation_timestamp: i64,
) -> anyhow::Result<Tick> {
	// Fast path: a clean success means no interrupted tick can exist.
	if data.last_tick_success_timestamp.is_some() {
		return fresh_tick(store, origin_id, selector_id, instigator_name, evaluation_timestamp).await;
	}

	let Some(latest) = store.latest_tick(origin_id, selector_id).await? else {
		return fresh_tick(store, origin_id, selector_id, instigator_name, evaluation_timestamp).await;
	};

	match latest.status {
		TickStatus::Started => {
			let age = evaluation_timestamp - latest.timestamp;
			if latest.has_unsubmitted_reservations()
				&& age <= config.max_time_to_resume_tick().as_secs() as i64
			{
				return Ok(latest);
			}

			// Dangling STARTED tick past its resumption window: retire it and start fresh.
			let mut stale = latest;
			stale.status = TickStatus::Skipped;
			stale.end_timestamp = Some(evaluation_timestamp);
			stale.skip_reason = Some("interrupted tick exceeded resumption window".into());
			store.update_tick(&stale).await?;
		}
		TickStatus::Failure => {
			if latest.failure_count <= config.max_failure_resubmission_retries()
				&& latest.has_unsubmitted_reservations()
			{
				let mut retry = latest.clone();
				retry.status = TickStatus::Started;
				retry.error = None;
				retry.end_timestamp = None;
				retry.timestamp = evaluation_timestamp;
				return Ok(retry);
			}
		}
		TickStatus::Success | TickStatus::Skipped => {}
	}

	fresh_tick(store, origin_id, selector_id, instigator_name, evaluation_timestamp).await
}

/// Mints a new tick and persists it immediately through `create_tick`, so the store -- not the
/// client -- is the system of record for tick existence even before the first flush.
async fn fresh_tick(
	store: &dyn InstanceStore,
	origin_id: &str,
	selector_id: &str,
	instigator_name: &str,
	timestamp: i64,
) -> anyhow::Result<Tick> {
	let tick =
		Tick::new(origin_id.to_string(), selector_id.to_string(), instigator_name.to_string(), timestamp);
	store.create_tick(tick).await
}
