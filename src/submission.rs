//! C7: submission engine. Reserves ids, persists the reservation before launching anything,
//! then fans out the actual launches -- the component that makes I2 (`run_ids ⊆ reserved_run_ids`)
//! and P5 (replay-safety) hold.

use std::collections::HashMap;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::context::LaunchContext;
use crate::model::{
	AutomationConditionEvaluation, PartitionBackfill, ReservedRun, Run, RunRequest, RunStatus,
	SubmitRunRequestResult, RUN_KEY_TAG, SENSOR_NAME_TAG,
};
use crate::store::InstanceStore;
use crate::suppressor;
use crate::worker::HeartbeatEvent;

/// Reserves an id for each resolved request, ahead of any persistence or launch attempt.
pub fn reserve(requests: Vec<RunRequest>) -> Vec<ReservedRun> {
	requests
		.into_iter()
		.map(|request| {
			let is_backfill = request.is_backfill();
			ReservedRun { reserved_id: Uuid::new_v4(), request, is_backfill }
		})
		.collect()
}

/// Runs the full submission sequence for one tick: persist automation evaluations, commit the
/// reservation set, fan the launches out across the store, then fold the results back onto the
/// tick. `reservations` may come from a fresh evaluation or from resuming an interrupted tick.
pub async fn submit_all(
	store: &dyn InstanceStore,
	ctx: &mut LaunchContext<'_>,
	sensor_name: &str,
	origin_selector_id: &str,
	concurrency: usize,
	reservations: Vec<ReservedRun>,
	persist_reservation: bool,
	mut automation_evaluations: Vec<AutomationConditionEvaluation>,
	cursor: Option<String>,
	heartbeat: &mpsc::Sender<HeartbeatEvent>,
) -> anyhow::Result<()> {
	if !automation_evaluations.is_empty() {
		for e in &mut automation_evaluations {
			e.run_ids.clear();
		}
		if store.supports_automation_condition_evaluations().await {
			store
				.put_automation_condition_evaluations(ctx.tick().tick_id, automation_evaluations.clone())
				.await?;
		}
	}

	let requests: Vec<(Uuid, RunRequest, bool)> = reservations
		.into_iter()
		.map(|r| (r.reserved_id, r.request, r.is_backfill))
		.collect();

	if persist_reservation {
		ctx.set_run_requests(requests.clone(), cursor.clone()).await?;
	}

	let run_keys: Vec<String> = requests
		.iter()
		.filter(|(_, _, is_backfill)| !is_backfill)
		.filter_map(|(_, r, _)| r.run_key.clone())
		.collect();
	let collisions =
		suppressor::find_colliding_runs(store, sensor_name, origin_selector_id, &run_keys).await?;

	let results =
		launch_many(store, sensor_name, concurrency, requests, &collisions, heartbeat).await;

	let mut skipped_keys = Vec::new();
	let mut run_id_by_asset: HashMap<String, Vec<Uuid>> = HashMap::new();

	for result in results {
		match result {
			SubmitRunRequestResult::Launched { reserved_id, run_id } => {
				let run_key = ctx
					.tick()
					.reserved_runs
					.iter()
					.find(|r| r.reserved_id == reserved_id)
					.and_then(|r| r.request.run_key.clone());

				if let Some(sel) = ctx
					.tick()
					.reserved_runs
					.iter()
					.find(|r| r.reserved_id == reserved_id)
					.and_then(|r| r.request.asset_selection.clone())
				{
					for key in sel {
						run_id_by_asset.entry(key).or_default().push(run_id);
					}
				}

				ctx.record_submitted_run(run_id, run_key);
				crate::metrics::RUNS_SUBMITTED_TOTAL.with_label_values(&[sensor_name]).inc();
			}
			SubmitRunRequestResult::BackfillLaunched { backfill_id, .. } => {
				ctx.record_submitted_run(backfill_id, None);
				crate::metrics::RUNS_SUBMITTED_TOTAL.with_label_values(&[sensor_name]).inc();
			}
			SubmitRunRequestResult::Skipped { run_key, .. } => {
				skipped_keys.push(run_key);
				crate::metrics::RUNS_SKIPPED_TOTAL.with_label_values(&[sensor_name]).inc();
			}
			SubmitRunRequestResult::Errored { reserved_id, error } => {
				tracing::error!(%reserved_id, %error, "failed to launch run");
			}
		}
	}

	if !automation_evaluations.is_empty() {
		for e in &mut automation_evaluations {
			if let Some(ids) = run_id_by_asset.get(&e.asset_key) {
				e.run_ids = ids.clone();
			}
		}
		if store.supports_automation_condition_evaluations().await {
			store
				.put_automation_condition_evaluations(ctx.tick().tick_id, automation_evaluations)
				.await?;
		}
	}

	if !skipped_keys.is_empty() {
		tracing::info!(?skipped_keys, "skipped run requests with already-launched run keys");
	}

	ctx.finalize_from_submissions(cursor);

	Ok(())
}

async fn launch_many(
	store: &dyn InstanceStore,
	sensor_name: &str,
	concurrency: usize,
	requests: Vec<(Uuid, RunRequest, bool)>,
	collisions: &HashMap<String, Run>,
	heartbeat: &mpsc::Sender<HeartbeatEvent>,
) -> Vec<SubmitRunRequestResult> {
	let mut futs = FuturesUnordered::new();
	let mut pending = requests.into_iter();
	let mut results = Vec::new();

	for _ in 0..concurrency {
		if let Some((id, req, is_backfill)) = pending.next() {
			futs.push(launch_one(store, sensor_name, id, req, is_backfill, collisions));
		}
	}

	while let Some(result) = futs.next().await {
		results.push(result);

		// One heartbeat per arriving result, so a long fan-out of launches stays visible to
		// the supervisor between individual submissions rather than only at the start and end.
		let _ = heartbeat
			.send(HeartbeatEvent::Tick { selector_id: sensor_name.to_string() })
			.await;

		if let Some((id, req, is_backfill)) = pending.next() {
			futs.push(launch_one(store, sensor_name, id, req, is_backfill, collisions));
		}
	}

	results
}

async fn launch_one(
	store: &dyn InstanceStore,
	sensor_name: &str,
	reserved_id: Uuid,
	request: RunRequest,
	is_backfill: bool,
	collisions: &HashMap<String, Run>,
) -> SubmitRunRequestResult {
	match launch_one_inner(store, sensor_name, reserved_id, &request, is_backfill, collisions).await {
		Ok(result) => result,
		Err(err) => SubmitRunRequestResult::Errored { reserved_id, error: err.to_string() },
	}
}

/// Checks the pre-fetched collision set before touching the store: a key that already maps to a
/// launched run is skipped outright, a `NotStarted` collision is resumed in place (a crash
/// between create and launch), and anything else falls through to `get_or_create_sensor_run`.
async fn launch_one_inner(
	store: &dyn InstanceStore,
	sensor_name: &str,
	reserved_id: Uuid,
	request: &RunRequest,
	is_backfill: bool,
	collisions: &HashMap<String, Run>,
) -> anyhow::Result<SubmitRunRequestResult> {
	if is_backfill {
		let mut tags = request.tags.clone();
		tags.insert(SENSOR_NAME_TAG.to_string(), sensor_name.to_string());

		let backfill = PartitionBackfill {
			backfill_id: reserved_id,
			asset_graph_subset: request.asset_graph_subset.clone().unwrap_or_default(),
			tags,
		};
		store.add_backfill(backfill).await?;
		return Ok(SubmitRunRequestResult::BackfillLaunched { reserved_id, backfill_id: reserved_id });
	}

	if let Some(run_key) = &request.run_key {
		if let Some(existing) = collisions.get(run_key) {
			if existing.status != RunStatus::NotStarted {
				return Ok(SubmitRunRequestResult::Skipped { reserved_id, run_key: run_key.clone() });
			}
			store.submit_run(existing.run_id).await?;
			return Ok(SubmitRunRequestResult::Launched { reserved_id, run_id: existing.run_id });
		}
	}

	let mut tags = request.tags.clone();
	tags.insert(SENSOR_NAME_TAG.to_string(), sensor_name.to_string());
	if let Some(run_key) = &request.run_key {
		tags.insert(RUN_KEY_TAG.to_string(), run_key.clone());
	}

	let run = store
		.get_or_create_sensor_run(reserved_id, sensor_name, request.run_key.as_deref(), tags)
		.await?;

	if run.status == RunStatus::NotStarted {
		store.submit_run(run.run_id).await?;
		Ok(SubmitRunRequestResult::Launched { reserved_id, run_id: run.run_id })
	} else {
		Ok(SubmitRunRequestResult::Skipped {
			reserved_id,
			run_key: request.run_key.clone().unwrap_or_default(),
		})
	}
}
