//! C4: evaluator. Invokes a sensor's user code through the workspace and interprets its output,
//! dispatching to the dynamic-partition handler, run-reaction handler, or submission engine.

use tokio::sync::mpsc;

use crate::context::LaunchContext;
use crate::model::SensorData;
use crate::partitions;
use crate::reactions;
use crate::resolver;
use crate::store::{CodeLocation, InstanceStore};
use crate::submission;
use crate::worker::HeartbeatEvent;

pub struct EvaluationArgs<'a> {
	pub sensor_name: &'a str,
	pub origin_selector_id: &'a str,
	pub submission_concurrency: usize,
}

#[tracing::instrument(skip_all, fields(sensor_name = %args.sensor_name))]
pub async fn evaluate(
	store: &dyn InstanceStore,
	code_location: &dyn CodeLocation,
	ctx: &mut LaunchContext<'_>,
	data: &SensorData,
	args: EvaluationArgs<'_>,
	heartbeat: &mpsc::Sender<HeartbeatEvent>,
) -> anyhow::Result<()> {
	let runtime_data = code_location
		.get_external_sensor_execution_data(
			args.sensor_name,
			data.last_tick_timestamp,
			data.last_run_key.as_deref(),
			data.cursor.as_deref(),
			ctx.tick().log_key.as_deref(),
			data.last_sensor_start_timestamp,
		)
		.await?;

	// The remote call above can block for a while on a slow code location; yield a heartbeat
	// as soon as it returns so a supervisor watching this sensor doesn't see a gap.
	let _ = heartbeat
		.send(HeartbeatEvent::Tick { selector_id: args.origin_selector_id.to_string() })
		.await;

	ctx.set_log_key(runtime_data.log_key.clone());

	for event in runtime_data.asset_events {
		store.report_runless_asset_event(event).await?;
	}

	for request in &runtime_data.dynamic_partitions_requests {
		let result = partitions::apply(store, request).await?;
		ctx.record_dynamic_partition_result(result);
	}

	let has_run_requests = !runtime_data.run_requests.is_empty();
	let has_automation_evaluations = !runtime_data.automation_condition_evaluations.is_empty();

	if !has_run_requests && !has_automation_evaluations {
		if !runtime_data.run_reactions.is_empty() {
			// One tick is produced per evaluation; if user code emits multiple reactions in a
			// single pass, only the last one's cursor/origin_run_id wins.
			for reaction in &runtime_data.run_reactions {
				reactions::process(store, ctx, reaction, runtime_data.cursor.clone()).await?;
			}
			return Ok(());
		}

		ctx.finalize_skipped(runtime_data.cursor.clone(), runtime_data.skip_message.clone());
		return Ok(());
	}

	let mut resolved = Vec::new();
	for request in runtime_data.run_requests {
		if let Some(r) = resolver::resolve(code_location, ctx.tick().tick_id, request).await? {
			resolved.push(r);
		}
	}

	let reserved_runs = submission::reserve(resolved);

	submission::submit_all(
		store,
		ctx,
		args.sensor_name,
		args.origin_selector_id,
		args.submission_concurrency,
		reserved_runs,
		true,
		runtime_data.automation_condition_evaluations,
		runtime_data.cursor,
		heartbeat,
	)
	.await
}
