//! C10: iteration loop. Enumerates sensors, dispatches per-sensor evaluation, paces itself to a
//! minimum cycle time, and yields heartbeats a supervisor can watch for liveness.
//!
//! Structured the same way the teacher's own worker loop is: a `HashMap<SelectorId, Handle>`
//! owned solely by this task enforces "one in-flight unit of work per key", `tokio::select!`
//! combines the pacing interval with a shutdown signal, and graceful shutdown sends a stop
//! signal to every outstanding task before waiting on them with a bounded timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::aggregator;
use crate::config::DaemonConfig;
use crate::context::LaunchContext;
use crate::error::DaemonError;
use crate::evaluator::{self, EvaluationArgs};
use crate::gate;
use crate::model::{InstigatorState, Sensor};
use crate::selector;
use crate::store::{InstanceStore, WorkspaceContext};

const SHUTDOWN_PROGRESS_INTERVAL: Duration = Duration::from_secs(7);

#[derive(Debug, Clone)]
pub enum HeartbeatEvent {
	StartSpan,
	EndSpan,
	Tick { selector_id: String },
	Error(String),
}

struct SensorTask {
	handle: JoinHandle<()>,
}

pub struct SensorWorker {
	store: Arc<dyn InstanceStore>,
	workspace: Arc<dyn WorkspaceContext>,
	config: DaemonConfig,
	heartbeat: mpsc::Sender<HeartbeatEvent>,
	running: HashMap<String, SensorTask>,
}

impl SensorWorker {
	pub fn new(
		store: Arc<dyn InstanceStore>,
		workspace: Arc<dyn WorkspaceContext>,
		config: DaemonConfig,
		heartbeat: mpsc::Sender<HeartbeatEvent>,
	) -> Self {
		SensorWorker { store, workspace, config, heartbeat, running: HashMap::new() }
	}

	/// Runs iterations until `shutdown_rx` fires, targeting `config.min_loop_interval()` per pass.
	#[tracing::instrument(skip_all)]
	pub async fn run_iteration_loop(mut self, mut shutdown_rx: watch::Receiver<()>) -> anyhow::Result<()> {
		loop {
			let pass_start = Instant::now();

			let _ = self.heartbeat.send(HeartbeatEvent::StartSpan).await;

			let outcome = self.run_iteration(&mut shutdown_rx).await;
			let label = if outcome.is_ok() { "ok" } else { "error" };
			crate::metrics::ITERATION_DURATION
				.with_label_values(&[label])
				.observe(pass_start.elapsed().as_secs_f64());

			if let Err(err) = outcome {
				tracing::error!(?err, "iteration failed");
				let _ = self.heartbeat.send(HeartbeatEvent::Error(err.to_string())).await;
			}

			let _ = self.heartbeat.send(HeartbeatEvent::EndSpan).await;

			let elapsed = pass_start.elapsed();
			let sleep_for = self.config.min_loop_interval().saturating_sub(elapsed);

			tokio::select! {
				_ = tokio::time::sleep(sleep_for) => {}
				_ = shutdown_rx.changed() => break,
			}

			if *shutdown_rx.borrow() {
				break;
			}
		}

		self.shutdown().await;
		Ok(())
	}

	/// Runs exactly one pass over the current sensor population.
	#[tracing::instrument(skip_all)]
	pub async fn run_iteration(&mut self, shutdown_rx: &mut watch::Receiver<()>) -> anyhow::Result<()> {
		let sensors = self.workspace.snapshot_sensors().await?;

		self.running.retain(|_, task| !task.handle.is_finished());

		for sensor in sensors {
			if shutdown_rx.has_changed().unwrap_or(false) {
				break;
			}

			if sensor.handled_by_asset_daemon {
				continue;
			}

			let selector_id = sensor.selector.selector_id();

			let state = aggregator::ensure_declared_state(self.store.as_ref(), &sensor).await?;
			if !crate::store::default_sensor_status(state.status) {
				continue;
			}

			let data = state.sensor_data();
			if gate::too_soon(&sensor, &data, now()) {
				continue;
			}

			let _ = self.heartbeat.send(HeartbeatEvent::Tick { selector_id: selector_id.clone() }).await;

			match self.config.evaluation_concurrency() {
				Some(_) => self.dispatch_pooled(sensor, state, selector_id),
				None => {
					process_tick(
						self.store.as_ref(),
						self.workspace.as_ref(),
						&self.config,
						&sensor,
						&state,
						&self.heartbeat,
					)
					.await?;
				}
			}
		}

		Ok(())
	}

	fn dispatch_pooled(&mut self, sensor: Sensor, state: InstigatorState, selector_id: String) {
		if self.running.contains_key(&selector_id) {
			// Previous evaluation of this sensor is still in flight; skip this pass.
			return;
		}

		let store = self.store.clone();
		let workspace = self.workspace.clone();
		let config = self.config.clone();
		let heartbeat = self.heartbeat.clone();
		let selector_id_for_log = selector_id.clone();

		let handle = tokio::spawn(async move {
			if let Err(err) =
				process_tick(store.as_ref(), workspace.as_ref(), &config, &sensor, &state, &heartbeat)
					.await
			{
				tracing::error!(?err, selector_id = %selector_id_for_log, "sensor evaluation failed");
			}
		});

		self.running.insert(selector_id, SensorTask { handle });
	}

	#[tracing::instrument(skip_all)]
	async fn shutdown(self) {
		tracing::info!(remaining = self.running.len(), "starting sensor worker shutdown");

		let mut futs = self.running.into_values().map(|t| t.handle).collect::<FuturesUnordered<_>>();

		let mut progress = tokio::time::interval(SHUTDOWN_PROGRESS_INTERVAL);
		progress.tick().await;

		loop {
			tokio::select! {
				res = futs.next() => {
					if res.is_none() {
						break;
					}
				}
				_ = progress.tick() => {
					tracing::info!(remaining = futs.len(), "sensor worker still shutting down");
				}
			}
		}

		tracing::info!("sensor worker shutdown complete");
	}
}

fn now() -> i64 {
	chrono::Utc::now().timestamp()
}

/// Per-tick processing (§4.5): re-checks the gate, marks the start, selects a tick, and either
/// resumes an unsubmitted reservation or runs a fresh evaluation, always through the launch
/// context so every exit path is finalized.
#[tracing::instrument(skip_all, fields(sensor_name = %sensor.selector.sensor_name))]
pub async fn process_tick(
	store: &dyn InstanceStore,
	workspace: &dyn WorkspaceContext,
	config: &DaemonConfig,
	sensor: &Sensor,
	state: &InstigatorState,
	heartbeat: &mpsc::Sender<HeartbeatEvent>,
) -> anyhow::Result<()> {
	let origin_id = aggregator::origin_id(sensor);
	let selector_id = sensor.selector.selector_id();

	// Re-read state: it may have moved since the outer loop snapshotted it.
	let state = store
		.get_instigator_state(&origin_id, &selector_id)
		.await?
		.unwrap_or_else(|| state.clone());
	let data = state.sensor_data();

	let eval_ts = now();
	if gate::too_soon(sensor, &data, eval_ts) {
		return Ok(());
	}

	let state = aggregator::mark_start(store, &state, eval_ts).await?;
	let data = state.sensor_data();

	let tick = selector::select_tick(
		store,
		config,
		&origin_id,
		&selector_id,
		&sensor.selector.sensor_name,
		&data,
		eval_ts,
	)
	.await?;

	let resume = tick.has_unsubmitted_reservations();
	let mut ctx = LaunchContext::new(store, config, tick);

	let outcome =
		run_tick_body(store, workspace, config, sensor, &data, &mut ctx, resume, heartbeat).await;

	ctx.close(outcome.map_err(|err| match err.downcast::<DaemonError>() {
		Ok(daemon_err) => daemon_err,
		Err(other) => DaemonError::EvaluationFailed(other.to_string()),
	}))
	.await
}

async fn run_tick_body(
	store: &dyn InstanceStore,
	workspace: &dyn WorkspaceContext,
	config: &DaemonConfig,
	sensor: &Sensor,
	data: &crate::model::SensorData,
	ctx: &mut LaunchContext<'_>,
	resume: bool,
	heartbeat: &mpsc::Sender<HeartbeatEvent>,
) -> anyhow::Result<()> {
	let code_location = workspace
		.get_code_location(&sensor.selector.code_location)
		.await
		.map_err(|err| DaemonError::CodeLocationNotFound(err.to_string()))?;

	let origin_selector_id = sensor.selector.selector_id();

	if resume {
		let cursor = ctx.tick().cursor.clone();
		let reservations: Vec<_> = ctx
			.tick()
			.unsubmitted_reservations()
			.into_iter()
			.cloned()
			.collect();
		return crate::submission::submit_all(
			store,
			ctx,
			&sensor.selector.sensor_name,
			&origin_selector_id,
			config.submission_concurrency(),
			reservations,
			false,
			Vec::new(),
			cursor,
			heartbeat,
		)
		.await;
	}

	evaluator::evaluate(
		store,
		code_location.as_ref(),
		ctx,
		data,
		EvaluationArgs {
			sensor_name: &sensor.selector.sensor_name,
			origin_selector_id: &origin_selector_id,
			submission_concurrency: config.submission_concurrency(),
		},
		heartbeat,
	)
	.await
}
