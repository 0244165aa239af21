//! C3: launch context. Scopes one tick's lifetime -- mutations accumulate in memory and are
//! flushed to the store on every exit path, including the error and cancellation paths, so a
//! crash mid-evaluation always leaves a recoverable tick behind.

use std::time::Duration;
use uuid::Uuid;

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::model::{DynamicPartitionsRequestResult, ReservedRun, RunRequest, Tick, TickStatus};
use crate::store::InstanceStore;

/// Retry cadence for the final state/tick write, mirroring the bounded commit-retry loop the
/// teacher runs around its own `complete_workflow`/`commit_workflow` calls.
const STORE_WRITE_RETRY: Duration = Duration::from_millis(150);
const MAX_STORE_WRITE_RETRIES: u32 = 5;

pub struct LaunchContext<'a> {
	store: &'a dyn InstanceStore,
	config: &'a DaemonConfig,
	tick: Tick,
}

impl<'a> LaunchContext<'a> {
	pub fn new(store: &'a dyn InstanceStore, config: &'a DaemonConfig, tick: Tick) -> Self {
		LaunchContext { store, config, tick }
	}

	pub fn tick(&self) -> &Tick {
		&self.tick
	}

	pub fn tick_mut(&mut self) -> &mut Tick {
		&mut self.tick
	}

	pub fn set_log_key(&mut self, log_key: Option<String>) {
		if log_key.is_some() {
			self.tick.log_key = log_key;
		}
	}

	pub fn record_dynamic_partition_result(&mut self, result: DynamicPartitionsRequestResult) {
		self.tick.dynamic_partitions_request_results.push(result);
	}

	pub fn record_submitted_run(&mut self, run_id: Uuid, run_key: Option<String>) {
		self.tick.run_ids.push(run_id);
		if let Some(run_key) = run_key {
			self.tick.run_keys.push(run_key);
		}
	}

	/// Persists the reservation set before any launch is attempted. This is the commitment
	/// point: once this returns, a crash can always be recovered by resuming this tick rather
	/// than re-evaluating the sensor.
	pub async fn set_run_requests(
		&mut self,
		requests: Vec<(Uuid, RunRequest, bool)>,
		cursor: Option<String>,
	) -> anyhow::Result<()> {
		self.tick.reserved_runs = requests
			.into_iter()
			.map(|(reserved_id, request, is_backfill)| ReservedRun {
				reserved_id,
				request,
				is_backfill,
			})
			.collect();
		self.tick.cursor = cursor;

		self.flush().await
	}

	pub fn finalize_skipped(&mut self, cursor: Option<String>, skip_reason: Option<String>) {
		self.tick.status = TickStatus::Skipped;
		self.tick.cursor = cursor;
		self.tick.skip_reason = skip_reason;
	}

	pub fn finalize_success(&mut self, cursor: Option<String>) {
		self.tick.status = TickStatus::Success;
		self.tick.cursor = cursor;
	}

	/// Finalizes after a submission fan-out: `SUCCESS` if any run was actually recorded,
	/// otherwise `SKIPPED` -- a tick that resolved zero requests isn't a failure.
	pub fn finalize_from_submissions(&mut self, cursor: Option<String>) {
		self.tick.status = if self.tick.run_ids.is_empty() {
			TickStatus::Skipped
		} else {
			TickStatus::Success
		};
		self.tick.cursor = cursor;
	}

	pub fn finalize_failure(&mut self, cursor: Option<String>, origin_run_id: Option<Uuid>) {
		self.tick.status = TickStatus::Failure;
		self.tick.cursor = cursor;
		self.tick.origin_run_id = origin_run_id;
		self.tick.should_update_cursor_on_failure = true;
	}

	async fn flush(&self) -> anyhow::Result<()> {
		retrying_write(|| self.store.update_tick(&self.tick)).await
	}

	/// Closes the context: classifies any error, finalizes the tick, flushes it, updates
	/// instigator state, and purges aged ticks. Called from every exit path of `process_tick`.
	#[tracing::instrument(skip_all, fields(tick_id = %self.tick.tick_id, selector_id = %self.tick.selector_id))]
	pub async fn close(mut self, outcome: Result<(), DaemonError>) -> anyhow::Result<()> {
		if let Err(err) = &outcome {
			if err.is_cancellation() {
				// Cooperative shutdown: finalize silently, no failure recorded.
				self.flush_and_update_state().await?;
				return Ok(());
			}

			self.tick.status = TickStatus::Failure;
			self.tick.error = Some(err.to_string());
			self.tick.end_timestamp = Some(self.tick.timestamp);

			if err.is_transient() {
				tracing::warn!(?err, "transient evaluation failure, tick will be retried");
			} else {
				tracing::error!(?err, "sensor evaluation failed");
				self.tick.failure_count += 1;
			}
		}

		if self.tick.end_timestamp.is_none() && self.tick.status.is_terminal() {
			self.tick.end_timestamp = Some(self.tick.timestamp);
		}

		if self.tick.status.is_terminal() {
			crate::metrics::TICKS_FINISHED_TOTAL
				.with_label_values(&[&self.tick.instigator_name, &self.tick.status.to_string()])
				.inc();
		}

		// A recorded failure is not propagated as an `Err` here -- it already lives on the tick.
		// Only a failure to persist that outcome (a real store error) escapes `close`.
		self.flush_and_update_state().await
	}

	async fn flush_and_update_state(&mut self) -> anyhow::Result<()> {
		self.flush().await?;

		if !self.tick.status.is_terminal() {
			return Ok(());
		}

		// Re-read the latest state to minimize the clobber window against any concurrent writer.
		let mut state = self
			.store
			.get_instigator_state(&self.tick.origin_id, &self.tick.selector_id)
			.await?
			.ok_or_else(|| anyhow::anyhow!("instigator state disappeared during tick processing"))?;

		let mut data = state.sensor_data();

		let advance_cursor =
			self.tick.status != TickStatus::Failure || self.tick.should_update_cursor_on_failure;

		if advance_cursor {
			if self.tick.cursor.is_some() {
				data.cursor = self.tick.cursor.clone();
			}
			// Tracks the last run key the sensor emitted, whether or not it resulted in a new
			// run -- a key that collided with an existing run was still "considered".
			if let Some(run_key) = self
				.tick
				.reserved_runs
				.iter()
				.rev()
				.find_map(|r| r.request.run_key.as_ref())
			{
				data.last_run_key = Some(run_key.clone());
			}
		}

		data.last_tick_start_timestamp = Some(
			data.last_tick_start_timestamp
				.map_or(self.tick.timestamp, |existing| existing.max(self.tick.timestamp)),
		);

		if self.tick.status == TickStatus::Failure {
			data.last_tick_success_timestamp = None;
		} else {
			data.last_tick_success_timestamp = self.tick.end_timestamp;
			data.last_tick_timestamp = self.tick.end_timestamp;
		}

		state.instigator_data = Some(data);

		retrying_write(|| self.store.put_instigator_state(state.clone())).await?;

		self.purge_aged_ticks().await
	}

	async fn purge_aged_ticks(&self) -> anyhow::Result<()> {
		use crate::model::TickStatus::*;

		for status in [Skipped, Success, Failure] {
			if let Some(days) = self.config.tick_retention_days(status) {
				let before = self.tick.timestamp - days * 86_400;
				self.store
					.purge_ticks(&self.tick.origin_id, &self.tick.selector_id, before, &[status])
					.await?;
			}
		}

		Ok(())
	}
}

async fn retrying_write<F, Fut>(mut write: F) -> anyhow::Result<()>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = anyhow::Result<()>>,
{
	let mut retries = 0;
	let mut interval = tokio::time::interval(STORE_WRITE_RETRY);
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

	loop {
		interval.tick().await;

		match write().await {
			Ok(()) => return Ok(()),
			Err(err) => {
				if retries >= MAX_STORE_WRITE_RETRIES {
					return Err(err);
				}
				retries += 1;
			}
		}
	}
}
