//! C6: duplicate suppressor. Looks up already-launched runs by run key ahead of submission, so
//! the launch step can skip or resume instead of creating a fresh run for a key already in flight.

use std::collections::HashMap;

use crate::model::{Run, RUN_KEY_TAG, SENSOR_NAME_TAG};
use crate::store::InstanceStore;

/// Looks up existing runs for each run key, keeping only the ones that actually collide with
/// this sensor: same sensor name, and either no origin recorded or a matching origin selector.
///
/// Fetched one key at a time -- an experiment with a single `run_key IN (...)` query came back
/// slower against the real store, so this stays serial.
pub async fn find_colliding_runs(
	store: &dyn InstanceStore,
	sensor_name: &str,
	origin_selector_id: &str,
	run_keys: &[String],
) -> anyhow::Result<HashMap<String, Run>> {
	let mut colliding = HashMap::new();

	for run_key in run_keys {
		let candidates = store.get_runs_by_tag(RUN_KEY_TAG, run_key).await?;

		for run in candidates {
			let same_sensor = run.tags.get(SENSOR_NAME_TAG).map(String::as_str) == Some(sensor_name);
			let origin_matches = run
				.origin_selector_id
				.as_deref()
				.map_or(true, |id| id == origin_selector_id);

			if same_sensor && origin_matches {
				colliding.insert(run_key.clone(), run);
				break;
			}
		}
	}

	Ok(colliding)
}
