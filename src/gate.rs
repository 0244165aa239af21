//! C1: interval gate. Decides whether a sensor has been evaluated recently enough to skip.

use crate::model::{Sensor, SensorData};

/// Returns `true` if `now` is too soon after the sensor's last tick to evaluate it again.
pub fn too_soon(sensor: &Sensor, data: &SensorData, now: i64) -> bool {
	let Some(min_interval) = sensor.min_interval_seconds else {
		return false;
	};
	if min_interval == 0 {
		return false;
	}

	// Using the max of the two guards against a sensor whose previous tick was started but
	// never finished: without it, a stuck tick would let us re-dispatch every single loop pass.
	let last = match (data.last_tick_timestamp, data.last_tick_start_timestamp) {
		(Some(a), Some(b)) => Some(a.max(b)),
		(Some(a), None) => Some(a),
		(None, Some(b)) => Some(b),
		(None, None) => None,
	};

	let Some(last) = last else {
		return false;
	};

	(now - last) < min_interval as i64
}
