use prometheus::{HistogramVec, IntCounterVec, register_histogram_vec, register_int_counter_vec};

lazy_static::lazy_static! {
	pub static ref TICKS_FINISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
		"sensor_daemon_ticks_finished_total",
		"Count of ticks that reached a terminal status.",
		&["sensor_name", "status"]
	).unwrap();

	pub static ref RUNS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
		"sensor_daemon_runs_submitted_total",
		"Count of runs submitted by a sensor tick.",
		&["sensor_name"]
	).unwrap();

	pub static ref RUNS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
		"sensor_daemon_runs_skipped_total",
		"Count of run requests skipped due to duplicate run keys.",
		&["sensor_name"]
	).unwrap();

	pub static ref DYNAMIC_PARTITION_MUTATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
		"sensor_daemon_dynamic_partition_mutations_total",
		"Count of dynamic partition keys added or deleted.",
		&["partitions_def_name", "kind"]
	).unwrap();

	pub static ref ITERATION_DURATION: HistogramVec = register_histogram_vec!(
		"sensor_daemon_iteration_duration_seconds",
		"Duration of one full iteration loop pass.",
		&["outcome"]
	).unwrap();
}
