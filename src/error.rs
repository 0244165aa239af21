//! Error taxonomy for the daemon core.
//!
//! Mirrors the predicate-based classification used throughout the teacher codebase
//! (`is_recoverable` / `is_retryable` on its workflow error type): callers branch on
//! what an error *means* for retry/cursor semantics rather than matching variants ad hoc.

use uuid::Uuid;

pub type DaemonResult<T> = Result<T, DaemonError>;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
	#[error("user code server unreachable for sensor `{0}`")]
	UserCodeServerUnreachable(String),

	#[error("code location `{0}` not found in workspace snapshot")]
	CodeLocationNotFound(String),

	#[error("sensor evaluation failed: {0}")]
	EvaluationFailed(String),

	#[error("failed to submit run for reserved id {reserved_id}: {source}")]
	SubmissionFailed {
		reserved_id: Uuid,
		#[source]
		source: anyhow::Error,
	},

	#[error("instance store error: {0}")]
	Store(#[source] anyhow::Error),

	#[error("workspace error: {0}")]
	Workspace(#[source] anyhow::Error),

	#[error("daemon shutting down")]
	Cancelled,

	#[error("invalid daemon configuration: {0}")]
	Config(#[source] anyhow::Error),
}

impl DaemonError {
	/// Transient evaluation failures do not count against a tick's `failure_count`;
	/// the tick is retried on the next loop pass without penalty.
	pub fn is_transient(&self) -> bool {
		matches!(self, DaemonError::UserCodeServerUnreachable(_))
	}

	/// Cancellation closes the launch context silently: no failure is recorded.
	pub fn is_cancellation(&self) -> bool {
		matches!(self, DaemonError::Cancelled)
	}
}
