//! C9: run reaction handler. Processes run-status reactions, advancing the cursor even on
//! failure since reactions carry external side effects that must not be repeated.

use crate::context::LaunchContext;
use crate::model::RunReaction;
use crate::store::InstanceStore;

pub async fn process(
	store: &dyn InstanceStore,
	ctx: &mut LaunchContext<'_>,
	reaction: &RunReaction,
	cursor: Option<String>,
) -> anyhow::Result<()> {
	if let Some(error) = &reaction.error {
		tracing::error!(run_id = %reaction.run_id, %error, "run reaction failed");
		ctx.finalize_failure(cursor, Some(reaction.run_id));
	} else {
		store
			.report_engine_event(
				format!("acted on run status {} of run {}", reaction.run_status, reaction.run_id),
				reaction.run_id,
			)
			.await?;

		ctx.tick_mut().origin_run_id = Some(reaction.run_id);
		ctx.finalize_success(cursor);
	}

	Ok(())
}
