//! C5: request resolver. Tags each accepted request with its originating tick and narrows
//! stale-assets-only requests down to the subset that is actually stale.

use uuid::Uuid;

use crate::model::{RunRequest, TICK_ID_TAG};
use crate::store::CodeLocation;

/// Resolves one raw `RunRequest` into a final request, or `None` if it should be dropped
/// (a stale-assets-only request where nothing turned out to be stale).
pub async fn resolve(
	code_location: &dyn CodeLocation,
	tick_id: Uuid,
	mut request: RunRequest,
) -> anyhow::Result<Option<RunRequest>> {
	request.tags.insert(TICK_ID_TAG.to_string(), tick_id.to_string());

	if request.stale_assets_only {
		let selection = request.asset_selection.clone().unwrap_or_default();
		let stale = code_location.resolve_stale_assets(&selection).await?;

		if stale.is_empty() {
			return Ok(None);
		}

		request.asset_selection = Some(stale);
		request.stale_assets_only = false;
	}

	Ok(Some(request))
}
