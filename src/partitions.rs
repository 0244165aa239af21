//! C8: dynamic partition handler. Applies add/delete mutations idempotently against the store.

use crate::model::{
	DynamicPartitionMutationKind, DynamicPartitionsMutationRequest, DynamicPartitionsRequestResult,
};
use crate::store::InstanceStore;

/// Applies one mutation request, returning a result recorded on the tick regardless of whether
/// anything actually changed (a no-op add/delete is still reported, just with empty lists).
pub async fn apply(
	store: &dyn InstanceStore,
	request: &DynamicPartitionsMutationRequest,
) -> anyhow::Result<DynamicPartitionsRequestResult> {
	let mut existent = Vec::new();
	let mut nonexistent = Vec::new();

	for key in &request.partition_keys {
		if store.has_dynamic_partition(&request.partitions_def_name, key).await? {
			existent.push(key.clone());
		} else {
			nonexistent.push(key.clone());
		}
	}

	let mut result = DynamicPartitionsRequestResult {
		partitions_def_name: request.partitions_def_name.clone(),
		..Default::default()
	};

	match request.kind {
		DynamicPartitionMutationKind::Add => {
			if !nonexistent.is_empty() {
				store
					.add_dynamic_partitions(&request.partitions_def_name, &nonexistent)
					.await?;
			}
			result.skipped_partitions = existent;
			result.added_partitions = nonexistent;
		}
		DynamicPartitionMutationKind::Delete => {
			// Bulk delete isn't exposed by the store yet, so this stays one key at a time.
			for key in &existent {
				store.delete_dynamic_partition(&request.partitions_def_name, key).await?;
			}
			result.skipped_partitions = nonexistent;
			result.deleted_partitions = existent;
		}
	}

	crate::metrics::DYNAMIC_PARTITION_MUTATIONS_TOTAL
		.with_label_values(&[
			&request.partitions_def_name,
			match request.kind {
				DynamicPartitionMutationKind::Add => "add",
				DynamicPartitionMutationKind::Delete => "delete",
			},
		])
		.inc_by((result.added_partitions.len() + result.deleted_partitions.len()) as u64);

	Ok(result)
}
