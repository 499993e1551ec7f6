use time::OffsetDateTime;

use crate::{
	ContinuationToken, Error, PartitionPlan, PartitionStore, Result,
	fetch::{AdaptiveFetchController, FetchDecision, FetchPolicy},
};
use pn_storage::{
	models::{DelegationMetadata, StoreCursor},
	queries::{PartitionQuery, RowFilter},
};

pub(crate) struct WalkRequest<'a> {
	pub(crate) plan: &'a PartitionPlan,
	pub(crate) start: OffsetDateTime,
	pub(crate) end: OffsetDateTime,
	pub(crate) filter: &'a RowFilter,
	pub(crate) policy: FetchPolicy,
	pub(crate) resume: Option<&'a ContinuationToken>,
}

#[derive(Debug, Default)]
pub(crate) struct WalkOutcome {
	pub(crate) rows: Vec<DelegationMetadata>,
	pub(crate) queries: u32,
}

/// Fills one buffer from the plan's partitions in order until it holds `required_size` rows or
/// the partitions run out.
pub(crate) async fn walk(store: &dyn PartitionStore, req: &WalkRequest<'_>) -> Result<WalkOutcome> {
	let (start_index, mut cursor) = match req.resume {
		Some(token) => {
			let position = req.plan.position(&token.external_key).ok_or_else(|| {
				Error::ResumeTokenInvalid {
					message: format!(
						"Partition {} is not part of this search.",
						token.external_key
					),
				}
			})?;

			(position, Some(token.internal_key.clone()))
		},
		None => (0, None),
	};
	let required_size = req.policy.required_size as usize;
	let mut outcome = WalkOutcome::default();

	for partition in &req.plan.partitions[start_index..] {
		let mut controller = AdaptiveFetchController::new(req.policy);
		let mut partition_cursor: Option<StoreCursor> = cursor.take();

		loop {
			let query = PartitionQuery {
				index: req.plan.index,
				partition,
				start: req.start,
				end: req.end,
				filter: req.filter,
				limit: controller.fetch_size(),
				cursor: partition_cursor.as_ref(),
			};
			let page = store.query_partition(&query).await?;
			let returned = page.rows.len();

			outcome.queries += 1;
			outcome.rows.extend(page.rows);

			tracing::debug!(
				partition = %partition,
				index = req.plan.index.index_name(),
				fetch_size = query.limit,
				returned,
				buffered = outcome.rows.len(),
				"Partition fetch completed."
			);

			match controller.record(returned, outcome.rows.len(), page.next_cursor.is_some()) {
				FetchDecision::Satisfied | FetchDecision::Exhausted => break,
				FetchDecision::Continue { .. } => partition_cursor = page.next_cursor,
				FetchDecision::BudgetExceeded { iterations } => {
					tracing::warn!(
						partition = %partition,
						iterations,
						buffered = outcome.rows.len(),
						"Partition fetch budget exhausted."
					);

					return Err(Error::FetchBudgetExceeded {
						partition: partition.clone(),
						iterations,
					});
				},
			}
		}

		if outcome.rows.len() >= required_size {
			break;
		}
	}

	Ok(outcome)
}
