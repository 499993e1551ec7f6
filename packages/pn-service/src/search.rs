use crate::{
	CompositeKeyRequest, DelegatedSearchRequest, DeliveryService, DisplayRow, Result, ResultPage,
	assembler, authorization, request,
	walker::{self, WalkRequest},
};

impl DeliveryService {
	/// Delegated search over the monthly partitions of one delegate. Rows come back newest first
	/// within a partition and in plan order across partitions.
	pub async fn search_delegated(&self, req: DelegatedSearchRequest) -> Result<ResultPage> {
		let resolved = req.resolve(&self.cfg.search)?;

		tracing::info!(
			index = resolved.plan.index.index_name(),
			partitions = resolved.plan.partitions.len(),
			required_size = resolved.policy.required_size,
			fetch_size = resolved.policy.initial_size,
			resumed = resolved.resume.is_some(),
			"Delegated search started."
		);

		let outcome = walker::walk(
			self.collaborators.store.as_ref(),
			&WalkRequest {
				plan: &resolved.plan,
				start: req.start_date,
				end: req.end_date,
				filter: &resolved.filter,
				policy: resolved.policy,
				resume: resolved.resume.as_ref(),
			},
		)
		.await?;
		let pre_filter_count = outcome.rows.len();

		tracing::info!(
			queries = outcome.queries,
			rows = pre_filter_count,
			"Delegated search read completed."
		);

		let authorized = authorization::authorize(
			self.collaborators.authority.as_ref(),
			&self.cfg.providers.mandate,
			&resolved.cx_groups,
			outcome.rows,
		)
		.await?;

		tracing::info!(
			pre_check = pre_filter_count,
			post_check = authorized.len(),
			"Mandate check completed."
		);

		let mut page = assembler::assemble(
			&authorized,
			pre_filter_count,
			resolved.plan.index,
			resolved.page_size,
			resolved.max_pages,
		)?;

		assembler::rehydrate(
			self.collaborators.vault.as_ref(),
			&self.cfg.providers.data_vault,
			&mut page.results,
		)
		.await?;

		Ok(page)
	}

	/// Single-row lookup. The row still has to belong to the caller and pass the mandate check.
	pub async fn search_by_composite_key(&self, req: CompositeKeyRequest) -> Result<ResultPage> {
		let row = self
			.collaborators
			.store
			.get_by_composite_key(&req.iun_recipient_id_delegate_id_group_id, req.sent_at)
			.await?
			.filter(|row| row.delegate_id == req.delegate_id);
		let Some(row) = row else {
			tracing::info!(
				key = %req.iun_recipient_id_delegate_id_group_id,
				"No delegation row found for key."
			);

			return Ok(ResultPage::default());
		};
		let authorized = authorization::authorize(
			self.collaborators.authority.as_ref(),
			&self.cfg.providers.mandate,
			&request::dedup(&req.cx_groups),
			vec![row],
		)
		.await?;
		let mut results =
			authorized.iter().map(DisplayRow::try_from).collect::<Result<Vec<_>>>()?;

		assembler::rehydrate(
			self.collaborators.vault.as_ref(),
			&self.cfg.providers.data_vault,
			&mut results,
		)
		.await?;

		Ok(ResultPage { results, more_results: false, next_pages_key: Vec::new() })
	}
}
