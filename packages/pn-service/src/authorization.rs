use std::collections::{HashMap, HashSet};

use time::OffsetDateTime;

use crate::{Error, MandateAuthority, Result};
use pn_config::ServiceEndpoint;
use pn_providers::mandate::{DelegateType, Mandate};
use pn_storage::models::DelegationMetadata;

/// A delegation grant as reported by the mandate authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
	pub grant_id: String,
	pub grantor: String,
	pub grantee: Option<String>,
	pub valid_from: Option<OffsetDateTime>,
	pub valid_to: Option<OffsetDateTime>,
	/// Senders the grant is restricted to. Empty means every sender.
	pub visibility_scope: Vec<String>,
}
impl Grant {
	/// Whether this grant authorizes the delegate to see `row`. Both validity bounds are
	/// inclusive and a missing bound is open.
	pub fn covers(&self, row: &DelegationMetadata) -> bool {
		self.grantor == row.recipient_id
			&& self.valid_from.is_none_or(|from| row.sent_at >= from)
			&& self.valid_to.is_none_or(|to| row.sent_at <= to)
			&& (self.visibility_scope.is_empty() || self.visibility_scope.contains(&row.sender_id))
	}
}

impl From<Mandate> for Grant {
	fn from(mandate: Mandate) -> Self {
		Self {
			grant_id: mandate.mandate_id,
			grantor: mandate.delegator,
			grantee: mandate.delegate,
			valid_from: mandate.date_from,
			valid_to: mandate.date_to,
			visibility_scope: mandate.visibility_ids,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GrantPair {
	pub grant_id: String,
	pub grantor_id: String,
}

/// One batched question to the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantLookup {
	pub delegate_type: DelegateType,
	pub grantor_groups: Vec<String>,
	pub pairs: Vec<GrantPair>,
}
impl GrantLookup {
	/// Distinct pairs in order of first appearance.
	pub fn for_rows(grantor_groups: &[String], rows: &[DelegationMetadata]) -> Self {
		let mut seen = HashSet::new();
		let pairs = rows
			.iter()
			.map(|row| GrantPair {
				grant_id: row.mandate_id.clone(),
				grantor_id: row.recipient_id.clone(),
			})
			.filter(|pair| seen.insert(pair.clone()))
			.collect();

		Self { delegate_type: DelegateType::Pg, grantor_groups: grantor_groups.to_vec(), pairs }
	}
}

/// Drops every row that no grant covers. Order is preserved and the result is stable under
/// repeated application.
pub fn retain_authorized(
	rows: Vec<DelegationMetadata>,
	grants: &[Grant],
) -> Vec<DelegationMetadata> {
	let mut by_id: HashMap<&str, &Grant> = HashMap::with_capacity(grants.len());

	for grant in grants {
		by_id.entry(grant.grant_id.as_str()).or_insert(grant);
	}

	rows.into_iter()
		.filter(|row| by_id.get(row.mandate_id.as_str()).is_some_and(|grant| grant.covers(row)))
		.collect()
}

pub(crate) async fn authorize(
	authority: &dyn MandateAuthority,
	cfg: &ServiceEndpoint,
	grantor_groups: &[String],
	rows: Vec<DelegationMetadata>,
) -> Result<Vec<DelegationMetadata>> {
	if rows.is_empty() {
		tracing::debug!("Skipping mandate check for an empty buffer.");

		return Ok(rows);
	}

	let lookup = GrantLookup::for_rows(grantor_groups, &rows);
	let grants = authority.list_grants(cfg, &lookup).await.map_err(Error::authority)?;

	if grants.is_empty() {
		tracing::info!(pairs = lookup.pairs.len(), "No valid mandate found.");

		return Ok(Vec::new());
	}

	Ok(retain_authorized(rows, &grants))
}
