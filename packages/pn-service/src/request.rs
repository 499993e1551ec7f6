use std::collections::HashSet;

use regex::Regex;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
	ContinuationToken, Error, NotificationStatus, PartitionPlan, Result, fetch::FetchPolicy,
};
use pn_storage::queries::RowFilter;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedSearchRequest {
	pub delegate_id: String,
	/// Groups the caller belongs to. Forwarded to the mandate authority.
	#[serde(default)]
	pub cx_groups: Vec<String>,
	#[serde(with = "crate::time_serde")]
	pub start_date: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub end_date: OffsetDateTime,
	#[serde(default)]
	pub statuses: Vec<NotificationStatus>,
	pub sender_id: Option<String>,
	pub receiver_id: Option<String>,
	/// Must match the whole subject.
	pub subject_reg_exp: Option<String>,
	#[serde(default)]
	pub groups: Vec<String>,
	pub size: u32,
	pub max_page_number: Option<u32>,
	pub next_pages_key: Option<String>,
}

/// Point lookup of one delegation row by its composite key.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeKeyRequest {
	pub delegate_id: String,
	#[serde(default)]
	pub cx_groups: Vec<String>,
	pub iun_recipient_id_delegate_id_group_id: String,
	#[serde(with = "crate::time_serde")]
	pub sent_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedSearch {
	pub(crate) plan: PartitionPlan,
	/// Trimmed, de-duplicated caller groups. Shared by the plan and the mandate check.
	pub(crate) cx_groups: Vec<String>,
	pub(crate) filter: RowFilter,
	pub(crate) page_size: u32,
	pub(crate) max_pages: u32,
	pub(crate) policy: FetchPolicy,
	pub(crate) resume: Option<ContinuationToken>,
}

impl DelegatedSearchRequest {
	/// Validates the request and derives everything the walk needs. Runs before any
	/// collaborator is called.
	pub(crate) fn resolve(&self, cfg: &pn_config::Search) -> Result<ResolvedSearch> {
		if self.delegate_id.trim().is_empty() {
			return Err(invalid("delegateId must be non-empty."));
		}
		if self.size == 0 {
			return Err(invalid("size must be greater than zero."));
		}
		if self.size > cfg.page_size_limit {
			return Err(invalid(&format!("size must not exceed {}.", cfg.page_size_limit)));
		}
		if self.start_date > self.end_date {
			return Err(invalid("startDate must not be after endDate."));
		}

		let max_pages = self.max_page_number.unwrap_or(cfg.max_page_number);

		if max_pages == 0 {
			return Err(invalid("maxPageNumber must be greater than zero."));
		}
		if max_pages > cfg.page_number_limit {
			return Err(invalid(&format!(
				"maxPageNumber must not exceed {}.",
				cfg.page_number_limit
			)));
		}

		let required_size = self
			.size
			.checked_mul(max_pages)
			.and_then(|size| size.checked_add(1))
			.ok_or_else(|| invalid("size * maxPageNumber is too large."))?;
		let subject_pattern = non_blank(self.subject_reg_exp.as_deref());

		if let Some(pattern) = &subject_pattern {
			Regex::new(&format!("^({pattern})$")).map_err(|err| Error::InvalidRequest {
				message: format!("subjectRegExp is not a valid regular expression: {err}."),
			})?;
		}

		let groups = dedup(&self.groups);
		let cx_groups = dedup(&self.cx_groups);

		if !cx_groups.is_empty()
			&& let Some(outsider) = groups.iter().find(|group| !cx_groups.contains(group))
		{
			return Err(invalid(&format!("Group {outsider} is not one of the caller's groups.")));
		}

		let plan_groups = if groups.is_empty() { &cx_groups } else { &groups };
		let plan = PartitionPlan::for_delegate(
			self.delegate_id.trim(),
			plan_groups,
			self.start_date,
			self.end_date,
		);

		if plan.partitions.len() > cfg.partition_limit as usize {
			return Err(invalid(&format!(
				"The date range and groups span {} partitions, more than the limit of {}.",
				plan.partitions.len(),
				cfg.partition_limit
			)));
		}

		let mut statuses: Vec<String> = Vec::new();

		for status in &self.statuses {
			let status = status.as_str().to_string();

			if !statuses.contains(&status) {
				statuses.push(status);
			}
		}

		let filter = RowFilter {
			statuses,
			sender_id: non_blank(self.sender_id.as_deref()),
			recipient_id: non_blank(self.receiver_id.as_deref()),
			subject_pattern,
		};
		let filtered = !filter.is_empty() || !groups.is_empty();
		let resume = self
			.next_pages_key
			.as_deref()
			.filter(|token| !token.trim().is_empty())
			.map(ContinuationToken::decode)
			.transpose()?;

		Ok(ResolvedSearch {
			plan,
			cx_groups,
			filter,
			page_size: self.size,
			max_pages,
			policy: FetchPolicy::new(required_size, filtered, cfg),
			resume,
		})
	}
}

fn invalid(message: &str) -> Error {
	Error::InvalidRequest { message: message.to_string() }
}

fn non_blank(value: Option<&str>) -> Option<String> {
	value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

pub(crate) fn dedup(values: &[String]) -> Vec<String> {
	let mut seen = HashSet::new();

	values
		.iter()
		.map(|value| value.trim())
		.filter(|value| !value.is_empty() && seen.insert(value.to_string()))
		.map(str::to_string)
		.collect()
}
