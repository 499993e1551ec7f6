use time::{Month, OffsetDateTime, UtcOffset};

use pn_storage::models::{self, IndexVariant};

/// Partitions a search visits, in visiting order, and the index they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
	pub index: IndexVariant,
	pub partitions: Vec<String>,
}
impl PartitionPlan {
	/// Months run newest first. With groups the plan visits every group of a month before moving
	/// to the previous month.
	pub fn for_delegate(
		delegate_id: &str,
		groups: &[String],
		start: OffsetDateTime,
		end: OffsetDateTime,
	) -> Self {
		let months = months_newest_first(start, end);

		if groups.is_empty() {
			let partitions =
				months.iter().map(|month| models::delegate_partition(delegate_id, month)).collect();

			return Self { index: IndexVariant::ByDelegate, partitions };
		}

		let mut partitions = Vec::with_capacity(months.len() * groups.len());

		for month in &months {
			for group in groups {
				partitions.push(models::delegate_group_partition(delegate_id, group, month));
			}
		}

		Self { index: IndexVariant::ByDelegateGroup, partitions }
	}

	pub fn position(&self, partition: &str) -> Option<usize> {
		self.partitions.iter().position(|candidate| candidate == partition)
	}
}

/// `YYYYMM` labels between the UTC months of `start` and `end`, newest first.
pub fn months_newest_first(start: OffsetDateTime, end: OffsetDateTime) -> Vec<String> {
	let start = start.to_offset(UtcOffset::UTC);
	let end = end.to_offset(UtcOffset::UTC);
	let floor = (start.year(), u8::from(start.month()));
	let (mut year, mut month) = (end.year(), end.month());
	let mut months = Vec::new();

	while (year, u8::from(month)) >= floor {
		months.push(format!("{year:04}{:02}", u8::from(month)));

		if month == Month::January {
			year -= 1;
		}

		month = month.previous();
	}

	months
}
