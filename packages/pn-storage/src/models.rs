use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{Error, Result};

pub const FIELD_IUN_RECIPIENT_ID_DELEGATE_ID_GROUP_ID: &str =
	"iun_recipient_id_delegate_id_group_id";
pub const FIELD_SENT_AT: &str = "sent_at";
pub const FIELD_DELEGATE_ID_CREATION_MONTH: &str = "delegate_id_creation_month";
pub const FIELD_DELEGATE_ID_GROUP_ID_CREATION_MONTH: &str = "delegate_id_group_id_creation_month";

pub const KEY_SEPARATOR: &str = "##";

/// One row of the delegation index: a notification as seen by one delegate, optionally through
/// one of the delegate's groups.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DelegationMetadata {
	pub iun_recipient_id_delegate_id_group_id: String,
	pub sent_at: OffsetDateTime,
	pub delegate_id_creation_month: String,
	pub delegate_id_group_id_creation_month: Option<String>,
	pub iun: String,
	pub mandate_id: String,
	pub recipient_id: String,
	pub recipient_ids: Vec<String>,
	pub delegate_id: String,
	pub group_id: Option<String>,
	pub sender_id: String,
	pub sender_denomination: Option<String>,
	pub pa_protocol_number: Option<String>,
	pub subject: Option<String>,
	pub notification_status: String,
}
impl DelegationMetadata {
	pub fn primary_key(
		iun: &str,
		recipient_id: &str,
		delegate_id: &str,
		group_id: Option<&str>,
	) -> String {
		[iun, recipient_id, delegate_id, group_id.unwrap_or_default()].join(KEY_SEPARATOR)
	}
}

/// Secondary indexes of the delegation table. Each variant owns its partition key shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexVariant {
	ByDelegate,
	ByDelegateGroup,
}
impl IndexVariant {
	pub fn index_name(self) -> &'static str {
		match self {
			Self::ByDelegate => "delegate_id",
			Self::ByDelegateGroup => "delegate_id_group_id",
		}
	}

	pub fn partition_field(self) -> &'static str {
		match self {
			Self::ByDelegate => FIELD_DELEGATE_ID_CREATION_MONTH,
			Self::ByDelegateGroup => FIELD_DELEGATE_ID_GROUP_ID_CREATION_MONTH,
		}
	}

	/// Partition value a row belongs to in this index. `None` when the row is not projected
	/// into the index, which happens for group-less rows in [`IndexVariant::ByDelegateGroup`].
	pub fn partition_of(self, row: &DelegationMetadata) -> Option<&str> {
		match self {
			Self::ByDelegate => Some(row.delegate_id_creation_month.as_str()),
			Self::ByDelegateGroup => row.delegate_id_group_id_creation_month.as_deref(),
		}
	}

	/// Exclusive start key that resumes a range query right after `row`.
	pub fn cursor_for(self, row: &DelegationMetadata) -> Result<StoreCursor> {
		let partition = self.partition_of(row).ok_or_else(|| {
			Error::InvalidCursor(format!(
				"Row {} has no {} value.",
				row.iun_recipient_id_delegate_id_group_id,
				self.partition_field()
			))
		})?;
		let sent_at = row.sent_at.format(&Rfc3339).map_err(|err| {
			Error::InvalidCursor(format!("Failed to format sent_at for cursor: {err}."))
		})?;
		let mut fields = BTreeMap::new();

		fields.insert(
			FIELD_IUN_RECIPIENT_ID_DELEGATE_ID_GROUP_ID.to_string(),
			row.iun_recipient_id_delegate_id_group_id.clone(),
		);
		fields.insert(self.partition_field().to_string(), partition.to_string());
		fields.insert(FIELD_SENT_AT.to_string(), sent_at);

		Ok(StoreCursor(fields))
	}
}

pub fn delegate_partition(delegate_id: &str, month: &str) -> String {
	[delegate_id, month].join(KEY_SEPARATOR)
}

pub fn delegate_group_partition(delegate_id: &str, group_id: &str, month: &str) -> String {
	[delegate_id, group_id, month].join(KEY_SEPARATOR)
}

/// Store-native exclusive start key, kept as plain string fields so it can travel inside an
/// opaque client token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreCursor(BTreeMap<String, String>);
impl StoreCursor {
	pub fn from_fields(fields: BTreeMap<String, String>) -> Self {
		Self(fields)
	}

	pub fn get(&self, field: &str) -> Option<&str> {
		self.0.get(field).map(String::as_str)
	}

	pub fn fields(&self) -> &BTreeMap<String, String> {
		&self.0
	}

	/// Splits the cursor into its sort key and primary key after checking that it was minted for
	/// `partition` of `index`.
	pub fn resume_point(
		&self,
		index: IndexVariant,
		partition: &str,
	) -> Result<(OffsetDateTime, String)> {
		let owner = self.get(index.partition_field()).ok_or_else(|| {
			Error::InvalidCursor(format!("Cursor is missing {}.", index.partition_field()))
		})?;

		if owner != partition {
			return Err(Error::InvalidCursor(format!(
				"Cursor belongs to partition {owner:?}, not {partition:?}."
			)));
		}

		let primary_key = self.get(FIELD_IUN_RECIPIENT_ID_DELEGATE_ID_GROUP_ID).ok_or_else(|| {
			Error::InvalidCursor(format!(
				"Cursor is missing {FIELD_IUN_RECIPIENT_ID_DELEGATE_ID_GROUP_ID}."
			))
		})?;
		let raw_sent_at = self
			.get(FIELD_SENT_AT)
			.ok_or_else(|| Error::InvalidCursor(format!("Cursor is missing {FIELD_SENT_AT}.")))?;
		let sent_at = OffsetDateTime::parse(raw_sent_at, &Rfc3339).map_err(|err| {
			Error::InvalidCursor(format!("Cursor {FIELD_SENT_AT} is not RFC 3339: {err}."))
		})?;

		Ok((sent_at, primary_key.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use time::macros::datetime;

	use super::*;

	fn row(group: Option<&str>) -> DelegationMetadata {
		DelegationMetadata {
			iun_recipient_id_delegate_id_group_id: DelegationMetadata::primary_key(
				"IUN-1", "rec-1", "del-1", group,
			),
			sent_at: datetime!(2024-03-05 10:15:30.123456 UTC),
			delegate_id_creation_month: delegate_partition("del-1", "202403"),
			delegate_id_group_id_creation_month: group
				.map(|group| delegate_group_partition("del-1", group, "202403")),
			iun: "IUN-1".to_string(),
			mandate_id: "mandate-1".to_string(),
			recipient_id: "rec-1".to_string(),
			recipient_ids: vec!["rec-1".to_string()],
			delegate_id: "del-1".to_string(),
			group_id: group.map(str::to_string),
			sender_id: "pa-1".to_string(),
			sender_denomination: None,
			pa_protocol_number: None,
			subject: None,
			notification_status: "DELIVERED".to_string(),
		}
	}

	#[test]
	fn cursor_round_trips_to_resume_point() {
		let row = row(Some("grp-a"));
		let cursor = IndexVariant::ByDelegateGroup.cursor_for(&row).expect("Expected cursor.");
		let (sent_at, primary_key) = cursor
			.resume_point(IndexVariant::ByDelegateGroup, "del-1##grp-a##202403")
			.expect("Expected resume point.");

		assert_eq!(sent_at, row.sent_at);
		assert_eq!(primary_key, "IUN-1##rec-1##del-1##grp-a");
	}

	#[test]
	fn cursor_from_other_partition_is_rejected() {
		let cursor = IndexVariant::ByDelegate.cursor_for(&row(None)).expect("Expected cursor.");
		let err = cursor
			.resume_point(IndexVariant::ByDelegate, "del-1##202402")
			.expect_err("Expected partition mismatch.");

		assert!(matches!(err, Error::InvalidCursor(_)));
	}

	#[test]
	fn group_index_needs_group_partition() {
		let err = IndexVariant::ByDelegateGroup
			.cursor_for(&row(None))
			.expect_err("Group-less rows are not in the group index.");

		assert!(matches!(err, Error::InvalidCursor(_)));
	}
}
