use std::{collections::HashMap, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{ContinuationToken, Error, PrivacyVault, Result};
use pn_config::ServiceEndpoint;
use pn_storage::models::{DelegationMetadata, IndexVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
	InValidation,
	Accepted,
	Refused,
	Delivering,
	Delivered,
	Viewed,
	EffectiveDate,
	Paid,
	Unreachable,
	Cancelled,
	ReturnedToSender,
}
impl NotificationStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::InValidation => "IN_VALIDATION",
			Self::Accepted => "ACCEPTED",
			Self::Refused => "REFUSED",
			Self::Delivering => "DELIVERING",
			Self::Delivered => "DELIVERED",
			Self::Viewed => "VIEWED",
			Self::EffectiveDate => "EFFECTIVE_DATE",
			Self::Paid => "PAID",
			Self::Unreachable => "UNREACHABLE",
			Self::Cancelled => "CANCELLED",
			Self::ReturnedToSender => "RETURNED_TO_SENDER",
		}
	}
}

impl FromStr for NotificationStatus {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self> {
		let status = match raw {
			"IN_VALIDATION" => Self::InValidation,
			"ACCEPTED" => Self::Accepted,
			"REFUSED" => Self::Refused,
			"DELIVERING" => Self::Delivering,
			"DELIVERED" => Self::Delivered,
			"VIEWED" => Self::Viewed,
			"EFFECTIVE_DATE" => Self::EffectiveDate,
			"PAID" => Self::Paid,
			"UNREACHABLE" => Self::Unreachable,
			"CANCELLED" => Self::Cancelled,
			"RETURNED_TO_SENDER" => Self::ReturnedToSender,
			other => {
				return Err(Error::MappingError {
					message: format!("Unknown notification status {other:?}."),
				});
			},
		};

		Ok(status)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRow {
	pub iun: String,
	pub pa_protocol_number: Option<String>,
	pub sender: String,
	pub sender_denomination: Option<String>,
	#[serde(with = "crate::time_serde")]
	pub sent_at: OffsetDateTime,
	pub subject: Option<String>,
	pub notification_status: NotificationStatus,
	/// Tax ids of the recipients once rehydrated, opaque ids before.
	pub recipients: Vec<String>,
	pub mandate_id: String,
	pub group: Option<String>,
}
impl TryFrom<&DelegationMetadata> for DisplayRow {
	type Error = Error;

	fn try_from(row: &DelegationMetadata) -> Result<Self> {
		let notification_status =
			row.notification_status.parse::<NotificationStatus>().map_err(|err| Error::MappingError {
				message: format!(
					"Row {} cannot be displayed: {err}",
					row.iun_recipient_id_delegate_id_group_id
				),
			})?;

		Ok(Self {
			iun: row.iun.clone(),
			pa_protocol_number: row.pa_protocol_number.clone(),
			sender: row.sender_id.clone(),
			sender_denomination: row.sender_denomination.clone(),
			sent_at: row.sent_at,
			subject: row.subject.clone(),
			notification_status,
			recipients: row.recipient_ids.clone(),
			mandate_id: row.mandate_id.clone(),
			group: row.group_id.clone(),
		})
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPage {
	pub results: Vec<DisplayRow>,
	pub more_results: bool,
	pub next_pages_key: Vec<String>,
}

/// Builds the page from the authorized rows. `more_results` reflects the buffer before
/// authorization, so a page may be short while still announcing more data.
pub fn assemble(
	filtered: &[DelegationMetadata],
	pre_filter_count: usize,
	index: IndexVariant,
	page_size: u32,
	max_pages: u32,
) -> Result<ResultPage> {
	let page_size = page_size as usize;
	let required_size = page_size * max_pages as usize + 1;
	let results = filtered
		.iter()
		.take(page_size)
		.map(DisplayRow::try_from)
		.collect::<Result<Vec<_>>>()?;
	let mut next_pages_key = Vec::new();

	for page in 1..=max_pages as usize {
		let boundary = page_size * page;

		if filtered.len() < boundary {
			break;
		}

		next_pages_key.push(token_after(&filtered[boundary - 1], index)?.encode()?);
	}

	Ok(ResultPage { results, more_results: pre_filter_count >= required_size, next_pages_key })
}

fn token_after(row: &DelegationMetadata, index: IndexVariant) -> Result<ContinuationToken> {
	let mapping_error = |message: String| Error::MappingError { message };
	let external_key = index.partition_of(row).ok_or_else(|| {
		mapping_error(format!(
			"Row {} has no {} value.",
			row.iun_recipient_id_delegate_id_group_id,
			index.partition_field()
		))
	})?;
	let internal_key = index.cursor_for(row).map_err(|err| mapping_error(err.to_string()))?;

	Ok(ContinuationToken { external_key: external_key.to_string(), internal_key })
}

/// Replaces opaque recipient ids with tax ids. An id the vault cannot resolve aborts the page.
pub(crate) async fn rehydrate(
	vault: &dyn PrivacyVault,
	cfg: &ServiceEndpoint,
	results: &mut [DisplayRow],
) -> Result<()> {
	let mut internal_ids: Vec<String> = Vec::new();

	for id in results.iter().flat_map(|row| row.recipients.iter()) {
		if !internal_ids.contains(id) {
			internal_ids.push(id.clone());
		}
	}

	if internal_ids.is_empty() {
		return Ok(());
	}

	let recipients = vault.rehydrate(cfg, &internal_ids).await.map_err(Error::privacy)?;
	let tax_ids: HashMap<String, String> = recipients
		.into_iter()
		.map(|recipient| (recipient.internal_id, recipient.tax_id))
		.collect();

	for row in results.iter_mut() {
		for recipient in row.recipients.iter_mut() {
			let Some(tax_id) = tax_ids.get(recipient.as_str()) else {
				return Err(Error::PrivacyUnavailable {
					message: format!("Recipient {recipient} could not be resolved."),
				});
			};

			*recipient = tax_id.clone();
		}
	}

	Ok(())
}
