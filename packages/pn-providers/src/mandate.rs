use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DelegateType {
	Pf,
	Pg,
}
impl DelegateType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pf => "PF",
			Self::Pg => "PG",
		}
	}
}

/// One `(mandate, delegator)` pair whose mandate should be returned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MandateByDelegator {
	pub mandate_id: String,
	pub delegator_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mandate {
	pub mandate_id: String,
	pub delegator: String,
	pub delegate: Option<String>,
	pub date_from: Option<OffsetDateTime>,
	pub date_to: Option<OffsetDateTime>,
	pub visibility_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InternalMandateDto {
	mandate_id: String,
	delegator: String,
	delegate: Option<String>,
	datefrom: Option<String>,
	dateto: Option<String>,
	#[serde(default)]
	visibility_ids: Option<Vec<String>>,
}

pub async fn list_mandates_by_delegators(
	cfg: &pn_config::ServiceEndpoint,
	delegate_type: DelegateType,
	groups: &[String],
	requests: &[MandateByDelegator],
) -> Result<Vec<Mandate>> {
	let client = crate::client(cfg)?;
	let mut query = vec![("delegateType", delegate_type.as_str().to_string())];

	query.extend(groups.iter().map(|group| ("cxGroups", group.clone())));

	let res = client
		.post(crate::endpoint_url(cfg))
		.headers(crate::request_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.query(&query)
		.json(requests)
		.send()
		.await
		.map_err(|err| crate::classify(err, "mandates-by-delegators"))?;
	let json: Value = res
		.error_for_status()?
		.json()
		.await
		.map_err(|err| crate::classify(err, "mandates-by-delegators"))?;

	parse_mandates(json)
}

fn parse_mandates(json: Value) -> Result<Vec<Mandate>> {
	let dtos: Vec<InternalMandateDto> = serde_json::from_value(json)?;
	let mut mandates = Vec::with_capacity(dtos.len());

	for dto in dtos {
		mandates.push(Mandate {
			date_from: parse_instant(dto.datefrom.as_deref(), "datefrom", &dto.mandate_id)?,
			date_to: parse_instant(dto.dateto.as_deref(), "dateto", &dto.mandate_id)?,
			mandate_id: dto.mandate_id,
			delegator: dto.delegator,
			delegate: dto.delegate,
			visibility_ids: dto.visibility_ids.unwrap_or_default(),
		});
	}

	Ok(mandates)
}

fn parse_instant(
	raw: Option<&str>,
	field: &str,
	mandate_id: &str,
) -> Result<Option<OffsetDateTime>> {
	raw.map(|value| {
		OffsetDateTime::parse(value, &Rfc3339).map_err(|err| Error::InvalidResponse {
			message: format!("Mandate {mandate_id} has an invalid {field}: {err}."),
		})
	})
	.transpose()
}
