use serde::Deserialize;
use serde_json::Value;

use crate::Result;

/// Display identity of an opaque recipient id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseRecipient {
	pub internal_id: String,
	pub tax_id: String,
	pub denomination: Option<String>,
	pub recipient_type: Option<String>,
}

pub async fn recipients_by_internal_id(
	cfg: &pn_config::ServiceEndpoint,
	internal_ids: &[String],
) -> Result<Vec<BaseRecipient>> {
	if internal_ids.is_empty() {
		return Ok(Vec::new());
	}

	let client = crate::client(cfg)?;
	let query: Vec<(&str, &str)> =
		internal_ids.iter().map(|internal_id| ("internalId", internal_id.as_str())).collect();
	let res = client
		.get(crate::endpoint_url(cfg))
		.headers(crate::request_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.query(&query)
		.send()
		.await
		.map_err(|err| crate::classify(err, "recipients-by-internal-id"))?;
	let json: Value = res
		.error_for_status()?
		.json()
		.await
		.map_err(|err| crate::classify(err, "recipients-by-internal-id"))?;

	Ok(serde_json::from_value(json)?)
}
