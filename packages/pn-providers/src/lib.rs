pub mod data_vault;
pub mod mandate;

mod error;

pub use error::{Error, Result};

use std::time::Duration;

use reqwest::{
	Client,
	header::{AUTHORIZATION, HeaderMap, HeaderName},
};
use serde_json::{Map, Value};

pub fn request_headers(
	api_key: Option<&str>,
	default_headers: &Map<String, Value>,
) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	if let Some(api_key) = api_key {
		headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);
	}

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: "Default header values must be strings.".to_string(),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

pub(crate) fn client(cfg: &pn_config::ServiceEndpoint) -> Result<Client> {
	Ok(Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?)
}

pub(crate) fn endpoint_url(cfg: &pn_config::ServiceEndpoint) -> String {
	format!("{}{}", cfg.api_base.trim_end_matches('/'), cfg.path)
}

pub(crate) fn classify(err: reqwest::Error, operation: &str) -> Error {
	if err.is_timeout() {
		return Error::Timeout { message: format!("{operation}: {err}") };
	}

	Error::Reqwest(err)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn headers_include_bearer_and_defaults() {
		let mut defaults = Map::new();

		defaults.insert("x-pagopa-pn-cx-id".to_string(), Value::String("pn-delivery".to_string()));

		let headers = request_headers(Some("secret"), &defaults).expect("Expected headers.");

		assert_eq!(headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()), Some("Bearer secret"));
		assert_eq!(
			headers.get("x-pagopa-pn-cx-id").and_then(|v| v.to_str().ok()),
			Some("pn-delivery")
		);
	}

	#[test]
	fn non_string_header_is_rejected() {
		let mut defaults = Map::new();

		defaults.insert("x-retries".to_string(), Value::from(3));

		let err = request_headers(None, &defaults).expect_err("Expected invalid header config.");

		assert!(matches!(err, Error::InvalidConfig { .. }));
	}
}
