use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use pn_storage::models::StoreCursor;

const TOKEN_VERSION: u32 = 1;

/// Resume point handed to clients: the partition to restart from and the store cursor inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken {
	pub external_key: String,
	pub internal_key: StoreCursor,
}
impl ContinuationToken {
	pub fn encode(&self) -> Result<String> {
		let wire = TokenWire {
			v: TOKEN_VERSION,
			ek: self.external_key.clone(),
			ik: self.internal_key.clone(),
		};
		let json = serde_json::to_vec(&wire).map_err(|err| Error::MappingError {
			message: format!("Failed to serialize continuation token: {err}."),
		})?;

		Ok(URL_SAFE_NO_PAD.encode(json))
	}

	pub fn decode(token: &str) -> Result<Self> {
		let raw = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|err| Error::ResumeTokenInvalid {
			message: format!("Token is not base64url: {err}."),
		})?;
		let wire: TokenWire = serde_json::from_slice(&raw).map_err(|err| {
			Error::ResumeTokenInvalid { message: format!("Token payload is malformed: {err}.") }
		})?;

		if wire.v != TOKEN_VERSION {
			return Err(Error::ResumeTokenInvalid {
				message: format!("Token version {} is not supported.", wire.v),
			});
		}
		if wire.ek.is_empty() {
			return Err(Error::ResumeTokenInvalid {
				message: "Token has an empty partition key.".to_string(),
			});
		}

		Ok(Self { external_key: wire.ek, internal_key: wire.ik })
	}
}

#[derive(Serialize, Deserialize)]
struct TokenWire {
	v: u32,
	ek: String,
	ik: StoreCursor,
}
