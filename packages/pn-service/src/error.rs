pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Resume token invalid: {message}")]
	ResumeTokenInvalid { message: String },
	#[error("Store unavailable: {message}")]
	StoreUnavailable { message: String },
	#[error("Store timed out: {message}")]
	StoreTimeout { message: String },
	#[error("Mandate authority unavailable: {message}")]
	AuthorityUnavailable { message: String },
	#[error("Mandate authority timed out: {message}")]
	AuthorityTimeout { message: String },
	#[error("Privacy vault unavailable: {message}")]
	PrivacyUnavailable { message: String },
	#[error("Mapping error: {message}")]
	MappingError { message: String },
	#[error("Partition {partition} still had data after {iterations} fetches.")]
	FetchBudgetExceeded { partition: String, iterations: u32 },
}
impl Error {
	/// Whether the same request may succeed when sent again unchanged.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::StoreUnavailable { .. }
				| Self::StoreTimeout { .. }
				| Self::AuthorityUnavailable { .. }
				| Self::AuthorityTimeout { .. }
				| Self::PrivacyUnavailable { .. }
		)
	}

	pub(crate) fn authority(err: pn_providers::Error) -> Self {
		if err.is_timeout() {
			Self::AuthorityTimeout { message: err.to_string() }
		} else {
			Self::AuthorityUnavailable { message: err.to_string() }
		}
	}

	pub(crate) fn privacy(err: pn_providers::Error) -> Self {
		Self::PrivacyUnavailable { message: err.to_string() }
	}
}

impl From<pn_storage::Error> for Error {
	fn from(err: pn_storage::Error) -> Self {
		match err {
			pn_storage::Error::Sqlx(inner) => classify_sqlx(inner),
			pn_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			pn_storage::Error::InvalidCursor(message) => Self::ResumeTokenInvalid { message },
			pn_storage::Error::Timeout(message) => Self::StoreTimeout { message },
		}
	}
}

fn classify_sqlx(err: sqlx::Error) -> Error {
	// 57014 is query_canceled, raised when statement_timeout fires.
	let timed_out = match &err {
		sqlx::Error::PoolTimedOut => true,
		sqlx::Error::Database(db) => db.code().as_deref() == Some("57014"),
		_ => false,
	};

	if timed_out {
		Error::StoreTimeout { message: err.to_string() }
	} else {
		Error::StoreUnavailable { message: err.to_string() }
	}
}
