#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Invalid cursor: {0}")]
	InvalidCursor(String),
	#[error("Timed out: {0}")]
	Timeout(String),
}
