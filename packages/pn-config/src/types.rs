use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub search: Search,
	pub providers: Providers,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	#[serde(default)]
	pub tables: Tables,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
	/// Upper bound for a single partition query or point lookup. Exceeding it surfaces as a
	/// retryable store timeout.
	#[serde(default = "default_query_timeout_ms")]
	pub query_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Tables {
	pub delegation_metadata: String,
}
impl Default for Tables {
	fn default() -> Self {
		Self { delegation_metadata: "notification_delegation_metadata".to_string() }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Search {
	/// Pages resolved ahead when a request does not ask for a specific number.
	pub max_page_number: u32,
	/// Multiplier applied to the first fetch of a partition when any filter is active.
	pub over_fetch_factor: u32,
	/// Ceiling for adaptive fetch sizes.
	pub max_fetch_size: u32,
	/// Fetches allowed per partition before the request fails.
	pub max_partition_iterations: u32,
	/// Largest page size a request may ask for.
	pub page_size_limit: u32,
	/// Largest number of pages a request may resolve ahead.
	pub page_number_limit: u32,
	/// Largest number of partitions one search may plan.
	pub partition_limit: u32,
}
impl Default for Search {
	fn default() -> Self {
		Self {
			max_page_number: 1,
			over_fetch_factor: 4,
			max_fetch_size: 2_000,
			max_partition_iterations: 32,
			page_size_limit: 100,
			page_number_limit: 20,
			partition_limit: 240,
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub mandate: ServiceEndpoint,
	pub data_vault: ServiceEndpoint,
}

#[derive(Debug, Deserialize)]
pub struct ServiceEndpoint {
	pub api_base: String,
	pub path: String,
	pub api_key: Option<String>,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

fn default_query_timeout_ms() -> u64 {
	5_000
}
