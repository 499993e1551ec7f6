mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, Postgres, Providers, Search, Service, ServiceEndpoint, Storage, Tables};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.postgres.query_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.query_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if !is_sql_identifier(&cfg.storage.tables.delegation_metadata) {
		return Err(Error::Validation {
			message: "storage.tables.delegation_metadata must be a lowercase SQL identifier."
				.to_string(),
		});
	}
	if cfg.search.max_page_number == 0 {
		return Err(Error::Validation {
			message: "search.max_page_number must be greater than zero.".to_string(),
		});
	}
	if cfg.search.over_fetch_factor == 0 {
		return Err(Error::Validation {
			message: "search.over_fetch_factor must be greater than zero.".to_string(),
		});
	}
	if cfg.search.max_fetch_size == 0 {
		return Err(Error::Validation {
			message: "search.max_fetch_size must be greater than zero.".to_string(),
		});
	}
	if cfg.search.max_partition_iterations == 0 {
		return Err(Error::Validation {
			message: "search.max_partition_iterations must be greater than zero.".to_string(),
		});
	}
	if cfg.search.page_size_limit == 0 {
		return Err(Error::Validation {
			message: "search.page_size_limit must be greater than zero.".to_string(),
		});
	}
	if cfg.search.max_page_number > cfg.search.page_number_limit {
		return Err(Error::Validation {
			message: "search.max_page_number must not exceed search.page_number_limit."
				.to_string(),
		});
	}
	if cfg.search.partition_limit == 0 {
		return Err(Error::Validation {
			message: "search.partition_limit must be greater than zero.".to_string(),
		});
	}

	for (label, endpoint) in
		[("mandate", &cfg.providers.mandate), ("data_vault", &cfg.providers.data_vault)]
	{
		if endpoint.api_base.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("providers.{label}.api_base must be non-empty."),
			});
		}
		if endpoint.timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("providers.{label}.timeout_ms must be greater than zero."),
			});
		}
		if endpoint.default_headers.values().any(|value| !value.is_string()) {
			return Err(Error::Validation {
				message: format!("providers.{label}.default_headers values must be strings."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for endpoint in [&mut cfg.providers.mandate, &mut cfg.providers.data_vault] {
		if endpoint.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
			endpoint.api_key = None;
		}
	}
}

fn is_sql_identifier(name: &str) -> bool {
	let mut chars = name.chars();

	match chars.next() {
		Some(first) if first.is_ascii_lowercase() || first == '_' => {},
		_ => return false,
	}

	chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
