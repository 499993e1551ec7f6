pub mod assembler;
pub mod authorization;
pub mod fetch;
pub mod plan;
pub mod request;
pub mod search;
pub mod time_serde;
pub mod token;

mod error;
mod walker;

pub use assembler::{DisplayRow, NotificationStatus, ResultPage};
pub use authorization::{Grant, GrantLookup, GrantPair};
pub use error::{Error, Result};
pub use fetch::{AdaptiveFetchController, FetchDecision, FetchPolicy};
pub use plan::PartitionPlan;
pub use request::{CompositeKeyRequest, DelegatedSearchRequest};
pub use token::ContinuationToken;

use std::{future::Future, pin::Pin, sync::Arc};

use time::OffsetDateTime;

use pn_config::{Config, ServiceEndpoint};
use pn_providers::{
	data_vault::{self, BaseRecipient},
	mandate::{self, MandateByDelegator},
};
use pn_storage::{
	db::Db,
	models::DelegationMetadata,
	queries::{self, PartitionPage, PartitionQuery},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Range queries and point lookups against the delegation index.
pub trait PartitionStore
where
	Self: Send + Sync,
{
	fn query_partition<'a>(
		&'a self,
		query: &'a PartitionQuery<'a>,
	) -> BoxFuture<'a, pn_storage::Result<PartitionPage>>;

	fn get_by_composite_key<'a>(
		&'a self,
		primary_key: &'a str,
		sent_at: OffsetDateTime,
	) -> BoxFuture<'a, pn_storage::Result<Option<DelegationMetadata>>>;
}

/// External source of truth for delegation mandates.
pub trait MandateAuthority
where
	Self: Send + Sync,
{
	fn list_grants<'a>(
		&'a self,
		cfg: &'a ServiceEndpoint,
		lookup: &'a GrantLookup,
	) -> BoxFuture<'a, pn_providers::Result<Vec<Grant>>>;
}

/// Resolves opaque recipient ids into display identities.
pub trait PrivacyVault
where
	Self: Send + Sync,
{
	fn rehydrate<'a>(
		&'a self,
		cfg: &'a ServiceEndpoint,
		internal_ids: &'a [String],
	) -> BoxFuture<'a, pn_providers::Result<Vec<BaseRecipient>>>;
}

#[derive(Clone)]
pub struct Collaborators {
	pub store: Arc<dyn PartitionStore>,
	pub authority: Arc<dyn MandateAuthority>,
	pub vault: Arc<dyn PrivacyVault>,
}
impl Collaborators {
	pub fn new(
		store: Arc<dyn PartitionStore>,
		authority: Arc<dyn MandateAuthority>,
		vault: Arc<dyn PrivacyVault>,
	) -> Self {
		Self { store, authority, vault }
	}

	/// Uses the HTTP clients for the authority and the vault.
	pub fn with_store(store: Arc<dyn PartitionStore>) -> Self {
		let remote = Arc::new(RemoteCollaborators);

		Self { store, authority: remote.clone(), vault: remote }
	}
}

pub struct DeliveryService {
	pub cfg: Config,
	pub collaborators: Collaborators,
}
impl DeliveryService {
	pub fn new(cfg: Config, db: Db) -> Self {
		Self { cfg, collaborators: Collaborators::with_store(Arc::new(db)) }
	}

	pub fn with_collaborators(cfg: Config, collaborators: Collaborators) -> Self {
		Self { cfg, collaborators }
	}
}

struct RemoteCollaborators;
impl MandateAuthority for RemoteCollaborators {
	fn list_grants<'a>(
		&'a self,
		cfg: &'a ServiceEndpoint,
		lookup: &'a GrantLookup,
	) -> BoxFuture<'a, pn_providers::Result<Vec<Grant>>> {
		Box::pin(async move {
			let requests: Vec<MandateByDelegator> = lookup
				.pairs
				.iter()
				.map(|pair| MandateByDelegator {
					mandate_id: pair.grant_id.clone(),
					delegator_id: pair.grantor_id.clone(),
				})
				.collect();
			let mandates = mandate::list_mandates_by_delegators(
				cfg,
				lookup.delegate_type,
				&lookup.grantor_groups,
				&requests,
			)
			.await?;

			Ok(mandates.into_iter().map(Grant::from).collect())
		})
	}
}

impl PrivacyVault for RemoteCollaborators {
	fn rehydrate<'a>(
		&'a self,
		cfg: &'a ServiceEndpoint,
		internal_ids: &'a [String],
	) -> BoxFuture<'a, pn_providers::Result<Vec<BaseRecipient>>> {
		Box::pin(data_vault::recipients_by_internal_id(cfg, internal_ids))
	}
}

impl PartitionStore for Db {
	fn query_partition<'a>(
		&'a self,
		query: &'a PartitionQuery<'a>,
	) -> BoxFuture<'a, pn_storage::Result<PartitionPage>> {
		Box::pin(queries::query_partition(self, query))
	}

	fn get_by_composite_key<'a>(
		&'a self,
		primary_key: &'a str,
		sent_at: OffsetDateTime,
	) -> BoxFuture<'a, pn_storage::Result<Option<DelegationMetadata>>> {
		Box::pin(queries::get_by_composite_key(self, primary_key, sent_at))
	}
}
