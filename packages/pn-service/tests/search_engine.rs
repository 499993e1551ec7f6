use std::sync::{
	Arc, Mutex,
	atomic::{AtomicUsize, Ordering},
};

use regex::Regex;
use serde_json::Map;
use time::{Duration, OffsetDateTime, macros::datetime};

use pn_config::{Config, Postgres, Providers, Search, Service, ServiceEndpoint, Storage, Tables};
use pn_providers::data_vault::BaseRecipient;
use pn_service::{
	BoxFuture, Collaborators, CompositeKeyRequest, ContinuationToken, DelegatedSearchRequest,
	DeliveryService, Error, Grant, GrantLookup, MandateAuthority, NotificationStatus,
	PartitionStore, PrivacyVault,
};
use pn_storage::{
	models::{self, DelegationMetadata},
	queries::{PartitionPage, PartitionQuery, RowFilter},
};

const DELEGATE: &str = "del-1";

/// Scans like a key-value store: `limit` bounds the rows read, the filter only trims them.
#[derive(Default)]
struct ScanLimitStore {
	rows: Vec<DelegationMetadata>,
	calls: Mutex<Vec<(String, u32)>>,
	timeout: bool,
}
impl ScanLimitStore {
	fn new(rows: Vec<DelegationMetadata>) -> Self {
		Self { rows, ..Self::default() }
	}

	fn calls(&self) -> Vec<(String, u32)> {
		self.calls.lock().expect("calls lock poisoned").clone()
	}

	fn scan(&self, query: &PartitionQuery<'_>) -> pn_storage::Result<PartitionPage> {
		self.calls.lock().expect("calls lock poisoned").push((query.partition.to_string(), query.limit));

		if self.timeout {
			return Err(pn_storage::Error::Timeout("Partition query exceeded 10 ms.".to_string()));
		}

		let resume = query
			.cursor
			.map(|cursor| cursor.resume_point(query.index, query.partition))
			.transpose()?;
		let mut candidates: Vec<&DelegationMetadata> = self
			.rows
			.iter()
			.filter(|row| query.index.partition_of(row) == Some(query.partition))
			.filter(|row| row.sent_at >= query.start && row.sent_at <= query.end)
			.filter(|row| match &resume {
				Some((sent_at, key)) =>
					(row.sent_at, &row.iun_recipient_id_delegate_id_group_id) < (*sent_at, key),
				None => true,
			})
			.collect();

		candidates.sort_by(|a, b| {
			(b.sent_at, &b.iun_recipient_id_delegate_id_group_id)
				.cmp(&(a.sent_at, &a.iun_recipient_id_delegate_id_group_id))
		});

		let scanned: Vec<&DelegationMetadata> =
			candidates.into_iter().take(query.limit as usize).collect();
		let next_cursor = match scanned.last() {
			Some(last) if scanned.len() >= query.limit as usize =>
				Some(query.index.cursor_for(last)?),
			_ => None,
		};
		let rows = scanned.into_iter().filter(|row| matches(query.filter, row)).cloned().collect();

		Ok(PartitionPage { rows, next_cursor })
	}
}
impl PartitionStore for ScanLimitStore {
	fn query_partition<'a>(
		&'a self,
		query: &'a PartitionQuery<'a>,
	) -> BoxFuture<'a, pn_storage::Result<PartitionPage>> {
		Box::pin(async move { self.scan(query) })
	}

	fn get_by_composite_key<'a>(
		&'a self,
		primary_key: &'a str,
		sent_at: OffsetDateTime,
	) -> BoxFuture<'a, pn_storage::Result<Option<DelegationMetadata>>> {
		let row = self
			.rows
			.iter()
			.find(|row| {
				row.iun_recipient_id_delegate_id_group_id == primary_key && row.sent_at == sent_at
			})
			.cloned();

		Box::pin(async move { Ok(row) })
	}
}

enum AuthorityMode {
	GrantAll,
	Only(Vec<Grant>),
	Timeout,
}

struct FakeAuthority {
	mode: AuthorityMode,
	calls: AtomicUsize,
	lookups: Mutex<Vec<GrantLookup>>,
}
impl FakeAuthority {
	fn new(mode: AuthorityMode) -> Self {
		Self { mode, calls: AtomicUsize::new(0), lookups: Mutex::new(Vec::new()) }
	}
}
impl MandateAuthority for FakeAuthority {
	fn list_grants<'a>(
		&'a self,
		_cfg: &'a ServiceEndpoint,
		lookup: &'a GrantLookup,
	) -> BoxFuture<'a, pn_providers::Result<Vec<Grant>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.lookups.lock().expect("lookups lock poisoned").push(lookup.clone());

		let result = match &self.mode {
			AuthorityMode::GrantAll => Ok(lookup
				.pairs
				.iter()
				.map(|pair| Grant {
					grant_id: pair.grant_id.clone(),
					grantor: pair.grantor_id.clone(),
					grantee: Some(DELEGATE.to_string()),
					valid_from: None,
					valid_to: None,
					visibility_scope: Vec::new(),
				})
				.collect()),
			AuthorityMode::Only(grants) => Ok(grants.clone()),
			AuthorityMode::Timeout =>
				Err(pn_providers::Error::Timeout { message: "mandates-by-delegators".to_string() }),
		};

		Box::pin(async move { result })
	}
}

#[derive(Default)]
struct FakeVault {
	calls: AtomicUsize,
	missing: bool,
}
impl PrivacyVault for FakeVault {
	fn rehydrate<'a>(
		&'a self,
		_cfg: &'a ServiceEndpoint,
		internal_ids: &'a [String],
	) -> BoxFuture<'a, pn_providers::Result<Vec<BaseRecipient>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let recipients = if self.missing {
			Vec::new()
		} else {
			internal_ids
				.iter()
				.map(|id| BaseRecipient {
					internal_id: id.clone(),
					tax_id: format!("TAX-{id}"),
					denomination: None,
					recipient_type: Some("PF".to_string()),
				})
				.collect()
		};

		Box::pin(async move { Ok(recipients) })
	}
}

struct Harness {
	service: DeliveryService,
	store: Arc<ScanLimitStore>,
	authority: Arc<FakeAuthority>,
	vault: Arc<FakeVault>,
}

fn harness_with(
	store: ScanLimitStore,
	authority: FakeAuthority,
	vault: FakeVault,
	search: Search,
) -> Harness {
	let store = Arc::new(store);
	let authority = Arc::new(authority);
	let vault = Arc::new(vault);
	let service = DeliveryService::with_collaborators(
		config(search),
		Collaborators::new(store.clone(), authority.clone(), vault.clone()),
	);

	Harness { service, store, authority, vault }
}

fn harness(rows: Vec<DelegationMetadata>) -> Harness {
	harness_with(
		ScanLimitStore::new(rows),
		FakeAuthority::new(AuthorityMode::GrantAll),
		FakeVault::default(),
		Search::default(),
	)
}

fn config(search: Search) -> Config {
	Config {
		service: Service { log_level: "debug".to_string() },
		storage: Storage {
			postgres: Postgres {
				dsn: "postgres://postgres@127.0.0.1:5432/unused".to_string(),
				pool_max_conns: 1,
				query_timeout_ms: 1_000,
			},
			tables: Tables::default(),
		},
		search,
		providers: Providers {
			mandate: endpoint("/mandate-private/api/v1/mandates-by-internaldelegators"),
			data_vault: endpoint("/datavault-private/v1/recipients/internal"),
		},
	}
}

fn endpoint(path: &str) -> ServiceEndpoint {
	ServiceEndpoint {
		api_base: "http://127.0.0.1:1".to_string(),
		path: path.to_string(),
		api_key: None,
		timeout_ms: 100,
		default_headers: Map::new(),
	}
}

fn matches(filter: &RowFilter, row: &DelegationMetadata) -> bool {
	(filter.statuses.is_empty() || filter.statuses.contains(&row.notification_status))
		&& filter.sender_id.as_ref().is_none_or(|sender| *sender == row.sender_id)
		&& filter.recipient_id.as_ref().is_none_or(|recipient| *recipient == row.recipient_id)
		&& filter.subject_pattern.as_ref().is_none_or(|pattern| {
			let subject = row.subject.as_deref().unwrap_or_default();

			Regex::new(&format!("^({pattern})$")).map(|re| re.is_match(subject)).unwrap_or(false)
		})
}

/// Rows of one month, newest first, one minute apart.
fn month_rows(
	month: &str,
	newest: OffsetDateTime,
	count: usize,
	status: &str,
) -> Vec<DelegationMetadata> {
	(0..count)
		.map(|idx| {
			let iun = format!("IUN-{month}-{status}-{idx:04}");
			let mandate_id = format!("m-{}", idx % 2);
			let recipient_id = format!("rec-{}", idx % 2);

			DelegationMetadata {
				iun_recipient_id_delegate_id_group_id: DelegationMetadata::primary_key(
					&iun,
					&recipient_id,
					DELEGATE,
					None,
				),
				sent_at: newest - Duration::minutes(idx as i64),
				delegate_id_creation_month: models::delegate_partition(DELEGATE, month),
				delegate_id_group_id_creation_month: None,
				iun,
				mandate_id,
				recipient_id: recipient_id.clone(),
				recipient_ids: vec![recipient_id],
				delegate_id: DELEGATE.to_string(),
				group_id: None,
				sender_id: "pa-1".to_string(),
				sender_denomination: Some("Comune di Milano".to_string()),
				pa_protocol_number: Some(format!("PROT-{idx}")),
				subject: Some("Avviso di pagamento".to_string()),
				notification_status: status.to_string(),
			}
		})
		.collect()
}

/// Rows of one month owned by `group`, so they land in the group index.
fn group_rows(
	group: &str,
	month: &str,
	newest: OffsetDateTime,
	count: usize,
) -> Vec<DelegationMetadata> {
	month_rows(month, newest, count, "VIEWED")
		.into_iter()
		.map(|mut row| {
			row.iun = format!("{}-{group}", row.iun);
			row.iun_recipient_id_delegate_id_group_id = DelegationMetadata::primary_key(
				&row.iun,
				&row.recipient_id,
				DELEGATE,
				Some(group),
			);
			row.delegate_id_group_id_creation_month =
				Some(models::delegate_group_partition(DELEGATE, group, month));
			row.group_id = Some(group.to_string());

			row
		})
		.collect()
}

fn request(size: u32, max_pages: u32) -> DelegatedSearchRequest {
	DelegatedSearchRequest {
		delegate_id: DELEGATE.to_string(),
		cx_groups: Vec::new(),
		start_date: datetime!(2024-01-01 00:00:00 UTC),
		end_date: datetime!(2024-03-31 23:59:59 UTC),
		statuses: Vec::new(),
		sender_id: None,
		receiver_id: None,
		subject_reg_exp: None,
		groups: Vec::new(),
		size,
		max_page_number: Some(max_pages),
		next_pages_key: None,
	}
}

fn three_month_rows() -> Vec<DelegationMetadata> {
	let mut rows = Vec::new();

	rows.extend(month_rows("202403", datetime!(2024-03-28 12:00:00 UTC), 15, "DELIVERED"));
	rows.extend(month_rows("202403", datetime!(2024-03-10 12:00:00 UTC), 5, "VIEWED"));
	rows.extend(month_rows("202402", datetime!(2024-02-20 12:00:00 UTC), 10, "DELIVERED"));
	rows.extend(month_rows("202402", datetime!(2024-02-05 12:00:00 UTC), 3, "VIEWED"));
	rows.extend(month_rows("202401", datetime!(2024-01-20 12:00:00 UTC), 10, "DELIVERED"));

	rows
}

fn delivered(size: u32, max_pages: u32) -> DelegatedSearchRequest {
	DelegatedSearchRequest {
		statuses: vec![NotificationStatus::Delivered],
		..request(size, max_pages)
	}
}

#[tokio::test]
async fn filtered_search_stops_once_required_rows_are_buffered() {
	let h = harness(three_month_rows());
	let page = h.service.search_delegated(delivered(10, 2)).await.expect("search failed");

	assert_eq!(
		h.store.calls(),
		vec![("del-1##202403".to_string(), 84), ("del-1##202402".to_string(), 84)]
	);
	assert_eq!(page.results.len(), 10);
	assert!(page.more_results);
	assert_eq!(page.next_pages_key.len(), 2);

	let first = ContinuationToken::decode(&page.next_pages_key[0]).expect("decode failed");
	let second = ContinuationToken::decode(&page.next_pages_key[1]).expect("decode failed");

	// Buffer positions 10 and 20 fall in the first and second partition.
	assert_eq!(first.external_key, "del-1##202403");
	assert_eq!(second.external_key, "del-1##202402");
	assert!(page.results.iter().all(|row| row.notification_status == NotificationStatus::Delivered));
	assert_eq!(page.results[0].iun, "IUN-202403-DELIVERED-0000");
	assert_eq!(h.authority.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn forward_tokens_resume_at_absolute_offsets() {
	let h = harness(three_month_rows());
	let full = h.service.search_delegated(delivered(100, 1)).await.expect("search failed");
	let page = h.service.search_delegated(delivered(10, 2)).await.expect("search failed");

	assert_eq!(full.results.len(), 35);

	for (page_idx, token) in page.next_pages_key.iter().enumerate() {
		let resumed = h
			.service
			.search_delegated(DelegatedSearchRequest {
				next_pages_key: Some(token.clone()),
				..delivered(10, 2)
			})
			.await
			.expect("resumed search failed");

		assert_eq!(resumed.results[0].iun, full.results[10 * (page_idx + 1)].iun);
	}
}

#[tokio::test]
async fn resumed_search_never_moves_backwards() {
	let h = harness(three_month_rows());
	let mut seen = Vec::new();
	let mut req = delivered(10, 1);

	loop {
		let page = h.service.search_delegated(req.clone()).await.expect("search failed");

		seen.extend(page.results.iter().map(|row| row.iun.clone()));

		let Some(token) = page.next_pages_key.first() else {
			break;
		};

		req.next_pages_key = Some(token.clone());
	}

	let mut unique = seen.clone();

	unique.sort();
	unique.dedup();

	assert_eq!(seen.len(), 35);
	assert_eq!(unique.len(), 35);
}

#[tokio::test]
async fn group_index_scroll_crosses_group_partitions() {
	let mut rows = Vec::new();

	rows.extend(group_rows("g1", "202403", datetime!(2024-03-28 12:00:00 UTC), 7));
	rows.extend(group_rows("g2", "202403", datetime!(2024-03-27 12:00:00 UTC), 6));
	rows.extend(group_rows("g1", "202402", datetime!(2024-02-20 12:00:00 UTC), 5));

	let h = harness(rows);
	let mut req = DelegatedSearchRequest {
		cx_groups: vec!["g1".to_string(), "g2".to_string(), " g1".to_string()],
		..request(4, 1)
	};
	let mut seen = Vec::new();
	let mut token_partitions = Vec::new();

	loop {
		let page = h.service.search_delegated(req.clone()).await.expect("search failed");

		assert!(page.results.len() <= 4);

		seen.extend(page.results.iter().map(|row| row.iun.clone()));

		let Some(token) = page.next_pages_key.first() else {
			break;
		};

		token_partitions
			.push(ContinuationToken::decode(token).expect("decode failed").external_key);

		req.next_pages_key = Some(token.clone());
	}

	let mut unique = seen.clone();

	unique.sort();
	unique.dedup();

	assert_eq!(seen.len(), 18);
	assert_eq!(unique.len(), 18);
	assert_eq!(token_partitions[0], "del-1##g1##202403");
	assert!(token_partitions.contains(&"del-1##g2##202403".to_string()));
	assert!(token_partitions.contains(&"del-1##g1##202402".to_string()));
	assert!(h.store.calls().iter().all(|(partition, _)| partition.starts_with("del-1##g")));

	let lookups = h.authority.lookups.lock().expect("lookups lock poisoned");

	assert!(
		lookups
			.iter()
			.all(|lookup| lookup.grantor_groups == vec!["g1".to_string(), "g2".to_string()])
	);
}

#[tokio::test]
async fn unfiltered_more_results_tracks_required_size() {
	let h = harness(month_rows("202403", datetime!(2024-03-28 12:00:00 UTC), 20, "VIEWED"));
	let page = h.service.search_delegated(request(10, 2)).await.expect("search failed");

	// 20 rows over three partitions never reach 10 * 2 + 1.
	assert!(!page.more_results);
	assert_eq!(page.results.len(), 10);
	assert_eq!(page.next_pages_key.len(), 2);
	assert_eq!(h.store.calls()[0], ("del-1##202403".to_string(), 21));
	assert_eq!(h.store.calls().len(), 3);

	let h = harness(month_rows("202403", datetime!(2024-03-28 12:00:00 UTC), 21, "VIEWED"));
	let page = h.service.search_delegated(request(10, 2)).await.expect("search failed");

	assert!(page.more_results);
	assert_eq!(h.store.calls().len(), 1);
}

#[tokio::test]
async fn selective_filter_grows_fetch_size() {
	let mut rows = month_rows("202403", datetime!(2024-03-31 12:00:00 UTC), 400, "VIEWED");

	for (idx, row) in rows.iter_mut().enumerate() {
		if idx % 40 == 0 {
			row.sender_id = "pa-rare".to_string();
		}
	}

	let h = harness(rows);
	let page = h
		.service
		.search_delegated(DelegatedSearchRequest {
			sender_id: Some("pa-rare".to_string()),
			start_date: datetime!(2024-03-01 00:00:00 UTC),
			..request(10, 2)
		})
		.await
		.expect("search failed");
	let limits: Vec<u32> = h.store.calls().into_iter().map(|(_, limit)| limit).collect();

	assert_eq!(limits, vec![84, 156, 290]);
	assert_eq!(page.results.len(), 10);
	assert!(!page.more_results);
}

#[tokio::test]
async fn iteration_cap_fails_the_request() {
	let rows = month_rows("202403", datetime!(2024-03-31 12:00:00 UTC), 400, "VIEWED");
	let h = harness_with(
		ScanLimitStore::new(rows),
		FakeAuthority::new(AuthorityMode::GrantAll),
		FakeVault::default(),
		Search { max_partition_iterations: 2, ..Search::default() },
	);
	let err = h
		.service
		.search_delegated(DelegatedSearchRequest {
			sender_id: Some("pa-none".to_string()),
			..request(10, 2)
		})
		.await
		.expect_err("Expected fetch budget error.");

	assert!(matches!(err, Error::FetchBudgetExceeded { iterations: 2, .. }), "{err}");
	assert!(!err.is_retryable());
	assert_eq!(h.authority.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn token_outside_plan_is_rejected() {
	let h = harness(three_month_rows());
	let page = h.service.search_delegated(delivered(10, 2)).await.expect("search failed");
	let err = h
		.service
		.search_delegated(DelegatedSearchRequest {
			end_date: datetime!(2024-01-31 23:59:59 UTC),
			next_pages_key: Some(page.next_pages_key[0].clone()),
			..delivered(10, 2)
		})
		.await
		.expect_err("Expected invalid token.");

	assert!(matches!(err, Error::ResumeTokenInvalid { .. }));
	assert_eq!(h.store.calls().len(), 2);
}

#[tokio::test]
async fn missing_grant_drops_rows_but_keeps_more_results() {
	let grant = Grant {
		grant_id: "m-0".to_string(),
		grantor: "rec-0".to_string(),
		grantee: Some(DELEGATE.to_string()),
		valid_from: None,
		valid_to: None,
		visibility_scope: Vec::new(),
	};
	let h = harness_with(
		ScanLimitStore::new(month_rows("202403", datetime!(2024-03-28 12:00:00 UTC), 30, "VIEWED")),
		FakeAuthority::new(AuthorityMode::Only(vec![grant])),
		FakeVault::default(),
		Search::default(),
	);
	let page = h.service.search_delegated(request(10, 2)).await.expect("search failed");

	assert!(page.more_results);
	assert_eq!(page.results.len(), 10);
	assert!(page.results.iter().all(|row| row.mandate_id == "m-0"));
	// 11 of the 21 buffered rows survive, enough for one forward token only.
	assert_eq!(page.next_pages_key.len(), 1);

	let lookups = h.authority.lookups.lock().expect("lookups lock poisoned");

	assert_eq!(lookups[0].pairs.len(), 2);
}

#[tokio::test]
async fn empty_buffer_skips_collaborators() {
	let h = harness(Vec::new());
	let page = h.service.search_delegated(request(10, 1)).await.expect("search failed");

	assert!(page.results.is_empty());
	assert!(!page.more_results);
	assert_eq!(h.authority.calls.load(Ordering::SeqCst), 0);
	assert_eq!(h.vault.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn recipients_are_rehydrated() {
	let h = harness(month_rows("202403", datetime!(2024-03-28 12:00:00 UTC), 3, "VIEWED"));
	let page = h.service.search_delegated(request(10, 1)).await.expect("search failed");

	assert_eq!(page.results[0].recipients, vec!["TAX-rec-0".to_string()]);
	assert_eq!(page.results[1].recipients, vec!["TAX-rec-1".to_string()]);
	assert_eq!(h.vault.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unresolved_recipient_aborts_the_page() {
	let h = harness_with(
		ScanLimitStore::new(month_rows("202403", datetime!(2024-03-28 12:00:00 UTC), 3, "VIEWED")),
		FakeAuthority::new(AuthorityMode::GrantAll),
		FakeVault { missing: true, ..FakeVault::default() },
		Search::default(),
	);
	let err = h.service.search_delegated(request(10, 1)).await.expect_err("Expected error.");

	assert!(matches!(err, Error::PrivacyUnavailable { .. }));
}

#[tokio::test]
async fn collaborator_timeouts_are_retryable() {
	let store_down = harness_with(
		ScanLimitStore { timeout: true, ..ScanLimitStore::default() },
		FakeAuthority::new(AuthorityMode::GrantAll),
		FakeVault::default(),
		Search::default(),
	);
	let err = store_down.service.search_delegated(request(10, 1)).await.expect_err("Expected error.");

	assert!(matches!(err, Error::StoreTimeout { .. }));
	assert!(err.is_retryable());

	let authority_down = harness_with(
		ScanLimitStore::new(month_rows("202403", datetime!(2024-03-28 12:00:00 UTC), 3, "VIEWED")),
		FakeAuthority::new(AuthorityMode::Timeout),
		FakeVault::default(),
		Search::default(),
	);
	let err =
		authority_down.service.search_delegated(request(10, 1)).await.expect_err("Expected error.");

	assert!(matches!(err, Error::AuthorityTimeout { .. }));
	assert!(err.is_retryable());
	assert_eq!(authority_down.vault.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn composite_key_lookup_returns_one_authorized_row() {
	let rows = month_rows("202403", datetime!(2024-03-28 12:00:00 UTC), 3, "PAID");
	let target = rows[1].clone();
	let h = harness(rows);
	let page = h
		.service
		.search_by_composite_key(CompositeKeyRequest {
			delegate_id: DELEGATE.to_string(),
			cx_groups: Vec::new(),
			iun_recipient_id_delegate_id_group_id: target.iun_recipient_id_delegate_id_group_id.clone(),
			sent_at: target.sent_at,
		})
		.await
		.expect("lookup failed");

	assert_eq!(page.results.len(), 1);
	assert_eq!(page.results[0].iun, target.iun);
	assert_eq!(page.results[0].notification_status, NotificationStatus::Paid);
	assert!(!page.more_results);
	assert!(page.next_pages_key.is_empty());

	let foreign = h
		.service
		.search_by_composite_key(CompositeKeyRequest {
			delegate_id: "del-2".to_string(),
			cx_groups: Vec::new(),
			iun_recipient_id_delegate_id_group_id: target.iun_recipient_id_delegate_id_group_id,
			sent_at: target.sent_at,
		})
		.await
		.expect("lookup failed");

	assert!(foreign.results.is_empty());
	assert_eq!(h.authority.calls.load(Ordering::SeqCst), 1);
}
