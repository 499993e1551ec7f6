use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
	Error, Result,
	db::Db,
	models::{DelegationMetadata, IndexVariant, StoreCursor},
};

const COLUMNS: &str = "\
iun_recipient_id_delegate_id_group_id, sent_at, delegate_id_creation_month, \
delegate_id_group_id_creation_month, iun, mandate_id, recipient_id, recipient_ids, delegate_id, \
group_id, sender_id, sender_denomination, pa_protocol_number, subject, notification_status";

/// Conjunction of server-side predicates. Empty fields do not constrain the query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
	pub statuses: Vec<String>,
	pub sender_id: Option<String>,
	pub recipient_id: Option<String>,
	/// Matched against the whole subject.
	pub subject_pattern: Option<String>,
}
impl RowFilter {
	pub fn is_empty(&self) -> bool {
		self.statuses.is_empty()
			&& self.sender_id.is_none()
			&& self.recipient_id.is_none()
			&& self.subject_pattern.is_none()
	}
}

#[derive(Debug, Clone)]
pub struct PartitionQuery<'a> {
	pub index: IndexVariant,
	pub partition: &'a str,
	pub start: OffsetDateTime,
	pub end: OffsetDateTime,
	pub filter: &'a RowFilter,
	/// Rows scanned from the index, before the filter is applied.
	pub limit: u32,
	pub cursor: Option<&'a StoreCursor>,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionPage {
	pub rows: Vec<DelegationMetadata>,
	/// Present when the scan window was full, whether or not its rows matched the filter.
	pub next_cursor: Option<StoreCursor>,
}

#[derive(sqlx::FromRow)]
struct ScannedRow {
	#[sqlx(flatten)]
	metadata: DelegationMetadata,
	matched: bool,
	scanned_count: i64,
}

/// Reads one window of a partition newest first. The window is sized by `limit` on the index
/// itself, and the filter only decides which scanned rows come back, so a selective filter can
/// return an empty page together with a cursor.
pub async fn query_partition(db: &Db, query: &PartitionQuery<'_>) -> Result<PartitionPage> {
	if query.limit == 0 {
		return Err(Error::InvalidArgument("Partition query limit must be positive.".to_string()));
	}

	let resume = query
		.cursor
		.map(|cursor| cursor.resume_point(query.index, query.partition))
		.transpose()?;
	let mut builder = QueryBuilder::<Postgres>::new("WITH scanned AS (SELECT ");

	builder.push(COLUMNS);
	builder.push(", COALESCE(");
	push_filter(&mut builder, query.filter);
	builder.push(", FALSE) AS matched FROM ");
	builder.push(db.delegation_table.as_str());
	builder.push(" WHERE ");
	builder.push(query.index.partition_field());
	builder.push(" = ");
	builder.push_bind(query.partition.to_string());
	builder.push(" AND sent_at BETWEEN ");
	builder.push_bind(query.start);
	builder.push(" AND ");
	builder.push_bind(query.end);

	if let Some((sent_at, primary_key)) = resume {
		builder.push(" AND (sent_at, iun_recipient_id_delegate_id_group_id) < (");
		builder.push_bind(sent_at);
		builder.push(", ");
		builder.push_bind(primary_key);
		builder.push(")");
	}

	builder.push(
		" ORDER BY sent_at DESC, iun_recipient_id_delegate_id_group_id DESC LIMIT ",
	);
	builder.push_bind(i64::from(query.limit));
	builder.push(
		"), \
boundary AS (\
SELECT sent_at, iun_recipient_id_delegate_id_group_id FROM scanned \
ORDER BY sent_at ASC, iun_recipient_id_delegate_id_group_id ASC LIMIT 1\
) SELECT ",
	);
	builder.push(COLUMNS);
	builder.push(
		", matched, (SELECT count(*) FROM scanned) AS scanned_count \
FROM scanned \
WHERE matched OR (sent_at, iun_recipient_id_delegate_id_group_id) IN (\
SELECT sent_at, iun_recipient_id_delegate_id_group_id FROM boundary\
) \
ORDER BY sent_at DESC, iun_recipient_id_delegate_id_group_id DESC",
	);

	let scanned: Vec<ScannedRow> = db
		.timed("Partition query", builder.build_query_as::<ScannedRow>().fetch_all(&db.pool))
		.await?;
	let window_full =
		scanned.first().map(|row| row.scanned_count >= i64::from(query.limit)).unwrap_or(false);
	let next_cursor = match scanned.last() {
		Some(last) if window_full => Some(query.index.cursor_for(&last.metadata)?),
		_ => None,
	};
	let rows = scanned.into_iter().filter(|row| row.matched).map(|row| row.metadata).collect();

	Ok(PartitionPage { rows, next_cursor })
}

pub async fn get_by_composite_key(
	db: &Db,
	primary_key: &str,
	sent_at: OffsetDateTime,
) -> Result<Option<DelegationMetadata>> {
	let sql = format!(
		"SELECT {COLUMNS} FROM {} WHERE iun_recipient_id_delegate_id_group_id = $1 AND sent_at = $2",
		db.delegation_table
	);
	let query = sqlx::query_as::<_, DelegationMetadata>(&sql)
		.bind(primary_key)
		.bind(sent_at)
		.fetch_optional(&db.pool);

	db.timed("Composite key lookup", query).await
}

pub async fn insert_metadata(db: &Db, row: &DelegationMetadata) -> Result<()> {
	let sql = format!(
		"\
INSERT INTO {} ({COLUMNS})
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
ON CONFLICT (iun_recipient_id_delegate_id_group_id, sent_at) DO NOTHING",
		db.delegation_table
	);
	let query = sqlx::query(&sql)
		.bind(row.iun_recipient_id_delegate_id_group_id.as_str())
		.bind(row.sent_at)
		.bind(row.delegate_id_creation_month.as_str())
		.bind(row.delegate_id_group_id_creation_month.as_deref())
		.bind(row.iun.as_str())
		.bind(row.mandate_id.as_str())
		.bind(row.recipient_id.as_str())
		.bind(row.recipient_ids.as_slice())
		.bind(row.delegate_id.as_str())
		.bind(row.group_id.as_deref())
		.bind(row.sender_id.as_str())
		.bind(row.sender_denomination.as_deref())
		.bind(row.pa_protocol_number.as_deref())
		.bind(row.subject.as_deref())
		.bind(row.notification_status.as_str())
		.execute(&db.pool);

	db.timed("Metadata insert", query).await?;

	Ok(())
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &RowFilter) {
	if filter.is_empty() {
		builder.push("TRUE");

		return;
	}

	let mut first = true;

	if !filter.statuses.is_empty() {
		open_predicate(builder, &mut first);
		builder.push("notification_status = ANY(");
		builder.push_bind(filter.statuses.clone());
		builder.push("))");
	}
	if let Some(sender_id) = &filter.sender_id {
		open_predicate(builder, &mut first);
		builder.push("sender_id = ");
		builder.push_bind(sender_id.clone());
		builder.push(")");
	}
	if let Some(recipient_id) = &filter.recipient_id {
		open_predicate(builder, &mut first);
		builder.push("recipient_id = ");
		builder.push_bind(recipient_id.clone());
		builder.push(")");
	}
	if let Some(pattern) = &filter.subject_pattern {
		open_predicate(builder, &mut first);
		builder.push("subject ~ ");
		builder.push_bind(format!("^({pattern})$"));
		builder.push(")");
	}
}

fn open_predicate(builder: &mut QueryBuilder<'_, Postgres>, first: &mut bool) {
	builder.push(if *first { "(" } else { " AND (" });

	*first = false;
}
