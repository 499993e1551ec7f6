use std::path::PathBuf;

use clap::{
	Parser,
	builder::{
		Styles,
		styling::{AnsiColor, Effects},
	},
};
use color_eyre::eyre;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::EnvFilter;

use pn_service::{CompositeKeyRequest, DelegatedSearchRequest, DeliveryService, NotificationStatus};
use pn_storage::db::Db;

/// Runs one delegated search, or one composite-key lookup, and prints the page as JSON.
#[derive(Debug, Parser)]
#[command(version, rename_all = "kebab", styles = styles())]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long, value_name = "ID")]
	pub delegate_id: String,
	#[arg(long = "cx-group", value_name = "GROUP")]
	pub cx_groups: Vec<String>,
	#[arg(long, value_name = "RFC3339", value_parser = parse_timestamp, required_unless_present = "lookup_key")]
	pub start: Option<OffsetDateTime>,
	#[arg(long, value_name = "RFC3339", value_parser = parse_timestamp, required_unless_present = "lookup_key")]
	pub end: Option<OffsetDateTime>,
	#[arg(long = "status", value_name = "STATUS", value_parser = parse_status)]
	pub statuses: Vec<NotificationStatus>,
	#[arg(long, value_name = "ID")]
	pub sender_id: Option<String>,
	#[arg(long, value_name = "ID")]
	pub receiver_id: Option<String>,
	#[arg(long, value_name = "REGEX")]
	pub subject: Option<String>,
	#[arg(long = "group", value_name = "GROUP")]
	pub groups: Vec<String>,
	#[arg(long, value_name = "N", default_value_t = 10)]
	pub size: u32,
	#[arg(long, value_name = "N")]
	pub max_pages: Option<u32>,
	#[arg(long, value_name = "TOKEN")]
	pub next_page_key: Option<String>,
	/// Composite key `iun##recipient##delegate##group` of a single row to fetch.
	#[arg(long, value_name = "KEY", requires = "sent_at")]
	pub lookup_key: Option<String>,
	#[arg(long, value_name = "RFC3339", value_parser = parse_timestamp)]
	pub sent_at: Option<OffsetDateTime>,
	/// Create the delegation table and its indexes before querying.
	#[arg(long)]
	pub bootstrap_schema: bool,
}
impl Args {
	fn search_request(&self) -> color_eyre::Result<DelegatedSearchRequest> {
		let (Some(start_date), Some(end_date)) = (self.start, self.end) else {
			return Err(eyre::eyre!("--start and --end are required for a search."));
		};

		Ok(DelegatedSearchRequest {
			delegate_id: self.delegate_id.clone(),
			cx_groups: self.cx_groups.clone(),
			start_date,
			end_date,
			statuses: self.statuses.clone(),
			sender_id: self.sender_id.clone(),
			receiver_id: self.receiver_id.clone(),
			subject_reg_exp: self.subject.clone(),
			groups: self.groups.clone(),
			size: self.size,
			max_page_number: self.max_pages,
			next_pages_key: self.next_page_key.clone(),
		})
	}

	fn lookup_request(&self) -> Option<CompositeKeyRequest> {
		let key = self.lookup_key.clone()?;
		let sent_at = self.sent_at?;

		Some(CompositeKeyRequest {
			delegate_id: self.delegate_id.clone(),
			cx_groups: self.cx_groups.clone(),
			iun_recipient_id_delegate_id_group_id: key,
			sent_at,
		})
	}
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = pn_config::load(&args.config)?;

	init_tracing(&config)?;

	let db = Db::connect(&config.storage).await?;

	if args.bootstrap_schema {
		db.ensure_schema().await?;

		tracing::info!(table = %db.delegation_table, "Delegation schema ensured.");
	}

	let service = DeliveryService::new(config, db);
	let page = match args.lookup_request() {
		Some(req) => service.search_by_composite_key(req).await?,
		None => service.search_delegated(args.search_request()?).await?,
	};

	println!("{}", serde_json::to_string_pretty(&page)?);

	Ok(())
}

fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Red.on_default() | Effects::BOLD)
		.usage(AnsiColor::Red.on_default() | Effects::BOLD)
		.literal(AnsiColor::Blue.on_default() | Effects::BOLD)
		.placeholder(AnsiColor::Green.on_default())
}

fn init_tracing(config: &pn_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	Ok(())
}

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, String> {
	OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| format!("expected RFC 3339: {err}"))
}

fn parse_status(raw: &str) -> Result<NotificationStatus, String> {
	raw.to_ascii_uppercase().parse().map_err(|err: pn_service::Error| err.to_string())
}
