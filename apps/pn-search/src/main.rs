use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = pn_search::Args::parse();

	pn_search::run(args).await
}
