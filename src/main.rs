use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use readmoo_sync::browser::WebDriverBrowser;
use readmoo_sync::config::{self, Config};
use readmoo_sync::model::BookRecord;
use readmoo_sync::notion::NotionClient;
use readmoo_sync::output;
use readmoo_sync::scrape::{ScrapeOptions, ScrapeSettings, Scraper};
use readmoo_sync::session::{SessionKeeper, SessionSettings};
use readmoo_sync::sync;
use readmoo_sync::transform;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Scrape Readmoo highlights and mirror them into a Notion database"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Scrape and write the JSON dump, but do not sync
    #[arg(long, conflicts_with = "from_file")]
    scrape_only: bool,

    /// Sync books from a previous JSON dump instead of scraping
    #[arg(long)]
    from_file: Option<PathBuf>,

    /// Skip the Readwise export even when a token is configured
    #[arg(long)]
    no_export: bool,

    /// Print an example config and exit
    #[arg(long)]
    example_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.example_config {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    info!("Start running");
    let books = match &args.from_file {
        Some(path) => output::read_json(path).await?,
        None => {
            let books = scrape(&cfg, !args.no_export).await?;
            output::write_json(&books, &cfg.output_path()).await?;
            books
        }
    };
    info!(books = books.len(), "books ready to sync");

    if args.scrape_only {
        return Ok(());
    }

    // Sync failures are reported but do not fail the run; the dump above keeps
    // the scraped data.
    let notion = NotionClient::new(cfg.notion.token.clone(), cfg.notion.version.clone());
    match sync::sync_to_database(&notion, &books, transform::readmoo_to_notion, &cfg.sync_target()).await {
        Ok(report) => info!(
            database_id = %report.database_id,
            created = report.created,
            updated = report.updated,
            "sync completed"
        ),
        Err(err) => error!(?err, "sync to Notion failed"),
    }
    Ok(())
}

async fn scrape(cfg: &Config, export: bool) -> Result<Vec<BookRecord>> {
    let browser = WebDriverBrowser::connect(&cfg.browser).await?;
    let session = Arc::new(SessionKeeper::new(
        browser,
        cfg.readmoo.clone(),
        SessionSettings::from_config(&cfg.scrape),
    ));

    let token = cfg.readwise_token().map(str::to_string);
    let options = ScrapeOptions {
        export_externally: export && token.is_some(),
    };
    let scraper = Scraper::new(
        Arc::clone(&session),
        ScrapeSettings::from_config(&cfg.scrape),
        token,
    );

    let result = scraper.scrape_all(options).await;
    if let Err(err) = session.close().await {
        warn!(?err, "failed to close browser session");
    }
    Ok(result?)
}
