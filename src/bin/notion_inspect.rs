use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use readmoo_sync::config;
use readmoo_sync::notion::{NotionClient, NotionService};
use readmoo_sync::sync::index_entries;

#[derive(Parser, Debug)]
#[command(about = "Print a Notion database's schema and the titles it already holds")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Database ID to inspect (defaults to notion.database_id)
    #[arg(long)]
    db_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let db_id = args
        .db_id
        .or_else(|| cfg.sync_target().database_id)
        .ok_or_else(|| anyhow::anyhow!("pass --db-id or set notion.database_id"))?;
    let client = NotionClient::new(cfg.notion.token.clone(), cfg.notion.version.clone());

    let db = client.retrieve_database(&db_id).await?;
    println!("Database ID: {}", db.id);
    println!("Properties:");
    let mut props: Vec<_> = db.properties.iter().collect();
    props.sort_by(|a, b| a.0.cmp(b.0));
    for (name, prop) in props {
        println!("  {} -> {{ id: {}, type: {} }}", name, prop.id, prop.typ);
        if let Some(select) = &prop.select {
            for option in &select.options {
                println!("      option: {}", option.name);
            }
        }
    }

    let entries = index_entries(client.query_database(&db.id).await?);
    let mut titles: Vec<_> = entries.into_iter().collect();
    titles.sort_by(|a, b| a.0.cmp(&b.0));
    println!("Entries ({}):", titles.len());
    for (title, entry) in titles {
        println!("  {} -> {}", title, entry.page_id);
    }
    Ok(())
}
