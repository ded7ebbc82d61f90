use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::error;

use event_scout::config::Config;
use event_scout::health::{CircuitState, SourceHealthMonitor};
use event_scout::logging;
use event_scout::runner::CrawlRunner;
use event_scout::storage::{InMemoryStorage, Storage};

#[derive(Parser)]
#[command(name = "event_scout")]
#[command(about = "Multi-source event listings crawler")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl configured sources and report per-source results
    Crawl {
        /// Specific source slugs to crawl (comma-separated)
        #[arg(long)]
        sources: Option<String>,
        /// Override the per-source deadline from the config file
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// Print the configured sources
    ListSources,
    /// Evaluate the crawl circuit for one source
    CheckHealth {
        /// Source slug
        slug: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());

    match cli.command {
        Commands::Crawl {
            sources,
            deadline_secs,
        } => {
            println!("🔄 Crawling sources...");

            let only: Option<Vec<String>> = sources
                .map(|list| list.split(',').map(|s| s.trim().to_string()).collect());

            let mut runner = CrawlRunner::from_config(&config, storage.clone());
            if let Some(secs) = deadline_secs {
                runner = runner.with_deadline(std::time::Duration::from_secs(secs));
            }
            runner.sync_sources(&config).await?;

            match runner.crawl_all(only.as_deref()).await {
                Ok(results) => {
                    for result in &results {
                        println!("\n📊 Crawl results for {}:", result.source_slug);
                        if result.gated {
                            println!("   Circuit open; source skipped");
                            continue;
                        }
                        if result.cancelled {
                            println!("   ⏱ Deadline hit; partial results");
                        }
                        println!("   Discovered: {}", result.discovered);
                        println!("   Created: {}", result.created);
                        println!("   Merged: {}", result.merged);
                        println!("   Unchanged: {}", result.unchanged);
                        println!("   Dropped (no date): {}", result.dropped_dates);
                        if !result.errors.is_empty() {
                            println!("\n⚠️  Errors encountered:");
                            for error in &result.errors {
                                println!("   - {}", error);
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Crawl run failed: {}", e);
                    println!("❌ Crawl run failed: {}", e);
                }
            }
        }
        Commands::ListSources => {
            println!("Configured sources:");
            for entry in &config.sources {
                let status = if entry.active { "active" } else { "inactive" };
                println!(
                    "   {} — {} at {} ({}, {:?} discovery, {} entry urls)",
                    entry.slug,
                    entry.name,
                    entry.venue_name,
                    status,
                    entry.profile.discovery,
                    entry.profile.entry_urls.len()
                );
            }
        }
        Commands::CheckHealth { slug } => {
            let runner = CrawlRunner::from_config(&config, storage.clone());
            runner.sync_sources(&config).await?;

            let source = storage
                .get_active_sources()
                .await?
                .into_iter()
                .find(|s| s.slug == slug);

            match source.and_then(|s| s.id) {
                Some(source_id) => {
                    let monitor = SourceHealthMonitor::new(storage.clone());
                    let state = monitor.check(source_id).await;
                    match state {
                        CircuitState::Closed => println!("✅ {}: circuit closed", slug),
                        CircuitState::Open => println!("⛔ {}: circuit open", slug),
                    }
                }
                None => {
                    println!("⚠️  Unknown or inactive source: {}", slug);
                }
            }
        }
    }
    Ok(())
}
