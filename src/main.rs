use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;

use stock_watchlist::app::{App, SearchPhase};
use stock_watchlist::cli::{Cli, Commands, WatchlistAction};
use stock_watchlist::config::Config;
use stock_watchlist::insight;
use stock_watchlist::utils::format_local_time;

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::from_env().context("Invalid configuration")?,
    };

    if let Commands::Search {
        limit: Some(limit), ..
    } = &cli.command
    {
        config.search.limit = *limit;
    }

    let app = App::from_config(config, cli.ephemeral)?;

    match cli.command {
        Commands::Search { ref query, .. } => search(&app, query).await,
        Commands::Quote { ref symbol } => quote(&app, symbol).await,
        Commands::Watchlist { ref action } => watchlist(&app, action).await,
    }
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

async fn search(app: &App, query: &str) -> Result<()> {
    let search = app.search();
    search.set_query(query);
    let state = search.settled().await;
    if state.phase == SearchPhase::Error {
        info!("search for `{}` failed", query);
    }
    print_json(&state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteOutput {
    #[serde(flatten)]
    view: stock_watchlist::app::QuoteView,
    stats: Option<insight::KeyStats>,
    insight: Option<insight::Insight>,
}

async fn quote(app: &App, symbol: &str) -> Result<()> {
    let view = app.quotes().load(symbol).await?;
    let stats = view.quote.as_ref().map(insight::key_stats);
    let insight = view.quote.as_ref().map(insight::compute);
    print_json(&QuoteOutput {
        view,
        stats,
        insight,
    })
}

async fn watchlist(app: &App, action: &WatchlistAction) -> Result<()> {
    let watchlist = app.watchlist();
    match action {
        WatchlistAction::List => {
            watchlist.sync().await?;
            print_json(&watchlist.settled().await.rows())
        }
        WatchlistAction::Add { symbol, name } => {
            let items = watchlist
                .add(symbol, name.as_deref().unwrap_or_default())
                .await?;
            print_json(&items)
        }
        WatchlistAction::Remove { symbol } => {
            let items = watchlist.remove(symbol).await?;
            print_json(&items)
        }
        WatchlistAction::Refresh { watch } => {
            watchlist.refresh().await?;
            print_json(&watchlist.settled().await)?;
            if !*watch {
                return Ok(());
            }

            let period = app.config().quotes.refresh_interval;
            let refresher = watchlist.spawn_auto_refresh(period);
            info!("refreshing every {:?}; press Ctrl-C to stop", period);
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tokio::time::sleep(period + Duration::from_millis(50)) => {
                        let snapshot = watchlist.settled().await;
                        if let Some(updated) = snapshot.last_updated {
                            info!("quotes updated at {}", format_local_time(updated));
                        }
                        print_json(&snapshot)?;
                    }
                }
            }
            refresher.abort();
            Ok(())
        }
    }
}
