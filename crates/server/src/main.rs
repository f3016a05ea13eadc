//! Grid Lab - grid trading strategy generator and backtester
//!
//! Usage:
//!   grid-lab serve --port 3001                       - Launch web server with UI
//!   grid-lab generate --a 1 --b 10 --first-trigger-price 10 --total-rows 5 --buy-amount 1000
//!   grid-lab import --file data/399971.json          - Import daily bars
//!   grid-lab backtest --strategy-id 1 --code 399971 --cash 10000
//!   grid-lab strategies                              - List saved strategies

mod error;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::{
    DecayModel, FillPolicy, GridPolicy, GridService, OhlcBar, RemoteMarketData,
    RunBacktestRequest, Strategy, StrategyConfig,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::routes::{api_router, AppState};

pub(crate) const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

const DEFAULT_DB_PATH: &str = "data/grid.db";

#[derive(Parser)]
#[command(name = "grid-lab")]
#[command(about = "Grid trading strategy generator and backtester", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the web server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Generate a strategy ladder and optionally save it
    Generate {
        #[arg(long)]
        a: Decimal,
        #[arg(long)]
        b: Decimal,
        #[arg(long)]
        first_trigger_price: Decimal,
        #[arg(long)]
        total_rows: u32,
        /// Currency committed per row
        #[arg(long)]
        buy_amount: Decimal,
        /// geometric or half_step
        #[arg(long, default_value = "geometric")]
        decay: DecayModel,
        #[arg(long)]
        profit_margin: Option<Decimal>,
        #[arg(long)]
        slippage: Option<Decimal>,
        #[arg(long)]
        lot_size: Option<u32>,
        /// Sold rows stay sold instead of re-arming
        #[arg(long)]
        no_reentry: bool,
        #[arg(long)]
        name: Option<String>,
        /// Persist the strategy
        #[arg(long)]
        save: bool,
    },
    /// Import daily bars from a JSON file
    Import {
        /// `{"meta": {"code"}, "data": [...]}` or a bare array of bars
        #[arg(long)]
        file: PathBuf,
        /// Instrument code; defaults to meta.code from the file
        #[arg(long)]
        code: Option<String>,
    },
    /// Backtest a saved strategy
    Backtest {
        #[arg(long)]
        strategy_id: i64,
        #[arg(long)]
        code: String,
        /// First date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<chrono::NaiveDate>,
        /// Last date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<chrono::NaiveDate>,
        /// Initial cash
        #[arg(long)]
        cash: Decimal,
        /// gap_aware or level_price
        #[arg(long, default_value = "gap_aware")]
        fill_policy: FillPolicy,
    },
    /// List saved strategies
    Strategies,
}

fn log_filter(verbose: bool) -> tracing_subscriber::EnvFilter {
    use tracing_subscriber::EnvFilter;

    if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,grid_lab=debug")
    } else {
        // RUST_LOG, possibly from .env, overrides the default
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,engine=info,grid_lab=info"))
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*};

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(log_filter(verbose))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Generate {
            a,
            b,
            first_trigger_price,
            total_rows,
            buy_amount,
            decay,
            profit_margin,
            slippage,
            lot_size,
            no_reentry,
            name,
            save,
        } => {
            let defaults = GridPolicy::default();
            let config = StrategyConfig {
                name,
                a,
                b,
                first_trigger_price,
                total_rows,
                buy_amount,
                policy: GridPolicy {
                    decay,
                    slippage: slippage.unwrap_or(defaults.slippage),
                    profit_margin: profit_margin.unwrap_or(defaults.profit_margin),
                    lot_size: lot_size.unwrap_or(defaults.lot_size),
                    reentrant: !no_reentry,
                },
            };
            cmd_generate(config, save).await?;
        }
        Commands::Import { file, code } => {
            cmd_import(file, code).await?;
        }
        Commands::Backtest {
            strategy_id,
            code,
            start,
            end,
            cash,
            fill_policy,
        } => {
            let request = RunBacktestRequest {
                strategy_id,
                code,
                start_date: start,
                end_date: end,
                initial_cash: cash,
                fill_policy: Some(fill_policy),
            };
            cmd_backtest(request).await?;
        }
        Commands::Strategies => {
            cmd_strategies().await?;
        }
    }

    Ok(())
}

/// Open the database and build the service. OHLC comes from `GRID_MARKET_URL`
/// when set, otherwise from imported bars.
async fn open_service() -> anyhow::Result<(GridService, String)> {
    let db_path = std::env::var("GRID_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let db = persistence::Database::new(&db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", db_path);

    let service = match std::env::var("GRID_MARKET_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let remote = RemoteMarketData::new(url.trim())?;
            info!("Market data from {}", remote.base_url());
            GridService::new(db.pool_clone(), Arc::new(remote))
        }
        _ => GridService::with_local_data(db.pool_clone()),
    };

    Ok((service, db_path))
}

// ============================================================================
// Serve command - Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Grid Lab v{} starting...", APP_VERSION);

    let (service, db_path) = open_service().await?;
    let state = AppState {
        service: Arc::new(service),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Static front-end next to the executable, else in the working directory
    let exe_path = std::env::current_exe().unwrap_or_default();
    let exe_dir = exe_path.parent().unwrap_or(std::path::Path::new("."));
    let dist_dir = exe_dir.join("dist");
    let static_dir = if dist_dir.exists() {
        dist_dir
    } else {
        PathBuf::from("dist")
    };

    let app = axum::Router::new()
        .nest("/api", api_router(state))
        .fallback_service(ServeDir::new(&static_dir))
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Grid Lab v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET    /api/health                  - Health check");
    println!("  POST   /api/strategy/generate       - Generate a ladder");
    println!("  POST   /api/strategy/save           - Save a strategy");
    println!("  GET    /api/strategy/list           - Saved strategies");
    println!("  GET    /api/strategy/:id            - Strategy with rows");
    println!("  GET    /api/strategy/:id/rows       - Strategy rows");
    println!("  DELETE /api/strategy/:id            - Delete strategy and its backtests");
    println!("  POST   /api/backtest/run            - Run a backtest");
    println!("  GET    /api/backtest/list           - Backtest summaries");
    println!("  GET    /api/backtest/:id            - Full backtest run");
    println!("  GET    /api/stocks                  - Instruments with latest close");
    println!("  GET    /api/stocks/:code/ohlc       - Daily bars");
    println!("  GET    /api/imports                 - Import batches");
    println!("  DELETE /api/imports/:id             - Delete an import batch");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// CLI commands
// ============================================================================

fn print_strategy(strategy: &Strategy) {
    println!(
        "\n  {:>4} {:>14} {:>12} {:>12} {:>10} {:>12}",
        "Row", "Ratio", "Trigger", "Buy", "Shares", "Sell"
    );
    println!("  {}", "-".repeat(70));
    for row in &strategy.rows {
        println!(
            "  {:>4} {:>14} {:>12} {:>12} {:>10} {:>12}",
            row.index,
            row.level_ratio.round_dp(6),
            row.buy_trigger_price,
            row.buy_price,
            row.shares,
            row.sell_price
        );
    }
    println!("\n  Capital to fill every row: {}", strategy.total_capital());
}

async fn cmd_generate(config: StrategyConfig, save: bool) -> anyhow::Result<()> {
    println!("\n=== Grid Lab v{} ===", APP_VERSION);

    if !save {
        let strategy = engine::generate(&config)?;
        print_strategy(&strategy);
        return Ok(());
    }

    let (service, _) = open_service().await?;
    let strategy = service.generate(&config)?;
    print_strategy(&strategy);
    let id = service.save(&strategy).await?;
    println!("  Saved as strategy #{}", id);
    Ok(())
}

#[derive(Deserialize)]
struct ImportMeta {
    code: String,
}

/// Accepted shapes of an import file
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    WithMeta {
        meta: Option<ImportMeta>,
        data: Vec<OhlcBar>,
    },
    Bars(Vec<OhlcBar>),
}

async fn cmd_import(file: PathBuf, code: Option<String>) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let parsed: ImportFile = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let (meta_code, bars) = match parsed {
        ImportFile::WithMeta { meta, data } => (meta.map(|m| m.code), data),
        ImportFile::Bars(bars) => (None, bars),
    };
    let code = code
        .or(meta_code)
        .context("No instrument code: pass --code or include meta.code in the file")?;

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let (service, db_path) = open_service().await?;
    let summary = service
        .import_bars(file_name.as_deref(), &code, bars)
        .await?;

    println!(
        "Imported {} bars for {} ({} ~ {}) into {} as batch #{}",
        summary.record_count,
        summary.code,
        summary.first_date,
        summary.last_date,
        db_path,
        summary.import_id
    );
    Ok(())
}

async fn cmd_backtest(request: RunBacktestRequest) -> anyhow::Result<()> {
    println!("\n=== Grid Lab v{} ===", APP_VERSION);

    let (service, _) = open_service().await?;
    let run = service.run_backtest(&request).await?;
    let m = &run.metrics;

    println!(
        "Backtest #{} - strategy {} on {} ({} ~ {}, {} bars)",
        run.id.unwrap_or_default(),
        request.strategy_id,
        run.code,
        run.start_date,
        run.end_date,
        run.daily_equity.len()
    );
    println!("  Initial cash:        {:>14}", m.initial_cash);
    println!("  Final value:         {:>14}", m.final_value);
    println!("  Total return:        {:>13.2}%", m.total_return * Decimal::ONE_HUNDRED);
    println!("  Annualized return:   {:>13.2}%", m.annualized_return * Decimal::ONE_HUNDRED);
    println!("  Max drawdown:        {:>13.2}%", m.max_drawdown * Decimal::ONE_HUNDRED);
    println!("  Max capital used:    {:>14}", m.max_capital_used);
    println!("  Sharpe:              {:>14}", m.sharpe_ratio);
    println!(
        "  Trades:              {:>14} ({} buys, {} sells, {} skipped)",
        m.trade_count, m.buy_count, m.sell_count, m.skipped_trigger_count
    );
    println!(
        "  Round trips:         {:>14} (win rate {:.1}%)",
        m.round_trips,
        m.win_rate * Decimal::ONE_HUNDRED
    );
    println!("  Open positions:      {:>14}", m.open_positions);
    Ok(())
}

async fn cmd_strategies() -> anyhow::Result<()> {
    let (service, db_path) = open_service().await?;
    let strategies = service.list_strategies().await?;

    println!("\n{} saved strategies in {}", strategies.len(), db_path);
    if strategies.is_empty() {
        return Ok(());
    }
    println!(
        "  {:>4}  {:<20} {:>8} {:>8} {:>10} {:>5} {:>10}",
        "#", "Name", "a", "b", "First", "Rows", "Amount"
    );
    println!("  {}", "-".repeat(72));
    for s in &strategies {
        println!(
            "  {:>4}  {:<20} {:>8} {:>8} {:>10} {:>5} {:>10}",
            s.id,
            s.name.as_deref().unwrap_or("-"),
            s.a,
            s.b,
            s.first_trigger_price,
            s.total_rows,
            s.buy_amount
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_file_drives_log_filter() {
        let path = std::env::temp_dir().join(format!("grid-lab-{}.env", std::process::id()));
        std::fs::write(&path, "RUST_LOG=warn,engine=trace\n").unwrap();
        dotenvy::from_path_override(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let filter = log_filter(false).to_string();
        assert!(filter.contains("engine=trace"));
        assert!(!filter.contains("grid_lab=info"));

        assert!(log_filter(true).to_string().contains("persistence=debug"));
    }
}
