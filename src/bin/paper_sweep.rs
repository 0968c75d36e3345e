//! Paper trading maintenance CLI.
//!
//! Drives the engine outside the request path: creates portfolios, feeds
//! individual signals, and runs the scheduled expiry sweep across all
//! active portfolios.

use clap::{Parser, Subcommand};
use filingbot::{
    config::Config,
    paper::PaperTrader,
    price::QuoteClient,
    storage::Database,
    types::{Direction, ExecutionOutcome, TradeSignal},
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "paper-sweep")]
#[command(about = "Paper trading maintenance for filing-driven portfolios")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new paper trading portfolio
    Init {
        name: String,
        #[arg(long, default_value = "100000")]
        starting_capital: Decimal,
        #[arg(long, default_value = "0.10")]
        max_position_size: Decimal,
        #[arg(long, default_value = "0.60")]
        min_confidence: Decimal,
    },
    /// Execute a single trade signal against a portfolio
    Execute {
        portfolio_id: String,
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        filing_id: String,
        #[arg(long)]
        predicted_return: Decimal,
        #[arg(long)]
        confidence: Decimal,
        #[arg(long, default_value = "long")]
        direction: String,
    },
    /// Close expired positions across all active portfolios
    Sweep,
    /// Recompute and print metrics for a portfolio
    Metrics { portfolio_id: String },
    /// List active portfolios and their open positions
    Status,
    /// Resume trading and sweeping for a portfolio
    Activate { portfolio_id: String },
    /// Stop a portfolio from accepting signals or being swept
    Deactivate { portfolio_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let db = Arc::new(Database::connect(&config.database.path).await?);
    let prices = Arc::new(QuoteClient::new(
        &config.price.base_url,
        config.price.timeout_secs,
    )?);
    let trader = PaperTrader::new(db.clone(), prices, config.trading.clone());

    match cli.command {
        Commands::Init {
            name,
            starting_capital,
            max_position_size,
            min_confidence,
        } => {
            let portfolio = db
                .create_portfolio(&name, starting_capital, max_position_size, min_confidence)
                .await?;
            println!("Created portfolio {} ({})", portfolio.name, portfolio.id);
        }

        Commands::Execute {
            portfolio_id,
            ticker,
            filing_id,
            predicted_return,
            confidence,
            direction,
        } => {
            let direction = match direction.to_lowercase().as_str() {
                "long" => Direction::Long,
                "short" => Direction::Short,
                other => anyhow::bail!("unknown direction: {other}"),
            };
            let signal = TradeSignal {
                ticker,
                filing_id,
                predicted_return,
                confidence,
                direction,
                market_cap: None,
            };

            match trader.execute(&portfolio_id, &signal).await? {
                ExecutionOutcome::Executed { position } => {
                    println!(
                        "Opened {} {} x{} @ ${} (position {})",
                        position.direction,
                        position.ticker,
                        position.shares,
                        position.entry_price,
                        position.id
                    );
                }
                ExecutionOutcome::Rejected { reason } => {
                    println!("Rejected: {reason}");
                }
            }
        }

        Commands::Sweep => {
            let report = trader.sweep_all().await;
            println!(
                "Sweep complete: {} portfolios processed, {} failed, {} positions closed",
                report.portfolios_processed, report.portfolios_failed, report.positions_closed
            );
            if report.portfolios_failed > 0 {
                anyhow::bail!("{} portfolios failed", report.portfolios_failed);
            }
        }

        Commands::Metrics { portfolio_id } => {
            let metrics = trader.update_metrics(&portfolio_id).await?;
            println!("\n📈 Portfolio Metrics\n");
            println!("Total return: {:.2}%", metrics.total_return_pct);
            println!(
                "Win rate: {:.1}% ({}/{} trades)",
                metrics.win_rate * Decimal::ONE_HUNDRED,
                metrics.winning_trades,
                metrics.total_trades
            );
            println!("Losing trades: {}", metrics.losing_trades);
            println!("Avg win: ${:.2}", metrics.avg_win);
            println!("Avg loss: ${:.2}", metrics.avg_loss);
            println!("Profit factor: {:.2}", metrics.profit_factor);
        }

        Commands::Status => {
            let portfolios = db.active_portfolios().await?;
            println!("\n💼 Active Portfolios: {}\n", portfolios.len());
            for portfolio in portfolios {
                println!(
                    "{} ({}) — cash ${:.2} of ${:.2}",
                    portfolio.name,
                    portfolio.id,
                    portfolio.current_cash,
                    portfolio.starting_capital
                );
                let positions = db.open_positions(&portfolio.id).await?;
                for position in positions {
                    println!(
                        "  {} {} x{} @ ${} since {} (filing {})",
                        position.direction,
                        position.ticker,
                        position.shares,
                        position.entry_price,
                        position.entry_date.format("%Y-%m-%d"),
                        position.filing_id
                    );
                }
            }
        }

        Commands::Activate { portfolio_id } => {
            db.set_active(&portfolio_id, true).await?;
            println!("Portfolio {portfolio_id} activated");
        }

        Commands::Deactivate { portfolio_id } => {
            db.set_active(&portfolio_id, false).await?;
            println!("Portfolio {portfolio_id} deactivated");
        }
    }

    Ok(())
}
