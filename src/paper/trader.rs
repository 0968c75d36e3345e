//! Position lifecycle: execution, expiry closing, portfolio metrics.

use crate::config::TradingConfig;
use crate::error::Result;
use crate::paper::{Evaluation, SignalEvaluator};
use crate::price::PriceSource;
use crate::storage::{Database, InsertOutcome};
use crate::types::{
    ExecutionOutcome, PortfolioMetrics, Position, RejectReason, SweepReport, Trade, TradeSignal,
};
use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Simulated trading engine for one or more portfolios.
///
/// Holds no cross-portfolio state; portfolios are independent and an
/// external driver may process them in parallel.
pub struct PaperTrader {
    db: Arc<Database>,
    prices: Arc<dyn PriceSource>,
    evaluator: SignalEvaluator,
    config: TradingConfig,
}

impl PaperTrader {
    pub fn new(db: Arc<Database>, prices: Arc<dyn PriceSource>, config: TradingConfig) -> Self {
        Self {
            db,
            prices,
            evaluator: SignalEvaluator::new(config.clone()),
            config,
        }
    }

    pub fn evaluator(&self) -> &SignalEvaluator {
        &self.evaluator
    }

    /// Evaluate, size, and persist a trade for `signal`.
    ///
    /// Rejections (criteria failed, duplicate filing, allocation too small)
    /// come back as `ExecutionOutcome::Rejected` — normal outcomes the
    /// caller branches on. `Err` means a collaborator failed and nothing
    /// was committed.
    pub async fn execute(
        &self,
        portfolio_id: &str,
        signal: &TradeSignal,
    ) -> Result<ExecutionOutcome> {
        let portfolio = self.db.get_portfolio(portfolio_id).await?;

        if let Evaluation::Rejected(reason) = self.evaluator.evaluate(signal, &portfolio) {
            info!(portfolio_id, ticker = %signal.ticker, %reason, "signal rejected");
            return Ok(ExecutionOutcome::Rejected { reason });
        }

        // Confidence-scaled allocation, capped by the portfolio's max
        // position fraction.
        let fraction = (signal.confidence * self.config.confidence_sizing_factor)
            .min(portfolio.max_position_size);
        let allocation = portfolio.current_cash * fraction;

        let entry_price = self.prices.current_price(&signal.ticker).await?;
        let shares = (allocation / entry_price)
            .floor()
            .to_i64()
            .unwrap_or(0);

        if shares < 1 {
            return Ok(ExecutionOutcome::Rejected {
                reason: RejectReason::AllocationTooSmall {
                    allocation,
                    price: entry_price,
                },
            });
        }

        let spent = Decimal::from(shares) * entry_price;
        let total_debit = spent + self.config.commission;
        if total_debit > portfolio.current_cash {
            return Ok(ExecutionOutcome::Rejected {
                reason: RejectReason::InsufficientCash {
                    needed: total_debit,
                    available: portfolio.current_cash,
                },
            });
        }

        let position = Position {
            id: Uuid::new_v4().to_string(),
            portfolio_id: portfolio_id.to_string(),
            ticker: signal.ticker.clone(),
            filing_id: signal.filing_id.clone(),
            direction: signal.direction,
            shares,
            entry_price,
            entry_date: Utc::now(),
            predicted_return: signal.predicted_return,
            confidence: signal.confidence,
        };

        // The unique (portfolio, filing) key decides duplicates, not the
        // application-level view of open positions.
        match self.db.open_position_tx(&position, total_debit).await? {
            InsertOutcome::Duplicate => Ok(ExecutionOutcome::Rejected {
                reason: RejectReason::AlreadyTraded,
            }),
            InsertOutcome::Inserted => {
                info!(
                    portfolio_id,
                    ticker = %position.ticker,
                    filing = %position.filing_id,
                    shares,
                    entry = %entry_price,
                    spent = %spent,
                    "position opened"
                );
                Ok(ExecutionOutcome::Executed { position })
            }
        }
    }

    /// Close every open position older than the hold period.
    ///
    /// A failed price lookup skips that position and the sweep continues.
    /// Already-converted positions are gone from the open set, so calling
    /// this again immediately closes nothing. Returns the number closed.
    pub async fn close_expired(&self, portfolio_id: &str) -> Result<usize> {
        let now = Utc::now();
        let hold = Duration::days(self.config.hold_period_days);
        let positions = self.db.open_positions(portfolio_id).await?;

        let mut closed = 0usize;
        for position in positions {
            if now - position.entry_date < hold {
                continue;
            }

            let exit_price = match self.prices.current_price(&position.ticker).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(
                        portfolio_id,
                        ticker = %position.ticker,
                        error = %e,
                        "price unavailable, skipping position this sweep"
                    );
                    continue;
                }
            };

            let trade = build_trade(&position, exit_price, now);
            let cash_credit = Decimal::from(position.shares) * exit_price - self.config.commission;

            self.db
                .close_position_tx(&position.id, &trade, cash_credit)
                .await?;
            closed += 1;

            info!(
                portfolio_id,
                ticker = %trade.ticker,
                pnl = %trade.realized_pnl,
                pnl_pct = %trade.realized_pnl_pct,
                "position closed after hold period"
            );
        }

        Ok(closed)
    }

    /// Recompute aggregate statistics from the full trade history plus open
    /// positions, persist them, and return the fresh values.
    pub async fn update_metrics(&self, portfolio_id: &str) -> Result<PortfolioMetrics> {
        let portfolio = self.db.get_portfolio(portfolio_id).await?;
        let trades = self.db.trades_for_portfolio(portfolio_id).await?;
        let open = self.db.open_positions(portfolio_id).await?;

        let total = trades.len() as u32;
        let winning = trades.iter().filter(|t| t.is_win()).count() as u32;
        let losing = total - winning;

        let win_rate = if total > 0 {
            Decimal::from(winning) / Decimal::from(total)
        } else {
            Decimal::ZERO
        };

        let gross_wins: Decimal = trades
            .iter()
            .filter(|t| t.is_win())
            .map(|t| t.realized_pnl)
            .sum();
        let gross_losses: Decimal = trades
            .iter()
            .filter(|t| !t.is_win())
            .map(|t| -t.realized_pnl)
            .sum();
        let avg_win = if winning > 0 {
            gross_wins / Decimal::from(winning)
        } else {
            Decimal::ZERO
        };
        let avg_loss = if losing > 0 {
            -(gross_losses / Decimal::from(losing))
        } else {
            Decimal::ZERO
        };
        let profit_factor = if gross_losses > Decimal::ZERO {
            gross_wins / gross_losses
        } else {
            Decimal::ZERO
        };

        // Open positions are carried at entry cost; the sweep realizes their
        // value when they close.
        let open_value: Decimal = open.iter().map(|p| p.entry_value()).sum();
        let equity = portfolio.current_cash + open_value;
        let total_return_pct = if portfolio.starting_capital > Decimal::ZERO {
            (equity - portfolio.starting_capital) / portfolio.starting_capital
                * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        let metrics = PortfolioMetrics {
            total_return_pct,
            win_rate,
            winning_trades: winning,
            losing_trades: losing,
            total_trades: total,
            avg_win,
            avg_loss,
            profit_factor,
        };

        self.db.update_metrics(portfolio_id, &metrics).await?;
        Ok(metrics)
    }

    /// Run the expiry sweep over all active portfolios.
    ///
    /// Each portfolio is isolated: an error in one is logged and counted,
    /// and the remaining portfolios are still processed.
    pub async fn sweep_all(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let portfolios = match self.db.active_portfolios().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "could not list active portfolios");
                report.portfolios_failed += 1;
                return report;
            }
        };

        for portfolio in portfolios {
            match self.close_expired(&portfolio.id).await {
                Ok(closed) => {
                    report.portfolios_processed += 1;
                    report.positions_closed += closed as u32;
                    if let Err(e) = self.update_metrics(&portfolio.id).await {
                        error!(portfolio = %portfolio.id, error = %e, "metrics update failed");
                    }
                }
                Err(e) => {
                    error!(portfolio = %portfolio.id, error = %e, "sweep failed for portfolio");
                    report.portfolios_failed += 1;
                }
            }
        }

        report
    }
}

fn build_trade(
    position: &Position,
    exit_price: Decimal,
    exit_date: chrono::DateTime<Utc>,
) -> Trade {
    let shares = Decimal::from(position.shares);
    let realized_pnl = shares * (exit_price - position.entry_price) * position.direction.sign();
    let entry_cost = shares * position.entry_price;
    let realized_pnl_pct = if entry_cost > Decimal::ZERO {
        realized_pnl / entry_cost
    } else {
        Decimal::ZERO
    };
    let actual_return_pct = if position.entry_price > Decimal::ZERO {
        (exit_price - position.entry_price) / position.entry_price * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };

    Trade {
        id: Uuid::new_v4().to_string(),
        portfolio_id: position.portfolio_id.clone(),
        ticker: position.ticker.clone(),
        filing_id: position.filing_id.clone(),
        direction: position.direction,
        shares: position.shares,
        entry_price: position.entry_price,
        entry_date: position.entry_date,
        exit_price,
        exit_date,
        predicted_return: position.predicted_return,
        confidence: position.confidence,
        realized_pnl,
        realized_pnl_pct,
        actual_return_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::price::StaticPrices;
    use crate::types::Direction;
    use rust_decimal_macros::dec;

    async fn setup(prices: StaticPrices) -> (PaperTrader, Arc<Database>, String) {
        let db = Arc::new(Database::connect(":memory:").await.unwrap());
        let portfolio = db
            .create_portfolio("growth", dec!(100000), dec!(0.10), dec!(0.60))
            .await
            .unwrap();
        let trader = PaperTrader::new(db.clone(), Arc::new(prices), TradingConfig::default());
        (trader, db, portfolio.id)
    }

    fn signal(filing_id: &str) -> TradeSignal {
        TradeSignal {
            ticker: "AAPL".to_string(),
            filing_id: filing_id.to_string(),
            predicted_return: dec!(3.0),
            confidence: dec!(0.75),
            direction: Direction::Long,
            market_cap: None,
        }
    }

    /// Open a position directly with a backdated entry so the hold period
    /// has already elapsed, debiting cash exactly as `execute` would.
    async fn open_aged(
        db: &Database,
        portfolio_id: &str,
        filing_id: &str,
        ticker: &str,
        shares: i64,
        entry_price: Decimal,
        direction: Direction,
        days_old: i64,
    ) -> Position {
        let position = Position {
            id: Uuid::new_v4().to_string(),
            portfolio_id: portfolio_id.to_string(),
            ticker: ticker.to_string(),
            filing_id: filing_id.to_string(),
            direction,
            shares,
            entry_price,
            entry_date: Utc::now() - Duration::days(days_old),
            predicted_return: dec!(3.0),
            confidence: dec!(0.75),
        };
        let debit = Decimal::from(shares) * entry_price + dec!(1);
        db.open_position_tx(&position, debit).await.unwrap();
        position
    }

    #[tokio::test]
    async fn test_execute_scenario_sizing() {
        // $100k portfolio, 10% cap, 60% min confidence; AAPL at $195 with
        // confidence 0.75 → fraction min(0.10, 0.1125) = 0.10 → $10,000
        // allocation → 51 shares.
        let prices = StaticPrices::new().with_price("AAPL", dec!(195.00));
        let (trader, db, pid) = setup(prices).await;

        let outcome = trader.execute(&pid, &signal("f1")).await.unwrap();
        assert!(outcome.executed());

        let position = outcome.position().unwrap();
        assert_eq!(position.shares, 51);
        assert_eq!(position.entry_price, dec!(195.00));
        assert!(position.entry_value() <= dec!(10000));

        // Cash debited: 51 * 195 + $1 commission.
        let portfolio = db.get_portfolio(&pid).await.unwrap();
        assert_eq!(portfolio.current_cash, dec!(100000) - dec!(9945) - dec!(1));
    }

    #[tokio::test]
    async fn test_execute_rejects_weak_signal_without_touching_cash() {
        let prices = StaticPrices::new().with_price("AAPL", dec!(195.00));
        let (trader, db, pid) = setup(prices).await;

        let mut weak = signal("f1");
        weak.confidence = dec!(0.40);
        let outcome = trader.execute(&pid, &weak).await.unwrap();

        assert!(!outcome.executed());
        assert!(matches!(
            outcome.reason(),
            Some(RejectReason::LowConfidence { .. })
        ));
        assert_eq!(
            db.get_portfolio(&pid).await.unwrap().current_cash,
            dec!(100000)
        );
    }

    #[tokio::test]
    async fn test_no_double_trade_per_filing() {
        let prices = StaticPrices::new().with_price("AAPL", dec!(195.00));
        let (trader, db, pid) = setup(prices).await;

        let first = trader.execute(&pid, &signal("f1")).await.unwrap();
        assert!(first.executed());

        let second = trader.execute(&pid, &signal("f1")).await.unwrap();
        assert_eq!(second.reason(), Some(&RejectReason::AlreadyTraded));

        assert_eq!(db.open_positions(&pid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_when_allocation_buys_no_shares() {
        // Price far above what a 10% slice of a tiny portfolio can buy.
        let prices = StaticPrices::new().with_price("AAPL", dec!(195.00));
        let db = Arc::new(Database::connect(":memory:").await.unwrap());
        let portfolio = db
            .create_portfolio("tiny", dec!(500), dec!(0.10), dec!(0.60))
            .await
            .unwrap();
        let trader = PaperTrader::new(db, Arc::new(prices), TradingConfig::default());

        let outcome = trader.execute(&portfolio.id, &signal("f1")).await.unwrap();
        assert!(matches!(
            outcome.reason(),
            Some(RejectReason::AllocationTooSmall { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_when_commission_exceeds_remaining_cash() {
        // Uncapped sizing puts the whole balance into the position, so the
        // share cost plus commission overshoots available cash.
        let prices = StaticPrices::new().with_price("AAPL", dec!(100.00));
        let db = Arc::new(Database::connect(":memory:").await.unwrap());
        let portfolio = db
            .create_portfolio("all-in", dec!(1000), dec!(1.0), dec!(0.60))
            .await
            .unwrap();
        let config = TradingConfig {
            confidence_sizing_factor: dec!(1.4),
            ..Default::default()
        };
        let trader = PaperTrader::new(db.clone(), Arc::new(prices), config);

        // fraction = min(0.75 * 1.4, 1.0) = 1.0 → 10 shares at $100 spends
        // the full $1000; the $1 commission tips it over.
        let outcome = trader.execute(&portfolio.id, &signal("f1")).await.unwrap();
        assert!(matches!(
            outcome.reason(),
            Some(RejectReason::InsufficientCash { .. })
        ));

        let loaded = db.get_portfolio(&portfolio.id).await.unwrap();
        assert_eq!(loaded.current_cash, dec!(1000));
        assert!(db.open_positions(&portfolio.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_price_failure_is_error_not_rejection() {
        let (trader, _db, pid) = setup(StaticPrices::new()).await;
        let err = trader.execute(&pid, &signal("f1")).await.unwrap_err();
        assert!(matches!(err, EngineError::Price { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_close_expired_is_idempotent() {
        let prices = StaticPrices::new().with_price("AAPL", dec!(200.00));
        let (trader, db, pid) = setup(prices).await;

        open_aged(&db, &pid, "f1", "AAPL", 51, dec!(195), Direction::Long, 8).await;

        let closed = trader.close_expired(&pid).await.unwrap();
        assert_eq!(closed, 1);

        // Nothing left to close; re-running the sweep is a no-op.
        let closed_again = trader.close_expired(&pid).await.unwrap();
        assert_eq!(closed_again, 0);

        let trades = db.trades_for_portfolio(&pid).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].realized_pnl, dec!(255)); // 51 * (200 - 195)
    }

    #[tokio::test]
    async fn test_fresh_position_not_closed() {
        let prices = StaticPrices::new().with_price("AAPL", dec!(200.00));
        let (trader, db, pid) = setup(prices).await;

        open_aged(&db, &pid, "f1", "AAPL", 51, dec!(195), Direction::Long, 3).await;

        assert_eq!(trader.close_expired(&pid).await.unwrap(), 0);
        assert_eq!(db.open_positions(&pid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cash_conservation_across_round_trip() {
        let prices = StaticPrices::new().with_price("AAPL", dec!(200.00));
        let (trader, db, pid) = setup(prices).await;

        let cash_before = db.get_portfolio(&pid).await.unwrap().current_cash;
        open_aged(&db, &pid, "f1", "AAPL", 51, dec!(195), Direction::Long, 8).await;
        trader.close_expired(&pid).await.unwrap();

        // One commission at entry, one at exit.
        let expected = cash_before - dec!(9945) - dec!(1) + dec!(51) * dec!(200) - dec!(1);
        assert_eq!(db.get_portfolio(&pid).await.unwrap().current_cash, expected);
    }

    #[tokio::test]
    async fn test_short_position_profits_from_decline() {
        let prices = StaticPrices::new().with_price("GME", dec!(90.00));
        let (trader, db, pid) = setup(prices).await;

        open_aged(&db, &pid, "f1", "GME", 10, dec!(100), Direction::Short, 8).await;
        trader.close_expired(&pid).await.unwrap();

        let trades = db.trades_for_portfolio(&pid).await.unwrap();
        assert_eq!(trades[0].realized_pnl, dec!(100)); // 10 * (90 - 100) * -1
        assert!(trades[0].is_win());
    }

    #[tokio::test]
    async fn test_price_outage_skips_position_but_sweep_continues() {
        // NOPRICE has no quote; AAPL closes normally.
        let prices = StaticPrices::new().with_price("AAPL", dec!(200.00));
        let (trader, db, pid) = setup(prices).await;

        open_aged(&db, &pid, "f1", "AAPL", 51, dec!(195), Direction::Long, 8).await;
        open_aged(&db, &pid, "f2", "NOPRICE", 10, dec!(50), Direction::Long, 8).await;

        let closed = trader.close_expired(&pid).await.unwrap();
        assert_eq!(closed, 1);

        let open = db.open_positions(&pid).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].ticker, "NOPRICE");
    }

    #[tokio::test]
    async fn test_metrics_win_rate() {
        let prices = StaticPrices::new().with_price("AAPL", dec!(100.00));
        let (trader, db, pid) = setup(prices).await;

        // Three entries below the $100 exit (wins: +100, +60, +20), two
        // above (losses: -50, -100).
        for (i, entry) in [dec!(90), dec!(94), dec!(98), dec!(105), dec!(110)]
            .iter()
            .enumerate()
        {
            let filing = format!("f{i}");
            open_aged(&db, &pid, &filing, "AAPL", 10, *entry, Direction::Long, 8).await;
        }
        assert_eq!(trader.close_expired(&pid).await.unwrap(), 5);

        let metrics = trader.update_metrics(&pid).await.unwrap();
        assert_eq!(metrics.winning_trades, 3);
        assert_eq!(metrics.losing_trades, 2);
        assert_eq!(metrics.total_trades, 5);
        assert_eq!(metrics.win_rate, dec!(0.6));
        assert_eq!(metrics.avg_win, dec!(60)); // 180 gross / 3 wins
        assert_eq!(metrics.avg_loss, dec!(-75)); // -150 gross / 2 losses
        assert_eq!(metrics.profit_factor, dec!(1.2)); // 180 / 150

        // Persisted on the portfolio row too.
        let portfolio = db.get_portfolio(&pid).await.unwrap();
        assert_eq!(portfolio.metrics, metrics);
    }

    #[tokio::test]
    async fn test_metrics_tolerate_empty_history() {
        let (trader, _db, pid) = setup(StaticPrices::new()).await;

        let metrics = trader.update_metrics(&pid).await.unwrap();
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, dec!(0));
        assert_eq!(metrics.total_return_pct, dec!(0));
        assert_eq!(metrics.avg_win, dec!(0));
        assert_eq!(metrics.avg_loss, dec!(0));
        assert_eq!(metrics.profit_factor, dec!(0));
    }

    #[tokio::test]
    async fn test_sweep_all_isolates_portfolios() {
        let prices = StaticPrices::new().with_price("AAPL", dec!(200.00));
        let db = Arc::new(Database::connect(":memory:").await.unwrap());
        let a = db
            .create_portfolio("a", dec!(100000), dec!(0.10), dec!(0.60))
            .await
            .unwrap();
        let b = db
            .create_portfolio("b", dec!(100000), dec!(0.10), dec!(0.60))
            .await
            .unwrap();
        let trader = PaperTrader::new(db.clone(), Arc::new(prices), TradingConfig::default());

        open_aged(&db, &a.id, "f1", "AAPL", 51, dec!(195), Direction::Long, 8).await;
        open_aged(&db, &b.id, "f1", "NOPRICE", 10, dec!(50), Direction::Long, 8).await;

        let report = trader.sweep_all().await;
        assert_eq!(report.portfolios_processed, 2);
        assert_eq!(report.portfolios_failed, 0);
        assert_eq!(report.positions_closed, 1);
    }
}
