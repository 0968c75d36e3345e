//! Core domain types: signals, portfolios, positions, trades.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction for a simulated position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short; multiplies into realized P&L.
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(Direction::Long),
            "SHORT" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Model-generated trade recommendation for a single filing.
///
/// Ephemeral input; never persisted directly. `filing_id` ties the signal
/// back to the SEC filing that produced it and is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub ticker: String,
    pub filing_id: String,
    /// Predicted return in percent (3.0 = +3%).
    pub predicted_return: Decimal,
    /// Model confidence, 0..=1.
    pub confidence: Decimal,
    pub direction: Direction,
    pub market_cap: Option<Decimal>,
}

/// A paper trading portfolio. Owns open positions and historical trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub name: String,
    pub starting_capital: Decimal,
    pub current_cash: Decimal,
    pub is_active: bool,
    /// Max fraction of cash allocated to one position (0.10 = 10%).
    pub max_position_size: Decimal,
    /// Signals below this confidence are rejected.
    pub min_confidence: Decimal,
    pub metrics: PortfolioMetrics,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate statistics recomputed from the trade history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    /// Percentage return vs starting capital.
    pub total_return_pct: Decimal,
    /// Winning trades / total trades, 0..=1. Zero when no trades.
    pub win_rate: Decimal,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_trades: u32,
    /// Mean realized P&L across winning trades. Zero when no wins.
    pub avg_win: Decimal,
    /// Mean realized P&L across losing trades (negative). Zero when no losses.
    pub avg_loss: Decimal,
    /// Gross wins / gross losses. Zero when there are no losses yet.
    pub profit_factor: Decimal,
}

/// An open simulated trade.
///
/// At most one open position exists per (portfolio, filing); the storage
/// layer enforces this with a unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub portfolio_id: String,
    pub ticker: String,
    pub filing_id: String,
    pub direction: Direction,
    pub shares: i64,
    pub entry_price: Decimal,
    pub entry_date: DateTime<Utc>,
    pub predicted_return: Decimal,
    pub confidence: Decimal,
}

impl Position {
    /// Dollar cost of the position at entry (excluding commission).
    pub fn entry_value(&self) -> Decimal {
        Decimal::from(self.shares) * self.entry_price
    }
}

/// Closed position record. Immutable, append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub portfolio_id: String,
    pub ticker: String,
    pub filing_id: String,
    pub direction: Direction,
    pub shares: i64,
    pub entry_price: Decimal,
    pub entry_date: DateTime<Utc>,
    pub exit_price: Decimal,
    pub exit_date: DateTime<Utc>,
    pub predicted_return: Decimal,
    pub confidence: Decimal,
    pub realized_pnl: Decimal,
    /// Realized P&L over entry cost, as a fraction (0.03 = +3%).
    pub realized_pnl_pct: Decimal,
    /// Raw price move from entry to exit in percent, ignoring direction.
    pub actual_return_pct: Decimal,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}

/// Caller-facing result of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
}

/// Why a signal was not turned into a position. A normal outcome, not an
/// error; callers branch on this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    LowConfidence { confidence: Decimal, required: Decimal },
    ReturnBelowFloor { predicted: Decimal, floor: Decimal },
    PortfolioInactive,
    AlreadyTraded,
    AllocationTooSmall { allocation: Decimal, price: Decimal },
    InsufficientCash { needed: Decimal, available: Decimal },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::LowConfidence { confidence, required } => {
                write!(f, "confidence {confidence} below minimum {required}")
            }
            RejectReason::ReturnBelowFloor { predicted, floor } => {
                write!(f, "predicted return {predicted}% below {floor}% floor")
            }
            RejectReason::PortfolioInactive => write!(f, "portfolio is inactive"),
            RejectReason::AlreadyTraded => write!(f, "already traded"),
            RejectReason::AllocationTooSmall { allocation, price } => {
                write!(f, "allocation ${allocation} buys no shares at ${price}")
            }
            RejectReason::InsufficientCash { needed, available } => {
                write!(f, "needs ${needed} but only ${available} available")
            }
        }
    }
}

/// Result of `PaperTrader::execute`.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Executed { position: Position },
    Rejected { reason: RejectReason },
}

impl ExecutionOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed { .. })
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            ExecutionOutcome::Executed { position } => Some(position),
            ExecutionOutcome::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            ExecutionOutcome::Rejected { reason } => Some(reason),
            ExecutionOutcome::Executed { .. } => None,
        }
    }
}

/// Outcome of one sweep over all active portfolios.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub portfolios_processed: u32,
    pub portfolios_failed: u32,
    pub positions_closed: u32,
}
