//! Signal evaluation gate.
//!
//! Pure function of signal + portfolio configuration; no side effects, safe
//! to call repeatedly. The trader re-runs this defensively before executing.

use crate::config::TradingConfig;
use crate::types::{Portfolio, RejectReason, TradeSignal};

/// Outcome of evaluating a signal against a portfolio's criteria.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Accepted,
    Rejected(RejectReason),
}

impl Evaluation {
    pub fn accepted(&self) -> bool {
        matches!(self, Evaluation::Accepted)
    }
}

/// Decision gate applied before any trade is sized or persisted.
#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    config: TradingConfig,
}

impl SignalEvaluator {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, signal: &TradeSignal, portfolio: &Portfolio) -> Evaluation {
        if !portfolio.is_active {
            return Evaluation::Rejected(RejectReason::PortfolioInactive);
        }

        if signal.confidence < portfolio.min_confidence {
            return Evaluation::Rejected(RejectReason::LowConfidence {
                confidence: signal.confidence,
                required: portfolio.min_confidence,
            });
        }

        if signal.predicted_return.abs() < self.config.min_predicted_return_pct {
            return Evaluation::Rejected(RejectReason::ReturnBelowFloor {
                predicted: signal.predicted_return,
                floor: self.config.min_predicted_return_pct,
            });
        }

        Evaluation::Accepted
    }
}
