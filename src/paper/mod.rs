//! Paper Trading Engine
//!
//! Turns filing-derived model predictions into simulated trades with capital
//! discipline, and manages the position lifecycle: evaluate → execute →
//! hold N days → close → recompute portfolio statistics.

mod evaluator;
mod trader;

pub use evaluator::{Evaluation, SignalEvaluator};
pub use trader::PaperTrader;
