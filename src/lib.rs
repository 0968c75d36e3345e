//! Filing Paper Trading Core
//!
//! Library core for an SEC-filing trading simulator. Two cooperating
//! components:
//!
//! ```text
//! Request → Quota Guard → (prediction layer, external) → TradeSignal
//!                                                            ↓
//!                                   Paper Trading Engine (evaluate/execute)
//!                                        ↑                   ↓
//!                      scheduled sweep (close expired)   Storage (SQLite)
//! ```
//!
//! The quota guard throttles anonymous callers by fingerprint and
//! authenticated users by a separate AI-usage pool. The paper trading
//! engine turns model signals into simulated positions, closes them after
//! the hold period, and maintains portfolio statistics. Everything else —
//! filing ingestion, prediction, the web layer — lives outside this crate
//! and talks to it through `TradeSignal`, `QuotaDecision`, and
//! `ExecutionOutcome`.

pub mod config;
pub mod error;
pub mod paper;
pub mod price;
pub mod quota;
pub mod storage;
pub mod types;
