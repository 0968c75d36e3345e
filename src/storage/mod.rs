//! SQLite persistence for portfolios, open positions, and trade history.
//!
//! Money columns are stored as TEXT and round-tripped through
//! `rust_decimal`; sqlite has no exact decimal type. The two lifecycle
//! mutations (open a position, close a position) each run in a single
//! transaction so cash and position rows can never disagree.

use crate::error::{EngineError, Result};
use crate::types::{Direction, Portfolio, PortfolioMetrics, Position, Trade};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// Result of attempting to insert an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The `(portfolio_id, filing_id)` unique key already has an open
    /// position; nothing was written.
    Duplicate,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `path`. `":memory:"`
    /// yields an in-memory database for tests.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            // create_if_missing only creates the file, not its directory.
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| EngineError::Internal(format!("creating {parent:?}: {e}")))?;
                }
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        // Single connection: in-memory databases are per-connection, and the
        // engine is a single writer anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        info!(path, "database ready");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolios (
                id                TEXT PRIMARY KEY,
                name              TEXT NOT NULL,
                starting_capital  TEXT NOT NULL,
                current_cash      TEXT NOT NULL,
                is_active         INTEGER NOT NULL DEFAULT 1,
                max_position_size TEXT NOT NULL,
                min_confidence    TEXT NOT NULL,
                total_return_pct  TEXT NOT NULL DEFAULT '0',
                win_rate          TEXT NOT NULL DEFAULT '0',
                winning_trades    INTEGER NOT NULL DEFAULT 0,
                losing_trades     INTEGER NOT NULL DEFAULT 0,
                total_trades      INTEGER NOT NULL DEFAULT 0,
                avg_win           TEXT NOT NULL DEFAULT '0',
                avg_loss          TEXT NOT NULL DEFAULT '0',
                profit_factor     TEXT NOT NULL DEFAULT '0',
                updated_at        TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id               TEXT PRIMARY KEY,
                portfolio_id     TEXT NOT NULL REFERENCES portfolios(id),
                ticker           TEXT NOT NULL,
                filing_id        TEXT NOT NULL,
                direction        TEXT NOT NULL,
                shares           INTEGER NOT NULL,
                entry_price      TEXT NOT NULL,
                entry_date       TEXT NOT NULL,
                predicted_return TEXT NOT NULL,
                confidence       TEXT NOT NULL,
                UNIQUE (portfolio_id, filing_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id                TEXT PRIMARY KEY,
                portfolio_id      TEXT NOT NULL REFERENCES portfolios(id),
                ticker            TEXT NOT NULL,
                filing_id         TEXT NOT NULL,
                direction         TEXT NOT NULL,
                shares            INTEGER NOT NULL,
                entry_price       TEXT NOT NULL,
                entry_date        TEXT NOT NULL,
                exit_price        TEXT NOT NULL,
                exit_date         TEXT NOT NULL,
                predicted_return  TEXT NOT NULL,
                confidence        TEXT NOT NULL,
                realized_pnl      TEXT NOT NULL,
                realized_pnl_pct  TEXT NOT NULL,
                actual_return_pct TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_portfolio(
        &self,
        name: &str,
        starting_capital: Decimal,
        max_position_size: Decimal,
        min_confidence: Decimal,
    ) -> Result<Portfolio> {
        let portfolio = Portfolio {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            starting_capital,
            current_cash: starting_capital,
            is_active: true,
            max_position_size,
            min_confidence,
            metrics: PortfolioMetrics::default(),
            updated_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO portfolios
                (id, name, starting_capital, current_cash, is_active,
                 max_position_size, min_confidence, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&portfolio.id)
        .bind(&portfolio.name)
        .bind(portfolio.starting_capital.to_string())
        .bind(portfolio.current_cash.to_string())
        .bind(portfolio.is_active)
        .bind(portfolio.max_position_size.to_string())
        .bind(portfolio.min_confidence.to_string())
        .bind(portfolio.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(portfolio)
    }

    pub async fn get_portfolio(&self, id: &str) -> Result<Portfolio> {
        let row = sqlx::query("SELECT * FROM portfolios WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::PortfolioNotFound(id.to_string()))?;
        portfolio_from_row(&row)
    }

    pub async fn active_portfolios(&self) -> Result<Vec<Portfolio>> {
        let rows = sqlx::query("SELECT * FROM portfolios WHERE is_active = 1 ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(portfolio_from_row).collect()
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE portfolios SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::PortfolioNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn open_positions(&self, portfolio_id: &str) -> Result<Vec<Position>> {
        let rows =
            sqlx::query("SELECT * FROM positions WHERE portfolio_id = ? ORDER BY entry_date")
                .bind(portfolio_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(position_from_row).collect()
    }

    /// Insert a position and debit the portfolio's cash in one transaction.
    ///
    /// `total_debit` is entry cost plus commission. A duplicate
    /// `(portfolio_id, filing_id)` reports `Duplicate` and writes nothing;
    /// the unique key is what makes concurrent submits safe, not the
    /// caller's earlier check.
    pub async fn open_position_tx(
        &self,
        position: &Position,
        total_debit: Decimal,
    ) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO positions
                (id, portfolio_id, ticker, filing_id, direction, shares,
                 entry_price, entry_date, predicted_return, confidence)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.id)
        .bind(&position.portfolio_id)
        .bind(&position.ticker)
        .bind(&position.filing_id)
        .bind(position.direction.as_str())
        .bind(position.shares)
        .bind(position.entry_price.to_string())
        .bind(position.entry_date)
        .bind(position.predicted_return.to_string())
        .bind(position.confidence.to_string())
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(InsertOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        let cash = fetch_cash(&mut tx, &position.portfolio_id).await?;
        let new_cash = cash - total_debit;
        update_cash(&mut tx, &position.portfolio_id, new_cash).await?;

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    /// Convert a position to a trade and credit cash, atomically.
    ///
    /// The position row is deleted and the trade inserted in the same
    /// transaction, so a position is never visible as both open and closed.
    /// Deleting a row that is already gone means the close ran twice, which
    /// the concurrency contract rules out; it is reported as an invariant
    /// violation rather than ignored.
    pub async fn close_position_tx(
        &self,
        position_id: &str,
        trade: &Trade,
        cash_credit: Decimal,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM positions WHERE id = ?")
            .bind(position_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(EngineError::Invariant(format!(
                "position {position_id} was already closed"
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO trades
                (id, portfolio_id, ticker, filing_id, direction, shares,
                 entry_price, entry_date, exit_price, exit_date,
                 predicted_return, confidence, realized_pnl, realized_pnl_pct,
                 actual_return_pct)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.portfolio_id)
        .bind(&trade.ticker)
        .bind(&trade.filing_id)
        .bind(trade.direction.as_str())
        .bind(trade.shares)
        .bind(trade.entry_price.to_string())
        .bind(trade.entry_date)
        .bind(trade.exit_price.to_string())
        .bind(trade.exit_date)
        .bind(trade.predicted_return.to_string())
        .bind(trade.confidence.to_string())
        .bind(trade.realized_pnl.to_string())
        .bind(trade.realized_pnl_pct.to_string())
        .bind(trade.actual_return_pct.to_string())
        .execute(&mut *tx)
        .await?;

        let cash = fetch_cash(&mut tx, &trade.portfolio_id).await?;
        update_cash(&mut tx, &trade.portfolio_id, cash + cash_credit).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn trades_for_portfolio(&self, portfolio_id: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE portfolio_id = ? ORDER BY exit_date")
            .bind(portfolio_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(trade_from_row).collect()
    }

    pub async fn update_metrics(
        &self,
        portfolio_id: &str,
        metrics: &PortfolioMetrics,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE portfolios
            SET total_return_pct = ?, win_rate = ?, winning_trades = ?,
                losing_trades = ?, total_trades = ?, avg_win = ?,
                avg_loss = ?, profit_factor = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(metrics.total_return_pct.to_string())
        .bind(metrics.win_rate.to_string())
        .bind(metrics.winning_trades)
        .bind(metrics.losing_trades)
        .bind(metrics.total_trades)
        .bind(metrics.avg_win.to_string())
        .bind(metrics.avg_loss.to_string())
        .bind(metrics.profit_factor.to_string())
        .bind(Utc::now())
        .bind(portfolio_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::PortfolioNotFound(portfolio_id.to_string()));
        }
        Ok(())
    }
}

async fn fetch_cash(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    portfolio_id: &str,
) -> Result<Decimal> {
    let row = sqlx::query("SELECT current_cash FROM portfolios WHERE id = ?")
        .bind(portfolio_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| EngineError::PortfolioNotFound(portfolio_id.to_string()))?;
    decimal_col(&row, "current_cash")
}

async fn update_cash(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    portfolio_id: &str,
    cash: Decimal,
) -> Result<()> {
    sqlx::query("UPDATE portfolios SET current_cash = ?, updated_at = ? WHERE id = ?")
        .bind(cash.to_string())
        .bind(Utc::now())
        .bind(portfolio_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal> {
    let raw: String = row.try_get(col)?;
    Decimal::from_str(&raw)
        .map_err(|e| EngineError::Internal(format!("bad decimal in column {col}: {e}")))
}

fn direction_col(row: &SqliteRow, col: &str) -> Result<Direction> {
    let raw: String = row.try_get(col)?;
    Direction::parse(&raw)
        .ok_or_else(|| EngineError::Internal(format!("bad direction in column {col}: {raw}")))
}

fn portfolio_from_row(row: &SqliteRow) -> Result<Portfolio> {
    Ok(Portfolio {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        starting_capital: decimal_col(row, "starting_capital")?,
        current_cash: decimal_col(row, "current_cash")?,
        is_active: row.try_get("is_active")?,
        max_position_size: decimal_col(row, "max_position_size")?,
        min_confidence: decimal_col(row, "min_confidence")?,
        metrics: PortfolioMetrics {
            total_return_pct: decimal_col(row, "total_return_pct")?,
            win_rate: decimal_col(row, "win_rate")?,
            winning_trades: row.try_get("winning_trades")?,
            losing_trades: row.try_get("losing_trades")?,
            total_trades: row.try_get("total_trades")?,
            avg_win: decimal_col(row, "avg_win")?,
            avg_loss: decimal_col(row, "avg_loss")?,
            profit_factor: decimal_col(row, "profit_factor")?,
        },
        updated_at: row.try_get("updated_at")?,
    })
}

fn position_from_row(row: &SqliteRow) -> Result<Position> {
    Ok(Position {
        id: row.try_get("id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        ticker: row.try_get("ticker")?,
        filing_id: row.try_get("filing_id")?,
        direction: direction_col(row, "direction")?,
        shares: row.try_get("shares")?,
        entry_price: decimal_col(row, "entry_price")?,
        entry_date: row.try_get("entry_date")?,
        predicted_return: decimal_col(row, "predicted_return")?,
        confidence: decimal_col(row, "confidence")?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    Ok(Trade {
        id: row.try_get("id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        ticker: row.try_get("ticker")?,
        filing_id: row.try_get("filing_id")?,
        direction: direction_col(row, "direction")?,
        shares: row.try_get("shares")?,
        entry_price: decimal_col(row, "entry_price")?,
        entry_date: row.try_get("entry_date")?,
        exit_price: decimal_col(row, "exit_price")?,
        exit_date: row.try_get("exit_date")?,
        predicted_return: decimal_col(row, "predicted_return")?,
        confidence: decimal_col(row, "confidence")?,
        realized_pnl: decimal_col(row, "realized_pnl")?,
        realized_pnl_pct: decimal_col(row, "realized_pnl_pct")?,
        actual_return_pct: decimal_col(row, "actual_return_pct")?,
    })
}
