// src/store.rs
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use scylla::frame::response::result::{CqlValue, Row};
use scylla::query::Query;
use scylla::{Session, SessionBuilder};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{Holding, Portfolio, Transaction, User, Watchlist, WatchlistItem};

/// Document-style persistence behind the whole service. One implementation
/// talks to ScyllaDB; the in-memory one backs tests and local runs.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn set_balance(&self, user_id: &str, balance: f64) -> Result<(), StoreError>;

    async fn append_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;
    /// All transactions for a user, oldest first.
    async fn transactions_for_user(&self, user_id: &str) -> Result<Vec<Transaction>, StoreError>;

    async fn get_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError>;
    /// Compare-and-swap write: `portfolio.version` must match the stored
    /// version (0 for a document that does not exist yet), otherwise
    /// `StoreError::VersionConflict`. The stored version is bumped by one.
    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError>;

    async fn get_watchlist(&self, user_id: &str) -> Result<Option<Watchlist>, StoreError>;
    async fn save_watchlist(&self, watchlist: &Watchlist) -> Result<(), StoreError>;
}

// ScyllaDB backend

pub struct ScyllaStore {
    session: Session,
    deadline: Duration,
}

impl ScyllaStore {
    /// Connect and set up the keyspace/tables. Built once in `main` and
    /// shared via `Arc`; never a module-level singleton.
    pub async fn connect(node: &str, deadline: Duration) -> Result<Self, StoreError> {
        let session = SessionBuilder::new()
            .known_node(node)
            .build()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        session.query("CREATE KEYSPACE IF NOT EXISTS tradesim WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}", &[]).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        session.query("CREATE TABLE IF NOT EXISTS tradesim.users (id TEXT PRIMARY KEY, username TEXT, email TEXT, balance DOUBLE, created_at BIGINT, updated_at BIGINT)", &[]).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        session.query("CREATE TABLE IF NOT EXISTS tradesim.transactions (user_id TEXT, date BIGINT, id TEXT, kind TEXT, symbol TEXT, name TEXT, shares DOUBLE, price DOUBLE, amount DOUBLE, created_at BIGINT, PRIMARY KEY (user_id, date, id)) WITH CLUSTERING ORDER BY (date DESC, id DESC)", &[]).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        session.query("CREATE TABLE IF NOT EXISTS tradesim.portfolios (user_id TEXT PRIMARY KEY, holdings TEXT, version BIGINT, last_updated BIGINT)", &[]).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        session.query("CREATE TABLE IF NOT EXISTS tradesim.watchlists (user_id TEXT PRIMARY KEY, stocks TEXT, last_updated BIGINT)", &[]).await.map_err(|e| StoreError::Backend(e.to_string()))?;

        info!("Successfully connected to ScyllaDB.");
        Ok(Self { session, deadline })
    }

    /// Every store call runs under a deadline so a wedged node surfaces as
    /// `StoreError::Timeout` instead of an unbounded hang.
    async fn run<T, E, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(StoreError::Backend(e.to_string())),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

fn column_text(row: &Row, idx: usize) -> Option<String> {
    row.columns
        .get(idx)?
        .as_ref()
        .and_then(|v| v.as_text())
        .map(|s| s.to_string())
}

fn column_double(row: &Row, idx: usize) -> Option<f64> {
    row.columns.get(idx)?.as_ref().and_then(|v| v.as_double())
}

fn column_bigint(row: &Row, idx: usize) -> Option<i64> {
    row.columns.get(idx)?.as_ref().and_then(|v| v.as_bigint())
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// A conditional write reports its outcome in the `[applied]` column.
fn lwt_applied(rows: &Option<Vec<Row>>) -> bool {
    rows.as_ref()
        .and_then(|rows| rows.first())
        .and_then(|row| row.columns.first())
        .and_then(|col| col.as_ref())
        .map(|v| matches!(v, CqlValue::Boolean(true)))
        .unwrap_or(false)
}

#[async_trait]
impl LedgerStore for ScyllaStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let query = Query::new(
            "SELECT id, username, email, balance, created_at, updated_at FROM tradesim.users WHERE id = ?",
        );
        let result = self.run(self.session.query(query, (user_id,))).await?;

        let row = match result.rows.and_then(|rows| rows.into_iter().next()) {
            Some(row) => row,
            None => return Ok(None),
        };

        match (
            column_text(&row, 0),
            column_text(&row, 1),
            column_text(&row, 2),
            column_double(&row, 3),
            column_bigint(&row, 4),
            column_bigint(&row, 5),
        ) {
            (Some(id), Some(username), Some(email), Some(balance), Some(created), Some(updated)) => {
                Ok(Some(User {
                    id,
                    username,
                    email,
                    balance,
                    created_at: millis_to_datetime(created),
                    updated_at: millis_to_datetime(updated),
                }))
            }
            _ => Err(StoreError::Backend(format!(
                "malformed user row for {}",
                user_id
            ))),
        }
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let query = Query::new(
            "INSERT INTO tradesim.users (id, username, email, balance, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        );
        self.run(self.session.query(
            query,
            (
                user.id.as_str(),
                user.username.as_str(),
                user.email.as_str(),
                user.balance,
                user.created_at.timestamp_millis(),
                user.updated_at.timestamp_millis(),
            ),
        ))
        .await?;
        Ok(())
    }

    async fn set_balance(&self, user_id: &str, balance: f64) -> Result<(), StoreError> {
        let query =
            Query::new("UPDATE tradesim.users SET balance = ?, updated_at = ? WHERE id = ?");
        self.run(
            self.session
                .query(query, (balance, Utc::now().timestamp_millis(), user_id)),
        )
        .await?;
        Ok(())
    }

    async fn append_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let query = Query::new(
            "INSERT INTO tradesim.transactions (user_id, date, id, kind, symbol, name, shares, price, amount, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        );
        self.run(self.session.query(
            query,
            (
                tx.user_id.as_str(),
                tx.date.timestamp_millis(),
                tx.id.as_str(),
                tx.kind.as_str(),
                tx.symbol.as_str(),
                tx.name.as_str(),
                tx.shares,
                tx.price,
                tx.amount,
                tx.created_at.timestamp_millis(),
            ),
        ))
        .await?;
        Ok(())
    }

    async fn transactions_for_user(&self, user_id: &str) -> Result<Vec<Transaction>, StoreError> {
        let query = Query::new(
            "SELECT date, id, kind, symbol, name, shares, price, amount, created_at FROM tradesim.transactions WHERE user_id = ? ORDER BY date ASC, id ASC",
        );
        let result = self.run(self.session.query(query, (user_id,))).await?;

        let mut txs = Vec::new();
        for row in result.rows.unwrap_or_default() {
            let parsed = (
                column_bigint(&row, 0),
                column_text(&row, 1),
                column_text(&row, 2),
                column_text(&row, 3),
                column_text(&row, 4),
                column_double(&row, 5),
                column_double(&row, 6),
                column_double(&row, 7),
                column_bigint(&row, 8),
            );
            if let (
                Some(date),
                Some(id),
                Some(kind),
                Some(symbol),
                Some(name),
                Some(shares),
                Some(price),
                Some(amount),
                Some(created),
            ) = parsed
            {
                let kind = kind
                    .parse()
                    .map_err(|e: String| StoreError::Backend(e))?;
                txs.push(Transaction {
                    id,
                    user_id: user_id.to_string(),
                    kind,
                    symbol,
                    name,
                    shares,
                    price,
                    amount,
                    date: millis_to_datetime(date),
                    created_at: millis_to_datetime(created),
                });
            } else {
                return Err(StoreError::Backend(format!(
                    "malformed transaction row for {}",
                    user_id
                )));
            }
        }
        Ok(txs)
    }

    async fn get_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError> {
        let query = Query::new(
            "SELECT holdings, version, last_updated FROM tradesim.portfolios WHERE user_id = ?",
        );
        let result = self.run(self.session.query(query, (user_id,))).await?;

        let row = match result.rows.and_then(|rows| rows.into_iter().next()) {
            Some(row) => row,
            None => return Ok(None),
        };

        match (
            column_text(&row, 0),
            column_bigint(&row, 1),
            column_bigint(&row, 2),
        ) {
            (Some(holdings_json), Some(version), Some(updated)) => {
                let holdings: Vec<Holding> = serde_json::from_str(&holdings_json)?;
                Ok(Some(Portfolio {
                    user_id: user_id.to_string(),
                    holdings,
                    version,
                    last_updated: millis_to_datetime(updated),
                }))
            }
            _ => Err(StoreError::Backend(format!(
                "malformed portfolio row for {}",
                user_id
            ))),
        }
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        let holdings_json = serde_json::to_string(&portfolio.holdings)?;
        let now = Utc::now().timestamp_millis();

        let result = if portfolio.version == 0 {
            let query = Query::new(
                "INSERT INTO tradesim.portfolios (user_id, holdings, version, last_updated) VALUES (?, ?, 1, ?) IF NOT EXISTS",
            );
            self.run(self.session.query(
                query,
                (portfolio.user_id.as_str(), holdings_json.as_str(), now),
            ))
            .await?
        } else {
            let query = Query::new(
                "UPDATE tradesim.portfolios SET holdings = ?, version = ?, last_updated = ? WHERE user_id = ? IF version = ?",
            );
            self.run(self.session.query(
                query,
                (
                    holdings_json.as_str(),
                    portfolio.version + 1,
                    now,
                    portfolio.user_id.as_str(),
                    portfolio.version,
                ),
            ))
            .await?
        };

        if lwt_applied(&result.rows) {
            Ok(())
        } else {
            Err(StoreError::VersionConflict)
        }
    }

    async fn get_watchlist(&self, user_id: &str) -> Result<Option<Watchlist>, StoreError> {
        let query =
            Query::new("SELECT stocks, last_updated FROM tradesim.watchlists WHERE user_id = ?");
        let result = self.run(self.session.query(query, (user_id,))).await?;

        let row = match result.rows.and_then(|rows| rows.into_iter().next()) {
            Some(row) => row,
            None => return Ok(None),
        };

        match (column_text(&row, 0), column_bigint(&row, 1)) {
            (Some(stocks_json), Some(updated)) => {
                let stocks: Vec<WatchlistItem> = serde_json::from_str(&stocks_json)?;
                Ok(Some(Watchlist {
                    user_id: user_id.to_string(),
                    stocks,
                    last_updated: millis_to_datetime(updated),
                }))
            }
            _ => Err(StoreError::Backend(format!(
                "malformed watchlist row for {}",
                user_id
            ))),
        }
    }

    async fn save_watchlist(&self, watchlist: &Watchlist) -> Result<(), StoreError> {
        let stocks_json = serde_json::to_string(&watchlist.stocks)?;
        let query = Query::new(
            "INSERT INTO tradesim.watchlists (user_id, stocks, last_updated) VALUES (?, ?, ?)",
        );
        self.run(self.session.query(
            query,
            (
                watchlist.user_id.as_str(),
                stocks_json.as_str(),
                watchlist.last_updated.timestamp_millis(),
            ),
        ))
        .await?;
        Ok(())
    }
}

// In-memory backend

#[derive(Default)]
struct MemoryInner {
    users: HashMap<String, User>,
    transactions: HashMap<String, Vec<Transaction>>,
    portfolios: HashMap<String, Portfolio>,
    watchlists: HashMap<String, Watchlist>,
}

/// HashMap-backed store with the same CAS semantics as the Scylla backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .users
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn set_balance(&self, user_id: &str, balance: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.users.get_mut(user_id) {
            Some(user) => {
                user.balance = balance;
                user.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "no user {} to update",
                user_id
            ))),
        }
    }

    async fn append_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .transactions
            .entry(tx.user_id.clone())
            .or_default()
            .push(tx.clone());
        Ok(())
    }

    async fn transactions_for_user(&self, user_id: &str) -> Result<Vec<Transaction>, StoreError> {
        let mut txs = self
            .inner
            .read()
            .await
            .transactions
            .get(user_id)
            .cloned()
            .unwrap_or_default();
        txs.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(txs)
    }

    async fn get_portfolio(&self, user_id: &str) -> Result<Option<Portfolio>, StoreError> {
        Ok(self.inner.read().await.portfolios.get(user_id).cloned())
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stored_version = inner
            .portfolios
            .get(&portfolio.user_id)
            .map(|p| p.version)
            .unwrap_or(0);
        if stored_version != portfolio.version {
            return Err(StoreError::VersionConflict);
        }
        let mut next = portfolio.clone();
        next.version = portfolio.version + 1;
        next.last_updated = Utc::now();
        inner.portfolios.insert(next.user_id.clone(), next);
        Ok(())
    }

    async fn get_watchlist(&self, user_id: &str) -> Result<Option<Watchlist>, StoreError> {
        Ok(self.inner.read().await.watchlists.get(user_id).cloned())
    }

    async fn save_watchlist(&self, watchlist: &Watchlist) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .watchlists
            .insert(watchlist.user_id.clone(), watchlist.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionKind;

    fn tx(user: &str, id: &str, kind: TransactionKind, amount: f64) -> Transaction {
        Transaction {
            id: id.to_string(),
            user_id: user.to_string(),
            kind,
            symbol: "SYM".into(),
            name: "SYM".into(),
            shares: 0.0,
            price: 0.0,
            amount,
            date: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_a_user() {
        let store = MemoryStore::new();
        let user = User::new("u1", "alice", "alice@example.com", 500.0);
        store.upsert_user(&user).await.unwrap();
        let loaded = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.balance, 500.0);

        store.set_balance("u1", 750.0).await.unwrap();
        assert_eq!(store.get_user("u1").await.unwrap().unwrap().balance, 750.0);
    }

    #[tokio::test]
    async fn set_balance_on_missing_user_fails() {
        let store = MemoryStore::new();
        assert!(store.set_balance("ghost", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn transactions_come_back_oldest_first() {
        let store = MemoryStore::new();
        let mut older = tx("u1", "100", TransactionKind::Deposit, 10.0);
        older.date = Utc::now() - chrono::Duration::days(1);
        let newer = tx("u1", "200", TransactionKind::Deposit, 20.0);

        // Append out of order; reads must still be chronological.
        store.append_transaction(&newer).await.unwrap();
        store.append_transaction(&older).await.unwrap();

        let txs = store.transactions_for_user("u1").await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].id, "100");
        assert_eq!(txs[1].id, "200");
    }

    #[tokio::test]
    async fn stale_portfolio_write_is_a_version_conflict() {
        let store = MemoryStore::new();
        let base = Portfolio::empty("u1");
        store.save_portfolio(&base).await.unwrap();

        // A writer holding the pre-insert snapshot (version 0) must lose.
        let stale = Portfolio::empty("u1");
        assert!(matches!(
            store.save_portfolio(&stale).await,
            Err(StoreError::VersionConflict)
        ));

        // Re-reading picks up version 1 and the write goes through.
        let current = store.get_portfolio("u1").await.unwrap().unwrap();
        assert_eq!(current.version, 1);
        store.save_portfolio(&current).await.unwrap();
        let after = store.get_portfolio("u1").await.unwrap().unwrap();
        assert_eq!(after.version, 2);
    }
}
