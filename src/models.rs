// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account record. Created lazily on the first balance read (or via the
/// explicit initialize endpoint); identity fields come from the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub balance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: &str, username: &str, email: &str, balance: f64) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            balance,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Buy,
    Sell,
    Deposit,
    Withdrawal,
    Dividend,
}

impl TransactionKind {
    /// Signed multiplier applied to `amount` when mutating the balance.
    pub fn balance_sign(self) -> f64 {
        match self {
            TransactionKind::Buy | TransactionKind::Withdrawal => -1.0,
            TransactionKind::Sell | TransactionKind::Deposit | TransactionKind::Dividend => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Buy => "Buy",
            TransactionKind::Sell => "Sell",
            TransactionKind::Deposit => "Deposit",
            TransactionKind::Withdrawal => "Withdrawal",
            TransactionKind::Dividend => "Dividend",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buy" => Ok(TransactionKind::Buy),
            "Sell" => Ok(TransactionKind::Sell),
            "Deposit" => Ok(TransactionKind::Deposit),
            "Withdrawal" => Ok(TransactionKind::Withdrawal),
            "Dividend" => Ok(TransactionKind::Dividend),
            other => Err(format!("unknown transaction kind: {}", other)),
        }
    }
}

/// One entry of the append-only ledger. Never mutated after the write;
/// the log is the system of record for both balance and holdings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub kind: TransactionKind,
    pub symbol: String,
    pub name: String,
    /// Zero for Deposit / Withdrawal / Dividend.
    pub shares: f64,
    /// Zero for Deposit / Withdrawal / Dividend.
    pub price: f64,
    pub amount: f64,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub name: String,
    pub shares: f64,
    pub avg_price: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub user_id: String,
    pub holdings: Vec<Holding>,
    /// Optimistic-concurrency stamp, checked and incremented on every write.
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

impl Portfolio {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            holdings: Vec::new(),
            version: 0,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistItem {
    pub symbol: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watchlist {
    pub user_id: String,
    pub stocks: Vec<WatchlistItem>,
    pub last_updated: DateTime<Utc>,
}

impl Watchlist {
    /// The seed list every new account starts with.
    pub fn default_for(user_id: &str) -> Self {
        let stocks = [
            ("RELIANCE", "Reliance Industries Ltd."),
            ("TCS", "Tata Consultancy Services Ltd."),
            ("INFY", "Infosys Ltd."),
            ("HDFCBANK", "HDFC Bank Ltd."),
            ("ICICIBANK", "ICICI Bank Ltd."),
        ]
        .iter()
        .map(|(symbol, name)| WatchlistItem {
            symbol: symbol.to_string(),
            name: name.to_string(),
        })
        .collect();

        Self {
            user_id: user_id.to_string(),
            stocks,
            last_updated: Utc::now(),
        }
    }
}
