// src/context.rs
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{TransactionKind, User, Watchlist, WatchlistItem};
use crate::store::LedgerStore;

/// Read-only snapshot of a user's financial state, formatted for the
/// advisory collaborator. Currency fields are display strings; this view is
/// terminal and never parsed back into numbers.
#[derive(Debug, Serialize)]
pub struct ContextView {
    pub user: UserView,
    pub portfolio: Vec<HoldingView>,
    pub recent_transactions: Vec<TransactionView>,
    pub watchlist: Vec<WatchlistItem>,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub username: String,
    pub balance: String,
}

#[derive(Debug, Serialize)]
pub struct HoldingView {
    pub symbol: String,
    pub name: String,
    pub shares: f64,
    pub avg_price: String,
    pub total_cost: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub kind: String,
    pub symbol: String,
    pub shares: f64,
    pub price: Option<String>,
    pub amount: String,
    pub date: String,
}

/// `₹`-prefixed amount with Indian digit grouping (last three digits, then
/// pairs): 1234567.5 renders as ₹12,34,567.50. Whole amounts drop the
/// decimals.
pub fn format_inr(value: f64) -> String {
    let negative = value < 0.0;
    let rounded = (value.abs() * 100.0).round() / 100.0;
    let int_part = rounded.trunc() as i64;
    let paise = (rounded.fract() * 100.0).round() as i64;

    let digits = int_part.to_string();
    let grouped = if digits.len() <= 3 {
        digits
    } else {
        let (head, tail) = digits.split_at(digits.len() - 3);
        let mut groups: Vec<String> = Vec::new();
        let head_bytes = head.as_bytes();
        let mut idx = head_bytes.len();
        while idx > 0 {
            let start = idx.saturating_sub(2);
            groups.push(head[start..idx].to_string());
            idx = start;
        }
        groups.reverse();
        format!("{},{}", groups.join(","), tail)
    };

    let sign = if negative { "-" } else { "" };
    if paise == 0 {
        format!("{}₹{}", sign, grouped)
    } else {
        format!("{}₹{}.{:02}", sign, grouped, paise)
    }
}

/// Gather balance, holdings, transaction history and watchlist into one
/// snapshot. Side-effect-free except for lazily creating a zero-balance user
/// record when none exists at all.
///
/// Balance precedence: a stored user record is authoritative; the fold over
/// Deposit(+)/Buy(−)/Sell(+) is only the fallback estimate for accounts that
/// have history but no record yet.
pub async fn assemble_context(
    store: &dyn LedgerStore,
    auth_user: &AuthUser,
) -> Result<ContextView, ApiError> {
    let stored_user = store.get_user(&auth_user.id).await?;
    let transactions = store.transactions_for_user(&auth_user.id).await?;

    let derived_balance = transactions.iter().fold(0.0, |acc, tx| match tx.kind {
        TransactionKind::Deposit | TransactionKind::Sell => acc + tx.amount,
        TransactionKind::Buy => acc - tx.amount,
        // Not part of the derived estimate.
        TransactionKind::Withdrawal | TransactionKind::Dividend => acc,
    });

    let (username, balance) = match &stored_user {
        Some(user) => (user.username.clone(), user.balance),
        None => {
            let user = User::new(&auth_user.id, &auth_user.username, &auth_user.email, 0.0);
            store.upsert_user(&user).await?;
            (user.username, derived_balance)
        }
    };

    let holdings = crate::portfolio::get_holdings(store, &auth_user.id).await?;
    let watchlist = store
        .get_watchlist(&auth_user.id)
        .await?
        .unwrap_or_else(|| Watchlist {
            user_id: auth_user.id.clone(),
            stocks: Vec::new(),
            last_updated: chrono::Utc::now(),
        });

    Ok(ContextView {
        user: UserView {
            username,
            balance: format_inr(balance),
        },
        portfolio: holdings
            .into_iter()
            .map(|h| HoldingView {
                symbol: h.symbol,
                name: h.name,
                shares: h.shares,
                avg_price: format_inr(h.avg_price),
                total_cost: format_inr(h.total_cost),
            })
            .collect(),
        recent_transactions: transactions
            .iter()
            .map(|tx| TransactionView {
                kind: tx.kind.as_str().to_string(),
                symbol: tx.symbol.clone(),
                shares: tx.shares,
                price: (tx.price != 0.0).then(|| format_inr(tx.price)),
                amount: format_inr(tx.amount),
                date: tx.date.format("%d/%m/%Y").to_string(),
            })
            .collect(),
        watchlist: watchlist.stocks,
    })
}

/// Flatten the snapshot into the prompt block fed to the advisory engine.
pub fn render_prompt_context(view: &ContextView) -> String {
    let holdings = if view.portfolio.is_empty() {
        "No stock holdings".to_string()
    } else {
        view.portfolio
            .iter()
            .map(|h| {
                format!(
                    "- {}: {} shares at average price {}, total cost {}",
                    h.symbol, h.shares, h.avg_price, h.total_cost
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let transactions = if view.recent_transactions.is_empty() {
        "No recent transactions".to_string()
    } else {
        view.recent_transactions
            .iter()
            .rev()
            .take(3)
            .map(|t| {
                format!(
                    "- {} {} shares of {} at {} on {}",
                    t.kind,
                    t.shares,
                    t.symbol,
                    t.price.as_deref().unwrap_or("-"),
                    t.date
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let watchlist = if view.watchlist.is_empty() {
        "No stocks in watchlist".to_string()
    } else {
        view.watchlist
            .iter()
            .map(|s| format!("- {}: {}", s.symbol, s.name))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "User Information:\n- Username: {}\n- Account Balance: {}\n\nPortfolio Holdings:\n{}\n\nRecent Transactions:\n{}\n\nWatchlist:\n{}",
        view.user.username, view.user.balance, holdings, transactions, watchlist
    )
}
