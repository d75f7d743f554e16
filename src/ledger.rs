// src/ledger.rs
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use log::info;

use crate::error::ApiError;
use crate::models::{Transaction, TransactionKind};
use crate::store::LedgerStore;

static LAST_TX_ID: AtomicI64 = AtomicI64::new(0);

/// Millisecond-clock transaction id, forced strictly monotonic so two writes
/// in the same millisecond still get distinct ids.
pub fn next_transaction_id() -> String {
    let now = Utc::now().timestamp_millis();
    let mut last = LAST_TX_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_TX_ID.compare_exchange_weak(
            last,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate.to_string(),
            Err(current) => last = current,
        }
    }
}

fn validate_amounts(kind: TransactionKind, shares: f64, price: f64, amount: f64) -> Result<(), ApiError> {
    for (field, value) in [("shares", shares), ("price", price), ("amount", amount)] {
        if !value.is_finite() {
            return Err(ApiError::Validation(format!("{} must be a finite number", field)));
        }
        if value < 0.0 {
            return Err(ApiError::Validation(format!("{} must not be negative", field)));
        }
    }
    match kind {
        TransactionKind::Buy | TransactionKind::Sell => {
            if shares <= 0.0 || price <= 0.0 {
                return Err(ApiError::Validation(
                    "shares and price must be positive for a trade".to_string(),
                ));
            }
        }
        // Non-trade kinds carry the whole value in `amount`.
        TransactionKind::Deposit | TransactionKind::Withdrawal | TransactionKind::Dividend => {}
    }
    Ok(())
}

/// Builds an immutable ledger entry for the given fields.
pub fn build_transaction(
    user_id: &str,
    kind: TransactionKind,
    symbol: &str,
    name: &str,
    shares: f64,
    price: f64,
    amount: f64,
) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: next_transaction_id(),
        user_id: user_id.to_string(),
        kind,
        symbol: symbol.to_string(),
        name: name.to_string(),
        shares,
        price,
        amount,
        date: now,
        created_at: now,
    }
}

/// Append a prebuilt record without touching the balance. The trade executor
/// uses this after it has already persisted the balance itself.
pub async fn append(store: &dyn LedgerStore, tx: &Transaction) -> Result<(), ApiError> {
    store.append_transaction(tx).await?;
    info!(
        "ledger: appended {} {} {} for user {}",
        tx.kind.as_str(),
        tx.symbol,
        tx.amount,
        tx.user_id
    );
    Ok(())
}

/// Record a transaction and apply its balance delta: Buy and Withdrawal
/// decrease the balance by `amount`, the other kinds increase it.
///
/// The record is durably written before the balance mutation. If the balance
/// write fails the record stays in place; the caller sees the error and the
/// ledger remains the source of truth for reconciliation.
pub async fn record(
    store: &dyn LedgerStore,
    user_id: &str,
    kind: TransactionKind,
    symbol: &str,
    name: &str,
    shares: f64,
    price: f64,
    amount: f64,
) -> Result<Transaction, ApiError> {
    validate_amounts(kind, shares, price, amount)?;

    let tx = build_transaction(user_id, kind, symbol, name, shares, price, amount);
    store.append_transaction(&tx).await?;

    let delta = kind.balance_sign() * amount;
    if delta != 0.0 {
        let user = store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User".to_string()))?;
        store.set_balance(user_id, user.balance + delta).await?;
    }

    info!(
        "ledger: recorded {} {} amount {} for user {}",
        kind.as_str(),
        symbol,
        amount,
        user_id
    );
    Ok(tx)
}
