// src/trade.rs
use log::{info, warn};

use crate::error::{ApiError, StoreError};
use crate::ledger;
use crate::models::{Portfolio, TransactionKind};
use crate::portfolio::{apply_trade, TradeAction};
use crate::store::LedgerStore;

/// Writers racing on the same portfolio re-read and retry this many times
/// before giving up.
const MAX_CAS_ATTEMPTS: usize = 3;

/// Validate and execute a buy/sell: check funds or position, persist the
/// mutated holdings (versioned compare-and-swap), write the new balance,
/// then append the ledger entry.
///
/// Rejections (validation, insufficient balance/shares, unknown user) happen
/// before any write. Once the holdings write lands the remaining writes are
/// not rolled back on failure; the error is surfaced for reconciliation.
pub async fn execute_trade(
    store: &dyn LedgerStore,
    user_id: &str,
    symbol: &str,
    name: &str,
    action: TradeAction,
    shares: f64,
    price: f64,
) -> Result<String, ApiError> {
    if symbol.trim().is_empty() {
        return Err(ApiError::Validation("symbol must not be empty".to_string()));
    }
    if !shares.is_finite() || shares <= 0.0 {
        return Err(ApiError::Validation("shares must be positive".to_string()));
    }
    if !price.is_finite() || price <= 0.0 {
        return Err(ApiError::Validation("price must be positive".to_string()));
    }

    let amount = shares * price;

    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let user = store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User".to_string()))?;

        if action == TradeAction::Buy && user.balance < amount {
            return Err(ApiError::InsufficientBalance {
                required: amount,
                available: user.balance,
            });
        }

        let mut portfolio = store
            .get_portfolio(user_id)
            .await?
            .unwrap_or_else(|| Portfolio::empty(user_id));

        apply_trade(&mut portfolio.holdings, action, symbol, name, shares, price)?;

        match store.save_portfolio(&portfolio).await {
            Ok(()) => {
                let new_balance = match action {
                    TradeAction::Buy => user.balance - amount,
                    TradeAction::Sell => user.balance + amount,
                };
                store.set_balance(user_id, new_balance).await?;

                let kind = match action {
                    TradeAction::Buy => TransactionKind::Buy,
                    TradeAction::Sell => TransactionKind::Sell,
                };
                let tx =
                    ledger::build_transaction(user_id, kind, symbol, name, shares, price, amount);
                ledger::append(store, &tx).await?;

                let verb = match action {
                    TradeAction::Buy => "bought",
                    TradeAction::Sell => "sold",
                };
                info!(
                    "trade: user {} {} {} shares of {} at {}",
                    user_id, verb, shares, symbol, price
                );
                return Ok(format!(
                    "Successfully {} {} shares of {}",
                    verb, shares, symbol
                ));
            }
            Err(StoreError::VersionConflict) if attempt < MAX_CAS_ATTEMPTS => {
                // Another request updated this portfolio first; re-read and
                // re-check against the fresh state.
                warn!(
                    "trade: portfolio conflict for {} (attempt {}), retrying",
                    user_id, attempt
                );
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(StoreError::VersionConflict.into())
}
