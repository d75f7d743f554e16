// src/portfolio.rs
use std::collections::HashMap;

use log::{debug, info};

use crate::error::ApiError;
use crate::models::{Holding, Portfolio, Transaction, TransactionKind};
use crate::store::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "buy" => Ok(TradeAction::Buy),
            "sell" => Ok(TradeAction::Sell),
            other => Err(ApiError::Validation(format!("Invalid action: {}", other))),
        }
    }
}

/// Replay the full transaction log into current holdings.
///
/// Buys accumulate shares and cost; a sell keeps the average price constant
/// and recomputes cost from the remaining shares (simplified average-cost
/// accounting — realized gains never flow back into cost basis). Closing a
/// position discards its average price entirely. Non-trade kinds are ignored.
pub fn rebuild_holdings(transactions: &[Transaction]) -> Vec<Holding> {
    let mut map: HashMap<String, Holding> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for tx in transactions {
        match tx.kind {
            TransactionKind::Buy => {
                let holding = map.entry(tx.symbol.clone()).or_insert_with(|| {
                    order.push(tx.symbol.clone());
                    Holding {
                        symbol: tx.symbol.clone(),
                        name: tx.name.clone(),
                        shares: 0.0,
                        avg_price: 0.0,
                        total_cost: 0.0,
                    }
                });
                holding.shares += tx.shares;
                holding.total_cost += tx.amount;
                holding.avg_price = if holding.shares > 0.0 {
                    holding.total_cost / holding.shares
                } else {
                    0.0
                };
            }
            TransactionKind::Sell => {
                let holding = map.entry(tx.symbol.clone()).or_insert_with(|| {
                    order.push(tx.symbol.clone());
                    Holding {
                        symbol: tx.symbol.clone(),
                        name: tx.name.clone(),
                        shares: 0.0,
                        avg_price: 0.0,
                        total_cost: 0.0,
                    }
                });
                holding.shares -= tx.shares;
                if holding.shares <= 0.0 {
                    holding.shares = 0.0;
                    holding.total_cost = 0.0;
                    holding.avg_price = 0.0;
                } else {
                    holding.total_cost = holding.avg_price * holding.shares;
                }
            }
            TransactionKind::Deposit | TransactionKind::Withdrawal | TransactionKind::Dividend => {}
        }
    }

    order
        .into_iter()
        .filter_map(|symbol| map.remove(&symbol))
        .filter(|h| h.shares > 0.0)
        .collect()
}

/// Mutate a holdings set for one buy/sell. Fails with `InsufficientShares`
/// before any change when selling more than is held.
pub fn apply_trade(
    holdings: &mut Vec<Holding>,
    action: TradeAction,
    symbol: &str,
    name: &str,
    shares: f64,
    price: f64,
) -> Result<(), ApiError> {
    let amount = shares * price;
    let existing = holdings.iter().position(|h| h.symbol == symbol);

    match action {
        TradeAction::Buy => match existing {
            Some(idx) => {
                let holding = &mut holdings[idx];
                let new_shares = holding.shares + shares;
                let new_total_cost = holding.total_cost + amount;
                holding.shares = new_shares;
                holding.total_cost = new_total_cost;
                holding.avg_price = new_total_cost / new_shares;
            }
            None => holdings.push(Holding {
                symbol: symbol.to_string(),
                name: name.to_string(),
                shares,
                avg_price: price,
                total_cost: amount,
            }),
        },
        TradeAction::Sell => {
            let idx = match existing {
                Some(idx) if holdings[idx].shares >= shares => idx,
                Some(idx) => {
                    return Err(ApiError::InsufficientShares {
                        symbol: symbol.to_string(),
                        held: holdings[idx].shares,
                        requested: shares,
                    })
                }
                None => {
                    return Err(ApiError::InsufficientShares {
                        symbol: symbol.to_string(),
                        held: 0.0,
                        requested: shares,
                    })
                }
            };

            let remaining = holdings[idx].shares - shares;
            if remaining > 0.0 {
                // Average price survives a partial sell unchanged.
                holdings[idx].shares = remaining;
                holdings[idx].total_cost = holdings[idx].avg_price * remaining;
            } else {
                holdings.remove(idx);
            }
        }
    }
    Ok(())
}

/// Current holdings for a user. Serves the stored snapshot when one exists;
/// otherwise replays the ledger and writes the rebuilt snapshot back.
pub async fn get_holdings(
    store: &dyn LedgerStore,
    user_id: &str,
) -> Result<Vec<Holding>, ApiError> {
    let snapshot = store.get_portfolio(user_id).await?;

    if let Some(portfolio) = &snapshot {
        if !portfolio.holdings.is_empty() {
            return Ok(portfolio.holdings.clone());
        }
    }

    debug!("no portfolio snapshot for {}; replaying ledger", user_id);
    let transactions = store.transactions_for_user(user_id).await?;
    let holdings = rebuild_holdings(&transactions);

    if !holdings.is_empty() {
        let mut portfolio = match snapshot {
            Some(p) => p,
            None => Portfolio::empty(user_id),
        };
        portfolio.holdings = holdings.clone();
        match store.save_portfolio(&portfolio).await {
            Ok(()) => info!("rebuilt portfolio snapshot for {}", user_id),
            // A concurrent writer beat us to it; the rebuilt view is still valid.
            Err(crate::error::StoreError::VersionConflict) => {
                debug!("snapshot for {} written concurrently; serving rebuilt view", user_id)
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(holdings)
}
