// src/api.rs
use std::convert::Infallible;
use std::sync::Arc;

use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use warp::{Filter, Rejection, Reply};

use crate::advisory::{self, AdvisoryEngine, FallbackAdvisory};
use crate::auth::{self, AuthUser, IdentityResolver};
use crate::context::{assemble_context, render_prompt_context};
use crate::error::{handle_rejection, ApiError, StoreError};
use crate::ledger;
use crate::models::{Portfolio, TransactionKind, User, Watchlist, WatchlistItem};
use crate::portfolio::{self, TradeAction};
use crate::store::LedgerStore;
use crate::trade;

/// Everything a handler needs, built once in `main` and cloned per route.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn LedgerStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub advisory: Arc<dyn AdvisoryEngine>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TradeRequest {
    symbol: String,
    action: String,
    shares: f64,
    price: f64,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PortfolioUpdateRequest {
    action: String,
    symbol: String,
    name: String,
    shares: f64,
    price: f64,
    amount: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NewTransactionRequest {
    #[serde(rename = "type")]
    kind: TransactionKind,
    symbol: String,
    name: String,
    shares: f64,
    price: f64,
    amount: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BalanceRequest {
    balance: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WatchlistAddRequest {
    symbol: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WatchlistRemoveRequest {
    symbol: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ChatRequest {
    message: String,
}

pub fn routes(ctx: AppContext) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let trade = warp::path!("user" / "trade")
        .and(warp::post())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and(warp::body::json())
        .and_then(trade_handler);

    let portfolio_get = warp::path!("user" / "portfolio")
        .and(warp::get())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(portfolio_handler);

    let portfolio_update = warp::path!("user" / "portfolio" / "update")
        .and(warp::post())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and(warp::body::json())
        .and_then(portfolio_update_handler);

    let transactions_get = warp::path!("user" / "transactions")
        .and(warp::get())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(transactions_get_handler);

    let transactions_post = warp::path!("user" / "transactions")
        .and(warp::post())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and(warp::body::json())
        .and_then(transactions_post_handler);

    let balance_get = warp::path!("user" / "balance")
        .and(warp::get())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(balance_get_handler);

    let balance_put = warp::path!("user" / "balance")
        .and(warp::put())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and(warp::body::json())
        .and_then(balance_put_handler);

    let watchlist_get = warp::path!("user" / "watchlist")
        .and(warp::get())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(watchlist_get_handler);

    let watchlist_add = warp::path!("user" / "watchlist" / "add")
        .and(warp::post())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and(warp::body::json())
        .and_then(watchlist_add_handler);

    let watchlist_remove = warp::path!("user" / "watchlist" / "remove")
        .and(warp::delete())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and(warp::body::json())
        .and_then(watchlist_remove_handler);

    let initialize = warp::path!("user" / "initialize")
        .and(warp::post())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx.clone()))
        .and_then(initialize_handler);

    let chat = warp::path!("ai" / "chat")
        .and(warp::post())
        .and(with_identity(ctx.clone()))
        .and(with_ctx(ctx))
        .and(warp::body::json())
        .and_then(chat_handler);

    trade
        .or(portfolio_get)
        .or(portfolio_update)
        .or(transactions_get)
        .or(transactions_post)
        .or(balance_get)
        .or(balance_put)
        .or(watchlist_get)
        .or(watchlist_add)
        .or(watchlist_remove)
        .or(initialize)
        .or(chat)
        .recover(handle_rejection)
}

fn with_ctx(ctx: AppContext) -> impl Filter<Extract = (AppContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// Resolves the bearer credential into an `AuthUser` or rejects with 401.
fn with_identity(ctx: AppContext) -> impl Filter<Extract = (AuthUser,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let identity = ctx.identity.clone();
        async move {
            let header = header.ok_or_else(|| warp::reject::custom(ApiError::Unauthorized))?;
            let credential = auth::bearer_credential(&header)
                .ok_or_else(|| warp::reject::custom(ApiError::Unauthorized))?;
            identity
                .resolve(credential)
                .await
                .map_err(warp::reject::custom)
        }
    })
}

fn reject(err: impl Into<ApiError>) -> Rejection {
    warp::reject::custom(err.into())
}

fn ok_json(value: serde_json::Value) -> warp::reply::Json {
    warp::reply::json(&value)
}

async fn trade_handler(
    user: AuthUser,
    ctx: AppContext,
    body: TradeRequest,
) -> Result<impl Reply, Rejection> {
    let action = TradeAction::parse(&body.action).map_err(reject)?;
    let name = body.name.as_deref().unwrap_or(&body.symbol);

    let message = trade::execute_trade(
        ctx.store.as_ref(),
        &user.id,
        &body.symbol,
        name,
        action,
        body.shares,
        body.price,
    )
    .await
    .map_err(reject)?;

    Ok(ok_json(json!({ "success": true, "message": message })))
}

async fn portfolio_handler(user: AuthUser, ctx: AppContext) -> Result<impl Reply, Rejection> {
    let holdings = portfolio::get_holdings(ctx.store.as_ref(), &user.id)
        .await
        .map_err(reject)?;
    Ok(ok_json(
        json!({ "success": true, "portfolio": { "holdings": holdings } }),
    ))
}

/// Direct holdings edit: same merge/sell rules as a trade, but no balance or
/// ledger side effects.
async fn portfolio_update_handler(
    user: AuthUser,
    ctx: AppContext,
    body: PortfolioUpdateRequest,
) -> Result<impl Reply, Rejection> {
    let action = TradeAction::parse(&body.action).map_err(reject)?;
    for (field, value) in [
        ("shares", body.shares),
        ("price", body.price),
        ("amount", body.amount),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(reject(ApiError::Validation(format!(
                "{} must be a non-negative number",
                field
            ))));
        }
    }
    if body.symbol.trim().is_empty() {
        return Err(reject(ApiError::Validation(
            "symbol must not be empty".to_string(),
        )));
    }

    // Same bounded CAS loop as the trade executor.
    for _ in 0..3 {
        let mut portfolio = ctx
            .store
            .get_portfolio(&user.id)
            .await
            .map_err(reject)?
            .unwrap_or_else(|| Portfolio::empty(&user.id));

        portfolio::apply_trade(
            &mut portfolio.holdings,
            action,
            &body.symbol,
            &body.name,
            body.shares,
            body.price,
        )
        .map_err(reject)?;

        match ctx.store.save_portfolio(&portfolio).await {
            Ok(()) => {
                let verb = match action {
                    TradeAction::Buy => "bought",
                    TradeAction::Sell => "sold",
                };
                return Ok(ok_json(json!({
                    "success": true,
                    "message": format!("Successfully {} {} shares of {}", verb, body.shares, body.symbol),
                })));
            }
            Err(StoreError::VersionConflict) => continue,
            Err(e) => return Err(reject(e)),
        }
    }
    Err(reject(StoreError::VersionConflict))
}

async fn transactions_get_handler(
    user: AuthUser,
    ctx: AppContext,
) -> Result<impl Reply, Rejection> {
    let mut transactions = ctx
        .store
        .transactions_for_user(&user.id)
        .await
        .map_err(reject)?;
    transactions.reverse(); // most recent first
    Ok(ok_json(
        json!({ "success": true, "transactions": transactions }),
    ))
}

async fn transactions_post_handler(
    user: AuthUser,
    ctx: AppContext,
    body: NewTransactionRequest,
) -> Result<impl Reply, Rejection> {
    let tx = ledger::record(
        ctx.store.as_ref(),
        &user.id,
        body.kind,
        &body.symbol,
        &body.name,
        body.shares,
        body.price,
        body.amount,
    )
    .await
    .map_err(reject)?;
    Ok(ok_json(json!({ "success": true, "transaction": tx })))
}

async fn balance_get_handler(user: AuthUser, ctx: AppContext) -> Result<impl Reply, Rejection> {
    let stored = ctx.store.get_user(&user.id).await.map_err(reject)?;

    let balance = match stored {
        Some(u) => u.balance,
        None => {
            // First balance read creates the account with a zero balance.
            let new_user = User::new(&user.id, &user.username, &user.email, 0.0);
            ctx.store.upsert_user(&new_user).await.map_err(reject)?;
            info!("created user {} on first balance read", user.id);
            0.0
        }
    };
    Ok(ok_json(json!({ "success": true, "balance": balance })))
}

async fn balance_put_handler(
    user: AuthUser,
    ctx: AppContext,
    body: BalanceRequest,
) -> Result<impl Reply, Rejection> {
    if !body.balance.is_finite() || body.balance < 0.0 {
        return Err(reject(ApiError::Validation("Invalid balance".to_string())));
    }

    let stored = ctx.store.get_user(&user.id).await.map_err(reject)?;
    match stored {
        Some(_) => ctx
            .store
            .set_balance(&user.id, body.balance)
            .await
            .map_err(reject)?,
        None => {
            let new_user = User::new(&user.id, &user.username, &user.email, body.balance);
            ctx.store.upsert_user(&new_user).await.map_err(reject)?;
        }
    }
    Ok(ok_json(json!({ "success": true, "balance": body.balance })))
}

async fn watchlist_get_handler(user: AuthUser, ctx: AppContext) -> Result<impl Reply, Rejection> {
    let stored = ctx.store.get_watchlist(&user.id).await.map_err(reject)?;

    let watchlist = match stored {
        Some(wl) => wl,
        None => {
            let wl = Watchlist::default_for(&user.id);
            ctx.store.save_watchlist(&wl).await.map_err(reject)?;
            wl
        }
    };
    Ok(ok_json(
        json!({ "success": true, "watchlist": { "stocks": watchlist.stocks } }),
    ))
}

async fn watchlist_add_handler(
    user: AuthUser,
    ctx: AppContext,
    body: WatchlistAddRequest,
) -> Result<impl Reply, Rejection> {
    if body.symbol.trim().is_empty() || body.name.trim().is_empty() {
        return Err(reject(ApiError::Validation(
            "Symbol and name are required".to_string(),
        )));
    }

    let mut watchlist = ctx
        .store
        .get_watchlist(&user.id)
        .await
        .map_err(reject)?
        .unwrap_or(Watchlist {
            user_id: user.id.clone(),
            stocks: Vec::new(),
            last_updated: chrono::Utc::now(),
        });

    if watchlist.stocks.iter().any(|s| s.symbol == body.symbol) {
        return Err(reject(ApiError::Validation(
            "Stock already in watchlist".to_string(),
        )));
    }

    watchlist.stocks.push(WatchlistItem {
        symbol: body.symbol,
        name: body.name,
    });
    watchlist.last_updated = chrono::Utc::now();
    ctx.store.save_watchlist(&watchlist).await.map_err(reject)?;
    Ok(ok_json(json!({ "success": true })))
}

async fn watchlist_remove_handler(
    user: AuthUser,
    ctx: AppContext,
    body: WatchlistRemoveRequest,
) -> Result<impl Reply, Rejection> {
    let mut watchlist = ctx
        .store
        .get_watchlist(&user.id)
        .await
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Watchlist".to_string())))?;

    let before = watchlist.stocks.len();
    watchlist.stocks.retain(|s| s.symbol != body.symbol);
    if watchlist.stocks.len() == before {
        return Err(reject(ApiError::NotFound(
            "Stock in watchlist".to_string(),
        )));
    }

    watchlist.last_updated = chrono::Utc::now();
    ctx.store.save_watchlist(&watchlist).await.map_err(reject)?;
    Ok(ok_json(json!({ "success": true })))
}

/// Idempotent account setup: user record, empty portfolio, seeded watchlist.
async fn initialize_handler(user: AuthUser, ctx: AppContext) -> Result<impl Reply, Rejection> {
    let existing = ctx.store.get_user(&user.id).await.map_err(reject)?;
    if existing.is_some() {
        return Ok(ok_json(
            json!({ "success": true, "message": "User already initialized" }),
        ));
    }

    let new_user = User::new(&user.id, &user.username, &user.email, 0.0);
    ctx.store.upsert_user(&new_user).await.map_err(reject)?;
    ctx.store
        .save_portfolio(&Portfolio::empty(&user.id))
        .await
        .map_err(reject)?;
    ctx.store
        .save_watchlist(&Watchlist::default_for(&user.id))
        .await
        .map_err(reject)?;

    info!("initialized user {} ({})", user.username, user.id);
    Ok(ok_json(
        json!({ "success": true, "message": "User initialized" }),
    ))
}

fn build_prompt(context_block: &str, message: &str) -> String {
    format!(
        "You are Trada, an AI financial advisor specializing in Indian stock markets.\n\n\
         Here is information about the user you are advising:\n\n{}\n\n\
         Always use ₹ (rupees) when discussing money. Use the user's portfolio, \
         transaction history and balance to personalize the answer, and keep it \
         under 200 words.\n\nThe user asks: \"{}\"",
        context_block, message
    )
}

/// Advisory is always-available-but-degraded: a store or engine failure
/// yields the canned answer, never an error.
async fn chat_handler(
    user: AuthUser,
    ctx: AppContext,
    body: ChatRequest,
) -> Result<impl Reply, Rejection> {
    if body.message.trim().is_empty() {
        return Err(reject(ApiError::Validation(
            "Message is required".to_string(),
        )));
    }

    let answer = match assemble_context(ctx.store.as_ref(), &user).await {
        Ok(view) => {
            let prompt = build_prompt(&render_prompt_context(&view), &body.message);
            advisory::generate_with_fallback(ctx.advisory.as_ref(), &prompt, &body.message).await
        }
        Err(e) => {
            error!("context assembly failed, serving fallback: {}", e);
            FallbackAdvisory::respond(&body.message)
        }
    };

    Ok(ok_json(json!({ "success": true, "message": answer })))
}
