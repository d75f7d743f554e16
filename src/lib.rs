// src/lib.rs
pub mod advisory;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod models;
pub mod portfolio;
pub mod store;
pub mod trade;
