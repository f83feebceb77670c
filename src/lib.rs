//! WebHaze payment core: an idempotent transaction ledger with pluggable
//! payment gateway adapters, plan pricing, and an axum HTTP surface.

pub mod api;
pub mod config;
pub mod error;
pub mod gateways;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod middleware;
pub mod services;
