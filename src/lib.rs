//! Payrail - Merchant Payout Orchestration
//!
//! Accepts merchant payout requests over HTTP, debits the merchant wallet
//! exactly once per idempotency key, drives settlement through an external
//! counterparty, and reconciles failures with compensating credits and a
//! scheduled retry loop.
//!
//! # Modules
//!
//! - [`types`] - Core domain types (Currency, PayoutStatus, records)
//! - [`error`] - Error taxonomy with stable codes and HTTP mapping
//! - [`config`] - YAML configuration loading
//! - [`logging`] - tracing setup with file rotation
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`ledger`] - Wallet locking, balance moves, append-only entries
//! - [`audit`] - Allow-list audit trail with secret redaction
//! - [`settlement`] - Settlement counterparty abstraction + impls
//! - [`payout`] - Orchestrator, retry worker, backoff policy
//! - [`gateway`] - axum HTTP surface

pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod payout;
pub mod settlement;
pub mod types;

// Convenient re-exports at crate root
pub use audit::AuditRecorder;
pub use config::AppConfig;
pub use db::Database;
pub use error::PayoutError;
pub use payout::{PayoutOrchestrator, RetryPolicy, RetryWorker, WorkerConfig};
pub use settlement::{SettlementApi, SettlementError};
pub use types::{Currency, PayoutOutcome, PayoutRequest, PayoutResult, PayoutStatus};
