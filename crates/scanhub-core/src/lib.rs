//! Shared domain types for the scanhub coordinator.
//!
//! This crate defines the cross-cutting contracts used by the HTTP server: the scan
//! lifecycle model, the store/ruleset/reporter/token-verifier traits, and the error
//! taxonomy that maps 1:1 onto the HTTP status codes the API returns.
//!
//! # API notes
//! `scanhub-core` is an internal crate (`publish = false`). Its public API uses a few
//! third-party types (`uuid::Uuid`, `chrono::DateTime<Utc>`, `serde_json::Value`) as
//! part of the coordinator's wire contract.

pub mod auth;
pub mod error;
pub mod name;
pub mod pagination;
pub mod reporter;
pub mod ruleset;
pub mod scan;
pub mod store;

pub use auth::{Actor, TokenVerifier};
pub use error::{CoordinatorError, Result};
pub use reporter::{ReportPayload, ReporterClient};
pub use ruleset::{RulesetProvider, RulesetSnapshot};
pub use scan::{Scan, ScanStatus};
pub use store::{DispatchedScan, ListFilters, Page, Pagination, ScanStore};
