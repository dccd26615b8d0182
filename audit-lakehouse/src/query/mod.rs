//! Analytical queries over the data lake
//!
//! - `filter`: caller filter and its validation
//! - `compiler`: filter + authorised services -> statement text
//! - `client`: submit / poll / paged result collection
//! - `service`: the request flow tying them together

pub mod client;
pub mod compiler;
pub mod filter;
pub mod service;

pub use client::{ExecutionContext, QueryExecutionClient, ResultRows};
pub use compiler::QueryCompiler;
pub use filter::AuditFilter;
pub use service::{AnalyticalQueryResponse, AuditQueryService, QueryResultsResponse};
