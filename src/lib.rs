//! Search query compilation and alert evaluation over a columnar event store.
//!
//! A Lucene-style query goes through [`parser::parse`], is compiled to a SQL
//! predicate by [`serializer::SqlSerializer`] using the per-tenant
//! [`schema_cache::SchemaTypeCache`], and is wrapped into a full WHERE clause by
//! [`query_builder::SearchQueryBuilder`]. [`evaluator::AlertEvaluator`] runs
//! those queries on every tick and notifies breaching alerts.

pub mod alert;
pub mod ast;
pub mod cache_store;
pub mod config;
pub mod error;
pub mod escape;
pub mod evaluator;
pub mod event_store;
pub mod lexer;
pub mod notify;
pub mod parser;
pub mod query_builder;
pub mod resolver;
pub mod schema_cache;
pub mod serializer;
pub mod sql;
pub mod token;

pub use config::DispatcherConfig;
pub use evaluator::{AlertEvaluator, TickSummary};
pub use parser::{parse, ParseError};
pub use query_builder::SearchQueryBuilder;
pub use serializer::{explain, SqlSerializer};
