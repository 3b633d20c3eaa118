//! DynamoDB Scan and Query engine for dynalocal.
//!
//! Parses and evaluates the DynamoDB expression language, compiles legacy
//! filter parameters, and pages through an [`storage::ItemSource`] with
//! segment-aware iteration.
#![allow(missing_docs, clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod comparator;
pub mod config;
pub mod error;
pub mod executor;
pub mod expression;
pub mod key_condition;
pub mod legacy;
pub mod schema;
pub mod segment;
pub mod storage;

pub use config::ExecutorConfig;
pub use executor::{Executor, MAX_TOTAL_SEGMENTS};
pub use schema::{IndexKind, IndexSchema, KeyAttribute, KeySchema, TableSchema};
pub use storage::{ItemSource, MemoryCatalog, MemoryTable, TableCatalog};
