//! Storage abstraction and implementations for pharmaqa.
//!
//! This crate provides the document collection port the quality checkers
//! query, and the report store quality reports are persisted to.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod search;
pub mod json_storage;

pub use trait_::{DocumentStore, ReportStore, StorageError, Result};
pub use memory::{InMemoryStore, InMemoryReportStore};
pub use search::SearchIndexStore;
pub use json_storage::JsonReportStore;
