//! # scopusdb
//!
//! Scopus publication metadata ingestion: entity resolution and upsert into
//! a relational store.
//!
//! ## Modules
//!
//! - [`record`] - Normalized view of JSON entries and CSV rows
//! - [`model`] - Entity types linked by natural keys
//! - [`store`] - `Store` trait with in-memory and SQLite backends
//! - [`context`] - Batch-scoped unit of work with staged entities
//! - [`resolve`] - Country, subject, source, fund, keyword, institution,
//!   author and paper resolvers
//! - [`batch`] - Export file inspection, assembly and problem reports
//! - [`reference`] - Reference table imports
//! - [`faculty`] - Fuzzy faculty matching and roster reconciliation
//! - [`scopus`] - Scopus Search API client
//! - [`config`] - `config.json` loading
//! - [`populate`] - End-to-end population run
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scopusdb::{batch, context::ResolutionContext, store::SqliteStore};
//! use std::path::Path;
//!
//! fn main() -> scopusdb::Result<()> {
//!     let mut store = SqliteStore::open("scopus.db")?;
//!     let mut ctx = ResolutionContext::new(&mut store);
//!     let summary = batch::process_directory(
//!         &mut ctx,
//!         Path::new("data/Tehran"),
//!         "Tehran",
//!         Path::new("data/logs"),
//!         batch::CommitPolicy::PerFile,
//!     )?;
//!     println!("Imported {} papers", summary.papers);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod faculty;
pub mod model;
pub mod populate;
pub mod record;
pub mod reference;
pub mod resolve;
pub mod scopus;
pub mod store;

pub use error::{IngestError, Result};
