//! # logscope
//!
//! Log archive explorer: loads millions of entries from a log archive,
//! filters them with a boolean query language and keeps a layered cache of
//! the filtered view.
//!
//! ## Features
//!
//! - **Chunked ingestion**: the archive is split into time chunks, newest
//!   first, streamed concurrently and published in order
//! - **Slow-path fallback**: predicate queries over widening windows when
//!   bulk streaming is unavailable
//! - **Query engine**: `Subquery` trees with an optimizer, case/diacritic
//!   folding and a text syntax
//! - **Filtered view**: date, query and activity layers, each recomputed
//!   only when its inputs change
//! - **Search index**: wrapping case-insensitive find over the flattened
//!   message text
//!
//! ## Modules
//!
//! - [`source`]: raw records and the archive access seam
//! - [`ingest`]: entry store, chunked loader and source registry
//! - [`model`]: entries, date ranges and the activity tree
//! - [`query`]: query AST, evaluation, parsing and saved queries
//! - [`view`]: the layered filtered view
//! - [`search`]: row index for find-next
//! - [`stats`]: per-level, process and subsystem counts
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logscope::ingest::{Database, LoadCallbacks};
//! use logscope::source::JsonlOpener;
//! use logscope::view::FilteredView;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let database = Database::new(Arc::new(JsonlOpener::new()));
//!     database.add_source("system.jsonl");
//!     database
//!         .load_if_necessary(&LoadCallbacks::new(), &CancellationToken::new())
//!         .await?;
//!
//!     let view = FilteredView::new(database.store());
//!     view.set_query_text("level:error AND message ~ timeout")?;
//!     view.regenerate_entries().await?;
//!
//!     println!("{} matching entries", view.entries().len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ingest;
pub mod model;
pub mod query;
pub mod search;
pub mod source;
pub mod stats;
pub mod view;

pub use config::Config;
pub use ingest::{Database, EntryStore, IngestError, IngestOptions, LoadCallbacks};
pub use model::{Activity, ActivityTree, DateRange, Entry, EntryType, LogLevel};
pub use query::{parse_query, Matcher, Property, Subquery};
pub use search::SearchIndex;
pub use stats::EntryStats;
pub use view::{FilteredView, Regeneration, ViewOptions};
