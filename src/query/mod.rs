//! Query Engine
//!
//! Boolean queries over log entries:
//!
//! - **AST**: the `Subquery` tree, its optimizer and structural signature
//! - **Evaluate**: compiled matchers with case/diacritic folding
//! - **Parser**: text syntax → `Subquery`
//! - **Saved**: named queries persisted in a key-value store
//!
//! # Examples
//!
//! ```rust
//! use logscope::query::{parse_query, Matcher, Property, Subquery};
//!
//! let query = Subquery::and(vec![
//!     Subquery::contains(Property::Message, "timeout"),
//!     Subquery::contains(Property::Subsystem, ""), // not typed into yet
//! ]);
//!
//! // The empty row drops out
//! let optimized = query.optimize().unwrap();
//! assert_eq!(optimized.signature(), "message contains");
//!
//! let parsed = parse_query(r#"message ~ timeout AND level:error"#).unwrap();
//! let matcher = Matcher::compile(&parsed);
//! # let _ = matcher;
//! ```

mod ast;
mod error;
mod evaluate;
mod parser;
mod saved;

pub use ast::{Comparison, CompoundVariant, Property, Subquery, SubqueryKind};
pub use error::{QueryError, QueryResult};
pub use evaluate::{field_value, fold, Matcher};
pub use parser::parse_query;
pub use saved::{QueryStore, SavedQuery, SqliteQueryStore};
