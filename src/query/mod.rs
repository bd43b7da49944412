//! Query Translator: client requests to backend-agnostic query specs, and an
//! in-memory executor for backends that return plain rows.

pub mod executor;
pub mod predicate;
pub mod request;
pub mod translator;

pub use executor::{count, execute, QueryOutcome};
pub use predicate::{compare_values, Comparison, Predicate};
pub use request::{Filter, QueryRequest};
pub use translator::{ColumnCatalog, QuerySpec, QueryTranslator, SortDirection, SortSpec};
