//! Parsing and schema logic for TiDB slow query logs, shared by the
//! `tidb_slow_query` output plugin and, potentially, any processor stage
//! that wants to decode a log entry without opening a database connection.
//!
//! This crate does no I/O: it is the pure half of the plugin, split out the
//! way a columnar engine splits its type/schema crates from the crates that
//! own a runtime and a network connection.

pub mod parser;
pub mod plan;
pub mod schema;

pub use parser::{parse, FieldValue, ParseError, SlowQueryRecord};
pub use plan::{decode_plan, PlanDecoder, PlanDecoderPool, PlanError};
