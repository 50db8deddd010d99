//! pginspect - read-only PostgreSQL internals inspector.
//!
//! This library provides:
//! - [`inspector`] - the fixed catalog of introspection statements and the client running them
//! - [`waitgraph`] - lock wait graph and deadlock candidate detection
//! - [`render`] - text table and JSON output

pub mod config;
pub mod fmt;
pub mod inspector;
pub mod render;
pub mod waitgraph;

pub use config::ConnectionConfig;
pub use inspector::{InspectError, Inspector, QueryCatalog, ResultSet};
pub use waitgraph::{GraphError, LockEdge, WaitGraph};
