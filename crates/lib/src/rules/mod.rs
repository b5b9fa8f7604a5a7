//! Typed rule registry.
//!
//! A rule produces one output type from one param type and declares the
//! (param, output) pairs it may request while running. The graph is
//! validated once at executor construction; anything ambiguous or
//! unprovided fails startup instead of a request.

pub mod graph;
pub mod types;

pub use graph::RuleGraph;
pub use types::{GraphError, Param, RuleDef, Signature, TypeKey, Value};
