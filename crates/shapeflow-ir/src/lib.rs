//! # Shapeflow IR
//!
//! Data model for the Shapeflow shape propagation engine:
//!
//! - **[`graph`]** - graphs, callables, operations, and non-owning operand
//!   references
//! - **[`types`]** - tensor value types with their shape-specificity ordering
//! - **[`diagnostics`]** - accumulated per-operation and per-callable
//!   diagnostics
//!
//! This crate is a leaf: it knows nothing about how shapes are inferred, only
//! how graphs and their types are represented and refined in place.

pub mod diagnostics;
pub mod graph;
pub mod types;

pub use diagnostics::{Diagnostic, DiagnosticBuffer, DiagnosticKind, DiagnosticSink, Location};
pub use graph::{
    Callable, Graph, Literal, OpId, OpKind, Operation, Param, ValueRef, ENTRY_CALLABLE,
};
pub use types::{Dim, Dims, ElemType, Specificity, ValueType};
