//! # Shapeflow Core
//!
//! Shape propagation for imported tensor computation graphs.
//!
//! An imported graph arrives with operation result types at varying levels of
//! shape specificity — unranked, ranked with dynamic dimensions, or fully
//! static. This crate drives every operation's types to the most specific
//! form derivable from its operands, then rewrites each callable's declared
//! result signature from its terminal instruction.
//!
//! - **[`infer`]** - the per-operation-kind inference capability, its
//!   registry, and the built-in operation implementations
//! - **[`pass`]** - the propagation driver
//!
//! ## Quick start
//!
//! ```
//! use shapeflow_core::infer_graph;
//! use shapeflow_ir::{Callable, ElemType, Graph, Literal, OpKind, ValueType};
//!
//! let mut main = Callable::new("main_graph");
//! let x = main.append(
//!     OpKind::Constant { value: Literal::new(ElemType::I32, vec![4]) },
//!     vec![],
//!     vec![ValueType::Unranked(ElemType::I32)],
//! );
//! main.append(OpKind::Return, vec![x], vec![]);
//!
//! let mut graph = Graph::new();
//! graph.insert(main);
//! infer_graph(&mut graph)?;
//!
//! let main = graph.get("main_graph").unwrap();
//! assert_eq!(main.results, vec![ValueType::fixed(ElemType::I32, &[4])]);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod infer;
pub mod pass;

pub use infer::{
    InferCtx, InferenceError, InferenceRegistry, Recurse, ShapeInference,
};
pub use pass::{CallableReport, GraphReport, ShapeInferencePass};

use anyhow::Result;
use shapeflow_ir::{DiagnosticBuffer, Graph};

/// Propagate shapes through `graph` with the default registry, treating any
/// unresolved callable as an error.
///
/// This is the convenience entry point for hosts without their own diagnostic
/// plumbing; pipelines that want to continue past failures should call
/// [`ShapeInferencePass::run_on_graph`] with their own sink and inspect the
/// report instead.
pub fn infer_graph(graph: &mut Graph) -> Result<()> {
    let mut sink = DiagnosticBuffer::new();
    let pass = ShapeInferencePass::new();
    let report = pass.run_on_graph(graph, &mut sink);
    if report.is_resolved() {
        return Ok(());
    }
    let rendered: Vec<String> = sink.iter().map(ToString::to_string).collect();
    anyhow::bail!("shape propagation failed:\n{}", rendered.join("\n"))
}
