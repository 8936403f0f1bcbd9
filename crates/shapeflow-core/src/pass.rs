//! Propagation driver: walks callable bodies and drives the capability
//!
//! The driver makes exactly one definition-order sweep over each callable's
//! body. Operand types only ever gain specificity and bodies arrive in
//! def-before-use order from the import stage, so a single sweep reaches the
//! same fixed point a repeated worklist would — provided the body is acyclic,
//! which the import contract guarantees. A host that cannot guarantee
//! def-before-use ordering must topologically sort bodies (or iterate the
//! sweep to fixpoint) before relying on this driver; the sweep itself will not
//! compensate.
//!
//! Failures accumulate instead of aborting: every eligible operation is given
//! its chance in the sweep so one run surfaces as many diagnostics as
//! possible. Whether a failed callable aborts the wider pipeline is the
//! caller's decision, made from the returned report.

use crate::infer::{InferCtx, InferenceRegistry};
use shapeflow_ir::{
    Callable, Diagnostic, DiagnosticKind, DiagnosticSink, Graph, Literal, OpId, OpKind, ValueRef,
    ValueType, ENTRY_CALLABLE,
};
use smallvec::SmallVec;
use tracing::{debug, trace};

/// Outcome of propagation over one callable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallableReport {
    /// Operations whose inference failed or was impossible to attempt.
    pub op_errors: usize,
    /// Operations whose results remained non-fully-static after the sweep.
    pub unresolved: usize,
}

impl CallableReport {
    pub fn is_resolved(&self) -> bool {
        self.op_errors == 0 && self.unresolved == 0
    }
}

/// Outcome of propagation over a graph, one entry per processed callable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphReport {
    pub callables: Vec<(String, CallableReport)>,
}

impl GraphReport {
    pub fn is_resolved(&self) -> bool {
        self.callables.iter().all(|(_, report)| report.is_resolved())
    }

    pub fn get(&self, name: &str) -> Option<&CallableReport> {
        self.callables
            .iter()
            .find(|(callable, _)| callable == name)
            .map(|(_, report)| report)
    }
}

/// The propagation driver.
pub struct ShapeInferencePass {
    registry: InferenceRegistry,
}

impl ShapeInferencePass {
    pub fn new() -> Self {
        Self {
            registry: InferenceRegistry::new(),
        }
    }

    /// Driver over a custom registry, e.g. one extended with host kinds.
    pub fn with_registry(registry: InferenceRegistry) -> Self {
        Self { registry }
    }

    /// Propagate shapes through a graph.
    ///
    /// When the graph contains the reserved entry callable
    /// [`ENTRY_CALLABLE`], only that callable is processed; otherwise every
    /// callable is processed independently, in graph order.
    pub fn run_on_graph(&self, graph: &mut Graph, sink: &mut dyn DiagnosticSink) -> GraphReport {
        let mut report = GraphReport::default();
        if graph.contains(ENTRY_CALLABLE) {
            if let Some(entry) = graph.get_mut(ENTRY_CALLABLE) {
                let outcome = self.run_on_callable(entry, sink);
                report.callables.push((ENTRY_CALLABLE.to_string(), outcome));
            }
        } else {
            for callable in graph.iter_mut() {
                let outcome = self.run_on_callable(callable, sink);
                report.callables.push((callable.name.clone(), outcome));
            }
        }
        report
    }

    /// Propagate shapes through one callable body.
    ///
    /// Requires exclusive access to the callable for the duration of the call;
    /// nested callables owned by control-flow operations are borrowed for the
    /// duration of their recursive run.
    pub fn run_on_callable(
        &self,
        callable: &mut Callable,
        sink: &mut dyn DiagnosticSink,
    ) -> CallableReport {
        debug!(
            callable = %callable.name,
            ops = callable.body.len(),
            "propagating shapes"
        );

        let mut op_errors = 0usize;
        for idx in 0..callable.body.len() {
            // Imported output types may already be fully static while
            // operation-level attributes still need inference, so feeding the
            // terminal keeps an operation eligible regardless of specificity.
            let eligible =
                callable.used_by_terminal(idx) || callable.body[idx].needs_inference();
            if !eligible {
                continue;
            }

            let Some(handler) = self.registry.get(callable.body[idx].kind.name()) else {
                op_errors += 1;
                sink.report(Diagnostic::operation(
                    &callable.name,
                    idx,
                    DiagnosticKind::CapabilityMissing,
                    format!(
                        "unable to infer shapes of operation '{}' without an inference \
                         implementation",
                        callable.body[idx].kind.name()
                    ),
                ));
                continue;
            };

            let Some(ctx) = snapshot_operands(callable, idx) else {
                op_errors += 1;
                sink.report(Diagnostic::operation(
                    &callable.name,
                    idx,
                    DiagnosticKind::InferenceContradiction,
                    "operand references a value outside the body",
                ));
                continue;
            };

            let name = callable.name.clone();
            let mut recurse = |nested: &mut Callable| {
                self.run_on_callable(nested, sink);
            };
            let outcome =
                handler.infer_shapes(&mut callable.body[idx], &ctx, &mut recurse);
            match outcome {
                Ok(()) => {
                    trace!(callable = %name, op = idx, kind = %callable.body[idx].kind.name(), "inferred");
                }
                Err(err) => {
                    op_errors += 1;
                    sink.report(Diagnostic::operation(
                        &name,
                        idx,
                        DiagnosticKind::InferenceContradiction,
                        err.to_string(),
                    ));
                }
            }
        }

        let unresolved = callable.unresolved_ops();
        if unresolved > 0 {
            sink.report(Diagnostic::callable(
                &callable.name,
                DiagnosticKind::UnresolvedShapes { count: unresolved },
                format!("shape inference incomplete, {unresolved} operations could not be resolved"),
            ));
        }

        finalize_signature(callable);

        debug!(
            callable = %callable.name,
            op_errors,
            unresolved,
            "propagation finished"
        );
        CallableReport {
            op_errors,
            unresolved,
        }
    }
}

impl Default for ShapeInferencePass {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot the operand types (and constant payloads) an operation sees at
/// this point of the sweep. `None` when an operand reference dangles.
fn snapshot_operands(callable: &Callable, idx: OpId) -> Option<InferCtx> {
    let op = &callable.body[idx];
    let mut operands: SmallVec<[ValueType; 2]> = SmallVec::with_capacity(op.operands.len());
    let mut constants: SmallVec<[Option<Literal>; 2]> =
        SmallVec::with_capacity(op.operands.len());
    for &operand in &op.operands {
        operands.push(callable.value_type(operand)?.clone());
        constants.push(constant_payload(callable, operand).cloned());
    }
    Some(InferCtx {
        operands,
        constants,
    })
}

fn constant_payload(callable: &Callable, operand: ValueRef) -> Option<&Literal> {
    match operand {
        ValueRef::Result { op, index: 0 } => match &callable.body.get(op)?.kind {
            OpKind::Constant { value } => Some(value),
            _ => None,
        },
        _ => None,
    }
}

/// Rewrite the callable's declared result signature from its terminal
/// instruction's post-inference operand types, dropping valueless entries.
/// The parameter signature is left untouched.
fn finalize_signature(callable: &mut Callable) {
    let results: Vec<ValueType> = {
        let Some(terminal) = callable.terminal() else {
            return;
        };
        terminal
            .operands
            .iter()
            .filter_map(|&operand| callable.value_type(operand))
            .filter(|ty| !ty.is_none())
            .cloned()
            .collect()
    };
    callable.results = results;
}
