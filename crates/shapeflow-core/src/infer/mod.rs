//! Shape-inference capability: per-operation-kind result typing
//!
//! Each operation kind that participates in propagation has a handler
//! implementing [`ShapeInference`]. The driver looks handlers up through the
//! [`InferenceRegistry`] by [`OpKind::name`] and never matches on concrete
//! kinds itself, so hosts can register inference for new kinds without
//! touching the engine.
//!
//! A handler succeeds as long as it can refine at all — narrowing an unranked
//! result to a ranked-but-dynamic one counts. It fails only when the operand
//! types are contradictory or a required static attribute is missing, and a
//! failure never stops the surrounding walk.
//!
//! [`OpKind::name`]: shapeflow_ir::OpKind::name

mod constant;
mod control_flow;
mod elementwise;
mod matmul;
mod reduce;
mod shape;

pub use constant::ConstantInference;
pub use control_flow::IfInference;
pub use elementwise::{BinaryElementwise, CastInference, UnaryElementwise};
pub use matmul::MatMulInference;
pub use reduce::ReduceMeanInference;
pub use shape::{ConcatInference, ReshapeInference, TransposeInference};

use shapeflow_ir::{Callable, ElemType, Literal, Operation, ValueType};
use smallvec::SmallVec;
use std::collections::HashMap;
use thiserror::Error;

/// Callback through which a handler triggers full propagation on a nested
/// callable it owns. Handed in by the driver; handlers never reach the driver
/// any other way.
pub type Recurse<'a> = &'a mut dyn FnMut(&mut Callable);

/// Why an operation's shapes could not be inferred at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("'{op}' expects {expected} operands, got {actual}")]
    OperandCount {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("operand {index} of '{op}' carries no value")]
    NoneOperand { op: &'static str, index: usize },

    #[error("mismatched element types for '{op}': {lhs} vs {rhs}")]
    ElemTypeMismatch {
        op: &'static str,
        lhs: ElemType,
        rhs: ElemType,
    },

    #[error("incompatible shapes for '{op}': {lhs} vs {rhs}")]
    IncompatibleShapes {
        op: &'static str,
        lhs: String,
        rhs: String,
    },

    #[error("operand {index} of '{op}' must have rank {expected}, got {actual}")]
    RankMismatch {
        op: &'static str,
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("axis {axis} is out of range for rank {rank}")]
    AxisOutOfRange { axis: i64, rank: usize },

    #[error("'{op}' requires a permutation of length {rank}, got {perm:?}")]
    InvalidPermutation {
        op: &'static str,
        rank: usize,
        perm: Vec<usize>,
    },

    #[error("'{op}' requires a constant {what} operand")]
    MissingConstant {
        op: &'static str,
        what: &'static str,
    },

    #[error("'{op}' cannot produce shape {requested} from {input}")]
    InvalidReshape {
        op: &'static str,
        input: String,
        requested: String,
    },

    #[error("branches of '{op}' produce {then_count} and {else_count} results")]
    BranchMismatch {
        op: &'static str,
        then_count: usize,
        else_count: usize,
    },

    #[error("branches of '{op}' disagree on result {index}: {lhs} vs {rhs}")]
    BranchTypeConflict {
        op: &'static str,
        index: usize,
        lhs: String,
        rhs: String,
    },

    #[error("'{op}' declares {declared} results but its branches produce {produced}")]
    ResultCountMismatch {
        op: &'static str,
        declared: usize,
        produced: usize,
    },
}

/// Operand context snapshotted by the driver before a capability call.
///
/// Types reflect the walk's progress so far: producers earlier in the body
/// have already been visited. Constant payloads are resolved for operands
/// whose producer is a `constant` operation, for kinds (reshape, and friends)
/// whose attributes arrive as tensor operands.
#[derive(Debug, Clone, Default)]
pub struct InferCtx {
    pub operands: SmallVec<[ValueType; 2]>,
    pub constants: SmallVec<[Option<Literal>; 2]>,
}

impl InferCtx {
    pub fn expect_operands(
        &self,
        op: &'static str,
        expected: usize,
    ) -> Result<(), InferenceError> {
        if self.operands.len() != expected {
            return Err(InferenceError::OperandCount {
                op,
                expected,
                actual: self.operands.len(),
            });
        }
        Ok(())
    }

    /// Operand type at `index`, rejecting valueless operands.
    pub fn operand(&self, op: &'static str, index: usize) -> Result<&ValueType, InferenceError> {
        match self.operands.get(index) {
            Some(ValueType::None) => Err(InferenceError::NoneOperand { op, index }),
            Some(ty) => Ok(ty),
            None => Err(InferenceError::OperandCount {
                op,
                expected: index + 1,
                actual: self.operands.len(),
            }),
        }
    }

    /// Constant payload of the operand at `index`, when its producer is a
    /// `constant` operation.
    pub fn constant(&self, index: usize) -> Option<&Literal> {
        self.constants.get(index)?.as_ref()
    }
}

/// The contract every shape-bearing operation kind implements: given the
/// current operand types, compute and install the most specific result types
/// derivable right now.
///
/// Implementations mutate only their own operation — result slots, and the
/// operation's own optional static attributes — never operands or siblings.
pub trait ShapeInference: Send + Sync {
    /// Operation-kind name this implementation is registered under.
    fn op_name(&self) -> &'static str;

    /// Refine `op`'s result types in place from the operand types in `ctx`,
    /// recursing into nested callables when the kind owns them.
    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        recurse: Recurse<'_>,
    ) -> Result<(), InferenceError>;
}

/// Dispatch table from operation-kind name to inference implementation,
/// populated at startup.
pub struct InferenceRegistry {
    handlers: HashMap<&'static str, Box<dyn ShapeInference>>,
}

impl InferenceRegistry {
    /// Registry with every built-in operation kind registered.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(Box::new(ConstantInference));

        for name in ["add", "sub", "mul", "div"] {
            registry.register(Box::new(BinaryElementwise::new(name)));
        }
        for name in ["relu", "sigmoid", "tanh", "exp", "neg"] {
            registry.register(Box::new(UnaryElementwise::new(name)));
        }
        registry.register(Box::new(CastInference));

        registry.register(Box::new(MatMulInference));
        registry.register(Box::new(TransposeInference));
        registry.register(Box::new(ReshapeInference));
        registry.register(Box::new(ConcatInference));
        registry.register(Box::new(ReduceMeanInference));
        registry.register(Box::new(IfInference));

        registry
    }

    /// Registry with no handlers at all.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn ShapeInference>) {
        self.handlers.insert(handler.op_name(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ShapeInference> {
        self.handlers.get(name).map(Box::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl Default for InferenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapeflow_ir::OpKind;

    #[test]
    fn test_default_registry_covers_builtin_kinds() {
        let registry = InferenceRegistry::new();
        for kind in [
            OpKind::Add,
            OpKind::MatMul,
            OpKind::Relu,
            OpKind::Reshape,
            OpKind::Concat { axis: 0 },
        ] {
            assert!(registry.contains(kind.name()), "missing {}", kind.name());
        }
        assert!(!registry.contains("return"));
        assert!(!registry.contains("vendor.mystery"));
    }

    #[test]
    fn test_register_new_kind() {
        struct AlwaysScalar;
        impl ShapeInference for AlwaysScalar {
            fn op_name(&self) -> &'static str {
                "vendor.scalarize"
            }
            fn infer_shapes(
                &self,
                op: &mut Operation,
                _ctx: &InferCtx,
                _recurse: Recurse<'_>,
            ) -> Result<(), InferenceError> {
                op.refine_result(0, ValueType::scalar(ElemType::F32));
                Ok(())
            }
        }

        let mut registry = InferenceRegistry::new();
        registry.register(Box::new(AlwaysScalar));
        assert!(registry.contains("vendor.scalarize"));
    }

    #[test]
    fn test_ctx_operand_rejects_none_and_missing() {
        let ctx = InferCtx {
            operands: SmallVec::from_vec(vec![
                ValueType::fixed(ElemType::F32, &[2]),
                ValueType::None,
            ]),
            constants: SmallVec::from_vec(vec![None, None]),
        };
        assert!(ctx.operand("test", 0).is_ok());
        assert_eq!(
            ctx.operand("test", 1),
            Err(InferenceError::NoneOperand {
                op: "test",
                index: 1
            })
        );
        assert!(matches!(
            ctx.operand("test", 2),
            Err(InferenceError::OperandCount { .. })
        ));
    }
}
