//! The imported computation graph: callables, operations, operand references
//!
//! A [`Graph`] owns an ordered collection of [`Callable`]s; a callable owns its
//! body of [`Operation`]s. Operations never own the values they consume — an
//! operand is a [`ValueRef`], an index-shaped back-reference into the owning
//! body (or into the callable's parameter list). Control-flow operation kinds
//! own their nested callables inline, which is the only place a callable
//! appears outside the graph's top-level map.
//!
//! Everything here is constructed by an import stage and mutated in place by
//! the propagation driver: result types are refined and the declared result
//! signature is rewritten from the terminal instruction's operands.

use crate::types::{Dim, ElemType, ValueType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Name of the callable treated as the sole entry point when present.
pub const ENTRY_CALLABLE: &str = "main_graph";

/// Index of an operation within its owning callable body.
pub type OpId = usize;

/// Non-owning reference to a value visible inside a callable body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueRef {
    /// The n-th parameter of the enclosing callable.
    Param(usize),
    /// The `index`-th result of an earlier operation in the same body.
    Result { op: OpId, index: usize },
}

impl ValueRef {
    pub fn result(op: OpId, index: usize) -> Self {
        ValueRef::Result { op, index }
    }

    /// The producing operation, when the reference points at one.
    pub fn producer(&self) -> Option<OpId> {
        match self {
            ValueRef::Param(_) => None,
            ValueRef::Result { op, .. } => Some(*op),
        }
    }
}

/// Constant tensor payload carried as a static attribute.
///
/// Only the metadata needed for shape folding is kept: dimension sizes, and
/// the integer elements themselves when the tensor is integral and small
/// enough to matter to inference (a reshape target, an axis list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Literal {
    pub elem: ElemType,
    pub dims: Vec<u64>,
    pub ints: Option<Vec<i64>>,
}

impl Literal {
    pub fn new(elem: ElemType, dims: Vec<u64>) -> Self {
        Self {
            elem,
            dims,
            ints: None,
        }
    }

    /// 1-D i64 literal with its payload, the usual encoding of shape operands.
    pub fn from_ints(values: Vec<i64>) -> Self {
        Self {
            elem: ElemType::I64,
            dims: vec![values.len() as u64],
            ints: Some(values),
        }
    }

    /// The fully static type this literal evaluates to.
    pub fn ty(&self) -> ValueType {
        ValueType::Ranked {
            elem: self.elem,
            dims: self.dims.iter().map(|&n| Dim::Fixed(n)).collect(),
        }
    }

    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }
}

/// Operation kind plus its static attributes.
///
/// The set is open: the propagation driver dispatches on [`OpKind::name`]
/// through a registry and never matches on concrete kinds, so hosts can add
/// kinds (and register inference for them) without touching the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    Constant {
        value: Literal,
    },
    Add,
    Sub,
    Mul,
    Div,
    Relu,
    Sigmoid,
    Tanh,
    Exp,
    Neg,
    MatMul,
    Transpose {
        /// Absent permutations are filled in during inference once the
        /// operand rank is known.
        perm: Option<Vec<usize>>,
    },
    Reshape,
    Concat {
        axis: i64,
    },
    ReduceMean {
        axes: Option<Vec<i64>>,
        keep_dims: bool,
    },
    Cast {
        to: ElemType,
    },
    If {
        then_branch: Box<Callable>,
        else_branch: Box<Callable>,
    },
    /// Terminal instruction; its operands are the callable's returned values.
    Return,
    /// Operation imported from an unrecognized domain.
    Custom {
        name: String,
    },
}

impl OpKind {
    /// Registry key for this kind. Custom operations report their imported
    /// name, so a host that registers inference for them gets dispatched to.
    pub fn name(&self) -> &str {
        match self {
            OpKind::Constant { .. } => "constant",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Relu => "relu",
            OpKind::Sigmoid => "sigmoid",
            OpKind::Tanh => "tanh",
            OpKind::Exp => "exp",
            OpKind::Neg => "neg",
            OpKind::MatMul => "matmul",
            OpKind::Transpose { .. } => "transpose",
            OpKind::Reshape => "reshape",
            OpKind::Concat { .. } => "concat",
            OpKind::ReduceMean { .. } => "reduce_mean",
            OpKind::Cast { .. } => "cast",
            OpKind::If { .. } => "if",
            OpKind::Return => "return",
            OpKind::Custom { name } => name,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OpKind::Return)
    }
}

/// A single graph node: zero or more typed results computed from zero or more
/// operand references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub operands: SmallVec<[ValueRef; 2]>,
    pub results: SmallVec<[ValueType; 1]>,
}

impl Operation {
    pub fn new(kind: OpKind, operands: Vec<ValueRef>) -> Self {
        Self {
            kind,
            operands: SmallVec::from_vec(operands),
            results: SmallVec::new(),
        }
    }

    pub fn with_results(mut self, results: Vec<ValueType>) -> Self {
        self.results = SmallVec::from_vec(results);
        self
    }

    /// Whether any result still carries unresolved shape information.
    pub fn needs_inference(&self) -> bool {
        self.results.iter().any(ValueType::needs_inference)
    }

    /// Monotonic write into a result slot; see [`ValueType::refine`].
    pub fn refine_result(&mut self, index: usize, ty: ValueType) {
        self.results[index].refine(ty);
    }
}

/// A typed input parameter of a callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: ValueType,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A function-like unit: typed parameters, a declared result signature, and a
/// body of operations in definition (def-before-use) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callable {
    pub name: String,
    pub params: Vec<Param>,
    pub results: Vec<ValueType>,
    pub body: Vec<Operation>,
}

impl Callable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            results: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a parameter and return a reference to it.
    pub fn push_param(&mut self, name: impl Into<String>, ty: ValueType) -> ValueRef {
        self.params.push(Param::new(name, ty));
        ValueRef::Param(self.params.len() - 1)
    }

    /// Append an operation and return a reference to its first result.
    pub fn append(
        &mut self,
        kind: OpKind,
        operands: Vec<ValueRef>,
        results: Vec<ValueType>,
    ) -> ValueRef {
        let id = self.body.len();
        self.body.push(Operation::new(kind, operands).with_results(results));
        ValueRef::result(id, 0)
    }

    /// The trailing terminal instruction, when the body ends in one.
    pub fn terminal(&self) -> Option<&Operation> {
        self.body.last().filter(|op| op.kind.is_terminal())
    }

    /// Resolve a value reference to its current type.
    pub fn value_type(&self, value: ValueRef) -> Option<&ValueType> {
        match value {
            ValueRef::Param(i) => self.params.get(i).map(|p| &p.ty),
            ValueRef::Result { op, index } => self.body.get(op)?.results.get(index),
        }
    }

    /// Whether any result of `op` is consumed directly by the terminal
    /// instruction.
    pub fn used_by_terminal(&self, op: OpId) -> bool {
        self.terminal().is_some_and(|terminal| {
            terminal
                .operands
                .iter()
                .any(|operand| operand.producer() == Some(op))
        })
    }

    /// Number of operations whose results remain non-fully-static.
    pub fn unresolved_ops(&self) -> usize {
        self.body.iter().filter(|op| op.needs_inference()).count()
    }
}

/// Ordered, mutable collection of callables, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    callables: IndexMap<String, Callable>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a callable under its own name, replacing any previous one.
    pub fn insert(&mut self, callable: Callable) {
        self.callables.insert(callable.name.clone(), callable);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callables.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Callable> {
        self.callables.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Callable> {
        self.callables.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Callable> {
        self.callables.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Callable> {
        self.callables.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_callable() -> Callable {
        let mut f = Callable::new("main_graph");
        let x = f.append(
            OpKind::Constant {
                value: Literal::new(ElemType::F32, vec![2, 3]),
            },
            vec![],
            vec![ValueType::Unranked(ElemType::F32)],
        );
        let y = f.append(
            OpKind::Relu,
            vec![x],
            vec![ValueType::Unranked(ElemType::F32)],
        );
        f.append(OpKind::Return, vec![y], vec![]);
        f
    }

    #[test]
    fn test_append_returns_result_refs() {
        let f = sample_callable();
        assert_eq!(f.body.len(), 3);
        assert_eq!(f.body[1].operands[0], ValueRef::result(0, 0));
    }

    #[test]
    fn test_terminal_detection() {
        let f = sample_callable();
        assert!(f.terminal().is_some());

        let mut g = Callable::new("no_return");
        g.append(
            OpKind::Relu,
            vec![ValueRef::Param(0)],
            vec![ValueType::Unranked(ElemType::F32)],
        );
        assert!(g.terminal().is_none());
        assert!(Callable::new("empty").terminal().is_none());
    }

    #[test]
    fn test_used_by_terminal() {
        let f = sample_callable();
        assert!(!f.used_by_terminal(0));
        assert!(f.used_by_terminal(1));
        assert!(!f.used_by_terminal(2));
    }

    #[test]
    fn test_value_type_resolution() {
        let mut f = Callable::new("f");
        let p = f.push_param("x", ValueType::fixed(ElemType::F32, &[4]));
        let r = f.append(
            OpKind::Relu,
            vec![p],
            vec![ValueType::Unranked(ElemType::F32)],
        );
        assert_eq!(
            f.value_type(p),
            Some(&ValueType::fixed(ElemType::F32, &[4]))
        );
        assert_eq!(f.value_type(r), Some(&ValueType::Unranked(ElemType::F32)));
        assert_eq!(f.value_type(ValueRef::Param(7)), None);
        assert_eq!(f.value_type(ValueRef::result(9, 0)), None);
    }

    #[test]
    fn test_unresolved_ops_ignores_none_results() {
        let mut f = Callable::new("f");
        f.append(
            OpKind::Custom {
                name: "side_effect".to_string(),
            },
            vec![],
            vec![ValueType::None],
        );
        f.append(
            OpKind::Custom {
                name: "mystery".to_string(),
            },
            vec![],
            vec![ValueType::Unranked(ElemType::F32)],
        );
        assert_eq!(f.unresolved_ops(), 1);
    }

    #[test]
    fn test_custom_kind_reports_imported_name() {
        let kind = OpKind::Custom {
            name: "vendor.fancy_op".to_string(),
        };
        assert_eq!(kind.name(), "vendor.fancy_op");
        assert_eq!(OpKind::MatMul.name(), "matmul");
    }

    #[test]
    fn test_graph_preserves_insertion_order() {
        let mut graph = Graph::new();
        graph.insert(Callable::new("b"));
        graph.insert(Callable::new("a"));
        let names: Vec<&str> = graph.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(graph.contains("a"));
        assert!(!graph.contains("main_graph"));
    }

    #[test]
    fn test_literal_type_and_count() {
        let lit = Literal::from_ints(vec![2, -1]);
        assert_eq!(lit.ty(), ValueType::fixed(ElemType::I64, &[2]));
        assert_eq!(lit.element_count(), 2);
        assert_eq!(
            Literal::new(ElemType::F32, vec![2, 3, 4]).element_count(),
            24
        );
    }
}
