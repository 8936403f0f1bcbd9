//! Tensor value types and the shape-specificity ordering
//!
//! Every operation result carries a [`ValueType`] at one of four levels of
//! specificity:
//! - `None` — the result produces no value
//! - `Unranked` — element type known, rank unknown
//! - `Ranked` with dynamic dimensions — rank known, some sizes unknown
//! - `Ranked` with all dimensions fixed — fully static
//!
//! Propagation only ever moves a result up this ordering; [`ValueType::refine`]
//! rejects any write that would lower specificity.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Element type of a tensor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemType {
    F32,
    F64,
    I32,
    I64,
    Bool,
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElemType::F32 => "f32",
            ElemType::F64 => "f64",
            ElemType::I32 => "i32",
            ElemType::I64 => "i64",
            ElemType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A single dimension of a ranked tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    /// Size known at import or inference time.
    Fixed(u64),
    /// Size unknown until runtime.
    Dynamic,
}

impl Dim {
    pub fn is_fixed(&self) -> bool {
        matches!(self, Dim::Fixed(_))
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            Dim::Fixed(n) => Some(*n),
            Dim::Dynamic => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Dynamic => f.write_str("?"),
        }
    }
}

/// Dimension vector; most tensors in imported models are rank 4 or below.
pub type Dims = SmallVec<[Dim; 4]>;

/// Position of a [`ValueType`] in the specificity ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Specificity {
    None,
    Unranked,
    RankedDynamic,
    FullyStatic,
}

/// Type carried by one operation result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// The result carries no value.
    None,
    /// Element type known, shape entirely unknown.
    Unranked(ElemType),
    /// Rank known; dimensions may still be dynamic.
    Ranked { elem: ElemType, dims: Dims },
}

impl ValueType {
    /// Ranked type from an explicit dimension list.
    pub fn ranked(elem: ElemType, dims: impl IntoIterator<Item = Dim>) -> Self {
        ValueType::Ranked {
            elem,
            dims: dims.into_iter().collect(),
        }
    }

    /// Fully static ranked type.
    pub fn fixed(elem: ElemType, sizes: &[u64]) -> Self {
        ValueType::Ranked {
            elem,
            dims: sizes.iter().map(|&n| Dim::Fixed(n)).collect(),
        }
    }

    /// Rank-zero (scalar) tensor type; fully static by construction.
    pub fn scalar(elem: ElemType) -> Self {
        ValueType::Ranked {
            elem,
            dims: Dims::new(),
        }
    }

    pub fn elem(&self) -> Option<ElemType> {
        match self {
            ValueType::None => None,
            ValueType::Unranked(elem) => Some(*elem),
            ValueType::Ranked { elem, .. } => Some(*elem),
        }
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            ValueType::Ranked { dims, .. } => Some(dims),
            _ => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims().map(<[Dim]>::len)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ValueType::None)
    }

    pub fn specificity(&self) -> Specificity {
        match self {
            ValueType::None => Specificity::None,
            ValueType::Unranked(_) => Specificity::Unranked,
            ValueType::Ranked { dims, .. } => {
                if dims.iter().all(Dim::is_fixed) {
                    Specificity::FullyStatic
                } else {
                    Specificity::RankedDynamic
                }
            }
        }
    }

    pub fn is_fully_static(&self) -> bool {
        self.specificity() == Specificity::FullyStatic
    }

    /// Whether this type still has unresolved shape information.
    ///
    /// `None`-typed results never need inference; fully static results are
    /// already done.
    pub fn needs_inference(&self) -> bool {
        matches!(
            self.specificity(),
            Specificity::Unranked | Specificity::RankedDynamic
        )
    }

    /// Install `new` unless doing so would lower specificity.
    pub fn refine(&mut self, new: ValueType) {
        if new.specificity() < self.specificity() {
            return;
        }
        *self = new;
    }

    /// Least upper bound of two types describing the same value.
    ///
    /// Disagreement forces the result only as far down the specificity
    /// ordering as necessary: mismatched fixed dimensions go dynamic,
    /// mismatched ranks go unranked. Returns `None` when the two types cannot
    /// describe the same value at all (element-type conflict, or a valueless
    /// type joined with a tensor type).
    pub fn join(&self, other: &ValueType) -> Option<ValueType> {
        match (self, other) {
            (ValueType::None, ValueType::None) => Some(ValueType::None),
            (ValueType::None, _) | (_, ValueType::None) => None,
            _ => {
                let (Some(lhs), Some(rhs)) = (self.elem(), other.elem()) else {
                    return None;
                };
                if lhs != rhs {
                    return None;
                }
                match (self.dims(), other.dims()) {
                    (Some(a), Some(b)) if a.len() == b.len() => {
                        let dims = a
                            .iter()
                            .zip(b)
                            .map(|(x, y)| if x == y { *x } else { Dim::Dynamic })
                            .collect();
                        Some(ValueType::Ranked { elem: lhs, dims })
                    }
                    _ => Some(ValueType::Unranked(lhs)),
                }
            }
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::None => f.write_str("none"),
            ValueType::Unranked(elem) => write!(f, "{elem}[*]"),
            ValueType::Ranked { elem, dims } => {
                write!(f, "{elem}[")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str("x")?;
                    }
                    write!(f, "{dim}")?;
                }
                f.write_str("]")
            }
        }
    }
}
