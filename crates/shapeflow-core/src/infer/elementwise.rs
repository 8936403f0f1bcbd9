//! Elementwise operations: binary broadcasting, unary passthrough, casts

use super::{InferCtx, InferenceError, Recurse, ShapeInference};
use shapeflow_ir::{Dim, Dims, ElemType, OpKind, Operation, ValueType};

/// Binary elementwise arithmetic with NumPy-style broadcasting. One handler
/// instance per kind name (`add`, `sub`, `mul`, `div`).
pub struct BinaryElementwise {
    name: &'static str,
}

impl BinaryElementwise {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl ShapeInference for BinaryElementwise {
    fn op_name(&self) -> &'static str {
        self.name
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        _recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        ctx.expect_operands(self.name, 2)?;
        let lhs = ctx.operand(self.name, 0)?;
        let rhs = ctx.operand(self.name, 1)?;
        let ty = broadcast(self.name, lhs, rhs)?;
        op.refine_result(0, ty);
        Ok(())
    }
}

/// Unary elementwise operations preserve their operand's type exactly.
pub struct UnaryElementwise {
    name: &'static str,
}

impl UnaryElementwise {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl ShapeInference for UnaryElementwise {
    fn op_name(&self) -> &'static str {
        self.name
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        _recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        ctx.expect_operands(self.name, 1)?;
        let ty = ctx.operand(self.name, 0)?.clone();
        op.refine_result(0, ty);
        Ok(())
    }
}

/// Shape passthrough with the element type replaced by the target attribute.
pub struct CastInference;

impl ShapeInference for CastInference {
    fn op_name(&self) -> &'static str {
        "cast"
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        _recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        ctx.expect_operands("cast", 1)?;
        let input = ctx.operand("cast", 0)?.clone();
        let ty = match &op.kind {
            OpKind::Cast { to } => match input.dims() {
                Some(dims) => ValueType::Ranked {
                    elem: *to,
                    dims: dims.iter().copied().collect(),
                },
                None => ValueType::Unranked(*to),
            },
            _ => return Ok(()),
        };
        op.refine_result(0, ty);
        Ok(())
    }
}

/// Broadcast two operand types to their common result type.
///
/// Either side unranked leaves the result unranked; that still refines an
/// unknown result's element type, so it is not a failure.
pub(crate) fn broadcast(
    op: &'static str,
    lhs: &ValueType,
    rhs: &ValueType,
) -> Result<ValueType, InferenceError> {
    let elem = unify_elem(op, lhs, rhs)?;
    let (Some(a), Some(b)) = (lhs.dims(), rhs.dims()) else {
        return Ok(ValueType::Unranked(elem));
    };
    let dims = broadcast_dims(a, b).ok_or_else(|| InferenceError::IncompatibleShapes {
        op,
        lhs: lhs.to_string(),
        rhs: rhs.to_string(),
    })?;
    Ok(ValueType::Ranked { elem, dims })
}

/// Right-aligned dimension broadcast; `None` on a fixed-size conflict.
pub(crate) fn broadcast_dims(a: &[Dim], b: &[Dim]) -> Option<Dims> {
    let rank = a.len().max(b.len());
    let mut dims = Dims::with_capacity(rank);
    for i in 0..rank {
        let x = padded(a, rank, i);
        let y = padded(b, rank, i);
        dims.push(broadcast_dim(x, y)?);
    }
    Some(dims)
}

fn padded(dims: &[Dim], rank: usize, i: usize) -> Dim {
    let offset = rank - dims.len();
    if i < offset {
        Dim::Fixed(1)
    } else {
        dims[i - offset]
    }
}

fn broadcast_dim(x: Dim, y: Dim) -> Option<Dim> {
    match (x, y) {
        (Dim::Fixed(1), d) | (d, Dim::Fixed(1)) => Some(d),
        (Dim::Fixed(a), Dim::Fixed(b)) if a == b => Some(Dim::Fixed(a)),
        (Dim::Fixed(_), Dim::Fixed(_)) => None,
        (Dim::Dynamic, Dim::Fixed(n)) | (Dim::Fixed(n), Dim::Dynamic) => Some(Dim::Fixed(n)),
        (Dim::Dynamic, Dim::Dynamic) => Some(Dim::Dynamic),
    }
}

pub(crate) fn unify_elem(
    op: &'static str,
    lhs: &ValueType,
    rhs: &ValueType,
) -> Result<ElemType, InferenceError> {
    let (Some(a), Some(b)) = (lhs.elem(), rhs.elem()) else {
        return Err(InferenceError::NoneOperand { op, index: 0 });
    };
    if a != b {
        return Err(InferenceError::ElemTypeMismatch { op, lhs: a, rhs: b });
    }
    Ok(a)
}
