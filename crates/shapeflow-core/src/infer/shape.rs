//! Shape-manipulating operations: transpose, reshape, concat

use super::{InferCtx, InferenceError, Recurse, ShapeInference};
use shapeflow_ir::{Dim, Dims, ElemType, OpKind, Operation, ValueType};

/// Resolve a possibly-negative axis attribute against a known rank.
pub(crate) fn normalize_axis(axis: i64, rank: usize) -> Result<usize, InferenceError> {
    let idx = if axis < 0 { axis + rank as i64 } else { axis };
    if idx < 0 || idx >= rank as i64 {
        return Err(InferenceError::AxisOutOfRange { axis, rank });
    }
    Ok(idx as usize)
}

/// Transpose with an optional permutation attribute.
///
/// An absent permutation defaults to reversing the dimensions, and the
/// inferred default is written back into the operation. This is why operations
/// whose results are already fully static still get visited when they feed the
/// terminal instruction: the attribute may still be missing.
pub struct TransposeInference;

impl ShapeInference for TransposeInference {
    fn op_name(&self) -> &'static str {
        "transpose"
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        _recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        ctx.expect_operands("transpose", 1)?;
        let input = ctx.operand("transpose", 0)?.clone();
        let ty = match &mut op.kind {
            OpKind::Transpose { perm } => infer_transpose(&input, perm)?,
            _ => return Ok(()),
        };
        op.refine_result(0, ty);
        Ok(())
    }
}

fn infer_transpose(
    input: &ValueType,
    perm: &mut Option<Vec<usize>>,
) -> Result<ValueType, InferenceError> {
    let Some(elem) = input.elem() else {
        return Err(InferenceError::NoneOperand {
            op: "transpose",
            index: 0,
        });
    };
    let Some(dims) = input.dims() else {
        return Ok(ValueType::Unranked(elem));
    };
    let rank = dims.len();
    let p = perm.get_or_insert_with(|| (0..rank).rev().collect());
    if p.len() != rank || !is_permutation(p) {
        return Err(InferenceError::InvalidPermutation {
            op: "transpose",
            rank,
            perm: p.clone(),
        });
    }
    let permuted: Dims = p.iter().map(|&i| dims[i]).collect();
    Ok(ValueType::Ranked {
        elem,
        dims: permuted,
    })
}

fn is_permutation(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    for &i in perm {
        if i >= perm.len() || seen[i] {
            return false;
        }
        seen[i] = true;
    }
    true
}

/// Reshape whose target shape arrives as a constant integer operand.
///
/// Supports `-1` (at most one inferred extent, folded to a fixed size when the
/// input element count is known) and `0` (copy the corresponding input
/// dimension).
pub struct ReshapeInference;

impl ShapeInference for ReshapeInference {
    fn op_name(&self) -> &'static str {
        "reshape"
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        _recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        ctx.expect_operands("reshape", 2)?;
        let data = ctx.operand("reshape", 0)?;
        let Some(elem) = data.elem() else {
            return Err(InferenceError::NoneOperand {
                op: "reshape",
                index: 0,
            });
        };
        let Some(shape) = ctx.constant(1) else {
            return Err(InferenceError::MissingConstant {
                op: "reshape",
                what: "shape",
            });
        };
        let Some(targets) = shape.ints.as_deref() else {
            return Err(InferenceError::MissingConstant {
                op: "reshape",
                what: "integer shape",
            });
        };
        let ty = infer_reshape(data, elem, targets)?;
        op.refine_result(0, ty);
        Ok(())
    }
}

fn infer_reshape(
    data: &ValueType,
    elem: ElemType,
    targets: &[i64],
) -> Result<ValueType, InferenceError> {
    let invalid = || InferenceError::InvalidReshape {
        op: "reshape",
        input: data.to_string(),
        requested: format!("{targets:?}"),
    };

    let mut dims = Dims::with_capacity(targets.len());
    let mut wildcard: Option<usize> = None;
    for (i, &t) in targets.iter().enumerate() {
        match t {
            0 => {
                let copied = data
                    .dims()
                    .and_then(|ds| ds.get(i).copied())
                    .unwrap_or(Dim::Dynamic);
                dims.push(copied);
            }
            -1 => {
                if wildcard.is_some() {
                    return Err(invalid());
                }
                wildcard = Some(i);
                dims.push(Dim::Dynamic);
            }
            t if t > 0 => dims.push(Dim::Fixed(t as u64)),
            _ => return Err(invalid()),
        }
    }

    let total = element_count(data);
    match wildcard {
        Some(w) => {
            let known: Option<u64> = dims
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != w)
                .map(|(_, d)| d.size())
                .product();
            if let (Some(known), Some(total)) = (known, total) {
                if known == 0 || total % known != 0 {
                    return Err(invalid());
                }
                dims[w] = Dim::Fixed(total / known);
            }
        }
        None => {
            let requested: Option<u64> = dims.iter().map(|d| d.size()).product();
            if let (Some(requested), Some(total)) = (requested, total) {
                if requested != total {
                    return Err(invalid());
                }
            }
        }
    }
    Ok(ValueType::Ranked { elem, dims })
}

fn element_count(data: &ValueType) -> Option<u64> {
    data.dims()?.iter().map(|d| d.size()).product()
}

/// Concatenation along a (possibly negative) axis attribute.
pub struct ConcatInference;

impl ShapeInference for ConcatInference {
    fn op_name(&self) -> &'static str {
        "concat"
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        _recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        if ctx.operands.is_empty() {
            return Err(InferenceError::OperandCount {
                op: "concat",
                expected: 1,
                actual: 0,
            });
        }
        let axis = match &op.kind {
            OpKind::Concat { axis } => *axis,
            _ => return Ok(()),
        };

        let first = ctx.operand("concat", 0)?;
        let Some(elem) = first.elem() else {
            return Err(InferenceError::NoneOperand {
                op: "concat",
                index: 0,
            });
        };
        for i in 1..ctx.operands.len() {
            let other = ctx.operand("concat", i)?;
            if let Some(e) = other.elem() {
                if e != elem {
                    return Err(InferenceError::ElemTypeMismatch {
                        op: "concat",
                        lhs: elem,
                        rhs: e,
                    });
                }
            }
        }

        let mut ranked: Vec<&[Dim]> = Vec::with_capacity(ctx.operands.len());
        for ty in &ctx.operands {
            match ty.dims() {
                Some(dims) => ranked.push(dims),
                None => {
                    op.refine_result(0, ValueType::Unranked(elem));
                    return Ok(());
                }
            }
        }
        let rank = ranked[0].len();
        for (index, dims) in ranked.iter().enumerate().skip(1) {
            if dims.len() != rank {
                return Err(InferenceError::RankMismatch {
                    op: "concat",
                    index,
                    expected: rank,
                    actual: dims.len(),
                });
            }
        }
        let axis_idx = normalize_axis(axis, rank)?;

        let mut dims = Dims::with_capacity(rank);
        for d in 0..rank {
            if d == axis_idx {
                let mut sum = 0u64;
                let mut dynamic = false;
                for input in &ranked {
                    match input[d] {
                        Dim::Fixed(n) => sum += n,
                        Dim::Dynamic => dynamic = true,
                    }
                }
                dims.push(if dynamic { Dim::Dynamic } else { Dim::Fixed(sum) });
            } else {
                let mut merged = Dim::Dynamic;
                for (i, input) in ranked.iter().enumerate() {
                    match (merged, input[d]) {
                        (Dim::Dynamic, x) => merged = x,
                        (_, Dim::Dynamic) => {}
                        (Dim::Fixed(a), Dim::Fixed(b)) if a == b => {}
                        (Dim::Fixed(_), Dim::Fixed(_)) => {
                            return Err(InferenceError::IncompatibleShapes {
                                op: "concat",
                                lhs: ctx.operands[0].to_string(),
                                rhs: ctx.operands[i].to_string(),
                            });
                        }
                    }
                }
                dims.push(merged);
            }
        }
        op.refine_result(0, ValueType::Ranked { elem, dims });
        Ok(())
    }
}
