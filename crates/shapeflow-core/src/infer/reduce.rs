//! Reduction operations.

use super::shape::normalize_axis;
use super::{InferCtx, InferenceError, Recurse, ShapeInference};
use shapeflow_ir::{Dim, Dims, OpKind, Operation, ValueType};

/// Mean reduction over an optional axis list.
///
/// Absent axes reduce every dimension; `keep_dims` keeps reduced dimensions
/// around with extent 1 so downstream broadcasting still lines up.
pub struct ReduceMeanInference;

impl ShapeInference for ReduceMeanInference {
    fn op_name(&self) -> &'static str {
        "reduce_mean"
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        _recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        ctx.expect_operands("reduce_mean", 1)?;
        let input = ctx.operand("reduce_mean", 0)?.clone();
        let (axes, keep_dims) = match &op.kind {
            OpKind::ReduceMean { axes, keep_dims } => (axes.clone(), *keep_dims),
            _ => return Ok(()),
        };
        let Some(elem) = input.elem() else {
            return Err(InferenceError::NoneOperand {
                op: "reduce_mean",
                index: 0,
            });
        };
        let Some(dims) = input.dims() else {
            op.refine_result(0, ValueType::Unranked(elem));
            return Ok(());
        };

        let rank = dims.len();
        let reduced = match axes {
            None => vec![true; rank],
            Some(axes) => {
                let mut mask = vec![false; rank];
                for &axis in &axes {
                    mask[normalize_axis(axis, rank)?] = true;
                }
                mask
            }
        };

        let mut out = Dims::new();
        for (i, &dim) in dims.iter().enumerate() {
            if reduced[i] {
                if keep_dims {
                    out.push(Dim::Fixed(1));
                }
            } else {
                out.push(dim);
            }
        }
        op.refine_result(0, ValueType::Ranked { elem, dims: out });
        Ok(())
    }
}
