//! Batched matrix product shape inference.

use super::elementwise::{broadcast_dims, unify_elem};
use super::{InferCtx, InferenceError, Recurse, ShapeInference};
use shapeflow_ir::{Dim, Dims, Operation, ValueType};

pub struct MatMulInference;

impl ShapeInference for MatMulInference {
    fn op_name(&self) -> &'static str {
        "matmul"
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        _recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        ctx.expect_operands("matmul", 2)?;
        let lhs = ctx.operand("matmul", 0)?;
        let rhs = ctx.operand("matmul", 1)?;
        let elem = unify_elem("matmul", lhs, rhs)?;

        let (Some(a), Some(b)) = (lhs.dims(), rhs.dims()) else {
            op.refine_result(0, ValueType::Unranked(elem));
            return Ok(());
        };
        for (index, dims) in [(0, a), (1, b)] {
            if dims.len() < 2 {
                return Err(InferenceError::RankMismatch {
                    op: "matmul",
                    index,
                    expected: 2,
                    actual: dims.len(),
                });
            }
        }

        let m = a[a.len() - 2];
        let k_lhs = a[a.len() - 1];
        let k_rhs = b[b.len() - 2];
        let n = b[b.len() - 1];
        if let (Dim::Fixed(x), Dim::Fixed(y)) = (k_lhs, k_rhs) {
            if x != y {
                return Err(InferenceError::IncompatibleShapes {
                    op: "matmul",
                    lhs: lhs.to_string(),
                    rhs: rhs.to_string(),
                });
            }
        }

        let batch = broadcast_dims(&a[..a.len() - 2], &b[..b.len() - 2]).ok_or_else(|| {
            InferenceError::IncompatibleShapes {
                op: "matmul",
                lhs: lhs.to_string(),
                rhs: rhs.to_string(),
            }
        })?;
        let mut dims: Dims = batch;
        dims.push(m);
        dims.push(n);
        op.refine_result(0, ValueType::Ranked { elem, dims });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapeflow_ir::{ElemType, OpKind, ValueRef};
    use smallvec::SmallVec;

    fn run(lhs: ValueType, rhs: ValueType) -> Result<ValueType, InferenceError> {
        let mut op = Operation::new(
            OpKind::MatMul,
            vec![ValueRef::Param(0), ValueRef::Param(1)],
        )
        .with_results(vec![ValueType::Unranked(ElemType::F32)]);
        let ctx = InferCtx {
            operands: SmallVec::from_vec(vec![lhs, rhs]),
            constants: SmallVec::from_vec(vec![None, None]),
        };
        let mut recurse = |_: &mut shapeflow_ir::Callable| {};
        MatMulInference.infer_shapes(&mut op, &ctx, &mut recurse)?;
        Ok(op.results[0].clone())
    }

    fn fixed(sizes: &[u64]) -> ValueType {
        ValueType::fixed(ElemType::F32, sizes)
    }

    #[test]
    fn test_plain_2d() {
        assert_eq!(run(fixed(&[2, 3]), fixed(&[3, 5])).unwrap(), fixed(&[2, 5]));
    }

    #[test]
    fn test_batched_with_broadcast() {
        assert_eq!(
            run(fixed(&[8, 2, 3]), fixed(&[3, 5])).unwrap(),
            fixed(&[8, 2, 5])
        );
        assert_eq!(
            run(fixed(&[1, 2, 3]), fixed(&[8, 3, 5])).unwrap(),
            fixed(&[8, 2, 5])
        );
    }

    #[test]
    fn test_dynamic_inner_dim_matches_anything() {
        let lhs = ValueType::ranked(ElemType::F32, [Dim::Fixed(2), Dim::Dynamic]);
        assert_eq!(run(lhs, fixed(&[3, 5])).unwrap(), fixed(&[2, 5]));
    }

    #[test]
    fn test_inner_dim_conflict() {
        let err = run(fixed(&[2, 3]), fixed(&[4, 5])).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::IncompatibleShapes { op: "matmul", .. }
        ));
    }

    #[test]
    fn test_rank_too_low() {
        let err = run(fixed(&[3]), fixed(&[3, 5])).unwrap_err();
        assert_eq!(
            err,
            InferenceError::RankMismatch {
                op: "matmul",
                index: 0,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_unranked_operand_partial_refinement() {
        assert_eq!(
            run(ValueType::Unranked(ElemType::F32), fixed(&[3, 5])).unwrap(),
            ValueType::Unranked(ElemType::F32)
        );
    }
}
