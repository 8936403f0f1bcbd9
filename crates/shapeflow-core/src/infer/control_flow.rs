//! Control-flow operations that own nested callables.

use super::{InferCtx, InferenceError, Recurse, ShapeInference};
use shapeflow_ir::{ElemType, OpKind, Operation, ValueType};

/// Conditional with two owned branch callables.
///
/// Propagation runs to completion inside each branch (through the recursion
/// callback) before the conditional's own results are typed; the result types
/// are then the per-position joins of the two finalized branch signatures.
pub struct IfInference;

impl ShapeInference for IfInference {
    fn op_name(&self) -> &'static str {
        "if"
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        ctx: &InferCtx,
        recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        ctx.expect_operands("if", 1)?;
        let cond = ctx.operand("if", 0)?;
        if let Some(elem) = cond.elem() {
            if elem != ElemType::Bool {
                return Err(InferenceError::ElemTypeMismatch {
                    op: "if",
                    lhs: elem,
                    rhs: ElemType::Bool,
                });
            }
        }

        let joined: Vec<ValueType> = match &mut op.kind {
            OpKind::If {
                then_branch,
                else_branch,
            } => {
                recurse(then_branch);
                recurse(else_branch);

                if then_branch.results.len() != else_branch.results.len() {
                    return Err(InferenceError::BranchMismatch {
                        op: "if",
                        then_count: then_branch.results.len(),
                        else_count: else_branch.results.len(),
                    });
                }
                then_branch
                    .results
                    .iter()
                    .zip(&else_branch.results)
                    .enumerate()
                    .map(|(index, (then_ty, else_ty))| {
                        then_ty.join(else_ty).ok_or_else(|| {
                            InferenceError::BranchTypeConflict {
                                op: "if",
                                index,
                                lhs: then_ty.to_string(),
                                rhs: else_ty.to_string(),
                            }
                        })
                    })
                    .collect::<Result<_, _>>()?
            }
            _ => return Ok(()),
        };

        if op.results.len() != joined.len() {
            return Err(InferenceError::ResultCountMismatch {
                op: "if",
                declared: op.results.len(),
                produced: joined.len(),
            });
        }
        for (index, ty) in joined.into_iter().enumerate() {
            op.refine_result(index, ty);
        }
        Ok(())
    }
}
