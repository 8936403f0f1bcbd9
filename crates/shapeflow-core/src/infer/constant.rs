//! Constants evaluate to the fully static type of their payload.

use super::{InferCtx, InferenceError, Recurse, ShapeInference};
use shapeflow_ir::{OpKind, Operation};

pub struct ConstantInference;

impl ShapeInference for ConstantInference {
    fn op_name(&self) -> &'static str {
        "constant"
    }

    fn infer_shapes(
        &self,
        op: &mut Operation,
        _ctx: &InferCtx,
        _recurse: Recurse<'_>,
    ) -> Result<(), InferenceError> {
        let ty = match &op.kind {
            OpKind::Constant { value } => value.ty(),
            _ => return Ok(()),
        };
        op.refine_result(0, ty);
        Ok(())
    }
}
