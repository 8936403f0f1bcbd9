//! Propagation through control-flow operations that own nested callables
//!
//! The conditional's inference recurses into both branch bodies through the
//! driver-supplied callback, so branch signatures are finalized before the
//! conditional's own result types are joined from them.

use shapeflow_core::ShapeInferencePass;
use shapeflow_ir::{
    Callable, DiagnosticBuffer, DiagnosticKind, ElemType, Literal, OpKind, ValueType,
    ENTRY_CALLABLE,
};

fn constant_branch(name: &str, sizes: &[u64]) -> Callable {
    let mut f = Callable::new(name);
    let c = f.append(
        OpKind::Constant {
            value: Literal::new(ElemType::F32, sizes.to_vec()),
        },
        vec![],
        vec![ValueType::Unranked(ElemType::F32)],
    );
    f.append(OpKind::Return, vec![c], vec![]);
    f
}

fn conditional_main(then_branch: Callable, else_branch: Callable) -> Callable {
    let mut main = Callable::new(ENTRY_CALLABLE);
    let cond = main.push_param("cond", ValueType::scalar(ElemType::Bool));
    let result = main.append(
        OpKind::If {
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        },
        vec![cond],
        vec![ValueType::Unranked(ElemType::F32)],
    );
    main.append(OpKind::Return, vec![result], vec![]);
    main
}

#[test]
fn test_agreeing_branches_resolve_the_conditional() {
    let mut main = conditional_main(
        constant_branch("then", &[2, 3]),
        constant_branch("else", &[2, 3]),
    );

    let mut sink = DiagnosticBuffer::new();
    let report = ShapeInferencePass::new().run_on_callable(&mut main, &mut sink);
    assert!(report.is_resolved(), "{:?}", sink.diagnostics);
    assert_eq!(main.results, vec![ValueType::fixed(ElemType::F32, &[2, 3])]);

    // Nested propagation finalized both branch signatures in place.
    let OpKind::If {
        then_branch,
        else_branch,
    } = &main.body[0].kind
    else {
        panic!("conditional was rewritten");
    };
    assert_eq!(
        then_branch.results,
        vec![ValueType::fixed(ElemType::F32, &[2, 3])]
    );
    assert_eq!(
        else_branch.results,
        vec![ValueType::fixed(ElemType::F32, &[2, 3])]
    );
}

#[test]
fn test_disagreeing_branches_leave_dynamic_dims() {
    let mut main = conditional_main(
        constant_branch("then", &[2, 3]),
        constant_branch("else", &[2, 4]),
    );

    let mut sink = DiagnosticBuffer::new();
    let report = ShapeInferencePass::new().run_on_callable(&mut main, &mut sink);

    // The join is rank-preserving but dynamic in the disagreeing dimension,
    // so the sweep cannot fully resolve the conditional.
    assert_eq!(report.op_errors, 0);
    assert_eq!(report.unresolved, 1);
    assert_eq!(main.body[0].results[0].to_string(), "f32[2x?]");

    let unresolved: Vec<_> = sink
        .of_kind(|k| matches!(k, DiagnosticKind::UnresolvedShapes { .. }))
        .collect();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].location.callable(), ENTRY_CALLABLE);
}

#[test]
fn test_branch_failure_surfaces_with_branch_location() {
    let mut stuck = Callable::new("then");
    let x = stuck.append(
        OpKind::Custom {
            name: "vendor.mystery".to_string(),
        },
        vec![],
        vec![ValueType::Unranked(ElemType::F32)],
    );
    stuck.append(OpKind::Return, vec![x], vec![]);

    let mut main = conditional_main(stuck, constant_branch("else", &[2, 3]));

    let mut sink = DiagnosticBuffer::new();
    let report = ShapeInferencePass::new().run_on_callable(&mut main, &mut sink);

    // The nested walk reported against the branch, the outer walk against the
    // enclosing callable.
    let branch_diags: Vec<_> = sink
        .iter()
        .filter(|d| d.location.callable() == "then")
        .collect();
    assert!(branch_diags
        .iter()
        .any(|d| d.kind == DiagnosticKind::CapabilityMissing));
    assert!(branch_diags
        .iter()
        .any(|d| matches!(d.kind, DiagnosticKind::UnresolvedShapes { .. })));

    // Joining a static signature with an unresolved one degrades to unranked,
    // so the conditional itself also stays unresolved.
    assert_eq!(report.unresolved, 1);
    assert_eq!(
        main.body[0].results[0],
        ValueType::Unranked(ElemType::F32)
    );
}

#[test]
fn test_mismatched_branch_counts_are_a_contradiction() {
    let mut empty = Callable::new("then");
    empty.append(OpKind::Return, vec![], vec![]);

    let mut main = conditional_main(empty, constant_branch("else", &[2, 3]));

    let mut sink = DiagnosticBuffer::new();
    let report = ShapeInferencePass::new().run_on_callable(&mut main, &mut sink);
    assert_eq!(report.op_errors, 1);
    let contradictions: Vec<_> = sink
        .of_kind(|k| matches!(k, DiagnosticKind::InferenceContradiction))
        .collect();
    assert_eq!(contradictions.len(), 1);
    assert!(contradictions[0].message.contains("branches"));
}

#[test]
fn test_nested_conditionals_recurse_all_the_way_down() {
    let inner = conditional_inner("inner_then", "inner_else");
    let mut outer_then = Callable::new("outer_then");
    let cond = outer_then.push_param("cond", ValueType::scalar(ElemType::Bool));
    let r = outer_then.append(
        OpKind::If {
            then_branch: Box::new(inner.0),
            else_branch: Box::new(inner.1),
        },
        vec![cond],
        vec![ValueType::Unranked(ElemType::F32)],
    );
    outer_then.append(OpKind::Return, vec![r], vec![]);

    let mut main = conditional_main(outer_then, constant_branch("outer_else", &[5]));

    let mut sink = DiagnosticBuffer::new();
    let report = ShapeInferencePass::new().run_on_callable(&mut main, &mut sink);
    assert!(report.is_resolved(), "{:?}", sink.diagnostics);
    assert_eq!(main.results, vec![ValueType::fixed(ElemType::F32, &[5])]);
}

fn conditional_inner(then_name: &str, else_name: &str) -> (Callable, Callable) {
    (
        constant_branch(then_name, &[5]),
        constant_branch(else_name, &[5]),
    )
}
