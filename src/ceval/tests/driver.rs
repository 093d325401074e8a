mod common;

use std::path::PathBuf;

use ceval::ast::{BinOp, Span};
use ceval::ir::const_eval::value::IntValue;
use ceval::{CodeDiagnostic, Driver, EvalError, EvalOptions, GlobalCtx, IrCtx, Value};
use common::{as_int, driver, reason, Builders};

#[test]
fn static_assert_holds() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);

    let sum = b.exprs.binary(BinOp::Plus, b.lit(1), b.lit(1), b.int(), None);
    let cond = b.exprs.binary(BinOp::Eq, sum, b.lit(2), b.bool(), None);

    let driver = driver(&ir);
    driver.static_assert(cond, None, None).unwrap();
    assert!(!driver.global_ctx().diag().has_errors());
}

#[test]
fn failed_static_assert_carries_the_message() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let cond = b.exprs.binary(BinOp::Eq, b.lit(1), b.lit(2), b.bool(), None);
    let driver = driver(&ir);

    let err = driver.static_assert(cond, None, None).unwrap_err();
    assert_eq!(err.primary().unwrap().kind, CodeDiagnostic::StaticAssertFailed);
    assert_eq!(err.to_string(), "static assertion failed");

    let err = driver
        .static_assert(cond, Some("arithmetic is broken"), None)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "static assertion failed: arithmetic is broken"
    );
    assert_eq!(driver.global_ctx().diag().error_count(), 2);
}

#[test]
fn static_assert_is_strict_even_when_folding_is_the_default() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);

    // static_assert(0x7fffffff + 1 < 0);
    let overflow = b.exprs.binary(BinOp::Plus, b.lit(i32::MAX as i128), b.lit(1), b.int(), None);
    let cond = b.exprs.binary(BinOp::Lt, overflow, b.lit(0), b.bool(), None);

    let ctx = GlobalCtx::default();
    ctx.set_mode(ceval::EvalMode::Fold);
    let driver = Driver::new(ctx, &ir);

    let err = driver.static_assert(cond, None, None).unwrap_err();
    assert_eq!(reason(&err), Some(ceval::ReasonCode::OutOfRange));
    // The same expression folds
    assert_eq!(driver.try_fold(cond).unwrap().value, Value::Bool(true));
}

#[test]
fn static_assert_needs_a_boolean_condition() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int_ptr = b.types.pointer(b.int(), false);

    let err = driver(&ir)
        .static_assert(b.exprs.null(int_ptr, None), None, None)
        .unwrap_err();
    assert!(matches!(
        err.primary().unwrap().kind,
        CodeDiagnostic::TypeMismatch(_, _)
    ));
}

#[test]
fn expected_type_must_match() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let driver = driver(&ir);

    let err = driver.evaluate_as_constant(b.lit(1), b.bool()).unwrap_err();
    assert_eq!(
        err.primary().unwrap().kind,
        CodeDiagnostic::TypeMismatch("int".to_string(), "bool".to_string())
    );
    assert_eq!(driver.global_ctx().diag().error_count(), 1);
}

#[test]
fn calls_take_evaluated_arguments() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let mul = b.binary_function("mul", |x, y| b.exprs.binary(BinOp::Mul, x, y, b.int(), None));

    let args = vec![
        Value::Int(IntValue::new(6, 32, true)),
        Value::Int(IntValue::new(-7, 32, true)),
    ];
    let result = driver(&ir).evaluate_call(mul, args).unwrap();
    assert_eq!(as_int(&result.value), -42);
}

#[test]
fn report_lists_the_call_chain() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let shls = b.binary_function("shls", |x, y| {
        b.exprs.binary(BinOp::LShift, x, y, b.int(), None)
    });

    let ctx = GlobalCtx::default();
    let file = ctx.diag().add_file(PathBuf::from("lib.cpp"));
    let driver = Driver::new(ctx.clone(), &ir);

    let span = Span::new(file, 40, 52, 2, 4);
    let call = b
        .exprs
        .call_function(shls, [b.lit(1), b.lit(200)], Some(span));
    assert!(driver.evaluate_as_constant(call, b.int()).is_err());

    colored::control::set_override(false);
    let report = ctx.diag().render_report();
    assert!(report.contains(
        "error: expression is not a constant expression: shift count 200 >= width of type (32 bits)"
    ));
    assert!(report.contains("in call to 'shls(1, 200)'"));
    assert!(report.contains("lib.cpp:3:5"));
}

#[test]
fn requests_are_independent() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let div = b.binary_function("div", |x, y| b.exprs.binary(BinOp::Div, x, y, b.int(), None));
    let driver = driver(&ir);

    assert!(driver
        .evaluate_as_constant(b.call(div, vec![b.lit(1), b.lit(0)]), b.int())
        .is_err());

    let value = driver
        .evaluate_as_constant(b.call(div, vec![b.lit(9), b.lit(3)]), b.int())
        .unwrap()
        .value;
    assert_eq!(as_int(&value), 3);
    assert_eq!(driver.global_ctx().diag().error_count(), 1);
}

#[test]
fn malformed_options_are_a_configuration_error() {
    let err = EvalOptions::from_json(r#"{ "max_depth": "deep" }"#).unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));
    assert!(err.primary().is_none());
}
