mod common;

use ceval::ast::{BinOp, BuiltinType};
use ceval::ir::builder::VarBuilder;
use ceval::ir::{ExprP, Id, Statement, TyP};
use ceval::{IrCtx, ReasonCode, Value};
use common::{as_int, driver, message, reason, Builders};
use proptest::prelude::*;

/// `int a[len] = {};` followed by `body`, all inside one constexpr function.
fn with_array<'ir>(
    b: &Builders<'ir>,
    len: usize,
    ret: TyP<'ir>,
    body: impl FnOnce(ExprP<'ir>) -> Vec<Statement<'ir>>,
) -> ExprP<'ir> {
    let array_ty = b.types.array(b.int(), len);
    let (a, decl) = b
        .stmts
        .declare("a", array_ty, Some(b.exprs.zero_init(array_ty, None)), false, None);

    let mut statements = vec![decl];
    statements.extend(body(b.exprs.decay(b.exprs.local(a, array_ty, None), None)));

    let f = b.function("f", ret, statements);
    b.call(f, vec![])
}

fn offset<'ir>(b: &Builders<'ir>, ptr: ExprP<'ir>, delta: i128) -> ExprP<'ir> {
    b.exprs.binary(BinOp::Plus, ptr, b.lit(delta), ptr.ty, None)
}

proptest! {
    #[test]
    fn one_past_the_end_can_be_formed_but_not_read(len in 1usize..8, seed in 0usize..64) {
        let i = seed % (len + 1);
        let rest = (len - i) as i128;

        // p + (len - i) == a + len
        let ir = IrCtx::new();
        let b = Builders::new(&ir);
        let call = with_array(&b, len, b.bool(), |a| {
            let p = offset(&b, a, i as i128);
            let past_end = offset(&b, p, rest);
            vec![b.ret(b.exprs.binary(BinOp::Eq, past_end, offset(&b, a, len as i128), b.bool(), None))]
        });
        let value = driver(&ir).evaluate_as_constant(call, b.bool()).unwrap().value;
        prop_assert_eq!(value, Value::Bool(true));

        // *(p + (len - i))
        let ir = IrCtx::new();
        let b = Builders::new(&ir);
        let call = with_array(&b, len, b.int(), |a| {
            let p = offset(&b, a, i as i128);
            vec![b.ret(b.exprs.deref(offset(&b, p, rest), None))]
        });
        let err = driver(&ir).evaluate_as_constant(call, b.int()).unwrap_err();
        prop_assert_eq!(reason(&err), Some(ReasonCode::PastEndAccess));

        // p + (len - i + 1)
        let ir = IrCtx::new();
        let b = Builders::new(&ir);
        let call = with_array(&b, len, b.bool(), |a| {
            let p = offset(&b, a, i as i128);
            let beyond = offset(&b, p, rest + 1);
            vec![b.ret(b.exprs.binary(BinOp::Eq, beyond, a, b.bool(), None))]
        });
        let err = driver(&ir).evaluate_as_constant(call, b.bool()).unwrap_err();
        prop_assert_eq!(reason(&err), Some(ReasonCode::IndexOutOfBounds));
        let expected = format!("element index {} out of bounds for array of {} elements", len + 1, len);
        prop_assert!(message(&err).contains(&expected));
    }
}

#[test]
fn subscripts_write_through_to_the_array() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);

    // a[2] = 7; return a[2] + a[0];
    let call = with_array(&b, 3, b.int(), |a| {
        let a2 = b.exprs.index(a, b.lit(2), None);
        let a0 = b.exprs.index(a, b.lit(0), None);
        vec![
            b.stmts.expr(b.exprs.assign(a2, b.lit(7), None)),
            b.ret(b.exprs.binary(BinOp::Plus, a2, a0, b.int(), None)),
        ]
    });

    let value = driver(&ir).evaluate_as_constant(call, b.int()).unwrap().value;
    assert_eq!(as_int(&value), 7);
}

/// Two locals `x` and `y` and an expression over their addresses.
fn two_locals<'ir>(
    b: &Builders<'ir>,
    ret: TyP<'ir>,
    body: impl FnOnce(ExprP<'ir>, ExprP<'ir>) -> ExprP<'ir>,
) -> ExprP<'ir> {
    let int = b.int();
    let (x, decl_x): (Id, _) = b.stmts.declare("x", int, Some(b.lit(1)), false, None);
    let (y, decl_y): (Id, _) = b.stmts.declare("y", int, Some(b.lit(2)), false, None);
    let px = b.exprs.address_of(b.exprs.local(x, int, None), None);
    let py = b.exprs.address_of(b.exprs.local(y, int, None), None);

    let f = b.function("f", ret, vec![decl_x, decl_y, b.ret(body(px, py))]);
    b.call(f, vec![])
}

#[test]
fn unrelated_pointers_cannot_be_subtracted() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let long = b.types.builtin(BuiltinType::Long);

    let call = two_locals(&b, long, |px, py| b.exprs.binary(BinOp::Minus, px, py, long, None));
    let err = driver(&ir).evaluate_as_constant(call, long).unwrap_err();

    assert_eq!(reason(&err), Some(ReasonCode::PointerDifferenceUnrelated));
}

#[test]
fn ordering_unrelated_objects_is_unspecified() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);

    let call = two_locals(&b, b.bool(), |px, py| b.exprs.binary(BinOp::Lt, px, py, b.bool(), None));
    let driver = driver(&ir);

    let err = driver.evaluate_as_constant(call, b.bool()).unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::UnspecifiedComparison));
    assert!(message(&err).contains("between pointers to unrelated objects '&x' and '&y'"));

    // Folding answers with the allocation order
    let folded = driver.try_fold(call).unwrap();
    assert_eq!(folded.value, Value::Bool(true));
    assert_eq!(folded.tolerated.len(), 1);

    // Equality of distinct objects is well defined
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let call = two_locals(&b, b.bool(), |px, py| b.exprs.binary(BinOp::Eq, px, py, b.bool(), None));
    let value = common::driver(&ir).evaluate_as_constant(call, b.bool()).unwrap().value;
    assert_eq!(value, Value::Bool(false));
}

#[test]
fn pointers_to_locals_do_not_escape() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int_ptr = b.types.pointer(b.int(), false);

    let call = two_locals(&b, int_ptr, |px, _| px);
    let err = driver(&ir).evaluate_as_constant(call, int_ptr).unwrap_err();

    assert_eq!(reason(&err), Some(ReasonCode::PointerToLocal));
    assert!(message(&err).contains("pointer to 'x'"));
}

#[test]
fn address_of_a_constexpr_variable_is_constant() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int = b.int();

    let mut g = VarBuilder::new(&ir, "g", int);
    g.constexpr();
    let g = g.build(Some(b.lit(5)));

    let ptr = b.exprs.address_of(b.exprs.global(g, int, None), None);
    let value = driver(&ir).evaluate_as_constant(ptr, ptr.ty).unwrap().value;
    let Value::Pointer(p) = value else {
        panic!("expected a pointer");
    };
    assert!(p.path.is_empty());

    let read = b.exprs.deref(ptr, None);
    let value = common::driver(&ir).evaluate_as_constant(read, int).unwrap().value;
    assert_eq!(as_int(&value), 5);
}

#[test]
fn non_constexpr_globals_are_not_readable() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int = b.int();

    let g = VarBuilder::new(&ir, "g", int).build(Some(b.lit(5)));
    let err = driver(&ir)
        .evaluate_as_constant(b.exprs.global(g, int, None), int)
        .unwrap_err();

    assert_eq!(reason(&err), Some(ReasonCode::NonConstexprVariable));
    assert_eq!(
        err.primary().unwrap().notes().collect::<Vec<_>>(),
        vec!["'g' declared here"]
    );
}

#[test]
fn const_integral_globals_are_usable() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int = b.int();

    let mut g = VarBuilder::new(&ir, "g", int);
    g.constant();
    let g = g.build(Some(b.lit(5)));

    let sum = b.exprs.binary(BinOp::Plus, b.exprs.global(g, int, None), b.lit(1), int, None);
    let value = driver(&ir).evaluate_as_constant(sum, int).unwrap().value;
    assert_eq!(as_int(&value), 6);
}

#[test]
fn null_dereference_is_diagnosed() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int_ptr = b.types.pointer(b.int(), false);

    let read = b.exprs.deref(b.exprs.null(int_ptr, None), None);
    let err = driver(&ir).evaluate_as_constant(read, b.int()).unwrap_err();

    assert_eq!(reason(&err), Some(ReasonCode::NullDereference));
}

#[test]
fn string_literals_are_char_arrays() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let char_ty = b.types.builtin(BuiltinType::Char);

    let s = b.exprs.decay(b.exprs.string(b"abc", None), None);
    let at = |i: i128| b.exprs.index(s, b.lit(i), None);

    let value = driver(&ir).evaluate_as_constant(at(1), char_ty).unwrap().value;
    assert_eq!(as_int(&value), b'b' as i128);

    // The terminator is part of the array, one more is past the end
    let value = common::driver(&ir).evaluate_as_constant(at(3), char_ty).unwrap().value;
    assert_eq!(as_int(&value), 0);
    let err = common::driver(&ir).evaluate_as_constant(at(4), char_ty).unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::PastEndAccess));

    let write = b.exprs.assign(at(0), b.exprs.int(120, char_ty, None), None);
    let err = common::driver(&ir).evaluate_as_constant(write, char_ty).unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::ModifyConst));
}
