mod common;

use ceval::ast::BinOp;
use ceval::ir::builder::{FunctionBuilder, RecordBuilder, VarBuilder};
use ceval::ir::{CtorInitializer, Designator, ExprP, Id, ItemP, MethodKind, RecordKind, TyP};
use ceval::{IrCtx, ReasonCode, Value};
use common::{as_int, driver, message, reason, Builders};
use proptest::prelude::*;

/// `struct Point { int x; int y; constexpr Point(int a, int b) : x(a), y(b) {} };`
fn point<'ir>(b: &Builders<'ir>) -> (ItemP<'ir>, ItemP<'ir>, Id, Id) {
    let int = b.int();
    let mut point = RecordBuilder::new(b.ir, "Point", RecordKind::Struct);
    let x = point.field("x", int);
    let y = point.field("y", int);

    let mut ctor = FunctionBuilder::new(b.ir, "Point", b.void());
    ctor.method(point.item(), MethodKind::Constructor);
    let pa = ctor.param("a", int);
    let pb = ctor.param("b", int);
    let ctor = ctor
        .build_with_initializers(
            vec![
                CtorInitializer::Field(x, b.exprs.local(pa, int, None)),
                CtorInitializer::Field(y, b.exprs.local(pb, int, None)),
            ],
            vec![],
        )
        .unwrap();
    point.method(ctor);

    (point.finish(), ctor, x, y)
}

proptest! {
    #[test]
    fn constructed_fields_read_back_in_declaration_order(x in any::<i32>(), y in any::<i32>()) {
        let ir = IrCtx::new();
        let b = Builders::new(&ir);
        let (point, ctor, _, field_y) = point(&b);
        let point_ty = b.types.record(point);

        let construct = b.exprs.construct(ctor, [b.lit(x as i128), b.lit(y as i128)], point_ty, None);
        let value = driver(&ir).evaluate_as_constant(construct, point_ty).unwrap().value;

        let fields: Vec<_> = value.fields().unwrap().iter().map(as_int).collect();
        prop_assert_eq!(fields, vec![x as i128, y as i128]);

        let read_y = b.exprs.field(construct, field_y, b.int(), None);
        let value = driver(&ir).evaluate_as_constant(read_y, b.int()).unwrap().value;
        prop_assert_eq!(as_int(&value), y as i128);
    }
}

#[test]
fn defaulted_constructor_leaves_members_uninitialized() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int = b.int();

    // struct Q { int x; int y = 5; constexpr Q() = default; };
    let mut q = RecordBuilder::new(&ir, "Q", RecordKind::Struct);
    q.field("x", int);
    q.field_with_default("y", int, b.lit(5));
    let mut ctor = FunctionBuilder::new(&ir, "Q", b.void());
    ctor.method(q.item(), MethodKind::Constructor).defaulted();
    let ctor = ctor.declare();
    q.method(ctor);
    let q = q.finish();
    let q_ty = b.types.record(q);

    let err = driver(&ir)
        .evaluate_as_constant(b.exprs.construct(ctor, Vec::new(), q_ty, None), q_ty)
        .unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::UninitializedSubobject));
    assert!(message(&err).contains("subobject of type 'int' is not initialized"));

    // Value-initialization zeroes first
    let value = common::driver(&ir)
        .evaluate_as_constant(b.exprs.zero_init(q_ty, None), q_ty)
        .unwrap()
        .value;
    let fields: Vec<_> = value.fields().unwrap().iter().map(as_int).collect();
    assert_eq!(fields, vec![0, 5]);
}

#[test]
fn designated_initializers_zero_fill_the_rest() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int = b.int();
    let int3 = b.types.array(int, 3);

    // constexpr S s = { .b = 2, .c = { 1 } };
    let mut s = RecordBuilder::new(&ir, "S", RecordKind::Struct);
    s.field("a", int);
    let field_b = s.field("b", int);
    let field_c = s.field("c", int3);
    let s = s.finish();
    let s_ty = b.types.record(s);

    let init = b.exprs.aggregate(
        vec![
            b.exprs.designated(&[Designator::Field(field_b)], b.lit(2)),
            b.exprs
                .designated(&[Designator::Field(field_c)], b.exprs.list([b.lit(1)], int3, None)),
        ],
        s_ty,
        None,
    );
    let mut var = VarBuilder::new(&ir, "s", s_ty);
    var.constexpr();
    let var = var.build(Some(init));

    let value = driver(&ir)
        .evaluate_as_constant_initializer(var)
        .unwrap()
        .value;
    let fields = value.fields().unwrap();
    assert_eq!(as_int(&fields[0]), 0);
    assert_eq!(as_int(&fields[1]), 2);
    let c: Vec<_> = fields[2].elements().unwrap().iter().map(as_int).collect();
    assert_eq!(c, vec![1, 0, 0]);
}

#[test]
fn self_referential_array_initializer_is_outside_its_lifetime() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int2 = b.types.array(b.int(), 2);

    // constexpr int a[2] = { a[1] + 1, a[0] + 1 };
    let mut var = VarBuilder::new(&ir, "a", int2);
    var.constexpr();
    let a = b.exprs.decay(b.exprs.global(var.item(), int2, None), None);
    let element = |i: i128| {
        b.exprs.binary(
            BinOp::Plus,
            b.exprs.index(a, b.lit(i), None),
            b.lit(1),
            b.int(),
            None,
        )
    };
    let var = var.build(Some(b.exprs.list([element(1), element(0)], int2, None)));

    let err = driver(&ir).evaluate_as_constant_initializer(var).unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::ReadOutsideLifetime));
    assert!(message(&err).contains("read of object outside its lifetime"));
}

/// `constexpr Point ps[2] = { first, second };` where both may read `ps`.
fn points_referring_to_each_other<'ir>(
    b: &Builders<'ir>,
    point_ty: TyP<'ir>,
    init: impl Fn(ExprP<'ir>) -> [ExprP<'ir>; 2],
) -> ItemP<'ir> {
    let points_ty = b.types.array(point_ty, 2);

    let mut var = VarBuilder::new(b.ir, "ps", points_ty);
    var.constexpr();
    let ps = b.exprs.decay(b.exprs.global(var.item(), points_ty, None), None);
    let [first, second] = init(ps);
    var.build(Some(b.exprs.list([first, second], points_ty, None)))
}

#[test]
fn class_array_elements_begin_their_lifetime_in_order() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let (point, ctor, x, _) = point(&b);
    let point_ty = b.types.record(point);
    let x_of = |ps, i| b.exprs.field(b.exprs.index(ps, b.lit(i), None), x, b.int(), None);

    // { Point(ps[1].x, 0), Point(1, 2) }
    let forward = points_referring_to_each_other(&b, point_ty, |ps| {
        [
            b.exprs.construct(ctor, [x_of(ps, 1), b.lit(0)], point_ty, None),
            b.exprs.construct(ctor, [b.lit(1), b.lit(2)], point_ty, None),
        ]
    });
    let err = driver(&ir).evaluate_as_constant_initializer(forward).unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::ReadOutsideLifetime));

    // { Point(1, 2), Point(ps[0].x, 5) }
    let backward = points_referring_to_each_other(&b, point_ty, |ps| {
        [
            b.exprs.construct(ctor, [b.lit(1), b.lit(2)], point_ty, None),
            b.exprs.construct(ctor, [x_of(ps, 0), b.lit(5)], point_ty, None),
        ]
    });
    let value = driver(&ir).evaluate_as_constant_initializer(backward).unwrap().value;
    let second: Vec<_> = value.elements().unwrap()[1]
        .fields()
        .unwrap()
        .iter()
        .map(as_int)
        .collect();
    assert_eq!(second, vec![1, 5]);
}

#[test]
fn writes_through_pointers_do_not_switch_the_active_member() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int = b.int();
    let int_ptr = b.types.pointer(int, false);
    let (u, _, field_b) = union_ab(&b);
    let u_ty = b.types.record(u);

    // U u{}; int* p = &u.b; *p = 2; return u.b;
    let (local, decl_u) = b.stmts.declare("u", u_ty, Some(b.exprs.zero_init(u_ty, None)), false, None);
    let u_b = b.exprs.field(b.exprs.local(local, u_ty, None), field_b, int, None);
    let (p, decl_p) = b.stmts.declare("p", int_ptr, Some(b.exprs.address_of(u_b, None)), false, None);
    let store = b.exprs.assign(b.exprs.deref(b.exprs.local(p, int_ptr, None), None), b.lit(2), None);

    let f = b.function("f", int, vec![decl_u, decl_p, b.stmts.expr(store), b.ret(u_b)]);
    let err = driver(&ir).evaluate_as_constant(b.call(f, vec![]), int).unwrap_err();

    assert_eq!(reason(&err), Some(ReasonCode::InactiveUnionMember));
    assert!(message(&err).contains("assignment of member 'b' of union with active member 'a'"));
}

/// `union U { int a; int b; };`
fn union_ab<'ir>(b: &Builders<'ir>) -> (ItemP<'ir>, Id, Id) {
    let mut u = RecordBuilder::new(b.ir, "U", RecordKind::Union);
    let a = u.field("a", b.int());
    let field_b = u.field("b", b.int());
    (u.finish(), a, field_b)
}

#[test]
fn only_the_active_union_member_is_readable() {
    let run = |read_a: bool| {
        let ir = IrCtx::new();
        let b = Builders::new(&ir);
        let int = b.int();
        let (u, a, field_b) = union_ab(&b);
        let u_ty = b.types.record(u);

        // U u; u.a = 1; u.b = 2; return u.a or u.b;
        let (local, decl) = b.stmts.declare("u", u_ty, None, false, None);
        let u_ref = b.exprs.local(local, u_ty, None);
        let member = |id| b.exprs.field(u_ref, id, int, None);

        let f = b.function(
            "f",
            int,
            vec![
                decl,
                b.stmts.expr(b.exprs.assign(member(a), b.lit(1), None)),
                b.stmts.expr(b.exprs.assign(member(field_b), b.lit(2), None)),
                b.ret(member(if read_a { a } else { field_b })),
            ],
        );

        let result = driver(&ir)
            .evaluate_as_constant(b.call(f, vec![]), int)
            .map(|e| as_int(&e.value))
            .map_err(|e| (reason(&e), message(&e)));
        result
    };

    assert_eq!(run(false), Ok(2));

    let (code, message) = run(true).unwrap_err();
    assert_eq!(code, Some(ReasonCode::InactiveUnionMember));
    assert!(message.contains("member 'a' of union with active member 'b'"));
}

#[test]
fn union_initializer_activates_the_designated_member() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let (u, _, field_b) = union_ab(&b);
    let u_ty = b.types.record(u);

    let init = b.exprs.aggregate(
        vec![b.exprs.designated(&[Designator::Field(field_b)], b.lit(9))],
        u_ty,
        None,
    );
    let value = driver(&ir).evaluate_as_constant(init, u_ty).unwrap().value;

    let Value::Union(union) = value else {
        panic!("expected a union");
    };
    let (index, value) = union.active.unwrap();
    assert_eq!(index, 1);
    assert_eq!(as_int(&value), 9);
}

fn truncated(k: i64, n: u32) -> i64 {
    let half = 1i64 << (n - 1);
    (k + half).rem_euclid(1i64 << n) - half
}

fn assign_to_bit_field(k: i32, width: u32) -> i128 {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int = b.int();

    let mut s = RecordBuilder::new(&ir, "B", RecordKind::Struct);
    let f = s.bit_field("f", int, width);
    let s = s.finish();
    let s_ty = b.types.record(s);

    // B s = {}; s.f = k; return s.f;
    let (local, decl) = b
        .stmts
        .declare("s", s_ty, Some(b.exprs.zero_init(s_ty, None)), false, None);
    let field = b.exprs.field(b.exprs.local(local, s_ty, None), f, int, None);
    let func = b.function(
        "f",
        int,
        vec![
            decl,
            b.stmts.expr(b.exprs.assign(field, b.lit(k as i128), None)),
            b.ret(field),
        ],
    );

    let value = driver(&ir)
        .evaluate_as_constant(b.call(func, vec![]), int)
        .unwrap()
        .value;
    as_int(&value)
}

#[test]
fn three_bit_field_wraps() {
    assert_eq!(assign_to_bit_field(4, 3), -4);
    assert_eq!(assign_to_bit_field(8, 3), 0);
    assert_eq!(assign_to_bit_field(3, 3), 3);
}

proptest! {
    #[test]
    fn bit_field_assignment_truncates(k in any::<i32>(), n in 1u32..32) {
        prop_assert_eq!(assign_to_bit_field(k, n), truncated(k as i64, n) as i128);
    }
}

#[test]
fn mutable_members_of_other_constants_are_not_readable() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int = b.int();

    let mut m = RecordBuilder::new(&ir, "M", RecordKind::Struct);
    let x = m.mutable_field("x", int);
    let m = m.finish();
    let m_ty = b.types.record(m);

    let mut var = VarBuilder::new(&ir, "m", m_ty);
    var.constexpr();
    let var = var.build(Some(b.exprs.list([b.lit(1)], m_ty, None)));

    // The initializer itself is fine
    assert!(driver(&ir).evaluate_as_constant_initializer(var).is_ok());

    let read = b.exprs.field(b.exprs.global(var, m_ty, None), x, int, None);
    let err = common::driver(&ir).evaluate_as_constant(read, int).unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::MutableRead));
}

#[test]
fn destructors_run_in_reverse_declaration_order() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let int = b.int();
    let int_ptr = b.types.pointer(int, false);

    // struct T { int* out; int tag; constexpr ~T() { *out = *out * 10 + tag; } };
    let mut t = RecordBuilder::new(&ir, "T", RecordKind::Struct);
    let class = t.item();
    let out = t.field("out", int_ptr);
    let tag = t.field("tag", int);

    let target = b.exprs.deref(b.exprs.this_field(class, out, int_ptr, None), None);
    let scaled = b.exprs.binary(BinOp::Mul, target, b.lit(10), int, None);
    let next = b.exprs.binary(
        BinOp::Plus,
        scaled,
        b.exprs.this_field(class, tag, int, None),
        int,
        None,
    );
    let mut dtor = FunctionBuilder::new(&ir, "~T", b.void());
    dtor.method(class, MethodKind::Destructor);
    let dtor = dtor
        .build(vec![b.stmts.expr(b.exprs.assign(target, next, None))])
        .unwrap();
    t.destructor(dtor);
    let t = t.finish();
    let t_ty = b.types.record(t);

    // int log = 0; { T a = {&log, 1}; T b = {&log, 2}; } return log;
    let (log, decl_log) = b.stmts.declare("log", int, Some(b.lit(0)), false, None);
    let log_ref = b.exprs.local(log, int, None);
    let object = |name: &str, n: i128| {
        let init = b
            .exprs
            .list([b.exprs.address_of(log_ref, None), b.lit(n)], t_ty, None);
        b.stmts.declare(name, t_ty, Some(init), false, None).1
    };

    let f = b.function(
        "f",
        int,
        vec![
            decl_log,
            b.stmts.block(vec![object("a", 1), object("b", 2)]),
            b.ret(log_ref),
        ],
    );

    let value = driver(&ir)
        .evaluate_as_constant(b.call(f, vec![]), int)
        .unwrap()
        .value;
    assert_eq!(as_int(&value), 21);
}
