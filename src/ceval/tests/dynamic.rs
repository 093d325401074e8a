mod common;

use ceval::ast::BinOp;
use ceval::ir::builder::{FunctionBuilder, RecordBuilder, VarBuilder};
use ceval::ir::{
    CastKind, CtorInitializer, ExprP, Id, ItemP, MemberRef, MethodKind, RecordKind, Statement,
    TyP, TypeIdOperand,
};
use ceval::{IrCtx, ReasonCode, Value};
use common::{as_int, driver, message, reason, Builders};

struct Hierarchy<'ir> {
    base: ItemP<'ir>,
    derived: ItemP<'ir>,
    other: ItemP<'ir>,
    base_f: ItemP<'ir>,
    field_b: Id,
    field_o: Id,
}

/// ```text
/// struct Base { int b; virtual int f() { return 1; } };
/// struct Derived : Base { int d; int f() override { return 2; } };
/// struct Other : Base { int o; };
/// ```
fn hierarchy<'ir>(b: &Builders<'ir>) -> Hierarchy<'ir> {
    let int = b.int();

    let mut base = RecordBuilder::new(b.ir, "Base", RecordKind::Struct);
    let field_b = base.field("b", int);
    let mut f = FunctionBuilder::new(b.ir, "f", int);
    f.method(base.item(), MethodKind::Normal).set_virtual();
    let base_f = f.build(vec![b.ret(b.lit(1))]).unwrap();
    base.method(base_f);
    let base = base.finish();

    let mut derived = RecordBuilder::new(b.ir, "Derived", RecordKind::Struct);
    derived.base(base, false);
    derived.field("d", int);
    let mut f = FunctionBuilder::new(b.ir, "f", int);
    f.method(derived.item(), MethodKind::Normal)
        .overrides(&[base_f]);
    let derived_f = f.build(vec![b.ret(b.lit(2))]).unwrap();
    derived.method(derived_f);
    let derived = derived.finish();

    let mut other = RecordBuilder::new(b.ir, "Other", RecordKind::Struct);
    other.base(base, false);
    let field_o = other.field("o", int);
    let other = other.finish();

    Hierarchy {
        base,
        derived,
        other,
        base_f,
        field_b,
        field_o,
    }
}

fn chain<'ir>(b: &Builders<'ir>, bases: &[ItemP<'ir>]) -> &'ir [ItemP<'ir>] {
    b.ir.arena.alloc_slice_copy(bases)
}

fn ptr_to<'ir>(b: &Builders<'ir>, class: ItemP<'ir>) -> TyP<'ir> {
    b.types.pointer(b.types.record(class), false)
}

/// `Derived d{}; Base* pb = &d;` followed by `body(d, pb)` in a constexpr function.
fn with_derived<'ir>(
    b: &Builders<'ir>,
    h: &Hierarchy<'ir>,
    ret: TyP<'ir>,
    body: impl FnOnce(ExprP<'ir>, ExprP<'ir>) -> Vec<Statement<'ir>>,
) -> ExprP<'ir> {
    let derived_ty = b.types.record(h.derived);
    let base_ptr = ptr_to(b, h.base);

    let (d, decl_d) = b
        .stmts
        .declare("d", derived_ty, Some(b.exprs.zero_init(derived_ty, None)), false, None);
    let d = b.exprs.local(d, derived_ty, None);
    let upcast = b.exprs.cast(
        CastKind::DerivedToBase(chain(b, &[h.base])),
        b.exprs.address_of(d, None),
        base_ptr,
        None,
    );
    let (pb, decl_pb) = b.stmts.declare("pb", base_ptr, Some(upcast), false, None);

    let mut statements = vec![decl_d, decl_pb];
    statements.extend(body(d, b.exprs.local(pb, base_ptr, None)));

    let f = b.function("test", ret, statements);
    b.call(f, vec![])
}

#[test]
fn downcast_through_the_dynamic_type_recovers_the_object() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let h = hierarchy(&b);

    // return static_cast<Derived*>(pb) == &d;
    let call = with_derived(&b, &h, b.bool(), |d, pb| {
        let down = b.exprs.cast(
            CastKind::BaseToDerived(chain(&b, &[h.base])),
            pb,
            ptr_to(&b, h.derived),
            None,
        );
        let same = b.exprs.binary(BinOp::Eq, down, b.exprs.address_of(d, None), b.bool(), None);
        vec![b.ret(same)]
    });

    let value = driver(&ir).evaluate_as_constant(call, b.bool()).unwrap().value;
    assert_eq!(value, Value::Bool(true));
}

#[test]
fn downcast_through_the_wrong_type_is_rejected() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let h = hierarchy(&b);
    let other_ptr = ptr_to(&b, h.other);

    // return static_cast<Other*>(pb) == nullptr;
    let call = with_derived(&b, &h, b.bool(), |_, pb| {
        let down = b.exprs.cast(CastKind::BaseToDerived(chain(&b, &[h.base])), pb, other_ptr, None);
        let null = b.exprs.null(other_ptr, None);
        vec![b.ret(b.exprs.binary(BinOp::Eq, down, null, b.bool(), None))]
    });

    let err = driver(&ir).evaluate_as_constant(call, b.bool()).unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::InvalidDowncast));
    assert_eq!(
        message(&err),
        "cannot cast object of dynamic type 'Derived' to type 'Other'"
    );
}

#[test]
fn virtual_calls_dispatch_on_the_dynamic_type() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let h = hierarchy(&b);

    // return pb->f() * 10 + pb->Base::f();
    let call = with_derived(&b, &h, b.int(), |_, pb| {
        let object = b.exprs.deref(pb, None);
        let dynamic = b.exprs.member_call(object, h.base_f, Vec::new(), true, None);
        let qualified = b.exprs.member_call(object, h.base_f, Vec::new(), false, None);
        let scaled = b.exprs.binary(BinOp::Mul, dynamic, b.lit(10), b.int(), None);
        vec![b.ret(b.exprs.binary(BinOp::Plus, scaled, qualified, b.int(), None))]
    });

    let value = driver(&ir).evaluate_as_constant(call, b.int()).unwrap().value;
    assert_eq!(as_int(&value), 21);
}

#[test]
fn member_function_pointers_dispatch_virtually() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let h = hierarchy(&b);
    let method_ty = b.types.member_pointer(h.base, b.types.function([], b.int()));

    // int (Base::*pf)() = &Base::f; return ((*pb).*pf)();
    let call = with_derived(&b, &h, b.int(), |_, pb| {
        let pf = b.exprs.member_pointer(MemberRef::Method(h.base_f), method_ty, None);
        let result = b.exprs.member_pointer_call(b.exprs.deref(pb, None), pf, Vec::new(), None);
        vec![b.ret(result)]
    });

    let value = driver(&ir).evaluate_as_constant(call, b.int()).unwrap().value;
    assert_eq!(as_int(&value), 2);
}

#[test]
fn data_member_pointers_convert_to_the_derived_class() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let h = hierarchy(&b);
    let base_ty = b.types.record(h.base);

    // static_cast<Base&>(d).b = 7; int Derived::*pm = &Base::b; return d.*pm;
    let call = with_derived(&b, &h, b.int(), |d, _| {
        let as_base =
            b.exprs
                .cast_lvalue(CastKind::DerivedToBase(chain(&b, &[h.base])), d, base_ty, None);
        let write = b.exprs.assign(b.exprs.field(as_base, h.field_b, b.int(), None), b.lit(7), None);

        let pm = b.exprs.member_pointer(
            MemberRef::Field(h.base, h.field_b),
            b.types.member_pointer(h.base, b.int()),
            None,
        );
        let pm = b.exprs.cast(
            CastKind::BaseToDerivedMemberPointer(chain(&b, &[h.base])),
            pm,
            b.types.member_pointer(h.derived, b.int()),
            None,
        );
        vec![b.stmts.expr(write), b.ret(b.exprs.pointer_to_member(d, pm, None))]
    });

    let value = driver(&ir).evaluate_as_constant(call, b.int()).unwrap().value;
    assert_eq!(as_int(&value), 7);
}

#[test]
fn dynamic_cast_finds_the_complete_object() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let h = hierarchy(&b);
    let other_ptr = ptr_to(&b, h.other);

    // return dynamic_cast<Derived*>(pb) == &d && dynamic_cast<Other*>(pb) == nullptr;
    let call = with_derived(&b, &h, b.bool(), |d, pb| {
        let to_derived = b.exprs.dynamic_cast(pb, ptr_to(&b, h.derived), None);
        let found = b.exprs.binary(
            BinOp::Eq,
            to_derived,
            b.exprs.address_of(d, None),
            b.bool(),
            None,
        );
        let to_other = b.exprs.dynamic_cast(pb, other_ptr, None);
        let missing = b.exprs.binary(
            BinOp::Eq,
            to_other,
            b.exprs.null(other_ptr, None),
            b.bool(),
            None,
        );
        vec![b.ret(b.exprs.binary(BinOp::And, found, missing, b.bool(), None))]
    });

    let value = driver(&ir).evaluate_as_constant(call, b.bool()).unwrap().value;
    assert_eq!(value, Value::Bool(true));
}

#[test]
fn failed_reference_dynamic_cast_is_diagnosed() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let h = hierarchy(&b);
    let other_ref = b.types.reference(b.types.record(h.other), false);

    // return dynamic_cast<Other&>(*pb).o;
    let call = with_derived(&b, &h, b.int(), |_, pb| {
        let cast = b.exprs.dynamic_cast(b.exprs.deref(pb, None), other_ref, None);
        vec![b.ret(b.exprs.field(cast, h.field_o, b.int(), None))]
    });

    let err = driver(&ir).evaluate_as_constant(call, b.int()).unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::BadDynamicCast));
    assert!(message(&err).contains("dynamic type 'Derived'"));
}

#[test]
fn typeid_of_a_polymorphic_lvalue_is_its_dynamic_type() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let h = hierarchy(&b);
    let type_info = b
        .types
        .record(RecordBuilder::new(&ir, "type_info", RecordKind::Class).finish());

    let typeid_of = |ty| b.exprs.type_id(TypeIdOperand::Type(ty), type_info, None);

    // return typeid(*pb) == typeid(Derived) && typeid(*pb) != typeid(Base);
    let call = with_derived(&b, &h, b.bool(), |_, pb| {
        let dynamic = b.exprs.type_id(TypeIdOperand::Expr(b.exprs.deref(pb, None)), type_info, None);
        let is_derived = b.exprs.binary(
            BinOp::Eq,
            dynamic,
            typeid_of(b.types.record(h.derived)),
            b.bool(),
            None,
        );
        let not_base = b.exprs.binary(
            BinOp::Neq,
            dynamic,
            typeid_of(b.types.record(h.base)),
            b.bool(),
            None,
        );
        vec![b.ret(b.exprs.binary(BinOp::And, is_derived, not_base, b.bool(), None))]
    });

    let value = driver(&ir).evaluate_as_constant(call, b.bool()).unwrap().value;
    assert_eq!(value, Value::Bool(true));
}

#[test]
fn dynamic_type_of_an_external_object_is_unknown() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let h = hierarchy(&b);
    let derived_ty = b.types.record(h.derived);
    let derived_ptr = ptr_to(&b, h.derived);

    // extern const Derived ext;
    let mut ext = VarBuilder::new(&ir, "ext", derived_ty);
    ext.constant().external();
    let ext = ext.build(None);

    let address = b.exprs.address_of(b.exprs.global(ext, derived_ty, None), None);
    let cast = b.exprs.dynamic_cast(address, derived_ptr, None);
    let check = b.exprs.binary(BinOp::Neq, cast, b.exprs.null(derived_ptr, None), b.bool(), None);

    let err = driver(&ir).evaluate_as_constant(check, b.bool()).unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::DynamicTypeNotConstant));
    assert!(message(&err).contains("'ext' whose dynamic type is not constant"));
    assert_eq!(
        err.primary().unwrap().notes().collect::<Vec<_>>(),
        vec!["'ext' declared here"]
    );
}

/// ```text
/// struct Shape { int a; Shape() : a(this->area()) {} virtual int area(); };
/// struct Square : Shape { int area() override { return 4; } };
/// ```
fn shapes<'ir>(b: &Builders<'ir>, pure: bool) -> (ItemP<'ir>, ItemP<'ir>, Id) {
    let int = b.int();

    let mut shape = RecordBuilder::new(b.ir, "Shape", RecordKind::Struct);
    let a = shape.field("a", int);

    let mut area = FunctionBuilder::new(b.ir, "area", int);
    area.method(shape.item(), MethodKind::Normal);
    let area = if pure {
        area.pure_virtual();
        area.declare()
    } else {
        area.set_virtual();
        area.build(vec![b.ret(b.lit(1))]).unwrap()
    };

    let mut ctor = FunctionBuilder::new(b.ir, "Shape", b.void());
    ctor.method(shape.item(), MethodKind::Constructor);
    let this = b.exprs.deref(b.exprs.this(shape.item(), None), None);
    let ctor = ctor
        .build_with_initializers(
            vec![CtorInitializer::Field(
                a,
                b.exprs.member_call(this, area, Vec::new(), true, None),
            )],
            vec![],
        )
        .unwrap();
    shape.method(area).method(ctor);
    let shape = shape.finish();

    let mut square = RecordBuilder::new(b.ir, "Square", RecordKind::Struct);
    square.base(shape, false);
    let mut square_area = FunctionBuilder::new(b.ir, "area", int);
    square_area
        .method(square.item(), MethodKind::Normal)
        .overrides(&[area]);
    let square_area = square_area.build(vec![b.ret(b.lit(4))]).unwrap();
    square.method(square_area);

    (shape, square.finish(), a)
}

#[test]
fn virtual_calls_during_construction_use_the_class_being_built() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let (shape, square, a) = shapes(&b, false);
    let square_ty = b.types.record(square);
    let shape_ty = b.types.record(shape);

    // Square{}.a
    let object = b.exprs.materialize(b.exprs.zero_init(square_ty, None), None);
    let as_shape = b.exprs.cast_lvalue(
        CastKind::DerivedToBase(chain(&b, &[shape])),
        object,
        shape_ty,
        None,
    );
    let read = b.exprs.field(as_shape, a, b.int(), None);

    let value = driver(&ir).evaluate_as_constant(read, b.int()).unwrap().value;
    assert_eq!(as_int(&value), 1);
}

#[test]
fn pure_virtual_call_during_construction_is_diagnosed() {
    let ir = IrCtx::new();
    let b = Builders::new(&ir);
    let (_, square, _) = shapes(&b, true);
    let square_ty = b.types.record(square);

    let err = driver(&ir)
        .evaluate_as_constant(b.exprs.zero_init(square_ty, None), square_ty)
        .unwrap_err();
    assert_eq!(reason(&err), Some(ReasonCode::PureVirtualCall));
    assert!(message(&err).contains("pure virtual function 'area' called"));
}
