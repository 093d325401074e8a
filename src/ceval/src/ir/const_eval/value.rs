use crate::ast::BuiltinType;
use crate::common::CodeDiagnostic;
use crate::ir::layout::Layouter;
use crate::ir::{ItemP, MemberRef, Ty, TyP};

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::fmt::{Display, Formatter};

/// An integer of a given width and signedness. The value is always in range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntValue {
    pub value: BigInt,
    pub bits: u32,
    pub signed: bool,
}

impl IntValue {
    /// Converts modulo 2^bits, like an integral conversion does.
    pub fn new(value: impl Into<BigInt>, bits: u32, signed: bool) -> Self {
        Self {
            value: Self::wrap(&value.into(), bits, signed),
            bits,
            signed,
        }
    }

    pub fn zero(bits: u32, signed: bool) -> Self {
        Self {
            value: BigInt::zero(),
            bits,
            signed,
        }
    }

    pub fn min_value(bits: u32, signed: bool) -> BigInt {
        if signed {
            -(BigInt::one() << (bits - 1))
        } else {
            BigInt::zero()
        }
    }

    pub fn max_value(bits: u32, signed: bool) -> BigInt {
        if signed {
            (BigInt::one() << (bits - 1)) - 1
        } else {
            (BigInt::one() << bits) - 1
        }
    }

    pub fn fits(value: &BigInt, bits: u32, signed: bool) -> bool {
        *value >= Self::min_value(bits, signed) && *value <= Self::max_value(bits, signed)
    }

    /// Two's complement truncation to `bits`.
    pub fn wrap(value: &BigInt, bits: u32, signed: bool) -> BigInt {
        if bits == 0 {
            return BigInt::zero();
        }

        let modulus = BigInt::one() << bits;
        let mut wrapped = value % &modulus;
        if wrapped.is_negative() {
            wrapped += &modulus;
        }
        if signed && wrapped > Self::max_value(bits, true) {
            wrapped -= modulus;
        }
        wrapped
    }

    pub fn cast(&self, bits: u32, signed: bool) -> Self {
        Self::new(self.value.clone(), bits, signed)
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.value.is_negative()
    }

    pub fn to_i128(&self) -> Option<i128> {
        self.value.to_i128()
    }

    pub fn to_usize(&self) -> Option<usize> {
        self.value.to_usize()
    }

    pub fn to_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or(f64::NAN)
    }
}

impl Display for IntValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerBase<'ir> {
    Null,
    /// A namespace-scope variable. Every evaluation materializes its own copy.
    Global(ItemP<'ir>),
    Block(BlockId),
    String(&'ir [u8]),
}

/// One step from an object to one of its subobjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathElem<'ir> {
    Field(usize),
    Base(ItemP<'ir>),
    /// Always directly follows the path of the most-derived object.
    VirtualBase(ItemP<'ir>),
    /// The element index; the length of the array for a one-past-the-end pointer.
    Index(usize),
}

impl PathElem<'_> {
    pub fn is_base(&self) -> bool {
        matches!(self, PathElem::Base(_) | PathElem::VirtualBase(_))
    }
}

/// A pointer is an object identity plus the designator of a subobject in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pointer<'ir> {
    pub base: PointerBase<'ir>,
    pub path: Vec<PathElem<'ir>>,
    /// One past the end of a non-array object.
    pub past_end: bool,
}

impl<'ir> Pointer<'ir> {
    pub fn null() -> Self {
        Self::to(PointerBase::Null)
    }

    pub fn to(base: PointerBase<'ir>) -> Self {
        Self {
            base,
            path: Vec::new(),
            past_end: false,
        }
    }

    pub fn is_null(&self) -> bool {
        self.base == PointerBase::Null
    }

    pub fn child(&self, elem: PathElem<'ir>) -> Self {
        let mut path = self.path.clone();
        path.push(elem);

        Self {
            base: self.base,
            path,
            past_end: false,
        }
    }

    /// Length of the path of the most-derived object this pointer designates a
    /// base subobject of.
    pub fn complete_object_len(&self) -> usize {
        self.path
            .iter()
            .rposition(|e| !e.is_base())
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn complete_object(&self) -> Self {
        self.prefix(self.complete_object_len())
    }

    pub fn prefix(&self, len: usize) -> Self {
        Self {
            base: self.base,
            path: self.path[..len].to_vec(),
            past_end: false,
        }
    }

    pub fn array_index(&self) -> Option<usize> {
        match self.path.last() {
            Some(PathElem::Index(i)) => Some(*i),
            _ => None,
        }
    }

    /// Whether `other` designates this object or one of its subobjects.
    pub fn contains(&self, other: &Pointer<'ir>) -> bool {
        self.base == other.base && other.path.starts_with(&self.path)
    }
}

/// A base-to-derived adjustment of a member pointer. The `invalid` flag of the
/// member pointer is set when the adjustment cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberStep<'ir> {
    /// `T Base::*` converted to `T Derived::*`
    ToDerived {
        base: ItemP<'ir>,
        derived: ItemP<'ir>,
    },
    /// `T Derived::*` converted to `T Base::*`
    ToBase {
        derived: ItemP<'ir>,
        base: ItemP<'ir>,
    },
}

impl<'ir> MemberStep<'ir> {
    fn inverse(self) -> Self {
        match self {
            MemberStep::ToDerived { base, derived } => MemberStep::ToBase { derived, base },
            MemberStep::ToBase { derived, base } => MemberStep::ToDerived { base, derived },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberPointer<'ir> {
    /// `None` for the null member pointer.
    pub member: Option<MemberRef<'ir>>,
    pub steps: Vec<MemberStep<'ir>>,
    pub invalid: Option<String>,
}

impl<'ir> MemberPointer<'ir> {
    pub fn null() -> Self {
        Self {
            member: None,
            steps: Vec::new(),
            invalid: None,
        }
    }

    pub fn to(member: MemberRef<'ir>) -> Self {
        Self {
            member: Some(member),
            steps: Vec::new(),
            invalid: None,
        }
    }

    /// Appends an adjustment; the inverse of the previous adjustment cancels it.
    pub fn push(&mut self, step: MemberStep<'ir>) {
        if self.steps.last() == Some(&step.inverse()) {
            self.steps.pop();
        } else {
            self.steps.push(step);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue<'ir> {
    pub record: ItemP<'ir>,
    /// Non-virtual direct bases in declaration order.
    pub bases: Vec<(ItemP<'ir>, Value<'ir>)>,
    /// Only populated for most-derived objects.
    pub virtual_bases: Vec<(ItemP<'ir>, Value<'ir>)>,
    pub fields: Vec<Value<'ir>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionValue<'ir> {
    pub record: ItemP<'ir>,
    pub active: Option<(usize, Box<Value<'ir>>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'ir> {
    Void,
    /// Storage whose lifetime began but that was never initialized.
    Indeterminate,
    Bool(bool),
    Int(IntValue),
    F32(f32),
    /// Also used for `long double`.
    F64(f64),
    Pointer(Pointer<'ir>),
    FunctionPointer(ItemP<'ir>),
    MemberPointer(MemberPointer<'ir>),
    /// Stored form of an object of reference type.
    Reference(Pointer<'ir>),
    Array(Vec<Value<'ir>>),
    Struct(RecordValue<'ir>),
    Union(UnionValue<'ir>),
    /// The result of `typeid`.
    TypeInfo(TyP<'ir>),
}

impl<'ir> Value<'ir> {
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(v) => v.to_i128(),
            Value::Bool(b) => Some(*b as i128),
            _ => None,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Value::Indeterminate)
    }

    pub fn fields(&self) -> Option<&[Value<'ir>]> {
        match self {
            Value::Struct(s) => Some(&s.fields),
            _ => None,
        }
    }

    pub fn elements(&self) -> Option<&[Value<'ir>]> {
        match self {
            Value::Array(elems) => Some(elems),
            _ => None,
        }
    }
}

/// Floating point value of the representation used for the type.
pub fn float_value<'ir>(value: f64, ty: TyP<'ir>) -> Value<'ir> {
    match ty.strip_atomic() {
        Ty::Builtin(BuiltinType::Float) => Value::F32(value as f32),
        _ => Value::F64(value),
    }
}

/// The value of a complete object of the type before initialization.
pub fn uninitialized<'ir>(
    layouter: &Layouter<'ir>,
    ty: TyP<'ir>,
) -> Result<Value<'ir>, CodeDiagnostic> {
    object_value(layouter, ty, true, false)
}

/// The value of a zero-initialized object of the type.
pub fn zeroed<'ir>(layouter: &Layouter<'ir>, ty: TyP<'ir>) -> Result<Value<'ir>, CodeDiagnostic> {
    object_value(layouter, ty, true, true)
}

fn object_value<'ir>(
    layouter: &Layouter<'ir>,
    ty: TyP<'ir>,
    complete: bool,
    zero: bool,
) -> Result<Value<'ir>, CodeDiagnostic> {
    let scalar = |value: Value<'ir>| {
        if zero {
            value
        } else {
            Value::Indeterminate
        }
    };

    let value = match ty {
        Ty::Builtin(BuiltinType::Void) => Value::Void,
        Ty::Builtin(BuiltinType::Bool) => scalar(Value::Bool(false)),
        Ty::Builtin(BuiltinType::NullPtr) | Ty::Pointer(_, _) => scalar(Value::Pointer(Pointer::null())),
        Ty::Builtin(b) if b.is_float() => scalar(float_value(0.0, ty)),
        Ty::Builtin(_) | Ty::BitInt(_, _) | Ty::Enum(_) => match layouter.int_repr(ty) {
            Some((bits, signed)) => scalar(Value::Int(IntValue::zero(bits, signed))),
            None => Value::Indeterminate,
        },
        Ty::MemberPointer(_, _) => scalar(Value::MemberPointer(MemberPointer::null())),
        Ty::Reference(_, _) | Ty::Function(_, _) => Value::Indeterminate,
        Ty::Atomic(inner) => object_value(layouter, inner, complete, zero)?,
        Ty::Array(inner, len) | Ty::Vector(inner, len) => {
            let element = object_value(layouter, inner, true, zero)?;
            Value::Array(vec![element; *len])
        }
        Ty::Complex(inner) => {
            let element = object_value(layouter, inner, true, zero)?;
            Value::Array(vec![element; 2])
        }
        Ty::IncompleteArray(_) => Value::Array(Vec::new()),
        Ty::Record(item) => record_value(layouter, item, complete, zero)?,
    };

    Ok(value)
}

fn record_value<'ir>(
    layouter: &Layouter<'ir>,
    item: ItemP<'ir>,
    complete: bool,
    zero: bool,
) -> Result<Value<'ir>, CodeDiagnostic> {
    let descriptor = layouter.record(item)?;

    if descriptor.is_union {
        // Zero-initialization of a union zeroes its first named member
        let active = match descriptor.fields.iter().position(|f| !f.name.is_empty()) {
            Some(index) if zero => Some((
                index,
                Box::new(object_value(layouter, descriptor.fields[index].ty, true, true)?),
            )),
            _ => None,
        };

        return Ok(Value::Union(UnionValue {
            record: item,
            active,
        }));
    }

    let mut bases = Vec::with_capacity(descriptor.bases.len());
    for base in &descriptor.bases {
        bases.push((
            base.record,
            record_value(layouter, base.record, false, zero)?,
        ));
    }

    let mut virtual_bases = Vec::new();
    if complete {
        for base in &descriptor.virtual_bases {
            virtual_bases.push((
                base.record,
                record_value(layouter, base.record, false, zero)?,
            ));
        }
    }

    let mut fields = Vec::with_capacity(descriptor.fields.len());
    for field in &descriptor.fields {
        fields.push(object_value(layouter, field.ty, true, zero)?);
    }

    Ok(Value::Struct(RecordValue {
        record: item,
        bases,
        virtual_bases,
        fields,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_is_twos_complement() {
        assert_eq!(IntValue::wrap(&BigInt::from(4), 3, true), BigInt::from(-4));
        assert_eq!(IntValue::wrap(&BigInt::from(8), 3, true), BigInt::from(0));
        assert_eq!(IntValue::wrap(&BigInt::from(-1), 8, false), BigInt::from(255));
        assert_eq!(
            IntValue::wrap(&BigInt::from(1u64 << 32), 32, true),
            BigInt::from(0)
        );
    }

    #[test]
    fn ranges_of_wide_types() {
        assert_eq!(
            IntValue::max_value(128, false).to_string(),
            "340282366920938463463374607431768211455"
        );
        assert_eq!(
            IntValue::min_value(128, true).to_string(),
            "-170141183460469231731687303715884105728"
        );
        assert!(!IntValue::fits(&BigInt::from(128), 8, true));
        assert!(IntValue::fits(&BigInt::from(-128), 8, true));
    }

    #[test]
    fn inverse_member_steps_cancel() {
        let ir = crate::ir::IrCtx::new();
        let a = ir.make_item();
        let b = ir.make_item();

        let mut mp = MemberPointer::null();
        mp.push(MemberStep::ToDerived { base: a, derived: b });
        mp.push(MemberStep::ToBase { derived: b, base: a });
        assert!(mp.steps.is_empty());

        mp.push(MemberStep::ToBase { derived: b, base: a });
        mp.push(MemberStep::ToBase { derived: a, base: b });
        assert_eq!(mp.steps.len(), 2);
    }

    #[test]
    fn complete_object_strips_trailing_bases() {
        let ir = crate::ir::IrCtx::new();
        let a = ir.make_item();
        let b = ir.make_item();

        let ptr = Pointer::to(PointerBase::Block(BlockId(0)))
            .child(PathElem::Index(2))
            .child(PathElem::Base(a))
            .child(PathElem::Base(b));

        assert_eq!(ptr.complete_object_len(), 1);
        assert_eq!(ptr.complete_object().path, vec![PathElem::Index(2)]);
        assert!(ptr.complete_object().contains(&ptr));
    }
}
