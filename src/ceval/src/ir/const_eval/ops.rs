//! Operators, conversions and pointer arithmetic.

use super::arith::{self, FloatOp};
use super::memory::AccessKind;
use super::value::{float_value, IntValue, MemberPointer, MemberStep, PathElem, Pointer, PointerBase, Value};
use super::{ConstEvalErrorKind, ConstEvaluator};

use crate::ast::{BinOp, BuiltinType, UnOp};
use crate::common::EvalError;
use crate::diagnostics::WithBacktrace;
use crate::global_ctx::EvalMode;
use crate::ir::{CastKind, ExprKind, ExprP, Intrinsic, ItemP, Ty, TyP};

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use std::cmp::Ordering;

impl<'ir> ConstEvaluator<'ir> {
    pub(super) fn binary(
        &mut self,
        op: BinOp,
        lhs: ExprP<'ir>,
        rhs: ExprP<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        if op.is_logical() {
            let l = self.eval_condition(lhs)?;
            let short_circuits = match op {
                BinOp::And => !l,
                _ => l,
            };
            if short_circuits {
                return self.truth(l, ty);
            }
            let r = self.eval_condition(rhs)?;
            return self.truth(r, ty);
        }

        let mark = self.accesses.len();
        let l = self.eval_rvalue(lhs)?;
        let mid = self.accesses.len();
        let r = self.eval_rvalue(rhs)?;

        if !(op.is_shift() && self.options.standard.sequences_shift_operands()) {
            self.check_unsequenced(mark, mid)?;
        }

        self.binary_values(op, l, r, ty)
    }

    pub(super) fn binary_values(
        &mut self,
        op: BinOp,
        lhs: Value<'ir>,
        rhs: Value<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => self.int_binary(op, &a, &b, ty),
            (Value::Bool(a), Value::Bool(b)) => {
                let (a, b) = (IntValue::new(a as u8, 8, false), IntValue::new(b as u8, 8, false));
                if op.is_comparison() {
                    self.int_binary(op, &a, &b, ty)
                } else {
                    match self.int_binary(op, &a, &b, ty)? {
                        Value::Int(v) if ty.strip_atomic().is_bool() => Ok(Value::Bool(!v.is_zero())),
                        other => Ok(other),
                    }
                }
            }
            (Value::F64(a), Value::F64(b)) => match float_op(op) {
                Some(fop) => {
                    let checked = arith::float_binary(a, b, fop);
                    let value = self.checked(checked)?;
                    Ok(float_value(value, ty))
                }
                None => self.float_compare(op, a.partial_cmp(&b), ty),
            },
            (Value::F32(a), Value::F32(b)) => match float_op(op) {
                Some(fop) => {
                    let checked = arith::float_binary_f32(a, b, fop);
                    Ok(Value::F32(self.checked(checked)?))
                }
                None => self.float_compare(op, a.partial_cmp(&b), ty),
            },
            (Value::Pointer(p), Value::Int(n)) if matches!(op, BinOp::Plus | BinOp::Minus) => {
                let delta = match op {
                    BinOp::Minus => -n.value,
                    _ => n.value,
                };
                Ok(Value::Pointer(self.offset_pointer(&p, &delta)?))
            }
            (Value::Int(n), Value::Pointer(p)) if op == BinOp::Plus => {
                Ok(Value::Pointer(self.offset_pointer(&p, &n.value)?))
            }
            (Value::Pointer(a), Value::Pointer(b)) if op == BinOp::Minus => {
                let difference = self.pointer_difference(&a, &b)?;
                self.make_int(difference, ty)
            }
            (Value::Pointer(a), Value::Pointer(b)) if op.is_comparison() => {
                self.pointer_compare(op, &a, &b, ty)
            }
            (Value::FunctionPointer(a), Value::FunctionPointer(b)) if op.is_equality() => {
                self.truth((a == b) == (op == BinOp::Eq), ty)
            }
            (Value::FunctionPointer(_), Value::Pointer(p))
            | (Value::Pointer(p), Value::FunctionPointer(_))
                if op.is_equality() && p.is_null() =>
            {
                self.truth(op == BinOp::Neq, ty)
            }
            (Value::MemberPointer(a), Value::MemberPointer(b)) if op.is_equality() => {
                let equal = a.member == b.member && (a.member.is_none() || a.steps == b.steps);
                self.truth(equal == (op == BinOp::Eq), ty)
            }
            (Value::TypeInfo(a), Value::TypeInfo(b)) if op.is_equality() => {
                self.truth((a == b) == (op == BinOp::Eq), ty)
            }
            (lhs, rhs) => Err(self.fail(ConstEvalErrorKind::Unsupported(format!(
                "operator '{}' on {} and {}",
                op.symbol(),
                self.render(&lhs),
                self.render(&rhs)
            )))),
        }
    }

    fn int_binary(
        &mut self,
        op: BinOp,
        a: &IntValue,
        b: &IntValue,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        if op.is_comparison() {
            let result = match op {
                BinOp::Eq => a.value == b.value,
                BinOp::Neq => a.value != b.value,
                BinOp::Lt => a.value < b.value,
                BinOp::LEq => a.value <= b.value,
                BinOp::Gt => a.value > b.value,
                _ => a.value >= b.value,
            };
            return self.truth(result, ty);
        }

        let ty_name = ty.to_string();
        let checked = match op {
            BinOp::Plus => arith::add(a, b, &ty_name),
            BinOp::Minus => arith::sub(a, b, &ty_name),
            BinOp::Mul => arith::mul(a, b, &ty_name),
            BinOp::Div => arith::div(a, b, &ty_name),
            BinOp::Mod => arith::rem(a, b, &ty_name),
            BinOp::LShift => arith::shl(a, b, self.options.standard),
            BinOp::RShift => arith::shr(a, b),
            BinOp::BitAnd => arith::Checked::ok(arith::bit_and(a, b)),
            BinOp::BitOr => arith::Checked::ok(arith::bit_or(a, b)),
            BinOp::BitXor => arith::Checked::ok(arith::bit_xor(a, b)),
            _ => bug!(self, "operator '{}' on integers", op.symbol()),
        };

        let value = self.checked(checked)?;
        if ty.strip_atomic().is_bool() {
            return Ok(Value::Bool(!value.is_zero()));
        }
        Ok(Value::Int(value))
    }

    fn float_compare(
        &self,
        op: BinOp,
        ordering: Option<Ordering>,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        // Every comparison with NaN is false, except inequality
        let result = match (op, ordering) {
            (BinOp::Neq, None) => true,
            (_, None) => false,
            (BinOp::Eq, Some(o)) => o == Ordering::Equal,
            (BinOp::Neq, Some(o)) => o != Ordering::Equal,
            (BinOp::Lt, Some(o)) => o == Ordering::Less,
            (BinOp::LEq, Some(o)) => o != Ordering::Greater,
            (BinOp::Gt, Some(o)) => o == Ordering::Greater,
            (BinOp::GEq, Some(o)) => o != Ordering::Less,
            _ => bug!(self, "operator '{}' on floating point values", op.symbol()),
        };
        self.truth(result, ty)
    }

    pub(super) fn unary(
        &mut self,
        op: UnOp,
        inner: ExprP<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        let value = self.eval_rvalue(inner)?;

        match (op, value) {
            (UnOp::Plus, value) => Ok(value),
            (UnOp::Neg, Value::Int(v)) => {
                let checked = arith::neg(&v, &ty.to_string());
                Ok(Value::Int(self.checked(checked)?))
            }
            (UnOp::Neg, Value::F64(f)) => Ok(Value::F64(-f)),
            (UnOp::Neg, Value::F32(f)) => Ok(Value::F32(-f)),
            (UnOp::BitNot, Value::Int(v)) => Ok(Value::Int(arith::bit_not(&v))),
            (UnOp::Not, value) => {
                let truthy = self.truthy(&value)?;
                self.truth(!truthy, ty)
            }
            (op, value) => bug!(self, "unary {:?} on {:?}", op, value),
        }
    }

    /// Increments or decrements in place, answering the object and its
    /// previous value.
    pub(super) fn inc_dec(
        &mut self,
        operand: ExprP<'ir>,
        is_increment: bool,
    ) -> Result<(Pointer<'ir>, Value<'ir>), EvalError> {
        let place = self.eval_place(operand)?;
        let access = if is_increment {
            AccessKind::Increment
        } else {
            AccessKind::Decrement
        };

        let old = self.load(&place, access, true)?;
        let delta = if is_increment { 1 } else { -1 };
        let new = match &old {
            // Promoted to int first, so only the conversion back can wrap.
            // _BitInt is never promoted.
            Value::Int(v) if v.bits < 32 && is_promotable(operand.ty) => {
                Value::Int(IntValue::new(&v.value + delta, v.bits, v.signed))
            }
            Value::Int(v) => {
                let one = IntValue::new(1, v.bits, v.signed);
                let ty_name = operand.ty.to_string();
                let checked = if is_increment {
                    arith::add(v, &one, &ty_name)
                } else {
                    arith::sub(v, &one, &ty_name)
                };
                Value::Int(self.checked(checked)?)
            }
            Value::Bool(b) => Value::Bool(i32::from(*b) + delta != 0),
            Value::F64(f) => Value::F64(if is_increment { f + 1.0 } else { f - 1.0 }),
            Value::F32(f) => Value::F32(if is_increment { f + 1.0 } else { f - 1.0 }),
            Value::Pointer(p) => Value::Pointer(self.offset_pointer(p, &BigInt::from(delta))?),
            other => bug!(self, "{} of {:?}", access, other),
        };

        self.store(&place, new, access)?;
        Ok((place, old))
    }

    pub(super) fn assign(
        &mut self,
        lhs: ExprP<'ir>,
        rhs: ExprP<'ir>,
    ) -> Result<Pointer<'ir>, EvalError> {
        let mark = self.accesses.len();
        let value = self.eval_rvalue(rhs)?;
        let mid = self.accesses.len();
        let place = self.eval_place(lhs)?;

        if !self.options.standard.sequences_assignment_operands() {
            self.check_unsequenced(mark, mid)?;
        }

        self.store_named(&place, value, AccessKind::Assign, named_members(lhs))?;
        Ok(place)
    }

    pub(super) fn assign_op(
        &mut self,
        op: BinOp,
        lhs: ExprP<'ir>,
        rhs: ExprP<'ir>,
        compute_ty: TyP<'ir>,
    ) -> Result<Pointer<'ir>, EvalError> {
        let mark = self.accesses.len();
        let rhs_value = self.eval_rvalue(rhs)?;
        let mid = self.accesses.len();
        let place = self.eval_place(lhs)?;

        if !self.options.standard.sequences_assignment_operands() {
            self.check_unsequenced(mark, mid)?;
        }

        let old = self.load(&place, AccessKind::Assign, true)?;
        let old = self.convert(old, compute_ty)?;
        let result = self.binary_values(op, old, rhs_value, compute_ty)?;
        let result = self.convert(result, lhs.ty)?;

        self.store(&place, result, AccessKind::Assign)?;
        Ok(place)
    }

    // Pointers

    /// The type of the object a pointer designates.
    pub(super) fn type_of_place(&self, ptr: &Pointer<'ir>) -> Result<TyP<'ir>, EvalError> {
        let mut ty = match ptr.base {
            PointerBase::Global(item) => self.lift(item.get_var())?.ty,
            PointerBase::Block(id) => self.lift(self.memory.block(id))?.ty,
            PointerBase::String(bytes) => self
                .types
                .array(self.types.builtin(BuiltinType::Char), bytes.len() + 1),
            PointerBase::Null => bug!(self, "type of a null pointer"),
        };

        for elem in &ptr.path {
            ty = match (elem, ty.strip_atomic()) {
                (PathElem::Field(index), Ty::Record(item)) => {
                    match self.descriptor(*item)?.fields.get(*index) {
                        Some(field) => field.ty,
                        None => bug!(self, "no field {} in '{}'", index, item.name()),
                    }
                }
                (PathElem::Base(base) | PathElem::VirtualBase(base), _) => self.types.record(*base),
                (
                    PathElem::Index(_),
                    Ty::Array(element, _)
                    | Ty::IncompleteArray(element)
                    | Ty::Vector(element, _)
                    | Ty::Complex(element),
                ) => element,
                (PathElem::Index(_), _) => ty,
                (elem, ty) => bug!(self, "cannot apply {:?} to '{}'", elem, ty),
            };
        }

        Ok(ty)
    }

    pub(super) fn class_of_place(&self, ptr: &Pointer<'ir>) -> Result<Option<ItemP<'ir>>, EvalError> {
        Ok(self.type_of_place(ptr)?.strip_atomic().record())
    }

    /// Pointer arithmetic. Non-array objects behave as arrays of one element.
    pub(super) fn offset_pointer(
        &mut self,
        ptr: &Pointer<'ir>,
        delta: &BigInt,
    ) -> Result<Pointer<'ir>, EvalError> {
        if ptr.is_null() {
            if delta.is_zero() {
                return Ok(ptr.clone());
            }
            return Err(self.fail(ConstEvalErrorKind::NullPointerArithmetic));
        }

        if let Some(PathElem::Index(index)) = ptr.path.last() {
            let parent = ptr.prefix(ptr.path.len() - 1);
            let target = BigInt::from(*index) + delta;

            let len = match self.type_of_place(&parent)?.strip_atomic() {
                Ty::Array(_, len) | Ty::Vector(_, len) => *len,
                Ty::Complex(_) => 2,
                Ty::IncompleteArray(_) => {
                    if delta.is_zero() {
                        return Ok(ptr.clone());
                    }
                    return Err(self.fail(ConstEvalErrorKind::UnknownBoundIndex(target.to_string())));
                }
                _ => 1,
            };

            return match target.to_usize() {
                Some(index) if index <= len => Ok(parent.child(PathElem::Index(index))),
                _ => {
                    let issue = ConstEvalErrorKind::IndexOutOfBounds(target.to_string(), len);
                    Err(self.fail(issue))
                }
            };
        }

        let target = BigInt::from(ptr.past_end as u8) + delta;
        match target.to_u8() {
            Some(0) => Ok(Pointer {
                past_end: false,
                ..ptr.clone()
            }),
            Some(1) => Ok(Pointer {
                past_end: true,
                ..ptr.clone()
            }),
            _ => Err(self.fail(ConstEvalErrorKind::NonArrayIndexOutOfBounds(
                target.to_string(),
            ))),
        }
    }

    fn pointer_difference(&mut self, a: &Pointer<'ir>, b: &Pointer<'ir>) -> Result<BigInt, EvalError> {
        if a.is_null() && b.is_null() {
            return Ok(BigInt::zero());
        }

        if a.base == b.base {
            match (a.path.split_last(), b.path.split_last()) {
                (Some((PathElem::Index(i), pa)), Some((PathElem::Index(j), pb))) if pa == pb => {
                    return Ok(BigInt::from(*i) - BigInt::from(*j));
                }
                _ if a.path == b.path => {
                    return Ok(BigInt::from(a.past_end as i8 - b.past_end as i8));
                }
                _ => {}
            }
        }

        Err(self.fail(ConstEvalErrorKind::PointerDifferenceUnrelated))
    }

    fn is_past_end(&self, ptr: &Pointer<'ir>) -> Result<bool, EvalError> {
        if ptr.past_end {
            return Ok(true);
        }
        if let Some(PathElem::Index(index)) = ptr.path.last() {
            let parent = ptr.prefix(ptr.path.len() - 1);
            if let Ty::Array(_, len) = self.type_of_place(&parent)?.strip_atomic() {
                return Ok(index == len);
            }
        }
        Ok(false)
    }

    fn pointer_compare(
        &mut self,
        op: BinOp,
        a: &Pointer<'ir>,
        b: &Pointer<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        if op.is_equality() {
            let equal = if a.base == b.base {
                a.path == b.path && a.past_end == b.past_end
            } else if a.is_null() || b.is_null() {
                false
            } else {
                // The address one past the end of an object may coincide with another object
                for p in [a, b] {
                    if self.is_past_end(p)? {
                        let issue = ConstEvalErrorKind::UnspecifiedComparison(format!(
                            "against pointer '{}' that points past the end of a complete object",
                            self.pointer_name(p)
                        ));
                        self.tolerate(Some(issue))?;
                        break;
                    }
                }
                false
            };
            return self.truth(equal == (op == BinOp::Eq), ty);
        }

        let ordering = if a.base == b.base {
            order_key(a).cmp(&order_key(b))
        } else {
            let issue = ConstEvalErrorKind::UnspecifiedComparison(format!(
                "between pointers to unrelated objects '{}' and '{}'",
                self.pointer_name(a),
                self.pointer_name(b)
            ));
            self.tolerate(Some(issue))?;
            base_key(&a.base).cmp(&base_key(&b.base))
        };

        let result = match op {
            BinOp::Lt => ordering == Ordering::Less,
            BinOp::LEq => ordering != Ordering::Greater,
            BinOp::Gt => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        };
        self.truth(result, ty)
    }

    // Conversions

    /// Converts a scalar value to another arithmetic type.
    pub(super) fn convert(&mut self, value: Value<'ir>, to: TyP<'ir>) -> Result<Value<'ir>, EvalError> {
        let to = to.strip_atomic();
        if to.is_bool() {
            return match value {
                Value::Bool(_) => Ok(value),
                value => Ok(Value::Bool(self.truthy(&value)?)),
            };
        }

        if let Some((bits, signed)) = self.layouter.int_repr(to) {
            return match value {
                Value::Int(v) => Ok(Value::Int(v.cast(bits, signed))),
                Value::Bool(b) => Ok(Value::Int(IntValue::new(b as u8, bits, signed))),
                Value::F64(f) => {
                    let checked = arith::float_to_int(f, bits, signed, &to.to_string());
                    Ok(Value::Int(self.checked(checked)?))
                }
                Value::F32(f) => {
                    let checked = arith::float_to_int(f as f64, bits, signed, &to.to_string());
                    Ok(Value::Int(self.checked(checked)?))
                }
                value => Ok(value),
            };
        }

        if to.is_float() {
            let single = matches!(to, Ty::Builtin(BuiltinType::Float));
            let wide = match value {
                Value::Int(v) => v.to_f64(),
                Value::Bool(b) => b as u8 as f64,
                Value::F64(f) => f,
                Value::F32(f) if single => return Ok(Value::F32(f)),
                Value::F32(f) => f as f64,
                value => return Ok(value),
            };
            if single {
                let checked = arith::narrow_float(wide, &to.to_string());
                return Ok(Value::F32(self.checked(checked)?));
            }
            return Ok(Value::F64(wide));
        }

        Ok(value)
    }

    pub(super) fn cast_value(
        &mut self,
        kind: CastKind<'ir>,
        inner: ExprP<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        match kind {
            CastKind::NoOp => self.eval_rvalue(inner),
            CastKind::ToVoid => {
                self.eval_discard(inner)?;
                Ok(Value::Void)
            }
            CastKind::ArrayToPointerDecay => {
                let array = self.eval_glvalue(inner)?;
                Ok(Value::Pointer(array.child(PathElem::Index(0))))
            }
            CastKind::FunctionToPointerDecay => match inner.kind {
                ExprKind::Function(item) => Ok(Value::FunctionPointer(item)),
                _ => self.eval_rvalue(inner),
            },
            CastKind::NullToPointer => {
                self.eval_discard(inner)?;
                Ok(Value::Pointer(Pointer::null()))
            }
            CastKind::NullToMemberPointer => {
                self.eval_discard(inner)?;
                Ok(Value::MemberPointer(MemberPointer::null()))
            }
            CastKind::Reinterpret | CastKind::PointerToIntegral => {
                Err(self.fail(ConstEvalErrorKind::ReinterpretCast))
            }
            CastKind::IntegralToPointer => match self.eval_rvalue(inner)? {
                Value::Int(v) if v.is_zero() => Ok(Value::Pointer(Pointer::null())),
                _ => Err(self.fail(ConstEvalErrorKind::ReinterpretCast)),
            },
            CastKind::DerivedToBase(chain) => {
                let Some(from) = inner.ty.strip_atomic().pointee().and_then(|t| t.record()) else {
                    // Class prvalue: slice through the base subobject
                    let Some(from) = inner.ty.strip_atomic().record() else {
                        bug!(self, "derived-to-base cast of '{}'", inner.ty);
                    };
                    let object = self.eval_glvalue(inner)?;
                    let base = self.derived_to_base(&object, from, chain)?;
                    return self.read_place(&base, ty);
                };
                match self.eval_rvalue(inner)? {
                    Value::Pointer(p) if p.is_null() => Ok(Value::Pointer(p)),
                    Value::Pointer(p) => Ok(Value::Pointer(self.derived_to_base(&p, from, chain)?)),
                    other => bug!(self, "derived-to-base cast of {:?}", other),
                }
            }
            CastKind::BaseToDerived(chain) => {
                let Some(target) = ty.strip_atomic().pointee().and_then(|t| t.record()) else {
                    bug!(self, "base-to-derived cast to '{}'", ty);
                };
                match self.eval_rvalue(inner)? {
                    Value::Pointer(p) if p.is_null() => Ok(Value::Pointer(p)),
                    Value::Pointer(p) => Ok(Value::Pointer(self.base_to_derived(&p, target, chain)?)),
                    other => bug!(self, "base-to-derived cast of {:?}", other),
                }
            }
            CastKind::DerivedToBaseMemberPointer(chain) => {
                let Ty::MemberPointer(from, _) = inner.ty.strip_atomic() else {
                    bug!(self, "member pointer cast of '{}'", inner.ty);
                };
                let Value::MemberPointer(mut mp) = self.eval_rvalue(inner)? else {
                    bug!(self, "member pointer cast of a non-member pointer");
                };
                if mp.member.is_some() {
                    let mut derived = *from;
                    for base in chain {
                        self.member_pointer_step(&mut mp, MemberStep::ToBase { derived, base: *base })?;
                        derived = *base;
                    }
                }
                Ok(Value::MemberPointer(mp))
            }
            CastKind::BaseToDerivedMemberPointer(chain) => {
                let Ty::MemberPointer(target, _) = ty.strip_atomic() else {
                    bug!(self, "member pointer cast to '{}'", ty);
                };
                let Value::MemberPointer(mut mp) = self.eval_rvalue(inner)? else {
                    bug!(self, "member pointer cast of a non-member pointer");
                };
                if mp.member.is_some() {
                    for index in (0..chain.len()).rev() {
                        let derived = if index == 0 { *target } else { chain[index - 1] };
                        let step = MemberStep::ToDerived {
                            base: chain[index],
                            derived,
                        };
                        self.member_pointer_step(&mut mp, step)?;
                    }
                }
                Ok(Value::MemberPointer(mp))
            }
            CastKind::Integral
            | CastKind::IntegralToBoolean
            | CastKind::IntegralToFloating
            | CastKind::FloatingToIntegral
            | CastKind::FloatingCast
            | CastKind::FloatingToBoolean
            | CastKind::PointerToBoolean => {
                let value = self.eval_rvalue(inner)?;
                self.convert(value, ty)
            }
        }
    }

    pub(super) fn cast_place(
        &mut self,
        kind: CastKind<'ir>,
        inner: ExprP<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Pointer<'ir>, EvalError> {
        match kind {
            CastKind::NoOp => self.eval_glvalue(inner),
            CastKind::DerivedToBase(chain) => {
                let Some(from) = inner.ty.strip_atomic().record() else {
                    bug!(self, "derived-to-base cast of '{}'", inner.ty);
                };
                let object = self.eval_glvalue(inner)?;
                self.derived_to_base(&object, from, chain)
            }
            CastKind::BaseToDerived(chain) => {
                let Some(target) = ty.strip_atomic().record() else {
                    bug!(self, "base-to-derived cast to '{}'", ty);
                };
                let object = self.eval_glvalue(inner)?;
                self.base_to_derived(&object, target, chain)
            }
            CastKind::Reinterpret => Err(self.fail(ConstEvalErrorKind::ReinterpretCast)),
            other => bug!(self, "{:?} does not produce an lvalue", other),
        }
    }

    fn member_pointer_step(
        &mut self,
        mp: &mut MemberPointer<'ir>,
        step: MemberStep<'ir>,
    ) -> Result<(), EvalError> {
        let (derived, base) = match step {
            MemberStep::ToBase { derived, base } | MemberStep::ToDerived { derived, base } => {
                (derived, base)
            }
        };

        let is_virtual = self
            .lift(derived.get_record())?
            .bases
            .iter()
            .any(|b| b.record == base && b.is_virtual);
        if is_virtual && mp.invalid.is_none() {
            mp.invalid = Some(format!(
                "conversion between member pointers of '{}' and its virtual base '{}'",
                derived.name(),
                base.name()
            ));
        }

        mp.push(step);
        Ok(())
    }

    // Intrinsics

    pub(super) fn intrinsic(
        &mut self,
        intrinsic: &Intrinsic<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        match intrinsic {
            Intrinsic::SizeOf(operand) => {
                let size = self.lift(self.layouter.size_of(operand))?;
                self.make_int(size, ty)
            }
            Intrinsic::AlignOf(operand, op) => {
                let align = self.lift(self.layouter.align_of_operator(
                    operand,
                    *op,
                    self.options.align_of_compat,
                ))?;
                self.make_int(align, ty)
            }
            Intrinsic::OffsetOf(operand, designators) => {
                let offset = self.lift(self.layouter.offset_of(operand, designators))?;
                self.make_int(offset, ty)
            }
            Intrinsic::ClassifyType(operand) => {
                let class = self.layouter.classify(operand);
                self.make_int(class.code(), ty)
            }
            Intrinsic::IsConstantEvaluated => {
                self.truth(self.options.mode == EvalMode::ConstantExpression, ty)
            }
            Intrinsic::Expect(value, _) => self.eval_rvalue(value),
            Intrinsic::Unreachable => Err(self.fail(ConstEvalErrorKind::Unreachable)),
            Intrinsic::Asm(_) => Err(self.fail(ConstEvalErrorKind::InlineAsm)),
            Intrinsic::Volatile(operand) => Err(self.fail(ConstEvalErrorKind::VolatileRead(
                operand.ty.to_string(),
            ))),
        }
    }
}

fn float_op(op: BinOp) -> Option<FloatOp> {
    match op {
        BinOp::Plus => Some(FloatOp::Add),
        BinOp::Minus => Some(FloatOp::Sub),
        BinOp::Mul => Some(FloatOp::Mul),
        BinOp::Div => Some(FloatOp::Div),
        _ => None,
    }
}

/// Orders subobjects of one complete object by declaration order.
fn order_key(ptr: &Pointer<'_>) -> Vec<(u8, usize)> {
    let mut key: Vec<_> = ptr
        .path
        .iter()
        .map(|elem| match elem {
            PathElem::Base(b) => (0, b.id.id),
            PathElem::Field(i) | PathElem::Index(i) => (1, *i),
            PathElem::VirtualBase(b) => (2, b.id.id),
        })
        .collect();
    if ptr.past_end {
        key.push((3, 0));
    }
    key
}

fn base_key(base: &PointerBase<'_>) -> (u8, usize) {
    match base {
        PointerBase::Null => (0, 0),
        PointerBase::Global(item) => (1, item.id.id),
        PointerBase::Block(id) => (2, id.0),
        PointerBase::String(bytes) => (3, bytes.as_ptr() as usize),
    }
}

/// Integer types narrower than `int` that undergo integral promotion.
fn is_promotable(ty: TyP<'_>) -> bool {
    matches!(ty.strip_atomic(), Ty::Builtin(_) | Ty::Enum(_))
}

/// Member accesses on the left of an assignment, looking through subscripts
/// of member arrays.
fn named_members(mut expr: ExprP<'_>) -> usize {
    let mut count = 0;
    loop {
        expr = match &expr.kind {
            ExprKind::Field(inner, _) => {
                count += 1;
                *inner
            }
            ExprKind::Index(ptr, _) => match &ptr.kind {
                ExprKind::Cast(CastKind::ArrayToPointerDecay, array) => *array,
                _ => return count,
            },
            _ => return count,
        };
    }
}
