//! Checked arithmetic on [`IntValue`] and floating point values.
//!
//! Every operation produces a value, even when it is not allowed in a constant
//! expression. In that case the value is what the target machine would have
//! produced, and the reason is attached so the caller can decide whether to
//! tolerate it.

use crate::global_ctx::LangStandard;
use crate::ir::const_eval::value::IntValue;
use crate::ir::const_eval::ConstEvalErrorKind;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive, Zero};

#[derive(Debug, Clone, PartialEq)]
pub struct Checked<T> {
    pub value: T,
    pub issue: Option<ConstEvalErrorKind>,
}

impl<T> Checked<T> {
    pub fn ok(value: T) -> Self {
        Self { value, issue: None }
    }

    pub fn with_issue(value: T, issue: ConstEvalErrorKind) -> Self {
        Self {
            value,
            issue: Some(issue),
        }
    }
}

/// Signed results must be representable, unsigned ones wrap around.
fn overflowing(exact: BigInt, like: &IntValue, ty_name: &str) -> Checked<IntValue> {
    if like.signed && !IntValue::fits(&exact, like.bits, true) {
        let issue = ConstEvalErrorKind::OutOfRange(exact.to_string(), ty_name.to_string());
        return Checked::with_issue(IntValue::new(exact, like.bits, like.signed), issue);
    }

    Checked::ok(IntValue::new(exact, like.bits, like.signed))
}

pub fn add(lhs: &IntValue, rhs: &IntValue, ty_name: &str) -> Checked<IntValue> {
    overflowing(&lhs.value + &rhs.value, lhs, ty_name)
}

pub fn sub(lhs: &IntValue, rhs: &IntValue, ty_name: &str) -> Checked<IntValue> {
    overflowing(&lhs.value - &rhs.value, lhs, ty_name)
}

pub fn mul(lhs: &IntValue, rhs: &IntValue, ty_name: &str) -> Checked<IntValue> {
    overflowing(&lhs.value * &rhs.value, lhs, ty_name)
}

pub fn div(lhs: &IntValue, rhs: &IntValue, ty_name: &str) -> Checked<IntValue> {
    if rhs.is_zero() {
        return Checked::with_issue(
            IntValue::zero(lhs.bits, lhs.signed),
            ConstEvalErrorKind::DivisionByZero,
        );
    }

    // Truncates towards zero
    overflowing(&lhs.value / &rhs.value, lhs, ty_name)
}

pub fn rem(lhs: &IntValue, rhs: &IntValue, ty_name: &str) -> Checked<IntValue> {
    if rhs.is_zero() {
        return Checked::with_issue(
            IntValue::zero(lhs.bits, lhs.signed),
            ConstEvalErrorKind::DivisionByZero,
        );
    }

    // MIN % -1 is undefined because MIN / -1 is
    let quotient = &lhs.value / &rhs.value;
    if lhs.signed && !IntValue::fits(&quotient, lhs.bits, true) {
        return Checked::with_issue(
            IntValue::zero(lhs.bits, lhs.signed),
            ConstEvalErrorKind::OutOfRange(quotient.to_string(), ty_name.to_string()),
        );
    }

    Checked::ok(IntValue::new(&lhs.value % &rhs.value, lhs.bits, lhs.signed))
}

pub fn neg(operand: &IntValue, ty_name: &str) -> Checked<IntValue> {
    overflowing(-operand.value.clone(), operand, ty_name)
}

pub fn bit_not(operand: &IntValue) -> IntValue {
    IntValue::new(-operand.value.clone() - 1, operand.bits, operand.signed)
}

pub fn bit_and(lhs: &IntValue, rhs: &IntValue) -> IntValue {
    IntValue::new(&lhs.value & &rhs.value, lhs.bits, lhs.signed)
}

pub fn bit_or(lhs: &IntValue, rhs: &IntValue) -> IntValue {
    IntValue::new(&lhs.value | &rhs.value, lhs.bits, lhs.signed)
}

pub fn bit_xor(lhs: &IntValue, rhs: &IntValue) -> IntValue {
    IntValue::new(&lhs.value ^ &rhs.value, lhs.bits, lhs.signed)
}

/// Validates the shift count against the width of the shifted type. The
/// fallback count is the one the hardware would use.
fn shift_count(count: &IntValue, bits: u32) -> Checked<u32> {
    let modulo = || {
        let m = count.value.clone() % BigInt::from(bits);
        let m = if m < BigInt::zero() { m + bits } else { m };
        m.to_u32().unwrap_or(0)
    };

    if count.is_negative() {
        return Checked::with_issue(
            modulo(),
            ConstEvalErrorKind::NegativeShift(count.to_string()),
        );
    }

    if count.value >= BigInt::from(bits) {
        return Checked::with_issue(
            modulo(),
            ConstEvalErrorKind::ShiftTooLarge(count.to_string(), bits),
        );
    }

    Checked::ok(modulo())
}

pub fn shl(lhs: &IntValue, rhs: &IntValue, standard: LangStandard) -> Checked<IntValue> {
    let count = shift_count(rhs, lhs.bits);
    let exact = &lhs.value << count.value;
    let value = IntValue::new(exact.clone(), lhs.bits, lhs.signed);

    if let Some(issue) = count.issue {
        return Checked::with_issue(value, issue);
    }

    // C++20 defines signed left shift as multiplication modulo 2^N
    if !lhs.signed || standard.cxx20() {
        return Checked::ok(value);
    }

    if lhs.is_negative() {
        return Checked::with_issue(
            value,
            ConstEvalErrorKind::LeftShiftOfNegative(lhs.to_string()),
        );
    }

    // C++11 allows shifting into the sign bit, C does not
    let representable = if standard.is_cpp() {
        IntValue::fits(&exact, lhs.bits, false)
    } else {
        IntValue::fits(&exact, lhs.bits, true)
    };

    if !representable {
        return Checked::with_issue(
            value,
            ConstEvalErrorKind::ShiftDiscardsBits(lhs.to_string(), rhs.to_string()),
        );
    }

    Checked::ok(value)
}

pub fn shr(lhs: &IntValue, rhs: &IntValue) -> Checked<IntValue> {
    let count = shift_count(rhs, lhs.bits);
    // Arithmetic shift, rounds towards negative infinity
    let value = IntValue::new(&lhs.value >> count.value, lhs.bits, lhs.signed);

    Checked {
        value,
        issue: count.issue,
    }
}

/// Rejects results that are not finite when the operands were.
fn float_result(result: f64, operands_finite: bool) -> Checked<f64> {
    if result.is_nan() && operands_finite {
        return Checked::with_issue(result, ConstEvalErrorKind::FloatNaN);
    }
    if result.is_infinite() && operands_finite {
        return Checked::with_issue(result, ConstEvalErrorKind::FloatInfinity);
    }
    Checked::ok(result)
}

pub fn float_binary(lhs: f64, rhs: f64, op: FloatOp) -> Checked<f64> {
    let finite = lhs.is_finite() && rhs.is_finite();
    match op {
        FloatOp::Add => float_result(lhs + rhs, finite),
        FloatOp::Sub => float_result(lhs - rhs, finite),
        FloatOp::Mul => float_result(lhs * rhs, finite),
        FloatOp::Div => {
            if rhs == 0.0 {
                return Checked::with_issue(lhs / rhs, ConstEvalErrorKind::FloatDivisionByZero);
            }
            float_result(lhs / rhs, finite)
        }
    }
}

/// Same as [`float_binary`], rounded through single precision.
pub fn float_binary_f32(lhs: f32, rhs: f32, op: FloatOp) -> Checked<f32> {
    let finite = lhs.is_finite() && rhs.is_finite();
    let result = match op {
        FloatOp::Add => lhs + rhs,
        FloatOp::Sub => lhs - rhs,
        FloatOp::Mul => lhs * rhs,
        FloatOp::Div => {
            if rhs == 0.0 {
                return Checked::with_issue(lhs / rhs, ConstEvalErrorKind::FloatDivisionByZero);
            }
            lhs / rhs
        }
    };

    let checked = float_result(result as f64, finite);
    Checked {
        value: result,
        issue: checked.issue,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Truncates towards zero. The value must fit the target type.
pub fn float_to_int(value: f64, bits: u32, signed: bool, ty_name: &str) -> Checked<IntValue> {
    let truncated = value.trunc();
    let exact = if truncated.is_finite() {
        BigInt::from_f64(truncated)
    } else {
        None
    };

    match exact {
        Some(exact) if IntValue::fits(&exact, bits, signed) => {
            Checked::ok(IntValue::new(exact, bits, signed))
        }
        _ => Checked::with_issue(
            IntValue::zero(bits, signed),
            ConstEvalErrorKind::OutOfRange(value.to_string(), ty_name.to_string()),
        ),
    }
}

/// A finite value that does not fit single precision is out of range.
pub fn narrow_float(value: f64, ty_name: &str) -> Checked<f32> {
    let narrowed = value as f32;
    if value.is_finite() && narrowed.is_infinite() {
        return Checked::with_issue(
            narrowed,
            ConstEvalErrorKind::OutOfRange(value.to_string(), ty_name.to_string()),
        );
    }
    Checked::ok(narrowed)
}
