use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumDiscriminants, EnumString};
use thiserror::Error;

use crate::common::CodeDiagnostic;

/// Reason for which an expression could not be evaluated as a constant.
///
/// Each variant has a fieldless twin in [`ReasonCode`], which is what the folding
/// policy and tooling match on.
#[derive(Debug, Error, Clone, Hash, PartialEq, Eq, AsRefStr, EnumDiscriminants)]
#[strum(serialize_all = "snake_case")]
#[strum_discriminants(name(ReasonCode))]
#[strum_discriminants(derive(Hash, PartialOrd, Ord, AsRefStr, EnumString, Serialize, Deserialize))]
pub enum ConstEvalErrorKind {
    // Malformed constants
    #[error("non-constexpr function '{}' cannot be used in a constant expression", .0)]
    NonConstexprFunction(String),
    #[error("undefined function '{}' cannot be used in a constant expression", .0)]
    UndefinedFunction(String),
    #[error("read of non-constexpr variable '{}' is not allowed in a constant expression", .0)]
    NonConstexprVariable(String),
    #[error("read of volatile-qualified type '{}' is not allowed in a constant expression", .0)]
    VolatileRead(String),
    #[error("inline assembly is not allowed in a constant expression")]
    InlineAsm,
    #[error("cast that performs the conversions of a reinterpret_cast is not allowed in a constant expression")]
    ReinterpretCast,
    #[error("statement not allowed in a constant expression ({})", .0)]
    NonConstantStatement(String),
    #[error("'throw' is not allowed in a constant expression")]
    Throw,
    #[error("reached unreachable code")]
    Unreachable,
    #[error("pure virtual function '{}' called", .0)]
    PureVirtualCall(String),
    #[error("call to a null function pointer")]
    NullFunctionCall,
    #[error("control reached the end of '{}' without returning a value", .0)]
    MissingReturn(String),
    #[error("unsequenced modification and access to '{}'", .0)]
    UnsequencedModification(String),
    #[error("{} is not supported in a constant expression", .0)]
    Unsupported(String),

    // Values out of range
    #[error("value {} is outside the range of representable values of type '{}'", .0, .1)]
    OutOfRange(String, String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("floating point division by zero")]
    FloatDivisionByZero,
    #[error("shift count {} >= width of type ({} bits)", .0, .1)]
    ShiftTooLarge(String, u32),
    #[error("negative shift count {}", .0)]
    NegativeShift(String),
    #[error("left shift of negative value {}", .0)]
    LeftShiftOfNegative(String),
    #[error("signed left shift of {} by {} discards bits", .0, .1)]
    ShiftDiscardsBits(String, String),
    #[error("floating point arithmetic produces an infinity")]
    FloatInfinity,
    #[error("floating point arithmetic produces a NaN")]
    FloatNaN,
    #[error("element index {} out of bounds for array of {} elements", .0, .1)]
    IndexOutOfBounds(String, usize),
    #[error("element index {} out of bounds for a non-array object", .0)]
    NonArrayIndexOutOfBounds(String),
    #[error("cannot refer to element {} of array of unknown bound", .0)]
    UnknownBoundIndex(String),
    #[error("cannot perform pointer arithmetic on a null pointer")]
    NullPointerArithmetic,
    #[error("subtracted pointers are not elements of the same array")]
    PointerDifferenceUnrelated,
    #[error("comparison {} has unspecified value", .0)]
    UnspecifiedComparison(String),

    // Object lifetime
    #[error("read of object outside its lifetime")]
    ReadOutsideLifetime,
    #[error("read of uninitialized object is not allowed in a constant expression")]
    UninitializedRead,
    #[error("{} of {} whose lifetime has ended", .0, .1)]
    LifetimeEnded(String, String),
    #[error("{} of heap allocated object that has been deleted", .0)]
    UseAfterFree(String),
    #[error("delete of pointer that has already been deleted")]
    DoubleDelete,
    #[error("delete of pointer '{}' that does not point to a heap-allocated object", .0)]
    InvalidDelete(String),
    #[error("delete of pointer '{}' that does not point to a complete object", .0)]
    DeleteOfSubobject(String),
    #[error("'{}' used to delete pointer to object allocated with '{}'", .0, .1)]
    MismatchedDelete(String, String),
    #[error("allocated storage of type '{}' was not deallocated", .0)]
    MemoryLeak(String),
    #[error("read of mutable member '{}' is not allowed in a constant expression", .0)]
    MutableRead(String),
    #[error("modification of object of const-qualified type '{}' is not allowed in a constant expression", .0)]
    ModifyConst(String),
    #[error("a constant expression cannot modify an object that is visible outside that expression ('{}')", .0)]
    ModifyGlobal(String),
    #[error("pointer to '{}' is not a constant expression", .0)]
    PointerToLocal(String),
    #[error("pointer to temporary is not a constant expression")]
    PointerToTemporary,
    #[error("pointer to heap-allocated object is not a constant expression")]
    PointerToHeap,
    #[error("dereferencing a null pointer is not allowed in a constant expression")]
    NullDereference,
    #[error("{} of dereferenced null pointer is not allowed in a constant expression", .0)]
    NullAccess(String),
    #[error("{} of dereferenced one-past-the-end pointer is not allowed in a constant expression", .0)]
    PastEndAccess(String),
    #[error("subobject of type '{}' is not initialized", .0)]
    UninitializedSubobject(String),

    // Layout and type system
    #[error("invalid application of a size or alignment query to an incomplete type '{}'", .0)]
    IncompleteType(String),
    #[error("type with infinite size")]
    InfiniteSize,
    #[error("{} of member '{}' of union with active member '{}' is not allowed in a constant expression", .0, .1, .2)]
    InactiveUnionMember(String, String, String),
    #[error("{} of member '{}' of union with no active member is not allowed in a constant expression", .0, .1)]
    NoActiveUnionMember(String, String),
    #[error("cannot cast object of dynamic type '{}' to type '{}'", .0, .1)]
    InvalidDowncast(String, String),
    #[error("{} applied to object '{}' whose dynamic type is not constant", .0, .1)]
    DynamicTypeNotConstant(String, String),
    #[error("reference dynamic_cast failed: dynamic type '{}' of operand does not have a unique public base class of type '{}'", .0, .1)]
    BadDynamicCast(String, String),
    #[error("dereferencing a null member pointer")]
    NullMemberPointer,
    #[error("member pointer cannot be used: {}", .0)]
    InvalidMemberPointer(String),

    // Complexity budget
    #[error("constexpr evaluation exceeded maximum depth of {} calls", .0)]
    TooDeep(usize),
    #[error("constexpr evaluation hit maximum step limit of {}; possible infinite loop?", .0)]
    TooManySteps(usize),

    #[error("internal evaluator error: {}", .0)]
    CompilerBug(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    MalformedConstant,
    ValueOutOfRange,
    Lifetime,
    Layout,
    Complexity,
    Internal,
}

impl ReasonCode {
    pub fn category(self) -> ErrorCategory {
        use ReasonCode::*;

        match self {
            NonConstexprFunction | UndefinedFunction | NonConstexprVariable | VolatileRead
            | InlineAsm | ReinterpretCast | NonConstantStatement | Throw | Unreachable
            | PureVirtualCall | NullFunctionCall | MissingReturn | UnsequencedModification
            | Unsupported => ErrorCategory::MalformedConstant,

            OutOfRange | DivisionByZero | FloatDivisionByZero | ShiftTooLarge | NegativeShift
            | LeftShiftOfNegative | ShiftDiscardsBits | FloatInfinity | FloatNaN
            | IndexOutOfBounds | NonArrayIndexOutOfBounds | UnknownBoundIndex
            | NullPointerArithmetic | PointerDifferenceUnrelated | UnspecifiedComparison => {
                ErrorCategory::ValueOutOfRange
            }

            ReadOutsideLifetime | UninitializedRead | LifetimeEnded | UseAfterFree
            | DoubleDelete | InvalidDelete | DeleteOfSubobject | MismatchedDelete
            | MemoryLeak | MutableRead | ModifyConst | ModifyGlobal | PointerToLocal
            | PointerToTemporary | PointerToHeap | NullDereference | NullAccess
            | PastEndAccess | UninitializedSubobject => ErrorCategory::Lifetime,

            IncompleteType | InfiniteSize | InactiveUnionMember | NoActiveUnionMember
            | InvalidDowncast | DynamicTypeNotConstant | BadDynamicCast | NullMemberPointer
            | InvalidMemberPointer => ErrorCategory::Layout,

            TooDeep | TooManySteps => ErrorCategory::Complexity,

            CompilerBug => ErrorCategory::Internal,
        }
    }
}

impl ConstEvalErrorKind {
    pub fn code(&self) -> ReasonCode {
        ReasonCode::from(self)
    }

    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }
}

impl From<ConstEvalErrorKind> for CodeDiagnostic {
    fn from(kind: ConstEvalErrorKind) -> Self {
        CodeDiagnostic::CannotConstEvaluate(kind)
    }
}

impl From<CodeDiagnostic> for ConstEvalErrorKind {
    fn from(diag: CodeDiagnostic) -> Self {
        match diag {
            CodeDiagnostic::CannotConstEvaluate(kind) => kind,
            CodeDiagnostic::IncompleteType(ty) => ConstEvalErrorKind::IncompleteType(ty),
            CodeDiagnostic::TypeWithInfiniteSize => ConstEvalErrorKind::InfiniteSize,
            other => ConstEvalErrorKind::CompilerBug(other.to_string()),
        }
    }
}
