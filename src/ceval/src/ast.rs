use crate::common::FileId;

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: Option<usize>,
    pub file: FileId,
}

impl Span {
    pub fn new(file: FileId, start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column: Some(column),
            file,
        }
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && self.end >= other.end && self.file == other.file
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Neq,
    Lt,
    LEq,
    Gt,
    GEq,
    LShift,
    RShift,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::LEq | BinOp::Gt | BinOp::GEq
        )
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Neq)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn is_shift(&self) -> bool {
        matches!(self, BinOp::LShift | BinOp::RShift)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::LEq => "<=",
            BinOp::Gt => ">",
            BinOp::GEq => ">=",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

/// Scalar types whose representation depends on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Void,
    Bool,
    Char,
    SChar,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Int128,
    UInt128,
    Float,
    Double,
    LongDouble,
    NullPtr,
}

impl BuiltinType {
    pub fn is_integer(&self) -> bool {
        !matches!(
            self,
            BuiltinType::Void
                | BuiltinType::Bool
                | BuiltinType::Float
                | BuiltinType::Double
                | BuiltinType::LongDouble
                | BuiltinType::NullPtr
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            BuiltinType::Float | BuiltinType::Double | BuiltinType::LongDouble
        )
    }

    /// Character types may alias any object representation and are allowed to
    /// observe indeterminate values when copied.
    pub fn is_byte_like(&self) -> bool {
        matches!(self, BuiltinType::UChar | BuiltinType::Char)
    }
}

impl Display for BuiltinType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuiltinType::Void => "void",
            BuiltinType::Bool => "bool",
            BuiltinType::Char => "char",
            BuiltinType::SChar => "signed char",
            BuiltinType::UChar => "unsigned char",
            BuiltinType::Short => "short",
            BuiltinType::UShort => "unsigned short",
            BuiltinType::Int => "int",
            BuiltinType::UInt => "unsigned int",
            BuiltinType::Long => "long",
            BuiltinType::ULong => "unsigned long",
            BuiltinType::LongLong => "long long",
            BuiltinType::ULongLong => "unsigned long long",
            BuiltinType::Int128 => "__int128",
            BuiltinType::UInt128 => "unsigned __int128",
            BuiltinType::Float => "float",
            BuiltinType::Double => "double",
            BuiltinType::LongDouble => "long double",
            BuiltinType::NullPtr => "std::nullptr_t",
        };

        f.write_str(name)
    }
}
