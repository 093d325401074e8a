use crate::ast::Span;
use crate::ir::const_eval::ConstEvalErrorKind;

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;
use std::result::Result;
use strum_macros::AsRefStr;
use thiserror::Error;

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<T> = rustc_hash::FxHashSet<T>;
pub type IndexMap<K, V> =
    indexmap::IndexMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;
pub type IndexSet<K> = indexmap::IndexSet<K, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("code errors: {0:?}")]
    CodeErrors(Vec<CodeError>),
    #[error("invalid evaluator configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl EvalError {
    /// The innermost failure, which is the one reported to the user.
    pub fn primary(&self) -> Option<&CodeError> {
        match self {
            EvalError::CodeErrors(errors) => errors.first(),
            EvalError::Config(_) => None,
        }
    }

    pub fn into_code_errors(self) -> Vec<CodeError> {
        match self {
            EvalError::CodeErrors(errors) => errors,
            EvalError::Config(e) => vec![CodeError::from_kind(
                CodeDiagnostic::InternalError(e.to_string()),
                None,
            )],
        }
    }
}

/// All diagnostics the evaluator can hand back to the type checker.
#[derive(AsRefStr, Debug, Error, Clone, Hash, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum CodeDiagnostic {
    #[error("expression is not a constant expression: {}", .0)]
    CannotConstEvaluate(ConstEvalErrorKind),
    #[error("static assertion failed")]
    StaticAssertFailed,
    #[error("static assertion failed: {}", .0)]
    StaticAssertFailedWithMessage(String),
    #[error("incomplete type `{}` used where a complete type is required", .0)]
    IncompleteType(String),
    #[error("type with infinite size (recursive type without indirection)")]
    TypeWithInfiniteSize,
    #[error("subobjects `{}` and `{}` of `{}` start at the same offset", .0, .1, .2)]
    OverlappingSubobjects(String, String, String),
    #[error("expression of type `{}` cannot be used as a constant of type `{}`", .0, .1)]
    TypeMismatch(String, String),
    #[error("unpopulated item")]
    UnpopulatedItem,
    #[error("internal error: {}", .0)]
    InternalError(String),
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum Marker {
    Span(Span),
    Call {
        callee: String,
        span: Option<Span>,
    },
    Note {
        message: String,
        span: Option<Span>,
    },
    Skipped(usize),
}

#[derive(Debug, Error, Clone, Hash, PartialEq, Eq)]
#[error("{}", .kind)]
pub struct CodeError {
    pub kind: CodeDiagnostic,
    pub backtrace: Vec<Marker>,
}

impl CodeError {
    pub fn from_kind(kind: CodeDiagnostic, span: Option<Span>) -> Self {
        Self {
            kind,
            backtrace: span.into_iter().map(Marker::Span).collect(),
        }
    }

    pub fn primary_span(&self) -> Option<Span> {
        self.backtrace.iter().find_map(|m| match m {
            Marker::Span(span) => Some(*span),
            _ => None,
        })
    }

    /// The "in call to" frames, innermost first.
    pub fn calls(&self) -> impl Iterator<Item = &str> {
        self.backtrace.iter().filter_map(|m| match m {
            Marker::Call { callee, .. } => Some(callee.as_str()),
            _ => None,
        })
    }

    pub fn notes(&self) -> impl Iterator<Item = &str> {
        self.backtrace.iter().filter_map(|m| match m {
            Marker::Note { message, .. } => Some(message.as_str()),
            _ => None,
        })
    }

    pub fn const_eval_kind(&self) -> Option<&ConstEvalErrorKind> {
        match &self.kind {
            CodeDiagnostic::CannotConstEvaluate(kind) => Some(kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    pub id: usize,
}

pub trait CodeErrorBuilder<T> {
    fn with_no_span(self) -> Result<T, EvalError>;
    fn with_span(self, span: Option<Span>) -> Result<T, EvalError>;
}

impl<T, E> CodeErrorBuilder<T> for Result<T, E>
where
    CodeDiagnostic: From<E>,
{
    fn with_no_span(self) -> Result<T, EvalError> {
        self.map_err(|e| {
            EvalError::CodeErrors(vec![CodeError {
                kind: e.into(),
                backtrace: vec![],
            }])
        })
    }

    fn with_span(self, span: Option<Span>) -> Result<T, EvalError> {
        self.map_err(|e| {
            EvalError::CodeErrors(vec![CodeError {
                kind: e.into(),
                backtrace: span.iter().map(|s| Marker::Span(*s)).collect(),
            }])
        })
    }
}

pub struct CycleGuardian<T: Eq + Hash + Clone> {
    inner: Rc<RefCell<HashSet<T>>>,
}

pub struct CycleGuard<T: Eq + Hash + Clone> {
    guardian: Rc<RefCell<HashSet<T>>>,
    value: T,
}

impl<T: Eq + Hash + Clone> Drop for CycleGuard<T> {
    fn drop(&mut self) {
        (*self.guardian).borrow_mut().remove(&self.value);
    }
}

impl<T: Eq + Hash + Clone> Default for CycleGuardian<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> CycleGuardian<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(HashSet::default())),
        }
    }

    pub fn guard(&self, value: T) -> Result<CycleGuard<T>, ()> {
        if !(*self.inner).borrow_mut().insert(value.clone()) {
            return Err(());
        }

        Ok(CycleGuard {
            guardian: self.inner.clone(),
            value,
        })
    }
}

pub trait Allocatable {}

impl<T: Allocatable> Allocatable for &'_ T {}

pub trait ArenaAllocatable<'ctx, Allocator> {
    type ReturnType;

    fn alloc_on(self, allocator: &'ctx Allocator) -> Self::ReturnType;
}

macro_rules! impl_allocatable {
    ($($t:ty),*) => {
        $(
            impl crate::common::Allocatable for $t {}
        )*
    }
}

pub(crate) use impl_allocatable;

pub trait Incrementable<T> {
    fn increment(&self) -> T;
}

macro_rules! impl_incrementable {
    ($($t:ty),*) => {
        $(
            impl Incrementable<$t> for ::std::cell::Cell<$t> {
                fn increment(&self) -> $t {
                    let old = self.get();
                    self.set(old + 1);
                    old
                }
            }
        )*
    };
}

impl_incrementable!(u32, u64, usize);
