use std::{
    cell::{Ref, RefCell},
    rc::Rc,
};

use serde::{Deserialize, Serialize};

use crate::common::{EvalError, IndexSet};
use crate::diagnostics::DiagnosticContext;
use crate::ir::const_eval::ReasonCode;
use crate::ir::layout::{AlignOfCompat, TargetInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EvalMode {
    /// The result must be a constant expression; every failure is an error.
    #[default]
    ConstantExpression,
    /// Speculative folding; the reasons listed in [`FoldingPolicy`] are tolerated.
    Fold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LangStandard {
    C11,
    C23,
    Cxx11,
    Cxx14,
    Cxx17,
    #[default]
    Cxx20,
    Cxx23,
}

impl LangStandard {
    pub fn is_cpp(self) -> bool {
        !matches!(self, LangStandard::C11 | LangStandard::C23)
    }

    /// Changing the active union member and the relaxed shift rules arrived in C++20.
    pub fn cxx20(self) -> bool {
        matches!(self, LangStandard::Cxx20 | LangStandard::Cxx23)
    }

    /// `a << b` evaluates `a` first.
    pub fn sequences_shift_operands(self) -> bool {
        self.cxx17()
    }

    /// `a = b` evaluates `b` first.
    pub fn sequences_assignment_operands(self) -> bool {
        self.cxx17()
    }

    fn cxx17(self) -> bool {
        matches!(
            self,
            LangStandard::Cxx17 | LangStandard::Cxx20 | LangStandard::Cxx23
        )
    }
}

/// The exact set of reasons that folding mode tolerates. A tolerated failure continues
/// with a defined fallback value and is reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldingPolicy {
    pub soft: IndexSet<ReasonCode>,
}

impl Default for FoldingPolicy {
    fn default() -> Self {
        Self {
            soft: [
                ReasonCode::OutOfRange,
                ReasonCode::ShiftTooLarge,
                ReasonCode::NegativeShift,
                ReasonCode::LeftShiftOfNegative,
                ReasonCode::ShiftDiscardsBits,
                ReasonCode::FloatInfinity,
                ReasonCode::FloatNaN,
                ReasonCode::FloatDivisionByZero,
                ReasonCode::UnspecifiedComparison,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl FoldingPolicy {
    pub fn none() -> Self {
        Self {
            soft: IndexSet::default(),
        }
    }

    pub fn is_soft(&self, code: ReasonCode) -> bool {
        self.soft.contains(&code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalOptions {
    pub mode: EvalMode,
    pub standard: LangStandard,
    pub max_depth: usize,
    pub max_steps: usize,
    pub backtrace_limit: usize,
    pub align_of_compat: AlignOfCompat,
    pub target: TargetInfo,
    pub folding: FoldingPolicy,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            mode: EvalMode::ConstantExpression,
            standard: LangStandard::default(),
            max_depth: 512,
            max_steps: 1_048_576,
            backtrace_limit: 10,
            align_of_compat: AlignOfCompat::Standard,
            target: TargetInfo::x86_64(),
            folding: FoldingPolicy::default(),
        }
    }
}

impl EvalOptions {
    pub fn from_json(json: &str) -> Result<Self, EvalError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, EvalError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

struct GlobalCtxInner {
    pub diag: DiagnosticContext,
    pub options: EvalOptions,
}

#[derive(Clone)]
pub struct GlobalCtx {
    inner: Rc<RefCell<GlobalCtxInner>>,
}

impl Default for GlobalCtx {
    fn default() -> Self {
        Self::new(EvalOptions::default())
    }
}

impl GlobalCtx {
    pub fn new(options: EvalOptions) -> Self {
        Self {
            inner: Rc::new(RefCell::new(GlobalCtxInner {
                diag: DiagnosticContext::new(),
                options,
            })),
        }
    }

    pub fn diag(&self) -> Ref<'_, DiagnosticContext> {
        Ref::map(self.inner.borrow(), |inner| &inner.diag)
    }

    pub fn options(&self) -> Ref<'_, EvalOptions> {
        Ref::map(self.inner.borrow(), |inner| &inner.options)
    }

    pub fn set_mode(&self, mode: EvalMode) {
        self.inner.borrow_mut().options.mode = mode;
    }

    pub fn mode(&self) -> EvalMode {
        self.inner.borrow().options.mode
    }

    pub fn standard(&self) -> LangStandard {
        self.inner.borrow().options.standard
    }
}
