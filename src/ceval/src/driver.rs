use crate::ast::Span;
use crate::common::{CodeDiagnostic, CodeError, EvalError};
use crate::diagnostics::DiagnosticsStack;
use crate::global_ctx::{EvalMode, GlobalCtx};
use crate::ir::const_eval::value::Value;
use crate::ir::const_eval::ConstEvaluator;
use crate::ir::layout::Layouter;
use crate::ir::{ExprP, IrCtx, ItemP, TyP};

use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

/// A successful evaluation.
#[derive(Debug, Clone)]
pub struct Evaluated<'ir> {
    pub value: Value<'ir>,
    /// Failures that folding mode continued past.
    pub tolerated: Vec<CodeError>,
}

/// A failed evaluation. The first error is the primary diagnostic.
#[derive(Debug, Clone, Error)]
#[error("{}", .errors.first().map(|e| e.to_string()).unwrap_or_default())]
pub struct Diagnostics {
    pub errors: Vec<CodeError>,
}

impl Diagnostics {
    pub fn primary(&self) -> Option<&CodeError> {
        self.errors.first()
    }
}

impl From<EvalError> for Diagnostics {
    fn from(err: EvalError) -> Self {
        Self {
            errors: err.into_code_errors(),
        }
    }
}

/// Entry points used by the type checker. Each request is evaluated independently
/// against fresh evaluator state; only the record descriptor registry is shared.
pub struct Driver<'ir> {
    global_ctx: GlobalCtx,
    ir: &'ir IrCtx<'ir>,
    layouter: Rc<Layouter<'ir>>,
}

impl<'ir> Driver<'ir> {
    pub fn new(global_ctx: GlobalCtx, ir: &'ir IrCtx<'ir>) -> Self {
        let layouter = Rc::new(Layouter::new(&global_ctx));
        Self {
            global_ctx,
            ir,
            layouter,
        }
    }

    pub fn global_ctx(&self) -> &GlobalCtx {
        &self.global_ctx
    }

    pub fn layouter(&self) -> &Layouter<'ir> {
        &self.layouter
    }

    /// Evaluates `expr`, which must already have type `expected_ty`.
    pub fn evaluate_as_constant(
        &self,
        expr: ExprP<'ir>,
        expected_ty: TyP<'ir>,
    ) -> Result<Evaluated<'ir>, Diagnostics> {
        debug!(ty = %expected_ty, "evaluating constant expression");

        if expr.ty != expected_ty {
            let error = CodeError::from_kind(
                CodeDiagnostic::TypeMismatch(expr.ty.to_string(), expected_ty.to_string()),
                expr.span,
            );
            return Err(self.report(EvalMode::ConstantExpression, vec![error]));
        }

        let mode = self.global_ctx.mode();
        self.run(mode, |evaluator| evaluator.evaluate(expr))
    }

    /// Evaluates the initializer of a `constexpr` (or otherwise constant) variable.
    pub fn evaluate_as_constant_initializer(
        &self,
        var: ItemP<'ir>,
    ) -> Result<Evaluated<'ir>, Diagnostics> {
        debug!(var = var.name(), "evaluating constant initializer");

        let mode = self.global_ctx.mode();
        self.run(mode, |evaluator| evaluator.evaluate_initializer(var))
    }

    /// Calls `func` with already evaluated argument values.
    pub fn evaluate_call(
        &self,
        func: ItemP<'ir>,
        args: Vec<Value<'ir>>,
    ) -> Result<Evaluated<'ir>, Diagnostics> {
        debug!(function = func.name(), args = args.len(), "evaluating call");

        let mode = self.global_ctx.mode();
        self.run(mode, |evaluator| evaluator.evaluate_call(func, args))
    }

    /// `static_assert(cond, message)`. The condition is always evaluated strictly.
    pub fn static_assert(
        &self,
        cond: ExprP<'ir>,
        message: Option<&str>,
        span: Option<Span>,
    ) -> Result<(), Diagnostics> {
        debug!(message, "evaluating static assertion");

        let evaluated = self.run(EvalMode::ConstantExpression, |evaluator| {
            evaluator.evaluate(cond)
        })?;

        let holds = match &evaluated.value {
            Value::Bool(value) => *value,
            Value::Int(value) => !value.is_zero(),
            _ => {
                let error = CodeError::from_kind(
                    CodeDiagnostic::TypeMismatch(cond.ty.to_string(), "bool".to_string()),
                    cond.span,
                );
                return Err(self.report(EvalMode::ConstantExpression, vec![error]));
            }
        };

        if holds {
            return Ok(());
        }

        let kind = match message {
            Some(message) => CodeDiagnostic::StaticAssertFailedWithMessage(message.to_string()),
            None => CodeDiagnostic::StaticAssertFailed,
        };
        Err(self.report(
            EvalMode::ConstantExpression,
            vec![CodeError::from_kind(kind, span.or(cond.span))],
        ))
    }

    /// Speculative folding. Failures are silent and only indicate that the
    /// expression does not fold.
    pub fn try_fold(&self, expr: ExprP<'ir>) -> Option<Evaluated<'ir>> {
        self.run(EvalMode::Fold, |evaluator| evaluator.evaluate(expr))
            .ok()
    }

    fn run<F>(&self, mode: EvalMode, f: F) -> Result<Evaluated<'ir>, Diagnostics>
    where
        F: FnOnce(&mut ConstEvaluator<'ir>) -> Result<Value<'ir>, EvalError>,
    {
        let mut options = self.global_ctx.options().clone();
        options.mode = mode;

        let diag = DiagnosticsStack::new(options.backtrace_limit);
        let mut evaluator = ConstEvaluator::new(self.ir, self.layouter.clone(), options, diag);

        match f(&mut evaluator) {
            Ok(value) => {
                let tolerated = evaluator.into_tolerated();
                debug!(tolerated = tolerated.len(), "evaluation succeeded");
                Ok(Evaluated { value, tolerated })
            }
            Err(err) => {
                let errors = err.into_code_errors();
                debug!(
                    reason = errors.first().map(|e| e.kind.as_ref()),
                    "evaluation failed"
                );
                Err(self.report(mode, errors))
            }
        }
    }

    fn report(&self, mode: EvalMode, errors: Vec<CodeError>) -> Diagnostics {
        if mode == EvalMode::ConstantExpression {
            let diag = self.global_ctx.diag();
            for error in errors.iter().cloned() {
                diag.add_error(error);
            }
        }

        Diagnostics { errors }
    }
}
