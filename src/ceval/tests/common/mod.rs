#![allow(dead_code)]

use ceval::ast::BuiltinType;
use ceval::ir::builder::{ExpressionBuilder, FunctionBuilder, StatementBuilder, TypeBuilder};
use ceval::ir::{ExprP, ItemP, Statement, TyP};
use ceval::{Diagnostics, Driver, EvalOptions, GlobalCtx, IrCtx, ReasonCode};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

pub struct Builders<'ir> {
    pub ir: &'ir IrCtx<'ir>,
    pub types: TypeBuilder<'ir>,
    pub exprs: ExpressionBuilder<'ir>,
    pub stmts: StatementBuilder<'ir>,
}

impl<'ir> Builders<'ir> {
    pub fn new(ir: &'ir IrCtx<'ir>) -> Self {
        init_tracing();

        Self {
            ir,
            types: TypeBuilder::new(ir),
            exprs: ExpressionBuilder::new(ir),
            stmts: StatementBuilder::new(ir),
        }
    }

    pub fn int(&self) -> TyP<'ir> {
        self.types.builtin(BuiltinType::Int)
    }

    pub fn bool(&self) -> TyP<'ir> {
        self.types.builtin(BuiltinType::Bool)
    }

    pub fn void(&self) -> TyP<'ir> {
        self.types.void()
    }

    /// An `int` literal.
    pub fn lit(&self, value: i128) -> ExprP<'ir> {
        self.exprs.int(value, self.int(), None)
    }

    pub fn ret(&self, value: ExprP<'ir>) -> Statement<'ir> {
        self.stmts.ret(Some(value))
    }

    /// `constexpr int name(int a, int b) { return op(a, b); }`
    pub fn binary_function(
        &self,
        name: &str,
        body: impl FnOnce(ExprP<'ir>, ExprP<'ir>) -> ExprP<'ir>,
    ) -> ItemP<'ir> {
        let int = self.int();
        let mut f = FunctionBuilder::new(self.ir, name, int);
        let a = f.param("a", int);
        let b = f.param("b", int);

        let result = body(
            self.exprs.local(a, int, None),
            self.exprs.local(b, int, None),
        );
        f.build(vec![self.ret(result)]).unwrap()
    }

    /// A nullary constexpr function made of the given statements.
    pub fn function(&self, name: &str, ret: TyP<'ir>, body: Vec<Statement<'ir>>) -> ItemP<'ir> {
        FunctionBuilder::new(self.ir, name, ret).build(body).unwrap()
    }

    pub fn call(&self, func: ItemP<'ir>, args: Vec<ExprP<'ir>>) -> ExprP<'ir> {
        self.exprs.call_function(func, args, None)
    }
}

pub fn driver<'ir>(ir: &'ir IrCtx<'ir>) -> Driver<'ir> {
    Driver::new(GlobalCtx::default(), ir)
}

pub fn driver_with<'ir>(ir: &'ir IrCtx<'ir>, options: EvalOptions) -> Driver<'ir> {
    Driver::new(GlobalCtx::new(options), ir)
}

pub fn reason(diagnostics: &Diagnostics) -> Option<ReasonCode> {
    diagnostics
        .primary()
        .and_then(|e| e.const_eval_kind())
        .map(|k| k.code())
}

pub fn message(diagnostics: &Diagnostics) -> String {
    diagnostics
        .primary()
        .map(|e| e.kind.to_string())
        .unwrap_or_default()
}

pub fn as_int(value: &ceval::Value<'_>) -> i128 {
    value.as_i128().expect("integer value")
}
