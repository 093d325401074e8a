pub mod ast;
pub mod common;
pub mod diagnostics;
pub mod driver;
pub mod global_ctx;
pub mod ir;

pub use common::{CodeDiagnostic, CodeError, EvalError};
pub use driver::{Diagnostics, Driver, Evaluated};
pub use global_ctx::{EvalMode, EvalOptions, GlobalCtx, LangStandard};
pub use ir::const_eval::{value::Value, ConstEvalErrorKind, ReasonCode};
pub use ir::IrCtx;
