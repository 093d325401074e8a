//! An interpreter for constant expressions.
//!
//! Every top-level request gets its own [`ConstEvaluator`], which owns all the
//! objects created during the evaluation. Objects that exist outside of the
//! evaluation (namespace-scope variables) are materialized into it on first use,
//! so nothing one evaluation does can be observed by another.

macro_rules! bug {
    ($self:expr, $($arg:tt)*) => {
        return Err($crate::ir::const_eval::ConstEvalErrorKind::CompilerBug(format!($($arg)*)))
            .with_backtrace(&$self.diag)
    };
}

pub mod arith;
pub mod error;
pub mod memory;
mod object;
mod ops;
pub mod value;

pub use error::{ConstEvalErrorKind, ErrorCategory, ReasonCode};

use crate::ast::BuiltinType;
use crate::common::{CodeError, EvalError, HashMap};
use crate::diagnostics::{DiagnosticsStack, WithBacktrace};
use crate::global_ctx::{EvalMode, EvalOptions};
use crate::ir::builder::TypeBuilder;
use crate::ir::const_eval::arith::Checked;
use crate::ir::const_eval::memory::{
    AccessKind, Block, BlockKind, BlockState, Memory, WriteMode,
};
use crate::ir::const_eval::value::{
    uninitialized, zeroed, BlockId, IntValue, MemberPointer, PathElem, Pointer, PointerBase,
    Value,
};
use crate::ir::layout::Layouter;
use crate::ir::record::RecordDescriptor;
use crate::ir::{
    ExprKind, ExprP, Id, IrCtx, ItemP, Literal, LocalDecl, MemberRef, Statement, Ty, TyP,
};

use num_bigint::BigInt;
use std::rc::Rc;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
struct LocalSlot<'ir> {
    block: BlockId,
    ty: TyP<'ir>,
}

/// Activation record of a call. The evaluation of a top-level expression and
/// of the initializers of namespace-scope variables get one too.
struct Frame<'ir> {
    function: Option<ItemP<'ir>>,
    this: Option<Pointer<'ir>>,
    locals: HashMap<Id, LocalSlot<'ir>>,
    scopes: Vec<Vec<BlockId>>,
    /// Temporaries of the current full-expression.
    temporaries: Vec<BlockId>,
}

impl<'ir> Frame<'ir> {
    fn new(function: Option<ItemP<'ir>>, this: Option<Pointer<'ir>>) -> Self {
        Self {
            function,
            this,
            locals: HashMap::default(),
            scopes: vec![Vec::new()],
            temporaries: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum Flow<'ir> {
    Normal,
    Break,
    Continue,
    Return(Value<'ir>),
}

/// An access made while evaluating the operands of an operator, used to find
/// unsequenced modifications.
struct AccessRecord<'ir> {
    ptr: Pointer<'ir>,
    is_write: bool,
    depth: usize,
}

pub struct ConstEvaluator<'ir> {
    types: TypeBuilder<'ir>,
    layouter: Rc<Layouter<'ir>>,
    options: EvalOptions,
    diag: DiagnosticsStack,
    memory: Memory<'ir>,
    frames: Vec<Frame<'ir>>,
    /// Objects whose constructor or destructor is running, with the class whose
    /// constructor or destructor it is.
    constructing: Vec<(Pointer<'ir>, ItemP<'ir>)>,
    /// Arrays being initialized element by element, with the first element
    /// whose lifetime has not begun.
    unborn: Vec<(Pointer<'ir>, usize)>,
    steps: usize,
    tolerated: Vec<CodeError>,
    accesses: Vec<AccessRecord<'ir>>,
}

impl<'ir> ConstEvaluator<'ir> {
    pub fn new(
        ir: &'ir IrCtx<'ir>,
        layouter: Rc<Layouter<'ir>>,
        options: EvalOptions,
        diag: DiagnosticsStack,
    ) -> Self {
        Self {
            types: TypeBuilder::new(ir),
            layouter,
            options,
            diag,
            memory: Memory::new(),
            frames: Vec::new(),
            constructing: Vec::new(),
            unborn: Vec::new(),
            steps: 0,
            tolerated: Vec::new(),
            accesses: Vec::new(),
        }
    }

    pub fn mode(&self) -> EvalMode {
        self.options.mode
    }

    /// Failures that were tolerated because of the folding policy.
    pub fn tolerated(&self) -> &[CodeError] {
        &self.tolerated
    }

    pub fn into_tolerated(self) -> Vec<CodeError> {
        self.tolerated
    }

    /// Evaluates an expression as a constant expression.
    pub fn evaluate(&mut self, expr: ExprP<'ir>) -> Result<Value<'ir>, EvalError> {
        self.frames.push(Frame::new(None, None));

        let value = if expr.is_lvalue() && !matches!(expr.kind, ExprKind::Function(_)) {
            let place = self.eval_place(expr)?;
            let _guard = self.diag.push_span(expr.span);
            self.read_place(&place, expr.ty)?
        } else {
            self.eval_rvalue(expr)?
        };
        self.end_full_expression()?;

        let _guard = self.diag.push_span(expr.span);
        self.check_result(&value, expr.ty)?;
        Ok(value)
    }

    /// Evaluates the initializer of a variable. The variable itself is the only
    /// namespace-scope object the evaluation may modify.
    pub fn evaluate_initializer(&mut self, item: ItemP<'ir>) -> Result<Value<'ir>, EvalError> {
        let var = self.lift(item.get_var())?;
        let _guard = self.diag.push_span(var.span);

        let Some(init) = var.init else {
            return Err(self.fail(ConstEvalErrorKind::UninitializedSubobject(
                var.ty.to_string(),
            )));
        };

        self.frames.push(Frame::new(None, None));

        let value = self.lift(uninitialized(&self.layouter, var.ty))?;
        let id = self.memory.allocate(Block {
            kind: BlockKind::Global(item),
            ty: var.ty,
            value,
            state: BlockState::Pending,
            is_const: var.is_const || var.is_constexpr,
            foreign: false,
        });
        self.memory.bind_global(item, id);

        self.initialize(&Pointer::to(PointerBase::Global(item)), var.ty, init)?;
        self.memory.set_state(id, BlockState::Live).with_backtrace(&self.diag)?;
        self.end_full_expression()?;

        let value = self.lift(self.memory.block(id))?.value.clone();
        self.check_result(&value, var.ty)?;
        Ok(value)
    }

    /// Calls a function with already evaluated arguments.
    pub fn evaluate_call(
        &mut self,
        func: ItemP<'ir>,
        args: Vec<Value<'ir>>,
    ) -> Result<Value<'ir>, EvalError> {
        let return_type = self.lift(func.get_function())?.return_type;
        self.frames.push(Frame::new(None, None));

        let value = self.call(func, None, args)?;
        self.end_full_expression()?;

        self.check_result(&value, return_type)?;
        Ok(value)
    }

    fn lift<T, E>(&self, result: Result<T, E>) -> Result<T, EvalError>
    where
        ConstEvalErrorKind: From<E>,
    {
        result
            .map_err(ConstEvalErrorKind::from)
            .with_backtrace(&self.diag)
    }

    fn fail(&self, kind: ConstEvalErrorKind) -> EvalError {
        EvalError::CodeErrors(vec![self.diag.error(kind)])
    }

    fn fail_with_note(
        &self,
        kind: ConstEvalErrorKind,
        note: String,
        span: Option<crate::ast::Span>,
    ) -> EvalError {
        EvalError::CodeErrors(vec![self.diag.error_with_note(kind, note, span)])
    }

    /// Continues past a failure if the folding policy allows it.
    fn tolerate(&mut self, issue: Option<ConstEvalErrorKind>) -> Result<(), EvalError> {
        let Some(kind) = issue else {
            return Ok(());
        };

        if self.options.mode == EvalMode::Fold && self.options.folding.is_soft(kind.code()) {
            trace!(reason = kind.code().as_ref(), "tolerating failure while folding");
            self.tolerated.push(self.diag.error(kind));
            return Ok(());
        }

        Err(self.fail(kind))
    }

    fn checked<T>(&mut self, checked: Checked<T>) -> Result<T, EvalError> {
        self.tolerate(checked.issue)?;
        Ok(checked.value)
    }

    fn step(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        if self.steps > self.options.max_steps {
            return Err(self.fail(ConstEvalErrorKind::TooManySteps(self.options.max_steps)));
        }
        Ok(())
    }

    fn frame(&self) -> Result<&Frame<'ir>, EvalError> {
        match self.frames.last() {
            Some(frame) => Ok(frame),
            None => bug!(self, "no active frame"),
        }
    }

    fn frame_mut(&mut self) -> Result<&mut Frame<'ir>, EvalError> {
        if self.frames.is_empty() {
            bug!(self, "no active frame");
        }
        let last = self.frames.len() - 1;
        Ok(&mut self.frames[last])
    }

    fn descriptor(&self, item: ItemP<'ir>) -> Result<Rc<RecordDescriptor<'ir>>, EvalError> {
        self.lift(self.layouter.record(item))
    }

    fn make_int(&self, value: impl Into<BigInt>, ty: TyP<'ir>) -> Result<Value<'ir>, EvalError> {
        let value = value.into();
        if ty.strip_atomic().is_bool() {
            return Ok(Value::Bool(value != BigInt::from(0)));
        }

        match self.layouter.int_repr(ty) {
            Some((bits, signed)) => Ok(Value::Int(IntValue::new(value, bits, signed))),
            None => bug!(self, "'{}' is not an integer type", ty),
        }
    }

    /// Result of a comparison or logical operator, `bool` in C++ and `int` in C.
    fn truth(&self, value: bool, ty: TyP<'ir>) -> Result<Value<'ir>, EvalError> {
        if ty.strip_atomic().is_bool() {
            Ok(Value::Bool(value))
        } else {
            self.make_int(value as i32, ty)
        }
    }

    fn truthy(&self, value: &Value<'ir>) -> Result<bool, EvalError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(v) => Ok(!v.is_zero()),
            Value::F32(f) => Ok(*f != 0.0),
            Value::F64(f) => Ok(*f != 0.0),
            Value::Pointer(p) => Ok(!p.is_null()),
            Value::FunctionPointer(_) => Ok(true),
            Value::MemberPointer(mp) => Ok(mp.member.is_some()),
            _ => bug!(self, "{:?} used as a condition", value),
        }
    }

    // Objects

    /// The block a pointer designates an object in, materializing the
    /// namespace-scope variable it points to if needed.
    fn resolve_block(
        &mut self,
        ptr: &Pointer<'ir>,
        access: AccessKind,
    ) -> Result<BlockId, EvalError> {
        match ptr.base {
            PointerBase::Block(id) => Ok(id),
            PointerBase::Global(item) => self.global_block(item, access),
            PointerBase::Null => Err(self.fail(ConstEvalErrorKind::NullAccess(access.to_string()))),
            PointerBase::String(_) => bug!(self, "string literals have no block"),
        }
    }

    fn global_block(&mut self, item: ItemP<'ir>, access: AccessKind) -> Result<BlockId, EvalError> {
        if let Some(id) = self.memory.global(item) {
            return Ok(id);
        }

        let var = self.lift(item.get_var())?;
        let usable = var.is_constexpr
            || (var.is_const
                && !var.is_extern
                && (var.ty.strip_atomic().is_integral() || var.ty.is_reference()));

        let init = match (usable, var.init) {
            (true, Some(init)) => init,
            _ => {
                let kind = match access {
                    AccessKind::DynamicCast | AccessKind::TypeId => {
                        ConstEvalErrorKind::DynamicTypeNotConstant(
                            access.to_string(),
                            var.name.to_string(),
                        )
                    }
                    _ => ConstEvalErrorKind::NonConstexprVariable(var.name.to_string()),
                };
                return Err(self.fail_with_note(
                    kind,
                    format!("'{}' declared here", var.name),
                    var.span,
                ));
            }
        };

        trace!(variable = var.name, "materializing namespace-scope variable");

        let value = self.lift(uninitialized(&self.layouter, var.ty))?;
        let id = self.memory.allocate(Block {
            kind: BlockKind::Global(item),
            ty: var.ty,
            value,
            state: BlockState::Pending,
            is_const: true,
            foreign: false,
        });
        self.memory.bind_global(item, id);

        self.frames.push(Frame::new(None, None));
        self.initialize(&Pointer::to(PointerBase::Global(item)), var.ty, init)?;
        self.end_full_expression()?;
        self.frames.pop();

        let block = self.memory.block_mut(id).with_backtrace(&self.diag)?;
        block.state = BlockState::Live;
        block.foreign = true;

        Ok(id)
    }

    fn string_value(&self, bytes: &[u8]) -> Result<Value<'ir>, EvalError> {
        let char_ty = self.types.builtin(BuiltinType::Char);
        let mut elements = Vec::with_capacity(bytes.len() + 1);
        for b in bytes.iter().chain(std::iter::once(&0)) {
            let value = if self.layouter.target().char_signed {
                BigInt::from(*b as i8)
            } else {
                BigInt::from(*b)
            };
            elements.push(self.make_int(value, char_ty)?);
        }
        Ok(Value::Array(elements))
    }

    /// Checks that the designated object is within its lifetime.
    fn check_live(&mut self, ptr: &Pointer<'ir>, access: AccessKind) -> Result<(), EvalError> {
        match ptr.base {
            PointerBase::Null => Err(self.fail(ConstEvalErrorKind::NullAccess(access.to_string()))),
            PointerBase::String(_) => Ok(()),
            _ => {
                let id = self.resolve_block(ptr, access)?;
                self.lift(self.memory.check_access(id, ptr, access).map(|_| ()))
            }
        }
    }

    fn log_access(&mut self, ptr: &Pointer<'ir>, is_write: bool) {
        self.accesses.push(AccessRecord {
            ptr: ptr.clone(),
            is_write,
            depth: self.frames.len(),
        });
    }

    /// Accesses made by two unsequenced operands must not conflict.
    fn check_unsequenced(&self, mark: usize, mid: usize) -> Result<(), EvalError> {
        let depth = self.frames.len();
        let end = self.accesses.len();
        let (mark, mid) = (mark.min(end), mid.min(end));

        let left = self.accesses[mark..mid].iter().filter(|a| a.depth == depth);
        for l in left {
            let right = self.accesses[mid..].iter().filter(|a| a.depth == depth);
            for r in right {
                let overlap = l.ptr.contains(&r.ptr) || r.ptr.contains(&l.ptr);
                if overlap && (l.is_write || r.is_write) {
                    return Err(self.fail(ConstEvalErrorKind::UnsequencedModification(
                        self.object_name(&l.ptr),
                    )));
                }
            }
        }

        Ok(())
    }

    /// An aggregate may be copied even if parts of it are uninitialized.
    fn read_place(&mut self, ptr: &Pointer<'ir>, ty: TyP<'ir>) -> Result<Value<'ir>, EvalError> {
        let aggregate = matches!(
            ty.strip_atomic(),
            Ty::Record(_) | Ty::Array(_, _) | Ty::Vector(_, _) | Ty::Complex(_)
        );
        self.load(ptr, AccessKind::Read, !aggregate)
    }

    fn load(
        &mut self,
        ptr: &Pointer<'ir>,
        access: AccessKind,
        scalar: bool,
    ) -> Result<Value<'ir>, EvalError> {
        self.log_access(ptr, false);

        let value = match ptr.base {
            PointerBase::Null => {
                return Err(self.fail(ConstEvalErrorKind::NullAccess(access.to_string())))
            }
            PointerBase::String(bytes) => {
                let string = self.string_value(bytes)?;
                if ptr.past_end {
                    return Err(self.fail(ConstEvalErrorKind::PastEndAccess(access.to_string())));
                }
                self.lift(memory::project(&self.layouter, &string, &ptr.path, access))?
            }
            _ if self.is_unborn(ptr) => {
                return Err(self.fail(ConstEvalErrorKind::ReadOutsideLifetime))
            }
            _ => {
                let id = self.resolve_block(ptr, access)?;
                self.lift(self.memory.load(&self.layouter, id, ptr, access))?
            }
        };

        if scalar && value.is_indeterminate() {
            return Err(self.fail(ConstEvalErrorKind::UninitializedRead));
        }

        Ok(value)
    }

    fn is_unborn(&self, ptr: &Pointer<'ir>) -> bool {
        self.unborn.iter().any(|(array, first)| {
            array.contains(ptr)
                && matches!(ptr.path.get(array.path.len()), Some(PathElem::Index(i)) if i >= first)
        })
    }

    /// `named` counts the member accesses spelled out on the left of an
    /// assignment. Only union members named that way become active.
    fn write_mode(&self, ptr: &Pointer<'ir>, named: usize) -> WriteMode {
        // Objects under construction may be modified even when const
        if self.constructing.iter().any(|(p, _)| p.contains(ptr)) {
            return WriteMode::Initialize;
        }

        let standard = self.options.standard;
        let activate_from = if !standard.is_cpp() {
            Some(0)
        } else if standard.cxx20() && named > 0 {
            Some(named_suffix(&ptr.path, named))
        } else {
            None
        };

        WriteMode::Modify { activate_from }
    }

    fn store(
        &mut self,
        ptr: &Pointer<'ir>,
        value: Value<'ir>,
        access: AccessKind,
    ) -> Result<(), EvalError> {
        self.store_named(ptr, value, access, 0)
    }

    fn store_named(
        &mut self,
        ptr: &Pointer<'ir>,
        value: Value<'ir>,
        access: AccessKind,
        named: usize,
    ) -> Result<(), EvalError> {
        self.log_access(ptr, true);
        let mode = self.write_mode(ptr, named);
        self.write(ptr, value, access, mode)
    }

    /// Stores the initial value of an object whose lifetime is starting.
    fn init_store(&mut self, ptr: &Pointer<'ir>, value: Value<'ir>) -> Result<(), EvalError> {
        self.write(ptr, value, AccessKind::Construct, WriteMode::Initialize)
    }

    fn write(
        &mut self,
        ptr: &Pointer<'ir>,
        value: Value<'ir>,
        access: AccessKind,
        mode: WriteMode,
    ) -> Result<(), EvalError> {
        match ptr.base {
            PointerBase::Null => Err(self.fail(ConstEvalErrorKind::NullAccess(access.to_string()))),
            PointerBase::String(_) => Err(self.fail(ConstEvalErrorKind::ModifyConst(
                "const char".to_string(),
            ))),
            _ => {
                let id = self.resolve_block(ptr, access)?;
                let value = fit_subobject(ptr, value);
                self.memory
                    .write(&self.layouter, id, ptr, value, access, mode)
                    .with_backtrace(&self.diag)
            }
        }
    }

    /// Marks a complete object as live before it is initialized in place.
    fn begin_lifetime(&mut self, ptr: &Pointer<'ir>) -> Result<(), EvalError> {
        if !ptr.path.is_empty() {
            return Ok(());
        }

        let id = match ptr.base {
            PointerBase::Block(id) => id,
            PointerBase::Global(item) => match self.memory.global(item) {
                Some(id) => id,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        let block = self.memory.block_mut(id).with_backtrace(&self.diag)?;
        if block.state == BlockState::Pending {
            block.state = BlockState::Live;
        }
        Ok(())
    }

    fn allocate(
        &mut self,
        kind: BlockKind<'ir>,
        ty: TyP<'ir>,
    ) -> Result<(BlockId, Pointer<'ir>), EvalError> {
        let value = self.lift(uninitialized(&self.layouter, ty))?;
        let id = self.memory.allocate(Block {
            kind,
            ty,
            value,
            state: BlockState::Pending,
            is_const: false,
            foreign: false,
        });
        Ok((id, Pointer::to(PointerBase::Block(id))))
    }

    /// Creates a temporary for the current full-expression.
    fn materialize(&mut self, expr: ExprP<'ir>) -> Result<Pointer<'ir>, EvalError> {
        let (id, ptr) = self.allocate(BlockKind::Temporary, expr.ty)?;
        self.initialize(&ptr, expr.ty, expr)?;
        self.memory.set_state(id, BlockState::Live).with_backtrace(&self.diag)?;
        self.frame_mut()?.temporaries.push(id);
        Ok(ptr)
    }

    /// Builds a prvalue of class type in scratch storage, which ends right away.
    fn in_scratch(
        &mut self,
        ty: TyP<'ir>,
        init: impl FnOnce(&mut Self, &Pointer<'ir>) -> Result<(), EvalError>,
    ) -> Result<Value<'ir>, EvalError> {
        let (id, ptr) = self.allocate(BlockKind::Temporary, ty)?;
        init(self, &ptr)?;
        let value = self.lift(self.memory.block(id))?.value.clone();
        self.memory.kill(id).with_backtrace(&self.diag)?;
        Ok(value)
    }

    fn end_full_expression(&mut self) -> Result<(), EvalError> {
        let depth = self.frames.len();
        self.accesses.retain(|a| a.depth < depth);

        let temporaries = std::mem::take(&mut self.frame_mut()?.temporaries);
        for id in temporaries.into_iter().rev() {
            self.destroy_block(id)?;
        }
        Ok(())
    }

    fn destroy_block(&mut self, id: BlockId) -> Result<(), EvalError> {
        let block = self.lift(self.memory.block(id))?;
        if block.state == BlockState::Live {
            let ty = block.ty;
            if self.needs_destruction(ty)? {
                self.destroy(&Pointer::to(PointerBase::Block(id)), ty)?;
            }
        }
        self.memory.kill(id).with_backtrace(&self.diag)
    }

    fn push_scope(&mut self) -> Result<(), EvalError> {
        self.frame_mut()?.scopes.push(Vec::new());
        Ok(())
    }

    /// Destroys the objects of the innermost scope in reverse order of
    /// declaration.
    fn pop_scope(&mut self) -> Result<(), EvalError> {
        let blocks = self.frame_mut()?.scopes.pop().unwrap_or_default();
        for id in blocks.into_iter().rev() {
            self.destroy_block(id)?;
        }
        Ok(())
    }

    fn scoped(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<Flow<'ir>, EvalError>,
    ) -> Result<Flow<'ir>, EvalError> {
        self.push_scope()?;
        let flow = body(self)?;
        self.pop_scope()?;
        Ok(flow)
    }

    // Result checks

    fn check_result(&self, value: &Value<'ir>, ty: TyP<'ir>) -> Result<(), EvalError> {
        self.check_escape(value)?;

        if let Some(block) = self.memory.live_heap().next() {
            return Err(self.fail(ConstEvalErrorKind::MemoryLeak(block.ty.to_string())));
        }

        if let Some(ty) = self.find_indeterminate(value, ty)? {
            return Err(self.fail(ConstEvalErrorKind::UninitializedSubobject(ty)));
        }

        Ok(())
    }

    /// Pointers in the result may only designate objects with static storage.
    fn check_escape(&self, value: &Value<'ir>) -> Result<(), EvalError> {
        match value {
            Value::Pointer(p) | Value::Reference(p) => {
                if let PointerBase::Block(id) = p.base {
                    let block = self.lift(self.memory.block(id))?;
                    let kind = match block.kind {
                        BlockKind::Local(name) | BlockKind::Parameter(name) => {
                            ConstEvalErrorKind::PointerToLocal(name.to_string())
                        }
                        BlockKind::Temporary => ConstEvalErrorKind::PointerToTemporary,
                        BlockKind::Heap { .. } => ConstEvalErrorKind::PointerToHeap,
                        BlockKind::Global(_) => return Ok(()),
                    };
                    return Err(self.fail(kind));
                }
                Ok(())
            }
            Value::Array(elems) => elems.iter().try_for_each(|v| self.check_escape(v)),
            Value::Struct(record) => {
                for (_, v) in record.bases.iter().chain(record.virtual_bases.iter()) {
                    self.check_escape(v)?;
                }
                record.fields.iter().try_for_each(|v| self.check_escape(v))
            }
            Value::Union(union) => match &union.active {
                Some((_, v)) => self.check_escape(v),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// The type of an uninitialized subobject of the value, if any.
    fn find_indeterminate(
        &self,
        value: &Value<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Option<String>, EvalError> {
        let ty = ty.strip_atomic();
        match value {
            Value::Indeterminate if !ty.is_reference() => Ok(Some(ty.to_string())),
            Value::Struct(record) => {
                let descriptor = self.descriptor(record.record)?;
                for (base, v) in record.bases.iter().chain(record.virtual_bases.iter()) {
                    if let Some(found) = self.find_indeterminate(v, self.types.record(*base))? {
                        return Ok(Some(found));
                    }
                }
                for (field, v) in descriptor.fields.iter().zip(record.fields.iter()) {
                    if field.is_unnamed_bit_field() {
                        continue;
                    }
                    if let Some(found) = self.find_indeterminate(v, field.ty)? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
            Value::Union(union) => {
                let descriptor = self.descriptor(union.record)?;
                match &union.active {
                    Some((index, v)) => match descriptor.fields.get(*index) {
                        Some(field) => self.find_indeterminate(v, field.ty),
                        None => Ok(None),
                    },
                    None => Ok(None),
                }
            }
            Value::Array(elems) => {
                let element = match ty {
                    Ty::Complex(inner) => *inner,
                    _ => ty.element().unwrap_or(ty),
                };
                for v in elems {
                    if let Some(found) = self.find_indeterminate(v, element)? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    // Rendering for diagnostics

    fn object_name(&self, ptr: &Pointer<'ir>) -> String {
        match ptr.base {
            PointerBase::Null => "nullptr".to_string(),
            PointerBase::Global(item) => item.name().to_string(),
            PointerBase::String(_) => "string literal".to_string(),
            PointerBase::Block(id) => match self.memory.block(id).map(|b| b.kind) {
                Ok(BlockKind::Local(name)) | Ok(BlockKind::Parameter(name)) => name.to_string(),
                Ok(BlockKind::Global(item)) => item.name().to_string(),
                Ok(BlockKind::Temporary) => "temporary".to_string(),
                Ok(BlockKind::Heap { .. }) | Err(_) => "heap allocated object".to_string(),
            },
        }
    }

    fn pointer_name(&self, ptr: &Pointer<'ir>) -> String {
        if ptr.is_null() {
            return "nullptr".to_string();
        }

        let mut name = match ptr.base {
            PointerBase::String(bytes) => format!("&\"{}\"", String::from_utf8_lossy(bytes)),
            PointerBase::Block(id) => match self.memory.block(id) {
                Ok(block) if block.is_heap() => format!("&{{*new {}#{}}}", block.ty, id.0),
                _ => format!("&{}", self.object_name(ptr)),
            },
            _ => format!("&{}", self.object_name(ptr)),
        };

        for elem in &ptr.path {
            if let PathElem::Index(i) = elem {
                name.push_str(&format!("[{}]", i));
            }
        }
        if ptr.past_end {
            name.push_str(" + 1");
        }
        name
    }

    fn render(&self, value: &Value<'ir>) -> String {
        match value {
            Value::Void => "void".to_string(),
            Value::Indeterminate => "<uninitialized>".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::F32(f) => f.to_string(),
            Value::F64(f) => f.to_string(),
            Value::Pointer(p) => self.pointer_name(p),
            Value::Reference(p) => self.object_name(p),
            Value::FunctionPointer(f) => format!("&{}", f.name()),
            Value::MemberPointer(mp) => match mp.member {
                None => "nullptr".to_string(),
                Some(MemberRef::Field(class, id)) => {
                    let field = class
                        .get_record()
                        .ok()
                        .and_then(|r| r.field(id))
                        .map(|(_, f)| f.name)
                        .unwrap_or("(unnamed)");
                    format!("&{}::{}", class.name(), field)
                }
                Some(MemberRef::Method(method)) => match method.get_function() {
                    Ok(f) => match f.method {
                        Some(info) => format!("&{}::{}", info.class.name(), f.name),
                        None => format!("&{}", f.name),
                    },
                    Err(_) => "&(unnamed)".to_string(),
                },
            },
            Value::Array(_) | Value::Struct(_) | Value::Union(_) => "{...}".to_string(),
            Value::TypeInfo(ty) => format!("typeid({})", ty),
        }
    }

    // Statements

    fn exec_statements(&mut self, statements: &'ir [Statement<'ir>]) -> Result<Flow<'ir>, EvalError> {
        for statement in statements {
            match self.exec(statement)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, statement: &'ir Statement<'ir>) -> Result<Flow<'ir>, EvalError> {
        self.step()?;

        match statement {
            Statement::Expression(expr) => {
                self.eval_discard(expr)?;
                self.end_full_expression()?;
                Ok(Flow::Normal)
            }
            Statement::Declare(decl) => {
                self.declare_local(decl)?;
                Ok(Flow::Normal)
            }
            Statement::Block(statements) => self.scoped(|this| this.exec_statements(statements)),
            Statement::If(cond, then, els) => {
                let cond = self.eval_condition(cond)?;
                self.end_full_expression()?;

                match (cond, els) {
                    (true, _) => self.scoped(|this| this.exec(then)),
                    (false, Some(els)) => self.scoped(|this| this.exec(els)),
                    (false, None) => Ok(Flow::Normal),
                }
            }
            Statement::While(cond, body) => loop {
                let cond = self.eval_condition(cond)?;
                self.end_full_expression()?;
                if !cond {
                    return Ok(Flow::Normal);
                }

                match self.scoped(|this| this.exec(body))? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            Statement::DoWhile(body, cond) => loop {
                match self.scoped(|this| this.exec(body))? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }

                let cond = self.eval_condition(cond)?;
                self.end_full_expression()?;
                if !cond {
                    return Ok(Flow::Normal);
                }
            },
            Statement::For {
                init,
                cond,
                step,
                body,
            } => self.scoped(|this| {
                if let Some(init) = init {
                    this.exec(init)?;
                }

                loop {
                    if let Some(cond) = cond {
                        let cond = this.eval_condition(cond)?;
                        this.end_full_expression()?;
                        if !cond {
                            return Ok(Flow::Normal);
                        }
                    }

                    match this.scoped(|this| this.exec(body))? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }

                    if let Some(step) = step {
                        this.step()?;
                        this.eval_discard(step)?;
                        this.end_full_expression()?;
                    }
                }
            }),
            Statement::Switch(cond, body) => self.switch(cond, body),
            Statement::Case(_, _) | Statement::Default | Statement::Label(_) => Ok(Flow::Normal),
            Statement::Break => Ok(Flow::Break),
            Statement::Continue => Ok(Flow::Continue),
            Statement::Return(value) => self.return_value(*value),
            Statement::Goto(_) => Err(self.fail(ConstEvalErrorKind::NonConstantStatement(
                "goto".to_string(),
            ))),
        }
    }

    fn switch(
        &mut self,
        cond: ExprP<'ir>,
        body: &'ir [Statement<'ir>],
    ) -> Result<Flow<'ir>, EvalError> {
        let value = match self.eval_rvalue(cond)? {
            Value::Int(v) => v.value,
            Value::Bool(b) => BigInt::from(b as u8),
            other => bug!(self, "switch on {:?}", other),
        };
        self.end_full_expression()?;

        let mut target = None;
        let mut default = None;
        for (index, statement) in body.iter().enumerate() {
            match statement {
                Statement::Case(lo, hi) if target.is_none() => {
                    let lo = self.case_value(lo)?;
                    let matched = match hi {
                        // GNU case range
                        Some(hi) => lo <= value && value <= self.case_value(hi)?,
                        None => lo == value,
                    };
                    if matched {
                        target = Some(index);
                    }
                }
                Statement::Default => default = Some(index),
                _ => {}
            }
        }

        let Some(start) = target.or(default) else {
            return Ok(Flow::Normal);
        };

        self.scoped(|this| {
            for statement in &body[start..] {
                match this.exec(statement)? {
                    Flow::Normal => {}
                    Flow::Break => return Ok(Flow::Normal),
                    flow => return Ok(flow),
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn case_value(&mut self, expr: ExprP<'ir>) -> Result<BigInt, EvalError> {
        match self.eval_rvalue(expr)? {
            Value::Int(v) => Ok(v.value),
            Value::Bool(b) => Ok(BigInt::from(b as u8)),
            other => bug!(self, "case label {:?}", other),
        }
    }

    fn return_value(&mut self, value: Option<ExprP<'ir>>) -> Result<Flow<'ir>, EvalError> {
        let Some(expr) = value else {
            return Ok(Flow::Return(Value::Void));
        };

        let returns_reference = match self.frame()?.function {
            Some(func) => self.lift(func.get_function())?.return_type.is_reference(),
            None => false,
        };

        let value = if returns_reference {
            Value::Reference(self.eval_glvalue(expr)?)
        } else {
            self.eval_rvalue(expr)?
        };
        self.end_full_expression()?;

        Ok(Flow::Return(value))
    }

    fn declare_local(&mut self, decl: &LocalDecl<'ir>) -> Result<(), EvalError> {
        let (id, ptr) = self.allocate(BlockKind::Local(decl.name), decl.ty)?;
        // Bound before the initializer runs, which sees the object outside its
        // lifetime
        self.frame_mut()?.locals.insert(
            decl.id,
            LocalSlot {
                block: id,
                ty: decl.ty,
            },
        );

        let _guard = self.diag.push_span(decl.span);
        match decl.init {
            Some(init) => self.initialize(&ptr, decl.ty, init)?,
            None => {
                self.begin_lifetime(&ptr)?;
                self.default_initialize(&ptr, decl.ty)?;
            }
        }

        let block = self.memory.block_mut(id).with_backtrace(&self.diag)?;
        block.state = BlockState::Live;
        block.is_const = decl.is_const;

        // Temporaries bound in the initializer live as long as the variable
        let depth = self.frames.len();
        self.accesses.retain(|a| a.depth < depth);
        let frame = self.frame_mut()?;
        let temporaries = std::mem::take(&mut frame.temporaries);
        if let Some(scope) = frame.scopes.last_mut() {
            scope.extend(temporaries);
            scope.push(id);
        }

        Ok(())
    }

    // Calls

    fn call(
        &mut self,
        func: ItemP<'ir>,
        this: Option<Pointer<'ir>>,
        args: Vec<Value<'ir>>,
    ) -> Result<Value<'ir>, EvalError> {
        let f = self.lift(func.get_function())?;

        if !f.is_constexpr {
            return Err(self.fail_with_note(
                ConstEvalErrorKind::NonConstexprFunction(f.name.to_string()),
                format!("'{}' declared here", f.name),
                f.span,
            ));
        }
        if f.body.get().is_none() && !f.is_defaulted {
            return Err(self.fail_with_note(
                ConstEvalErrorKind::UndefinedFunction(f.name.to_string()),
                format!("'{}' declared here", f.name),
                f.span,
            ));
        }
        if self.frames.len() > self.options.max_depth {
            return Err(self.fail(ConstEvalErrorKind::TooDeep(self.options.max_depth)));
        }

        let rendered: Vec<_> = args.iter().map(|a| self.render(a)).collect();
        let _call = self.diag.push_call(
            format!("{}({})", f.name, rendered.join(", ")),
            self.diag.current_span(),
        );
        trace!(function = f.name, depth = self.frames.len(), "entering call");

        let mut frame = Frame::new(Some(func), this.clone());
        for (param, arg) in f.params.iter().zip(args) {
            let id = self.memory.allocate(Block {
                kind: BlockKind::Parameter(param.name),
                ty: param.ty,
                value: arg,
                state: BlockState::Live,
                is_const: false,
                foreign: false,
            });
            frame.locals.insert(
                param.id,
                LocalSlot {
                    block: id,
                    ty: param.ty,
                },
            );
            frame.scopes[0].push(id);
        }
        self.frames.push(frame);

        let kind = f.method.map(|m| (m.kind, m.class));
        let result = match (kind, this) {
            (Some((crate::ir::MethodKind::Constructor, class)), Some(this)) => {
                self.run_constructor(class, f, &this)?;
                Value::Void
            }
            (Some((crate::ir::MethodKind::Destructor, class)), Some(this)) => {
                self.constructing.push((this, class));
                if let Some(body) = f.body.get() {
                    self.exec_statements(body.statements)?;
                }
                self.constructing.pop();
                Value::Void
            }
            _ => {
                let flow = match f.body.get() {
                    Some(body) => self.exec_statements(body.statements)?,
                    None => Flow::Normal,
                };
                match flow {
                    Flow::Return(value) => value,
                    _ if f.return_type.is_void() => Value::Void,
                    _ => {
                        return Err(self.fail(ConstEvalErrorKind::MissingReturn(f.name.to_string())))
                    }
                }
            }
        };

        while !self.frame()?.scopes.is_empty() {
            self.pop_scope()?;
        }
        self.frames.pop();

        Ok(result)
    }

    fn callee(&mut self, expr: ExprP<'ir>) -> Result<ItemP<'ir>, EvalError> {
        match &expr.kind {
            ExprKind::Function(item) => Ok(*item),
            ExprKind::Cast(crate::ir::CastKind::FunctionToPointerDecay, inner)
            | ExprKind::Deref(inner) => self.callee(inner),
            _ => match self.eval_rvalue(expr)? {
                Value::FunctionPointer(item) => Ok(item),
                Value::Pointer(p) if p.is_null() => {
                    Err(self.fail(ConstEvalErrorKind::NullFunctionCall))
                }
                other => bug!(self, "cannot call {:?}", other),
            },
        }
    }

    /// Arguments bound to reference parameters are evaluated as glvalues.
    fn eval_args(
        &mut self,
        func: ItemP<'ir>,
        args: &'ir [ExprP<'ir>],
    ) -> Result<Vec<Value<'ir>>, EvalError> {
        let params = self.lift(func.get_function())?.params;

        let mut values = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let by_reference = params
                .get(index)
                .map(|p| p.ty.is_reference())
                .unwrap_or(false);

            if by_reference {
                values.push(Value::Reference(self.eval_glvalue(arg)?));
            } else {
                values.push(self.eval_rvalue(arg)?);
            }
        }
        Ok(values)
    }

    fn eval_call(&mut self, expr: ExprP<'ir>) -> Result<Value<'ir>, EvalError> {
        match &expr.kind {
            ExprKind::Call(callee, args) => {
                let func = self.callee(callee)?;
                let args = self.eval_args(func, args)?;
                self.call(func, None, args)
            }
            ExprKind::MemberCall {
                object,
                method,
                args,
                is_virtual,
            } => {
                let this = self.eval_glvalue(object)?;
                self.check_live(&this, AccessKind::MemberCall)?;

                let (func, this) = if *is_virtual && self.lift(method.get_function())?.is_virtual()
                {
                    self.resolve_virtual(&this, *method)?
                } else {
                    (*method, this)
                };

                let args = self.eval_args(func, args)?;
                self.call(func, Some(this), args)
            }
            ExprKind::MemberPointerCall {
                object,
                member,
                args,
            } => {
                let this = self.eval_glvalue(object)?;
                let member = match self.eval_rvalue(member)? {
                    Value::MemberPointer(mp) => mp,
                    other => bug!(self, "{:?} is not a member pointer", other),
                };
                self.check_live(&this, AccessKind::MemberCall)?;

                let (member, this) = self.apply_member_pointer(&this, &member)?;
                let MemberRef::Method(method) = member else {
                    bug!(self, "data member pointer used in a call");
                };

                let (func, this) = if self.lift(method.get_function())?.is_virtual() {
                    self.resolve_virtual(&this, method)?
                } else {
                    (method, this)
                };

                let args = self.eval_args(func, args)?;
                self.call(func, Some(this), args)
            }
            _ => bug!(self, "not a call"),
        }
    }

    // Expressions

    fn eval_discard(&mut self, expr: ExprP<'ir>) -> Result<(), EvalError> {
        if expr.is_lvalue() {
            match expr.kind {
                ExprKind::Function(_) => {}
                _ => {
                    self.eval_place(expr)?;
                }
            }
        } else {
            self.eval_rvalue(expr)?;
        }
        Ok(())
    }

    fn eval_condition(&mut self, expr: ExprP<'ir>) -> Result<bool, EvalError> {
        let value = self.eval_rvalue(expr)?;
        let _guard = self.diag.push_span(expr.span);
        self.truthy(&value)
    }

    /// An object for the expression, materializing prvalues into temporaries.
    fn eval_glvalue(&mut self, expr: ExprP<'ir>) -> Result<Pointer<'ir>, EvalError> {
        if expr.is_lvalue() {
            self.eval_place(expr)
        } else {
            self.materialize(expr)
        }
    }

    fn local_place(&mut self, id: Id) -> Result<Pointer<'ir>, EvalError> {
        let Some(slot) = self.frame()?.locals.get(&id).copied() else {
            bug!(self, "unbound local {}", id);
        };

        let ptr = Pointer::to(PointerBase::Block(slot.block));
        if slot.ty.is_reference() {
            self.reference_target(&ptr)
        } else {
            Ok(ptr)
        }
    }

    fn reference_target(&mut self, ptr: &Pointer<'ir>) -> Result<Pointer<'ir>, EvalError> {
        match self.load(ptr, AccessKind::Read, true)? {
            Value::Reference(target) => Ok(target),
            other => bug!(self, "{:?} is not a reference", other),
        }
    }

    fn field_place(
        &mut self,
        object: Pointer<'ir>,
        object_ty: TyP<'ir>,
        field: Id,
    ) -> Result<Pointer<'ir>, EvalError> {
        let Some(item) = object_ty.strip_atomic().record() else {
            bug!(self, "member access on '{}'", object_ty);
        };
        let descriptor = self.descriptor(item)?;
        let Some(index) = descriptor.field_index(field) else {
            bug!(self, "no field {} in '{}'", field, item.name());
        };

        let place = object.child(PathElem::Field(index));
        if descriptor.fields[index].ty.is_reference() {
            self.reference_target(&place)
        } else {
            Ok(place)
        }
    }

    fn eval_place(&mut self, expr: ExprP<'ir>) -> Result<Pointer<'ir>, EvalError> {
        self.step()?;
        let _guard = self.diag.push_span(expr.span);

        match &expr.kind {
            ExprKind::Local(id) => self.local_place(*id),
            ExprKind::Global(item) => {
                let ptr = Pointer::to(PointerBase::Global(*item));
                if self.lift(item.get_var())?.ty.is_reference() {
                    self.reference_target(&ptr)
                } else {
                    Ok(ptr)
                }
            }
            ExprKind::Lit(Literal::String(bytes)) => Ok(Pointer::to(PointerBase::String(bytes))),
            ExprKind::Deref(inner) => match self.eval_rvalue(inner)? {
                Value::Pointer(p) if p.is_null() => {
                    Err(self.fail(ConstEvalErrorKind::NullDereference))
                }
                Value::Pointer(p) => Ok(p),
                other => bug!(self, "dereference of {:?}", other),
            },
            ExprKind::Field(object, field) => {
                let object_place = self.eval_glvalue(object)?;
                self.field_place(object_place, object.ty, *field)
            }
            ExprKind::Index(ptr, index) => {
                let ptr = match self.eval_rvalue(ptr)? {
                    Value::Pointer(p) => p,
                    other => bug!(self, "subscript of {:?}", other),
                };
                let index = match self.eval_rvalue(index)? {
                    Value::Int(v) => v.value,
                    other => bug!(self, "subscript with {:?}", other),
                };
                self.offset_pointer(&ptr, &index)
            }
            ExprKind::Assign(lhs, rhs) => self.assign(lhs, rhs),
            ExprKind::AssignOp {
                op,
                lhs,
                rhs,
                compute_ty,
            } => self.assign_op(*op, lhs, rhs, compute_ty),
            ExprKind::IncDec {
                is_increment,
                operand,
                ..
            } => Ok(self.inc_dec(operand, *is_increment)?.0),
            ExprKind::Comma(lhs, rhs) => {
                self.eval_discard(lhs)?;
                self.eval_place(rhs)
            }
            ExprKind::Conditional(cond, then, els) => {
                if self.eval_condition(cond)? {
                    self.eval_place(then)
                } else {
                    self.eval_place(els)
                }
            }
            ExprKind::Cast(kind, inner) => self.cast_place(*kind, inner, expr.ty),
            ExprKind::Call(..) | ExprKind::MemberCall { .. } | ExprKind::MemberPointerCall { .. } => {
                match self.eval_call(expr)? {
                    Value::Reference(p) => Ok(p),
                    other => bug!(self, "call returned {:?} where a reference was expected", other),
                }
            }
            ExprKind::PointerToMember(object, member) => {
                let object = self.eval_glvalue(object)?;
                let member = match self.eval_rvalue(member)? {
                    Value::MemberPointer(mp) => mp,
                    other => bug!(self, "{:?} is not a member pointer", other),
                };
                let (member, object) = self.apply_member_pointer(&object, &member)?;
                match member {
                    MemberRef::Field(class, field) => {
                        self.field_place(object, self.types.record(class), field)
                    }
                    MemberRef::Method(_) => bug!(self, "member function pointer used as an object"),
                }
            }
            ExprKind::DynamicCast(inner) => self.dynamic_cast_reference(inner, expr.ty),
            ExprKind::MaterializeTemporary(inner) => self.materialize(inner),
            _ if !expr.is_lvalue() => self.materialize(expr),
            _ => bug!(self, "{:?} is not an object", expr.kind),
        }
    }

    fn eval_rvalue(&mut self, expr: ExprP<'ir>) -> Result<Value<'ir>, EvalError> {
        if let ExprKind::Function(item) = expr.kind {
            return Ok(Value::FunctionPointer(item));
        }

        if expr.is_lvalue() {
            let place = self.eval_place(expr)?;
            let _guard = self.diag.push_span(expr.span);
            return self.read_place(&place, expr.ty);
        }

        self.step()?;
        let _guard = self.diag.push_span(expr.span);

        match &expr.kind {
            ExprKind::Lit(lit) => self.literal(lit, expr.ty),
            ExprKind::This => match &self.frame()?.this {
                Some(this) => Ok(Value::Pointer(this.clone())),
                None => bug!(self, "'this' outside of a member function"),
            },
            ExprKind::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, expr.ty),
            ExprKind::Unary(op, inner) => self.unary(*op, inner, expr.ty),
            ExprKind::IncDec {
                is_increment,
                operand,
                ..
            } => Ok(self.inc_dec(operand, *is_increment)?.1),
            ExprKind::Comma(lhs, rhs) => {
                self.eval_discard(lhs)?;
                self.eval_rvalue(rhs)
            }
            ExprKind::Conditional(cond, then, els) => {
                if self.eval_condition(cond)? {
                    self.eval_rvalue(then)
                } else {
                    self.eval_rvalue(els)
                }
            }
            ExprKind::AddressOf(inner) => match inner.kind {
                ExprKind::Function(item) => Ok(Value::FunctionPointer(item)),
                _ => Ok(Value::Pointer(self.eval_place(inner)?)),
            },
            ExprKind::Field(object, field) => {
                let object_value = self.eval_rvalue(object)?;
                self.field_of_value(object_value, object.ty, *field, expr.ty)
            }
            ExprKind::Cast(kind, inner) => self.cast_value(*kind, inner, expr.ty),
            ExprKind::Call(..) | ExprKind::MemberCall { .. } | ExprKind::MemberPointerCall { .. } => {
                self.eval_call(expr)
            }
            ExprKind::MemberPointerConst(member) => {
                Ok(Value::MemberPointer(MemberPointer::to(*member)))
            }
            ExprKind::Construct { ctor, args } => {
                let (ctor, args) = (*ctor, *args);
                self.in_scratch(expr.ty, |this, ptr| {
                    this.begin_lifetime(ptr)?;
                    let args = this.eval_args(ctor, args)?;
                    this.call(ctor, Some(ptr.clone()), args)?;
                    Ok(())
                })
            }
            ExprKind::Aggregate(initializers) => self.aggregate_value(expr.ty, initializers),
            ExprKind::ZeroInit => self.value_initialized(expr.ty),
            ExprKind::DynamicCast(inner) => self.dynamic_cast_pointer(inner, expr.ty),
            ExprKind::TypeId(operand) => self.type_id(*operand),
            ExprKind::New { ty, count, init } => self.new_object(ty, *count, *init),
            ExprKind::Delete { ptr, is_array } => {
                self.delete_object(ptr, *is_array)?;
                Ok(Value::Void)
            }
            ExprKind::Throw(_) => Err(self.fail(ConstEvalErrorKind::Throw)),
            ExprKind::Intrinsic(intrinsic) => self.intrinsic(intrinsic, expr.ty),
            _ => {
                let place = self.eval_place(expr)?;
                self.read_place(&place, expr.ty)
            }
        }
    }

    fn literal(&self, lit: &Literal<'ir>, ty: TyP<'ir>) -> Result<Value<'ir>, EvalError> {
        match lit {
            Literal::Int(v) => self.make_int(*v, ty),
            Literal::UInt(v) => self.make_int(*v, ty),
            Literal::Float(v) => Ok(value::float_value(*v, ty)),
            Literal::Bool(b) if ty.strip_atomic().is_bool() => Ok(Value::Bool(*b)),
            Literal::Bool(b) => self.make_int(*b as i32, ty),
            Literal::Null => match ty.strip_atomic() {
                Ty::MemberPointer(_, _) => Ok(Value::MemberPointer(MemberPointer::null())),
                _ => Ok(Value::Pointer(Pointer::null())),
            },
            Literal::String(bytes) => self.string_value(bytes),
            Literal::Void => Ok(Value::Void),
        }
    }

    fn field_of_value(
        &mut self,
        object: Value<'ir>,
        object_ty: TyP<'ir>,
        field: Id,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        let Some(item) = object_ty.strip_atomic().record() else {
            bug!(self, "member access on '{}'", object_ty);
        };
        let descriptor = self.descriptor(item)?;
        let Some(index) = descriptor.field_index(field) else {
            bug!(self, "no field {} in '{}'", field, item.name());
        };

        let value = self.lift(memory::project(
            &self.layouter,
            &object,
            &[PathElem::Field(index)],
            AccessKind::Read,
        ))?;

        match value {
            Value::Reference(target) => self.read_place(&target, ty),
            Value::Indeterminate if !matches!(ty.strip_atomic(), Ty::Record(_) | Ty::Array(..)) => {
                Err(self.fail(ConstEvalErrorKind::UninitializedRead))
            }
            value => Ok(value),
        }
    }

    fn value_initialized(&mut self, ty: TyP<'ir>) -> Result<Value<'ir>, EvalError> {
        match ty.strip_atomic() {
            Ty::Record(_) | Ty::Array(_, _) => {
                self.in_scratch(ty, |this, ptr| {
                    this.begin_lifetime(ptr)?;
                    this.value_initialize(ptr, ty)
                })
            }
            _ => self.lift(zeroed(&self.layouter, ty)),
        }
    }
}

/// A value copied into a base subobject has no virtual bases of its own.
fn fit_subobject<'ir>(ptr: &Pointer<'ir>, value: Value<'ir>) -> Value<'ir> {
    match (ptr.path.last(), value) {
        (Some(elem), Value::Struct(mut record)) if elem.is_base() => {
            record.virtual_bases.clear();
            Value::Struct(record)
        }
        (_, value) => value,
    }
}

/// Depth of the outermost of the last `named` fields on the path.
fn named_suffix(path: &[PathElem<'_>], named: usize) -> usize {
    let mut seen = 0;
    for (depth, elem) in path.iter().enumerate().rev() {
        if matches!(elem, PathElem::Field(_)) {
            seen += 1;
            if seen == named {
                return depth;
            }
        }
    }
    0
}
