use crate::ast::{BinOp, BuiltinType, Span, UnOp};
use crate::common::{ArenaAllocatable, CodeDiagnostic};
use crate::ir::*;

#[derive(Clone)]
pub struct ExpressionBuilder<'ir> {
    ir: &'ir IrCtx<'ir>,
}

impl<'ir> ExpressionBuilder<'ir> {
    pub fn new(ir: &'ir IrCtx<'ir>) -> Self {
        Self { ir }
    }

    fn types(&self) -> TypeBuilder<'ir> {
        TypeBuilder::new(self.ir)
    }

    pub fn literal(&self, lit: Literal<'ir>, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        Expr::rvalue(ExprKind::Lit(lit), ty, span).alloc_on(self.ir)
    }

    pub fn int(&self, value: i128, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        self.literal(Literal::Int(value), ty, span)
    }

    pub fn uint(&self, value: u128, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        self.literal(Literal::UInt(value), ty, span)
    }

    pub fn float(&self, value: f64, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        self.literal(Literal::Float(value), ty, span)
    }

    pub fn bool(&self, value: bool, span: Option<Span>) -> ExprP<'ir> {
        self.literal(
            Literal::Bool(value),
            self.types().builtin(BuiltinType::Bool),
            span,
        )
    }

    pub fn null(&self, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        self.literal(Literal::Null, ty, span)
    }

    pub fn void(&self, span: Option<Span>) -> ExprP<'ir> {
        self.literal(Literal::Void, self.types().void(), span)
    }

    /// String literal lvalue of type `char[N + 1]`.
    pub fn string(&self, value: &[u8], span: Option<Span>) -> ExprP<'ir> {
        let types = self.types();
        let ty = types.array(types.builtin(BuiltinType::Char), value.len() + 1);
        let bytes = self.ir.arena.alloc_slice_copy(value);

        Expr::lvalue(ExprKind::Lit(Literal::String(bytes)), ty, span).alloc_on(self.ir)
    }

    pub fn local(&self, id: Id, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        Expr::lvalue(ExprKind::Local(id), ty, span).alloc_on(self.ir)
    }

    pub fn global(&self, item: ItemP<'ir>, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        Expr::lvalue(ExprKind::Global(item), ty, span).alloc_on(self.ir)
    }

    pub fn function(&self, item: ItemP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        let types = self.types();
        let ty = match item.get_function() {
            Ok(func) => types.function(func.params.iter().map(|p| p.ty), func.return_type),
            Err(_) => types.function([], types.void()),
        };

        Expr::lvalue(ExprKind::Function(item), ty, span).alloc_on(self.ir)
    }

    pub fn this(&self, class: ItemP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        let types = self.types();
        Expr::rvalue(
            ExprKind::This,
            types.pointer(types.record(class), false),
            span,
        )
        .alloc_on(self.ir)
    }

    /// `this->field`
    pub fn this_field(
        &self,
        class: ItemP<'ir>,
        field: Id,
        ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        self.field(self.deref(self.this(class, span), span), field, ty, span)
    }

    pub fn binary(
        &self,
        op: BinOp,
        lhs: ExprP<'ir>,
        rhs: ExprP<'ir>,
        result_ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr::rvalue(ExprKind::Binary(op, lhs, rhs), result_ty, span).alloc_on(self.ir)
    }

    pub fn unary(
        &self,
        op: UnOp,
        inner: ExprP<'ir>,
        result_ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr::rvalue(ExprKind::Unary(op, inner), result_ty, span).alloc_on(self.ir)
    }

    /// Prefix forms produce the operand itself, postfix forms its old value.
    pub fn inc_dec(
        &self,
        operand: ExprP<'ir>,
        is_increment: bool,
        is_prefix: bool,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        let kind = ExprKind::IncDec {
            is_increment,
            is_prefix,
            operand,
        };

        if is_prefix {
            Expr::lvalue(kind, operand.ty, span).alloc_on(self.ir)
        } else {
            Expr::rvalue(kind, operand.ty, span).alloc_on(self.ir)
        }
    }

    pub fn assign(&self, lhs: ExprP<'ir>, rhs: ExprP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        Expr::lvalue(ExprKind::Assign(lhs, rhs), lhs.ty, span).alloc_on(self.ir)
    }

    pub fn assign_op(
        &self,
        op: BinOp,
        lhs: ExprP<'ir>,
        rhs: ExprP<'ir>,
        compute_ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr::lvalue(
            ExprKind::AssignOp {
                op,
                lhs,
                rhs,
                compute_ty,
            },
            lhs.ty,
            span,
        )
        .alloc_on(self.ir)
    }

    pub fn comma(&self, lhs: ExprP<'ir>, rhs: ExprP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        Expr {
            kind: ExprKind::Comma(lhs, rhs),
            value_type: rhs.value_type,
            ty: rhs.ty,
            span,
        }
        .alloc_on(self.ir)
    }

    pub fn conditional(
        &self,
        cond: ExprP<'ir>,
        then: ExprP<'ir>,
        els: ExprP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        let value_type = if then.is_lvalue() && els.is_lvalue() {
            ValueType::LValue
        } else {
            ValueType::RValue
        };

        Expr {
            kind: ExprKind::Conditional(cond, then, els),
            value_type,
            ty: then.ty,
            span,
        }
        .alloc_on(self.ir)
    }

    pub fn address_of(&self, inner: ExprP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        let ty = self.types().pointer(inner.ty, false);
        Expr::rvalue(ExprKind::AddressOf(inner), ty, span).alloc_on(self.ir)
    }

    pub fn deref(&self, inner: ExprP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        let ty = inner.ty.pointee().unwrap_or(inner.ty);
        Expr::lvalue(ExprKind::Deref(inner), ty, span).alloc_on(self.ir)
    }

    pub fn field(
        &self,
        obj: ExprP<'ir>,
        field: Id,
        ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr {
            kind: ExprKind::Field(obj, field),
            value_type: obj.value_type,
            ty,
            span,
        }
        .alloc_on(self.ir)
    }

    /// `ptr[index]`, where `ptr` is a pointer (arrays decay first).
    pub fn index(&self, ptr: ExprP<'ir>, index: ExprP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        let ty = ptr.ty.pointee().unwrap_or(ptr.ty);
        Expr::lvalue(ExprKind::Index(ptr, index), ty, span).alloc_on(self.ir)
    }

    pub fn cast(
        &self,
        kind: CastKind<'ir>,
        inner: ExprP<'ir>,
        ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr::rvalue(ExprKind::Cast(kind, inner), ty, span).alloc_on(self.ir)
    }

    /// Cast that designates a subobject of its operand, such as a derived-to-base
    /// conversion of an lvalue.
    pub fn cast_lvalue(
        &self,
        kind: CastKind<'ir>,
        inner: ExprP<'ir>,
        ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr::lvalue(ExprKind::Cast(kind, inner), ty, span).alloc_on(self.ir)
    }

    pub fn decay(&self, array: ExprP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        let element = array.ty.element().unwrap_or(array.ty);
        let ty = self.types().pointer(element, false);
        self.cast(CastKind::ArrayToPointerDecay, array, ty, span)
    }

    fn call_result(&self, kind: ExprKind<'ir>, return_ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        match return_ty {
            Ty::Reference(inner, _) => Expr::lvalue(kind, *inner, span).alloc_on(self.ir),
            _ => Expr::rvalue(kind, return_ty, span).alloc_on(self.ir),
        }
    }

    pub fn call<I>(
        &self,
        callee: ExprP<'ir>,
        args: I,
        return_ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir>
    where
        I: IntoIterator<Item = ExprP<'ir>>,
        I::IntoIter: ExactSizeIterator,
    {
        let args = self.ir.arena.alloc_slice_fill_iter(args);
        self.call_result(ExprKind::Call(callee, args), return_ty, span)
    }

    /// Direct call to a function item.
    pub fn call_function<I>(&self, func: ItemP<'ir>, args: I, span: Option<Span>) -> ExprP<'ir>
    where
        I: IntoIterator<Item = ExprP<'ir>>,
        I::IntoIter: ExactSizeIterator,
    {
        let return_ty = match func.get_function() {
            Ok(f) => f.return_type,
            Err(_) => self.types().void(),
        };
        self.call(self.function(func, span), args, return_ty, span)
    }

    pub fn member_call<I>(
        &self,
        object: ExprP<'ir>,
        method: ItemP<'ir>,
        args: I,
        is_virtual: bool,
        span: Option<Span>,
    ) -> ExprP<'ir>
    where
        I: IntoIterator<Item = ExprP<'ir>>,
        I::IntoIter: ExactSizeIterator,
    {
        let return_ty = match method.get_function() {
            Ok(f) => f.return_type,
            Err(_) => self.types().void(),
        };
        let args = self.ir.arena.alloc_slice_fill_iter(args);

        self.call_result(
            ExprKind::MemberCall {
                object,
                method,
                args,
                is_virtual,
            },
            return_ty,
            span,
        )
    }

    pub fn member_pointer_call<I>(
        &self,
        object: ExprP<'ir>,
        member: ExprP<'ir>,
        args: I,
        span: Option<Span>,
    ) -> ExprP<'ir>
    where
        I: IntoIterator<Item = ExprP<'ir>>,
        I::IntoIter: ExactSizeIterator,
    {
        let return_ty = match member.ty {
            Ty::MemberPointer(_, Ty::Function(_, ret)) => *ret,
            _ => self.types().void(),
        };
        let args = self.ir.arena.alloc_slice_fill_iter(args);

        self.call_result(
            ExprKind::MemberPointerCall {
                object,
                member,
                args,
            },
            return_ty,
            span,
        )
    }

    /// `&C::member`
    pub fn member_pointer(
        &self,
        member: MemberRef<'ir>,
        ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr::rvalue(ExprKind::MemberPointerConst(member), ty, span).alloc_on(self.ir)
    }

    /// `object.*member` for a data member pointer.
    pub fn pointer_to_member(
        &self,
        object: ExprP<'ir>,
        member: ExprP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        let ty = match member.ty {
            Ty::MemberPointer(_, inner) => *inner,
            _ => member.ty,
        };
        Expr::lvalue(ExprKind::PointerToMember(object, member), ty, span).alloc_on(self.ir)
    }

    pub fn construct<I>(
        &self,
        ctor: ItemP<'ir>,
        args: I,
        ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir>
    where
        I: IntoIterator<Item = ExprP<'ir>>,
        I::IntoIter: ExactSizeIterator,
    {
        let args = self.ir.arena.alloc_slice_fill_iter(args);
        Expr::rvalue(ExprKind::Construct { ctor, args }, ty, span).alloc_on(self.ir)
    }

    pub fn aggregate(
        &self,
        initializers: Vec<Initializer<'ir>>,
        ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr::rvalue(
            ExprKind::Aggregate(initializers.alloc_on(self.ir)),
            ty,
            span,
        )
        .alloc_on(self.ir)
    }

    /// Brace initializer without designators.
    pub fn list<I>(&self, values: I, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir>
    where
        I: IntoIterator<Item = ExprP<'ir>>,
    {
        let initializers = values
            .into_iter()
            .map(|value| Initializer {
                designator: &[],
                value,
            })
            .collect();

        self.aggregate(initializers, ty, span)
    }

    pub fn designated(&self, designator: &[Designator], value: ExprP<'ir>) -> Initializer<'ir> {
        Initializer {
            designator: designator.alloc_on(self.ir),
            value,
        }
    }

    pub fn zero_init(&self, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        Expr::rvalue(ExprKind::ZeroInit, ty, span).alloc_on(self.ir)
    }

    /// `dynamic_cast<T>(e)`; reference targets produce an lvalue of the referenced
    /// type.
    pub fn dynamic_cast(&self, inner: ExprP<'ir>, ty: TyP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        match ty {
            Ty::Reference(target, _) => {
                Expr::lvalue(ExprKind::DynamicCast(inner), *target, span).alloc_on(self.ir)
            }
            _ => Expr::rvalue(ExprKind::DynamicCast(inner), ty, span).alloc_on(self.ir),
        }
    }

    pub fn type_id(
        &self,
        operand: TypeIdOperand<'ir>,
        ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr::rvalue(ExprKind::TypeId(operand), ty, span).alloc_on(self.ir)
    }

    pub fn new_object(
        &self,
        ty: TyP<'ir>,
        count: Option<ExprP<'ir>>,
        init: Option<ExprP<'ir>>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        let result = self.types().pointer(ty, false);
        Expr::rvalue(ExprKind::New { ty, count, init }, result, span).alloc_on(self.ir)
    }

    pub fn delete(&self, ptr: ExprP<'ir>, is_array: bool, span: Option<Span>) -> ExprP<'ir> {
        Expr::rvalue(
            ExprKind::Delete { ptr, is_array },
            self.types().void(),
            span,
        )
        .alloc_on(self.ir)
    }

    pub fn throw(&self, inner: Option<ExprP<'ir>>, span: Option<Span>) -> ExprP<'ir> {
        Expr::rvalue(ExprKind::Throw(inner), self.types().void(), span).alloc_on(self.ir)
    }

    pub fn materialize(&self, inner: ExprP<'ir>, span: Option<Span>) -> ExprP<'ir> {
        Expr::lvalue(ExprKind::MaterializeTemporary(inner), inner.ty, span).alloc_on(self.ir)
    }

    pub fn intrinsic(
        &self,
        kind: Intrinsic<'ir>,
        ty: TyP<'ir>,
        span: Option<Span>,
    ) -> ExprP<'ir> {
        Expr::rvalue(ExprKind::Intrinsic(kind), ty, span).alloc_on(self.ir)
    }
}

#[derive(Clone)]
pub struct TypeBuilder<'ir> {
    ir: &'ir IrCtx<'ir>,
}

impl<'ir> TypeBuilder<'ir> {
    pub fn new(ir: &'ir IrCtx<'ir>) -> Self {
        Self { ir }
    }

    pub fn void(&self) -> TyP<'ir> {
        self.builtin(BuiltinType::Void)
    }

    pub fn builtin(&self, builtin: BuiltinType) -> TyP<'ir> {
        self.ir.intern_type(Ty::Builtin(builtin))
    }

    pub fn bit_int(&self, bits: u32, signed: bool) -> TyP<'ir> {
        self.ir.intern_type(Ty::BitInt(bits, signed))
    }

    pub fn pointer(&self, inner: TyP<'ir>, is_const: bool) -> TyP<'ir> {
        self.ir.intern_type(Ty::Pointer(inner, is_const))
    }

    pub fn reference(&self, inner: TyP<'ir>, is_const: bool) -> TyP<'ir> {
        self.ir.intern_type(Ty::Reference(inner, is_const))
    }

    pub fn array(&self, inner: TyP<'ir>, size: usize) -> TyP<'ir> {
        self.ir.intern_type(Ty::Array(inner, size))
    }

    pub fn incomplete_array(&self, inner: TyP<'ir>) -> TyP<'ir> {
        self.ir.intern_type(Ty::IncompleteArray(inner))
    }

    pub fn record(&self, item: ItemP<'ir>) -> TyP<'ir> {
        self.ir.intern_type(Ty::Record(item))
    }

    pub fn r#enum(&self, item: ItemP<'ir>) -> TyP<'ir> {
        self.ir.intern_type(Ty::Enum(item))
    }

    pub fn function<I>(&self, args: I, ret: TyP<'ir>) -> TyP<'ir>
    where
        I: IntoIterator<Item = TyP<'ir>>,
        I::IntoIter: ExactSizeIterator,
    {
        self.ir.intern_type(Ty::Function(
            self.ir.arena.alloc_slice_fill_iter(args),
            ret,
        ))
    }

    pub fn member_pointer(&self, class: ItemP<'ir>, inner: TyP<'ir>) -> TyP<'ir> {
        self.ir.intern_type(Ty::MemberPointer(class, inner))
    }

    pub fn atomic(&self, inner: TyP<'ir>) -> TyP<'ir> {
        self.ir.intern_type(Ty::Atomic(inner))
    }

    pub fn complex(&self, inner: TyP<'ir>) -> TyP<'ir> {
        self.ir.intern_type(Ty::Complex(inner))
    }

    pub fn vector(&self, inner: TyP<'ir>, len: usize) -> TyP<'ir> {
        self.ir.intern_type(Ty::Vector(inner, len))
    }
}

pub struct StatementBuilder<'ir> {
    ir: &'ir IrCtx<'ir>,
}

impl<'ir> StatementBuilder<'ir> {
    pub fn new(ir: &'ir IrCtx<'ir>) -> Self {
        Self { ir }
    }

    pub fn expr(&self, expr: ExprP<'ir>) -> Statement<'ir> {
        Statement::Expression(expr)
    }

    /// Declares a local and returns its id with the declaration.
    pub fn declare(
        &self,
        name: &str,
        ty: TyP<'ir>,
        init: Option<ExprP<'ir>>,
        is_const: bool,
        span: Option<Span>,
    ) -> (Id, Statement<'ir>) {
        let id = self.ir.make_id();
        let decl = LocalDecl {
            id,
            name: name.alloc_on(self.ir),
            ty,
            init,
            is_const,
            span,
        };

        (id, Statement::Declare(decl))
    }

    pub fn block(&self, statements: Vec<Statement<'ir>>) -> Statement<'ir> {
        Statement::Block(statements.alloc_on(self.ir))
    }

    pub fn if_then(
        &self,
        cond: ExprP<'ir>,
        then: Statement<'ir>,
        els: Option<Statement<'ir>>,
    ) -> Statement<'ir> {
        Statement::If(
            cond,
            then.alloc_on(self.ir),
            els.map(|s| s.alloc_on(self.ir)),
        )
    }

    pub fn while_loop(&self, cond: ExprP<'ir>, body: Statement<'ir>) -> Statement<'ir> {
        Statement::While(cond, body.alloc_on(self.ir))
    }

    pub fn do_while(&self, body: Statement<'ir>, cond: ExprP<'ir>) -> Statement<'ir> {
        Statement::DoWhile(body.alloc_on(self.ir), cond)
    }

    pub fn for_loop(
        &self,
        init: Option<Statement<'ir>>,
        cond: Option<ExprP<'ir>>,
        step: Option<ExprP<'ir>>,
        body: Statement<'ir>,
    ) -> Statement<'ir> {
        Statement::For {
            init: init.map(|s| s.alloc_on(self.ir)),
            cond,
            step,
            body: body.alloc_on(self.ir),
        }
    }

    pub fn switch(&self, cond: ExprP<'ir>, body: Vec<Statement<'ir>>) -> Statement<'ir> {
        Statement::Switch(cond, body.alloc_on(self.ir))
    }

    pub fn ret(&self, value: Option<ExprP<'ir>>) -> Statement<'ir> {
        Statement::Return(value)
    }
}

pub struct RecordBuilder<'ir> {
    ir: &'ir IrCtx<'ir>,
    item: ItemP<'ir>,
    name: &'ir str,
    kind: RecordKind,
    bases: Vec<Base<'ir>>,
    fields: Vec<Field<'ir>>,
    methods: Vec<ItemP<'ir>>,
    destructor: Option<ItemP<'ir>>,
    span: Option<Span>,
}

impl<'ir> RecordBuilder<'ir> {
    pub fn new(ir: &'ir IrCtx<'ir>, name: &str, kind: RecordKind) -> Self {
        Self {
            ir,
            item: ir.make_item(),
            name: name.alloc_on(ir),
            kind,
            bases: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            destructor: None,
            span: None,
        }
    }

    pub fn item(&self) -> ItemP<'ir> {
        self.item
    }

    pub fn ty(&self) -> TyP<'ir> {
        self.ir.intern_type(Ty::Record(self.item))
    }

    pub fn span(&mut self, span: Option<Span>) -> &mut Self {
        self.span = span;
        self
    }

    pub fn base(&mut self, record: ItemP<'ir>, is_virtual: bool) -> &mut Self {
        self.bases.push(Base { record, is_virtual });
        self
    }

    pub fn add_field(
        &mut self,
        name: &str,
        ty: TyP<'ir>,
        bit_width: Option<u32>,
        is_mutable: bool,
        default_init: Option<ExprP<'ir>>,
    ) -> Id {
        let id = self.ir.make_id();
        self.fields.push(Field {
            id,
            name: name.alloc_on(self.ir),
            ty,
            bit_width,
            is_mutable,
            default_init,
            span: self.span,
        });
        id
    }

    pub fn field(&mut self, name: &str, ty: TyP<'ir>) -> Id {
        self.add_field(name, ty, None, false, None)
    }

    pub fn bit_field(&mut self, name: &str, ty: TyP<'ir>, width: u32) -> Id {
        self.add_field(name, ty, Some(width), false, None)
    }

    pub fn mutable_field(&mut self, name: &str, ty: TyP<'ir>) -> Id {
        self.add_field(name, ty, None, true, None)
    }

    /// A field with a default member initializer, which may refer to `this`.
    pub fn field_with_default(&mut self, name: &str, ty: TyP<'ir>, init: ExprP<'ir>) -> Id {
        self.add_field(name, ty, None, false, Some(init))
    }

    pub fn method(&mut self, method: ItemP<'ir>) -> &mut Self {
        self.methods.push(method);
        self
    }

    pub fn destructor(&mut self, destructor: ItemP<'ir>) -> &mut Self {
        self.methods.push(destructor);
        self.destructor = Some(destructor);
        self
    }

    fn assign(self, is_complete: bool) -> ItemP<'ir> {
        self.item.assign(Item::Record(Record {
            name: self.name,
            kind: self.kind,
            bases: self.bases.alloc_on(self.ir),
            fields: self.fields.alloc_on(self.ir),
            methods: self.methods.alloc_on(self.ir),
            destructor: self.destructor,
            is_complete,
            span: self.span,
        }));

        self.item
    }

    pub fn finish(self) -> ItemP<'ir> {
        self.assign(true)
    }

    /// A forward declaration that is never completed.
    pub fn declare(self) -> ItemP<'ir> {
        self.assign(false)
    }
}

pub struct FunctionBuilder<'ir> {
    ir: &'ir IrCtx<'ir>,
    item: ItemP<'ir>,
    name: &'ir str,
    params: Vec<Parameter<'ir>>,
    return_type: TyP<'ir>,
    is_constexpr: bool,
    is_defaulted: bool,
    method: Option<MethodInfo<'ir>>,
    span: Option<Span>,
}

impl<'ir> FunctionBuilder<'ir> {
    pub fn new(ir: &'ir IrCtx<'ir>, name: &str, return_type: TyP<'ir>) -> Self {
        Self {
            ir,
            item: ir.make_item(),
            name: name.alloc_on(ir),
            params: Vec::new(),
            return_type,
            is_constexpr: true,
            is_defaulted: false,
            method: None,
            span: None,
        }
    }

    pub fn item(&self) -> ItemP<'ir> {
        self.item
    }

    pub fn param(&mut self, name: &str, ty: TyP<'ir>) -> Id {
        let id = self.ir.make_id();
        self.params.push(Parameter {
            id,
            name: name.alloc_on(self.ir),
            ty,
        });
        id
    }

    pub fn span(&mut self, span: Option<Span>) -> &mut Self {
        self.span = span;
        self
    }

    pub fn not_constexpr(&mut self) -> &mut Self {
        self.is_constexpr = false;
        self
    }

    pub fn defaulted(&mut self) -> &mut Self {
        self.is_defaulted = true;
        self
    }

    pub fn method(&mut self, class: ItemP<'ir>, kind: MethodKind) -> &mut Self {
        self.method = Some(MethodInfo {
            class,
            kind,
            is_virtual: false,
            is_pure: false,
            overrides: &[],
        });
        self
    }

    pub fn set_virtual(&mut self) -> &mut Self {
        if let Some(method) = self.method.as_mut() {
            method.is_virtual = true;
        }
        self
    }

    pub fn pure_virtual(&mut self) -> &mut Self {
        if let Some(method) = self.method.as_mut() {
            method.is_virtual = true;
            method.is_pure = true;
        }
        self
    }

    pub fn overrides(&mut self, overridden: &[ItemP<'ir>]) -> &mut Self {
        let overridden = overridden.alloc_on(self.ir);
        if let Some(method) = self.method.as_mut() {
            method.is_virtual = true;
            method.overrides = overridden;
        }
        self
    }

    /// Assigns the declaration without a body. The body can be attached later
    /// with [`define`].
    pub fn declare(self) -> ItemP<'ir> {
        self.item.assign(Item::Function(Function {
            name: self.name,
            params: self.params.alloc_on(self.ir),
            return_type: self.return_type,
            body: Default::default(),
            is_constexpr: self.is_constexpr,
            is_defaulted: self.is_defaulted,
            method: self.method,
            span: self.span,
        }));

        self.item
    }

    pub fn build(self, statements: Vec<Statement<'ir>>) -> Result<ItemP<'ir>, CodeDiagnostic> {
        self.build_with_initializers(vec![], statements)
    }

    pub fn build_with_initializers(
        self,
        initializers: Vec<CtorInitializer<'ir>>,
        statements: Vec<Statement<'ir>>,
    ) -> Result<ItemP<'ir>, CodeDiagnostic> {
        let ir = self.ir;
        let item = self.declare();
        define(ir, item, initializers, statements)?;
        Ok(item)
    }
}

pub fn define<'ir>(
    ir: &'ir IrCtx<'ir>,
    item: ItemP<'ir>,
    initializers: Vec<CtorInitializer<'ir>>,
    statements: Vec<Statement<'ir>>,
) -> Result<(), CodeDiagnostic> {
    let body = FuncBody {
        initializers: initializers.alloc_on(ir),
        statements: statements.alloc_on(ir),
    };

    item.get_function()?
        .body
        .set(body)
        .map_err(|_| CodeDiagnostic::InternalError(format!("'{}' defined twice", item.name())))
}

pub struct VarBuilder<'ir> {
    item: ItemP<'ir>,
    name: &'ir str,
    ty: TyP<'ir>,
    is_constexpr: bool,
    is_const: bool,
    is_extern: bool,
    span: Option<Span>,
}

impl<'ir> VarBuilder<'ir> {
    pub fn new(ir: &'ir IrCtx<'ir>, name: &str, ty: TyP<'ir>) -> Self {
        Self {
            item: ir.make_item(),
            name: name.alloc_on(ir),
            ty,
            is_constexpr: false,
            is_const: false,
            is_extern: false,
            span: None,
        }
    }

    pub fn item(&self) -> ItemP<'ir> {
        self.item
    }

    /// `constexpr` implies `const`.
    pub fn constexpr(&mut self) -> &mut Self {
        self.is_constexpr = true;
        self.is_const = true;
        self
    }

    pub fn constant(&mut self) -> &mut Self {
        self.is_const = true;
        self
    }

    pub fn external(&mut self) -> &mut Self {
        self.is_extern = true;
        self
    }

    pub fn span(&mut self, span: Option<Span>) -> &mut Self {
        self.span = span;
        self
    }

    pub fn build(self, init: Option<ExprP<'ir>>) -> ItemP<'ir> {
        self.item.assign(Item::Var(Var {
            name: self.name,
            ty: self.ty,
            init,
            is_constexpr: self.is_constexpr,
            is_const: self.is_const,
            is_extern: self.is_extern,
            span: self.span,
        }));

        self.item
    }
}

pub fn enumeration<'ir>(
    ir: &'ir IrCtx<'ir>,
    name: &str,
    underlying: TyP<'ir>,
    members: &[(&str, i128)],
) -> ItemP<'ir> {
    let item = ir.make_item();
    let members: Vec<_> = members
        .iter()
        .map(|(name, value)| EnumMember {
            id: ir.make_id(),
            name: name.alloc_on(ir),
            value: *value,
        })
        .collect();

    item.assign(Item::Enum(Enum {
        name: name.alloc_on(ir),
        underlying,
        members: members.alloc_on(ir),
        span: None,
    }));

    item
}
