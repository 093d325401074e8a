pub mod builder;
pub mod const_eval;
pub mod layout;
pub mod record;

use crate::ast::{BinOp, BuiltinType, Span, UnOp};
use crate::common::{
    impl_allocatable, Allocatable, ArenaAllocatable, CodeDiagnostic, HashSet, Incrementable,
};

use bumpalo::Bump;
use once_cell::unsync::OnceCell;

use std::cell::{Cell, RefCell};
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

pub struct IrCtx<'ir> {
    pub arena: Bump,
    pub counter: Cell<usize>,
    types: RefCell<HashSet<TyP<'ir>>>,
    strings: RefCell<HashSet<&'ir str>>,
}

impl Default for IrCtx<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'ir> IrCtx<'ir> {
    pub fn new() -> Self {
        Self {
            arena: Bump::new(),
            counter: Cell::new(0),
            types: RefCell::new(HashSet::default()),
            strings: RefCell::new(HashSet::default()),
        }
    }

    pub fn make_id(&self) -> Id {
        Id {
            id: self.counter.increment(),
        }
    }

    pub fn intern_type(&'ir self, ty: Ty<'ir>) -> TyP<'ir> {
        if let Some(key) = self.types.borrow().get(&ty) {
            return key;
        }

        let inner = self.arena.alloc(ty);
        self.types.borrow_mut().insert(inner);

        inner
    }

    pub fn intern_str(&'ir self, s: &'_ str) -> &'ir str {
        if let Some(key) = self.strings.borrow().get(s) {
            return key;
        }

        let inner = self.arena.alloc_str(s);
        self.strings.borrow_mut().insert(inner);

        inner
    }

    pub fn make_item(&'ir self) -> ItemP<'ir> {
        self.arena.alloc(ItemCell {
            id: self.make_id(),
            contents: OnceCell::new(),
        })
    }
}

impl<'ir, T: Allocatable> ArenaAllocatable<'ir, IrCtx<'ir>> for T
where
    T: 'ir,
{
    type ReturnType = &'ir T;

    fn alloc_on(self, ctx: &'ir IrCtx<'ir>) -> Self::ReturnType {
        ctx.arena.alloc(self)
    }
}

impl<'ir, T: Allocatable + Copy> ArenaAllocatable<'ir, IrCtx<'ir>> for &'_ [T]
where
    T: 'ir,
{
    type ReturnType = &'ir [T];

    fn alloc_on(self, ctx: &'ir IrCtx<'ir>) -> Self::ReturnType {
        ctx.arena.alloc_slice_copy(self)
    }
}

impl<'ir> ArenaAllocatable<'ir, IrCtx<'ir>> for &str {
    type ReturnType = &'ir str;

    fn alloc_on(self, ctx: &'ir IrCtx<'ir>) -> Self::ReturnType {
        ctx.intern_str(self)
    }
}

impl<'ir, T: Allocatable> ArenaAllocatable<'ir, IrCtx<'ir>> for Vec<T>
where
    T: 'ir,
{
    type ReturnType = &'ir [T];

    fn alloc_on(self, ctx: &'ir IrCtx<'ir>) -> Self::ReturnType {
        ctx.arena.alloc_slice_fill_iter(self)
    }
}

#[derive(PartialEq, Copy, Clone, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
    pub id: usize,
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.id)
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[derive(PartialEq, Eq, Clone, Hash, Copy)]
pub enum Ty<'ir> {
    Builtin(BuiltinType),
    /// `_BitInt(N)`, signed when the flag is set.
    BitInt(u32, bool),
    /// Pointee and whether the pointee is const-qualified.
    Pointer(TyP<'ir>, bool),
    Reference(TyP<'ir>, bool),
    Array(TyP<'ir>, usize),
    IncompleteArray(TyP<'ir>),
    Record(ItemP<'ir>),
    Enum(ItemP<'ir>),
    Function(&'ir [TyP<'ir>], TyP<'ir>),
    /// Pointer to member of the class, `T C::*`.
    MemberPointer(ItemP<'ir>, TyP<'ir>),
    Atomic(TyP<'ir>),
    Complex(TyP<'ir>),
    Vector(TyP<'ir>, usize),
}

impl Display for Ty<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Ty::Builtin(builtin) => write!(f, "{}", builtin),
            Ty::BitInt(bits, true) => write!(f, "_BitInt({})", bits),
            Ty::BitInt(bits, false) => write!(f, "unsigned _BitInt({})", bits),
            Ty::Pointer(inner, is_const) => match inner {
                Ty::Function(args, ret) => {
                    write!(f, "{} (*)(", ret)?;
                    write_list(f, args)?;
                    write!(f, ")")
                }
                _ if *is_const => write!(f, "const {} *", inner),
                _ => write!(f, "{} *", inner),
            },
            Ty::Reference(inner, true) => write!(f, "const {} &", inner),
            Ty::Reference(inner, false) => write!(f, "{} &", inner),
            Ty::Array(inner, len) => write!(f, "{}[{}]", inner, len),
            Ty::IncompleteArray(inner) => write!(f, "{}[]", inner),
            Ty::Record(item) | Ty::Enum(item) => write!(f, "{}", item.name()),
            Ty::Function(args, ret) => {
                write!(f, "{} (", ret)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Ty::MemberPointer(class, inner) => write!(f, "{} {}::*", inner, class.name()),
            Ty::Atomic(inner) => write!(f, "_Atomic({})", inner),
            Ty::Complex(inner) => write!(f, "_Complex {}", inner),
            Ty::Vector(inner, len) => write!(f, "{} __attribute__((ext_vector_type({})))", inner, len),
        }
    }
}

fn write_list(f: &mut Formatter<'_>, tys: &[TyP<'_>]) -> std::fmt::Result {
    for (i, ty) in tys.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", ty)?;
    }
    Ok(())
}

impl Debug for Ty<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl<'ir> Ty<'ir> {
    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Builtin(BuiltinType::Void))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Ty::Builtin(BuiltinType::Bool))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Ty::Builtin(b) if b.is_float())
    }

    pub fn is_integral(&self) -> bool {
        match self {
            Ty::Builtin(b) => b.is_integer(),
            Ty::BitInt(_, _) | Ty::Enum(_) => true,
            _ => false,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Ty::Pointer(_, _) | Ty::Builtin(BuiltinType::NullPtr))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Ty::Reference(_, _))
    }

    pub fn record(&self) -> Option<ItemP<'ir>> {
        match self {
            Ty::Record(item) => Some(*item),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<TyP<'ir>> {
        match self {
            Ty::Pointer(inner, _) | Ty::Reference(inner, _) => Some(*inner),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<TyP<'ir>> {
        match self {
            Ty::Array(inner, _) | Ty::IncompleteArray(inner) | Ty::Vector(inner, _) => {
                Some(*inner)
            }
            _ => None,
        }
    }

    /// Atomic qualification does not change the representation of a value.
    pub fn strip_atomic(&'ir self) -> TyP<'ir> {
        match self {
            Ty::Atomic(inner) => inner.strip_atomic(),
            _ => self,
        }
    }

    pub fn is_byte_like(&self) -> bool {
        matches!(self, Ty::Builtin(b) if b.is_byte_like())
    }
}

pub type TyP<'ir> = &'ir Ty<'ir>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Struct,
    Class,
    Union,
}

#[derive(Debug, Clone, Copy)]
pub struct Base<'ir> {
    pub record: ItemP<'ir>,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Field<'ir> {
    pub id: Id,
    pub name: &'ir str,
    pub ty: TyP<'ir>,
    pub bit_width: Option<u32>,
    pub is_mutable: bool,
    pub default_init: Option<ExprP<'ir>>,
    pub span: Option<Span>,
}

#[derive(Debug)]
pub struct Record<'ir> {
    pub name: &'ir str,
    pub kind: RecordKind,
    pub bases: &'ir [Base<'ir>],
    pub fields: &'ir [Field<'ir>],
    pub methods: &'ir [ItemP<'ir>],
    pub destructor: Option<ItemP<'ir>>,
    pub is_complete: bool,
    pub span: Option<Span>,
}

impl<'ir> Record<'ir> {
    pub fn is_union(&self) -> bool {
        self.kind == RecordKind::Union
    }

    pub fn field(&self, id: Id) -> Option<(usize, &Field<'ir>)> {
        self.fields.iter().enumerate().find(|(_, f)| f.id == id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnumMember<'ir> {
    pub id: Id,
    pub name: &'ir str,
    pub value: i128,
}

#[derive(Debug)]
pub struct Enum<'ir> {
    pub name: &'ir str,
    pub underlying: TyP<'ir>,
    pub members: &'ir [EnumMember<'ir>],
    pub span: Option<Span>,
}

#[derive(Debug, Clone, Copy)]
pub struct Parameter<'ir> {
    pub id: Id,
    pub name: &'ir str,
    pub ty: TyP<'ir>,
}

#[derive(Debug, Clone, Copy)]
pub enum CtorInitializer<'ir> {
    Base(ItemP<'ir>, ExprP<'ir>),
    Field(Id, ExprP<'ir>),
}

#[derive(Debug)]
pub struct FuncBody<'ir> {
    pub initializers: &'ir [CtorInitializer<'ir>],
    pub statements: &'ir [Statement<'ir>],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Normal,
    Constructor,
    Destructor,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodInfo<'ir> {
    pub class: ItemP<'ir>,
    pub kind: MethodKind,
    pub is_virtual: bool,
    pub is_pure: bool,
    /// Functions of base classes this one directly overrides.
    pub overrides: &'ir [ItemP<'ir>],
}

#[derive(Debug)]
pub struct Function<'ir> {
    pub name: &'ir str,
    pub params: &'ir [Parameter<'ir>],
    pub return_type: TyP<'ir>,
    pub body: OnceCell<FuncBody<'ir>>,
    pub is_constexpr: bool,
    pub is_defaulted: bool,
    pub method: Option<MethodInfo<'ir>>,
    pub span: Option<Span>,
}

impl<'ir> Function<'ir> {
    pub fn is_virtual(&self) -> bool {
        self.method.map(|m| m.is_virtual).unwrap_or(false)
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self.method, Some(m) if m.kind == MethodKind::Constructor)
    }

    /// A defaulted constructor taking a single reference to its own class.
    pub fn is_copy_constructor(&self) -> bool {
        match (self.method, self.params) {
            (Some(m), [param]) if m.kind == MethodKind::Constructor => {
                matches!(param.ty, Ty::Reference(Ty::Record(r), _) if *r == m.class)
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct Var<'ir> {
    pub name: &'ir str,
    pub ty: TyP<'ir>,
    pub init: Option<ExprP<'ir>>,
    pub is_constexpr: bool,
    pub is_const: bool,
    pub is_extern: bool,
    pub span: Option<Span>,
}

#[derive(Debug)]
pub enum Item<'ir> {
    Record(Record<'ir>),
    Enum(Enum<'ir>),
    Function(Function<'ir>),
    Var(Var<'ir>),
}

pub type ItemP<'ir> = &'ir ItemCell<'ir>;

pub struct ItemCell<'ir> {
    pub id: Id,
    contents: OnceCell<Item<'ir>>,
}

impl<'ir> ItemCell<'ir> {
    pub fn assign(&self, value: Item<'ir>) {
        // Panic if we try to assign the same item twice
        if self.contents.set(value).is_err() {
            panic!("assigning the same item twice");
        }
    }

    pub fn get(&'ir self) -> Result<&'ir Item<'ir>, CodeDiagnostic> {
        match self.contents.get() {
            Some(item) => Ok(item),
            None => Err(CodeDiagnostic::UnpopulatedItem),
        }
    }

    pub fn get_record(&'ir self) -> Result<&'ir Record<'ir>, CodeDiagnostic> {
        match self.contents.get() {
            Some(Item::Record(r)) => Ok(r),
            Some(_) => Err(CodeDiagnostic::InternalError("record expected".into())),
            None => Err(CodeDiagnostic::UnpopulatedItem),
        }
    }

    pub fn get_enum(&'ir self) -> Result<&'ir Enum<'ir>, CodeDiagnostic> {
        match self.contents.get() {
            Some(Item::Enum(e)) => Ok(e),
            Some(_) => Err(CodeDiagnostic::InternalError("enum expected".into())),
            None => Err(CodeDiagnostic::UnpopulatedItem),
        }
    }

    pub fn get_function(&'ir self) -> Result<&'ir Function<'ir>, CodeDiagnostic> {
        match self.contents.get() {
            Some(Item::Function(f)) => Ok(f),
            Some(_) => Err(CodeDiagnostic::InternalError("function expected".into())),
            None => Err(CodeDiagnostic::UnpopulatedItem),
        }
    }

    pub fn get_var(&'ir self) -> Result<&'ir Var<'ir>, CodeDiagnostic> {
        match self.contents.get() {
            Some(Item::Var(v)) => Ok(v),
            Some(_) => Err(CodeDiagnostic::InternalError("variable expected".into())),
            None => Err(CodeDiagnostic::UnpopulatedItem),
        }
    }

    pub fn name(&self) -> &str {
        match self.contents.get() {
            Some(Item::Record(r)) => r.name,
            Some(Item::Enum(e)) => e.name,
            Some(Item::Function(f)) => f.name,
            Some(Item::Var(v)) => v.name,
            None => "(unnamed)",
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self.contents.get() {
            Some(Item::Record(r)) => r.span,
            Some(Item::Enum(e)) => e.span,
            Some(Item::Function(f)) => f.span,
            Some(Item::Var(v)) => v.span,
            None => None,
        }
    }
}

impl Hash for ItemCell<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Items have reference semantics. Two records with the same fields
/// are not considered equal.
impl PartialEq for ItemCell<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ItemCell<'_> {}

impl Debug for ItemCell<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        if fmt.alternate() {
            writeln!(fmt, "{} {{", self.id)?;
            writeln!(fmt, "\t{:?}", self.contents.get())?;
            writeln!(fmt, "}}")?;
        } else {
            write!(fmt, "{}({})", self.name(), self.id)?
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocalDecl<'ir> {
    pub id: Id,
    pub name: &'ir str,
    pub ty: TyP<'ir>,
    pub init: Option<ExprP<'ir>>,
    pub is_const: bool,
    pub span: Option<Span>,
}

#[derive(Debug, Clone)]
pub enum Statement<'ir> {
    /// A full-expression; temporaries created in it end with it.
    Expression(ExprP<'ir>),
    Declare(LocalDecl<'ir>),
    Block(&'ir [Statement<'ir>]),
    If(ExprP<'ir>, &'ir Statement<'ir>, Option<&'ir Statement<'ir>>),
    While(ExprP<'ir>, &'ir Statement<'ir>),
    DoWhile(&'ir Statement<'ir>, ExprP<'ir>),
    For {
        init: Option<&'ir Statement<'ir>>,
        cond: Option<ExprP<'ir>>,
        step: Option<ExprP<'ir>>,
        body: &'ir Statement<'ir>,
    },
    /// Case labels are direct children of the body.
    Switch(ExprP<'ir>, &'ir [Statement<'ir>]),
    /// `case lo:` or the GNU range `case lo ... hi:`.
    Case(ExprP<'ir>, Option<ExprP<'ir>>),
    Default,
    Break,
    Continue,
    Return(Option<ExprP<'ir>>),
    Label(Id),
    Goto(Id),
}

#[derive(Debug, Clone, Copy)]
pub enum Literal<'ir> {
    Int(i128),
    UInt(u128),
    Float(f64),
    Bool(bool),
    Null,
    String(&'ir [u8]),
    Void,
}

#[derive(Debug, Clone, Copy)]
pub enum CastKind<'ir> {
    NoOp,
    Integral,
    IntegralToBoolean,
    IntegralToFloating,
    FloatingToIntegral,
    FloatingCast,
    FloatingToBoolean,
    PointerToBoolean,
    NullToPointer,
    NullToMemberPointer,
    ArrayToPointerDecay,
    FunctionToPointerDecay,
    /// The chain of bases from the operand's class to the target class,
    /// each a direct base of the previous one.
    DerivedToBase(&'ir [ItemP<'ir>]),
    /// Same chain as [`CastKind::DerivedToBase`], read from the target class to
    /// the operand's class.
    BaseToDerived(&'ir [ItemP<'ir>]),
    DerivedToBaseMemberPointer(&'ir [ItemP<'ir>]),
    BaseToDerivedMemberPointer(&'ir [ItemP<'ir>]),
    ToVoid,
    Reinterpret,
    IntegralToPointer,
    PointerToIntegral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRef<'ir> {
    /// A data member of the given record.
    Field(ItemP<'ir>, Id),
    Method(ItemP<'ir>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Designator {
    Field(Id),
    Base(usize),
    Index(usize),
}

impl_allocatable!(Designator);

#[derive(Debug, Clone, Copy)]
pub struct Initializer<'ir> {
    /// Empty for positional initializers.
    pub designator: &'ir [Designator],
    pub value: ExprP<'ir>,
}

#[derive(Debug, Clone, Copy)]
pub enum TypeIdOperand<'ir> {
    Type(TyP<'ir>),
    Expr(ExprP<'ir>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOfOperator {
    /// `alignof` / `_Alignof`
    AlignOf,
    /// `__alignof__`, which answers the preferred alignment.
    GnuAlignOf,
}

#[derive(Debug, Clone, Copy)]
pub enum Intrinsic<'ir> {
    SizeOf(TyP<'ir>),
    AlignOf(TyP<'ir>, AlignOfOperator),
    OffsetOf(TyP<'ir>, &'ir [Designator]),
    ClassifyType(TyP<'ir>),
    IsConstantEvaluated,
    Expect(ExprP<'ir>, ExprP<'ir>),
    Unreachable,
    Asm(&'ir str),
    Volatile(ExprP<'ir>),
}

#[derive(Debug, Clone)]
pub enum ExprKind<'ir> {
    Lit(Literal<'ir>),
    Local(Id),
    Global(ItemP<'ir>),
    Function(ItemP<'ir>),
    This,
    Binary(BinOp, ExprP<'ir>, ExprP<'ir>),
    Unary(UnOp, ExprP<'ir>),
    IncDec {
        is_increment: bool,
        is_prefix: bool,
        operand: ExprP<'ir>,
    },
    Assign(ExprP<'ir>, ExprP<'ir>),
    /// `lhs op= rhs`, computed in `compute_ty` and converted back.
    AssignOp {
        op: BinOp,
        lhs: ExprP<'ir>,
        rhs: ExprP<'ir>,
        compute_ty: TyP<'ir>,
    },
    Comma(ExprP<'ir>, ExprP<'ir>),
    Conditional(ExprP<'ir>, ExprP<'ir>, ExprP<'ir>),
    AddressOf(ExprP<'ir>),
    Deref(ExprP<'ir>),
    Field(ExprP<'ir>, Id),
    /// Pointer operand and index; the result designates the element.
    Index(ExprP<'ir>, ExprP<'ir>),
    Cast(CastKind<'ir>, ExprP<'ir>),
    Call(ExprP<'ir>, &'ir [ExprP<'ir>]),
    MemberCall {
        object: ExprP<'ir>,
        method: ItemP<'ir>,
        args: &'ir [ExprP<'ir>],
        is_virtual: bool,
    },
    MemberPointerCall {
        object: ExprP<'ir>,
        member: ExprP<'ir>,
        args: &'ir [ExprP<'ir>],
    },
    MemberPointerConst(MemberRef<'ir>),
    /// `object.*member` for data members.
    PointerToMember(ExprP<'ir>, ExprP<'ir>),
    Construct {
        ctor: ItemP<'ir>,
        args: &'ir [ExprP<'ir>],
    },
    Aggregate(&'ir [Initializer<'ir>]),
    ZeroInit,
    DynamicCast(ExprP<'ir>),
    TypeId(TypeIdOperand<'ir>),
    New {
        ty: TyP<'ir>,
        count: Option<ExprP<'ir>>,
        init: Option<ExprP<'ir>>,
    },
    Delete {
        ptr: ExprP<'ir>,
        is_array: bool,
    },
    Throw(Option<ExprP<'ir>>),
    MaterializeTemporary(ExprP<'ir>),
    Intrinsic(Intrinsic<'ir>),
}

#[derive(Debug, PartialEq, Eq, Clone, Hash, Copy)]
pub enum ValueType {
    LValue,
    RValue,
}

#[derive(Debug, Clone)]
pub struct Expr<'ir> {
    pub value_type: ValueType,
    pub kind: ExprKind<'ir>,
    pub span: Option<Span>,
    pub ty: TyP<'ir>,
}

impl<'ir> Expr<'ir> {
    pub fn lvalue(kind: ExprKind<'ir>, ty: TyP<'ir>, span: Option<Span>) -> Self {
        Self {
            kind,
            value_type: ValueType::LValue,
            ty,
            span,
        }
    }

    pub fn rvalue(kind: ExprKind<'ir>, ty: TyP<'ir>, span: Option<Span>) -> Self {
        Self {
            kind,
            value_type: ValueType::RValue,
            ty,
            span,
        }
    }

    pub fn is_lvalue(&self) -> bool {
        self.value_type == ValueType::LValue
    }
}

pub type ExprP<'ir> = &'ir Expr<'ir>;

impl_allocatable!(
    Expr<'_>,
    Ty<'_>,
    Statement<'_>,
    Field<'_>,
    Base<'_>,
    Parameter<'_>,
    ItemCell<'_>,
    EnumMember<'_>,
    CtorInitializer<'_>,
    Initializer<'_>,
    Id
);
