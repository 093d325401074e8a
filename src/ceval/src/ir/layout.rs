use crate::ast::BuiltinType;
use crate::common::{CodeDiagnostic, CycleGuardian};
use crate::global_ctx::{GlobalCtx, LangStandard};
use crate::ir::record::{RecordDescriptor, RecordRegistry};
use crate::ir::{AlignOfOperator, Designator, ItemP, Ty, TyP};

use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Target facts the layout of scalar types depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub pointer_width: u32,
    pub long_width: u32,
    pub char_signed: bool,
    pub int64_align: usize,
    pub int64_preferred_align: usize,
    pub double_align: usize,
    pub double_preferred_align: usize,
    pub long_double_size: usize,
    pub long_double_align: usize,
}

impl TargetInfo {
    pub fn x86_64() -> Self {
        Self {
            pointer_width: 64,
            long_width: 64,
            char_signed: true,
            int64_align: 8,
            int64_preferred_align: 8,
            double_align: 8,
            double_preferred_align: 8,
            long_double_size: 16,
            long_double_align: 16,
        }
    }

    /// The System V i386 ABI, where 8 byte scalars are only 4 byte aligned in
    /// aggregates but preferably 8 byte aligned on their own.
    pub fn i386() -> Self {
        Self {
            pointer_width: 32,
            long_width: 32,
            char_signed: true,
            int64_align: 4,
            int64_preferred_align: 8,
            double_align: 4,
            double_preferred_align: 8,
            long_double_size: 12,
            long_double_align: 4,
        }
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_width as usize / 8
    }
}

/// What `alignof` answers. Old compilers returned the preferred alignment, which
/// some code still depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlignOfCompat {
    #[default]
    Standard,
    LegacyPreferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignKind {
    Abi,
    Preferred,
}

/// GCC type classes as returned by `__builtin_classify_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    None,
    Void,
    Integer,
    Enum,
    Bool,
    Pointer,
    PointerToDataMember,
    RealFloat,
    Complex,
    PointerToMemberFunction,
    ClassOrStruct,
    Union,
    BitInt,
    Vector,
}

impl TypeClass {
    pub fn code(self) -> i32 {
        match self {
            TypeClass::None => -1,
            TypeClass::Void => 0,
            // GCC reserves 2 for characters but classifies them as integers
            TypeClass::Integer => 1,
            TypeClass::Enum => 3,
            TypeClass::Bool => 4,
            TypeClass::Pointer => 5,
            TypeClass::PointerToDataMember => 7,
            TypeClass::RealFloat => 8,
            TypeClass::Complex => 9,
            TypeClass::PointerToMemberFunction => 12,
            TypeClass::ClassOrStruct => 12,
            TypeClass::Union => 13,
            TypeClass::BitInt => 18,
            TypeClass::Vector => 19,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Layout {
    pub size: usize,
    pub align: usize,
    pub preferred_align: usize,
}

impl Layout {
    pub fn new(size: usize, align: usize) -> Self {
        Self {
            size,
            align,
            preferred_align: align,
        }
    }

    pub fn with_preferred(size: usize, align: usize, preferred_align: usize) -> Self {
        Self {
            size,
            align,
            preferred_align: preferred_align.max(align),
        }
    }

    pub fn integer(bit_width: usize) -> Self {
        Self::new(bit_width / 8, bit_width / 8)
    }

    pub fn array(&self, len: usize) -> Self {
        Self::with_preferred(self.size * len, self.align, self.preferred_align)
    }

    pub fn is_zero_sized(&self) -> bool {
        self.size == 0
    }

    pub fn align(&self, kind: AlignKind) -> usize {
        match kind {
            AlignKind::Abi => self.align,
            AlignKind::Preferred => self.preferred_align,
        }
    }
}

pub fn round_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

pub struct Layouter<'ir> {
    target: TargetInfo,
    standard: LangStandard,
    cycle_guardian: CycleGuardian<ItemP<'ir>>,
    registry: RecordRegistry<'ir>,
}

impl<'ir> Layouter<'ir> {
    pub fn new(global_ctx: &GlobalCtx) -> Self {
        let options = global_ctx.options();
        Self::with_target(options.target.clone(), options.standard)
    }

    pub fn with_target(target: TargetInfo, standard: LangStandard) -> Self {
        Self {
            target,
            standard,
            cycle_guardian: CycleGuardian::new(),
            registry: RecordRegistry::new(),
        }
    }

    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    pub fn standard(&self) -> LangStandard {
        self.standard
    }

    pub fn registry(&self) -> &RecordRegistry<'ir> {
        &self.registry
    }

    /// Memoized descriptor of a record. A record that fails to build is not cached.
    pub fn record(&self, item: ItemP<'ir>) -> Result<Rc<RecordDescriptor<'ir>>, CodeDiagnostic> {
        if let Some(descriptor) = self.registry.get(item) {
            return Ok(descriptor);
        }

        let _guard = self
            .cycle_guardian
            .guard(item)
            .map_err(|_| CodeDiagnostic::TypeWithInfiniteSize)?;

        let descriptor = Rc::new(RecordDescriptor::build(self, item)?);
        self.registry.insert(item, descriptor.clone());

        Ok(descriptor)
    }

    fn builtin_layout(&self, kind: BuiltinType) -> Layout {
        let target = &self.target;
        match kind {
            // GNU extension, sizeof(void) == 1
            BuiltinType::Void | BuiltinType::Bool => Layout::new(1, 1),
            BuiltinType::Char | BuiltinType::SChar | BuiltinType::UChar => Layout::integer(8),
            BuiltinType::Short | BuiltinType::UShort => Layout::integer(16),
            BuiltinType::Int | BuiltinType::UInt => Layout::integer(32),
            BuiltinType::Long | BuiltinType::ULong => {
                if target.long_width == 64 {
                    Layout::with_preferred(8, target.int64_align, target.int64_preferred_align)
                } else {
                    Layout::integer(target.long_width as usize)
                }
            }
            BuiltinType::LongLong | BuiltinType::ULongLong => {
                Layout::with_preferred(8, target.int64_align, target.int64_preferred_align)
            }
            BuiltinType::Int128 | BuiltinType::UInt128 => Layout::integer(128),
            BuiltinType::Float => Layout::integer(32),
            BuiltinType::Double => {
                Layout::with_preferred(8, target.double_align, target.double_preferred_align)
            }
            BuiltinType::LongDouble => {
                Layout::new(target.long_double_size, target.long_double_align)
            }
            BuiltinType::NullPtr => Layout::integer(target.pointer_width as usize),
        }
    }

    fn bit_int_layout(&self, bits: u32) -> Layout {
        let bytes = (bits as usize).div_ceil(8).max(1);
        let align = bytes.next_power_of_two().min(8);
        Layout::new(round_up(bytes, align), align)
    }

    /// Layout of a complete object of the type, as `sizeof` and `alignof` see it.
    pub fn layout_of(&self, ty: TyP<'ir>) -> Result<Layout, CodeDiagnostic> {
        match ty {
            Ty::Builtin(kind) => Ok(self.builtin_layout(*kind)),
            Ty::BitInt(bits, _) => Ok(self.bit_int_layout(*bits)),
            Ty::Pointer(_, _) => Ok(Layout::integer(self.target.pointer_width as usize)),
            Ty::MemberPointer(_, Ty::Function(_, _)) => Ok(Layout::new(
                2 * self.target.pointer_size(),
                self.target.pointer_size(),
            )),
            Ty::MemberPointer(_, _) => Ok(Layout::integer(self.target.pointer_width as usize)),
            // Size and alignment queries see through references
            Ty::Reference(inner, _) => self.layout_of(inner),
            Ty::Array(inner, len) => Ok(self.layout_of(inner)?.array(*len)),
            Ty::IncompleteArray(_) | Ty::Function(_, _) => {
                Err(CodeDiagnostic::IncompleteType(ty.to_string()))
            }
            Ty::Record(item) => Ok(self.record(item)?.layout),
            Ty::Enum(item) => self.layout_of(item.get_enum()?.underlying),
            Ty::Atomic(inner) => self.layout_of(inner),
            Ty::Complex(inner) => {
                let inner = self.layout_of(inner)?;
                Ok(Layout::with_preferred(
                    inner.size * 2,
                    inner.align,
                    inner.preferred_align,
                ))
            }
            Ty::Vector(inner, len) => {
                let inner = self.layout_of(inner)?;
                let size = (inner.size * len).next_power_of_two();
                Ok(Layout::new(size, size))
            }
        }
    }

    /// Layout of the type as a member of a record. Reference members occupy a
    /// pointer.
    pub fn field_layout(&self, ty: TyP<'ir>) -> Result<Layout, CodeDiagnostic> {
        match ty {
            Ty::Reference(_, _) => Ok(Layout::integer(self.target.pointer_width as usize)),
            _ => self.layout_of(ty),
        }
    }

    pub fn size_of(&self, ty: TyP<'ir>) -> Result<usize, CodeDiagnostic> {
        Ok(self.layout_of(ty)?.size)
    }

    pub fn align_of(&self, ty: TyP<'ir>, kind: AlignKind) -> Result<usize, CodeDiagnostic> {
        Ok(self.layout_of(ty)?.align(kind))
    }

    /// The answer of `alignof(T)` or `__alignof__(T)` under the given compatibility
    /// mode.
    pub fn align_of_operator(
        &self,
        ty: TyP<'ir>,
        op: AlignOfOperator,
        compat: AlignOfCompat,
    ) -> Result<usize, CodeDiagnostic> {
        let kind = match (op, compat) {
            (AlignOfOperator::GnuAlignOf, _) | (_, AlignOfCompat::LegacyPreferred) => {
                AlignKind::Preferred
            }
            (AlignOfOperator::AlignOf, AlignOfCompat::Standard) => AlignKind::Abi,
        };

        self.align_of(ty, kind)
    }

    pub fn classify(&self, ty: TyP<'ir>) -> TypeClass {
        match ty {
            Ty::Builtin(BuiltinType::Void) => TypeClass::Void,
            Ty::Builtin(BuiltinType::Bool) => TypeClass::Bool,
            Ty::Builtin(BuiltinType::NullPtr) => TypeClass::Pointer,
            Ty::Builtin(b) if b.is_float() => TypeClass::RealFloat,
            Ty::Builtin(_) => TypeClass::Integer,
            Ty::BitInt(_, _) => TypeClass::BitInt,
            Ty::Enum(_) => TypeClass::Enum,
            Ty::Pointer(_, _) | Ty::Array(_, _) | Ty::IncompleteArray(_) | Ty::Function(_, _) => {
                TypeClass::Pointer
            }
            Ty::Reference(inner, _) | Ty::Atomic(inner) => self.classify(inner),
            Ty::MemberPointer(_, Ty::Function(_, _)) => TypeClass::PointerToMemberFunction,
            Ty::MemberPointer(_, _) => TypeClass::PointerToDataMember,
            Ty::Complex(_) => TypeClass::Complex,
            Ty::Vector(_, _) => TypeClass::Vector,
            Ty::Record(item) => match item.get_record() {
                Ok(r) if r.is_union() => TypeClass::Union,
                Ok(_) => TypeClass::ClassOrStruct,
                Err(_) => TypeClass::None,
            },
        }
    }

    /// Width and signedness of integer-like types.
    pub fn int_repr(&self, ty: TyP<'ir>) -> Option<(u32, bool)> {
        match ty {
            Ty::Builtin(kind) => match kind {
                BuiltinType::Char => Some((8, self.target.char_signed)),
                BuiltinType::SChar => Some((8, true)),
                BuiltinType::UChar => Some((8, false)),
                BuiltinType::Short => Some((16, true)),
                BuiltinType::UShort => Some((16, false)),
                BuiltinType::Int => Some((32, true)),
                BuiltinType::UInt => Some((32, false)),
                BuiltinType::Long => Some((self.target.long_width, true)),
                BuiltinType::ULong => Some((self.target.long_width, false)),
                BuiltinType::LongLong => Some((64, true)),
                BuiltinType::ULongLong => Some((64, false)),
                BuiltinType::Int128 => Some((128, true)),
                BuiltinType::UInt128 => Some((128, false)),
                _ => None,
            },
            Ty::BitInt(bits, signed) => Some((*bits, *signed)),
            Ty::Enum(item) => item
                .get_enum()
                .ok()
                .and_then(|e| self.int_repr(e.underlying)),
            Ty::Atomic(inner) => self.int_repr(inner),
            _ => None,
        }
    }

    /// Byte offset designated by an `offsetof` member designator.
    pub fn offset_of(
        &self,
        ty: TyP<'ir>,
        designators: &[Designator],
    ) -> Result<usize, CodeDiagnostic> {
        let mut offset = 0;
        let mut current = ty;
        // Set after a base designator, which has no type of its own here
        let mut base_record: Option<ItemP<'ir>> = None;

        for designator in designators {
            let record_item = base_record.take().or_else(|| current.record());
            match (designator, record_item) {
                (Designator::Field(id), Some(item)) => {
                    let record = self.record(item)?;
                    let field = record.field(*id).ok_or_else(|| {
                        CodeDiagnostic::InternalError(format!(
                            "no field {} in '{}'",
                            id,
                            item.name()
                        ))
                    })?;
                    if field.bit_width.is_some() {
                        return Err(CodeDiagnostic::InternalError(
                            "offsetof applied to a bit-field".into(),
                        ));
                    }
                    offset += field.offset;
                    current = field.ty;
                }
                (Designator::Base(index), Some(item)) => {
                    let record = self.record(item)?;
                    let base = record.base_by_index(*index).ok_or_else(|| {
                        CodeDiagnostic::InternalError(format!(
                            "no base {} in '{}'",
                            index,
                            item.name()
                        ))
                    })?;
                    offset += base.offset;
                    base_record = Some(base.record);
                }
                (Designator::Index(index), None) => match current {
                    Ty::Array(inner, _) | Ty::IncompleteArray(inner) => {
                        offset += self.size_of(inner)? * index;
                        current = inner;
                    }
                    _ => {
                        return Err(CodeDiagnostic::InternalError(format!(
                            "subscript designator applied to '{}'",
                            current
                        )))
                    }
                },
                _ => {
                    return Err(CodeDiagnostic::InternalError(format!(
                        "invalid offsetof designator for '{}'",
                        current
                    )))
                }
            }
        }

        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::TypeBuilder;
    use crate::ir::IrCtx;

    #[test]
    fn builtin_layouts_follow_the_target() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20);

        assert_eq!(layouter.size_of(types.builtin(BuiltinType::Long)).unwrap(), 8);
        assert_eq!(layouter.size_of(types.builtin(BuiltinType::LongDouble)).unwrap(), 16);
        assert_eq!(
            layouter
                .size_of(types.pointer(types.builtin(BuiltinType::Char), true))
                .unwrap(),
            8
        );

        let layouter = Layouter::with_target(TargetInfo::i386(), LangStandard::Cxx20);
        assert_eq!(layouter.size_of(types.builtin(BuiltinType::Long)).unwrap(), 4);
        assert_eq!(layouter.size_of(types.builtin(BuiltinType::LongDouble)).unwrap(), 12);
    }

    #[test]
    fn alignof_compat_mode_is_explicit() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::i386(), LangStandard::Cxx20);
        let double = types.builtin(BuiltinType::Double);

        let abi = layouter
            .align_of_operator(double, AlignOfOperator::AlignOf, AlignOfCompat::Standard)
            .unwrap();
        let gnu = layouter
            .align_of_operator(double, AlignOfOperator::GnuAlignOf, AlignOfCompat::Standard)
            .unwrap();
        let legacy = layouter
            .align_of_operator(double, AlignOfOperator::AlignOf, AlignOfCompat::LegacyPreferred)
            .unwrap();

        assert_eq!((abi, gnu, legacy), (4, 8, 8));
    }

    #[test]
    fn references_use_the_referenced_type() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20);
        let array = types.array(types.builtin(BuiltinType::Short), 7);
        let reference = types.reference(array, false);

        assert_eq!(layouter.size_of(reference).unwrap(), 14);
        assert_eq!(layouter.align_of(reference, AlignKind::Abi).unwrap(), 2);
        assert_eq!(layouter.field_layout(reference).unwrap().size, 8);
    }

    #[test]
    fn classification_sees_through_atomic() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20);

        let int = types.builtin(BuiltinType::Int);
        let atomic_ptr = types.atomic(types.pointer(int, false));
        let atomic_float = types.atomic(types.builtin(BuiltinType::Float));

        assert_eq!(layouter.classify(atomic_ptr), TypeClass::Pointer);
        assert_eq!(layouter.classify(atomic_float).code(), 8);
        assert_eq!(layouter.classify(types.builtin(BuiltinType::Char)).code(), 1);
        assert_eq!(layouter.classify(types.array(int, 3)), TypeClass::Pointer);
        assert_eq!(layouter.classify(types.bit_int(7, true)).code(), 18);
    }

    #[test]
    fn incomplete_types_are_reported() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20);
        let unbounded = types.incomplete_array(types.builtin(BuiltinType::Int));

        assert_eq!(
            layouter.size_of(unbounded),
            Err(CodeDiagnostic::IncompleteType("int[]".into()))
        );
    }

    #[test]
    fn bit_int_sizes_round_to_powers_of_two() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20);

        assert_eq!(layouter.size_of(types.bit_int(3, true)).unwrap(), 1);
        assert_eq!(layouter.size_of(types.bit_int(17, true)).unwrap(), 4);
        assert_eq!(layouter.size_of(types.bit_int(65, false)).unwrap(), 16);
        assert_eq!(layouter.size_of(types.bit_int(200, false)).unwrap(), 32);
    }
}
