use crate::common::{CodeDiagnostic, HashMap};
use crate::ir::const_eval::value::{
    uninitialized, BlockId, IntValue, PathElem, Pointer, Value,
};
use crate::ir::const_eval::ConstEvalErrorKind;
use crate::ir::layout::Layouter;
use crate::ir::{Id, ItemP, TyP};

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind<'ir> {
    Global(ItemP<'ir>),
    Local(&'ir str),
    Parameter(&'ir str),
    Temporary,
    Heap { is_array: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Storage exists but the initializer has not finished.
    Pending,
    Live,
    /// The scope or full-expression owning the object ended.
    Dead,
    Freed,
}

/// A complete object created during one evaluation.
#[derive(Debug, Clone)]
pub struct Block<'ir> {
    pub kind: BlockKind<'ir>,
    pub ty: TyP<'ir>,
    pub value: Value<'ir>,
    pub state: BlockState,
    pub is_const: bool,
    /// Objects that exist outside of the evaluation, which may be read but
    /// never modified.
    pub foreign: bool,
}

impl Block<'_> {
    pub fn describe(&self) -> String {
        match self.kind {
            BlockKind::Global(item) => format!("variable '{}'", item.name()),
            BlockKind::Local(name) => format!("variable '{}'", name),
            BlockKind::Parameter(name) => format!("parameter '{}'", name),
            BlockKind::Temporary => "temporary".to_string(),
            BlockKind::Heap { .. } => "heap allocated object".to_string(),
        }
    }

    pub fn is_heap(&self) -> bool {
        matches!(self.kind, BlockKind::Heap { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Assign,
    Increment,
    Decrement,
    MemberCall,
    Construct,
    Destroy,
    DynamicCast,
    TypeId,
    Delete,
}

impl Display for AccessKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccessKind::Read => "read",
            AccessKind::Assign => "assignment",
            AccessKind::Increment => "increment",
            AccessKind::Decrement => "decrement",
            AccessKind::MemberCall => "member call",
            AccessKind::Construct => "construction",
            AccessKind::Destroy => "destruction",
            AccessKind::DynamicCast => "dynamic_cast",
            AccessKind::TypeId => "typeid",
            AccessKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// How a write treats the object it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// An ordinary modification. Union members at path depth `activate_from`
    /// or deeper become active when written, shallower ones must already be.
    Modify { activate_from: Option<usize> },
    /// Initialization of an object whose lifetime is just beginning. Allowed on
    /// const objects and switches the active union member.
    Initialize,
}

/// What the navigation learned about the designated subobject.
struct Located<'v, 'ir> {
    value: &'v Value<'ir>,
    mutable_field: Option<&'ir str>,
}

struct LocatedMut<'v, 'ir> {
    value: &'v mut Value<'ir>,
    bit_width: Option<u32>,
    mutable_field: Option<&'ir str>,
}

#[derive(Default)]
pub struct Memory<'ir> {
    blocks: Vec<Block<'ir>>,
    globals: HashMap<Id, BlockId>,
}

impl<'ir> Memory<'ir> {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            globals: HashMap::default(),
        }
    }

    pub fn allocate(&mut self, block: Block<'ir>) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(block);
        id
    }

    pub fn block(&self, id: BlockId) -> Result<&Block<'ir>, ConstEvalErrorKind> {
        self.blocks
            .get(id.0)
            .ok_or_else(|| ConstEvalErrorKind::CompilerBug(format!("no block {}", id.0)))
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut Block<'ir>, ConstEvalErrorKind> {
        self.blocks
            .get_mut(id.0)
            .ok_or_else(|| ConstEvalErrorKind::CompilerBug(format!("no block {}", id.0)))
    }

    pub fn global(&self, item: ItemP<'ir>) -> Option<BlockId> {
        self.globals.get(&item.id).copied()
    }

    pub fn bind_global(&mut self, item: ItemP<'ir>, id: BlockId) {
        self.globals.insert(item.id, id);
    }

    /// Ends the lifetime of a scoped object.
    pub fn kill(&mut self, id: BlockId) -> Result<(), ConstEvalErrorKind> {
        self.block_mut(id)?.state = BlockState::Dead;
        Ok(())
    }

    pub fn free(&mut self, id: BlockId) -> Result<(), ConstEvalErrorKind> {
        self.block_mut(id)?.state = BlockState::Freed;
        Ok(())
    }

    pub fn set_state(&mut self, id: BlockId, state: BlockState) -> Result<(), ConstEvalErrorKind> {
        self.block_mut(id)?.state = state;
        Ok(())
    }

    /// Heap allocations that were never deleted.
    pub fn live_heap(&self) -> impl Iterator<Item = &Block<'ir>> {
        self.blocks
            .iter()
            .filter(|b| b.is_heap() && b.state == BlockState::Live)
    }

    pub fn check_access(
        &self,
        id: BlockId,
        ptr: &Pointer<'ir>,
        access: AccessKind,
    ) -> Result<&Block<'ir>, ConstEvalErrorKind> {
        let block = self.block(id)?;
        match block.state {
            BlockState::Pending => return Err(ConstEvalErrorKind::ReadOutsideLifetime),
            BlockState::Dead => {
                return Err(ConstEvalErrorKind::LifetimeEnded(
                    access.to_string(),
                    block.describe(),
                ))
            }
            BlockState::Freed => return Err(ConstEvalErrorKind::UseAfterFree(access.to_string())),
            BlockState::Live => {}
        }

        if ptr.past_end {
            return Err(ConstEvalErrorKind::PastEndAccess(access.to_string()));
        }

        Ok(block)
    }

    /// The value of the designated subobject, which may be an aggregate.
    pub fn load(
        &self,
        layouter: &Layouter<'ir>,
        id: BlockId,
        ptr: &Pointer<'ir>,
        access: AccessKind,
    ) -> Result<Value<'ir>, ConstEvalErrorKind> {
        let block = self.check_access(id, ptr, access)?;
        let located = navigate(layouter, &block.value, &ptr.path, access)?;

        if let (true, Some(name)) = (block.foreign, located.mutable_field) {
            return Err(ConstEvalErrorKind::MutableRead(name.to_string()));
        }

        Ok(located.value.clone())
    }

    pub fn write(
        &mut self,
        layouter: &Layouter<'ir>,
        id: BlockId,
        ptr: &Pointer<'ir>,
        value: Value<'ir>,
        access: AccessKind,
        mode: WriteMode,
    ) -> Result<(), ConstEvalErrorKind> {
        let target = self.locate_mut(layouter, id, ptr, access, mode)?;

        *target.value = match (target.bit_width, value) {
            (Some(width), Value::Int(v)) => Value::Int(truncate_bit_field(&v, width)),
            (_, value) => value,
        };

        Ok(())
    }

    fn locate_mut<'a>(
        &'a mut self,
        layouter: &Layouter<'ir>,
        id: BlockId,
        ptr: &Pointer<'ir>,
        access: AccessKind,
        mode: WriteMode,
    ) -> Result<LocatedMut<'a, 'ir>, ConstEvalErrorKind> {
        let block = self.block(id)?;
        let initializing = mode == WriteMode::Initialize;

        match block.state {
            BlockState::Pending if initializing => {}
            _ => {
                self.check_access(id, ptr, access)?;
            }
        }
        if ptr.past_end {
            return Err(ConstEvalErrorKind::PastEndAccess(access.to_string()));
        }

        let block = self.block(id)?;
        if block.foreign {
            return Err(ConstEvalErrorKind::ModifyGlobal(block.describe()));
        }
        let (is_const, ty) = (block.is_const, block.ty);

        let activate_from = match mode {
            WriteMode::Initialize => 0,
            WriteMode::Modify { activate_from } => activate_from.unwrap_or(usize::MAX),
        };

        let block = self.block_mut(id)?;
        let located = navigate_mut(layouter, &mut block.value, &ptr.path, access, activate_from)?;

        if is_const && !initializing && located.mutable_field.is_none() {
            return Err(ConstEvalErrorKind::ModifyConst(ty.to_string()));
        }

        Ok(located)
    }
}

/// Two's complement truncation to the width of a bit-field.
pub fn truncate_bit_field(value: &IntValue, width: u32) -> IntValue {
    IntValue {
        value: IntValue::wrap(&value.value, width, value.signed),
        bits: value.bits,
        signed: value.signed,
    }
}

/// The designated part of a value that lives outside of any block.
pub fn project<'ir>(
    layouter: &Layouter<'ir>,
    root: &Value<'ir>,
    path: &[PathElem<'ir>],
    access: AccessKind,
) -> Result<Value<'ir>, ConstEvalErrorKind> {
    Ok(navigate(layouter, root, path, access)?.value.clone())
}

fn not_an_aggregate(elem: &PathElem<'_>) -> ConstEvalErrorKind {
    ConstEvalErrorKind::CompilerBug(format!("cannot apply {:?} to a scalar value", elem))
}

fn layout_error(diag: CodeDiagnostic) -> ConstEvalErrorKind {
    diag.into()
}

fn navigate<'v, 'ir>(
    layouter: &Layouter<'ir>,
    root: &'v Value<'ir>,
    path: &[PathElem<'ir>],
    access: AccessKind,
) -> Result<Located<'v, 'ir>, ConstEvalErrorKind> {
    let mut current = root;
    let mut mutable_field = None;

    for elem in path {
        current = match (elem, current) {
            (PathElem::Field(index), Value::Struct(record)) => {
                let descriptor = layouter.record(record.record).map_err(layout_error)?;
                if let Some(field) = descriptor.fields.get(*index) {
                    if field.is_mutable {
                        mutable_field = Some(field.name);
                    }
                }
                record
                    .fields
                    .get(*index)
                    .ok_or_else(|| not_an_aggregate(elem))?
            }
            (PathElem::Field(index), Value::Union(union)) => {
                let descriptor = layouter.record(union.record).map_err(layout_error)?;
                let name = |i: usize| {
                    descriptor
                        .fields
                        .get(i)
                        .map(|f| f.name.to_string())
                        .unwrap_or_default()
                };

                match &union.active {
                    Some((active, value)) if active == index => {
                        if descriptor.fields.get(*index).map(|f| f.is_mutable) == Some(true) {
                            mutable_field = descriptor.fields.get(*index).map(|f| f.name);
                        }
                        &**value
                    }
                    Some((active, _)) => {
                        return Err(ConstEvalErrorKind::InactiveUnionMember(
                            access.to_string(),
                            name(*index),
                            name(*active),
                        ))
                    }
                    None => {
                        return Err(ConstEvalErrorKind::NoActiveUnionMember(
                            access.to_string(),
                            name(*index),
                        ))
                    }
                }
            }
            (PathElem::Base(base), Value::Struct(record)) => record
                .bases
                .iter()
                .find(|(r, _)| r == base)
                .map(|(_, v)| v)
                .ok_or_else(|| not_an_aggregate(elem))?,
            (PathElem::VirtualBase(base), Value::Struct(record)) => record
                .virtual_bases
                .iter()
                .find(|(r, _)| r == base)
                .map(|(_, v)| v)
                .ok_or_else(|| not_an_aggregate(elem))?,
            (PathElem::Index(index), Value::Array(elems)) => match elems.get(*index) {
                Some(value) => value,
                None => return Err(ConstEvalErrorKind::PastEndAccess(access.to_string())),
            },
            (PathElem::Index(0), value) => value,
            _ => return Err(not_an_aggregate(elem)),
        };
    }

    Ok(Located {
        value: current,
        mutable_field,
    })
}

fn navigate_mut<'v, 'ir>(
    layouter: &Layouter<'ir>,
    root: &'v mut Value<'ir>,
    path: &[PathElem<'ir>],
    access: AccessKind,
    activate_from: usize,
) -> Result<LocatedMut<'v, 'ir>, ConstEvalErrorKind> {
    let mut current = root;
    let mut mutable_field = None;
    let mut bit_width = None;

    for (depth, elem) in path.iter().enumerate() {
        bit_width = None;
        current = match (elem, current) {
            (PathElem::Field(index), Value::Struct(record)) => {
                let descriptor = layouter.record(record.record).map_err(layout_error)?;
                if let Some(field) = descriptor.fields.get(*index) {
                    if field.is_mutable {
                        mutable_field = Some(field.name);
                    }
                    bit_width = field.bit_width;
                }
                match record.fields.get_mut(*index) {
                    Some(value) => value,
                    None => return Err(not_an_aggregate(elem)),
                }
            }
            (PathElem::Field(index), Value::Union(union)) => {
                let descriptor = layouter.record(union.record).map_err(layout_error)?;
                let field = descriptor
                    .fields
                    .get(*index)
                    .ok_or_else(|| not_an_aggregate(elem))?;
                if field.is_mutable {
                    mutable_field = Some(field.name);
                }
                bit_width = field.bit_width;

                let is_active = matches!(&union.active, Some((active, _)) if active == index);
                if !is_active {
                    if depth < activate_from {
                        let name = field.name.to_string();
                        return Err(match &union.active {
                            Some((active, _)) => ConstEvalErrorKind::InactiveUnionMember(
                                access.to_string(),
                                name,
                                descriptor
                                    .fields
                                    .get(*active)
                                    .map(|f| f.name.to_string())
                                    .unwrap_or_default(),
                            ),
                            None => ConstEvalErrorKind::NoActiveUnionMember(access.to_string(), name),
                        });
                    }

                    // The previous member's lifetime ends, the new one's begins
                    let fresh = uninitialized(layouter, field.ty).map_err(layout_error)?;
                    union.active = Some((*index, Box::new(fresh)));
                }

                match &mut union.active {
                    Some((_, value)) => &mut **value,
                    None => return Err(not_an_aggregate(elem)),
                }
            }
            (PathElem::Base(base), Value::Struct(record)) => {
                match record.bases.iter_mut().find(|(r, _)| r == base) {
                    Some((_, value)) => value,
                    None => return Err(not_an_aggregate(elem)),
                }
            }
            (PathElem::VirtualBase(base), Value::Struct(record)) => {
                match record.virtual_bases.iter_mut().find(|(r, _)| r == base) {
                    Some((_, value)) => value,
                    None => return Err(not_an_aggregate(elem)),
                }
            }
            (PathElem::Index(index), Value::Array(elems)) => match elems.get_mut(*index) {
                Some(value) => value,
                None => return Err(ConstEvalErrorKind::PastEndAccess(access.to_string())),
            },
            (PathElem::Index(0), value) => value,
            _ => return Err(not_an_aggregate(elem)),
        };
    }

    Ok(LocatedMut {
        value: current,
        bit_width,
        mutable_field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BuiltinType;
    use crate::global_ctx::LangStandard;
    use crate::ir::builder::{RecordBuilder, TypeBuilder};
    use crate::ir::const_eval::value::{zeroed, PointerBase};
    use crate::ir::layout::TargetInfo;
    use crate::ir::{IrCtx, RecordKind};

    fn int<'ir>(value: i128) -> Value<'ir> {
        Value::Int(IntValue::new(value, 32, true))
    }

    #[test]
    fn bit_field_writes_truncate() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20);

        let mut s = RecordBuilder::new(&ir, "S", RecordKind::Struct);
        s.bit_field("b", types.builtin(BuiltinType::Int), 3);
        let s = s.finish();
        let ty = types.record(s);

        let mut memory = Memory::new();
        let id = memory.allocate(Block {
            kind: BlockKind::Local("s"),
            ty,
            value: zeroed(&layouter, ty).unwrap(),
            state: BlockState::Live,
            is_const: false,
            foreign: false,
        });

        let field = Pointer::to(PointerBase::Block(id)).child(PathElem::Field(0));
        let modify = WriteMode::Modify {
            activate_from: Some(0),
        };

        memory
            .write(&layouter, id, &field, int(4), AccessKind::Assign, modify)
            .unwrap();
        assert_eq!(memory.load(&layouter, id, &field, AccessKind::Read).unwrap(), int(-4));

        memory
            .write(&layouter, id, &field, int(8), AccessKind::Assign, modify)
            .unwrap();
        assert_eq!(memory.load(&layouter, id, &field, AccessKind::Read).unwrap(), int(0));
    }

    #[test]
    fn lifetime_states_are_checked_before_access() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20);
        let ty = types.builtin(BuiltinType::Int);

        let mut memory = Memory::new();
        let id = memory.allocate(Block {
            kind: BlockKind::Local("x"),
            ty,
            value: int(1),
            state: BlockState::Pending,
            is_const: false,
            foreign: false,
        });
        let ptr = Pointer::to(PointerBase::Block(id));

        assert_eq!(
            memory.load(&layouter, id, &ptr, AccessKind::Read),
            Err(ConstEvalErrorKind::ReadOutsideLifetime)
        );

        memory.set_state(id, BlockState::Live).unwrap();
        assert_eq!(memory.load(&layouter, id, &ptr, AccessKind::Read), Ok(int(1)));

        memory.kill(id).unwrap();
        assert_eq!(
            memory.load(&layouter, id, &ptr, AccessKind::Read).map_err(|e| e.to_string()),
            Err("read of variable 'x' whose lifetime has ended".to_string())
        );
    }

    #[test]
    fn const_objects_reject_modification() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20);
        let ty = types.builtin(BuiltinType::Int);

        let mut memory = Memory::new();
        let id = memory.allocate(Block {
            kind: BlockKind::Local("c"),
            ty,
            value: int(1),
            state: BlockState::Live,
            is_const: true,
            foreign: false,
        });
        let ptr = Pointer::to(PointerBase::Block(id));

        let result = memory.write(
            &layouter,
            id,
            &ptr,
            int(2),
            AccessKind::Assign,
            WriteMode::Modify {
                activate_from: Some(0),
            },
        );
        assert_eq!(result, Err(ConstEvalErrorKind::ModifyConst("int".into())));
        assert!(memory
            .write(&layouter, id, &ptr, int(2), AccessKind::Construct, WriteMode::Initialize)
            .is_ok());
    }

    #[test]
    fn only_named_members_switch_the_active_union_member() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20);
        let int_ty = types.builtin(BuiltinType::Int);

        let mut u = RecordBuilder::new(&ir, "U", RecordKind::Union);
        u.field("a", int_ty);
        u.field("b", int_ty);
        let u = u.finish();
        let ty = types.record(u);

        let mut memory = Memory::new();
        let id = memory.allocate(Block {
            kind: BlockKind::Local("u"),
            ty,
            value: zeroed(&layouter, ty).unwrap(),
            state: BlockState::Live,
            is_const: false,
            foreign: false,
        });
        let b = Pointer::to(PointerBase::Block(id)).child(PathElem::Field(1));

        // `*p = 1` with `int* p = &u.b`
        let through_pointer = memory.write(
            &layouter,
            id,
            &b,
            int(1),
            AccessKind::Assign,
            WriteMode::Modify {
                activate_from: None,
            },
        );
        assert_eq!(
            through_pointer,
            Err(ConstEvalErrorKind::InactiveUnionMember(
                "assignment".into(),
                "b".into(),
                "a".into()
            ))
        );

        // `u.b = 1`
        memory
            .write(
                &layouter,
                id,
                &b,
                int(1),
                AccessKind::Assign,
                WriteMode::Modify {
                    activate_from: Some(0),
                },
            )
            .unwrap();
        assert_eq!(
            memory.load(&layouter, id, &b, AccessKind::Read),
            Ok(int(1))
        );
    }
}
