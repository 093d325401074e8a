use crate::common::{CodeDiagnostic, HashMap, HashSet};
use crate::ir::layout::{round_up, Layout, Layouter};
use crate::ir::{Id, ItemP, TyP};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct FieldInfo<'ir> {
    pub id: Id,
    pub name: &'ir str,
    pub ty: TyP<'ir>,
    /// Byte offset from the start of the record.
    pub offset: usize,
    pub bit_offset: usize,
    pub bit_width: Option<u32>,
    pub is_mutable: bool,
}

impl FieldInfo<'_> {
    /// Unnamed bit-fields are padding and are skipped by initialization.
    pub fn is_unnamed_bit_field(&self) -> bool {
        self.bit_width.is_some() && self.name.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BaseInfo<'ir> {
    pub record: ItemP<'ir>,
    /// Position in the declared base list for direct bases, position in
    /// [`RecordDescriptor::virtual_bases`] otherwise.
    pub index: usize,
    pub offset: usize,
    pub is_virtual: bool,
    pub descriptor: Rc<RecordDescriptor<'ir>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subobject {
    Base(usize),
    Field(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseStep<'ir> {
    pub record: ItemP<'ir>,
    pub is_virtual: bool,
}

/// Read-only description of a record type, built once per record.
#[derive(Debug)]
pub struct RecordDescriptor<'ir> {
    pub record: ItemP<'ir>,
    /// Layout of a complete object, including virtual bases.
    pub layout: Layout,
    /// Size of the record when it is a non-virtual base of another one.
    pub nv_size: usize,
    pub nv_align: usize,
    pub is_union: bool,
    pub is_polymorphic: bool,
    pub is_empty: bool,
    /// Direct non-virtual bases in declaration order.
    pub bases: Vec<BaseInfo<'ir>>,
    pub fields: Vec<FieldInfo<'ir>>,
    /// All virtual bases, direct and indirect, with offsets relative to a complete
    /// object of this type.
    pub virtual_bases: Vec<BaseInfo<'ir>>,
    fields_by_id: HashMap<Id, usize>,
    bases_by_id: HashMap<Id, usize>,
    virtual_bases_by_id: HashMap<Id, usize>,
    fields_by_offset: BTreeMap<usize, usize>,
    bases_by_offset: BTreeMap<usize, usize>,
    /// Virtual function to its final overrider in this class.
    vtable: HashMap<Id, ItemP<'ir>>,
}

fn insert_unique(
    map: &mut BTreeMap<usize, usize>,
    key: usize,
    value: usize,
    name_of: impl Fn(usize) -> String,
    record: &str,
) -> Result<(), CodeDiagnostic> {
    if let Some(existing) = map.insert(key, value) {
        return Err(CodeDiagnostic::OverlappingSubobjects(
            name_of(existing),
            name_of(value),
            record.to_string(),
        ));
    }
    Ok(())
}

impl<'ir> RecordDescriptor<'ir> {
    pub fn build(layouter: &Layouter<'ir>, item: ItemP<'ir>) -> Result<Self, CodeDiagnostic> {
        let record = item.get_record()?;
        if !record.is_complete {
            return Err(CodeDiagnostic::IncompleteType(record.name.to_string()));
        }

        let pointer_size = layouter.target().pointer_size();
        let is_cpp = layouter.standard().is_cpp();

        let mut direct = Vec::with_capacity(record.bases.len());
        for base in record.bases {
            direct.push((base, layouter.record(base.record)?));
        }

        let mut declares_virtual = false;
        for method in record.methods {
            let func = method.get_function()?;
            if let Some(info) = func.method {
                declares_virtual |= info.is_virtual || !info.overrides.is_empty();
            }
        }

        let has_virtual_bases = direct
            .iter()
            .any(|(b, d)| b.is_virtual || !d.virtual_bases.is_empty());
        let is_polymorphic =
            declares_virtual || has_virtual_bases || direct.iter().any(|(_, d)| d.is_polymorphic);

        let mut size = 0;
        let mut align = 1;

        // The primary base shares the vtable pointer and goes first.
        let primary = direct
            .iter()
            .position(|(b, d)| !b.is_virtual && d.is_polymorphic);

        let mut bases = Vec::new();
        if let Some(index) = primary {
            let (base, descriptor) = &direct[index];
            size = descriptor.nv_size;
            align = descriptor.nv_align;
            bases.push(BaseInfo {
                record: base.record,
                index,
                offset: 0,
                is_virtual: false,
                descriptor: descriptor.clone(),
            });
        } else if is_polymorphic {
            size = pointer_size;
            align = pointer_size;
        }

        let mut empty_at_start: HashSet<Id> = HashSet::default();
        for (index, (base, descriptor)) in direct.iter().enumerate() {
            if base.is_virtual || Some(index) == primary {
                continue;
            }

            let offset = if descriptor.is_empty {
                if empty_at_start.insert(base.record.id) {
                    0
                } else {
                    size += 1;
                    size - 1
                }
            } else {
                let offset = round_up(size, descriptor.nv_align);
                size = offset + descriptor.nv_size;
                offset
            };

            align = align.max(descriptor.nv_align);
            bases.push(BaseInfo {
                record: base.record,
                index,
                offset,
                is_virtual: false,
                descriptor: descriptor.clone(),
            });
        }
        bases.sort_by_key(|b| b.index);

        let mut fields = Vec::with_capacity(record.fields.len());
        let mut bit = size * 8;
        let mut union_size = 0;

        for field in record.fields {
            let layout = layouter.field_layout(field.ty)?;
            let storage_bits = layout.size * 8;

            let bit_offset = if record.is_union() {
                let bytes = match field.bit_width {
                    Some(width) => (width as usize).div_ceil(8),
                    None => layout.size,
                };
                union_size = union_size.max(bytes);
                0
            } else {
                match field.bit_width {
                    Some(0) => {
                        bit = round_up(bit, layout.align * 8);
                        bit
                    }
                    Some(width) => {
                        let width = width as usize;
                        // A bit-field never straddles a storage unit of its type
                        if storage_bits > 0 && bit / storage_bits != (bit + width - 1) / storage_bits {
                            bit = round_up(bit, layout.align * 8);
                        }
                        let at = bit;
                        bit += width;
                        at
                    }
                    None => {
                        let offset = round_up(bit.div_ceil(8), layout.align);
                        bit = (offset + layout.size) * 8;
                        offset * 8
                    }
                }
            };

            if field.bit_width != Some(0) {
                align = align.max(layout.align);
            }

            fields.push(FieldInfo {
                id: field.id,
                name: field.name,
                ty: field.ty,
                offset: bit_offset / 8,
                bit_offset,
                bit_width: field.bit_width,
                is_mutable: field.is_mutable,
            });
        }

        let data_end = if record.is_union() {
            size.max(union_size)
        } else {
            bit.div_ceil(8)
        };

        let nv_align = align;
        let nv_size = round_up(data_end, nv_align);

        // Virtual bases of any depth are laid out once, after the non-virtual part.
        let mut virtual_order: Vec<ItemP<'ir>> = Vec::new();
        for (base, descriptor) in &direct {
            if base.is_virtual && !virtual_order.contains(&base.record) {
                virtual_order.push(base.record);
            }
            for vb in &descriptor.virtual_bases {
                if !virtual_order.contains(&vb.record) {
                    virtual_order.push(vb.record);
                }
            }
        }

        let mut end = nv_size;
        let mut virtual_bases = Vec::with_capacity(virtual_order.len());
        for (index, vb) in virtual_order.into_iter().enumerate() {
            let descriptor = layouter.record(vb)?;
            let offset = if descriptor.is_empty {
                end
            } else {
                let offset = round_up(end, descriptor.nv_align);
                end = offset + descriptor.nv_size;
                offset
            };
            align = align.max(descriptor.nv_align);
            virtual_bases.push(BaseInfo {
                record: vb,
                index,
                offset,
                is_virtual: true,
                descriptor,
            });
        }

        let is_empty = !is_polymorphic
            && virtual_bases.is_empty()
            && fields.iter().all(|f| f.bit_width == Some(0))
            && bases.iter().all(|b| b.descriptor.is_empty);

        let min_size = if is_cpp { 1 } else { 0 };
        let layout = Layout::new(round_up(end.max(min_size), align), align);

        let mut fields_by_offset = BTreeMap::new();
        if !record.is_union() {
            for (index, field) in fields.iter().enumerate() {
                if field.bit_width == Some(0) || layouter.field_layout(field.ty)?.size == 0 {
                    continue;
                }
                insert_unique(
                    &mut fields_by_offset,
                    field.bit_offset,
                    index,
                    |i| fields[i].name.to_string(),
                    record.name,
                )?;
            }
        }

        let mut bases_by_offset = BTreeMap::new();
        for (index, base) in bases.iter().enumerate() {
            if base.descriptor.is_empty {
                continue;
            }
            insert_unique(
                &mut bases_by_offset,
                base.offset,
                index,
                |i| bases[i].record.name().to_string(),
                record.name,
            )?;
        }

        let fields_by_id = fields.iter().enumerate().map(|(i, f)| (f.id, i)).collect();
        let bases_by_id = bases
            .iter()
            .enumerate()
            .map(|(i, b)| (b.record.id, i))
            .collect();
        let virtual_bases_by_id = virtual_bases
            .iter()
            .enumerate()
            .map(|(i, b)| (b.record.id, i))
            .collect();

        let mut vtable: HashMap<Id, ItemP<'ir>> = HashMap::default();
        for (_, descriptor) in &direct {
            for (id, overrider) in &descriptor.vtable {
                vtable.entry(*id).or_insert(*overrider);
            }
        }
        for method in record.methods {
            let func = method.get_function()?;
            let Some(info) = func.method else {
                continue;
            };
            if !info.is_virtual && info.overrides.is_empty() {
                continue;
            }

            let mut pending = vec![*method];
            let mut seen = HashSet::default();
            while let Some(overridden) = pending.pop() {
                if !seen.insert(overridden.id) {
                    continue;
                }
                vtable.insert(overridden.id, *method);
                if let Some(info) = overridden.get_function()?.method {
                    pending.extend(info.overrides.iter().copied());
                }
            }
        }

        trace!(
            record = record.name,
            size = layout.size,
            align = layout.align,
            "built record descriptor"
        );

        Ok(Self {
            record: item,
            layout,
            nv_size,
            nv_align,
            is_union: record.is_union(),
            is_polymorphic,
            is_empty,
            bases,
            fields,
            virtual_bases,
            fields_by_id,
            bases_by_id,
            virtual_bases_by_id,
            fields_by_offset,
            bases_by_offset,
            vtable,
        })
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn field(&self, id: Id) -> Option<&FieldInfo<'ir>> {
        self.fields_by_id.get(&id).map(|i| &self.fields[*i])
    }

    pub fn field_index(&self, id: Id) -> Option<usize> {
        self.fields_by_id.get(&id).copied()
    }

    pub fn base(&self, record: ItemP<'ir>) -> Option<(usize, &BaseInfo<'ir>)> {
        self.bases_by_id
            .get(&record.id)
            .map(|i| (*i, &self.bases[*i]))
    }

    pub fn virtual_base(&self, record: ItemP<'ir>) -> Option<(usize, &BaseInfo<'ir>)> {
        self.virtual_bases_by_id
            .get(&record.id)
            .map(|i| (*i, &self.virtual_bases[*i]))
    }

    /// Base designated by its position in the declared base list.
    pub fn base_by_index(&self, index: usize) -> Option<&BaseInfo<'ir>> {
        if let Some(base) = self.bases.iter().find(|b| b.index == index) {
            return Some(base);
        }

        let declared = self.record.get_record().ok()?.bases.get(index)?;
        self.virtual_base(declared.record).map(|(_, b)| b)
    }

    /// The field or non-empty base that starts at the byte offset.
    pub fn member_at(&self, offset: usize) -> Option<Subobject> {
        if let Some(index) = self.bases_by_offset.get(&offset) {
            return Some(Subobject::Base(*index));
        }

        self.fields_by_offset
            .get(&(offset * 8))
            .map(|index| Subobject::Field(*index))
    }

    pub fn final_overrider(&self, func: ItemP<'ir>) -> Option<ItemP<'ir>> {
        self.vtable.get(&func.id).copied()
    }
}

/// Memoizing registry of record descriptors keyed by declaration identity. Only
/// successfully built descriptors are inserted, and an entry never changes once
/// inserted.
pub struct RecordRegistry<'ir> {
    records: RefCell<HashMap<Id, Rc<RecordDescriptor<'ir>>>>,
}

impl Default for RecordRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'ir> RecordRegistry<'ir> {
    pub fn new() -> Self {
        Self {
            records: RefCell::new(HashMap::default()),
        }
    }

    pub fn get(&self, item: ItemP<'ir>) -> Option<Rc<RecordDescriptor<'ir>>> {
        self.records.borrow().get(&item.id).cloned()
    }

    pub fn insert(&self, item: ItemP<'ir>, descriptor: Rc<RecordDescriptor<'ir>>) {
        self.records
            .borrow_mut()
            .entry(item.id)
            .or_insert(descriptor);
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

/// Every derived-to-base path from `from` to a base of type `to`.
pub fn base_paths<'ir>(
    from: ItemP<'ir>,
    to: ItemP<'ir>,
) -> Result<Vec<Vec<BaseStep<'ir>>>, CodeDiagnostic> {
    fn walk<'ir>(
        current: ItemP<'ir>,
        to: ItemP<'ir>,
        path: &mut Vec<BaseStep<'ir>>,
        result: &mut Vec<Vec<BaseStep<'ir>>>,
    ) -> Result<(), CodeDiagnostic> {
        for base in current.get_record()?.bases {
            path.push(BaseStep {
                record: base.record,
                is_virtual: base.is_virtual,
            });
            if base.record == to {
                result.push(path.clone());
            }
            walk(base.record, to, path, result)?;
            path.pop();
        }
        Ok(())
    }

    let mut result = Vec::new();
    walk(from, to, &mut Vec::new(), &mut result)?;
    Ok(result)
}

/// The path to the only base subobject of type `to`, if there is exactly one.
/// Paths meeting in the same virtual base designate the same subobject.
pub fn unique_base_path<'ir>(
    from: ItemP<'ir>,
    to: ItemP<'ir>,
) -> Result<Option<Vec<BaseStep<'ir>>>, CodeDiagnostic> {
    let paths = base_paths(from, to)?;

    let identity = |path: &[BaseStep<'ir>]| -> (bool, Vec<Id>) {
        match path.iter().rposition(|s| s.is_virtual) {
            Some(k) => (true, path[k..].iter().map(|s| s.record.id).collect()),
            None => (false, path.iter().map(|s| s.record.id).collect()),
        }
    };

    let mut distinct: Vec<(bool, Vec<Id>)> = Vec::new();
    for path in &paths {
        let id = identity(path);
        if !distinct.contains(&id) {
            distinct.push(id);
        }
    }

    match distinct.len() {
        1 => Ok(paths.into_iter().next()),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BuiltinType;
    use crate::global_ctx::LangStandard;
    use crate::ir::builder::{FunctionBuilder, RecordBuilder, TypeBuilder};
    use crate::ir::layout::TargetInfo;
    use crate::ir::{IrCtx, MethodKind, RecordKind};

    fn layouter<'ir>() -> Layouter<'ir> {
        Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx20)
    }

    #[test]
    fn plain_struct_offsets() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = layouter();

        let mut s = RecordBuilder::new(&ir, "S", RecordKind::Struct);
        s.field("c", types.builtin(BuiltinType::Char));
        let i = s.field("i", types.builtin(BuiltinType::Int));
        s.field("s", types.builtin(BuiltinType::Short));
        let s = s.finish();

        let descriptor = layouter.record(s).unwrap();
        let offsets: Vec<_> = descriptor.fields.iter().map(|f| f.offset).collect();

        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(descriptor.layout, Layout::new(12, 4));
        assert_eq!(descriptor.member_at(4), Some(Subobject::Field(1)));
        assert_eq!(descriptor.member_at(2), None);
        assert_eq!(descriptor.field(i).map(|f| f.name), Some("i"));
    }

    #[test]
    fn bit_fields_pack_into_storage_units() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = layouter();
        let int = types.builtin(BuiltinType::Int);

        let mut s = RecordBuilder::new(&ir, "Bits", RecordKind::Struct);
        s.bit_field("a", int, 3);
        s.bit_field("b", int, 5);
        s.bit_field("", int, 0);
        s.bit_field("c", int, 2);
        let s = s.finish();

        let descriptor = layouter.record(s).unwrap();
        let bits: Vec<_> = descriptor.fields.iter().map(|f| f.bit_offset).collect();

        assert_eq!(bits, vec![0, 3, 32, 32]);
        assert_eq!(descriptor.layout.size, 8);
        assert_eq!(descriptor.member_at(4), Some(Subobject::Field(3)));
    }

    #[test]
    fn virtual_bases_are_placed_relative_to_the_most_derived_object() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = layouter();
        let int = types.builtin(BuiltinType::Int);

        let mut v = RecordBuilder::new(&ir, "V", RecordKind::Struct);
        v.field("v", int);
        let v = v.finish();

        let mut a = RecordBuilder::new(&ir, "A", RecordKind::Struct);
        a.base(v, true);
        a.field("a", int);
        let a = a.finish();

        let mut b = RecordBuilder::new(&ir, "B", RecordKind::Struct);
        b.base(v, true);
        b.field("b", int);
        let b = b.finish();

        let mut d = RecordBuilder::new(&ir, "D", RecordKind::Struct);
        d.base(a, false);
        d.base(b, false);
        d.field("d", int);
        let d = d.finish();

        let da = layouter.record(a).unwrap();
        assert_eq!(da.virtual_base(v).map(|(_, b)| b.offset), Some(16));
        assert_eq!(da.layout.size, 24);

        let dd = layouter.record(d).unwrap();
        let base_offsets: Vec<_> = dd.bases.iter().map(|b| b.offset).collect();
        assert_eq!(base_offsets, vec![0, 16]);
        assert_eq!(dd.fields[0].offset, 32);
        assert_eq!(dd.virtual_bases.len(), 1);
        assert_eq!(dd.virtual_base(v).map(|(_, b)| b.offset), Some(40));
        assert_eq!(dd.layout.size, 48);
        assert!(dd.is_polymorphic);

        // Both paths reach the one shared V.
        assert_eq!(base_paths(d, v).unwrap().len(), 2);
        assert!(unique_base_path(d, v).unwrap().is_some());
    }

    #[test]
    fn repeated_non_virtual_base_is_ambiguous() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let int = types.builtin(BuiltinType::Int);

        let mut v = RecordBuilder::new(&ir, "V", RecordKind::Struct);
        v.field("v", int);
        let v = v.finish();

        let mut a = RecordBuilder::new(&ir, "A", RecordKind::Struct);
        a.base(v, false);
        let a = a.finish();

        let mut b = RecordBuilder::new(&ir, "B", RecordKind::Struct);
        b.base(v, false);
        let b = b.finish();

        let mut d = RecordBuilder::new(&ir, "D", RecordKind::Struct);
        d.base(a, false);
        d.base(b, false);
        let d = d.finish();

        assert!(unique_base_path(d, v).unwrap().is_none());
        assert_eq!(unique_base_path(d, a).unwrap().map(|p| p.len()), Some(1));
    }

    #[test]
    fn final_overriders_follow_the_most_derived_class() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = layouter();
        let int = types.builtin(BuiltinType::Int);

        let mut base = RecordBuilder::new(&ir, "Base", RecordKind::Struct);
        let base_item = base.item();
        let mut f = FunctionBuilder::new(&ir, "f", int);
        f.method(base_item, MethodKind::Normal).set_virtual();
        let base_f = f.declare();
        base.method(base_f);
        let base = base.finish();

        let mut derived = RecordBuilder::new(&ir, "Derived", RecordKind::Struct);
        derived.base(base, false);
        let mut g = FunctionBuilder::new(&ir, "f", int);
        g.method(derived.item(), MethodKind::Normal).overrides(&[base_f]);
        let derived_f = g.declare();
        derived.method(derived_f);
        let derived = derived.finish();

        let db = layouter.record(base).unwrap();
        let dd = layouter.record(derived).unwrap();

        assert_eq!(db.final_overrider(base_f), Some(base_f));
        assert_eq!(dd.final_overrider(base_f), Some(derived_f));
        assert_eq!(dd.layout.size, 8);
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = layouter();

        let incomplete = RecordBuilder::new(&ir, "Fwd", RecordKind::Struct).declare();
        let mut s = RecordBuilder::new(&ir, "S", RecordKind::Struct);
        s.field("fwd", types.record(incomplete));
        let s = s.finish();

        assert_eq!(
            layouter.record(s).unwrap_err(),
            CodeDiagnostic::IncompleteType("Fwd".into())
        );
        assert!(layouter.registry().is_empty());

        let mut ok = RecordBuilder::new(&ir, "Ok", RecordKind::Struct);
        ok.field("p", types.pointer(types.record(incomplete), false));
        let ok = ok.finish();
        assert!(layouter.record(ok).is_ok());
        assert_eq!(layouter.registry().len(), 1);
    }

    #[test]
    fn recursive_records_have_infinite_size() {
        let ir = IrCtx::new();
        let types = TypeBuilder::new(&ir);
        let layouter = layouter();

        let mut s = RecordBuilder::new(&ir, "S", RecordKind::Struct);
        let self_ty = types.record(s.item());
        s.field("inner", self_ty);
        let s = s.finish();

        assert_eq!(
            layouter.record(s).unwrap_err(),
            CodeDiagnostic::TypeWithInfiniteSize
        );
    }

    #[test]
    fn empty_records_follow_the_language() {
        let ir = IrCtx::new();
        let empty = RecordBuilder::new(&ir, "E", RecordKind::Struct).finish();

        let cpp = Layouter::with_target(TargetInfo::x86_64(), LangStandard::Cxx17);
        let c = Layouter::with_target(TargetInfo::x86_64(), LangStandard::C11);

        assert_eq!(cpp.record(empty).unwrap().layout.size, 1);
        assert_eq!(c.record(empty).unwrap().layout.size, 0);
        assert!(cpp.record(empty).unwrap().is_empty);
    }
}
