//! Objects of class and array type: initialization, construction and
//! destruction, and navigation of the class hierarchy.

use super::memory::{AccessKind, BlockKind, BlockState};
use super::value::{zeroed, MemberPointer, MemberStep, PathElem, Pointer, PointerBase, Value};
use super::{ConstEvalErrorKind, ConstEvaluator, Frame};

use crate::common::{EvalError, IndexMap};
use crate::diagnostics::WithBacktrace;
use crate::ir::record::unique_base_path;
use crate::ir::{
    CtorInitializer, Designator, ExprKind, ExprP, Function, Initializer, ItemP, MemberRef,
    Ty, TyP, TypeIdOperand,
};

/// What an aggregate initializer list says about one subobject.
enum Slot<'ir> {
    Direct(ExprP<'ir>),
    /// Designators reaching into the subobject, e.g. `.a.b = 1`.
    Nested(Vec<Initializer<'ir>>),
}

/// Assigns the initializers of a list to subobjects. Positional initializers
/// continue after the previous designated one.
fn group_slots<'ir>(
    initializers: &[Initializer<'ir>],
    order: &[Designator],
) -> IndexMap<Designator, Slot<'ir>> {
    let mut slots: IndexMap<Designator, Slot<'ir>> = IndexMap::default();
    let mut cursor = 0;

    for init in initializers {
        let (key, rest) = match init.designator.split_first() {
            Some((first, rest)) => {
                cursor = order.iter().position(|d| d == first).map_or(cursor, |p| p + 1);
                (*first, rest)
            }
            None => match order.get(cursor) {
                Some(key) => {
                    cursor += 1;
                    (*key, &[][..])
                }
                None => continue,
            },
        };

        if rest.is_empty() {
            slots.insert(key, Slot::Direct(init.value));
        } else {
            let nested = Initializer {
                designator: rest,
                value: init.value,
            };
            match slots.get_mut(&key) {
                Some(Slot::Nested(list)) => list.push(nested),
                _ => {
                    slots.insert(key, Slot::Nested(vec![nested]));
                }
            }
        }
    }

    slots
}

impl<'ir> ConstEvaluator<'ir> {
    /// Initializes the object at `ptr` from an initializer expression.
    pub(super) fn initialize(
        &mut self,
        ptr: &Pointer<'ir>,
        ty: TyP<'ir>,
        expr: ExprP<'ir>,
    ) -> Result<(), EvalError> {
        let _guard = self.diag.push_span(expr.span);

        match (ty.strip_atomic(), &expr.kind) {
            (Ty::Reference(_, _), _) => {
                let target = self.eval_glvalue(expr)?;
                self.init_store(ptr, Value::Reference(target))
            }
            (_, ExprKind::Construct { ctor, args }) => {
                self.begin_lifetime(ptr)?;
                let args = self.eval_args(*ctor, args)?;
                self.call(*ctor, Some(ptr.clone()), args)?;
                Ok(())
            }
            (Ty::Record(item), ExprKind::Aggregate(initializers)) => {
                self.begin_lifetime(ptr)?;
                self.init_record(ptr, *item, initializers)
            }
            (Ty::Array(element, len), ExprKind::Aggregate(initializers))
                if self.contains_class(element) =>
            {
                self.begin_lifetime(ptr)?;
                self.init_array(ptr, element, *len, initializers)
            }
            (Ty::Record(_), ExprKind::ZeroInit) => {
                self.begin_lifetime(ptr)?;
                self.value_initialize(ptr, ty)
            }
            _ => {
                // Scalars and arrays of scalars are computed before the object's
                // lifetime begins
                let value = self.eval_rvalue(expr)?;
                let value = self.fit_array(value, ty)?;
                self.init_store(ptr, value)
            }
        }
    }

    fn contains_class(&self, ty: TyP<'ir>) -> bool {
        match ty.strip_atomic() {
            Ty::Record(_) => true,
            Ty::Array(element, _) => self.contains_class(element),
            _ => false,
        }
    }

    /// A string literal initializing a longer character array is padded with
    /// zeros.
    fn fit_array(&self, value: Value<'ir>, ty: TyP<'ir>) -> Result<Value<'ir>, EvalError> {
        match (value, ty.strip_atomic()) {
            (Value::Array(mut elems), Ty::Array(element, len)) => {
                match elems.len().cmp(len) {
                    std::cmp::Ordering::Less => {
                        let zero = self.lift(zeroed(&self.layouter, element))?;
                        elems.resize(*len, zero);
                    }
                    std::cmp::Ordering::Greater => elems.truncate(*len),
                    std::cmp::Ordering::Equal => {}
                }
                Ok(Value::Array(elems))
            }
            (value, _) => Ok(value),
        }
    }

    /// Default-initialization: runs default constructors, leaves scalars
    /// uninitialized.
    pub(super) fn default_initialize(
        &mut self,
        ptr: &Pointer<'ir>,
        ty: TyP<'ir>,
    ) -> Result<(), EvalError> {
        match ty.strip_atomic() {
            Ty::Record(item) => self.default_construct(ptr, *item),
            Ty::Array(element, len) if self.contains_class(element) => {
                for index in 0..*len {
                    self.default_initialize(&ptr.child(PathElem::Index(index)), element)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Value-initialization: zeroes the object, then runs the default
    /// constructor of classes.
    pub(super) fn value_initialize(
        &mut self,
        ptr: &Pointer<'ir>,
        ty: TyP<'ir>,
    ) -> Result<(), EvalError> {
        match ty.strip_atomic() {
            Ty::Record(item) => {
                if self.user_default_constructor(*item)?.is_none() {
                    let zero = self.lift(zeroed(&self.layouter, ty))?;
                    self.init_store(ptr, zero)?;
                }
                self.default_construct(ptr, *item)
            }
            Ty::Array(element, len) if self.contains_class(element) => {
                for index in 0..*len {
                    self.value_initialize(&ptr.child(PathElem::Index(index)), element)?;
                }
                Ok(())
            }
            _ => {
                let zero = self.lift(zeroed(&self.layouter, ty))?;
                self.init_store(ptr, zero)
            }
        }
    }

    fn user_default_constructor(&self, item: ItemP<'ir>) -> Result<Option<ItemP<'ir>>, EvalError> {
        let record = self.lift(item.get_record())?;
        for method in record.methods {
            let f = self.lift(method.get_function())?;
            if f.is_constructor() && f.params.is_empty() {
                return Ok(Some(*method));
            }
        }
        Ok(None)
    }

    pub(super) fn default_construct(
        &mut self,
        ptr: &Pointer<'ir>,
        item: ItemP<'ir>,
    ) -> Result<(), EvalError> {
        self.begin_lifetime(ptr)?;

        if let Some(ctor) = self.user_default_constructor(item)? {
            self.call(ctor, Some(ptr.clone()), Vec::new())?;
            return Ok(());
        }

        // Implicit default constructor; default member initializers may still
        // refer to `this`
        self.frames.push(Frame::new(None, Some(ptr.clone())));
        self.construct_subobjects(item, ptr, &[])?;
        self.constructing.pop();
        while !self.frame()?.scopes.is_empty() {
            self.pop_scope()?;
        }
        self.frames.pop();
        Ok(())
    }

    /// Aggregate initialization of a class in place.
    fn init_record(
        &mut self,
        ptr: &Pointer<'ir>,
        item: ItemP<'ir>,
        initializers: &[Initializer<'ir>],
    ) -> Result<(), EvalError> {
        let record = self.lift(item.get_record())?;
        let descriptor = self.descriptor(item)?;

        let mut order: Vec<Designator> = (0..record.bases.len()).map(Designator::Base).collect();
        for (index, field) in descriptor.fields.iter().enumerate() {
            if field.is_unnamed_bit_field() {
                continue;
            }
            order.push(Designator::Field(record.fields[index].id));
            if descriptor.is_union {
                break;
            }
        }
        let mut slots = group_slots(initializers, &order);

        if descriptor.is_union {
            // Only one member is initialized: the designated one, or one with a
            // default member initializer
            for (index, field) in record.fields.iter().enumerate() {
                let child = ptr.child(PathElem::Field(index));
                if let Some(slot) = slots.swap_remove(&Designator::Field(field.id)) {
                    return self.init_slot(&child, field.ty, slot);
                }
                if let Some(init) = field.default_init {
                    return self.initialize(&child, field.ty, init);
                }
            }
            return Ok(());
        }

        for (index, base) in record.bases.iter().enumerate() {
            let child = ptr.child(PathElem::Base(base.record));
            let base_ty = self.types.record(base.record);
            match slots.swap_remove(&Designator::Base(index)) {
                Some(slot) => self.init_slot(&child, base_ty, slot)?,
                None => self.value_initialize(&child, base_ty)?,
            }
        }

        for (index, field) in record.fields.iter().enumerate() {
            if descriptor.fields[index].is_unnamed_bit_field() {
                continue;
            }
            let child = ptr.child(PathElem::Field(index));
            match slots.swap_remove(&Designator::Field(field.id)) {
                Some(slot) => self.init_slot(&child, field.ty, slot)?,
                None => match field.default_init {
                    Some(init) => self.initialize(&child, field.ty, init)?,
                    None => self.value_initialize(&child, field.ty)?,
                },
            }
        }

        Ok(())
    }

    /// Aggregate initialization of an array of classes in place.
    fn init_array(
        &mut self,
        ptr: &Pointer<'ir>,
        element: TyP<'ir>,
        len: usize,
        initializers: &[Initializer<'ir>],
    ) -> Result<(), EvalError> {
        let order: Vec<_> = (0..len).map(Designator::Index).collect();
        let mut slots = group_slots(initializers, &order);

        let marker = self.unborn.len();
        self.unborn.push((ptr.clone(), 0));

        let mut result = Ok(());
        for index in 0..len {
            // The element being initialized may refer to itself
            self.unborn[marker].1 = index + 1;

            let child = ptr.child(PathElem::Index(index));
            result = match slots.swap_remove(&Designator::Index(index)) {
                Some(slot) => self.init_slot(&child, element, slot),
                None => self.value_initialize(&child, element),
            };
            if result.is_err() {
                break;
            }
        }

        self.unborn.truncate(marker);
        result
    }

    fn init_slot(&mut self, ptr: &Pointer<'ir>, ty: TyP<'ir>, slot: Slot<'ir>) -> Result<(), EvalError> {
        match slot {
            Slot::Direct(expr) => self.initialize(ptr, ty, expr),
            Slot::Nested(list) => match ty.strip_atomic() {
                Ty::Record(item) => self.init_record(ptr, *item, &list),
                Ty::Array(element, len) if self.contains_class(element) => {
                    self.init_array(ptr, element, *len, &list)
                }
                _ => {
                    let value = self.nested_value(ty, list)?;
                    self.init_store(ptr, value)
                }
            },
        }
    }

    /// The value of an aggregate initializer list.
    pub(super) fn aggregate_value(
        &mut self,
        ty: TyP<'ir>,
        initializers: &[Initializer<'ir>],
    ) -> Result<Value<'ir>, EvalError> {
        match ty.strip_atomic() {
            Ty::Record(item) => {
                let item = *item;
                let initializers = initializers.to_vec();
                self.in_scratch(ty, |this, ptr| {
                    this.begin_lifetime(ptr)?;
                    this.init_record(ptr, item, &initializers)
                })
            }
            Ty::Array(element, len) if self.contains_class(element) => {
                let (element, len) = (*element, *len);
                let initializers = initializers.to_vec();
                self.in_scratch(ty, |this, ptr| {
                    this.begin_lifetime(ptr)?;
                    this.init_array(ptr, element, len, &initializers)
                })
            }
            Ty::Array(element, len) => self.array_value(element, *len, initializers),
            Ty::Complex(element) => self.array_value(element, 2, initializers),
            Ty::Vector(element, len) => self.array_value(element, *len, initializers),
            _ => match initializers.first() {
                Some(init) => self.eval_rvalue(init.value),
                None => self.lift(zeroed(&self.layouter, ty)),
            },
        }
    }

    fn array_value(
        &mut self,
        element: TyP<'ir>,
        len: usize,
        initializers: &[Initializer<'ir>],
    ) -> Result<Value<'ir>, EvalError> {
        let order: Vec<_> = (0..len).map(Designator::Index).collect();
        let mut slots = group_slots(initializers, &order);

        let mut elements = Vec::with_capacity(len);
        for index in 0..len {
            let value = match slots.swap_remove(&Designator::Index(index)) {
                Some(Slot::Direct(expr)) => {
                    let value = self.eval_rvalue(expr)?;
                    self.fit_array(value, element)?
                }
                Some(Slot::Nested(list)) => self.nested_value(element, list)?,
                None => self.lift(zeroed(&self.layouter, element))?,
            };
            elements.push(value);
        }
        Ok(Value::Array(elements))
    }

    fn nested_value(&mut self, ty: TyP<'ir>, list: Vec<Initializer<'ir>>) -> Result<Value<'ir>, EvalError> {
        self.aggregate_value(ty, &list)
    }

    // Construction and destruction

    /// Runs a constructor for the object at `this`, in the callee's frame.
    pub(super) fn run_constructor(
        &mut self,
        class: ItemP<'ir>,
        ctor: &'ir Function<'ir>,
        this: &Pointer<'ir>,
    ) -> Result<(), EvalError> {
        if ctor.is_defaulted && ctor.is_copy_constructor() {
            let Some(param) = ctor.params.first() else {
                bug!(self, "copy constructor without a parameter");
            };
            let source = self.local_place(param.id)?;
            let value = self.load(&source, AccessKind::Read, false)?;
            return self.init_store(this, value);
        }

        let body = ctor.body.get();
        let initializers = body.map(|b| b.initializers).unwrap_or(&[]);

        self.construct_subobjects(class, this, initializers)?;
        if let Some(body) = body {
            self.exec_statements(body.statements)?;
        }
        self.constructing.pop();

        Ok(())
    }

    /// Initializes bases and members in declaration order with virtual bases
    /// first, then registers the object as under construction by `class`. The
    /// caller pops that registration once the constructor body has run.
    fn construct_subobjects(
        &mut self,
        class: ItemP<'ir>,
        this: &Pointer<'ir>,
        initializers: &[CtorInitializer<'ir>],
    ) -> Result<(), EvalError> {
        let record = self.lift(class.get_record())?;
        let descriptor = self.descriptor(class)?;

        let base_init = |base: ItemP<'ir>| {
            initializers.iter().find_map(|init| match init {
                CtorInitializer::Base(b, expr) if *b == base => Some(*expr),
                _ => None,
            })
        };

        // Virtual bases belong to the complete object
        let complete = !matches!(this.path.last(), Some(elem) if elem.is_base());
        if complete {
            for base in &descriptor.virtual_bases {
                let child = this.child(PathElem::VirtualBase(base.record));
                self.init_base(&child, base.record, base_init(base.record))?;
            }
        }
        for base in &descriptor.bases {
            let child = this.child(PathElem::Base(base.record));
            self.init_base(&child, base.record, base_init(base.record))?;
        }

        self.constructing.push((this.clone(), class));

        for (index, field) in record.fields.iter().enumerate() {
            if descriptor.fields[index].is_unnamed_bit_field() {
                continue;
            }

            let init = initializers
                .iter()
                .find_map(|init| match init {
                    CtorInitializer::Field(id, expr) if *id == field.id => Some(*expr),
                    _ => None,
                })
                .or(field.default_init);

            let child = this.child(PathElem::Field(index));
            match init {
                Some(expr) => self.initialize(&child, field.ty, expr)?,
                None if descriptor.is_union => {}
                None => self.default_initialize(&child, field.ty)?,
            }
        }

        Ok(())
    }

    fn init_base(
        &mut self,
        ptr: &Pointer<'ir>,
        base: ItemP<'ir>,
        init: Option<ExprP<'ir>>,
    ) -> Result<(), EvalError> {
        match init {
            Some(expr) => self.initialize(ptr, self.types.record(base), expr),
            None => self.default_construct(ptr, base),
        }
    }

    pub(super) fn needs_destruction(&self, ty: TyP<'ir>) -> Result<bool, EvalError> {
        match ty.strip_atomic() {
            Ty::Array(element, _) => self.needs_destruction(element),
            Ty::Record(item) => {
                let record = self.lift(item.get_record())?;
                if record.destructor.is_some() {
                    return Ok(true);
                }
                for base in record.bases {
                    if self.needs_destruction(self.types.record(base.record))? {
                        return Ok(true);
                    }
                }
                if record.is_union() {
                    return Ok(false);
                }
                for field in record.fields {
                    if !field.ty.is_reference() && self.needs_destruction(field.ty)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    pub(super) fn destroy(&mut self, ptr: &Pointer<'ir>, ty: TyP<'ir>) -> Result<(), EvalError> {
        match ty.strip_atomic() {
            Ty::Array(element, len) => {
                for index in (0..*len).rev() {
                    self.destroy(&ptr.child(PathElem::Index(index)), element)?;
                }
                Ok(())
            }
            Ty::Record(item) => self.destroy_record(ptr, *item),
            _ => Ok(()),
        }
    }

    /// Runs the destructor body, then destroys members and bases in reverse
    /// order of construction.
    fn destroy_record(&mut self, ptr: &Pointer<'ir>, item: ItemP<'ir>) -> Result<(), EvalError> {
        if !self.needs_destruction(self.types.record(item))? {
            return Ok(());
        }

        let record = self.lift(item.get_record())?;
        let descriptor = self.descriptor(item)?;

        if let Some(destructor) = record.destructor {
            self.check_live(ptr, AccessKind::Destroy)?;
            self.call(destructor, Some(ptr.clone()), Vec::new())?;
        }

        if !descriptor.is_union {
            for (index, field) in record.fields.iter().enumerate().rev() {
                if !field.ty.is_reference() {
                    self.destroy(&ptr.child(PathElem::Field(index)), field.ty)?;
                }
            }
        }

        for base in descriptor.bases.iter().rev() {
            self.destroy_record(&ptr.child(PathElem::Base(base.record)), base.record)?;
        }

        let complete = !matches!(ptr.path.last(), Some(elem) if elem.is_base());
        if complete {
            for base in descriptor.virtual_bases.iter().rev() {
                self.destroy_record(&ptr.child(PathElem::VirtualBase(base.record)), base.record)?;
            }
        }

        Ok(())
    }

    // Class hierarchy

    /// The most derived object containing the designated one, and its dynamic
    /// type. Objects under construction have the type of the running
    /// constructor.
    pub(super) fn dynamic_object(
        &mut self,
        ptr: &Pointer<'ir>,
        access: AccessKind,
    ) -> Result<(Pointer<'ir>, ItemP<'ir>), EvalError> {
        let complete_len = ptr.complete_object_len();
        for len in (complete_len..=ptr.path.len()).rev() {
            let prefix = ptr.prefix(len);
            if let Some((_, class)) = self.constructing.iter().rev().find(|(p, _)| *p == prefix) {
                return Ok((prefix, *class));
            }
        }

        let complete = ptr.complete_object();
        self.check_live(&complete, access)?;
        match self.class_of_place(&complete)? {
            Some(class) => Ok((complete, class)),
            None => bug!(self, "dynamic type of a non-class object"),
        }
    }

    fn is_virtual_base_of(&self, derived: ItemP<'ir>, base: ItemP<'ir>) -> Result<bool, EvalError> {
        Ok(self
            .lift(derived.get_record())?
            .bases
            .iter()
            .any(|b| b.record == base && b.is_virtual))
    }

    /// Walks a chain of direct bases starting at an object of class `from`.
    pub(super) fn derived_to_base(
        &mut self,
        ptr: &Pointer<'ir>,
        from: ItemP<'ir>,
        chain: &[ItemP<'ir>],
    ) -> Result<Pointer<'ir>, EvalError> {
        let mut current = from;
        let mut result = ptr.clone();

        for base in chain {
            result = if self.is_virtual_base_of(current, *base)? {
                result.complete_object().child(PathElem::VirtualBase(*base))
            } else {
                result.child(PathElem::Base(*base))
            };
            current = *base;
        }

        Ok(result)
    }

    /// Undoes a derived-to-base chain, which only works if the object really is
    /// a base subobject of a `target`.
    pub(super) fn base_to_derived(
        &mut self,
        ptr: &Pointer<'ir>,
        target: ItemP<'ir>,
        chain: &[ItemP<'ir>],
    ) -> Result<Pointer<'ir>, EvalError> {
        let mut result = ptr.clone();
        let mut matched = true;

        for base in chain.iter().rev() {
            match result.path.last() {
                Some(PathElem::Base(b)) if b == base => {
                    result.path.pop();
                }
                _ => {
                    matched = false;
                    break;
                }
            }
        }

        if matched && self.class_of_place(&result)? == Some(target) {
            return Ok(result);
        }

        let (_, dynamic) = self.dynamic_object(ptr, AccessKind::Read)?;
        Err(self.fail(ConstEvalErrorKind::InvalidDowncast(
            dynamic.name().to_string(),
            target.name().to_string(),
        )))
    }

    /// The subobject of class `target` in the object `object` of class `class`,
    /// preferring the one `ptr` was derived from.
    fn find_base(
        &mut self,
        object: &Pointer<'ir>,
        class: ItemP<'ir>,
        ptr: &Pointer<'ir>,
        target: ItemP<'ir>,
    ) -> Result<Option<Pointer<'ir>>, EvalError> {
        if class == target {
            return Ok(Some(object.clone()));
        }

        for len in (object.path.len() + 1..=ptr.path.len()).rev() {
            match ptr.path[len - 1] {
                PathElem::Base(b) | PathElem::VirtualBase(b) if b == target => {
                    return Ok(Some(ptr.prefix(len)))
                }
                _ => {}
            }
        }

        let Some(steps) = self.lift(unique_base_path(class, target))? else {
            return Ok(None);
        };

        let mut result = object.clone();
        for step in steps {
            result = if step.is_virtual {
                result.complete_object().child(PathElem::VirtualBase(step.record))
            } else {
                result.child(PathElem::Base(step.record))
            };
        }
        Ok(Some(result))
    }

    /// Finds the final overrider of a virtual function for the dynamic type of
    /// the object, and the object it is called on.
    pub(super) fn resolve_virtual(
        &mut self,
        ptr: &Pointer<'ir>,
        method: ItemP<'ir>,
    ) -> Result<(ItemP<'ir>, Pointer<'ir>), EvalError> {
        let (object, class) = self.dynamic_object(ptr, AccessKind::MemberCall)?;
        let overrider = self
            .descriptor(class)?
            .final_overrider(method)
            .unwrap_or(method);

        let f = self.lift(overrider.get_function())?;
        let Some(info) = f.method else {
            bug!(self, "virtual function '{}' is not a member", f.name);
        };
        if info.is_pure {
            return Err(self.fail(ConstEvalErrorKind::PureVirtualCall(f.name.to_string())));
        }

        match self.find_base(&object, class, ptr, info.class)? {
            Some(this) => Ok((overrider, this)),
            None => bug!(
                self,
                "'{}' has no unique base '{}'",
                class.name(),
                info.class.name()
            ),
        }
    }

    /// The member a member pointer designates in the given object.
    pub(super) fn apply_member_pointer(
        &mut self,
        object: &Pointer<'ir>,
        mp: &MemberPointer<'ir>,
    ) -> Result<(MemberRef<'ir>, Pointer<'ir>), EvalError> {
        let Some(member) = mp.member else {
            return Err(self.fail(ConstEvalErrorKind::NullMemberPointer));
        };
        if let Some(reason) = &mp.invalid {
            return Err(self.fail(ConstEvalErrorKind::InvalidMemberPointer(reason.clone())));
        }

        let mut ptr = object.clone();
        for step in mp.steps.iter().rev() {
            match *step {
                // The member pointer was converted to a derived class, the object
                // is one of those
                MemberStep::ToDerived { base, derived } => {
                    ptr = self.derived_to_base(&ptr, derived, &[base])?;
                }
                // The member pointer was converted to a base class, so the object
                // must be a base subobject of the class holding the member
                MemberStep::ToBase { derived, base } => {
                    match ptr.path.last() {
                        Some(PathElem::Base(b)) if *b == base => {
                            ptr.path.pop();
                        }
                        _ => {
                            return Err(self.fail(ConstEvalErrorKind::InvalidMemberPointer(
                                format!("object is not a base subobject of '{}'", derived.name()),
                            )))
                        }
                    }
                    if self.class_of_place(&ptr)? != Some(derived) {
                        return Err(self.fail(ConstEvalErrorKind::InvalidMemberPointer(format!(
                            "object is not a base subobject of '{}'",
                            derived.name()
                        ))));
                    }
                }
            }
        }

        Ok((member, ptr))
    }

    // dynamic_cast and typeid

    fn dynamic_cast(
        &mut self,
        ptr: &Pointer<'ir>,
        target: Option<ItemP<'ir>>,
    ) -> Result<Option<Pointer<'ir>>, EvalError> {
        let (object, class) = self.dynamic_object(ptr, AccessKind::DynamicCast)?;
        match target {
            None => Ok(Some(object)),
            Some(target) => self.find_base(&object, class, ptr, target),
        }
    }

    pub(super) fn dynamic_cast_pointer(
        &mut self,
        inner: ExprP<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Value<'ir>, EvalError> {
        let ptr = match self.eval_rvalue(inner)? {
            Value::Pointer(p) => p,
            other => bug!(self, "dynamic_cast of {:?}", other),
        };
        if ptr.is_null() {
            return Ok(Value::Pointer(ptr));
        }

        let target = ty.strip_atomic().pointee().and_then(|t| t.strip_atomic().record());
        let result = self.dynamic_cast(&ptr, target)?;
        Ok(Value::Pointer(result.unwrap_or_else(Pointer::null)))
    }

    pub(super) fn dynamic_cast_reference(
        &mut self,
        inner: ExprP<'ir>,
        ty: TyP<'ir>,
    ) -> Result<Pointer<'ir>, EvalError> {
        let Some(target) = ty.strip_atomic().record() else {
            bug!(self, "dynamic_cast to '{}'", ty);
        };

        let ptr = self.eval_glvalue(inner)?;
        match self.dynamic_cast(&ptr, Some(target))? {
            Some(result) => Ok(result),
            None => {
                let (_, class) = self.dynamic_object(&ptr, AccessKind::DynamicCast)?;
                Err(self.fail(ConstEvalErrorKind::BadDynamicCast(
                    class.name().to_string(),
                    target.name().to_string(),
                )))
            }
        }
    }

    pub(super) fn type_id(&mut self, operand: TypeIdOperand<'ir>) -> Result<Value<'ir>, EvalError> {
        let expr = match operand {
            TypeIdOperand::Type(ty) => return Ok(Value::TypeInfo(ty)),
            TypeIdOperand::Expr(expr) => expr,
        };

        let polymorphic = match expr.ty.strip_atomic().record() {
            Some(item) => self.descriptor(item)?.is_polymorphic,
            None => false,
        };
        if !(expr.is_lvalue() && polymorphic) {
            // Unevaluated operand
            return Ok(Value::TypeInfo(expr.ty));
        }

        let ptr = self.eval_place(expr)?;
        let (_, class) = self.dynamic_object(&ptr, AccessKind::TypeId)?;
        Ok(Value::TypeInfo(self.types.record(class)))
    }

    // Dynamic allocation

    pub(super) fn new_object(
        &mut self,
        ty: TyP<'ir>,
        count: Option<ExprP<'ir>>,
        init: Option<ExprP<'ir>>,
    ) -> Result<Value<'ir>, EvalError> {
        if self.options.standard.is_cpp() && !self.options.standard.cxx20() {
            return Err(self.fail(ConstEvalErrorKind::Unsupported(
                "dynamic memory allocation before C++20".to_string(),
            )));
        }

        let (block_ty, is_array) = match count {
            None => (ty, false),
            Some(count) => {
                let len = match self.eval_rvalue(count)? {
                    Value::Int(v) => match v.to_usize() {
                        Some(len) => len,
                        None => {
                            return Err(self.fail(ConstEvalErrorKind::OutOfRange(
                                v.to_string(),
                                "std::size_t".to_string(),
                            )))
                        }
                    },
                    other => bug!(self, "array bound {:?}", other),
                };
                (self.types.array(ty, len), true)
            }
        };

        let (id, root) = self.allocate(BlockKind::Heap { is_array }, block_ty)?;
        match init {
            Some(init) => self.initialize(&root, block_ty, init)?,
            None => {
                self.begin_lifetime(&root)?;
                self.default_initialize(&root, block_ty)?;
            }
        }
        self.memory
            .set_state(id, BlockState::Live)
            .with_backtrace(&self.diag)?;

        if is_array {
            Ok(Value::Pointer(root.child(PathElem::Index(0))))
        } else {
            Ok(Value::Pointer(root))
        }
    }

    fn has_virtual_destructor(&self, item: ItemP<'ir>) -> Result<bool, EvalError> {
        let record = self.lift(item.get_record())?;
        if let Some(destructor) = record.destructor {
            if self.lift(destructor.get_function())?.is_virtual() {
                return Ok(true);
            }
        }
        for base in record.bases {
            if self.has_virtual_destructor(base.record)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(super) fn delete_object(&mut self, operand: ExprP<'ir>, is_array: bool) -> Result<(), EvalError> {
        let ptr = match self.eval_rvalue(operand)? {
            Value::Pointer(p) => p,
            other => bug!(self, "delete of {:?}", other),
        };
        if ptr.is_null() {
            return Ok(());
        }

        let name = self.pointer_name(&ptr);
        let PointerBase::Block(id) = ptr.base else {
            return Err(self.fail(ConstEvalErrorKind::InvalidDelete(name)));
        };

        let block = self.lift(self.memory.block(id))?;
        let (kind, state, block_ty) = (block.kind, block.state, block.ty);
        let BlockKind::Heap {
            is_array: allocated_array,
        } = kind
        else {
            return Err(self.fail(ConstEvalErrorKind::InvalidDelete(name)));
        };

        if state == BlockState::Freed {
            return Err(self.fail(ConstEvalErrorKind::DoubleDelete));
        }
        if allocated_array != is_array {
            let form = |array: bool, op: &str| format!("{}{}", op, if array { "[]" } else { "" });
            return Err(self.fail(ConstEvalErrorKind::MismatchedDelete(
                form(is_array, "delete"),
                form(allocated_array, "new"),
            )));
        }

        let whole = if is_array {
            ptr.path == [PathElem::Index(0)]
        } else {
            let static_class = operand
                .ty
                .strip_atomic()
                .pointee()
                .and_then(|t| t.strip_atomic().record());
            let through_bases = !ptr.past_end && ptr.path.iter().all(|e| e.is_base());
            ptr.path.is_empty()
                || match static_class {
                    Some(class) if through_bases => self.has_virtual_destructor(class)?,
                    _ => false,
                }
        };
        if !whole || ptr.past_end {
            return Err(self.fail(ConstEvalErrorKind::DeleteOfSubobject(name)));
        }

        let root = Pointer::to(PointerBase::Block(id));
        self.check_live(&root, AccessKind::Delete)?;
        self.destroy(&root, block_ty)?;
        self.memory.free(id).with_backtrace(&self.diag)
    }
}
