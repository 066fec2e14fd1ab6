//! User classes and their instances.
//!
//! A class has a name, its direct bases and a flattened method resolution
//! order. Attribute lookup walks the class namespace first and then every
//! ancestor in that order.

use std::borrow::Cow;

use indexmap::IndexMap;

use crate::{
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    types::{PyTrait, Type},
    value::Value,
};

/// A class object.
#[derive(Debug)]
pub(crate) struct ClassObject {
    name: String,
    /// Direct bases, each a strong reference.
    bases: Vec<HeapId>,
    /// Ancestors in lookup order, excluding the class itself.
    ///
    /// Not owned: every entry is kept alive through `bases`.
    mro: Vec<HeapId>,
    namespace: IndexMap<String, Value>,
}

impl ClassObject {
    pub fn namespace_mut(&mut self) -> &mut IndexMap<String, Value> {
        &mut self.namespace
    }
}

impl PyTrait for ClassObject {
    fn py_type(&self) -> Type {
        Type::Type
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.name.len()
            + (self.bases.len() + self.mro.len()) * std::mem::size_of::<HeapId>()
            + self.namespace.len() * std::mem::size_of::<(String, Value)>()
    }

    fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.append(&mut self.bases);
        stack.extend(self.namespace.drain(..).filter_map(|(_, v)| v.ref_id()));
    }

    fn py_traverse(&self, visit: &mut impl FnMut(HeapId)) {
        self.bases.iter().copied().for_each(&mut *visit);
        self.namespace.values().filter_map(Value::ref_id).for_each(visit);
    }
}

/// An instance of a user class.
#[derive(Debug)]
pub(crate) struct Instance {
    /// Strong reference to the class.
    class_id: HeapId,
    attrs: IndexMap<String, Value>,
    /// Weak references registered against this instance.
    weakrefs: Vec<HeapId>,
}

impl Instance {
    #[must_use]
    pub fn class_id(&self) -> HeapId {
        self.class_id
    }

    #[must_use]
    pub fn attrs(&self) -> &IndexMap<String, Value> {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut IndexMap<String, Value> {
        &mut self.attrs
    }

    pub fn register_weakref(&mut self, weakref_id: HeapId) {
        self.weakrefs.push(weakref_id);
    }

    pub fn unregister_weakref(&mut self, weakref_id: HeapId) {
        if let Some(pos) = self.weakrefs.iter().position(|&id| id == weakref_id) {
            self.weakrefs.remove(pos);
        }
    }

    pub fn take_weakrefs(&mut self) -> Vec<HeapId> {
        std::mem::take(&mut self.weakrefs)
    }
}

impl PyTrait for Instance {
    fn py_type(&self) -> Type {
        Type::Instance
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.attrs.len() * std::mem::size_of::<(String, Value)>()
            + self.weakrefs.len() * std::mem::size_of::<HeapId>()
    }

    fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.push(self.class_id);
        stack.extend(self.attrs.drain(..).filter_map(|(_, v)| v.ref_id()));
    }

    fn py_traverse(&self, visit: &mut impl FnMut(HeapId)) {
        visit(self.class_id);
        self.attrs.values().filter_map(Value::ref_id).for_each(visit);
    }
}

impl Heap {
    /// Creates a class deriving from `bases` (which must all be classes).
    pub fn new_class(&mut self, name: impl Into<String>, bases: &[&Value]) -> RunResult<Value> {
        let mut base_ids = Vec::with_capacity(bases.len());
        for base in bases {
            match self.class_id_of(base) {
                Some(id) => base_ids.push(id),
                None => {
                    let type_name = self.type_name(base).into_owned();
                    return Err(ExcType::type_error(format!(
                        "bases must be types, not '{type_name}'"
                    )));
                }
            }
        }

        let mut mro = Vec::new();
        for &base in &base_ids {
            let HeapData::ClassObject(class) = self.get(base) else {
                continue;
            };
            for ancestor in std::iter::once(base).chain(class.mro.iter().copied()) {
                if !mro.contains(&ancestor) {
                    mro.push(ancestor);
                }
            }
        }
        for &base in &base_ids {
            self.inc_ref(base);
        }

        let class = ClassObject {
            name: name.into(),
            bases: base_ids,
            mro,
            namespace: IndexMap::new(),
        };
        let id = self.allocate(HeapData::ClassObject(class))?;
        Ok(Value::Ref(id))
    }

    /// Creates an instance of `class` without running `__init__`.
    pub fn new_instance(&mut self, class: &Value) -> RunResult<Value> {
        let Some(class_id) = self.class_id_of(class) else {
            let type_name = self.type_name(class).into_owned();
            return Err(ExcType::type_error(format!(
                "object.__new__(X): X is not a type object ({type_name})"
            )));
        };
        self.inc_ref(class_id);
        let instance = Instance {
            class_id,
            attrs: IndexMap::new(),
            weakrefs: Vec::new(),
        };
        let id = self.allocate(HeapData::Instance(instance))?;
        Ok(Value::Ref(id))
    }

    /// `isinstance(value, class)`.
    ///
    /// Fails with `TypeError` if `class` is not a class. Only instances of user
    /// classes can satisfy the check.
    pub fn is_instance(&self, value: &Value, class: &Value) -> RunResult<bool> {
        let Some(class_id) = self.class_id_of(class) else {
            return Err(ExcType::type_error("isinstance() arg 2 must be a type"));
        };
        Ok(self
            .instance_class_id(value)
            .is_some_and(|value_class| self.class_derives_from(value_class, class_id)))
    }

    /// `issubclass(sub, sup)`.
    ///
    /// Fails with `TypeError` if either argument is not a class.
    pub fn is_subtype(&self, sub: &Value, sup: &Value) -> RunResult<bool> {
        let Some(sub_id) = self.class_id_of(sub) else {
            return Err(ExcType::type_error("issubclass() arg 1 must be a class"));
        };
        let Some(sup_id) = self.class_id_of(sup) else {
            return Err(ExcType::type_error("issubclass() arg 2 must be a class"));
        };
        Ok(self.class_derives_from(sub_id, sup_id))
    }

    fn class_derives_from(&self, sub: HeapId, sup: HeapId) -> bool {
        if sub == sup {
            return true;
        }
        match self.get(sub) {
            HeapData::ClassObject(class) => class.mro.contains(&sup),
            _ => false,
        }
    }

    /// Returns the heap id of `value` if it is a class.
    #[must_use]
    pub(crate) fn class_id_of(&self, value: &Value) -> Option<HeapId> {
        match value {
            Value::Ref(id) if matches!(self.get(*id), HeapData::ClassObject(_)) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub(crate) fn instance_class_id(&self, value: &Value) -> Option<HeapId> {
        match value {
            Value::Ref(id) => match self.get(*id) {
                HeapData::Instance(inst) => Some(inst.class_id),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns the class name of `class_id`.
    #[must_use]
    pub(crate) fn class_name(&self, class_id: HeapId) -> &str {
        match self.get(class_id) {
            HeapData::ClassObject(class) => &class.name,
            _ => "?",
        }
    }

    /// Finds `name` in the namespace of `class_id` or one of its ancestors.
    #[must_use]
    pub(crate) fn class_lookup(&self, class_id: HeapId, name: &str) -> Option<&Value> {
        let HeapData::ClassObject(class) = self.get(class_id) else {
            return None;
        };
        if let Some(value) = class.namespace.get(name) {
            return Some(value);
        }
        class.mro.iter().find_map(|&ancestor| match self.get(ancestor) {
            HeapData::ClassObject(base) => base.namespace.get(name),
            _ => None,
        })
    }

    /// Looks up a special method (`__eq__`, `__repr__`, ...) on the class of an instance.
    ///
    /// Only plain functions count, matching how the interpreter dispatches
    /// dunder methods on the type rather than the instance.
    #[must_use]
    pub(crate) fn lookup_special(&self, value: &Value, name: &str) -> Option<Value> {
        let class_id = self.instance_class_id(value)?;
        match self.class_lookup(class_id, name)? {
            found @ Value::Ref(id) if matches!(self.get(*id), HeapData::Function(_)) => {
                Some(found.clone_with_heap(self))
            }
            _ => None,
        }
    }

    /// Stores `value` in the namespace of class `class_id`.
    pub(crate) fn class_set_attr(&mut self, class_id: HeapId, name: &str, value: Value) {
        let old = match self.get_mut(class_id) {
            HeapData::ClassObject(class) => class.namespace_mut().insert(name.to_owned(), value),
            _ => Some(value),
        };
        old.drop_with_heap(self);
    }

    /// Name of the type of `value`: the class name for instances.
    #[must_use]
    pub fn type_name(&self, value: &Value) -> Cow<'_, str> {
        match self.instance_class_id(value) {
            Some(class_id) => Cow::Borrowed(self.class_name(class_id)),
            None => Cow::Owned(value.py_type(self).to_string()),
        }
    }
}
