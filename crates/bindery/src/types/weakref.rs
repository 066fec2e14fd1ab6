//! Weak references.
//!
//! A `WeakRef` records its target's `HeapId` without owning it. The target
//! keeps the ids of its weak references and invalidates them when it is freed,
//! after which calling the weakref returns `None`.

use crate::{
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    types::{PyTrait, Type},
    value::Value,
};

#[derive(Debug)]
pub(crate) struct WeakRef {
    /// The referenced heap id, or `None` once the target has been freed.
    target: Option<HeapId>,
    /// Called with the weakref when the target dies. Owned.
    callback: Option<Value>,
}

impl WeakRef {
    #[must_use]
    pub fn target(&self) -> Option<HeapId> {
        self.target
    }

    /// Invalidates this weakref and hands back its callback, if any.
    pub fn clear(&mut self) -> Option<Value> {
        self.target = None;
        self.callback.take()
    }
}

impl PyTrait for WeakRef {
    fn py_type(&self) -> Type {
        Type::WeakRef
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        if let Some(id) = self.callback.take().and_then(|cb| cb.ref_id()) {
            stack.push(id);
        }
    }

    fn py_traverse(&self, visit: &mut impl FnMut(HeapId)) {
        if let Some(id) = self.callback.as_ref().and_then(Value::ref_id) {
            visit(id);
        }
    }
}

impl Heap {
    /// Creates a weak reference to `target`, optionally with a callback.
    ///
    /// The callback (consumed) is called with the weakref when the target is
    /// freed. Only instances and methods can be weakly referenced.
    pub fn new_weakref(&mut self, target: &Value, callback: Option<Value>) -> RunResult<Value> {
        let callback = callback.filter(|cb| !cb.is_none());
        let target_id = match target {
            Value::Ref(id) if matches!(self.get(*id), HeapData::Instance(_) | HeapData::Method(_)) => *id,
            _ => {
                let type_name = self.type_name(target).into_owned();
                callback.drop_with_heap(self);
                return Err(ExcType::type_error(format!(
                    "cannot create weak reference to '{type_name}' object"
                )));
            }
        };
        let weakref = WeakRef {
            target: Some(target_id),
            callback,
        };
        let id = self.allocate(HeapData::WeakRef(weakref))?;
        self.register_weakref(target_id, id);
        Ok(Value::Ref(id))
    }

    /// Returns the referent of a weakref (a new reference) or `None` if it is dead.
    pub(crate) fn weakref_get(&self, weakref_id: HeapId) -> Value {
        match self.get(weakref_id) {
            HeapData::WeakRef(WeakRef { target: Some(target), .. }) if self.is_live(*target) => {
                self.inc_ref(*target);
                Value::Ref(*target)
            }
            _ => Value::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args::ArgValues, types::FunctionDef};

    fn registered(heap: &mut Heap, target: &Value) -> Vec<HeapId> {
        let id = target.ref_id().expect("heap value");
        let weakrefs = match heap.get_mut(id) {
            HeapData::Instance(inst) => inst.take_weakrefs(),
            HeapData::Method(method) => method.take_weakrefs(),
            _ => Vec::new(),
        };
        for &weakref_id in &weakrefs {
            heap.register_weakref(id, weakref_id);
        }
        weakrefs
    }

    fn noop(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
        args.drop_with_heap(heap);
        Ok(Value::None)
    }

    #[test]
    fn dead_weakrefs_leave_the_target() {
        let mut heap = Heap::default();
        let class = heap.new_class("C", &[]).unwrap();
        let func = heap.new_function(FunctionDef::new("f", noop)).unwrap();
        heap.set_attr(&class, "f", func).unwrap();
        let obj = heap.call(&class, ArgValues::empty()).unwrap();
        let method = heap.get_attr(&obj, "f").unwrap();

        for target in [&obj, &method] {
            for _ in 0..1000 {
                let weak = heap.new_weakref(target, None).unwrap();
                weak.drop_with_heap(&mut heap);
            }
            assert!(registered(&mut heap, target).is_empty());
        }

        let kept = heap.new_weakref(&obj, None).unwrap();
        let dropped = heap.new_weakref(&obj, None).unwrap();
        let dropped_id = dropped.ref_id().unwrap();
        dropped.drop_with_heap(&mut heap);
        assert_eq!(registered(&mut heap, &obj), vec![kept.ref_id().unwrap()]);
        assert!(!registered(&mut heap, &obj).contains(&dropped_id));

        kept.drop_with_heap(&mut heap);
        method.drop_with_heap(&mut heap);
        obj.drop_with_heap(&mut heap);
        class.drop_with_heap(&mut heap);
        assert_eq!(heap.stats().live_objects, 0);
    }
}
