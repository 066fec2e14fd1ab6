//! Generic call entry point.

use crate::{
    args::ArgValues,
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    types::{Function, Method},
    value::Value,
};

impl Heap {
    /// Calls `callable` with `args` (consumed).
    ///
    /// - functions run their native body
    /// - methods dispatch bound or unbound (see [`Method`])
    /// - classes create an instance and run `__init__` if the class defines one
    /// - weak references return their referent, or `None` once it is gone
    pub fn call(&mut self, callable: &Value, args: ArgValues) -> RunResult<Value> {
        let Value::Ref(id) = callable else {
            let type_name = self.type_name(callable).into_owned();
            args.drop_with_heap(self);
            return Err(ExcType::type_error_not_callable(type_name));
        };
        let id = *id;
        match self.get(id) {
            HeapData::Function(_) => Function::invoke(self, id, args),
            HeapData::Method(_) => Method::call(self, id, args),
            HeapData::ClassObject(_) => self.instantiate(callable, id, args),
            HeapData::WeakRef(_) => {
                if args.count() > 0 {
                    let count = args.count();
                    args.drop_with_heap(self);
                    return Err(ExcType::type_error(format!(
                        "weakref() takes no arguments ({count} given)"
                    )));
                }
                Ok(self.weakref_get(id))
            }
            _ => {
                let type_name = self.type_name(callable).into_owned();
                args.drop_with_heap(self);
                Err(ExcType::type_error_not_callable(type_name))
            }
        }
    }

    /// Whether `value` can be passed to [`Heap::call`].
    #[must_use]
    pub fn is_callable(&self, value: &Value) -> bool {
        match value {
            Value::Ref(id) => matches!(
                self.get(*id),
                HeapData::Function(_) | HeapData::Method(_) | HeapData::ClassObject(_) | HeapData::WeakRef(_)
            ),
            _ => false,
        }
    }

    fn instantiate(&mut self, class: &Value, class_id: HeapId, args: ArgValues) -> RunResult<Value> {
        let Some(init) = self.init_function(class_id) else {
            if args.count() > 0 {
                let name = self.class_name(class_id).to_owned();
                args.drop_with_heap(self);
                return Err(ExcType::type_error(format!("{name}() takes no arguments")));
            }
            return self.new_instance(class);
        };

        let instance = match self.new_instance(class) {
            Ok(instance) => instance,
            Err(err) => {
                self.dec_ref(init);
                args.drop_with_heap(self);
                return Err(err);
            }
        };
        let mut args = args;
        args.prepend(instance.clone_with_heap(self));
        let result = Function::invoke(self, init, args);
        self.dec_ref(init);
        match result {
            Ok(Value::None) => Ok(instance),
            Ok(other) => {
                let type_name = self.type_name(&other).into_owned();
                other.drop_with_heap(self);
                instance.drop_with_heap(self);
                Err(ExcType::type_error(format!(
                    "__init__() should return None, not '{type_name}'"
                )))
            }
            Err(err) => {
                instance.drop_with_heap(self);
                Err(err)
            }
        }
    }

    /// Returns a new reference to the `__init__` function of `class_id`, if it defines one.
    fn init_function(&self, class_id: HeapId) -> Option<HeapId> {
        match self.class_lookup(class_id, "__init__")? {
            Value::Ref(id) if matches!(self.get(*id), HeapData::Function(_)) => {
                self.inc_ref(*id);
                Some(*id)
            }
            _ => None,
        }
    }
}
