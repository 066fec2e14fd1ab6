//! Attribute access.
//!
//! Reading an attribute through an instance looks in the instance dict first
//! and then in the class and its ancestors. Functions found on the class are
//! bound to the instance; methods found on the class go through descriptor
//! binding. Reading through a class produces unbound methods instead.

use crate::{
    args::ArgValues,
    copy::DeepCopyMemo,
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    types::{Function, Method, Type},
    value::Value,
};

/// What a class lookup found, detached from the heap borrow.
enum Found {
    Function(HeapId),
    Method(HeapId),
    Plain(Value),
}

impl Heap {
    /// Reads attribute `name` of `obj`.
    pub fn get_attr(&mut self, obj: &Value, name: &str) -> RunResult<Value> {
        let Value::Ref(id) = obj else {
            let type_name = self.type_name(obj).into_owned();
            return Err(ExcType::attribute_error(type_name, name));
        };
        let id = *id;
        match self.get(id) {
            HeapData::Instance(inst) => {
                if let Some(value) = inst.attrs().get(name) {
                    return Ok(value.clone_with_heap(self));
                }
                let class_id = inst.class_id();
                self.instance_class_attr(obj, class_id, name)
            }
            HeapData::ClassObject(_) => self.class_attr(obj, id, name),
            HeapData::Method(_) => Method::py_getattr(self, id, name),
            HeapData::Function(_) => Function::py_getattr(self, id, name),
            _ => {
                let type_name = self.type_name(obj).into_owned();
                Err(ExcType::attribute_error(type_name, name))
            }
        }
    }

    fn find_in_class(&self, class_id: HeapId, name: &str) -> Option<Found> {
        let value = self.class_lookup(class_id, name)?;
        Some(match value {
            Value::Ref(id) => match self.get(*id) {
                HeapData::Function(_) => Found::Function(*id),
                HeapData::Method(_) => Found::Method(*id),
                _ => Found::Plain(value.clone_with_heap(self)),
            },
            other => Found::Plain(other.clone_immediate()),
        })
    }

    fn instance_class_attr(&mut self, instance: &Value, class_id: HeapId, name: &str) -> RunResult<Value> {
        if name == "__class__" {
            self.inc_ref(class_id);
            return Ok(Value::Ref(class_id));
        }
        let class = Value::Ref(class_id);
        match self.find_in_class(class_id, name) {
            Some(Found::Function(func)) => Method::construct(self, &Value::Ref(func), instance, &class),
            Some(Found::Method(method)) => Method::bind_on_access(self, method, instance, &class),
            Some(Found::Plain(value)) => Ok(value),
            None => {
                let type_name = self.class_name(class_id).to_owned();
                Err(ExcType::attribute_error(type_name, name))
            }
        }
    }

    fn class_attr(&mut self, class: &Value, class_id: HeapId, name: &str) -> RunResult<Value> {
        if name == "__name__" {
            let class_name = self.class_name(class_id).to_owned();
            return self.new_str(class_name);
        }
        match self.find_in_class(class_id, name) {
            Some(Found::Function(func)) => Method::construct(self, &Value::Ref(func), &Value::None, class),
            Some(Found::Method(method)) => Method::bind_on_access(self, method, &Value::None, class),
            Some(Found::Plain(value)) => Ok(value),
            None => {
                let class_name = self.class_name(class_id).to_owned();
                Err(ExcType::attribute_error_type(&class_name, name))
            }
        }
    }

    /// Sets attribute `name` of `obj` to `value` (consumed).
    ///
    /// Instances, classes and functions accept new attributes. Methods are
    /// read-only.
    pub fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> RunResult<()> {
        let Value::Ref(id) = obj else {
            let type_name = self.type_name(obj).into_owned();
            value.drop_with_heap(self);
            return Err(ExcType::attribute_error(type_name, name));
        };
        let id = *id;
        match self.get_mut(id) {
            HeapData::Instance(inst) => {
                let old = inst.attrs_mut().insert(name.to_owned(), value);
                old.drop_with_heap(self);
                Ok(())
            }
            HeapData::ClassObject(_) => {
                self.class_set_attr(id, name, value);
                Ok(())
            }
            HeapData::Function(_) => Function::py_setattr(self, id, name, value),
            HeapData::Method(_) => {
                value.drop_with_heap(self);
                Err(ExcType::attribute_error(Type::Method, name))
            }
            _ => {
                let type_name = self.type_name(obj).into_owned();
                value.drop_with_heap(self);
                Err(ExcType::attribute_error(type_name, name))
            }
        }
    }

    /// Calls method `name` of `obj` with `args` (consumed).
    ///
    /// On methods, `__reduce__`, `__reduce_ex__` and `__deepcopy__` are handled
    /// by the method type itself. `__deepcopy__` accepts only `None` as its memo
    /// and starts a fresh one; use [`Heap::deep_copy`] to share a memo.
    pub fn call_attr(&mut self, obj: &Value, name: &str, args: ArgValues) -> RunResult<Value> {
        if let Some(id) = self.method_id(obj) {
            match name {
                "__reduce__" => {
                    if args.count() > 0 {
                        let count = args.count();
                        args.drop_with_heap(self);
                        return Err(ExcType::type_error(format!(
                            "__reduce__() takes no arguments ({count} given)"
                        )));
                    }
                    return Method::reduce(self, obj);
                }
                "__reduce_ex__" => return Method::reduce_ex(self, obj, args),
                "__deepcopy__" => {
                    let memo_arg = args.get_one_arg("__deepcopy__", self)?;
                    if !memo_arg.is_none() {
                        let type_name = self.type_name(&memo_arg).into_owned();
                        memo_arg.drop_with_heap(self);
                        return Err(ExcType::type_error(format!(
                            "__deepcopy__() memo must be None, not '{type_name}'"
                        )));
                    }
                    let mut memo = DeepCopyMemo::new();
                    let result = Method::deepcopy(self, id, &mut memo);
                    memo.drop_with_heap(self);
                    return result;
                }
                _ => {}
            }
        }
        let attr = match self.get_attr(obj, name) {
            Ok(attr) => attr,
            Err(err) => {
                args.drop_with_heap(self);
                return Err(err);
            }
        };
        let result = self.call(&attr, args);
        attr.drop_with_heap(self);
        result
    }
}
