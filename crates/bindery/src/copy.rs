//! Deep copy with a memo table.
//!
//! Strings, functions, classes and weak references are shared rather than
//! copied. Lists, tuples, instances and methods are copied recursively; the
//! memo maps each original to its copy so shared structure and cycles are
//! reproduced rather than duplicated.

use ahash::AHashMap;

use crate::{
    args::ArgValues,
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    resource::MAX_DATA_RECURSION_DEPTH,
    types::Method,
    value::Value,
};

/// Maps already-copied heap entries to their copies.
///
/// Holds a strong reference to every copy; release it with `drop_with_heap`.
#[derive(Debug, Default)]
pub struct DeepCopyMemo {
    copies: AHashMap<HeapId, Value>,
    depth: usize,
}

impl DeepCopyMemo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Returns a new reference to the recorded copy of `original`.
    fn get(&self, original: HeapId, heap: &Heap) -> Option<Value> {
        self.copies.get(&original).map(|copy| copy.clone_with_heap(heap))
    }

    /// Records `copy` (a new reference is taken) as the copy of `original`.
    fn insert(&mut self, original: HeapId, copy: &Value, heap: &mut Heap) {
        let copy = copy.clone_with_heap(heap);
        if let Some(old) = self.copies.insert(original, copy) {
            old.drop_with_heap(heap);
        }
    }
}

impl DropWithHeap for DeepCopyMemo {
    fn drop_with_heap(self, heap: &mut Heap) {
        for (_, copy) in self.copies {
            copy.drop_with_heap(heap);
        }
    }
}

/// Copy strategy for a heap entry, detached from the heap borrow.
enum CopyKind {
    Shared,
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Instance(HeapId),
    Method,
}

impl Heap {
    /// Deep-copies `value`, recording copies in `memo`.
    pub fn deep_copy(&mut self, value: &Value, memo: &mut DeepCopyMemo) -> RunResult<Value> {
        let Value::Ref(id) = value else {
            return Ok(value.clone_immediate());
        };
        let id = *id;
        if let Some(copy) = memo.get(id, self) {
            return Ok(copy);
        }
        if memo.depth > MAX_DATA_RECURSION_DEPTH {
            return Err(ExcType::recursion_error());
        }

        let kind = match self.get(id) {
            HeapData::Str(_) | HeapData::Function(_) | HeapData::ClassObject(_) | HeapData::WeakRef(_) => {
                CopyKind::Shared
            }
            HeapData::List(list) => CopyKind::List(self.clone_items(list.items())),
            HeapData::Tuple(tuple) => CopyKind::Tuple(self.clone_items(tuple.items())),
            HeapData::Instance(inst) => CopyKind::Instance(inst.class_id()),
            HeapData::Method(_) => CopyKind::Method,
        };

        memo.depth += 1;
        let result = match kind {
            CopyKind::Shared => Ok(value.clone_with_heap(self)),
            CopyKind::List(items) => self.deep_copy_list(id, items, memo),
            CopyKind::Tuple(items) => self.deep_copy_tuple(id, items, memo),
            CopyKind::Instance(class_id) => self.deep_copy_instance(value, id, class_id, memo),
            CopyKind::Method => {
                let copy = Method::deepcopy(self, id, memo);
                if let Ok(copy) = &copy {
                    memo.insert(id, copy, self);
                }
                copy
            }
        };
        memo.depth -= 1;
        result
    }

    /// Copies a list. The empty copy is recorded before its items so a list
    /// that contains itself copies to a list that contains the copy.
    fn deep_copy_list(&mut self, id: HeapId, items: Vec<Value>, memo: &mut DeepCopyMemo) -> RunResult<Value> {
        let copy = match self.new_list(Vec::with_capacity(items.len())) {
            Ok(copy) => copy,
            Err(err) => {
                items.drop_with_heap(self);
                return Err(err);
            }
        };
        memo.insert(id, &copy, self);
        let mut items = items.into_iter();
        while let Some(item) = items.next() {
            let copied = self.deep_copy(&item, memo);
            item.drop_with_heap(self);
            let pushed = copied.and_then(|copied| self.list_append(&copy, copied));
            if let Err(err) = pushed {
                items.drop_with_heap(self);
                copy.drop_with_heap(self);
                return Err(err);
            }
        }
        Ok(copy)
    }

    fn deep_copy_tuple(&mut self, id: HeapId, items: Vec<Value>, memo: &mut DeepCopyMemo) -> RunResult<Value> {
        let mut copies = Vec::with_capacity(items.len());
        let mut items = items.into_iter();
        while let Some(item) = items.next() {
            let copied = self.deep_copy(&item, memo);
            item.drop_with_heap(self);
            match copied {
                Ok(copied) => copies.push(copied),
                Err(err) => {
                    items.drop_with_heap(self);
                    copies.drop_with_heap(self);
                    return Err(err);
                }
            }
        }
        // a tuple reachable from its own items was already copied through the memo
        if let Some(existing) = memo.get(id, self) {
            copies.drop_with_heap(self);
            return Ok(existing);
        }
        let copy = self.new_tuple(copies)?;
        memo.insert(id, &copy, self);
        Ok(copy)
    }

    /// Copies an instance: through a class-defined `__deepcopy__` if present,
    /// else by creating a new instance and deep-copying each attribute.
    fn deep_copy_instance(
        &mut self,
        value: &Value,
        id: HeapId,
        class_id: HeapId,
        memo: &mut DeepCopyMemo,
    ) -> RunResult<Value> {
        if let Some(func) = self.lookup_special(value, "__deepcopy__") {
            let result = self.call(&func, ArgValues::two(value.clone_with_heap(self), Value::None));
            func.drop_with_heap(self);
            let copy = result?;
            memo.insert(id, &copy, self);
            return Ok(copy);
        }

        let copy = self.new_instance(&Value::Ref(class_id))?;
        memo.insert(id, &copy, self);
        let attrs: Vec<(String, Value)> = match self.get(id) {
            HeapData::Instance(inst) => inst
                .attrs()
                .iter()
                .map(|(name, v)| (name.clone(), v.clone_with_heap(self)))
                .collect(),
            _ => Vec::new(),
        };
        let mut attrs = attrs.into_iter();
        while let Some((name, attr)) = attrs.next() {
            let copied = self.deep_copy(&attr, memo);
            attr.drop_with_heap(self);
            let stored = copied.and_then(|copied| self.set_attr(&copy, &name, copied));
            if let Err(err) = stored {
                attrs.drop_with_heap(self);
                copy.drop_with_heap(self);
                return Err(err);
            }
        }
        Ok(copy)
    }
}
