use crate::{
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    types::{PyTrait, Type},
    value::Value,
};

/// A mutable sequence; owns a strong reference to every element.
#[derive(Debug, Default)]
pub(crate) struct List(Vec<Value>);

impl List {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(items)
    }

    #[must_use]
    pub fn items(&self) -> &[Value] {
        &self.0
    }

    /// Appends an owned value.
    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }
}

impl PyTrait for List {
    fn py_type(&self) -> Type {
        Type::List
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.0.len() * std::mem::size_of::<Value>()
    }

    fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.extend(self.0.drain(..).filter_map(|v| v.ref_id()));
    }

    fn py_traverse(&self, visit: &mut impl FnMut(HeapId)) {
        self.0.iter().filter_map(Value::ref_id).for_each(visit);
    }
}

impl Heap {
    /// Creates a list that takes ownership of `items`.
    pub fn new_list(&mut self, items: Vec<Value>) -> RunResult<Value> {
        let id = self.allocate(HeapData::List(List::new(items)))?;
        Ok(Value::Ref(id))
    }

    /// Appends `item` (consumed) to the list `list`.
    pub fn list_append(&mut self, list: &Value, item: Value) -> RunResult<()> {
        if let Value::Ref(id) = list
            && let HeapData::List(items) = self.get_mut(*id)
        {
            items.push(item);
            return Ok(());
        }
        let type_name = self.type_name(list).into_owned();
        item.drop_with_heap(self);
        Err(ExcType::attribute_error(type_name, "append"))
    }

    /// Returns new references to the elements of a list or tuple.
    pub fn sequence_items(&self, value: &Value) -> Option<Vec<Value>> {
        let Value::Ref(id) = value else {
            return None;
        };
        match self.get(*id) {
            HeapData::List(list) => Some(self.clone_items(list.items())),
            HeapData::Tuple(tuple) => Some(self.clone_items(tuple.items())),
            _ => None,
        }
    }
}
