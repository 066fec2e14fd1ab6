use crate::{
    exception::RunResult,
    heap::{Heap, HeapData, HeapId},
    types::{PyTrait, Type},
    value::Value,
};

/// An immutable sequence; owns a strong reference to every element.
#[derive(Debug)]
pub(crate) struct Tuple(Vec<Value>);

impl Tuple {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(items)
    }

    #[must_use]
    pub fn items(&self) -> &[Value] {
        &self.0
    }
}

impl PyTrait for Tuple {
    fn py_type(&self) -> Type {
        Type::Tuple
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
    /// Creates a tuple that takes ownership of `items`.
    pub fn new_tuple(&mut self, items: Vec<Value>) -> RunResult<Value> {
        let id = self.allocate(HeapData::Tuple(Tuple::new(items)))?;
        Ok(Value::Ref(id))
    }
}
