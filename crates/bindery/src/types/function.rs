use indexmap::IndexMap;

use crate::{
    args::ArgValues,
    exception::{ExcType, RunError, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    types::{PyTrait, Type},
    value::Value,
};

/// Native body of a function: receives the heap and the (owned) call arguments.
pub type NativeFn = fn(&mut Heap, ArgValues) -> RunResult<Value>;

/// Description of a function to create with [`Heap::new_function`].
#[derive(Debug, Clone)]
pub struct FunctionDef {
    name: String,
    qualname: Option<String>,
    doc: Option<String>,
    body: NativeFn,
}

impl FunctionDef {
    #[must_use]
    pub fn new(name: impl Into<String>, body: NativeFn) -> Self {
        Self {
            name: name.into(),
            qualname: None,
            doc: None,
            body,
        }
    }

    /// Sets the dotted qualified name; defaults to the plain name.
    #[must_use]
    pub fn qualname(mut self, qualname: impl Into<String>) -> Self {
        self.qualname = Some(qualname.into());
        self
    }

    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// A compiled function.
///
/// `counter` is assigned once from the heap's monotonic counter and never
/// changes; method equality and hashing key on it.
#[derive(Debug)]
pub(crate) struct Function {
    counter: u64,
    name: String,
    qualname: String,
    doc: Option<String>,
    body: NativeFn,
    /// Attributes assigned after creation (`f.tag = ...`).
    attrs: IndexMap<String, Value>,
}

impl Function {
    fn from_def(def: FunctionDef, counter: u64) -> Self {
        let qualname = def.qualname.unwrap_or_else(|| def.name.clone());
        Self {
            counter,
            name: def.name,
            qualname,
            doc: def.doc,
            body: def.body,
            attrs: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    /// Runs the body of function `id` with `args`, counting one call frame.
    pub fn invoke(heap: &mut Heap, id: HeapId, args: ArgValues) -> RunResult<Value> {
        let HeapData::Function(func) = heap.get(id) else {
            args.drop_with_heap(heap);
            return Err(RunError::internal("Function::invoke on a non-function"));
        };
        let body = func.body;
        if let Err(err) = heap.enter_call() {
            args.drop_with_heap(heap);
            return Err(err.into());
        }
        let result = body(heap, args);
        heap.leave_call();
        result
    }

    /// Reads an attribute of function `id`.
    pub fn py_getattr(heap: &mut Heap, id: HeapId, name: &str) -> RunResult<Value> {
        let HeapData::Function(func) = heap.get(id) else {
            return Err(RunError::internal("Function::py_getattr on a non-function"));
        };
        match name {
            "__name__" => {
                let name = func.name.clone();
                heap.new_str(name)
            }
            "__qualname__" => {
                let qualname = func.qualname.clone();
                heap.new_str(qualname)
            }
            "__doc__" => match func.doc.clone() {
                Some(doc) => heap.new_str(doc),
                None => Ok(Value::None),
            },
            _ => match func.attrs.get(name) {
                Some(value) => Ok(value.clone_with_heap(heap)),
                None => Err(ExcType::attribute_error(Type::Function, name)),
            },
        }
    }

    /// Assigns a custom attribute; the dunder names are read-only.
    pub fn py_setattr(heap: &mut Heap, id: HeapId, name: &str, value: Value) -> RunResult<()> {
        if matches!(name, "__name__" | "__qualname__" | "__doc__") {
            value.drop_with_heap(heap);
            return Err(ExcType::readonly_attribute(Type::Function, name));
        }
        let HeapData::Function(func) = heap.get_mut(id) else {
            value.drop_with_heap(heap);
            return Err(RunError::internal("Function::py_setattr on a non-function"));
        };
        let old = func.attrs.insert(name.to_owned(), value);
        old.drop_with_heap(heap);
        Ok(())
    }
}

impl PyTrait for Function {
    fn py_type(&self) -> Type {
        Type::Function
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.name.len()
            + self.qualname.len()
            + self.doc.as_ref().map_or(0, String::len)
            + self.attrs.len() * std::mem::size_of::<(String, Value)>()
    }

    fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.extend(self.attrs.drain(..).filter_map(|(_, v)| v.ref_id()));
    }

    fn py_traverse(&self, visit: &mut impl FnMut(HeapId)) {
        self.attrs.values().filter_map(Value::ref_id).for_each(visit);
    }
}

impl Heap {
    /// Creates a function, assigning it the next identity counter.
    pub fn new_function(&mut self, def: FunctionDef) -> RunResult<Value> {
        let counter = self.next_function_counter();
        let id = self.allocate(HeapData::Function(Function::from_def(def, counter)))?;
        Ok(Value::Ref(id))
    }
}
