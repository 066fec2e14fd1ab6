use std::{
    cmp::Ordering,
    collections::hash_map::DefaultHasher,
    fmt::Write,
    hash::{Hash, Hasher},
};

use ahash::AHashSet;

use crate::{
    args::ArgValues,
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    resource::MAX_DATA_RECURSION_DEPTH,
    types::{Method, PyTrait, Str, Type, str::string_repr_fmt},
};

/// Primary value type representing runtime objects.
///
/// Small immediates are stored inline; everything else lives in the heap and
/// is referenced through `Ref`.
///
/// NOTE: `Clone` is intentionally not derived. Use `clone_with_heap()` for heap-aware
/// cloning which properly increments reference counts, and `drop_with_heap()` to
/// release a value.
#[derive(Debug)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Ref(HeapId),
}

impl Value {
    /// Clones a value, incrementing the heap reference count of `Ref` values.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &Heap) -> Self {
        match self {
            Self::Ref(id) => {
                heap.inc_ref(*id);
                Self::Ref(*id)
            }
            // Immediate values can be copied without heap interaction
            other => other.clone_immediate(),
        }
    }

    /// Drops a value, decrementing its heap reference count if applicable.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// Internal helper for copying immediate values without heap interaction.
    ///
    /// Attempting to clone a Ref variant will panic.
    pub(crate) fn clone_immediate(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Ref(_) => panic!("Ref clones must go through clone_with_heap to maintain refcounts"),
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns the heap id if this is a heap value.
    #[must_use]
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Identity comparison (`is`): same heap entry, or equal immediates.
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ref(a), Self::Ref(b)) => a == b,
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            _ => false,
        }
    }

    /// Integer value of `Bool`/`Int` values.
    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn py_type(&self, heap: &Heap) -> Type {
        match self {
            Self::None => Type::NoneType,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Ref(id) => heap.get(*id).py_type(),
        }
    }
}

/// Hash used for `None`.
const NONE_HASH: i64 = 0x5f37_59df;

fn hash_of(value: impl Hash) -> i64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    i64::from_ne_bytes(hasher.finish().to_ne_bytes())
}

fn check_data_depth(depth: usize) -> RunResult<()> {
    if depth > MAX_DATA_RECURSION_DEPTH {
        Err(ExcType::recursion_error())
    } else {
        Ok(())
    }
}

/// Intermediate result of inspecting two heap entries for equality.
///
/// Sequence items are cloned out so the comparison can recurse with `&mut Heap`.
enum EqStep {
    Done(bool),
    Items(Vec<Value>, Vec<Value>),
}

impl Heap {
    /// Creates a string value.
    pub fn new_str(&mut self, s: impl Into<String>) -> RunResult<Value> {
        let id = self.allocate(HeapData::Str(Str::new(s.into())))?;
        Ok(Value::Ref(id))
    }

    /// Returns the contents of a string value.
    #[must_use]
    pub fn as_str<'h>(&'h self, value: &Value) -> Option<&'h str> {
        match value {
            Value::Ref(id) => match self.get(*id) {
                HeapData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns the method heap id if `value` is a method.
    pub(crate) fn method_id(&self, value: &Value) -> Option<HeapId> {
        match value {
            Value::Ref(id) if matches!(self.get(*id), HeapData::Method(_)) => Some(*id),
            _ => None,
        }
    }

    /// Host equality (`==`).
    ///
    /// Identical values are always equal. Methods compare through
    /// [`Method::py_eq`], instances through a class-defined `__eq__`; when neither
    /// side implements equality the result falls back to identity.
    pub fn py_eq(&mut self, left: &Value, right: &Value) -> RunResult<bool> {
        self.eq_at_depth(left, right, 0)
    }

    pub(crate) fn eq_at_depth(&mut self, left: &Value, right: &Value, depth: usize) -> RunResult<bool> {
        check_data_depth(depth)?;
        if left.is(right) {
            return Ok(true);
        }
        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            return Ok(a == b);
        }

        if let Some(id) = self.method_id(left)
            && let Some(result) = Method::py_eq(self, id, right, depth)?
        {
            return Ok(result);
        }
        if let Some(id) = self.method_id(right)
            && let Some(result) = Method::py_eq(self, id, left, depth)?
        {
            return Ok(result);
        }
        if let Some(result) = self.call_special_eq(left, right)? {
            return Ok(result);
        }
        if let Some(result) = self.call_special_eq(right, left)? {
            return Ok(result);
        }

        let (Value::Ref(a), Value::Ref(b)) = (left, right) else {
            return Ok(false);
        };
        let step = match (self.get(*a), self.get(*b)) {
            (HeapData::Str(x), HeapData::Str(y)) => EqStep::Done(x.as_str() == y.as_str()),
            (HeapData::List(x), HeapData::List(y)) => {
                EqStep::Items(self.clone_items(x.items()), self.clone_items(y.items()))
            }
            (HeapData::Tuple(x), HeapData::Tuple(y)) => {
                EqStep::Items(self.clone_items(x.items()), self.clone_items(y.items()))
            }
            _ => EqStep::Done(false),
        };
        match step {
            EqStep::Done(result) => Ok(result),
            EqStep::Items(xs, ys) => {
                let result = if xs.len() == ys.len() {
                    self.items_eq(&xs, &ys, depth + 1)
                } else {
                    Ok(false)
                };
                xs.drop_with_heap(self);
                ys.drop_with_heap(self);
                result
            }
        }
    }

    fn items_eq(&mut self, xs: &[Value], ys: &[Value], depth: usize) -> RunResult<bool> {
        for (x, y) in xs.iter().zip(ys) {
            if !self.eq_at_depth(x, y, depth)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn clone_items(&self, items: &[Value]) -> Vec<Value> {
        items.iter().map(|v| v.clone_with_heap(self)).collect()
    }

    /// Calls `type(left).__eq__(left, right)` if the class of `left` defines it.
    fn call_special_eq(&mut self, left: &Value, right: &Value) -> RunResult<Option<bool>> {
        let Some(func) = self.lookup_special(left, "__eq__") else {
            return Ok(None);
        };
        let args = ArgValues::two(left.clone_with_heap(self), right.clone_with_heap(self));
        let result = self.call(&func, args);
        func.drop_with_heap(self);
        let result = result?;
        let truth = self.py_bool(&result);
        result.drop_with_heap(self);
        truth.map(Some)
    }

    /// Host hash.
    ///
    /// Lists are unhashable. Instances use a class-defined `__hash__`, are
    /// unhashable if their class defines `__eq__` without `__hash__`, and hash by
    /// identity otherwise. Methods hash to their function's identity counter.
    pub fn py_hash(&mut self, value: &Value) -> RunResult<i64> {
        self.hash_at_depth(value, 0)
    }

    fn hash_at_depth(&mut self, value: &Value, depth: usize) -> RunResult<i64> {
        check_data_depth(depth)?;
        let id = match value {
            Value::None => return Ok(NONE_HASH),
            Value::Bool(b) => return Ok(i64::from(*b)),
            Value::Int(i) => return Ok(*i),
            Value::Ref(id) => *id,
        };
        let items = match self.get(id) {
            HeapData::Str(s) => return Ok(hash_of(s.as_str())),
            HeapData::List(_) => return Err(ExcType::type_error_unhashable(Type::List)),
            HeapData::Method(_) => return Ok(Method::py_hash(self, id)),
            HeapData::Instance(_) => return self.instance_hash(value, id),
            HeapData::Function(_) | HeapData::ClassObject(_) | HeapData::WeakRef(_) => {
                return Ok(hash_of(self.public_id(id)));
            }
            HeapData::Tuple(t) => self.clone_items(t.items()),
        };
        let mut hashes = Vec::with_capacity(items.len());
        let mut failure = None;
        for item in &items {
            match self.hash_at_depth(item, depth + 1) {
                Ok(h) => hashes.push(h),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        items.drop_with_heap(self);
        match failure {
            Some(err) => Err(err),
            None => Ok(hash_of(hashes)),
        }
    }

    fn instance_hash(&mut self, value: &Value, id: HeapId) -> RunResult<i64> {
        if let Some(func) = self.lookup_special(value, "__hash__") {
            let result = self.call(&func, ArgValues::one(value.clone_with_heap(self)));
            func.drop_with_heap(self);
            return match result? {
                Value::Int(h) => Ok(h),
                other => {
                    other.drop_with_heap(self);
                    Err(ExcType::type_error("__hash__ method should return an integer"))
                }
            };
        }
        if let Some(func) = self.lookup_special(value, "__eq__") {
            func.drop_with_heap(self);
            let type_name = self.type_name(value).into_owned();
            return Err(ExcType::type_error_unhashable(type_name));
        }
        Ok(hash_of(self.public_id(id)))
    }

    /// Host truthiness.
    pub fn py_bool(&mut self, value: &Value) -> RunResult<bool> {
        Ok(match value {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Ref(id) => match self.get(*id) {
                HeapData::Str(s) => !s.as_str().is_empty(),
                HeapData::List(l) => !l.items().is_empty(),
                HeapData::Tuple(t) => !t.items().is_empty(),
                _ => true,
            },
        })
    }

    /// Host repr.
    ///
    /// Instances use a class-defined `__repr__` (which must return a string).
    /// Self-referencing lists render as `[...]`.
    pub fn py_repr(&mut self, value: &Value) -> RunResult<String> {
        let mut out = String::new();
        let mut in_progress = AHashSet::new();
        self.repr_fmt(value, &mut out, &mut in_progress, 0)?;
        Ok(out)
    }

    pub(crate) fn repr_fmt(
        &mut self,
        value: &Value,
        out: &mut String,
        in_progress: &mut AHashSet<HeapId>,
        depth: usize,
    ) -> RunResult<()> {
        check_data_depth(depth)?;
        let id = match value {
            Value::None => {
                out.push_str("None");
                return Ok(());
            }
            Value::Bool(b) => {
                out.push_str(if *b { "True" } else { "False" });
                return Ok(());
            }
            Value::Int(i) => {
                write!(out, "{i}")?;
                return Ok(());
            }
            Value::Ref(id) => *id,
        };

        let public_id = self.public_id(id);
        let (items, open, close) = match self.get(id) {
            HeapData::Str(s) => {
                string_repr_fmt(s.as_str(), out);
                return Ok(());
            }
            HeapData::Function(f) => {
                write!(out, "<function {} at 0x{public_id:x}>", f.qualname())?;
                return Ok(());
            }
            HeapData::ClassObject(_) => {
                write!(out, "<class '{}'>", self.class_name(id))?;
                return Ok(());
            }
            HeapData::WeakRef(wr) => {
                match wr.target().filter(|target| self.is_live(*target)) {
                    Some(target) => {
                        let target_type = self.type_name(&Value::Ref(target));
                        let target_public_id = self.public_id(target);
                        write!(
                            out,
                            "<weakref at 0x{public_id:x}; to '{target_type}' at 0x{target_public_id:x}>"
                        )?;
                    }
                    None => write!(out, "<weakref at 0x{public_id:x}; dead>")?,
                }
                return Ok(());
            }
            HeapData::Method(_) => return Method::repr_fmt(self, id, out, in_progress, depth),
            HeapData::Instance(_) => return self.instance_repr_fmt(value, id, out),
            HeapData::List(l) => (self.clone_items(l.items()), "[", "]"),
            HeapData::Tuple(t) => (self.clone_items(t.items()), "(", ")"),
        };

        if !in_progress.insert(id) {
            items.drop_with_heap(self);
            write!(out, "{open}...{close}")?;
            return Ok(());
        }
        out.push_str(open);
        let mut result = Ok(());
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            result = self.repr_fmt(item, out, in_progress, depth + 1);
            if result.is_err() {
                break;
            }
        }
        if open == "(" && items.len() == 1 {
            out.push(',');
        }
        out.push_str(close);
        in_progress.remove(&id);
        items.drop_with_heap(self);
        result
    }

    fn instance_repr_fmt(&mut self, value: &Value, id: HeapId, out: &mut String) -> RunResult<()> {
        let Some(func) = self.lookup_special(value, "__repr__") else {
            let public_id = self.public_id(id);
            write!(out, "<{} object at 0x{public_id:x}>", self.type_name(value))?;
            return Ok(());
        };
        let result = self.call(&func, ArgValues::one(value.clone_with_heap(self)));
        func.drop_with_heap(self);
        let result = result?;
        let outcome = match self.as_str(&result) {
            Some(s) => {
                out.push_str(s);
                Ok(())
            }
            None => {
                let type_name = self.type_name(&result);
                Err(ExcType::type_error(format!(
                    "__repr__ returned non-string (type {type_name})"
                )))
            }
        };
        result.drop_with_heap(self);
        outcome
    }

    /// Host three-way ordering.
    ///
    /// Supports numbers, strings, lists and tuples (lexicographic), methods (see
    /// [`Method::py_cmp`]) and instances whose class defines `__lt__`. Anything
    /// else raises `TypeError`.
    pub fn py_cmp(&mut self, left: &Value, right: &Value) -> RunResult<Ordering> {
        self.cmp_at_depth(left, right, 0)
    }

    pub(crate) fn cmp_at_depth(&mut self, left: &Value, right: &Value, depth: usize) -> RunResult<Ordering> {
        check_data_depth(depth)?;
        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            return Ok(a.cmp(&b));
        }
        if let (Some(a), Some(b)) = (self.method_id(left), self.method_id(right)) {
            return Method::py_cmp(self, a, b, depth);
        }
        if let Some(func) = self.lookup_special(left, "__lt__") {
            return self.instance_cmp(func, left, right, depth);
        }

        if let (Value::Ref(a), Value::Ref(b)) = (left, right) {
            let items = match (self.get(*a), self.get(*b)) {
                (HeapData::Str(x), HeapData::Str(y)) => return Ok(x.as_str().cmp(y.as_str())),
                (HeapData::List(x), HeapData::List(y)) => {
                    Some((self.clone_items(x.items()), self.clone_items(y.items())))
                }
                (HeapData::Tuple(x), HeapData::Tuple(y)) => {
                    Some((self.clone_items(x.items()), self.clone_items(y.items())))
                }
                _ => None,
            };
            if let Some((xs, ys)) = items {
                let result = self.items_cmp(&xs, &ys, depth + 1);
                xs.drop_with_heap(self);
                ys.drop_with_heap(self);
                return result;
            }
        }

        let left_type = self.type_name(left).into_owned();
        let right_type = self.type_name(right);
        Err(ExcType::type_error_not_orderable(left_type, right_type))
    }

    fn items_cmp(&mut self, xs: &[Value], ys: &[Value], depth: usize) -> RunResult<Ordering> {
        for (x, y) in xs.iter().zip(ys) {
            if !self.eq_at_depth(x, y, depth)? {
                return self.cmp_at_depth(x, y, depth);
            }
        }
        Ok(xs.len().cmp(&ys.len()))
    }

    /// Orders an instance through its class's `__eq__` and `__lt__`.
    fn instance_cmp(&mut self, less_than: Value, left: &Value, right: &Value, depth: usize) -> RunResult<Ordering> {
        let equal = self.eq_at_depth(left, right, depth);
        let outcome = match equal {
            Ok(true) => Ok(Ordering::Equal),
            Ok(false) => {
                let args = ArgValues::two(left.clone_with_heap(self), right.clone_with_heap(self));
                match self.call(&less_than, args) {
                    Ok(result) => {
                        let truth = self.py_bool(&result);
                        result.drop_with_heap(self);
                        truth.map(|less| if less { Ordering::Less } else { Ordering::Greater })
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        };
        less_than.drop_with_heap(self);
        outcome
    }
}
