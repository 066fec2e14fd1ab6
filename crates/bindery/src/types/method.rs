//! Bound and unbound methods.
//!
//! A method pairs a function with an optional receiver and an optional owner
//! class. With a receiver it is *bound*: calling it prepends the receiver to
//! the arguments. Without one it is *unbound*: the first argument must be an
//! instance of the owner.
//!
//! Equality and hashing key on the function's identity counter, so two
//! methods created by separate attribute lookups (`a.f == a.f`) compare equal
//! even though they are distinct heap entries.
//!
//! `Value::None` passed as receiver or owner means "absent".

use std::{cmp::Ordering, fmt::Write};

use ahash::AHashSet;

use crate::{
    args::ArgValues,
    config::MethodReprStyle,
    copy::DeepCopyMemo,
    exception::{ExcType, RunError, RunResult, SimpleException},
    heap::{DropWithHeap, Heap, HeapData, HeapId},
    types::{Function, PyTrait, Type},
    value::Value,
};

/// Name used in argument errors raised by [`Method::py_new`].
const CONSTRUCTOR_NAME: &str = "method";

/// A bound or unbound method.
#[derive(Debug)]
pub struct Method {
    /// Strong reference to a `Function` entry.
    func: HeapId,
    /// The bound receiver; `None` for unbound methods.
    receiver: Option<Value>,
    /// The owner class; always present when `receiver` is `None`.
    owner: Option<Value>,
    /// Weak references registered against this method.
    weakrefs: Vec<HeapId>,
}

/// Owned copies of the fields of a method, detached from the heap borrow.
struct MethodParts {
    func: HeapId,
    receiver: Option<Value>,
    owner: Option<Value>,
}

impl DropWithHeap for MethodParts {
    fn drop_with_heap(self, heap: &mut Heap) {
        self.receiver.drop_with_heap(heap);
        self.owner.drop_with_heap(heap);
    }
}

impl Method {
    pub(crate) fn register_weakref(&mut self, weakref_id: HeapId) {
        self.weakrefs.push(weakref_id);
    }

    pub(crate) fn unregister_weakref(&mut self, weakref_id: HeapId) {
        if let Some(pos) = self.weakrefs.iter().position(|&id| id == weakref_id) {
            self.weakrefs.remove(pos);
        }
    }

    pub(crate) fn take_weakrefs(&mut self) -> Vec<HeapId> {
        std::mem::take(&mut self.weakrefs)
    }

    /// Host-convention constructor: `method(func, receiver[, owner])`.
    ///
    /// Takes two or three positional arguments and no keywords.
    pub fn py_new(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
        let args = args.check_no_kwargs(CONSTRUCTOR_NAME, heap)?;
        let (args, _) = args.into_parts();
        let count = args.len();
        if !(2..=3).contains(&count) {
            args.drop_with_heap(heap);
            return Err(ExcType::type_error_arg_range(CONSTRUCTOR_NAME, 2, 3, count));
        }
        let mut args = args.into_iter();
        let func = args.next().unwrap_or(Value::None);
        let receiver = args.next().unwrap_or(Value::None);
        let owner = args.next().unwrap_or(Value::None);
        let result = Self::construct(heap, &func, &receiver, &owner);
        func.drop_with_heap(heap);
        receiver.drop_with_heap(heap);
        owner.drop_with_heap(heap);
        result
    }

    /// Validates and builds a method from borrowed parts.
    pub(crate) fn construct(heap: &mut Heap, func: &Value, receiver: &Value, owner: &Value) -> RunResult<Value> {
        let func_id = match func {
            Value::Ref(id) if matches!(heap.get(*id), HeapData::Function(_)) => *id,
            other if heap.is_callable(other) => {
                return Err(ExcType::type_error("first argument must be a compiled function"));
            }
            _ => return Err(ExcType::type_error("first argument must be callable")),
        };
        if receiver.is_none() && owner.is_none() {
            return Err(ExcType::type_error("unbound methods must have non-NULL im_class"));
        }
        let receiver = (!receiver.is_none()).then(|| receiver.clone_with_heap(heap));
        let owner = (!owner.is_none()).then(|| owner.clone_with_heap(heap));
        Self::allocate(heap, func_id, receiver, owner)
    }

    /// Allocates a method, taking ownership of `receiver` and `owner`.
    ///
    /// Arena refusals are reported as `RuntimeError: cannot create method <name>`.
    fn allocate(heap: &mut Heap, func: HeapId, receiver: Option<Value>, owner: Option<Value>) -> RunResult<Value> {
        heap.inc_ref(func);
        let method = Self {
            func,
            receiver,
            owner,
            weakrefs: Vec::new(),
        };
        match heap.allocate_method(method) {
            Ok(id) => Ok(Value::Ref(id)),
            Err(err) => {
                // the caller still holds `func`, so it outlives the refused allocation
                let name = function(heap, func).name();
                tracing::debug!(error = %err, method = name, "method allocation refused");
                Err(SimpleException::new_msg(ExcType::RuntimeError, format!("cannot create method {name}")).into())
            }
        }
    }

    fn parts(heap: &Heap, id: HeapId) -> MethodParts {
        let method = method(heap, id);
        MethodParts {
            func: method.func,
            receiver: method.receiver.as_ref().map(|v| v.clone_with_heap(heap)),
            owner: method.owner.as_ref().map(|v| v.clone_with_heap(heap)),
        }
    }

    /// Descriptor binding: the value `method` turns into when read through `instance`.
    ///
    /// Bound methods are returned unchanged. An unbound method accessed through
    /// a type that is not a subtype of its owner is also returned unchanged;
    /// otherwise a new method bound to `instance` is created (`instance` of
    /// `None` gives a new unbound method).
    pub(crate) fn bind_on_access(
        heap: &mut Heap,
        id: HeapId,
        instance: &Value,
        accessed_via: &Value,
    ) -> RunResult<Value> {
        if method(heap, id).receiver.is_some() {
            heap.inc_ref(id);
            return Ok(Value::Ref(id));
        }
        let MethodParts { func, receiver, owner } = Self::parts(heap, id);
        receiver.drop_with_heap(heap);

        if let Some(owner_value) = &owner
            && !accessed_via.is_none()
        {
            match heap.is_subtype(accessed_via, owner_value) {
                Ok(true) => {}
                Ok(false) => {
                    owner.drop_with_heap(heap);
                    heap.inc_ref(id);
                    return Ok(Value::Ref(id));
                }
                Err(err) => {
                    owner.drop_with_heap(heap);
                    return Err(err);
                }
            }
        }

        let receiver = (!instance.is_none()).then(|| instance.clone_with_heap(heap));
        Self::allocate(heap, func, receiver, owner)
    }

    /// Calls method `id`.
    ///
    /// Bound methods call the function with the receiver prepended. Unbound
    /// methods check that the first argument is an instance of the owner and
    /// pass the arguments through unchanged.
    pub(crate) fn call(heap: &mut Heap, id: HeapId, mut args: ArgValues) -> RunResult<Value> {
        let MethodParts { func, receiver, owner } = Self::parts(heap, id);
        if let Some(receiver) = receiver {
            owner.drop_with_heap(heap);
            args.prepend(receiver);
            return Function::invoke(heap, func, args);
        }

        let check = match (args.first(), &owner) {
            (None, _) => Err(Self::unbound_call_error(heap, func, owner.as_ref(), None)),
            (Some(first), Some(owner_value)) => match heap.is_instance(first, owner_value) {
                Ok(true) => Ok(()),
                Ok(false) => {
                    let actual = heap.type_name(first).into_owned();
                    Err(Self::unbound_call_error(heap, func, owner.as_ref(), Some(&actual)))
                }
                Err(err) => Err(err),
            },
            (Some(_), None) => Ok(()),
        };
        owner.drop_with_heap(heap);
        match check {
            Ok(()) => Function::invoke(heap, func, args),
            Err(err) => {
                args.drop_with_heap(heap);
                Err(err)
            }
        }
    }

    fn unbound_call_error(heap: &Heap, func: HeapId, owner: Option<&Value>, actual: Option<&str>) -> RunError {
        let name = function(heap, func).name();
        let owner_name = owner_display_name(heap, owner);
        let got = match actual {
            Some(actual) => format!("{actual} instance"),
            None => "nothing".to_owned(),
        };
        ExcType::type_error(format!(
            "unbound method {name}() must be called with {owner_name} instance as first argument (got {got} instead)"
        ))
    }

    /// Equality against `other`; `None` when `other` is not a method.
    ///
    /// Equal when both wrap the same function and the receivers are both absent
    /// or compare equal. Errors from comparing receivers propagate.
    pub(crate) fn py_eq(heap: &mut Heap, id: HeapId, other: &Value, depth: usize) -> RunResult<Option<bool>> {
        let Some(other_id) = heap.method_id(other) else {
            return Ok(None);
        };
        if other_id == id {
            return Ok(Some(true));
        }
        if Self::counter(heap, id) != Self::counter(heap, other_id) {
            return Ok(Some(false));
        }
        let left = Self::parts(heap, id);
        let right = Self::parts(heap, other_id);
        let result = match (&left.receiver, &right.receiver) {
            (None, None) => Ok(true),
            (Some(a), Some(b)) => heap.eq_at_depth(a, b, depth + 1),
            _ => Ok(false),
        };
        left.drop_with_heap(heap);
        right.drop_with_heap(heap);
        result.map(Some)
    }

    /// Three-way comparison of two methods.
    ///
    /// Orders by function counter, then by receiver: absent sorts first,
    /// identical receivers are equal, anything else uses host ordering.
    pub(crate) fn py_cmp(heap: &mut Heap, a: HeapId, b: HeapId, depth: usize) -> RunResult<Ordering> {
        let by_counter = Self::counter(heap, a).cmp(&Self::counter(heap, b));
        if by_counter != Ordering::Equal {
            return Ok(by_counter);
        }
        let left = Self::parts(heap, a);
        let right = Self::parts(heap, b);
        let result = match (&left.receiver, &right.receiver) {
            (None, None) => Ok(Ordering::Equal),
            (Some(x), Some(y)) if x.is(y) => Ok(Ordering::Equal),
            (None, Some(_)) => Ok(Ordering::Less),
            (Some(_), None) => Ok(Ordering::Greater),
            (Some(x), Some(y)) => heap.cmp_at_depth(x, y, depth + 1),
        };
        left.drop_with_heap(heap);
        right.drop_with_heap(heap);
        result
    }

    /// Hash of method `id`: its function's identity counter.
    pub(crate) fn py_hash(heap: &Heap, id: HeapId) -> i64 {
        i64::try_from(Self::counter(heap, id)).unwrap_or(i64::MAX)
    }

    fn counter(heap: &Heap, id: HeapId) -> u64 {
        function(heap, method(heap, id).func).counter()
    }

    pub(crate) fn repr_fmt(
        heap: &mut Heap,
        id: HeapId,
        out: &mut String,
        in_progress: &mut AHashSet<HeapId>,
        depth: usize,
    ) -> RunResult<()> {
        let parts = Self::parts(heap, id);
        let func = function(heap, parts.func);
        let target = match heap.method_repr_style() {
            MethodReprStyle::ClassQualified => {
                format!("{}.{}", owner_display_name(heap, parts.owner.as_ref()), func.name())
            }
            MethodReprStyle::QualifiedName => func.qualname().to_owned(),
        };
        let result = match &parts.receiver {
            None => write!(out, "<unbound method {target}>").map_err(RunError::from),
            Some(receiver) => {
                out.push_str("<bound method ");
                out.push_str(&target);
                out.push_str(" of ");
                let result = heap.repr_fmt(receiver, out, in_progress, depth + 1);
                out.push('>');
                result
            }
        };
        parts.drop_with_heap(heap);
        result
    }

    /// Reads an attribute: the member table first, then the function's attributes.
    pub(crate) fn py_getattr(heap: &mut Heap, id: HeapId, name: &str) -> RunResult<Value> {
        let method = method(heap, id);
        match name {
            "__func__" | "im_func" => {
                heap.inc_ref(method.func);
                Ok(Value::Ref(method.func))
            }
            "__self__" | "im_self" => Ok(clone_or_none(heap, method.receiver.as_ref())),
            "im_class" => Ok(clone_or_none(heap, method.owner.as_ref())),
            _ => {
                let func = method.func;
                Function::py_getattr(heap, func, name)
            }
        }
    }

    /// `__reduce__`: methods cannot be pickled.
    pub fn reduce(heap: &mut Heap, method: &Value) -> RunResult<Value> {
        Self::expect_method(heap, method, "__reduce__")?;
        Err(Self::pickle_error())
    }

    /// `__reduce_ex__(protocol=None)`: validates the protocol, then fails like [`Method::reduce`].
    pub fn reduce_ex(heap: &mut Heap, method: &Value, args: ArgValues) -> RunResult<Value> {
        if let Err(err) = Self::expect_method(heap, method, "__reduce_ex__") {
            args.drop_with_heap(heap);
            return Err(err);
        }
        match args.get_zero_one_arg("__reduce_ex__", heap)? {
            None | Some(Value::Int(_) | Value::Bool(_)) => Err(Self::pickle_error()),
            Some(other) => {
                let type_name = heap.type_name(&other).into_owned();
                other.drop_with_heap(heap);
                Err(ExcType::type_error(format!(
                    "an integer is required (got type {type_name})"
                )))
            }
        }
    }

    fn pickle_error() -> RunError {
        ExcType::type_error("Can't pickle instancemethod objects")
    }

    fn expect_method(heap: &Heap, value: &Value, name: &str) -> RunResult<HeapId> {
        heap.method_id(value).ok_or_else(|| {
            ExcType::type_error(format!(
                "descriptor '{name}' requires a 'method' object but received '{}'",
                heap.type_name(value)
            ))
        })
    }

    /// Deep copy: a new method with the same function and owner and a deep copy of the receiver.
    pub(crate) fn deepcopy(heap: &mut Heap, id: HeapId, memo: &mut DeepCopyMemo) -> RunResult<Value> {
        let MethodParts { func, receiver, owner } = Self::parts(heap, id);
        let receiver = match receiver {
            Some(receiver) => {
                let copied = heap.deep_copy(&receiver, memo);
                receiver.drop_with_heap(heap);
                match copied {
                    Ok(copied) => Some(copied),
                    Err(err) => {
                        owner.drop_with_heap(heap);
                        return Err(err);
                    }
                }
            }
            None => None,
        };
        Self::allocate(heap, func, receiver, owner)
    }
}

impl PyTrait for Method {
    fn py_type(&self) -> Type {
        Type::Method
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.weakrefs.len() * std::mem::size_of::<HeapId>()
    }

    fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        stack.push(self.func);
        stack.extend(self.receiver.take().and_then(|v| v.ref_id()));
        stack.extend(self.owner.take().and_then(|v| v.ref_id()));
    }

    fn py_traverse(&self, visit: &mut impl FnMut(HeapId)) {
        visit(self.func);
        if let Some(id) = self.receiver.as_ref().and_then(Value::ref_id) {
            visit(id);
        }
        if let Some(id) = self.owner.as_ref().and_then(Value::ref_id) {
            visit(id);
        }
    }
}

fn method(heap: &Heap, id: HeapId) -> &Method {
    match heap.get(id) {
        HeapData::Method(method) => method,
        other => panic!("expected a method at {id:?}, found {:?}", other.py_type()),
    }
}

fn function(heap: &Heap, id: HeapId) -> &Function {
    match heap.get(id) {
        HeapData::Function(func) => func,
        other => panic!("expected a function at {id:?}, found {:?}", other.py_type()),
    }
}

fn clone_or_none(heap: &Heap, value: Option<&Value>) -> Value {
    value.map_or(Value::None, |v| v.clone_with_heap(heap))
}

/// Name shown for an owner in messages: the class name, the type name for
/// non-class owners, or `?` when there is no owner.
fn owner_display_name(heap: &Heap, owner: Option<&Value>) -> String {
    match owner {
        None => "?".to_owned(),
        Some(owner) => match heap.class_id_of(owner) {
            Some(class_id) => heap.class_name(class_id).to_owned(),
            None => heap.type_name(owner).into_owned(),
        },
    }
}

impl Heap {
    /// Creates a method from `func`, `receiver` and `owner`.
    ///
    /// `receiver` of `None` makes an unbound method, which requires an owner
    /// (`owner` of `None` means no owner).
    pub fn new_method(&mut self, func: &Value, receiver: &Value, owner: &Value) -> RunResult<Value> {
        Method::construct(self, func, receiver, owner)
    }

    /// Applies descriptor binding to `method` as if read through `instance`
    /// (or through the class `accessed_via` when `instance` is `None`).
    ///
    /// Non-method values are returned unchanged.
    pub fn bind_on_access(&mut self, method: &Value, instance: &Value, accessed_via: &Value) -> RunResult<Value> {
        match self.method_id(method) {
            Some(id) => Method::bind_on_access(self, id, instance, accessed_via),
            None => Ok(method.clone_with_heap(self)),
        }
    }
}
