//! Shared fixtures for the integration tests.
//!
//! `shapes()` builds a small class hierarchy:
//!
//! - `Shape(x)`: stores `x`, defines `area` (returns its arguments as a tuple)
//!   and `__eq__`/`__hash__`/`__repr__` keyed on `x`
//! - `Square(Shape)`: inherits everything
//! - `Color`: unrelated, no special methods
#![allow(dead_code)]

use std::cell::Cell;

use bindery::{ArgValues, DropWithHeap, ExcType, FunctionDef, Heap, NativeFn, RunResult, SimpleException, Value};

/// Splits call arguments into positional values, releasing keywords.
pub fn positional(heap: &mut Heap, args: ArgValues) -> Vec<Value> {
    let (args, kwargs) = args.into_parts();
    kwargs.drop_with_heap(heap);
    args
}

/// Returns its positional arguments as a tuple.
pub fn echo(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
    let args = positional(heap, args);
    heap.new_tuple(args)
}

/// Returns the number of keyword arguments it received.
pub fn count_kwargs(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
    let count = args.kwargs().len();
    args.drop_with_heap(heap);
    Ok(Value::Int(i64::try_from(count).unwrap()))
}

/// `__init__(self, x=None)`
pub fn init_x(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
    let mut args = positional(heap, args).into_iter();
    let this = args.next().expect("self");
    let x = args.next().unwrap_or(Value::None);
    args.drop_with_heap(heap);
    let result = heap.set_attr(&this, "x", x);
    this.drop_with_heap(heap);
    result.map(|()| Value::None)
}

/// `__eq__(self, other)`: compares `x` attributes; anything without `x` is unequal.
pub fn eq_by_x(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
    let mut args = positional(heap, args).into_iter();
    let this = args.next().expect("self");
    let other = args.next().expect("other");
    let ax = heap.get_attr(&this, "x");
    let bx = heap.get_attr(&other, "x");
    let result = match (ax, bx) {
        (Ok(ax), Ok(bx)) => {
            let equal = heap.py_eq(&ax, &bx);
            ax.drop_with_heap(heap);
            bx.drop_with_heap(heap);
            equal.map(Value::Bool)
        }
        (ax, bx) => {
            ax.ok().drop_with_heap(heap);
            bx.ok().drop_with_heap(heap);
            Ok(Value::Bool(false))
        }
    };
    this.drop_with_heap(heap);
    other.drop_with_heap(heap);
    result
}

/// `__hash__(self)`: hash of `x`.
pub fn hash_by_x(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
    let this = args.get_one_arg("__hash__", heap)?;
    let x = heap.get_attr(&this, "x");
    this.drop_with_heap(heap);
    let x = x?;
    let hash = heap.py_hash(&x);
    x.drop_with_heap(heap);
    hash.map(Value::Int)
}

/// `__repr__(self)`: `Shape(<repr of x>)`.
pub fn repr_by_x(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
    let this = args.get_one_arg("__repr__", heap)?;
    let x = heap.get_attr(&this, "x");
    this.drop_with_heap(heap);
    let x = x?;
    let repr = heap.py_repr(&x);
    x.drop_with_heap(heap);
    heap.new_str(format!("Shape({})", repr?))
}

/// Always raises `ValueError: boom`.
pub fn raise_value_error(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
    args.drop_with_heap(heap);
    Err(SimpleException::new_msg(ExcType::ValueError, "boom").into())
}

thread_local! {
    static CALLBACK_CALLS: Cell<usize> = const { Cell::new(0) };
}

/// Weakref callback that counts its invocations (per test thread).
pub fn counting_callback(heap: &mut Heap, args: ArgValues) -> RunResult<Value> {
    args.drop_with_heap(heap);
    CALLBACK_CALLS.with(|calls| calls.set(calls.get() + 1));
    Ok(Value::None)
}

/// Number of `counting_callback` calls made on this thread.
pub fn callback_calls() -> usize {
    CALLBACK_CALLS.with(Cell::get)
}

/// The class hierarchy described in the module docs.
pub struct Shapes {
    pub shape: Value,
    pub square: Value,
    pub color: Value,
    /// The `area` function stored on `Shape`.
    pub area: Value,
}

impl Shapes {
    pub fn release(self, heap: &mut Heap) {
        for value in [self.area, self.color, self.square, self.shape] {
            value.drop_with_heap(heap);
        }
    }

    /// Calls `Shape(x)`.
    pub fn new_shape(&self, heap: &mut Heap, x: i64) -> Value {
        heap.call(&self.shape, ArgValues::one(Value::Int(x))).unwrap()
    }

    /// Calls `Square(x)`.
    pub fn new_square(&self, heap: &mut Heap, x: i64) -> Value {
        heap.call(&self.square, ArgValues::one(Value::Int(x))).unwrap()
    }

    pub fn new_color(&self, heap: &mut Heap) -> Value {
        heap.call(&self.color, ArgValues::empty()).unwrap()
    }
}

fn define(heap: &mut Heap, class: &Value, name: &str, body: NativeFn) {
    let func = heap
        .new_function(FunctionDef::new(name, body).qualname(format!("Shape.{name}")))
        .unwrap();
    heap.set_attr(class, name, func).unwrap();
}

pub fn shapes(heap: &mut Heap) -> Shapes {
    let shape = heap.new_class("Shape", &[]).unwrap();
    let area = heap
        .new_function(
            FunctionDef::new("area", echo)
                .qualname("Shape.area")
                .doc("Area of the shape."),
        )
        .unwrap();
    heap.set_attr(&shape, "area", area.clone_with_heap(heap)).unwrap();
    define(heap, &shape, "__init__", init_x);
    define(heap, &shape, "__eq__", eq_by_x);
    define(heap, &shape, "__hash__", hash_by_x);
    define(heap, &shape, "__repr__", repr_by_x);

    let square = heap.new_class("Square", &[&shape]).unwrap();
    let color = heap.new_class("Color", &[]).unwrap();
    Shapes {
        shape,
        square,
        color,
        area,
    }
}

/// Asserts `result` failed with `exc_type` and returns the message.
pub fn expect_exc<T: std::fmt::Debug>(result: RunResult<T>, exc_type: ExcType) -> String {
    let err = result.expect_err("expected an exception");
    assert_eq!(err.exc_type(), Some(exc_type), "unexpected error: {err}");
    err.message().unwrap_or_default().to_owned()
}
