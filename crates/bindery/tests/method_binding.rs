//! Tests for method construction, descriptor binding and attribute access.
//!
//! Covers the explicit constructors (`Heap::new_method`, `Method::py_new`),
//! `Heap::bind_on_access`, the binding performed by `Heap::get_attr`, and the
//! method attribute proxy.

mod common;

use bindery::{ArgValues, DropWithHeap, ExcType, Heap, Method, Value};
use common::{expect_exc, shapes};
use pretty_assertions::assert_eq;

fn str_attr(heap: &mut Heap, value: &Value, name: &str) -> String {
    let attr = heap.get_attr(value, name).unwrap();
    let s = heap.as_str(&attr).expect("string attribute").to_owned();
    attr.drop_with_heap(heap);
    s
}

// =============================================================================
// 1. Construction
// =============================================================================

/// Reading back `__func__`/`__self__`/`im_class` returns exactly what was passed in.
#[test]
fn construct_then_read_back() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 3);

    let method = heap.new_method(&shapes.area, &obj, &shapes.shape).unwrap();
    for name in ["__func__", "im_func"] {
        let func = heap.get_attr(&method, name).unwrap();
        assert!(func.is(&shapes.area), "{name} should be the function");
        func.drop_with_heap(&mut heap);
    }
    for name in ["__self__", "im_self"] {
        let receiver = heap.get_attr(&method, name).unwrap();
        assert!(receiver.is(&obj), "{name} should be the receiver");
        receiver.drop_with_heap(&mut heap);
    }
    let owner = heap.get_attr(&method, "im_class").unwrap();
    assert!(owner.is(&shapes.shape));
    owner.drop_with_heap(&mut heap);
}

/// An unbound method reports `None` for its receiver.
#[test]
fn unbound_method_has_no_receiver() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);

    let method = heap.new_method(&shapes.area, &Value::None, &shapes.shape).unwrap();
    let receiver = heap.get_attr(&method, "__self__").unwrap();
    assert!(receiver.is_none());
    assert_eq!(heap.py_repr(&method).unwrap(), "<unbound method Shape.area>");
}

/// A bound method without an owner reports `None` for `im_class` and `?` in its repr.
#[test]
fn bound_method_without_owner() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 3);

    let method = heap.new_method(&shapes.area, &obj, &Value::None).unwrap();
    let owner = heap.get_attr(&method, "im_class").unwrap();
    assert!(owner.is_none());
    assert_eq!(heap.py_repr(&method).unwrap(), "<bound method ?.area of Shape(3)>");
}

/// Construction without receiver or owner is rejected.
#[test]
fn unbound_without_owner_is_rejected() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);

    let msg = expect_exc(heap.new_method(&shapes.area, &Value::None, &Value::None), ExcType::TypeError);
    assert_eq!(msg, "unbound methods must have non-NULL im_class");
}

/// The first argument must be a compiled function.
#[test]
fn construct_requires_function() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);

    let msg = expect_exc(heap.new_method(&Value::Int(5), &obj, &Value::None), ExcType::TypeError);
    assert_eq!(msg, "first argument must be callable");

    let msg = expect_exc(heap.new_method(&shapes.color, &obj, &Value::None), ExcType::TypeError);
    assert_eq!(msg, "first argument must be a compiled function");
}

/// `Method::py_new` takes two or three positional arguments and no keywords.
#[test]
fn py_new_argument_checks() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);

    let args = ArgValues::one(shapes.area.clone_with_heap(&heap));
    let msg = expect_exc(Method::py_new(&mut heap, args), ExcType::TypeError);
    assert_eq!(msg, "method expected at least 2 arguments, got 1");

    let args = ArgValues::positional([
        shapes.area.clone_with_heap(&heap),
        obj.clone_with_heap(&heap),
        shapes.shape.clone_with_heap(&heap),
        Value::Int(1),
    ]);
    let msg = expect_exc(Method::py_new(&mut heap, args), ExcType::TypeError);
    assert_eq!(msg, "method expected at most 3 arguments, got 4");

    let args = ArgValues::two(shapes.area.clone_with_heap(&heap), obj.clone_with_heap(&heap))
        .with_kwarg("owner", shapes.shape.clone_with_heap(&heap));
    let msg = expect_exc(Method::py_new(&mut heap, args), ExcType::TypeError);
    assert_eq!(msg, "method() takes no keyword arguments");

    let args = ArgValues::positional([shapes.area.clone_with_heap(&heap), Value::None, Value::None]);
    let msg = expect_exc(Method::py_new(&mut heap, args), ExcType::TypeError);
    assert_eq!(msg, "unbound methods must have non-NULL im_class");
}

/// `Method::py_new` with valid arguments builds bound and unbound methods.
#[test]
fn py_new_builds_methods() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 2);

    let args = ArgValues::two(shapes.area.clone_with_heap(&heap), obj.clone_with_heap(&heap));
    let bound = Method::py_new(&mut heap, args).unwrap();
    let receiver = heap.get_attr(&bound, "__self__").unwrap();
    assert!(receiver.is(&obj));

    let args = ArgValues::positional([
        shapes.area.clone_with_heap(&heap),
        Value::None,
        shapes.square.clone_with_heap(&heap),
    ]);
    let unbound = Method::py_new(&mut heap, args).unwrap();
    assert_eq!(heap.py_repr(&unbound).unwrap(), "<unbound method Square.area>");
}

/// Failed constructions leave reference counts untouched.
#[test]
fn failed_construction_releases_arguments() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 2);
    let before = heap.ref_count(&obj);

    let args = ArgValues::positional([Value::Int(3), obj.clone_with_heap(&heap)]);
    assert!(Method::py_new(&mut heap, args).is_err());
    assert_eq!(heap.ref_count(&obj), before);
}

// =============================================================================
// 2. Descriptor binding
// =============================================================================

/// Binding an already bound method returns the identical value.
#[test]
fn bind_bound_returns_same_value() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);
    let other = shapes.new_color(&mut heap);

    let bound = heap.new_method(&shapes.area, &obj, &shapes.shape).unwrap();
    let rebound = heap.bind_on_access(&bound, &other, &shapes.color).unwrap();
    assert!(rebound.is(&bound));
}

/// Binding an unbound method through a subtype creates a new bound method with the same owner.
#[test]
fn bind_unbound_through_subtype() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let square = shapes.new_square(&mut heap, 4);

    let unbound = heap.get_attr(&shapes.shape, "area").unwrap();
    let bound = heap.bind_on_access(&unbound, &square, &shapes.square).unwrap();
    assert!(!bound.is(&unbound));

    let receiver = heap.get_attr(&bound, "__self__").unwrap();
    assert!(receiver.is(&square));
    let owner = heap.get_attr(&bound, "im_class").unwrap();
    assert!(owner.is(&shapes.shape), "rebinding keeps the original owner");
}

/// Binding an unbound method through an unrelated type returns the identical value.
#[test]
fn bind_unbound_through_unrelated_type() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let color = shapes.new_color(&mut heap);

    let unbound = heap.get_attr(&shapes.shape, "area").unwrap();
    let result = heap.bind_on_access(&unbound, &color, &shapes.color).unwrap();
    assert!(result.is(&unbound));
}

/// Without an access type the method binds unconditionally.
#[test]
fn bind_without_access_type() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let color = shapes.new_color(&mut heap);

    let unbound = heap.get_attr(&shapes.shape, "area").unwrap();
    let bound = heap.bind_on_access(&unbound, &color, &Value::None).unwrap();
    let receiver = heap.get_attr(&bound, "__self__").unwrap();
    assert!(receiver.is(&color));
}

/// Binding to a `None` instance yields a new, equal, unbound method.
#[test]
fn bind_to_none_instance_stays_unbound() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);

    let unbound = heap.get_attr(&shapes.shape, "area").unwrap();
    let rebound = heap.bind_on_access(&unbound, &Value::None, &shapes.square).unwrap();
    assert!(!rebound.is(&unbound));
    let receiver = heap.get_attr(&rebound, "__self__").unwrap();
    assert!(receiver.is_none());
    assert!(heap.py_eq(&rebound, &unbound).unwrap());
}

/// A non-class access type makes the subtype test fail with `TypeError`.
#[test]
fn bind_with_non_class_access_type() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);

    let unbound = heap.get_attr(&shapes.shape, "area").unwrap();
    let msg = expect_exc(heap.bind_on_access(&unbound, &obj, &Value::Int(1)), ExcType::TypeError);
    assert_eq!(msg, "issubclass() arg 1 must be a class");
}

/// Non-method values pass through `bind_on_access` unchanged.
#[test]
fn bind_non_method_passes_through() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);

    let result = heap.bind_on_access(&shapes.area, &obj, &shapes.shape).unwrap();
    assert!(result.is(&shapes.area));
}

// =============================================================================
// 3. Attribute lookup
// =============================================================================

/// A function read through an instance becomes a method bound to it, owned by its type.
#[test]
fn instance_lookup_binds_function() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let square = shapes.new_square(&mut heap, 5);

    let bound = heap.get_attr(&square, "area").unwrap();
    let receiver = heap.get_attr(&bound, "__self__").unwrap();
    assert!(receiver.is(&square));
    let owner = heap.get_attr(&bound, "im_class").unwrap();
    assert!(owner.is(&shapes.square));
    assert_eq!(heap.py_repr(&bound).unwrap(), "<bound method Square.area of Shape(5)>");
}

/// A function read through a class becomes an unbound method owned by that class.
#[test]
fn class_lookup_gives_unbound_method() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);

    let unbound = heap.get_attr(&shapes.square, "area").unwrap();
    let receiver = heap.get_attr(&unbound, "__self__").unwrap();
    assert!(receiver.is_none());
    let owner = heap.get_attr(&unbound, "im_class").unwrap();
    assert!(owner.is(&shapes.square));
}

/// Every lookup creates a fresh method; the instance dict shadows the class.
#[test]
fn lookups_create_fresh_methods() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 5);

    let first = heap.get_attr(&obj, "area").unwrap();
    let second = heap.get_attr(&obj, "area").unwrap();
    assert!(!first.is(&second));
    assert!(heap.py_eq(&first, &second).unwrap());

    heap.set_attr(&obj, "area", Value::Int(7)).unwrap();
    let shadowed = heap.get_attr(&obj, "area").unwrap();
    assert!(matches!(shadowed, Value::Int(7)));
}

/// Methods stored on a class go through descriptor binding on lookup.
#[test]
fn stored_methods_rebind_on_lookup() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);
    let square = shapes.new_square(&mut heap, 2);
    let color = shapes.new_color(&mut heap);

    // bound: passes through untouched
    let bound = heap.get_attr(&obj, "area").unwrap();
    heap.set_attr(&shapes.color, "helper", bound.clone_with_heap(&heap)).unwrap();
    let found = heap.get_attr(&color, "helper").unwrap();
    assert!(found.is(&bound));

    // unbound Shape.area stored on Square binds to Square instances
    let unbound = heap.get_attr(&shapes.shape, "area").unwrap();
    heap.set_attr(&shapes.square, "alias", unbound.clone_with_heap(&heap)).unwrap();
    let found = heap.get_attr(&square, "alias").unwrap();
    let receiver = heap.get_attr(&found, "__self__").unwrap();
    assert!(receiver.is(&square));

    // unbound Shape.area stored on Color stays unbound for Color instances
    heap.set_attr(&shapes.color, "alias", unbound.clone_with_heap(&heap)).unwrap();
    let found = heap.get_attr(&color, "alias").unwrap();
    assert!(found.is(&unbound));
}

/// Missing attributes raise `AttributeError` with the CPython wording.
#[test]
fn missing_attributes() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);

    let msg = expect_exc(heap.get_attr(&obj, "perimeter"), ExcType::AttributeError);
    assert_eq!(msg, "'Shape' object has no attribute 'perimeter'");
    let msg = expect_exc(heap.get_attr(&shapes.shape, "perimeter"), ExcType::AttributeError);
    assert_eq!(msg, "type object 'Shape' has no attribute 'perimeter'");
}

/// Lookups leave the receiver's reference count where it started.
#[test]
fn lookup_reference_counts_balance() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);
    let before = heap.ref_count(&obj);

    let bound = heap.get_attr(&obj, "area").unwrap();
    assert_eq!(heap.ref_count(&obj), before.map(|n| n + 1));
    bound.drop_with_heap(&mut heap);
    assert_eq!(heap.ref_count(&obj), before);
}

// =============================================================================
// 4. Attribute proxy
// =============================================================================

/// Unknown names are forwarded to the function.
#[test]
fn attributes_forward_to_function() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);
    let bound = heap.get_attr(&obj, "area").unwrap();

    assert_eq!(str_attr(&mut heap, &bound, "__name__"), "area");
    assert_eq!(str_attr(&mut heap, &bound, "__qualname__"), "Shape.area");
    assert_eq!(str_attr(&mut heap, &bound, "__doc__"), "Area of the shape.");

    heap.set_attr(&shapes.area, "tag", Value::Int(7)).unwrap();
    let tag = heap.get_attr(&bound, "tag").unwrap();
    assert!(matches!(tag, Value::Int(7)));

    let msg = expect_exc(heap.get_attr(&bound, "nope"), ExcType::AttributeError);
    assert_eq!(msg, "'function' object has no attribute 'nope'");
}

/// A function without a docstring reports `None` for `__doc__`.
#[test]
fn missing_doc_is_none() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let init = heap.get_attr(&shapes.shape, "__init__").unwrap();
    let doc = heap.get_attr(&init, "__doc__").unwrap();
    assert!(doc.is_none());
}

/// Methods are read-only.
#[test]
fn set_attr_on_method_fails() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);
    let obj = shapes.new_shape(&mut heap, 1);
    let bound = heap.get_attr(&obj, "area").unwrap();

    let msg = expect_exc(heap.set_attr(&bound, "tag", Value::Int(1)), ExcType::AttributeError);
    assert_eq!(msg, "'method' object has no attribute 'tag'");
    let msg = expect_exc(heap.set_attr(&bound, "__func__", Value::None), ExcType::AttributeError);
    assert_eq!(msg, "'method' object has no attribute '__func__'");
}

/// The function's own dunder names are read-only.
#[test]
fn function_dunders_are_read_only() {
    let mut heap = Heap::default();
    let shapes = shapes(&mut heap);

    let msg = expect_exc(heap.set_attr(&shapes.area, "__name__", Value::None), ExcType::AttributeError);
    assert_eq!(msg, "attribute '__name__' of 'function' objects is not writable");
}
