/// Type definitions for heap-allocated runtime values.
///
/// Each family wraps its data in a struct that implements `PyTrait`; `HeapData`
/// dispatches to these implementations per variant.
pub mod class;
pub mod function;
pub mod list;
pub mod method;
pub mod str;
pub mod tuple;
pub mod weakref;

use std::fmt;

pub(crate) use class::{ClassObject, Instance};
pub(crate) use function::Function;
pub use function::{FunctionDef, NativeFn};
pub(crate) use list::List;
pub use method::Method;
pub(crate) use str::Str;
pub(crate) use tuple::Tuple;
pub(crate) use weakref::WeakRef;

use crate::heap::HeapId;

/// Runtime type tag of a value.
///
/// Instances of user classes report `Instance`; their display name is the
/// class name and comes from [`Heap::type_name`](crate::Heap::type_name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Type {
    NoneType,
    Bool,
    Int,
    Str,
    List,
    Tuple,
    Function,
    /// A class object.
    Type,
    Instance,
    WeakRef,
    Method,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoneType => f.write_str("NoneType"),
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Str => f.write_str("str"),
            Self::List => f.write_str("list"),
            Self::Tuple => f.write_str("tuple"),
            Self::Function => f.write_str("function"),
            Self::Type => f.write_str("type"),
            Self::Instance => f.write_str("object"),
            Self::WeakRef => f.write_str("weakref"),
            Self::Method => f.write_str("method"),
        }
    }
}

/// Common behaviour of heap-allocated value families.
///
/// Operations that may run user code (equality, repr, hashing of instances)
/// need `&mut Heap` while the value itself lives inside the heap, so they are
/// implemented on `Heap` keyed by `HeapId` instead of here.
pub(crate) trait PyTrait {
    fn py_type(&self) -> Type;

    /// Approximate size in bytes, reported to the resource tracker.
    fn py_estimate_size(&self) -> usize;

    /// Pushes the id of every strong reference this value owns onto `stack`.
    ///
    /// Called exactly once, when the value is freed. The caller takes over the
    /// references and releases them.
    fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>);

    /// Visits every strong reference this value owns, one call per reference.
    ///
    /// Must report the same multiset of ids as `py_dec_ref_ids`, since the cycle
    /// collector subtracts these visits from reference counts.
    fn py_traverse(&self, visit: &mut impl FnMut(HeapId));
}
