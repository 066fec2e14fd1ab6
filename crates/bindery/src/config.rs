//! Heap configuration.
//!
//! [`HeapConfig`] is plain data so hosts can build it in code or load it from
//! any serde format. Every field has a default, so a partial document such as
//! `{"method_repr": "qualified_name"}` is a valid configuration.

use crate::{pool::DEFAULT_METHOD_FREE_LIST_CAPACITY, resource::ResourceLimits};

/// Selects the literal format produced by `repr()` of a method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodReprStyle {
    /// `<bound method Owner.name of receiver>` and `<unbound method Owner.name>`.
    #[default]
    ClassQualified,
    /// `<bound method qualname of receiver>` and `<unbound method qualname>`.
    ///
    /// The function's qualified name replaces the owner class name.
    QualifiedName,
}

/// Configuration for a [`Heap`](crate::Heap).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Maximum number of destroyed method slots kept for reuse.
    pub method_free_list_capacity: usize,
    /// Format used by method `repr()`.
    pub method_repr: MethodReprStyle,
    /// Allocation, memory, GC and recursion limits.
    pub limits: ResourceLimits,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            method_free_list_capacity: DEFAULT_METHOD_FREE_LIST_CAPACITY,
            method_repr: MethodReprStyle::default(),
            limits: ResourceLimits::new(),
        }
    }
}

impl HeapConfig {
    /// Sets the method free list capacity.
    #[must_use]
    pub fn method_free_list_capacity(mut self, capacity: usize) -> Self {
        self.method_free_list_capacity = capacity;
        self
    }

    /// Sets the method repr style.
    #[must_use]
    pub fn method_repr(mut self, style: MethodReprStyle) -> Self {
        self.method_repr = style;
        self
    }

    /// Sets the resource limits.
    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}
