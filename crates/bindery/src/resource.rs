use std::fmt;

use crate::exception::{ExcType, RunError, SimpleException};

/// Recommended maximum recursion depth if not otherwise specified.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Maximum recursion depth for data structure operations (repr, eq, hash, deep copy).
///
/// Separate from the function call depth limit. This protects against stack overflow
/// when traversing deeply nested structures like `a = []; for _ in range(1000): a = [a]`.
pub const MAX_DATA_RECURSION_DEPTH: usize = 200;

/// Error returned when a resource limit is exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, used: usize },
    /// Maximum recursion depth exceeded.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Memory { limit, used } => {
                write!(f, "memory limit exceeded: {used} bytes > {limit} bytes")
            }
            Self::Recursion { .. } => {
                write!(f, "maximum recursion depth exceeded")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<ResourceError> for RunError {
    /// Maps resource error types to Python exception types:
    /// - `Allocation` → `MemoryError`
    /// - `Memory` → `MemoryError`
    /// - `Recursion` → `RecursionError`
    fn from(err: ResourceError) -> Self {
        let exc_type = match err {
            ResourceError::Allocation { .. } | ResourceError::Memory { .. } => ExcType::MemoryError,
            ResourceError::Recursion { .. } => ExcType::RecursionError,
        };
        SimpleException::new_msg(exc_type, err).into()
    }
}

/// Configuration for resource limits.
///
/// All limits are optional - set to `None` to disable a specific limit.
/// Use `ResourceLimits::default()` for no limits, or build custom limits
/// with the builder pattern.
///
/// Fields missing from a serialized document take their values from
/// [`ResourceLimits::new`], so the recursion limit stays on unless disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default = "ResourceLimits::new")]
pub struct ResourceLimits {
    /// Maximum number of heap allocations allowed.
    pub max_allocations: Option<usize>,
    /// Maximum heap memory in bytes (approximate).
    pub max_memory: Option<usize>,
    /// Run cycle collection every N container allocations.
    pub gc_interval: Option<usize>,
    /// Maximum recursion depth (function call depth).
    pub max_recursion_depth: Option<usize>,
}

impl ResourceLimits {
    /// Creates a new ResourceLimits with all limits disabled, except max recursion which is set to 1000.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            ..Default::default()
        }
    }

    /// Sets the maximum number of allocations.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    /// Sets the maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Sets the cycle collection interval (run GC every N container allocations).
    #[must_use]
    pub fn gc_interval(mut self, interval: usize) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    /// Sets the maximum recursion depth.
    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }
}

/// Tracks allocations and memory against a set of [`ResourceLimits`].
///
/// Owned by the heap. Every arena allocation reports to `on_allocate` first and
/// every freed entry reports to `on_free`, so `current_memory` follows the live
/// set rather than the allocation history.
#[derive(Debug, Clone)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    /// Total number of allocations made.
    allocation_count: usize,
    /// Current approximate memory usage in bytes.
    current_memory: usize,
}

impl LimitedTracker {
    /// Creates a new LimitedTracker with the given limits.
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocation_count: 0,
            current_memory: 0,
        }
    }

    /// Called before each heap allocation.
    ///
    /// Returns `Ok(())` if the allocation should proceed, or `Err(ResourceError)`
    /// if a limit would be exceeded. Nothing is recorded for a refused allocation.
    pub fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_allocations
            && self.allocation_count >= limit
        {
            return Err(ResourceError::Allocation {
                limit,
                count: self.allocation_count + 1,
            });
        }

        let size = get_size();
        if let Some(limit) = self.limits.max_memory {
            let used = self.current_memory + size;
            if used > limit {
                return Err(ResourceError::Memory { limit, used });
            }
        }

        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    /// Called when memory is freed (during dec_ref or cycle collection).
    pub fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    /// Called before entering a new call frame to check recursion depth.
    ///
    /// # Arguments
    /// * `current_depth` - Current call depth (before the new frame is entered)
    pub fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_recursion_depth
            && current_depth >= limit
        {
            return Err(ResourceError::Recursion {
                limit,
                depth: current_depth + 1,
            });
        }
        Ok(())
    }

    /// Returns true when a cycle collection is due after `allocations_since_gc` container allocations.
    #[must_use]
    pub fn should_gc(&self, allocations_since_gc: usize) -> bool {
        self.limits
            .gc_interval
            .is_some_and(|interval| interval > 0 && allocations_since_gc >= interval)
    }

    /// Returns the total number of allocations tracked.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// Returns the current approximate memory usage in bytes.
    #[must_use]
    pub fn current_memory_bytes(&self) -> usize {
        self.current_memory
    }
}
