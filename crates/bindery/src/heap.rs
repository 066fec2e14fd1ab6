use std::{cell::Cell, collections::BTreeMap, vec};

use crate::{
    args::ArgValues,
    config::{HeapConfig, MethodReprStyle},
    exception::RunError,
    pool::MethodFreeList,
    resource::{LimitedTracker, ResourceError},
    types::{ClassObject, Function, Instance, List, Method, PyTrait, Str, Tuple, Type, WeakRef},
    value::Value,
};

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_type` map uses `BTreeMap` for deterministic iteration order,
/// making snapshots suitable for display and comparison without sort overhead.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of slots on the general free list.
    pub free_slots: usize,
    /// Number of destroyed method slots held by the method free list.
    pub method_free_slots: usize,
    /// Total heap capacity (live + free + pooled).
    pub total_slots: usize,
    /// Breakdown of live objects by `HeapData` variant name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Total allocations recorded by the resource tracker.
    pub allocations: usize,
    /// Approximate memory held by live objects, in bytes.
    pub memory_bytes: usize,
}

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(usize);

impl HeapId {
    #[inline]
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// HeapData captures every runtime value that must live in the arena.
///
/// Each variant wraps a type that implements `PyTrait`. The trait is manually
/// dispatched to the appropriate variant's implementation.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(Str),
    List(List),
    Tuple(Tuple),
    Function(Function),
    ClassObject(ClassObject),
    Instance(Instance),
    WeakRef(WeakRef),
    Method(Method),
}

impl HeapData {
    /// Returns the variant name, used as the key in `HeapStats::objects_by_type`.
    fn variant_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::List(_) => "List",
            Self::Tuple(_) => "Tuple",
            Self::Function(_) => "Function",
            Self::ClassObject(_) => "ClassObject",
            Self::Instance(_) => "Instance",
            Self::WeakRef(_) => "WeakRef",
            Self::Method(_) => "Method",
        }
    }

    /// Whether allocations of this type count toward the cycle collection interval.
    ///
    /// Only containers that can hold references can take part in a cycle.
    fn is_gc_tracked(&self) -> bool {
        !matches!(self, Self::Str(_))
    }

    /// The target of a weak reference that has not been cleared yet.
    fn weakref_target(&self) -> Option<HeapId> {
        match self {
            Self::WeakRef(wr) => wr.target(),
            _ => None,
        }
    }

    /// Detaches the weak references registered against this value.
    fn take_weakrefs(&mut self) -> Vec<HeapId> {
        match self {
            Self::Instance(inst) => inst.take_weakrefs(),
            Self::Method(method) => method.take_weakrefs(),
            _ => Vec::new(),
        }
    }
}

impl PyTrait for HeapData {
    fn py_type(&self) -> Type {
        match self {
            Self::Str(s) => s.py_type(),
            Self::List(l) => l.py_type(),
            Self::Tuple(t) => t.py_type(),
            Self::Function(f) => f.py_type(),
            Self::ClassObject(c) => c.py_type(),
            Self::Instance(i) => i.py_type(),
            Self::WeakRef(w) => w.py_type(),
            Self::Method(m) => m.py_type(),
        }
    }

    fn py_estimate_size(&self) -> usize {
        match self {
            Self::Str(s) => s.py_estimate_size(),
            Self::List(l) => l.py_estimate_size(),
            Self::Tuple(t) => t.py_estimate_size(),
            Self::Function(f) => f.py_estimate_size(),
            Self::ClassObject(c) => c.py_estimate_size(),
            Self::Instance(i) => i.py_estimate_size(),
            Self::WeakRef(w) => w.py_estimate_size(),
            Self::Method(m) => m.py_estimate_size(),
        }
    }

    fn py_dec_ref_ids(&mut self, stack: &mut Vec<HeapId>) {
        match self {
            Self::Str(s) => s.py_dec_ref_ids(stack),
            Self::List(l) => l.py_dec_ref_ids(stack),
            Self::Tuple(t) => t.py_dec_ref_ids(stack),
            Self::Function(f) => f.py_dec_ref_ids(stack),
            Self::ClassObject(c) => c.py_dec_ref_ids(stack),
            Self::Instance(i) => i.py_dec_ref_ids(stack),
            Self::WeakRef(w) => w.py_dec_ref_ids(stack),
            Self::Method(m) => m.py_dec_ref_ids(stack),
        }
    }

    fn py_traverse(&self, visit: &mut impl FnMut(HeapId)) {
        match self {
            Self::Str(s) => s.py_traverse(visit),
            Self::List(l) => l.py_traverse(visit),
            Self::Tuple(t) => t.py_traverse(visit),
            Self::Function(f) => f.py_traverse(visit),
            Self::ClassObject(c) => c.py_traverse(visit),
            Self::Instance(i) => i.py_traverse(visit),
            Self::WeakRef(w) => w.py_traverse(visit),
            Self::Method(m) => m.py_traverse(visit),
        }
    }
}

/// A live arena entry: reference count plus payload.
#[derive(Debug)]
struct HeapValue {
    refcount: Cell<usize>,
    data: HeapData,
}

/// Reference-counted arena that backs all heap-only runtime values.
///
/// Uses a free list to reuse slots from freed values, keeping memory usage
/// constant for long-running loops that repeatedly allocate and free values.
/// Method slots go through a separate bounded free list (see [`MethodFreeList`])
/// so method allocation can recycle them first.
///
/// Releases are driven by an explicit work queue: a value freed while another
/// value is being torn down is queued rather than recursed into, so teardown of
/// deep structures uses constant stack.
///
/// All state, including the method free list and the function identity counter,
/// is reachable only through `&mut Heap`, which serializes every mutation.
#[derive(Debug)]
pub struct Heap {
    entries: Vec<Option<HeapValue>>,
    /// Per-slot generation counters for `id()`-style public identities.
    ///
    /// Internal heap identity (`HeapId`) uses slot indices for fast arena
    /// access. This counter tracks how many times each slot has been reused so
    /// public ids stay distinct across reuse.
    slot_id_generations: Vec<u32>,
    /// IDs of freed slots available for reuse. Populated by `dec_ref`, consumed by `allocate`.
    free_list: Vec<HeapId>,
    /// Bounded pool of slots previously occupied by methods.
    method_free_list: MethodFreeList,
    /// Resource tracker for enforcing limits and scheduling GC.
    tracker: LimitedTracker,
    method_repr: MethodReprStyle,
    /// Next stable identity counter handed to a new function.
    next_function_counter: u64,
    /// Pending reference releases.
    release_queue: Vec<HeapId>,
    /// True while `release_queue` is being drained.
    releasing: bool,
    /// Current native call depth.
    call_depth: usize,
    /// Number of GC-tracked allocations since the last cycle collection.
    allocations_since_gc: usize,
    /// Errors raised where no caller could receive them (e.g. weakref callbacks during teardown).
    unraisable: Vec<RunError>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

impl Heap {
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        Self {
            entries: Vec::new(),
            slot_id_generations: Vec::new(),
            free_list: Vec::new(),
            method_free_list: MethodFreeList::new(config.method_free_list_capacity),
            tracker: LimitedTracker::new(config.limits),
            method_repr: config.method_repr,
            next_function_counter: 1,
            release_queue: Vec::new(),
            releasing: false,
            call_depth: 0,
            allocations_since_gc: 0,
            unraisable: Vec::new(),
        }
    }

    /// Returns the configured method repr style.
    #[must_use]
    pub fn method_repr_style(&self) -> MethodReprStyle {
        self.method_repr
    }

    /// Hands out the next function identity counter.
    pub(crate) fn next_function_counter(&mut self) -> u64 {
        let counter = self.next_function_counter;
        self.next_function_counter += 1;
        counter
    }

    /// Allocates a new heap entry.
    ///
    /// Returns `Err(ResourceError)` if allocation would exceed configured limits.
    /// Only GC-tracked types count toward the cycle collection interval.
    ///
    /// `data` owns its references: on failure they are released here.
    pub(crate) fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        let data = self.before_allocate(data)?;
        let slot = self.free_list.pop();
        Ok(self.place(data, slot))
    }

    /// Allocates a method, preferring a slot from the method free list.
    pub(crate) fn allocate_method(&mut self, method: Method) -> Result<HeapId, ResourceError> {
        let data = self.before_allocate(HeapData::Method(method))?;
        let slot = self.method_free_list.acquire().or_else(|| self.free_list.pop());
        Ok(self.place(data, slot))
    }

    fn before_allocate(&mut self, mut data: HeapData) -> Result<HeapData, ResourceError> {
        if data.is_gc_tracked() {
            self.allocations_since_gc = self.allocations_since_gc.wrapping_add(1);
            if self.tracker.should_gc(self.allocations_since_gc) {
                self.collect_cycles();
            }
        }
        match self.tracker.on_allocate(|| data.py_estimate_size()) {
            Ok(()) => Ok(data),
            Err(err) => {
                data.py_dec_ref_ids(&mut self.release_queue);
                self.drain_release_queue();
                Err(err)
            }
        }
    }

    fn place(&mut self, data: HeapData, slot: Option<HeapId>) -> HeapId {
        let entry = HeapValue {
            refcount: Cell::new(1),
            data,
        };
        if let Some(id) = slot {
            let index = id.index();
            self.slot_id_generations[index] = self.slot_id_generations[index].wrapping_add(1);
            self.entries[index] = Some(entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.slot_id_generations.push(0);
            self.entries.push(Some(entry));
            id
        }
    }

    /// Increments the reference count for an existing heap entry.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn inc_ref(&self, id: HeapId) {
        let value = self
            .entries
            .get(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_ref()
            .expect("Heap::inc_ref: object already freed");
        value.refcount.set(value.refcount.get() + 1);
    }

    /// Decrements the reference count and frees the value (plus children) once it hits zero.
    ///
    /// Children are released through the heap's work queue. A call made while the
    /// queue is already draining (from a weakref callback, say) only enqueues.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn dec_ref(&mut self, id: HeapId) {
        self.release_queue.push(id);
        self.drain_release_queue();
    }

    fn drain_release_queue(&mut self) {
        if self.releasing {
            return;
        }
        self.releasing = true;
        while let Some(id) = self.release_queue.pop() {
            self.release_one(id);
        }
        self.releasing = false;
    }

    fn release_one(&mut self, id: HeapId) {
        let value = {
            let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
            let entry = slot.as_ref().expect("Heap::dec_ref: object already freed");
            let count = entry.refcount.get();
            if count > 1 {
                entry.refcount.set(count - 1);
                return;
            }
            slot.take().expect("Heap::dec_ref: object already freed")
        };
        self.deallocate(id, value.data);
    }

    /// Tears down a value whose reference count reached zero.
    ///
    /// Order matters: weak references are invalidated first, then owned
    /// references are queued for release, then the slot is recycled.
    fn deallocate(&mut self, id: HeapId, mut data: HeapData) {
        self.tracker.on_free(|| data.py_estimate_size());

        let weakrefs = data.take_weakrefs();
        if !weakrefs.is_empty() {
            let callbacks = self.clear_weakrefs(id, weakrefs, None);
            self.run_weakref_callbacks(callbacks);
        }

        if let Some(target) = data.weakref_target() {
            self.unregister_weakref(target, id);
        }

        data.py_dec_ref_ids(&mut self.release_queue);
        let is_method = matches!(data, HeapData::Method(_));
        drop(data);
        self.recycle_slot(id, is_method);
    }

    /// Returns a freed slot to the method pool or the general free list.
    fn recycle_slot(&mut self, id: HeapId, is_method: bool) {
        if is_method {
            if let Some(id) = self.method_free_list.release(id) {
                self.free_list.push(id);
            }
        } else {
            self.free_list.push(id);
        }
    }

    /// Clears every weak reference in `weakrefs` that still targets `target`.
    ///
    /// Weak references listed in `skip` (garbage found by the cycle collector)
    /// are left alone: they are about to be freed and their callbacks must not run.
    /// Returns the callbacks to run, paired with their weakref. Each pair holds a
    /// strong reference to the weakref, so an earlier callback cannot free it.
    fn clear_weakrefs(
        &mut self,
        target: HeapId,
        weakrefs: Vec<HeapId>,
        skip: Option<&[bool]>,
    ) -> Vec<(HeapId, Value)> {
        let mut callbacks = Vec::new();
        for weakref_id in weakrefs {
            if skip.is_some_and(|garbage| garbage[weakref_id.index()]) {
                continue;
            }
            if let Some(HeapData::WeakRef(wr)) = self.get_mut_if_live(weakref_id)
                && wr.target() == Some(target)
            {
                if let Some(callback) = wr.clear() {
                    callbacks.push((weakref_id, callback));
                }
            }
        }
        for &(weakref_id, _) in &callbacks {
            self.inc_ref(weakref_id);
        }
        callbacks
    }

    /// Calls `callback(weakref)` for each pair, sending failures to the unraisable sink.
    fn run_weakref_callbacks(&mut self, callbacks: Vec<(HeapId, Value)>) {
        for (weakref_id, callback) in callbacks {
            // the argument takes over the reference from `clear_weakrefs`
            let result = self.call(&callback, ArgValues::one(Value::Ref(weakref_id)));
            callback.drop_with_heap(self);
            match result {
                Ok(value) => value.drop_with_heap(self),
                Err(err) => self.report_unraisable(err, "weakref callback"),
            }
        }
    }

    /// Records an error that has no caller to propagate to.
    ///
    /// Used for failures raised as a side effect of teardown; the error a
    /// caller may already be handling is never touched.
    pub(crate) fn report_unraisable(&mut self, err: RunError, context: &'static str) {
        tracing::warn!(error = %err, context, "exception ignored");
        self.unraisable.push(err);
    }

    /// Takes all errors recorded since the last call.
    pub fn take_unraisable(&mut self) -> Vec<RunError> {
        std::mem::take(&mut self.unraisable)
    }

    /// Returns an immutable reference to the heap data stored at the given ID.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    #[must_use]
    pub(crate) fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: object already freed")
            .data
    }

    /// Returns a mutable reference to the heap data stored at the given ID.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub(crate) fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: object already freed")
            .data
    }

    /// Returns a mutable reference to heap data if the slot is live.
    pub(crate) fn get_mut_if_live(&mut self, id: HeapId) -> Option<&mut HeapData> {
        Some(&mut self.entries.get_mut(id.index())?.as_mut()?.data)
    }

    /// Returns true if `id` refers to a live entry.
    #[must_use]
    pub(crate) fn is_live(&self, id: HeapId) -> bool {
        self.entries.get(id.index()).is_some_and(Option::is_some)
    }

    /// Returns the reference count of a heap value, or `None` for immediates.
    #[must_use]
    pub fn ref_count(&self, value: &Value) -> Option<usize> {
        match value {
            Value::Ref(id) => self
                .entries
                .get(id.index())
                .and_then(Option::as_ref)
                .map(|entry| entry.refcount.get()),
            _ => None,
        }
    }

    /// Returns a public identity for `id` that differs across slot reuse.
    #[must_use]
    pub(crate) fn public_id(&self, id: HeapId) -> usize {
        let generation = self.slot_id_generations.get(id.index()).copied().unwrap_or(0) as usize;
        ((generation << 32) | id.index()).wrapping_mul(16).wrapping_add(0x1000)
    }

    /// Enters a native call frame, enforcing the recursion limit.
    pub(crate) fn enter_call(&mut self) -> Result<(), ResourceError> {
        self.tracker.check_recursion_depth(self.call_depth)?;
        self.call_depth += 1;
        Ok(())
    }

    pub(crate) fn leave_call(&mut self) {
        self.call_depth -= 1;
    }

    /// Registers `weakref_id` as a weak back-reference of `target`.
    ///
    /// Targets that cannot be weakly referenced are ignored.
    pub(crate) fn register_weakref(&mut self, target: HeapId, weakref_id: HeapId) {
        match self.get_mut(target) {
            HeapData::Instance(inst) => inst.register_weakref(weakref_id),
            HeapData::Method(method) => method.register_weakref(weakref_id),
            _ => {}
        }
    }

    /// Removes `weakref_id` from the weak references registered against `target`.
    ///
    /// Called when a weakref dies before its target.
    fn unregister_weakref(&mut self, target: HeapId, weakref_id: HeapId) {
        match self.get_mut_if_live(target) {
            Some(HeapData::Instance(inst)) => inst.unregister_weakref(weakref_id),
            Some(HeapData::Method(method)) => method.unregister_weakref(weakref_id),
            _ => {}
        }
    }

    /// Frees unreachable reference cycles and returns how many entries were collected.
    ///
    /// No roots are needed: for every live entry the collector subtracts the
    /// references held by other heap entries (found through `py_traverse`) from
    /// its reference count. Whatever is left is held from outside the heap, so
    /// those entries are roots. Everything not reachable from a root is garbage.
    ///
    /// Weak references into the garbage are cleared. Callbacks run only for weak
    /// references that survive the collection. References from garbage into
    /// surviving entries are released normally.
    pub fn collect_cycles(&mut self) -> usize {
        if self.releasing {
            // entries with queued releases would look externally referenced
            return 0;
        }
        self.allocations_since_gc = 0;

        let len = self.entries.len();
        let mut gc_refs: Vec<usize> = self
            .entries
            .iter()
            .map(|entry| entry.as_ref().map_or(0, |v| v.refcount.get()))
            .collect();
        for entry in self.entries.iter().flatten() {
            entry.data.py_traverse(&mut |child: HeapId| {
                let refs = &mut gc_refs[child.index()];
                *refs = refs.saturating_sub(1);
            });
        }

        // Mark phase: everything reachable from an externally referenced entry survives
        let mut reachable = vec![false; len];
        let mut work_list: Vec<HeapId> = (0..len)
            .filter(|&index| self.entries[index].is_some() && gc_refs[index] > 0)
            .map(HeapId)
            .collect();
        while let Some(id) = work_list.pop() {
            let index = id.index();
            if reachable[index] {
                continue;
            }
            reachable[index] = true;
            if let Some(entry) = &self.entries[index] {
                entry.data.py_traverse(&mut |child: HeapId| {
                    if !reachable[child.index()] {
                        work_list.push(child);
                    }
                });
            }
        }

        let garbage: Vec<HeapId> = (0..len)
            .filter(|&index| self.entries[index].is_some() && !reachable[index])
            .map(HeapId)
            .collect();
        if garbage.is_empty() {
            return 0;
        }
        let mut is_garbage = vec![false; len];
        for id in &garbage {
            is_garbage[id.index()] = true;
        }

        let mut callbacks = Vec::new();
        for &id in &garbage {
            let weakrefs = self.get_mut(id).take_weakrefs();
            callbacks.extend(self.clear_weakrefs(id, weakrefs, Some(&is_garbage)));
        }

        let mut survivor_refs = Vec::new();
        for &id in &garbage {
            let Some(value) = self.entries[id.index()].take() else {
                continue;
            };
            let mut data = value.data;
            self.tracker.on_free(|| data.py_estimate_size());
            if let Some(target) = data.weakref_target() {
                self.unregister_weakref(target, id);
            }
            let mut child_ids = Vec::new();
            data.py_dec_ref_ids(&mut child_ids);
            survivor_refs.extend(child_ids.into_iter().filter(|child| !is_garbage[child.index()]));
            let is_method = matches!(data, HeapData::Method(_));
            drop(data);
            self.recycle_slot(id, is_method);
        }

        tracing::debug!(
            collected = garbage.len(),
            released = survivor_refs.len(),
            callbacks = callbacks.len(),
            "cycle collection finished"
        );

        self.release_queue.extend(survivor_refs);
        self.drain_release_queue();
        self.run_weakref_callbacks(callbacks);
        garbage.len()
    }

    /// Returns a snapshot of the current heap state.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            *objects_by_type.entry(entry.data.variant_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            method_free_slots: self.method_free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
            allocations: self.tracker.allocation_count(),
            memory_bytes: self.tracker.current_memory_bytes(),
        }
    }
}

/// Trait for types that own heap references and must release them explicitly.
///
/// A value that holds `Value::Ref` must be consumed through this trait (or have
/// its references handed to another owner); plain `drop` leaks the references.
pub trait DropWithHeap {
    /// Consume `self` and decrement reference counts for any heap-allocated values contained within.
    fn drop_with_heap(self, heap: &mut Heap);
}

impl DropWithHeap for Value {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap) {
        Self::drop_with_heap(self, heap);
    }
}

impl<U: DropWithHeap> DropWithHeap for Option<U> {
    #[inline]
    fn drop_with_heap(self, heap: &mut Heap) {
        if let Some(value) = self {
            value.drop_with_heap(heap);
        }
    }
}

impl<U: DropWithHeap> DropWithHeap for Vec<U> {
    fn drop_with_heap(self, heap: &mut Heap) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}

impl<U: DropWithHeap> DropWithHeap for vec::IntoIter<U> {
    fn drop_with_heap(self, heap: &mut Heap) {
        for value in self {
            value.drop_with_heap(heap);
        }
    }
}

impl DropWithHeap for (String, Value) {
    fn drop_with_heap(self, heap: &mut Heap) {
        self.1.drop_with_heap(heap);
    }
}
