#![doc = include_str!("../../../README.md")]
mod args;
mod attr;
mod call;
mod config;
mod copy;
mod exception;
mod heap;
mod pool;
mod resource;
mod types;
mod value;

pub use crate::{
    args::{ArgValues, KwargsValues},
    config::{HeapConfig, MethodReprStyle},
    copy::DeepCopyMemo,
    exception::{ExcType, RunError, RunResult, SimpleException},
    heap::{DropWithHeap, Heap, HeapId, HeapStats},
    pool::DEFAULT_METHOD_FREE_LIST_CAPACITY,
    resource::{DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, MAX_DATA_RECURSION_DEPTH, ResourceError, ResourceLimits},
    types::{FunctionDef, Method, NativeFn, Type},
    value::Value,
};
