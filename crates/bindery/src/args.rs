use smallvec::SmallVec;

use crate::{
    exception::{ExcType, RunResult},
    heap::{DropWithHeap, Heap},
    value::Value,
};

/// Ordered keyword arguments.
pub type KwargsValues = Vec<(String, Value)>;

/// Arguments of a call: positional values plus ordered keyword pairs.
///
/// Owns every value it holds. Consumers either take the values out or release
/// them with `drop_with_heap`. Most calls pass at most three positional
/// arguments, so those are stored inline.
#[derive(Debug, Default)]
pub struct ArgValues {
    args: SmallVec<[Value; 3]>,
    kwargs: KwargsValues,
}

impl ArgValues {
    #[must_use]
    pub fn new(args: impl IntoIterator<Item = Value>, kwargs: KwargsValues) -> Self {
        Self {
            args: args.into_iter().collect(),
            kwargs,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn one(arg: Value) -> Self {
        Self::positional([arg])
    }

    #[must_use]
    pub fn two(first: Value, second: Value) -> Self {
        Self::positional([first, second])
    }

    #[must_use]
    pub fn positional(args: impl IntoIterator<Item = Value>) -> Self {
        Self::new(args, Vec::new())
    }

    /// Adds a keyword argument.
    #[must_use]
    pub fn with_kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.push((name.into(), value));
        self
    }

    /// Total number of arguments, positional and keyword.
    #[must_use]
    pub fn count(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Value> {
        self.args.first()
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    #[must_use]
    pub fn kwargs(&self) -> &[(String, Value)] {
        &self.kwargs
    }

    /// Inserts `value` as the first positional argument.
    pub fn prepend(&mut self, value: Value) {
        self.args.insert(0, value);
    }

    /// Splits into positional values and keyword pairs.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Value>, KwargsValues) {
        (self.args.into_vec(), self.kwargs)
    }

    /// Checks that no keyword arguments were passed.
    ///
    /// On error, properly drops all contained values to maintain reference counts.
    pub fn check_no_kwargs(self, name: &str, heap: &mut Heap) -> RunResult<Self> {
        if self.kwargs.is_empty() {
            Ok(self)
        } else {
            self.drop_with_heap(heap);
            Err(ExcType::type_error_no_kwargs(name))
        }
    }

    /// Checks that zero or one positional arguments (and no keywords) were passed.
    ///
    /// On error, properly drops all contained values to maintain reference counts.
    pub fn get_zero_one_arg(self, name: &str, heap: &mut Heap) -> RunResult<Option<Value>> {
        let this = self.check_no_kwargs(name, heap)?;
        let (args, _) = this.into_parts();
        match args.len() {
            0 | 1 => Ok(args.into_iter().next()),
            count => {
                args.drop_with_heap(heap);
                Err(ExcType::type_error(format!(
                    "{name}() takes at most 1 argument ({count} given)"
                )))
            }
        }
    }

    /// Checks that exactly one positional argument (and no keywords) was passed, returning it.
    ///
    /// On error, properly drops all contained values to maintain reference counts.
    pub fn get_one_arg(self, name: &str, heap: &mut Heap) -> RunResult<Value> {
        let count = self.count();
        let (mut args, kwargs) = self.into_parts();
        if count == 1
            && let Some(value) = args.pop()
        {
            return Ok(value);
        }
        args.drop_with_heap(heap);
        kwargs.drop_with_heap(heap);
        Err(ExcType::type_error(format!(
            "{name}() takes exactly one argument ({count} given)"
        )))
    }
}

impl DropWithHeap for ArgValues {
    fn drop_with_heap(self, heap: &mut Heap) {
        for value in self.args {
            value.drop_with_heap(heap);
        }
        self.kwargs.drop_with_heap(heap);
    }
}
