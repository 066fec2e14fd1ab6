use std::{
    borrow::Cow,
    fmt::{self, Display},
};

use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Python exception types raised by the object model.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `TypeError` -> "TypeError").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
pub enum ExcType {
    /// primary exception class - matches any exception in isinstance checks.
    Exception,

    // --- RuntimeError hierarchy ---
    RuntimeError,
    /// Subclass of RuntimeError.
    RecursionError,

    AttributeError,
    ValueError,
    MemoryError,
    TypeError,
}

impl ExcType {
    /// Checks if this exception type is a subclass of another exception type.
    ///
    /// Returns true if `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        if self == handler_type {
            return true;
        }
        match handler_type {
            Self::Exception => true,
            Self::RuntimeError => matches!(self, Self::RecursionError),
            _ => false,
        }
    }

    /// Creates a TypeError with the given message.
    #[must_use]
    pub(crate) fn type_error(msg: impl Display) -> RunError {
        SimpleException::new_msg(Self::TypeError, msg).into()
    }

    /// Creates an AttributeError for a missing attribute.
    ///
    /// Matches CPython's format: `'type' object has no attribute 'attr'`.
    #[must_use]
    pub(crate) fn attribute_error(type_name: impl Display, attr: &str) -> RunError {
        SimpleException::new_msg(
            Self::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
        .into()
    }

    /// Creates an AttributeError for assigning a read-only attribute.
    #[must_use]
    pub(crate) fn readonly_attribute(type_name: impl Display, attr: &str) -> RunError {
        SimpleException::new_msg(
            Self::AttributeError,
            format!("attribute '{attr}' of '{type_name}' objects is not writable"),
        )
        .into()
    }

    /// Creates an AttributeError for a missing class attribute.
    ///
    /// Matches CPython's format: `type object 'C' has no attribute 'attr'`.
    #[must_use]
    pub(crate) fn attribute_error_type(class_name: &str, attr: &str) -> RunError {
        SimpleException::new_msg(
            Self::AttributeError,
            format!("type object '{class_name}' has no attribute '{attr}'"),
        )
        .into()
    }

    /// Creates a TypeError for calling a value that is not callable.
    #[must_use]
    pub(crate) fn type_error_not_callable(type_name: impl Display) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    /// Creates a TypeError for values that cannot be hashed.
    #[must_use]
    pub(crate) fn type_error_unhashable(type_name: impl Display) -> RunError {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    /// Creates a TypeError for an ordering comparison between unorderable values.
    #[must_use]
    pub(crate) fn type_error_not_orderable(left: impl Display, right: impl Display) -> RunError {
        Self::type_error(format!(
            "'<' not supported between instances of '{left}' and '{right}'"
        ))
    }

    /// Creates a TypeError for a function that rejects keyword arguments.
    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        Self::type_error(format!("{name}() takes no keyword arguments"))
    }

    /// Creates a TypeError for an argument-count mismatch on a fixed-range signature.
    ///
    /// Matches CPython's `PyArg_UnpackTuple` format: `name expected at least 2 arguments, got 1`.
    #[must_use]
    pub(crate) fn type_error_arg_range(name: &str, min: usize, max: usize, actual: usize) -> RunError {
        if actual < min {
            Self::type_error(format!("{name} expected at least {min} arguments, got {actual}"))
        } else {
            Self::type_error(format!("{name} expected at most {max} arguments, got {actual}"))
        }
    }

    /// Creates a RecursionError for exceeding the configured call depth.
    #[must_use]
    pub(crate) fn recursion_error() -> RunError {
        SimpleException::new_msg(Self::RecursionError, "maximum recursion depth exceeded").into()
    }
}

/// A raised exception: its type plus an optional message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimpleException {
    exc_type: ExcType,
    arg: Option<String>,
}

impl fmt::Display for SimpleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}: {arg}", self.exc_type),
            None => write!(f, "{}", self.exc_type),
        }
    }
}

impl SimpleException {
    #[must_use]
    pub fn new(exc_type: ExcType, arg: Option<String>) -> Self {
        Self { exc_type, arg }
    }

    #[must_use]
    pub fn new_msg(exc_type: ExcType, arg: impl fmt::Display) -> Self {
        Self {
            exc_type,
            arg: Some(arg.to_string()),
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }
}

/// Runtime error types that can occur while operating on the heap.
///
/// Two variants:
/// - `Internal`: Bug in the object model implementation (static message)
/// - `Exc`: Python exception handed back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// Internal error - indicates a bug in bindery, not in caller code.
    Internal(Cow<'static, str>),
    /// Python exception (e.g., TypeError, AttributeError).
    Exc(Box<SimpleException>),
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(msg) => write!(f, "Internal error in bindery: {msg}"),
            Self::Exc(exc) => write!(f, "{exc}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<fmt::Error> for RunError {
    fn from(_: fmt::Error) -> Self {
        Self::internal("formatting failed")
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error is an exception of `exc_type` or one of its subclasses.
    #[must_use]
    pub fn is_exception_type(&self, exc_type: ExcType) -> bool {
        match self {
            Self::Exc(exc) => exc.exc_type().is_subclass_of(exc_type),
            Self::Internal(_) => false,
        }
    }

    /// Returns the exception type, or `None` for internal errors.
    #[must_use]
    pub fn exc_type(&self) -> Option<ExcType> {
        match self {
            Self::Exc(exc) => Some(exc.exc_type()),
            Self::Internal(_) => None,
        }
    }

    /// Returns the exception message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Exc(exc) => exc.arg(),
            Self::Internal(msg) => Some(msg),
        }
    }
}
