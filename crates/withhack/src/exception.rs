use std::{borrow::Cow, fmt};

use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Exception types understood by the VM.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError"),
/// which is also the name scripts use to refer to the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    /// Root of the hierarchy.
    BaseException,
    /// Matches every ordinary exception in `except` clauses.
    Exception,

    // --- ArithmeticError hierarchy ---
    ArithmeticError,
    ZeroDivisionError,

    // --- LookupError hierarchy ---
    LookupError,
    KeyError,
    IndexError,

    AttributeError,
    NameError,
    /// Subclass of NameError, raised when a local slot is read before assignment.
    UnboundLocalError,
    TypeError,
    ValueError,
    StopIteration,
    SyntaxError,

    // --- RuntimeError hierarchy ---
    RuntimeError,
    NotImplementedError,
    RecursionError,

    /// Raised for violated interpreter invariants (malformed bytecode and the like).
    SystemError,

    /// Sentinel raised through a frame's trace hook to leave a with-block
    /// before its body runs.
    ///
    /// Derives directly from `BaseException` so `except Exception` never sees it,
    /// and it is not registered as a builtin name.
    #[strum(serialize = "BlockSkip")]
    BlockSkip,
}

impl ExcType {
    /// Exception types exposed to scripts as builtin names.
    pub const BUILTIN: &'static [Self] = &[
        Self::BaseException,
        Self::Exception,
        Self::ArithmeticError,
        Self::ZeroDivisionError,
        Self::LookupError,
        Self::KeyError,
        Self::IndexError,
        Self::AttributeError,
        Self::NameError,
        Self::UnboundLocalError,
        Self::TypeError,
        Self::ValueError,
        Self::StopIteration,
        Self::SyntaxError,
        Self::RuntimeError,
        Self::NotImplementedError,
        Self::RecursionError,
        Self::SystemError,
    ];

    /// Returns the direct base class, `None` for `BaseException`.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::Exception | Self::BlockSkip => Some(Self::BaseException),
            Self::ZeroDivisionError => Some(Self::ArithmeticError),
            Self::KeyError | Self::IndexError => Some(Self::LookupError),
            Self::UnboundLocalError => Some(Self::NameError),
            Self::NotImplementedError | Self::RecursionError => Some(Self::RuntimeError),
            Self::ArithmeticError
            | Self::LookupError
            | Self::AttributeError
            | Self::NameError
            | Self::TypeError
            | Self::ValueError
            | Self::StopIteration
            | Self::SyntaxError
            | Self::RuntimeError
            | Self::SystemError => Some(Self::Exception),
        }
    }

    /// Checks whether `self` is `other` or derives from it.
    #[must_use]
    pub fn is_subclass_of(self, other: Self) -> bool {
        let mut current = Some(self);
        while let Some(t) = current {
            if t == other {
                return true;
            }
            current = t.parent();
        }
        false
    }

    /// Builds a `RunError` of this type with the given message.
    #[must_use]
    pub fn err(self, msg: impl Into<String>) -> RunError {
        RunError::Exc(Exception::new(self, msg))
    }
}

/// An exception instance: a type plus an optional message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    exc_type: ExcType,
    message: Option<String>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: ExcType, message: impl Into<String>) -> Self {
        Self {
            exc_type,
            message: Some(message.into()),
        }
    }

    /// Creates an exception without a message, as `raise ValueError` would.
    #[must_use]
    pub fn bare(exc_type: ExcType) -> Self {
        Self {
            exc_type,
            message: None,
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn is_block_skip(&self) -> bool {
        self.exc_type == ExcType::BlockSkip
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) if !msg.is_empty() => write!(f, "{}: {msg}", self.exc_type),
            _ => write!(f, "{}", self.exc_type),
        }
    }
}

impl std::error::Error for Exception {}

/// Error produced while running bytecode.
///
/// `Exc` is an ordinary exception that scripts can catch. `Internal` marks a
/// bug in the VM itself and is never routed to `except` handlers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error("{0}")]
    Exc(Exception),
    #[error("internal error: {0}")]
    Internal(Cow<'static, str>),
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the exception if this error is catchable.
    #[must_use]
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Exc(exc) => Some(exc),
            Self::Internal(_) => None,
        }
    }

    /// Checks whether this is a catchable exception of (a subclass of) `exc_type`.
    #[must_use]
    pub fn is(&self, exc_type: ExcType) -> bool {
        self.exception().is_some_and(|exc| exc.exc_type().is_subclass_of(exc_type))
    }
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        Self::Exc(exc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_walks_to_base() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::KeyError.is_subclass_of(ExcType::AttributeError));
        assert!(!ExcType::BlockSkip.is_subclass_of(ExcType::Exception));
        assert!(ExcType::BlockSkip.is_subclass_of(ExcType::BaseException));
    }

    #[test]
    fn names_round_trip_through_strum() {
        let parsed: ExcType = "ZeroDivisionError".parse().unwrap();
        assert_eq!(parsed, ExcType::ZeroDivisionError);
        assert_eq!(Exception::new(ExcType::ValueError, "bad").to_string(), "ValueError: bad");
        assert_eq!(Exception::bare(ExcType::KeyError).to_string(), "KeyError");
    }
}
