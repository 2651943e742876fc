use crate::{
    bytecode::{AssembleError, DecodeError, FrameId},
    exception::{ExcType, RunError},
};

/// Failure inside the with-hack machinery.
///
/// Every variant converts into a script-visible exception, so hook callbacks
/// and hack objects can propagate it with `?`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HackError {
    #[error("name '{0}' is not defined")]
    NameNotFound(String),
    #[error("unsupported as-target: {0}")]
    UnsupportedTarget(String),
    #[error("malformed with-block: {0}")]
    MalformedBlock(String),
    #[error("hack is bound to {bound} but was entered from {found}")]
    ContextMismatch { bound: FrameId, found: FrameId },
    #[error("hack is already entered")]
    AlreadyEntered,
    #[error("the execution engine does not deliver monitoring events")]
    MonitoringUnavailable,
    #[error("frame {0} is no longer live")]
    FrameGone(FrameId),
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(#[from] AssembleError),
    #[error("undecodable code: {0}")]
    Undecodable(#[from] DecodeError),
}

impl HackError {
    /// The exception type scripts observe for this error.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        match self {
            Self::NameNotFound(_) => ExcType::NameError,
            Self::UnsupportedTarget(_) => ExcType::NotImplementedError,
            Self::MalformedBlock(_) | Self::InvalidBytecode(_) | Self::Undecodable(_) => ExcType::SystemError,
            Self::ContextMismatch { .. } | Self::AlreadyEntered | Self::MonitoringUnavailable | Self::FrameGone(_) => {
                ExcType::RuntimeError
            }
        }
    }
}

impl From<HackError> for RunError {
    fn from(err: HackError) -> Self {
        err.exc_type().err(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_surface_as_script_exceptions() {
        let err: RunError = HackError::NameNotFound("x".to_owned()).into();
        assert!(err.is(ExcType::NameError));
        assert_eq!(err.to_string(), "NameError: name 'x' is not defined");
        let err: RunError = HackError::UnsupportedTarget("StoreFast".to_owned()).into();
        assert!(err.is(ExcType::NotImplementedError));
        let err: RunError = HackError::MalformedBlock("no SetupWith".to_owned()).into();
        assert!(err.is(ExcType::SystemError));
    }
}
