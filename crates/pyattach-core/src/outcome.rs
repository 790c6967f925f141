use crate::AttachError;

/// The result of one attach attempt, as reported through the C interface.
///
/// The numeric value doubles as a specificity rank: when several candidate
/// runtimes fail, the numerically highest outcome is the most diagnostic
/// one and is the one reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum AttachOutcome {
    /// The runtime was attached and control was handed to the injected code.
    Success = 0,

    /// `Py_IsInitialized` is not exported.
    DetectionEntryPointMissing = 1,

    /// `Py_IsInitialized` returned false.
    RuntimeNotInitialized = 2,

    /// A required entry point could not be resolved.
    RequiredEntryPointMissing = 3,

    /// The interpreter state list is empty.
    InterpreterStateAbsent = 4,

    /// The runtime version could not be classified.
    UnknownVersion = 5,

    /// The threading subsystem did not come up in time.
    Timeout = 6,
}

impl AttachOutcome {
    /// Returns the numeric code of the outcome.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Checks whether the outcome is a success.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Maps an attach-level error onto its outcome.
    ///
    /// Returns `None` for local failures (OS errors, I/O errors) which are
    /// not part of the outcome set.
    pub fn from_error(err: &AttachError) -> Option<Self> {
        match err {
            AttachError::DetectionEntryPointMissing => Some(Self::DetectionEntryPointMissing),
            AttachError::RuntimeNotInitialized => Some(Self::RuntimeNotInitialized),
            AttachError::MissingEntryPoints(_) => Some(Self::RequiredEntryPointMissing),
            AttachError::InterpreterStateAbsent => Some(Self::InterpreterStateAbsent),
            AttachError::UnknownVersion => Some(Self::UnknownVersion),
            AttachError::Timeout => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttachOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::DetectionEntryPointMissing => "Py_IsInitialized not found",
            Self::RuntimeNotInitialized => "Py_IsInitialized returned false",
            Self::RequiredEntryPointMissing => "missing Python API",
            Self::InterpreterStateAbsent => "interpreter not initialized",
            Self::UnknownVersion => "Python version unknown",
            Self::Timeout => "connect timeout",
        };

        write!(f, "{text} ({})", self.code())
    }
}
