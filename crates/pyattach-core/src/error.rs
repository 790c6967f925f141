use crate::runtime::EntryPoint;

/// An error that can occur while attaching to a runtime.
#[derive(thiserror::Error, Debug)]
pub enum AttachError {
    /// The image looks like the runtime but does not export the
    /// initialization-state query.
    #[error("Detection entry point not found")]
    DetectionEntryPointMissing,

    /// The runtime reports that it has not been initialized.
    #[error("Runtime reports that it is not initialized")]
    RuntimeNotInitialized,

    /// One or more entry points required by the version family are missing.
    #[error("Missing required entry points: {0:?}")]
    MissingEntryPoints(MissingEntryPoints),

    /// The runtime is loaded but has no interpreter state.
    #[error("Interpreter state not present")]
    InterpreterStateAbsent,

    /// The runtime version could not be classified.
    #[error("Unknown runtime version")]
    UnknownVersion,

    /// The threading subsystem did not come up within the time bound.
    #[error("Operation timed out")]
    Timeout,

    /// No loaded image matched the runtime naming and export rules.
    #[error("No runtime image found in the current process")]
    RuntimeNotFound,

    /// The injected source could not be compiled.
    #[error("Injection failed: {0}")]
    InjectionFailed(&'static str),

    /// An OS-specific error occurred.
    #[error(transparent)]
    Os(Box<dyn std::error::Error>),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(&'static str),
}

/// A collection of missing entry points.
pub type MissingEntryPoints = smallvec::SmallVec<[EntryPoint; 4]>;

impl AttachError {
    /// Creates a new missing-entry-point error.
    pub fn missing(entry_points: impl IntoIterator<Item = EntryPoint>) -> Self {
        Self::MissingEntryPoints(entry_points.into_iter().collect())
    }

    /// Returns the code reported through the C interface for errors that
    /// happen before any candidate runtime produced an outcome.
    ///
    /// Attach-level errors map to their positive [`AttachOutcome`] code.
    ///
    /// [`AttachOutcome`]: crate::AttachOutcome
    pub fn code(&self) -> i32 {
        match crate::AttachOutcome::from_error(self) {
            Some(outcome) => outcome.code(),
            None => match self {
                Self::RuntimeNotFound => -10,
                Self::Io(_) => -3,
                _ => -2,
            },
        }
    }
}
