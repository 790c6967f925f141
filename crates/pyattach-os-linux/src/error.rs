/// Error type for the Linux driver.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A system call failed.
    #[error("{call} failed: {source}")]
    Sys {
        /// The failing call.
        call: &'static str,

        /// The error reported through `errno`.
        source: std::io::Error,
    },

    /// The parking signal handler could not be installed.
    #[error("parking signal handler not installed: {0}")]
    Handler(i32),
}

impl Error {
    /// Creates an error from the calling thread's `errno`.
    pub(crate) fn last(call: &'static str) -> Self {
        Self::Sys {
            call,
            source: std::io::Error::last_os_error(),
        }
    }
}

impl From<Error> for pyattach_core::AttachError {
    fn from(value: Error) -> Self {
        Self::Os(Box::new(value))
    }
}
