/// Error type for the Windows driver.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A Win32 call failed.
    #[error("{call} failed with error {code:#x}")]
    Win32 {
        /// The failing call.
        call: &'static str,

        /// The value of `GetLastError`.
        code: u32,
    },

    /// The PE headers of a loaded module are malformed.
    #[error("malformed PE image: {0}")]
    Pe(&'static str),
}

impl Error {
    /// Creates an error from the calling thread's last-error value.
    pub(crate) fn last(call: &'static str) -> Self {
        let code = unsafe { windows_sys::Win32::Foundation::GetLastError() };
        Self::Win32 { call, code }
    }
}

impl From<Error> for pyattach_core::AttachError {
    fn from(value: Error) -> Self {
        Self::Os(Box::new(value))
    }
}
