/// An operating-system thread identifier.
///
/// Equivalent to the value returned by `GetCurrentThreadId` on Windows or
/// `gettid` on Linux.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl From<u64> for ThreadId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u32> for ThreadId {
    fn from(value: u32) -> Self {
        Self(u64::from(value))
    }
}

impl From<ThreadId> for u64 {
    fn from(value: ThreadId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
