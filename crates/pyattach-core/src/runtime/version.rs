use super::Manifest;

/// Closed classification of the API/ABI revision of a runtime.
///
/// The family decides which entry-point names are looked up and which
/// strategy is used to bring the threading subsystem online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VersionFamily {
    /// Python 2.6 and older.
    Pre27,

    /// Python 2.7 and 3.1.
    Py27To31,

    /// Python 3.0.
    Py30,

    /// Python 3.2.
    Py32,

    /// Python 3.3.
    Py33,

    /// Python 3.4 and newer.
    Py34Plus,
}

/// Version-discriminating exports, most specific first.
///
/// The first export that resolves decides the family. Later entries are
/// also present in newer runtimes, so the order is significant.
const PROBES: &[(&str, VersionFamily)] = &[
    ("PyGILState_Check", VersionFamily::Py34Plus),
    ("PyUnicode_AsUTF8", VersionFamily::Py33),
    ("_PyEval_SetSwitchInterval", VersionFamily::Py32),
    ("PyCapsule_New", VersionFamily::Py27To31),
    ("PyBytes_FromString", VersionFamily::Py30),
    ("PyString_FromString", VersionFamily::Pre27),
];

impl VersionFamily {
    /// Classifies a runtime by probing its exports.
    ///
    /// Returns `None` if no discriminating export resolves.
    pub fn probe(mut exists: impl FnMut(&str) -> bool) -> Option<Self> {
        PROBES
            .iter()
            .find(|(name, _)| exists(name))
            .map(|&(_, family)| family)
    }

    /// Returns the entry-point manifest of the family.
    pub fn manifest(self) -> Manifest {
        Manifest::new(self)
    }

    /// Checks whether `Py_AddPendingCall` may be called concurrently with
    /// other threads registering deferred calls.
    pub fn pending_call_is_thread_safe(self) -> bool {
        !matches!(self, Self::Pre27 | Self::Py30)
    }

    /// Checks whether direct initialization must be bracketed by
    /// `PyGILState_Ensure`/`PyGILState_Release`.
    ///
    /// Since 3.2 `PyEval_InitThreads` cannot be called without a thread
    /// state; older runtimes release with `PyEval_ReleaseLock` instead.
    pub fn initializes_under_gil_state(self) -> bool {
        matches!(self, Self::Py32 | Self::Py33 | Self::Py34Plus)
    }

    /// Checks whether a thread state has to be created manually before
    /// `PyGILState_Ensure` is usable on a foreign thread.
    pub fn requires_manual_thread_state(self) -> bool {
        self == Self::Py34Plus
    }

    /// Checks whether the family belongs to the 3.x line.
    pub fn is_py3(self) -> bool {
        !matches!(self, Self::Pre27 | Self::Py27To31)
    }
}

impl std::fmt::Display for VersionFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let text = match self {
            Self::Pre27 => "<2.7",
            Self::Py27To31 => "2.7-3.1",
            Self::Py30 => "3.0",
            Self::Py32 => "3.2",
            Self::Py33 => "3.3",
            Self::Py34Plus => "3.4+",
        };

        f.write_str(text)
    }
}
