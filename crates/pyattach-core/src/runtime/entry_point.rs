use super::VersionFamily;

/// A native entry point of the runtime.
///
/// The variant identifies the role of the entry point; the exported name may
/// depend on the [`VersionFamily`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryPoint {
    /// `Py_IsInitialized`.
    IsInitialized,
    /// `Py_AddPendingCall`.
    AddPendingCall,
    /// `PyInterpreterState_Head`.
    InterpreterStateHead,
    /// `PyGILState_Ensure`.
    GilStateEnsure,
    /// `PyGILState_Release`.
    GilStateRelease,
    /// `PyInterpreterState_ThreadHead`.
    InterpreterStateThreadHead,
    /// `PyEval_InitThreads`.
    EvalInitThreads,
    /// `PyEval_ReleaseLock`.
    EvalReleaseLock,
    /// `PyEval_ThreadsInitialized`.
    EvalThreadsInitialized,
    /// `PyThreadState_Next`.
    ThreadStateNext,
    /// `PyThreadState_Swap`.
    ThreadStateSwap,
    /// `Py_CompileString`.
    CompileString,
    /// `PyEval_EvalCode`.
    EvalCode,
    /// `PyDict_GetItemString`.
    DictGetItemString,
    /// `PyDict_SetItemString`.
    DictSetItemString,
    /// `PyDict_New`.
    DictNew,
    /// `PyObject_CallFunctionObjArgs`.
    CallFunctionObjArgs,
    /// `PyEval_GetBuiltins`.
    EvalGetBuiltins,
    /// `PyInt_FromLong` or `PyLong_FromLong`.
    IntFromLong,
    /// `PyString_FromString` or one of the `PyUnicode*_FromString` forms.
    StringFromString,
    /// `PyErr_Occurred`.
    ErrOccurred,
    /// `PyErr_Fetch`.
    ErrFetch,
    /// `PyErr_Restore`.
    ErrRestore,
    /// `PyErr_Print`.
    ErrPrint,
    /// `PyImport_ImportModule`.
    ImportModule,
    /// `PyObject_GetAttrString`.
    GetAttrString,
    /// `PyObject_SetAttrString`.
    SetAttrString,
    /// `_Py_NoneStruct`.
    NoneStruct,
    /// `PyThread_get_key_value`.
    ThreadGetKeyValue,
    /// `PyThread_set_key_value`.
    ThreadSetKeyValue,
    /// `PyThread_delete_key_value`.
    ThreadDeleteKeyValue,
    /// `PyRun_SimpleString`.
    RunSimpleString,
    /// `Py_DecRef`.
    DecRef,
    /// `_PyThreadState_UncheckedGet`.
    ThreadStateUncheckedGet,
    /// `PyThreadState_GetUnchecked`.
    ThreadStateGetUnchecked,
    /// `_PyThreadState_Current` (a data export, not a function).
    ThreadStateCurrent,
    /// `PyThreadState_New`.
    ThreadStateNew,
    /// `_PyEval_GetSwitchInterval`.
    GetSwitchInterval,
    /// `_PyEval_SetSwitchInterval`.
    SetSwitchInterval,
    /// `_Py_CheckInterval` (a data export, not a function).
    CheckInterval,
}

impl EntryPoint {
    /// Returns the exported names of the entry point for `family`, in
    /// lookup order.
    pub fn names(self, family: VersionFamily) -> &'static [&'static str] {
        use VersionFamily::*;

        match self {
            Self::IntFromLong => match family {
                Pre27 => &["PyInt_FromLong"],
                Py27To31 => &["PyInt_FromLong", "PyLong_FromLong"],
                Py30 | Py32 | Py33 | Py34Plus => &["PyLong_FromLong"],
            },
            Self::StringFromString => match family {
                Pre27 => &["PyString_FromString"],
                Py27To31 => &[
                    "PyString_FromString",
                    "PyUnicodeUCS2_FromString",
                    "PyUnicodeUCS4_FromString",
                ],
                Py30 | Py32 => &["PyUnicodeUCS2_FromString", "PyUnicodeUCS4_FromString"],
                Py33 | Py34Plus => &["PyUnicode_FromString"],
            },
            _ => std::slice::from_ref(self.canonical_name_ref()),
        }
    }

    /// Returns the canonical exported name of the entry point.
    pub fn canonical_name(self) -> &'static str {
        self.canonical_name_ref()
    }

    fn canonical_name_ref(self) -> &'static &'static str {
        match self {
            Self::IsInitialized => &"Py_IsInitialized",
            Self::AddPendingCall => &"Py_AddPendingCall",
            Self::InterpreterStateHead => &"PyInterpreterState_Head",
            Self::GilStateEnsure => &"PyGILState_Ensure",
            Self::GilStateRelease => &"PyGILState_Release",
            Self::InterpreterStateThreadHead => &"PyInterpreterState_ThreadHead",
            Self::EvalInitThreads => &"PyEval_InitThreads",
            Self::EvalReleaseLock => &"PyEval_ReleaseLock",
            Self::EvalThreadsInitialized => &"PyEval_ThreadsInitialized",
            Self::ThreadStateNext => &"PyThreadState_Next",
            Self::ThreadStateSwap => &"PyThreadState_Swap",
            Self::CompileString => &"Py_CompileString",
            Self::EvalCode => &"PyEval_EvalCode",
            Self::DictGetItemString => &"PyDict_GetItemString",
            Self::DictSetItemString => &"PyDict_SetItemString",
            Self::DictNew => &"PyDict_New",
            Self::CallFunctionObjArgs => &"PyObject_CallFunctionObjArgs",
            Self::EvalGetBuiltins => &"PyEval_GetBuiltins",
            Self::IntFromLong => &"PyLong_FromLong",
            Self::StringFromString => &"PyUnicode_FromString",
            Self::ErrOccurred => &"PyErr_Occurred",
            Self::ErrFetch => &"PyErr_Fetch",
            Self::ErrRestore => &"PyErr_Restore",
            Self::ErrPrint => &"PyErr_Print",
            Self::ImportModule => &"PyImport_ImportModule",
            Self::GetAttrString => &"PyObject_GetAttrString",
            Self::SetAttrString => &"PyObject_SetAttrString",
            Self::NoneStruct => &"_Py_NoneStruct",
            Self::ThreadGetKeyValue => &"PyThread_get_key_value",
            Self::ThreadSetKeyValue => &"PyThread_set_key_value",
            Self::ThreadDeleteKeyValue => &"PyThread_delete_key_value",
            Self::RunSimpleString => &"PyRun_SimpleString",
            Self::DecRef => &"Py_DecRef",
            Self::ThreadStateUncheckedGet => &"_PyThreadState_UncheckedGet",
            Self::ThreadStateGetUnchecked => &"PyThreadState_GetUnchecked",
            Self::ThreadStateCurrent => &"_PyThreadState_Current",
            Self::ThreadStateNew => &"PyThreadState_New",
            Self::GetSwitchInterval => &"_PyEval_GetSwitchInterval",
            Self::SetSwitchInterval => &"_PyEval_SetSwitchInterval",
            Self::CheckInterval => &"_Py_CheckInterval",
        }
    }
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// A requirement on the resolved entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// The entry point must resolve.
    One(EntryPoint),

    /// At least one of the alternatives must resolve. Every alternative that
    /// resolves is recorded.
    AnyOf(&'static [EntryPoint]),
}

/// Accessors of the thread state of the calling thread, newest first.
pub const CURRENT_THREAD_STATE: &[EntryPoint] = &[
    EntryPoint::ThreadStateUncheckedGet,
    EntryPoint::ThreadStateGetUnchecked,
    EntryPoint::ThreadStateCurrent,
];

const REQUIRED: &[Requirement] = &[
    Requirement::One(EntryPoint::AddPendingCall),
    Requirement::One(EntryPoint::InterpreterStateHead),
    Requirement::One(EntryPoint::GilStateEnsure),
    Requirement::One(EntryPoint::GilStateRelease),
    Requirement::One(EntryPoint::InterpreterStateThreadHead),
    Requirement::One(EntryPoint::EvalInitThreads),
    Requirement::One(EntryPoint::EvalReleaseLock),
    Requirement::One(EntryPoint::EvalThreadsInitialized),
    Requirement::One(EntryPoint::ThreadStateNext),
    Requirement::One(EntryPoint::ThreadStateSwap),
    Requirement::One(EntryPoint::CompileString),
    Requirement::One(EntryPoint::EvalCode),
    Requirement::One(EntryPoint::DictGetItemString),
    Requirement::One(EntryPoint::DictSetItemString),
    Requirement::One(EntryPoint::DictNew),
    Requirement::One(EntryPoint::CallFunctionObjArgs),
    Requirement::One(EntryPoint::EvalGetBuiltins),
    Requirement::One(EntryPoint::IntFromLong),
    Requirement::One(EntryPoint::StringFromString),
    Requirement::One(EntryPoint::ErrOccurred),
    Requirement::One(EntryPoint::ErrFetch),
    Requirement::One(EntryPoint::ErrRestore),
    Requirement::One(EntryPoint::ErrPrint),
    Requirement::One(EntryPoint::ImportModule),
    Requirement::One(EntryPoint::GetAttrString),
    Requirement::One(EntryPoint::SetAttrString),
    Requirement::One(EntryPoint::NoneStruct),
    Requirement::One(EntryPoint::ThreadGetKeyValue),
    Requirement::One(EntryPoint::ThreadSetKeyValue),
    Requirement::One(EntryPoint::ThreadDeleteKeyValue),
    Requirement::One(EntryPoint::RunSimpleString),
    Requirement::One(EntryPoint::DecRef),
    Requirement::AnyOf(CURRENT_THREAD_STATE),
];

const OPTIONAL: &[EntryPoint] = &[
    EntryPoint::ThreadStateNew,
    EntryPoint::GetSwitchInterval,
    EntryPoint::SetSwitchInterval,
    EntryPoint::CheckInterval,
];

/// The entry points a [`VersionFamily`] needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Manifest {
    family: VersionFamily,
}

impl Manifest {
    /// Creates the manifest of `family`.
    pub fn new(family: VersionFamily) -> Self {
        Self { family }
    }

    /// Returns the version family of the manifest.
    pub fn family(&self) -> VersionFamily {
        self.family
    }

    /// Returns the requirements that must hold before any thread is touched.
    pub fn required(&self) -> &'static [Requirement] {
        REQUIRED
    }

    /// Returns the entry points that are used when present.
    pub fn optional(&self) -> &'static [EntryPoint] {
        OPTIONAL
    }

    /// Returns every requirement that `resolved` does not satisfy.
    ///
    /// An unsatisfied alternative requirement reports all of its
    /// alternatives. An empty result means the set is usable.
    pub fn missing(&self, resolved: impl Fn(EntryPoint) -> bool) -> crate::MissingEntryPoints {
        let mut missing = crate::MissingEntryPoints::new();

        for requirement in self.required() {
            match *requirement {
                Requirement::One(entry_point) => {
                    if !resolved(entry_point) {
                        missing.push(entry_point);
                    }
                }
                Requirement::AnyOf(alternatives) => {
                    if !alternatives.iter().any(|&entry_point| resolved(entry_point)) {
                        missing.extend(alternatives.iter().copied());
                    }
                }
            }
        }

        missing
    }
}
