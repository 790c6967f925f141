//! Raw C declarations of the runtime entry points.
//!
//! Only the shapes needed to call through resolved addresses are declared.
//! Every object type is opaque.

#![allow(non_camel_case_types)]

use std::{
    ffi::{c_char, c_int, c_long, c_ulong, c_void},
    marker::{PhantomData, PhantomPinned},
};

macro_rules! opaque {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(C)]
        pub struct $name {
            _data: [u8; 0],
            _marker: PhantomData<(*mut u8, PhantomPinned)>,
        }
    };
}

opaque!(
    /// `PyObject`.
    PyObject
);

opaque!(
    /// `PyThreadState`.
    PyThreadState
);

opaque!(
    /// `PyInterpreterState`.
    PyInterpreterState
);

/// `PyGILState_STATE`.
pub type PyGILState_STATE = c_int;

/// `Py_file_input`, the start symbol for a sequence of statements.
pub const PY_FILE_INPUT: c_int = 257;

/// A function registered with `Py_AddPendingCall`.
pub type PendingCallFn = unsafe extern "C" fn(arg: *mut c_void) -> c_int;

pub(crate) type IsInitializedFn = unsafe extern "C" fn() -> c_int;
pub(crate) type AddPendingCallFn =
    unsafe extern "C" fn(func: PendingCallFn, arg: *mut c_void) -> c_int;
pub(crate) type InterpreterStateHeadFn = unsafe extern "C" fn() -> *mut PyInterpreterState;
pub(crate) type InterpreterStateThreadHeadFn =
    unsafe extern "C" fn(interp: *mut PyInterpreterState) -> *mut PyThreadState;
pub(crate) type ThreadStateNextFn =
    unsafe extern "C" fn(tstate: *mut PyThreadState) -> *mut PyThreadState;
pub(crate) type ThreadStateNewFn =
    unsafe extern "C" fn(interp: *mut PyInterpreterState) -> *mut PyThreadState;
pub(crate) type ThreadStateGetFn = unsafe extern "C" fn() -> *mut PyThreadState;
pub(crate) type GilStateEnsureFn = unsafe extern "C" fn() -> PyGILState_STATE;
pub(crate) type GilStateReleaseFn = unsafe extern "C" fn(state: PyGILState_STATE);
pub(crate) type VoidFn = unsafe extern "C" fn();
pub(crate) type IntFn = unsafe extern "C" fn() -> c_int;
pub(crate) type GetSwitchIntervalFn = unsafe extern "C" fn() -> c_ulong;
pub(crate) type SetSwitchIntervalFn = unsafe extern "C" fn(microseconds: c_ulong);
pub(crate) type CompileStringFn = unsafe extern "C" fn(
    source: *const c_char,
    filename: *const c_char,
    start: c_int,
) -> *mut PyObject;
pub(crate) type EvalCodeFn = unsafe extern "C" fn(
    code: *mut PyObject,
    globals: *mut PyObject,
    locals: *mut PyObject,
) -> *mut PyObject;
pub(crate) type NewObjectFn = unsafe extern "C" fn() -> *mut PyObject;
pub(crate) type DictSetItemStringFn = unsafe extern "C" fn(
    dict: *mut PyObject,
    key: *const c_char,
    value: *mut PyObject,
) -> c_int;
pub(crate) type FromStringFn = unsafe extern "C" fn(value: *const c_char) -> *mut PyObject;
pub(crate) type FromLongFn = unsafe extern "C" fn(value: c_long) -> *mut PyObject;
pub(crate) type CallFunctionObjArgsFn =
    unsafe extern "C" fn(callable: *mut PyObject, ...) -> *mut PyObject;
pub(crate) type ErrOccurredFn = unsafe extern "C" fn() -> *mut PyObject;
pub(crate) type ErrFetchFn = unsafe extern "C" fn(
    ptype: *mut *mut PyObject,
    pvalue: *mut *mut PyObject,
    ptraceback: *mut *mut PyObject,
);
pub(crate) type ErrRestoreFn =
    unsafe extern "C" fn(ptype: *mut PyObject, pvalue: *mut PyObject, ptraceback: *mut PyObject);
pub(crate) type DecRefFn = unsafe extern "C" fn(object: *mut PyObject);
