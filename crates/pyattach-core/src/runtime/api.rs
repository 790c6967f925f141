use std::{
    ffi::{CStr, c_int, c_long, c_void},
    ptr::NonNull,
};

use super::{
    RuntimeBinding,
    ffi::{PendingCallFn, PyInterpreterState, PyObject, PyThreadState},
};
use crate::{Address, AttachError};

macro_rules! runtime_ptr {
    ($(#[$meta:meta])* $name:ident, $type:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(NonNull<$type>);

        impl $name {
            /// Wraps a raw pointer returned by the runtime.
            pub fn from_raw(ptr: *mut $type) -> Option<Self> {
                NonNull::new(ptr).map(Self)
            }

            /// Creates a pointer from an address.
            pub fn from_address(address: Address) -> Option<Self> {
                Self::from_raw(address.as_mut_ptr())
            }

            /// Returns the raw pointer.
            pub fn as_ptr(self) -> *mut $type {
                self.0.as_ptr()
            }

            /// Returns the address of the pointee.
            pub fn address(self) -> Address {
                Address::from_ptr(self.0.as_ptr())
            }
        }

        // The pointee is only ever touched through the runtime, under its
        // own locking rules.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}
    };
}

runtime_ptr!(
    /// A non-null `PyObject *`.
    ObjectPtr,
    PyObject
);

runtime_ptr!(
    /// A non-null `PyThreadState *`.
    ThreadStatePtr,
    PyThreadState
);

runtime_ptr!(
    /// A non-null `PyInterpreterState *`.
    InterpreterPtr,
    PyInterpreterState
);

/// The token returned by `PyGILState_Ensure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GilState(pub c_int);

/// A saved thread-switch interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchInterval {
    /// The legacy `_Py_CheckInterval` cell, in bytecode instructions.
    CheckInterval(c_int),

    /// The switch interval of the new GIL, in microseconds.
    Microseconds(u64),
}

impl SwitchInterval {
    /// Returns the value of the same kind that makes the runtime service
    /// deferred calls as often as possible.
    pub fn minimized(self) -> Self {
        match self {
            Self::CheckInterval(_) => Self::CheckInterval(-1),
            Self::Microseconds(_) => Self::Microseconds(0),
        }
    }
}

/// An exception taken out of the runtime error indicator.
///
/// Every reference is owned by the holder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchedError {
    /// The exception type.
    pub kind: Option<ObjectPtr>,

    /// The exception value.
    pub value: Option<ObjectPtr>,

    /// The traceback.
    pub traceback: Option<ObjectPtr>,
}

impl FetchedError {
    /// Checks whether an exception was fetched at all.
    pub fn is_set(&self) -> bool {
        self.kind.is_some()
    }
}

/// The subset of the runtime C API used while attaching.
///
/// Every method forwards to exactly one entry point and follows its
/// reference-counting conventions. Methods documented as requiring the
/// global execution lock must only be called by its holder.
pub trait PythonApi {
    /// Checks whether the threading subsystem is initialized.
    fn threads_initialized(&self) -> bool;

    /// Returns the head of the interpreter list.
    fn interpreter_head(&self) -> Option<InterpreterPtr>;

    /// Returns the first thread state of an interpreter.
    fn interpreter_thread_head(&self, interp: InterpreterPtr) -> Option<ThreadStatePtr>;

    /// Returns the thread state following `tstate`.
    fn thread_state_next(&self, tstate: ThreadStatePtr) -> Option<ThreadStatePtr>;

    /// Returns the thread state that currently holds the runtime, if any.
    fn current_thread_state(&self) -> Option<ThreadStatePtr>;

    /// Creates a thread state for the calling thread.
    ///
    /// Returns `None` if the runtime does not export the constructor or the
    /// constructor failed.
    fn new_thread_state(&self, interp: InterpreterPtr) -> Option<ThreadStatePtr>;

    /// Initializes the threading subsystem and acquires the global lock.
    fn init_threads(&self);

    /// Releases the global lock without a thread state.
    fn release_lock(&self);

    /// Acquires the global execution lock for the calling thread.
    fn gil_ensure(&self) -> GilState;

    /// Releases the global execution lock.
    fn gil_release(&self, state: GilState);

    /// Registers a deferred call.
    ///
    /// Returns `false` if the runtime rejected the call (full queue).
    ///
    /// # Safety
    ///
    /// `arg` must stay valid until `func` runs and `func` must accept it.
    unsafe fn add_pending_call(&self, func: PendingCallFn, arg: *mut c_void) -> bool;

    /// Reads the thread-switch interval.
    ///
    /// Returns `None` if the runtime exports neither form.
    fn switch_interval(&self) -> Option<SwitchInterval>;

    /// Writes the thread-switch interval.
    fn set_switch_interval(&self, interval: SwitchInterval);

    /// Compiles `source` as a module body. Requires the global lock.
    fn compile_string(&self, source: &CStr, filename: &CStr) -> Option<ObjectPtr>;

    /// Evaluates a code object. Requires the global lock.
    fn eval_code(&self, code: ObjectPtr, globals: ObjectPtr, locals: ObjectPtr)
    -> Option<ObjectPtr>;

    /// Creates an empty dictionary. Requires the global lock.
    fn dict_new(&self) -> Option<ObjectPtr>;

    /// Stores `value` under `key`. Does not steal the reference. Requires
    /// the global lock.
    fn dict_set_item(&self, dict: ObjectPtr, key: &CStr, value: ObjectPtr) -> bool;

    /// Returns a borrowed reference to the builtins of the current frame.
    /// Requires the global lock.
    fn builtins(&self) -> Option<ObjectPtr>;

    /// Creates a string object. Requires the global lock.
    fn string_from(&self, value: &CStr) -> Option<ObjectPtr>;

    /// Creates an integer object. Requires the global lock.
    fn int_from(&self, value: c_long) -> Option<ObjectPtr>;

    /// Calls `callable(first, second)`. Requires the global lock.
    fn call2(&self, callable: ObjectPtr, first: ObjectPtr, second: ObjectPtr)
    -> Option<ObjectPtr>;

    /// Checks whether the error indicator is set. Requires the global lock.
    fn err_occurred(&self) -> bool;

    /// Takes the current exception out of the error indicator. Requires the
    /// global lock.
    fn err_fetch(&self) -> FetchedError;

    /// Puts an exception back into the error indicator. Steals the
    /// references. Requires the global lock.
    fn err_restore(&self, error: FetchedError);

    /// Prints and clears the current exception. Requires the global lock.
    fn err_print(&self);

    /// Releases a reference. Requires the global lock.
    fn decref(&self, object: ObjectPtr);
}

/// Turns resolved addresses into a callable [`PythonApi`].
pub trait RuntimeLinker {
    /// The linked API.
    type Api: PythonApi + Clone + Send + Sync + 'static;

    /// Calls the initialization-state query at `entry_point`.
    fn is_initialized(&self, entry_point: Address) -> bool;

    /// Links every entry point of a validated binding.
    fn link(&self, binding: &RuntimeBinding) -> Result<Self::Api, AttachError>;
}
