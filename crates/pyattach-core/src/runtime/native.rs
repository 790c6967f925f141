use std::{
    ffi::{CStr, c_int, c_long, c_ulong, c_void},
    ptr,
};

use super::{
    EntryPoint, FetchedError, GilState, InterpreterPtr, ObjectPtr, PythonApi, RuntimeBinding,
    RuntimeLinker, SwitchInterval, ThreadStatePtr, VersionFamily,
    ffi::{self, PendingCallFn, PyObject, PyThreadState},
};
use crate::{Address, AttachError};

/// Reinterprets an entry-point address as a function pointer.
///
/// # Safety
///
/// `address` must be the entry point of a function whose signature is `F`.
unsafe fn function<F>(address: Address) -> F
where
    F: Copy,
{
    debug_assert_eq!(size_of::<F>(), size_of::<usize>());
    let raw = address.0 as usize;
    unsafe { std::mem::transmute_copy::<usize, F>(&raw) }
}

#[derive(Clone, Copy)]
enum CurrentThreadState {
    Getter(ffi::ThreadStateGetFn),
    Cell(Address),
}

#[derive(Clone, Copy)]
enum SwitchIntervalAccess {
    CheckInterval(Address),
    Accessors {
        get: ffi::GetSwitchIntervalFn,
        set: ffi::SetSwitchIntervalFn,
    },
}

/// The runtime C API, called through the addresses of a
/// [`RuntimeBinding`].
#[derive(Clone, Copy)]
pub struct NativeApi {
    family: VersionFamily,
    threads_initialized: ffi::IntFn,
    interpreter_head: ffi::InterpreterStateHeadFn,
    interpreter_thread_head: ffi::InterpreterStateThreadHeadFn,
    thread_state_next: ffi::ThreadStateNextFn,
    thread_state_new: Option<ffi::ThreadStateNewFn>,
    current_thread_state: CurrentThreadState,
    init_threads: ffi::VoidFn,
    release_lock: ffi::VoidFn,
    gil_ensure: ffi::GilStateEnsureFn,
    gil_release: ffi::GilStateReleaseFn,
    add_pending_call: ffi::AddPendingCallFn,
    switch_interval: Option<SwitchIntervalAccess>,
    compile_string: ffi::CompileStringFn,
    eval_code: ffi::EvalCodeFn,
    dict_new: ffi::NewObjectFn,
    dict_set_item: ffi::DictSetItemStringFn,
    builtins: ffi::NewObjectFn,
    string_from: ffi::FromStringFn,
    int_from: ffi::FromLongFn,
    call_function: ffi::CallFunctionObjArgsFn,
    err_occurred: ffi::ErrOccurredFn,
    err_fetch: ffi::ErrFetchFn,
    err_restore: ffi::ErrRestoreFn,
    err_print: ffi::VoidFn,
    decref: ffi::DecRefFn,
}

impl NativeApi {
    /// Links the API of a binding.
    ///
    /// # Safety
    ///
    /// Every address in `binding` must be the corresponding export of a live
    /// runtime of the binding's version family.
    pub unsafe fn link(binding: &RuntimeBinding) -> Result<Self, AttachError> {
        let required = |entry_point| binding.require(entry_point);

        let current_thread_state = match (
            binding.get(EntryPoint::ThreadStateUncheckedGet),
            binding.get(EntryPoint::ThreadStateGetUnchecked),
            binding.get(EntryPoint::ThreadStateCurrent),
        ) {
            (Some(getter), _, _) | (None, Some(getter), _) => {
                CurrentThreadState::Getter(unsafe { function(getter) })
            }
            (None, None, Some(cell)) => CurrentThreadState::Cell(cell),
            (None, None, None) => {
                return Err(AttachError::missing(
                    super::CURRENT_THREAD_STATE.iter().copied(),
                ));
            }
        };

        let switch_interval = match (
            binding.get(EntryPoint::CheckInterval),
            binding.get(EntryPoint::GetSwitchInterval),
            binding.get(EntryPoint::SetSwitchInterval),
        ) {
            (Some(cell), _, _) => Some(SwitchIntervalAccess::CheckInterval(cell)),
            (None, Some(get), Some(set)) => Some(SwitchIntervalAccess::Accessors {
                get: unsafe { function(get) },
                set: unsafe { function(set) },
            }),
            _ => None,
        };

        unsafe {
            Ok(Self {
                family: binding.family(),
                threads_initialized: function(required(EntryPoint::EvalThreadsInitialized)?),
                interpreter_head: function(required(EntryPoint::InterpreterStateHead)?),
                interpreter_thread_head: function(required(
                    EntryPoint::InterpreterStateThreadHead,
                )?),
                thread_state_next: function(required(EntryPoint::ThreadStateNext)?),
                thread_state_new: binding
                    .get(EntryPoint::ThreadStateNew)
                    .map(|address| function(address)),
                current_thread_state,
                init_threads: function(required(EntryPoint::EvalInitThreads)?),
                release_lock: function(required(EntryPoint::EvalReleaseLock)?),
                gil_ensure: function(required(EntryPoint::GilStateEnsure)?),
                gil_release: function(required(EntryPoint::GilStateRelease)?),
                add_pending_call: function(required(EntryPoint::AddPendingCall)?),
                switch_interval,
                compile_string: function(required(EntryPoint::CompileString)?),
                eval_code: function(required(EntryPoint::EvalCode)?),
                dict_new: function(required(EntryPoint::DictNew)?),
                dict_set_item: function(required(EntryPoint::DictSetItemString)?),
                builtins: function(required(EntryPoint::EvalGetBuiltins)?),
                string_from: function(required(EntryPoint::StringFromString)?),
                int_from: function(required(EntryPoint::IntFromLong)?),
                call_function: function(required(EntryPoint::CallFunctionObjArgs)?),
                err_occurred: function(required(EntryPoint::ErrOccurred)?),
                err_fetch: function(required(EntryPoint::ErrFetch)?),
                err_restore: function(required(EntryPoint::ErrRestore)?),
                err_print: function(required(EntryPoint::ErrPrint)?),
                decref: function(required(EntryPoint::DecRef)?),
            })
        }
    }

    /// Returns the version family the API was linked for.
    pub fn family(&self) -> VersionFamily {
        self.family
    }
}

impl std::fmt::Debug for NativeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("NativeApi")
            .field("family", &self.family)
            .field("thread_state_new", &self.thread_state_new.is_some())
            .field("switch_interval", &self.switch_interval.is_some())
            .finish_non_exhaustive()
    }
}

fn raw(object: Option<ObjectPtr>) -> *mut PyObject {
    object.map_or(ptr::null_mut(), ObjectPtr::as_ptr)
}

impl PythonApi for NativeApi {
    fn threads_initialized(&self) -> bool {
        unsafe { (self.threads_initialized)() != 0 }
    }

    fn interpreter_head(&self) -> Option<InterpreterPtr> {
        InterpreterPtr::from_raw(unsafe { (self.interpreter_head)() })
    }

    fn interpreter_thread_head(&self, interp: InterpreterPtr) -> Option<ThreadStatePtr> {
        ThreadStatePtr::from_raw(unsafe { (self.interpreter_thread_head)(interp.as_ptr()) })
    }

    fn thread_state_next(&self, tstate: ThreadStatePtr) -> Option<ThreadStatePtr> {
        ThreadStatePtr::from_raw(unsafe { (self.thread_state_next)(tstate.as_ptr()) })
    }

    fn current_thread_state(&self) -> Option<ThreadStatePtr> {
        let tstate = match self.current_thread_state {
            CurrentThreadState::Getter(getter) => unsafe { getter() },
            CurrentThreadState::Cell(cell) => unsafe {
                ptr::read_volatile(cell.as_ptr::<*mut PyThreadState>())
            },
        };

        ThreadStatePtr::from_raw(tstate)
    }

    fn new_thread_state(&self, interp: InterpreterPtr) -> Option<ThreadStatePtr> {
        let constructor = self.thread_state_new?;
        ThreadStatePtr::from_raw(unsafe { constructor(interp.as_ptr()) })
    }

    fn init_threads(&self) {
        unsafe { (self.init_threads)() }
    }

    fn release_lock(&self) {
        unsafe { (self.release_lock)() }
    }

    fn gil_ensure(&self) -> GilState {
        GilState(unsafe { (self.gil_ensure)() })
    }

    fn gil_release(&self, state: GilState) {
        unsafe { (self.gil_release)(state.0) }
    }

    unsafe fn add_pending_call(&self, func: PendingCallFn, arg: *mut c_void) -> bool {
        unsafe { (self.add_pending_call)(func, arg) == 0 }
    }

    fn switch_interval(&self) -> Option<SwitchInterval> {
        match self.switch_interval? {
            SwitchIntervalAccess::CheckInterval(cell) => Some(SwitchInterval::CheckInterval(
                unsafe { ptr::read_volatile(cell.as_ptr::<c_int>()) },
            )),
            SwitchIntervalAccess::Accessors { get, .. } => {
                Some(SwitchInterval::Microseconds(unsafe { get() } as u64))
            }
        }
    }

    fn set_switch_interval(&self, interval: SwitchInterval) {
        match (self.switch_interval, interval) {
            (
                Some(SwitchIntervalAccess::CheckInterval(cell)),
                SwitchInterval::CheckInterval(value),
            ) => unsafe { ptr::write_volatile(cell.as_mut_ptr::<c_int>(), value) },
            (
                Some(SwitchIntervalAccess::Accessors { set, .. }),
                SwitchInterval::Microseconds(value),
            ) => unsafe { set(value as c_ulong) },
            (access, interval) => {
                tracing::warn!(
                    available = access.is_some(),
                    ?interval,
                    "switch interval kind mismatch"
                );
            }
        }
    }

    fn compile_string(&self, source: &CStr, filename: &CStr) -> Option<ObjectPtr> {
        ObjectPtr::from_raw(unsafe {
            (self.compile_string)(source.as_ptr(), filename.as_ptr(), ffi::PY_FILE_INPUT)
        })
    }

    fn eval_code(
        &self,
        code: ObjectPtr,
        globals: ObjectPtr,
        locals: ObjectPtr,
    ) -> Option<ObjectPtr> {
        ObjectPtr::from_raw(unsafe {
            (self.eval_code)(code.as_ptr(), globals.as_ptr(), locals.as_ptr())
        })
    }

    fn dict_new(&self) -> Option<ObjectPtr> {
        ObjectPtr::from_raw(unsafe { (self.dict_new)() })
    }

    fn dict_set_item(&self, dict: ObjectPtr, key: &CStr, value: ObjectPtr) -> bool {
        unsafe { (self.dict_set_item)(dict.as_ptr(), key.as_ptr(), value.as_ptr()) == 0 }
    }

    fn builtins(&self) -> Option<ObjectPtr> {
        ObjectPtr::from_raw(unsafe { (self.builtins)() })
    }

    fn string_from(&self, value: &CStr) -> Option<ObjectPtr> {
        ObjectPtr::from_raw(unsafe { (self.string_from)(value.as_ptr()) })
    }

    fn int_from(&self, value: c_long) -> Option<ObjectPtr> {
        ObjectPtr::from_raw(unsafe { (self.int_from)(value) })
    }

    fn call2(
        &self,
        callable: ObjectPtr,
        first: ObjectPtr,
        second: ObjectPtr,
    ) -> Option<ObjectPtr> {
        ObjectPtr::from_raw(unsafe {
            (self.call_function)(
                callable.as_ptr(),
                first.as_ptr(),
                second.as_ptr(),
                ptr::null_mut::<PyObject>(),
            )
        })
    }

    fn err_occurred(&self) -> bool {
        !unsafe { (self.err_occurred)() }.is_null()
    }

    fn err_fetch(&self) -> FetchedError {
        let mut kind = ptr::null_mut();
        let mut value = ptr::null_mut();
        let mut traceback = ptr::null_mut();
        unsafe { (self.err_fetch)(&mut kind, &mut value, &mut traceback) };

        FetchedError {
            kind: ObjectPtr::from_raw(kind),
            value: ObjectPtr::from_raw(value),
            traceback: ObjectPtr::from_raw(traceback),
        }
    }

    fn err_restore(&self, error: FetchedError) {
        unsafe {
            (self.err_restore)(raw(error.kind), raw(error.value), raw(error.traceback))
        }
    }

    fn err_print(&self) {
        unsafe { (self.err_print)() }
    }

    fn decref(&self, object: ObjectPtr) {
        unsafe { (self.decref)(object.as_ptr()) }
    }
}

/// Links [`NativeApi`] instances for runtimes loaded into the current
/// process.
#[derive(Debug, Clone, Copy)]
pub struct NativeLinker {
    _private: (),
}

impl NativeLinker {
    /// Creates a new linker.
    ///
    /// # Safety
    ///
    /// The linker calls every address it is given. Callers must only pass
    /// addresses resolved from the exports of a runtime image loaded into
    /// the current process.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RuntimeLinker for NativeLinker {
    type Api = NativeApi;

    fn is_initialized(&self, entry_point: Address) -> bool {
        unsafe { function::<ffi::IsInitializedFn>(entry_point)() != 0 }
    }

    fn link(&self, binding: &RuntimeBinding) -> Result<Self::Api, AttachError> {
        unsafe { NativeApi::link(binding) }
    }
}
