//! In-memory process and runtime for the unit tests.

use std::{
    alloc::Layout,
    collections::HashMap,
    ffi::{CStr, c_long, c_void},
    ops::ControlFlow,
    ptr::NonNull,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::{
    Address, Arena, AttachDriver, AttachError, CompletionSignal, ImageEnumerator, LoadedImage,
    ThreadControl, ThreadId,
    runtime::{
        FetchedError, GilState, InterpreterPtr, ObjectPtr, PythonApi, Requirement,
        RuntimeBinding, RuntimeLinker, SwitchInterval, ThreadStatePtr, VersionFamily,
        ffi::PendingCallFn,
    },
};

/// Thread ID of the attaching thread.
pub const CALLER: ThreadId = ThreadId(1000);

/// Clock advance of one thread enumeration.
pub const PASS_COST: Duration = Duration::from_millis(10);

const INTERPRETER: Address = Address(0x5000_0000);
const THREAD_STATE: Address = Address(0x5100_0000);
const BUILTINS: Address = Address(0x5200_0000);
const OBJECTS: Address = Address(0x6000_0000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Enumerate,
    Suspend(ThreadId),
    Resume(ThreadId),
    Release(ThreadId),
    Link,
    PendingCall { accepted: bool },
    ServicePendingCall,
    SignalSet,
    Wait(Duration),
    InitThreads,
    ReleaseLock,
    NewThreadState,
    GilEnsure,
    GilRelease,
    SetSwitchInterval(SwitchInterval),
    Compile(String),
    Eval,
    SetItem(String),
    Call,
    ErrPrint,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub enumerations: usize,
    pub suspends: usize,
    pub resumes: usize,
    pub releases: usize,
    pub yields: usize,
    pub arenas: usize,
}

///////////////////////////////////////////////////////////////////////////////
// Threads
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
pub struct MockThread {
    id: ThreadId,
    ip: Address,
    readable: bool,
    exited: bool,
    unstoppable: bool,
    leaves_hazard_after: Option<usize>,
    resumed: usize,
}

impl MockThread {
    pub fn new(tid: u64) -> Self {
        Self {
            id: ThreadId(tid),
            ip: Self::resting_ip(tid),
            readable: true,
            exited: false,
            unstoppable: false,
            leaves_hazard_after: None,
            resumed: 0,
        }
    }

    /// Places the instruction pointer.
    pub fn with_ip(self, ip: Address) -> Self {
        Self { ip, ..self }
    }

    /// Moves the thread out of its initial instruction pointer after it has
    /// been resumed `count` times.
    pub fn leaves_hazard_after(self, count: usize) -> Self {
        Self {
            leaves_hazard_after: Some(count),
            ..self
        }
    }

    /// Makes the thread exit between enumeration and suspension.
    pub fn exited(self) -> Self {
        Self {
            exited: true,
            ..self
        }
    }

    /// Makes every suspension attempt fail while the thread keeps running.
    pub fn unstoppable(self) -> Self {
        Self {
            unstoppable: true,
            ..self
        }
    }

    /// Makes the register context unreadable.
    pub fn without_context(self) -> Self {
        Self {
            readable: false,
            ..self
        }
    }

    fn resting_ip(tid: u64) -> Address {
        Address(0x1000_0000 + tid * 0x10)
    }

    fn ip(&self) -> Option<Address> {
        if !self.readable {
            return None;
        }

        match self.leaves_hazard_after {
            Some(count) if self.resumed >= count => Some(Self::resting_ip(self.id.0)),
            _ => Some(self.ip),
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Runtime
///////////////////////////////////////////////////////////////////////////////

/// Observable and configurable state of the fake runtime.
#[derive(Debug)]
pub struct RuntimeState {
    pub threads_initialized: bool,
    pub interpreter: bool,
    pub state_held: bool,
    pub switch_interval: Option<SwitchInterval>,
    pub reject_pending_calls: bool,
    pub services_pending_calls: bool,
    pub init_effective: bool,
    pub threads_initialized_after: Option<usize>,
    pub compile_fails: bool,
    pub eval_raises: bool,
    pub call_raises: bool,
    pub error_set: bool,
    pub gil_depth: i32,
    pub live_objects: i64,
    pub sources: Vec<String>,
    pub strings: Vec<String>,
    pub ints: Vec<c_long>,
    pub calls: Vec<(Address, Address, Address)>,
    pending: Vec<(PendingCallFn, usize)>,
    next_object: u64,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            threads_initialized: false,
            interpreter: true,
            state_held: false,
            switch_interval: None,
            reject_pending_calls: false,
            services_pending_calls: true,
            init_effective: true,
            threads_initialized_after: None,
            compile_fails: false,
            eval_raises: false,
            call_raises: false,
            error_set: false,
            gil_depth: 0,
            live_objects: 0,
            sources: Vec::new(),
            strings: Vec::new(),
            ints: Vec::new(),
            calls: Vec::new(),
            pending: Vec::new(),
            next_object: 0,
        }
    }
}

impl RuntimeState {
    fn new_object(&mut self) -> Option<ObjectPtr> {
        self.live_objects += 1;
        self.next_object += 0x10;
        ObjectPtr::from_address(OBJECTS + self.next_object)
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }
}

struct MockImage {
    image: LoadedImage,
    exports: HashMap<String, Address>,
    initialized: bool,
}

///////////////////////////////////////////////////////////////////////////////
// Process
///////////////////////////////////////////////////////////////////////////////

#[derive(Default)]
struct State {
    clock: Duration,
    threads: Vec<MockThread>,
    held: HashMap<ThreadId, usize>,
    counters: Counters,
    events: Vec<Event>,
    arena_live: usize,
    arena_exhausted: bool,
    images: Vec<MockImage>,
    runtime: RuntimeState,
}

/// A fake process shared by the mock driver, linker and API.
#[derive(Clone, Default)]
pub struct MockProcess {
    state: Arc<Mutex<State>>,
}

impl MockProcess {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn driver(&self) -> MockDriver {
        MockDriver {
            process: self.clone(),
        }
    }

    pub fn linker(&self) -> MockLinker {
        MockLinker {
            process: self.clone(),
        }
    }

    pub fn api(&self) -> MockApi {
        MockApi {
            process: self.clone(),
        }
    }

    pub fn spawn(&self, thread: MockThread) {
        self.state().threads.push(thread);
    }

    pub fn now(&self) -> Duration {
        self.state().clock
    }

    pub fn counters(&self) -> Counters {
        self.state().counters
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    /// Returns the number of threads currently held suspended.
    pub fn held_threads(&self) -> usize {
        self.state().held.values().filter(|&&count| count > 0).count()
    }

    pub fn arena_live_blocks(&self) -> usize {
        self.state().arena_live
    }

    pub fn exhaust_arena(&self) {
        self.state().arena_exhausted = true;
    }

    pub fn configure(&self, f: impl FnOnce(&mut RuntimeState)) {
        f(&mut self.state().runtime);
    }

    pub fn runtime<T>(&self, f: impl FnOnce(&RuntimeState) -> T) -> T {
        f(&self.state().runtime)
    }

    /// Loads an image that exports nothing.
    pub fn load_image(&self, path: &str) -> LoadedImage {
        self.load_image_with_exports(path, &[])
    }

    /// Loads an image exporting `exports`.
    pub fn load_image_with_exports(&self, path: &str, exports: &[&str]) -> LoadedImage {
        let mut state = self.state();
        let base = Address(0x1_0000_0000 * (state.images.len() as u64 + 1));
        let image = LoadedImage::new(base, path);

        let exports = exports
            .iter()
            .enumerate()
            .map(|(index, &name)| (name.to_owned(), base + 0x1000 + index as u64 * 0x100))
            .collect();

        state.images.push(MockImage {
            image: image.clone(),
            exports,
            initialized: true,
        });

        image
    }

    /// Loads a runtime image exporting every entry point of `family`.
    pub fn load_runtime(&self, path: &str, family: VersionFamily) -> LoadedImage {
        let exports = runtime_exports(family);
        let image = self.load_image_with_exports(path, &exports);

        self.configure(|runtime| {
            runtime.switch_interval = Some(match family {
                VersionFamily::Pre27 | VersionFamily::Py27To31 | VersionFamily::Py30 => {
                    SwitchInterval::CheckInterval(100)
                }
                _ => SwitchInterval::Microseconds(5000),
            });
        });

        image
    }

    pub fn remove_export(&self, image: &LoadedImage, name: &str) {
        let mut state = self.state();
        if let Some(entry) = state.images.iter_mut().find(|entry| entry.image == *image) {
            entry.exports.remove(name);
        }
    }

    pub fn set_initialized(&self, image: &LoadedImage, initialized: bool) {
        let mut state = self.state();
        if let Some(entry) = state.images.iter_mut().find(|entry| entry.image == *image) {
            entry.initialized = initialized;
        }
    }

    pub fn export(&self, image: &LoadedImage, name: &str) -> Option<Address> {
        let state = self.state();
        state
            .images
            .iter()
            .find(|entry| entry.image == *image)
            .and_then(|entry| entry.exports.get(name).copied())
    }
}

fn runtime_exports(family: VersionFamily) -> Vec<&'static str> {
    let manifest = family.manifest();
    let mut exports = vec!["Py_IsInitialized"];

    for requirement in manifest.required() {
        let entry_point = match *requirement {
            Requirement::One(entry_point) => entry_point,
            Requirement::AnyOf(alternatives) => alternatives[0],
        };

        exports.push(entry_point.names(family)[0]);
    }

    exports.push("PyThreadState_New");

    match family {
        VersionFamily::Pre27 => {
            exports.push("_Py_CheckInterval");
        }
        VersionFamily::Py27To31 => {
            exports.extend(["_Py_CheckInterval", "PyCapsule_New"]);
        }
        VersionFamily::Py30 => {
            exports.extend(["_Py_CheckInterval", "PyBytes_FromString"]);
        }
        VersionFamily::Py32 => {
            exports.extend(["_PyEval_GetSwitchInterval", "_PyEval_SetSwitchInterval"]);
        }
        VersionFamily::Py33 => {
            exports.extend([
                "_PyEval_GetSwitchInterval",
                "_PyEval_SetSwitchInterval",
                "PyUnicode_AsUTF8",
            ]);
        }
        VersionFamily::Py34Plus => {
            exports.extend([
                "_PyEval_GetSwitchInterval",
                "_PyEval_SetSwitchInterval",
                "PyUnicode_AsUTF8",
                "PyGILState_Check",
            ]);
        }
    }

    exports
}

///////////////////////////////////////////////////////////////////////////////
// Driver
///////////////////////////////////////////////////////////////////////////////

pub struct MockHandle(ThreadId);

pub struct MockDriver {
    process: MockProcess,
}

impl ImageEnumerator for MockDriver {
    fn images(&self) -> Result<Vec<LoadedImage>, AttachError> {
        let state = self.process.state();
        Ok(state.images.iter().map(|entry| entry.image.clone()).collect())
    }

    fn resolve(&self, image: &LoadedImage, name: &str) -> Option<Address> {
        let state = self.process.state();
        state
            .images
            .iter()
            .find(|entry| entry.image.base == image.base)
            .and_then(|entry| entry.exports.get(name).copied())
    }
}

impl ThreadControl for MockDriver {
    type Handle = MockHandle;
    type Arena = MockArena;

    fn current_thread_id(&self) -> ThreadId {
        CALLER
    }

    fn for_each_thread(
        &self,
        mut f: impl FnMut(ThreadId) -> ControlFlow<()>,
    ) -> Result<(), AttachError> {
        let ids = {
            let mut state = self.process.state();
            state.clock += PASS_COST;
            state.counters.enumerations += 1;
            state.events.push(Event::Enumerate);

            if let Some(after) = state.runtime.threads_initialized_after
                && state.counters.enumerations >= after
            {
                state.runtime.threads_initialized = true;
            }

            let mut ids = vec![CALLER];
            ids.extend(state.threads.iter().map(|thread| thread.id));
            ids
        };

        for id in ids {
            if f(id).is_break() {
                break;
            }
        }

        Ok(())
    }

    fn suspend(&self, id: ThreadId) -> Option<Self::Handle> {
        let mut state = self.process.state();

        if id != CALLER {
            let thread = state.threads.iter().find(|thread| thread.id == id)?;
            if thread.exited || thread.unstoppable {
                return None;
            }
        }

        state.counters.suspends += 1;
        *state.held.entry(id).or_default() += 1;
        state.events.push(Event::Suspend(id));
        Some(MockHandle(id))
    }

    fn is_alive(&self, id: ThreadId) -> bool {
        let state = self.process.state();
        id == CALLER || state.threads.iter().any(|thread| thread.id == id && !thread.exited)
    }

    fn instruction_pointer(&self, handle: &Self::Handle) -> Option<Address> {
        let state = self.process.state();
        state
            .threads
            .iter()
            .find(|thread| thread.id == handle.0)
            .and_then(MockThread::ip)
    }

    fn resume(&self, handle: &Self::Handle) {
        let mut state = self.process.state();

        let held = state.held.entry(handle.0).or_default();
        assert!(*held > 0, "thread {} resumed while not suspended", handle.0);
        *held -= 1;

        state.counters.resumes += 1;
        state.events.push(Event::Resume(handle.0));

        if let Some(thread) = state.threads.iter_mut().find(|thread| thread.id == handle.0) {
            thread.resumed += 1;
        }
    }

    fn release(&self, handle: Self::Handle) {
        let mut state = self.process.state();
        state.counters.releases += 1;
        state.events.push(Event::Release(handle.0));
    }

    fn yield_now(&self) {
        self.process.state().counters.yields += 1;
    }

    fn create_arena(&self) -> Result<Self::Arena, AttachError> {
        self.process.state().counters.arenas += 1;
        Ok(MockArena {
            process: self.process.clone(),
        })
    }
}

impl AttachDriver for MockDriver {
    type Signal = MockSignal;

    fn create_signal(&self) -> Result<Self::Signal, AttachError> {
        Ok(MockSignal {
            process: self.process.clone(),
            set: AtomicBool::new(false),
        })
    }

    fn now(&self) -> Duration {
        self.process.now()
    }
}

pub struct MockArena {
    process: MockProcess,
}

impl Arena for MockArena {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let mut state = self.process.state();
        if state.arena_exhausted {
            return None;
        }

        let ptr = NonNull::new(unsafe { std::alloc::alloc(layout) })?;
        state.arena_live += 1;
        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.process.state().arena_live -= 1;
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// A completion signal whose wait lets the fake runtime service its
/// pending calls, and otherwise advances the clock by the full timeout.
pub struct MockSignal {
    process: MockProcess,
    set: AtomicBool,
}

impl CompletionSignal for MockSignal {
    fn set(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.process.state().events.push(Event::SignalSet);
    }

    fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    fn wait(&self, timeout: Duration) -> bool {
        let pending = {
            let mut state = self.process.state();
            state.events.push(Event::Wait(timeout));

            match state.runtime.services_pending_calls {
                true => std::mem::take(&mut state.runtime.pending),
                false => Vec::new(),
            }
        };

        for (func, arg) in pending {
            self.process.state().events.push(Event::ServicePendingCall);
            unsafe { func(arg as *mut c_void) };
        }

        if self.is_set() {
            return true;
        }

        self.process.state().clock += timeout;
        false
    }
}

///////////////////////////////////////////////////////////////////////////////
// Linker / API
///////////////////////////////////////////////////////////////////////////////

pub struct MockLinker {
    process: MockProcess,
}

impl RuntimeLinker for MockLinker {
    type Api = MockApi;

    fn is_initialized(&self, entry_point: Address) -> bool {
        let state = self.process.state();
        state.images.iter().any(|entry| {
            entry.initialized && entry.exports.get("Py_IsInitialized") == Some(&entry_point)
        })
    }

    fn link(&self, _binding: &RuntimeBinding) -> Result<Self::Api, AttachError> {
        self.process.state().events.push(Event::Link);
        Ok(self.process.api())
    }
}

#[derive(Clone)]
pub struct MockApi {
    process: MockProcess,
}

impl MockApi {
    fn with<T>(&self, f: impl FnOnce(&mut RuntimeState, &mut Vec<Event>) -> T) -> T {
        let mut state = self.process.state();
        let State {
            runtime, events, ..
        } = &mut *state;
        f(runtime, events)
    }
}

impl PythonApi for MockApi {
    fn threads_initialized(&self) -> bool {
        self.with(|runtime, _| runtime.threads_initialized)
    }

    fn interpreter_head(&self) -> Option<InterpreterPtr> {
        self.with(|runtime, _| runtime.interpreter)
            .then(|| InterpreterPtr::from_address(INTERPRETER))
            .flatten()
    }

    fn interpreter_thread_head(&self, _interp: InterpreterPtr) -> Option<ThreadStatePtr> {
        ThreadStatePtr::from_address(THREAD_STATE)
    }

    fn thread_state_next(&self, _tstate: ThreadStatePtr) -> Option<ThreadStatePtr> {
        None
    }

    fn current_thread_state(&self) -> Option<ThreadStatePtr> {
        self.with(|runtime, _| runtime.state_held)
            .then(|| ThreadStatePtr::from_address(THREAD_STATE))
            .flatten()
    }

    fn new_thread_state(&self, _interp: InterpreterPtr) -> Option<ThreadStatePtr> {
        self.with(|_, events| events.push(Event::NewThreadState));
        ThreadStatePtr::from_address(THREAD_STATE + 0x1000)
    }

    fn init_threads(&self) {
        self.with(|runtime, events| {
            events.push(Event::InitThreads);
            if runtime.init_effective {
                runtime.threads_initialized = true;
            }
        });
    }

    fn release_lock(&self) {
        self.with(|_, events| events.push(Event::ReleaseLock));
    }

    fn gil_ensure(&self) -> GilState {
        self.with(|runtime, events| {
            events.push(Event::GilEnsure);
            runtime.gil_depth += 1;
        });
        GilState(1)
    }

    fn gil_release(&self, _state: GilState) {
        self.with(|runtime, events| {
            events.push(Event::GilRelease);
            runtime.gil_depth -= 1;
        });
    }

    unsafe fn add_pending_call(&self, func: PendingCallFn, arg: *mut c_void) -> bool {
        self.with(|runtime, events| {
            let accepted = !runtime.reject_pending_calls;
            events.push(Event::PendingCall { accepted });

            if accepted {
                runtime.pending.push((func, arg as usize));
            }

            accepted
        })
    }

    fn switch_interval(&self) -> Option<SwitchInterval> {
        self.with(|runtime, _| runtime.switch_interval)
    }

    fn set_switch_interval(&self, interval: SwitchInterval) {
        self.with(|runtime, events| {
            events.push(Event::SetSwitchInterval(interval));
            runtime.switch_interval = Some(interval);
        });
    }

    fn compile_string(&self, source: &CStr, _filename: &CStr) -> Option<ObjectPtr> {
        self.with(|runtime, events| {
            let source = source.to_string_lossy().into_owned();
            events.push(Event::Compile(source.clone()));
            runtime.sources.push(source);

            if runtime.compile_fails {
                runtime.error_set = true;
                return None;
            }

            runtime.new_object()
        })
    }

    fn eval_code(
        &self,
        _code: ObjectPtr,
        _globals: ObjectPtr,
        _locals: ObjectPtr,
    ) -> Option<ObjectPtr> {
        self.with(|runtime, events| {
            events.push(Event::Eval);

            if runtime.eval_raises {
                runtime.error_set = true;
                return None;
            }

            runtime.new_object()
        })
    }

    fn dict_new(&self) -> Option<ObjectPtr> {
        self.with(|runtime, _| runtime.new_object())
    }

    fn dict_set_item(&self, _dict: ObjectPtr, key: &CStr, _value: ObjectPtr) -> bool {
        self.with(|_, events| {
            events.push(Event::SetItem(key.to_string_lossy().into_owned()));
        });
        true
    }

    fn builtins(&self) -> Option<ObjectPtr> {
        ObjectPtr::from_address(BUILTINS)
    }

    fn string_from(&self, value: &CStr) -> Option<ObjectPtr> {
        self.with(|runtime, _| {
            runtime.strings.push(value.to_string_lossy().into_owned());
            runtime.new_object()
        })
    }

    fn int_from(&self, value: c_long) -> Option<ObjectPtr> {
        self.with(|runtime, _| {
            runtime.ints.push(value);
            runtime.new_object()
        })
    }

    fn call2(
        &self,
        callable: ObjectPtr,
        first: ObjectPtr,
        second: ObjectPtr,
    ) -> Option<ObjectPtr> {
        self.with(|runtime, events| {
            events.push(Event::Call);
            runtime
                .calls
                .push((callable.address(), first.address(), second.address()));

            if runtime.call_raises {
                runtime.error_set = true;
                return None;
            }

            runtime.new_object()
        })
    }

    fn err_occurred(&self) -> bool {
        self.with(|runtime, _| runtime.error_set)
    }

    fn err_fetch(&self) -> FetchedError {
        self.with(|runtime, _| {
            if !std::mem::take(&mut runtime.error_set) {
                return FetchedError::default();
            }

            FetchedError {
                kind: runtime.new_object(),
                value: runtime.new_object(),
                traceback: None,
            }
        })
    }

    fn err_restore(&self, error: FetchedError) {
        self.with(|runtime, _| {
            // The indicator owns the references until they are printed.
            runtime.error_set = error.is_set();
            for _ in [error.kind, error.value, error.traceback].into_iter().flatten() {
                runtime.live_objects -= 1;
            }
        });
    }

    fn err_print(&self) {
        self.with(|runtime, events| {
            events.push(Event::ErrPrint);
            runtime.error_set = false;
        });
    }

    fn decref(&self, _object: ObjectPtr) {
        self.with(|runtime, _| runtime.live_objects -= 1);
    }
}
