use std::{
    ffi::{c_int, c_void},
    sync::Arc,
    time::Duration,
};

use crate::{
    AddressRange, AttachDriver, AttachError, CompletionSignal, SuspendedThreadSet,
    ThreadSuspensionController,
    runtime::{InterpreterPtr, PythonApi, SwitchInterval, VersionFamily},
};

/// A state of the threading bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Nothing has been inspected yet.
    Idle,

    /// Query the interpreter list and the threading state.
    DetectCapabilities,

    /// The runtime has no interpreter state. Terminal.
    Aborted,

    /// Threading was already initialized. Terminal; nothing was suspended.
    AlreadyThreaded,

    /// Threading must be brought up.
    NeedsInit,

    /// Suspend every other thread and inspect the runtime.
    SuspendInspect,

    /// No thread holds runtime state; initialize directly.
    Initialize,

    /// A thread holds runtime state; register the deferred call.
    ScheduleDeferred,

    /// Resume every suspended thread.
    Resume,

    /// Decide whether to retry, wait or give up.
    Recheck,

    /// Wait for the deferred call to signal completion.
    WaitForSignal,

    /// Threading is initialized. Terminal.
    Succeeded,

    /// The time bound elapsed. Terminal.
    TimedOut,
}

impl BootstrapState {
    /// Checks whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Aborted | Self::AlreadyThreaded | Self::Succeeded | Self::TimedOut
        )
    }
}

/// How the threading subsystem came online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// It was already initialized.
    AlreadyThreaded,

    /// It was initialized by this thread while all others were suspended.
    Initialized,

    /// It was initialized by the deferred call or by the runtime itself.
    Deferred,
}

/// Context handed to the deferred call.
///
/// One reference is owned by the runtime queue once the call is registered.
struct DeferredInit<Api, Signal> {
    api: Api,
    signal: Signal,
}

/// The deferred call. Runs on a runtime thread holding the global lock.
unsafe extern "C" fn run_deferred_init<Api, Signal>(arg: *mut c_void) -> c_int
where
    Api: PythonApi,
    Signal: CompletionSignal,
{
    let context = unsafe { Arc::from_raw(arg.cast_const().cast::<DeferredInit<Api, Signal>>()) };

    // Acquires the global lock if it did not exist yet and is a no-op
    // otherwise, so the runtime gets control back in the state it expects.
    context.api.init_threads();
    context.signal.set();
    0
}

/// Restores the saved switch interval when dropped.
struct SwitchIntervalGuard<'a, Api>
where
    Api: PythonApi,
{
    api: &'a Api,
    saved: SwitchInterval,
}

impl<'a, Api> SwitchIntervalGuard<'a, Api>
where
    Api: PythonApi,
{
    fn minimize(api: &'a Api) -> Option<Self> {
        let saved = api.switch_interval()?;
        api.set_switch_interval(saved.minimized());
        tracing::debug!(?saved, "switch interval minimized");
        Some(Self { api, saved })
    }
}

impl<Api> Drop for SwitchIntervalGuard<'_, Api>
where
    Api: PythonApi,
{
    fn drop(&mut self) {
        self.api.set_switch_interval(self.saved);
        tracing::debug!(saved = ?self.saved, "switch interval restored");
    }
}

/// Brings the threading subsystem of a runtime online.
///
/// The machine advances one state per [`step`]. It uses whichever safety
/// proof is currently available: direct initialization when suspension
/// shows that no thread holds runtime state, or a deferred call when the
/// registration routine is known to be thread-safe or every other thread is
/// frozen.
///
/// Dropping the machine resumes every suspended thread and restores the
/// switch interval.
///
/// [`step`]: Self::step
pub struct ThreadingBootstrap<'a, Driver, Api>
where
    Driver: AttachDriver,
    Api: PythonApi + Clone + Send + Sync + 'static,
{
    driver: &'a Driver,
    api: &'a Api,
    family: VersionFamily,
    hazard: AddressRange,
    timeout: Duration,
    controller: ThreadSuspensionController<'a, Driver>,

    state: BootstrapState,
    started: Duration,
    passes: usize,
    interpreter: Option<InterpreterPtr>,

    // Declared before `interval`: threads resume before the switch
    // interval is restored.
    suspended: Option<SuspendedThreadSet<'a, Driver>>,
    prepared: Option<Arc<DeferredInit<Api, Driver::Signal>>>,
    scheduled: Option<Arc<DeferredInit<Api, Driver::Signal>>>,
    interval: Option<SwitchIntervalGuard<'a, Api>>,
}

impl<'a, Driver, Api> ThreadingBootstrap<'a, Driver, Api>
where
    Driver: AttachDriver,
    Api: PythonApi + Clone + Send + Sync + 'static,
{
    /// Runs the bootstrap to completion.
    ///
    /// `hazard` is the code window of the deferred-call registration
    /// routine. `timeout` bounds the suspend/inspect/resume cycle and the
    /// wait for the deferred call together.
    pub fn run(
        driver: &'a Driver,
        api: &'a Api,
        family: VersionFamily,
        hazard: AddressRange,
        timeout: Duration,
    ) -> Result<BootstrapOutcome, AttachError> {
        let arena = driver.create_arena()?;
        let mut bootstrap =
            ThreadingBootstrap::new(driver, api, family, hazard, timeout, &arena);

        while !bootstrap.state().is_terminal() {
            bootstrap.step()?;
        }

        bootstrap.finish()
    }

    /// Creates a machine in the [`BootstrapState::Idle`] state.
    pub fn new(
        driver: &'a Driver,
        api: &'a Api,
        family: VersionFamily,
        hazard: AddressRange,
        timeout: Duration,
        arena: &'a Driver::Arena,
    ) -> Self {
        Self {
            driver,
            api,
            family,
            hazard,
            timeout,
            controller: ThreadSuspensionController::new(driver, arena),
            state: BootstrapState::Idle,
            started: Duration::ZERO,
            passes: 0,
            interpreter: None,
            suspended: None,
            prepared: None,
            scheduled: None,
            interval: None,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Returns the number of suspend/inspect passes performed so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Checks whether a deferred call has been registered.
    pub fn is_deferred_scheduled(&self) -> bool {
        self.scheduled.is_some()
    }

    /// Performs one transition.
    ///
    /// Calling `step` in a terminal state is a no-op.
    pub fn step(&mut self) -> Result<BootstrapState, AttachError> {
        let next = match self.state {
            BootstrapState::Idle => BootstrapState::DetectCapabilities,

            BootstrapState::DetectCapabilities => self.detect_capabilities(),

            BootstrapState::NeedsInit => {
                self.started = self.driver.now();
                self.interval = SwitchIntervalGuard::minimize(self.api);
                self.prepared = Some(Arc::new(DeferredInit {
                    api: self.api.clone(),
                    signal: self.driver.create_signal()?,
                }));

                // Registration from this thread is only known safe when the
                // routine is thread-safe. Skip it if nobody holds the runtime
                // right now: direct initialization is cheaper.
                if self.family.pending_call_is_thread_safe()
                    && self.api.current_thread_state().is_some()
                {
                    self.schedule_deferred();
                }

                BootstrapState::SuspendInspect
            }

            BootstrapState::SuspendInspect => {
                let api = self.api;
                let set = self.controller.suspend_all(
                    self.hazard,
                    self.deadline(),
                    || api.threads_initialized(),
                )?;
                let complete = set.is_complete();
                self.suspended = Some(set);
                self.passes += 1;

                if api.threads_initialized() {
                    BootstrapState::Resume
                }
                else if !complete {
                    // A live thread escaped this pass; nothing is proven.
                    tracing::trace!("suspension incomplete");
                    BootstrapState::Resume
                }
                else if api.current_thread_state().is_none() {
                    BootstrapState::Initialize
                }
                else if self.scheduled.is_none() {
                    BootstrapState::ScheduleDeferred
                }
                else {
                    BootstrapState::Resume
                }
            }

            BootstrapState::Initialize => {
                self.initialize_directly();
                BootstrapState::Resume
            }

            BootstrapState::ScheduleDeferred => {
                self.schedule_deferred();
                BootstrapState::Resume
            }

            BootstrapState::Resume => {
                if let Some(mut set) = self.suspended.take() {
                    self.controller.resume_all(&mut set);
                }

                BootstrapState::Recheck
            }

            BootstrapState::Recheck => {
                if self.api.threads_initialized() {
                    BootstrapState::Succeeded
                }
                else if self.scheduled.is_some() {
                    BootstrapState::WaitForSignal
                }
                else if self.elapsed() >= self.timeout {
                    BootstrapState::TimedOut
                }
                else {
                    BootstrapState::SuspendInspect
                }
            }

            BootstrapState::WaitForSignal => {
                let remaining = self.timeout.saturating_sub(self.elapsed());
                tracing::debug!(?remaining, "waiting for deferred call");

                let signaled = self
                    .scheduled
                    .as_ref()
                    .is_some_and(|context| context.signal.wait(remaining));

                if signaled || self.api.threads_initialized() {
                    BootstrapState::Succeeded
                }
                else {
                    BootstrapState::TimedOut
                }
            }

            state => state,
        };

        // Threads may be held here; the diagnostics subscriber filters
        // `trace` out.
        tracing::trace!(from = ?self.state, to = ?next, "bootstrap transition");
        self.state = next;
        Ok(next)
    }

    fn finish(mut self) -> Result<BootstrapOutcome, AttachError> {
        self.suspended = None;
        self.interval = None;

        match self.state {
            BootstrapState::AlreadyThreaded => {
                tracing::debug!("threads already initialized");
                Ok(BootstrapOutcome::AlreadyThreaded)
            }
            BootstrapState::Succeeded => {
                let outcome = match self.scheduled.is_some() {
                    true => BootstrapOutcome::Deferred,
                    false => BootstrapOutcome::Initialized,
                };
                tracing::debug!(?outcome, passes = self.passes, "threads initialized");
                Ok(outcome)
            }
            BootstrapState::Aborted => Err(AttachError::InterpreterStateAbsent),
            BootstrapState::TimedOut => {
                tracing::debug!(passes = self.passes, "connect timeout");
                Err(AttachError::Timeout)
            }
            _ => Err(AttachError::Other("bootstrap did not terminate")),
        }
    }

    fn detect_capabilities(&mut self) -> BootstrapState {
        self.interpreter = self.api.interpreter_head();

        if self.interpreter.is_none() {
            tracing::debug!("interpreter not initialized");
            BootstrapState::Aborted
        }
        else if self.api.threads_initialized() {
            BootstrapState::AlreadyThreaded
        }
        else {
            BootstrapState::NeedsInit
        }
    }

    fn deadline(&self) -> Duration {
        self.started.saturating_add(self.timeout)
    }

    fn elapsed(&self) -> Duration {
        self.driver.now().saturating_sub(self.started)
    }

    /// Initializes threading from this thread.
    ///
    /// Only valid while no other thread executes runtime code.
    fn initialize_directly(&self) {
        if self.family.requires_manual_thread_state()
            && let Some(interpreter) = self.interpreter
            && self.api.new_thread_state(interpreter).is_none()
        {
            tracing::trace!("no thread state created");
        }

        if self.family.initializes_under_gil_state() {
            let state = self.api.gil_ensure();
            self.api.init_threads();
            self.api.gil_release(state);
        }
        else {
            self.api.init_threads();
            self.api.release_lock();
        }
    }

    /// Registers the deferred call, at most once.
    ///
    /// Allocation-free: the context was prepared before any thread was
    /// suspended.
    fn schedule_deferred(&mut self) {
        if self.scheduled.is_some() {
            return;
        }

        let Some(context) = &self.prepared
        else {
            return;
        };

        let arg = Arc::into_raw(Arc::clone(context)).cast_mut().cast::<c_void>();
        let func = run_deferred_init::<Api, Driver::Signal>;

        if unsafe { self.api.add_pending_call(func, arg) } {
            self.scheduled = Some(Arc::clone(context));
            tracing::trace!("deferred call scheduled");
        }
        else {
            // The runtime did not take the reference.
            let context = arg.cast_const().cast::<DeferredInit<Api, Driver::Signal>>();
            drop(unsafe { Arc::from_raw(context) });
            tracing::trace!("pending call queue full");
        }
    }
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
