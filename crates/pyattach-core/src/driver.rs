use std::{alloc::Layout, ops::ControlFlow, ptr::NonNull, time::Duration};

use crate::{Address, AttachError, LoadedImage, ThreadId};

/// Enumeration of loaded images and resolution of their exports.
pub trait ImageEnumerator {
    /// Returns every image currently loaded into the process.
    fn images(&self) -> Result<Vec<LoadedImage>, AttachError>;

    /// Resolves an exported symbol of `image`.
    ///
    /// Absence is reported, never fatal. Only the existence of the export
    /// can be checked; whether the address is callable cannot.
    fn resolve(&self, image: &LoadedImage, name: &str) -> Option<Address>;
}

/// Enumeration, suspension and inspection of the threads of the current
/// process.
///
/// Every method may be called while other threads of the process are
/// suspended. Implementations must therefore not allocate from the general
/// allocator, take locks shared with arbitrary code, or call back into the
/// runtime.
pub trait ThreadControl {
    /// An owned handle to a suspended thread.
    type Handle;

    /// The arena backing the suspended-thread set.
    type Arena: Arena;

    /// Returns the ID of the calling thread.
    fn current_thread_id(&self) -> ThreadId;

    /// Calls `f` for every thread of the current process, including the
    /// calling thread.
    ///
    /// Enumeration stops early when `f` returns [`ControlFlow::Break`].
    fn for_each_thread(
        &self,
        f: impl FnMut(ThreadId) -> ControlFlow<()>,
    ) -> Result<(), AttachError>;

    /// Opens and suspends the thread with the given ID.
    ///
    /// Returns `None` if the thread exited since it was enumerated or could
    /// not be stopped. [`is_alive`] tells the two apart.
    ///
    /// [`is_alive`]: Self::is_alive
    fn suspend(&self, id: ThreadId) -> Option<Self::Handle>;

    /// Checks whether the thread with the given ID still exists.
    fn is_alive(&self, id: ThreadId) -> bool;

    /// Reads the instruction pointer of a suspended thread.
    fn instruction_pointer(&self, handle: &Self::Handle) -> Option<Address>;

    /// Resumes a previously suspended thread.
    fn resume(&self, handle: &Self::Handle);

    /// Releases a thread handle.
    fn release(&self, handle: Self::Handle);

    /// Yields the remainder of the time slice of the calling thread.
    fn yield_now(&self);

    /// Creates an arena that is safe to allocate from while threads are
    /// suspended.
    fn create_arena(&self) -> Result<Self::Arena, AttachError>;
}

/// A low-level allocation arena, distinct from the general allocator.
///
/// A thread suspended in the middle of a general-purpose allocation may
/// hold the allocator lock. The arena never shares state with that
/// allocator, so the driver can keep allocating while such a thread is
/// frozen.
pub trait Arena {
    /// Allocates a block described by `layout`.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns a block to the arena.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`] of the same arena with
    /// the same `layout` and must not be used afterwards.
    ///
    /// [`allocate`]: Self::allocate
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// A one-shot completion signal set by the deferred call.
///
/// The signal is set from a thread owned by the runtime and waited on by
/// the attaching thread.
pub trait CompletionSignal {
    /// Sets the signal, waking any waiter.
    fn set(&self);

    /// Checks whether the signal has been set.
    fn is_set(&self) -> bool;

    /// Waits until the signal is set or `timeout` elapses.
    ///
    /// Returns `true` if the signal was set.
    fn wait(&self, timeout: Duration) -> bool;
}

/// A trait for implementing an attach driver for one operating system.
pub trait AttachDriver: ImageEnumerator + ThreadControl {
    /// The completion signal used by the deferred call.
    ///
    /// The signal is set from a thread owned by the runtime.
    type Signal: CompletionSignal + Send + Sync + 'static;

    /// Creates a new, unset completion signal.
    fn create_signal(&self) -> Result<Self::Signal, AttachError>;

    /// Returns the current value of a monotonic clock.
    ///
    /// The epoch is arbitrary; only differences are meaningful.
    fn now(&self) -> Duration;
}
