//! Signal-based thread parking.
//!
//! Linux has no call to suspend another thread of the same process. A
//! thread is parked instead by sending it a real-time signal whose handler
//! publishes the interrupted instruction pointer and then blocks on a futex
//! until it is released.
//!
//! Both sides only touch a static slot table, atomics and raw system calls.
//! Nothing here allocates or takes a lock, so parking is safe while other
//! threads are already parked at arbitrary points.

use std::{
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::{Duration, Instant},
};

use once_cell::sync::OnceCell;

use crate::Error;

/// Maximum number of threads parked at once.
const SLOT_COUNT: usize = 1024;

/// How long to wait for a signalled thread to enter the handler.
///
/// Threads that block the signal, or sit in an uninterruptible wait, are
/// given up on once it elapses. They are still alive, see [`is_alive`].
const PARK_TIMEOUT: Duration = Duration::from_millis(100);

const FREE: u32 = 0;
const SIGNALED: u32 = 1;
const PARKED: u32 = 2;
const RESUMED: u32 = 3;
const CANCELLED: u32 = 4;

struct Slot {
    /// Thread owning the slot, `0` when free.
    tid: AtomicU32,
    state: AtomicU32,
    ip: AtomicU64,
}

impl Slot {
    const fn new() -> Self {
        Self {
            tid: AtomicU32::new(0),
            state: AtomicU32::new(FREE),
            ip: AtomicU64::new(0),
        }
    }

    fn free(&self) {
        self.state.store(FREE, Ordering::Relaxed);
        self.tid.store(0, Ordering::Release);
    }
}

static SLOTS: [Slot; SLOT_COUNT] = [const { Slot::new() }; SLOT_COUNT];

/// Signal number used for parking, once the handler is installed.
static PARK_SIGNAL: OnceCell<i32> = OnceCell::new();

/// A thread blocked inside the parking handler.
#[derive(Debug)]
pub struct ParkedThread {
    slot: usize,
    tid: u32,
}

impl ParkedThread {
    /// Returns the ID of the parked thread.
    pub fn tid(&self) -> u32 {
        self.tid
    }

    /// Returns the instruction pointer at which the thread was interrupted.
    pub fn instruction_pointer(&self) -> Option<u64> {
        match SLOTS[self.slot].ip.load(Ordering::Relaxed) {
            0 => None,
            ip => Some(ip),
        }
    }
}

/// Installs the parking signal handler.
///
/// Installation happens once per process; later calls return the signal
/// chosen by the first.
pub fn install() -> Result<i32, Error> {
    PARK_SIGNAL.get_or_try_init(install_handler).copied()
}

fn install_handler() -> Result<i32, Error> {
    let signal = libc::SIGRTMIN() + 2;

    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler as libc::sighandler_t;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART | libc::SA_ONSTACK;
    unsafe { libc::sigfillset(&mut action.sa_mask) };

    let result = unsafe { libc::sigaction(signal, &action, std::ptr::null_mut()) };
    if result != 0 {
        return Err(Error::Handler(signal));
    }

    tracing::debug!(signal, "parking handler installed");
    Ok(signal)
}

/// Parks the thread `tid`.
///
/// Returns `None` if the handler is not installed, the thread no longer
/// exists, no slot is free, or the thread did not enter the handler in
/// time. A slot given up on stays with the thread and is reused by its next
/// park.
pub fn park(tid: u32) -> Option<ParkedThread> {
    let signal = *PARK_SIGNAL.get()?;
    let slot = claim(tid)?;
    let entry = &SLOTS[slot];

    entry.ip.store(0, Ordering::Relaxed);
    entry.state.store(SIGNALED, Ordering::Release);

    let result = unsafe {
        libc::syscall(
            libc::SYS_tgkill,
            libc::getpid(),
            tid as libc::pid_t,
            signal,
        )
    };

    if result != 0 {
        entry.free();
        return None;
    }

    let deadline = Instant::now() + PARK_TIMEOUT;

    loop {
        if entry.state.load(Ordering::Acquire) == PARKED {
            return Some(ParkedThread { slot, tid });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            // The handler frees a cancelled slot if the signal arrives later.
            match entry.state.compare_exchange(
                SIGNALED,
                CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Err(PARKED) => continue,
                _ => return None,
            }
        }

        futex_wait(&entry.state, SIGNALED, Some(remaining));
    }
}

/// Releases a parked thread.
pub fn unpark(thread: &ParkedThread) {
    let entry = &SLOTS[thread.slot];
    entry.state.store(RESUMED, Ordering::Release);
    futex_wake(&entry.state);
}

/// Checks whether the thread `tid` of this process still exists.
pub fn is_alive(tid: u32) -> bool {
    let result =
        unsafe { libc::syscall(libc::SYS_tgkill, libc::getpid(), tid as libc::pid_t, 0) };

    result == 0 || unsafe { *libc::__errno_location() } != libc::ESRCH
}

fn claim(tid: u32) -> Option<usize> {
    // Take back a slot given up on for this thread, or for a thread that
    // has exited since, before looking for a free one.
    let reclaimed = SLOTS.iter().position(|slot| {
        let owner = slot.tid.load(Ordering::Acquire);

        slot.state.load(Ordering::Acquire) == CANCELLED
            && (owner == tid || !is_alive(owner))
            && slot
                .state
                .compare_exchange(CANCELLED, FREE, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    });

    if let Some(index) = reclaimed {
        SLOTS[index].tid.store(tid, Ordering::Release);
        return Some(index);
    }

    SLOTS.iter().position(|slot| {
        slot.tid
            .compare_exchange(0, tid, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    })
}

extern "C" fn handler(
    _signal: libc::c_int,
    _info: *mut libc::siginfo_t,
    context: *mut libc::c_void,
) {
    let errno = unsafe { *libc::__errno_location() };
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as u32;

    for entry in &SLOTS {
        if entry.tid.load(Ordering::Acquire) != tid {
            continue;
        }

        match entry.state.load(Ordering::Acquire) {
            SIGNALED => {
                entry
                    .ip
                    .store(unsafe { interrupted_ip(context) }, Ordering::Relaxed);

                if entry
                    .state
                    .compare_exchange(SIGNALED, PARKED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    futex_wake(&entry.state);

                    while entry.state.load(Ordering::Acquire) == PARKED {
                        futex_wait(&entry.state, PARKED, None);
                    }

                    entry.free();
                }
                else {
                    release_cancelled(entry);
                }

                break;
            }
            // Left behind by an earlier park that timed out.
            CANCELLED => release_cancelled(entry),
            _ => {}
        }
    }

    unsafe { *libc::__errno_location() = errno };
}

/// Frees a slot whose park gave up, unless the next park of the same thread
/// already took it back.
fn release_cancelled(entry: &Slot) {
    if entry
        .state
        .compare_exchange(CANCELLED, FREE, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        entry.tid.store(0, Ordering::Release);
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn interrupted_ip(context: *mut libc::c_void) -> u64 {
    let context = context.cast::<libc::ucontext_t>();
    unsafe { (*context).uc_mcontext.gregs[libc::REG_RIP as usize] as u64 }
}

#[cfg(target_arch = "aarch64")]
unsafe fn interrupted_ip(context: *mut libc::c_void) -> u64 {
    let context = context.cast::<libc::ucontext_t>();
    unsafe { (*context).uc_mcontext.pc as u64 }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
unsafe fn interrupted_ip(_context: *mut libc::c_void) -> u64 {
    0
}

fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) {
    let timespec = timeout.map(|timeout| libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as _,
    });

    let timespec = match &timespec {
        Some(timespec) => timespec as *const libc::timespec,
        None => std::ptr::null(),
    };

    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            timespec,
        )
    };
}

fn futex_wake(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            i32::MAX,
        )
    };
}
