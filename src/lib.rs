//! In-process attach to a running CPython interpreter.
//!
//! This crate is loaded into the target process by an external injector,
//! which then calls one of the two C entry points:
//!
//! - [`AttachAndRunPythonCode`] evaluates a piece of source code in the
//!   first runtime that can be brought to a lockable state.
//! - [`AttachDebuggerTracing`] hands an externally supplied tracer to an
//!   installer callable in that runtime.
//!
//! Both return `0` on success, a positive [`AttachOutcome`] code if every
//! candidate runtime failed, or a negative code if the process could not be
//! inspected at all.
//!
//! The platform-independent machinery is re-exported at the crate root,
//! the operating system drivers live in [`os`].

use std::ffi::{CStr, c_char, c_int, c_uint, c_void};

pub use pyattach_core::*;
use pyattach_core::runtime::{NativeLinker, ObjectPtr};

#[cfg(not(any(target_os = "linux", windows)))]
compile_error!("only Linux and Windows processes can be attached to");

/// Operating system drivers.
pub mod os {
    #[cfg(target_os = "linux")]
    pub use pyattach_os_linux as linux;
    #[cfg(windows)]
    pub use pyattach_os_windows as windows;
}

#[cfg(target_os = "linux")]
type PlatformDriver = pyattach_os_linux::LinuxDriver;

#[cfg(windows)]
type PlatformDriver = pyattach_os_windows::WindowsDriver;

#[cfg(target_os = "linux")]
fn platform_driver() -> Result<PlatformDriver, AttachError> {
    Ok(pyattach_os_linux::LinuxDriver::new()?)
}

#[cfg(windows)]
fn platform_driver() -> Result<PlatformDriver, AttachError> {
    Ok(pyattach_os_windows::WindowsDriver::new())
}

/// Routes diagnostics to standard output.
///
/// A subscriber installed by an earlier attach stays in place.
fn init_diagnostics(options: &AttachOptions) {
    if !options.diagnostics {
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_writer(std::io::stdout)
        .try_init();
}

fn orchestrator(
    options: AttachOptions,
) -> Result<AttachOrchestrator<PlatformDriver, NativeLinker>, AttachError> {
    let driver = platform_driver()?;

    // The linker is only handed addresses resolved from runtime images.
    let linker = unsafe { NativeLinker::new() };

    Ok(AttachOrchestrator::new(driver, linker, options))
}

fn report(result: Result<AttachOutcome, AttachError>) -> c_int {
    match result {
        Ok(outcome) => outcome.code(),
        Err(err) => {
            tracing::debug!(%err, "attach failed");
            err.code()
        }
    }
}

/// Attaches to a runtime in the current process and evaluates `command`.
///
/// Bit 0 of `*attach_info` enables diagnostics printed to standard output.
///
/// # Safety
///
/// `command` must be a NUL-terminated string and `attach_info` must be
/// null or point to a readable integer.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn AttachAndRunPythonCode(
    command: *const c_char,
    attach_info: *mut c_int,
) -> c_int {
    let flags = match unsafe { attach_info.as_ref() } {
        Some(&flags) => AttachInfoFlags::from_bits_retain(flags),
        None => AttachInfoFlags::empty(),
    };

    let options = AttachOptions::from_flags(flags);
    init_diagnostics(&options);

    if command.is_null() {
        return report(Err(AttachError::InjectionFailed("no command")));
    }

    let command = unsafe { CStr::from_ptr(command) }.to_string_lossy();

    report(orchestrator(options).and_then(|mut orchestrator| orchestrator.run_code(&command)))
}

/// Attaches to a runtime in the current process and calls
/// `set_trace_func(trace_func, thread_id)` in it.
///
/// Both objects stay owned by the caller, which keeps them alive for the
/// duration of the call.
///
/// # Safety
///
/// `set_trace_func` and `trace_func` must be objects of the runtime the
/// process hosts.
#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn AttachDebuggerTracing(
    show_debug_info: bool,
    set_trace_func: *mut c_void,
    trace_func: *mut c_void,
    thread_id: c_uint,
) -> c_int {
    let options = AttachOptions::default().with_diagnostics(show_debug_info);
    init_diagnostics(&options);

    let (Some(installer), Some(tracer)) = (
        ObjectPtr::from_raw(set_trace_func.cast()),
        ObjectPtr::from_raw(trace_func.cast()),
    )
    else {
        return report(Err(AttachError::InjectionFailed("no tracer")));
    };

    let installer =
        CallableTraceInstaller::new(installer, tracer).with_diagnostics(show_debug_info);
    let thread_id = ThreadId(u64::from(thread_id));

    report(orchestrator(options).and_then(|mut orchestrator| {
        orchestrator.install_tracer(&installer, thread_id)
    }))
}
