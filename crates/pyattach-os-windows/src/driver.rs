use std::{
    ffi::CString,
    ops::ControlFlow,
    time::{Duration, Instant},
};

use pyattach_core::{
    Address, AttachDriver, AttachError, ImageEnumerator, LoadedImage, ThreadControl, ThreadId,
};
use windows_sys::Win32::{
    Foundation::{CloseHandle, HANDLE, HMODULE, INVALID_HANDLE_VALUE, MAX_PATH, STILL_ACTIVE},
    System::{
        Diagnostics::ToolHelp::{
            CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First,
            Thread32Next,
        },
        LibraryLoader::{GetModuleFileNameW, GetProcAddress},
        ProcessStatus::K32EnumProcessModules,
        Threading::{
            GetCurrentProcess, GetCurrentProcessId, GetCurrentThreadId, GetExitCodeThread,
            OpenThread, ResumeThread, SuspendThread, SwitchToThread, THREAD_GET_CONTEXT,
            THREAD_QUERY_INFORMATION, THREAD_QUERY_LIMITED_INFORMATION, THREAD_SUSPEND_RESUME,
        },
    },
};

use crate::{Error, EventSignal, HeapArena};

/// An open handle to a suspended thread.
pub struct ThreadHandle(HANDLE);

/// Closes a Toolhelp snapshot on drop.
struct Snapshot(HANDLE);

impl Drop for Snapshot {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

/// Attach driver for the current Windows process.
pub struct WindowsDriver {
    process_id: u32,
    epoch: Instant,
}

impl WindowsDriver {
    /// Creates a new driver for the current process.
    pub fn new() -> Self {
        Self {
            process_id: unsafe { GetCurrentProcessId() },
            epoch: Instant::now(),
        }
    }

    fn modules(&self) -> Result<Vec<HMODULE>, Error> {
        let process = unsafe { GetCurrentProcess() };
        let mut modules: Vec<HMODULE> = vec![0; 256];

        loop {
            let size = (modules.len() * size_of::<HMODULE>()) as u32;
            let mut needed = 0;

            let result =
                unsafe { K32EnumProcessModules(process, modules.as_mut_ptr(), size, &mut needed) };
            if result == 0 {
                return Err(Error::last("K32EnumProcessModules"));
            }

            // Modules may be loaded between the two calls.
            let count = needed as usize / size_of::<HMODULE>();
            if count <= modules.len() {
                modules.truncate(count);
                return Ok(modules);
            }

            modules.resize(count, 0);
        }
    }
}

impl Default for WindowsDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn module_path(module: HMODULE) -> Option<String> {
    let mut buffer = vec![0u16; MAX_PATH as usize];

    loop {
        let capacity = u32::try_from(buffer.len()).ok()?;
        let length = unsafe { GetModuleFileNameW(module, buffer.as_mut_ptr(), capacity) };

        match length {
            0 => return None,
            length if length < capacity => {
                return Some(String::from_utf16_lossy(&buffer[..length as usize]));
            }
            _ => buffer.resize(buffer.len() * 2, 0),
        }
    }
}

impl ImageEnumerator for WindowsDriver {
    fn images(&self) -> Result<Vec<LoadedImage>, AttachError> {
        let images = self
            .modules()?
            .into_iter()
            .filter_map(|module| {
                let path = module_path(module)?;
                Some(LoadedImage::new(Address(module as u64), path))
            })
            .collect::<Vec<_>>();

        tracing::debug!(count = images.len(), "modules enumerated");
        Ok(images)
    }

    fn resolve(&self, image: &LoadedImage, name: &str) -> Option<Address> {
        let name = CString::new(name).ok()?;
        let function = unsafe { GetProcAddress(image.base.0 as HMODULE, name.as_ptr().cast()) }?;
        Some(Address(function as usize as u64))
    }
}

impl ThreadControl for WindowsDriver {
    type Handle = ThreadHandle;
    type Arena = HeapArena;

    fn current_thread_id(&self) -> ThreadId {
        ThreadId(u64::from(unsafe { GetCurrentThreadId() }))
    }

    fn for_each_thread(
        &self,
        mut f: impl FnMut(ThreadId) -> ControlFlow<()>,
    ) -> Result<(), AttachError> {
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) };
        if snapshot == INVALID_HANDLE_VALUE {
            // Threads may be held; stay off the allocator.
            return Err(AttachError::Other("thread snapshot failed"));
        }

        let snapshot = Snapshot(snapshot);

        let mut entry: THREADENTRY32 = unsafe { std::mem::zeroed() };
        entry.dwSize = size_of::<THREADENTRY32>() as u32;

        let mut more = unsafe { Thread32First(snapshot.0, &mut entry) } != 0;
        while more {
            if entry.th32OwnerProcessID == self.process_id
                && f(ThreadId(u64::from(entry.th32ThreadID))).is_break()
            {
                break;
            }

            more = unsafe { Thread32Next(snapshot.0, &mut entry) } != 0;
        }

        Ok(())
    }

    fn suspend(&self, id: ThreadId) -> Option<Self::Handle> {
        let tid = u32::try_from(id.0).ok()?;
        let access = THREAD_SUSPEND_RESUME | THREAD_GET_CONTEXT | THREAD_QUERY_INFORMATION;

        let handle = unsafe { OpenThread(access, 0, tid) };
        if handle == 0 {
            return None;
        }

        if unsafe { SuspendThread(handle) } == u32::MAX {
            unsafe { CloseHandle(handle) };
            return None;
        }

        Some(ThreadHandle(handle))
    }

    fn is_alive(&self, id: ThreadId) -> bool {
        let Ok(tid) = u32::try_from(id.0)
        else {
            return false;
        };

        let handle = unsafe { OpenThread(THREAD_QUERY_LIMITED_INFORMATION, 0, tid) };
        if handle == 0 {
            return false;
        }

        let mut code = 0u32;
        let queried = unsafe { GetExitCodeThread(handle, &mut code) } != 0;
        unsafe { CloseHandle(handle) };

        queried && code == STILL_ACTIVE as u32
    }

    fn instruction_pointer(&self, handle: &Self::Handle) -> Option<Address> {
        context::instruction_pointer(handle.0)
    }

    fn resume(&self, handle: &Self::Handle) {
        if unsafe { ResumeThread(handle.0) } == u32::MAX {
            tracing::trace!("ResumeThread failed");
        }
    }

    fn release(&self, handle: Self::Handle) {
        unsafe { CloseHandle(handle.0) };
    }

    fn yield_now(&self) {
        unsafe { SwitchToThread() };
    }

    fn create_arena(&self) -> Result<Self::Arena, AttachError> {
        Ok(HeapArena::new()?)
    }
}

impl AttachDriver for WindowsDriver {
    type Signal = EventSignal;

    fn create_signal(&self) -> Result<Self::Signal, AttachError> {
        Ok(EventSignal::new()?)
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

mod context {
    use pyattach_core::Address;
    use windows_sys::Win32::{
        Foundation::HANDLE,
        System::Diagnostics::Debug::{CONTEXT, GetThreadContext},
    };

    #[cfg(target_arch = "x86_64")]
    pub fn instruction_pointer(thread: HANDLE) -> Option<Address> {
        use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_CONTROL_AMD64;

        let mut context: CONTEXT = unsafe { std::mem::zeroed() };
        context.ContextFlags = CONTEXT_CONTROL_AMD64;

        match unsafe { GetThreadContext(thread, &mut context) } {
            0 => None,
            _ => Some(Address(context.Rip)),
        }
    }

    #[cfg(target_arch = "x86")]
    pub fn instruction_pointer(thread: HANDLE) -> Option<Address> {
        use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_CONTROL_X86;

        let mut context: CONTEXT = unsafe { std::mem::zeroed() };
        context.ContextFlags = CONTEXT_CONTROL_X86;

        match unsafe { GetThreadContext(thread, &mut context) } {
            0 => None,
            _ => Some(Address(u64::from(context.Eip))),
        }
    }

    #[cfg(target_arch = "aarch64")]
    pub fn instruction_pointer(thread: HANDLE) -> Option<Address> {
        use windows_sys::Win32::System::Diagnostics::Debug::CONTEXT_CONTROL_ARM64;

        let mut context: CONTEXT = unsafe { std::mem::zeroed() };
        context.ContextFlags = CONTEXT_CONTROL_ARM64;

        match unsafe { GetThreadContext(thread, &mut context) } {
            0 => None,
            _ => Some(Address(context.Pc)),
        }
    }
}
