use std::{ptr, time::Duration};

use pyattach_core::CompletionSignal;
use windows_sys::Win32::{
    Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0},
    System::Threading::{CreateEventW, INFINITE, SetEvent, WaitForSingleObject},
};

use crate::Error;

/// A manual-reset event.
pub struct EventSignal {
    event: HANDLE,
}

impl EventSignal {
    /// Creates a new, non-signaled event.
    pub fn new() -> Result<Self, Error> {
        let event = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
        if event == 0 {
            return Err(Error::last("CreateEventW"));
        }

        Ok(Self { event })
    }
}

impl CompletionSignal for EventSignal {
    fn set(&self) {
        unsafe { SetEvent(self.event) };
    }

    fn is_set(&self) -> bool {
        unsafe { WaitForSingleObject(self.event, 0) == WAIT_OBJECT_0 }
    }

    fn wait(&self, timeout: Duration) -> bool {
        let milliseconds = u32::try_from(timeout.as_millis())
            .unwrap_or(INFINITE - 1)
            .min(INFINITE - 1);

        unsafe { WaitForSingleObject(self.event, milliseconds) == WAIT_OBJECT_0 }
    }
}

impl Drop for EventSignal {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.event) };
    }
}
