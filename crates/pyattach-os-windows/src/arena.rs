use std::{alloc::Layout, ptr::NonNull};

use pyattach_core::Arena;
use windows_sys::Win32::{
    Foundation::HANDLE,
    System::Memory::{HeapAlloc, HeapCreate, HeapDestroy, HeapFree},
};

use crate::Error;

/// Guaranteed alignment of `HeapAlloc` blocks.
const MEMORY_ALLOCATION_ALIGNMENT: usize = 2 * size_of::<usize>();

/// An arena backed by a private, growable heap.
///
/// The heap lock is never held by threads other than the attaching one.
pub struct HeapArena {
    heap: HANDLE,
}

impl HeapArena {
    /// Creates a new private heap.
    pub fn new() -> Result<Self, Error> {
        let heap = unsafe { HeapCreate(0, 0, 0) };
        if heap == 0 {
            return Err(Error::last("HeapCreate"));
        }

        Ok(Self { heap })
    }
}

impl Arena for HeapArena {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.align() > MEMORY_ALLOCATION_ALIGNMENT {
            return None;
        }

        NonNull::new(unsafe { HeapAlloc(self.heap, 0, layout.size()) }.cast())
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        unsafe { HeapFree(self.heap, 0, ptr.as_ptr().cast_const().cast()) };
    }
}

impl Drop for HeapArena {
    fn drop(&mut self) {
        unsafe { HeapDestroy(self.heap) };
    }
}
