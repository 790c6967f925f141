use std::{alloc::Layout, cell::Cell, ptr::NonNull};

use pyattach_core::Arena;

use crate::Error;

/// Size of the mapping backing one arena.
const ARENA_SIZE: usize = 1024 * 1024;

/// A bump arena over a private anonymous mapping.
///
/// The mapping is created up front, so allocating never enters the C
/// allocator. Freeing the most recent block rolls the offset back, and the
/// whole mapping is reused once no block is live.
pub struct MmapArena {
    base: NonNull<u8>,
    offset: Cell<usize>,
    live: Cell<usize>,
}

impl MmapArena {
    /// Maps a new arena.
    pub fn new() -> Result<Self, Error> {
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                ARENA_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(Error::last("mmap"));
        }

        let Some(base) = NonNull::new(base.cast())
        else {
            return Err(Error::last("mmap"));
        };

        Ok(Self {
            base,
            offset: Cell::new(0),
            live: Cell::new(0),
        })
    }
}

impl Drop for MmapArena {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.base.as_ptr().cast(), ARENA_SIZE) };
    }
}

impl Arena for MmapArena {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let start = self.offset.get().checked_next_multiple_of(layout.align())?;
        let end = start.checked_add(layout.size().max(1))?;

        if end > ARENA_SIZE {
            return None;
        }

        self.offset.set(end);
        self.live.set(self.live.get() + 1);
        Some(unsafe { self.base.add(start) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let live = self.live.get().saturating_sub(1);
        self.live.set(live);

        if live == 0 {
            self.offset.set(0);
            return;
        }

        let start = ptr.as_ptr() as usize - self.base.as_ptr() as usize;
        if start + layout.size().max(1) == self.offset.get() {
            self.offset.set(start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_bounded() -> Result<(), Error> {
        let arena = MmapArena::new()?;

        let byte = arena.allocate(Layout::new::<u8>());
        let word = arena.allocate(Layout::new::<u64>());
        assert!(byte.is_some());
        assert!(word.is_some_and(|ptr| ptr.as_ptr() as usize % align_of::<u64>() == 0));

        let Ok(huge) = Layout::from_size_align(ARENA_SIZE, 8)
        else {
            panic!("invalid layout");
        };
        assert!(arena.allocate(huge).is_none());

        Ok(())
    }

    #[test]
    fn freed_blocks_are_reused() -> Result<(), Error> {
        let arena = MmapArena::new()?;
        let Ok(layout) = Layout::from_size_align(4096, 16)
        else {
            panic!("invalid layout");
        };

        // Far more than fits at once, as long as every block is returned.
        for _ in 0..10_000 {
            let first = arena.allocate(layout);
            let second = arena.allocate(layout);

            let (Some(first), Some(second)) = (first, second)
            else {
                panic!("arena exhausted");
            };

            unsafe {
                arena.deallocate(first, layout);
                arena.deallocate(second, layout);
            }
        }

        Ok(())
    }
}
