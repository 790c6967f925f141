use std::{alloc::Layout, ptr::NonNull};

use crate::{Arena, AttachError, ThreadControl, ThreadId};

struct Entry<Handle> {
    id: ThreadId,
    handle: Handle,
}

/// The threads held suspended by one inspection pass.
///
/// Storage comes from the driver arena, never from the general allocator,
/// so the set can grow while arbitrary threads are frozen.
///
/// Every handle is resumed and released exactly once: by [`resume_all`], or
/// when the set is dropped.
///
/// [`resume_all`]: Self::resume_all
pub struct SuspendedThreadSet<'a, Control>
where
    Control: ThreadControl,
{
    control: &'a Control,
    arena: &'a Control::Arena,
    entries: NonNull<Entry<Control::Handle>>,
    len: usize,
    capacity: usize,
    complete: bool,
}

impl<'a, Control> SuspendedThreadSet<'a, Control>
where
    Control: ThreadControl,
{
    const INITIAL_CAPACITY: usize = 16;

    /// Creates an empty set. Nothing is allocated until the first insert.
    pub fn new(control: &'a Control, arena: &'a Control::Arena) -> Self {
        Self {
            control,
            arena,
            entries: NonNull::dangling(),
            len: 0,
            capacity: 0,
            complete: false,
        }
    }

    /// Returns the number of held threads.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether no thread is held.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Checks whether every other live thread of the process is held.
    ///
    /// Only a complete set proves that no runtime code runs concurrently.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn set_complete(&mut self, complete: bool) {
        self.complete = complete;
    }

    /// Checks whether the thread with the given ID is held.
    pub fn contains(&self, id: ThreadId) -> bool {
        self.ids().any(|held| held == id)
    }

    /// Returns the IDs of the held threads.
    pub fn ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.entries().iter().map(|entry| entry.id)
    }

    /// Takes ownership of a suspended thread.
    ///
    /// If the arena cannot grow the set, the thread is resumed and released
    /// before the error is returned.
    pub fn insert(&mut self, id: ThreadId, handle: Control::Handle) -> Result<(), AttachError> {
        if self.len == self.capacity
            && let Err(err) = self.grow()
        {
            self.control.resume(&handle);
            self.control.release(handle);
            return Err(err);
        }

        unsafe {
            self.entries
                .as_ptr()
                .add(self.len)
                .write(Entry { id, handle });
        }
        self.len += 1;

        Ok(())
    }

    /// Resumes and releases every held thread and empties the set.
    ///
    /// Safe to call on an empty set and to call repeatedly.
    pub fn resume_all(&mut self) {
        let len = std::mem::replace(&mut self.len, 0);
        self.complete = false;

        for index in 0..len {
            let Entry { id, handle } = unsafe { self.entries.as_ptr().add(index).read() };

            self.control.resume(&handle);
            self.control.release(handle);
            tracing::trace!(tid = %id, "thread resumed");
        }
    }

    fn entries(&self) -> &[Entry<Control::Handle>] {
        unsafe { std::slice::from_raw_parts(self.entries.as_ptr(), self.len) }
    }

    fn layout(capacity: usize) -> Result<Layout, AttachError> {
        Layout::array::<Entry<Control::Handle>>(capacity)
            .map_err(|_| AttachError::Other("suspended thread set too large"))
    }

    fn grow(&mut self) -> Result<(), AttachError> {
        let capacity = match self.capacity {
            0 => Self::INITIAL_CAPACITY,
            capacity => capacity * 2,
        };

        let layout = Self::layout(capacity)?;
        let entries = self
            .arena
            .allocate(layout)
            .ok_or(AttachError::Other("suspended thread arena exhausted"))?
            .cast::<Entry<Control::Handle>>();

        if self.capacity != 0 {
            unsafe {
                std::ptr::copy_nonoverlapping(self.entries.as_ptr(), entries.as_ptr(), self.len);
                self.arena
                    .deallocate(self.entries.cast(), Self::layout(self.capacity)?);
            }
        }

        self.entries = entries;
        self.capacity = capacity;
        Ok(())
    }
}

impl<Control> Drop for SuspendedThreadSet<'_, Control>
where
    Control: ThreadControl,
{
    fn drop(&mut self) {
        self.resume_all();

        if self.capacity != 0
            && let Ok(layout) = Self::layout(self.capacity)
        {
            unsafe { self.arena.deallocate(self.entries.cast(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockProcess, MockThread};

    #[test]
    fn drop_resumes_and_releases_everything() -> Result<(), AttachError> {
        let process = MockProcess::new();
        for tid in 1..=40 {
            process.spawn(MockThread::new(tid));
        }

        let driver = process.driver();
        let arena = driver.create_arena()?;

        {
            let mut set = SuspendedThreadSet::new(&driver, &arena);
            for tid in 1..=40 {
                let handle = driver.suspend(ThreadId(tid)).ok_or(AttachError::Other("gone"))?;
                set.insert(ThreadId(tid), handle)?;
            }

            assert_eq!(set.len(), 40);
            assert!(set.contains(ThreadId(33)));
            assert!(!set.contains(ThreadId(41)));
        }

        let counters = process.counters();
        assert_eq!(counters.suspends, 40);
        assert_eq!(counters.resumes, 40);
        assert_eq!(counters.releases, 40);
        assert_eq!(process.arena_live_blocks(), 0);

        Ok(())
    }

    #[test]
    fn resume_all_is_idempotent() -> Result<(), AttachError> {
        let process = MockProcess::new();
        process.spawn(MockThread::new(7));

        let driver = process.driver();
        let arena = driver.create_arena()?;
        let mut set = SuspendedThreadSet::new(&driver, &arena);

        set.resume_all();
        assert!(set.is_empty());

        let handle = driver.suspend(ThreadId(7)).ok_or(AttachError::Other("gone"))?;
        set.insert(ThreadId(7), handle)?;
        set.resume_all();
        set.resume_all();
        drop(set);

        let counters = process.counters();
        assert_eq!(counters.resumes, 1);
        assert_eq!(counters.releases, 1);

        Ok(())
    }

    #[test]
    fn failed_growth_releases_the_rejected_thread() -> Result<(), AttachError> {
        let process = MockProcess::new();
        process.spawn(MockThread::new(3));
        process.exhaust_arena();

        let driver = process.driver();
        let arena = driver.create_arena()?;
        let mut set = SuspendedThreadSet::new(&driver, &arena);

        let handle = driver.suspend(ThreadId(3)).ok_or(AttachError::Other("gone"))?;
        assert!(set.insert(ThreadId(3), handle).is_err());
        assert!(set.is_empty());

        let counters = process.counters();
        assert_eq!(counters.resumes, 1);
        assert_eq!(counters.releases, 1);

        Ok(())
    }
}
