use std::{ops::ControlFlow, time::Duration};

use crate::{AddressRange, AttachDriver, AttachError, SuspendedThreadSet, ThreadControl as _};

/// Stops every other thread of the process using OS primitives only.
///
/// Nothing here logs above `trace` level or touches the general allocator
/// while threads are held.
pub struct ThreadSuspensionController<'a, Driver>
where
    Driver: AttachDriver,
{
    driver: &'a Driver,
    arena: &'a Driver::Arena,
}

impl<'a, Driver> ThreadSuspensionController<'a, Driver>
where
    Driver: AttachDriver,
{
    /// Creates a new controller whose sets allocate from `arena`.
    pub fn new(driver: &'a Driver, arena: &'a Driver::Arena) -> Self {
        Self { driver, arena }
    }

    /// Suspends every thread except the caller.
    ///
    /// A thread whose instruction pointer lies inside `hazard` is resumed
    /// right away and retried on the next pass, so the routine it is
    /// executing can finish. A live thread that cannot be stopped is retried
    /// the same way. Passes repeat until one adds no thread and meets no
    /// such thread, `done` reports true, or the clock reaches `deadline`.
    ///
    /// Threads that exit between enumeration and suspension are skipped.
    /// The returned set is [complete] only if the last pass settled.
    ///
    /// [complete]: SuspendedThreadSet::is_complete
    pub fn suspend_all(
        &self,
        hazard: AddressRange,
        deadline: Duration,
        done: impl Fn() -> bool,
    ) -> Result<SuspendedThreadSet<'a, Driver>, AttachError> {
        let driver = self.driver;
        let current = driver.current_thread_id();
        let mut set = SuspendedThreadSet::new(driver, self.arena);

        loop {
            let mut added = 0usize;
            let mut retries = 0usize;
            let mut stopped = false;
            let mut failure = None;

            driver.for_each_thread(|id| {
                if id == current || set.contains(id) {
                    return ControlFlow::Continue(());
                }

                match driver.suspend(id) {
                    Some(handle) => match driver.instruction_pointer(&handle) {
                        Some(ip) if hazard.contains(ip) => {
                            tracing::trace!(tid = %id, %ip, "thread inside hazard window");
                            driver.resume(&handle);
                            driver.yield_now();
                            driver.release(handle);
                            retries += 1;
                        }
                        ip => {
                            if ip.is_none() {
                                tracing::trace!(tid = %id, "instruction pointer unavailable");
                            }

                            if let Err(err) = set.insert(id, handle) {
                                failure = Some(err);
                                return ControlFlow::Break(());
                            }

                            tracing::trace!(tid = %id, "thread suspended");
                            added += 1;
                        }
                    },
                    None if driver.is_alive(id) => {
                        tracing::trace!(tid = %id, "thread could not be suspended");
                        driver.yield_now();
                        retries += 1;
                    }
                    None => {
                        tracing::trace!(tid = %id, "thread gone before suspension");
                    }
                }

                if done() {
                    stopped = true;
                    ControlFlow::Break(())
                }
                else {
                    ControlFlow::Continue(())
                }
            })?;

            if let Some(err) = failure {
                return Err(err);
            }

            let settled = !stopped && added == 0 && retries == 0;
            if settled || done() || driver.now() >= deadline {
                set.set_complete(settled);
                break;
            }
        }

        Ok(set)
    }

    /// Resumes and releases every thread held by `set`.
    pub fn resume_all(&self, set: &mut SuspendedThreadSet<'a, Driver>) {
        set.resume_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Address, ThreadControl, ThreadId,
        testing::{Event, MockProcess, MockThread},
    };

    const HAZARD: AddressRange = AddressRange {
        start: Address(0x7000_1000),
        length: 0x100,
    };

    const DEADLINE: Duration = Duration::from_secs(20);

    #[test]
    fn skips_the_caller() -> Result<(), AttachError> {
        let process = MockProcess::new();
        process.spawn(MockThread::new(1));
        process.spawn(MockThread::new(2));

        let driver = process.driver();
        let arena = driver.create_arena()?;
        let controller = ThreadSuspensionController::new(&driver, &arena);

        let mut set = controller.suspend_all(HAZARD, DEADLINE, || false)?;
        assert_eq!(set.len(), 2);
        assert!(set.is_complete());
        assert!(!set.contains(driver.current_thread_id()));

        controller.resume_all(&mut set);
        assert!(set.is_empty());

        Ok(())
    }

    #[test]
    fn hazard_thread_is_never_held() -> Result<(), AttachError> {
        let process = MockProcess::new();
        process.spawn(MockThread::new(1));
        process.spawn(MockThread::new(2).with_ip(Address(0x7000_1080)));
        process.spawn(MockThread::new(3));

        let driver = process.driver();
        let arena = driver.create_arena()?;
        let controller = ThreadSuspensionController::new(&driver, &arena);

        let set = controller.suspend_all(HAZARD, DEADLINE, || false)?;
        assert!(set.contains(ThreadId(1)));
        assert!(!set.contains(ThreadId(2)));
        assert!(set.contains(ThreadId(3)));
        assert!(!set.is_complete());
        drop(set);

        // The hazard thread was retried on every pass until the deadline.
        assert!(process.now() >= DEADLINE);

        let counters = process.counters();
        assert_eq!(counters.suspends, counters.resumes);
        assert_eq!(counters.suspends, counters.releases);
        assert!(counters.yields > 0);

        Ok(())
    }

    #[test]
    fn hazard_end_is_exclusive() -> Result<(), AttachError> {
        let process = MockProcess::new();
        process.spawn(MockThread::new(1).with_ip(Address(0x7000_1100)));
        process.spawn(MockThread::new(2).with_ip(Address(0x7000_1000)).leaves_hazard_after(1));

        let driver = process.driver();
        let arena = driver.create_arena()?;
        let controller = ThreadSuspensionController::new(&driver, &arena);

        let set = controller.suspend_all(HAZARD, DEADLINE, || false)?;
        assert!(set.contains(ThreadId(1)));

        // Thread 2 finished the registration routine after one resume and
        // was picked up on the next pass.
        assert!(set.contains(ThreadId(2)));
        drop(set);

        let hazard_resumes = process
            .events()
            .iter()
            .filter(|event| matches!(event, Event::Resume(ThreadId(2))))
            .count();
        assert_eq!(hazard_resumes, 2);

        Ok(())
    }

    #[test]
    fn exited_threads_are_skipped() -> Result<(), AttachError> {
        let process = MockProcess::new();
        process.spawn(MockThread::new(1).exited());
        process.spawn(MockThread::new(2));

        let driver = process.driver();
        let arena = driver.create_arena()?;
        let controller = ThreadSuspensionController::new(&driver, &arena);

        let set = controller.suspend_all(HAZARD, DEADLINE, || false)?;
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![ThreadId(2)]);
        assert!(set.is_complete());

        Ok(())
    }

    #[test]
    fn live_thread_that_cannot_be_stopped_is_retried() -> Result<(), AttachError> {
        let process = MockProcess::new();
        process.spawn(MockThread::new(1));
        process.spawn(MockThread::new(2).unstoppable());

        let driver = process.driver();
        let arena = driver.create_arena()?;
        let controller = ThreadSuspensionController::new(&driver, &arena);

        let set = controller.suspend_all(HAZARD, DEADLINE, || false)?;
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![ThreadId(1)]);
        assert!(!set.is_complete());
        drop(set);

        assert!(process.now() >= DEADLINE);
        assert!(process.counters().enumerations > 2);

        Ok(())
    }

    #[test]
    fn unreadable_instruction_pointer_keeps_the_thread() -> Result<(), AttachError> {
        let process = MockProcess::new();
        process.spawn(MockThread::new(4).without_context());

        let driver = process.driver();
        let arena = driver.create_arena()?;
        let controller = ThreadSuspensionController::new(&driver, &arena);

        let set = controller.suspend_all(HAZARD, DEADLINE, || false)?;
        assert!(set.contains(ThreadId(4)));

        Ok(())
    }

    #[test]
    fn stops_once_done() -> Result<(), AttachError> {
        let process = MockProcess::new();
        for tid in 1..=8 {
            process.spawn(MockThread::new(tid));
        }

        let driver = process.driver();
        let arena = driver.create_arena()?;
        let controller = ThreadSuspensionController::new(&driver, &arena);

        let set = controller.suspend_all(HAZARD, DEADLINE, || true)?;
        assert_eq!(set.len(), 1);

        Ok(())
    }
}
