use std::{
    ops::ControlFlow,
    time::{Duration, Instant},
};

use once_cell::unsync::OnceCell;
use pyattach_core::{
    Address, AttachDriver, AttachError, ImageEnumerator, LoadedImage, ThreadControl, ThreadId,
};

use crate::{
    Error, EventSignal, MmapArena,
    images::{self, LinkedObject},
    park::{self, ParkedThread},
    tasks,
};

/// Attach driver for the current Linux process.
///
/// Threads are parked with a real-time signal; see [`park`](crate::park).
pub struct LinuxDriver {
    epoch: Instant,
    executable: OnceCell<String>,
}

impl LinuxDriver {
    /// Creates a new driver, installing the parking signal handler.
    pub fn new() -> Result<Self, Error> {
        park::install()?;

        Ok(Self {
            epoch: Instant::now(),
            executable: OnceCell::new(),
        })
    }

    /// Returns the path of the main program.
    fn executable(&self) -> Result<&str, Error> {
        self.executable
            .get_or_try_init(|| {
                std::fs::read_link("/proc/self/exe")
                    .map(|path| path.to_string_lossy().into_owned())
                    .map_err(|source| Error::Sys {
                        call: "readlink",
                        source,
                    })
            })
            .map(String::as_str)
    }

    fn image(&self, object: LinkedObject) -> Result<LoadedImage, Error> {
        let path = match object.name {
            Some(name) => name,
            None => self.executable()?.to_owned(),
        };

        Ok(LoadedImage::new(object.base, path))
    }
}

impl ImageEnumerator for LinuxDriver {
    fn images(&self) -> Result<Vec<LoadedImage>, AttachError> {
        let mut objects = images::linked_objects().into_iter();

        // The main program is always reported first and without a name.
        let mut images = Vec::new();
        if let Some(main) = objects.next() {
            images.push(self.image(main)?);
        }

        images.extend(
            objects
                .filter(|object| object.name.is_some())
                .map(|object| self.image(object))
                .collect::<Result<Vec<_>, _>>()?,
        );

        tracing::debug!(count = images.len(), "objects enumerated");
        Ok(images)
    }

    fn resolve(&self, image: &LoadedImage, name: &str) -> Option<Address> {
        let is_main = images::linked_objects()
            .first()
            .is_some_and(|main| main.name.is_none() && main.base == image.base);

        let path = match is_main {
            true => None,
            false => Some(image.path.as_str()),
        };

        images::resolve(path, image.base, name)
    }
}

impl ThreadControl for LinuxDriver {
    type Handle = ParkedThread;
    type Arena = MmapArena;

    fn current_thread_id(&self) -> ThreadId {
        ThreadId(unsafe { libc::syscall(libc::SYS_gettid) } as u64)
    }

    fn for_each_thread(
        &self,
        mut f: impl FnMut(ThreadId) -> ControlFlow<()>,
    ) -> Result<(), AttachError> {
        tasks::for_each_task(|tid| f(ThreadId(u64::from(tid))))
    }

    fn suspend(&self, id: ThreadId) -> Option<Self::Handle> {
        // A thread cannot wait for itself to park.
        if id == self.current_thread_id() {
            return None;
        }

        park::park(u32::try_from(id.0).ok()?)
    }

    fn is_alive(&self, id: ThreadId) -> bool {
        u32::try_from(id.0).is_ok_and(park::is_alive)
    }

    fn instruction_pointer(&self, handle: &Self::Handle) -> Option<Address> {
        handle.instruction_pointer().map(Address)
    }

    fn resume(&self, handle: &Self::Handle) {
        park::unpark(handle);
    }

    fn release(&self, _handle: Self::Handle) {}

    fn yield_now(&self) {
        unsafe { libc::sched_yield() };
    }

    fn create_arena(&self) -> Result<Self::Arena, AttachError> {
        Ok(MmapArena::new()?)
    }
}

impl AttachDriver for LinuxDriver {
    type Signal = EventSignal;

    fn create_signal(&self) -> Result<Self::Signal, AttachError> {
        Ok(EventSignal::new()?)
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}
