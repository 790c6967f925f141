use std::{
    os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd},
    time::{Duration, Instant},
};

use pyattach_core::CompletionSignal;

use crate::Error;

/// A completion signal backed by an `eventfd`.
///
/// Once set, the counter is never drained, so the descriptor stays
/// readable and every later wait returns immediately.
pub struct EventSignal {
    fd: OwnedFd,
}

impl EventSignal {
    /// Creates a new, unset signal.
    pub fn new() -> Result<Self, Error> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(Error::last("eventfd"));
        }

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Polls the descriptor for readability.
    ///
    /// Returns `None` if the poll was interrupted.
    fn poll(&self, timeout: i32) -> Option<bool> {
        let mut fds = [libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];

        #[rustfmt::skip]
        let poll_result = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as _,
                timeout
            )
        };

        match poll_result {
            0 => Some(false),
            -1 => None,
            _ => Some(fds[0].revents & libc::POLLIN != 0),
        }
    }
}

impl CompletionSignal for EventSignal {
    fn set(&self) {
        let value = 1u64;
        let written = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&raw const value).cast(),
                size_of::<u64>(),
            )
        };

        if written != size_of::<u64>() as isize {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "completion signal not set"
            );
        }
    }

    fn is_set(&self) -> bool {
        self.poll(0).unwrap_or(false)
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let timeout = i32::try_from(remaining.as_millis()).unwrap_or(i32::MAX);

            match self.poll(timeout) {
                Some(true) => return true,
                Some(false) if remaining.is_zero() => return false,
                Some(false) => continue,
                None => {
                    let error = std::io::Error::last_os_error();
                    if error.kind() != std::io::ErrorKind::Interrupted {
                        tracing::warn!(%error, "completion wait failed");
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn set_from_another_thread_wakes_waiter() -> Result<(), Error> {
        let signal = Arc::new(EventSignal::new()?);
        assert!(!signal.is_set());
        assert!(!signal.wait(Duration::from_millis(10)));

        let setter = thread::spawn({
            let signal = Arc::clone(&signal);
            move || signal.set()
        });

        assert!(signal.wait(Duration::from_secs(5)));
        assert!(signal.is_set());
        assert!(signal.wait(Duration::ZERO));

        setter.join().expect("setter panicked");
        Ok(())
    }
}
