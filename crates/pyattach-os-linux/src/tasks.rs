use std::{
    ops::ControlFlow,
    os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd},
};

use pyattach_core::AttachError;
use zerocopy::{
    FromBytes, Immutable, KnownLayout,
    byteorder::native_endian::{I64, U16, U64},
};

/// Fixed part of a `linux_dirent64` record.
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, FromBytes, Immutable, KnownLayout)]
struct DirentHeader {
    ino: U64,
    off: I64,
    reclen: U16,
    kind: u8,
}

/// Size of the on-stack directory buffer.
const BUFFER_SIZE: usize = 4096;

/// Calls `f` with the ID of every thread of the current process.
///
/// Reads `/proc/self/task` with raw `getdents64` into a stack buffer, so
/// no memory is allocated. Entries that are not thread IDs are skipped.
///
/// Threads may be parked while this runs, so failures are reported
/// without allocating.
pub(crate) fn for_each_task(
    mut f: impl FnMut(u32) -> ControlFlow<()>,
) -> Result<(), AttachError> {
    let fd = unsafe {
        libc::open(
            c"/proc/self/task".as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    };

    if fd < 0 {
        return Err(AttachError::Other("task directory not opened"));
    }

    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let read = unsafe {
            libc::syscall(
                libc::SYS_getdents64,
                fd.as_raw_fd(),
                buffer.as_mut_ptr(),
                buffer.len(),
            )
        };

        let read = match usize::try_from(read) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(_) => return Err(AttachError::Other("task directory not read")),
        };

        let mut records = &buffer[..read.min(BUFFER_SIZE)];
        while let Ok((header, _)) = DirentHeader::ref_from_prefix(records) {
            let length = usize::from(header.reclen.get());
            if length < size_of::<DirentHeader>() || length > records.len() {
                return Err(AttachError::Other("malformed task directory"));
            }

            let name = &records[size_of::<DirentHeader>()..length];
            if let Some(tid) = parse_tid(name)
                && f(tid).is_break()
            {
                return Ok(());
            }

            records = &records[length..];
        }
    }
}

/// Parses a NUL-terminated decimal thread ID.
fn parse_tid(name: &[u8]) -> Option<u32> {
    let digits = name.split(|&byte| byte == 0).next()?;
    if digits.is_empty() {
        return None;
    }

    digits.iter().try_fold(0u32, |tid, &byte| {
        if !byte.is_ascii_digit() {
            return None;
        }

        tid.checked_mul(10)?.checked_add(u32::from(byte - b'0'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_thread_ids() {
        assert_eq!(parse_tid(b"1234\0\0\0"), Some(1234));
        assert_eq!(parse_tid(b"7"), Some(7));
        assert_eq!(parse_tid(b".\0"), None);
        assert_eq!(parse_tid(b"..\0"), None);
        assert_eq!(parse_tid(b"\0"), None);
        assert_eq!(parse_tid(b"99999999999\0"), None);
    }

    #[test]
    fn lists_the_calling_thread() -> Result<(), AttachError> {
        let current = unsafe { libc::syscall(libc::SYS_gettid) } as u32;

        let mut found = false;
        for_each_task(|tid| {
            found |= tid == current;
            ControlFlow::Continue(())
        })?;

        assert!(found);
        Ok(())
    }
}
