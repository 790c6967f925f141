//! Attach driver for Windows.
//!
//! Modules are enumerated with `K32EnumProcessModules`, threads with a
//! Toolhelp snapshot. Suspended-thread bookkeeping allocates from a private
//! heap so that a thread frozen inside the process heap cannot block the
//! attach.

#![cfg(windows)]

mod arena;
mod driver;
mod error;
mod iat;
mod pe;
mod signal;

pub use self::{
    arena::HeapArena,
    driver::{ThreadHandle, WindowsDriver},
    error::Error,
    iat::patch_function,
    signal::EventSignal,
};
