//! Linux attach driver.
//!
//! Images come from the dynamic linker, threads from `/proc/self/task`.
//! Threads are parked by a signal handler rather than suspended by the
//! kernel.

#![cfg(target_os = "linux")]

mod arena;
mod driver;
mod error;
mod images;
pub mod park;
mod signal;
mod tasks;

pub use self::{arena::MmapArena, driver::LinuxDriver, error::Error, signal::EventSignal};
