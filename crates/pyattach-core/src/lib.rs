//! Core of the in-process runtime attach.
//!
//! Discovers a runtime loaded into the current process, brings its
//! threading subsystem online without its cooperation, and hands control
//! to injected code. Everything that touches the operating system goes
//! through the [`AttachDriver`] traits.

mod bootstrap;
mod core;
mod driver;
mod error;
pub mod fingerprint;
mod image;
mod inject;
mod options;
mod orchestrator;
mod outcome;
mod registry;
mod resolver;
pub mod runtime;
mod suspend;
mod thread_set;
mod tracer;

#[cfg(test)]
mod testing;

pub use self::{
    bootstrap::{BootstrapOutcome, BootstrapState, ThreadingBootstrap},
    core::{Address, AddressRange, ThreadId},
    driver::{Arena, AttachDriver, CompletionSignal, ImageEnumerator, ThreadControl},
    error::{AttachError, MissingEntryPoints},
    image::LoadedImage,
    inject::CodeInjector,
    options::{AttachInfoFlags, AttachOptions},
    orchestrator::AttachOrchestrator,
    outcome::AttachOutcome,
    registry::{InterpreterRecord, InterpreterRegistry},
    resolver::SymbolResolver,
    suspend::ThreadSuspensionController,
    thread_set::SuspendedThreadSet,
    tracer::{CallableTraceInstaller, TraceInstaller},
};
