//! Runtime model: version families, entry points and the linked API.

mod api;
mod binding;
mod entry_point;
pub mod ffi;
mod gil;
mod native;
mod version;

pub use self::{
    api::{
        FetchedError, GilState, InterpreterPtr, ObjectPtr, PythonApi, RuntimeLinker,
        SwitchInterval, ThreadStatePtr,
    },
    binding::RuntimeBinding,
    entry_point::{CURRENT_THREAD_STATE, EntryPoint, Manifest, Requirement},
    gil::{GilGuard, OwnedObject},
    native::{NativeApi, NativeLinker},
    version::VersionFamily,
};
