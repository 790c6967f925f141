use std::ffi::c_long;

use crate::{
    AttachError, ThreadId,
    inject::report_exception,
    runtime::{GilGuard, ObjectPtr, OwnedObject, PythonApi},
};

/// Installs an execution tracer on a thread of an attached runtime.
///
/// Called with the global execution lock held, once threading is online.
pub trait TraceInstaller<Api>
where
    Api: PythonApi,
{
    /// Installs the tracer on the thread with the given ID.
    fn install(&self, gil: &GilGuard<'_, Api>, thread_id: ThreadId) -> Result<(), AttachError>;
}

/// Installs a tracer by calling `installer(tracer, thread_id)` in the
/// runtime.
///
/// Both objects are borrowed from the caller, which keeps them alive for the
/// duration of the attach.
#[derive(Debug, Clone, Copy)]
pub struct CallableTraceInstaller {
    installer: ObjectPtr,
    tracer: ObjectPtr,
    diagnostics: bool,
}

impl CallableTraceInstaller {
    /// Creates a new installer.
    pub fn new(installer: ObjectPtr, tracer: ObjectPtr) -> Self {
        Self {
            installer,
            tracer,
            diagnostics: false,
        }
    }

    /// Enables or disables printing of exceptions raised by the installer.
    pub fn with_diagnostics(self, diagnostics: bool) -> Self {
        Self {
            diagnostics,
            ..self
        }
    }
}

impl<Api> TraceInstaller<Api> for CallableTraceInstaller
where
    Api: PythonApi,
{
    fn install(&self, gil: &GilGuard<'_, Api>, thread_id: ThreadId) -> Result<(), AttachError> {
        let api = gil.api();

        let Some(thread_id) = OwnedObject::new(gil, api.int_from(thread_id.0 as c_long))
        else {
            report_exception(gil, self.diagnostics);
            return Err(AttachError::InjectionFailed("thread id conversion failed"));
        };

        let result = OwnedObject::new(
            gil,
            api.call2(self.installer, self.tracer, thread_id.get()),
        );

        if result.is_none() {
            tracing::warn!("trace installer raised");
            report_exception(gil, self.diagnostics);
        }

        Ok(())
    }
}
