use std::time::Duration;

bitflags::bitflags! {
    /// Flags passed by the injector through the `attachInfoFlags` pointer.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttachInfoFlags: i32 {
        /// Print diagnostic output while attaching.
        const SHOW_DEBUG_INFO = 1 << 0;
    }
}

/// Options controlling one attach call.
#[derive(Debug, Clone)]
pub struct AttachOptions {
    /// Shared bound for the suspend/inspect/resume cycle and the wait for
    /// the deferred call.
    pub timeout: Duration,

    /// Size in bytes of the window starting at `Py_AddPendingCall` inside
    /// which a thread is never held suspended.
    pub hazard_span: u64,

    /// Synthetic file identifier under which injected code is compiled.
    pub display_name: String,

    /// Whether diagnostics are enabled.
    pub diagnostics: bool,
}

impl AttachOptions {
    /// Default shared timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

    /// Default size of the hazard window.
    pub const DEFAULT_HAZARD_SPAN: u64 = 0x100;

    /// Default synthetic file identifier.
    pub const DEFAULT_DISPLAY_NAME: &'static str = "<attach>";

    /// Creates options from the flags passed through the C interface.
    pub fn from_flags(flags: AttachInfoFlags) -> Self {
        Self::default().with_diagnostics(flags.contains(AttachInfoFlags::SHOW_DEBUG_INFO))
    }

    /// Sets the shared timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Sets the size of the hazard window.
    pub fn with_hazard_span(self, hazard_span: u64) -> Self {
        Self {
            hazard_span,
            ..self
        }
    }

    /// Sets the synthetic file identifier.
    pub fn with_display_name(self, display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..self
        }
    }

    /// Enables or disables diagnostics.
    pub fn with_diagnostics(self, diagnostics: bool) -> Self {
        Self {
            diagnostics,
            ..self
        }
    }
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            hazard_span: Self::DEFAULT_HAZARD_SPAN,
            display_name: String::from(Self::DEFAULT_DISPLAY_NAME),
            diagnostics: false,
        }
    }
}
