use std::{borrow::Cow, ffi::CString};

use crate::{
    AttachOptions,
    runtime::{GilGuard, OwnedObject, PythonApi},
};

/// Compiles and evaluates source code inside an attached runtime.
#[derive(Debug, Clone)]
pub struct CodeInjector {
    display_name: String,
    diagnostics: bool,
}

impl CodeInjector {
    /// Creates an injector that compiles under `options.display_name`.
    pub fn new(options: &AttachOptions) -> Self {
        Self {
            display_name: options.display_name.clone(),
            diagnostics: options.diagnostics,
        }
    }

    /// Compiles `source` as a module body and evaluates it against a fresh
    /// global namespace holding `__builtins__` and `__file__`.
    ///
    /// Returns `false` only if no code object was produced. An exception
    /// raised by the evaluated code is reported and cleared, and still
    /// counts as success.
    pub fn inject<Api>(&self, gil: &GilGuard<'_, Api>, source: &str) -> bool
    where
        Api: PythonApi,
    {
        let api = gil.api();

        let Ok(filename) = CString::new(self.display_name.as_str())
        else {
            tracing::warn!(name = %self.display_name, "display name contains NUL");
            return false;
        };

        let code = {
            let Ok(source) = CString::new(strip_carriage_returns(source).into_owned())
            else {
                tracing::warn!("source contains NUL");
                return false;
            };

            OwnedObject::new(gil, api.compile_string(&source, &filename))
        };

        let Some(code) = code
        else {
            tracing::warn!(file = %self.display_name, "compilation failed");
            report_exception(gil, self.diagnostics);
            return false;
        };

        let Some(globals) = OwnedObject::new(gil, api.dict_new())
        else {
            report_exception(gil, self.diagnostics);
            return true;
        };

        if let Some(builtins) = api.builtins() {
            api.dict_set_item(globals.get(), c"__builtins__", builtins);
        }

        if let Some(file) = OwnedObject::new(gil, api.string_from(&filename)) {
            api.dict_set_item(globals.get(), c"__file__", file.get());
        }

        let result = OwnedObject::new(
            gil,
            api.eval_code(code.get(), globals.get(), globals.get()),
        );

        if result.is_none() {
            tracing::warn!(file = %self.display_name, "injected code raised");
            report_exception(gil, self.diagnostics);
        }
        else {
            tracing::debug!(file = %self.display_name, "injected code finished");
        }

        true
    }
}

/// Reports and clears the pending exception, if any.
///
/// With diagnostics on, the runtime prints the traceback itself.
pub(crate) fn report_exception<Api>(gil: &GilGuard<'_, Api>, diagnostics: bool)
where
    Api: PythonApi,
{
    let api = gil.api();
    if !api.err_occurred() {
        return;
    }

    let error = api.err_fetch();

    if diagnostics {
        api.err_restore(error);
        api.err_print();
    }
    else {
        for object in [error.kind, error.value, error.traceback].into_iter().flatten() {
            api.decref(object);
        }
    }
}

/// Drops every carriage return, so `\r\n` becomes `\n` and a lone `\r`
/// joins its neighbours.
fn strip_carriage_returns(source: &str) -> Cow<'_, str> {
    let bytes = source.as_bytes();
    if memchr::memchr(b'\r', bytes).is_none() {
        return Cow::Borrowed(source);
    }

    let mut result = String::with_capacity(source.len());
    let mut start = 0;

    for position in memchr::memchr_iter(b'\r', bytes) {
        result.push_str(&source[start..position]);
        start = position + 1;
    }

    result.push_str(&source[start..]);
    Cow::Owned(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings() {
        assert_eq!(strip_carriage_returns("a\nb"), "a\nb");
        assert_eq!(strip_carriage_returns("a\r\nb\r\n"), "a\nb\n");
        assert_eq!(strip_carriage_returns("a\rb\r"), "ab");
        assert_eq!(strip_carriage_returns("a\r\r\nb"), "a\nb");
        assert!(matches!(strip_carriage_returns("plain"), Cow::Borrowed(_)));
    }
}
