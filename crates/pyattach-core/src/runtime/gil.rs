use super::{GilState, ObjectPtr, PythonApi};

/// Holds the global execution lock of the runtime for the lifetime of the
/// guard.
///
/// Code that must only run under the lock takes a `&GilGuard` as proof.
pub struct GilGuard<'a, Api>
where
    Api: PythonApi,
{
    api: &'a Api,
    state: GilState,
}

impl<'a, Api> GilGuard<'a, Api>
where
    Api: PythonApi,
{
    /// Acquires the global execution lock.
    pub fn acquire(api: &'a Api) -> Self {
        let state = api.gil_ensure();
        tracing::trace!(state = state.0, "global lock acquired");
        Self { api, state }
    }

    /// Returns the API the lock was acquired through.
    pub fn api(&self) -> &'a Api {
        self.api
    }
}

impl<Api> Drop for GilGuard<'_, Api>
where
    Api: PythonApi,
{
    fn drop(&mut self) {
        self.api.gil_release(self.state);
        tracing::trace!(state = self.state.0, "global lock released");
    }
}

/// An owned reference to a runtime object, released on drop.
pub struct OwnedObject<'a, Api>
where
    Api: PythonApi,
{
    api: &'a Api,
    object: ObjectPtr,
}

impl<'a, Api> OwnedObject<'a, Api>
where
    Api: PythonApi,
{
    /// Takes ownership of a new reference returned by the runtime.
    ///
    /// The borrow of `gil` keeps the global lock held until the returned
    /// value is dropped.
    pub fn new(gil: &'a GilGuard<'a, Api>, object: Option<ObjectPtr>) -> Option<Self> {
        object.map(|object| Self {
            api: gil.api(),
            object,
        })
    }

    /// Returns the object without giving up ownership.
    pub fn get(&self) -> ObjectPtr {
        self.object
    }
}

impl<Api> Drop for OwnedObject<'_, Api>
where
    Api: PythonApi,
{
    fn drop(&mut self) {
        self.api.decref(self.object);
    }
}
