use std::ffi::{CStr, CString, c_void};

use pyattach_core::Address;

/// An object reported by the dynamic linker.
#[derive(Debug)]
pub(crate) struct LinkedObject {
    /// Start of the first mapped segment, as reported by `dladdr`.
    pub base: Address,

    /// The name the object was loaded under, `None` for the main program.
    pub name: Option<String>,
}

/// Lists the objects known to the dynamic linker.
pub(crate) fn linked_objects() -> Vec<LinkedObject> {
    let mut objects = Vec::new();

    unsafe {
        libc::dl_iterate_phdr(Some(visit), (&raw mut objects).cast());
    }

    objects
}

unsafe extern "C" fn visit(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> libc::c_int {
    let objects = unsafe { &mut *data.cast::<Vec<LinkedObject>>() };
    let info = unsafe { &*info };

    let Some(base) = (unsafe { map_start(info) })
    else {
        return 0;
    };

    let name = match info.dlpi_name.is_null() {
        true => None,
        false => {
            let name = unsafe { CStr::from_ptr(info.dlpi_name) };
            Some(name.to_string_lossy().into_owned()).filter(|name| !name.is_empty())
        }
    };

    objects.push(LinkedObject { base, name });
    0
}

/// Computes where the loader mapped the first loadable segment.
unsafe fn map_start(info: &libc::dl_phdr_info) -> Option<Address> {
    if info.dlpi_phdr.is_null() {
        return None;
    }

    let headers =
        unsafe { std::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum)) };

    let segment = headers
        .iter()
        .find(|header| header.p_type == libc::PT_LOAD)?;

    let page_size = page_size();
    let vaddr = segment.p_vaddr as u64 & !(page_size - 1);
    Some(Address(info.dlpi_addr as u64 + vaddr))
}

fn page_size() -> u64 {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as u64,
        _ => 0x1000,
    }
}

/// Resolves `name` in the object whose first segment starts at `base`.
///
/// The object is opened by `path` without loading anything new, `None`
/// standing for the main program. The dynamic linker searches an object's
/// dependencies too, so a symbol is only accepted if `dladdr` places it in
/// the object itself.
pub(crate) fn resolve(path: Option<&str>, base: Address, name: &str) -> Option<Address> {
    let symbol = CString::new(name).ok()?;
    let path = path.map(CString::new).transpose().ok()?;

    let handle = unsafe {
        libc::dlopen(
            path.as_deref().map_or(std::ptr::null(), CStr::as_ptr),
            libc::RTLD_LAZY | libc::RTLD_NOLOAD,
        )
    };

    if handle.is_null() {
        return None;
    }

    let address = unsafe { libc::dlsym(handle, symbol.as_ptr()) };
    let owner = owner_base(address);

    unsafe { libc::dlclose(handle) };

    if address.is_null() || owner != Some(base) {
        return None;
    }

    Some(Address(address as u64))
}

fn owner_base(address: *mut c_void) -> Option<Address> {
    if address.is_null() {
        return None;
    }

    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    match unsafe { libc::dladdr(address, &mut info) } {
        0 => None,
        _ => Some(Address(info.dli_fbase as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn libc_object() -> Option<LinkedObject> {
        linked_objects().into_iter().find(|object| {
            object
                .name
                .as_deref()
                .is_some_and(|name| name.contains("libc.so"))
        })
    }

    #[test]
    fn main_program_is_listed_first() {
        let objects = linked_objects();
        assert!(objects.first().is_some_and(|object| object.name.is_none()));
    }

    #[test]
    fn symbols_resolve_only_in_their_own_object() {
        let Some(libc) = libc_object()
        else {
            return;
        };

        let path = libc.name.as_deref();
        assert!(resolve(path, libc.base, "malloc").is_some());
        assert!(resolve(path, libc.base, "Py_IsInitialized").is_none());

        let main = &linked_objects()[0];
        assert!(resolve(None, main.base, "malloc").is_none());
    }
}
