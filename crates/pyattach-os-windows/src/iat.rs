use object::endian::LittleEndian as LE;
use pyattach_core::{Address, AttachError, ImageEnumerator as _, LoadedImage};
use windows_sys::Win32::System::Memory::{PAGE_PROTECTION_FLAGS, PAGE_READWRITE, VirtualProtect};

use crate::{Error, WindowsDriver, pe::MappedImage};

/// Redirects imports in every loaded module.
///
/// For each module importing from `exporting_module` (matched
/// case-insensitively), every import-address-table slot holding `original`
/// is overwritten with `replacement`. Modules with malformed headers are
/// skipped.
///
/// Returns the number of slots patched.
///
/// # Safety
///
/// `replacement` must be callable wherever `original` is, and no other
/// thread may patch the same tables concurrently.
pub unsafe fn patch_function(
    driver: &WindowsDriver,
    exporting_module: &str,
    original: Address,
    replacement: Address,
) -> Result<usize, AttachError> {
    let mut patched = 0;

    for image in driver.images()? {
        match unsafe { patch_image(&image, exporting_module, original, replacement) } {
            Ok(count) => patched += count,
            Err(err) => tracing::debug!(image = %image.name, %err, "imports skipped"),
        }
    }

    tracing::debug!(exporting_module, %original, %replacement, patched, "imports patched");
    Ok(patched)
}

unsafe fn patch_image(
    image: &LoadedImage,
    exporting_module: &str,
    original: Address,
    replacement: Address,
) -> Result<usize, Error> {
    let mapped = unsafe { MappedImage::from_base(image.base)? };
    let Some(table) = mapped.import_table()
    else {
        return Ok(0);
    };

    let mut descriptors = table
        .descriptors()
        .map_err(|_| Error::Pe("bad import directory"))?;

    let mut patched = 0;
    while let Some(descriptor) = descriptors
        .next()
        .map_err(|_| Error::Pe("bad import descriptor"))?
    {
        let name = table
            .name(descriptor.name.get(LE))
            .map_err(|_| Error::Pe("bad import name"))?;

        if !name.eq_ignore_ascii_case(exporting_module.as_bytes()) {
            continue;
        }

        let thunks = image.base + u64::from(descriptor.first_thunk.get(LE));
        let mut slot = thunks.as_mut_ptr::<usize>();

        loop {
            let value = unsafe { slot.read_volatile() };
            if value == 0 {
                break;
            }

            if value as u64 == original.0 {
                unsafe { write_slot(slot, replacement.0 as usize)? };
                patched += 1;
            }

            slot = unsafe { slot.add(1) };
        }
    }

    Ok(patched)
}

/// Writes one slot, lifting the page protection around the write.
unsafe fn write_slot(slot: *mut usize, value: usize) -> Result<(), Error> {
    let mut protection: PAGE_PROTECTION_FLAGS = 0;

    let result = unsafe {
        VirtualProtect(slot.cast(), size_of::<usize>(), PAGE_READWRITE, &mut protection)
    };
    if result == 0 {
        return Err(Error::last("VirtualProtect"));
    }

    unsafe { slot.write_volatile(value) };

    let mut previous = 0;
    unsafe { VirtualProtect(slot.cast(), size_of::<usize>(), protection, &mut previous) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_module_patches_nothing() -> Result<(), AttachError> {
        let driver = WindowsDriver::new();

        let patched = unsafe {
            patch_function(
                &driver,
                "no-such-module.dll",
                Address(0x1000),
                Address(0x2000),
            )?
        };

        assert_eq!(patched, 0);
        Ok(())
    }
}
