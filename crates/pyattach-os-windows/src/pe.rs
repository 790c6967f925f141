use object::{
    endian::LittleEndian as LE,
    pe::{
        IMAGE_DIRECTORY_ENTRY_IMPORT, IMAGE_DOS_SIGNATURE, IMAGE_NT_SIGNATURE,
        ImageDataDirectory, ImageDosHeader,
    },
    read::{
        ReadRef as _,
        pe::{ImageNtHeaders, ImageOptionalHeader, ImportTable},
    },
};
use pyattach_core::Address;

use crate::Error;

#[cfg(target_pointer_width = "64")]
type NtHeaders = object::pe::ImageNtHeaders64;

#[cfg(target_pointer_width = "32")]
type NtHeaders = object::pe::ImageNtHeaders32;

/// Every loaded module maps at least its first page of headers.
const HEADER_SIZE: usize = 0x1000;

/// The headers of a module mapped into the current process.
///
/// Addresses inside a mapped image equal their RVAs, so the image is read
/// as one flat slice.
pub struct MappedImage<'a> {
    data: &'a [u8],
    data_directories: &'a [ImageDataDirectory],
}

impl<'a> MappedImage<'a> {
    /// Parses the headers of the module loaded at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the base of a module that stays loaded for `'a`.
    pub unsafe fn from_base(base: Address) -> Result<Self, Error> {
        let headers = unsafe { std::slice::from_raw_parts(base.as_ptr::<u8>(), HEADER_SIZE) };
        let (nt_headers, _) = parse(headers)?;
        let size_of_image = nt_headers.optional_header().size_of_image() as usize;

        let data = unsafe {
            std::slice::from_raw_parts(base.as_ptr::<u8>(), size_of_image.max(HEADER_SIZE))
        };
        let (_, data_directories) = parse(data)?;

        Ok(Self {
            data,
            data_directories,
        })
    }

    /// Returns the import table, if the module imports anything.
    pub fn import_table(&self) -> Option<ImportTable<'a>> {
        let entry = self.data_directories.get(IMAGE_DIRECTORY_ENTRY_IMPORT)?;
        let address = entry.virtual_address.get(LE);

        if address == 0 || entry.size.get(LE) == 0 {
            return None;
        }

        Some(ImportTable::new(self.data, 0, address))
    }
}

fn parse(data: &[u8]) -> Result<(&NtHeaders, &[ImageDataDirectory]), Error> {
    let dos_header = data
        .read_at::<ImageDosHeader>(0)
        .map_err(|_| Error::Pe("DOS header out of bounds"))?;

    if dos_header.e_magic.get(LE) != IMAGE_DOS_SIGNATURE {
        return Err(Error::Pe("bad DOS signature"));
    }

    let mut offset = u64::from(dos_header.nt_headers_offset());
    let nt_headers = data
        .read::<NtHeaders>(&mut offset)
        .map_err(|_| Error::Pe("NT headers out of bounds"))?;

    if nt_headers.signature() != IMAGE_NT_SIGNATURE || !nt_headers.is_valid_optional_magic() {
        return Err(Error::Pe("bad NT signature"));
    }

    let optional_data_size = u64::from(nt_headers.file_header().size_of_optional_header.get(LE))
        .checked_sub(size_of::<<NtHeaders as ImageNtHeaders>::ImageOptionalHeader>() as u64)
        .ok_or(Error::Pe("optional header too small"))?;

    let optional_data = data
        .read_bytes(&mut offset, optional_data_size)
        .map_err(|_| Error::Pe("optional header out of bounds"))?;

    let data_directories = optional_data
        .read_slice_at(
            0,
            nt_headers.optional_header().number_of_rva_and_sizes() as usize,
        )
        .map_err(|_| Error::Pe("data directories out of bounds"))?;

    Ok((nt_headers, data_directories))
}
