use crate::{Address, fingerprint::RuntimeName};

/// An executable image loaded into the current process.
///
/// Identified once per attach attempt and discarded when the attempt ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    /// The base address of the image.
    ///
    /// On Windows this is also the module handle.
    pub base: Address,

    /// The file name of the image, without directories.
    pub name: String,

    /// The path the loader used for the image.
    pub path: String,

    /// Whether the name follows the debug-build naming convention.
    pub is_debug: bool,
}

impl LoadedImage {
    /// Creates a new loaded image.
    ///
    /// The file name is taken from the last path component of `path`.
    pub fn new(base: Address, path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path.as_str())
            .to_owned();

        let is_debug = RuntimeName::parse(&name).is_some_and(|runtime| runtime.is_debug);

        Self {
            base,
            name,
            path,
            is_debug,
        }
    }
}

impl std::fmt::Display for LoadedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} @ {}", self.name, self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_last_path_component() {
        let image = LoadedImage::new(Address(0x1000), r"C:\Python27\python27_d.dll");
        assert_eq!(image.name, "python27_d.dll");
        assert!(image.is_debug);

        let image = LoadedImage::new(Address(0x1000), "/usr/lib/libpython3.8.so.1.0");
        assert_eq!(image.name, "libpython3.8.so.1.0");
        assert!(!image.is_debug);

        let image = LoadedImage::new(Address(0x1000), "kernel32.dll");
        assert_eq!(image.name, "kernel32.dll");
    }
}
