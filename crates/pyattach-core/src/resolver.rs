use crate::{Address, ImageEnumerator, LoadedImage};

/// Resolves named entry points of one loaded image.
///
/// Resolution has no side effects. Absence is reported as `None` and is
/// never an error on its own.
pub struct SymbolResolver<'a, Driver>
where
    Driver: ImageEnumerator,
{
    driver: &'a Driver,
    image: &'a LoadedImage,
}

impl<'a, Driver> SymbolResolver<'a, Driver>
where
    Driver: ImageEnumerator,
{
    /// Creates a resolver for `image`.
    pub fn new(driver: &'a Driver, image: &'a LoadedImage) -> Self {
        Self { driver, image }
    }

    /// Returns the image the resolver looks into.
    pub fn image(&self) -> &'a LoadedImage {
        self.image
    }

    /// Resolves a single export.
    pub fn resolve(&self, name: &str) -> Option<Address> {
        let address = self.driver.resolve(self.image, name)?;
        if address.is_null() {
            return None;
        }

        tracing::trace!(image = %self.image.name, name, %address, "resolved");
        Some(address)
    }

    /// Resolves the first export of `names` that exists.
    pub fn resolve_any(&self, names: &[&'static str]) -> Option<(&'static str, Address)> {
        names
            .iter()
            .find_map(|&name| self.resolve(name).map(|address| (name, address)))
    }

    /// Checks whether an export exists.
    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProcess;

    #[test]
    fn absence_is_not_an_error() {
        let process = MockProcess::new();
        let image = process.load_image_with_exports("python38.dll", &["Py_IsInitialized"]);
        let driver = process.driver();
        let resolver = SymbolResolver::new(&driver, &image);

        assert_eq!(
            resolver.resolve("Py_IsInitialized"),
            process.export(&image, "Py_IsInitialized")
        );
        assert!(resolver.exists("Py_IsInitialized"));
        assert!(!resolver.exists("PyGILState_Ensure"));
    }

    #[test]
    fn first_existing_alternative_wins() {
        let process = MockProcess::new();
        let image = process.load_image_with_exports(
            "python32.dll",
            &["PyUnicodeUCS4_FromString", "PyUnicodeUCS2_FromString"],
        );
        let driver = process.driver();
        let resolver = SymbolResolver::new(&driver, &image);

        let resolved = resolver.resolve_any(&[
            "PyUnicode_FromString",
            "PyUnicodeUCS2_FromString",
            "PyUnicodeUCS4_FromString",
        ]);

        assert_eq!(
            resolved,
            process
                .export(&image, "PyUnicodeUCS2_FromString")
                .map(|address| ("PyUnicodeUCS2_FromString", address))
        );
        assert_eq!(resolver.resolve_any(&["PyUnicode_FromString"]), None);
    }
}
