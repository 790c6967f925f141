use crate::{
    AttachError, ImageEnumerator, LoadedImage, SymbolResolver,
    runtime::{EntryPoint, RuntimeLinker, VersionFamily},
};

/// Exports that every runtime of the supported families defines.
const FAMILY_EXPORTS: &[&str] = &["PyGILState_Ensure", "PyGILState_Release"];

/// A parsed runtime image name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeName {
    /// Whether the name follows the debug-build naming convention.
    pub is_debug: bool,
}

impl RuntimeName {
    /// Parses an image file name.
    ///
    /// Accepts `python*` and `libpython*`, case-insensitively. Debug builds
    /// are recognized by a `_d` stem suffix (`python27_d.dll`) or by a `d`
    /// in the ABI flags following the version (`libpython3.8d.so`,
    /// `libpython3.7dm.so.1.0`).
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let rest = lower.strip_prefix("lib").unwrap_or(&lower);
        let rest = rest.strip_prefix("python")?;

        let stem = [".so", ".dll", ".dylib", ".exe"]
            .iter()
            .filter_map(|extension| rest.find(extension))
            .min()
            .map_or(rest, |end| &rest[..end]);

        let is_debug = if stem.ends_with("_d") {
            true
        }
        else {
            let flags = stem.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.');
            !flags.is_empty() && flags.chars().all(|c| c.is_ascii_alphabetic()) && flags.contains('d')
        };

        Some(Self { is_debug })
    }
}

/// The classification of a loaded image that matched the runtime naming and
/// export rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// The version family, or `None` if no discriminating export resolved.
    pub family: Option<VersionFamily>,

    /// Whether the image follows the debug-build naming convention.
    pub is_debug: bool,
}

/// Classifies a loaded image.
///
/// Returns `Ok(None)` if the image is not a runtime at all: the name does
/// not match or a family-defining export is missing. For a matching image,
/// reports [`AttachError::DetectionEntryPointMissing`] if
/// `Py_IsInitialized` is not exported and
/// [`AttachError::RuntimeNotInitialized`] if it returns false.
pub fn classify<Driver, Linker>(
    driver: &Driver,
    linker: &Linker,
    image: &LoadedImage,
) -> Result<Option<Fingerprint>, AttachError>
where
    Driver: ImageEnumerator,
    Linker: RuntimeLinker,
{
    let Some(name) = RuntimeName::parse(&image.name)
    else {
        return Ok(None);
    };

    let resolver = SymbolResolver::new(driver, image);
    if !FAMILY_EXPORTS.iter().all(|export| resolver.exists(export)) {
        tracing::debug!(image = %image.name, "runtime-like name without family exports");
        return Ok(None);
    }

    let is_initialized = resolver
        .resolve(EntryPoint::IsInitialized.canonical_name())
        .ok_or(AttachError::DetectionEntryPointMissing)?;

    if !linker.is_initialized(is_initialized) {
        return Err(AttachError::RuntimeNotInitialized);
    }

    let family = VersionFamily::probe(|export| resolver.exists(export));
    tracing::debug!(
        image = %image.name,
        family = ?family,
        is_debug = name.is_debug,
        "runtime image classified"
    );

    Ok(Some(Fingerprint {
        family,
        is_debug: name.is_debug,
    }))
}
