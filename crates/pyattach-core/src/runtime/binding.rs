use indexmap::IndexMap;

use super::{EntryPoint, Requirement, VersionFamily};
use crate::{
    Address, AddressRange, AttachError, ImageEnumerator, LoadedImage, SymbolResolver,
};

/// The entry points of one runtime image, resolved for its version family.
///
/// A binding only exists once every required entry point of the family has
/// resolved, so holding one is proof that the runtime can be driven. It is
/// immutable and scoped to one attach call.
#[derive(Debug, Clone)]
pub struct RuntimeBinding {
    image: LoadedImage,
    family: VersionFamily,
    entry_points: IndexMap<EntryPoint, Address>,
}

impl RuntimeBinding {
    /// Resolves the manifest of `family` against `image`.
    ///
    /// Returns [`AttachError::MissingEntryPoints`] listing every unsatisfied
    /// requirement if the binding would not be usable.
    pub fn resolve<Driver>(
        driver: &Driver,
        image: &LoadedImage,
        family: VersionFamily,
    ) -> Result<Self, AttachError>
    where
        Driver: ImageEnumerator,
    {
        let resolver = SymbolResolver::new(driver, image);
        let manifest = family.manifest();
        let mut entry_points = IndexMap::new();

        let mut lookup = |entry_point: EntryPoint| match resolver
            .resolve_any(entry_point.names(family))
        {
            Some((name, address)) => {
                tracing::debug!(%entry_point, name, %address, "entry point resolved");
                entry_points.insert(entry_point, address);
            }
            None => {
                tracing::debug!(%entry_point, "entry point not found");
            }
        };

        for requirement in manifest.required() {
            match *requirement {
                Requirement::One(entry_point) => lookup(entry_point),
                Requirement::AnyOf(alternatives) => {
                    alternatives.iter().copied().for_each(&mut lookup);
                }
            }
        }

        for &entry_point in manifest.optional() {
            lookup(entry_point);
        }

        let missing = manifest.missing(|entry_point| entry_points.contains_key(&entry_point));
        if !missing.is_empty() {
            tracing::warn!(image = %image.name, ?missing, "missing required entry points");
            return Err(AttachError::MissingEntryPoints(missing));
        }

        Ok(Self {
            image: image.clone(),
            family,
            entry_points,
        })
    }

    /// Returns the runtime image.
    pub fn image(&self) -> &LoadedImage {
        &self.image
    }

    /// Returns the version family.
    pub fn family(&self) -> VersionFamily {
        self.family
    }

    /// Checks whether the image follows the debug-build naming convention.
    pub fn is_debug(&self) -> bool {
        self.image.is_debug
    }

    /// Returns the address of an entry point, if it resolved.
    pub fn get(&self, entry_point: EntryPoint) -> Option<Address> {
        self.entry_points.get(&entry_point).copied()
    }

    /// Returns the address of an entry point that must have resolved.
    pub fn require(&self, entry_point: EntryPoint) -> Result<Address, AttachError> {
        self.get(entry_point)
            .ok_or_else(|| AttachError::missing([entry_point]))
    }

    /// Returns every resolved entry point in resolution order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryPoint, Address)> + '_ {
        self.entry_points
            .iter()
            .map(|(&entry_point, &address)| (entry_point, address))
    }

    /// Returns the code window of the deferred-call registration routine.
    ///
    /// A thread whose instruction pointer lies inside this window is never
    /// held suspended.
    pub fn hazard_range(&self, span: u64) -> Result<AddressRange, AttachError> {
        Ok(AddressRange::new(
            self.require(EntryPoint::AddPendingCall)?,
            span,
        ))
    }
}
