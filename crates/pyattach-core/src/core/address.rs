use super::macros::impl_ops;

impl_ops!(Address, u64, "virtual address inside the current process");

impl Address {
    /// Checks if the address is NULL.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Creates an address from a raw pointer.
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u64)
    }

    /// Converts the address into a raw pointer.
    pub fn as_ptr<T>(self) -> *const T {
        self.0 as usize as *const T
    }

    /// Converts the address into a raw mutable pointer.
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as usize as *mut T
    }
}

/// A half-open range of addresses, `[start, start + length)`.
///
/// Used to describe the code of a routine that must not be interrupted
/// while the caller holds other threads suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    /// First address of the range.
    pub start: Address,

    /// Length of the range in bytes.
    pub length: u64,
}

impl AddressRange {
    /// Creates a new address range.
    pub fn new(start: Address, length: u64) -> Self {
        Self { start, length }
    }

    /// Checks whether `address` lies inside the range.
    pub fn contains(&self, address: Address) -> bool {
        address >= self.start && address - self.start < self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_half_open() {
        let range = AddressRange::new(Address(0x1000), 0x100);

        assert!(!range.contains(Address(0x0fff)));
        assert!(range.contains(Address(0x1000)));
        assert!(range.contains(Address(0x10ff)));
        assert!(!range.contains(Address(0x1100)));
    }

    #[test]
    fn empty_range_contains_nothing() {
        let range = AddressRange::new(Address(0x1000), 0);
        assert!(!range.contains(Address(0x1000)));
    }

    #[test]
    fn display_is_zero_padded() {
        assert_eq!(Address(0x2a).to_string(), "0x000000000000002a");
    }
}
