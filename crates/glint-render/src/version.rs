// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

/// Version triple of the vendor capability interface: hardware feature
/// tier, API version, revision.
///
/// `#[repr(C)]` because the driver fills arrays of these across the FFI
/// boundary.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtensionVersion {
    pub tier: u32,
    pub api: u32,
    pub revision: u32,
}

impl ExtensionVersion {
    pub const fn new(tier: u32, api: u32, revision: u32) -> Self {
        Self { tier, api, revision }
    }

    /// Component-wise `>=` against `required`. Not a lexicographic tuple
    /// order: every component must individually meet its counterpart, so
    /// `(3,3,9)` does not satisfy `(3,4,1)`.
    pub fn satisfies(&self, required: &ExtensionVersion) -> bool {
        self.tier >= required.tier
            && self.api >= required.api
            && self.revision >= required.revision
    }
}

impl fmt::Display for ExtensionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.tier, self.api, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_is_component_wise() {
        let required = ExtensionVersion::new(3, 4, 1);
        assert!(ExtensionVersion::new(3, 4, 2).satisfies(&required));
        assert!(ExtensionVersion::new(3, 4, 1).satisfies(&required));
        assert!(ExtensionVersion::new(4, 4, 1).satisfies(&required));
        // Second component fails even though the third is larger.
        assert!(!ExtensionVersion::new(3, 3, 9).satisfies(&required));
        assert!(!ExtensionVersion::new(2, 9, 9).satisfies(&required));
        assert!(!ExtensionVersion::new(3, 4, 0).satisfies(&required));
    }

    #[test]
    fn display_reads_as_triple() {
        assert_eq!(ExtensionVersion::new(3, 4, 1).to_string(), "3.4.1");
    }
}
