//! Access flags for classes and members.
//!
//! Values follow the classic JVM layout so that images produced by external
//! tooling can carry their flags through unchanged.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Class-level access and property flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ClassAccess: u16 {
        /// Visible outside its package
        const PUBLIC = 0x0001;
        /// No subclasses allowed
        const FINAL = 0x0010;
        /// Invokespecial uses superclass semantics
        const SUPER = 0x0020;
        /// Class is an interface
        const INTERFACE = 0x0200;
        /// Class cannot be instantiated
        const ABSTRACT = 0x0400;
        /// Generated by tooling, not present in source
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Field and method access and property flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MemberAccess: u16 {
        /// Visible everywhere
        const PUBLIC = 0x0001;
        /// Visible only inside the declaring class
        const PRIVATE = 0x0002;
        /// Visible to subclasses and the package
        const PROTECTED = 0x0004;
        /// Belongs to the class rather than an instance
        const STATIC = 0x0008;
        /// Cannot be reassigned or overridden
        const FINAL = 0x0010;
        /// Method body provided by the runtime
        const NATIVE = 0x0100;
        /// Method has no body
        const ABSTRACT = 0x0400;
        /// Generated by tooling, not present in source
        const SYNTHETIC = 0x1000;
    }
}

/// Visibility levels ordered from least to most visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    Private,
    Package,
    Protected,
    Public,
}

impl MemberAccess {
    /// Returns the visibility encoded in these flags.
    pub fn visibility(self) -> Visibility {
        if self.contains(Self::PUBLIC) {
            Visibility::Public
        } else if self.contains(Self::PROTECTED) {
            Visibility::Protected
        } else if self.contains(Self::PRIVATE) {
            Visibility::Private
        } else {
            Visibility::Package
        }
    }

    /// Whether code compiled against this member from another package may
    /// link against it (public or protected).
    pub fn is_exported(self) -> bool {
        self.visibility() >= Visibility::Protected
    }

    /// Replaces the visibility bits with `PUBLIC`, keeping every other flag.
    pub fn widened_to_public(self) -> Self {
        (self - (Self::PRIVATE | Self::PROTECTED)) | Self::PUBLIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_order() {
        assert!(Visibility::Public > Visibility::Protected);
        assert!(Visibility::Protected > Visibility::Package);
        assert!(Visibility::Package > Visibility::Private);
    }

    #[test]
    fn test_widen_keeps_other_flags() {
        let access = MemberAccess::PRIVATE | MemberAccess::STATIC | MemberAccess::FINAL;
        let widened = access.widened_to_public();
        assert_eq!(widened, MemberAccess::PUBLIC | MemberAccess::STATIC | MemberAccess::FINAL);
        assert!(widened.is_exported());
        assert!(!access.is_exported());
    }
}
