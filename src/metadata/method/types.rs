//! Method attribute flags and the combined [`MethodAttributes`] descriptor.
//!
//! The flag groups mirror the ECMA-335 `MethodAttributes` split into access, vtable layout and
//! modifiers (II.23.1.10). Access values are an enumeration packed into three bits, so compare
//! them with `==` rather than `contains`.

use bitflags::bitflags;

/// Bitmask for `ACCESS` state extraction
pub const METHOD_ACCESS_MASK: u32 = 0x0007;
/// Bitmask for `VTABLE_LAYOUT` information extraction
pub const METHOD_VTABLE_LAYOUT_MASK: u32 = 0x0100;

// Method attributes split into logical groups
bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Method access flags
    pub struct MethodAccessFlags: u32 {
        /// Member not referenceable
        const COMPILER_CONTROLLED = 0x0000;
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this Assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessibly by anyone in the Assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessibly by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessibly by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
    }
}

impl MethodAccessFlags {
    /// Extract access flags from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        let access = flags & METHOD_ACCESS_MASK;
        Self::from_bits_truncate(access)
    }

    /// Visible to derived types declared in other modules (public, protected, protected internal)
    #[must_use]
    pub fn is_visible_to_subclasses(self) -> bool {
        self == Self::PUBLIC || self == Self::FAMILY || self == Self::FAM_OR_ASSEM
    }

    /// Lowercase keyword used in diagnostics and module images
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self.bits() {
            0x0001 => "private",
            0x0002 => "private protected",
            0x0003 => "internal",
            0x0004 => "protected",
            0x0005 => "protected internal",
            0x0006 => "public",
            _ => "compilercontrolled",
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Method vtable layout flags
    pub struct MethodVtableFlags: u32 {
        /// Method reuses existing slot in vtable
        const REUSE_SLOT = 0x0000;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
    }
}

impl MethodVtableFlags {
    /// Extract vtable layout flags from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        let vtable = flags & METHOD_VTABLE_LAYOUT_MASK;
        Self::from_bits_truncate(vtable)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Method modifiers and properties
    pub struct MethodModifiers: u32 {
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method can only be overriden if also accessible
        const STRICT = 0x0200;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// CLI provides 'special' behavior, dpending upon the name of the method
        const RTSPECIAL_NAME = 0x1000;
    }
}

impl MethodModifiers {
    /// Extract method modifiers from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u32) -> Self {
        let modifiers = flags & !METHOD_ACCESS_MASK & !METHOD_VTABLE_LAYOUT_MASK;
        Self::from_bits_truncate(modifiers)
    }
}

/// The three method flag groups combined, as passed to the emitters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodAttributes {
    /// Accessibility
    pub access: MethodAccessFlags,
    /// Slot layout
    pub vtable: MethodVtableFlags,
    /// Everything else
    pub modifiers: MethodModifiers,
}

impl MethodAttributes {
    /// Attributes with the given access and `HIDE_BY_SIG`
    #[must_use]
    pub fn new(access: MethodAccessFlags) -> Self {
        MethodAttributes {
            access,
            vtable: MethodVtableFlags::REUSE_SLOT,
            modifiers: MethodModifiers::HIDE_BY_SIG,
        }
    }

    /// `public hidebysig`
    #[must_use]
    pub fn public() -> Self {
        Self::new(MethodAccessFlags::PUBLIC)
    }

    /// `family hidebysig`
    #[must_use]
    pub fn protected() -> Self {
        Self::new(MethodAccessFlags::FAMILY)
    }

    /// `private hidebysig`
    #[must_use]
    pub fn private() -> Self {
        Self::new(MethodAccessFlags::PRIVATE)
    }

    /// `assembly hidebysig`
    #[must_use]
    pub fn internal() -> Self {
        Self::new(MethodAccessFlags::ASSEM)
    }

    /// Adds modifiers
    #[must_use]
    pub fn with(mut self, modifiers: MethodModifiers) -> Self {
        self.modifiers |= modifiers;
        self
    }

    /// Removes modifiers
    #[must_use]
    pub fn without(mut self, modifiers: MethodModifiers) -> Self {
        self.modifiers &= !modifiers;
        self
    }

    /// Marks the method `virtual`
    #[must_use]
    pub fn virtual_(self) -> Self {
        self.with(MethodModifiers::VIRTUAL)
    }

    /// Marks the method `virtual abstract`
    #[must_use]
    pub fn abstract_(self) -> Self {
        self.with(MethodModifiers::VIRTUAL | MethodModifiers::ABSTRACT)
    }

    /// Marks the method `static`
    #[must_use]
    pub fn static_(self) -> Self {
        self.with(MethodModifiers::STATIC)
    }

    /// Marks the method `newslot`
    #[must_use]
    pub fn new_slot(mut self) -> Self {
        self.vtable = MethodVtableFlags::NEW_SLOT;
        self
    }

    /// Packs the groups back into the raw ECMA-335 value
    #[must_use]
    pub fn bits(&self) -> u32 {
        self.access.bits() | self.vtable.bits() | self.modifiers.bits()
    }

    /// Splits a raw ECMA-335 value into the three groups
    #[must_use]
    pub fn from_bits(flags: u32) -> Self {
        MethodAttributes {
            access: MethodAccessFlags::from_method_flags(flags),
            vtable: MethodVtableFlags::from_method_flags(flags),
            modifiers: MethodModifiers::from_method_flags(flags),
        }
    }
}

impl Default for MethodAttributes {
    fn default() -> Self {
        Self::public()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_roundtrip_bits() {
        let attributes = MethodAttributes::protected().virtual_().new_slot();
        let raw = attributes.bits();
        assert_eq!(raw, 0x0004 | 0x0100 | 0x0040 | 0x0080);
        assert_eq!(MethodAttributes::from_bits(raw), attributes);
    }

    #[test]
    fn test_access_visibility_to_subclasses() {
        assert!(MethodAccessFlags::PUBLIC.is_visible_to_subclasses());
        assert!(MethodAccessFlags::FAMILY.is_visible_to_subclasses());
        assert!(MethodAccessFlags::FAM_OR_ASSEM.is_visible_to_subclasses());
        assert!(!MethodAccessFlags::PRIVATE.is_visible_to_subclasses());
        assert!(!MethodAccessFlags::ASSEM.is_visible_to_subclasses());
    }

    #[test]
    fn test_without_removes_modifiers() {
        let attributes = MethodAttributes::public()
            .abstract_()
            .without(MethodModifiers::ABSTRACT);
        assert!(attributes.modifiers.contains(MethodModifiers::VIRTUAL));
        assert!(!attributes.modifiers.contains(MethodModifiers::ABSTRACT));
    }
}
