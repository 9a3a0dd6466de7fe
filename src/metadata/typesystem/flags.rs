use bitflags::bitflags;

/// Bitmask for the visibility bits of [`TypeAttributes`]
pub const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Type attributes (ECMA-335 II.23.1.15)
    pub struct TypeAttributes: u32 {
        /// Class is not public scope
        const NOT_PUBLIC = 0x0000_0000;
        /// Class is public scope
        const PUBLIC = 0x0000_0001;
        /// Class is nested with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Class is nested with private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Class is nested with family visibility
        const NESTED_FAMILY = 0x0000_0004;
        /// Class is nested with assembly visibility
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Class is abstract
        const ABSTRACT = 0x0000_0080;
        /// Class cannot be extended
        const SEALED = 0x0000_0100;
        /// Class name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Class is serializable
        const SERIALIZABLE = 0x0000_2000;
        /// Initialize the class before first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

impl TypeAttributes {
    /// The visibility bits alone
    #[must_use]
    pub fn visibility(self) -> Self {
        Self::from_bits_truncate(self.bits() & TYPE_VISIBILITY_MASK)
    }

    /// Replaces the visibility bits
    #[must_use]
    pub fn with_visibility(self, visibility: Self) -> Self {
        Self::from_bits_truncate(
            (self.bits() & !TYPE_VISIBILITY_MASK) | (visibility.bits() & TYPE_VISIBILITY_MASK),
        )
    }

    /// Visibility is one of the nested variants
    #[must_use]
    pub fn is_nested_visibility(self) -> bool {
        (self.bits() & TYPE_VISIBILITY_MASK) >= Self::NESTED_PUBLIC.bits()
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// Field attributes (ECMA-335 II.23.1.5)
    pub struct FieldAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this Assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessibly by anyone in the Assembly
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessibly by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessibly by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Field can only be initialized, not written to after init
        const INIT_ONLY = 0x0020;
        /// Value is compile time constant
        const LITERAL = 0x0040;
        /// Reserved (to indicate this field should not be serialized when type is remoted)
        const NOT_SERIALIZED = 0x0080;
        /// Field is special
        const SPECIAL_NAME = 0x0200;
    }
}

/// Bitmask for the access bits of [`FieldAttributes`]
pub const FIELD_ACCESS_MASK: u32 = 0x0007;

impl FieldAttributes {
    /// The access bits alone
    #[must_use]
    pub fn access(self) -> Self {
        Self::from_bits_truncate(self.bits() & FIELD_ACCESS_MASK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_replacement() {
        let flags = TypeAttributes::PUBLIC | TypeAttributes::SEALED;
        let nested = flags.with_visibility(TypeAttributes::NESTED_PRIVATE);
        assert_eq!(nested.visibility(), TypeAttributes::NESTED_PRIVATE);
        assert!(nested.contains(TypeAttributes::SEALED));
        assert!(nested.is_nested_visibility());
        assert!(!flags.is_nested_visibility());
    }

    #[test]
    fn test_field_access() {
        let flags = FieldAttributes::FAMILY | FieldAttributes::STATIC;
        assert_eq!(flags.access(), FieldAttributes::FAMILY);
    }
}
