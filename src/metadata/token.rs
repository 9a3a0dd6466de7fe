//! Metadata tokens identifying types and members inside one module.
//!
//! Tokens follow the ECMA-335 layout: the high byte names the table, the low 24 bits are the
//! row. They are minted by the [`crate::metadata::typesystem::TypeRegistry`] and are only
//! meaningful inside the [`crate::metadata::module::Module`] that defines the member; use a
//! [`crate::metadata::method::MethodKey`] to identify a method across modules.

use std::fmt;
use std::hash::{Hash, Hasher};

use strum::{EnumCount, EnumIter};

/// The metadata tables a [`Token`] can point into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, EnumCount, strum::Display)]
pub enum TableId {
    /// Type definitions (including generic parameters and constructed types)
    TypeDef,
    /// Field definitions
    Field,
    /// Method and constructor definitions
    MethodDef,
    /// Custom attribute applications
    CustomAttribute,
    /// Event definitions
    Event,
    /// Property definitions
    Property,
    /// Constructed generic instances and arrays
    TypeSpec,
    /// Generic parameters
    GenericParam,
}

impl TableId {
    /// The ECMA-335 table number used as the high byte of a token
    #[must_use]
    pub fn table_byte(self) -> u8 {
        match self {
            TableId::TypeDef => 0x02,
            TableId::Field => 0x04,
            TableId::MethodDef => 0x06,
            TableId::CustomAttribute => 0x0C,
            TableId::Event => 0x14,
            TableId::Property => 0x17,
            TableId::TypeSpec => 0x1B,
            TableId::GenericParam => 0x2A,
        }
    }

    /// Dense index of this table, used for per-table row counters
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up the table for a token's high byte
    #[must_use]
    pub fn from_table_byte(byte: u8) -> Option<Self> {
        use strum::IntoEnumIterator;
        TableId::iter().find(|table| table.table_byte() == byte)
    }
}

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table and a row number
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token((u32::from(table.table_byte()) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The table this token points into, if it is one the registry mints
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_table_byte(self.table())
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(TableId::MethodDef, 1);
        assert_eq!(token.value(), 0x06000001);
        assert_eq!(token.table_id(), Some(TableId::MethodDef));
        assert_eq!(token.row(), 1);
    }

    #[test]
    fn test_token_row_is_masked() {
        let token = Token::from_parts(TableId::Field, 0x0100_0002);
        assert_eq!(token.table(), 0x04);
        assert_eq!(token.row(), 2);
    }

    #[test]
    fn test_token_unknown_table() {
        assert_eq!(Token(0x7F000001).table_id(), None);
        assert!(Token(0).is_null());
    }

    #[test]
    fn test_token_display() {
        let token = Token(0x06000001);
        assert_eq!(format!("{}", token), "0x06000001");
        let debug_str = format!("{:?}", token);
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }

    #[test]
    fn test_token_hash_and_order() {
        let mut map = HashMap::new();
        let method = Token::from_parts(TableId::MethodDef, 2);
        let property = Token::from_parts(TableId::Property, 1);

        map.insert(method, "Method");
        map.insert(property, "Property");

        assert_eq!(map.get(&method), Some(&"Method"));
        assert!(method < property);
    }

    #[test]
    fn test_table_indices_are_dense() {
        use strum::IntoEnumIterator;
        for (expected, table) in TableId::iter().enumerate() {
            assert_eq!(table.index(), expected);
        }
        assert_eq!(TableId::COUNT, 8);
    }
}
