//! CustomAttribute-specific types and data structures.
//!
//! This module contains all the types used for representing custom attribute data: the
//! application record stored on a member, the decoded argument values and the
//! `FieldOrPropType` model that drives both decoding and encoding (ECMA-335 II.23.3).

use std::{fmt, sync::Arc};

use crate::{
    metadata::{
        method::MethodRc,
        token::Token,
        typesystem::{PrimitiveKind, RtTypeRc, TypeFlavor},
    },
    Result,
};

/// A reference-counted pointer to a `CustomAttribute`
pub type CustomAttributeRc = Arc<CustomAttribute>;
/// A vector that holds a list of `CustomAttribute` instances for storage on parent objects
pub type CustomAttributeList = Arc<boxcar::Vec<CustomAttributeRc>>;

/// One attribute application: the attribute constructor plus the encoded argument blob
pub struct CustomAttribute {
    /// Token
    pub token: Token,
    /// Constructor of the attribute type
    pub constructor: MethodRc,
    /// Encoded arguments (prolog, fixed arguments, named arguments)
    pub blob: Vec<u8>,
}

impl CustomAttribute {
    /// The attribute type, i.e. the type declaring the constructor
    #[must_use]
    pub fn attribute_type(&self) -> Option<RtTypeRc> {
        self.constructor.declaring_type()
    }

    /// Full name of the attribute type
    #[must_use]
    pub fn type_name(&self) -> String {
        self.attribute_type()
            .map(|ty| ty.full_name())
            .unwrap_or_default()
    }
}

impl fmt::Debug for CustomAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAttribute")
            .field("token", &self.token)
            .field("type", &self.type_name())
            .field("blob", &self.blob.len())
            .finish()
    }
}

/// Represents a decoded custom attribute value with arguments and named arguments
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeValue {
    /// Fixed arguments from the constructor signature
    pub fixed_args: Vec<CustomAttributeArgument>,
    /// Named arguments (fields and properties)
    pub named_args: Vec<CustomAttributeNamedArgument>,
}

/// Represents a single custom attribute argument value
#[derive(Debug, Clone, PartialEq)]
pub enum CustomAttributeArgument {
    /// Null string, type or array
    Null,
    /// Boolean value
    Bool(bool),
    /// Character value (16-bit Unicode)
    Char(char),
    /// Signed 8-bit integer
    I1(i8),
    /// Unsigned 8-bit integer
    U1(u8),
    /// Signed 16-bit integer
    I2(i16),
    /// Unsigned 16-bit integer
    U2(u16),
    /// Signed 32-bit integer
    I4(i32),
    /// Unsigned 32-bit integer
    U4(u32),
    /// Signed 64-bit integer
    I8(i64),
    /// Unsigned 64-bit integer
    U8(u64),
    /// 32-bit floating point
    R4(f32),
    /// 64-bit floating point
    R8(f64),
    /// UTF-8 string
    String(String),
    /// Type reference (as full name)
    Type(String),
    /// Array of arguments
    Array(Vec<CustomAttributeArgument>),
    /// Enum value (enum type name + underlying value)
    Enum(String, Box<CustomAttributeArgument>),
    /// Value passed to an `object` parameter, with its tagged type
    Boxed(ArgumentType, Box<CustomAttributeArgument>),
}

impl CustomAttributeArgument {
    /// Integer value of an integral or enum argument
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CustomAttributeArgument::I1(v) => Some(i64::from(*v)),
            CustomAttributeArgument::U1(v) => Some(i64::from(*v)),
            CustomAttributeArgument::I2(v) => Some(i64::from(*v)),
            CustomAttributeArgument::U2(v) => Some(i64::from(*v)),
            CustomAttributeArgument::I4(v) => Some(i64::from(*v)),
            CustomAttributeArgument::U4(v) => Some(i64::from(*v)),
            CustomAttributeArgument::I8(v) => Some(*v),
            #[allow(clippy::cast_possible_wrap)]
            CustomAttributeArgument::U8(v) => Some(*v as i64),
            CustomAttributeArgument::Enum(_, inner) | CustomAttributeArgument::Boxed(_, inner) => {
                inner.as_i64()
            }
            _ => None,
        }
    }
}

/// Represents a named argument (field or property) in a custom attribute
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeNamedArgument {
    /// Whether this is a field (true) or property (false)
    pub is_field: bool,
    /// Name of the field or property
    pub name: String,
    /// Type of the argument
    pub arg_type: ArgumentType,
    /// Value of the argument
    pub value: CustomAttributeArgument,
}

/// The types a custom attribute argument can have (`FieldOrPropType`, II.23.3)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgumentType {
    /// `bool`, `char`, integers and floats
    Primitive(PrimitiveKind),
    /// `string`
    String,
    /// `System.Type`
    Type,
    /// `object`, value carries its own tag
    Boxed,
    /// Enum with its full name and underlying primitive
    Enum(String, PrimitiveKind),
    /// Single-dimensional array
    SzArray(Box<ArgumentType>),
}

impl ArgumentType {
    /// Maps a parameter, field or property type to its argument type
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] for types that cannot appear in an attribute
    /// blob.
    pub fn from_type(ty: &RtTypeRc) -> Result<Self> {
        match ty.flavor {
            TypeFlavor::Primitive(PrimitiveKind::Void) => {
                Err(attribute_error!("'void' is not a valid attribute argument type"))
            }
            TypeFlavor::Primitive(kind) => Ok(ArgumentType::Primitive(kind)),
            TypeFlavor::String => Ok(ArgumentType::String),
            TypeFlavor::Object => Ok(ArgumentType::Boxed),
            TypeFlavor::Enum => {
                let underlying = match ty.underlying_type().map(|u| u.flavor) {
                    Some(TypeFlavor::Primitive(kind)) => kind,
                    _ => PrimitiveKind::I4,
                };
                Ok(ArgumentType::Enum(ty.full_name(), underlying))
            }
            TypeFlavor::Array => match ty.element_type() {
                Some(element) => Ok(ArgumentType::SzArray(Box::new(Self::from_type(&element)?))),
                None => Err(attribute_error!("Array type without element type")),
            },
            _ if ty.full_name() == "System.Type" => Ok(ArgumentType::Type),
            _ => Err(attribute_error!(
                "'{}' is not a valid attribute argument type",
                ty.full_name()
            )),
        }
    }

    /// `CorSerializationType` tag of this type
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            ArgumentType::Primitive(kind) => primitive_tag(*kind),
            ArgumentType::String => SERIALIZATION_TYPE::STRING,
            ArgumentType::Type => SERIALIZATION_TYPE::TYPE,
            ArgumentType::Boxed => SERIALIZATION_TYPE::TAGGED_OBJECT,
            ArgumentType::Enum(..) => SERIALIZATION_TYPE::ENUM,
            ArgumentType::SzArray(_) => SERIALIZATION_TYPE::SZARRAY,
        }
    }
}

/// `CorSerializationType` tag of a primitive
#[must_use]
pub fn primitive_tag(kind: PrimitiveKind) -> u8 {
    match kind {
        PrimitiveKind::Void => 0x01,
        PrimitiveKind::Boolean => SERIALIZATION_TYPE::BOOLEAN,
        PrimitiveKind::Char => SERIALIZATION_TYPE::CHAR,
        PrimitiveKind::I1 => SERIALIZATION_TYPE::I1,
        PrimitiveKind::U1 => SERIALIZATION_TYPE::U1,
        PrimitiveKind::I2 => SERIALIZATION_TYPE::I2,
        PrimitiveKind::U2 => SERIALIZATION_TYPE::U2,
        PrimitiveKind::I4 => SERIALIZATION_TYPE::I4,
        PrimitiveKind::U4 => SERIALIZATION_TYPE::U4,
        PrimitiveKind::I8 => SERIALIZATION_TYPE::I8,
        PrimitiveKind::U8 => SERIALIZATION_TYPE::U8,
        PrimitiveKind::R4 => SERIALIZATION_TYPE::R4,
        PrimitiveKind::R8 => SERIALIZATION_TYPE::R8,
    }
}

/// Primitive for a `CorSerializationType` tag
#[must_use]
pub fn primitive_from_tag(tag: u8) -> Option<PrimitiveKind> {
    match tag {
        SERIALIZATION_TYPE::BOOLEAN => Some(PrimitiveKind::Boolean),
        SERIALIZATION_TYPE::CHAR => Some(PrimitiveKind::Char),
        SERIALIZATION_TYPE::I1 => Some(PrimitiveKind::I1),
        SERIALIZATION_TYPE::U1 => Some(PrimitiveKind::U1),
        SERIALIZATION_TYPE::I2 => Some(PrimitiveKind::I2),
        SERIALIZATION_TYPE::U2 => Some(PrimitiveKind::U2),
        SERIALIZATION_TYPE::I4 => Some(PrimitiveKind::I4),
        SERIALIZATION_TYPE::U4 => Some(PrimitiveKind::U4),
        SERIALIZATION_TYPE::I8 => Some(PrimitiveKind::I8),
        SERIALIZATION_TYPE::U8 => Some(PrimitiveKind::U8),
        SERIALIZATION_TYPE::R4 => Some(PrimitiveKind::R4),
        SERIALIZATION_TYPE::R8 => Some(PrimitiveKind::R8),
        _ => None,
    }
}

/// .NET `CorSerializationType` constants as defined in corhdr.h
#[allow(non_snake_case, missing_docs)]
pub mod SERIALIZATION_TYPE {
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const SZARRAY: u8 = 0x1D;
    pub const TYPE: u8 = 0x50;
    pub const TAGGED_OBJECT: u8 = 0x51;
    pub const FIELD: u8 = 0x53;
    pub const PROPERTY: u8 = 0x54;
    pub const ENUM: u8 = 0x55;
}
