//! Custom attribute blob parsing (ECMA-335 II.23.3).
//!
//! Fixed arguments are decoded type-directed from the constructor's parameter types; named
//! arguments carry explicit `FieldOrPropType` tags. Enum tags name their type, and the
//! registry is consulted to find the underlying primitive so the value can be read with the
//! correct width.
//!
//! # Example
//!
//! ```rust,ignore
//! let value = parse_custom_attribute_data(&attribute.blob, &attribute.constructor, &registry)?;
//! println!("{} fixed, {} named", value.fixed_args.len(), value.named_args.len());
//! ```

use crate::{
    metadata::{
        customattributes::{
            blob::BlobReader,
            types::{
                primitive_from_tag, ArgumentType, CustomAttributeArgument,
                CustomAttributeNamedArgument, CustomAttributeValue, SERIALIZATION_TYPE,
            },
        },
        method::Method,
        typesystem::{PrimitiveKind, TypeFlavor, TypeRegistry},
    },
    Result,
};

/// Maximum nesting of array and boxed values
const MAX_NESTING_DEPTH: usize = 16;

/// Parses a custom attribute blob against its constructor
///
/// # Errors
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged blobs and
/// [`crate::Error::AttributeShape`] for constructors with unsupported parameter types.
pub fn parse_custom_attribute_data(
    data: &[u8],
    constructor: &Method,
    registry: &TypeRegistry,
) -> Result<CustomAttributeValue> {
    CustomAttributeParser::new(data, registry).parse_custom_attribute(constructor)
}

/// Stateful parser over one custom attribute blob
pub struct CustomAttributeParser<'a> {
    reader: BlobReader<'a>,
    registry: &'a TypeRegistry,
    depth: usize,
}

impl<'a> CustomAttributeParser<'a> {
    /// Creates a parser for `data`
    #[must_use]
    pub fn new(data: &'a [u8], registry: &'a TypeRegistry) -> Self {
        CustomAttributeParser {
            reader: BlobReader::new(data),
            registry,
            depth: 0,
        }
    }

    /// Parses the complete blob
    ///
    /// # Errors
    /// See [`parse_custom_attribute_data`].
    pub fn parse_custom_attribute(&mut self, constructor: &Method) -> Result<CustomAttributeValue> {
        // Check for the standard prolog (0x0001)
        let prolog = self.reader.read_le::<u16>()?;
        if prolog != 0x0001 {
            return Err(malformed_error!(
                "Invalid custom attribute prolog - expected 0x0001, got 0x{:04x}",
                prolog
            ));
        }

        let mut fixed_args = Vec::with_capacity(constructor.params.len());
        for param in &constructor.params {
            let arg_type = ArgumentType::from_type(&param.param_type)?;
            fixed_args.push(self.read_value(&arg_type)?);
        }

        let named_args = if self.reader.remaining() >= 2 {
            let num_named = self.reader.read_le::<u16>()?;
            let mut args = Vec::with_capacity(num_named as usize);
            for _ in 0..num_named {
                args.push(self.parse_named_argument()?);
            }
            args
        } else {
            Vec::new()
        };

        if self.reader.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after custom attribute",
                self.reader.remaining()
            ));
        }

        Ok(CustomAttributeValue {
            fixed_args,
            named_args,
        })
    }

    fn parse_named_argument(&mut self) -> Result<CustomAttributeNamedArgument> {
        let kind = self.reader.read_le::<u8>()?;
        let is_field = match kind {
            SERIALIZATION_TYPE::FIELD => true,
            SERIALIZATION_TYPE::PROPERTY => false,
            _ => {
                return Err(malformed_error!(
                    "Invalid named argument kind 0x{:02x} - expected FIELD or PROPERTY",
                    kind
                ))
            }
        };

        let arg_type = self.read_field_or_prop_type()?;
        let name = self
            .reader
            .read_ser_string()?
            .ok_or_else(|| malformed_error!("Named argument without a name"))?;
        let value = self.read_value(&arg_type)?;

        Ok(CustomAttributeNamedArgument {
            is_field,
            name,
            arg_type,
            value,
        })
    }

    fn read_field_or_prop_type(&mut self) -> Result<ArgumentType> {
        let tag = self.reader.read_le::<u8>()?;
        if let Some(kind) = primitive_from_tag(tag) {
            return Ok(ArgumentType::Primitive(kind));
        }

        match tag {
            SERIALIZATION_TYPE::STRING => Ok(ArgumentType::String),
            SERIALIZATION_TYPE::TYPE => Ok(ArgumentType::Type),
            SERIALIZATION_TYPE::TAGGED_OBJECT => Ok(ArgumentType::Boxed),
            SERIALIZATION_TYPE::SZARRAY => {
                self.enter()?;
                let element = self.read_field_or_prop_type();
                self.depth -= 1;
                Ok(ArgumentType::SzArray(Box::new(element?)))
            }
            SERIALIZATION_TYPE::ENUM => {
                let name = self
                    .reader
                    .read_ser_string()?
                    .ok_or_else(|| malformed_error!("Enum tag without a type name"))?;
                let underlying = self.enum_underlying(&name);
                Ok(ArgumentType::Enum(name, underlying))
            }
            _ => Err(malformed_error!(
                "Unknown FieldOrPropType tag 0x{:02x}",
                tag
            )),
        }
    }

    /// Underlying primitive of a named enum, `int` when the enum is unknown
    fn enum_underlying(&self, name: &str) -> PrimitiveKind {
        self.registry
            .get_by_fullname(name)
            .into_iter()
            .find_map(|ty| match ty.underlying_type().map(|u| u.flavor) {
                Some(TypeFlavor::Primitive(kind)) => Some(kind),
                _ => None,
            })
            .unwrap_or(PrimitiveKind::I4)
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(malformed_error!(
                "Custom attribute nesting exceeds {} levels",
                MAX_NESTING_DEPTH
            ));
        }
        Ok(())
    }

    fn read_value(&mut self, arg_type: &ArgumentType) -> Result<CustomAttributeArgument> {
        match arg_type {
            ArgumentType::Primitive(kind) => self.read_primitive(*kind),
            ArgumentType::String => Ok(match self.reader.read_ser_string()? {
                Some(text) => CustomAttributeArgument::String(text),
                None => CustomAttributeArgument::Null,
            }),
            ArgumentType::Type => Ok(match self.reader.read_ser_string()? {
                Some(name) => CustomAttributeArgument::Type(name),
                None => CustomAttributeArgument::Null,
            }),
            ArgumentType::Enum(name, underlying) => {
                let value = self.read_primitive(*underlying)?;
                Ok(CustomAttributeArgument::Enum(name.clone(), Box::new(value)))
            }
            ArgumentType::Boxed => {
                self.enter()?;
                let result = self.read_field_or_prop_type().and_then(|tagged| {
                    let value = self.read_value(&tagged)?;
                    Ok(CustomAttributeArgument::Boxed(tagged, Box::new(value)))
                });
                self.depth -= 1;
                result
            }
            ArgumentType::SzArray(element) => {
                let count = self.reader.read_le::<u32>()?;
                if count == u32::MAX {
                    return Ok(CustomAttributeArgument::Null);
                }
                if count as usize > self.reader.remaining() {
                    return Err(malformed_error!(
                        "Array of {} elements exceeds remaining blob data",
                        count
                    ));
                }

                self.enter()?;
                let mut items = Vec::with_capacity(count as usize);
                let mut failure = None;
                for _ in 0..count {
                    match self.read_value(element) {
                        Ok(item) => items.push(item),
                        Err(error) => {
                            failure = Some(error);
                            break;
                        }
                    }
                }
                self.depth -= 1;
                match failure {
                    Some(error) => Err(error),
                    None => Ok(CustomAttributeArgument::Array(items)),
                }
            }
        }
    }

    fn read_primitive(&mut self, kind: PrimitiveKind) -> Result<CustomAttributeArgument> {
        Ok(match kind {
            PrimitiveKind::Boolean => CustomAttributeArgument::Bool(self.reader.read_le::<u8>()? != 0),
            PrimitiveKind::Char => {
                let code = self.reader.read_le::<u16>()?;
                let value = char::from_u32(u32::from(code))
                    .ok_or_else(|| malformed_error!("Invalid char value 0x{:04x}", code))?;
                CustomAttributeArgument::Char(value)
            }
            PrimitiveKind::I1 => CustomAttributeArgument::I1(self.reader.read_le::<i8>()?),
            PrimitiveKind::U1 => CustomAttributeArgument::U1(self.reader.read_le::<u8>()?),
            PrimitiveKind::I2 => CustomAttributeArgument::I2(self.reader.read_le::<i16>()?),
            PrimitiveKind::U2 => CustomAttributeArgument::U2(self.reader.read_le::<u16>()?),
            PrimitiveKind::I4 => CustomAttributeArgument::I4(self.reader.read_le::<i32>()?),
            PrimitiveKind::U4 => CustomAttributeArgument::U4(self.reader.read_le::<u32>()?),
            PrimitiveKind::I8 => CustomAttributeArgument::I8(self.reader.read_le::<i64>()?),
            PrimitiveKind::U8 => CustomAttributeArgument::U8(self.reader.read_le::<u64>()?),
            PrimitiveKind::R4 => CustomAttributeArgument::R4(self.reader.read_le::<f32>()?),
            PrimitiveKind::R8 => CustomAttributeArgument::R8(self.reader.read_le::<f64>()?),
            PrimitiveKind::Void => {
                return Err(malformed_error!("'void' value in custom attribute blob"))
            }
        })
    }
}
