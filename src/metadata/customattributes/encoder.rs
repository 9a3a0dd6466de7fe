//! Custom attribute blob encoding, the inverse of the parser.
//!
//! Every value is checked against the type it is written as; a mismatch is an attribute shape
//! violation rather than a silently coerced blob.

use crate::{
    metadata::{
        customattributes::{
            blob::BlobWriter,
            types::{
                ArgumentType, CustomAttributeArgument, CustomAttributeNamedArgument,
                CustomAttributeValue, SERIALIZATION_TYPE,
            },
        },
        method::Method,
        typesystem::PrimitiveKind,
    },
    Result,
};

/// Encodes `value` as the blob of an application of `constructor`
///
/// # Errors
/// Returns [`crate::Error::AttributeShape`] if the argument count or any argument type does
/// not match the constructor, or a named argument's value does not match its declared type.
pub fn encode_custom_attribute_value(
    constructor: &Method,
    value: &CustomAttributeValue,
) -> Result<Vec<u8>> {
    if constructor.params.len() != value.fixed_args.len() {
        return Err(attribute_error!(
            "Constructor {} expects {} arguments, got {}",
            constructor.full_name(),
            constructor.params.len(),
            value.fixed_args.len()
        ));
    }

    let mut writer = BlobWriter::new();
    writer.write_le::<u16>(0x0001);

    for (param, arg) in constructor.params.iter().zip(&value.fixed_args) {
        let arg_type = ArgumentType::from_type(&param.param_type)?;
        write_value(&mut writer, &arg_type, arg).map_err(|error| {
            attribute_error!(
                "Argument '{}' of {}: {}",
                param.name,
                constructor.full_name(),
                error
            )
        })?;
    }

    let count = u16::try_from(value.named_args.len())
        .map_err(|_| attribute_error!("Too many named arguments"))?;
    writer.write_le::<u16>(count);
    for named in &value.named_args {
        write_named_argument(&mut writer, named)?;
    }

    Ok(writer.into_inner())
}

fn write_named_argument(writer: &mut BlobWriter, named: &CustomAttributeNamedArgument) -> Result<()> {
    writer.write_le::<u8>(if named.is_field {
        SERIALIZATION_TYPE::FIELD
    } else {
        SERIALIZATION_TYPE::PROPERTY
    });
    write_field_or_prop_type(writer, &named.arg_type)?;
    writer.write_ser_string(Some(&named.name))?;
    write_value(writer, &named.arg_type, &named.value)
        .map_err(|error| attribute_error!("Named argument '{}': {}", named.name, error))
}

fn write_field_or_prop_type(writer: &mut BlobWriter, arg_type: &ArgumentType) -> Result<()> {
    writer.write_le::<u8>(arg_type.tag());
    match arg_type {
        ArgumentType::SzArray(element) => write_field_or_prop_type(writer, element),
        ArgumentType::Enum(name, _) => writer.write_ser_string(Some(name)),
        _ => Ok(()),
    }
}

fn write_value(
    writer: &mut BlobWriter,
    arg_type: &ArgumentType,
    arg: &CustomAttributeArgument,
) -> Result<()> {
    match (arg_type, arg) {
        (ArgumentType::Primitive(kind), _) => write_primitive(writer, *kind, arg),
        (ArgumentType::String, CustomAttributeArgument::String(text))
        | (ArgumentType::Type, CustomAttributeArgument::Type(text)) => {
            writer.write_ser_string(Some(text))
        }
        (ArgumentType::String | ArgumentType::Type, CustomAttributeArgument::Null) => {
            writer.write_ser_string(None)
        }
        (ArgumentType::Enum(name, underlying), CustomAttributeArgument::Enum(value_type, inner)) => {
            if name != value_type {
                return Err(attribute_error!(
                    "Enum value of type '{}' where '{}' is expected",
                    value_type,
                    name
                ));
            }
            write_primitive(writer, *underlying, inner)
        }
        (ArgumentType::Enum(_, underlying), _) if arg.as_i64().is_some() => {
            write_primitive(writer, *underlying, arg)
        }
        (ArgumentType::Boxed, CustomAttributeArgument::Boxed(tagged, inner)) => {
            write_field_or_prop_type(writer, tagged)?;
            write_value(writer, tagged, inner)
        }
        (ArgumentType::SzArray(_), CustomAttributeArgument::Null) => {
            writer.write_le::<u32>(u32::MAX);
            Ok(())
        }
        (ArgumentType::SzArray(element), CustomAttributeArgument::Array(items)) => {
            let count = u32::try_from(items.len())
                .map_err(|_| attribute_error!("Array of {} elements too long", items.len()))?;
            writer.write_le::<u32>(count);
            for item in items {
                write_value(writer, element, item)?;
            }
            Ok(())
        }
        _ => Err(attribute_error!(
            "Value {:?} does not match argument type {:?}",
            arg,
            arg_type
        )),
    }
}

fn write_primitive(
    writer: &mut BlobWriter,
    kind: PrimitiveKind,
    arg: &CustomAttributeArgument,
) -> Result<()> {
    match (kind, arg) {
        (PrimitiveKind::Boolean, CustomAttributeArgument::Bool(v)) => {
            writer.write_le::<u8>(u8::from(*v));
        }
        (PrimitiveKind::Char, CustomAttributeArgument::Char(v)) => {
            let code = u16::try_from(u32::from(*v))
                .map_err(|_| attribute_error!("Char '{}' outside the UTF-16 BMP", v))?;
            writer.write_le::<u16>(code);
        }
        (PrimitiveKind::R4, CustomAttributeArgument::R4(v)) => writer.write_le::<f32>(*v),
        (PrimitiveKind::R8, CustomAttributeArgument::R8(v)) => writer.write_le::<f64>(*v),
        (PrimitiveKind::R4 | PrimitiveKind::R8, _)
        | (PrimitiveKind::Boolean | PrimitiveKind::Char | PrimitiveKind::Void, _) => {
            return Err(attribute_error!("Value {:?} is not a {}", arg, kind));
        }
        (_, _) => {
            let value = integer_value(arg)
                .ok_or_else(|| attribute_error!("Value {:?} is not a {}", arg, kind))?;
            match kind {
                PrimitiveKind::I1 => writer.write_le::<i8>(narrow(value, kind)?),
                PrimitiveKind::U1 => writer.write_le::<u8>(narrow(value, kind)?),
                PrimitiveKind::I2 => writer.write_le::<i16>(narrow(value, kind)?),
                PrimitiveKind::U2 => writer.write_le::<u16>(narrow(value, kind)?),
                PrimitiveKind::I4 => writer.write_le::<i32>(narrow(value, kind)?),
                PrimitiveKind::U4 => writer.write_le::<u32>(narrow(value, kind)?),
                PrimitiveKind::I8 => writer.write_le::<i64>(narrow(value, kind)?),
                _ => writer.write_le::<u64>(narrow(value, kind)?),
            }
        }
    }
    Ok(())
}

/// Integer payload of `arg`, wide enough for every integral argument
fn integer_value(arg: &CustomAttributeArgument) -> Option<i128> {
    match arg {
        CustomAttributeArgument::U8(v) => Some(i128::from(*v)),
        CustomAttributeArgument::Enum(_, inner) | CustomAttributeArgument::Boxed(_, inner) => {
            integer_value(inner)
        }
        _ => arg.as_i64().map(i128::from),
    }
}

fn narrow<T: TryFrom<i128>>(value: i128, kind: PrimitiveKind) -> Result<T> {
    T::try_from(value).map_err(|_| attribute_error!("Value {} is out of range for {}", value, kind))
}
