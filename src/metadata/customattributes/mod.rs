//! Custom attribute representation, parsing and encoding.
//!
//! Custom attributes encode metadata annotations in a compact binary format that includes
//! constructor arguments and named field/property values.
//!
//! # Custom Attribute Format
//!
//! Custom attributes use a binary encoding with the following structure:
//! - **Prolog** - Standard 0x0001 marker indicating valid custom attribute blob
//! - **Fixed Arguments** - Constructor parameter values in declaration order
//! - **Named Arguments** - Field and property values with name/value pairs
//!
//! The blob is stored on the member as a [`CustomAttribute`] next to the attribute
//! constructor. [`parse_custom_attribute_data`] decodes it into a [`CustomAttributeValue`],
//! [`encode_custom_attribute_value`] produces it, and [`usage`] answers where an attribute type
//! may be applied.
//!
//! # References
//!
//! - ECMA-335 6th Edition, Partition II, Section 23.3 - Custom Attributes

mod blob;
mod encoder;
mod parser;
mod types;
pub mod usage;

pub use blob::{BlobReader, BlobWriter};
pub use encoder::encode_custom_attribute_value;
pub use parser::{parse_custom_attribute_data, CustomAttributeParser};
pub use types::*;
pub use usage::{AttributeTargets, AttributeUsage};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::MethodAttributes;
    use crate::metadata::typesystem::{FieldAttributes, PrimitiveKind, TypeBuilder};
    use crate::test::fixtures::{marker_attribute_type, registry};

    #[test]
    fn test_encode_parse_fixed_and_named() {
        let registry = registry();
        let marker = marker_attribute_type(&registry);
        let ctor = marker.constructors().pop().unwrap();

        let value = CustomAttributeValue {
            fixed_args: vec![
                CustomAttributeArgument::String("label".to_string()),
                CustomAttributeArgument::Array(vec![
                    CustomAttributeArgument::I4(1),
                    CustomAttributeArgument::I4(2),
                ]),
            ],
            named_args: vec![CustomAttributeNamedArgument {
                is_field: true,
                name: "Level".to_string(),
                arg_type: ArgumentType::Primitive(PrimitiveKind::I4),
                value: CustomAttributeArgument::I4(7),
            }],
        };

        let blob = encode_custom_attribute_value(&ctor, &value).unwrap();
        assert_eq!(&blob[..2], &[0x01, 0x00]);

        let parsed = parse_custom_attribute_data(&blob, &ctor, &registry).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_null_string_and_array() {
        let registry = registry();
        let marker = marker_attribute_type(&registry);
        let ctor = marker.constructors().pop().unwrap();

        let value = CustomAttributeValue {
            fixed_args: vec![CustomAttributeArgument::Null, CustomAttributeArgument::Null],
            named_args: vec![],
        };
        let blob = encode_custom_attribute_value(&ctor, &value).unwrap();
        let parsed = parse_custom_attribute_data(&blob, &ctor, &registry).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_arity_mismatch_is_rejected() {
        let registry = registry();
        let marker = marker_attribute_type(&registry);
        let ctor = marker.constructors().pop().unwrap();

        let value = CustomAttributeValue {
            fixed_args: vec![CustomAttributeArgument::String("only one".to_string())],
            named_args: vec![],
        };
        assert!(matches!(
            encode_custom_attribute_value(&ctor, &value),
            Err(crate::Error::AttributeShape(_))
        ));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let registry = registry();
        let marker = marker_attribute_type(&registry);
        let ctor = marker.constructors().pop().unwrap();

        let value = CustomAttributeValue {
            fixed_args: vec![CustomAttributeArgument::I4(3), CustomAttributeArgument::Null],
            named_args: vec![],
        };
        assert!(matches!(
            encode_custom_attribute_value(&ctor, &value),
            Err(crate::Error::AttributeShape(_))
        ));
    }

    #[test]
    fn test_out_of_range_integers_are_rejected() {
        let registry = registry();
        let core = registry.core();
        let module = registry.create_module("Samples", None);
        let builder = TypeBuilder::new(&registry, &module)
            .class("Samples", "ByteAttribute", &core.attribute)
            .unwrap();
        let level = builder.field("_level", &core.byte, FieldAttributes::PRIVATE).unwrap();
        let ctor = builder
            .storing_constructor(MethodAttributes::public(), &core.void, &[("level", &core.byte)], vec![level])
            .unwrap();

        let fixed = |value| CustomAttributeValue {
            fixed_args: vec![value],
            named_args: vec![],
        };
        assert!(matches!(
            encode_custom_attribute_value(&ctor, &fixed(CustomAttributeArgument::I4(300))),
            Err(crate::Error::AttributeShape(_))
        ));
        assert!(matches!(
            encode_custom_attribute_value(&ctor, &fixed(CustomAttributeArgument::I4(-1))),
            Err(crate::Error::AttributeShape(_))
        ));

        let blob = encode_custom_attribute_value(&ctor, &fixed(CustomAttributeArgument::I4(255))).unwrap();
        let parsed = parse_custom_attribute_data(&blob, &ctor, &registry).unwrap();
        assert_eq!(parsed.fixed_args, vec![CustomAttributeArgument::U1(255)]);

        let named = CustomAttributeValue {
            fixed_args: vec![CustomAttributeArgument::U1(1)],
            named_args: vec![CustomAttributeNamedArgument {
                is_field: true,
                name: "Small".to_string(),
                arg_type: ArgumentType::Primitive(PrimitiveKind::I2),
                value: CustomAttributeArgument::I8(40_000),
            }],
        };
        assert!(matches!(
            encode_custom_attribute_value(&ctor, &named),
            Err(crate::Error::AttributeShape(_))
        ));
    }

    #[test]
    fn test_bad_prolog() {
        let registry = registry();
        let marker = marker_attribute_type(&registry);
        let ctor = marker.constructors().pop().unwrap();
        assert!(matches!(
            parse_custom_attribute_data(&[0x02, 0x00], &ctor, &registry),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_usage_of_core_attributes() {
        let registry = registry();
        let core = registry.core();
        let usage = registry.attribute_usage(&core.on_deserialized_attribute).unwrap();
        assert_eq!(usage.valid_on, AttributeTargets::METHOD);
        assert!(!usage.allow_multiple);

        let marker = marker_attribute_type(&registry);
        let usage = registry.attribute_usage(&marker).unwrap();
        assert!(usage.valid_on.contains(AttributeTargets::CLASS));
        assert!(usage.allow_multiple);
    }
}
