//! Attribute usage: where an attribute type may be applied and how often.
//!
//! The usage of an attribute type is read from the `AttributeUsageAttribute` on the type or
//! its nearest base type that carries one; types without it may be applied anywhere, once.

use bitflags::bitflags;

use crate::{
    metadata::{
        customattributes::{parse_custom_attribute_data, CustomAttributeArgument},
        typesystem::{RtTypeRc, TypeFlavor, TypeRegistry},
    },
    Result,
};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    /// `System.AttributeTargets`
    pub struct AttributeTargets: u32 {
        /// Assembly
        const ASSEMBLY = 0x0001;
        /// Module
        const MODULE = 0x0002;
        /// Class
        const CLASS = 0x0004;
        /// Struct
        const STRUCT = 0x0008;
        /// Enum
        const ENUM = 0x0010;
        /// Constructor
        const CONSTRUCTOR = 0x0020;
        /// Method
        const METHOD = 0x0040;
        /// Property
        const PROPERTY = 0x0080;
        /// Field
        const FIELD = 0x0100;
        /// Event
        const EVENT = 0x0200;
        /// Interface
        const INTERFACE = 0x0400;
        /// Parameter
        const PARAMETER = 0x0800;
        /// Delegate
        const DELEGATE = 0x1000;
        /// Return value
        const RETURN_VALUE = 0x2000;
        /// Generic parameter
        const GENERIC_PARAMETER = 0x4000;
        /// Anywhere
        const ALL = 0x7FFF;
    }
}

impl AttributeTargets {
    /// The target kind of a type definition
    #[must_use]
    pub fn for_type(ty: &RtTypeRc) -> Self {
        match ty.flavor {
            TypeFlavor::Interface => AttributeTargets::INTERFACE,
            TypeFlavor::Enum => AttributeTargets::ENUM,
            TypeFlavor::ValueType | TypeFlavor::Primitive(_) => AttributeTargets::STRUCT,
            TypeFlavor::GenericParameter { .. } => AttributeTargets::GENERIC_PARAMETER,
            _ => AttributeTargets::CLASS,
        }
    }
}

/// Decoded `AttributeUsageAttribute`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeUsage {
    /// Allowed targets
    pub valid_on: AttributeTargets,
    /// More than one application per target is allowed
    pub allow_multiple: bool,
    /// Applications are inherited by derived members
    pub inherited: bool,
}

impl Default for AttributeUsage {
    fn default() -> Self {
        AttributeUsage {
            valid_on: AttributeTargets::ALL,
            allow_multiple: false,
            inherited: true,
        }
    }
}

/// Reads the usage of `attribute_type` without consulting the registry cache
///
/// # Errors
/// Propagates blob parsing failures of a damaged `AttributeUsageAttribute`.
pub fn compute_attribute_usage(
    registry: &TypeRegistry,
    attribute_type: &RtTypeRc,
) -> Result<AttributeUsage> {
    let usage_type = &registry.core().attribute_usage_attribute;

    for ty in attribute_type.hierarchy() {
        for (_, attribute) in ty.custom_attributes.iter() {
            let Some(applied) = attribute.attribute_type() else {
                continue;
            };
            if applied.token != usage_type.token {
                continue;
            }

            let value = parse_custom_attribute_data(&attribute.blob, &attribute.constructor, registry)?;
            let mut usage = AttributeUsage::default();
            if let Some(valid_on) = value.fixed_args.first().and_then(CustomAttributeArgument::as_i64) {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    usage.valid_on = AttributeTargets::from_bits_truncate(valid_on as u32);
                }
            }
            for named in &value.named_args {
                let flag = matches!(named.value, CustomAttributeArgument::Bool(true));
                match named.name.as_str() {
                    "AllowMultiple" => usage.allow_multiple = flag,
                    "Inherited" => usage.inherited = flag,
                    _ => {}
                }
            }
            return Ok(usage);
        }
    }

    Ok(AttributeUsage::default())
}
