//! Attribute replication between live members and members being generated.
//!
//! A [`CustomAttributeDescriptor`] is the decoded, member-resolved form of one attribute
//! application: the constructor, its positional arguments and the named fields and properties
//! with their values. The [`AttributeReplicator`] converts in all directions:
//!
//! - [`AttributeReplicator::parse`] decodes an applied attribute into a descriptor,
//! - [`AttributeReplicator::instantiate`] runs the constructor and the named assignments on a
//!   [`Runtime`] and returns the attribute object,
//! - [`AttributeReplicator::generate`] encodes a descriptor onto a member being built,
//! - [`AttributeReplicator::replicate`] copies every applicable attribute of a source member.
//!
//! Array arguments are unwrapped element by element, enum arguments are carried by their
//! underlying numeric value and re-typed on instantiation.

use std::sync::Arc;

use crate::{
    emulation::{EmValue, HeapArray, Runtime},
    metadata::{
        customattributes::{
            parse_custom_attribute_data, ArgumentType, AttributeTargets, CustomAttribute,
            CustomAttributeArgument, CustomAttributeList, CustomAttributeNamedArgument,
            CustomAttributeRc, CustomAttributeValue,
        },
        members::{EventRc, FieldRc, PropertyRc},
        method::MethodRc,
        typesystem::{RtTypeRc, TypeRegistry},
    },
    Result,
};

/// A member an attribute is applied to
#[derive(Clone, Copy)]
pub enum AttributeTarget<'a> {
    /// A type definition
    Type(&'a RtTypeRc),
    /// A method or constructor
    Method(&'a MethodRc),
    /// A field
    Field(&'a FieldRc),
    /// A property
    Property(&'a PropertyRc),
    /// An event
    Event(&'a EventRc),
}

impl AttributeTarget<'_> {
    /// The attribute list of the target
    #[must_use]
    pub fn custom_attributes(&self) -> &CustomAttributeList {
        match self {
            AttributeTarget::Type(ty) => &ty.custom_attributes,
            AttributeTarget::Method(method) => &method.custom_attributes,
            AttributeTarget::Field(field) => &field.custom_attributes,
            AttributeTarget::Property(property) => &property.custom_attributes,
            AttributeTarget::Event(event) => &event.custom_attributes,
        }
    }

    /// The `AttributeTargets` kind of the target
    #[must_use]
    pub fn kind(&self) -> AttributeTargets {
        match self {
            AttributeTarget::Type(ty) => AttributeTargets::for_type(ty),
            AttributeTarget::Method(method) if method.is_constructor() => {
                AttributeTargets::CONSTRUCTOR
            }
            AttributeTarget::Method(_) => AttributeTargets::METHOD,
            AttributeTarget::Field(_) => AttributeTargets::FIELD,
            AttributeTarget::Property(_) => AttributeTargets::PROPERTY,
            AttributeTarget::Event(_) => AttributeTargets::EVENT,
        }
    }

    /// Name used in diagnostics
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            AttributeTarget::Type(ty) => ty.full_name(),
            AttributeTarget::Method(method) => method.full_name(),
            AttributeTarget::Field(field) => field.full_name(),
            AttributeTarget::Property(property) => property.name.clone(),
            AttributeTarget::Event(event) => event.name.clone(),
        }
    }
}

/// One attribute application with its named members resolved
#[derive(Clone, Debug)]
pub struct CustomAttributeDescriptor {
    /// Attribute constructor
    pub constructor: MethodRc,
    /// Constructor arguments, positionally parallel to its parameters
    pub arguments: Vec<CustomAttributeArgument>,
    /// Named field assignments, in order
    pub fields: Vec<(FieldRc, CustomAttributeArgument)>,
    /// Named property assignments, in order
    pub properties: Vec<(PropertyRc, CustomAttributeArgument)>,
}

impl CustomAttributeDescriptor {
    /// A descriptor without named arguments
    #[must_use]
    pub fn new(constructor: &MethodRc, arguments: Vec<CustomAttributeArgument>) -> Self {
        CustomAttributeDescriptor {
            constructor: constructor.clone(),
            arguments,
            fields: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Adds a named field assignment
    #[must_use]
    pub fn with_field(mut self, field: &FieldRc, value: CustomAttributeArgument) -> Self {
        self.fields.push((field.clone(), value));
        self
    }

    /// Adds a named property assignment
    #[must_use]
    pub fn with_property(mut self, property: &PropertyRc, value: CustomAttributeArgument) -> Self {
        self.properties.push((property.clone(), value));
        self
    }

    /// The attribute type
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeNotFound`] if the constructor lost its declaring type.
    pub fn attribute_type(&self) -> Result<RtTypeRc> {
        self.constructor.owner()
    }

    /// The blob-level value of this descriptor
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] for named members whose type cannot appear in
    /// an attribute.
    pub fn to_value(&self) -> Result<CustomAttributeValue> {
        let mut named_args = Vec::with_capacity(self.fields.len() + self.properties.len());
        for (field, value) in &self.fields {
            named_args.push(CustomAttributeNamedArgument {
                is_field: true,
                name: field.name.clone(),
                arg_type: ArgumentType::from_type(&field.field_type)?,
                value: value.clone(),
            });
        }
        for (property, value) in &self.properties {
            named_args.push(CustomAttributeNamedArgument {
                is_field: false,
                name: property.name.clone(),
                arg_type: ArgumentType::from_type(&property.property_type)?,
                value: value.clone(),
            });
        }
        Ok(CustomAttributeValue {
            fixed_args: self.arguments.clone(),
            named_args,
        })
    }
}

/// Converts attribute applications between blobs, descriptors and live objects
pub struct AttributeReplicator {
    registry: Arc<TypeRegistry>,
}

impl AttributeReplicator {
    /// Creates a replicator over `registry`
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        AttributeReplicator { registry }
    }

    /// Decodes an applied attribute and resolves its named members
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if a named member does not exist on the
    /// attribute type, and propagates blob decoding errors.
    pub fn parse(&self, attribute: &CustomAttribute) -> Result<CustomAttributeDescriptor> {
        let attribute_type = attribute.constructor.owner()?;
        let value = parse_custom_attribute_data(&attribute.blob, &attribute.constructor, &self.registry)?;

        let mut descriptor = CustomAttributeDescriptor::new(&attribute.constructor, value.fixed_args);
        for named in value.named_args {
            if named.is_field {
                let field = attribute_type.find_field_in_hierarchy(&named.name).ok_or_else(|| {
                    attribute_error!(
                        "{} has no field '{}'",
                        attribute_type.full_name(),
                        named.name
                    )
                })?;
                descriptor.fields.push((field, named.value));
            } else {
                let property = attribute_type
                    .hierarchy()
                    .iter()
                    .find_map(|ty| ty.property_by_name(&named.name))
                    .ok_or_else(|| {
                        attribute_error!(
                            "{} has no property '{}'",
                            attribute_type.full_name(),
                            named.name
                        )
                    })?;
                descriptor.properties.push((property, named.value));
            }
        }
        Ok(descriptor)
    }

    /// Creates the attribute object described by `descriptor`
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] for values that do not fit their declared
    /// type, and propagates failures of the constructor and setters.
    pub fn instantiate(&self, runtime: &Runtime, descriptor: &CustomAttributeDescriptor) -> Result<EmValue> {
        let constructor = &descriptor.constructor;
        if constructor.params.len() != descriptor.arguments.len() {
            return Err(attribute_error!(
                "Constructor {} expects {} arguments, got {}",
                constructor.full_name(),
                constructor.params.len(),
                descriptor.arguments.len()
            ));
        }

        let arguments = constructor
            .params
            .iter()
            .zip(&descriptor.arguments)
            .map(|(param, argument)| self.argument_value(argument, &param.param_type))
            .collect::<Result<Vec<_>>>()?;
        let instance = runtime.construct(constructor, &arguments)?;

        for (field, argument) in &descriptor.fields {
            let value = self.argument_value(argument, &field.field_type)?;
            runtime.store_field(&instance, field, value)?;
        }
        for (property, argument) in &descriptor.properties {
            let setter = property.setter().ok_or_else(|| {
                attribute_error!("Property '{}' of an attribute has no setter", property.name)
            })?;
            let value = self.argument_value(argument, &property.property_type)?;
            runtime.invoke_virtual(&setter, &instance, &[value])?;
        }
        Ok(instance)
    }

    /// Runtime value of an attribute argument stored in a location of type `expected`
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] for array values without an element type and
    /// [`crate::Error::TypeNotFound`] for unknown type or enum names.
    pub fn argument_value(&self, argument: &CustomAttributeArgument, expected: &RtTypeRc) -> Result<EmValue> {
        Ok(match argument {
            CustomAttributeArgument::Null => EmValue::Null,
            CustomAttributeArgument::Bool(value) => EmValue::Bool(*value),
            CustomAttributeArgument::Char(value) => EmValue::Char(*value),
            CustomAttributeArgument::I1(value) => EmValue::I32(i32::from(*value)),
            CustomAttributeArgument::U1(value) => EmValue::I32(i32::from(*value)),
            CustomAttributeArgument::I2(value) => EmValue::I32(i32::from(*value)),
            CustomAttributeArgument::U2(value) => EmValue::I32(i32::from(*value)),
            CustomAttributeArgument::I4(value) => EmValue::I32(*value),
            #[allow(clippy::cast_possible_wrap)]
            CustomAttributeArgument::U4(value) => EmValue::I32(*value as i32),
            CustomAttributeArgument::I8(value) => EmValue::I64(*value),
            #[allow(clippy::cast_possible_wrap)]
            CustomAttributeArgument::U8(value) => EmValue::I64(*value as i64),
            CustomAttributeArgument::R4(value) => EmValue::F64(f64::from(*value)),
            CustomAttributeArgument::R8(value) => EmValue::F64(*value),
            CustomAttributeArgument::String(text) => EmValue::from(text.as_str()),
            CustomAttributeArgument::Type(name) => EmValue::Type(self.registry.lookup(name)?),
            CustomAttributeArgument::Enum(name, inner) => EmValue::Enum {
                ty: self.registry.lookup(name)?,
                value: inner
                    .as_i64()
                    .ok_or_else(|| attribute_error!("Enum '{}' with non-integral value", name))?,
            },
            CustomAttributeArgument::Boxed(arg_type, inner) => {
                let tagged = self.argument_type(arg_type)?;
                self.argument_value(inner, &tagged)?
            }
            CustomAttributeArgument::Array(items) => {
                let element = expected.element_type().ok_or_else(|| {
                    attribute_error!(
                        "Array value stored in non-array location of type {}",
                        expected.full_name()
                    )
                })?;
                let values = items
                    .iter()
                    .map(|item| self.argument_value(item, &element))
                    .collect::<Result<Vec<_>>>()?;
                EmValue::Array(HeapArray::new(&element, values))
            }
        })
    }

    /// The registry type an [`ArgumentType`] denotes
    fn argument_type(&self, arg_type: &ArgumentType) -> Result<RtTypeRc> {
        let core = self.registry.core();
        Ok(match arg_type {
            ArgumentType::Primitive(kind) => core.primitive(*kind).clone(),
            ArgumentType::String => core.string.clone(),
            ArgumentType::Type => core.type_type.clone(),
            ArgumentType::Boxed => core.object.clone(),
            ArgumentType::Enum(name, _) => self.registry.lookup(name)?,
            ArgumentType::SzArray(element) => {
                let element = self.argument_type(element)?;
                self.registry.make_array_type(&element)
            }
        })
    }

    /// Encodes `descriptor` onto `target`
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if the attribute type is neither an attribute
    /// nor an interface, if its usage excludes the target kind, if it is applied twice without
    /// `AllowMultiple`, or if the values do not match the constructor and named members.
    pub fn generate(&self, target: AttributeTarget<'_>, descriptor: &CustomAttributeDescriptor) -> Result<CustomAttributeRc> {
        let attribute_type = descriptor.attribute_type()?;
        let core = self.registry.core();
        if !attribute_type.is_interface() && !attribute_type.is_subclass_of(&core.attribute) {
            return Err(attribute_error!(
                "{} is not an attribute type",
                attribute_type.full_name()
            ));
        }

        let usage = self.registry.attribute_usage(&attribute_type)?;
        let kind = target.kind();
        if !usage.valid_on.intersects(kind) {
            return Err(attribute_error!(
                "{} cannot be applied to {} ({:?})",
                attribute_type.full_name(),
                target.name(),
                kind
            ));
        }
        if !usage.allow_multiple && Self::is_applied(target.custom_attributes(), &attribute_type) {
            return Err(attribute_error!(
                "{} is already applied to {} and does not allow multiple applications",
                attribute_type.full_name(),
                target.name()
            ));
        }

        for (field, _) in &descriptor.fields {
            let declaring = field.declaring_type();
            if field.is_static()
                || !declaring.is_some_and(|owner| attribute_type.is_subclass_of(&owner))
            {
                return Err(attribute_error!(
                    "'{}' is not an instance field of {}",
                    field.full_name(),
                    attribute_type.full_name()
                ));
            }
        }
        for (property, _) in &descriptor.properties {
            if property.setter().is_none() {
                return Err(attribute_error!(
                    "Property '{}' of {} has no setter",
                    property.name,
                    attribute_type.full_name()
                ));
            }
        }

        let value = descriptor.to_value()?;
        tracing::trace!(
            attribute = %attribute_type.full_name(),
            target = %target.name(),
            "applying custom attribute"
        );
        self.registry
            .apply_custom_attribute(target.custom_attributes(), &descriptor.constructor, &value)
    }

    /// Copies every attribute of `source` that may be applied to `target`.
    ///
    /// Attributes whose usage excludes the target kind are skipped; any other mismatch fails.
    ///
    /// # Errors
    /// See [`AttributeReplicator::parse`] and [`AttributeReplicator::generate`].
    pub fn replicate(&self, source: &CustomAttributeList, target: AttributeTarget<'_>) -> Result<Vec<CustomAttributeRc>> {
        let mut replicated = Vec::new();
        for (_, attribute) in source.iter() {
            let attribute_type = attribute.constructor.owner()?;
            let usage = self.registry.attribute_usage(&attribute_type)?;
            if !usage.valid_on.intersects(target.kind()) {
                tracing::trace!(
                    attribute = %attribute_type.full_name(),
                    target = %target.name(),
                    "attribute not replicable onto target kind"
                );
                continue;
            }
            let descriptor = self.parse(attribute)?;
            replicated.push(self.generate(target, &descriptor)?);
        }
        Ok(replicated)
    }

    fn is_applied(list: &CustomAttributeList, attribute_type: &RtTypeRc) -> bool {
        list.iter().any(|(_, applied)| {
            applied
                .attribute_type()
                .is_some_and(|ty| ty.token == attribute_type.token)
        })
    }
}

impl std::fmt::Debug for AttributeReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeReplicator").finish_non_exhaustive()
    }
}
