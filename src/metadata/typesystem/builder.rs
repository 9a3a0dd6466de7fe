//! Builder for hand-authored host types.
//!
//! This module provides the [`TypeBuilder`] struct, which offers a fluent API for defining
//! types whose methods are implemented natively in Rust. The core library is bootstrapped
//! with it, and hosts use it to describe the base types that generated types derive from.
//!
//! # Example
//!
//! ```rust,no_run
//! use dotweave::emulation::EmValue;
//! use dotweave::metadata::method::MethodAttributes;
//! use dotweave::metadata::typesystem::{TypeBuilder, TypeRegistry};
//!
//! let registry = TypeRegistry::new()?;
//! let module = registry.create_module("Samples", None);
//! let core = registry.core();
//!
//! let builder = TypeBuilder::new(&registry, &module).class("Samples", "Greeter", &core.object)?;
//! builder.default_constructor(MethodAttributes::public())?;
//! builder.native_method("Greet", MethodAttributes::public().virtual_(), &core.string, &[],
//!     |_, _, _| Ok(EmValue::from("hello")))?;
//! let greeter = builder.build()?;
//! assert!(greeter.method_by_name("Greet").is_some());
//! # Ok::<(), dotweave::Error>(())
//! ```

use std::sync::Arc;

use crate::{
    emulation::{EmValue, Runtime},
    metadata::{
        customattributes::CustomAttributeValue,
        members::{FieldRc, PropertyRc},
        method::{
            MethodAttributes, MethodBody, MethodModifiers, MethodRc, Parameter, CONSTRUCTOR_NAME,
        },
        module::ModuleRc,
        typesystem::{
            FieldAttributes, MethodSignature, RtTypeRc, TypeAttributes, TypeFlavor, TypeRegistry,
        },
    },
    Result,
};

/// Provides a fluent API for defining host types
pub struct TypeBuilder<'a> {
    /// Type registry for storing the types
    registry: &'a TypeRegistry,
    /// Module the types are defined in
    module: ModuleRc,
    /// Flags applied to the next type started
    flags: TypeAttributes,
    /// Current type being built
    current_type: Option<RtTypeRc>,
}

impl<'a> TypeBuilder<'a> {
    /// Create a new builder defining types in `module`
    #[must_use]
    pub fn new(registry: &'a TypeRegistry, module: &ModuleRc) -> Self {
        TypeBuilder {
            registry,
            module: module.clone(),
            flags: TypeAttributes::PUBLIC,
            current_type: None,
        }
    }

    /// Set the flags of the type started next
    #[must_use]
    pub fn with_flags(mut self, flags: TypeAttributes) -> Self {
        self.flags = flags;
        self
    }

    /// Start a type of any flavor
    ///
    /// # Errors
    /// Returns an error if the type cannot be registered.
    pub fn kind(
        mut self,
        namespace: &str,
        name: &str,
        flavor: TypeFlavor,
        base: Option<&RtTypeRc>,
    ) -> Result<Self> {
        let mut flags = self.flags;
        if flavor == TypeFlavor::Interface {
            flags |= TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT;
        }
        self.current_type = Some(self.registry.create_type(
            &self.module,
            namespace,
            name,
            flavor,
            flags,
            base,
        )?);
        Ok(self)
    }

    /// Start building a class deriving from `base`
    ///
    /// # Errors
    /// Returns an error if the type cannot be registered.
    pub fn class(self, namespace: &str, name: &str, base: &RtTypeRc) -> Result<Self> {
        self.kind(namespace, name, TypeFlavor::Class, Some(base))
    }

    /// Start building an interface
    ///
    /// # Errors
    /// Returns an error if the type cannot be registered.
    pub fn interface(self, namespace: &str, name: &str) -> Result<Self> {
        self.kind(namespace, name, TypeFlavor::Interface, None)
    }

    /// Start building a value type deriving from `value_type` (`System.ValueType`)
    ///
    /// # Errors
    /// Returns an error if the type cannot be registered.
    pub fn value_type(self, namespace: &str, name: &str, value_type: &RtTypeRc) -> Result<Self> {
        let flags = self.flags | TypeAttributes::SEALED;
        self.with_flags(flags)
            .kind(namespace, name, TypeFlavor::ValueType, Some(value_type))
    }

    /// Start building an enum deriving from `enum_base` (`System.Enum`)
    ///
    /// # Errors
    /// Returns an error if the type cannot be registered.
    pub fn enumeration(
        self,
        namespace: &str,
        name: &str,
        enum_base: &RtTypeRc,
        underlying: &RtTypeRc,
    ) -> Result<Self> {
        let flags = self.flags | TypeAttributes::SEALED;
        let builder = self
            .with_flags(flags)
            .kind(namespace, name, TypeFlavor::Enum, Some(enum_base))?;
        builder.current()?.set_underlying_type(underlying.clone());
        builder.field(
            "value__",
            underlying,
            FieldAttributes::PUBLIC | FieldAttributes::SPECIAL_NAME,
        )?;
        Ok(builder)
    }

    /// Continue adding members to an existing type
    #[must_use]
    pub fn resume(mut self, ty: &RtTypeRc) -> Self {
        self.current_type = Some(ty.clone());
        self
    }

    /// The type currently being built
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if no type was started.
    pub fn current(&self) -> Result<&RtTypeRc> {
        self.current_type
            .as_ref()
            .ok_or_else(|| protocol_error!("TypeBuilder has no type started"))
    }

    /// Adds an implemented interface
    ///
    /// # Errors
    /// Returns an error if no type was started.
    pub fn implements(self, interface: &RtTypeRc) -> Result<Self> {
        self.current()?.interfaces.push(interface.clone());
        Ok(self)
    }

    /// Adds a generic parameter to the current type
    ///
    /// # Errors
    /// Returns an error if no type was started.
    pub fn generic_parameter(&self, name: &str) -> Result<RtTypeRc> {
        Ok(self.registry.add_generic_parameter(self.current()?, name))
    }

    /// Defines a field
    ///
    /// # Errors
    /// Returns an error if no type was started.
    pub fn field(&self, name: &str, ty: &RtTypeRc, flags: FieldAttributes) -> Result<FieldRc> {
        Ok(self.registry.create_field(self.current()?, name, ty, flags))
    }

    /// Defines a method implemented by `body`
    ///
    /// # Errors
    /// Returns an error if no type was started.
    pub fn native_method<F>(
        &self,
        name: &str,
        attributes: MethodAttributes,
        return_type: &RtTypeRc,
        params: &[(&str, &RtTypeRc)],
        body: F,
    ) -> Result<MethodRc>
    where
        F: Fn(&Runtime, &EmValue, &[EmValue]) -> Result<EmValue> + Send + Sync + 'static,
    {
        let method = self.declare(name, attributes, return_type, params)?;
        method.set_body(MethodBody::Native(Arc::new(body)))?;
        Ok(method)
    }

    /// Defines a method without a body (abstract or interface methods)
    ///
    /// # Errors
    /// Returns an error if no type was started.
    pub fn abstract_method(
        &self,
        name: &str,
        attributes: MethodAttributes,
        return_type: &RtTypeRc,
        params: &[(&str, &RtTypeRc)],
    ) -> Result<MethodRc> {
        self.declare(name, attributes.abstract_(), return_type, params)
    }

    fn declare(
        &self,
        name: &str,
        attributes: MethodAttributes,
        return_type: &RtTypeRc,
        params: &[(&str, &RtTypeRc)],
    ) -> Result<MethodRc> {
        let params = params
            .iter()
            .map(|(param_name, param_type)| Parameter::new(param_name, param_type))
            .collect();
        Ok(self.registry.create_method(
            self.current()?,
            name,
            attributes,
            MethodSignature::new(return_type, params),
        ))
    }

    /// Defines an instance constructor implemented by `body`
    ///
    /// # Errors
    /// Returns an error if no type was started or the core library is unavailable.
    pub fn native_constructor<F>(
        &self,
        attributes: MethodAttributes,
        void: &RtTypeRc,
        params: &[(&str, &RtTypeRc)],
        body: F,
    ) -> Result<MethodRc>
    where
        F: Fn(&Runtime, &EmValue, &[EmValue]) -> Result<EmValue> + Send + Sync + 'static,
    {
        self.native_method(
            CONSTRUCTOR_NAME,
            attributes.with(MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME),
            void,
            params,
            body,
        )
    }

    /// Defines a parameterless constructor that does nothing
    ///
    /// # Errors
    /// Returns an error if no type was started.
    pub fn default_constructor(&self, attributes: MethodAttributes) -> Result<MethodRc> {
        let void = self.registry.core().void.clone();
        self.native_constructor(attributes, &void, &[], |_, _, _| Ok(EmValue::Void))
    }

    /// Defines a constructor storing each argument into the matching field
    ///
    /// # Errors
    /// Returns an error if no type was started or the lists differ in length.
    pub fn storing_constructor(
        &self,
        attributes: MethodAttributes,
        void: &RtTypeRc,
        params: &[(&str, &RtTypeRc)],
        fields: Vec<FieldRc>,
    ) -> Result<MethodRc> {
        if params.len() != fields.len() {
            return Err(malformed_error!(
                "{} parameters but {} target fields",
                params.len(),
                fields.len()
            ));
        }
        self.native_constructor(attributes, void, params, move |runtime, this, args| {
            for (field, value) in fields.iter().zip(args) {
                runtime.store_field(this, field, value.clone())?;
            }
            Ok(EmValue::Void)
        })
    }

    /// Defines a property with a backing field and native accessors
    ///
    /// # Errors
    /// Returns an error if no type was started.
    pub fn auto_property(
        &self,
        name: &str,
        ty: &RtTypeRc,
        attributes: MethodAttributes,
        void: &RtTypeRc,
    ) -> Result<PropertyRc> {
        let backing = self.field(&format!("<{}>k__BackingField", name), ty, FieldAttributes::PRIVATE)?;
        let property = self.registry.create_property(self.current()?, name, ty, Vec::new());
        let accessor_attributes = attributes.with(MethodModifiers::SPECIAL_NAME);

        let read = backing.clone();
        let getter = self.native_method(
            &format!("get_{}", name),
            accessor_attributes,
            ty,
            &[],
            move |runtime, this, _| runtime.load_field(this, &read),
        )?;
        let write = backing;
        let setter = self.native_method(
            &format!("set_{}", name),
            accessor_attributes,
            void,
            &[("value", ty)],
            move |runtime, this, args| {
                let value = args.first().cloned().unwrap_or(EmValue::Null);
                runtime.store_field(this, &write, value)?;
                Ok(EmValue::Void)
            },
        )?;
        property.set_getter(getter)?;
        property.set_setter(setter)?;
        Ok(property)
    }

    /// Applies a custom attribute to the current type
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if `value` does not fit `constructor`.
    pub fn custom_attribute(&self, constructor: &MethodRc, value: &CustomAttributeValue) -> Result<()> {
        self.registry
            .apply_custom_attribute(&self.current()?.custom_attributes, constructor, value)?;
        Ok(())
    }

    /// Finishes the current type
    ///
    /// # Errors
    /// Returns an error if no type was started.
    pub fn build(self) -> Result<RtTypeRc> {
        self.current_type
            .ok_or_else(|| protocol_error!("TypeBuilder has no type started"))
    }
}
