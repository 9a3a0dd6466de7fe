//! Emitter of one generated type.
//!
//! A [`TypeEmitter`] owns the metadata shell of the type from the moment it is created and
//! every member emitter added to it. Members are addressed through copyable handles
//! ([`MethodHandle`], [`PropertyHandle`], [`EventHandle`]) so that bodies of one member can be
//! built while other members of the same type are referenced.
//!
//! [`TypeEmitter::build_type`] attaches every method body, links property and event accessors
//! and builds nested types. Afterwards the emitter is closed: adding members fails, and building
//! again returns the same type without touching any member.
//!
//! # Naming of overrides and implementations
//!
//! | Operation                                           | Name                | Access    | Slot        |
//! |-----------------------------------------------------|---------------------|-----------|-------------|
//! | [`TypeEmitter::create_method_override`]             | `Name`              | as base   | reused      |
//! | [`TypeEmitter::create_full_named_method_override`]  | `Declaring.Name`    | as base   | new, linked |
//! | [`TypeEmitter::create_interface_method_implementation`] | `Interface.Name` | private   | new, linked |
//! | [`TypeEmitter::create_public_interface_method_implementation`] | `Name`   | public    | new, linked |

use std::{collections::HashMap, sync::Arc};

use crate::{
    emit::{
        attributes::{AttributeReplicator, AttributeTarget, CustomAttributeDescriptor},
        members::{AccessorShape, EventEmitter, EventHandle, PropertyEmitter, PropertyHandle},
        method::{MethodEmitter, MethodHandle},
    },
    metadata::{
        customattributes::CustomAttributeRc,
        members::{EventRc, FieldRc, PropertyRc},
        method::{
            MethodAccessFlags, MethodAttributes, MethodKey, MethodModifiers, MethodRc, Parameter,
            CONSTRUCTOR_NAME, TYPE_INITIALIZER_NAME,
        },
        module::ModuleRc,
        typesystem::{
            FieldAttributes, MethodSignature, RtTypeRc, TypeAttributes, TypeFlavor, TypeRegistry,
        },
    },
    Result,
};

/// One type under construction
pub struct TypeEmitter {
    registry: Arc<TypeRegistry>,
    module: ModuleRc,
    ty: RtTypeRc,
    base: RtTypeRc,
    methods: Vec<MethodEmitter>,
    properties: Vec<PropertyEmitter>,
    events: Vec<EventEmitter>,
    nested: Vec<TypeEmitter>,
    pub(crate) wrappers: HashMap<MethodKey, MethodHandle>,
    built: bool,
}

impl TypeEmitter {
    pub(crate) fn new(
        registry: Arc<TypeRegistry>,
        module: ModuleRc,
        namespace: &str,
        name: &str,
        base: &RtTypeRc,
        interfaces: &[RtTypeRc],
        flags: TypeAttributes,
    ) -> Result<Self> {
        check_base(base)?;
        for interface in interfaces {
            check_interface(interface)?;
        }

        let ty = registry.create_type(&module, namespace, name, TypeFlavor::Class, flags, None)?;
        let base = if base.is_generic_type_definition() {
            let params: Vec<RtTypeRc> = base
                .generic_params
                .iter()
                .map(|(_, param)| registry.add_generic_parameter(&ty, &param.name))
                .collect();
            registry.make_generic_type(base, &params)?
        } else {
            base.clone()
        };
        ty.set_base(base.clone())?;
        for interface in interfaces {
            ty.interfaces.push(interface.clone());
        }

        tracing::debug!(
            ty = %ty.full_name(),
            base = %base.full_name(),
            module = %module.name(),
            "type emitter created"
        );
        Ok(TypeEmitter {
            registry,
            module,
            ty,
            base,
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            nested: Vec::new(),
            wrappers: HashMap::new(),
            built: false,
        })
    }

    /// The session registry
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// The destination module
    #[must_use]
    pub fn module(&self) -> &ModuleRc {
        &self.module
    }

    /// The type being built; complete only after [`TypeEmitter::build_type`]
    #[must_use]
    pub fn ty(&self) -> &RtTypeRc {
        &self.ty
    }

    /// The base type; for a generic-definition base, its instance over this type's parameters
    #[must_use]
    pub fn base_type(&self) -> &RtTypeRc {
        &self.base
    }

    /// Full name of the type
    #[must_use]
    pub fn name(&self) -> String {
        self.ty.full_name()
    }

    /// Has [`TypeEmitter::build_type`] run
    #[must_use]
    pub fn is_built(&self) -> bool {
        self.built
    }

    fn ensure_open(&self) -> Result<()> {
        if self.built {
            return Err(protocol_error!(
                "Type {} has already been built, no member can be added",
                self.ty.full_name()
            ));
        }
        Ok(())
    }

    /// The emitter of a method of this type
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] for a handle of another type.
    pub fn method(&self, handle: MethodHandle) -> Result<&MethodEmitter> {
        self.methods
            .get(handle.index)
            .filter(|_| handle.owner == self.ty.token)
            .ok_or_else(|| protocol_error!("{:?} does not belong to {}", handle, self.ty.full_name()))
    }

    /// The emitter of a method of this type, mutably
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] for a handle of another type.
    pub fn method_mut(&mut self, handle: MethodHandle) -> Result<&mut MethodEmitter> {
        let name = self.ty.full_name();
        let owner = self.ty.token;
        self.methods
            .get_mut(handle.index)
            .filter(|_| handle.owner == owner)
            .ok_or_else(|| protocol_error!("{:?} does not belong to {}", handle, name))
    }

    /// The emitter of a property of this type
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] for a handle of another type.
    pub fn property(&self, handle: PropertyHandle) -> Result<&PropertyEmitter> {
        self.properties
            .get(handle.0)
            .ok_or_else(|| protocol_error!("{:?} does not belong to {}", handle, self.ty.full_name()))
    }

    /// The emitter of a property of this type, mutably
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] for a handle of another type or once the
    /// type is built.
    pub fn property_mut(&mut self, handle: PropertyHandle) -> Result<&mut PropertyEmitter> {
        self.ensure_open()?;
        let name = self.ty.full_name();
        self.properties
            .get_mut(handle.0)
            .ok_or_else(|| protocol_error!("{:?} does not belong to {}", handle, name))
    }

    /// The emitter of an event of this type
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] for a handle of another type.
    pub fn event(&self, handle: EventHandle) -> Result<&EventEmitter> {
        self.events
            .get(handle.0)
            .ok_or_else(|| protocol_error!("{:?} does not belong to {}", handle, self.ty.full_name()))
    }

    /// The emitter of an event of this type, mutably
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] for a handle of another type or once the
    /// type is built.
    pub fn event_mut(&mut self, handle: EventHandle) -> Result<&mut EventEmitter> {
        self.ensure_open()?;
        let name = self.ty.full_name();
        self.events
            .get_mut(handle.0)
            .ok_or_else(|| protocol_error!("{:?} does not belong to {}", handle, name))
    }

    /// The handle the next declared method will get
    pub(crate) fn next_method_handle(&self) -> MethodHandle {
        MethodHandle {
            owner: self.ty.token,
            index: self.methods.len(),
        }
    }

    /// Handles of all methods added so far, in creation order
    pub fn method_handles(&self) -> impl Iterator<Item = MethodHandle> {
        let owner = self.ty.token;
        (0..self.methods.len()).map(move |index| MethodHandle { owner, index })
    }

    /// Nested type emitters
    #[must_use]
    pub fn nested_types(&self) -> &[TypeEmitter] {
        &self.nested
    }

    /// Adds an instance field
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] once the type is built.
    pub fn create_field(&mut self, name: &str, field_type: &RtTypeRc, flags: FieldAttributes) -> Result<FieldRc> {
        self.ensure_open()?;
        tracing::trace!(ty = %self.ty.full_name(), field = name, "creating field");
        Ok(self.registry.create_field(&self.ty, name, field_type, flags))
    }

    /// Adds a static field
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] once the type is built.
    pub fn create_static_field(&mut self, name: &str, field_type: &RtTypeRc, flags: FieldAttributes) -> Result<FieldRc> {
        self.create_field(name, field_type, flags | FieldAttributes::STATIC)
    }

    fn declare_method(&mut self, name: &str, attributes: MethodAttributes, signature: MethodSignature) -> Result<MethodHandle> {
        self.ensure_open()?;
        if attributes.modifiers.contains(MethodModifiers::ABSTRACT) && !self.ty.is_abstract() {
            return Err(shape_error!(
                "Abstract method {} cannot be declared on the non-abstract type {}",
                name,
                self.ty.full_name()
            ));
        }
        let method = self.registry.create_method(&self.ty, name, attributes, signature);
        tracing::trace!(method = %method.full_name(), signature = %method.signature(), "creating method");
        let handle = self.next_method_handle();
        self.methods
            .push(MethodEmitter::new(self.registry.clone(), method));
        Ok(handle)
    }

    /// Adds a method
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] once the type is built, and
    /// [`crate::Error::ShapeViolation`] for an abstract method on a non-abstract type.
    pub fn create_method(
        &mut self,
        name: &str,
        attributes: MethodAttributes,
        return_type: &RtTypeRc,
        params: &[(&str, &RtTypeRc)],
    ) -> Result<MethodHandle> {
        self.declare_method(name, attributes, MethodSignature::new(return_type, parameters(params)))
    }

    /// Adds a static method
    ///
    /// # Errors
    /// See [`TypeEmitter::create_method`].
    pub fn create_static_method(
        &mut self,
        name: &str,
        attributes: MethodAttributes,
        return_type: &RtTypeRc,
        params: &[(&str, &RtTypeRc)],
    ) -> Result<MethodHandle> {
        self.create_method(name, attributes.static_(), return_type, params)
    }

    /// Adds an instance constructor
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] once the type is built.
    pub fn create_constructor(&mut self, attributes: MethodAttributes, params: &[(&str, &RtTypeRc)]) -> Result<MethodHandle> {
        let void = self.registry.core().void.clone();
        self.declare_method(
            CONSTRUCTOR_NAME,
            attributes.with(MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME),
            MethodSignature::new(&void, parameters(params)),
        )
    }

    /// Adds the type initializer
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if the type already has one or is built.
    pub fn create_type_initializer(&mut self) -> Result<MethodHandle> {
        if self.ty.type_initializer().is_some() {
            return Err(protocol_error!(
                "{} already has a type initializer",
                self.ty.full_name()
            ));
        }
        let void = self.registry.core().void.clone();
        self.declare_method(
            TYPE_INITIALIZER_NAME,
            MethodAttributes::private()
                .static_()
                .with(MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME),
            MethodSignature::new(&void, Vec::new()),
        )
    }

    /// Checks that `method` is a virtual, non-final method of the base hierarchy
    fn check_overridable(&self, method: &MethodRc) -> Result<RtTypeRc> {
        let declaring = method.owner()?;
        if declaring.is_interface() {
            return Err(shape_error!(
                "{} is an interface method, implement it instead of overriding it",
                method.full_name()
            ));
        }
        if !self.base.is_subclass_of(&declaring) {
            return Err(shape_error!(
                "{} is not declared in the base hierarchy of {}",
                method.full_name(),
                self.ty.full_name()
            ));
        }
        if method.is_static() || !method.is_virtual() || method.is_final() {
            return Err(shape_error!(
                "{} is not an overridable virtual method",
                method.full_name()
            ));
        }
        if method.access() == MethodAccessFlags::PRIVATE {
            return Err(shape_error!(
                "{} is private and cannot be overridden",
                method.full_name()
            ));
        }
        Ok(declaring)
    }

    /// Adds an override of `base_method` with its name and access, reusing its slot
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if `base_method` is not an overridable method
    /// of the base hierarchy.
    pub fn create_method_override(&mut self, base_method: &MethodRc) -> Result<MethodHandle> {
        self.check_overridable(base_method)?;
        let attributes = MethodAttributes::new(base_method.access()).virtual_();
        self.declare_method(&base_method.name, attributes, MethodSignature::of(base_method))
    }

    /// Adds an override of `base_method` named after its declaring type.
    ///
    /// The member gets a new slot and an explicit override link, so it overrides
    /// `base_method` without being reachable through the simple name.
    ///
    /// # Errors
    /// See [`TypeEmitter::create_method_override`].
    pub fn create_full_named_method_override(&mut self, base_method: &MethodRc) -> Result<MethodHandle> {
        let declaring = self.check_overridable(base_method)?;
        let name = format!("{}.{}", declaring.full_name(), base_method.name);
        let attributes = MethodAttributes::new(base_method.access())
            .virtual_()
            .new_slot();
        let handle = self.declare_method(&name, attributes, MethodSignature::of(base_method))?;
        self.methods[handle.index]
            .method()
            .overrides
            .push(base_method.clone());
        Ok(handle)
    }

    /// Adds `interface` to the implemented interfaces unless already implemented
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if `interface` is not an interface.
    pub fn add_interface(&mut self, interface: &RtTypeRc) -> Result<()> {
        self.ensure_open()?;
        check_interface(interface)?;
        if !self.ty.implements_interface(interface) {
            self.ty.interfaces.push(interface.clone());
        }
        Ok(())
    }

    fn interface_of(&mut self, interface_method: &MethodRc) -> Result<RtTypeRc> {
        let interface = interface_method.owner()?;
        if !interface.is_interface() {
            return Err(shape_error!(
                "{} is not declared by an interface",
                interface_method.full_name()
            ));
        }
        self.add_interface(&interface)?;
        Ok(interface)
    }

    fn declare_implementation(&mut self, name: &str, attributes: MethodAttributes, interface_method: &MethodRc) -> Result<MethodHandle> {
        let attributes = attributes
            .virtual_()
            .with(MethodModifiers::FINAL)
            .new_slot();
        let handle = self.declare_method(name, attributes, MethodSignature::of(interface_method))?;
        self.methods[handle.index]
            .method()
            .overrides
            .push(interface_method.clone());
        Ok(handle)
    }

    /// Adds an explicit implementation of `interface_method`: interface-qualified name,
    /// private, final, new slot
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the method is not declared by an interface.
    pub fn create_interface_method_implementation(&mut self, interface_method: &MethodRc) -> Result<MethodHandle> {
        let interface = self.interface_of(interface_method)?;
        let name = format!("{}.{}", interface.full_name(), interface_method.name);
        self.declare_implementation(&name, MethodAttributes::private(), interface_method)
    }

    /// Adds a public implementation of `interface_method` under its simple name
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the method is not declared by an interface.
    pub fn create_public_interface_method_implementation(&mut self, interface_method: &MethodRc) -> Result<MethodHandle> {
        self.interface_of(interface_method)?;
        let name = interface_method.name.clone();
        self.declare_implementation(&name, MethodAttributes::public(), interface_method)
    }

    fn declare_property(
        &mut self,
        name: &str,
        property_type: &RtTypeRc,
        index_types: Vec<RtTypeRc>,
        shape: AccessorShape,
        overridden: Option<PropertyRc>,
    ) -> Result<PropertyHandle> {
        self.ensure_open()?;
        let property = self
            .registry
            .create_property(&self.ty, name, property_type, index_types);
        tracing::trace!(ty = %self.ty.full_name(), property = name, "creating property");
        self.properties.push(PropertyEmitter::new(
            self.registry.clone(),
            property,
            shape,
            overridden,
        ));
        Ok(PropertyHandle(self.properties.len() - 1))
    }

    /// Adds a property; its accessors are created with `accessor_attributes`
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] once the type is built.
    pub fn create_property(
        &mut self,
        name: &str,
        property_type: &RtTypeRc,
        index_types: &[RtTypeRc],
        accessor_attributes: MethodAttributes,
    ) -> Result<PropertyHandle> {
        let shape = AccessorShape {
            prefix: String::new(),
            member: name.to_string(),
            attributes: accessor_attributes.with(MethodModifiers::SPECIAL_NAME),
        };
        self.declare_property(name, property_type, index_types.to_vec(), shape, None)
    }

    /// Adds an override of `base_property`; its accessors override the base accessors
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the property is not declared in the base
    /// hierarchy or has no overridable accessor.
    pub fn create_property_override(&mut self, base_property: &PropertyRc) -> Result<PropertyHandle> {
        let accessor = base_property
            .getter()
            .or_else(|| base_property.setter())
            .ok_or_else(|| shape_error!("Property '{}' has no accessors", base_property.name))?;
        self.check_overridable(&accessor)?;
        let shape = AccessorShape {
            prefix: String::new(),
            member: base_property.name.clone(),
            attributes: MethodAttributes::new(accessor.access())
                .virtual_()
                .with(MethodModifiers::SPECIAL_NAME),
        };
        self.declare_property(
            &base_property.name,
            &base_property.property_type,
            base_property.index_types.clone(),
            shape,
            Some(base_property.clone()),
        )
    }

    fn interface_property(&mut self, property: &PropertyRc) -> Result<RtTypeRc> {
        let interface = property
            .declaring_type()
            .ok_or_else(|| crate::Error::TypeNotFound(format!("declaring type of {}", property.name)))?;
        if !interface.is_interface() {
            return Err(shape_error!(
                "Property '{}' is not declared by an interface",
                property.name
            ));
        }
        self.add_interface(&interface)?;
        Ok(interface)
    }

    /// Adds an explicit implementation of an interface property, named
    /// `Interface.Name` with private accessors
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the property is not declared by an interface.
    pub fn create_interface_property_implementation(&mut self, interface_property: &PropertyRc) -> Result<PropertyHandle> {
        let interface = self.interface_property(interface_property)?;
        let prefix = format!("{}.", interface.full_name());
        let shape = AccessorShape {
            prefix: prefix.clone(),
            member: interface_property.name.clone(),
            attributes: implementation_attributes(MethodAttributes::private()),
        };
        self.declare_property(
            &format!("{}{}", prefix, interface_property.name),
            &interface_property.property_type,
            interface_property.index_types.clone(),
            shape,
            Some(interface_property.clone()),
        )
    }

    /// Adds a public implementation of an interface property under its simple name
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the property is not declared by an interface.
    pub fn create_public_interface_property_implementation(&mut self, interface_property: &PropertyRc) -> Result<PropertyHandle> {
        self.interface_property(interface_property)?;
        let shape = AccessorShape {
            prefix: String::new(),
            member: interface_property.name.clone(),
            attributes: implementation_attributes(MethodAttributes::public()),
        };
        self.declare_property(
            &interface_property.name,
            &interface_property.property_type,
            interface_property.index_types.clone(),
            shape,
            Some(interface_property.clone()),
        )
    }

    /// Creates the `get` accessor of a property and assigns it
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if the property already has a getter.
    pub fn create_property_get_method(&mut self, handle: PropertyHandle) -> Result<MethodHandle> {
        let (shape, property, overridden) = {
            let emitter = self.property(handle)?;
            if emitter.getter().is_some() {
                return Err(protocol_error!(
                    "Property '{}' already has a get accessor",
                    emitter.name()
                ));
            }
            (
                emitter.shape.clone(),
                emitter.property().clone(),
                emitter.overridden.as_ref().and_then(|p| p.getter()),
            )
        };
        let params = index_parameters(&property.index_types);
        let method = self.declare_method(
            &shape.name("get"),
            shape.attributes,
            MethodSignature::new(&property.property_type, params),
        )?;
        self.link_accessor(method, overridden);
        self.property_mut(handle)?.assign_getter(Some(method))?;
        Ok(method)
    }

    /// Creates the `set` accessor of a property and assigns it
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if the property already has a setter.
    pub fn create_property_set_method(&mut self, handle: PropertyHandle) -> Result<MethodHandle> {
        let (shape, property, overridden) = {
            let emitter = self.property(handle)?;
            if emitter.setter().is_some() {
                return Err(protocol_error!(
                    "Property '{}' already has a set accessor",
                    emitter.name()
                ));
            }
            (
                emitter.shape.clone(),
                emitter.property().clone(),
                emitter.overridden.as_ref().and_then(|p| p.setter()),
            )
        };
        let mut params = index_parameters(&property.index_types);
        params.push(Parameter::new("value", &property.property_type));
        let void = self.registry.core().void.clone();
        let method = self.declare_method(
            &shape.name("set"),
            shape.attributes,
            MethodSignature::new(&void, params),
        )?;
        self.link_accessor(method, overridden);
        self.property_mut(handle)?.assign_setter(Some(method))?;
        Ok(method)
    }

    fn declare_event(&mut self, name: &str, event_type: &RtTypeRc, shape: AccessorShape, overridden: Option<EventRc>) -> Result<EventHandle> {
        self.ensure_open()?;
        let event = self.registry.create_event(&self.ty, name, event_type);
        tracing::trace!(ty = %self.ty.full_name(), event = name, "creating event");
        self.events
            .push(EventEmitter::new(self.registry.clone(), event, shape, overridden));
        Ok(EventHandle(self.events.len() - 1))
    }

    /// Adds an event; its accessors are created with `accessor_attributes`
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] once the type is built.
    pub fn create_event(&mut self, name: &str, event_type: &RtTypeRc, accessor_attributes: MethodAttributes) -> Result<EventHandle> {
        let shape = AccessorShape {
            prefix: String::new(),
            member: name.to_string(),
            attributes: accessor_attributes.with(MethodModifiers::SPECIAL_NAME),
        };
        self.declare_event(name, event_type, shape, None)
    }

    /// Adds an override of `base_event`; its accessors override the base accessors
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the event is not declared in the base
    /// hierarchy or has no overridable accessor.
    pub fn create_event_override(&mut self, base_event: &EventRc) -> Result<EventHandle> {
        let accessor = base_event
            .adder()
            .or_else(|| base_event.remover())
            .ok_or_else(|| shape_error!("Event '{}' has no accessors", base_event.name))?;
        self.check_overridable(&accessor)?;
        let shape = AccessorShape {
            prefix: String::new(),
            member: base_event.name.clone(),
            attributes: MethodAttributes::new(accessor.access())
                .virtual_()
                .with(MethodModifiers::SPECIAL_NAME),
        };
        self.declare_event(&base_event.name, &base_event.event_type, shape, Some(base_event.clone()))
    }

    fn interface_event(&mut self, event: &EventRc) -> Result<RtTypeRc> {
        let interface = event
            .declaring_type()
            .ok_or_else(|| crate::Error::TypeNotFound(format!("declaring type of {}", event.name)))?;
        if !interface.is_interface() {
            return Err(shape_error!("Event '{}' is not declared by an interface", event.name));
        }
        self.add_interface(&interface)?;
        Ok(interface)
    }

    /// Adds an explicit implementation of an interface event, named `Interface.Name` with
    /// private accessors
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the event is not declared by an interface.
    pub fn create_interface_event_implementation(&mut self, interface_event: &EventRc) -> Result<EventHandle> {
        let interface = self.interface_event(interface_event)?;
        let prefix = format!("{}.", interface.full_name());
        let shape = AccessorShape {
            prefix: prefix.clone(),
            member: interface_event.name.clone(),
            attributes: implementation_attributes(MethodAttributes::private()),
        };
        self.declare_event(
            &format!("{}{}", prefix, interface_event.name),
            &interface_event.event_type,
            shape,
            Some(interface_event.clone()),
        )
    }

    /// Adds a public implementation of an interface event under its simple name
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the event is not declared by an interface.
    pub fn create_public_interface_event_implementation(&mut self, interface_event: &EventRc) -> Result<EventHandle> {
        self.interface_event(interface_event)?;
        let shape = AccessorShape {
            prefix: String::new(),
            member: interface_event.name.clone(),
            attributes: implementation_attributes(MethodAttributes::public()),
        };
        self.declare_event(
            &interface_event.name,
            &interface_event.event_type,
            shape,
            Some(interface_event.clone()),
        )
    }

    fn create_event_accessor(&mut self, handle: EventHandle, kind: &str) -> Result<MethodHandle> {
        let (shape, event, overridden) = {
            let emitter = self.event(handle)?;
            let existing = if kind == "add" { emitter.adder() } else { emitter.remover() };
            if existing.is_some() {
                return Err(protocol_error!(
                    "Event '{}' already has a {} accessor",
                    emitter.name(),
                    kind
                ));
            }
            let overridden = emitter.overridden.as_ref().and_then(|e| {
                if kind == "add" { e.adder() } else { e.remover() }
            });
            (emitter.shape.clone(), emitter.event().clone(), overridden)
        };
        let void = self.registry.core().void.clone();
        let method = self.declare_method(
            &shape.name(kind),
            shape.attributes,
            MethodSignature::new(&void, vec![Parameter::new("value", &event.event_type)]),
        )?;
        self.link_accessor(method, overridden);
        let emitter = self.event_mut(handle)?;
        if kind == "add" {
            emitter.assign_adder(Some(method))?;
        } else {
            emitter.assign_remover(Some(method))?;
        }
        Ok(method)
    }

    /// Creates the `add` accessor of an event and assigns it
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if the event already has one.
    pub fn create_event_add_method(&mut self, handle: EventHandle) -> Result<MethodHandle> {
        self.create_event_accessor(handle, "add")
    }

    /// Creates the `remove` accessor of an event and assigns it
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if the event already has one.
    pub fn create_event_remove_method(&mut self, handle: EventHandle) -> Result<MethodHandle> {
        self.create_event_accessor(handle, "remove")
    }

    fn link_accessor(&self, accessor: MethodHandle, overridden: Option<MethodRc>) {
        if let (Some(overridden), Some(emitter)) = (overridden, self.methods.get(accessor.index)) {
            emitter.method().overrides.push(overridden);
        }
    }

    /// Creates a class nested in this one
    ///
    /// Public visibility becomes nested-public, any other non-nested visibility becomes
    /// nested-assembly.
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if this type is generic or `base` is not a
    /// valid base type, and [`crate::Error::ProtocolViolation`] once this type is built.
    pub fn create_nested_class(
        &mut self,
        name: &str,
        base: &RtTypeRc,
        interfaces: &[RtTypeRc],
        flags: TypeAttributes,
    ) -> Result<&mut TypeEmitter> {
        self.ensure_open()?;
        if self.ty.is_generic() {
            return Err(shape_error!(
                "Cannot nest {} inside the generic type {}",
                name,
                self.ty.full_name()
            ));
        }

        let visibility = if flags.is_nested_visibility() {
            flags.visibility()
        } else if flags.visibility() == TypeAttributes::PUBLIC {
            TypeAttributes::NESTED_PUBLIC
        } else {
            TypeAttributes::NESTED_ASSEMBLY
        };
        let nested = TypeEmitter::new(
            self.registry.clone(),
            self.module.clone(),
            "",
            name,
            base,
            interfaces,
            flags.with_visibility(visibility),
        )?;
        let previous_name = nested.ty.full_name();
        nested.ty.set_declaring_type(&self.ty)?;
        self.ty.nested_types.push(nested.ty.clone());
        self.registry.reindex_type(&nested.ty, &previous_name);

        self.nested.push(nested);
        let index = self.nested.len() - 1;
        Ok(&mut self.nested[index])
    }

    /// Applies a custom attribute to the type
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if the attribute does not fit.
    pub fn add_custom_attribute(&mut self, descriptor: &CustomAttributeDescriptor) -> Result<CustomAttributeRc> {
        self.ensure_open()?;
        AttributeReplicator::new(self.registry.clone())
            .generate(AttributeTarget::Type(&self.ty), descriptor)
    }

    /// Applies a custom attribute to a field of this type
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if the attribute does not fit.
    pub fn add_field_custom_attribute(&mut self, field: &FieldRc, descriptor: &CustomAttributeDescriptor) -> Result<CustomAttributeRc> {
        self.ensure_open()?;
        AttributeReplicator::new(self.registry.clone())
            .generate(AttributeTarget::Field(field), descriptor)
    }

    /// Finalizes every member and returns the finished type.
    ///
    /// Building an already built type returns it again without touching its members.
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if a non-void method can complete without
    /// returning, an accessor was assigned a method of another type, or a concrete type leaves
    /// an abstract base method unimplemented.
    #[tracing::instrument(level = "debug", skip_all, fields(ty = %self.ty.full_name()))]
    pub fn build_type(&mut self) -> Result<RtTypeRc> {
        if self.built {
            tracing::debug!("type already built");
            return Ok(self.ty.clone());
        }

        if !self.ty.is_abstract() {
            self.check_abstract_members()?;
        }
        let accessors = self
            .properties
            .iter()
            .flat_map(|property| [property.getter(), property.setter()])
            .chain(self.events.iter().flat_map(|event| [event.adder(), event.remover()]))
            .flatten();
        for accessor in accessors {
            self.method(accessor)?;
        }
        for method in &mut self.methods {
            method.finalize()?;
        }
        for property in &self.properties {
            if let Some(getter) = property.getter() {
                property.property().set_getter(self.method(getter)?.method().clone())?;
            }
            if let Some(setter) = property.setter() {
                property.property().set_setter(self.method(setter)?.method().clone())?;
            }
        }
        for event in &self.events {
            if let Some(adder) = event.adder() {
                event.event().set_adder(self.method(adder)?.method().clone())?;
            }
            if let Some(remover) = event.remover() {
                event.event().set_remover(self.method(remover)?.method().clone())?;
            }
        }
        for nested in &mut self.nested {
            nested.build_type()?;
        }

        self.built = true;
        tracing::debug!(
            methods = self.methods.len(),
            properties = self.properties.len(),
            events = self.events.len(),
            nested = self.nested.len(),
            "type built"
        );
        Ok(self.ty.clone())
    }

    /// Abstract methods of the base hierarchy must be overridden by a concrete type
    fn check_abstract_members(&self) -> Result<()> {
        for ancestor in self.base.hierarchy() {
            for (_, method) in ancestor.methods.iter() {
                if !method.is_abstract() {
                    continue;
                }
                let implemented = self.ty.hierarchy().iter().any(|ty| {
                    ty.methods.iter().any(|(_, candidate)| {
                        !candidate.is_abstract()
                            && (candidate.explicitly_overrides(method)
                                || (candidate.name == method.name
                                    && candidate.is_virtual()
                                    && !candidate.is_new_slot()
                                    && candidate.signature_matches(method)))
                    })
                });
                if !implemented {
                    return Err(protocol_error!(
                        "{} does not implement the abstract method {}",
                        self.ty.full_name(),
                        method.full_name()
                    ));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TypeEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeEmitter")
            .field("ty", &self.ty.full_name())
            .field("base", &self.base.full_name())
            .field("module", &self.module.name())
            .field("methods", &self.methods.len())
            .field("properties", &self.properties.len())
            .field("events", &self.events.len())
            .field("nested", &self.nested.len())
            .field("built", &self.built)
            .finish()
    }
}

fn check_base(base: &RtTypeRc) -> Result<()> {
    if base.is_interface() {
        return Err(shape_error!(
            "{} is an interface and cannot be a base type",
            base.full_name()
        ));
    }
    if base.is_sealed() {
        return Err(shape_error!(
            "{} is sealed and cannot be a base type",
            base.full_name()
        ));
    }
    if base.is_open_constructed() || base.is_generic_parameter() {
        return Err(shape_error!(
            "{} is an open constructed type; only closed types and generic type definitions can be base types",
            base.full_name()
        ));
    }
    Ok(())
}

fn check_interface(interface: &RtTypeRc) -> Result<()> {
    if !interface.is_interface() {
        return Err(shape_error!("{} is not an interface", interface.full_name()));
    }
    Ok(())
}

fn parameters(params: &[(&str, &RtTypeRc)]) -> Vec<Parameter> {
    params
        .iter()
        .map(|(name, ty)| Parameter::new(name, ty))
        .collect()
}

fn index_parameters(index_types: &[RtTypeRc]) -> Vec<Parameter> {
    index_types
        .iter()
        .enumerate()
        .map(|(position, ty)| Parameter::new(&format!("index{position}"), ty))
        .collect()
}

fn implementation_attributes(attributes: MethodAttributes) -> MethodAttributes {
    attributes
        .virtual_()
        .with(MethodModifiers::FINAL | MethodModifiers::SPECIAL_NAME)
        .new_slot()
}
