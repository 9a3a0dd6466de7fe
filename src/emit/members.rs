//! Property and event emitters.
//!
//! Both hold the metadata member and at most one handle per accessor. Accessors are linked to
//! the metadata member when the owning type is built, so a property whose accessors were never
//! assigned ends up with neither.
//!
//! Emitters are reached mutably through [`crate::emit::TypeEmitter::property_mut`] and
//! [`crate::emit::TypeEmitter::event_mut`], which refuse once the owning type is built.

use std::sync::Arc;

use crate::{
    emit::{
        attributes::{AttributeReplicator, AttributeTarget, CustomAttributeDescriptor},
        method::MethodHandle,
    },
    metadata::{
        customattributes::CustomAttributeRc,
        members::{EventRc, PropertyRc},
        method::MethodAttributes,
        typesystem::TypeRegistry,
    },
    Result,
};

/// Index of a property emitter inside its [`crate::emit::TypeEmitter`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyHandle(pub(crate) usize);

/// Index of an event emitter inside its [`crate::emit::TypeEmitter`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventHandle(pub(crate) usize);

/// Naming and flags shared by the accessors of one property or event
#[derive(Clone, Debug)]
pub(crate) struct AccessorShape {
    /// Prepended to `get_`/`set_`/`add_`/`remove_`, e.g. an interface-qualified prefix
    pub(crate) prefix: String,
    /// Simple name of the property or event
    pub(crate) member: String,
    pub(crate) attributes: MethodAttributes,
}

impl AccessorShape {
    pub(crate) fn name(&self, kind: &str) -> String {
        format!("{}{}_{}", self.prefix, kind, self.member)
    }
}

/// A property under construction
pub struct PropertyEmitter {
    registry: Arc<TypeRegistry>,
    property: PropertyRc,
    pub(crate) shape: AccessorShape,
    /// Property this one overrides or implements
    pub(crate) overridden: Option<PropertyRc>,
    getter: Option<MethodHandle>,
    setter: Option<MethodHandle>,
}

impl PropertyEmitter {
    pub(crate) fn new(
        registry: Arc<TypeRegistry>,
        property: PropertyRc,
        shape: AccessorShape,
        overridden: Option<PropertyRc>,
    ) -> Self {
        PropertyEmitter {
            registry,
            property,
            shape,
            overridden,
            getter: None,
            setter: None,
        }
    }

    /// The property being built
    #[must_use]
    pub fn property(&self) -> &PropertyRc {
        &self.property
    }

    /// Name of the property
    #[must_use]
    pub fn name(&self) -> &str {
        &self.property.name
    }

    /// The `get` accessor, if assigned
    #[must_use]
    pub fn getter(&self) -> Option<MethodHandle> {
        self.getter
    }

    /// The `set` accessor, if assigned
    #[must_use]
    pub fn setter(&self) -> Option<MethodHandle> {
        self.setter
    }

    /// Assigns the `get` accessor
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if a getter is already assigned or `method`
    /// is `None`.
    pub fn assign_getter(&mut self, method: Option<MethodHandle>) -> Result<()> {
        assign(&mut self.getter, method, "get", &self.property.name)
    }

    /// Assigns the `set` accessor
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if a setter is already assigned or `method`
    /// is `None`.
    pub fn assign_setter(&mut self, method: Option<MethodHandle>) -> Result<()> {
        assign(&mut self.setter, method, "set", &self.property.name)
    }

    /// Applies a custom attribute to the property
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if the attribute does not fit.
    pub fn add_custom_attribute(&mut self, descriptor: &CustomAttributeDescriptor) -> Result<CustomAttributeRc> {
        AttributeReplicator::new(self.registry.clone())
            .generate(AttributeTarget::Property(&self.property), descriptor)
    }
}

impl std::fmt::Debug for PropertyEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyEmitter")
            .field("property", &self.property.name)
            .field("getter", &self.getter)
            .field("setter", &self.setter)
            .finish()
    }
}

/// An event under construction
pub struct EventEmitter {
    registry: Arc<TypeRegistry>,
    event: EventRc,
    pub(crate) shape: AccessorShape,
    pub(crate) overridden: Option<EventRc>,
    adder: Option<MethodHandle>,
    remover: Option<MethodHandle>,
}

impl EventEmitter {
    pub(crate) fn new(
        registry: Arc<TypeRegistry>,
        event: EventRc,
        shape: AccessorShape,
        overridden: Option<EventRc>,
    ) -> Self {
        EventEmitter {
            registry,
            event,
            shape,
            overridden,
            adder: None,
            remover: None,
        }
    }

    /// The event being built
    #[must_use]
    pub fn event(&self) -> &EventRc {
        &self.event
    }

    /// Name of the event
    #[must_use]
    pub fn name(&self) -> &str {
        &self.event.name
    }

    /// The `add` accessor, if assigned
    #[must_use]
    pub fn adder(&self) -> Option<MethodHandle> {
        self.adder
    }

    /// The `remove` accessor, if assigned
    #[must_use]
    pub fn remover(&self) -> Option<MethodHandle> {
        self.remover
    }

    /// Assigns the `add` accessor
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if an add accessor is already assigned or
    /// `method` is `None`.
    pub fn assign_adder(&mut self, method: Option<MethodHandle>) -> Result<()> {
        assign(&mut self.adder, method, "add", &self.event.name)
    }

    /// Assigns the `remove` accessor
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if a remove accessor is already assigned or
    /// `method` is `None`.
    pub fn assign_remover(&mut self, method: Option<MethodHandle>) -> Result<()> {
        assign(&mut self.remover, method, "remove", &self.event.name)
    }

    /// Applies a custom attribute to the event
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if the attribute does not fit.
    pub fn add_custom_attribute(&mut self, descriptor: &CustomAttributeDescriptor) -> Result<CustomAttributeRc> {
        AttributeReplicator::new(self.registry.clone())
            .generate(AttributeTarget::Event(&self.event), descriptor)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("event", &self.event.name)
            .field("adder", &self.adder)
            .field("remover", &self.remover)
            .finish()
    }
}

fn assign(slot: &mut Option<MethodHandle>, method: Option<MethodHandle>, kind: &str, member: &str) -> Result<()> {
    let Some(method) = method else {
        return Err(protocol_error!(
            "Cannot assign no method as the {} accessor of '{}'",
            kind,
            member
        ));
    };
    if slot.is_some() {
        return Err(protocol_error!(
            "The {} accessor of '{}' is already assigned",
            kind,
            member
        ));
    }
    *slot = Some(method);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::{greeter_type, registry};

    #[test]
    fn test_accessor_assignment_protocol() {
        let registry = registry();
        let greeter = greeter_type(&registry);
        let property = registry.create_property(&greeter, "Nickname", &registry.core().string, vec![]);
        let shape = AccessorShape {
            prefix: String::new(),
            member: "Nickname".to_string(),
            attributes: MethodAttributes::public(),
        };
        let mut emitter = PropertyEmitter::new(registry.clone(), property, shape, None);

        assert!(matches!(
            emitter.assign_getter(None),
            Err(crate::Error::ProtocolViolation(_))
        ));
        let first = MethodHandle { owner: greeter.token, index: 0 };
        let second = MethodHandle { owner: greeter.token, index: 1 };
        emitter.assign_getter(Some(first)).unwrap();
        assert!(matches!(
            emitter.assign_getter(Some(second)),
            Err(crate::Error::ProtocolViolation(_))
        ));
        assert_eq!(emitter.getter(), Some(first));
        assert_eq!(emitter.setter(), None);
        assert_eq!(emitter.shape.name("get"), "get_Nickname");
    }
}
