//! Fields, properties and events.
//!
//! Members are created through the [`crate::metadata::typesystem::TypeRegistry`], which mints
//! their token and appends them to the declaring type. They refer back to the declaring type
//! weakly; the registry keeps every type alive for the lifetime of the session.

use std::sync::{Arc, OnceLock, Weak};

use crate::{
    metadata::{
        customattributes::CustomAttributeList,
        method::{MethodAccessFlags, MethodRc},
        token::Token,
        typesystem::{FieldAttributes, RtType, RtTypeRc},
    },
    Result,
};

/// A reference-counted pointer to a `Field`
pub type FieldRc = Arc<Field>;
/// A vector that holds a list of `Field`
pub type FieldList = Arc<boxcar::Vec<FieldRc>>;
/// A reference-counted pointer to a `Property`
pub type PropertyRc = Arc<Property>;
/// A vector that holds a list of `Property`
pub type PropertyList = Arc<boxcar::Vec<PropertyRc>>;
/// A reference-counted pointer to an `Event`
pub type EventRc = Arc<Event>;
/// A vector that holds a list of `Event`
pub type EventList = Arc<boxcar::Vec<EventRc>>;

/// A field definition
pub struct Field {
    /// Token
    pub token: Token,
    /// Name
    pub name: String,
    /// Flags
    pub flags: FieldAttributes,
    /// Type of the stored value
    pub field_type: RtTypeRc,
    pub(crate) declaring_type: Weak<RtType>,
    /// All custom attributes this field has
    pub custom_attributes: CustomAttributeList,
}

impl Field {
    /// The type declaring this field
    #[must_use]
    pub fn declaring_type(&self) -> Option<RtTypeRc> {
        self.declaring_type.upgrade()
    }

    /// Is a static field
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }

    /// Excluded from field-wise serialization
    #[must_use]
    pub fn is_not_serialized(&self) -> bool {
        self.flags.contains(FieldAttributes::NOT_SERIALIZED)
    }

    /// Access bits of the field
    #[must_use]
    pub fn access(&self) -> FieldAttributes {
        self.flags.access()
    }

    /// `Declaring.Type::Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.declaring_type() {
            Some(ty) => format!("{}::{}", ty.full_name(), self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("token", &self.token)
            .field("name", &self.full_name())
            .field("flags", &self.flags)
            .field("field_type", &self.field_type.full_name())
            .finish()
    }
}

/// A property definition; the accessors are linked once, when they are created
pub struct Property {
    /// Token
    pub token: Token,
    /// Name
    pub name: String,
    /// Type of the property value
    pub property_type: RtTypeRc,
    /// Types of the index parameters of an indexer
    pub index_types: Vec<RtTypeRc>,
    pub(crate) declaring_type: Weak<RtType>,
    getter: OnceLock<MethodRc>,
    setter: OnceLock<MethodRc>,
    /// All custom attributes this property has
    pub custom_attributes: CustomAttributeList,
}

impl Property {
    pub(crate) fn new(
        token: Token,
        name: &str,
        property_type: RtTypeRc,
        index_types: Vec<RtTypeRc>,
        declaring_type: Weak<RtType>,
    ) -> Self {
        Property {
            token,
            name: name.to_string(),
            property_type,
            index_types,
            declaring_type,
            getter: OnceLock::new(),
            setter: OnceLock::new(),
            custom_attributes: Arc::new(boxcar::Vec::new()),
        }
    }

    /// The type declaring this property
    #[must_use]
    pub fn declaring_type(&self) -> Option<RtTypeRc> {
        self.declaring_type.upgrade()
    }

    /// The `get` accessor
    #[must_use]
    pub fn getter(&self) -> Option<MethodRc> {
        self.getter.get().cloned()
    }

    /// The `set` accessor
    #[must_use]
    pub fn setter(&self) -> Option<MethodRc> {
        self.setter.get().cloned()
    }

    /// Links the `get` accessor
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if a getter is already linked.
    pub fn set_getter(&self, method: MethodRc) -> Result<()> {
        self.getter.set(method).map_err(|_| {
            protocol_error!("Property '{}' already has a get accessor", self.name)
        })
    }

    /// Links the `set` accessor
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if a setter is already linked.
    pub fn set_setter(&self, method: MethodRc) -> Result<()> {
        self.setter.set(method).map_err(|_| {
            protocol_error!("Property '{}' already has a set accessor", self.name)
        })
    }

    /// Most visible access of the linked accessors
    #[must_use]
    pub fn access(&self) -> Option<MethodAccessFlags> {
        [self.getter(), self.setter()]
            .into_iter()
            .flatten()
            .map(|accessor| accessor.attributes.access)
            .max_by_key(|access| access.bits())
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("property_type", &self.property_type.full_name())
            .field("getter", &self.getter().map(|m| m.name.clone()))
            .field("setter", &self.setter().map(|m| m.name.clone()))
            .finish()
    }
}

/// An event definition
pub struct Event {
    /// Token
    pub token: Token,
    /// Name
    pub name: String,
    /// Delegate type of the handlers
    pub event_type: RtTypeRc,
    pub(crate) declaring_type: Weak<RtType>,
    adder: OnceLock<MethodRc>,
    remover: OnceLock<MethodRc>,
    /// All custom attributes this event has
    pub custom_attributes: CustomAttributeList,
}

impl Event {
    pub(crate) fn new(
        token: Token,
        name: &str,
        event_type: RtTypeRc,
        declaring_type: Weak<RtType>,
    ) -> Self {
        Event {
            token,
            name: name.to_string(),
            event_type,
            declaring_type,
            adder: OnceLock::new(),
            remover: OnceLock::new(),
            custom_attributes: Arc::new(boxcar::Vec::new()),
        }
    }

    /// The type declaring this event
    #[must_use]
    pub fn declaring_type(&self) -> Option<RtTypeRc> {
        self.declaring_type.upgrade()
    }

    /// The `add` accessor
    #[must_use]
    pub fn adder(&self) -> Option<MethodRc> {
        self.adder.get().cloned()
    }

    /// The `remove` accessor
    #[must_use]
    pub fn remover(&self) -> Option<MethodRc> {
        self.remover.get().cloned()
    }

    /// Links the `add` accessor
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if an add accessor is already linked.
    pub fn set_adder(&self, method: MethodRc) -> Result<()> {
        self.adder
            .set(method)
            .map_err(|_| protocol_error!("Event '{}' already has an add accessor", self.name))
    }

    /// Links the `remove` accessor
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if a remove accessor is already linked.
    pub fn set_remover(&self, method: MethodRc) -> Result<()> {
        self.remover.set(method).map_err(|_| {
            protocol_error!("Event '{}' already has a remove accessor", self.name)
        })
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("token", &self.token)
            .field("name", &self.name)
            .field("event_type", &self.event_type.full_name())
            .field("adder", &self.adder().map(|m| m.name.clone()))
            .field("remover", &self.remover().map(|m| m.name.clone()))
            .finish()
    }
}
