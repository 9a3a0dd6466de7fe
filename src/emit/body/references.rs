//! Storage locations and other readable operands.

use crate::{
    emit::body::Expression,
    metadata::{
        members::{FieldRc, PropertyRc},
        typesystem::RtTypeRc,
    },
    Result,
};

/// Index of a local declared on a method emitter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalHandle {
    pub(crate) index: u16,
}

impl LocalHandle {
    /// Position of the local in the method's local list
    #[must_use]
    pub fn index(&self) -> u16 {
        self.index
    }
}

/// Something an expression can read from, and for storage locations, write to or take the
/// address of
#[derive(Clone, Debug)]
pub enum Reference {
    /// The receiver of an instance method
    This,
    /// A parameter, zero-based and not counting `this`
    Argument(u16),
    /// A declared local
    Local(LocalHandle),
    /// An instance field of the object `owner` refers to
    Field {
        /// The object (or value type location) holding the field
        owner: Box<Reference>,
        /// The field
        field: FieldRc,
    },
    /// A static field
    StaticField(FieldRc),
    /// A property, read through its getter and written through its setter
    Property {
        /// Receiver, `None` for static properties
        owner: Option<Box<Reference>>,
        /// The property
        property: PropertyRc,
        /// Index arguments
        arguments: Vec<Expression>,
    },
    /// The location a managed pointer points to
    Indirect(Box<Expression>),
    /// The value of an arbitrary expression (not a storage location)
    Expression(Box<Expression>),
}

impl Reference {
    /// Field of `this`
    #[must_use]
    pub fn this_field(field: &FieldRc) -> Self {
        Reference::Field {
            owner: Box::new(Reference::This),
            field: field.clone(),
        }
    }

    /// Field (or static field) of an owner
    #[must_use]
    pub fn field(owner: Reference, field: &FieldRc) -> Self {
        if field.is_static() {
            return Reference::StaticField(field.clone());
        }
        Reference::Field {
            owner: Box::new(owner),
            field: field.clone(),
        }
    }

    /// Non-indexed property of an owner
    #[must_use]
    pub fn property(owner: Option<Reference>, property: &PropertyRc) -> Self {
        Reference::Property {
            owner: owner.map(Box::new),
            property: property.clone(),
            arguments: Vec::new(),
        }
    }

    /// Wraps an expression value
    #[must_use]
    pub fn of(expression: Expression) -> Self {
        Reference::Expression(Box::new(expression))
    }

    /// Location a managed pointer expression points to
    #[must_use]
    pub fn indirect(pointer: Expression) -> Self {
        Reference::Indirect(Box::new(pointer))
    }

    /// Can this reference be written to and have its address taken
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Reference::Argument(_)
                | Reference::Local(_)
                | Reference::Field { .. }
                | Reference::StaticField(_)
                | Reference::Indirect(_)
        )
    }

    /// Can this reference be assigned to
    #[must_use]
    pub fn is_assignable(&self) -> bool {
        self.is_storage() || matches!(self, Reference::Property { property, .. } if property.setter().is_some())
    }

    /// Statically known type of the referenced value, where the reference carries it
    #[must_use]
    pub fn static_type(&self) -> Option<RtTypeRc> {
        match self {
            Reference::Field { field, .. } | Reference::StaticField(field) => {
                Some(field.field_type.clone())
            }
            Reference::Property { property, .. } => Some(property.property_type.clone()),
            Reference::Expression(expression) => expression.static_type(),
            _ => None,
        }
    }

    /// Reads the reference
    #[must_use]
    pub fn load(self) -> Expression {
        Expression::Load(self)
    }

    /// Takes the address of the reference
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] for anything but a storage location.
    pub fn address(self) -> Result<Expression> {
        Expression::address_of(self)
    }
}
