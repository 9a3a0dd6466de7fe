//! Runtime value representation for interpreted method bodies.

use std::{
    fmt,
    sync::{Arc, RwLock},
};

use crate::{
    emulation::heap::{ArrayRef, ObjectRef},
    metadata::{
        members::FieldRc,
        method::MethodRc,
        token::Token,
        typesystem::{PrimitiveKind, RtTypeRc, TypeFlavor},
    },
};

/// Runtime value of the reference interpreter.
///
/// `EmValue` represents every value that can be held in a local, an argument, a field or be
/// produced by an expression. Reference types share their heap storage; value types are copied.
///
/// # Type Mapping
///
/// | Runtime Type | EmValue Variant |
/// |--------------|-----------------|
/// | `bool` | [`EmValue::Bool`] |
/// | `char` | [`EmValue::Char`] |
/// | `int8`, `int16`, `int32`, unsigned counterparts up to `uint32` | [`EmValue::I32`] |
/// | `int64`, `uint64` | [`EmValue::I64`] |
/// | `float32`, `float64` | [`EmValue::F64`] |
/// | `string` | [`EmValue::String`] |
/// | Class instance | [`EmValue::Object`] |
/// | Array | [`EmValue::Array`] |
/// | Delegate | [`EmValue::Delegate`] |
/// | Value type (struct) | [`EmValue::ValueType`] |
/// | Enum | [`EmValue::Enum`] |
/// | `null` | [`EmValue::Null`] |
#[derive(Clone)]
pub enum EmValue {
    /// No value (void return)
    Void,
    /// Null reference
    Null,
    /// Boolean value
    Bool(bool),
    /// Unicode character
    Char(char),
    /// 32-bit integer, also used for the narrower integer types
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// Floating point
    F64(f64),
    /// Immutable string
    String(Arc<str>),
    /// Reference to a heap object
    Object(ObjectRef),
    /// Reference to a heap array
    Array(ArrayRef),
    /// Delegate bound to a method
    Delegate(Arc<DelegateValue>),
    /// Value type stored inline
    ValueType(Box<ValueTypeInstance>),
    /// Enum value
    Enum {
        /// The enum type
        ty: RtTypeRc,
        /// Underlying numeric value
        value: i64,
    },
    /// Runtime type handle (`System.Type`)
    Type(RtTypeRc),
    /// Runtime method handle (`System.Reflection.MethodInfo`)
    Method(MethodRc),
    /// Pointer to a storage location
    ManagedPtr(ManagedPointer),
}

/// A delegate instance
pub struct DelegateValue {
    /// The delegate type
    pub delegate_type: RtTypeRc,
    /// Receiver the method is invoked on, [`EmValue::Null`] for static methods
    pub target: EmValue,
    /// The bound method
    pub method: MethodRc,
    /// Resolve `method` against the receiver's runtime type on each invocation
    pub virtual_dispatch: bool,
}

/// Inline storage of a value type instance
#[derive(Clone)]
pub struct ValueTypeInstance {
    /// The value type
    pub ty: RtTypeRc,
    /// Field values by field token
    pub fields: Vec<(Token, EmValue)>,
}

impl ValueTypeInstance {
    /// Value of the field with `token`
    #[must_use]
    pub fn get(&self, token: Token) -> Option<&EmValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == token)
            .map(|(_, value)| value)
    }

    /// Overwrites or appends the field with `token`
    pub fn set(&mut self, token: Token, value: EmValue) {
        match self.fields.iter_mut().find(|(field, _)| *field == token) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((token, value)),
        }
    }
}

/// Address of a storage location
#[derive(Clone)]
pub enum ManagedPointer {
    /// A local variable or argument slot of a running frame
    Slot(Arc<RwLock<EmValue>>),
    /// An instance field of a heap object
    Field {
        /// The object holding the field
        object: ObjectRef,
        /// The field
        field: FieldRc,
    },
    /// A static field
    StaticField(FieldRc),
    /// A field of the value type stored at another location
    ValueField {
        /// Location of the value type instance
        parent: Box<ManagedPointer>,
        /// The field
        field: FieldRc,
    },
    /// An array element
    Element {
        /// The array
        array: ArrayRef,
        /// Element index
        index: usize,
    },
}

impl EmValue {
    /// The default value of a location of type `ty`
    #[must_use]
    pub fn default_for(ty: &RtTypeRc) -> EmValue {
        match ty.flavor {
            TypeFlavor::Primitive(kind) => match kind {
                PrimitiveKind::Void => EmValue::Void,
                PrimitiveKind::Boolean => EmValue::Bool(false),
                PrimitiveKind::Char => EmValue::Char('\0'),
                PrimitiveKind::I8 | PrimitiveKind::U8 => EmValue::I64(0),
                PrimitiveKind::R4 | PrimitiveKind::R8 => EmValue::F64(0.0),
                _ => EmValue::I32(0),
            },
            TypeFlavor::Enum => EmValue::Enum {
                ty: ty.clone(),
                value: 0,
            },
            TypeFlavor::ValueType => EmValue::ValueType(Box::new(ValueTypeInstance {
                ty: ty.clone(),
                fields: ty
                    .instance_fields()
                    .iter()
                    .map(|field| (field.token, EmValue::default_for(&field.field_type)))
                    .collect(),
            })),
            _ => EmValue::Null,
        }
    }

    /// Returns `true` for [`EmValue::Null`]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, EmValue::Null)
    }

    /// Returns `true` for [`EmValue::Void`]
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, EmValue::Void)
    }

    /// The string payload
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EmValue::String(text) => Some(text),
            _ => None,
        }
    }

    /// The boolean payload
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EmValue::Bool(value) => Some(*value),
            EmValue::I32(value) => Some(*value != 0),
            _ => None,
        }
    }

    /// Any integral payload widened to 64 bits
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EmValue::I32(value) => Some(i64::from(*value)),
            EmValue::I64(value) | EmValue::Enum { value, .. } => Some(*value),
            EmValue::Char(value) => Some(i64::from(u32::from(*value))),
            EmValue::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    /// The heap object payload
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            EmValue::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The heap array payload
    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            EmValue::Array(array) => Some(array),
            _ => None,
        }
    }

    /// The delegate payload
    #[must_use]
    pub fn as_delegate(&self) -> Option<&Arc<DelegateValue>> {
        match self {
            EmValue::Delegate(delegate) => Some(delegate),
            _ => None,
        }
    }

    /// Structural equality: value types and strings by content, everything else by identity
    #[must_use]
    pub fn equals(&self, other: &EmValue) -> bool {
        match (self, other) {
            (EmValue::ValueType(a), EmValue::ValueType(b)) => {
                a.ty.token == b.ty.token
                    && a.fields.len() == b.fields.len()
                    && a.fields.iter().all(|(token, value)| {
                        b.get(*token).is_some_and(|other| value.equals(other))
                    })
            }
            _ => self == other,
        }
    }
}

impl PartialEq for EmValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EmValue::Void, EmValue::Void) | (EmValue::Null, EmValue::Null) => true,
            (EmValue::Bool(a), EmValue::Bool(b)) => a == b,
            (EmValue::Char(a), EmValue::Char(b)) => a == b,
            (EmValue::I32(a), EmValue::I32(b)) => a == b,
            (EmValue::I64(a), EmValue::I64(b)) => a == b,
            #[allow(clippy::float_cmp)]
            (EmValue::F64(a), EmValue::F64(b)) => a == b,
            (EmValue::String(a), EmValue::String(b)) => a == b,
            (EmValue::Object(a), EmValue::Object(b)) => Arc::ptr_eq(a, b),
            (EmValue::Array(a), EmValue::Array(b)) => Arc::ptr_eq(a, b),
            (EmValue::Delegate(a), EmValue::Delegate(b)) => Arc::ptr_eq(a, b),
            (EmValue::ValueType(a), EmValue::ValueType(b)) => {
                a.ty.token == b.ty.token && a.fields == b.fields
            }
            (EmValue::Enum { ty: ta, value: a }, EmValue::Enum { ty: tb, value: b }) => {
                ta.token == tb.token && a == b
            }
            (EmValue::Type(a), EmValue::Type(b)) => a.token == b.token,
            (EmValue::Method(a), EmValue::Method(b)) => a.token == b.token,
            _ => false,
        }
    }
}

impl From<&str> for EmValue {
    fn from(value: &str) -> Self {
        EmValue::String(Arc::from(value))
    }
}

impl From<String> for EmValue {
    fn from(value: String) -> Self {
        EmValue::String(Arc::from(value))
    }
}

impl From<bool> for EmValue {
    fn from(value: bool) -> Self {
        EmValue::Bool(value)
    }
}

impl From<i32> for EmValue {
    fn from(value: i32) -> Self {
        EmValue::I32(value)
    }
}

impl From<i64> for EmValue {
    fn from(value: i64) -> Self {
        EmValue::I64(value)
    }
}

impl From<f64> for EmValue {
    fn from(value: f64) -> Self {
        EmValue::F64(value)
    }
}

impl From<ObjectRef> for EmValue {
    fn from(value: ObjectRef) -> Self {
        EmValue::Object(value)
    }
}

impl fmt::Debug for EmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmValue::Void => write!(f, "void"),
            EmValue::Null => write!(f, "null"),
            EmValue::Bool(value) => write!(f, "{}", value),
            EmValue::Char(value) => write!(f, "{:?}", value),
            EmValue::I32(value) => write!(f, "{}", value),
            EmValue::I64(value) => write!(f, "{}L", value),
            EmValue::F64(value) => write!(f, "{}", value),
            EmValue::String(value) => write!(f, "{:?}", value),
            EmValue::Object(object) => write!(f, "{}#{}", object.ty().full_name(), object.id()),
            EmValue::Array(array) => write!(
                f,
                "{}[{}]",
                array.element_type().full_name(),
                array.len()
            ),
            EmValue::Delegate(delegate) => write!(
                f,
                "{}({})",
                delegate.delegate_type.full_name(),
                delegate.method.full_name()
            ),
            EmValue::ValueType(value) => {
                write!(f, "{} {{ ", value.ty.full_name())?;
                for (token, field) in &value.fields {
                    write!(f, "{}: {:?} ", token, field)?;
                }
                write!(f, "}}")
            }
            EmValue::Enum { ty, value } => write!(f, "{}({})", ty.full_name(), value),
            EmValue::Type(ty) => write!(f, "typeof({})", ty.full_name()),
            EmValue::Method(method) => write!(f, "methodof({})", method.full_name()),
            EmValue::ManagedPtr(_) => write!(f, "&ptr"),
        }
    }
}

impl fmt::Display for EmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmValue::String(value) => write!(f, "{}", value),
            other => write!(f, "{:?}", other),
        }
    }
}
