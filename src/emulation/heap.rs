//! Heap objects and arrays.
//!
//! Instances are reference counted; there is no simulated garbage collector. Every object
//! carries its runtime type, its field storage keyed by field token and an optional slot of
//! host data used by natively implemented core types.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use crate::{
    emulation::EmValue,
    metadata::{token::Token, typesystem::RtTypeRc},
};

/// Reference to a heap object
pub type ObjectRef = Arc<HeapObject>;
/// Reference to a heap array
pub type ArrayRef = Arc<HeapArray>;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// State attached to objects whose type is implemented by the host
pub enum HostData {
    /// Name/value pairs of a `SerializationInfo`
    SerializationEntries {
        /// Full name of the type being serialized
        type_name: String,
        /// Entries in insertion order
        entries: Vec<(String, EmValue)>,
    },
    /// An arbitrary host value
    Native(Arc<dyn Any + Send + Sync>),
}

/// An instance of a class (or a boxed value type)
pub struct HeapObject {
    id: u64,
    ty: RtTypeRc,
    fields: RwLock<HashMap<Token, EmValue>>,
    host: RwLock<Option<HostData>>,
}

impl HeapObject {
    /// Allocates an object of `ty` with every field unset
    #[must_use]
    pub fn new(ty: &RtTypeRc) -> ObjectRef {
        Arc::new(HeapObject {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            ty: ty.clone(),
            fields: RwLock::new(HashMap::new()),
            host: RwLock::new(None),
        })
    }

    /// Process-unique object id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The runtime type of this object
    #[must_use]
    pub fn ty(&self) -> &RtTypeRc {
        &self.ty
    }

    /// Value of the field with `token`, if it was ever stored
    #[must_use]
    pub fn field(&self, token: Token) -> Option<EmValue> {
        read_lock!(self.fields).get(&token).cloned()
    }

    /// Stores the field with `token`
    pub fn set_field(&self, token: Token, value: EmValue) {
        write_lock!(self.fields).insert(token, value);
    }

    /// Replaces the host data
    pub fn set_host_data(&self, data: HostData) {
        *write_lock!(self.host) = Some(data);
    }

    /// Runs `f` on the host data
    pub fn with_host_data<R>(&self, f: impl FnOnce(Option<&HostData>) -> R) -> R {
        f(read_lock!(self.host).as_ref())
    }

    /// Runs `f` on the mutable host data
    pub fn with_host_data_mut<R>(&self, f: impl FnOnce(Option<&mut HostData>) -> R) -> R {
        f(write_lock!(self.host).as_mut())
    }

    /// The native host value, if it is a `T`
    #[must_use]
    pub fn native<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match read_lock!(self.host).as_ref() {
            Some(HostData::Native(value)) => value.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapObject")
            .field("id", &self.id)
            .field("type", &self.ty.full_name())
            .field("fields", &read_lock!(self.fields).len())
            .finish()
    }
}

/// A single-dimensional, zero-based array
pub struct HeapArray {
    element_type: RtTypeRc,
    items: RwLock<Vec<EmValue>>,
}

impl HeapArray {
    /// Allocates an array holding `items`
    #[must_use]
    pub fn new(element_type: &RtTypeRc, items: Vec<EmValue>) -> ArrayRef {
        Arc::new(HeapArray {
            element_type: element_type.clone(),
            items: RwLock::new(items),
        })
    }

    /// Allocates an array of `len` default elements
    #[must_use]
    pub fn with_len(element_type: &RtTypeRc, len: usize) -> ArrayRef {
        let items = vec![EmValue::default_for(element_type); len];
        Self::new(element_type, items)
    }

    /// Element type
    #[must_use]
    pub fn element_type(&self) -> &RtTypeRc {
        &self.element_type
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        read_lock!(self.items).len()
    }

    /// Returns `true` for a zero-length array
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<EmValue> {
        read_lock!(self.items).get(index).cloned()
    }

    /// Overwrites the element at `index`; returns `false` if out of range
    pub fn set(&self, index: usize, value: EmValue) -> bool {
        match write_lock!(self.items).get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Copy of all elements
    #[must_use]
    pub fn to_vec(&self) -> Vec<EmValue> {
        read_lock!(self.items).clone()
    }
}

impl fmt::Debug for HeapArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapArray")
            .field("element_type", &self.element_type.full_name())
            .field("items", &read_lock!(self.items))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::registry;

    #[test]
    fn test_object_fields_and_host_data() {
        let registry = registry();
        let core = registry.core();
        let object = HeapObject::new(&core.object);
        let field = core.exception_message.token;

        assert!(object.field(field).is_none());
        object.set_field(field, EmValue::from("boom"));
        assert_eq!(object.field(field), Some(EmValue::from("boom")));

        object.set_host_data(HostData::Native(Arc::new(42_u32)));
        assert_eq!(object.native::<u32>().as_deref(), Some(&42));
        assert!(object.native::<String>().is_none());
    }

    #[test]
    fn test_array_bounds() {
        let registry = registry();
        let array = HeapArray::with_len(&registry.core().int32, 2);
        assert_eq!(array.len(), 2);
        assert!(array.set(1, EmValue::I32(9)));
        assert!(!array.set(2, EmValue::I32(9)));
        assert_eq!(array.to_vec(), vec![EmValue::I32(0), EmValue::I32(9)]);
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = registry();
        let a = HeapObject::new(&registry.core().object);
        let b = HeapObject::new(&registry.core().object);
        assert_ne!(a.id(), b.id());
    }
}
