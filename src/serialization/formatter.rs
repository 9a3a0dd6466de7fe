//! Object formatter driving the serialization protocol.
//!
//! [`ObjectFormatter`] turns an instance into a [`SerializedObject`] and back. Types that
//! implement `ISerializable` are written through `GetObjectData` and read through their
//! deserialization constructor; other types marked serializable are written field by field.
//! Restoring an instance raises the deserialization callbacks around the state restore.

use std::sync::Arc;

use crate::{
    emulation::{EmValue, HeapObject, Runtime},
    metadata::{
        method::CONSTRUCTOR_NAME,
        typesystem::{RtTypeRc, TypeAttributes, TypeRegistry},
    },
    serialization::SerializationCallbacks,
    Error, Result,
};

/// The serialized state of one object
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedObject {
    /// Full name of the type to reconstruct
    pub type_name: String,
    /// Entries in the order they were written. Field-wise entries are keyed by
    /// `Declaring.Type::field`.
    pub entries: Vec<(String, EmValue)>,
}

impl SerializedObject {
    /// The value of the entry called `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EmValue> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| value)
    }
}

/// Serializes and deserializes instances of a registry's types
pub struct ObjectFormatter {
    registry: Arc<TypeRegistry>,
    callbacks: SerializationCallbacks,
    context_state: i32,
}

impl ObjectFormatter {
    /// Creates a formatter passing a `StreamingContext` with state `0`
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        ObjectFormatter {
            callbacks: SerializationCallbacks::new(registry.clone()),
            registry,
            context_state: 0,
        }
    }

    /// Sets the state of the `StreamingContext` passed to the serialization members
    #[must_use]
    pub fn with_context_state(mut self, state: i32) -> Self {
        self.context_state = state;
        self
    }

    /// The callback cache used while deserializing
    #[must_use]
    pub fn callbacks(&self) -> &SerializationCallbacks {
        &self.callbacks
    }

    fn not_serializable(&self, runtime: &Runtime, message: String) -> Error {
        runtime.throw_new(&self.registry.core().serialization_exception.clone(), &message)
    }

    fn check_serializable(&self, runtime: &Runtime, ty: &RtTypeRc) -> Result<()> {
        match ty
            .hierarchy()
            .into_iter()
            .find(|ty| !ty.flags.contains(TypeAttributes::SERIALIZABLE))
        {
            Some(offending) => Err(self.not_serializable(
                runtime,
                format!(
                    "Type '{}' is not marked as serializable.",
                    offending.full_name()
                ),
            )),
            None => Ok(()),
        }
    }

    /// Writes the state of `instance`
    ///
    /// # Errors
    /// Throws `SerializationException` for types that neither implement `ISerializable` nor
    /// are marked serializable, and propagates failures of `GetObjectData`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn serialize(&self, runtime: &Runtime, instance: &EmValue) -> Result<SerializedObject> {
        let core = self.registry.core();
        let ty = runtime.type_of(instance)?;

        if ty.implements_interface(&core.iserializable) {
            let get_object_data = core
                .get_object_data()
                .ok_or_else(|| Error::MemberNotFound("ISerializable::GetObjectData".to_string()))?;
            let info = runtime.new_serialization_info(&ty)?;
            let context = runtime.streaming_context(self.context_state);
            runtime.invoke_virtual(&get_object_data, instance, &[info.clone(), context])?;
            return Ok(SerializedObject {
                type_name: runtime.serialization_type_name(&info)?,
                entries: runtime.serialization_entries(&info)?,
            });
        }

        self.check_serializable(runtime, &ty)?;
        let mut entries = Vec::new();
        for field in ty.instance_fields() {
            if field.is_not_serialized() {
                continue;
            }
            entries.push((field.full_name(), runtime.load_field(instance, &field)?));
        }
        tracing::debug!(ty = %ty.full_name(), entries = entries.len(), "serialized field-wise");
        Ok(SerializedObject {
            type_name: ty.full_name(),
            entries,
        })
    }

    /// Reconstructs an instance from `data`.
    ///
    /// `[OnDeserializing]` callbacks run on the allocated instance before its state is
    /// restored, `[OnDeserialized]` callbacks and `IDeserializationCallback` afterwards.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for unknown types and [`Error::ShapeViolation`] for
    /// abstract types and value types. Throws `SerializationException` when an `ISerializable`
    /// type has no deserialization constructor or an entry names no field, and propagates
    /// failures of the constructor and the callbacks.
    #[tracing::instrument(level = "debug", skip_all, fields(ty = %data.type_name))]
    pub fn deserialize(&self, runtime: &Runtime, data: &SerializedObject) -> Result<EmValue> {
        let core = self.registry.core();
        let ty = self.registry.lookup(&data.type_name)?;
        if ty.is_abstract() || ty.is_interface() || ty.is_value_type() {
            return Err(shape_error!(
                "Cannot deserialize an instance of {}",
                ty.full_name()
            ));
        }
        runtime.ensure_initialized(&ty)?;

        let instance = EmValue::Object(HeapObject::new(&ty));
        let context = runtime.streaming_context(self.context_state);
        self.callbacks.raise_on_deserializing(runtime, &instance, &context)?;

        if ty.implements_interface(&core.iserializable) {
            let signature = core.serialization_signature();
            let constructor = ty.find_method(CONSTRUCTOR_NAME, &signature).ok_or_else(|| {
                self.not_serializable(
                    runtime,
                    format!(
                        "The constructor to deserialize an object of type '{}' was not found.",
                        ty.full_name()
                    ),
                )
            })?;
            let info = runtime.new_serialization_info(&ty)?;
            for (name, value) in &data.entries {
                runtime.add_serialization_value(&info, name.clone(), value.clone())?;
            }
            runtime.invoke(&constructor, &instance, &[info, context.clone()])?;
        } else {
            self.check_serializable(runtime, &ty)?;
            let fields = ty.instance_fields();
            for (name, value) in &data.entries {
                let field = fields
                    .iter()
                    .find(|field| field.full_name() == *name)
                    .ok_or_else(|| {
                        self.not_serializable(
                            runtime,
                            format!("Member '{}' was not found on '{}'.", name, ty.full_name()),
                        )
                    })?;
                runtime.store_field(&instance, field, value.clone())?;
            }
        }

        self.callbacks.raise_on_deserialized(runtime, &instance, &context)?;
        self.callbacks
            .raise_on_deserialization(runtime, &instance, &EmValue::Null)?;
        Ok(instance)
    }
}

impl std::fmt::Debug for ObjectFormatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectFormatter")
            .field("context_state", &self.context_state)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
