//! Serialization support for generated types.
//!
//! Generated subtypes have to keep working with the serialization protocol of their base:
//! `GetObjectData` must reach the base implementation, a deserialization constructor must
//! exist, and the lifecycle callbacks of every type in the hierarchy must fire in order.
//!
//! # Key Components
//!
//! - [`implement_get_object_data_by_delegation`] / [`base_get_object_data_call`] - the
//!   `GetObjectData` member of a generated type
//! - [`implement_deserialization_constructor`] with [`DeserializationConstructorPolicy`], plus
//!   the two strategies it selects between
//! - [`SerializationCallbacks`] - `[OnDeserializing]`, `[OnDeserialized]` and
//!   `IDeserializationCallback` notification with a per-type method cache
//! - [`ObjectFormatter`] - writes instances into [`SerializedObject`]s and restores them
//!
//! # Example
//!
//! ```rust,no_run
//! use dotweave::emit::{ModuleScope, SigningPolicy};
//! use dotweave::emulation::Runtime;
//! use dotweave::metadata::typesystem::{TypeAttributes, TypeRegistry};
//! use dotweave::serialization::{
//!     implement_deserialization_constructor, implement_get_object_data_by_delegation,
//!     DeserializationConstructorPolicy, ObjectFormatter,
//! };
//!
//! let registry = TypeRegistry::new()?;
//! let scope = ModuleScope::new(registry.clone());
//! let mut emitter = scope.create_type(
//!     "Generated.Persistent",
//!     &registry.core().object,
//!     &[],
//!     TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE,
//!     SigningPolicy::Weak,
//! )?;
//! implement_get_object_data_by_delegation(&mut emitter, |_, _, _| Ok(None))?;
//! implement_deserialization_constructor(&mut emitter, DeserializationConstructorPolicy::Throw)?;
//! emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))?;
//! let ty = emitter.build_type()?;
//!
//! let runtime = Runtime::new(registry.clone());
//! let instance = runtime.create_instance(&ty, &[])?;
//! let data = ObjectFormatter::new(registry).serialize(&runtime, &instance)?;
//! assert_eq!(data.type_name, "Generated.Persistent");
//! # Ok::<(), dotweave::Error>(())
//! ```

mod callbacks;
mod formatter;
mod implementer;

pub use callbacks::{CallbackKind, SerializationCallbacks};
pub use formatter::{ObjectFormatter, SerializedObject};
pub use implementer::{
    base_get_object_data_call, base_is_serializable, implement_deserialization_constructor,
    implement_deserialization_constructor_by_throwing,
    implement_deserialization_constructor_by_throwing_if_not_exists_on_base,
    implement_get_object_data_by_delegation, DeserializationConstructorPolicy,
    DESERIALIZATION_CONSTRUCTOR_MESSAGE,
};
