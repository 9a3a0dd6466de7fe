//! # dotweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the
//! dotweave library. Import it to get quick access to the type model, the emitters, the
//! runtime and the mixin builder.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotweave operations
pub use crate::Error;

/// The result type used throughout dotweave
pub use crate::Result;

// ================================================================================================
// Type Model
// ================================================================================================

/// Metadata token type identifying types and members
pub use crate::metadata::token::Token;

/// Types, their attributes and the registry owning them
pub use crate::metadata::typesystem::{
    CoreTypes, FieldAttributes, RtType, RtTypeRc, TypeAttributes, TypeBuilder, TypeRegistry,
};

/// Methods and method attributes
pub use crate::metadata::method::{
    Method, MethodAccessFlags, MethodAttributes, MethodModifiers, MethodRc, Parameter,
};

/// Fields, properties and events
pub use crate::metadata::members::{EventRc, FieldRc, PropertyRc};

/// Modules generated types are defined in
pub use crate::metadata::module::{Module, ModuleRc};

/// Custom attribute values and usage
pub use crate::metadata::customattributes::{
    AttributeTargets, AttributeUsage, CustomAttributeArgument, CustomAttributeValue,
};

// ================================================================================================
// Emission
// ================================================================================================

/// Method body model
pub use crate::emit::body::{new_delegate, Expression, Reference, Statement};

/// Module scope, type and method emitters
pub use crate::emit::{
    AttributeReplicator, MethodEmitter, MethodHandle, ModuleScope, ModuleScopeConfig,
    SigningPolicy, TypeEmitter,
};

// ================================================================================================
// Runtime
// ================================================================================================

/// The interpreted runtime and its values
pub use crate::emulation::{EmValue, Runtime, RuntimeConfig, ThrownException};

// ================================================================================================
// Serialization and Mixins
// ================================================================================================

/// Serialization members of generated types
pub use crate::serialization::{
    implement_deserialization_constructor, implement_get_object_data_by_delegation,
    DeserializationConstructorPolicy, ObjectFormatter, SerializationCallbacks,
};

/// Intercepting subtypes
pub use crate::mixin::{Invocation, MixinBuilder, MixinType};
