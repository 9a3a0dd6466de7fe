//! Runtime type emission.
//!
//! This module builds new type definitions at runtime from declarative descriptors. A
//! [`ModuleScope`] owns the destination modules of a session and hands out [`TypeEmitter`]s,
//! each of which owns one type under construction together with its member emitters.
//!
//! # Key Components
//!
//! - [`ModuleScope`] / [`ModuleScopeConfig`] / [`SigningPolicy`] - destination modules
//! - [`TypeEmitter`] - fields, methods, overrides, interface implementations, properties,
//!   events, constructor replication, public wrappers, nested types and [`TypeEmitter::build_type`]
//! - [`MethodEmitter`] / [`PropertyEmitter`] / [`EventEmitter`] - member emitters, addressed
//!   through [`MethodHandle`], [`PropertyHandle`] and [`EventHandle`]
//! - [`body`] - the statement and expression model of method bodies
//! - [`AttributeReplicator`] / [`CustomAttributeDescriptor`] - attribute parsing, instantiation
//!   and generation
//! - [`GeneratedMethodWrapperDescriptor`] - cross-module identity of wrapped methods
//! - [`persist`] - module images for external verification
//!
//! # Example
//!
//! ```rust,no_run
//! use dotweave::emit::{body::Expression, ModuleScope, SigningPolicy};
//! use dotweave::metadata::{method::MethodAttributes, typesystem::{TypeAttributes, TypeRegistry}};
//!
//! let registry = TypeRegistry::new()?;
//! let core = registry.core();
//! let scope = ModuleScope::new(registry.clone());
//!
//! let mut emitter = scope.create_type(
//!     "Generated.Answer",
//!     &core.object,
//!     &[],
//!     TypeAttributes::PUBLIC,
//!     SigningPolicy::Inherit,
//! )?;
//! let answer = emitter.create_method("Get", MethodAttributes::public(), &core.int32, &[])?;
//! emitter.method_mut(answer)?.implement_by_returning(Expression::constant(42))?;
//! emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))?;
//! let ty = emitter.build_type()?;
//! assert!(ty.method_by_name("Get").is_some());
//! # Ok::<(), dotweave::Error>(())
//! ```

pub mod body;
pub mod persist;

mod attributes;
mod constructors;
mod members;
mod method;
mod scope;
mod typeemitter;
mod wrapper;

pub use attributes::{AttributeReplicator, AttributeTarget, CustomAttributeDescriptor};
pub use members::{EventEmitter, EventHandle, PropertyEmitter, PropertyHandle};
pub use method::{same_shape, MethodEmitter, MethodHandle};
pub use scope::{ModuleScope, ModuleScopeConfig, SigningPolicy};
pub use typeemitter::TypeEmitter;
pub use wrapper::{GeneratedMethodWrapperDescriptor, WRAPPER_PREFIX};
