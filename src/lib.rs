// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'emit/persist.rs' uses mmap to map a saved module image into memory

//! # dotweave
//!
//! Runtime type emission and mixin composition for a .NET-style type model.
//!
//! `dotweave` generates new class types at runtime: subtypes that override virtual methods,
//! implement interfaces, replicate the constructors and custom attributes of their base, and
//! keep working with the serialization protocol the base type follows. Generated types are
//! executed by a small interpreted runtime, so they can be activated, invoked, serialized and
//! reflected on from Rust.
//!
//! ## Features
//!
//! - **🧱 Method body model** - Statement and expression trees with shape checks at construction
//! - **🏗️ Type emission** - Fields, methods, overrides, properties, events and constructor replication
//! - **🏷️ Attribute replication** - Rebuild custom attributes from their runtime instances
//! - **💾 Serialization support** - `GetObjectData` delegation, deserialization constructors, lifecycle callbacks
//! - **🧩 Mixins** - Intercepting subtypes routing calls through a per-instance handler
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotweave::prelude::*;
//!
//! let registry = TypeRegistry::new()?;
//! let scope = ModuleScope::new(registry.clone());
//! let object = registry.core().object.clone();
//!
//! let mut emitter = scope.create_type(
//!     "Generated.Hello",
//!     &object,
//!     &[],
//!     TypeAttributes::PUBLIC,
//!     SigningPolicy::Weak,
//! )?;
//! let to_string = object.method_by_name("ToString").unwrap();
//! let handle = emitter.create_method_override(&to_string)?;
//! emitter.method_mut(handle)?.implement_by_returning(Expression::constant("hello"))?;
//! emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))?;
//! let ty = emitter.build_type()?;
//!
//! let runtime = Runtime::new(registry);
//! let instance = runtime.create_instance(&ty, &[])?;
//! assert_eq!(runtime.invoke_virtual(&to_string, &instance, &[])?, EmValue::from("hello"));
//! # Ok::<(), dotweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - The runtime type model: types, members, tokens, modules, custom attributes
//! - [`emit`] - Method bodies, type emission, constructor and attribute replication, persistence
//! - [`emulation`] - The interpreted runtime executing generated types
//! - [`serialization`] - Serialization members for generated types and an object formatter
//! - [`mixin`] - Intercepting subtypes
//! - [`Error`] and [`Result`] - Error handling

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use dotweave::prelude::*;
///
/// let registry = TypeRegistry::new()?;
/// let runtime = Runtime::new(registry.clone());
/// let object = runtime.create_instance(&registry.core().object, &[])?;
/// # Ok::<(), dotweave::Error>(())
/// ```
pub mod prelude;

/// The runtime type model.
///
/// Types, methods, fields, properties and events are shared (`Arc`) records owned by a
/// [`metadata::typesystem::TypeRegistry`]. Host types are authored with the
/// [`metadata::typesystem::TypeBuilder`]; generated types come from [`emit`].
///
/// # Key Components
///
/// - [`metadata::typesystem`] - Types, the registry and the core library
/// - [`metadata::method`] - Methods, parameters and method attributes
/// - [`metadata::members`] - Fields, properties and events
/// - [`metadata::customattributes`] - Custom attribute values, their blob encoding and usage
/// - [`metadata::module`] / [`metadata::identity`] - Modules and strong-name identities
pub mod metadata;

/// Runtime type emission.
///
/// # Key Components
///
/// - [`emit::body`] - Statements, expressions and references of generated method bodies
/// - [`emit::ModuleScope`] - The strong and weak named modules generated types go into
/// - [`emit::TypeEmitter`] - Builds one class type
/// - [`emit::MethodEmitter`] - Builds one method body
/// - [`emit::AttributeReplicator`] - Rebuilds custom attributes from attribute instances
pub mod emit;

/// The interpreted runtime executing host and generated types.
pub mod emulation;

/// Serialization members for generated types, deserialization callbacks and an object formatter.
pub mod serialization;

/// Intercepting subtypes built on top of [`emit`].
pub mod mixin;

/// `dotweave` Result type
///
/// # Example
///
/// ```rust,no_run
/// use dotweave::{metadata::typesystem::RtTypeRc, metadata::typesystem::TypeRegistry, Result};
///
/// fn lookup_object(registry: &TypeRegistry) -> Result<RtTypeRc> {
///     registry.lookup("System.Object")
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `dotweave` Error type
///
/// # Example
///
/// ```rust,no_run
/// use dotweave::{metadata::typesystem::TypeRegistry, Error};
///
/// let registry = TypeRegistry::new()?;
/// match registry.lookup("Missing.Type") {
///     Ok(ty) => println!("found {}", ty.full_name()),
///     Err(Error::TypeNotFound(name)) => println!("no type {}", name),
///     Err(e) => println!("Error: {}", e),
/// }
/// # Ok::<(), dotweave::Error>(())
/// ```
pub use error::Error;
