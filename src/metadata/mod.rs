//! Runtime metadata model for emitted and host types.
//!
//! Everything the emitters create and the interpreter executes is described here: types,
//! their members, method bodies, custom attributes, the modules they live in and the
//! registry that owns them all.
//!
//! # Key Components
//!
//! - [`typesystem`] - Types, the [`typesystem::TypeRegistry`] and the bootstrapped core library
//! - [`method`] - Methods, signatures, attributes and bodies
//! - [`members`] - Fields, properties and events
//! - [`customattributes`] - Attribute blobs, their parser, encoder and usage rules
//! - [`module`] - Modules, their identity and their member tables
//! - [`identity`] - Strong-name identities and public key tokens
//! - [`token`] - Member tokens
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotweave::metadata::typesystem::TypeRegistry;
//!
//! let registry = TypeRegistry::new()?;
//! let exception = registry.lookup("System.InvalidOperationException")?;
//! assert!(exception.is_subclass_of(&registry.core().exception));
//! # Ok::<(), dotweave::Error>(())
//! ```

/// Implementation of custom attribute parsing, encoding and usage
pub mod customattributes;
/// Strong-name identities of modules
pub mod identity;
/// Fields, properties and events
pub mod members;
/// Methods, their signatures and bodies
pub mod method;
/// Modules and their member tables
pub mod module;
/// Commonly used metadata token type
pub mod token;
/// Implementation of the runtime type system
pub mod typesystem;
