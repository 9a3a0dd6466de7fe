//! Reference interpreted backend for generated types.
//!
//! This module executes the types held by a [`crate::metadata::typesystem::TypeRegistry`]:
//! native method bodies are Rust closures, emitted bodies are statement trees from
//! [`crate::emit::body`] walked by a small interpreter. It is the "host runtime" generated
//! types are activated, invoked, serialized and reflected on.
//!
//! # Key Components
//!
//! - [`EmValue`] - Runtime value representation
//! - [`HeapObject`] / [`HeapArray`] - Reference type storage
//! - [`Runtime`] - Activation, virtual and interface dispatch, delegates, fields, exceptions
//! - [`RuntimeConfig`] - Call depth limit and execution switches
//! - [`ThrownException`] - A managed exception that escaped interpreted code
//!
//! # Example
//!
//! ```rust,no_run
//! use dotweave::emulation::{EmValue, Runtime};
//! use dotweave::metadata::typesystem::TypeRegistry;
//!
//! let registry = TypeRegistry::new()?;
//! let runtime = Runtime::new(registry.clone());
//! let object = runtime.create_instance(&registry.core().object, &[])?;
//! let text = runtime.invoke_by_name(&object, "ToString", &[])?;
//! assert_eq!(text, EmValue::from("System.Object"));
//! # Ok::<(), dotweave::Error>(())
//! ```

mod config;
mod exception;
mod heap;
mod interpreter;
mod runtime;
mod statics;
mod value;

pub use config::RuntimeConfig;
pub use exception::ThrownException;
pub use heap::{ArrayRef, HeapArray, HeapObject, HostData, ObjectRef};
pub use runtime::Runtime;
pub use statics::StaticFields;
pub use value::{DelegateValue, EmValue, ManagedPointer, ValueTypeInstance};
