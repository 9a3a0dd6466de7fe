//! Intercepting subtypes.
//!
//! A mixin is a generated subtype of a target class that overrides selected virtual methods.
//! Every override hands the call to the instance's invocation handler, which may inspect the
//! call, run the base implementation through [`Invocation::proceed`] and replace its
//! result. The handler is passed as the leading argument of every replicated constructor, so
//! instances of one mixin type can carry different handlers.
//!
//! # Key Components
//!
//! - [`MixinBuilder`] - Selects the methods to intercept and emits the subtype
//! - [`MixinType`] - The built type, creating instances bound to a handler
//! - [`Invocation`] - One intercepted call as seen by the handler
//!
//! # Example
//!
//! ```rust,no_run
//! use dotweave::emit::ModuleScope;
//! use dotweave::emulation::{EmValue, Runtime};
//! use dotweave::metadata::typesystem::TypeRegistry;
//! use dotweave::mixin::MixinBuilder;
//!
//! let registry = TypeRegistry::new()?;
//! let target = registry.lookup("System.Object")?;
//! let to_string = target.method_by_name("ToString").unwrap();
//! let scope = ModuleScope::new(registry.clone());
//! let mixin = MixinBuilder::new(&scope, &target).override_method(&to_string)?.build()?;
//!
//! let runtime = Runtime::new(registry);
//! let instance = mixin.create_instance(
//!     &runtime,
//!     |runtime, invocation| {
//!         let original = invocation.proceed(runtime)?;
//!         Ok(EmValue::from(format!("[{}]", original)))
//!     },
//!     &[],
//! )?;
//! let text = runtime.invoke_virtual(&to_string, &instance, &[])?;
//! assert_eq!(text, EmValue::from("[System.Object_Mixin]"));
//! # Ok::<(), dotweave::Error>(())
//! ```

mod builder;
mod invocation;

pub use builder::{MixinBuilder, MixinType, BASE_CALL_PREFIX, HANDLER_FIELD_NAME};
pub use invocation::{Invocation, InvocationHandler, MIXIN_NAMESPACE};

pub(crate) use invocation::MixinHostTypes;
