//! Intercepted calls and the host types that carry them.
//!
//! Generated overrides hand every call to an `InvocationHandler` object stored in the
//! instance. That object is implemented by the host: its `Invoke` method unpacks the call into
//! an [`Invocation`] and runs the Rust closure attached to it.

use std::{fmt, sync::Arc};

use crate::{
    emulation::{EmValue, HeapObject, HostData, Runtime},
    metadata::{
        method::{MethodAttributes, MethodRc},
        typesystem::{RtTypeRc, TypeAttributes, TypeBuilder, TypeRegistry},
    },
    Error, Result,
};

/// Namespace of the host types used by generated mixins
pub const MIXIN_NAMESPACE: &str = "dotweave.Mixins";

/// Handles intercepted calls; the returned value replaces the result of the call
pub type InvocationHandler = Arc<dyn Fn(&Runtime, &Invocation) -> Result<EmValue> + Send + Sync>;

/// One intercepted call
#[derive(Clone, Debug)]
pub struct Invocation {
    /// The instance the method was called on
    pub receiver: EmValue,
    /// The overridden method of the target type
    pub method: MethodRc,
    /// Arguments in parameter order
    pub arguments: Vec<EmValue>,
    /// Delegate running the base implementation on the receiver
    pub base_call: EmValue,
}

impl Invocation {
    /// Runs the base implementation with the intercepted arguments
    ///
    /// # Errors
    /// Propagates failures of the base implementation.
    pub fn proceed(&self, runtime: &Runtime) -> Result<EmValue> {
        runtime.invoke_delegate(&self.base_call, &self.arguments)
    }

    /// Runs the base implementation with `arguments` instead
    ///
    /// # Errors
    /// Returns [`Error::ProtocolViolation`] if the argument count differs from the method's,
    /// and propagates failures of the base implementation.
    pub fn proceed_with(&self, runtime: &Runtime, arguments: &[EmValue]) -> Result<EmValue> {
        if arguments.len() != self.method.params.len() {
            return Err(protocol_error!(
                "{} takes {} arguments, got {}",
                self.method.full_name(),
                self.method.params.len(),
                arguments.len()
            ));
        }
        runtime.invoke_delegate(&self.base_call, arguments)
    }
}

/// Host data of an `InvocationHandler` object
struct HandlerCell(InvocationHandler);

/// The host types generated mixins reference
#[derive(Clone)]
pub(crate) struct MixinHostTypes {
    /// `dotweave.Mixins.InvocationHandler`
    pub handler: RtTypeRc,
    /// `InvocationHandler::Invoke(object, MethodInfo, object[], Delegate) -> object`
    pub invoke: MethodRc,
    /// `dotweave.Mixins.BaseCall`, the delegate type of base-call helpers
    pub base_call: RtTypeRc,
}

impl MixinHostTypes {
    /// Looks the host types up in `registry`, defining them in the core module on first use
    pub(crate) fn resolve(registry: &TypeRegistry) -> Result<Self> {
        let handler_name = format!("{}.InvocationHandler", MIXIN_NAMESPACE);
        let base_call_name = format!("{}.BaseCall", MIXIN_NAMESPACE);
        if let (Ok(handler), Ok(base_call)) = (
            registry.lookup(&handler_name),
            registry.lookup(&base_call_name),
        ) {
            let invoke = handler
                .method_by_name("Invoke")
                .ok_or_else(|| Error::MemberNotFound(format!("{}::Invoke", handler_name)))?;
            return Ok(MixinHostTypes {
                handler,
                invoke,
                base_call,
            });
        }

        let core = registry.core();
        let sealed = TypeAttributes::PUBLIC | TypeAttributes::SEALED;
        let object_array = registry.make_array_type(&core.object);

        let builder = TypeBuilder::new(registry, &core.module)
            .with_flags(sealed)
            .class(MIXIN_NAMESPACE, "InvocationHandler", &core.object)?;
        let invoke = builder.native_method(
            "Invoke",
            MethodAttributes::public(),
            &core.object,
            &[
                ("receiver", &core.object),
                ("method", &core.method_info),
                ("arguments", &object_array),
                ("proceed", &core.delegate),
            ],
            dispatch_to_handler,
        )?;
        let handler = builder.build()?;

        let base_call = TypeBuilder::new(registry, &core.module)
            .with_flags(sealed)
            .class(MIXIN_NAMESPACE, "BaseCall", &core.delegate)?
            .build()?;

        tracing::debug!("defined mixin host types");
        Ok(MixinHostTypes {
            handler,
            invoke,
            base_call,
        })
    }

    /// Allocates an `InvocationHandler` object running `handler`
    pub(crate) fn new_handler(&self, handler: InvocationHandler) -> EmValue {
        let object = HeapObject::new(&self.handler);
        object.set_host_data(HostData::Native(Arc::new(HandlerCell(handler))));
        EmValue::Object(object)
    }
}

impl fmt::Debug for MixinHostTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixinHostTypes")
            .field("handler", &self.handler.full_name())
            .field("base_call", &self.base_call.full_name())
            .finish()
    }
}

/// Native body of `InvocationHandler::Invoke`
fn dispatch_to_handler(runtime: &Runtime, this: &EmValue, args: &[EmValue]) -> Result<EmValue> {
    let cell = this
        .as_object()
        .and_then(|object| object.native::<HandlerCell>())
        .ok_or_else(|| protocol_error!("InvocationHandler object carries no host handler"))?;
    let method = match args.get(1) {
        Some(EmValue::Method(method)) => method.clone(),
        other => return Err(protocol_error!("Expected the intercepted method, got {:?}", other)),
    };
    let arguments = args
        .get(2)
        .and_then(EmValue::as_array)
        .map(|array| array.to_vec())
        .unwrap_or_default();

    let invocation = Invocation {
        receiver: args.first().cloned().unwrap_or(EmValue::Null),
        method,
        arguments,
        base_call: args.get(3).cloned().unwrap_or(EmValue::Null),
    };
    tracing::trace!(method = %invocation.method.full_name(), "dispatching intercepted call");
    (cell.0)(runtime, &invocation)
}
