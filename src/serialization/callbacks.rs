//! Deserialization lifecycle callbacks.
//!
//! Methods marked `[OnDeserializing]` run before an instance's state is restored, base types
//! first; methods marked `[OnDeserialized]` run afterwards, most derived types first. Both are
//! looked up on the runtime type of the instance and cached per type and kind. Types
//! implementing `IDeserializationCallback` are notified last.

use std::sync::Arc;

use dashmap::DashMap;
use strum::{Display, EnumIter};

use crate::{
    emulation::{EmValue, Runtime},
    metadata::{
        method::MethodRc,
        token::Token,
        typesystem::{RtTypeRc, TypeRegistry},
    },
    Result,
};

/// The lifecycle point a callback method is marked for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum CallbackKind {
    /// `[OnDeserializing]`, before the state is restored
    Deserializing,
    /// `[OnDeserialized]`, after the state is restored
    Deserialized,
}

impl CallbackKind {
    /// The marker attribute type of this kind
    #[must_use]
    pub fn marker(self, registry: &TypeRegistry) -> RtTypeRc {
        let core = registry.core();
        match self {
            CallbackKind::Deserializing => core.on_deserializing_attribute.clone(),
            CallbackKind::Deserialized => core.on_deserialized_attribute.clone(),
        }
    }
}

/// Finds and raises the deserialization callbacks of instances.
///
/// Discovered methods are cached for the lifetime of this object, keyed by runtime type and
/// [`CallbackKind`].
pub struct SerializationCallbacks {
    registry: Arc<TypeRegistry>,
    methods: DashMap<(Token, CallbackKind), Arc<Vec<MethodRc>>>,
}

impl SerializationCallbacks {
    /// Creates an empty callback cache over `registry`
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        SerializationCallbacks {
            registry,
            methods: DashMap::new(),
        }
    }

    /// The methods of `ty` marked for `kind`, in the order they are raised
    #[must_use]
    pub fn methods(&self, ty: &RtTypeRc, kind: CallbackKind) -> Arc<Vec<MethodRc>> {
        let key = (ty.token, kind);
        if let Some(cached) = self.methods.get(&key) {
            return cached.clone();
        }
        let discovered = Arc::new(self.discover(ty, kind));
        tracing::trace!(
            ty = %ty.full_name(),
            %kind,
            methods = discovered.len(),
            "discovered deserialization callbacks"
        );
        self.methods.entry(key).or_insert(discovered).clone()
    }

    fn discover(&self, ty: &RtTypeRc, kind: CallbackKind) -> Vec<MethodRc> {
        let marker = kind.marker(&self.registry);
        let mut chain = ty.hierarchy();
        if kind == CallbackKind::Deserializing {
            chain.reverse();
        }

        let mut found: Vec<MethodRc> = Vec::new();
        for declaring in chain {
            for (_, method) in declaring.methods.iter() {
                if method.is_static() || found.iter().any(|known| known.token == method.token) {
                    continue;
                }
                let marked = method.custom_attributes.iter().any(|(_, attribute)| {
                    attribute
                        .attribute_type()
                        .is_some_and(|attribute_type| attribute_type.token == marker.token)
                });
                if marked {
                    found.push(method.clone());
                }
            }
        }
        found
    }

    fn raise(&self, runtime: &Runtime, instance: &EmValue, context: &EmValue, kind: CallbackKind) -> Result<()> {
        let ty = runtime.type_of(instance)?;
        for method in self.methods(&ty, kind).iter() {
            let args: Vec<EmValue> = if method.params.is_empty() {
                Vec::new()
            } else {
                vec![context.clone()]
            };
            runtime.invoke(method, instance, &args)?;
        }
        Ok(())
    }

    /// Invokes every `[OnDeserializing]` method of the instance's runtime type, base types first
    ///
    /// # Errors
    /// Propagates failures of the callbacks.
    pub fn raise_on_deserializing(&self, runtime: &Runtime, instance: &EmValue, context: &EmValue) -> Result<()> {
        self.raise(runtime, instance, context, CallbackKind::Deserializing)
    }

    /// Invokes every `[OnDeserialized]` method of the instance's runtime type, most derived
    /// types first
    ///
    /// # Errors
    /// Propagates failures of the callbacks.
    pub fn raise_on_deserialized(&self, runtime: &Runtime, instance: &EmValue, context: &EmValue) -> Result<()> {
        self.raise(runtime, instance, context, CallbackKind::Deserialized)
    }

    /// Calls `IDeserializationCallback.OnDeserialization(sender)` when the instance implements it
    ///
    /// # Errors
    /// Propagates failures of the callback.
    pub fn raise_on_deserialization(&self, runtime: &Runtime, instance: &EmValue, sender: &EmValue) -> Result<()> {
        let core = self.registry.core();
        let ty = runtime.type_of(instance)?;
        if !ty.implements_interface(&core.ideserialization_callback) {
            return Ok(());
        }
        let Some(callback) = core.ideserialization_callback.method_by_name("OnDeserialization") else {
            return Ok(());
        };
        runtime.invoke_virtual(&callback, instance, std::slice::from_ref(sender))?;
        Ok(())
    }

    /// Number of cached (type, kind) entries
    #[must_use]
    pub fn cached(&self) -> usize {
        self.methods.len()
    }
}

impl std::fmt::Debug for SerializationCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializationCallbacks")
            .field("cached", &self.methods.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use strum::IntoEnumIterator;

    use super::*;
    use crate::{
        metadata::{
            customattributes::CustomAttributeValue,
            method::MethodAttributes,
            typesystem::{TypeAttributes, TypeBuilder},
        },
        test::fixtures::registry,
    };

    type Log = Arc<Mutex<Vec<String>>>;

    fn mark(registry: &TypeRegistry, method: &MethodRc, kind: CallbackKind) {
        let marker = kind.marker(registry);
        let constructor = marker.constructors().pop().unwrap();
        registry
            .apply_custom_attribute(
                &method.custom_attributes,
                &constructor,
                &CustomAttributeValue {
                    fixed_args: Vec::new(),
                    named_args: Vec::new(),
                },
            )
            .unwrap();
    }

    fn logging_method(builder: &TypeBuilder<'_>, registry: &TypeRegistry, name: &str, log: &Log) -> MethodRc {
        let core = registry.core();
        let log = log.clone();
        let entry = name.to_string();
        builder
            .native_method(
                name,
                MethodAttributes::private(),
                &core.void,
                &[("context", &core.streaming_context)],
                move |_, _, _| {
                    log.lock().unwrap().push(entry.clone());
                    Ok(EmValue::Void)
                },
            )
            .unwrap()
    }

    /// `Samples.CallbackBase` and `Samples.CallbackDerived`, both with one method per kind
    fn callback_hierarchy(registry: &Arc<TypeRegistry>, log: &Log) -> (RtTypeRc, RtTypeRc) {
        let core = registry.core();
        let module = registry.create_module("Samples", None);

        let base = TypeBuilder::new(registry, &module)
            .with_flags(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
            .class("Samples", "CallbackBase", &core.object)
            .unwrap();
        base.default_constructor(MethodAttributes::public()).unwrap();
        let base_deserializing = logging_method(&base, registry, "BaseDeserializing", log);
        let base_deserialized = logging_method(&base, registry, "BaseDeserialized", log);
        let base = base.build().unwrap();
        mark(registry, &base_deserializing, CallbackKind::Deserializing);
        mark(registry, &base_deserialized, CallbackKind::Deserialized);

        let derived = TypeBuilder::new(registry, &module)
            .with_flags(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
            .class("Samples", "CallbackDerived", &base)
            .unwrap()
            .implements(&core.ideserialization_callback)
            .unwrap();
        derived.default_constructor(MethodAttributes::public()).unwrap();
        let derived_deserializing = logging_method(&derived, registry, "DerivedDeserializing", log);
        let derived_deserialized = logging_method(&derived, registry, "DerivedDeserialized", log);
        let sender_log = log.clone();
        derived
            .native_method(
                "OnDeserialization",
                MethodAttributes::public().virtual_().new_slot(),
                &core.void,
                &[("sender", &core.object)],
                move |_, _, args| {
                    sender_log
                        .lock()
                        .unwrap()
                        .push(format!("OnDeserialization({})", args[0]));
                    Ok(EmValue::Void)
                },
            )
            .unwrap();
        let derived = derived.build().unwrap();
        mark(registry, &derived_deserializing, CallbackKind::Deserializing);
        mark(registry, &derived_deserialized, CallbackKind::Deserialized);

        (base, derived)
    }

    #[test]
    fn test_callback_order_follows_runtime_type() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let log: Log = Arc::default();
        let (_, derived) = callback_hierarchy(&registry, &log);
        let callbacks = SerializationCallbacks::new(registry.clone());

        let instance = runtime.create_instance(&derived, &[]).unwrap();
        let context = runtime.streaming_context(0);
        callbacks.raise_on_deserializing(&runtime, &instance, &context).unwrap();
        callbacks.raise_on_deserialized(&runtime, &instance, &context).unwrap();
        callbacks
            .raise_on_deserialization(&runtime, &instance, &EmValue::from("formatter"))
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "BaseDeserializing",
                "DerivedDeserializing",
                "DerivedDeserialized",
                "BaseDeserialized",
                "OnDeserialization(formatter)",
            ]
        );
    }

    #[test]
    fn test_methods_are_cached_per_type_and_kind() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let log: Log = Arc::default();
        let (base, derived) = callback_hierarchy(&registry, &log);
        let callbacks = SerializationCallbacks::new(registry.clone());

        for kind in CallbackKind::iter() {
            let first = callbacks.methods(&derived, kind);
            let second = callbacks.methods(&derived, kind);
            assert!(Arc::ptr_eq(&first, &second));
            assert_eq!(first.len(), 2);
            assert_eq!(callbacks.methods(&base, kind).len(), 1);
        }
        assert_eq!(callbacks.cached(), 4);

        let instance = runtime.create_instance(&base, &[]).unwrap();
        callbacks
            .raise_on_deserialization(&runtime, &instance, &EmValue::Null)
            .unwrap();
        assert!(log.lock().unwrap().is_empty());
    }
}
