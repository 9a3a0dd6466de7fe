//! Serialization members of generated types.
//!
//! Generated subtypes either extend a base that already takes part in the serialization
//! protocol, in which case its `GetObjectData` is overridden and its deserialization
//! constructor can be replicated, or they introduce `ISerializable` themselves. All checks on
//! the base happen while the member is emitted, not on the first serialization attempt.

use crate::{
    emit::{
        body::{Expression, Statement},
        MethodHandle, TypeEmitter,
    },
    metadata::{
        method::{MethodAttributes, MethodRc, CONSTRUCTOR_NAME},
        typesystem::RtTypeRc,
    },
    Error, Result,
};

/// Message of the exception thrown by [`implement_deserialization_constructor_by_throwing`]
pub const DESERIALIZATION_CONSTRUCTOR_MESSAGE: &str = "The deserialization constructor of a \
    generated type is never called, instances are reconstructed through an object reference.";

/// How a generated type gets its `(SerializationInfo, StreamingContext)` constructor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeserializationConstructorPolicy {
    /// Always add a constructor that throws
    Throw,
    /// Replicate the base constructor when it exists and is accessible, otherwise throw
    #[default]
    ReplicateFromBase,
}

/// Does the base of `emitter` implement `ISerializable`
#[must_use]
pub fn base_is_serializable(emitter: &TypeEmitter) -> bool {
    let core = emitter.registry().core();
    emitter.base_type().implements_interface(&core.iserializable)
}

/// The `GetObjectData` implementation a generated type can override and call
fn base_get_object_data(base: &RtTypeRc, signature: &[RtTypeRc]) -> Result<MethodRc> {
    let method = base
        .find_method_in_hierarchy("GetObjectData", signature)
        .filter(|method| !method.is_static())
        .ok_or_else(|| {
            Error::SerializationSetup(format!(
                "{} implements ISerializable but declares no GetObjectData method a subclass can \
                 see; it is probably an explicit interface implementation",
                base.full_name()
            ))
        })?;
    if !method.access().is_visible_to_subclasses() || !method.is_virtual() || method.is_final() {
        return Err(Error::SerializationSetup(format!(
            "{} must be public or protected and virtual to be overridden",
            method.full_name()
        )));
    }
    if method.is_abstract() {
        return Err(Error::SerializationSetup(format!(
            "{} is abstract and cannot be delegated to",
            method.full_name()
        )));
    }
    Ok(method)
}

/// The accessible deserialization constructor of `base`, if any
fn base_deserialization_constructor(base: &RtTypeRc, signature: &[RtTypeRc]) -> Option<MethodRc> {
    base.find_method(CONSTRUCTOR_NAME, signature)
        .filter(|constructor| constructor.access().is_visible_to_subclasses())
}

/// Emits `GetObjectData` and lets `delegation` supply its body.
///
/// With a serializable base the method overrides the base implementation, otherwise
/// `ISerializable` is added and implemented publicly. `delegation` receives the emitter, the
/// handle the method will get and whether the base is serializable; the invocation it returns
/// is emitted as a statement, followed by `return`. Nothing is declared if `delegation` fails.
///
/// # Errors
/// Returns [`Error::SerializationSetup`] when the base is serializable but its `GetObjectData`
/// is not an overridable public or protected method, or it has no accessible deserialization
/// constructor. Errors returned by `delegation` are propagated.
pub fn implement_get_object_data_by_delegation<F>(
    emitter: &mut TypeEmitter,
    delegation: F,
) -> Result<MethodHandle>
where
    F: FnOnce(&TypeEmitter, MethodHandle, bool) -> Result<Option<Expression>>,
{
    let core = emitter.registry().core();
    let signature = core.serialization_signature();
    let iserializable = core.iserializable.clone();
    let interface_method = core
        .get_object_data()
        .ok_or_else(|| Error::MemberNotFound("ISerializable::GetObjectData".to_string()))?;

    let base_serializable = base_is_serializable(emitter);
    let overridden = if base_serializable {
        let base = emitter.base_type().clone();
        let overridden = base_get_object_data(&base, &signature)?;
        if base_deserialization_constructor(&base, &signature).is_none() {
            return Err(Error::SerializationSetup(format!(
                "{} implements ISerializable but has no public or protected deserialization \
                 constructor",
                base.full_name()
            )));
        }
        Some(overridden)
    } else {
        None
    };

    let upcoming = emitter.next_method_handle();
    let invocation = delegation(emitter, upcoming, base_serializable)?;
    let handle = match overridden {
        Some(overridden) => emitter.create_method_override(&overridden)?,
        None => {
            emitter.add_interface(&iserializable)?;
            emitter.create_public_interface_method_implementation(&interface_method)?
        }
    };
    let method = emitter.method_mut(handle)?;
    if let Some(invocation) = invocation {
        method.add_statement(Statement::pop(invocation))?;
    }
    method.add_statement(Statement::ret_void())?;

    tracing::debug!(
        ty = %emitter.name(),
        base_serializable,
        "implemented GetObjectData by delegation"
    );
    Ok(handle)
}

/// Non-virtual call of the base `GetObjectData` forwarding the `info` and `context`
/// arguments of the method it is emitted into
///
/// # Errors
/// Returns [`Error::SerializationSetup`] if the base is not serializable or its
/// `GetObjectData` cannot be called from a subclass.
pub fn base_get_object_data_call(emitter: &TypeEmitter) -> Result<Expression> {
    if !base_is_serializable(emitter) {
        return Err(Error::SerializationSetup(format!(
            "{} does not implement ISerializable, there is no GetObjectData to call",
            emitter.base_type().full_name()
        )));
    }
    let signature = emitter.registry().core().serialization_signature();
    let method = base_get_object_data(emitter.base_type(), &signature)?;
    Ok(Expression::call_non_virtual(
        Some(Expression::this()),
        &method,
        vec![Expression::argument(0), Expression::argument(1)],
    ))
}

/// Adds a public deserialization constructor that throws `NotImplementedException`
///
/// # Errors
/// Returns an error if the type was already built.
pub fn implement_deserialization_constructor_by_throwing(emitter: &mut TypeEmitter) -> Result<MethodHandle> {
    let core = emitter.registry().core();
    let [info, context] = core.serialization_signature();
    let exception = core.not_implemented_exception.clone();

    let handle = emitter.create_constructor(
        MethodAttributes::public(),
        &[("info", &info), ("context", &context)],
    )?;
    emitter
        .method_mut(handle)?
        .implement_by_throwing(&exception, DESERIALIZATION_CONSTRUCTOR_MESSAGE)?;
    Ok(handle)
}

/// Replicates the deserialization constructor of the base, or adds a throwing one.
///
/// Returns the handle of the throwing constructor, or `None` when the base constructor was
/// replicated.
///
/// # Errors
/// Returns an error if the type was already built.
pub fn implement_deserialization_constructor_by_throwing_if_not_exists_on_base(
    emitter: &mut TypeEmitter,
) -> Result<Option<MethodHandle>> {
    let signature = emitter.registry().core().serialization_signature();
    match base_deserialization_constructor(emitter.base_type(), &signature) {
        Some(constructor) => {
            emitter.replicate_constructor(&constructor)?;
            tracing::trace!(
                ty = %emitter.name(),
                base = %constructor.full_name(),
                "replicated deserialization constructor"
            );
            Ok(None)
        }
        None => implement_deserialization_constructor_by_throwing(emitter).map(Some),
    }
}

/// Emits the deserialization constructor selected by `policy`
///
/// # Errors
/// Returns an error if the type was already built.
pub fn implement_deserialization_constructor(
    emitter: &mut TypeEmitter,
    policy: DeserializationConstructorPolicy,
) -> Result<Option<MethodHandle>> {
    match policy {
        DeserializationConstructorPolicy::Throw => {
            implement_deserialization_constructor_by_throwing(emitter).map(Some)
        }
        DeserializationConstructorPolicy::ReplicateFromBase => {
            implement_deserialization_constructor_by_throwing_if_not_exists_on_base(emitter)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        metadata::method::MethodAccessFlags,
        emit::{ModuleScope, SigningPolicy},
        emulation::{EmValue, Runtime},
        metadata::typesystem::{TypeAttributes, TypeBuilder, TypeRegistry},
        test::fixtures::{greeter_type, registry, serializable_base_type},
    };

    fn emitter_for(registry: &Arc<TypeRegistry>, name: &str, base: &RtTypeRc) -> TypeEmitter {
        ModuleScope::new(registry.clone())
            .create_type(
                name,
                base,
                &[],
                TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE,
                SigningPolicy::Weak,
            )
            .unwrap()
    }

    /// `Samples.CountingBase`: serializable, counts `GetObjectData` calls in a host counter
    fn counting_base(registry: &Arc<TypeRegistry>, calls: Arc<AtomicUsize>) -> RtTypeRc {
        let core = registry.core();
        let [info, context] = core.serialization_signature();
        let module = registry.create_module("Samples", None);
        let builder = TypeBuilder::new(registry, &module)
            .class("Samples", "CountingBase", &core.object)
            .unwrap()
            .implements(&core.iserializable)
            .unwrap();
        builder.default_constructor(MethodAttributes::public()).unwrap();
        builder
            .native_constructor(
                MethodAttributes::protected(),
                &core.void,
                &[("info", &info), ("context", &context)],
                |_, _, _| Ok(EmValue::Void),
            )
            .unwrap();
        builder
            .native_method(
                "GetObjectData",
                MethodAttributes::protected().virtual_().new_slot(),
                &core.void,
                &[("info", &info), ("context", &context)],
                move |runtime, _, args| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    runtime.add_serialization_value(&args[0], "base".to_string(), args[1].clone())?;
                    Ok(EmValue::Void)
                },
            )
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_delegation_calls_base_once() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let base = counting_base(&registry, calls.clone());

        let mut emitter = emitter_for(&registry, "Generated.CountingDerived", &base);
        let seen_flag = std::cell::Cell::new(None);
        let handle = implement_get_object_data_by_delegation(&mut emitter, |emitter, _, base_serializable| {
            seen_flag.set(Some(base_serializable));
            base_get_object_data_call(emitter).map(Some)
        })
        .unwrap();
        assert_eq!(seen_flag.get(), Some(true));
        let method = emitter.method(handle).unwrap().method().clone();
        assert_eq!(method.name, "GetObjectData");
        assert_eq!(method.access(), MethodAccessFlags::FAMILY);

        emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(())).unwrap();
        let ty = emitter.build_type().unwrap();

        let instance = runtime.create_instance(&ty, &[]).unwrap();
        let info = runtime.new_serialization_info(&ty).unwrap();
        let context = runtime.streaming_context(7);
        let get_object_data = registry.core().get_object_data().unwrap();
        runtime
            .invoke_virtual(&get_object_data, &instance, &[info.clone(), context.clone()])
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entries = runtime.serialization_entries(&info).unwrap();
        assert_eq!(entries, vec![("base".to_string(), context)]);
    }

    #[test]
    fn test_delegation_without_serializable_base() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let core = registry.core();
        let greeter = greeter_type(&registry);

        let mut emitter = emitter_for(&registry, "Generated.FreshlySerializable", &greeter);
        let handle = implement_get_object_data_by_delegation(&mut emitter, |_, _, base_serializable| {
            assert!(!base_serializable);
            Ok(None)
        })
        .unwrap();
        let method = emitter.method(handle).unwrap().method().clone();
        assert_eq!(method.access(), MethodAccessFlags::PUBLIC);
        assert!(matches!(
            base_get_object_data_call(&emitter),
            Err(Error::SerializationSetup(_))
        ));

        emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(())).unwrap();
        let ty = emitter.build_type().unwrap();
        assert!(ty.implements_interface(&core.iserializable));

        let instance = runtime.create_instance(&ty, &[EmValue::from("Ada")]).unwrap();
        let info = runtime.new_serialization_info(&ty).unwrap();
        runtime
            .invoke_virtual(
                &core.get_object_data().unwrap(),
                &instance,
                &[info.clone(), runtime.streaming_context(0)],
            )
            .unwrap();
        assert!(runtime.serialization_entries(&info).unwrap().is_empty());
    }

    #[test]
    fn test_failed_delegation_declares_nothing() {
        let registry = registry();
        let core = registry.core();
        let greeter = greeter_type(&registry);

        let mut emitter = emitter_for(&registry, "Generated.HalfSerializable", &greeter);
        let err = implement_get_object_data_by_delegation(&mut emitter, |emitter, _, _| {
            base_get_object_data_call(emitter).map(Some)
        })
        .unwrap_err();
        assert!(matches!(err, Error::SerializationSetup(_)));
        assert_eq!(emitter.method_handles().count(), 0);

        emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(())).unwrap();
        let ty = emitter.build_type().unwrap();
        assert!(ty.method_by_name("GetObjectData").is_none());
        assert!(!ty.implements_interface(&core.iserializable));
    }

    #[test]
    fn test_inaccessible_base_members_fail_eagerly() {
        let registry = registry();
        let core = registry.core();
        let [info, context] = core.serialization_signature();
        let module = registry.create_module("Samples", None);

        let sealed_data = TypeBuilder::new(&registry, &module)
            .class("Samples", "NonVirtualData", &core.object)
            .unwrap()
            .implements(&core.iserializable)
            .unwrap();
        sealed_data.default_constructor(MethodAttributes::public()).unwrap();
        sealed_data
            .native_method(
                "GetObjectData",
                MethodAttributes::public()
                    .virtual_()
                    .new_slot()
                    .with(crate::metadata::method::MethodModifiers::FINAL),
                &core.void,
                &[("info", &info), ("context", &context)],
                |_, _, _| Ok(EmValue::Void),
            )
            .unwrap();
        let sealed_data = sealed_data.build().unwrap();
        let mut emitter = emitter_for(&registry, "Generated.FromNonVirtual", &sealed_data);
        assert!(matches!(
            implement_get_object_data_by_delegation(&mut emitter, |_, _, _| Ok(None)),
            Err(Error::SerializationSetup(_))
        ));

        let no_constructor = TypeBuilder::new(&registry, &module)
            .class("Samples", "NoDeserializationConstructor", &core.object)
            .unwrap()
            .implements(&core.iserializable)
            .unwrap();
        no_constructor.default_constructor(MethodAttributes::public()).unwrap();
        no_constructor
            .native_method(
                "GetObjectData",
                MethodAttributes::public().virtual_().new_slot(),
                &core.void,
                &[("info", &info), ("context", &context)],
                |_, _, _| Ok(EmValue::Void),
            )
            .unwrap();
        let no_constructor = no_constructor.build().unwrap();
        let mut emitter = emitter_for(&registry, "Generated.FromNoConstructor", &no_constructor);
        let err = implement_get_object_data_by_delegation(&mut emitter, |_, _, _| Ok(None)).unwrap_err();
        assert!(err.to_string().contains("deserialization constructor"));
    }

    #[test]
    fn test_replicated_deserialization_constructor_restores_state() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let base = serializable_base_type(&registry);

        let mut emitter = emitter_for(&registry, "Generated.ReplicatedDeserialization", &base);
        let added = implement_deserialization_constructor_by_throwing_if_not_exists_on_base(&mut emitter).unwrap();
        assert!(added.is_none());
        let ty = emitter.build_type().unwrap();

        let signature = registry.core().serialization_signature();
        let constructor = ty.find_method(CONSTRUCTOR_NAME, &signature).unwrap();
        assert_eq!(constructor.access(), MethodAccessFlags::PUBLIC);

        let info = runtime.new_serialization_info(&ty).unwrap();
        runtime
            .add_serialization_value(&info, "payload".to_string(), EmValue::from("restored"))
            .unwrap();
        let instance = runtime
            .construct(&constructor, &[info, runtime.streaming_context(0)])
            .unwrap();
        let payload = base.field_by_name("_payload").unwrap();
        assert_eq!(runtime.load_field(&instance, &payload).unwrap(), EmValue::from("restored"));
    }

    #[test]
    fn test_throwing_deserialization_constructor() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let greeter = greeter_type(&registry);

        let mut emitter = emitter_for(&registry, "Generated.ThrowingDeserialization", &greeter);
        let added = implement_deserialization_constructor(
            &mut emitter,
            DeserializationConstructorPolicy::ReplicateFromBase,
        )
        .unwrap();
        assert!(added.is_some());
        let ty = emitter.build_type().unwrap();

        let signature = registry.core().serialization_signature();
        let constructor = ty.find_method(CONSTRUCTOR_NAME, &signature).unwrap();
        let info = runtime.new_serialization_info(&ty).unwrap();
        let err = runtime
            .construct(&constructor, &[info, runtime.streaming_context(0)])
            .unwrap_err();
        let exception = err.as_exception().unwrap();
        assert_eq!(exception.type_name, "System.NotImplementedException");
        assert_eq!(exception.message, DESERIALIZATION_CONSTRUCTOR_MESSAGE);
    }

    #[test]
    fn test_throw_policy_ignores_base_constructor() {
        let registry = registry();
        let base = serializable_base_type(&registry);
        let mut emitter = emitter_for(&registry, "Generated.AlwaysThrowing", &base);
        let added = implement_deserialization_constructor(&mut emitter, DeserializationConstructorPolicy::Throw).unwrap();
        assert!(added.is_some());
    }
}
