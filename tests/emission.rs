//! Integration tests for type emission.
//!
//! These tests emit complete types against host-authored bases and interfaces and run them
//! through the interpreted runtime: interface implementation, control flow in emitted bodies,
//! attribute replication across modules and persisted module images.

use std::sync::{Arc, Mutex};

use dotweave::{
    emit::{persist::load_image, AttributeTarget},
    metadata::identity::{HashAlgorithm, Identity},
    prelude::*,
    Result,
};

/// `Catalog.ILabelled` with a single `Label(string) -> string` method
fn labelled_interface(registry: &Arc<TypeRegistry>) -> Result<RtTypeRc> {
    let core = registry.core();
    let module = registry.create_module("Catalog", None);
    let builder = TypeBuilder::new(registry, &module).interface("Catalog", "ILabelled")?;
    builder.abstract_method(
        "Label",
        MethodAttributes::public().virtual_().abstract_().new_slot(),
        &core.string,
        &[("prefix", &core.string)],
    )?;
    builder.build()
}

#[test]
fn test_interface_implementation_with_control_flow() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let core = registry.core();
    let runtime = Runtime::new(registry.clone());
    let labelled = labelled_interface(&registry)?;
    let label = labelled.method_by_name("Label").unwrap();
    let scope = ModuleScope::new(registry.clone());

    let mut emitter = scope.create_type(
        "Generated.Item",
        &core.object,
        &[],
        TypeAttributes::PUBLIC,
        SigningPolicy::Weak,
    )?;
    let handle = emitter.create_public_interface_method_implementation(&label)?;
    emitter.method_mut(handle)?
        .add_statement(Statement::when(
            Expression::argument(0).is_null(),
            vec![Statement::ret(Expression::constant("unlabelled"))],
        ))?
        .add_statement(Statement::ret(Expression::argument(0)))?;
    emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))?;
    let item = emitter.build_type()?;

    assert!(item.implements_interface(&labelled));
    let instance = runtime.create_instance(&item, &[])?;
    assert_eq!(
        runtime.invoke_virtual(&label, &instance, &[EmValue::Null])?,
        EmValue::from("unlabelled")
    );
    assert_eq!(
        runtime.invoke_virtual(&label, &instance, &[EmValue::from("tea")])?,
        EmValue::from("tea")
    );
    Ok(())
}

#[test]
fn test_finally_runs_when_body_throws() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let core = registry.core();
    let runtime = Runtime::new(registry.clone());
    let scope = ModuleScope::new(registry.clone());

    let mut emitter = scope.create_type(
        "Generated.Guarded",
        &core.object,
        &[],
        TypeAttributes::PUBLIC,
        SigningPolicy::Weak,
    )?;
    let cleaned = emitter.create_field("_cleaned", &core.boolean, FieldAttributes::PUBLIC)?;
    let run = emitter.create_method("Run", MethodAttributes::public(), &core.void, &[])?;
    emitter.method_mut(run)?.add_statement(Statement::try_finally(
        vec![Statement::throw(&core.invalid_operation_exception, "failed")],
        vec![Statement::assign(
            Reference::this_field(&cleaned),
            Expression::constant(true),
        )?],
    ))?;
    emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))?;
    let guarded = emitter.build_type()?;

    let instance = runtime.create_instance(&guarded, &[])?;
    let err = runtime.invoke_by_name(&instance, "Run", &[]).unwrap_err();
    let exception = err.as_exception().unwrap();
    assert_eq!(exception.type_name, "System.InvalidOperationException");
    assert_eq!(exception.message, "failed");
    assert_eq!(runtime.load_field(&instance, &cleaned)?, EmValue::Bool(true));
    Ok(())
}

#[test]
fn test_replicated_callback_attribute_is_honored() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let core = registry.core();
    let runtime = Runtime::new(registry.clone());
    let scope = ModuleScope::new(registry.clone());

    let log: Arc<Mutex<Vec<String>>> = Arc::default();
    let module = registry.create_module("Catalog", None);
    let builder = TypeBuilder::new(&registry, &module)
        .with_flags(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
        .class("Catalog", "Entry", &core.object)?;
    builder.default_constructor(MethodAttributes::public())?;
    let entries = log.clone();
    let restored = builder.native_method(
        "Restored",
        MethodAttributes::public(),
        &core.void,
        &[("context", &core.streaming_context)],
        move |_, _, _| {
            entries.lock().unwrap().push("Restored".to_string());
            Ok(EmValue::Void)
        },
    )?;
    let entry = builder.build()?;
    let marker = core.on_deserialized_attribute.constructors().pop().unwrap();
    registry.apply_custom_attribute(
        &restored.custom_attributes,
        &marker,
        &CustomAttributeValue {
            fixed_args: Vec::new(),
            named_args: Vec::new(),
        },
    )?;

    let mut emitter = scope.create_type(
        "Generated.Entry",
        &entry,
        &[],
        TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE,
        SigningPolicy::Weak,
    )?;
    let handle = emitter.create_method(
        "AfterLoad",
        MethodAttributes::private(),
        &core.void,
        &[("context", &core.streaming_context)],
    )?;
    emitter.method_mut(handle)?.add_statement(Statement::ret_void())?;
    let after_load = emitter.method(handle)?.method().clone();
    let replicator = AttributeReplicator::new(registry.clone());
    let copied = replicator.replicate(&restored.custom_attributes, AttributeTarget::Method(&after_load))?;
    assert_eq!(copied.len(), 1);
    emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))?;
    let generated = emitter.build_type()?;

    let callbacks = SerializationCallbacks::new(registry.clone());
    let methods = callbacks.methods(&generated, dotweave::serialization::CallbackKind::Deserialized);
    let names: Vec<&str> = methods.iter().map(|method| method.name.as_str()).collect();
    assert_eq!(names, vec!["AfterLoad", "Restored"]);

    let instance = runtime.create_instance(&generated, &[])?;
    callbacks.raise_on_deserialized(&runtime, &instance, &runtime.streaming_context(0))?;
    assert_eq!(*log.lock().unwrap(), vec!["Restored"]);
    Ok(())
}

#[test]
fn test_persisted_images_list_generated_types() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let core = registry.core();
    let directory = tempfile::tempdir()?;
    let scope = ModuleScope::with_config(
        registry.clone(),
        ModuleScopeConfig::persistent(directory.path()),
    );

    let mut emitter = scope.create_type(
        "Generated.Signed",
        &core.object,
        &[],
        TypeAttributes::PUBLIC,
        SigningPolicy::Strong,
    )?;
    emitter.create_field("_state", &core.int32, FieldAttributes::PRIVATE)?;
    let to_string = core.object.method_by_name("ToString").unwrap();
    let handle = emitter.create_method_override(&to_string)?;
    emitter
        .method_mut(handle)?
        .implement_by_returning(Expression::constant("signed"))?;
    emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))?;
    emitter.build_type()?;

    let paths = scope.save_modules()?;
    assert_eq!(paths.len(), 1);
    let image = load_image(&paths[0])?;
    assert_eq!(image.name, scope.config().strong_module_name);

    let identity = Identity::PubKey(scope.config().public_key.clone());
    let token = identity.to_token(HashAlgorithm::Sha1)?;
    let expected = format!("{token:016x}");
    assert_eq!(image.public_key_token.as_deref(), Some(expected.as_str()));
    assert_ne!(identity.to_token(HashAlgorithm::Md5)?, token);

    let ty = image.type_named("Generated.Signed").unwrap();
    assert_eq!(ty.fields, vec!["_state"]);
    assert!(ty.methods.iter().any(|method| method.starts_with("ToString ")));
    Ok(())
}
