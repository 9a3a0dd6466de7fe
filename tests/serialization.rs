//! Integration tests for the serialization members of generated types.
//!
//! Generated subtypes of host-authored documents are written through the
//! [`ObjectFormatter`] and restored again, covering both a base that implements
//! `ISerializable` and one that relies on field-wise serialization.

use std::sync::Arc;

use dotweave::{
    prelude::*,
    serialization::{base_get_object_data_call, DESERIALIZATION_CONSTRUCTOR_MESSAGE},
    Result,
};

/// `Docs.Document`: serializable, implements `ISerializable`, stores its title under "title"
fn document_type(registry: &Arc<TypeRegistry>) -> Result<RtTypeRc> {
    let core = registry.core();
    let module = registry.create_module("Docs", None);
    let [info, context] = core.serialization_signature();
    let builder = TypeBuilder::new(registry, &module)
        .with_flags(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
        .class("Docs", "Document", &core.object)?
        .implements(&core.iserializable)?;
    let title = builder.field("_title", &core.string, FieldAttributes::PRIVATE)?;
    builder.storing_constructor(
        MethodAttributes::public(),
        &core.void,
        &[("title", &core.string)],
        vec![title.clone()],
    )?;

    let restore = title.clone();
    builder.native_constructor(
        MethodAttributes::protected(),
        &core.void,
        &[("info", &info), ("context", &context)],
        move |runtime, this, args| {
            let value = runtime.get_serialization_value(&args[0], "title")?;
            runtime.store_field(this, &restore, value)?;
            Ok(EmValue::Void)
        },
    )?;
    builder.native_method(
        "GetObjectData",
        MethodAttributes::public().virtual_().new_slot(),
        &core.void,
        &[("info", &info), ("context", &context)],
        move |runtime, this, args| {
            let value = runtime.load_field(this, &title)?;
            runtime.add_serialization_value(&args[0], "title".to_string(), value)?;
            Ok(EmValue::Void)
        },
    )?;
    builder.build()
}

/// `Docs.Draft`: serializable through its fields only
fn draft_type(registry: &Arc<TypeRegistry>) -> Result<RtTypeRc> {
    let core = registry.core();
    let module = registry.create_module("Docs", None);
    let builder = TypeBuilder::new(registry, &module)
        .with_flags(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
        .class("Docs", "Draft", &core.object)?;
    let text = builder.field("_text", &core.string, FieldAttributes::PRIVATE)?;
    builder.storing_constructor(
        MethodAttributes::public(),
        &core.void,
        &[("text", &core.string)],
        vec![text],
    )?;
    builder.build()
}

#[test]
fn test_generated_subtype_delegates_to_serializable_base() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let runtime = Runtime::new(registry.clone());
    let document = document_type(&registry)?;
    let title = document.field_by_name("_title").unwrap();
    let scope = ModuleScope::new(registry.clone());

    let mut emitter = scope.create_type(
        "Generated.TrackedDocument",
        &document,
        &[],
        TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE,
        SigningPolicy::Inherit,
    )?;
    implement_get_object_data_by_delegation(&mut emitter, |emitter, _, base_serializable| {
        assert!(base_serializable);
        base_get_object_data_call(emitter).map(Some)
    })?;
    let replicated = implement_deserialization_constructor(
        &mut emitter,
        DeserializationConstructorPolicy::ReplicateFromBase,
    )?;
    assert!(replicated.is_none());
    emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))?;
    let tracked = emitter.build_type()?;

    let formatter = ObjectFormatter::new(registry.clone());
    let instance = runtime.create_instance(&tracked, &[EmValue::from("Minutes")])?;
    let data = formatter.serialize(&runtime, &instance)?;
    assert_eq!(data.type_name, "Generated.TrackedDocument");
    assert_eq!(data.get("title"), Some(&EmValue::from("Minutes")));
    assert_eq!(data.entries.len(), 1);

    let restored = formatter.deserialize(&runtime, &data)?;
    assert_eq!(runtime.type_of(&restored)?.full_name(), "Generated.TrackedDocument");
    assert_eq!(runtime.load_field(&restored, &title)?, EmValue::from("Minutes"));
    Ok(())
}

#[test]
fn test_generated_subtype_of_field_wise_base() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let core = registry.core();
    let runtime = Runtime::new(registry.clone());
    let draft = draft_type(&registry)?;
    let scope = ModuleScope::new(registry.clone());

    let mut emitter = scope.create_type(
        "Generated.NumberedDraft",
        &draft,
        &[],
        TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE,
        SigningPolicy::Weak,
    )?;
    let number = emitter.create_field("_number", &core.int32, FieldAttributes::PUBLIC)?;
    let add_value = core.serialization_info.method_by_name("AddValue").unwrap();
    implement_get_object_data_by_delegation(&mut emitter, |_, _, base_serializable| {
        assert!(!base_serializable);
        Ok(Some(Expression::call(
            Some(Expression::argument(0)),
            &add_value,
            vec![Expression::constant("number"), Expression::this_field(&number)],
        )))
    })?;
    implement_deserialization_constructor(&mut emitter, DeserializationConstructorPolicy::Throw)?;
    emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))?;
    let numbered = emitter.build_type()?;
    assert!(numbered.implements_interface(&core.iserializable));

    let instance = runtime.create_instance(&numbered, &[EmValue::from("text")])?;
    runtime.store_field(&instance, &number, EmValue::I32(12))?;

    let formatter = ObjectFormatter::new(registry.clone());
    let data = formatter.serialize(&runtime, &instance)?;
    assert_eq!(data.get("number"), Some(&EmValue::I32(12)));

    let err = formatter.deserialize(&runtime, &data).unwrap_err();
    let exception = err.as_exception().unwrap();
    assert_eq!(exception.type_name, "System.NotImplementedException");
    assert_eq!(exception.message, DESERIALIZATION_CONSTRUCTOR_MESSAGE);
    Ok(())
}

#[test]
fn test_get_object_data_is_protocol_checked() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let core = registry.core();
    let module = registry.create_module("Docs", None);
    let [info, context] = core.serialization_signature();
    let builder = TypeBuilder::new(&registry, &module)
        .with_flags(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
        .class("Docs", "Locked", &core.object)?
        .implements(&core.iserializable)?;
    builder.default_constructor(MethodAttributes::public())?;
    builder.native_constructor(
        MethodAttributes::protected(),
        &core.void,
        &[("info", &info), ("context", &context)],
        |_, _, _| Ok(EmValue::Void),
    )?;
    builder.native_method(
        "GetObjectData",
        MethodAttributes::public(),
        &core.void,
        &[("info", &info), ("context", &context)],
        |_, _, _| Ok(EmValue::Void),
    )?;
    let locked = builder.build()?;

    let scope = ModuleScope::new(registry.clone());
    let mut emitter = scope.create_type(
        "Generated.Locked",
        &locked,
        &[],
        TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE,
        SigningPolicy::Weak,
    )?;
    assert!(matches!(
        implement_get_object_data_by_delegation(&mut emitter, |_, _, _| Ok(None)),
        Err(Error::SerializationSetup(_))
    ));
    Ok(())
}
