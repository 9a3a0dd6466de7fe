//! Integration tests for intercepting subtypes.
//!
//! A host-authored `Shop.Inventory` class is extended through the mixin builder, and the
//! generated type is exercised through the interpreted runtime the way a caller would.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use dotweave::{mixin::MIXIN_NAMESPACE, prelude::*, Result};

/// `Shop.Inventory` with a stock counter, a virtual lookup and a virtual restock method
fn inventory_type(registry: &Arc<TypeRegistry>) -> Result<RtTypeRc> {
    let core = registry.core();
    let module = registry.create_module("Shop", None);
    let builder = TypeBuilder::new(registry, &module).class("Shop", "Inventory", &core.object)?;
    let stock = builder.field("_stock", &core.int32, FieldAttributes::PRIVATE)?;
    builder.storing_constructor(
        MethodAttributes::public(),
        &core.void,
        &[("stock", &core.int32)],
        vec![stock.clone()],
    )?;

    let count_field = stock.clone();
    builder.native_method(
        "Count",
        MethodAttributes::public().virtual_().new_slot(),
        &core.int32,
        &[("item", &core.string)],
        move |runtime, this, _| runtime.load_field(this, &count_field),
    )?;

    let restock_field = stock;
    builder.native_method(
        "Restock",
        MethodAttributes::public().virtual_().new_slot(),
        &core.void,
        &[("amount", &core.int32)],
        move |runtime, this, args| {
            let current = runtime.load_field(this, &restock_field)?.as_i64().unwrap_or_default();
            let amount = args[0].as_i64().unwrap_or_default();
            runtime.store_field(this, &restock_field, EmValue::I32((current + amount) as i32))?;
            Ok(EmValue::Void)
        },
    )?;
    builder.build()
}

#[test]
fn test_mixin_wraps_host_type() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let runtime = Runtime::new(registry.clone());
    let inventory = inventory_type(&registry)?;
    let count = inventory.method_by_name("Count").unwrap();
    let restock = inventory.method_by_name("Restock").unwrap();

    let scope = ModuleScope::new(registry.clone());
    let mixin = MixinBuilder::new(&scope, &inventory)
        .with_name("Shop.AuditedInventory")
        .override_method(&count)?
        .override_method(&restock)?
        .build()?;

    assert!(mixin.ty().is_subclass_of(&inventory));
    assert_eq!(mixin.overridden_methods().len(), 2);

    let audit: Arc<Mutex<Vec<String>>> = Arc::default();
    let log = audit.clone();
    let instance = mixin.create_instance(
        &runtime,
        move |runtime, invocation| {
            log.lock().unwrap().push(format!(
                "{}({})",
                invocation.method.name,
                invocation
                    .arguments
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            invocation.proceed(runtime)
        },
        &[EmValue::I32(3)],
    )?;

    assert!(runtime.is_instance_of(&instance, &inventory));
    runtime.invoke_virtual(&restock, &instance, &[EmValue::I32(4)])?;
    assert_eq!(
        runtime.invoke_virtual(&count, &instance, &[EmValue::from("apples")])?,
        EmValue::I32(7)
    );
    assert_eq!(*audit.lock().unwrap(), vec!["Restock(4)", "Count(apples)"]);
    Ok(())
}

#[test]
fn test_handler_can_short_circuit() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let runtime = Runtime::new(registry.clone());
    let inventory = inventory_type(&registry)?;
    let count = inventory.method_by_name("Count").unwrap();

    let scope = ModuleScope::new(registry.clone());
    let mixin = MixinBuilder::new(&scope, &inventory).override_method(&count)?.build()?;

    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    let instance = mixin.create_instance(
        &runtime,
        move |_, invocation| {
            seen.fetch_add(1, Ordering::SeqCst);
            if invocation.arguments[0] == EmValue::from("unknown") {
                return Ok(EmValue::I32(-1));
            }
            Ok(EmValue::I32(0))
        },
        &[EmValue::I32(10)],
    )?;

    assert_eq!(
        runtime.invoke_virtual(&count, &instance, &[EmValue::from("unknown")])?,
        EmValue::I32(-1)
    );
    assert_eq!(
        runtime.invoke_virtual(&count, &instance, &[EmValue::from("pears")])?,
        EmValue::I32(0)
    );
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_host_types_are_shared_between_mixins() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let inventory = inventory_type(&registry)?;
    let count = inventory.method_by_name("Count").unwrap();
    let scope = ModuleScope::new(registry.clone());

    MixinBuilder::new(&scope, &inventory)
        .with_name("Shop.First")
        .override_method(&count)?
        .build()?;
    MixinBuilder::new(&scope, &inventory)
        .with_name("Shop.Second")
        .override_method(&count)?
        .build()?;

    let handler_name = format!("{}.InvocationHandler", MIXIN_NAMESPACE);
    assert_eq!(registry.get_by_fullname(&handler_name).len(), 1);
    Ok(())
}

#[test]
fn test_sealed_target_is_rejected() -> Result<()> {
    let registry = TypeRegistry::new()?;
    let core = registry.core();
    let module = registry.create_module("Shop", None);
    let sealed = TypeBuilder::new(&registry, &module)
        .with_flags(TypeAttributes::PUBLIC | TypeAttributes::SEALED)
        .class("Shop", "Receipt", &core.object)?
        .build()?;
    let scope = ModuleScope::new(registry.clone());

    assert!(matches!(
        MixinBuilder::new(&scope, &sealed).build(),
        Err(Error::ShapeViolation(_))
    ));
    Ok(())
}
