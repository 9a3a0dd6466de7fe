//! Benchmarks for type emission and intercepted dispatch.
//!
//! - Emitting and building a subtype with an override and replicated constructors
//! - Building a mixin over a host type
//! - Calling an intercepted method through the interpreted runtime, compared to a plain call

extern crate dotweave;

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, Criterion};
use dotweave::prelude::*;

fn host_type(registry: &Arc<TypeRegistry>) -> RtTypeRc {
    let core = registry.core();
    let module = registry.create_module("Bench", None);
    let builder = TypeBuilder::new(registry, &module)
        .class("Bench", "Service", &core.object)
        .unwrap();
    builder.default_constructor(MethodAttributes::public()).unwrap();
    builder
        .native_method(
            "Handle",
            MethodAttributes::public().virtual_().new_slot(),
            &core.int32,
            &[("request", &core.int32)],
            |_, _, args| Ok(args[0].clone()),
        )
        .unwrap();
    builder.build().unwrap()
}

fn bench_emit_type(c: &mut Criterion) {
    let registry = TypeRegistry::new().unwrap();
    let service = host_type(&registry);
    let handle_method = service.method_by_name("Handle").unwrap();
    let scope = ModuleScope::new(registry.clone());
    let mut counter = 0usize;

    c.bench_function("emit_override_type", |b| {
        b.iter(|| {
            counter += 1;
            let mut emitter = scope
                .create_type(
                    &format!("Generated.Service{counter}"),
                    &service,
                    &[],
                    TypeAttributes::PUBLIC,
                    SigningPolicy::Weak,
                )
                .unwrap();
            let handle = emitter.create_method_override(&handle_method).unwrap();
            emitter
                .method_mut(handle)
                .unwrap()
                .implement_by_returning(Expression::argument(0))
                .unwrap();
            emitter
                .replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))
                .unwrap();
            black_box(emitter.build_type().unwrap())
        });
    });
}

fn bench_build_mixin(c: &mut Criterion) {
    let registry = TypeRegistry::new().unwrap();
    let service = host_type(&registry);
    let handle_method = service.method_by_name("Handle").unwrap();
    let scope = ModuleScope::new(registry.clone());
    let mut counter = 0usize;

    c.bench_function("build_mixin", |b| {
        b.iter(|| {
            counter += 1;
            let mixin = MixinBuilder::new(&scope, &service)
                .with_name(&format!("Generated.Mixin{counter}"))
                .override_method(&handle_method)
                .unwrap()
                .build()
                .unwrap();
            black_box(mixin)
        });
    });
}

fn bench_intercepted_call(c: &mut Criterion) {
    let registry = TypeRegistry::new().unwrap();
    let runtime = Runtime::new(registry.clone());
    let service = host_type(&registry);
    let handle_method = service.method_by_name("Handle").unwrap();
    let scope = ModuleScope::new(registry.clone());
    let mixin = MixinBuilder::new(&scope, &service)
        .override_method(&handle_method)
        .unwrap()
        .build()
        .unwrap();

    let plain = runtime.create_instance(&service, &[]).unwrap();
    let intercepted = mixin
        .create_instance(&runtime, |runtime, invocation| invocation.proceed(runtime), &[])
        .unwrap();
    let args = [EmValue::I32(7)];

    let mut group = c.benchmark_group("dispatch");
    group.bench_function("plain", |b| {
        b.iter(|| {
            black_box(
                runtime
                    .invoke_virtual(&handle_method, black_box(&plain), &args)
                    .unwrap(),
            )
        });
    });
    group.bench_function("intercepted", |b| {
        b.iter(|| {
            black_box(
                runtime
                    .invoke_virtual(&handle_method, black_box(&intercepted), &args)
                    .unwrap(),
            )
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_emit_type,
    bench_build_mixin,
    bench_intercepted_call
);
criterion_main!(benches);
