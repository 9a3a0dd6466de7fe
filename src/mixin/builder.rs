//! Builds intercepting subtypes of a target type.

use std::sync::Arc;

use crate::{
    emit::{
        body::{new_delegate, Expression, Reference, Statement},
        ModuleScope, SigningPolicy,
    },
    emulation::{EmValue, Runtime},
    metadata::{
        method::{MethodAttributes, MethodRc},
        typesystem::{FieldAttributes, RtTypeRc, TypeAttributes},
    },
    mixin::{Invocation, InvocationHandler, MixinHostTypes},
    Result,
};

/// Prefix of the private helpers that call the base implementation
pub const BASE_CALL_PREFIX: &str = "__base__";
/// Name of the field holding the invocation handler
pub const HANDLER_FIELD_NAME: &str = "__handler";

/// Collects the methods of a target type to intercept and emits the subtype.
///
/// ```rust,no_run
/// use dotweave::emit::ModuleScope;
/// use dotweave::emulation::{EmValue, Runtime};
/// use dotweave::metadata::typesystem::TypeRegistry;
/// use dotweave::mixin::MixinBuilder;
///
/// let registry = TypeRegistry::new()?;
/// let target = registry.lookup("System.Object")?;
/// let to_string = target.method_by_name("ToString").unwrap();
///
/// let scope = ModuleScope::new(registry.clone());
/// let mixin = MixinBuilder::new(&scope, &target)
///     .override_method(&to_string)?
///     .build()?;
///
/// let runtime = Runtime::new(registry);
/// let instance = mixin.create_instance(&runtime, |_, _| Ok(EmValue::from("intercepted")), &[])?;
/// assert_eq!(runtime.invoke_virtual(&to_string, &instance, &[])?, EmValue::from("intercepted"));
/// # Ok::<(), dotweave::Error>(())
/// ```
pub struct MixinBuilder<'a> {
    scope: &'a ModuleScope,
    target: RtTypeRc,
    name: String,
    flags: TypeAttributes,
    policy: SigningPolicy,
    overrides: Vec<MethodRc>,
}

impl<'a> MixinBuilder<'a> {
    /// Starts a mixin of `target` named `{Target}_Mixin`
    #[must_use]
    pub fn new(scope: &'a ModuleScope, target: &RtTypeRc) -> Self {
        MixinBuilder {
            scope,
            target: target.clone(),
            name: format!("{}_Mixin", target.full_name()),
            flags: TypeAttributes::PUBLIC,
            policy: SigningPolicy::Inherit,
            overrides: Vec::new(),
        }
    }

    /// Sets the full name of the generated type
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Sets the type attributes of the generated type
    #[must_use]
    pub fn with_flags(mut self, flags: TypeAttributes) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the module the generated type goes into
    #[must_use]
    pub fn with_signing_policy(mut self, policy: SigningPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Intercepts `method`. Adding a method twice has no further effect.
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if `method` is not declared directly on the
    /// target type, is not an overridable virtual method, or is a generic method definition.
    pub fn override_method(mut self, method: &MethodRc) -> Result<Self> {
        let declaring = method.owner()?;
        if declaring.token != self.target.token
            && declaring.token != self.target.definition_token()
        {
            return Err(shape_error!(
                "{} is not declared on the target type {}",
                method.full_name(),
                self.target.full_name()
            ));
        }
        if method.is_static() || !method.is_virtual() || method.is_final() || method.is_constructor() {
            return Err(shape_error!(
                "{} is not virtual and cannot be intercepted",
                method.full_name()
            ));
        }
        if method.is_generic_method_definition() {
            return Err(shape_error!(
                "{} is a generic method definition, which cannot be intercepted",
                method.full_name()
            ));
        }
        if !self.overrides.iter().any(|known| known.token == method.token) {
            self.overrides.push(method.clone());
        }
        Ok(self)
    }

    /// The methods intercepted so far
    #[must_use]
    pub fn overrides(&self) -> &[MethodRc] {
        &self.overrides
    }

    /// Emits and builds the mixin type
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the target cannot be derived from or has no
    /// accessible constructor, and [`crate::Error::ProtocolViolation`] if an intercepted
    /// method is abstract.
    #[tracing::instrument(level = "debug", skip_all, fields(target = %self.target.full_name()))]
    pub fn build(self) -> Result<MixinType> {
        if let Some(method) = self.overrides.iter().find(|method| method.is_abstract()) {
            return Err(protocol_error!(
                "Cannot call abstract base method {}, it has no body",
                method.full_name()
            ));
        }

        let registry = self.scope.registry().clone();
        let host = MixinHostTypes::resolve(&registry)?;
        let core = registry.core();

        let mut emitter = self.scope.create_type(&self.name, &self.target, &[], self.flags, self.policy)?;
        let handler_field = emitter.create_field(
            HANDLER_FIELD_NAME,
            &host.handler,
            FieldAttributes::PRIVATE | FieldAttributes::INIT_ONLY,
        )?;

        for method in &self.overrides {
            let params: Vec<(&str, &RtTypeRc)> = method
                .params
                .iter()
                .map(|param| (param.name.as_str(), &param.param_type))
                .collect();

            let helper = emitter.create_method(
                &format!("{}{}", BASE_CALL_PREFIX, method.name),
                MethodAttributes::private(),
                &method.return_type,
                &params,
            )?;
            let helper = emitter
                .method_mut(helper)?
                .implement_by_base_call(method)?
                .method()
                .clone();

            let handle = emitter.create_method_override(method)?;
            let arguments = emitter.method(handle)?.argument_expressions();
            let call = Expression::call(
                Some(Expression::this_field(&handler_field)),
                &host.invoke,
                vec![
                    Expression::this(),
                    Expression::method_of(method),
                    Expression::new_array(&core.object, arguments),
                    new_delegate(&registry, &host.base_call, Expression::this(), &helper, false)?,
                ],
            );

            let body = emitter.method_mut(handle)?;
            if method.returns_void() {
                body.add_statement(Statement::pop(call))?;
                body.add_statement(Statement::ret_void())?;
            } else {
                body.add_statement(Statement::ret(call.cast(&method.return_type)))?;
            }
        }

        let store_handler = handler_field.clone();
        emitter.replicate_base_type_constructors_with_leading_parameters(
            &[("handler", &host.handler)],
            move |constructor| {
                constructor.add_statement(Statement::assign(
                    Reference::this_field(&store_handler),
                    Expression::argument(0),
                )?)?;
                Ok(())
            },
            |_| Ok(()),
        )?;

        let ty = emitter.build_type()?;
        tracing::debug!(
            ty = %ty.full_name(),
            overrides = self.overrides.len(),
            "built mixin type"
        );
        Ok(MixinType {
            ty,
            host,
            overrides: self.overrides,
        })
    }
}

/// A built mixin type
#[derive(Debug)]
pub struct MixinType {
    ty: RtTypeRc,
    host: MixinHostTypes,
    overrides: Vec<MethodRc>,
}

impl MixinType {
    /// The generated type
    #[must_use]
    pub fn ty(&self) -> &RtTypeRc {
        &self.ty
    }

    /// The intercepted methods of the target type
    #[must_use]
    pub fn overridden_methods(&self) -> &[MethodRc] {
        &self.overrides
    }

    /// Wraps `handler` into an `InvocationHandler` object for the generated constructors
    #[must_use]
    pub fn create_handler<F>(&self, handler: F) -> EmValue
    where
        F: Fn(&Runtime, &Invocation) -> Result<EmValue> + Send + Sync + 'static,
    {
        let handler: InvocationHandler = Arc::new(handler);
        self.host.new_handler(handler)
    }

    /// Creates an instance whose intercepted calls go to `handler`; `args` select the
    /// replicated base constructor
    ///
    /// # Errors
    /// Returns [`crate::Error::MemberNotFound`] if no constructor accepts `args`, and
    /// propagates failures of the constructor.
    pub fn create_instance<F>(&self, runtime: &Runtime, handler: F, args: &[EmValue]) -> Result<EmValue>
    where
        F: Fn(&Runtime, &Invocation) -> Result<EmValue> + Send + Sync + 'static,
    {
        let mut arguments = Vec::with_capacity(args.len() + 1);
        arguments.push(self.create_handler(handler));
        arguments.extend_from_slice(args);
        runtime.create_instance(&self.ty, &arguments)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::*;
    use crate::{
        emit::ModuleScope,
        metadata::typesystem::TypeBuilder,
        test::fixtures::{calculator_type, greeter_type, registry},
        Error,
    };

    #[test]
    fn test_marker_is_appended_to_base_result() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let greeter = greeter_type(&registry);
        let greet = greeter.method_by_name("Greet").unwrap();
        let scope = ModuleScope::new(registry.clone());

        let mixin = MixinBuilder::new(&scope, &greeter)
            .override_method(&greet)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(mixin.ty().full_name(), "Samples.Greeter_Mixin");

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let instance = mixin
            .create_instance(
                &runtime,
                move |runtime, invocation| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let original = invocation.proceed(runtime)?;
                    Ok(EmValue::from(format!("{}!marker", original)))
                },
                &[EmValue::from("Ada")],
            )
            .unwrap();

        assert_eq!(
            runtime.invoke_virtual(&greet, &instance, &[]).unwrap(),
            EmValue::from("Hello, Ada!marker")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        runtime.invoke_virtual(&greet, &instance, &[]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invocation_carries_call_details() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let calculator = calculator_type(&registry);
        let add = calculator.method_by_name("Add").unwrap();
        let scope = ModuleScope::new(registry.clone());
        let mixin = MixinBuilder::new(&scope, &calculator)
            .with_name("Generated.InterceptedCalculator")
            .override_method(&add)
            .unwrap()
            .build()
            .unwrap();

        let recorded: Arc<Mutex<Vec<Invocation>>> = Arc::default();
        let record = recorded.clone();
        let instance = mixin
            .create_instance(
                &runtime,
                move |runtime, invocation| {
                    record.lock().unwrap().push(invocation.clone());
                    invocation.proceed_with(runtime, &[EmValue::I32(100), EmValue::I32(1)])
                },
                &[],
            )
            .unwrap();

        let result = runtime
            .invoke_virtual(&add, &instance, &[EmValue::I32(2), EmValue::I32(3)])
            .unwrap();
        assert_eq!(result, EmValue::I32(101));

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        let invocation = &recorded[0];
        assert_eq!(invocation.receiver, instance);
        assert_eq!(invocation.method.token, add.token);
        assert_eq!(invocation.arguments, vec![EmValue::I32(2), EmValue::I32(3)]);
        assert_eq!(
            invocation.proceed(&runtime).unwrap(),
            EmValue::I32(5)
        );
    }

    #[test]
    fn test_void_and_protected_overrides() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let calculator = calculator_type(&registry);
        let reset = calculator.method_by_name("Reset").unwrap();
        let scale = calculator.method_by_name("Scale").unwrap();
        let resets = calculator.field_by_name("_resets").unwrap();
        let scope = ModuleScope::new(registry.clone());
        let mixin = MixinBuilder::new(&scope, &calculator)
            .override_method(&reset)
            .unwrap()
            .override_method(&scale)
            .unwrap()
            .override_method(&reset)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(mixin.overridden_methods().len(), 2);

        let instance = mixin
            .create_instance(
                &runtime,
                |runtime, invocation| {
                    let result = invocation.proceed(runtime)?;
                    if invocation.method.name == "Reset" {
                        invocation.proceed(runtime)?;
                        return Ok(EmValue::from("ignored"));
                    }
                    Ok(EmValue::I32(result.as_i64().unwrap_or_default() as i32 + 1))
                },
                &[],
            )
            .unwrap();

        assert_eq!(
            runtime.invoke_virtual(&reset, &instance, &[]).unwrap(),
            EmValue::Void
        );
        assert_eq!(runtime.load_field(&instance, &resets).unwrap(), EmValue::I32(2));
        assert_eq!(
            runtime.invoke_virtual(&scale, &instance, &[EmValue::I32(4)]).unwrap(),
            EmValue::I32(41)
        );

        let override_ = mixin.ty().method_by_name("Scale").unwrap();
        assert_eq!(override_.access(), scale.access());
        assert!(mixin
            .ty()
            .method_by_name(&format!("{}Scale", BASE_CALL_PREFIX))
            .is_some());
    }

    #[test]
    fn test_instances_keep_their_own_handler() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let greeter = greeter_type(&registry);
        let greet = greeter.method_by_name("Greet").unwrap();
        let scope = ModuleScope::new(registry.clone());
        let mixin = MixinBuilder::new(&scope, &greeter)
            .override_method(&greet)
            .unwrap()
            .build()
            .unwrap();

        let first = mixin
            .create_instance(&runtime, |_, _| Ok(EmValue::from("first")), &[EmValue::from("a")])
            .unwrap();
        let second = mixin
            .create_instance(&runtime, |_, _| Ok(EmValue::from("second")), &[EmValue::from("b")])
            .unwrap();
        assert_eq!(runtime.invoke_virtual(&greet, &first, &[]).unwrap(), EmValue::from("first"));
        assert_eq!(runtime.invoke_virtual(&greet, &second, &[]).unwrap(), EmValue::from("second"));
    }

    #[test]
    fn test_wrong_result_type_throws_invalid_cast() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let calculator = calculator_type(&registry);
        let add = calculator.method_by_name("Add").unwrap();
        let scope = ModuleScope::new(registry.clone());
        let mixin = MixinBuilder::new(&scope, &calculator)
            .override_method(&add)
            .unwrap()
            .build()
            .unwrap();

        let instance = mixin
            .create_instance(&runtime, |_, _| Ok(EmValue::from("not a number")), &[])
            .unwrap();
        let err = runtime
            .invoke_virtual(&add, &instance, &[EmValue::I32(1), EmValue::I32(2)])
            .unwrap_err();
        assert_eq!(err.as_exception().unwrap().type_name, "System.InvalidCastException");
    }

    #[test]
    fn test_rejected_methods() {
        let registry = registry();
        let core = registry.core();
        let calculator = calculator_type(&registry);
        let scope = ModuleScope::new(registry.clone());

        let to_string = core.object.method_by_name("ToString").unwrap();
        assert!(matches!(
            MixinBuilder::new(&scope, &calculator).override_method(&to_string),
            Err(Error::ShapeViolation(_))
        ));

        let describe = calculator.method_by_name("Describe").unwrap();
        assert!(matches!(
            MixinBuilder::new(&scope, &calculator).override_method(&describe),
            Err(Error::ShapeViolation(_))
        ));

        let zero = calculator.method_by_name("Zero").unwrap();
        assert!(matches!(
            MixinBuilder::new(&scope, &calculator).override_method(&zero),
            Err(Error::ShapeViolation(_))
        ));
    }

    #[test]
    fn test_abstract_method_emits_nothing() {
        let registry = registry();
        let core = registry.core();
        let module = registry.create_module("Samples", None);
        let builder = TypeBuilder::new(&registry, &module)
            .with_flags(TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT)
            .class("Samples", "Task", &core.object)
            .unwrap();
        builder.default_constructor(MethodAttributes::protected()).unwrap();
        let run = builder
            .abstract_method("Run", MethodAttributes::protected().virtual_().new_slot(), &core.void, &[])
            .unwrap();
        let task = builder.build().unwrap();
        let scope = ModuleScope::new(registry.clone());

        let result = MixinBuilder::new(&scope, &task)
            .with_flags(TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT)
            .override_method(&run)
            .unwrap()
            .build();
        assert!(matches!(result, Err(Error::ProtocolViolation(_))));
        assert!(registry.get_by_fullname("Samples.Task_Mixin").is_empty());
    }
}
