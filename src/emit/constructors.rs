//! Constructor replication for generated subtypes.
//!
//! Every accessible base constructor gets a matching constructor on the generated type that
//! calls it non-virtually. Caller hooks run before and after the base call, and an optional
//! list of leading parameters lets the generated constructors take extra state (a mixin handler
//! for instance) ahead of the base arguments.

use crate::{
    emit::{
        body::{Expression, Statement},
        method::{MethodEmitter, MethodHandle},
        TypeEmitter,
    },
    metadata::{
        method::{MethodAccessFlags, MethodAttributes, MethodRc},
        typesystem::RtTypeRc,
    },
    Result,
};

/// Access levels of base constructors a subtype can call
fn is_replicable(constructor: &MethodRc) -> bool {
    matches!(
        constructor.access(),
        MethodAccessFlags::PUBLIC | MethodAccessFlags::FAMILY | MethodAccessFlags::FAM_OR_ASSEM
    )
}

impl TypeEmitter {
    /// Emits one public constructor per accessible base constructor.
    ///
    /// Each constructor runs `pre`, calls the base constructor with its own arguments, then
    /// runs `post`.
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the base type has no accessible constructor,
    /// and any error returned by a hook.
    pub fn replicate_base_type_constructors<Pre, Post>(&mut self, pre: Pre, post: Post) -> Result<Vec<MethodHandle>>
    where
        Pre: FnMut(&mut MethodEmitter) -> Result<()>,
        Post: FnMut(&mut MethodEmitter) -> Result<()>,
    {
        self.replicate_base_type_constructors_with_leading_parameters(&[], pre, post)
    }

    /// Like [`TypeEmitter::replicate_base_type_constructors`], with `leading` parameters
    /// prepended to every generated constructor. The hooks see them as arguments `0..leading.len()`.
    ///
    /// # Errors
    /// See [`TypeEmitter::replicate_base_type_constructors`].
    pub fn replicate_base_type_constructors_with_leading_parameters<Pre, Post>(
        &mut self,
        leading: &[(&str, &RtTypeRc)],
        mut pre: Pre,
        mut post: Post,
    ) -> Result<Vec<MethodHandle>>
    where
        Pre: FnMut(&mut MethodEmitter) -> Result<()>,
        Post: FnMut(&mut MethodEmitter) -> Result<()>,
    {
        let constructors: Vec<MethodRc> = self
            .base_type()
            .constructors()
            .into_iter()
            .filter(is_replicable)
            .collect();
        if constructors.is_empty() {
            return Err(shape_error!(
                "{} has no accessible constructor to replicate",
                self.base_type().full_name()
            ));
        }

        let mut handles = Vec::with_capacity(constructors.len());
        for constructor in &constructors {
            handles.push(self.replicate_with(constructor, leading, &mut pre, &mut post)?);
        }
        tracing::debug!(
            ty = %self.name(),
            constructors = handles.len(),
            leading = leading.len(),
            "replicated base constructors"
        );
        Ok(handles)
    }

    /// Emits a constructor with the parameters of `base_constructor` that only calls it
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if `base_constructor` is not an accessible
    /// constructor of the base type.
    pub fn replicate_constructor(&mut self, base_constructor: &MethodRc) -> Result<MethodHandle> {
        if !base_constructor.is_constructor() || !is_replicable(base_constructor) {
            return Err(shape_error!(
                "{} is not an accessible constructor",
                base_constructor.full_name()
            ));
        }
        let declaring = base_constructor.owner()?;
        if declaring.token != self.base_type().token
            && declaring.token != self.base_type().definition_token()
        {
            return Err(shape_error!(
                "{} is not declared by the base type {}",
                base_constructor.full_name(),
                self.base_type().full_name()
            ));
        }
        self.replicate_with(base_constructor, &[], &mut |_| Ok(()), &mut |_| Ok(()))
    }

    fn replicate_with(
        &mut self,
        base_constructor: &MethodRc,
        leading: &[(&str, &RtTypeRc)],
        pre: &mut dyn FnMut(&mut MethodEmitter) -> Result<()>,
        post: &mut dyn FnMut(&mut MethodEmitter) -> Result<()>,
    ) -> Result<MethodHandle> {
        let mut params: Vec<(&str, &RtTypeRc)> = leading.to_vec();
        params.extend(
            base_constructor
                .params
                .iter()
                .map(|param| (param.name.as_str(), &param.param_type)),
        );
        let handle = self.create_constructor(MethodAttributes::public(), &params)?;

        let offset = leading.len();
        let emitter = self.method_mut(handle)?;
        pre(emitter)?;
        let arguments = (0..base_constructor.params.len())
            .map(|index| {
                u16::try_from(index + offset)
                    .map(Expression::argument)
                    .map_err(|_| shape_error!("Too many constructor parameters"))
            })
            .collect::<Result<Vec<_>>>()?;
        emitter.add_statement(Statement::pop(Expression::call_non_virtual(
            Some(Expression::this()),
            base_constructor,
            arguments,
        )))?;
        post(emitter)?;
        emitter.add_statement(Statement::ret_void())?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        emit::{
            body::{Expression, Reference, Statement},
            ModuleScope, SigningPolicy,
        },
        emulation::{EmValue, Runtime},
        metadata::{
            method::MethodAttributes,
            typesystem::{FieldAttributes, TypeAttributes, TypeBuilder},
        },
        test::fixtures::{greeter_type, registry},
    };

    #[test]
    fn test_replicated_constructor_calls_base() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let greeter = greeter_type(&registry);
        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.ReplicatedGreeter", &greeter, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();

        let handles = emitter
            .replicate_base_type_constructors(|_| Ok(()), |_| Ok(()))
            .unwrap();
        assert_eq!(handles.len(), 1);
        let ty = emitter.build_type().unwrap();

        let instance = runtime.create_instance(&ty, &[EmValue::from("Grace")]).unwrap();
        assert_eq!(
            runtime.invoke_by_name(&instance, "Greet", &[]).unwrap(),
            EmValue::from("Hello, Grace")
        );
    }

    #[test]
    fn test_hooks_and_leading_parameters() {
        let registry = registry();
        let core = registry.core();
        let runtime = Runtime::new(registry.clone());
        let greeter = greeter_type(&registry);
        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.TaggedGreeter", &greeter, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();
        let tag = emitter
            .create_field("_tag", &core.int32, FieldAttributes::PRIVATE)
            .unwrap();
        let stage = emitter
            .create_field("_stage", &core.string, FieldAttributes::PRIVATE)
            .unwrap();

        let (pre_tag, pre_stage, post_stage) = (tag.clone(), stage.clone(), stage.clone());
        emitter
            .replicate_base_type_constructors_with_leading_parameters(
                &[("tag", &core.int32)],
                move |ctor| {
                    ctor.add_statement(Statement::assign(Reference::this_field(&pre_tag), Expression::argument(0))?)?;
                    ctor.add_statement(Statement::assign(
                        Reference::this_field(&pre_stage),
                        Expression::constant("pre"),
                    )?)?;
                    Ok(())
                },
                move |ctor| {
                    ctor.add_statement(Statement::assign(
                        Reference::this_field(&post_stage),
                        Expression::constant("post"),
                    )?)?;
                    Ok(())
                },
            )
            .unwrap();
        let ty = emitter.build_type().unwrap();

        let ctor = ty.constructors().pop().unwrap();
        assert_eq!(ctor.params.len(), 2);
        assert_eq!(ctor.params[0].name, "tag");

        let instance = runtime
            .create_instance(&ty, &[EmValue::I32(7), EmValue::from("Linus")])
            .unwrap();
        assert_eq!(runtime.load_field(&instance, &tag).unwrap(), EmValue::I32(7));
        assert_eq!(runtime.load_field(&instance, &stage).unwrap(), EmValue::from("post"));
        assert_eq!(
            runtime.invoke_by_name(&instance, "Greet", &[]).unwrap(),
            EmValue::from("Hello, Linus")
        );
    }

    #[test]
    fn test_private_constructors_are_skipped() {
        let registry = registry();
        let core = registry.core();
        let module = registry.create_module("Samples.Private", None);
        let builder = TypeBuilder::new(&registry, &module)
            .class("Samples", "Hidden", &core.object)
            .unwrap();
        builder.default_constructor(MethodAttributes::private()).unwrap();
        let hidden = builder.build().unwrap();

        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.FromHidden", &hidden, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();
        assert!(matches!(
            emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(())),
            Err(crate::Error::ShapeViolation(_))
        ));
    }
}
