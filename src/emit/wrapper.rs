//! Public forwarding wrappers for non-public base methods.
//!
//! A wrapper is a public method named `__wrap__<Name>` that calls the wrapped base method
//! non-virtually. It carries a `GeneratedMethodWrapperAttribute` recording the module, token and
//! generic arguments of the wrapped method, so the original can be found again from any module
//! through [`GeneratedMethodWrapperDescriptor::resolve`].

use std::sync::Arc;

use crate::{
    emit::{
        attributes::{AttributeReplicator, CustomAttributeDescriptor},
        method::MethodHandle,
        TypeEmitter,
    },
    metadata::{
        customattributes::{CustomAttribute, CustomAttributeArgument},
        method::{Method, MethodAccessFlags, MethodAttributes, MethodKey, MethodRc},
        module::ModuleRc,
        token::Token,
        typesystem::{MethodSignature, RtTypeRc, TypeRegistry},
    },
    Error::MemberNotFound,
    Result,
};

/// Name prefix of generated wrappers
pub const WRAPPER_PREFIX: &str = "__wrap__";

/// Identity of a wrapped method, as recorded on its wrapper
#[derive(Clone, Debug)]
pub struct GeneratedMethodWrapperDescriptor {
    /// Name of the module declaring the wrapped method
    pub module: String,
    /// Token of the wrapped method inside that module
    pub token: Token,
    /// Full name of the declaring type (the definition for generic types)
    pub declaring_type: String,
    /// Name of the wrapped method
    pub name: String,
    /// Signature of the wrapped method
    pub signature: String,
    /// Generic arguments of the declaring type the wrapper was generated against
    pub generic_arguments: Vec<RtTypeRc>,
}

impl PartialEq for GeneratedMethodWrapperDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.module == other.module
            && self.token == other.token
            && self.declaring_type == other.declaring_type
            && self.name == other.name
            && self.signature == other.signature
            && self.generic_arguments.len() == other.generic_arguments.len()
            && self
                .generic_arguments
                .iter()
                .zip(&other.generic_arguments)
                .all(|(left, right)| left.token == right.token)
    }
}

impl Eq for GeneratedMethodWrapperDescriptor {}

impl GeneratedMethodWrapperDescriptor {
    /// Describes `method` as seen through `context`, a closed instance of its declaring type
    /// if the declaring type is generic
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeNotFound`] if the method lost its declaring type.
    pub fn from_method(method: &MethodRc, context: Option<&RtTypeRc>) -> Result<Self> {
        let declaring = method.owner()?;
        let generic_arguments = context
            .filter(|ty| ty.definition_token() == declaring.token)
            .map(|ty| ty.generic_args.iter().map(|(_, arg)| arg.clone()).collect())
            .unwrap_or_default();
        Ok(GeneratedMethodWrapperDescriptor {
            module: declaring.module.name.clone(),
            token: method.token,
            declaring_type: declaring.full_name(),
            name: method.name.clone(),
            signature: method.signature(),
            generic_arguments,
        })
    }

    /// Decodes the descriptor from an applied `GeneratedMethodWrapperAttribute`
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if `attribute` is not a wrapper attribute or its
    /// arguments are malformed.
    pub fn from_attribute(registry: &Arc<TypeRegistry>, attribute: &CustomAttribute) -> Result<Self> {
        let core = registry.core();
        if !attribute
            .attribute_type()
            .is_some_and(|ty| ty.token == core.generated_method_wrapper_attribute.token)
        {
            return Err(attribute_error!(
                "{} is not a GeneratedMethodWrapperAttribute",
                attribute.type_name()
            ));
        }

        let descriptor = AttributeReplicator::new(registry.clone()).parse(attribute)?;
        let string = |index: usize| -> Result<String> {
            match descriptor.arguments.get(index) {
                Some(CustomAttributeArgument::String(value)) => Ok(value.clone()),
                other => Err(attribute_error!(
                    "Wrapper attribute argument {} is not a string: {:?}",
                    index,
                    other
                )),
            }
        };
        let token = match descriptor.arguments.get(1) {
            Some(CustomAttributeArgument::I4(value)) => Token::new(u32::from_ne_bytes(value.to_ne_bytes())),
            other => {
                return Err(attribute_error!(
                    "Wrapper attribute token is not an int: {:?}",
                    other
                ))
            }
        };
        let generic_arguments = match descriptor.arguments.get(5) {
            Some(CustomAttributeArgument::Array(items)) => items
                .iter()
                .map(|item| match item {
                    CustomAttributeArgument::Type(name) => registry.lookup(name),
                    other => Err(attribute_error!(
                        "Wrapper generic argument is not a type: {:?}",
                        other
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(CustomAttributeArgument::Null) | None => Vec::new(),
            other => {
                return Err(attribute_error!(
                    "Wrapper generic arguments are not a type array: {:?}",
                    other
                ))
            }
        };

        Ok(GeneratedMethodWrapperDescriptor {
            module: string(0)?,
            token,
            declaring_type: string(2)?,
            name: string(3)?,
            signature: string(4)?,
            generic_arguments,
        })
    }

    /// The descriptor recorded on `wrapper`, if it is a generated wrapper
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if the recorded attribute is malformed.
    pub fn find(registry: &Arc<TypeRegistry>, wrapper: &Method) -> Result<Option<Self>> {
        let wrapper_type = registry.core().generated_method_wrapper_attribute.token;
        for (_, attribute) in wrapper.custom_attributes.iter() {
            if attribute
                .attribute_type()
                .is_some_and(|ty| ty.token == wrapper_type)
            {
                return Self::from_attribute(registry, attribute).map(Some);
            }
        }
        Ok(None)
    }

    fn matches(&self, method: &Method) -> bool {
        method.name == self.name && method.signature() == self.signature
    }

    /// Resolves the wrapped method while running in `probing_module`.
    ///
    /// The token is only trusted inside the module that minted it; probing from any other
    /// module goes through the declaring module, and finally through the method key.
    ///
    /// # Errors
    /// Returns [`crate::Error::MemberNotFound`] if the method cannot be found, and
    /// [`crate::Error::ShapeViolation`] if the recorded generic arguments do not fit the
    /// declaring type.
    pub fn resolve(&self, registry: &TypeRegistry, probing_module: &ModuleRc) -> Result<MethodRc> {
        let by_token = if probing_module.name() == self.module {
            probing_module.resolve_method(self.token)
        } else {
            registry
                .module(&self.module)
                .and_then(|module| module.resolve_method(self.token))
        };
        let method = match by_token.filter(|method| self.matches(method)) {
            Some(method) => method,
            None => {
                tracing::trace!(
                    module = %self.module,
                    token = %self.token,
                    probing = %probing_module.name(),
                    "wrapper token did not resolve, falling back to method key"
                );
                let key = MethodKey {
                    declaring_type: format!("[{}]{}", self.module, self.declaring_type),
                    name: self.name.clone(),
                    signature: self.signature.clone(),
                };
                registry.resolve_method_key(&key).ok_or_else(|| {
                    MemberNotFound(format!("{}::{}{}", self.declaring_type, self.name, self.signature))
                })?
            }
        };

        if !self.generic_arguments.is_empty() {
            registry.make_generic_type(&method.owner()?, &self.generic_arguments)?;
        }
        Ok(method)
    }

    /// The closed declaring type the wrapper was generated against
    ///
    /// # Errors
    /// See [`GeneratedMethodWrapperDescriptor::resolve`].
    pub fn resolve_declaring_type(&self, registry: &TypeRegistry, probing_module: &ModuleRc) -> Result<RtTypeRc> {
        let declaring = self.resolve(registry, probing_module)?.owner()?;
        if self.generic_arguments.is_empty() {
            Ok(declaring)
        } else {
            registry.make_generic_type(&declaring, &self.generic_arguments)
        }
    }

    /// The attribute application recording this descriptor
    #[must_use]
    pub fn to_descriptor(&self, registry: &TypeRegistry) -> Option<CustomAttributeDescriptor> {
        let constructor = registry
            .core()
            .generated_method_wrapper_attribute
            .constructors()
            .pop()?;
        let token = i32::from_ne_bytes(self.token.value().to_ne_bytes());
        Some(CustomAttributeDescriptor::new(
            &constructor,
            vec![
                CustomAttributeArgument::String(self.module.clone()),
                CustomAttributeArgument::I4(token),
                CustomAttributeArgument::String(self.declaring_type.clone()),
                CustomAttributeArgument::String(self.name.clone()),
                CustomAttributeArgument::String(self.signature.clone()),
                CustomAttributeArgument::Array(
                    self.generic_arguments
                        .iter()
                        .map(|arg| CustomAttributeArgument::Type(arg.full_name()))
                        .collect(),
                ),
            ],
        ))
    }
}

impl TypeEmitter {
    /// The public wrapper of a non-public base method, created on first request.
    ///
    /// Wrappers are cached by the key of the wrapped method: asking again for the same method
    /// returns the same handle.
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if `method` is private or not declared in the
    /// base hierarchy, and [`crate::Error::ProtocolViolation`] if it is abstract.
    pub fn get_public_method_wrapper(&mut self, method: &MethodRc) -> Result<MethodHandle> {
        let key = method.key();
        if let Some(handle) = self.wrappers.get(&key) {
            return Ok(*handle);
        }

        let declaring = method.owner()?;
        if !self.base_type().is_subclass_of(&declaring) {
            return Err(shape_error!(
                "{} is not declared in the base hierarchy of {}",
                method.full_name(),
                self.name()
            ));
        }
        if method.access() == MethodAccessFlags::PRIVATE {
            return Err(shape_error!(
                "{} is private and cannot be wrapped",
                method.full_name()
            ));
        }
        if method.is_abstract() {
            return Err(protocol_error!(
                "Cannot call abstract base method {}, it has no body",
                method.full_name()
            ));
        }

        let context = self
            .base_type()
            .hierarchy()
            .into_iter()
            .find(|ty| ty.definition_token() == declaring.token);
        let descriptor = GeneratedMethodWrapperDescriptor::from_method(method, context.as_ref())?;
        let attribute = descriptor.to_descriptor(self.registry()).ok_or_else(|| {
            MemberNotFound("GeneratedMethodWrapperAttribute constructor".to_string())
        })?;

        let mut attributes = MethodAttributes::public();
        if method.is_static() {
            attributes = attributes.static_();
        }
        let signature = MethodSignature::of(method);
        let params: Vec<(String, RtTypeRc)> = signature
            .params
            .iter()
            .map(|param| (param.name.clone(), param.param_type.clone()))
            .collect();
        let params: Vec<(&str, &RtTypeRc)> = params
            .iter()
            .map(|(name, ty)| (name.as_str(), ty))
            .collect();
        let handle = self.create_method(
            &format!("{WRAPPER_PREFIX}{}", method.name),
            attributes,
            &signature.return_type,
            &params,
        )?;

        let emitter = self.method_mut(handle)?;
        emitter.implement_by_base_call(method)?;
        emitter.add_custom_attribute(&attribute)?;

        tracing::debug!(wrapped = %method.full_name(), wrapper = %emitter.name(), "created public method wrapper");
        self.wrappers.insert(key, handle);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emit::{ModuleScope, SigningPolicy},
        emulation::{EmValue, Runtime},
        metadata::typesystem::{TypeAttributes, TypeBuilder},
        test::fixtures::{generic_box_type, greeter_type, registry},
    };

    fn shy_greeter(registry: &Arc<TypeRegistry>) -> RtTypeRc {
        if let Ok(existing) = registry.lookup("Samples.ShyGreeter") {
            return existing;
        }
        let core = registry.core();
        let greeter = greeter_type(registry);
        let module = registry.create_module("Samples", None);
        let builder = TypeBuilder::new(registry, &module)
            .class("Samples", "ShyGreeter", &greeter)
            .unwrap();
        builder
            .native_constructor(MethodAttributes::public(), &core.void, &[("name", &core.string)], {
                let name = greeter.field_by_name("_name").unwrap();
                move |runtime, this, args| {
                    runtime.store_field(this, &name, args[0].clone())?;
                    Ok(EmValue::Void)
                }
            })
            .unwrap();
        builder
            .native_method(
                "Whisper",
                MethodAttributes::protected(),
                &core.string,
                &[("word", &core.string)],
                |_, _, args| Ok(EmValue::from(format!("psst {}", args[0]))),
            )
            .unwrap();
        builder
            .native_method("Hidden", MethodAttributes::private(), &core.void, &[], |_, _, _| Ok(EmValue::Void))
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_wrapper_is_cached_and_callable() {
        let registry = registry();
        let runtime = Runtime::new(registry.clone());
        let shy = shy_greeter(&registry);
        let whisper = shy.method_by_name("Whisper").unwrap();
        let greet = shy.find_method_in_hierarchy("Greet", &[]).unwrap();

        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.OpenGreeter", &shy, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();
        let first = emitter.get_public_method_wrapper(&whisper).unwrap();
        let second = emitter.get_public_method_wrapper(&whisper).unwrap();
        let other = emitter.get_public_method_wrapper(&greet).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);

        emitter.replicate_base_type_constructors(|_| Ok(()), |_| Ok(())).unwrap();
        let ty = emitter.build_type().unwrap();
        let wrapper = ty.method_by_name("__wrap__Whisper").unwrap();
        assert_eq!(wrapper.access(), MethodAccessFlags::PUBLIC);

        let instance = runtime.create_instance(&ty, &[EmValue::from("Ada")]).unwrap();
        assert_eq!(
            runtime.invoke(&wrapper, &instance, &[EmValue::from("hi")]).unwrap(),
            EmValue::from("psst hi")
        );
    }

    #[test]
    fn test_descriptor_resolves_across_modules() {
        let registry = registry();
        let shy = shy_greeter(&registry);
        let whisper = shy.method_by_name("Whisper").unwrap();

        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.ForwardedGreeter", &shy, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();
        let handle = emitter.get_public_method_wrapper(&whisper).unwrap();
        let wrapper = emitter.method(handle).unwrap().method().clone();

        let descriptor = GeneratedMethodWrapperDescriptor::find(&registry, &wrapper)
            .unwrap()
            .unwrap();
        assert_eq!(descriptor.module, "Samples");
        assert_eq!(descriptor.token, whisper.token);

        let generated = emitter.module().clone();
        let elsewhere = registry.create_module("Samples.Elsewhere", None);
        for probing in [&generated, &elsewhere] {
            let resolved = descriptor.resolve(&registry, probing).unwrap();
            assert_eq!(resolved.token, whisper.token);
        }
    }

    #[test]
    fn test_stale_token_falls_back_to_key() {
        let registry = registry();
        let shy = shy_greeter(&registry);
        let whisper = shy.method_by_name("Whisper").unwrap();

        let mut descriptor = GeneratedMethodWrapperDescriptor::from_method(&whisper, None).unwrap();
        descriptor.token = Token::new(0x0600_FFFF);
        let module = registry.module("Samples").unwrap();
        assert_eq!(descriptor.resolve(&registry, &module).unwrap().token, whisper.token);

        descriptor.name = "Missing".to_string();
        assert!(matches!(
            descriptor.resolve(&registry, &module),
            Err(crate::Error::MemberNotFound(_))
        ));
    }

    #[test]
    fn test_generic_context_is_recorded() {
        let registry = registry();
        let core = registry.core();
        let definition = generic_box_type(&registry);
        let closed = registry
            .make_generic_type(&definition, &[core.string.clone()])
            .unwrap();
        let get = definition.method_by_name("Get").unwrap();

        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.StringBox", &closed, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();
        let handle = emitter.get_public_method_wrapper(&get).unwrap();
        let wrapper = emitter.method(handle).unwrap().method().clone();

        let descriptor = GeneratedMethodWrapperDescriptor::find(&registry, &wrapper)
            .unwrap()
            .unwrap();
        assert_eq!(descriptor.generic_arguments.len(), 1);
        assert_eq!(descriptor.generic_arguments[0].token, core.string.token);
        let declaring = descriptor
            .resolve_declaring_type(&registry, emitter.module())
            .unwrap();
        assert!(Arc::ptr_eq(&declaring, &closed));
    }

    #[test]
    fn test_abstract_method_leaves_no_wrapper() {
        let registry = registry();
        let core = registry.core();
        let module = registry.create_module("Samples", None);
        let builder = TypeBuilder::new(&registry, &module)
            .with_flags(TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT)
            .class("Samples", "Job", &core.object)
            .unwrap();
        builder.default_constructor(MethodAttributes::protected()).unwrap();
        let run = builder
            .abstract_method("Run", MethodAttributes::protected().virtual_().new_slot(), &core.void, &[])
            .unwrap();
        let job = builder.build().unwrap();

        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type(
                "Generated.JobShell",
                &job,
                &[],
                TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT,
                SigningPolicy::Weak,
            )
            .unwrap();
        assert!(matches!(
            emitter.get_public_method_wrapper(&run),
            Err(crate::Error::ProtocolViolation(_))
        ));
        assert_eq!(emitter.method_handles().count(), 0);

        let ty = emitter.build_type().unwrap();
        assert!(ty.method_by_name("__wrap__Run").is_none());
    }

    #[test]
    fn test_descriptor_equality_compares_generic_arguments() {
        let registry = registry();
        let core = registry.core();
        let definition = generic_box_type(&registry);
        let get = definition.method_by_name("Get").unwrap();
        let strings = registry
            .make_generic_type(&definition, &[core.string.clone()])
            .unwrap();
        let numbers = registry
            .make_generic_type(&definition, &[core.int32.clone()])
            .unwrap();

        let of_strings = GeneratedMethodWrapperDescriptor::from_method(&get, Some(&strings)).unwrap();
        let again = GeneratedMethodWrapperDescriptor::from_method(&get, Some(&strings)).unwrap();
        let of_numbers = GeneratedMethodWrapperDescriptor::from_method(&get, Some(&numbers)).unwrap();
        let open = GeneratedMethodWrapperDescriptor::from_method(&get, None).unwrap();

        assert_eq!(of_strings, again);
        assert_ne!(of_strings, of_numbers);
        assert_ne!(of_strings, open);
    }

    #[test]
    fn test_private_and_foreign_methods_are_rejected() {
        let registry = registry();
        let core = registry.core();
        let shy = shy_greeter(&registry);
        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.Rejecting", &shy, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();

        let hidden = shy.method_by_name("Hidden").unwrap();
        assert!(matches!(
            emitter.get_public_method_wrapper(&hidden),
            Err(crate::Error::ShapeViolation(_))
        ));
        let foreign = core.exception.method_by_name("get_Message").unwrap();
        assert!(matches!(
            emitter.get_public_method_wrapper(&foreign),
            Err(crate::Error::ShapeViolation(_))
        ));
    }
}
