//! Session-wide type registry.
//!
//! The [`TypeRegistry`] is the explicit context object of one generation session. It
//!
//! - mints tokens (one row counter per [`TableId`]) and indexes every type by token and name,
//! - owns the modules types are defined in, including the bootstrapped core library,
//! - maps [`MethodKey`]s back to methods so a method can be re-resolved from any module,
//! - instantiates generic types and arrays (one instance per distinct argument list),
//! - caches assignability checks and attribute usage lookups.
//!
//! All caches are compute-or-fetch maps: a racing miss may compute a value twice, but every
//! caller observes the value that was stored first.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotweave::metadata::typesystem::{TypeAttributes, TypeFlavor, TypeRegistry};
//!
//! let registry = TypeRegistry::new()?;
//! let module = registry.create_module("Samples", None);
//! let object = registry.core().object.clone();
//!
//! let ty = registry.create_type(&module, "Samples", "Widget", TypeFlavor::Class,
//!     TypeAttributes::PUBLIC, Some(&object))?;
//! assert_eq!(registry.get_by_fullname("Samples.Widget").len(), 1);
//! assert!(module.resolve_type(ty.token).is_some());
//! # Ok::<(), dotweave::Error>(())
//! ```

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, OnceLock,
};

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use strum::EnumCount;

use crate::{
    metadata::{
        customattributes::{
            encode_custom_attribute_value, usage::compute_attribute_usage, AttributeUsage,
            CustomAttribute, CustomAttributeList, CustomAttributeRc, CustomAttributeValue,
        },
        identity::Identity,
        members::{Event, EventRc, Field, FieldRc, Property, PropertyRc},
        method::{Method, MethodAttributes, MethodKey, MethodRc, Parameter},
        module::{Module, ModuleIdentity, ModuleMember, ModuleRc},
        token::{TableId, Token},
        typesystem::{
            corelib::CoreTypes, FieldAttributes, RtType, RtTypeRc, TypeAttributes, TypeFlavor,
        },
    },
    Error::TypeNotFound,
    Result,
};

/// Return type, parameters and method-level generic parameters of a method being defined
#[derive(Clone, Debug)]
pub struct MethodSignature {
    /// Return type
    pub return_type: RtTypeRc,
    /// Parameters in declaration order
    pub params: Vec<Parameter>,
    /// Method-level generic parameters
    pub generic_params: Vec<RtTypeRc>,
}

impl MethodSignature {
    /// A non-generic signature
    #[must_use]
    pub fn new(return_type: &RtTypeRc, params: Vec<Parameter>) -> Self {
        MethodSignature {
            return_type: return_type.clone(),
            params,
            generic_params: Vec::new(),
        }
    }

    /// Adds method-level generic parameters
    #[must_use]
    pub fn with_generic_params(mut self, generic_params: Vec<RtTypeRc>) -> Self {
        self.generic_params = generic_params;
        self
    }

    /// Copies the signature of an existing method
    #[must_use]
    pub fn of(method: &Method) -> Self {
        MethodSignature {
            return_type: method.return_type.clone(),
            params: method.params.clone(),
            generic_params: method.generic_params.clone(),
        }
    }
}

/// Central registry of all types, modules and method keys of a session
pub struct TypeRegistry {
    types: SkipMap<Token, RtTypeRc>,
    fullnames: DashMap<String, Vec<Token>>,
    modules: DashMap<String, ModuleRc>,
    method_keys: DashMap<MethodKey, MethodRc>,
    next_rows: [AtomicU32; TableId::COUNT],
    generic_instances: DashMap<(Token, Vec<Token>), RtTypeRc>,
    array_types: DashMap<Token, RtTypeRc>,
    assignable: DashMap<(Token, Token), bool>,
    attribute_usage: DashMap<Token, AttributeUsage>,
    core: OnceLock<CoreTypes>,
}

impl TypeRegistry {
    /// Creates a registry and bootstraps the core library into it
    ///
    /// # Errors
    /// Returns an error if the core library fails to build, which indicates a defect in the
    /// bootstrap definitions.
    pub fn new() -> Result<Arc<Self>> {
        let registry = Arc::new(TypeRegistry {
            types: SkipMap::new(),
            fullnames: DashMap::new(),
            modules: DashMap::new(),
            method_keys: DashMap::new(),
            next_rows: std::array::from_fn(|_| AtomicU32::new(1)),
            generic_instances: DashMap::new(),
            array_types: DashMap::new(),
            assignable: DashMap::new(),
            attribute_usage: DashMap::new(),
            core: OnceLock::new(),
        });

        let core = CoreTypes::bootstrap(&registry)?;
        registry
            .core
            .set(core)
            .map_err(|_| malformed_error!("Core library bootstrapped twice"))?;
        Ok(registry)
    }

    /// The core library types
    ///
    /// # Panics
    /// Never after [`TypeRegistry::new`] returned; the core library is set before the registry
    /// is handed out.
    #[must_use]
    pub fn core(&self) -> &CoreTypes {
        self.core
            .get()
            .expect("core library is bootstrapped in TypeRegistry::new")
    }

    /// Mints the next token of `table`
    pub fn next_token(&self, table: TableId) -> Token {
        let row = self.next_rows[table.index()].fetch_add(1, Ordering::Relaxed);
        Token::from_parts(table, row)
    }

    /// Creates (or returns the existing) module called `name`
    pub fn create_module(&self, name: &str, strong_name: Option<Identity>) -> ModuleRc {
        self.modules
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(module = name, strong = strong_name.is_some(), "creating module");
                Arc::new(Module::new(ModuleIdentity::new(name, strong_name)))
            })
            .value()
            .clone()
    }

    /// Looks up a module by name
    #[must_use]
    pub fn module(&self, name: &str) -> Option<ModuleRc> {
        self.modules.get(name).map(|entry| entry.value().clone())
    }

    /// The module defining `ty`
    #[must_use]
    pub fn module_of(&self, ty: &RtType) -> Option<ModuleRc> {
        self.module(&ty.module.name)
    }

    /// Creates a type definition shell and registers it with `module`
    ///
    /// # Errors
    /// Returns an error if the base type cannot be linked.
    pub fn create_type(
        &self,
        module: &ModuleRc,
        namespace: &str,
        name: &str,
        flavor: TypeFlavor,
        flags: TypeAttributes,
        base: Option<&RtTypeRc>,
    ) -> Result<RtTypeRc> {
        let token = self.next_token(TableId::TypeDef);
        let ty = Arc::new(RtType::new(
            token,
            module.identity.clone(),
            namespace,
            name,
            flavor,
            flags,
        ));
        if let Some(base) = base {
            ty.set_base(base.clone())?;
        }

        self.register_type(&ty);
        module.insert(token, ModuleMember::Type(ty.clone()));
        Ok(ty)
    }

    fn register_type(&self, ty: &RtTypeRc) {
        self.types.insert(ty.token, ty.clone());
        self.fullnames
            .entry(ty.full_name())
            .or_default()
            .push(ty.token);
    }

    /// Re-indexes a type whose full name changed after creation (nesting)
    pub(crate) fn reindex_type(&self, ty: &RtTypeRc, previous_name: &str) {
        if let Some(mut tokens) = self.fullnames.get_mut(previous_name) {
            tokens.retain(|token| *token != ty.token);
        }
        self.fullnames
            .entry(ty.full_name())
            .or_default()
            .push(ty.token);
    }

    /// Appends a generic parameter to a type definition
    pub fn add_generic_parameter(&self, ty: &RtTypeRc, name: &str) -> RtTypeRc {
        let position = u16::try_from(ty.generic_params.count()).unwrap_or(u16::MAX);
        let parameter = self.create_generic_parameter(&ty.module, name, position, false);
        ty.generic_params.push(parameter.clone());
        parameter
    }

    /// Creates a free-standing generic parameter (for methods, or before its owner exists)
    pub fn create_generic_parameter(
        &self,
        module: &Arc<ModuleIdentity>,
        name: &str,
        position: u16,
        method: bool,
    ) -> RtTypeRc {
        let token = self.next_token(TableId::GenericParam);
        let parameter = Arc::new(RtType::new(
            token,
            module.clone(),
            "",
            name,
            TypeFlavor::GenericParameter { position, method },
            TypeAttributes::empty(),
        ));
        if let Some(object) = self.core.get().map(|core| core.object.clone()) {
            let _ = parameter.set_base(object);
        }
        self.types.insert(token, parameter.clone());
        parameter
    }

    /// Defines a field on `ty`
    pub fn create_field(
        &self,
        ty: &RtTypeRc,
        name: &str,
        field_type: &RtTypeRc,
        flags: FieldAttributes,
    ) -> FieldRc {
        let field = Arc::new(Field {
            token: self.next_token(TableId::Field),
            name: name.to_string(),
            flags,
            field_type: field_type.clone(),
            declaring_type: Arc::downgrade(ty),
            custom_attributes: Arc::new(boxcar::Vec::new()),
        });
        ty.fields.push(field.clone());
        self.insert_member(ty, field.token, ModuleMember::Field(field.clone()));
        field
    }

    /// Defines a method on `ty` and registers its [`MethodKey`]
    pub fn create_method(
        &self,
        ty: &RtTypeRc,
        name: &str,
        attributes: MethodAttributes,
        signature: MethodSignature,
    ) -> MethodRc {
        let method = Arc::new(Method::new(
            self.next_token(TableId::MethodDef),
            name,
            attributes,
            signature.return_type,
            signature.params,
            signature.generic_params,
            Arc::downgrade(ty),
        ));
        ty.methods.push(method.clone());
        self.insert_member(ty, method.token, ModuleMember::Method(method.clone()));
        self.method_keys.insert(method.key(), method.clone());
        method
    }

    /// Defines a property on `ty`
    pub fn create_property(
        &self,
        ty: &RtTypeRc,
        name: &str,
        property_type: &RtTypeRc,
        index_types: Vec<RtTypeRc>,
    ) -> PropertyRc {
        let property = Arc::new(Property::new(
            self.next_token(TableId::Property),
            name,
            property_type.clone(),
            index_types,
            Arc::downgrade(ty),
        ));
        ty.properties.push(property.clone());
        self.insert_member(ty, property.token, ModuleMember::Property(property.clone()));
        property
    }

    /// Defines an event on `ty`
    pub fn create_event(&self, ty: &RtTypeRc, name: &str, event_type: &RtTypeRc) -> EventRc {
        let event = Arc::new(Event::new(
            self.next_token(TableId::Event),
            name,
            event_type.clone(),
            Arc::downgrade(ty),
        ));
        ty.events.push(event.clone());
        self.insert_member(ty, event.token, ModuleMember::Event(event.clone()));
        event
    }

    fn insert_member(&self, ty: &RtType, token: Token, member: ModuleMember) {
        if let Some(module) = self.module_of(ty) {
            module.insert(token, member);
        }
    }

    /// Encodes `value` for `constructor` and appends the application to `target`
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if the value does not match the constructor.
    pub fn apply_custom_attribute(
        &self,
        target: &CustomAttributeList,
        constructor: &MethodRc,
        value: &CustomAttributeValue,
    ) -> Result<CustomAttributeRc> {
        let blob = encode_custom_attribute_value(constructor, value)?;
        let attribute = Arc::new(CustomAttribute {
            token: self.next_token(TableId::CustomAttribute),
            constructor: constructor.clone(),
            blob,
        });
        target.push(attribute.clone());
        Ok(attribute)
    }

    /// Get a type by token
    #[must_use]
    pub fn get(&self, token: &Token) -> Option<RtTypeRc> {
        self.types.get(token).map(|entry| entry.value().clone())
    }

    /// All types with the given full name, across modules
    #[must_use]
    pub fn get_by_fullname(&self, name: &str) -> Vec<RtTypeRc> {
        let tokens = match self.fullnames.get(name) {
            Some(tokens) => tokens.clone(),
            None => return Vec::new(),
        };
        tokens.iter().filter_map(|token| self.get(token)).collect()
    }

    /// The first type with the given full name
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeNotFound`] if no such type exists.
    pub fn lookup(&self, name: &str) -> Result<RtTypeRc> {
        self.get_by_fullname(name)
            .into_iter()
            .next()
            .ok_or_else(|| TypeNotFound(name.to_string()))
    }

    /// Number of registered types, including instances and generic parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Registry holds no types
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Resolves a method from its module-independent key
    #[must_use]
    pub fn resolve_method_key(&self, key: &MethodKey) -> Option<MethodRc> {
        self.method_keys.get(key).map(|entry| entry.value().clone())
    }

    /// Instantiates a generic type definition; identical argument lists share one instance
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if `definition` is not a generic type
    /// definition or the argument count differs from its parameter count.
    pub fn make_generic_type(
        &self,
        definition: &RtTypeRc,
        args: &[RtTypeRc],
    ) -> Result<RtTypeRc> {
        if !definition.is_generic_type_definition() {
            return Err(shape_error!(
                "{} is not a generic type definition",
                definition.full_name()
            ));
        }
        if definition.generic_params.count() != args.len() {
            return Err(shape_error!(
                "{} expects {} generic arguments, got {}",
                definition.full_name(),
                definition.generic_params.count(),
                args.len()
            ));
        }

        let key = (
            definition.token,
            args.iter().map(|arg| arg.token).collect::<Vec<_>>(),
        );
        if let Some(existing) = self.generic_instances.get(&key) {
            return Ok(existing.value().clone());
        }

        let instance = Arc::new(RtType::new_instance(self.next_token(TableId::TypeSpec), definition));
        instance.set_generic_definition(definition.clone());
        for arg in args {
            instance.generic_args.push(arg.clone());
        }
        if let Some(base) = definition.base() {
            instance.set_base(base)?;
        }
        if let Some(outer) = definition.declaring_type() {
            instance.set_declaring_type(&outer)?;
        }

        let stored = self
            .generic_instances
            .entry(key)
            .or_insert_with(|| {
                self.register_type(&instance);
                instance
            })
            .value()
            .clone();
        Ok(stored)
    }

    /// The single-dimensional array type of `element`
    pub fn make_array_type(&self, element: &RtTypeRc) -> RtTypeRc {
        if let Some(existing) = self.array_types.get(&element.token) {
            return existing.value().clone();
        }

        let array = Arc::new(RtType::new(
            self.next_token(TableId::TypeSpec),
            element.module.clone(),
            "",
            &format!("{}[]", element.name),
            TypeFlavor::Array,
            TypeAttributes::PUBLIC | TypeAttributes::SEALED,
        ));
        array.set_element_type(element.clone());
        if let Some(core) = self.core.get() {
            let _ = array.set_base(core.array.clone());
        }

        self.array_types
            .entry(element.token)
            .or_insert_with(|| {
                self.register_type(&array);
                array
            })
            .value()
            .clone()
    }

    /// Can a value of type `source` be stored in a location of type `target`
    ///
    /// Results are cached per (target, source) pair.
    pub fn is_assignable_from(&self, target: &RtTypeRc, source: &RtTypeRc) -> bool {
        let key = (target.token, source.token);
        if let Some(cached) = self.assignable.get(&key) {
            return *cached;
        }

        let result = Self::compute_assignable(target, source);
        *self.assignable.entry(key).or_insert(result)
    }

    fn same_type(a: &RtTypeRc, b: &RtTypeRc) -> bool {
        if a.token == b.token {
            return true;
        }
        match (a.generic_definition(), b.generic_definition()) {
            (Some(def_a), Some(def_b)) => {
                def_a.token == def_b.token
                    && a.generic_args.count() == b.generic_args.count()
                    && a.generic_args
                        .iter()
                        .zip(b.generic_args.iter())
                        .all(|((_, x), (_, y))| Self::same_type(x, y))
            }
            _ => false,
        }
    }

    fn compute_assignable(target: &RtTypeRc, source: &RtTypeRc) -> bool {
        if Self::same_type(target, source) {
            return true;
        }
        if source.is_void() || target.is_void() {
            return false;
        }
        if target.flavor == TypeFlavor::Object {
            return true;
        }
        if let (Some(target_element), Some(source_element)) =
            (target.element_type(), source.element_type())
        {
            return !source_element.is_value_type()
                && Self::compute_assignable(&target_element, &source_element);
        }
        if target.is_interface() {
            return source
                .all_interfaces()
                .iter()
                .any(|interface| Self::same_type(target, interface));
        }
        source
            .hierarchy()
            .iter()
            .any(|ancestor| Self::same_type(target, ancestor))
    }

    /// Usage of an attribute type, read once and cached
    ///
    /// # Errors
    /// Propagates parsing failures of a damaged `AttributeUsageAttribute`.
    pub fn attribute_usage(&self, attribute_type: &RtTypeRc) -> Result<AttributeUsage> {
        if let Some(cached) = self.attribute_usage.get(&attribute_type.token) {
            return Ok(*cached);
        }

        tracing::trace!(attribute = %attribute_type.full_name(), "attribute usage cache miss");
        let usage = compute_attribute_usage(self, attribute_type)?;
        Ok(*self
            .attribute_usage
            .entry(attribute_type.token)
            .or_insert(usage))
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.len())
            .field("modules", &self.modules.len())
            .field("method_keys", &self.method_keys.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::{generic_box_type, greeter_type, registry};

    #[test]
    fn test_tokens_are_unique_per_table() {
        let registry = registry();
        let a = registry.next_token(TableId::MethodDef);
        let b = registry.next_token(TableId::MethodDef);
        assert_ne!(a, b);
        assert_eq!(a.table_id(), Some(TableId::MethodDef));
    }

    #[test]
    fn test_create_module_is_idempotent() {
        let registry = registry();
        let first = registry.create_module("Samples.Once", None);
        let second = registry.create_module("Samples.Once", None);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_lookup_missing_type() {
        let registry = registry();
        assert!(matches!(
            registry.lookup("Does.Not.Exist"),
            Err(crate::Error::TypeNotFound(_))
        ));
    }

    #[test]
    fn test_generic_instances_are_shared() {
        let registry = registry();
        let definition = generic_box_type(&registry);
        let string = registry.core().string.clone();

        let a = registry.make_generic_type(&definition, &[string.clone()]).unwrap();
        let b = registry.make_generic_type(&definition, &[string]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.method_by_name("Get").is_some());

        let int32 = registry.core().int32.clone();
        let err = registry.make_generic_type(&a, &[int32]);
        assert!(matches!(err, Err(crate::Error::ShapeViolation(_))));
    }

    #[test]
    fn test_assignability() {
        let registry = registry();
        let core = registry.core();
        let greeter = greeter_type(&registry);

        assert!(registry.is_assignable_from(&core.object, &greeter));
        assert!(!registry.is_assignable_from(&greeter, &core.object));
        assert!(registry.is_assignable_from(&core.exception, &core.invalid_operation_exception));
        assert!(registry.is_assignable_from(&core.value_type, &core.int32));

        let strings = registry.make_array_type(&core.string);
        let objects = registry.make_array_type(&core.object);
        assert!(registry.is_assignable_from(&objects, &strings));
        assert!(!registry.is_assignable_from(&strings, &objects));
    }

    #[test]
    fn test_interface_assignability() {
        let registry = registry();
        let core = registry.core();
        let sample = crate::test::fixtures::serializable_base_type(&registry);
        assert!(registry.is_assignable_from(&core.iserializable, &sample));
        assert!(!registry.is_assignable_from(&core.iserializable, &core.string));
    }
}
