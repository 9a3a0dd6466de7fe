//! Runtime type model shared by host types and generated types.
//!
//! Every type the engine knows about, whether it was authored by hand through the
//! [`TypeBuilder`], bootstrapped as part of the core library, or produced by a
//! [`crate::emit::TypeEmitter`], is represented by the same [`RtType`]. Member lists are
//! append-only (`boxcar`) so a type can be populated while it is already shared, the same way
//! a metadata loader fills in a type after its row has been read.
//!
//! # Key Components
//!
//! - [`RtType`]: one type definition, generic instance, array or generic parameter
//! - [`TypeFlavor`]: the kind of type, including the primitive it maps to
//! - [`TypeRegistry`]: token allocation, lookups, generic instantiation and the session caches
//! - [`TypeBuilder`]: fluent construction of host types with native method bodies
//! - [`CoreTypes`]: the core library every registry bootstraps
//!
//! # Generics
//!
//! Generic instances are erased: an instance shares the member lists of its definition and
//! only records its arguments. The interpreter is dynamically typed, so the shared bodies run
//! unchanged for every instantiation.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotweave::metadata::typesystem::TypeRegistry;
//!
//! let registry = TypeRegistry::new()?;
//! let core = registry.core();
//!
//! for ty in registry.get_by_fullname("System.String") {
//!     println!("{} ({})", ty.full_name(), ty.token);
//! }
//! assert!(registry.is_assignable_from(&core.object, &core.string));
//! # Ok::<(), dotweave::Error>(())
//! ```

mod builder;
mod corelib;
mod flags;
mod registry;

use std::{
    fmt,
    sync::{Arc, OnceLock, Weak},
};

pub use corelib::CoreTypes;
pub use builder::TypeBuilder;
pub use flags::{FieldAttributes, TypeAttributes, FIELD_ACCESS_MASK, TYPE_VISIBILITY_MASK};
pub use registry::{MethodSignature, TypeRegistry};

use crate::{
    metadata::{
        customattributes::CustomAttributeList,
        members::{EventList, EventRc, FieldList, FieldRc, PropertyList, PropertyRc},
        method::{MethodList, MethodRc},
        module::ModuleIdentity,
        token::Token,
    },
    Result,
};

/// A vector that holds a list of `RtType`
pub type RtTypeList = Arc<boxcar::Vec<RtTypeRc>>;
/// Reference to a `RtType`
pub type RtTypeRc = Arc<RtType>;

/// Built-in value primitives and `void`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum PrimitiveKind {
    /// `void`
    Void,
    /// `bool`
    Boolean,
    /// `char`
    Char,
    /// `sbyte`
    I1,
    /// `byte`
    U1,
    /// `short`
    I2,
    /// `ushort`
    U2,
    /// `int`
    I4,
    /// `uint`
    U4,
    /// `long`
    I8,
    /// `ulong`
    U8,
    /// `float`
    R4,
    /// `double`
    R8,
}

impl PrimitiveKind {
    /// Size in bytes of the encoded value
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            PrimitiveKind::Void => 0,
            PrimitiveKind::Boolean | PrimitiveKind::I1 | PrimitiveKind::U1 => 1,
            PrimitiveKind::Char | PrimitiveKind::I2 | PrimitiveKind::U2 => 2,
            PrimitiveKind::I4 | PrimitiveKind::U4 | PrimitiveKind::R4 => 4,
            PrimitiveKind::I8 | PrimitiveKind::U8 | PrimitiveKind::R8 => 8,
        }
    }

    /// Is a 64-bit integer
    #[must_use]
    pub fn is_wide_integer(self) -> bool {
        matches!(self, PrimitiveKind::I8 | PrimitiveKind::U8)
    }

    /// Is a floating point number
    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveKind::R4 | PrimitiveKind::R8)
    }
}

/// The kind of an [`RtType`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeFlavor {
    /// Reference type
    Class,
    /// Interface
    Interface,
    /// User-defined value type
    ValueType,
    /// Enumeration, backed by its underlying primitive
    Enum,
    /// Built-in value primitive or `void`
    Primitive(PrimitiveKind),
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// Single-dimensional, zero-based array
    Array,
    /// Generic parameter, `method` set for method-level parameters
    GenericParameter {
        /// Position in the owner's parameter list
        position: u16,
        /// Declared on a method rather than a type
        method: bool,
    },
}

/// Represents a type: a definition, a generic instance, an array or a generic parameter.
///
/// Member lists are shared with the type's generic instances. The base type, declaring type,
/// generic definition and element type are late-bound because the registry creates the shell
/// first and wires the relations afterwards.
pub struct RtType {
    /// Token
    pub token: Token,
    /// Identity of the defining module
    pub module: Arc<ModuleIdentity>,
    /// Namespace (empty for nested types and generic parameters)
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Kind of the type
    pub flavor: TypeFlavor,
    /// Flags (`TypeAttributes`, II.23.1.15)
    pub flags: TypeAttributes,
    /// This types base aka 'extends'
    base: OnceLock<RtTypeRc>,
    /// All interfaces this type implements directly
    pub interfaces: RtTypeList,
    /// All fields this type declares
    pub fields: FieldList,
    /// All methods and constructors this type declares
    pub methods: MethodList,
    /// All properties this type declares
    pub properties: PropertyList,
    /// All events this type declares
    pub events: EventList,
    /// All types that are 'contained' in this type
    pub nested_types: RtTypeList,
    declaring_type: OnceLock<Weak<RtType>>,
    /// Generic parameters of a definition
    pub generic_params: RtTypeList,
    /// Generic arguments of an instance
    pub generic_args: RtTypeList,
    generic_definition: OnceLock<RtTypeRc>,
    element_type: OnceLock<RtTypeRc>,
    underlying: OnceLock<RtTypeRc>,
    /// All custom attributes this type has
    pub custom_attributes: CustomAttributeList,
}

impl RtType {
    /// Create a new, empty `RtType`
    #[must_use]
    pub fn new(
        token: Token,
        module: Arc<ModuleIdentity>,
        namespace: &str,
        name: &str,
        flavor: TypeFlavor,
        flags: TypeAttributes,
    ) -> Self {
        RtType {
            token,
            module,
            namespace: namespace.to_string(),
            name: name.to_string(),
            flavor,
            flags,
            base: OnceLock::new(),
            interfaces: Arc::new(boxcar::Vec::new()),
            fields: Arc::new(boxcar::Vec::new()),
            methods: Arc::new(boxcar::Vec::new()),
            properties: Arc::new(boxcar::Vec::new()),
            events: Arc::new(boxcar::Vec::new()),
            nested_types: Arc::new(boxcar::Vec::new()),
            declaring_type: OnceLock::new(),
            generic_params: Arc::new(boxcar::Vec::new()),
            generic_args: Arc::new(boxcar::Vec::new()),
            generic_definition: OnceLock::new(),
            element_type: OnceLock::new(),
            underlying: OnceLock::new(),
            custom_attributes: Arc::new(boxcar::Vec::new()),
        }
    }

    /// Creates a generic instance shell sharing the member lists of `definition`
    pub(crate) fn new_instance(token: Token, definition: &RtTypeRc) -> Self {
        RtType {
            token,
            module: definition.module.clone(),
            namespace: definition.namespace.clone(),
            name: definition.name.clone(),
            flavor: definition.flavor,
            flags: definition.flags,
            base: OnceLock::new(),
            interfaces: definition.interfaces.clone(),
            fields: definition.fields.clone(),
            methods: definition.methods.clone(),
            properties: definition.properties.clone(),
            events: definition.events.clone(),
            nested_types: definition.nested_types.clone(),
            declaring_type: OnceLock::new(),
            generic_params: Arc::new(boxcar::Vec::new()),
            generic_args: Arc::new(boxcar::Vec::new()),
            generic_definition: OnceLock::new(),
            element_type: OnceLock::new(),
            underlying: OnceLock::new(),
            custom_attributes: definition.custom_attributes.clone(),
        }
    }

    /// Access the base type of this type, if it exists
    #[must_use]
    pub fn base(&self) -> Option<RtTypeRc> {
        self.base.get().cloned()
    }

    /// Sets the base type; only the first call has an effect
    pub(crate) fn set_base(&self, base: RtTypeRc) -> Result<()> {
        self.base
            .set(base)
            .map_err(|_| malformed_error!("Base type of {} already set", self.name))
    }

    /// The enclosing type of a nested type
    #[must_use]
    pub fn declaring_type(&self) -> Option<RtTypeRc> {
        self.declaring_type.get().and_then(Weak::upgrade)
    }

    pub(crate) fn set_declaring_type(&self, outer: &RtTypeRc) -> Result<()> {
        self.declaring_type
            .set(Arc::downgrade(outer))
            .map_err(|_| malformed_error!("Declaring type of {} already set", self.name))
    }

    /// The generic definition of a generic instance
    #[must_use]
    pub fn generic_definition(&self) -> Option<RtTypeRc> {
        self.generic_definition.get().cloned()
    }

    pub(crate) fn set_generic_definition(&self, definition: RtTypeRc) {
        let _ = self.generic_definition.set(definition);
    }

    /// The element type of an array
    #[must_use]
    pub fn element_type(&self) -> Option<RtTypeRc> {
        self.element_type.get().cloned()
    }

    pub(crate) fn set_element_type(&self, element: RtTypeRc) {
        let _ = self.element_type.set(element);
    }

    /// The underlying primitive of an enum
    #[must_use]
    pub fn underlying_type(&self) -> Option<RtTypeRc> {
        self.underlying.get().cloned()
    }

    pub(crate) fn set_underlying_type(&self, underlying: RtTypeRc) {
        let _ = self.underlying.set(underlying);
    }

    /// Returns the full name (Namespace.Name) of the type
    ///
    /// Nested types use `Outer+Inner`, generic instances list their arguments in angle
    /// brackets and arrays append `[]`.
    #[must_use]
    pub fn full_name(&self) -> String {
        if let Some(element) = self.element_type() {
            return format!("{}[]", element.full_name());
        }

        let mut name = match self.declaring_type() {
            Some(outer) => format!("{}+{}", outer.full_name(), self.name),
            None if self.namespace.is_empty() => self.name.clone(),
            None => format!("{}.{}", self.namespace, self.name),
        };

        if self.generic_args.count() > 0 {
            let args: Vec<String> = self
                .generic_args
                .iter()
                .map(|(_, arg)| arg.full_name())
                .collect();
            name.push('<');
            name.push_str(&args.join(","));
            name.push('>');
        }
        name
    }

    /// Name used in method signatures; generic parameters render positionally
    #[must_use]
    pub fn signature_name(&self) -> String {
        match self.flavor {
            TypeFlavor::GenericParameter { position, method } => {
                if method {
                    format!("!!{}", position)
                } else {
                    format!("!{}", position)
                }
            }
            _ => {
                if let Some(element) = self.element_type() {
                    return format!("{}[]", element.signature_name());
                }
                if self.generic_args.count() > 0 {
                    let definition = self
                        .generic_definition()
                        .map_or_else(|| self.name.clone(), |def| def.full_name());
                    let args: Vec<String> = self
                        .generic_args
                        .iter()
                        .map(|(_, arg)| arg.signature_name())
                        .collect();
                    return format!("{}<{}>", definition, args.join(","));
                }
                self.full_name()
            }
        }
    }

    /// Module-qualified name, `[Module]Namespace.Name`
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("[{}]{}", self.module.name, self.full_name())
    }

    /// Is an interface
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flavor == TypeFlavor::Interface || self.flags.contains(TypeAttributes::INTERFACE)
    }

    /// Cannot be derived from
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.flags.contains(TypeAttributes::SEALED)
    }

    /// Cannot be instantiated
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeAttributes::ABSTRACT)
    }

    /// Is a value type (user struct, enum or value primitive)
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self.flavor {
            TypeFlavor::ValueType | TypeFlavor::Enum => true,
            TypeFlavor::Primitive(kind) => kind != PrimitiveKind::Void,
            _ => false,
        }
    }

    /// Is an enum
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.flavor == TypeFlavor::Enum
    }

    /// Is `void`
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.flavor == TypeFlavor::Primitive(PrimitiveKind::Void)
    }

    /// Is a generic parameter
    #[must_use]
    pub fn is_generic_parameter(&self) -> bool {
        matches!(self.flavor, TypeFlavor::GenericParameter { .. })
    }

    /// Declares generic parameters and is not itself an instance
    #[must_use]
    pub fn is_generic_type_definition(&self) -> bool {
        self.generic_params.count() > 0 && self.generic_definition.get().is_none()
    }

    /// Is an instance of a generic definition
    #[must_use]
    pub fn is_generic_instance(&self) -> bool {
        self.generic_definition.get().is_some()
    }

    /// Is generic in any way (definition or instance)
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.is_generic_type_definition() || self.is_generic_instance()
    }

    /// Refers to an unsubstituted generic parameter anywhere in its shape
    #[must_use]
    pub fn contains_generic_parameters(&self) -> bool {
        if self.is_generic_parameter() || self.is_generic_type_definition() {
            return true;
        }
        if let Some(element) = self.element_type() {
            return element.contains_generic_parameters();
        }
        self.generic_args
            .iter()
            .any(|(_, arg)| arg.contains_generic_parameters())
    }

    /// A generic instance whose arguments are not all closed
    #[must_use]
    pub fn is_open_constructed(&self) -> bool {
        self.is_generic_instance() && self.contains_generic_parameters()
    }

    /// Is nested in another type
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.declaring_type.get().is_some()
    }

    /// Returns true if both handles denote the same type
    #[must_use]
    pub fn is_same(&self, other: &RtType) -> bool {
        self.token == other.token
    }

    /// The definition behind a generic instance, or the type itself
    #[must_use]
    pub fn definition_token(&self) -> Token {
        self.generic_definition
            .get()
            .map_or(self.token, |definition| definition.token)
    }

    /// First declared method with the given name
    #[must_use]
    pub fn method_by_name(&self, name: &str) -> Option<MethodRc> {
        self.methods
            .iter()
            .find(|(_, method)| method.name == name)
            .map(|(_, method)| method.clone())
    }

    /// All declared methods with the given name
    #[must_use]
    pub fn methods_by_name(&self, name: &str) -> Vec<MethodRc> {
        self.methods
            .iter()
            .filter(|(_, method)| method.name == name)
            .map(|(_, method)| method.clone())
            .collect()
    }

    /// Declared method with the given name and parameter types
    #[must_use]
    pub fn find_method(&self, name: &str, param_types: &[RtTypeRc]) -> Option<MethodRc> {
        self.methods
            .iter()
            .find(|(_, method)| method.name == name && method.parameters_match(param_types))
            .map(|(_, method)| method.clone())
    }

    /// Declared field with the given name
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<FieldRc> {
        self.fields
            .iter()
            .find(|(_, field)| field.name == name)
            .map(|(_, field)| field.clone())
    }

    /// Declared property with the given name
    #[must_use]
    pub fn property_by_name(&self, name: &str) -> Option<PropertyRc> {
        self.properties
            .iter()
            .find(|(_, property)| property.name == name)
            .map(|(_, property)| property.clone())
    }

    /// Declared event with the given name
    #[must_use]
    pub fn event_by_name(&self, name: &str) -> Option<EventRc> {
        self.events
            .iter()
            .find(|(_, event)| event.name == name)
            .map(|(_, event)| event.clone())
    }

    /// Declared nested type with the given name
    #[must_use]
    pub fn nested_type_by_name(&self, name: &str) -> Option<RtTypeRc> {
        self.nested_types
            .iter()
            .find(|(_, nested)| nested.name == name)
            .map(|(_, nested)| nested.clone())
    }

    /// Declared instance constructors
    #[must_use]
    pub fn constructors(&self) -> Vec<MethodRc> {
        self.methods
            .iter()
            .filter(|(_, method)| method.is_constructor())
            .map(|(_, method)| method.clone())
            .collect()
    }

    /// Declared type initializer (`.cctor`)
    #[must_use]
    pub fn type_initializer(&self) -> Option<MethodRc> {
        self.method_by_name(".cctor")
    }

    /// This type followed by all of its base types, most derived first
    #[must_use]
    pub fn hierarchy(self: &Arc<Self>) -> Vec<RtTypeRc> {
        let mut chain = vec![self.clone()];
        let mut current = self.base();
        while let Some(ty) = current {
            current = ty.base();
            chain.push(ty);
        }
        chain
    }

    /// Finds a field by name on this type or any base type
    #[must_use]
    pub fn find_field_in_hierarchy(self: &Arc<Self>, name: &str) -> Option<FieldRc> {
        self.hierarchy()
            .iter()
            .find_map(|ty| ty.field_by_name(name))
    }

    /// Finds a method by name and parameter types on this type or any base type
    #[must_use]
    pub fn find_method_in_hierarchy(
        self: &Arc<Self>,
        name: &str,
        param_types: &[RtTypeRc],
    ) -> Option<MethodRc> {
        self.hierarchy()
            .iter()
            .find_map(|ty| ty.find_method(name, param_types))
    }

    /// All instance fields of this type and its bases, base fields first
    #[must_use]
    pub fn instance_fields(self: &Arc<Self>) -> Vec<FieldRc> {
        let mut fields = Vec::new();
        for ty in self.hierarchy().iter().rev() {
            for (_, field) in ty.fields.iter() {
                if !field.is_static() {
                    fields.push(field.clone());
                }
            }
        }
        fields
    }

    /// Every interface implemented by this type or its bases, including inherited interfaces
    #[must_use]
    pub fn all_interfaces(self: &Arc<Self>) -> Vec<RtTypeRc> {
        let mut result: Vec<RtTypeRc> = Vec::new();
        let mut pending: Vec<RtTypeRc> = Vec::new();
        for ty in self.hierarchy() {
            for (_, interface) in ty.interfaces.iter() {
                pending.push(interface.clone());
            }
        }
        if self.is_interface() {
            pending.push(self.clone());
        }
        while let Some(interface) = pending.pop() {
            if result.iter().any(|known| known.token == interface.token) {
                continue;
            }
            for (_, inherited) in interface.interfaces.iter() {
                pending.push(inherited.clone());
            }
            result.push(interface);
        }
        result
    }

    /// Implements `interface` directly or through a base or inherited interface
    #[must_use]
    pub fn implements_interface(self: &Arc<Self>, interface: &RtType) -> bool {
        self.all_interfaces().iter().any(|candidate| {
            candidate.token == interface.token
                || candidate.definition_token() == interface.token
        })
    }

    /// Equals `ancestor` or derives from it
    #[must_use]
    pub fn is_subclass_of(self: &Arc<Self>, ancestor: &RtType) -> bool {
        self.hierarchy().iter().any(|ty| {
            ty.token == ancestor.token || ty.definition_token() == ancestor.token
        })
    }
}

impl fmt::Debug for RtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtType")
            .field("token", &self.token)
            .field("name", &self.full_name())
            .field("module", &self.module.name)
            .field("flavor", &self.flavor)
            .field("flags", &self.flags)
            .field("base", &self.base().map(|base| base.full_name()))
            .field("fields", &self.fields.count())
            .field("methods", &self.methods.count())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}
