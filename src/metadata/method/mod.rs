//! Methods, constructors and their bodies.
//!
//! A [`Method`] is created with its complete signature and receives its [`MethodBody`]
//! exactly once: host methods get a native closure when they are defined, generated methods
//! get their statement tree when the owning type is built. Until then a method is a
//! declaration only and cannot be invoked.
//!
//! Methods are identified inside their module by [`Token`]; across modules they are
//! identified by a [`MethodKey`], which the registry maps back to the method.

mod types;

use std::{
    fmt,
    sync::{Arc, OnceLock, Weak},
};

pub use types::*;

use crate::{
    emit::body::Statement,
    emulation::{EmValue, Runtime},
    metadata::{
        customattributes::CustomAttributeList,
        token::Token,
        typesystem::{RtType, RtTypeRc},
    },
    Result,
};

/// A reference-counted pointer to a `Method`
pub type MethodRc = Arc<Method>;
/// A vector that holds a list of `Method`
pub type MethodList = Arc<boxcar::Vec<MethodRc>>;

/// Signature of a native method body: runtime, receiver (`Null` for static methods) and
/// arguments in declaration order.
pub type NativeMethod =
    Arc<dyn Fn(&Runtime, &EmValue, &[EmValue]) -> Result<EmValue> + Send + Sync>;

/// Name used for instance constructors
pub const CONSTRUCTOR_NAME: &str = ".ctor";
/// Name used for type initializers
pub const TYPE_INITIALIZER_NAME: &str = ".cctor";

/// A method parameter
#[derive(Clone)]
pub struct Parameter {
    /// Name
    pub name: String,
    /// Declared type
    pub param_type: RtTypeRc,
}

impl Parameter {
    /// Create a new parameter
    #[must_use]
    pub fn new(name: &str, param_type: &RtTypeRc) -> Self {
        Parameter {
            name: name.to_string(),
            param_type: param_type.clone(),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.param_type.full_name())
    }
}

/// Statements and locals of a generated method
#[derive(Debug)]
pub struct EmittedBody {
    /// Types of the declared locals, addressed by index
    pub locals: Vec<RtTypeRc>,
    /// The statements, executed in order
    pub statements: Vec<Statement>,
}

/// The executable part of a method
#[derive(Clone)]
pub enum MethodBody {
    /// Host-provided implementation
    Native(NativeMethod),
    /// Statement tree interpreted by the runtime
    Emitted(Arc<EmittedBody>),
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Native(_) => write!(f, "MethodBody::Native"),
            MethodBody::Emitted(body) => f
                .debug_struct("MethodBody::Emitted")
                .field("locals", &body.locals.len())
                .field("statements", &body.statements.len())
                .finish(),
        }
    }
}

/// Stable, module-independent identity of a method.
///
/// The key is made of the module-qualified name of the declaring type, the method name and
/// a signature string in which generic parameters render positionally, so the key of a method
/// stays the same when it is looked up from another module.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    /// `[Module]Namespace.Type`
    pub declaring_type: String,
    /// Method name
    pub name: String,
    /// `ReturnType(Param1,Param2)`
    pub signature: String,
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}{}", self.declaring_type, self.name, self.signature)
    }
}

/// A method or constructor definition
pub struct Method {
    /// Token
    pub token: Token,
    /// Name
    pub name: String,
    /// Access, vtable layout and modifiers
    pub attributes: MethodAttributes,
    /// Return type (`System.Void` for none)
    pub return_type: RtTypeRc,
    /// Parameters, excluding the receiver
    pub params: Vec<Parameter>,
    /// Method-level generic parameters
    pub generic_params: Vec<RtTypeRc>,
    /// Methods this one explicitly overrides or implements (`MethodImpl` rows)
    pub overrides: Arc<boxcar::Vec<MethodRc>>,
    /// All custom attributes this method has
    pub custom_attributes: CustomAttributeList,
    pub(crate) declaring_type: Weak<RtType>,
    body: OnceLock<MethodBody>,
}

impl Method {
    pub(crate) fn new(
        token: Token,
        name: &str,
        attributes: MethodAttributes,
        return_type: RtTypeRc,
        params: Vec<Parameter>,
        generic_params: Vec<RtTypeRc>,
        declaring_type: Weak<RtType>,
    ) -> Self {
        Method {
            token,
            name: name.to_string(),
            attributes,
            return_type,
            params,
            generic_params,
            overrides: Arc::new(boxcar::Vec::new()),
            custom_attributes: Arc::new(boxcar::Vec::new()),
            declaring_type,
            body: OnceLock::new(),
        }
    }

    /// The type declaring this method
    #[must_use]
    pub fn declaring_type(&self) -> Option<RtTypeRc> {
        self.declaring_type.upgrade()
    }

    /// The type declaring this method, as an error if it has been dropped
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeNotFound`] when the declaring type is gone.
    pub fn owner(&self) -> Result<RtTypeRc> {
        self.declaring_type()
            .ok_or_else(|| crate::Error::TypeNotFound(format!("declaring type of {}", self.name)))
    }

    /// The attached body, if any
    #[must_use]
    pub fn body(&self) -> Option<&MethodBody> {
        self.body.get()
    }

    /// Attaches the body
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if the method already has a body.
    pub fn set_body(&self, body: MethodBody) -> Result<()> {
        self.body
            .set(body)
            .map_err(|_| protocol_error!("Method '{}' already has a body", self.full_name()))
    }

    /// Has a body attached
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.get().is_some()
    }

    /// Accessibility
    #[must_use]
    pub fn access(&self) -> MethodAccessFlags {
        self.attributes.access
    }

    /// Is a static method
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.modifiers.contains(MethodModifiers::STATIC)
    }

    /// Is virtual
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.attributes.modifiers.contains(MethodModifiers::VIRTUAL)
    }

    /// Is abstract
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.attributes.modifiers.contains(MethodModifiers::ABSTRACT)
    }

    /// Is sealed against further overriding
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.attributes.modifiers.contains(MethodModifiers::FINAL)
    }

    /// Introduces a new vtable slot
    #[must_use]
    pub fn is_new_slot(&self) -> bool {
        self.attributes.vtable == MethodVtableFlags::NEW_SLOT
    }

    /// Is an instance constructor
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    /// Is a type initializer
    #[must_use]
    pub fn is_type_initializer(&self) -> bool {
        self.name == TYPE_INITIALIZER_NAME
    }

    /// Returns `void`
    #[must_use]
    pub fn returns_void(&self) -> bool {
        self.return_type.is_void()
    }

    /// Declares method-level generic parameters
    #[must_use]
    pub fn is_generic_method_definition(&self) -> bool {
        !self.generic_params.is_empty()
    }

    /// Parameter types, in order
    #[must_use]
    pub fn param_types(&self) -> Vec<RtTypeRc> {
        self.params.iter().map(|p| p.param_type.clone()).collect()
    }

    /// `ReturnType(Param1,Param2)` with positional generic parameters
    #[must_use]
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| p.param_type.signature_name())
            .collect();
        let generic = if self.generic_params.is_empty() {
            String::new()
        } else {
            format!("<{}>", self.generic_params.len())
        };
        format!(
            "{}{}({})",
            generic,
            self.return_type.signature_name(),
            params.join(",")
        )
    }

    /// Same parameter and return types as `other`
    #[must_use]
    pub fn signature_matches(&self, other: &Method) -> bool {
        self.signature() == other.signature()
    }

    /// Parameters are exactly `param_types`
    #[must_use]
    pub fn parameters_match(&self, param_types: &[RtTypeRc]) -> bool {
        self.params.len() == param_types.len()
            && self
                .params
                .iter()
                .zip(param_types)
                .all(|(p, t)| p.param_type.signature_name() == t.signature_name())
    }

    /// Stable identity of this method
    #[must_use]
    pub fn key(&self) -> MethodKey {
        MethodKey {
            declaring_type: self
                .declaring_type()
                .map(|ty| ty.qualified_name())
                .unwrap_or_default(),
            name: self.name.clone(),
            signature: self.signature(),
        }
    }

    /// `Declaring.Type::Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.declaring_type() {
            Some(ty) => format!("{}::{}", ty.full_name(), self.name),
            None => self.name.clone(),
        }
    }

    /// Explicitly overrides or implements `target`
    #[must_use]
    pub fn explicitly_overrides(&self, target: &Method) -> bool {
        self.overrides
            .iter()
            .any(|(_, overridden)| overridden.token == target.token)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("token", &self.token)
            .field("name", &self.full_name())
            .field("access", &self.attributes.access.keyword())
            .field("modifiers", &self.attributes.modifiers)
            .field("vtable", &self.attributes.vtable)
            .field("signature", &self.signature())
            .field("body", &self.body.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::test::fixtures::{greeter_type, registry};

    #[test]
    fn test_key_survives_lookup() {
        let registry = registry();
        let greeter = greeter_type(&registry);
        let greet = greeter.method_by_name("Greet").unwrap();

        let key = greet.key();
        assert_eq!(key.name, "Greet");
        assert!(key.declaring_type.ends_with("Samples.Greeter"));
        assert_eq!(key.signature, "System.String()");

        let resolved = registry.resolve_method_key(&key).unwrap();
        assert_eq!(resolved.token, greet.token);
    }

    #[test]
    fn test_flags_and_body() {
        let registry = registry();
        let greeter = greeter_type(&registry);
        let greet = greeter.method_by_name("Greet").unwrap();
        assert!(greet.is_virtual());
        assert!(!greet.is_abstract());
        assert!(greet.has_body());
        assert!(!greet.returns_void());

        let ctor = greeter.constructors().pop().unwrap();
        assert!(ctor.is_constructor());
        assert!(ctor.returns_void());
    }
}
