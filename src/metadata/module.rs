//! Modules: the compilation units types and members are defined in.
//!
//! A [`Module`] owns a token-indexed map of everything it defines. Tokens are minted by the
//! [`crate::metadata::typesystem::TypeRegistry`] and resolve only inside the module whose
//! member map contains them; probing a foreign token yields `None`, exactly like a metadata
//! token looked up in the wrong image.

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use sha1::{Digest, Sha1};

use crate::metadata::{
    identity::{HashAlgorithm, Identity},
    members::{EventRc, FieldRc, PropertyRc},
    method::MethodRc,
    token::Token,
    typesystem::RtTypeRc,
};

/// A reference-counted pointer to a `Module`
pub type ModuleRc = Arc<Module>;

/// Name, version id and optional strong name of a module.
///
/// Types hold on to the identity of their defining module rather than the module itself,
/// which keeps the module -> type -> module ownership acyclic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdentity {
    /// Simple module name (also used as the assembly name)
    pub name: String,
    /// Module version id, derived deterministically from the name
    pub mvid: uguid::Guid,
    /// Public key of a strong-named module
    pub strong_name: Option<Identity>,
}

impl ModuleIdentity {
    /// Creates the identity of a module called `name`
    #[must_use]
    pub fn new(name: &str, strong_name: Option<Identity>) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        // RFC 4122 version 5 / variant bits
        bytes[6] = (bytes[6] & 0x0F) | 0x50;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;

        ModuleIdentity {
            name: name.to_string(),
            mvid: uguid::Guid::from_bytes(bytes),
            strong_name,
        }
    }

    /// Is this module strong-named
    #[must_use]
    pub fn is_strong_named(&self) -> bool {
        self.strong_name.is_some()
    }

    /// The 8-byte public key token, if strong-named
    #[must_use]
    pub fn public_key_token(&self) -> Option<u64> {
        self.strong_name
            .as_ref()
            .and_then(|identity| identity.to_token(HashAlgorithm::Sha1).ok())
    }

    /// Display name in the `Name, PublicKeyToken=...` form
    #[must_use]
    pub fn display_name(&self) -> String {
        match self
            .strong_name
            .as_ref()
            .and_then(|identity| identity.token_string().ok())
        {
            Some(token) => format!("{}, PublicKeyToken={}", self.name, token),
            None => format!("{}, PublicKeyToken=null", self.name),
        }
    }
}

/// Anything a module can define
#[derive(Clone, Debug)]
pub enum ModuleMember {
    /// A type definition
    Type(RtTypeRc),
    /// A method or constructor
    Method(MethodRc),
    /// A field
    Field(FieldRc),
    /// A property
    Property(PropertyRc),
    /// An event
    Event(EventRc),
}

/// One compilation unit
pub struct Module {
    /// Name, mvid and strong name
    pub identity: Arc<ModuleIdentity>,
    members: SkipMap<Token, ModuleMember>,
}

impl Module {
    /// Creates an empty module
    #[must_use]
    pub fn new(identity: ModuleIdentity) -> Self {
        Module {
            identity: Arc::new(identity),
            members: SkipMap::new(),
        }
    }

    /// Module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Registers a member under its token
    pub fn insert(&self, token: Token, member: ModuleMember) {
        self.members.insert(token, member);
    }

    /// Looks up any member by token
    #[must_use]
    pub fn resolve(&self, token: Token) -> Option<ModuleMember> {
        self.members.get(&token).map(|entry| entry.value().clone())
    }

    /// Looks up a type definition by token
    #[must_use]
    pub fn resolve_type(&self, token: Token) -> Option<RtTypeRc> {
        match self.resolve(token) {
            Some(ModuleMember::Type(ty)) => Some(ty),
            _ => None,
        }
    }

    /// Looks up a method by token
    #[must_use]
    pub fn resolve_method(&self, token: Token) -> Option<MethodRc> {
        match self.resolve(token) {
            Some(ModuleMember::Method(method)) => Some(method),
            _ => None,
        }
    }

    /// Looks up a field by token
    #[must_use]
    pub fn resolve_field(&self, token: Token) -> Option<FieldRc> {
        match self.resolve(token) {
            Some(ModuleMember::Field(field)) => Some(field),
            _ => None,
        }
    }

    /// All type definitions, in token order
    #[must_use]
    pub fn types(&self) -> Vec<RtTypeRc> {
        self.members
            .iter()
            .filter_map(|entry| match entry.value() {
                ModuleMember::Type(ty) => Some(ty.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of members defined in this module
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Module defines nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.identity.name)
            .field("mvid", &self.identity.mvid)
            .field("members", &self.members.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::identity::DEFAULT_PUBLIC_KEY;

    #[test]
    fn test_mvid_is_stable_per_name() {
        let a = ModuleIdentity::new("Generated", None);
        let b = ModuleIdentity::new("Generated", None);
        let c = ModuleIdentity::new("Other", None);
        assert_eq!(a.mvid, b.mvid);
        assert_ne!(a.mvid, c.mvid);
    }

    #[test]
    fn test_display_name() {
        let weak = ModuleIdentity::new("Weak", None);
        assert_eq!(weak.display_name(), "Weak, PublicKeyToken=null");
        assert!(weak.public_key_token().is_none());

        let strong = ModuleIdentity::new(
            "Strong",
            Some(Identity::PubKey(DEFAULT_PUBLIC_KEY.to_vec())),
        );
        assert!(strong.is_strong_named());
        assert!(strong.public_key_token().is_some());
        assert!(!strong.display_name().ends_with("null"));
    }

    #[test]
    fn test_foreign_tokens_do_not_resolve() {
        let module = Module::new(ModuleIdentity::new("Empty", None));
        assert!(module.is_empty());
        assert!(module.resolve_method(Token(0x0600_0001)).is_none());
    }
}
