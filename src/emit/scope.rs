//! Destination modules of a generation session.
//!
//! A [`ModuleScope`] holds at most one strong-named and one weak-named module. Types are
//! created into one of them according to a [`SigningPolicy`]; both are created lazily on first
//! use and can be persisted for external verification.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use crate::{
    emit::{persist, TypeEmitter},
    metadata::{
        identity::{Identity, DEFAULT_PUBLIC_KEY},
        module::ModuleRc,
        typesystem::{RtTypeRc, TypeAttributes, TypeRegistry},
    },
    Result,
};

/// Which destination module a generated type goes to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SigningPolicy {
    /// The strong-named module; every base type and interface must be strong-named too
    Strong,
    /// The weak-named module
    Weak,
    /// Strong-named if the base type and all interfaces are, weak-named otherwise
    #[default]
    Inherit,
}

/// Names, key and output location of the session modules.
///
/// # Example
///
/// ```rust,no_run
/// use dotweave::emit::ModuleScopeConfig;
///
/// let config = ModuleScopeConfig::persistent("target/generated");
/// assert!(config.output_directory.is_some());
/// ```
#[derive(Clone, Debug)]
pub struct ModuleScopeConfig {
    /// Name of the strong-named module
    pub strong_module_name: String,
    /// Name of the weak-named module
    pub weak_module_name: String,
    /// Public key of the strong-named module
    pub public_key: Vec<u8>,
    /// Directory persisted images are written to
    pub output_directory: Option<PathBuf>,
}

impl Default for ModuleScopeConfig {
    fn default() -> Self {
        ModuleScopeConfig {
            strong_module_name: "dotweave.Generated.Signed".to_string(),
            weak_module_name: "dotweave.Generated.Unsigned".to_string(),
            public_key: DEFAULT_PUBLIC_KEY.to_vec(),
            output_directory: None,
        }
    }
}

impl ModuleScopeConfig {
    /// Default names, persisting to `directory`
    #[must_use]
    pub fn persistent(directory: impl AsRef<Path>) -> Self {
        ModuleScopeConfig {
            output_directory: Some(directory.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Sets both module names
    #[must_use]
    pub fn with_module_names(mut self, strong: &str, weak: &str) -> Self {
        self.strong_module_name = strong.to_string();
        self.weak_module_name = weak.to_string();
        self
    }

    /// Sets the strong-name public key
    #[must_use]
    pub fn with_public_key(mut self, key: &[u8]) -> Self {
        self.public_key = key.to_vec();
        self
    }
}

/// The container of all types generated in one session
pub struct ModuleScope {
    registry: Arc<TypeRegistry>,
    config: ModuleScopeConfig,
    strong: OnceLock<ModuleRc>,
    weak: OnceLock<ModuleRc>,
}

impl ModuleScope {
    /// Creates a scope with the default configuration
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(registry, ModuleScopeConfig::default())
    }

    /// Creates a scope with `config`
    #[must_use]
    pub fn with_config(registry: Arc<TypeRegistry>, config: ModuleScopeConfig) -> Self {
        ModuleScope {
            registry,
            config,
            strong: OnceLock::new(),
            weak: OnceLock::new(),
        }
    }

    /// The session registry
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &ModuleScopeConfig {
        &self.config
    }

    /// The strong-named module, created on first use
    pub fn strong_named_module(&self) -> ModuleRc {
        self.strong
            .get_or_init(|| {
                tracing::debug!(module = %self.config.strong_module_name, "creating strong-named module");
                self.registry.create_module(
                    &self.config.strong_module_name,
                    Some(Identity::PubKey(self.config.public_key.clone())),
                )
            })
            .clone()
    }

    /// The weak-named module, created on first use
    pub fn weak_named_module(&self) -> ModuleRc {
        self.weak
            .get_or_init(|| {
                tracing::debug!(module = %self.config.weak_module_name, "creating weak-named module");
                self.registry
                    .create_module(&self.config.weak_module_name, None)
            })
            .clone()
    }

    /// Modules created so far, strong-named first
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleRc> {
        self.strong
            .get()
            .into_iter()
            .chain(self.weak.get())
            .cloned()
            .collect()
    }

    fn module_for(
        &self,
        policy: SigningPolicy,
        base: &RtTypeRc,
        interfaces: &[RtTypeRc],
    ) -> Result<ModuleRc> {
        let mut referenced = std::iter::once(base).chain(interfaces);
        match policy {
            SigningPolicy::Weak => Ok(self.weak_named_module()),
            SigningPolicy::Strong => {
                if let Some(weak) = referenced.find(|ty| !ty.module.is_strong_named()) {
                    return Err(shape_error!(
                        "A strong-named type cannot reference {} from the weak-named module {}",
                        weak.full_name(),
                        weak.module.name
                    ));
                }
                Ok(self.strong_named_module())
            }
            SigningPolicy::Inherit => {
                if referenced.all(|ty| ty.module.is_strong_named()) {
                    Ok(self.strong_named_module())
                } else {
                    Ok(self.weak_named_module())
                }
            }
        }
    }

    /// Starts a new type deriving from `base`.
    ///
    /// `name` is the full name of the type, its namespace being everything before the last
    /// dot.
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if `base` is sealed, an interface or an open
    /// constructed generic type, if an interface is not one, or if `policy` is
    /// [`SigningPolicy::Strong`] and a referenced type is weak-named.
    pub fn create_type(
        &self,
        name: &str,
        base: &RtTypeRc,
        interfaces: &[RtTypeRc],
        flags: TypeAttributes,
        policy: SigningPolicy,
    ) -> Result<TypeEmitter> {
        let module = self.module_for(policy, base, interfaces)?;
        let (namespace, simple_name) = match name.rfind('.') {
            Some(position) => (&name[..position], &name[position + 1..]),
            None => ("", name),
        };
        TypeEmitter::new(
            self.registry.clone(),
            module,
            namespace,
            simple_name,
            base,
            interfaces,
            flags,
        )
    }

    /// Writes an image of every module created so far into the output directory
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] without an output directory, and I/O or
    /// XML errors while writing.
    pub fn save_modules(&self) -> Result<Vec<PathBuf>> {
        let directory = self
            .config
            .output_directory
            .as_ref()
            .ok_or_else(|| protocol_error!("ModuleScope has no output directory configured"))?;
        persist::save_modules(&self.modules(), directory)
    }
}

impl std::fmt::Debug for ModuleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleScope")
            .field("config", &self.config)
            .field("strong", &self.strong.get().map(|module| module.name().to_string()))
            .field("weak", &self.weak.get().map(|module| module.name().to_string()))
            .finish()
    }
}
