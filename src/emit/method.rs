//! Emitter of one generated method.
//!
//! A [`MethodEmitter`] owns the locals and the ordered statement list of a method under
//! construction. The metadata [`Method`] exists from the moment the emitter is created so
//! that other bodies can already call it; its body is attached when the owning type is built.

use std::sync::Arc;

use crate::{
    emit::{
        attributes::{AttributeReplicator, AttributeTarget, CustomAttributeDescriptor},
        body::{Expression, LocalHandle, Reference, Statement},
    },
    metadata::{
        customattributes::CustomAttributeRc,
        method::{EmittedBody, Method, MethodBody, MethodRc},
        token::Token,
        typesystem::{RtTypeRc, TypeRegistry},
    },
    Result,
};

/// Index of a method emitter inside its [`crate::emit::TypeEmitter`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodHandle {
    /// Token of the type whose emitter issued the handle
    pub(crate) owner: Token,
    pub(crate) index: usize,
}

/// A method under construction
pub struct MethodEmitter {
    registry: Arc<TypeRegistry>,
    method: MethodRc,
    locals: Vec<RtTypeRc>,
    statements: Vec<Statement>,
    finalized: bool,
}

impl MethodEmitter {
    pub(crate) fn new(registry: Arc<TypeRegistry>, method: MethodRc) -> Self {
        MethodEmitter {
            registry,
            method,
            locals: Vec::new(),
            statements: Vec::new(),
            finalized: false,
        }
    }

    /// The method being built
    #[must_use]
    pub fn method(&self) -> &MethodRc {
        &self.method
    }

    /// Method name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.method.name
    }

    /// Has the body been attached
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Statements added so far
    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            return Err(protocol_error!(
                "Method {} is already finalized",
                self.method.full_name()
            ));
        }
        Ok(())
    }

    /// Declares a local of type `ty`
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] after finalization.
    pub fn declare_local(&mut self, ty: &RtTypeRc) -> Result<LocalHandle> {
        self.ensure_open()?;
        let index = u16::try_from(self.locals.len())
            .map_err(|_| protocol_error!("Too many locals in {}", self.method.full_name()))?;
        self.locals.push(ty.clone());
        Ok(LocalHandle { index })
    }

    /// Appends a statement
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] after finalization or for abstract methods.
    pub fn add_statement(&mut self, statement: Statement) -> Result<&mut Self> {
        self.ensure_open()?;
        if self.method.is_abstract() {
            return Err(protocol_error!(
                "Abstract method {} cannot have a body",
                self.method.full_name()
            ));
        }
        self.statements.push(statement);
        Ok(self)
    }

    /// Appends several statements
    ///
    /// # Errors
    /// See [`MethodEmitter::add_statement`].
    pub fn add_statements(&mut self, statements: impl IntoIterator<Item = Statement>) -> Result<&mut Self> {
        for statement in statements {
            self.add_statement(statement)?;
        }
        Ok(self)
    }

    /// Loads of every parameter, in order
    #[must_use]
    pub fn argument_expressions(&self) -> Vec<Expression> {
        (0..self.method.params.len())
            .filter_map(|index| u16::try_from(index).ok())
            .map(Expression::argument)
            .collect()
    }

    /// Receiver expression: `this`, or nothing for static methods
    fn receiver(&self) -> Option<Expression> {
        (!self.method.is_static()).then(Expression::this)
    }

    /// `return value;`
    ///
    /// # Errors
    /// See [`MethodEmitter::add_statement`].
    pub fn implement_by_returning(&mut self, value: Expression) -> Result<&mut Self> {
        self.add_statement(Statement::ret(value))
    }

    /// Forwards all arguments to `target` on `owner` and returns its result
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeViolation`] if the parameter lists differ.
    pub fn implement_by_delegating(
        &mut self,
        owner: Option<Reference>,
        target: &MethodRc,
    ) -> Result<&mut Self> {
        if target.params.len() != self.method.params.len() {
            return Err(shape_error!(
                "Cannot delegate {} to {}: {} parameters against {}",
                self.method.full_name(),
                target.full_name(),
                self.method.params.len(),
                target.params.len()
            ));
        }
        let call = Expression::call(owner.map(Reference::load), target, self.argument_expressions());
        self.finish_with_call(call)
    }

    /// Calls `base_method` non-virtually on `this` and returns its result
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if `base_method` is abstract.
    pub fn implement_by_base_call(&mut self, base_method: &MethodRc) -> Result<&mut Self> {
        if base_method.is_abstract() {
            return Err(protocol_error!(
                "Cannot call abstract base method {}, it has no body",
                base_method.full_name()
            ));
        }
        if base_method.params.len() != self.method.params.len() {
            return Err(shape_error!(
                "Base method {} does not match {}",
                base_method.full_name(),
                self.method.full_name()
            ));
        }
        let call = Expression::call_non_virtual(self.receiver(), base_method, self.argument_expressions());
        self.finish_with_call(call)
    }

    /// `throw new exception_type(message);`
    ///
    /// # Errors
    /// See [`MethodEmitter::add_statement`].
    pub fn implement_by_throwing(&mut self, exception_type: &RtTypeRc, message: &str) -> Result<&mut Self> {
        self.add_statement(Statement::throw(exception_type, message))
    }

    fn finish_with_call(&mut self, call: Expression) -> Result<&mut Self> {
        if self.method.returns_void() {
            self.add_statement(Statement::pop(call))?;
            self.add_statement(Statement::ret_void())
        } else {
            let typed = call.typed(&self.method.return_type.clone());
            self.add_statement(Statement::ret(typed))
        }
    }

    /// Applies a custom attribute to the method
    ///
    /// # Errors
    /// Returns [`crate::Error::AttributeShape`] if the attribute does not fit.
    pub fn add_custom_attribute(&mut self, descriptor: &CustomAttributeDescriptor) -> Result<CustomAttributeRc> {
        self.ensure_open()?;
        AttributeReplicator::new(self.registry.clone())
            .generate(AttributeTarget::Method(&self.method), descriptor)
    }

    /// Attaches the body; later calls do nothing.
    ///
    /// A void method whose statements can fall off the end gets an implicit `return`.
    pub(crate) fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if self.method.is_abstract() {
            self.finalized = true;
            return Ok(());
        }

        let falls_through = !self.statements.iter().any(Statement::always_exits);
        if falls_through {
            if !self.method.returns_void() {
                return Err(protocol_error!(
                    "Method {} returns {} but its body can complete without a return",
                    self.method.full_name(),
                    self.method.return_type.full_name()
                ));
            }
            self.statements.push(Statement::ret_void());
        }

        let body = EmittedBody {
            locals: std::mem::take(&mut self.locals),
            statements: std::mem::take(&mut self.statements),
        };
        tracing::trace!(
            method = %self.method.full_name(),
            statements = body.statements.len(),
            locals = body.locals.len(),
            "method finalized"
        );
        self.method.set_body(MethodBody::Emitted(Arc::new(body)))?;
        self.finalized = true;
        Ok(())
    }
}

impl std::fmt::Debug for MethodEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEmitter")
            .field("method", &self.method.full_name())
            .field("statements", &self.statements.len())
            .field("finalized", &self.finalized)
            .finish()
    }
}

/// Does `method` keep the shape of the member it was generated from
#[must_use]
pub fn same_shape(method: &Method, other: &Method) -> bool {
    method.name == other.name
        && method.attributes.access == other.attributes.access
        && method.signature_matches(other)
}
