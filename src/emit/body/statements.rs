//! Side-effecting nodes of the body model.

use crate::{
    emit::body::{Expression, Reference},
    metadata::typesystem::RtTypeRc,
    Result,
};

/// A node executed for its effect
#[derive(Clone, Debug)]
pub enum Statement {
    /// Statements executed in order
    Block(Vec<Statement>),
    /// Stores `value` into `target`
    Assign {
        /// Written location
        target: Reference,
        /// Stored value
        value: Expression,
    },
    /// Leaves the method, with a value for non-void methods
    Return(Option<Expression>),
    /// Executes `then` when `condition` is true
    If {
        /// Boolean condition
        condition: Expression,
        /// Conditional statements
        then: Vec<Statement>,
    },
    /// Executes `body`, then `finally` exactly once however `body` completes.
    ///
    /// An exception raised in `body` propagates after `finally` completed; an exception raised
    /// in `finally` replaces it. A return inside `body` takes effect after `finally`.
    TryFinally {
        /// Protected statements
        body: Vec<Statement>,
        /// Cleanup statements
        finally: Vec<Statement>,
    },
    /// Throws a new exception of `exception_type` carrying `message`
    Throw {
        /// Exception type, constructed through its `(string)` constructor when present
        exception_type: RtTypeRc,
        /// Message
        message: String,
    },
    /// Evaluates an expression and discards its value
    Pop(Expression),
}

impl Statement {
    /// `target = value`
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if `target` cannot be written.
    pub fn assign(target: Reference, value: Expression) -> Result<Self> {
        if !target.is_assignable() {
            return Err(protocol_error!("Cannot assign to {:?}", target));
        }
        Ok(Statement::Assign { target, value })
    }

    /// `return value;`
    #[must_use]
    pub fn ret(value: Expression) -> Self {
        Statement::Return(Some(value))
    }

    /// `return;`
    #[must_use]
    pub fn ret_void() -> Self {
        Statement::Return(None)
    }

    /// `if (condition) { then }`
    #[must_use]
    pub fn when(condition: Expression, then: Vec<Statement>) -> Self {
        Statement::If { condition, then }
    }

    /// `try { body } finally { finally }`
    #[must_use]
    pub fn try_finally(body: Vec<Statement>, finally: Vec<Statement>) -> Self {
        Statement::TryFinally { body, finally }
    }

    /// `throw new exception_type(message);`
    #[must_use]
    pub fn throw(exception_type: &RtTypeRc, message: &str) -> Self {
        Statement::Throw {
            exception_type: exception_type.clone(),
            message: message.to_string(),
        }
    }

    /// `expression;`
    #[must_use]
    pub fn pop(expression: Expression) -> Self {
        Statement::Pop(expression)
    }

    /// Does every path through this statement end in a return or throw
    #[must_use]
    pub fn always_exits(&self) -> bool {
        match self {
            Statement::Return(_) | Statement::Throw { .. } => true,
            Statement::Block(statements) => statements.iter().any(Statement::always_exits),
            Statement::TryFinally { body, finally } => {
                body.iter().any(Statement::always_exits)
                    || finally.iter().any(Statement::always_exits)
            }
            _ => false,
        }
    }
}
