//! Declarative method body model.
//!
//! Method bodies of generated types are described as small trees of [`Statement`]s and
//! [`Expression`]s instead of raw instructions. The trees are attached to a method when its
//! type is built and executed by the interpreter in [`crate::emulation`].
//!
//! # Key Components
//!
//! - [`Statement`] - `Block`, `Assign`, `Return`, `If`, `TryFinally`, `Throw`, `Pop`
//! - [`Expression`] - constants, loads, invocations, allocation, delegates, casts, comparisons
//! - [`Reference`] - `this`, arguments, locals, fields, properties and indirections
//!
//! Address-of and assignment are only accepted for storage locations; the checked
//! constructors [`Expression::address_of`] and [`Statement::assign`] reject anything else.
//!
//! # Example
//!
//! ```rust,no_run
//! use dotweave::emit::body::{Expression, Reference, Statement};
//!
//! // try { return this.ToString(); } finally { }
//! let body = Statement::try_finally(
//!     vec![Statement::ret(Expression::constant("done"))],
//!     vec![],
//! );
//! assert!(body.always_exits());
//! assert!(Expression::address_of(Reference::This).is_err());
//! ```

mod expressions;
mod references;
mod statements;

pub use expressions::{new_delegate, Comparison, Dispatch, Expression, MethodInvocation};
pub use references::{LocalHandle, Reference};
pub use statements::Statement;
