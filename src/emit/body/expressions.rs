//! Value-producing nodes of the body model.

use crate::{
    emit::body::Reference,
    emulation::EmValue,
    metadata::{
        members::FieldRc,
        method::MethodRc,
        typesystem::{RtTypeRc, TypeRegistry},
    },
    Result,
};

/// How an invoked method is bound to its receiver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Resolve the override on the receiver's runtime type
    Virtual,
    /// Call exactly the given method (base calls, static and non-virtual methods)
    NonVirtual,
}

/// Kind of a comparison expression
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    /// Values are equal (identity for references)
    Equal,
    /// Values differ
    NotEqual,
}

/// A method call
#[derive(Clone, Debug)]
pub struct MethodInvocation {
    /// Receiver, `None` for static methods
    pub owner: Option<Expression>,
    /// Called method
    pub method: MethodRc,
    /// Arguments in parameter order
    pub arguments: Vec<Expression>,
    /// Binding of the call
    pub dispatch: Dispatch,
    /// Statically known result type; the result is cast to it
    pub typed_return: Option<RtTypeRc>,
}

/// A node that produces a value.
///
/// Expressions are immutable trees; they reference metadata members but never the emitter
/// they are rendered into.
#[derive(Clone, Debug)]
pub enum Expression {
    /// A constant value
    Constant(EmValue),
    /// Reads a reference
    Load(Reference),
    /// Address of a storage location, see [`Expression::address_of`]
    AddressOf(Reference),
    /// Method invocation
    Invoke(Box<MethodInvocation>),
    /// Allocates an instance and runs `constructor` on it
    NewInstance {
        /// Constructor to run
        constructor: MethodRc,
        /// Constructor arguments
        arguments: Vec<Expression>,
    },
    /// Allocates an array holding `elements`
    NewArray {
        /// Element type
        element_type: RtTypeRc,
        /// Initial elements
        elements: Vec<Expression>,
    },
    /// Binds `method` to `target` as a delegate of `delegate_type`
    NewDelegate {
        /// The delegate type
        delegate_type: RtTypeRc,
        /// Bound receiver, a null constant for static methods
        target: Box<Expression>,
        /// Bound method
        method: MethodRc,
        /// Resolve the method on the receiver on every invocation
        virtual_dispatch: bool,
    },
    /// Invokes a delegate value
    InvokeDelegate {
        /// The delegate
        delegate: Box<Expression>,
        /// Arguments
        arguments: Vec<Expression>,
    },
    /// Resets a value type location to its default value in place; yields no value
    InitValueType {
        /// The location
        target: Reference,
        /// The value type
        value_type: RtTypeRc,
    },
    /// Reference conversion or unboxing; failure throws `InvalidCastException`
    Cast {
        /// Converted value
        value: Box<Expression>,
        /// Target type
        target_type: RtTypeRc,
    },
    /// Compares two values
    Compare {
        /// Comparison
        kind: Comparison,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
}

impl Expression {
    /// The null constant
    #[must_use]
    pub fn null() -> Self {
        Expression::Constant(EmValue::Null)
    }

    /// A constant
    #[must_use]
    pub fn constant(value: impl Into<EmValue>) -> Self {
        Expression::Constant(value.into())
    }

    /// `typeof(ty)`
    #[must_use]
    pub fn type_of(ty: &RtTypeRc) -> Self {
        Expression::Constant(EmValue::Type(ty.clone()))
    }

    /// Method handle constant
    #[must_use]
    pub fn method_of(method: &MethodRc) -> Self {
        Expression::Constant(EmValue::Method(method.clone()))
    }

    /// `this`
    #[must_use]
    pub fn this() -> Self {
        Expression::Load(Reference::This)
    }

    /// Parameter `index`
    #[must_use]
    pub fn argument(index: u16) -> Self {
        Expression::Load(Reference::Argument(index))
    }

    /// Reads a field of `this`
    #[must_use]
    pub fn this_field(field: &FieldRc) -> Self {
        Expression::Load(Reference::field(Reference::This, field))
    }

    /// Address of a storage location.
    ///
    /// Fields of a value type held in a local, an argument or another field are addressed in
    /// place, so writes through the pointer reach the original instance.
    ///
    /// # Errors
    /// Returns [`crate::Error::ProtocolViolation`] if `reference` is a property, `this` or a
    /// plain expression.
    pub fn address_of(reference: Reference) -> Result<Self> {
        if !reference.is_storage() {
            return Err(protocol_error!(
                "Cannot take the address of {:?}, it is not a storage location",
                reference
            ));
        }
        Ok(Expression::AddressOf(reference))
    }

    /// Virtual (or static) call of `method`
    #[must_use]
    pub fn call(owner: Option<Expression>, method: &MethodRc, arguments: Vec<Expression>) -> Self {
        let dispatch = if method.is_virtual() {
            Dispatch::Virtual
        } else {
            Dispatch::NonVirtual
        };
        Expression::Invoke(Box::new(MethodInvocation {
            owner,
            method: method.clone(),
            arguments,
            dispatch,
            typed_return: None,
        }))
    }

    /// Non-virtual call of exactly `method`
    #[must_use]
    pub fn call_non_virtual(
        owner: Option<Expression>,
        method: &MethodRc,
        arguments: Vec<Expression>,
    ) -> Self {
        Expression::Invoke(Box::new(MethodInvocation {
            owner,
            method: method.clone(),
            arguments,
            dispatch: Dispatch::NonVirtual,
            typed_return: None,
        }))
    }

    /// Marks an invocation as returning `ty`; other expressions are cast
    #[must_use]
    pub fn typed(self, ty: &RtTypeRc) -> Self {
        match self {
            Expression::Invoke(mut invocation) => {
                invocation.typed_return = Some(ty.clone());
                Expression::Invoke(invocation)
            }
            other => other.cast(ty),
        }
    }

    /// Allocates an instance through `constructor`
    #[must_use]
    pub fn new_instance(constructor: &MethodRc, arguments: Vec<Expression>) -> Self {
        Expression::NewInstance {
            constructor: constructor.clone(),
            arguments,
        }
    }

    /// Array of `element_type` holding `elements`
    #[must_use]
    pub fn new_array(element_type: &RtTypeRc, elements: Vec<Expression>) -> Self {
        Expression::NewArray {
            element_type: element_type.clone(),
            elements,
        }
    }

    /// Converts to `target_type`
    #[must_use]
    pub fn cast(self, target_type: &RtTypeRc) -> Self {
        Expression::Cast {
            value: Box::new(self),
            target_type: target_type.clone(),
        }
    }

    /// `self == other`
    #[must_use]
    pub fn equals(self, other: Expression) -> Self {
        Expression::Compare {
            kind: Comparison::Equal,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// `self != other`
    #[must_use]
    pub fn not_equals(self, other: Expression) -> Self {
        Expression::Compare {
            kind: Comparison::NotEqual,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// `self == null`
    #[must_use]
    pub fn is_null(self) -> Self {
        self.equals(Expression::null())
    }

    /// Statically known type of the produced value, where the node carries it
    #[must_use]
    pub fn static_type(&self) -> Option<RtTypeRc> {
        match self {
            Expression::Load(reference) => reference.static_type(),
            Expression::Invoke(invocation) => invocation
                .typed_return
                .clone()
                .or_else(|| Some(invocation.method.return_type.clone())),
            Expression::NewInstance { constructor, .. } => constructor.declaring_type(),
            Expression::NewDelegate { delegate_type, .. } => Some(delegate_type.clone()),
            Expression::Cast { target_type, .. } => Some(target_type.clone()),
            _ => None,
        }
    }

    /// Number of nodes in this tree
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + match self {
            Expression::Load(reference) | Expression::AddressOf(reference) => {
                reference_node_count(reference)
            }
            Expression::Invoke(invocation) => {
                invocation.owner.as_ref().map_or(0, Expression::node_count)
                    + invocation.arguments.iter().map(Expression::node_count).sum::<usize>()
            }
            Expression::NewInstance { arguments, .. }
            | Expression::NewArray {
                elements: arguments,
                ..
            } => arguments.iter().map(Expression::node_count).sum(),
            Expression::NewDelegate { target, .. } => target.node_count(),
            Expression::InvokeDelegate {
                delegate,
                arguments,
            } => delegate.node_count() + arguments.iter().map(Expression::node_count).sum::<usize>(),
            Expression::InitValueType { target, .. } => reference_node_count(target),
            Expression::Cast { value, .. } => value.node_count(),
            Expression::Compare { left, right, .. } => left.node_count() + right.node_count(),
            Expression::Constant(_) => 0,
        }
    }
}

fn reference_node_count(reference: &Reference) -> usize {
    match reference {
        Reference::Field { owner, .. } => reference_node_count(owner),
        Reference::Property {
            owner, arguments, ..
        } => {
            owner.as_deref().map_or(0, reference_node_count)
                + arguments.iter().map(Expression::node_count).sum::<usize>()
        }
        Reference::Indirect(expression) | Reference::Expression(expression) => {
            expression.node_count()
        }
        _ => 0,
    }
}

/// Delegate expression bound to `method` on `target`
///
/// # Errors
/// Returns [`crate::Error::ShapeViolation`] if `delegate_type` is not a delegate type.
pub fn new_delegate(
    registry: &TypeRegistry,
    delegate_type: &RtTypeRc,
    target: Expression,
    method: &MethodRc,
    virtual_dispatch: bool,
) -> Result<Expression> {
    if !delegate_type.is_subclass_of(&registry.core().delegate) {
        return Err(shape_error!(
            "{} is not a delegate type",
            delegate_type.full_name()
        ));
    }
    Ok(Expression::NewDelegate {
        delegate_type: delegate_type.clone(),
        target: Box::new(target),
        method: method.clone(),
        virtual_dispatch,
    })
}
