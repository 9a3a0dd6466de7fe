//! Tree-walking interpreter for emitted method bodies.
//!
//! Every invocation of an emitted method gets a fresh [`Interpreter`] holding the frame: the
//! receiver, one slot per argument and one per declared local. Slots are shared cells so that
//! address-of expressions can hand out pointers to them.

use std::sync::{Arc, RwLock};

use crate::{
    emit::body::{Comparison, Dispatch, Expression, MethodInvocation, Reference, Statement},
    emulation::{heap::HeapArray, EmValue, ManagedPointer, Runtime},
    metadata::method::{EmittedBody, Method},
    Result,
};

type Slot = Arc<RwLock<EmValue>>;

/// How a statement completed
enum Flow {
    /// Continue with the next statement
    Next,
    /// Leave the method with a value
    Return(EmValue),
}

/// Executes one activation of an emitted method
pub(crate) struct Interpreter<'r> {
    runtime: &'r Runtime,
    method: &'r Method,
    body: Arc<EmittedBody>,
    this: EmValue,
    arguments: Vec<Slot>,
    locals: Vec<Slot>,
}

impl<'r> Interpreter<'r> {
    pub(crate) fn new(
        runtime: &'r Runtime,
        method: &'r Method,
        body: &Arc<EmittedBody>,
        this: EmValue,
        args: &[EmValue],
    ) -> Self {
        Interpreter {
            runtime,
            method,
            body: body.clone(),
            this,
            arguments: args
                .iter()
                .map(|value| Arc::new(RwLock::new(value.clone())))
                .collect(),
            locals: body
                .locals
                .iter()
                .map(|ty| Arc::new(RwLock::new(EmValue::default_for(ty))))
                .collect(),
        }
    }

    pub(crate) fn run(&self) -> Result<EmValue> {
        let body = self.body.clone();
        match self.execute_all(&body.statements)? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(EmValue::Void),
        }
    }

    fn execute_all(&self, statements: &[Statement]) -> Result<Flow> {
        for statement in statements {
            if let Flow::Return(value) = self.execute(statement)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn execute(&self, statement: &Statement) -> Result<Flow> {
        match statement {
            Statement::Block(statements) => self.execute_all(statements),
            Statement::Assign { target, value } => {
                let value = self.evaluate(value)?;
                self.store(target, value)?;
                Ok(Flow::Next)
            }
            Statement::Return(value) => Ok(Flow::Return(match value {
                Some(expression) => self.evaluate(expression)?,
                None => EmValue::Void,
            })),
            Statement::If { condition, then } => {
                let value = self.evaluate(condition)?;
                let taken = value.as_bool().ok_or_else(|| {
                    protocol_error!(
                        "Condition in {} evaluated to non-boolean {:?}",
                        self.method.full_name(),
                        value
                    )
                })?;
                if taken {
                    self.execute_all(then)
                } else {
                    Ok(Flow::Next)
                }
            }
            Statement::TryFinally { body, finally } => {
                let outcome = self.execute_all(body);
                match self.execute_all(finally)? {
                    Flow::Return(value) => Ok(Flow::Return(value)),
                    Flow::Next => outcome,
                }
            }
            Statement::Throw {
                exception_type,
                message,
            } => Err(self.runtime.throw_new(exception_type, message)),
            Statement::Pop(expression) => {
                self.evaluate(expression)?;
                Ok(Flow::Next)
            }
        }
    }

    fn evaluate(&self, expression: &Expression) -> Result<EmValue> {
        match expression {
            Expression::Constant(value) => Ok(value.clone()),
            Expression::Load(reference) => self.load(reference),
            Expression::AddressOf(reference) => Ok(EmValue::ManagedPtr(self.address(reference)?)),
            Expression::Invoke(invocation) => self.invoke(invocation),
            Expression::NewInstance {
                constructor,
                arguments,
            } => {
                let arguments = self.evaluate_all(arguments)?;
                self.runtime.construct(constructor, &arguments)
            }
            Expression::NewArray {
                element_type,
                elements,
            } => {
                let elements = self.evaluate_all(elements)?;
                Ok(EmValue::Array(HeapArray::new(element_type, elements)))
            }
            Expression::NewDelegate {
                delegate_type,
                target,
                method,
                virtual_dispatch,
            } => {
                let target = self.evaluate(target)?;
                Ok(self
                    .runtime
                    .create_delegate(delegate_type, target, method, *virtual_dispatch))
            }
            Expression::InvokeDelegate {
                delegate,
                arguments,
            } => {
                let delegate = self.evaluate(delegate)?;
                let arguments = self.evaluate_all(arguments)?;
                self.runtime.invoke_delegate(&delegate, &arguments)
            }
            Expression::InitValueType { target, value_type } => {
                self.store(target, EmValue::default_for(value_type))?;
                Ok(EmValue::Void)
            }
            Expression::Cast { value, target_type } => {
                let value = self.evaluate(value)?;
                self.runtime.cast(value, target_type)
            }
            Expression::Compare { kind, left, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                let equal = values_equal(&left, &right);
                Ok(EmValue::Bool(match kind {
                    Comparison::Equal => equal,
                    Comparison::NotEqual => !equal,
                }))
            }
        }
    }

    fn evaluate_all(&self, expressions: &[Expression]) -> Result<Vec<EmValue>> {
        expressions
            .iter()
            .map(|expression| self.evaluate(expression))
            .collect()
    }

    fn invoke(&self, invocation: &MethodInvocation) -> Result<EmValue> {
        let receiver = match &invocation.owner {
            Some(owner) => match self.evaluate(owner)? {
                EmValue::ValueType(instance) => EmValue::ManagedPtr(ManagedPointer::Slot(
                    Arc::new(RwLock::new(EmValue::ValueType(instance))),
                )),
                value => value,
            },
            None => EmValue::Null,
        };
        let arguments = self.evaluate_all(&invocation.arguments)?;

        let result = match invocation.dispatch {
            Dispatch::Virtual => {
                self.runtime
                    .invoke_virtual(&invocation.method, &receiver, &arguments)?
            }
            Dispatch::NonVirtual => self
                .runtime
                .invoke(&invocation.method, &receiver, &arguments)?,
        };

        match &invocation.typed_return {
            Some(ty) if !result.is_void() => self.runtime.cast(result, ty),
            _ => Ok(result),
        }
    }

    fn argument(&self, index: u16) -> Result<&Slot> {
        self.arguments.get(usize::from(index)).ok_or_else(|| {
            protocol_error!(
                "{} has no argument {}",
                self.method.full_name(),
                index
            )
        })
    }

    fn local(&self, index: u16) -> Result<&Slot> {
        self.locals.get(usize::from(index)).ok_or_else(|| {
            protocol_error!("{} has no local {}", self.method.full_name(), index)
        })
    }

    /// The receiver for a field access: value types in storage are addressed so that writes
    /// reach the original location
    fn field_owner(&self, owner: &Reference) -> Result<EmValue> {
        if owner.is_storage() {
            let value = self.load(owner)?;
            if matches!(value, EmValue::ValueType(_)) {
                return Ok(EmValue::ManagedPtr(self.address(owner)?));
            }
            return Ok(value);
        }
        self.load(owner)
    }

    fn load(&self, reference: &Reference) -> Result<EmValue> {
        match reference {
            Reference::This => Ok(self.this.clone()),
            Reference::Argument(index) => Ok(read_lock!(self.argument(*index)?).clone()),
            Reference::Local(handle) => Ok(read_lock!(self.local(handle.index())?).clone()),
            Reference::Field { owner, field } => {
                let owner = self.field_owner(owner)?;
                self.runtime.load_field(&owner, field)
            }
            Reference::StaticField(field) => self.runtime.load_static(field),
            Reference::Property {
                owner,
                property,
                arguments,
            } => {
                let getter = property.getter().ok_or_else(|| {
                    crate::Error::MemberNotFound(format!("{} has no getter", property.name))
                })?;
                let receiver = match owner {
                    Some(owner) => self.field_owner(owner)?,
                    None => EmValue::Null,
                };
                let arguments = self.evaluate_all(arguments)?;
                self.runtime.invoke_virtual(&getter, &receiver, &arguments)
            }
            Reference::Indirect(pointer) => match self.evaluate(pointer)? {
                EmValue::ManagedPtr(pointer) => self.runtime.read_pointer(&pointer),
                other => Err(protocol_error!("Cannot dereference {:?}", other)),
            },
            Reference::Expression(expression) => self.evaluate(expression),
        }
    }

    fn store(&self, reference: &Reference, value: EmValue) -> Result<()> {
        match reference {
            Reference::Argument(index) => {
                *write_lock!(self.argument(*index)?) = value;
                Ok(())
            }
            Reference::Local(handle) => {
                *write_lock!(self.local(handle.index())?) = value;
                Ok(())
            }
            Reference::Field { owner, field } => {
                let owner = self.field_owner(owner)?;
                self.runtime.store_field(&owner, field, value)
            }
            Reference::StaticField(field) => self.runtime.store_static(field, value),
            Reference::Property {
                owner,
                property,
                arguments,
            } => {
                let setter = property.setter().ok_or_else(|| {
                    crate::Error::MemberNotFound(format!("{} has no setter", property.name))
                })?;
                let receiver = match owner {
                    Some(owner) => self.field_owner(owner)?,
                    None => EmValue::Null,
                };
                let mut arguments = self.evaluate_all(arguments)?;
                arguments.push(value);
                self.runtime.invoke_virtual(&setter, &receiver, &arguments)?;
                Ok(())
            }
            Reference::Indirect(pointer) => match self.evaluate(pointer)? {
                EmValue::ManagedPtr(pointer) => self.runtime.write_pointer(&pointer, value),
                other => Err(protocol_error!("Cannot dereference {:?}", other)),
            },
            Reference::This => match &self.this {
                EmValue::ManagedPtr(pointer) => self.runtime.write_pointer(pointer, value),
                _ => Err(protocol_error!("Cannot assign to 'this' of a reference type")),
            },
            Reference::Expression(_) => Err(protocol_error!("Cannot assign to an expression")),
        }
    }

    fn address(&self, reference: &Reference) -> Result<ManagedPointer> {
        match reference {
            Reference::Argument(index) => Ok(ManagedPointer::Slot(self.argument(*index)?.clone())),
            Reference::Local(handle) => Ok(ManagedPointer::Slot(self.local(handle.index())?.clone())),
            Reference::StaticField(field) => Ok(ManagedPointer::StaticField(field.clone())),
            Reference::Field { owner, field } => match self.field_owner(owner)? {
                EmValue::Object(object) => Ok(ManagedPointer::Field {
                    object,
                    field: field.clone(),
                }),
                EmValue::ManagedPtr(parent) => Ok(ManagedPointer::ValueField {
                    parent: Box::new(parent),
                    field: field.clone(),
                }),
                EmValue::Null => Err(self.runtime.null_reference(&field.full_name())),
                other => Err(protocol_error!(
                    "Cannot take the address of field {} of the copy {:?}",
                    field.name,
                    other
                )),
            },
            Reference::Indirect(pointer) => match self.evaluate(pointer)? {
                EmValue::ManagedPtr(pointer) => Ok(pointer),
                other => Err(protocol_error!("Cannot dereference {:?}", other)),
            },
            Reference::This => match &self.this {
                EmValue::ManagedPtr(pointer) => Ok(pointer.clone()),
                _ => Err(protocol_error!("'this' of a reference type has no address")),
            },
            Reference::Property { .. } | Reference::Expression(_) => Err(protocol_error!(
                "Cannot take the address of {:?}, it is not a storage location",
                reference
            )),
        }
    }
}

/// Equality of the comparison expression: integers compare by value across widths
fn values_equal(left: &EmValue, right: &EmValue) -> bool {
    match (left, right) {
        (EmValue::I32(_) | EmValue::I64(_) | EmValue::Enum { .. }, EmValue::I32(_) | EmValue::I64(_) | EmValue::Enum { .. }) => {
            left.as_i64() == right.as_i64()
        }
        _ => left.equals(right),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        emit::{ModuleScope, SigningPolicy},
        metadata::{
            method::{MethodAttributes, MethodRc},
            typesystem::{FieldAttributes, RtTypeRc, TypeAttributes, TypeBuilder, TypeRegistry},
        },
        test::fixtures::registry,
    };

    /// Static `Samples.Counter.Tick()` adding one to `ticks`
    fn tick_method(registry: &Arc<TypeRegistry>, ticks: Arc<AtomicUsize>) -> MethodRc {
        let core = registry.core();
        let module = registry.create_module("Samples", None);
        let builder = TypeBuilder::new(registry, &module)
            .class("Samples", "Counter", &core.object)
            .unwrap();
        builder
            .native_method("Tick", MethodAttributes::public().static_(), &core.void, &[], move |_, _, _| {
                ticks.fetch_add(1, Ordering::SeqCst);
                Ok(EmValue::Void)
            })
            .unwrap()
    }

    /// `Samples.Point { int X }` and `Samples.Segment { Point Start }`
    fn point_types(registry: &Arc<TypeRegistry>) -> (RtTypeRc, RtTypeRc) {
        let core = registry.core();
        let module = registry.create_module("Samples", None);
        let point = TypeBuilder::new(registry, &module)
            .value_type("Samples", "Point", &core.value_type)
            .unwrap();
        point.field("X", &core.int32, FieldAttributes::PUBLIC).unwrap();
        let point = point.build().unwrap();
        let segment = TypeBuilder::new(registry, &module)
            .value_type("Samples", "Segment", &core.value_type)
            .unwrap();
        segment.field("Start", &point, FieldAttributes::PUBLIC).unwrap();
        (point, segment.build().unwrap())
    }

    #[test]
    fn test_finally_runs_once_after_normal_completion() {
        let registry = registry();
        let core = registry.core();
        let ticks = Arc::new(AtomicUsize::new(0));
        let tick = tick_method(&registry, ticks.clone());
        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.Cleanup", &core.object, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();
        let state = emitter
            .create_static_field("_state", &core.int32, FieldAttributes::PUBLIC)
            .unwrap();
        let run = emitter
            .create_static_method("Run", MethodAttributes::public(), &core.void, &[])
            .unwrap();
        emitter
            .method_mut(run)
            .unwrap()
            .add_statement(Statement::try_finally(
                vec![Statement::assign(Reference::StaticField(state.clone()), Expression::constant(1)).unwrap()],
                vec![Statement::pop(Expression::call(None, &tick, vec![]))],
            ))
            .unwrap();
        let ty = emitter.build_type().unwrap();
        let run = ty.method_by_name("Run").unwrap();

        let runtime = Runtime::new(registry.clone());
        assert_eq!(runtime.invoke(&run, &EmValue::Null, &[]).unwrap(), EmValue::Void);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.load_static(&state).unwrap(), EmValue::I32(1));

        runtime.invoke(&run, &EmValue::Null, &[]).unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_return_in_try_completes_after_finally() {
        let registry = registry();
        let core = registry.core();
        let ticks = Arc::new(AtomicUsize::new(0));
        let tick = tick_method(&registry, ticks.clone());
        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.EarlyReturn", &core.object, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();
        let state = emitter
            .create_static_field("_state", &core.int32, FieldAttributes::PUBLIC)
            .unwrap();
        let answer = emitter
            .create_static_method("Answer", MethodAttributes::public(), &core.int32, &[])
            .unwrap();
        emitter
            .method_mut(answer)
            .unwrap()
            .add_statement(Statement::try_finally(
                vec![
                    Statement::assign(Reference::StaticField(state.clone()), Expression::constant(1)).unwrap(),
                    Statement::ret(Expression::constant(10)),
                    Statement::assign(Reference::StaticField(state.clone()), Expression::constant(3)).unwrap(),
                ],
                vec![
                    Statement::pop(Expression::call(None, &tick, vec![])),
                    Statement::assign(Reference::StaticField(state.clone()), Expression::constant(2)).unwrap(),
                ],
            ))
            .unwrap();
        let ty = emitter.build_type().unwrap();
        let answer = ty.method_by_name("Answer").unwrap();

        let runtime = Runtime::new(registry.clone());
        assert_eq!(runtime.invoke(&answer, &EmValue::Null, &[]).unwrap(), EmValue::I32(10));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.load_static(&state).unwrap(), EmValue::I32(2));
    }

    #[test]
    fn test_exception_in_finally_replaces_pending_one() {
        let registry = registry();
        let core = registry.core();
        let ticks = Arc::new(AtomicUsize::new(0));
        let tick = tick_method(&registry, ticks.clone());
        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.Replacing", &core.object, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();
        let propagate = emitter
            .create_static_method("Propagate", MethodAttributes::public(), &core.void, &[])
            .unwrap();
        emitter
            .method_mut(propagate)
            .unwrap()
            .add_statement(Statement::try_finally(
                vec![Statement::throw(&core.invalid_operation_exception, "first")],
                vec![Statement::pop(Expression::call(None, &tick, vec![]))],
            ))
            .unwrap();
        let replace = emitter
            .create_static_method("Replace", MethodAttributes::public(), &core.void, &[])
            .unwrap();
        emitter
            .method_mut(replace)
            .unwrap()
            .add_statement(Statement::try_finally(
                vec![Statement::throw(&core.invalid_operation_exception, "first")],
                vec![
                    Statement::pop(Expression::call(None, &tick, vec![])),
                    Statement::throw(&core.not_supported_exception, "second"),
                ],
            ))
            .unwrap();
        let ty = emitter.build_type().unwrap();
        let runtime = Runtime::new(registry.clone());

        let propagate = ty.method_by_name("Propagate").unwrap();
        let err = runtime.invoke(&propagate, &EmValue::Null, &[]).unwrap_err();
        let thrown = err.as_exception().unwrap();
        assert_eq!(thrown.type_name, "System.InvalidOperationException");
        assert_eq!(thrown.message, "first");
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        let replace = ty.method_by_name("Replace").unwrap();
        let err = runtime.invoke(&replace, &EmValue::Null, &[]).unwrap_err();
        let thrown = err.as_exception().unwrap();
        assert_eq!(thrown.type_name, "System.NotSupportedException");
        assert_eq!(thrown.message, "second");
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_address_of_value_type_fields() {
        let registry = registry();
        let core = registry.core();
        let (point, segment) = point_types(&registry);
        let x = point.field_by_name("X").unwrap();
        let start = segment.field_by_name("Start").unwrap();
        let scope = ModuleScope::new(registry.clone());
        let mut emitter = scope
            .create_type("Generated.Geometry", &core.object, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak)
            .unwrap();

        let from_local = emitter
            .create_static_method("FromLocal", MethodAttributes::public(), &core.int32, &[])
            .unwrap();
        let body = emitter.method_mut(from_local).unwrap();
        let local = body.declare_local(&point).unwrap();
        let local_x = Reference::field(Reference::Local(local), &x);
        body.add_statement(
            Statement::assign(Reference::indirect(local_x.clone().address().unwrap()), Expression::constant(7)).unwrap(),
        )
        .unwrap()
        .add_statement(Statement::ret(local_x.load()))
        .unwrap();

        let from_argument = emitter
            .create_static_method("FromArgument", MethodAttributes::public(), &core.int32, &[("point", &point)])
            .unwrap();
        let argument_x = Reference::field(Reference::Argument(0), &x);
        emitter
            .method_mut(from_argument)
            .unwrap()
            .add_statement(
                Statement::assign(Reference::indirect(argument_x.clone().address().unwrap()), Expression::constant(5)).unwrap(),
            )
            .unwrap()
            .add_statement(Statement::ret(argument_x.load()))
            .unwrap();

        let nested = emitter
            .create_static_method("Nested", MethodAttributes::public(), &core.int32, &[])
            .unwrap();
        let body = emitter.method_mut(nested).unwrap();
        let local = body.declare_local(&segment).unwrap();
        let start_x = Reference::field(Reference::field(Reference::Local(local), &start), &x);
        body.add_statement(
            Statement::assign(Reference::indirect(start_x.clone().address().unwrap()), Expression::constant(9)).unwrap(),
        )
        .unwrap()
        .add_statement(Statement::ret(start_x.load()))
        .unwrap();

        let ty = emitter.build_type().unwrap();
        let runtime = Runtime::new(registry.clone());
        let invoke = |name: &str, args: &[EmValue]| {
            runtime
                .invoke(&ty.method_by_name(name).unwrap(), &EmValue::Null, args)
                .unwrap()
        };
        assert_eq!(invoke("FromLocal", &[]), EmValue::I32(7));
        assert_eq!(invoke("FromArgument", &[EmValue::default_for(&point)]), EmValue::I32(5));
        assert_eq!(invoke("Nested", &[]), EmValue::I32(9));
    }
}
