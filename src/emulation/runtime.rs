//! The reference interpreted backend.
//!
//! [`Runtime`] activates instances of registry types, invokes their methods (native closures
//! or emitted statement trees), resolves virtual and interface dispatch and carries managed
//! exceptions out to the host as [`crate::Error::Exception`].
//!
//! # Dispatch
//!
//! A virtual call is resolved on the receiver's runtime type, walking from the most derived
//! type towards the declaring type of the called method. A candidate wins if it explicitly
//! overrides the called method, or if it has the same name and signature and shares the
//! called method's slot. A `NEW_SLOT` method starts a new slot and therefore hides instead of
//! overriding. Resolutions are cached per (runtime type, method) pair.

use std::{
    cell::Cell,
    sync::Arc,
};

use dashmap::DashMap;

use crate::{
    emulation::{
        heap::{HeapArray, HeapObject},
        interpreter::Interpreter,
        statics::StaticFields,
        DelegateValue, EmValue, HostData, ManagedPointer, RuntimeConfig, ThrownException,
    },
    metadata::{
        members::FieldRc,
        method::{MethodBody, MethodRc, CONSTRUCTOR_NAME},
        token::Token,
        typesystem::{CoreTypes, PrimitiveKind, RtTypeRc, TypeFlavor, TypeRegistry},
    },
    Error, Result,
};

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Tracks the interpreted call depth of the current thread
struct CallGuard;

impl CallGuard {
    fn enter(limit: usize) -> Result<CallGuard> {
        CALL_DEPTH.with(|depth| {
            if depth.get() >= limit {
                return Err(Error::RecursionLimit(limit));
            }
            depth.set(depth.get() + 1);
            Ok(CallGuard)
        })
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Executes methods of the types in a [`TypeRegistry`]
pub struct Runtime {
    registry: Arc<TypeRegistry>,
    config: RuntimeConfig,
    statics: StaticFields,
    dispatch: DashMap<(Token, Token), MethodRc>,
}

impl Runtime {
    /// Creates a runtime with the default configuration
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    /// Creates a runtime with `config`
    #[must_use]
    pub fn with_config(registry: Arc<TypeRegistry>, config: RuntimeConfig) -> Self {
        Runtime {
            registry,
            config,
            statics: StaticFields::new(),
            dispatch: DashMap::new(),
        }
    }

    /// The registry whose types this runtime executes
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// The core library types
    #[must_use]
    pub fn core(&self) -> &CoreTypes {
        self.registry.core()
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Static field storage
    #[must_use]
    pub fn statics(&self) -> &StaticFields {
        &self.statics
    }

    /// Creates an instance of `ty` through the first constructor accepting `args`
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if no constructor accepts the arguments, and
    /// propagates failures of the constructor.
    pub fn create_instance(&self, ty: &RtTypeRc, args: &[EmValue]) -> Result<EmValue> {
        let constructor = ty
            .constructors()
            .into_iter()
            .find(|ctor| {
                ctor.params.len() == args.len()
                    && ctor
                        .params
                        .iter()
                        .zip(args)
                        .all(|(param, arg)| self.is_instance_of(arg, &param.param_type))
            })
            .ok_or_else(|| {
                Error::MemberNotFound(format!(
                    "{} has no constructor accepting {} arguments {:?}",
                    ty.full_name(),
                    args.len(),
                    args
                ))
            })?;
        self.construct(&constructor, args)
    }

    /// Allocates an instance of the constructor's type and runs `constructor` on it
    ///
    /// # Errors
    /// Returns [`Error::ShapeViolation`] for abstract types and interfaces, and propagates
    /// failures of the constructor.
    pub fn construct(&self, constructor: &MethodRc, args: &[EmValue]) -> Result<EmValue> {
        let ty = constructor.owner()?;
        if ty.is_abstract() || ty.is_interface() {
            return Err(shape_error!(
                "Cannot create an instance of abstract type {}",
                ty.full_name()
            ));
        }
        self.ensure_initialized(&ty)?;

        if ty.is_value_type() {
            let slot = Arc::new(std::sync::RwLock::new(EmValue::default_for(&ty)));
            let pointer = EmValue::ManagedPtr(ManagedPointer::Slot(slot.clone()));
            self.invoke(constructor, &pointer, args)?;
            let value = read_lock!(slot).clone();
            return Ok(value);
        }

        let instance = EmValue::Object(HeapObject::new(&ty));
        self.invoke(constructor, &instance, args)?;
        Ok(instance)
    }

    /// Invokes exactly `method`
    ///
    /// # Errors
    /// Returns [`Error::Exception`] for managed exceptions, [`Error::RecursionLimit`] when the
    /// call depth limit is hit and [`Error::ProtocolViolation`] for methods without a body or
    /// a wrong argument count.
    pub fn invoke(&self, method: &MethodRc, this: &EmValue, args: &[EmValue]) -> Result<EmValue> {
        if args.len() != method.params.len() {
            return Err(protocol_error!(
                "{} expects {} arguments, got {}",
                method.full_name(),
                method.params.len(),
                args.len()
            ));
        }
        if !method.is_static() && this.is_null() {
            return Err(self.null_reference(&method.full_name()));
        }

        let _guard = CallGuard::enter(self.config.max_call_depth)?;
        if self.config.trace_calls {
            tracing::trace!(method = %method.full_name(), args = args.len(), "invoke");
        }

        match method.body() {
            Some(MethodBody::Native(body)) => body(self, this, args),
            Some(MethodBody::Emitted(body)) => {
                Interpreter::new(self, method, body, this.clone(), args).run()
            }
            None if method.is_abstract() => Err(protocol_error!(
                "Cannot invoke abstract method {}",
                method.full_name()
            )),
            None => Err(protocol_error!(
                "{} has no body, its type was not built",
                method.full_name()
            )),
        }
    }

    /// Invokes the override of `method` selected by the runtime type of `this`
    ///
    /// # Errors
    /// See [`Runtime::invoke`].
    pub fn invoke_virtual(
        &self,
        method: &MethodRc,
        this: &EmValue,
        args: &[EmValue],
    ) -> Result<EmValue> {
        if method.is_static() || !method.is_virtual() {
            return self.invoke(method, this, args);
        }
        let runtime_type = self.type_of(this)?;
        let target = self.resolve_virtual(&runtime_type, method)?;
        self.invoke(&target, this, args)
    }

    /// Invokes the most derived method called `name` taking `args.len()` arguments
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the receiver's type has no such method.
    pub fn invoke_by_name(&self, this: &EmValue, name: &str, args: &[EmValue]) -> Result<EmValue> {
        let runtime_type = self.type_of(this)?;
        let method = runtime_type
            .hierarchy()
            .iter()
            .flat_map(|ty| ty.methods_by_name(name))
            .find(|method| method.params.len() == args.len() && !method.is_static())
            .ok_or_else(|| {
                Error::MemberNotFound(format!("{}::{}", runtime_type.full_name(), name))
            })?;
        self.invoke_virtual(&method, this, args)
    }

    /// Reads the property called `name` through its getter
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if there is no such readable property.
    pub fn get_property(&self, this: &EmValue, name: &str) -> Result<EmValue> {
        let runtime_type = self.type_of(this)?;
        let getter = runtime_type
            .hierarchy()
            .iter()
            .find_map(|ty| ty.property_by_name(name))
            .and_then(|property| property.getter())
            .ok_or_else(|| {
                Error::MemberNotFound(format!("{}::{}", runtime_type.full_name(), name))
            })?;
        self.invoke_virtual(&getter, this, &[])
    }

    /// The override of `method` that a virtual call on an instance of `runtime_type` runs
    ///
    /// # Errors
    /// Returns an error if `method` lost its declaring type.
    pub fn resolve_virtual(&self, runtime_type: &RtTypeRc, method: &MethodRc) -> Result<MethodRc> {
        if !method.is_virtual() {
            return Ok(method.clone());
        }
        let key = (runtime_type.token, method.token);
        if let Some(cached) = self.dispatch.get(&key) {
            return Ok(cached.clone());
        }

        let declaring = method.owner()?;
        let root = slot_root(method);
        let mut resolved = method.clone();
        'search: for ty in runtime_type.hierarchy() {
            if let Some((_, explicit)) = ty.methods.iter().find(|(_, candidate)| {
                candidate.explicitly_overrides(method)
                    || (!declaring.is_interface()
                        && candidate
                            .overrides
                            .iter()
                            .any(|(_, overridden)| slot_root(overridden).token == root.token))
            }) {
                resolved = explicit.clone();
                break;
            }
            for (_, candidate) in ty.methods.iter() {
                if !candidate.is_virtual()
                    || candidate.name != method.name
                    || !candidate.signature_matches(method)
                {
                    continue;
                }
                let matches = if declaring.is_interface() {
                    !candidate.is_abstract() || ty.is_interface()
                } else {
                    slot_root(candidate).token == root.token
                };
                if matches {
                    resolved = candidate.clone();
                    break 'search;
                }
            }
            if ty.definition_token() == declaring.definition_token() {
                break;
            }
        }

        tracing::trace!(
            runtime_type = %runtime_type.full_name(),
            method = %method.full_name(),
            target = %resolved.full_name(),
            "virtual dispatch resolved"
        );
        Ok(self.dispatch.entry(key).or_insert(resolved).clone())
    }

    /// Invokes a delegate value
    ///
    /// # Errors
    /// Throws `NullReferenceException` for a null delegate, propagates failures of the target.
    pub fn invoke_delegate(&self, delegate: &EmValue, args: &[EmValue]) -> Result<EmValue> {
        match delegate {
            EmValue::Delegate(delegate) => {
                if delegate.virtual_dispatch {
                    self.invoke_virtual(&delegate.method, &delegate.target, args)
                } else {
                    self.invoke(&delegate.method, &delegate.target, args)
                }
            }
            EmValue::Null => Err(self.null_reference("delegate")),
            other => Err(protocol_error!("{:?} is not a delegate", other)),
        }
    }

    /// Binds `method` to `target`
    #[must_use]
    pub fn create_delegate(
        &self,
        delegate_type: &RtTypeRc,
        target: EmValue,
        method: &MethodRc,
        virtual_dispatch: bool,
    ) -> EmValue {
        EmValue::Delegate(Arc::new(DelegateValue {
            delegate_type: delegate_type.clone(),
            target,
            method: method.clone(),
            virtual_dispatch,
        }))
    }

    /// The runtime type of a value
    ///
    /// # Errors
    /// Throws `NullReferenceException` for null.
    pub fn type_of(&self, value: &EmValue) -> Result<RtTypeRc> {
        let core = self.core();
        Ok(match value {
            EmValue::Object(object) => object.ty().clone(),
            EmValue::Array(array) => self.registry.make_array_type(array.element_type()),
            EmValue::String(_) => core.string.clone(),
            EmValue::Bool(_) => core.boolean.clone(),
            EmValue::Char(_) => core.char.clone(),
            EmValue::I32(_) => core.int32.clone(),
            EmValue::I64(_) => core.int64.clone(),
            EmValue::F64(_) => core.double.clone(),
            EmValue::ValueType(instance) => instance.ty.clone(),
            EmValue::Enum { ty, .. } => ty.clone(),
            EmValue::Delegate(delegate) => delegate.delegate_type.clone(),
            EmValue::Type(_) => core.type_type.clone(),
            EmValue::Method(_) => core.method_info.clone(),
            EmValue::ManagedPtr(pointer) => return self.type_of(&self.read_pointer(pointer)?),
            EmValue::Null => return Err(self.null_reference("value")),
            EmValue::Void => return Err(protocol_error!("void has no type")),
        })
    }

    /// Can `value` be stored in a location of type `ty`
    #[must_use]
    pub fn is_instance_of(&self, value: &EmValue, ty: &RtTypeRc) -> bool {
        match (value, &ty.flavor) {
            (EmValue::Null, _) => !ty.is_value_type() || ty.is_generic_parameter(),
            (_, TypeFlavor::GenericParameter { .. }) => true,
            (EmValue::I32(_), TypeFlavor::Primitive(kind)) => {
                !kind.is_wide_integer() && !kind.is_float() && *kind != PrimitiveKind::Void
            }
            (EmValue::I64(_), TypeFlavor::Primitive(kind)) => kind.is_wide_integer(),
            (EmValue::F64(_), TypeFlavor::Primitive(kind)) => kind.is_float(),
            (EmValue::I32(_) | EmValue::I64(_), TypeFlavor::Enum) => true,
            (EmValue::Void, _) => false,
            _ => self
                .type_of(value)
                .is_ok_and(|actual| self.registry.is_assignable_from(ty, &actual)),
        }
    }

    /// Converts `value` to `target`, throwing `InvalidCastException` when impossible
    ///
    /// # Errors
    /// Returns the managed `InvalidCastException`.
    pub fn cast(&self, value: EmValue, target: &RtTypeRc) -> Result<EmValue> {
        match (&value, &target.flavor) {
            (EmValue::I32(_) | EmValue::I64(_), TypeFlavor::Enum) => {
                let raw = value.as_i64().unwrap_or_default();
                return Ok(EmValue::Enum {
                    ty: target.clone(),
                    value: raw,
                });
            }
            (EmValue::Enum { value: raw, .. }, TypeFlavor::Primitive(kind)) => {
                #[allow(clippy::cast_possible_truncation)]
                return Ok(if kind.is_wide_integer() {
                    EmValue::I64(*raw)
                } else {
                    EmValue::I32(*raw as i32)
                });
            }
            _ => {}
        }
        if target.is_void() || self.is_instance_of(&value, target) {
            return Ok(value);
        }
        let source = self
            .type_of(&value)
            .map_or_else(|_| "null".to_string(), |ty| ty.full_name());
        Err(self.throw_new(
            &self.core().invalid_cast_exception.clone(),
            &format!(
                "Unable to cast object of type '{}' to type '{}'.",
                source,
                target.full_name()
            ),
        ))
    }

    /// Runs the type initializer of `ty` once
    ///
    /// # Errors
    /// Propagates failures of the type initializer.
    pub fn ensure_initialized(&self, ty: &RtTypeRc) -> Result<()> {
        if !self.config.run_type_initializers || !self.statics.begin_initialization(ty.token) {
            return Ok(());
        }
        if let Some(initializer) = ty.type_initializer() {
            tracing::debug!(ty = %ty.full_name(), "running type initializer");
            self.invoke(&initializer, &EmValue::Null, &[])?;
        }
        Ok(())
    }

    /// Reads a field of `target`, or a static field
    ///
    /// # Errors
    /// Throws `NullReferenceException` for a null target.
    pub fn load_field(&self, target: &EmValue, field: &FieldRc) -> Result<EmValue> {
        if field.is_static() {
            return self.load_static(field);
        }
        match target {
            EmValue::Object(object) => Ok(object
                .field(field.token)
                .unwrap_or_else(|| EmValue::default_for(&field.field_type))),
            EmValue::ValueType(instance) => Ok(instance
                .get(field.token)
                .cloned()
                .unwrap_or_else(|| EmValue::default_for(&field.field_type))),
            EmValue::ManagedPtr(pointer) => self.load_field(&self.read_pointer(pointer)?, field),
            EmValue::Null => Err(self.null_reference(&field.full_name())),
            other => Err(protocol_error!("{:?} has no field {}", other, field.name)),
        }
    }

    /// Writes a field of `target`, or a static field
    ///
    /// # Errors
    /// Throws `NullReferenceException` for a null target; storing into a value type copy is a
    /// protocol violation.
    pub fn store_field(&self, target: &EmValue, field: &FieldRc, value: EmValue) -> Result<()> {
        if field.is_static() {
            return self.store_static(field, value);
        }
        match target {
            EmValue::Object(object) => {
                object.set_field(field.token, value);
                Ok(())
            }
            EmValue::ManagedPtr(pointer) => match self.read_pointer(pointer)? {
                EmValue::ValueType(mut instance) => {
                    instance.set(field.token, value);
                    self.write_pointer(pointer, EmValue::ValueType(instance))
                }
                EmValue::Object(object) => {
                    object.set_field(field.token, value);
                    Ok(())
                }
                other => Err(protocol_error!("{:?} has no field {}", other, field.name)),
            },
            EmValue::Null => Err(self.null_reference(&field.full_name())),
            other => Err(protocol_error!(
                "Cannot store field {} into {:?}, take its address first",
                field.name,
                other
            )),
        }
    }

    /// Reads a static field, running the type initializer first
    ///
    /// # Errors
    /// Propagates failures of the type initializer.
    pub fn load_static(&self, field: &FieldRc) -> Result<EmValue> {
        if let Some(owner) = field.declaring_type() {
            self.ensure_initialized(&owner)?;
        }
        Ok(self.statics.get(field))
    }

    /// Writes a static field, running the type initializer first
    ///
    /// # Errors
    /// Propagates failures of the type initializer.
    pub fn store_static(&self, field: &FieldRc, value: EmValue) -> Result<()> {
        if let Some(owner) = field.declaring_type() {
            self.ensure_initialized(&owner)?;
        }
        self.statics.set(field, value);
        Ok(())
    }

    /// Reads the location `pointer` points to
    ///
    /// # Errors
    /// Throws for an array index out of range.
    pub fn read_pointer(&self, pointer: &ManagedPointer) -> Result<EmValue> {
        match pointer {
            ManagedPointer::Slot(slot) => Ok(read_lock!(slot).clone()),
            ManagedPointer::Field { object, field } => Ok(object
                .field(field.token)
                .unwrap_or_else(|| EmValue::default_for(&field.field_type))),
            ManagedPointer::StaticField(field) => self.load_static(field),
            ManagedPointer::ValueField { parent, field } => {
                self.load_field(&self.read_pointer(parent)?, field)
            }
            ManagedPointer::Element { array, index } => array
                .get(*index)
                .ok_or_else(|| self.index_out_of_range(*index)),
        }
    }

    /// Writes the location `pointer` points to
    ///
    /// # Errors
    /// Throws for an array index out of range.
    pub fn write_pointer(&self, pointer: &ManagedPointer, value: EmValue) -> Result<()> {
        match pointer {
            ManagedPointer::Slot(slot) => {
                *write_lock!(slot) = value;
                Ok(())
            }
            ManagedPointer::Field { object, field } => {
                object.set_field(field.token, value);
                Ok(())
            }
            ManagedPointer::StaticField(field) => self.store_static(field, value),
            ManagedPointer::ValueField { parent, field } => {
                self.store_field(&EmValue::ManagedPtr((**parent).clone()), field, value)
            }
            ManagedPointer::Element { array, index } => {
                if array.set(*index, value) {
                    Ok(())
                } else {
                    Err(self.index_out_of_range(*index))
                }
            }
        }
    }

    /// Allocates an array
    #[must_use]
    pub fn new_array(&self, element_type: &RtTypeRc, items: Vec<EmValue>) -> EmValue {
        EmValue::Array(HeapArray::new(element_type, items))
    }

    /// Allocates an exception object of `exception_type` carrying `message`, without running
    /// a constructor
    ///
    /// # Errors
    /// Returns [`Error::ShapeViolation`] if `exception_type` does not derive from
    /// `System.Exception`.
    pub fn new_exception(&self, exception_type: &RtTypeRc, message: &str) -> Result<EmValue> {
        let core = self.core();
        if !self.registry.is_assignable_from(&core.exception, exception_type) {
            return Err(shape_error!(
                "{} is not an exception type",
                exception_type.full_name()
            ));
        }
        let exception = HeapObject::new(exception_type);
        exception.set_field(core.exception_message.token, EmValue::from(message));
        Ok(EmValue::Object(exception))
    }

    /// Constructs an exception of `exception_type` and returns it as a thrown error
    #[must_use]
    pub fn throw_new(&self, exception_type: &RtTypeRc, message: &str) -> Error {
        let string = self.core().string.clone();
        let exception = match exception_type.find_method(CONSTRUCTOR_NAME, &[string]) {
            Some(constructor) => self.construct(&constructor, &[EmValue::from(message)]),
            None => self.new_exception(exception_type, message),
        };
        match exception {
            Ok(exception) => self.raise(exception),
            Err(error) => error,
        }
    }

    /// Wraps an exception object into a thrown error
    #[must_use]
    pub fn raise(&self, exception: EmValue) -> Error {
        let type_name = self
            .type_of(&exception)
            .map_or_else(|_| "null".to_string(), |ty| ty.full_name());
        let message = self
            .load_field(&exception, &self.core().exception_message)
            .ok()
            .and_then(|message| message.as_str().map(str::to_string))
            .unwrap_or_default();
        tracing::debug!(exception = %type_name, %message, "managed exception raised");
        Error::Exception(Box::new(ThrownException {
            exception,
            type_name,
            message,
        }))
    }

    /// `ArgumentException` as a thrown error
    #[must_use]
    pub fn argument_error(&self, message: &str) -> Error {
        self.throw_new(&self.core().argument_exception.clone(), message)
    }

    /// `NullReferenceException` as a thrown error
    #[must_use]
    pub fn null_reference(&self, target: &str) -> Error {
        self.throw_new(
            &self.core().null_reference_exception.clone(),
            &format!(
                "Object reference not set to an instance of an object ({}).",
                target
            ),
        )
    }

    fn index_out_of_range(&self, index: usize) -> Error {
        self.throw_new(
            &self.core().argument_exception.clone(),
            &format!("Index {} was outside the bounds of the array.", index),
        )
    }

    /// Attaches host data to a heap object
    ///
    /// # Errors
    /// Returns a protocol violation for anything but a heap object.
    pub fn set_host_data(&self, target: &EmValue, data: HostData) -> Result<()> {
        let object = self.heap_object(target)?;
        object.set_host_data(data);
        Ok(())
    }

    fn heap_object<'v>(&self, target: &'v EmValue) -> Result<&'v crate::emulation::ObjectRef> {
        match target {
            EmValue::Object(object) => Ok(object),
            EmValue::Null => Err(self.null_reference("object")),
            other => Err(protocol_error!("{:?} is not a heap object", other)),
        }
    }

    /// Creates an empty `SerializationInfo` describing `ty`
    ///
    /// # Errors
    /// Propagates constructor failures.
    pub fn new_serialization_info(&self, ty: &RtTypeRc) -> Result<EmValue> {
        let core = self.core();
        let type_type = core.type_type.clone();
        let constructor = core
            .serialization_info
            .find_method(CONSTRUCTOR_NAME, &[type_type])
            .ok_or_else(|| Error::MemberNotFound("SerializationInfo::.ctor(Type)".to_string()))?;
        self.construct(&constructor, &[EmValue::Type(ty.clone())])
    }

    /// A `StreamingContext` with `state`
    #[must_use]
    pub fn streaming_context(&self, state: i32) -> EmValue {
        let core = self.core();
        let mut context = EmValue::default_for(&core.streaming_context);
        if let EmValue::ValueType(instance) = &mut context {
            instance.set(core.streaming_context_state.token, EmValue::I32(state));
        }
        context
    }

    /// Entries of a `SerializationInfo`, in insertion order
    ///
    /// # Errors
    /// Returns a protocol violation if `info` is not a `SerializationInfo`.
    pub fn serialization_entries(&self, info: &EmValue) -> Result<Vec<(String, EmValue)>> {
        self.heap_object(info)?.with_host_data(|data| match data {
            Some(HostData::SerializationEntries { entries, .. }) => Ok(entries.clone()),
            _ => Err(protocol_error!("Object is not a SerializationInfo")),
        })
    }

    /// Full name of the type a `SerializationInfo` describes
    ///
    /// # Errors
    /// Returns a protocol violation if `info` is not a `SerializationInfo`.
    pub fn serialization_type_name(&self, info: &EmValue) -> Result<String> {
        self.heap_object(info)?.with_host_data(|data| match data {
            Some(HostData::SerializationEntries { type_name, .. }) => Ok(type_name.clone()),
            _ => Err(protocol_error!("Object is not a SerializationInfo")),
        })
    }

    /// Adds an entry to a `SerializationInfo`
    ///
    /// # Errors
    /// Throws `SerializationException` when `name` was already added.
    pub fn add_serialization_value(&self, info: &EmValue, name: String, value: EmValue) -> Result<()> {
        let duplicate = self.heap_object(info)?.with_host_data_mut(|data| match data {
            Some(HostData::SerializationEntries { entries, .. }) => {
                if entries.iter().any(|(existing, _)| *existing == name) {
                    return Ok(true);
                }
                entries.push((name.clone(), value));
                Ok(false)
            }
            _ => Err(protocol_error!("Object is not a SerializationInfo")),
        })?;
        if duplicate {
            return Err(self.throw_new(
                &self.core().serialization_exception.clone(),
                &format!("Cannot add the same member twice to a SerializationInfo object: '{}'.", name),
            ));
        }
        Ok(())
    }

    /// Reads an entry of a `SerializationInfo`
    ///
    /// # Errors
    /// Throws `SerializationException` when there is no entry called `name`.
    pub fn get_serialization_value(&self, info: &EmValue, name: &str) -> Result<EmValue> {
        let found = self
            .serialization_entries(info)?
            .into_iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| value);
        found.ok_or_else(|| {
            self.throw_new(
                &self.core().serialization_exception.clone(),
                &format!("Member '{}' was not found.", name),
            )
        })
    }
}

/// First method of the dispatch slot `method` occupies
fn slot_root(method: &MethodRc) -> MethodRc {
    if method.is_new_slot() || !method.is_virtual() {
        return method.clone();
    }
    let mut base = method.declaring_type().and_then(|owner| owner.base());
    while let Some(ty) = base {
        if let Some((_, overridden)) = ty.methods.iter().find(|(_, candidate)| {
            candidate.is_virtual()
                && candidate.name == method.name
                && candidate.signature_matches(method)
        }) {
            return slot_root(overridden);
        }
        base = ty.base();
    }
    method.clone()
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("statics", &self.statics.len())
            .field("dispatch_cache", &self.dispatch.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{method::MethodAttributes, typesystem::TypeBuilder},
        test::fixtures::{greeter_type, registry},
    };

    #[test]
    fn test_create_instance_and_invoke() {
        let registry = registry();
        let greeter = greeter_type(&registry);
        let runtime = Runtime::new(registry.clone());

        let instance = runtime
            .create_instance(&greeter, &[EmValue::from("Ada")])
            .unwrap();
        let result = runtime.invoke_by_name(&instance, "Greet", &[]).unwrap();
        assert_eq!(result, EmValue::from("Hello, Ada"));
    }

    #[test]
    fn test_missing_constructor() {
        let registry = registry();
        let greeter = greeter_type(&registry);
        let runtime = Runtime::new(registry.clone());
        assert!(matches!(
            runtime.create_instance(&greeter, &[EmValue::I32(1), EmValue::I32(2)]),
            Err(Error::MemberNotFound(_))
        ));
    }

    #[test]
    fn test_virtual_dispatch_and_new_slot() {
        let registry = registry();
        let core = registry.core();
        let greeter = greeter_type(&registry);
        let greet = greeter.method_by_name("Greet").unwrap();
        let module = registry.create_module("Dispatch", None);

        let derived = TypeBuilder::new(&registry, &module)
            .class("Samples", "LoudGreeter", &greeter)
            .unwrap();
        derived
            .native_method("Greet", MethodAttributes::public().virtual_(), &core.string, &[], |_, _, _| {
                Ok(EmValue::from("HELLO"))
            })
            .unwrap();
        let derived = derived.build().unwrap();

        let hiding = TypeBuilder::new(&registry, &module)
            .class("Samples", "HidingGreeter", &greeter)
            .unwrap();
        hiding
            .native_method(
                "Greet",
                MethodAttributes::public().virtual_().new_slot(),
                &core.string,
                &[],
                |_, _, _| Ok(EmValue::from("hidden")),
            )
            .unwrap();
        let hiding = hiding.build().unwrap();

        let runtime = Runtime::new(registry.clone());
        let resolved = runtime.resolve_virtual(&derived, &greet).unwrap();
        assert_eq!(resolved.declaring_type().unwrap().token, derived.token);

        let resolved = runtime.resolve_virtual(&hiding, &greet).unwrap();
        assert_eq!(resolved.token, greet.token);
    }

    #[test]
    fn test_exceptions_and_casts() {
        let registry = registry();
        let core = registry.core();
        let runtime = Runtime::new(registry.clone());

        let error = runtime.throw_new(&core.invalid_operation_exception.clone(), "nope");
        let thrown = error.as_exception().unwrap();
        assert!(thrown.is("System.InvalidOperationException"));
        assert_eq!(thrown.message, "nope");

        let error = runtime.cast(EmValue::from("text"), &core.int32).unwrap_err();
        assert!(error.as_exception().unwrap().is("System.InvalidCastException"));

        let value = runtime.cast(EmValue::I32(4), &core.attribute_targets).unwrap();
        assert_eq!(value.as_i64(), Some(4));
    }

    #[test]
    fn test_recursion_limit() {
        let registry = registry();
        let core = registry.core();
        let module = registry.create_module("Recursion", None);
        let builder = TypeBuilder::new(&registry, &module)
            .class("Samples", "Loop", &core.object)
            .unwrap();
        builder
            .native_method("Spin", MethodAttributes::public().static_(), &core.void, &[], |runtime, _, _| {
                let spin = runtime.registry().lookup("Samples.Loop")?.method_by_name("Spin").unwrap();
                runtime.invoke(&spin, &EmValue::Null, &[])
            })
            .unwrap();
        let ty = builder.build().unwrap();

        let runtime = Runtime::with_config(registry.clone(), RuntimeConfig::default().with_max_call_depth(16));
        let spin = ty.method_by_name("Spin").unwrap();
        assert!(matches!(
            runtime.invoke(&spin, &EmValue::Null, &[]),
            Err(Error::RecursionLimit(16))
        ));
    }

    #[test]
    fn test_serialization_info_entries() {
        let registry = registry();
        let core = registry.core();
        let runtime = Runtime::new(registry.clone());

        let info = runtime.new_serialization_info(&core.object).unwrap();
        runtime
            .add_serialization_value(&info, "a".to_string(), EmValue::I32(1))
            .unwrap();
        assert!(runtime
            .add_serialization_value(&info, "a".to_string(), EmValue::I32(2))
            .is_err());
        assert_eq!(runtime.get_serialization_value(&info, "a").unwrap(), EmValue::I32(1));
        assert_eq!(runtime.serialization_type_name(&info).unwrap(), "System.Object");
        assert_eq!(runtime.get_property(&info, "MemberCount").unwrap(), EmValue::I32(1));
    }
}
