//! The core library every registry bootstraps.
//!
//! Only the slice of the base class library that generated code and the serialization
//! protocol touch is modelled: the root types, primitives, the exception family, attributes
//! with their usage, and the serialization contracts. Methods are implemented natively.

use crate::{
    emulation::{EmValue, HostData},
    metadata::{
        customattributes::{
            ArgumentType, AttributeTargets, CustomAttributeArgument, CustomAttributeNamedArgument,
            CustomAttributeValue,
        },
        identity::Identity,
        members::FieldRc,
        method::{MethodAttributes, MethodRc},
        module::ModuleRc,
        typesystem::{
            FieldAttributes, PrimitiveKind, RtTypeRc, TypeAttributes, TypeBuilder, TypeFlavor,
            TypeRegistry,
        },
    },
    Result,
};

/// Name of the core library module
pub const CORE_LIBRARY_NAME: &str = "System.Private.CoreLib";
/// Public key token of the core library
const CORE_LIBRARY_TOKEN: u64 = 0x8e79_a7be_d785_ec7c;

/// Handles to the core library types
#[allow(missing_docs)]
pub struct CoreTypes {
    pub module: ModuleRc,
    pub object: RtTypeRc,
    pub value_type: RtTypeRc,
    pub enum_type: RtTypeRc,
    pub void: RtTypeRc,
    pub boolean: RtTypeRc,
    pub char: RtTypeRc,
    pub sbyte: RtTypeRc,
    pub byte: RtTypeRc,
    pub int16: RtTypeRc,
    pub uint16: RtTypeRc,
    pub int32: RtTypeRc,
    pub uint32: RtTypeRc,
    pub int64: RtTypeRc,
    pub uint64: RtTypeRc,
    pub single: RtTypeRc,
    pub double: RtTypeRc,
    pub string: RtTypeRc,
    pub array: RtTypeRc,
    pub type_type: RtTypeRc,
    pub method_info: RtTypeRc,
    pub delegate: RtTypeRc,
    pub attribute: RtTypeRc,
    pub attribute_targets: RtTypeRc,
    pub attribute_usage_attribute: RtTypeRc,
    pub exception: RtTypeRc,
    /// `Exception._message`
    pub exception_message: FieldRc,
    pub invalid_operation_exception: RtTypeRc,
    pub not_implemented_exception: RtTypeRc,
    pub not_supported_exception: RtTypeRc,
    pub null_reference_exception: RtTypeRc,
    pub invalid_cast_exception: RtTypeRc,
    pub argument_exception: RtTypeRc,
    pub serialization_exception: RtTypeRc,
    pub iserializable: RtTypeRc,
    pub serialization_info: RtTypeRc,
    pub streaming_context: RtTypeRc,
    /// `StreamingContext._state`
    pub streaming_context_state: FieldRc,
    pub ideserialization_callback: RtTypeRc,
    pub on_deserializing_attribute: RtTypeRc,
    pub on_deserialized_attribute: RtTypeRc,
    pub generated_method_wrapper_attribute: RtTypeRc,
}

impl CoreTypes {
    /// Primitive type for `kind`
    #[must_use]
    pub fn primitive(&self, kind: PrimitiveKind) -> &RtTypeRc {
        match kind {
            PrimitiveKind::Void => &self.void,
            PrimitiveKind::Boolean => &self.boolean,
            PrimitiveKind::Char => &self.char,
            PrimitiveKind::I1 => &self.sbyte,
            PrimitiveKind::U1 => &self.byte,
            PrimitiveKind::I2 => &self.int16,
            PrimitiveKind::U2 => &self.uint16,
            PrimitiveKind::I4 => &self.int32,
            PrimitiveKind::U4 => &self.uint32,
            PrimitiveKind::I8 => &self.int64,
            PrimitiveKind::U8 => &self.uint64,
            PrimitiveKind::R4 => &self.single,
            PrimitiveKind::R8 => &self.double,
        }
    }

    /// `GetObjectData(SerializationInfo, StreamingContext)` of `ISerializable`
    #[must_use]
    pub fn get_object_data(&self) -> Option<MethodRc> {
        self.iserializable.method_by_name("GetObjectData")
    }

    /// Parameter types of the serialization constructor and `GetObjectData`
    #[must_use]
    pub fn serialization_signature(&self) -> [RtTypeRc; 2] {
        [self.serialization_info.clone(), self.streaming_context.clone()]
    }

    pub(crate) fn bootstrap(registry: &TypeRegistry) -> Result<CoreTypes> {
        let module = registry.create_module(
            CORE_LIBRARY_NAME,
            Some(Identity::Token(CORE_LIBRARY_TOKEN)),
        );
        let sealed = TypeAttributes::PUBLIC | TypeAttributes::SEALED;
        let abstract_ = TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT;
        let new = |flags: TypeAttributes| TypeBuilder::new(registry, &module).with_flags(flags);

        let object = new(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
            .kind("System", "Object", TypeFlavor::Object, None)?
            .build()?;
        let value_type = new(abstract_)
            .class("System", "ValueType", &object)?
            .build()?;
        let enum_type = new(abstract_).class("System", "Enum", &value_type)?.build()?;

        let primitive = |name: &str, kind: PrimitiveKind| -> Result<RtTypeRc> {
            new(sealed)
                .kind("System", name, TypeFlavor::Primitive(kind), Some(&value_type))?
                .build()
        };
        let void = primitive("Void", PrimitiveKind::Void)?;
        let boolean = primitive("Boolean", PrimitiveKind::Boolean)?;
        let char = primitive("Char", PrimitiveKind::Char)?;
        let sbyte = primitive("SByte", PrimitiveKind::I1)?;
        let byte = primitive("Byte", PrimitiveKind::U1)?;
        let int16 = primitive("Int16", PrimitiveKind::I2)?;
        let uint16 = primitive("UInt16", PrimitiveKind::U2)?;
        let int32 = primitive("Int32", PrimitiveKind::I4)?;
        let uint32 = primitive("UInt32", PrimitiveKind::U4)?;
        let int64 = primitive("Int64", PrimitiveKind::I8)?;
        let uint64 = primitive("UInt64", PrimitiveKind::U8)?;
        let single = primitive("Single", PrimitiveKind::R4)?;
        let double = primitive("Double", PrimitiveKind::R8)?;

        let string = new(sealed | TypeAttributes::SERIALIZABLE)
            .kind("System", "String", TypeFlavor::String, Some(&object))?
            .build()?;
        let array = new(abstract_).class("System", "Array", &object)?.build()?;
        let type_type = new(abstract_).class("System", "Type", &object)?.build()?;
        let method_info = new(abstract_)
            .class("System.Reflection", "MethodInfo", &object)?
            .build()?;
        let delegate = new(abstract_).class("System", "Delegate", &object)?.build()?;

        let public = MethodAttributes::public();
        let protected = MethodAttributes::protected();

        // System.Object members
        {
            let builder = TypeBuilder::new(registry, &module).resume(&object);
            builder.native_constructor(public, &void, &[], |_, _, _| Ok(EmValue::Void))?;
            builder.native_method(
                "ToString",
                public.virtual_(),
                &string,
                &[],
                |runtime, this, _| Ok(EmValue::from(runtime.type_of(this)?.full_name().as_str())),
            )?;
            builder.native_method(
                "Equals",
                public.virtual_(),
                &boolean,
                &[("obj", &object)],
                |_, this, args| Ok(EmValue::Bool(args.first().is_some_and(|other| other == this))),
            )?;
            builder.native_method("GetType", public, &type_type, &[], |runtime, this, _| {
                Ok(EmValue::Type(runtime.type_of(this)?))
            })?;
        }

        // Attributes
        let attribute = new(abstract_ | TypeAttributes::SERIALIZABLE)
            .class("System", "Attribute", &object)?;
        attribute.native_constructor(protected, &void, &[], |_, _, _| Ok(EmValue::Void))?;
        let attribute = attribute.build()?;

        let attribute_targets = new(sealed)
            .enumeration("System", "AttributeTargets", &enum_type, &int32)?
            .build()?;

        let usage = new(sealed).class("System", "AttributeUsageAttribute", &attribute)?;
        let valid_on = usage.field("_validOn", &attribute_targets, FieldAttributes::PRIVATE)?;
        usage.storing_constructor(
            public,
            &void,
            &[("validOn", &attribute_targets)],
            vec![valid_on.clone()],
        )?;
        let read_valid_on = valid_on;
        let valid_on_getter = usage.native_method(
            "get_ValidOn",
            public,
            &attribute_targets,
            &[],
            move |runtime, this, _| runtime.load_field(this, &read_valid_on),
        )?;
        registry
            .create_property(usage.current()?, "ValidOn", &attribute_targets, Vec::new())
            .set_getter(valid_on_getter)?;
        usage.auto_property("AllowMultiple", &boolean, public, &void)?;
        usage.auto_property("Inherited", &boolean, public, &void)?;
        let attribute_usage_attribute = usage.build()?;
        let usage_ctor = attribute_usage_attribute
            .constructors()
            .pop()
            .ok_or_else(|| malformed_error!("AttributeUsageAttribute has no constructor"))?;

        let apply_usage = |ty: &RtTypeRc, targets: AttributeTargets, allow_multiple: bool| {
            let value = CustomAttributeValue {
                fixed_args: vec![CustomAttributeArgument::Enum(
                    "System.AttributeTargets".to_string(),
                    Box::new(CustomAttributeArgument::I4(targets.bits() as i32)),
                )],
                named_args: vec![CustomAttributeNamedArgument {
                    is_field: false,
                    name: "AllowMultiple".to_string(),
                    arg_type: ArgumentType::Primitive(PrimitiveKind::Boolean),
                    value: CustomAttributeArgument::Bool(allow_multiple),
                }],
            };
            registry.apply_custom_attribute(&ty.custom_attributes, &usage_ctor, &value)
        };
        apply_usage(&attribute_usage_attribute, AttributeTargets::CLASS, false)?;

        // Exceptions
        let exception = new(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
            .class("System", "Exception", &object)?;
        let exception_message =
            exception.field("_message", &string, FieldAttributes::PRIVATE)?;
        let message_field = exception_message.clone();
        let exception_getter = exception.native_method(
            "get_Message",
            public.virtual_(),
            &string,
            &[],
            move |runtime, this, _| runtime.load_field(this, &message_field),
        )?;
        exception.native_constructor(public, &void, &[], |_, _, _| Ok(EmValue::Void))?;
        exception.storing_constructor(
            public,
            &void,
            &[("message", &string)],
            vec![exception_message.clone()],
        )?;
        let exception = exception.build()?;
        registry
            .create_property(&exception, "Message", &string, Vec::new())
            .set_getter(exception_getter)?;

        let exception_type = |namespace: &str, name: &str, base: &RtTypeRc| -> Result<RtTypeRc> {
            let builder = new(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
                .class(namespace, name, base)?;
            builder.native_constructor(public, &void, &[], |_, _, _| Ok(EmValue::Void))?;
            builder.storing_constructor(
                public,
                &void,
                &[("message", &string)],
                vec![exception_message.clone()],
            )?;
            builder.build()
        };
        let system_exception = exception_type("System", "SystemException", &exception)?;
        let invalid_operation_exception =
            exception_type("System", "InvalidOperationException", &system_exception)?;
        let not_implemented_exception =
            exception_type("System", "NotImplementedException", &system_exception)?;
        let not_supported_exception =
            exception_type("System", "NotSupportedException", &system_exception)?;
        let null_reference_exception =
            exception_type("System", "NullReferenceException", &system_exception)?;
        let invalid_cast_exception =
            exception_type("System", "InvalidCastException", &system_exception)?;
        let argument_exception = exception_type("System", "ArgumentException", &system_exception)?;
        let serialization_exception = exception_type(
            "System.Runtime.Serialization",
            "SerializationException",
            &system_exception,
        )?;

        // Serialization contracts
        let serialization_info = new(sealed)
            .class("System.Runtime.Serialization", "SerializationInfo", &object)?;
        serialization_info.native_constructor(
            public,
            &void,
            &[("type", &type_type)],
            |runtime, this, args| {
                let type_name = match args.first() {
                    Some(EmValue::Type(ty)) => ty.full_name(),
                    _ => String::new(),
                };
                runtime.set_host_data(
                    this,
                    HostData::SerializationEntries {
                        type_name,
                        entries: Vec::new(),
                    },
                )?;
                Ok(EmValue::Void)
            },
        )?;
        serialization_info.native_method(
            "AddValue",
            public,
            &void,
            &[("name", &string), ("value", &object)],
            |runtime, this, args| {
                let name = args
                    .first()
                    .and_then(EmValue::as_str)
                    .ok_or_else(|| runtime.argument_error("name must not be null"))?
                    .to_string();
                let value = args.get(1).cloned().unwrap_or(EmValue::Null);
                runtime.add_serialization_value(this, name, value)?;
                Ok(EmValue::Void)
            },
        )?;
        serialization_info.native_method(
            "GetValue",
            public,
            &object,
            &[("name", &string), ("type", &type_type)],
            |runtime, this, args| {
                let name = args
                    .first()
                    .and_then(EmValue::as_str)
                    .ok_or_else(|| runtime.argument_error("name must not be null"))?;
                runtime.get_serialization_value(this, name)
            },
        )?;
        let member_count = serialization_info.native_method(
            "get_MemberCount",
            public,
            &int32,
            &[],
            |runtime, this, _| {
                let count = runtime.serialization_entries(this)?.len();
                Ok(EmValue::I32(i32::try_from(count).unwrap_or(i32::MAX)))
            },
        )?;
        let serialization_info = serialization_info.build()?;
        registry
            .create_property(&serialization_info, "MemberCount", &int32, Vec::new())
            .set_getter(member_count)?;

        let streaming_context = new(TypeAttributes::PUBLIC)
            .value_type("System.Runtime.Serialization", "StreamingContext", &value_type)?;
        let streaming_context_state =
            streaming_context.field("_state", &int32, FieldAttributes::PRIVATE)?;
        let streaming_context = streaming_context.build()?;

        let iserializable = new(TypeAttributes::PUBLIC)
            .interface("System.Runtime.Serialization", "ISerializable")?;
        iserializable.abstract_method(
            "GetObjectData",
            public.new_slot(),
            &void,
            &[("info", &serialization_info), ("context", &streaming_context)],
        )?;
        let iserializable = iserializable.build()?;

        let ideserialization_callback = new(TypeAttributes::PUBLIC)
            .interface("System.Runtime.Serialization", "IDeserializationCallback")?;
        ideserialization_callback.abstract_method(
            "OnDeserialization",
            public.new_slot(),
            &void,
            &[("sender", &object)],
        )?;
        let ideserialization_callback = ideserialization_callback.build()?;

        let marker_attribute = |namespace: &str, name: &str| -> Result<RtTypeRc> {
            let builder = new(sealed).class(namespace, name, &attribute)?;
            builder.native_constructor(public, &void, &[], |_, _, _| Ok(EmValue::Void))?;
            let ty = builder.build()?;
            apply_usage(&ty, AttributeTargets::METHOD, false)?;
            Ok(ty)
        };
        let on_deserializing_attribute =
            marker_attribute("System.Runtime.Serialization", "OnDeserializingAttribute")?;
        let on_deserialized_attribute =
            marker_attribute("System.Runtime.Serialization", "OnDeserializedAttribute")?;

        let wrapper = new(sealed).class(
            "dotweave.Emit",
            "GeneratedMethodWrapperAttribute",
            &attribute,
        )?;
        let type_array = registry.make_array_type(&type_type);
        type_array.set_base(array.clone())?;
        let wrapper_fields = vec![
            wrapper.field("_module", &string, FieldAttributes::PRIVATE)?,
            wrapper.field("_token", &int32, FieldAttributes::PRIVATE)?,
            wrapper.field("_declaringType", &string, FieldAttributes::PRIVATE)?,
            wrapper.field("_name", &string, FieldAttributes::PRIVATE)?,
            wrapper.field("_signature", &string, FieldAttributes::PRIVATE)?,
            wrapper.field("_genericArguments", &type_array, FieldAttributes::PRIVATE)?,
        ];
        wrapper.storing_constructor(
            public,
            &void,
            &[
                ("module", &string),
                ("token", &int32),
                ("declaringType", &string),
                ("name", &string),
                ("signature", &string),
                ("genericArguments", &type_array),
            ],
            wrapper_fields,
        )?;
        let generated_method_wrapper_attribute = wrapper.build()?;
        apply_usage(&generated_method_wrapper_attribute, AttributeTargets::METHOD, false)?;

        tracing::debug!(types = registry.len(), "core library bootstrapped");

        Ok(CoreTypes {
            module,
            object,
            value_type,
            enum_type,
            void,
            boolean,
            char,
            sbyte,
            byte,
            int16,
            uint16,
            int32,
            uint32,
            int64,
            uint64,
            single,
            double,
            string,
            array,
            type_type,
            method_info,
            delegate,
            attribute,
            attribute_targets,
            attribute_usage_attribute,
            exception,
            exception_message,
            invalid_operation_exception,
            not_implemented_exception,
            not_supported_exception,
            null_reference_exception,
            invalid_cast_exception,
            argument_exception,
            serialization_exception,
            iserializable,
            serialization_info,
            streaming_context,
            streaming_context_state,
            ideserialization_callback,
            on_deserializing_attribute,
            on_deserialized_attribute,
            generated_method_wrapper_attribute,
        })
    }
}
