//! Persisted module images.
//!
//! A module image is an XML document listing every type definition of a module with its
//! members, explicit override links and custom attribute blobs. Images are only written on
//! explicit request and exist for external structural verification; nothing in the engine reads
//! them back except [`load_image`], which maps the file and rebuilds a [`ModuleImage`] summary.
//!
//! ```xml
//! <module name="dotweave.Generated.Unsigned" mvid="..." publicKeyToken="null">
//!   <type token="0x02000042" name="Generated.Greeter" base="[Samples]Samples.Greeter" flags="0x00000001">
//!     <method token="0x06000101" name="Greet" signature="System.String()" flags="0x000000c6"/>
//!   </type>
//! </module>
//! ```

use std::{
    fmt::{Display, Write as _},
    fs,
    path::{Path, PathBuf},
};

use memmap2::Mmap;
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, Event},
    Reader, Writer,
};

use crate::{
    metadata::{
        customattributes::CustomAttributeList,
        module::{Module, ModuleRc},
        typesystem::RtTypeRc,
    },
    Error::XmlError,
    Result,
};

fn xml_error(error: impl Display) -> crate::Error {
    XmlError(error.to_string())
}

/// Summary of one persisted type
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeImage {
    /// Full name
    pub name: String,
    /// Module-qualified base type name
    pub base: Option<String>,
    /// Implemented interfaces
    pub interfaces: Vec<String>,
    /// Field names
    pub fields: Vec<String>,
    /// Methods as `Name Signature`
    pub methods: Vec<String>,
    /// Explicit override targets as `Method -> Target`
    pub overrides: Vec<String>,
    /// Property names
    pub properties: Vec<String>,
    /// Event names
    pub events: Vec<String>,
    /// Attribute type names applied to the type itself
    pub custom_attributes: Vec<String>,
}

/// Summary of one persisted module
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleImage {
    /// Module name
    pub name: String,
    /// Module version id
    pub mvid: String,
    /// Public key token, `None` for weak-named modules
    pub public_key_token: Option<String>,
    /// Type definitions in token order
    pub types: Vec<TypeImage>,
}

impl ModuleImage {
    /// The type called `name`
    #[must_use]
    pub fn type_named(&self, name: &str) -> Option<&TypeImage> {
        self.types.iter().find(|ty| ty.name == name)
    }
}

/// Writes one image per module into `directory`, in parallel, and returns their paths
///
/// # Errors
/// Returns [`crate::Error::FileError`] for I/O failures and [`crate::Error::XmlError`] if an
/// image cannot be written.
pub fn save_modules(modules: &[ModuleRc], directory: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(directory)?;
    match modules {
        [strong, weak] => {
            let (strong, weak) = rayon::join(
                || save_module(strong, directory),
                || save_module(weak, directory),
            );
            Ok(vec![strong?, weak?])
        }
        _ => modules
            .iter()
            .map(|module| save_module(module, directory))
            .collect(),
    }
}

/// Writes the image of `module` to `<directory>/<module name>.xml`
///
/// # Errors
/// See [`save_modules`].
pub fn save_module(module: &Module, directory: &Path) -> Result<PathBuf> {
    let path = directory.join(format!("{}.xml", module.name()));
    let image = write_image(module)?;
    fs::write(&path, image)?;
    tracing::debug!(module = %module.name(), path = %path.display(), "module image written");
    Ok(path)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

fn is_definition(ty: &RtTypeRc) -> bool {
    !ty.is_generic_instance() && !ty.is_generic_parameter() && ty.element_type().is_none()
}

/// Serializes `module` into its XML image
///
/// # Errors
/// Returns [`crate::Error::XmlError`] if the writer fails.
pub fn write_image(module: &Module) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_error)?;

    let identity = &module.identity;
    let token = identity
        .public_key_token()
        .map_or_else(|| "null".to_string(), |token| format!("{token:016x}"));
    let mvid = identity.mvid.to_string();
    let mut root = BytesStart::new("module");
    root.push_attribute(("name", identity.name.as_str()));
    root.push_attribute(("mvid", mvid.as_str()));
    root.push_attribute(("publicKeyToken", token.as_str()));
    writer.write_event(Event::Start(root)).map_err(xml_error)?;

    for ty in module.types().iter().filter(|ty| is_definition(ty)) {
        write_type(&mut writer, ty)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("module")))
        .map_err(xml_error)?;
    Ok(writer.into_inner())
}

fn write_attributes(writer: &mut Writer<Vec<u8>>, attributes: &CustomAttributeList) -> Result<()> {
    for (_, attribute) in attributes.iter() {
        let type_name = attribute.type_name();
        let blob = hex(&attribute.blob);
        let mut element = BytesStart::new("customAttribute");
        element.push_attribute(("type", type_name.as_str()));
        element.push_attribute(("blob", blob.as_str()));
        writer.write_event(Event::Empty(element)).map_err(xml_error)?;
    }
    Ok(())
}

fn write_type(writer: &mut Writer<Vec<u8>>, ty: &RtTypeRc) -> Result<()> {
    let token = ty.token.to_string();
    let name = ty.full_name();
    let flags = format!("0x{:08x}", ty.flags.bits());
    let base = ty.base().map(|base| base.qualified_name());

    let mut element = BytesStart::new("type");
    element.push_attribute(("token", token.as_str()));
    element.push_attribute(("name", name.as_str()));
    if let Some(base) = &base {
        element.push_attribute(("base", base.as_str()));
    }
    element.push_attribute(("flags", flags.as_str()));
    writer.write_event(Event::Start(element)).map_err(xml_error)?;

    for (_, interface) in ty.interfaces.iter() {
        let name = interface.qualified_name();
        let mut element = BytesStart::new("interface");
        element.push_attribute(("name", name.as_str()));
        writer.write_event(Event::Empty(element)).map_err(xml_error)?;
    }
    for (_, field) in ty.fields.iter() {
        let field_type = field.field_type.signature_name();
        let flags = format!("0x{:04x}", field.flags.bits());
        let mut element = BytesStart::new("field");
        element.push_attribute(("name", field.name.as_str()));
        element.push_attribute(("type", field_type.as_str()));
        element.push_attribute(("flags", flags.as_str()));
        writer.write_event(Event::Empty(element)).map_err(xml_error)?;
    }
    for (_, method) in ty.methods.iter() {
        let token = method.token.to_string();
        let signature = method.signature();
        let flags = format!("0x{:08x}", method.attributes.bits());
        let mut element = BytesStart::new("method");
        element.push_attribute(("token", token.as_str()));
        element.push_attribute(("name", method.name.as_str()));
        element.push_attribute(("signature", signature.as_str()));
        element.push_attribute(("flags", flags.as_str()));
        writer.write_event(Event::Start(element)).map_err(xml_error)?;
        for (_, target) in method.overrides.iter() {
            let key = target.key().to_string();
            let mut element = BytesStart::new("override");
            element.push_attribute(("target", key.as_str()));
            writer.write_event(Event::Empty(element)).map_err(xml_error)?;
        }
        write_attributes(writer, &method.custom_attributes)?;
        writer
            .write_event(Event::End(BytesEnd::new("method")))
            .map_err(xml_error)?;
    }
    for (_, property) in ty.properties.iter() {
        let property_type = property.property_type.signature_name();
        let mut element = BytesStart::new("property");
        element.push_attribute(("name", property.name.as_str()));
        element.push_attribute(("type", property_type.as_str()));
        let getter = property.getter().map(|getter| getter.name.clone());
        let setter = property.setter().map(|setter| setter.name.clone());
        if let Some(getter) = &getter {
            element.push_attribute(("get", getter.as_str()));
        }
        if let Some(setter) = &setter {
            element.push_attribute(("set", setter.as_str()));
        }
        writer.write_event(Event::Empty(element)).map_err(xml_error)?;
    }
    for (_, event) in ty.events.iter() {
        let event_type = event.event_type.signature_name();
        let mut element = BytesStart::new("event");
        element.push_attribute(("name", event.name.as_str()));
        element.push_attribute(("type", event_type.as_str()));
        writer.write_event(Event::Empty(element)).map_err(xml_error)?;
    }
    write_attributes(writer, &ty.custom_attributes)?;

    writer
        .write_event(Event::End(BytesEnd::new("type")))
        .map_err(xml_error)?;
    Ok(())
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        if attribute.key.as_ref() == name.as_bytes() {
            return Ok(Some(attribute.unescape_value().map_err(xml_error)?.into_owned()));
        }
    }
    Ok(None)
}

fn required(element: &BytesStart<'_>, name: &str) -> Result<String> {
    attribute(&element, name)?.ok_or_else(|| {
        XmlError(format!(
            "<{}> lacks the '{}' attribute",
            String::from_utf8_lossy(element.name().as_ref()),
            name
        ))
    })
}

/// Maps an image file and rebuilds its summary
///
/// # Errors
/// Returns [`crate::Error::FileError`] if the file cannot be opened and
/// [`crate::Error::XmlError`] if it is not a well-formed image.
pub fn load_image(path: impl AsRef<Path>) -> Result<ModuleImage> {
    let file = fs::File::open(path.as_ref())?;
    let data = unsafe { Mmap::map(&file) }?;
    let text = std::str::from_utf8(&data).map_err(xml_error)?;
    parse_image(text)
}

/// Rebuilds the summary of an image held in memory
///
/// # Errors
/// Returns [`crate::Error::XmlError`] if `text` is not a well-formed image.
pub fn parse_image(text: &str) -> Result<ModuleImage> {
    let mut reader = Reader::from_str(text);
    let mut image: Option<ModuleImage> = None;
    let mut current: Option<TypeImage> = None;
    let mut method: Option<String> = None;

    loop {
        let (element, open) = match reader.read_event().map_err(xml_error)? {
            Event::Start(element) => (element, true),
            Event::Empty(element) => (element, false),
            Event::End(element) => {
                match element.name().as_ref() {
                    b"method" => method = None,
                    b"type" => {
                        let ty = current
                            .take()
                            .ok_or_else(|| XmlError("</type> without <type>".to_string()))?;
                        image
                            .as_mut()
                            .ok_or_else(|| XmlError("<type> outside of <module>".to_string()))?
                            .types
                            .push(ty);
                    }
                    _ => {}
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };
        let name = element.name();
        match name.as_ref() {
            b"module" => {
                let token = required(&element, "publicKeyToken")?;
                image = Some(ModuleImage {
                    name: required(&element, "name")?,
                    mvid: required(&element, "mvid")?,
                    public_key_token: (token != "null").then_some(token),
                    types: Vec::new(),
                });
            }
            b"type" => {
                current = Some(TypeImage {
                    name: required(&element, "name")?,
                    base: attribute(&element, "base")?,
                    ..TypeImage::default()
                });
            }
            b"interface" => {
                if let Some(ty) = current.as_mut() {
                    ty.interfaces.push(required(&element, "name")?);
                }
            }
            b"field" => {
                if let Some(ty) = current.as_mut() {
                    ty.fields.push(required(&element, "name")?);
                }
            }
            b"method" => {
                let name = required(&element, "name")?;
                if let Some(ty) = current.as_mut() {
                    ty.methods
                        .push(format!("{} {}", name, required(&element, "signature")?));
                }
                if open {
                    method = Some(name);
                }
            }
            b"override" => {
                if let (Some(ty), Some(method)) = (current.as_mut(), method.as_ref()) {
                    ty.overrides
                        .push(format!("{} -> {}", method, required(&element, "target")?));
                }
            }
            b"property" => {
                if let Some(ty) = current.as_mut() {
                    ty.properties.push(required(&element, "name")?);
                }
            }
            b"event" => {
                if let Some(ty) = current.as_mut() {
                    ty.events.push(required(&element, "name")?);
                }
            }
            b"customAttribute" => {
                if let (Some(ty), None) = (current.as_mut(), method.as_ref()) {
                    ty.custom_attributes.push(required(&element, "type")?);
                }
            }
            other => {
                return Err(XmlError(format!(
                    "Unexpected element <{}>",
                    String::from_utf8_lossy(other)
                )))
            }
        }
    }

    image.ok_or_else(|| XmlError("Image has no <module> element".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emit::{body::Expression, ModuleScope, ModuleScopeConfig, SigningPolicy},
        metadata::{method::MethodAttributes, typesystem::TypeAttributes},
        test::fixtures::{greeter_type, registry},
    };

    #[test]
    fn test_save_and_load_round_trip() {
        let registry = registry();
        let core = registry.core();
        let directory = tempfile::tempdir().unwrap();
        let scope = ModuleScope::with_config(registry.clone(), ModuleScopeConfig::persistent(directory.path()));

        let greeter = greeter_type(&registry);
        let mut weak = scope
            .create_type("Generated.Persisted", &greeter, &[], TypeAttributes::PUBLIC, SigningPolicy::Inherit)
            .unwrap();
        let greet = greeter.method_by_name("Greet").unwrap();
        let handle = weak.create_full_named_method_override(&greet).unwrap();
        weak.method_mut(handle)
            .unwrap()
            .implement_by_returning(Expression::constant("persisted"))
            .unwrap();
        weak.replicate_base_type_constructors(|_| Ok(()), |_| Ok(())).unwrap();
        weak.build_type().unwrap();

        let mut strong = scope
            .create_type("Generated.Signed", &core.object, &[], TypeAttributes::PUBLIC, SigningPolicy::Inherit)
            .unwrap();
        let answer = strong
            .create_method("Answer", MethodAttributes::public(), &core.int32, &[])
            .unwrap();
        strong
            .method_mut(answer)
            .unwrap()
            .implement_by_returning(Expression::constant(42))
            .unwrap();
        strong.build_type().unwrap();

        let paths = scope.save_modules().unwrap();
        assert_eq!(paths.len(), 2);

        let signed = load_image(&paths[0]).unwrap();
        assert_eq!(signed.name, scope.config().strong_module_name);
        assert!(signed.public_key_token.is_some());
        let ty = signed.type_named("Generated.Signed").unwrap();
        assert!(ty.methods.iter().any(|method| method == "Answer System.Int32()"));

        let unsigned = load_image(&paths[1]).unwrap();
        assert!(unsigned.public_key_token.is_none());
        let ty = unsigned.type_named("Generated.Persisted").unwrap();
        assert_eq!(ty.base.as_deref(), Some("[Samples]Samples.Greeter"));
        assert_eq!(ty.overrides.len(), 1);
        assert!(ty.overrides[0].starts_with("Samples.Greeter.Greet -> [Samples]Samples.Greeter::Greet"));
    }

    #[test]
    fn test_malformed_image_is_rejected() {
        assert!(matches!(
            parse_image("<module name=\"x\">"),
            Err(crate::Error::XmlError(_))
        ));
        assert!(matches!(
            parse_image("<nothing/>"),
            Err(crate::Error::XmlError(_))
        ));
    }
}
