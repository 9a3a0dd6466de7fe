use thiserror::Error;

use crate::emulation::ThrownException;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! shape_error {
    ($msg:expr) => {
        crate::Error::ShapeViolation($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::ShapeViolation(format!($fmt, $($arg)*))
    };
}

macro_rules! protocol_error {
    ($msg:expr) => {
        crate::Error::ProtocolViolation($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::ProtocolViolation(format!($fmt, $($arg)*))
    };
}

macro_rules! attribute_error {
    ($msg:expr) => {
        crate::Error::AttributeShape($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::AttributeShape(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// All construction-time failures are programmer-facing: they are raised synchronously by the
/// call that attempted the invalid construction, and the remedy is always a correction of the
/// generation request. The only variant that carries a data-dependent failure is
/// [`Error::Exception`], which transports a managed exception out of interpreted code.
///
/// # Error Categories
///
/// ## Construction Errors
/// - [`Error::ShapeViolation`] - Sealed/interface/open-generic base, nested type under a generic type,
///   overriding a member that is not declared on the target
/// - [`Error::ProtocolViolation`] - Accessor assigned twice, address of a non-storage expression,
///   base call on an abstract method, member added after build
/// - [`Error::SerializationSetup`] - Base type requires serialization members it does not expose
/// - [`Error::AttributeShape`] - Attribute type, arity or target mismatch
///
/// ## Lookup Errors
/// - [`Error::TypeNotFound`] - Requested type not present in the registry
/// - [`Error::MemberNotFound`] - Requested member not present on a type or module
///
/// ## Execution Errors
/// - [`Error::Exception`] - Managed exception escaping interpreted code
/// - [`Error::RecursionLimit`] - Maximum call depth exceeded
///
/// ## Encoding and I/O Errors
/// - [`Error::Malformed`] - Corrupted custom attribute blob or module image
/// - [`Error::OutOfBounds`] - Read beyond the end of a blob
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::XmlError`] - Module image (de)serialization errors
///
/// # Examples
///
/// ```rust,no_run
/// use dotweave::{Error, emit::ModuleScope, metadata::typesystem::{TypeAttributes, TypeRegistry}};
/// use dotweave::emit::SigningPolicy;
///
/// let registry = TypeRegistry::new()?;
/// let scope = ModuleScope::new(registry.clone());
/// let string = registry.core().string.clone();
///
/// match scope.create_type("Generated.Foo", &string, &[], TypeAttributes::PUBLIC, SigningPolicy::Weak) {
///     Err(Error::ShapeViolation(message)) => println!("rejected: {}", message),
///     Err(e) => println!("other error: {}", e),
///     Ok(_) => unreachable!("System.String is sealed"),
/// }
/// # Ok::<(), dotweave::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The requested type or member shape cannot be generated.
    ///
    /// Raised when the base type is sealed, an interface or an open constructed generic type,
    /// when a nested type is requested inside a generic type, or when a member that is not
    /// declared on the target type is passed to an operation that requires it.
    #[error("Shape violation - {0}")]
    ShapeViolation(String),

    /// An emitter was used in a way its lifecycle does not allow.
    ///
    /// Examples are assigning a property accessor twice, adding members to a type that was
    /// already built, requesting the address of a pure expression or emitting a base call
    /// to an abstract method.
    #[error("Protocol violation - {0}")]
    ProtocolViolation(String),

    /// The base type participates in the serialization protocol but does not expose the
    /// members required to delegate to it.
    #[error("Serialization setup failed - {0}")]
    SerializationSetup(String),

    /// A custom attribute could not be parsed, instantiated or replicated.
    #[error("Attribute shape violation - {0}")]
    AttributeShape(String),

    /// A managed exception escaped interpreted code.
    ///
    /// The boxed [`ThrownException`] holds the exception object, its type and message.
    #[error("Unhandled exception - {0}")]
    Exception(Box<ThrownException>),

    /// Failed to find a type in the `TypeRegistry`.
    #[error("Failed to find type - {0}")]
    TypeNotFound(String),

    /// Failed to find a member on a type or in a module.
    #[error("Failed to find member - {0}")]
    MemberNotFound(String),

    /// Recursion limit reached.
    ///
    /// The interpreter enforces a maximum call depth to prevent stack overflow when generated
    /// code recurses without bound. The associated value is the limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// The data is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading a blob.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error while writing or reading a persisted module image.
    #[error("Module image error - {0}")]
    XmlError(String),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns the managed exception carried by this error, if any.
    #[must_use]
    pub fn as_exception(&self) -> Option<&ThrownException> {
        match self {
            Error::Exception(exception) => Some(exception),
            _ => None,
        }
    }
}
