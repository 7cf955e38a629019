//! Error types for the SOAP engine.
//!
//! `EngineError` covers the fatal build/decompose-time conditions: they signal
//! a programming or deployment defect and are never converted into wire
//! faults. Wire-visible errors live in [`crate::fault::Fault`].

use thiserror::Error;

/// Fatal engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The payload could not be parsed as XML.
    #[error("XML syntax error at line {line}, column {column}: {message}")]
    XmlSyntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// The document parsed, but is not a SOAP envelope.
    #[error("payload is not a SOAP envelope: {0}")]
    InvalidEnvelope(String),

    /// The request body carries no method element at all.
    #[error("could not extract a method name from the request body")]
    MissingMethodName,

    /// The body tag matches no registered call route.
    #[error("no call route registered for method {0:?}")]
    UnknownMethod(String),

    /// Two services declared the same qualified method tag.
    #[error("method {method:?} of service {service:?} overwrites the route registered by {existing:?}")]
    DuplicateMethod {
        method: String,
        service: String,
        existing: String,
    },

    /// The SOAP binding requires a transport URI.
    #[error("the SOAP binding transport URI is not configured")]
    MissingTransport,

    /// A namespace was referenced that the registry cannot resolve.
    #[error("namespace {0:?} has no registered prefix")]
    UnregisteredNamespace(String),

    /// A native value could not be decoded from its XML form.
    #[error("failed to decode {type_name}: {message}")]
    Decode { type_name: String, message: String },

    /// A native value could not be rendered to its XML form.
    #[error("failed to encode {type_name}: {message}")]
    Encode { type_name: String, message: String },

    /// The validation adapter could not compile the assembled schema.
    #[error("schema compilation failed: {0}")]
    SchemaCompile(String),

    /// Serialization failed while writing an XML document.
    #[error("XML write error: {0}")]
    XmlWrite(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn xml_write(err: impl std::fmt::Display) -> Self {
        Self::XmlWrite(err.to_string())
    }

    pub(crate) fn decode(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn encode(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}
