//! SOAP/WSDL protocol engine.
//!
//! Given a set of declared service method descriptors, this crate assembles a
//! cross-namespace XML Schema for all exposed types, builds the WSDL document
//! describing bindings, ports, and services, and implements the runtime
//! envelope codec: decompose an incoming SOAP 1.1 envelope into a
//! dispatchable method call, invoke it, and serialize the native result or
//! fault back into an envelope.
//!
//! # Features
//!
//! - Namespace-aware schema assembly with cross-type import resolution
//! - WSDL construction with document-style SOAP bindings and optional
//!   partner-link descriptions
//! - Request pipeline: decompose, decode, dispatch, serialize, with
//!   well-formed faults on every recoverable failure
//! - Optional schema validation of request bodies before dispatch
//!
//! # Example
//!
//! ```ignore
//! use soap_engine::{Application, EngineConfig};
//!
//! let app = Application::new(vec![my_service], &EngineConfig::default())?;
//! let wsdl = app.get_wsdl("http://localhost:8080/svc.wsdl")?;
//! let response = app.handle_request(&request_bytes, None)?;
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod fault;
pub mod ns;
pub mod schema;
pub mod service;
pub mod types;
pub mod validation;
pub mod wsdl;
pub mod xml;

pub use app::{Application, FaultObserver, RequestContext, SoapRequest};
pub use config::EngineConfig;
pub use error::EngineError;
pub use fault::Fault;
pub use ns::NamespaceRegistry;
pub use service::{DispatchError, MethodDescriptor, Service};
pub use types::{Member, Primitive, TypeDef, Value};
pub use validation::{SchemaEngine, ValidatingApplication};
