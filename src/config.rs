//! Configuration types for the SOAP engine.

use serde::{Deserialize, Serialize};

/// The standard SOAP-over-HTTP transport URI.
pub const SOAP_HTTP_TRANSPORT: &str = "http://schemas.xmlsoap.org/soap/http";

/// Engine settings, loadable from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Service name, seen in the `name` attribute of the definitions tag.
    pub name: String,

    /// Target namespace of the application.
    pub target_namespace: String,

    /// Transport URI for the SOAP binding. Must not be empty when a WSDL is
    /// requested.
    pub transport: String,

    /// Emit a partnerLinkType description into the WSDL.
    pub partner_link: bool,

    /// Validate request bodies against the compiled schema before dispatch.
    pub validate_requests: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "SoapService".to_string(),
            target_namespace: "urn:soap-engine:service".to_string(),
            transport: SOAP_HTTP_TRANSPORT.to_string(),
            partner_link: false,
            validate_requests: false,
        }
    }
}
