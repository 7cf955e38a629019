//! SOAP fault model.
//!
//! Faults are the only recoverable, wire-visible error kind. They travel
//! through dispatch and serialization as the `Err` arm of an ordinary
//! `Result`, never by unwinding.

use crate::ns::NS_SOAP_ENV;
use crate::xml::Element;
use std::fmt;

/// Generic server-side failure.
pub const FAULT_SERVER: &str = "Server";
/// The request payload was not well-formed XML.
pub const FAULT_CLIENT_XML_SYNTAX: &str = "Client.XMLSyntax";
/// The request body failed schema validation.
pub const FAULT_CLIENT_SCHEMA_VALIDATION: &str = "Client.SchemaValidation";

/// A SOAP 1.1 fault payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub code: String,
    pub string: String,
    pub actor: Option<String>,
    pub detail: Option<Element>,
}

impl Fault {
    pub fn new(code: impl Into<String>, string: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            string: string.into(),
            actor: None,
            detail: None,
        }
    }

    /// Generic `Server` fault exposing only the error's text.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FAULT_SERVER, message)
    }

    /// Malformed-payload fault with the parser's position.
    pub fn xml_syntax(line: usize, column: usize) -> Self {
        Self::new(
            FAULT_CLIENT_XML_SYNTAX,
            format!("Error at line: {line}, col: {column}"),
        )
    }

    /// Schema-violation fault carrying the validator's diagnostic.
    pub fn schema_validation(diagnostic: impl Into<String>) -> Self {
        Self::new(FAULT_CLIENT_SCHEMA_VALIDATION, diagnostic)
    }

    pub fn with_detail(mut self, detail: Element) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Append the `<Fault>` rendering of this fault to `parent`.
    pub fn to_xml(&self, parent: &mut Element) {
        let mut fault = Element::new(NS_SOAP_ENV, "Fault");
        fault.push(Element::new("", "faultcode").with_text(&self.code));
        fault.push(Element::new("", "faultstring").with_text(&self.string));
        if let Some(actor) = &self.actor {
            fault.push(Element::new("", "faultactor").with_text(actor));
        }
        if let Some(detail) = &self.detail {
            let mut wrapper = Element::new("", "detail");
            wrapper.push(detail.clone());
            fault.push(wrapper);
        }
        parent.push(fault);
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.string)
    }
}

impl std::error::Error for Fault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_body_layout() {
        let mut body = Element::new(NS_SOAP_ENV, "Body");
        Fault::server("boom").to_xml(&mut body);

        let fault = body.child(NS_SOAP_ENV, "Fault").expect("Fault element");
        assert_eq!(fault.child_local("faultcode").unwrap().text_content(), "Server");
        assert_eq!(fault.child_local("faultstring").unwrap().text_content(), "boom");
        assert!(fault.child_local("detail").is_none());
    }

    #[test]
    fn test_xml_syntax_fault_carries_position() {
        let fault = Fault::xml_syntax(12, 5);
        assert_eq!(fault.code, FAULT_CLIENT_XML_SYNTAX);
        assert!(fault.string.contains("line: 12"));
        assert!(fault.string.contains("col: 5"));
    }

    #[test]
    fn test_detail_is_wrapped() {
        let detail = Element::new("urn:x", "diagnostic").with_text("stack");
        let mut body = Element::new(NS_SOAP_ENV, "Body");
        Fault::server("oops").with_detail(detail).to_xml(&mut body);

        let fault = body.child(NS_SOAP_ENV, "Fault").unwrap();
        let wrapper = fault.child_local("detail").unwrap();
        assert_eq!(wrapper.children[0].name.local, "diagnostic");
    }
}
