//! WSDL document construction.
//!
//! One `definitions` document is built per application: the unified schema is
//! embedded under `<types>`, followed by message declarations, the optional
//! partner-link description, and the service/portType/binding nodes. The
//! serialized bytes are cached by the application until it is reconstructed.

use crate::error::EngineError;
use crate::ns::{NamespaceRegistry, NS_PLINK, NS_WSDL, NS_WSDL_SOAP};
use crate::schema::{build_schema_nodes, SchemaEntries};
use crate::service::Service;
use crate::xml::{self, Element};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub struct WsdlBuilder<'a> {
    pub name: &'a str,
    pub tns: &'a str,
    pub transport: &'a str,
    pub with_partner_link: bool,
    pub services: &'a [Arc<dyn Service>],
}

impl WsdlBuilder<'_> {
    /// Build and serialize the definitions document for `url`.
    ///
    /// A trailing `.wsdl` suffix on the URL is stripped before it is embedded
    /// as the service address. A missing transport URI is a build-time fatal
    /// configuration error.
    pub fn build(
        &self,
        registry: &mut NamespaceRegistry,
        url: &str,
    ) -> Result<Vec<u8>, EngineError> {
        if self.transport.is_empty() {
            return Err(EngineError::MissingTransport);
        }

        registry.force_prefix(self.tns, "tns");
        let url = url.strip_suffix(".wsdl").unwrap_or(url);

        debug!(name = self.name, tns = self.tns, url, "building WSDL");

        let mut root = Element::new(NS_WSDL, "definitions")
            .with_attr("targetNamespace", self.tns)
            .with_attr("name", self.name);

        // types node with the unified schema embedded
        let mut entries = SchemaEntries::new(self.tns);
        for service in self.services {
            service.add_schema(&mut entries, registry)?;
        }
        let schemas = build_schema_nodes(&entries, registry, true)?;
        let mut types = Element::new(NS_WSDL, "types");
        for (_, schema) in schemas {
            types.push(schema);
        }
        root.push(types);

        // message declarations, deduplicated across services
        let mut declared = HashSet::new();
        for service in self.services {
            service.add_messages(&mut root, registry, &mut declared);
        }

        let tns_prefix = registry.resolve_prefix(self.tns);
        let has_callbacks = self.services.iter().any(|s| s.has_callbacks());

        if self.with_partner_link {
            root.push(self.partner_link(&tns_prefix, has_callbacks));
        }

        // service node with one port bound to the endpoint
        let mut service_node = Element::new(NS_WSDL, "service").with_attr("name", self.name);
        let mut port = Element::new(NS_WSDL, "port")
            .with_attr("name", self.name)
            .with_attr("binding", format!("{tns_prefix}:{}", self.name));
        port.push(Element::new(NS_WSDL_SOAP, "address").with_attr("location", url));
        service_node.push(port);
        root.push(service_node);

        // portType nodes
        let mut port_type = Element::new(NS_WSDL, "portType").with_attr("name", self.name);
        for service in self.services {
            service.add_port_type(&mut port_type, &tns_prefix);
        }
        root.push(port_type);

        let mut cb_port_type = if has_callbacks {
            Some(
                Element::new(NS_WSDL, "portType")
                    .with_attr("name", format!("{}Callback", self.name)),
            )
        } else {
            None
        };
        if let Some(cb) = cb_port_type.as_mut() {
            for service in self.services {
                service.add_callback_port_type(cb, &tns_prefix);
            }
        }

        // binding nodes
        let mut binding = Element::new(NS_WSDL, "binding")
            .with_attr("name", self.name)
            .with_attr("type", format!("{tns_prefix}:{}", self.name));
        binding.push(self.soap_binding());

        let mut cb_binding = if has_callbacks {
            let mut cb = Element::new(NS_WSDL, "binding")
                .with_attr("name", format!("{}Callback", self.name))
                .with_attr("type", format!("{tns_prefix}:{}Callback", self.name));
            cb.push(self.soap_binding());
            Some(cb)
        } else {
            None
        };

        for service in self.services {
            service.add_bindings(&mut binding, cb_binding.as_mut());
        }
        root.push(binding);

        if let Some(cb) = cb_port_type {
            root.push(cb);
        }
        if let Some(cb) = cb_binding {
            root.push(cb);
        }

        xml::to_bytes(&root, registry)
    }

    fn soap_binding(&self) -> Element {
        Element::new(NS_WSDL_SOAP, "binding")
            .with_attr("style", "document")
            .with_attr("transport", self.transport)
    }

    fn partner_link(&self, tns_prefix: &str, has_callbacks: bool) -> Element {
        let mut plink = Element::new(NS_PLINK, "partnerLinkType").with_attr("name", self.name);

        let mut role = Element::new(NS_PLINK, "role").with_attr("name", self.name);
        role.push(
            Element::new(NS_PLINK, "portType")
                .with_attr("name", format!("{tns_prefix}:{}", self.name)),
        );
        plink.push(role);

        if has_callbacks {
            let mut cb_role =
                Element::new(NS_PLINK, "role").with_attr("name", format!("{}Callback", self.name));
            cb_role.push(
                Element::new(NS_PLINK, "portType")
                    .with_attr("name", format!("{tns_prefix}:{}Callback", self.name)),
            );
            plink.push(cb_role);
        }
        plink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::RequestContext;
    use crate::service::{DispatchError, MethodDescriptor};
    use crate::types::{Member, TypeDef, Value};

    const TNS: &str = "urn:example:calc";
    const TRANSPORT: &str = "http://schemas.xmlsoap.org/soap/http";

    struct CalcService {
        methods: Vec<MethodDescriptor>,
    }

    impl CalcService {
        fn new(with_callback: bool) -> Arc<dyn Service> {
            let mut methods = vec![MethodDescriptor::rpc(
                TNS,
                "add",
                vec![
                    Member::new("a", TypeDef::int()),
                    Member::new("b", TypeDef::int()),
                ],
                Some(TypeDef::int()),
            )];
            if with_callback {
                methods.push(MethodDescriptor::rpc(TNS, "resultReady", vec![], None).callback());
            }
            Arc::new(Self { methods })
        }
    }

    impl Service for CalcService {
        fn name(&self) -> &str {
            "Calculator"
        }

        fn methods(&self) -> &[MethodDescriptor] {
            &self.methods
        }

        fn invoke(
            &self,
            _method: &MethodDescriptor,
            _params: Vec<Value>,
            _ctx: &mut RequestContext,
        ) -> Result<Value, DispatchError> {
            Ok(Value::Null)
        }
    }

    fn build(with_partner_link: bool, with_callback: bool) -> String {
        let services = vec![CalcService::new(with_callback)];
        let builder = WsdlBuilder {
            name: "Calculator",
            tns: TNS,
            transport: TRANSPORT,
            with_partner_link,
            services: &services,
        };
        let mut registry = NamespaceRegistry::new();
        let bytes = builder.build(&mut registry, "http://localhost/calc").unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_missing_transport_is_fatal() {
        let services = vec![CalcService::new(false)];
        let builder = WsdlBuilder {
            name: "Calculator",
            tns: TNS,
            transport: "",
            with_partner_link: false,
            services: &services,
        };
        let mut registry = NamespaceRegistry::new();
        let err = builder.build(&mut registry, "http://localhost/calc").unwrap_err();
        assert!(matches!(err, EngineError::MissingTransport));
    }

    #[test]
    fn test_definitions_layout() {
        let text = build(false, false);
        assert!(text.contains("wsdl:definitions"));
        assert!(text.contains(&format!("targetNamespace=\"{TNS}\"")));
        assert!(text.contains("xmlns:tns=\"urn:example:calc\""));
        assert!(text.contains("<wsdl:types>"));
        assert!(text.contains("elementFormDefault=\"qualified\""));
        assert!(text.contains("soap:address location=\"http://localhost/calc\""));
        assert!(text.contains("style=\"document\""));
        assert!(text.contains(&format!("transport=\"{TRANSPORT}\"")));
        assert!(text.contains("tns:addResponse"));
    }

    #[test]
    fn test_wsdl_suffix_stripped_from_address() {
        let services = vec![CalcService::new(false)];
        let builder = WsdlBuilder {
            name: "Calculator",
            tns: TNS,
            transport: TRANSPORT,
            with_partner_link: false,
            services: &services,
        };
        let mut registry = NamespaceRegistry::new();
        let bytes = builder
            .build(&mut registry, "http://localhost/calc.wsdl")
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("location=\"http://localhost/calc\""));
        assert!(!text.contains("location=\"http://localhost/calc.wsdl\""));
    }

    #[test]
    fn test_partner_link_roles() {
        let text = build(true, true);
        assert!(text.contains("plnk:partnerLinkType"));
        assert!(text.contains("plnk:role"));
        assert!(text.contains("name=\"CalculatorCallback\""));
        assert!(text.contains("tns:CalculatorCallback"));
    }

    #[test]
    fn test_no_callback_role_without_callbacks() {
        let text = build(true, false);
        assert!(text.contains("plnk:partnerLinkType"));
        assert!(!text.contains("CalculatorCallback"));
    }
}
