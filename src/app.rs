//! The application: call routing, build-once schema/WSDL artifacts, and the
//! request pipeline (decompose, decode, dispatch, serialize).
//!
//! Shared state (the namespace registry, the call-route table, cached
//! documents) is populated during construction and read-only while requests
//! are served; the one lazy artifact, the WSDL, sits behind a one-time
//! initialization guard.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fault::{Fault, FAULT_CLIENT_XML_SYNTAX};
use crate::ns::{NamespaceRegistry, NS_SOAP_ENV};
use crate::schema::{build_schema_nodes, SchemaEntries};
use crate::service::{DispatchError, MethodDescriptor, Service};
use crate::types::Value;
use crate::validation::CompiledSchema;
use crate::wsdl::WsdlBuilder;
use crate::xml::{self, clark, Element};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Notified when a fault is serialized, with both the native fault and its
/// XML rendering.
pub trait FaultObserver: Send + Sync {
    fn on_fault(&self, fault: &Fault, body: &Element);
}

/// Per-request state, created at decomposition and dropped after the
/// response is serialized. Never shared across requests.
pub struct RequestContext {
    pub method_name: String,
    pub descriptor: MethodDescriptor,
    pub header_xml: Option<Element>,
    pub body_xml: Option<Element>,
    /// Decoded request header object, when one was declared and present.
    pub in_header: Option<Value>,
    /// Response header object a method implementation may set.
    pub out_header: Option<Value>,
    /// The serialized `<Body>` node, filled during serialization.
    pub soap_body: Option<Element>,
    /// Context-scoped fault observer.
    pub observer: Option<Arc<dyn FaultObserver>>,
    pub(crate) service: usize,
}

/// Outcome of decomposing and decoding one envelope.
pub enum SoapRequest {
    /// A dispatchable call with its positional arguments.
    Call(RequestContext, Vec<Value>),
    /// Validation rejected the body before any decode attempt.
    Fault(Fault),
}

struct Route {
    service: usize,
    descriptor: MethodDescriptor,
}

/// A set of exposed services plus everything derived from them at
/// construction time.
pub struct Application {
    name: String,
    tns: String,
    /// Prefix the target namespace had when the schema documents were built;
    /// the WSDL build later migrates the registry binding to `tns`.
    tns_prefix: String,
    transport: String,
    with_partner_link: bool,
    services: Vec<Arc<dyn Service>>,
    registry: RwLock<NamespaceRegistry>,
    call_routes: HashMap<String, Route>,
    /// prefix -> standalone XSD bytes, built once during construction.
    schema_docs: IndexMap<String, Vec<u8>>,
    wsdl: OnceLock<Vec<u8>>,
    observers: Vec<Arc<dyn FaultObserver>>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("tns", &self.tns)
            .field("tns_prefix", &self.tns_prefix)
            .field("transport", &self.transport)
            .field("with_partner_link", &self.with_partner_link)
            .field("services", &self.services.len())
            .field("call_routes", &self.call_routes.len())
            .field("schema_docs", &self.schema_docs.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Application {
    pub fn new(
        services: Vec<Arc<dyn Service>>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let tns = config.target_namespace.clone();
        let mut registry = NamespaceRegistry::new();

        // call-route table; a duplicate qualified tag is a build-time error
        let mut call_routes: HashMap<String, Route> = HashMap::new();
        for (index, service) in services.iter().enumerate() {
            for method in service.methods() {
                let qualified = clark(&tns, &method.name);
                if let Some(existing) = call_routes.get(&qualified) {
                    return Err(EngineError::DuplicateMethod {
                        method: qualified,
                        service: service.name().to_string(),
                        existing: services[existing.service].name().to_string(),
                    });
                }
                debug!(method = %qualified, service = service.name(), "adding call route");
                call_routes.insert(
                    qualified,
                    Route {
                        service: index,
                        descriptor: method.clone(),
                    },
                );
                call_routes.insert(
                    method.name.clone(),
                    Route {
                        service: index,
                        descriptor: method.clone(),
                    },
                );
            }
        }

        // standalone schema documents, built once
        let mut entries = SchemaEntries::new(&tns);
        for service in &services {
            service.add_schema(&mut entries, &mut registry)?;
        }
        let nodes = build_schema_nodes(&entries, &mut registry, false)?;
        let mut schema_docs = IndexMap::new();
        for (prefix, node) in &nodes {
            schema_docs.insert(prefix.clone(), xml::to_bytes_pretty(node, &registry)?);
        }
        let tns_prefix = registry.resolve_prefix(&tns);

        info!(
            name = %config.name,
            services = services.len(),
            namespaces = schema_docs.len(),
            "application constructed"
        );

        Ok(Self {
            name: config.name.clone(),
            tns,
            tns_prefix,
            transport: config.transport.clone(),
            with_partner_link: config.partner_link,
            services,
            registry: RwLock::new(registry),
            call_routes,
            schema_docs,
            wsdl: OnceLock::new(),
            observers: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tns(&self) -> &str {
        &self.tns
    }

    /// Register an application-scoped fault observer. Must be called before
    /// requests are served.
    pub fn add_fault_observer(&mut self, observer: Arc<dyn FaultObserver>) {
        self.observers.push(observer);
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, NamespaceRegistry> {
        match self.registry.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, NamespaceRegistry> {
        match self.registry.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Prefix the target namespace carries in the standalone schema
    /// documents.
    pub fn tns_prefix(&self) -> String {
        self.tns_prefix.clone()
    }

    /// The standalone per-namespace XSD documents.
    pub fn schema_documents(&self) -> &IndexMap<String, Vec<u8>> {
        &self.schema_docs
    }

    /// The serialized WSDL for `url`, built on first access and cached until
    /// the application is reconstructed.
    pub fn get_wsdl(&self, url: &str) -> Result<&[u8], EngineError> {
        if let Some(cached) = self.wsdl.get() {
            return Ok(cached);
        }
        let bytes = {
            let mut registry = self.write_registry();
            WsdlBuilder {
                name: &self.name,
                tns: &self.tns,
                transport: &self.transport,
                with_partner_link: self.with_partner_link,
                services: &self.services,
            }
            .build(&mut registry, url)?
        };
        Ok(self.wsdl.get_or_init(|| bytes).as_slice())
    }

    /// Decompose and decode one envelope into a dispatchable call.
    pub fn deserialize_soap(&self, envelope: &str) -> Result<SoapRequest, EngineError> {
        self.deserialize_soap_with(envelope, None)
    }

    pub(crate) fn deserialize_soap_with(
        &self,
        envelope: &str,
        validator: Option<&dyn CompiledSchema>,
    ) -> Result<SoapRequest, EngineError> {
        let root = xml::parse(envelope)?;
        if root.name.namespace != NS_SOAP_ENV || root.name.local != "Envelope" {
            return Err(EngineError::InvalidEnvelope(format!(
                "unexpected root element {:?}",
                root.tag()
            )));
        }

        let header_xml = root.child(NS_SOAP_ENV, "Header").cloned();
        let payload = root
            .child(NS_SOAP_ENV, "Body")
            .and_then(|body| body.children.first())
            .cloned();

        // schema validation short-circuits to fault serialization, before
        // any decode attempt
        if let (Some(payload), Some(schema)) = (&payload, validator) {
            if let Err(diagnostic) = schema.validate(payload) {
                debug!(%diagnostic, "request body failed schema validation");
                return Ok(SoapRequest::Fault(Fault::schema_validation(diagnostic)));
            }
        }

        let payload = payload.ok_or(EngineError::MissingMethodName)?;
        let method_name = payload.tag();
        debug!(method = %method_name, "decomposed request");

        let route = self
            .call_routes
            .get(&method_name)
            .ok_or_else(|| EngineError::UnknownMethod(method_name.clone()))?;
        let descriptor = route.descriptor.clone();

        let mut ctx = RequestContext {
            method_name,
            descriptor: descriptor.clone(),
            header_xml,
            body_xml: Some(payload.clone()),
            in_header: None,
            out_header: None,
            soap_body: None,
            observer: None,
            service: route.service,
        };

        // decode the header object
        if let (Some(header), Some(header_type)) = (&ctx.header_xml, &descriptor.in_header) {
            if let Some(entry) = header.children.first() {
                ctx.in_header = Some(header_type.from_xml(entry)?);
            }
        }

        // decode positional arguments; an empty body yields one placeholder
        // per declared parameter
        let params = if payload.children.is_empty() && payload.text_content().is_empty() {
            vec![Value::Null; descriptor.in_message.param_count()]
        } else {
            descriptor.in_message.decode_params(&payload)?
        };

        Ok(SoapRequest::Call(ctx, params))
    }

    /// Dispatch a decoded call. Domain faults pass through unchanged; any
    /// other error is wrapped into a generic `Server` fault after its full
    /// chain is logged.
    pub fn process_request(
        &self,
        ctx: &mut RequestContext,
        params: Vec<Value>,
    ) -> Result<Value, Fault> {
        let service = Arc::clone(&self.services[ctx.service]);
        let descriptor = ctx.descriptor.clone();
        match service.invoke(&descriptor, params, ctx) {
            Ok(value) => Ok(value),
            Err(DispatchError::Fault(fault)) => Err(fault),
            Err(DispatchError::Internal(err)) => {
                error!(method = %ctx.method_name, "method implementation failed: {err:#}");
                Err(Fault::server(err.to_string()))
            }
        }
    }

    /// Serialize a successful result: optional response header plus the
    /// single-field result wrapper in the body.
    pub fn serialize_response(
        &self,
        ctx: &mut RequestContext,
        native: Value,
    ) -> Result<Vec<u8>, EngineError> {
        let registry = self.read_registry();
        let mut envelope = Element::new(NS_SOAP_ENV, "Envelope");

        if let Some(out_header) = &ctx.out_header {
            match &ctx.descriptor.out_header {
                None => warn!(
                    method = %ctx.descriptor.name,
                    "skipping response header: method is not published to have one"
                ),
                Some(header_type) => {
                    let mut header = Element::new(NS_SOAP_ENV, "Header");
                    header_type.to_xml(out_header, &mut header, None)?;
                    envelope.push(header);
                }
            }
        }

        let mut body = Element::new(NS_SOAP_ENV, "Body");
        let out_message = &ctx.descriptor.out_message;
        let wrapped = match out_message.all_members().first() {
            Some(member) => Value::Object(vec![(member.name.clone(), native)]),
            None => Value::Object(Vec::new()),
        };
        out_message.to_xml(&wrapped, &mut body, None)?;
        ctx.soap_body = Some(body.clone());
        envelope.push(body);

        let bytes = xml::to_bytes(&envelope, &registry)?;
        debug!(method = %ctx.method_name, bytes = bytes.len(), "serialized response");
        Ok(bytes)
    }

    /// Serialize a fault-only envelope and run the notification hooks. The
    /// context is absent when decomposition failed before one existed.
    pub fn serialize_fault(
        &self,
        ctx: Option<&mut RequestContext>,
        fault: &Fault,
    ) -> Result<Vec<u8>, EngineError> {
        error!(code = %fault.code, "serializing fault: {}", fault.string);

        let registry = self.read_registry();
        let mut envelope = Element::new(NS_SOAP_ENV, "Envelope");
        let mut body = Element::new(NS_SOAP_ENV, "Body");
        fault.to_xml(&mut body);

        if let Some(ctx) = ctx {
            if let Some(observer) = &ctx.observer {
                observer.on_fault(fault, &body);
            }
            ctx.soap_body = Some(body.clone());
        }
        for observer in &self.observers {
            observer.on_fault(fault, &body);
        }

        envelope.push(body);
        xml::to_bytes(&envelope, &registry)
    }

    /// Run one payload through the whole pipeline.
    pub fn handle_request(
        &self,
        payload: &[u8],
        charset: Option<&str>,
    ) -> Result<Vec<u8>, EngineError> {
        self.handle_request_with(payload, charset, None)
    }

    pub(crate) fn handle_request_with(
        &self,
        payload: &[u8],
        charset: Option<&str>,
        validator: Option<&dyn CompiledSchema>,
    ) -> Result<Vec<u8>, EngineError> {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(err) => {
                let fault = Fault::new(
                    FAULT_CLIENT_XML_SYNTAX,
                    format!("invalid {} payload: {}", charset.unwrap_or("UTF-8"), err),
                );
                return self.serialize_fault(None, &fault);
            }
        };

        match self.deserialize_soap_with(text, validator) {
            Ok(SoapRequest::Call(mut ctx, params)) => {
                match self.process_request(&mut ctx, params) {
                    Ok(native) => self.serialize_response(&mut ctx, native),
                    Err(fault) => self.serialize_fault(Some(&mut ctx), &fault),
                }
            }
            Ok(SoapRequest::Fault(fault)) => self.serialize_fault(None, &fault),
            Err(EngineError::XmlSyntax { line, column, .. }) => {
                self.serialize_fault(None, &Fault::xml_syntax(line, column))
            }
            Err(fatal) => Err(fatal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FAULT_SERVER;
    use crate::types::{Member, TypeDef};
    use anyhow::anyhow;

    const TNS: &str = "urn:example:echo";

    struct EchoService {
        methods: Vec<MethodDescriptor>,
    }

    impl EchoService {
        fn new() -> Arc<dyn Service> {
            let header = TypeDef::structure(
                TNS,
                "SessionHeader",
                vec![Member::new("token", TypeDef::string())],
            );
            Arc::new(Self {
                methods: vec![
                    MethodDescriptor::rpc(
                        TNS,
                        "echoString",
                        vec![Member::new("s", TypeDef::string())],
                        Some(TypeDef::string()),
                    )
                    .with_in_header(header),
                    MethodDescriptor::rpc(TNS, "boom", vec![], Some(TypeDef::string())),
                    MethodDescriptor::rpc(TNS, "leakHeader", vec![], Some(TypeDef::string())),
                ],
            })
        }
    }

    impl Service for EchoService {
        fn name(&self) -> &str {
            "Echo"
        }

        fn methods(&self) -> &[MethodDescriptor] {
            &self.methods
        }

        fn invoke(
            &self,
            method: &MethodDescriptor,
            params: Vec<Value>,
            ctx: &mut RequestContext,
        ) -> Result<Value, DispatchError> {
            match method.name.as_str() {
                "echoString" => Ok(params.into_iter().next().unwrap_or(Value::Null)),
                "boom" => Err(anyhow!("boom").into()),
                "leakHeader" => {
                    // sets a response header the descriptor does not declare
                    ctx.out_header = Some(Value::from("oops"));
                    Ok(Value::from("done"))
                }
                other => Err(anyhow!("no such method {other}").into()),
            }
        }
    }

    fn app() -> Application {
        let config = EngineConfig {
            name: "Echo".to_string(),
            target_namespace: TNS.to_string(),
            ..Default::default()
        };
        Application::new(vec![EchoService::new()], &config).unwrap()
    }

    fn envelope(body: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<senv:Envelope xmlns:senv="http://schemas.xmlsoap.org/soap/envelope/">
  <senv:Body>{body}</senv:Body>
</senv:Envelope>"#
        )
    }

    #[test]
    fn test_echo_roundtrip() {
        let app = app();
        let request = envelope(&format!(r#"<m:echoString xmlns:m="{TNS}"><m:s>OK</m:s></m:echoString>"#));
        let response = app.handle_request(request.as_bytes(), None).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains("echoStringResponse"));
        assert!(text.contains(">OK<"));
    }

    #[test]
    fn test_internal_error_becomes_server_fault() {
        let app = app();
        let request = envelope(&format!(r#"<m:boom xmlns:m="{TNS}"/>"#));
        let response = app.handle_request(request.as_bytes(), None).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains(&format!("<faultcode>{FAULT_SERVER}</faultcode>")));
        assert!(text.contains("<faultstring>boom</faultstring>"));
    }

    #[test]
    fn test_unknown_method_is_fatal_before_decode() {
        let app = app();
        let request = envelope(&format!(r#"<m:noSuchOp xmlns:m="{TNS}"/>"#));
        let err = app.handle_request(request.as_bytes(), None).unwrap_err();
        assert!(matches!(err, EngineError::UnknownMethod(_)));
    }

    #[test]
    fn test_empty_body_is_fatal() {
        let app = app();
        let request = envelope("");
        let err = app.handle_request(request.as_bytes(), None).unwrap_err();
        assert!(matches!(err, EngineError::MissingMethodName));
    }

    #[test]
    fn test_empty_message_decodes_to_placeholders() {
        let app = app();
        let request = envelope(&format!(r#"<m:echoString xmlns:m="{TNS}"/>"#));
        match app.deserialize_soap(&request).unwrap() {
            SoapRequest::Call(_, params) => assert_eq!(params, vec![Value::Null]),
            SoapRequest::Fault(fault) => panic!("unexpected fault: {fault}"),
        }
    }

    #[test]
    fn test_malformed_xml_becomes_syntax_fault() {
        let app = app();
        let response = app.handle_request(b"<not-even-xml", None).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains(FAULT_CLIENT_XML_SYNTAX));
        assert!(text.contains("line:"));
    }

    #[test]
    fn test_header_decoded_when_declared() {
        let app = app();
        let request = format!(
            r#"<?xml version="1.0"?>
<senv:Envelope xmlns:senv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:m="{TNS}">
  <senv:Header><m:SessionHeader><m:token>t-1</m:token></m:SessionHeader></senv:Header>
  <senv:Body><m:echoString><m:s>x</m:s></m:echoString></senv:Body>
</senv:Envelope>"#
        );
        match app.deserialize_soap(&request).unwrap() {
            SoapRequest::Call(ctx, _) => {
                let header = ctx.in_header.expect("decoded header");
                assert_eq!(header.field("token"), Some(&Value::from("t-1")));
            }
            SoapRequest::Fault(fault) => panic!("unexpected fault: {fault}"),
        }
    }

    #[test]
    fn test_undeclared_response_header_is_skipped() {
        let app = app();
        let request = envelope(&format!(r#"<m:leakHeader xmlns:m="{TNS}"/>"#));
        let response = app.handle_request(request.as_bytes(), None).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(!text.contains("senv:Header"));
        assert!(text.contains("leakHeaderResponse"));
    }

    #[test]
    fn test_duplicate_method_fails_construction() {
        let config = EngineConfig {
            target_namespace: TNS.to_string(),
            ..Default::default()
        };
        let err = Application::new(vec![EchoService::new(), EchoService::new()], &config)
            .unwrap_err();
        match err {
            EngineError::DuplicateMethod { method, .. } => {
                assert!(method.contains("echoString"))
            }
            other => panic!("expected DuplicateMethod, got {other:?}"),
        }
    }

    #[test]
    fn test_wsdl_is_cached() {
        let app = app();
        let first = app.get_wsdl("http://localhost/echo.wsdl").unwrap().to_vec();
        // a different URL afterwards still returns the cached document
        let second = app.get_wsdl("http://other/ignored").unwrap();
        assert_eq!(first, second);
        assert!(String::from_utf8_lossy(second).contains("location=\"http://localhost/echo\""));
    }

    #[test]
    fn test_fault_observer_sees_native_and_xml() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counter(AtomicUsize);
        impl FaultObserver for Counter {
            fn on_fault(&self, fault: &Fault, body: &Element) {
                assert_eq!(fault.code, FAULT_SERVER);
                assert!(body.child(NS_SOAP_ENV, "Fault").is_some());
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut app = app();
        app.add_fault_observer(counter.clone());

        let request = envelope(&format!(r#"<m:boom xmlns:m="{TNS}"/>"#));
        app.handle_request(request.as_bytes(), None).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
