//! Service contract: method descriptors and the interface every exposed
//! service satisfies.
//!
//! The WSDL-contribution methods have default implementations derived from
//! the method descriptors, so a typical service only supplies its name, its
//! descriptor table, and `invoke`.

use crate::app::RequestContext;
use crate::error::EngineError;
use crate::fault::Fault;
use crate::ns::{NamespaceRegistry, NS_WSDL, NS_WSDL_SOAP};
use crate::schema::SchemaEntries;
use crate::types::{Member, TypeDef, Value};
use crate::xml::Element;
use std::collections::HashSet;
use std::sync::Arc;

/// Descriptor for one exposed method. Immutable once registered.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub in_message: Arc<TypeDef>,
    pub out_message: Arc<TypeDef>,
    pub in_header: Option<Arc<TypeDef>>,
    pub out_header: Option<Arc<TypeDef>>,
    /// Operation documentation, emitted into the WSDL.
    pub doc: Option<String>,
    /// Callback operations get their own portType/binding and drive the
    /// second partner-link role.
    pub is_callback: bool,
    /// One-way operations have no output message in the portType.
    pub is_async: bool,
}

impl MethodDescriptor {
    pub fn new(
        name: impl Into<String>,
        in_message: Arc<TypeDef>,
        out_message: Arc<TypeDef>,
    ) -> Self {
        Self {
            name: name.into(),
            in_message,
            out_message,
            in_header: None,
            out_header: None,
            doc: None,
            is_callback: false,
            is_async: false,
        }
    }

    /// Conventional descriptor: the input message is named after the method
    /// and the response is a `<name>Response` wrapper with a single
    /// `<name>Result` member.
    pub fn rpc(
        namespace: &str,
        name: &str,
        params: Vec<Member>,
        returns: Option<Arc<TypeDef>>,
    ) -> Self {
        let in_message = TypeDef::structure(namespace, name, params);
        let out_members = returns
            .map(|ty| vec![Member::new(format!("{name}Result"), ty).nillable()])
            .unwrap_or_default();
        let out_message = TypeDef::structure(namespace, format!("{name}Response"), out_members);
        Self::new(name, in_message, out_message)
    }

    pub fn with_in_header(mut self, ty: Arc<TypeDef>) -> Self {
        self.in_header = Some(ty);
        self
    }

    pub fn with_out_header(mut self, ty: Arc<TypeDef>) -> Self {
        self.out_header = Some(ty);
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn callback(mut self) -> Self {
        self.is_callback = true;
        self
    }

    fn message_types(&self) -> Vec<&Arc<TypeDef>> {
        let mut out = vec![&self.in_message, &self.out_message];
        if let Some(h) = &self.in_header {
            out.push(h);
        }
        if let Some(h) = &self.out_header {
            out.push(h);
        }
        out
    }
}

/// Dispatch outcome other than a normal return.
#[derive(Debug)]
pub enum DispatchError {
    /// Intentional domain fault, passed to the wire verbatim.
    Fault(Fault),
    /// Anything else; wrapped into a generic `Server` fault after logging.
    Internal(anyhow::Error),
}

impl From<Fault> for DispatchError {
    fn from(fault: Fault) -> Self {
        DispatchError::Fault(fault)
    }
}

impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        DispatchError::Internal(err)
    }
}

/// The contract every exposed service class satisfies.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// The descriptor table, one entry per exposed method.
    fn methods(&self) -> &[MethodDescriptor];

    /// Invoke the implementation behind `method` with positional arguments.
    fn invoke(
        &self,
        method: &MethodDescriptor,
        params: Vec<Value>,
        ctx: &mut RequestContext,
    ) -> Result<Value, DispatchError>;

    fn has_callbacks(&self) -> bool {
        self.methods().iter().any(|m| m.is_callback)
    }

    /// Register every message and header type with the schema assembler.
    fn add_schema(
        &self,
        entries: &mut SchemaEntries,
        registry: &mut NamespaceRegistry,
    ) -> Result<(), EngineError> {
        for method in self.methods() {
            for ty in method.message_types() {
                ty.add_to_schema(entries, registry)?;
            }
        }
        Ok(())
    }

    /// Append `<message>` declarations, skipping names another service (or
    /// method) already declared.
    fn add_messages(
        &self,
        root: &mut Element,
        registry: &mut NamespaceRegistry,
        declared: &mut HashSet<String>,
    ) {
        for method in self.methods() {
            for ty in method.message_types() {
                let name = ty.type_name().to_string();
                if !declared.insert(name.clone()) {
                    continue;
                }
                let prefix = registry.resolve_prefix(ty.namespace());
                let mut message = Element::new(NS_WSDL, "message").with_attr("name", &name);
                message.push(
                    Element::new(NS_WSDL, "part")
                        .with_attr("name", &name)
                        .with_attr("element", format!("{prefix}:{name}")),
                );
                root.push(message);
            }
        }
    }

    /// Append `<operation>` entries for regular (non-callback) methods.
    fn add_port_type(&self, port_type: &mut Element, tns_prefix: &str) {
        for method in self.methods().iter().filter(|m| !m.is_callback) {
            port_type.push(port_type_operation(method, tns_prefix));
        }
    }

    /// Append `<operation>` entries for callback methods.
    fn add_callback_port_type(&self, port_type: &mut Element, tns_prefix: &str) {
        for method in self.methods().iter().filter(|m| m.is_callback) {
            port_type.push(port_type_operation(method, tns_prefix));
        }
    }

    /// Append binding operations; callback methods go to `cb_binding`.
    fn add_bindings(&self, binding: &mut Element, mut cb_binding: Option<&mut Element>) {
        for method in self.methods() {
            let operation = binding_operation(method);
            if method.is_callback {
                if let Some(cb) = cb_binding.as_deref_mut() {
                    cb.push(operation);
                }
            } else {
                binding.push(operation);
            }
        }
    }
}

fn port_type_operation(method: &MethodDescriptor, tns_prefix: &str) -> Element {
    let mut operation = Element::new(NS_WSDL, "operation").with_attr("name", &method.name);
    if let Some(doc) = &method.doc {
        operation.push(Element::new(NS_WSDL, "documentation").with_text(doc));
    }
    operation.push(
        Element::new(NS_WSDL, "input").with_attr(
            "message",
            format!("{tns_prefix}:{}", method.in_message.type_name()),
        ),
    );
    if !method.is_async {
        operation.push(
            Element::new(NS_WSDL, "output").with_attr(
                "message",
                format!("{tns_prefix}:{}", method.out_message.type_name()),
            ),
        );
    }
    operation
}

fn binding_operation(method: &MethodDescriptor) -> Element {
    let mut operation = Element::new(NS_WSDL, "operation").with_attr("name", &method.name);
    operation.push(
        Element::new(NS_WSDL_SOAP, "operation")
            .with_attr("soapAction", &method.name)
            .with_attr("style", "document"),
    );

    let mut input = Element::new(NS_WSDL, "input").with_attr("name", &method.name);
    input.push(Element::new(NS_WSDL_SOAP, "body").with_attr("use", "literal"));
    operation.push(input);

    if !method.is_async {
        let mut output = Element::new(NS_WSDL, "output")
            .with_attr("name", method.out_message.type_name());
        output.push(Element::new(NS_WSDL_SOAP, "body").with_attr("use", "literal"));
        operation.push(output);
    }
    operation
}
