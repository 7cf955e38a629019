//! Schema-validating variant of the pipeline.
//!
//! The assembled per-namespace XSD documents are written to a scratch
//! directory, compiled into a validator object, and the scratch area is
//! discarded. Before any decode step, the body payload is checked against the
//! compiled validator; a violation raises a `Client.SchemaValidation` fault
//! carrying the engine's diagnostic.
//!
//! Schema compilation is behind the [`SchemaEngine`] trait; the shipped
//! engine is structural (element declarations, required members, enumeration
//! facets, primitive lexical checks), not a general XSD implementation. An
//! external validator such as libxml2 can implement the same trait.

use crate::app::Application;
use crate::error::EngineError;
use crate::ns::NS_XSI;
use crate::xml::{self, clark, Element};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::debug;

/// A compiled, reusable schema validator.
pub trait CompiledSchema: Send + Sync {
    /// Check one body payload; `Err` carries the diagnostic message that
    /// becomes the fault string.
    fn validate(&self, payload: &Element) -> Result<(), String>;
}

/// Compiles the assembled schema documents into a [`CompiledSchema`].
pub trait SchemaEngine {
    fn compile(
        &self,
        docs: &IndexMap<String, Vec<u8>>,
        target_prefix: &str,
    ) -> Result<Box<dyn CompiledSchema>, EngineError>;
}

#[derive(Debug, Clone)]
struct MemberDecl {
    name: String,
    type_ref: String,
    min_occurs: u32,
    nillable: bool,
}

#[derive(Debug)]
enum TypeDecl {
    Complex {
        base: Option<String>,
        members: Vec<MemberDecl>,
    },
    Enumeration(Vec<String>),
}

/// Structural validator built from the engine's own emitted XSD documents.
struct StructuralValidator {
    target_prefix: String,
    /// prefix -> targetNamespace URI
    targets: HashMap<String, String>,
    /// "prefix:name" -> type reference of a declared top-level element
    elements: HashMap<String, String>,
    /// "prefix:name" -> type declaration
    types: HashMap<String, TypeDecl>,
}

impl StructuralValidator {
    fn load_document(&mut self, prefix: &str, root: &Element) -> Result<(), EngineError> {
        let target = root
            .attr("targetNamespace")
            .ok_or_else(|| EngineError::SchemaCompile("schema without targetNamespace".into()))?;
        self.targets.insert(prefix.to_string(), target.to_string());

        for child in &root.children {
            match child.name.local.as_str() {
                "import" => {}
                "element" => {
                    let name = require_attr(child, "name")?;
                    let type_ref = require_attr(child, "type")?;
                    self.elements
                        .insert(format!("{prefix}:{name}"), type_ref.to_string());
                }
                "complexType" => {
                    let name = require_attr(child, "name")?;
                    let decl = parse_complex_type(child)?;
                    self.types.insert(format!("{prefix}:{name}"), decl);
                }
                "simpleType" => {
                    let name = require_attr(child, "name")?;
                    let decl = parse_simple_type(child)?;
                    self.types.insert(format!("{prefix}:{name}"), decl);
                }
                other => {
                    return Err(EngineError::SchemaCompile(format!(
                        "unsupported schema construct <{other}>"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Members including the inherited ones, base-first. The emitted schema
    /// cannot contain extension cycles, so plain recursion is safe.
    fn members_of(&self, type_ref: &str) -> Result<Vec<MemberDecl>, String> {
        match self.types.get(type_ref) {
            Some(TypeDecl::Complex { base, members }) => {
                let mut out = Vec::new();
                if let Some(base) = base {
                    if !base.starts_with("xs:") {
                        out = self.members_of(base)?;
                    }
                }
                out.extend(members.iter().cloned());
                Ok(out)
            }
            Some(TypeDecl::Enumeration(_)) | None => Ok(Vec::new()),
        }
    }

    fn check(&self, node: &Element, type_ref: &str) -> Result<(), String> {
        if let Some(primitive) = type_ref.strip_prefix("xs:") {
            return check_primitive(primitive, node);
        }
        match self.types.get(type_ref) {
            None => Err(format!("unresolved type reference '{type_ref}'")),
            Some(TypeDecl::Enumeration(values)) => {
                let text = node.text_content();
                if values.iter().any(|v| v == text) {
                    Ok(())
                } else {
                    Err(format!(
                        "Element '{}': value '{}' is not an element of the enumeration",
                        node.name.local, text
                    ))
                }
            }
            Some(TypeDecl::Complex { .. }) => {
                let members = self.members_of(type_ref)?;
                // the content model is a sequence of the declared members;
                // anything else is not expected
                for child in &node.children {
                    if !members.iter().any(|m| m.name == child.name.local) {
                        return Err(format!(
                            "Element '{}': This element is not expected.",
                            child.name.local
                        ));
                    }
                }
                for member in members {
                    match node.child_local(&member.name) {
                        None => {
                            if member.min_occurs >= 1 {
                                return Err(format!(
                                    "Element '{}': Missing child element '{}'.",
                                    node.name.local, member.name
                                ));
                            }
                        }
                        Some(child) => {
                            let nil_attr = clark(NS_XSI, "nil");
                            let is_nil =
                                matches!(child.attr(&nil_attr), Some("true") | Some("1"));
                            if is_nil {
                                if !member.nillable {
                                    return Err(format!(
                                        "Element '{}' may not be nil.",
                                        member.name
                                    ));
                                }
                                continue;
                            }
                            self.check(child, &member.type_ref)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

impl CompiledSchema for StructuralValidator {
    fn validate(&self, payload: &Element) -> Result<(), String> {
        let target = self
            .targets
            .get(&self.target_prefix)
            .map(String::as_str)
            .unwrap_or_default();

        if payload.name.namespace != target {
            return Err(format!(
                "Element '{}' is not in the target namespace '{}'",
                payload.name.local, target
            ));
        }
        let key = format!("{}:{}", self.target_prefix, payload.name.local);
        let type_ref = self.elements.get(&key).ok_or_else(|| {
            format!(
                "No matching global declaration available for element '{}'",
                payload.name.local
            )
        })?;
        self.check(payload, type_ref)
    }
}

fn require_attr<'a>(node: &'a Element, name: &str) -> Result<&'a str, EngineError> {
    node.attr(name).ok_or_else(|| {
        EngineError::SchemaCompile(format!(
            "<{}> is missing the {name:?} attribute",
            node.name.local
        ))
    })
}

fn parse_sequence(sequence: &Element) -> Result<Vec<MemberDecl>, EngineError> {
    let mut members = Vec::new();
    for child in &sequence.children {
        if child.name.local != "element" {
            return Err(EngineError::SchemaCompile(format!(
                "unsupported sequence member <{}>",
                child.name.local
            )));
        }
        members.push(MemberDecl {
            name: require_attr(child, "name")?.to_string(),
            type_ref: require_attr(child, "type")?.to_string(),
            min_occurs: child
                .attr("minOccurs")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            nillable: child.attr("nillable") == Some("true"),
        });
    }
    Ok(members)
}

fn parse_complex_type(node: &Element) -> Result<TypeDecl, EngineError> {
    if let Some(content) = node.child_local("complexContent") {
        let extension = content.child_local("extension").ok_or_else(|| {
            EngineError::SchemaCompile("unsupported complexContent structure".into())
        })?;
        let base = require_attr(extension, "base")?.to_string();
        let members = match extension.child_local("sequence") {
            Some(sequence) => parse_sequence(sequence)?,
            None => Vec::new(),
        };
        return Ok(TypeDecl::Complex {
            base: Some(base),
            members,
        });
    }
    if let Some(sequence) = node.child_local("sequence") {
        return Ok(TypeDecl::Complex {
            base: None,
            members: parse_sequence(sequence)?,
        });
    }
    if node.children.is_empty() {
        return Ok(TypeDecl::Complex {
            base: None,
            members: Vec::new(),
        });
    }
    Err(EngineError::SchemaCompile(
        "unsupported type definition structure".into(),
    ))
}

fn parse_simple_type(node: &Element) -> Result<TypeDecl, EngineError> {
    let restriction = node
        .child_local("restriction")
        .ok_or_else(|| EngineError::SchemaCompile("simpleType without restriction".into()))?;
    let values = restriction
        .children
        .iter()
        .filter(|c| c.name.local == "enumeration")
        .filter_map(|c| c.attr("value").map(str::to_string))
        .collect();
    Ok(TypeDecl::Enumeration(values))
}

fn check_primitive(xsd_name: &str, node: &Element) -> Result<(), String> {
    let text = node.text_content();
    let ok = match xsd_name {
        "int" | "long" => text.trim().parse::<i64>().is_ok(),
        "double" => text.trim().parse::<f64>().is_ok(),
        "boolean" => matches!(text.trim(), "true" | "false" | "1" | "0"),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "Element '{}': '{}' is not a valid value of the atomic type 'xs:{}'",
            node.name.local, text, xsd_name
        ))
    }
}

/// The shipped engine: writes the documents to a scratch directory, loads
/// them back, and builds a [`StructuralValidator`].
pub struct StructuralSchemaEngine;

impl SchemaEngine for StructuralSchemaEngine {
    fn compile(
        &self,
        docs: &IndexMap<String, Vec<u8>>,
        target_prefix: &str,
    ) -> Result<Box<dyn CompiledSchema>, EngineError> {
        let dir = tempfile::tempdir()?;
        for (prefix, bytes) in docs {
            let path = dir.path().join(format!("{prefix}.xsd"));
            std::fs::write(&path, bytes)?;
            debug!(path = %path.display(), "wrote schema document");
        }

        let mut validator = StructuralValidator {
            target_prefix: target_prefix.to_string(),
            targets: HashMap::new(),
            elements: HashMap::new(),
            types: HashMap::new(),
        };

        // load everything back from the scratch area; imports resolve to the
        // sibling files written above
        for prefix in docs.keys() {
            let path = dir.path().join(format!("{prefix}.xsd"));
            let text = std::fs::read_to_string(&path)?;
            let root = xml::parse(&text)
                .map_err(|err| EngineError::SchemaCompile(err.to_string()))?;
            validator.load_document(prefix, &root)?;
        }

        if !validator.targets.contains_key(target_prefix) {
            return Err(EngineError::SchemaCompile(format!(
                "no schema document for target prefix {target_prefix:?}"
            )));
        }

        debug!(documents = docs.len(), "schema compiled, scratch area removed");
        drop(dir);
        Ok(Box::new(validator))
    }
}

/// A schema-enforcing [`Application`]: the body payload is validated before
/// any decode attempt.
pub struct ValidatingApplication {
    app: Application,
    schema: Box<dyn CompiledSchema>,
}

impl ValidatingApplication {
    pub fn new(app: Application) -> Result<Self, EngineError> {
        Self::with_engine(app, &StructuralSchemaEngine)
    }

    pub fn with_engine(app: Application, engine: &dyn SchemaEngine) -> Result<Self, EngineError> {
        let target_prefix = app.tns_prefix();
        debug!(tns = app.tns(), prefix = %target_prefix, "compiling validation schema");
        let schema = engine.compile(app.schema_documents(), &target_prefix)?;
        Ok(Self { app, schema })
    }

    pub fn application(&self) -> &Application {
        &self.app
    }

    pub fn get_wsdl(&self, url: &str) -> Result<&[u8], EngineError> {
        self.app.get_wsdl(url)
    }

    pub fn schema_validator(&self) -> &dyn CompiledSchema {
        self.schema.as_ref()
    }

    /// Run one payload through the pipeline with validation enabled.
    pub fn handle_request(
        &self,
        payload: &[u8],
        charset: Option<&str>,
    ) -> Result<Vec<u8>, EngineError> {
        self.app
            .handle_request_with(payload, charset, Some(self.schema.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::RequestContext;
    use crate::config::EngineConfig;
    use crate::fault::FAULT_CLIENT_SCHEMA_VALIDATION;
    use crate::service::{DispatchError, MethodDescriptor, Service};
    use crate::types::{Member, TypeDef, Value};
    use std::sync::Arc;

    const TNS: &str = "urn:example:validated";

    struct StrictService {
        methods: Vec<MethodDescriptor>,
    }

    impl StrictService {
        fn new() -> Arc<dyn Service> {
            let color = TypeDef::enumeration(
                TNS,
                "Color",
                vec!["red".to_string(), "green".to_string(), "blue".to_string()],
            );
            Arc::new(Self {
                methods: vec![
                    MethodDescriptor::rpc(
                        TNS,
                        "echoString",
                        vec![Member::new("s", TypeDef::string())],
                        Some(TypeDef::string()),
                    ),
                    MethodDescriptor::rpc(
                        TNS,
                        "paint",
                        vec![Member::new("color", color)],
                        Some(TypeDef::boolean()),
                    ),
                ],
            })
        }
    }

    impl Service for StrictService {
        fn name(&self) -> &str {
            "Strict"
        }

        fn methods(&self) -> &[MethodDescriptor] {
            &self.methods
        }

        fn invoke(
            &self,
            method: &MethodDescriptor,
            params: Vec<Value>,
            _ctx: &mut RequestContext,
        ) -> Result<Value, DispatchError> {
            match method.name.as_str() {
                "paint" => Ok(Value::Bool(true)),
                _ => Ok(params.into_iter().next().unwrap_or(Value::Null)),
            }
        }
    }

    fn validating_app() -> ValidatingApplication {
        let config = EngineConfig {
            name: "Strict".to_string(),
            target_namespace: TNS.to_string(),
            ..Default::default()
        };
        let app = Application::new(vec![StrictService::new()], &config).unwrap();
        ValidatingApplication::new(app).unwrap()
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
    fn test_valid_request_passes() {
        let app = validating_app();
        let request = envelope(&format!(
            r#"<m:echoString xmlns:m="{TNS}"><m:s>hello</m:s></m:echoString>"#
        ));
        let response = app.handle_request(request.as_bytes(), None).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains("echoStringResponse"), "got: {text}");
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let app = validating_app();
        let request = envelope(&format!(r#"<m:echoString xmlns:m="{TNS}"/>"#));
        let response = app.handle_request(request.as_bytes(), None).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains(FAULT_CLIENT_SCHEMA_VALIDATION), "got: {text}");
        assert!(text.contains("Missing child element 's'"), "got: {text}");
    }

    #[test]
    fn test_enumeration_facet_enforced() {
        let app = validating_app();
        let request = envelope(&format!(
            r#"<m:paint xmlns:m="{TNS}"><m:color>magenta</m:color></m:paint>"#
        ));
        let response = app.handle_request(request.as_bytes(), None).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains(FAULT_CLIENT_SCHEMA_VALIDATION), "got: {text}");
        assert!(text.contains("enumeration"), "got: {text}");
    }

    #[test]
    fn test_nil_on_non_nillable_member_rejected() {
        let app = validating_app();
        let request = envelope(&format!(
            r#"<m:echoString xmlns:m="{TNS}" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><m:s xsi:nil="true"/></m:echoString>"#
        ));
        let response = app.handle_request(request.as_bytes(), None).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains(FAULT_CLIENT_SCHEMA_VALIDATION), "got: {text}");
    }

    #[test]
    fn test_undeclared_element_rejected() {
        let app = validating_app();
        let request = envelope(&format!(r#"<m:mystery xmlns:m="{TNS}"/>"#));
        let response = app.handle_request(request.as_bytes(), None).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.contains(FAULT_CLIENT_SCHEMA_VALIDATION), "got: {text}");
        assert!(text.contains("mystery"), "got: {text}");
    }

    #[test]
    fn test_validator_is_reusable_across_requests() {
        let app = validating_app();
        let good = envelope(&format!(
            r#"<m:echoString xmlns:m="{TNS}"><m:s>a</m:s></m:echoString>"#
        ));
        for _ in 0..3 {
            let response = app.handle_request(good.as_bytes(), None).unwrap();
            assert!(String::from_utf8(response).unwrap().contains("echoStringResponse"));
        }
    }
}
