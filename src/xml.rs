//! Owned XML element tree with namespace-aware parsing and serialization.
//!
//! quick-xml is event based; the envelope codec and the schema assembler both
//! need random access to small documents, so parsed input is materialized
//! into [`Element`] trees and built documents are serialized back through
//! quick-xml's writer.

use crate::error::EngineError;
use crate::ns::NamespaceRegistry;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// Clark-notation tag for a `(namespace, local)` pair: `{ns}local`, or the
/// bare local name for unqualified elements. Used as the call-route key.
pub fn clark(namespace: &str, local: &str) -> String {
    if namespace.is_empty() {
        local.to_string()
    } else {
        format!("{{{namespace}}}{local}")
    }
}

/// Qualified element name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }
}

/// One node of an owned XML tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: QName,
    /// Attribute pairs in document order. Parsed prefixed attribute names are
    /// stored in Clark notation; built trees use plain names.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: Option<String>,
}

impl Element {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            name: QName::new(namespace, local),
            attributes: Vec::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.attributes.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.attributes.push((name, value));
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Clark-notation tag of this element.
    pub fn tag(&self) -> String {
        clark(&self.name.namespace, &self.name.local)
    }

    /// First child matching namespace and local name.
    pub fn child(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| c.name.namespace == namespace && c.name.local == local)
    }

    /// First child matching the local name regardless of namespace.
    pub fn child_local(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name.local == local)
    }

    /// Text content, or the empty string when none was present.
    pub fn text_content(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// Line/column of a byte offset in `input`, 1-based.
fn position(input: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(input.len());
    let before = &input[..offset];
    let line = before.matches('\n').count() + 1;
    let column = offset - before.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
    (line, column)
}

fn syntax_error(input: &str, offset: usize, message: impl std::fmt::Display) -> EngineError {
    let (line, column) = position(input, offset);
    EngineError::XmlSyntax {
        line,
        column,
        message: message.to_string(),
    }
}

/// One lexical scope of xmlns bindings; the empty prefix is the default
/// namespace.
type Scope = Vec<(String, String)>;

fn resolve_ns<'a>(scopes: &'a [Scope], prefix: &str) -> Option<&'a str> {
    for scope in scopes.iter().rev() {
        if let Some((_, ns)) = scope.iter().rev().find(|(p, _)| p == prefix) {
            return Some(ns.as_str());
        }
    }
    // the default namespace is simply unbound when no xmlns is in scope
    if prefix.is_empty() {
        Some("")
    } else {
        None
    }
}

fn split_prefixed(raw: &str) -> (&str, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (prefix, local),
        None => ("", raw),
    }
}

fn open_element(
    e: &BytesStart<'_>,
    scopes: &mut Vec<Scope>,
    input: &str,
    offset: usize,
) -> Result<Element, EngineError> {
    let raw_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

    // First pass: the xmlns bindings this element introduces.
    let mut scope = Scope::new();
    let mut plain_attrs: Vec<(String, String)> = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| syntax_error(input, offset, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| syntax_error(input, offset, err))?
            .into_owned();
        if key == "xmlns" {
            scope.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.push((prefix.to_string(), value));
        } else {
            plain_attrs.push((key, value));
        }
    }
    scopes.push(scope);

    let (prefix, local) = split_prefixed(&raw_name);
    let namespace = resolve_ns(scopes, prefix)
        .ok_or_else(|| syntax_error(input, offset, format!("unbound namespace prefix {prefix:?}")))?
        .to_string();

    let mut element = Element::new(namespace, local);
    for (key, value) in plain_attrs {
        let (prefix, local) = split_prefixed(&key);
        if prefix.is_empty() {
            element.set_attr(local, value);
        } else {
            let ns = resolve_ns(scopes, prefix).ok_or_else(|| {
                syntax_error(input, offset, format!("unbound namespace prefix {prefix:?}"))
            })?;
            element.set_attr(clark(ns, local), value);
        }
    }
    Ok(element)
}

fn close_element(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

/// Parse a complete document into an element tree.
///
/// Syntax errors carry the 1-based line/column of the failure.
pub fn parse(input: &str) -> Result<Element, EngineError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut scopes: Vec<Scope> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let offset = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let element = open_element(&e, &mut scopes, input, offset)?;
                stack.push(element);
            }
            Ok(Event::Empty(e)) => {
                let element = open_element(&e, &mut scopes, input, offset)?;
                scopes.pop();
                close_element(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                scopes.pop();
                match stack.pop() {
                    Some(element) => close_element(&mut stack, &mut root, element),
                    None => return Err(syntax_error(input, offset, "unexpected closing tag")),
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| syntax_error(input, offset, err))?;
                if !text.is_empty() {
                    if let Some(top) = stack.last_mut() {
                        match &mut top.text {
                            Some(existing) => existing.push_str(&text),
                            None => top.text = Some(text.into_owned()),
                        }
                    }
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                if let Some(top) = stack.last_mut() {
                    match &mut top.text {
                        Some(existing) => existing.push_str(&text),
                        None => top.text = Some(text),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(syntax_error(input, offset, err)),
        }
    }

    root.ok_or_else(|| EngineError::XmlSyntax {
        line: 1,
        column: 1,
        message: "document contains no root element".to_string(),
    })
}

fn qualified(name: &QName, registry: &NamespaceRegistry) -> Result<String, EngineError> {
    if name.namespace.is_empty() {
        return Ok(name.local.clone());
    }
    match registry.prefix(&name.namespace) {
        Some(prefix) => Ok(format!("{}:{}", prefix, name.local)),
        None => Err(EngineError::UnregisteredNamespace(name.namespace.clone())),
    }
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &Element,
    registry: &NamespaceRegistry,
    is_root: bool,
) -> Result<(), EngineError> {
    let tag = qualified(&element.name, registry)?;
    let mut start = BytesStart::new(tag.as_str());
    if is_root {
        // The whole namespace map is declared on the root, so prefixed
        // attribute values (type="tns:Foo") always resolve.
        for (prefix, namespace) in registry.bindings() {
            start.push_attribute((format!("xmlns:{prefix}").as_str(), namespace));
        }
    }
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() && element.text.is_none() {
        writer
            .write_event(Event::Empty(start))
            .map_err(EngineError::xml_write)?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(EngineError::xml_write)?;
    if let Some(text) = &element.text {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(EngineError::xml_write)?;
    }
    for child in &element.children {
        write_element(writer, child, registry, false)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(tag.as_str())))
        .map_err(EngineError::xml_write)?;
    Ok(())
}

fn emit(
    mut writer: Writer<Vec<u8>>,
    root: &Element,
    registry: &NamespaceRegistry,
) -> Result<Vec<u8>, EngineError> {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(EngineError::xml_write)?;
    write_element(&mut writer, root, registry, true)?;
    Ok(writer.into_inner())
}

/// Serialize `root` as UTF-8 bytes with an XML declaration.
pub fn to_bytes(root: &Element, registry: &NamespaceRegistry) -> Result<Vec<u8>, EngineError> {
    emit(Writer::new(Vec::new()), root, registry)
}

/// Serialize `root` with two-space indentation; used for the standalone XSD
/// documents written to disk.
pub fn to_bytes_pretty(
    root: &Element,
    registry: &NamespaceRegistry,
) -> Result<Vec<u8>, EngineError> {
    emit(Writer::new_with_indent(Vec::new(), b' ', 2), root, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ns::NS_SOAP_ENV;

    #[test]
    fn test_parse_resolves_scoped_namespaces() {
        let xml = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <m:GetPrice xmlns:m="http://example.org/stock">
      <m:Item>Apples</m:Item>
    </m:GetPrice>
  </soap:Body>
</soap:Envelope>"#;

        let root = parse(xml).unwrap();
        assert_eq!(root.name.namespace, NS_SOAP_ENV);
        assert_eq!(root.name.local, "Envelope");

        let body = root.child(NS_SOAP_ENV, "Body").unwrap();
        let call = &body.children[0];
        assert_eq!(call.tag(), "{http://example.org/stock}GetPrice");
        assert_eq!(call.children[0].text_content(), "Apples");
    }

    #[test]
    fn test_parse_default_namespace() {
        let xml = r#"<GetUser xmlns="http://example.org/users"><id>7</id></GetUser>"#;
        let root = parse(xml).unwrap();
        assert_eq!(root.name.namespace, "http://example.org/users");
        // the default namespace applies to unprefixed children too
        assert_eq!(root.children[0].name.namespace, "http://example.org/users");
    }

    #[test]
    fn test_parse_prefixed_attribute_uses_clark_notation() {
        let xml = r#"<a xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:nil="true"/>"#;
        let root = parse(xml).unwrap();
        assert_eq!(
            root.attr("{http://www.w3.org/2001/XMLSchema-instance}nil"),
            Some("true")
        );
    }

    #[test]
    fn test_parse_reports_position() {
        let xml = "<a>\n  <b>\n</a>";
        let err = parse(xml).unwrap_err();
        match err {
            EngineError::XmlSyntax { line, .. } => assert!(line >= 2, "line was {line}"),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_unbound_prefix_is_an_error() {
        let err = parse("<m:Op>x</m:Op>").unwrap_err();
        assert!(matches!(err, EngineError::XmlSyntax { .. }));
    }

    #[test]
    fn test_write_declares_registry_bindings_on_root() {
        let mut registry = NamespaceRegistry::new();
        registry.resolve_prefix("urn:example:svc");

        let mut root = Element::new(NS_SOAP_ENV, "Envelope");
        let mut body = Element::new(NS_SOAP_ENV, "Body");
        body.push(Element::new("urn:example:svc", "echo").with_text("hi"));
        root.push(body);

        let bytes = to_bytes(&root, &registry).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(text.contains("xmlns:senv=\"http://schemas.xmlsoap.org/soap/envelope/\""));
        assert!(text.contains("xmlns:s0=\"urn:example:svc\""));
        assert!(text.contains("<s0:echo>hi</s0:echo>"));
    }

    #[test]
    fn test_write_escapes_text() {
        let registry = NamespaceRegistry::new();
        let root = Element::new("", "v").with_text("a < b & c");
        let text = String::from_utf8(to_bytes(&root, &registry).unwrap()).unwrap();
        assert!(text.contains("a &lt; b &amp; c"));
    }

    #[test]
    fn test_roundtrip_through_parse() {
        let registry = NamespaceRegistry::new();
        let mut root = Element::new("", "outer").with_attr("kind", "demo");
        root.push(Element::new("", "inner").with_text("42"));

        let bytes = to_bytes(&root, &registry).unwrap();
        let parsed = parse(std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(parsed.attr("kind"), Some("demo"));
        assert_eq!(parsed.children[0].text_content(), "42");
    }
}
