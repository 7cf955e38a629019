//! Native value model and the XML type descriptors that carry values across
//! the envelope boundary.
//!
//! A [`TypeDef`] is runtime data, not a generic: message shapes are declared
//! when services are registered, and the engine dispatches on descriptors
//! through one narrow contract (type name, owning namespace, `to_xml`,
//! `from_xml`, schema registration). Every descriptor also enumerates the
//! types it references, which is what drives schema import inference.

use crate::error::EngineError;
use crate::ns::{self, NamespaceRegistry, NS_XSD, NS_XSI};
use crate::schema::SchemaEntries;
use crate::xml::{clark, Element};
use chrono::{DateTime, FixedOffset};
use std::sync::Arc;

const NULL: Value = Value::Null;

/// A native value as seen by method implementations.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<FixedOffset>),
    Array(Vec<Value>),
    /// Ordered field list; field order follows the declared member order.
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Field lookup on object values.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// Built-in XML Schema primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    String,
    Int,
    Long,
    Double,
    Boolean,
    DateTime,
}

impl Primitive {
    fn xsd_name(self) -> &'static str {
        match self {
            Primitive::String => "string",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Double => "double",
            Primitive::Boolean => "boolean",
            Primitive::DateTime => "dateTime",
        }
    }

    fn parse(self, text: &str) -> Result<Value, String> {
        match self {
            Primitive::String => Ok(Value::String(text.to_string())),
            Primitive::Int | Primitive::Long => text
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| format!("invalid integer {text:?}: {e}")),
            Primitive::Double => text
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|e| format!("invalid double {text:?}: {e}")),
            Primitive::Boolean => match text.trim() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                other => Err(format!("invalid boolean {other:?}")),
            },
            Primitive::DateTime => DateTime::parse_from_rfc3339(text.trim())
                .map(Value::DateTime)
                .map_err(|e| format!("invalid dateTime {text:?}: {e}")),
        }
    }

    fn render(self, value: &Value) -> Result<String, String> {
        match (self, value) {
            (Primitive::String, Value::String(s)) => Ok(s.clone()),
            (Primitive::Int | Primitive::Long, Value::Int(i)) => Ok(i.to_string()),
            (Primitive::Double, Value::Double(d)) => Ok(d.to_string()),
            (Primitive::Double, Value::Int(i)) => Ok(i.to_string()),
            (Primitive::Boolean, Value::Bool(b)) => Ok(b.to_string()),
            (Primitive::DateTime, Value::DateTime(dt)) => Ok(dt.to_rfc3339()),
            (_, other) => Err(format!(
                "cannot render {:?} as xs:{}",
                other,
                self.xsd_name()
            )),
        }
    }
}

/// One declared member of a structured type.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub ty: Arc<TypeDef>,
    pub min_occurs: u32,
    pub nillable: bool,
}

impl Member {
    pub fn new(name: impl Into<String>, ty: Arc<TypeDef>) -> Self {
        Self {
            name: name.into(),
            ty,
            min_occurs: 1,
            nillable: false,
        }
    }

    pub fn optional(name: impl Into<String>, ty: Arc<TypeDef>) -> Self {
        Self {
            min_occurs: 0,
            ..Self::new(name, ty)
        }
    }

    pub fn nillable(mut self) -> Self {
        self.nillable = true;
        self
    }
}

/// Shape of a type descriptor.
#[derive(Debug)]
pub enum TypeKind {
    Primitive(Primitive),
    Struct {
        base: Option<Arc<TypeDef>>,
        members: Vec<Member>,
    },
    Array {
        item: Arc<TypeDef>,
    },
    /// String enumeration, emitted as a simpleType restriction.
    Enum {
        values: Vec<String>,
    },
}

/// Descriptor for one exposed XML type.
#[derive(Debug)]
pub struct TypeDef {
    name: String,
    namespace: String,
    kind: TypeKind,
}

impl TypeDef {
    pub fn string() -> Arc<Self> {
        Self::primitive(Primitive::String)
    }

    pub fn int() -> Arc<Self> {
        Self::primitive(Primitive::Int)
    }

    pub fn long() -> Arc<Self> {
        Self::primitive(Primitive::Long)
    }

    pub fn double() -> Arc<Self> {
        Self::primitive(Primitive::Double)
    }

    pub fn boolean() -> Arc<Self> {
        Self::primitive(Primitive::Boolean)
    }

    pub fn date_time() -> Arc<Self> {
        Self::primitive(Primitive::DateTime)
    }

    pub fn primitive(p: Primitive) -> Arc<Self> {
        Arc::new(Self {
            name: p.xsd_name().to_string(),
            namespace: NS_XSD.to_string(),
            kind: TypeKind::Primitive(p),
        })
    }

    pub fn structure(
        namespace: impl Into<String>,
        name: impl Into<String>,
        members: Vec<Member>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            namespace: namespace.into(),
            kind: TypeKind::Struct {
                base: None,
                members,
            },
        })
    }

    pub fn extension(
        namespace: impl Into<String>,
        name: impl Into<String>,
        base: Arc<TypeDef>,
        members: Vec<Member>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            namespace: namespace.into(),
            kind: TypeKind::Struct {
                base: Some(base),
                members,
            },
        })
    }

    pub fn array(namespace: impl Into<String>, item: Arc<TypeDef>) -> Arc<Self> {
        Arc::new(Self {
            name: format!("{}Array", item.name),
            namespace: namespace.into(),
            kind: TypeKind::Array { item },
        })
    }

    pub fn enumeration(
        namespace: impl Into<String>,
        name: impl Into<String>,
        values: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            namespace: namespace.into(),
            kind: TypeKind::Enum { values },
        })
    }

    pub fn type_name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Declared members, including the inherited ones, base-first.
    pub fn all_members(&self) -> Vec<&Member> {
        let mut out = Vec::new();
        if let TypeKind::Struct { base, members } = &self.kind {
            if let Some(base) = base {
                out.extend(base.all_members());
            }
            out.extend(members.iter());
        }
        out
    }

    /// Number of positional parameters when used as an input message.
    pub fn param_count(&self) -> usize {
        self.all_members().len()
    }

    /// Direct type references: the explicit dependency list that schema
    /// import inference walks instead of re-parsing emitted XSD nodes.
    pub fn referenced_types(&self) -> Vec<Arc<TypeDef>> {
        match &self.kind {
            TypeKind::Primitive(_) => Vec::new(),
            TypeKind::Struct { base, members } => {
                let mut refs: Vec<Arc<TypeDef>> = Vec::new();
                if let Some(base) = base {
                    refs.push(Arc::clone(base));
                }
                refs.extend(members.iter().map(|m| Arc::clone(&m.ty)));
                refs
            }
            TypeKind::Array { item } => vec![Arc::clone(item)],
            TypeKind::Enum { .. } => vec![TypeDef::string()],
        }
    }

    fn qualified_name(&self, registry: &mut NamespaceRegistry) -> String {
        let prefix = registry.resolve_prefix(&self.namespace);
        format!("{}:{}", prefix, self.name)
    }

    /// Register this type and everything it references with the assembler.
    pub fn add_to_schema(
        self: &Arc<Self>,
        entries: &mut SchemaEntries,
        registry: &mut NamespaceRegistry,
    ) -> Result<(), EngineError> {
        if entries.has_type(registry, self) {
            return Ok(());
        }
        for dep in self.referenced_types() {
            // self-referential members are satisfied by this registration
            if dep.namespace == self.namespace && dep.name == self.name {
                continue;
            }
            dep.add_to_schema(entries, registry)?;
        }
        match &self.kind {
            TypeKind::Primitive(_) => Ok(()),
            TypeKind::Struct { .. } | TypeKind::Array { .. } => {
                let node = self.complex_type_node(registry);
                entries.add_complex_type(registry, self, node)?;
                let element = self.element_node(registry);
                entries.add_element(registry, self, element);
                Ok(())
            }
            TypeKind::Enum { .. } => {
                let node = self.simple_type_node(registry);
                entries.add_simple_type(registry, self, node)
            }
        }
    }

    /// Top-level `<element name=... type=.../>` declaration.
    fn element_node(&self, registry: &mut NamespaceRegistry) -> Element {
        let type_ref = self.qualified_name(registry);
        Element::new(NS_XSD, "element")
            .with_attr("name", &self.name)
            .with_attr("type", type_ref)
    }

    fn member_element(member: &Member, registry: &mut NamespaceRegistry) -> Element {
        let type_ref = member.ty.qualified_name(registry);
        let mut element = Element::new(NS_XSD, "element")
            .with_attr("name", &member.name)
            .with_attr("type", type_ref)
            .with_attr("minOccurs", member.min_occurs.to_string());
        if member.nillable {
            element.set_attr("nillable", "true");
        }
        element
    }

    fn complex_type_node(&self, registry: &mut NamespaceRegistry) -> Element {
        let mut complex = Element::new(NS_XSD, "complexType").with_attr("name", &self.name);
        match &self.kind {
            TypeKind::Struct {
                base: Some(base),
                members,
            } => {
                let mut content = Element::new(NS_XSD, "complexContent");
                let mut extension = Element::new(NS_XSD, "extension")
                    .with_attr("base", base.qualified_name(registry));
                let mut sequence = Element::new(NS_XSD, "sequence");
                for member in members {
                    sequence.push(Self::member_element(member, registry));
                }
                extension.push(sequence);
                content.push(extension);
                complex.push(content);
            }
            TypeKind::Struct { base: None, members } => {
                let mut sequence = Element::new(NS_XSD, "sequence");
                for member in members {
                    sequence.push(Self::member_element(member, registry));
                }
                complex.push(sequence);
            }
            TypeKind::Array { item } => {
                let mut sequence = Element::new(NS_XSD, "sequence");
                let type_ref = item.qualified_name(registry);
                sequence.push(
                    Element::new(NS_XSD, "element")
                        .with_attr("name", item.type_name())
                        .with_attr("type", type_ref)
                        .with_attr("minOccurs", "0")
                        .with_attr("maxOccurs", "unbounded")
                        .with_attr("nillable", "true"),
                );
                complex.push(sequence);
            }
            TypeKind::Primitive(_) | TypeKind::Enum { .. } => {}
        }
        complex
    }

    fn simple_type_node(&self, _registry: &mut NamespaceRegistry) -> Element {
        let mut simple = Element::new(NS_XSD, "simpleType").with_attr("name", &self.name);
        let mut restriction = Element::new(NS_XSD, "restriction").with_attr("base", "xs:string");
        if let TypeKind::Enum { values } = &self.kind {
            for value in values {
                restriction.push(Element::new(NS_XSD, "enumeration").with_attr("value", value));
            }
        }
        simple.push(restriction);
        simple
    }

    /// Append the XML rendering of `value` to `parent`. The element is named
    /// `name` when given, the type name otherwise.
    pub fn to_xml(
        &self,
        value: &Value,
        parent: &mut Element,
        name: Option<&str>,
    ) -> Result<(), EngineError> {
        let element_name = name.unwrap_or(&self.name);
        let mut element = Element::new(self.namespace.clone(), element_name);
        self.fill_element(&mut element, value)?;
        parent.children.push(element);
        Ok(())
    }

    fn fill_element(&self, element: &mut Element, value: &Value) -> Result<(), EngineError> {
        if value.is_null() {
            element.set_attr("xsi:nil", "true");
            return Ok(());
        }
        match &self.kind {
            TypeKind::Primitive(p) => {
                let text = p
                    .render(value)
                    .map_err(|msg| EngineError::encode(&self.name, msg))?;
                element.text = Some(text);
            }
            TypeKind::Struct { .. } => {
                let Value::Object(_) = value else {
                    return Err(EngineError::encode(
                        &self.name,
                        format!("expected an object value, got {value:?}"),
                    ));
                };
                for member in self.all_members() {
                    let field = value.field(&member.name).unwrap_or(&NULL);
                    if field.is_null() && member.min_occurs == 0 {
                        continue;
                    }
                    // members are qualified by the owning type's namespace
                    let mut child = Element::new(self.namespace.clone(), member.name.clone());
                    member.ty.fill_element(&mut child, field)?;
                    element.children.push(child);
                }
            }
            TypeKind::Array { item } => {
                let Value::Array(items) = value else {
                    return Err(EngineError::encode(
                        &self.name,
                        format!("expected an array value, got {value:?}"),
                    ));
                };
                for entry in items {
                    let mut child =
                        Element::new(self.namespace.clone(), item.type_name().to_string());
                    item.fill_element(&mut child, entry)?;
                    element.children.push(child);
                }
            }
            TypeKind::Enum { values } => {
                let Value::String(s) = value else {
                    return Err(EngineError::encode(
                        &self.name,
                        format!("expected a string value, got {value:?}"),
                    ));
                };
                if !values.contains(s) {
                    return Err(EngineError::encode(
                        &self.name,
                        format!("{s:?} is not one of the enumerated values"),
                    ));
                }
                element.text = Some(s.clone());
            }
        }
        Ok(())
    }

    /// Decode one element into a native value.
    pub fn from_xml(&self, node: &Element) -> Result<Value, EngineError> {
        let nil_attr = clark(NS_XSI, "nil");
        if matches!(node.attr(&nil_attr), Some("true") | Some("1")) {
            return Ok(Value::Null);
        }
        match &self.kind {
            TypeKind::Primitive(p) => p
                .parse(node.text_content())
                .map_err(|msg| EngineError::decode(&self.name, msg)),
            TypeKind::Struct { .. } => {
                let mut fields = Vec::new();
                for member in self.all_members() {
                    let value = match node.child_local(&member.name) {
                        Some(child) => member.ty.from_xml(child)?,
                        None => Value::Null,
                    };
                    fields.push((member.name.clone(), value));
                }
                Ok(Value::Object(fields))
            }
            TypeKind::Array { item } => {
                let mut items = Vec::new();
                for child in &node.children {
                    items.push(item.from_xml(child)?);
                }
                Ok(Value::Array(items))
            }
            TypeKind::Enum { values } => {
                let text = node.text_content();
                if values.iter().any(|v| v == text) {
                    Ok(Value::String(text.to_string()))
                } else {
                    Err(EngineError::decode(
                        &self.name,
                        format!("{text:?} is not one of the enumerated values"),
                    ))
                }
            }
        }
    }

    /// Decode a message body into positional arguments, one per declared
    /// member. Tolerates bare-text bodies for single-parameter messages
    /// (`<echoString>OK</echoString>`).
    pub fn decode_params(&self, node: &Element) -> Result<Vec<Value>, EngineError> {
        let members = self.all_members();
        if node.children.is_empty() && !node.text_content().is_empty() {
            if let Some(first) = members.first() {
                if matches!(first.ty.kind(), TypeKind::Primitive(_)) {
                    let mut params = vec![first.ty.from_xml(node)?];
                    params.resize(members.len(), Value::Null);
                    return Ok(params);
                }
            }
        }
        match self.from_xml(node)? {
            Value::Object(fields) => Ok(fields.into_iter().map(|(_, v)| v).collect()),
            Value::Null => Ok(vec![Value::Null; members.len()]),
            other => Ok(vec![other]),
        }
    }

    /// True for types living in a well-known namespace; those never produce
    /// schema nodes of their own.
    pub fn is_builtin(&self) -> bool {
        ns::is_well_known(&self.namespace)
    }
}
