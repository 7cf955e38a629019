//! Schema assembly: per-namespace element/type buckets and cross-namespace
//! import tracking for one build pass.
//!
//! A [`SchemaEntries`] accumulator is created fresh for every schema or WSDL
//! build and discarded afterwards; the emitted XML trees are the only durable
//! artifact.

use crate::error::EngineError;
use crate::ns::{self, NamespaceRegistry, NS_XSD};
use crate::types::TypeDef;
use crate::xml::Element;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Element and type nodes registered for one namespace, in insertion order.
#[derive(Debug, Default)]
pub struct SchemaInfo {
    pub elements: IndexMap<String, Element>,
    pub types: IndexMap<String, Element>,
}

/// Accumulator for one schema build pass.
#[derive(Debug)]
pub struct SchemaEntries {
    tns: String,
    /// prefix -> bucket
    namespaces: IndexMap<String, SchemaInfo>,
    /// prefix -> namespaces its types reference and must import
    imports: HashMap<String, BTreeSet<String>>,
}

impl SchemaEntries {
    pub fn new(tns: impl Into<String>) -> Self {
        Self {
            tns: tns.into(),
            namespaces: IndexMap::new(),
            imports: HashMap::new(),
        }
    }

    pub fn tns(&self) -> &str {
        &self.tns
    }

    /// True if the type is a well-known built-in or already registered under
    /// its namespace.
    pub fn has_type(&self, registry: &mut NamespaceRegistry, ty: &TypeDef) -> bool {
        if ty.is_builtin() {
            return true;
        }
        let prefix = registry.resolve_prefix(ty.namespace());
        self.namespaces
            .get(&prefix)
            .map(|info| info.types.contains_key(ty.type_name()))
            .unwrap_or(false)
    }

    fn bucket(&mut self, prefix: String) -> &mut SchemaInfo {
        self.namespaces.entry(prefix).or_default()
    }

    /// Register a top-level element declaration. Last write wins.
    pub fn add_element(&mut self, registry: &mut NamespaceRegistry, ty: &TypeDef, node: Element) {
        let prefix = registry.resolve_prefix(ty.namespace());
        self.bucket(prefix)
            .elements
            .insert(ty.type_name().to_string(), node);
    }

    /// Register a simpleType node and record its import edges.
    pub fn add_simple_type(
        &mut self,
        registry: &mut NamespaceRegistry,
        ty: &TypeDef,
        node: Element,
    ) -> Result<(), EngineError> {
        self.record_imports(registry, ty)?;
        let prefix = registry.resolve_prefix(ty.namespace());
        self.bucket(prefix)
            .types
            .insert(ty.type_name().to_string(), node);
        Ok(())
    }

    /// Register a complexType node and record its import edges.
    pub fn add_complex_type(
        &mut self,
        registry: &mut NamespaceRegistry,
        ty: &TypeDef,
        node: Element,
    ) -> Result<(), EngineError> {
        self.record_imports(registry, ty)?;
        let prefix = registry.resolve_prefix(ty.namespace());
        self.bucket(prefix)
            .types
            .insert(ty.type_name().to_string(), node);
        Ok(())
    }

    /// Derive import edges from the type's declared dependency list. A
    /// namespace never imports itself and well-known namespaces are never
    /// recorded.
    fn record_imports(
        &mut self,
        registry: &mut NamespaceRegistry,
        ty: &TypeDef,
    ) -> Result<(), EngineError> {
        let owner = ty.namespace().to_string();
        if owner.is_empty() {
            return Err(EngineError::UnregisteredNamespace(format!(
                "type {:?} has no namespace",
                ty.type_name()
            )));
        }
        let owner_prefix = registry.resolve_prefix(&owner);
        let edges = self.imports.entry(owner_prefix).or_default();

        for dep in ty.referenced_types() {
            let dep_ns = dep.namespace();
            if ns::is_well_known(dep_ns) || dep_ns == owner {
                continue;
            }
            registry.resolve_prefix(dep_ns);
            edges.insert(dep_ns.to_string());
        }
        Ok(())
    }

    pub fn imports_for(&self, prefix: &str) -> Option<&BTreeSet<String>> {
        self.imports.get(prefix)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&String, &SchemaInfo)> {
        self.namespaces.iter()
    }
}

/// Build one `<schema>` node per registered namespace.
///
/// `embedded` selects embedded-in-WSDL mode, where imports omit the
/// `schemaLocation` hint because all schemas share one document; standalone
/// mode points each import at the sibling `<prefix>.xsd` file.
pub fn build_schema_nodes(
    entries: &SchemaEntries,
    registry: &mut NamespaceRegistry,
    embedded: bool,
) -> Result<IndexMap<String, Element>, EngineError> {
    let mut nodes = IndexMap::new();

    for (prefix, info) in entries.namespaces() {
        let target = registry
            .namespace(prefix)
            .ok_or_else(|| EngineError::UnregisteredNamespace(prefix.clone()))?
            .to_string();

        debug!(prefix = %prefix, target_namespace = %target, "building schema node");

        let mut schema = Element::new(NS_XSD, "schema")
            .with_attr("targetNamespace", &target)
            .with_attr("elementFormDefault", "qualified");

        if let Some(imports) = entries.imports_for(prefix) {
            for namespace in imports {
                let mut import = Element::new(NS_XSD, "import").with_attr("namespace", namespace);
                if !embedded {
                    let location = format!("{}.xsd", registry.resolve_prefix(namespace));
                    import.set_attr("schemaLocation", location);
                }
                schema.push(import);
            }
        }

        for node in info.elements.values() {
            schema.push(node.clone());
        }
        for node in info.types.values() {
            schema.push(node.clone());
        }

        nodes.insert(prefix.clone(), schema);
    }

    Ok(nodes)
}
