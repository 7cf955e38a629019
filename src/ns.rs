//! Namespace registry: the prefix/namespace bijection shared by schema
//! assembly, WSDL construction, and envelope serialization.

use indexmap::IndexMap;
use std::collections::HashMap;

/// XML Schema namespace.
pub const NS_XSD: &str = "http://www.w3.org/2001/XMLSchema";
/// XML Schema instance namespace (`xsi:nil`, `xsi:type`).
pub const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
/// SOAP 1.1 envelope namespace.
pub const NS_SOAP_ENV: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.1 encoding namespace.
pub const NS_SOAP_ENC: &str = "http://schemas.xmlsoap.org/soap/encoding/";
/// WSDL 1.1 namespace.
pub const NS_WSDL: &str = "http://schemas.xmlsoap.org/wsdl/";
/// WSDL SOAP binding extension namespace.
pub const NS_WSDL_SOAP: &str = "http://schemas.xmlsoap.org/wsdl/soap/";
/// BPEL partner-link extension namespace.
pub const NS_PLINK: &str = "http://schemas.xmlsoap.org/ws/2003/05/partner-link/";

/// Prefixes seeded into every registry at construction.
const WELL_KNOWN: &[(&str, &str)] = &[
    ("xs", NS_XSD),
    ("xsi", NS_XSI),
    ("senv", NS_SOAP_ENV),
    ("senc", NS_SOAP_ENC),
    ("wsdl", NS_WSDL),
    ("soap", NS_WSDL_SOAP),
    ("plnk", NS_PLINK),
];

/// True for namespaces that are seeded into every registry. Well-known
/// namespaces never produce schema nodes and never appear in import sets.
pub fn is_well_known(namespace: &str) -> bool {
    WELL_KNOWN.iter().any(|(_, ns)| *ns == namespace)
}

/// Bidirectional prefix/namespace map with `s<counter>` prefix allocation.
///
/// Owned by one application instance; grows monotonically while the schema
/// and WSDL are assembled, never shrinks.
#[derive(Debug, Clone)]
pub struct NamespaceRegistry {
    /// prefix -> namespace, in registration order
    nsmap: IndexMap<String, String>,
    /// namespace -> prefix
    prefmap: HashMap<String, String>,
    counter: u64,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            nsmap: IndexMap::new(),
            prefmap: HashMap::new(),
            counter: 0,
        };
        for (prefix, namespace) in WELL_KNOWN {
            registry.nsmap.insert((*prefix).to_string(), (*namespace).to_string());
            registry.prefmap.insert((*namespace).to_string(), (*prefix).to_string());
        }
        registry
    }

    /// Prefix currently bound to `namespace`, if any.
    pub fn prefix(&self, namespace: &str) -> Option<&str> {
        self.prefmap.get(namespace).map(String::as_str)
    }

    /// Namespace currently bound to `prefix`, if any.
    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        self.nsmap.get(prefix).map(String::as_str)
    }

    /// Returns the prefix for `namespace`, allocating the next unused
    /// `s<counter>` value if the namespace is new. Idempotent.
    pub fn resolve_prefix(&mut self, namespace: &str) -> String {
        debug_assert!(!namespace.is_empty(), "cannot register an empty namespace");

        if let Some(prefix) = self.prefmap.get(namespace) {
            return prefix.clone();
        }

        let mut prefix = format!("s{}", self.counter);
        while self.nsmap.contains_key(&prefix) {
            self.counter += 1;
            prefix = format!("s{}", self.counter);
        }
        self.counter += 1;

        self.prefmap.insert(namespace.to_string(), prefix.clone());
        self.nsmap.insert(prefix.clone(), namespace.to_string());
        prefix
    }

    /// Binds `prefix` to `namespace`. If the prefix already belongs to a
    /// different namespace, that namespace is first migrated to a freshly
    /// allocated prefix so the bijection holds throughout.
    pub fn force_prefix(&mut self, namespace: &str, prefix: &str) {
        if let Some(old_ns) = self.nsmap.get(prefix).cloned() {
            if old_ns == namespace {
                return;
            }
            self.prefmap.remove(&old_ns);
            self.nsmap.shift_remove(prefix);
            self.resolve_prefix(&old_ns);
        }

        if let Some(current) = self.prefmap.get(namespace).cloned() {
            self.nsmap.shift_remove(&current);
        }

        self.prefmap.insert(namespace.to_string(), prefix.to_string());
        self.nsmap.insert(prefix.to_string(), namespace.to_string());
    }

    /// All `(prefix, namespace)` bindings in registration order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.nsmap.iter().map(|(p, n)| (p.as_str(), n.as_str()))
    }

    pub fn len(&self) -> usize {
        self.nsmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nsmap.is_empty()
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
