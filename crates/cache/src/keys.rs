use common::{AggregateKind, Fingerprint};

/// A group of cache keys invalidated together, e.g. every product search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheFamily(String);

impl CacheFamily {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rendered cache key together with its family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    family: CacheFamily,
}

impl CacheKey {
    fn new(family: String, last: &str) -> Self {
        Self {
            key: format!("{family}:{last}"),
            family: CacheFamily(family),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn family(&self) -> &CacheFamily {
        &self.family
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Renders namespaced cache keys.
///
/// - entity keys: `<namespace>:entity:<kind>:<id>`
/// - query keys: `<namespace>:query:<kind>:<fingerprint>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entity(&self, kind: AggregateKind, id: &str) -> CacheKey {
        CacheKey::new(self.entity_family(kind).0, id)
    }

    pub fn query(&self, kind: AggregateKind, fingerprint: &Fingerprint) -> CacheKey {
        CacheKey::new(self.query_family(kind).0, fingerprint.as_str())
    }

    pub fn entity_family(&self, kind: AggregateKind) -> CacheFamily {
        CacheFamily(format!("{}:entity:{}", self.namespace, kind))
    }

    pub fn query_family(&self, kind: AggregateKind) -> CacheFamily {
        CacheFamily(format!("{}:query:{}", self.namespace, kind))
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("catalog")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::TagSet;

    #[test]
    fn entity_key_layout() {
        let keys = KeySpace::new("shop");
        let key = keys.entity(AggregateKind::Product, "P1");
        assert_eq!(key.as_str(), "shop:entity:product:P1");
        assert_eq!(key.family().as_str(), "shop:entity:product");
    }

    #[test]
    fn query_key_belongs_to_query_family() {
        let keys = KeySpace::new("shop");
        let fingerprint = TagSet::parse("color:red").unwrap().fingerprint();
        let key = keys.query(AggregateKind::Product, &fingerprint);
        assert_eq!(
            key.as_str(),
            format!("shop:query:product:{}", fingerprint.as_str())
        );
        assert_eq!(key.family(), &keys.query_family(AggregateKind::Product));
    }

    #[test]
    fn ids_containing_separators_keep_their_family() {
        let keys = KeySpace::default();
        let key = keys.entity(AggregateKind::Order, "A:B");
        assert_eq!(key.as_str(), "catalog:entity:order:A:B");
        assert_eq!(key.family().as_str(), "catalog:entity:order");
    }
}
