//! Hierarchical query keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar parameter value inside a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&String> for ParamValue {
    fn from(s: &String) -> Self {
        Self::Str(s.clone())
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<u32> for ParamValue {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Normalized query parameters.
///
/// Ordering is fixed by the underlying `BTreeMap`, and empty values never
/// enter the map, so logically equal parameter sets compare and serialize
/// identically regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter unless its value is empty.
    ///
    /// Blank strings and `false` are treated as absent.
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        let value = value.into();
        let value = match value {
            ParamValue::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return self;
                }
                ParamValue::Str(trimmed.to_string())
            }
            ParamValue::Bool(false) => return self,
            other => other,
        };
        self.0.insert(name.to_string(), value);
        self
    }

    /// Add a parameter if present and non-empty.
    pub fn with_opt<V: Into<ParamValue>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(name, v),
            None => self,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Parameters in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// One level of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Segment(String),
    Params(Params),
}

/// A hierarchical cache key such as `["products", "list", {"page": 1}]`.
///
/// A key is an ancestor of every key it is a prefix of, which is what
/// prefix invalidation relies on. The `Display` form is the canonical JSON
/// encoding and is byte-identical for equal keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey {
    parts: Vec<KeyPart>,
}

impl QueryKey {
    /// Start a key at a domain root, e.g. `"products"`.
    pub fn root(domain: &str) -> Self {
        Self {
            parts: vec![KeyPart::Segment(domain.to_string())],
        }
    }

    /// Extend with a named level.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.parts.push(KeyPart::Segment(segment.into()));
        self
    }

    /// Extend with a parameter level. Empty parameter sets add nothing, so
    /// an unfiltered list key equals its parent `lists` key plus nothing.
    pub fn params(mut self, params: Params) -> Self {
        if !params.is_empty() {
            self.parts.push(KeyPart::Params(params));
        }
        self
    }

    /// The key levels.
    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Number of levels.
    pub fn depth(&self) -> usize {
        self.parts.len()
    }

    /// Whether `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
        other.parts.len() >= self.parts.len()
            && self.parts.iter().zip(&other.parts).all(|(a, b)| a == b)
    }

    /// The first level, e.g. `products`.
    pub fn domain(&self) -> Option<&str> {
        match self.parts.first() {
            Some(KeyPart::Segment(s)) => Some(s),
            _ => None,
        }
    }

    /// Canonical string form.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.parts).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_ignore_insertion_order() {
        let a = Params::new().with("page", 1u32).with("category", "shoes");
        let b = Params::new().with("category", "shoes").with("page", 1u32);
        assert_eq!(a, b);

        let ka = QueryKey::root("products").segment("list").params(a);
        let kb = QueryKey::root("products").segment("list").params(b);
        assert_eq!(ka.canonical(), kb.canonical());
    }

    #[test]
    fn test_params_drop_empty_values() {
        let params = Params::new()
            .with("search", "   ")
            .with("sale", false)
            .with_opt::<&str>("category", None)
            .with("page", 2u32);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("page"), Some(&ParamValue::Int(2)));
    }

    #[test]
    fn test_params_trim_strings() {
        let params = Params::new().with("q", "  boots ");
        assert_eq!(params.get("q"), Some(&ParamValue::Str("boots".into())));
    }

    #[test]
    fn test_canonical_encoding() {
        let key = QueryKey::root("products")
            .segment("list")
            .params(Params::new().with("page", 1u32).with("category", "tees"));
        assert_eq!(
            key.to_string(),
            r#"["products","list",{"category":"tees","page":1}]"#
        );
    }

    #[test]
    fn test_empty_params_add_no_level() {
        let key = QueryKey::root("products").segment("list").params(Params::new());
        assert_eq!(key.depth(), 2);
    }

    #[test]
    fn test_prefix_relation() {
        let root = QueryKey::root("products");
        let list = root.clone().segment("list");
        let filtered = list.clone().params(Params::new().with("page", 1u32));
        let other = QueryKey::root("cart");

        assert!(root.is_prefix_of(&filtered));
        assert!(list.is_prefix_of(&filtered));
        assert!(filtered.is_prefix_of(&filtered));
        assert!(!filtered.is_prefix_of(&list));
        assert!(!other.is_prefix_of(&list));
    }

    #[test]
    fn test_segment_prefix_is_not_string_prefix() {
        let short = QueryKey::root("products").segment("detail").segment("tee");
        let long = QueryKey::root("products").segment("detail").segment("tee-shirt");
        assert!(!short.is_prefix_of(&long));
    }

    #[test]
    fn test_key_serde_roundtrip_preserves_equality() {
        let key = QueryKey::root("search")
            .segment("results")
            .params(Params::new().with("q", "hat").with("page", 3u32));
        let json = serde_json::to_string(&key).unwrap();
        let back: QueryKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
