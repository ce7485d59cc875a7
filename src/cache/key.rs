use std::fmt;

/// A single primitive component of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Str(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Str(value) => write!(f, "{value:?}"),
            KeyPart::Int(value) => write!(f, "{value}"),
            KeyPart::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// Ordered tuple identifying one cached async result, e.g. `["search", "AAPL"]`.
///
/// Prefix matching drives the bulk operations on the cache: invalidating
/// `["batchQuotes"]` touches every batch entry regardless of its symbol set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
    pub fn new(root: impl Into<KeyPart>) -> Self {
        Self(vec![root.into()])
    }

    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl<P: Into<KeyPart>> FromIterator<P> for QueryKey {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_is_component_wise() {
        let key = QueryKey::new("search").with("AAPL");
        assert!(key.starts_with(&QueryKey::new("search")));
        assert!(key.starts_with(&key));
        assert!(key.starts_with(&QueryKey::default()));
        assert!(!key.starts_with(&QueryKey::new("sear")));
        assert!(!QueryKey::new("search").starts_with(&key));
    }

    #[test]
    fn displays_as_tuple() {
        let key = QueryKey::new("quote").with("MSFT").with(2i64).with(true);
        assert_eq!(key.to_string(), r#"["quote", "MSFT", 2, true]"#);
        let collected: QueryKey = ["batchQuotes", "AAPL,TSLA"].into_iter().collect();
        assert_eq!(collected.len(), 2);
    }
}
