//! Transaction and resource identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a distributed transaction.
///
/// Minted by the coordinator when a transaction starts. An empty id is
/// representable so callers can be rejected with a typed error rather
/// than at deserialization time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(String);

impl TxnId {
    /// Creates a transaction id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh, collision-resistant transaction id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns true if the id is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxnId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TxnId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of one sub-transaction, assigned by the coordinator when
/// its fingerprints are locked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubTxnId(String);

impl SubTxnId {
    /// Creates a sub-transaction id from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh sub-transaction id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubTxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubTxnId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque name of one lockable resource, usually a document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Creates a fingerprint.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Ordered, append-only list of fingerprints defining a lock scope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprints(Vec<Fingerprint>);

impl Fingerprints {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a fingerprint.
    pub fn push(&mut self, fingerprint: Fingerprint) {
        self.0.push(fingerprint);
    }

    /// Returns the number of fingerprints.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no resource was discovered.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the fingerprints in discovery order.
    pub fn iter(&self) -> std::slice::Iter<'_, Fingerprint> {
        self.0.iter()
    }

    /// Returns the fingerprints as a slice.
    pub fn as_slice(&self) -> &[Fingerprint] {
        &self.0
    }
}

impl FromIterator<Fingerprint> for Fingerprints {
    fn from_iter<I: IntoIterator<Item = Fingerprint>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Fingerprint> for Fingerprints {
    fn extend<I: IntoIterator<Item = Fingerprint>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Fingerprints {
    type Item = &'a Fingerprint;
    type IntoIter = std::slice::Iter<'a, Fingerprint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_txn_ids_are_unique() {
        let a = TxnId::generate();
        let b = TxnId::generate();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn default_txn_id_is_empty() {
        assert!(TxnId::default().is_empty());
        assert!(TxnId::from("").is_empty());
    }

    #[test]
    fn fingerprints_keep_discovery_order() {
        let mut fps = Fingerprints::new();
        fps.push("b".into());
        fps.extend(["a".into(), "c".into()]);
        let names: Vec<_> = fps.iter().map(Fingerprint::as_str).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&TxnId::new("txn-1")).unwrap();
        assert_eq!(json, "\"txn-1\"");
        let fps: Fingerprints = serde_json::from_str("[\"x\",\"y\"]").unwrap();
        assert_eq!(fps.len(), 2);
    }
}
