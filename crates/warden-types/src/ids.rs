//! Strongly-typed identifier wrappers to prevent accidental misuse of strings.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Strongly-typed prompt identifier. Uses `Arc<str>` internally so cloning
/// is an atomic increment instead of a heap allocation; prompt ids are copied
/// into every transition record and audit event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromptId(Arc<str>);

impl PromptId {
    /// Create a new PromptId from any string-like value.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random prompt id (`prm-<uuid>`).
    pub fn generate() -> Self {
        Self::new(format!("prm-{}", uuid::Uuid::new_v4()))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PromptId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PromptId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PromptId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for PromptId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for PromptId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl std::borrow::Borrow<str> for PromptId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for PromptId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PromptId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PromptId::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = PromptId::generate();
        let b = PromptId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("prm-"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = PromptId::from("prm-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"prm-1\"");
        let back: PromptId = serde_json::from_str("\"prm-1\"").unwrap();
        assert_eq!(back, "prm-1");
    }
}
