//! Deterministic domain id generation.
//!
//! A [`DomainId`] is `<plugin>:<entity>:<connection id>:<key>[:<key>...]`.
//! Every component is escaped (`%` → `%25`, `:` → `%3A`) before joining, so
//! the separator never appears inside a component and distinct keys can never
//! produce the same id.

use std::fmt;

use serde::{Deserialize, Serialize};

const SEPARATOR: char = ':';

/// Canonical cross-source entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<DomainId> for String {
    fn from(id: DomainId) -> Self {
        id.0
    }
}

/// Builds ids for one tool-layer entity type.
///
/// The compiler and the converters must both use the generator returned by
/// the same constructor call so they agree on ids.
#[derive(Debug, Clone)]
pub struct DomainIdGenerator {
    prefix: String,
}

impl DomainIdGenerator {
    /// Generator for entities of `entity` collected by `plugin`.
    pub fn new(plugin: &str, entity: &str) -> Self {
        let mut prefix = escape(plugin);
        prefix.push(SEPARATOR);
        prefix.push_str(&escape(entity));
        Self { prefix }
    }

    /// Id for the natural key `key` under `connection_id`.
    pub fn generate(&self, connection_id: u64, key: &[&dyn fmt::Display]) -> DomainId {
        let mut id = format!("{}{SEPARATOR}{connection_id}", self.prefix);
        for part in key {
            id.push(SEPARATOR);
            id.push_str(&escape(&part.to_string()));
        }
        DomainId(id)
    }
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            SEPARATOR => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn same_inputs_same_id() {
        let generator = DomainIdGenerator::new("bitbucket", "BitbucketRepo");
        let a = generator.generate(1, &[&"apache/lake"]);
        let b = DomainIdGenerator::new("bitbucket", "BitbucketRepo").generate(1, &[&"apache/lake"]);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "bitbucket:BitbucketRepo:1:apache/lake");
    }

    #[test]
    fn connection_is_part_of_the_identity() {
        let generator = DomainIdGenerator::new("gitlab", "GitlabMergeRequest");
        assert_ne!(generator.generate(1, &[&7]), generator.generate(2, &[&7]));
    }

    #[test]
    fn separator_inside_keys_cannot_collide() {
        let generator = DomainIdGenerator::new("bitbucket", "BitbucketRepo");
        let joined = generator.generate(1, &[&"a:b"]);
        let split = generator.generate(1, &[&"a", &"b"]);
        assert_ne!(joined, split);

        let escaped_looking = generator.generate(1, &[&"a%3Ab"]);
        assert_ne!(joined, escaped_looking);
    }

    #[test]
    fn distinct_keys_never_collide() {
        let generator = DomainIdGenerator::new("sonarqube", "SonarqubeProject");
        let alphabet = ["", "a", ":", "%", "%3A", "3A", "a:", ":a", "%25", "::"];
        let mut seen = HashSet::new();
        let mut keys = HashSet::new();
        for x in alphabet {
            for y in alphabet {
                let single = format!("{x}{y}");
                if keys.insert(vec![single.clone()]) {
                    assert!(seen.insert(generator.generate(1, &[&single])));
                }
                if keys.insert(vec![x.to_string(), y.to_string()]) {
                    assert!(seen.insert(generator.generate(1, &[&x, &y])));
                }
            }
        }
    }
}
