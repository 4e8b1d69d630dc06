pub mod cluster;
pub mod context;
pub mod distribution_config;
pub mod update;

use serde_derive::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
/// KsailIdentifier: cluster identity, its DNS-safe name.
pub struct KsailIdentifier(String);

impl KsailIdentifier {
    pub fn new(name: String) -> Self {
        KsailIdentifier(normalize_cluster_name(&name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for KsailIdentifier {
    fn from(name: &str) -> Self {
        KsailIdentifier::new(name.to_string())
    }
}

impl Display for KsailIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a user-provided cluster name into a DNS-label-safe identifier,
/// the same constraints the distribution tooling puts on cluster names.
fn normalize_cluster_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            'a'..='z' | '0'..='9' | '-' => out.push(c),
            'A'..='Z' => out.push(c.to_ascii_lowercase()),
            _ => out.push('-'),
        }
    }

    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_cluster_name() {
        // setup:
        struct TestCase {
            input: &'static str,
            expected: &'static str,
        }

        let test_cases = vec![
            TestCase {
                input: "My Cluster",
                expected: "my-cluster",
            },
            TestCase {
                input: "demo",
                expected: "demo",
            },
            TestCase {
                input: "-edge-",
                expected: "edge",
            },
        ];

        for tc in test_cases {
            // execute:
            let id = KsailIdentifier::from(tc.input);

            // verify:
            assert_eq!(tc.expected, id.as_str());
        }
    }
}
