//! Naming-convention pre-filter for connecting identities.
//!
//! Runs synchronously on the connection-accept path and never performs I/O.

use crate::config::NamingRules;

/// Result of classifying a connecting identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Syntactically an agent identity; needs credential verification.
    Candidate,
    /// Not an agent identity; deny without touching the network.
    Rejected,
}

/// Case-sensitive prefix/suffix matcher.
#[derive(Debug, Clone)]
pub struct NameClassifier {
    prefixes: Vec<String>,
    suffixes: Vec<String>,
}

impl NameClassifier {
    pub fn new(rules: &NamingRules) -> Self {
        Self {
            prefixes: rules.prefixes.clone(),
            suffixes: rules.suffixes.clone(),
        }
    }

    pub fn classify(&self, identity: &str) -> Classification {
        let matched = self.prefixes.iter().any(|p| identity.starts_with(p.as_str()))
            || self.suffixes.iter().any(|s| identity.ends_with(s.as_str()));

        if matched {
            Classification::Candidate
        } else {
            Classification::Rejected
        }
    }
}
