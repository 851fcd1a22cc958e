//! Gating configuration
//!
//! Rule tables keep the order they were declared in so "first wildcard match
//! wins" does not depend on hash iteration.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::constants::pattern;

/// Ordered `(pattern, allowed)` pairs, serialized as a JSON object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    entries: Vec<(String, bool)>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. A repeated key replaces the earlier value in place.
    pub fn insert(&mut self, pattern: impl Into<String>, allowed: bool) {
        let pattern = pattern.into();
        match self.entries.iter_mut().find(|(p, _)| *p == pattern) {
            Some(entry) => entry.1 = allowed,
            None => self.entries.push((pattern, allowed)),
        }
    }

    pub fn get(&self, pattern: &str) -> Option<bool> {
        self.entries.iter().find(|(p, _)| p == pattern).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(p, v)| (p.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for RuleTable {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        let mut table = RuleTable::new();
        for (pattern, allowed) in iter {
            table.insert(pattern, allowed);
        }
        table
    }
}

impl Serialize for RuleTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (pattern, allowed) in &self.entries {
            map.serialize_entry(pattern, allowed)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RuleTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RuleTableVisitor;

        impl<'de> Visitor<'de> for RuleTableVisitor {
            type Value = RuleTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping patterns to booleans")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RuleTable, A::Error> {
                let mut table = RuleTable::new();
                while let Some((pattern, allowed)) = access.next_entry::<String, bool>()? {
                    table.insert(pattern, allowed);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(RuleTableVisitor)
    }
}

/// Branch gating for the hosted repository browser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PmsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub branches: RuleTable,
}

/// Caller-owned gating configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatingConfig {
    pub enabled: bool,
    #[serde(default)]
    pub domains: RuleTable,
    #[serde(default)]
    pub ip_ranges: Vec<String>,
    #[serde(default = "default_url_patterns")]
    pub url_patterns: Vec<String>,
    #[serde(default)]
    pub pms: PmsConfig,
}

fn default_url_patterns() -> Vec<String> {
    vec![pattern::MATCH_ALL.to_string()]
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            domains: RuleTable::new(),
            ip_ranges: Vec::new(),
            url_patterns: default_url_patterns(),
            pms: PmsConfig::default(),
        }
    }
}

impl GatingConfig {
    /// Collect every problem with the config instead of stopping at the first
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut check_pattern = |kind: &str, p: &str| {
            if p.is_empty() {
                errors.push(format!("{kind} entry must not be empty"));
            } else if p.chars().count() > pattern::MAX_LEN {
                errors.push(format!("{kind} entry '{p:.32}...' exceeds {} characters", pattern::MAX_LEN));
            }
        };

        for (domain, _) in self.domains.iter() {
            check_pattern("domains", domain);
        }
        for range in &self.ip_ranges {
            check_pattern("ipRanges", range);
        }
        for url in &self.url_patterns {
            check_pattern("urlPatterns", url);
        }
        for (branch, _) in self.pms.branches.iter() {
            check_pattern("pms.branches", branch);
        }

        if self.pms.enabled && self.pms.domain.trim().is_empty() {
            errors.push("pms.domain is required when pms.enabled is true".to_string());
        }

        errors
    }
}
