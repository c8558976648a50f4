//! Rule matching — maps a raw identifier to the first configured rule.

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;

/// How a rule's pattern is compared against an identifier.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Unanchored regex search.
    Regex(Regex),
    /// Plain substring containment.
    Substring(String),
}

impl Pattern {
    pub fn is_match(&self, identifier: &str) -> bool {
        match self {
            Pattern::Regex(re) => re.is_match(identifier),
            Pattern::Substring(s) => identifier.contains(s.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Regex(re) => re.as_str(),
            Pattern::Substring(s) => s,
        }
    }
}

/// A validated pattern → resource mapping.
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Pattern,
    pub resource_id: String,
    /// Default escalation target.
    pub endpoint: Option<String>,
    /// Status-code-specific escalation targets.
    pub status_endpoints: BTreeMap<u16, String>,
    /// Overrides the global escalation debounce window.
    pub escalation_debounce: Option<Duration>,
    /// Overrides the global idle threshold for this resource.
    pub idle_threshold: Option<Duration>,
    /// Overrides the global Wake-on-LAN target.
    pub wake_mac: Option<crate::types::MacAddress>,
}

impl Rule {
    /// A bare rule with only a pattern and a resource.
    pub fn new(pattern: Pattern, resource_id: impl Into<String>) -> Self {
        Self {
            pattern,
            resource_id: resource_id.into(),
            endpoint: None,
            status_endpoints: BTreeMap::new(),
            escalation_debounce: None,
            idle_threshold: None,
            wake_mac: None,
        }
    }

    /// Escalation target for an observed status: the status-specific
    /// endpoint when one exists, otherwise the default endpoint.
    pub fn endpoint_for(&self, status: Option<u16>) -> Option<&str> {
        status
            .and_then(|code| self.status_endpoints.get(&code))
            .or(self.endpoint.as_ref())
            .map(String::as_str)
    }
}

/// Ordered, first-match-wins rule list.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    rules: Vec<Rule>,
}

impl PatternMatcher {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// First rule whose pattern matches `identifier`, if any.
    pub fn match_rule(&self, identifier: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.pattern.is_match(identifier))
    }

    /// First rule naming `resource_id`.
    pub fn rule_for_resource(&self, resource_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.resource_id == resource_id)
    }

    /// Distinct resource ids in first-appearance order.
    pub fn resources(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for rule in &self.rules {
            if !seen.contains(&rule.resource_id) {
                seen.push(rule.resource_id.clone());
            }
        }
        seen
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
