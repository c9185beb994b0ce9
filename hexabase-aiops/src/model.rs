//! The shape `Role::rules_json` is deserialized into for the re-authorization
//! check (spec §4.6 step 3). Mirrors the Kubernetes `PolicyRule` fields the
//! orchestrator (C6) writes into that same string when it materializes a
//! [`hexabase_hierarchy::model::Role`] into an actual RBAC `Role` object —
//! this crate only ever reads it back.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRule {
    #[serde(default, rename = "apiGroups")]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub verbs: Vec<String>,
}

const WILDCARD: &str = "*";

impl PolicyRule {
    fn grants(&self, resource: &str, verb: &str) -> bool {
        let resource_matches = self.resources.iter().any(|r| r == WILDCARD || r == resource);
        let verb_matches = self.verbs.iter().any(|v| v == WILDCARD || v == verb);
        resource_matches && verb_matches
    }
}

/// Parses a `Role::rules_json` blob and checks whether any rule grants
/// `verb` on `resource`. A malformed blob grants nothing rather than
/// panicking — the role was written by C5, not by this crate.
pub fn rules_grant(rules_json: &str, resource: &str, verb: &str) -> bool {
    let rules: Vec<PolicyRule> = match serde_json::from_str(rules_json) {
        Ok(rules) => rules,
        Err(_) => return false,
    };
    rules.iter().any(|rule| rule.grants(resource, verb))
}

/// The resource/verb pair a re-authorization check is evaluated against
/// (spec §4.6 step 3 "the exact target resource and verb"). Not Kubernetes'
/// own RBAC resource names — Hexabase's own virtual resource kinds, the same
/// ones `Role::rules_json` is authored against by workspace admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetResource {
    Application,
    Function,
}

impl TargetResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetResource::Application => "applications",
            TargetResource::Function => "functions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetVerb {
    Update,
    Get,
}

impl TargetVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetVerb::Update => "update",
            TargetVerb::Get => "get",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn wildcard_rule_grants_everything() {
        let rules = r#"[{"apiGroups":["*"],"resources":["*"],"verbs":["*"]}]"#;
        assert!(rules_grant(rules, "applications", "update"));
        assert!(rules_grant(rules, "functions", "get"));
    }

    #[test]
    fn scoped_rule_only_grants_its_own_resource_and_verb() {
        let rules = r#"[{"apiGroups":[""],"resources":["functions"],"verbs":["get"]}]"#;
        assert!(rules_grant(rules, "functions", "get"));
        assert!(!rules_grant(rules, "functions", "update"));
        assert!(!rules_grant(rules, "applications", "get"));
    }

    #[test]
    fn malformed_rules_grant_nothing() {
        assert!(!rules_grant("not json", "functions", "get"));
    }
}
