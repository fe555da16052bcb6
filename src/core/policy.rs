//! Namespace precedence policy and the pure tool resolution function.
//!
//! Policies are evaluated in descending priority order; the first rule whose
//! pattern matches the requested name decides how the `app` and `ext`
//! candidates for that name are ranked. Nothing here performs I/O, which keeps
//! the precedence algorithm testable on plain vectors of registrations.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::tool::{Namespace, ToolRegistration};

/// Namespace a policy rule applies its action to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceSelector {
    #[serde(rename = "app")]
    App,
    #[serde(rename = "ext")]
    Ext,
    #[serde(rename = "*")]
    Any,
}

impl From<Namespace> for NamespaceSelector {
    fn from(namespace: Namespace) -> Self {
        match namespace {
            Namespace::App => NamespaceSelector::App,
            Namespace::Ext => NamespaceSelector::Ext,
        }
    }
}

impl fmt::Display for NamespaceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceSelector::App => f.write_str("app"),
            NamespaceSelector::Ext => f.write_str("ext"),
            NamespaceSelector::Any => f.write_str("*"),
        }
    }
}

/// Decision a matching rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    Deny,
    Fallback,
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyAction::Allow => f.write_str("allow"),
            PolicyAction::Deny => f.write_str("deny"),
            PolicyAction::Fallback => f.write_str("fallback"),
        }
    }
}

/// Ordered rule mapping a namespace / name pattern to a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub namespace: NamespaceSelector,
    #[serde(alias = "tool_pattern")]
    pub tool_pattern: String,
    pub action: PolicyAction,
    pub priority: i32,
    /// Free-form conditions carried for diagnostics; not evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Value>,
}

impl PolicyRule {
    pub fn new(
        namespace: NamespaceSelector,
        tool_pattern: impl Into<String>,
        action: PolicyAction,
        priority: i32,
    ) -> Self {
        Self {
            namespace,
            tool_pattern: tool_pattern.into(),
            action,
            priority,
            conditions: None,
        }
    }

    /// `*` matches everything; a pattern ending in `*` matches by prefix;
    /// anything else must be equal.
    pub fn matches(&self, requested: &str) -> bool {
        if self.tool_pattern == "*" {
            return true;
        }
        match self.tool_pattern.strip_suffix('*') {
            Some(prefix) => requested.starts_with(prefix),
            None => requested == self.tool_pattern,
        }
    }
}

/// The two rules every registry starts with.
pub fn default_policies() -> Vec<PolicyRule> {
    vec![
        PolicyRule::new(NamespaceSelector::App, "*", PolicyAction::Allow, 1000),
        PolicyRule::new(NamespaceSelector::Ext, "*", PolicyAction::Fallback, 500),
    ]
}

/// Stable sort by descending priority; equal priorities keep insertion order.
pub fn sort_policies(policies: &mut [PolicyRule]) {
    policies.sort_by(|a, b| b.priority.cmp(&a.priority));
}

/// First matching rule of an already sorted policy list.
pub fn select_rule<'a>(policies: &'a [PolicyRule], requested: &str) -> Option<&'a PolicyRule> {
    policies.iter().find(|rule| rule.matches(requested))
}

/// Outcome of resolving a requested tool name.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Primary registration, absent when denied or when the preferred
    /// namespace has no candidate.
    pub registration: Option<ToolRegistration>,
    pub action: PolicyAction,
    pub fallback_options: Vec<ToolRegistration>,
    /// The rule that decided the outcome.
    pub rule: Option<PolicyRule>,
}

impl Resolution {
    /// True when the name is known in no namespace at all.
    pub fn is_missing(&self) -> bool {
        self.registration.is_none() && self.fallback_options.is_empty()
    }

    /// True when a rule explicitly blocked the call.
    pub fn is_denied(&self) -> bool {
        self.action == PolicyAction::Deny
    }

    /// Every candidate the resolution saw, primary first.
    pub fn candidates(&self) -> impl Iterator<Item = &ToolRegistration> {
        self.registration.iter().chain(self.fallback_options.iter())
    }
}

/// Resolve `requested` against a set of registrations and a sorted policy list.
///
/// Candidates are the registrations whose bare name equals `requested`; `ext`
/// candidates are ordered by registration sequence.
pub fn resolve<'a, I>(requested: &str, registrations: I, policies: &[PolicyRule]) -> Resolution
where
    I: IntoIterator<Item = &'a ToolRegistration>,
{
    let mut app_candidate: Option<ToolRegistration> = None;
    let mut ext_candidates: Vec<ToolRegistration> = Vec::new();

    for registration in registrations {
        if registration.name != requested {
            continue;
        }
        match registration.namespace {
            Namespace::App => {
                if app_candidate.is_none() {
                    app_candidate = Some(registration.clone());
                } else {
                    tracing::warn!(
                        tool = %requested,
                        server = %registration.server_id,
                        "Multiple app candidates for one tool name; keeping the first"
                    );
                }
            }
            Namespace::Ext => ext_candidates.push(registration.clone()),
        }
    }
    ext_candidates.sort_by_key(|r| r.sequence);

    let Some(rule) = select_rule(policies, requested) else {
        return Resolution {
            registration: None,
            action: PolicyAction::Deny,
            fallback_options: app_candidate.into_iter().chain(ext_candidates).collect(),
            rule: None,
        };
    };

    let (registration, fallback_options) = match (rule.action, rule.namespace) {
        (PolicyAction::Allow, NamespaceSelector::App) => (app_candidate, ext_candidates),
        (PolicyAction::Allow, NamespaceSelector::Ext) => {
            let mut ext = ext_candidates.into_iter();
            let primary = ext.next();
            let fallback = ext.chain(app_candidate).collect();
            (primary, fallback)
        }
        (PolicyAction::Deny, _) => (
            None,
            app_candidate.into_iter().chain(ext_candidates).collect(),
        ),
        (PolicyAction::Fallback, _) | (PolicyAction::Allow, NamespaceSelector::Any) => {
            match app_candidate {
                Some(app) => (Some(app), ext_candidates),
                None => {
                    let mut ext = ext_candidates.into_iter();
                    let primary = ext.next();
                    (primary, ext.collect())
                }
            }
        }
    };

    Resolution {
        registration,
        action: rule.action,
        fallback_options,
        rule: Some(rule.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tool::Tool;

    fn reg(namespace: Namespace, name: &str, server: &str, sequence: u64) -> ToolRegistration {
        ToolRegistration {
            name: name.to_string(),
            namespace,
            tool: Tool::new(name, ""),
            server_id: server.to_string(),
            priority: namespace.default_priority(),
            sequence,
        }
    }

    fn sorted(mut rules: Vec<PolicyRule>) -> Vec<PolicyRule> {
        sort_policies(&mut rules);
        rules
    }

    #[test]
    fn test_pattern_matching() {
        let star = PolicyRule::new(NamespaceSelector::Any, "*", PolicyAction::Allow, 1);
        assert!(star.matches("anything"));

        let prefix = PolicyRule::new(NamespaceSelector::Ext, "dangerous.*", PolicyAction::Deny, 1);
        assert!(prefix.matches("dangerous.tool"));
        assert!(prefix.matches("dangerous."));
        assert!(!prefix.matches("dangerous"));
        assert!(!prefix.matches("safe.tool"));

        let exact = PolicyRule::new(NamespaceSelector::App, "echo", PolicyAction::Allow, 1);
        assert!(exact.matches("echo"));
        assert!(!exact.matches("echo2"));
    }

    #[test]
    fn test_app_preferred_under_default_policies() {
        let regs = vec![
            reg(Namespace::Ext, "echo", "ext-server", 1),
            reg(Namespace::App, "echo", "app-server", 2),
        ];
        let resolution = resolve("echo", &regs, &sorted(default_policies()));

        assert_eq!(resolution.action, PolicyAction::Allow);
        assert_eq!(resolution.registration.unwrap().server_id, "app-server");
        assert_eq!(resolution.fallback_options.len(), 1);
        assert_eq!(resolution.fallback_options[0].server_id, "ext-server");
    }

    #[test]
    fn test_ext_only_is_offered_as_fallback() {
        let regs = vec![reg(Namespace::Ext, "echo", "ext-server", 1)];
        let resolution = resolve("echo", &regs, &sorted(default_policies()));

        assert!(resolution.registration.is_none());
        assert!(!resolution.is_missing());
        assert_eq!(resolution.fallback_options[0].server_id, "ext-server");
    }

    #[test]
    fn test_unknown_name_is_missing() {
        let regs = vec![reg(Namespace::App, "echo", "app-server", 1)];
        let resolution = resolve("nope", &regs, &sorted(default_policies()));
        assert!(resolution.is_missing());
    }

    #[test]
    fn test_deny_reports_candidates_without_primary() {
        let mut rules = default_policies();
        rules.push(PolicyRule::new(
            NamespaceSelector::Ext,
            "dangerous.*",
            PolicyAction::Deny,
            2000,
        ));
        let rules = sorted(rules);
        let regs = vec![reg(Namespace::Ext, "dangerous.tool", "ext-server", 1)];

        let resolution = resolve("dangerous.tool", &regs, &rules);
        assert!(resolution.is_denied());
        assert!(resolution.registration.is_none());
        assert_eq!(resolution.fallback_options.len(), 1);
    }

    #[test]
    fn test_allow_ext_prefers_first_ext_candidate() {
        let rules = sorted(vec![PolicyRule::new(
            NamespaceSelector::Ext,
            "*",
            PolicyAction::Allow,
            10,
        )]);
        let regs = vec![
            reg(Namespace::Ext, "echo", "ext-b", 2),
            reg(Namespace::App, "echo", "app", 3),
            reg(Namespace::Ext, "echo", "ext-a", 1),
        ];
        let resolution = resolve("echo", &regs, &rules);

        assert_eq!(resolution.registration.unwrap().server_id, "ext-a");
        let fallback: Vec<_> = resolution
            .fallback_options
            .iter()
            .map(|r| r.server_id.as_str())
            .collect();
        assert_eq!(fallback, vec!["ext-b", "app"]);
    }

    #[test]
    fn test_fallback_action_without_app_candidate() {
        let rules = sorted(vec![PolicyRule::new(
            NamespaceSelector::Ext,
            "*",
            PolicyAction::Fallback,
            10,
        )]);
        let regs = vec![
            reg(Namespace::Ext, "echo", "ext-a", 1),
            reg(Namespace::Ext, "echo", "ext-b", 2),
        ];
        let resolution = resolve("echo", &regs, &rules);
        assert_eq!(resolution.registration.unwrap().server_id, "ext-a");
        assert_eq!(resolution.fallback_options[0].server_id, "ext-b");
    }

    #[test]
    fn test_no_matching_rule_denies() {
        let rules = sorted(vec![PolicyRule::new(
            NamespaceSelector::App,
            "only-this",
            PolicyAction::Allow,
            10,
        )]);
        let regs = vec![reg(Namespace::App, "echo", "app", 1)];
        let resolution = resolve("echo", &regs, &rules);
        assert!(resolution.is_denied());
        assert!(resolution.registration.is_none());
        assert!(resolution.rule.is_none());
    }

    #[test]
    fn test_equal_priorities_keep_insertion_order() {
        let rules = sorted(vec![
            PolicyRule::new(NamespaceSelector::Ext, "echo", PolicyAction::Deny, 100),
            PolicyRule::new(NamespaceSelector::App, "echo", PolicyAction::Allow, 100),
        ]);
        let selected = select_rule(&rules, "echo").unwrap();
        assert_eq!(selected.action, PolicyAction::Deny);
    }

    #[test]
    fn test_rule_deserializes_wildcard_namespace() {
        let rule: PolicyRule = serde_json::from_value(serde_json::json!({
            "namespace": "*",
            "toolPattern": "beta.*",
            "action": "fallback",
            "priority": 700
        }))
        .unwrap();
        assert_eq!(rule.namespace, NamespaceSelector::Any);
        assert_eq!(rule.action, PolicyAction::Fallback);
    }
}
