//! Rule-based authorization service.
//!
//! Rules come from `[[authorization.rules]]` and are evaluated in order;
//! the first rule whose fields all match decides. Unset fields and `*`
//! match anything, and a trailing `*` matches by prefix (`tool.*`).
//! When no rule matches, `default_effect` applies.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use swarmclaw_config::{AuthorizationConfig, AuthorizationRule, Effect};
use swarmclaw_core::agent::BotParticipant;
use swarmclaw_core::services::{AuthorizationService, Permission};
use tracing::debug;

pub struct RuleAuthorizer {
    rules: Vec<AuthorizationRule>,
    default_effect: Effect,
    /// agent id → role name, for rules that match on role.
    roles: RwLock<HashMap<String, String>>,
}

impl RuleAuthorizer {
    pub fn new(config: &AuthorizationConfig) -> Self {
        Self {
            rules: config.rules.clone(),
            default_effect: config.default_effect,
            roles: RwLock::new(HashMap::new()),
        }
    }

    /// Allow everything. Used when no rules are configured.
    pub fn allow_all() -> Self {
        Self::new(&AuthorizationConfig::default())
    }

    /// Make an agent's role known to role-based rules.
    pub fn register_agent(&self, agent: &BotParticipant) {
        self.roles
            .write()
            .unwrap()
            .insert(agent.id.to_string(), agent.role.as_str().to_string());
    }

    /// Evaluate synchronously. Returns the decision and the index of the
    /// rule that made it (`None` for the default).
    pub fn evaluate(&self, agent_id: &str, action: &str, resource_id: &str) -> (Permission, Option<usize>) {
        let role = self.roles.read().unwrap().get(agent_id).cloned();

        for (i, rule) in self.rules.iter().enumerate() {
            let role_matches = match (&rule.role, &role) {
                (None, _) => true,
                (Some(pattern), Some(role)) => matches(Some(pattern), role),
                (Some(pattern), None) => pattern == "*",
            };
            if role_matches
                && matches(rule.agent.as_deref(), agent_id)
                && matches(rule.action.as_deref(), action)
                && matches(rule.resource.as_deref(), resource_id)
            {
                return (to_permission(rule.effect), Some(i));
            }
        }
        (to_permission(self.default_effect), None)
    }
}

fn to_permission(effect: Effect) -> Permission {
    match effect {
        Effect::Allow => Permission::Allow,
        Effect::Deny => Permission::Deny,
    }
}

fn matches(pattern: Option<&str>, value: &str) -> bool {
    match pattern {
        None | Some("*") => true,
        Some(p) => match p.strip_suffix('*') {
            Some(prefix) => value.starts_with(prefix),
            None => p.eq_ignore_ascii_case(value),
        },
    }
}

#[async_trait]
impl AuthorizationService for RuleAuthorizer {
    async fn check_permission(&self, agent_id: &str, action: &str, resource_id: &str) -> Permission {
        let (permission, rule) = self.evaluate(agent_id, action, resource_id);
        debug!(agent_id, action, resource_id, ?permission, ?rule, "Permission checked");
        permission
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmclaw_core::agent::AgentRole;
    use swarmclaw_core::services::ACTION_TOOL_INVOKE;

    fn rule(effect: Effect) -> AuthorizationRule {
        AuthorizationRule {
            effect,
            agent: None,
            role: None,
            action: None,
            resource: None,
        }
    }

    #[tokio::test]
    async fn default_effect_applies_without_rules() {
        let authz = RuleAuthorizer::allow_all();
        assert_eq!(
            authz.check_permission("a", ACTION_TOOL_INVOKE, "lookup").await,
            Permission::Allow
        );

        let deny_all = RuleAuthorizer::new(&AuthorizationConfig {
            default_effect: Effect::Deny,
            rules: vec![],
        });
        assert_eq!(
            deny_all.check_permission("a", ACTION_TOOL_INVOKE, "lookup").await,
            Permission::Deny
        );
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let authz = RuleAuthorizer::new(&AuthorizationConfig {
            default_effect: Effect::Deny,
            rules: vec![
                AuthorizationRule {
                    agent: Some("intern".into()),
                    resource: Some("shell".into()),
                    ..rule(Effect::Deny)
                },
                AuthorizationRule {
                    action: Some("tool.*".into()),
                    ..rule(Effect::Allow)
                },
            ],
        });

        assert_eq!(authz.evaluate("intern", "tool.invoke", "shell"), (Permission::Deny, Some(0)));
        assert_eq!(authz.evaluate("intern", "tool.invoke", "lookup"), (Permission::Allow, Some(1)));
        assert_eq!(authz.evaluate("intern", "swarm.end", "s1"), (Permission::Deny, None));
    }

    #[tokio::test]
    async fn role_rules_use_registered_roles() {
        let authz = RuleAuthorizer::new(&AuthorizationConfig {
            default_effect: Effect::Allow,
            rules: vec![AuthorizationRule {
                role: Some("contributor".into()),
                resource: Some("deploy".into()),
                ..rule(Effect::Deny)
            }],
        });
        authz.register_agent(&BotParticipant::new("c1", "C", AgentRole::Contributor));
        authz.register_agent(&BotParticipant::new("l1", "L", AgentRole::Leader));

        assert_eq!(
            authz.check_permission("c1", ACTION_TOOL_INVOKE, "deploy").await,
            Permission::Deny
        );
        assert_eq!(
            authz.check_permission("l1", ACTION_TOOL_INVOKE, "deploy").await,
            Permission::Allow
        );
        // Unknown agents have no role, so role rules never match them.
        assert_eq!(
            authz.check_permission("ghost", ACTION_TOOL_INVOKE, "deploy").await,
            Permission::Allow
        );
    }
}
