//! Authorized tool invocation.
//!
//! The only path from an execution strategy to a tool: check permission,
//! run the tool, audit the outcome, and publish `tool.executed`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use swarmclaw_core::error::ToolError;
use swarmclaw_core::event::{DomainEvent, EventBus};
use swarmclaw_core::provider::ToolDefinition;
use swarmclaw_core::services::{ACTION_TOOL_INVOKE, AuthorizationService};
use swarmclaw_core::tool::{ToolGateway, ToolInvoker, ToolResult};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};

pub struct AuthorizedInvoker {
    tools: Arc<dyn ToolInvoker>,
    authorization: Arc<dyn AuthorizationService>,
    audit: Arc<AuditLogger>,
    events: Option<Arc<EventBus>>,
}

impl AuthorizedInvoker {
    pub fn new(
        tools: Arc<dyn ToolInvoker>,
        authorization: Arc<dyn AuthorizationService>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            tools,
            authorization,
            audit,
            events: None,
        }
    }

    /// Publish a `tool.executed` event for every call.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }
}

#[async_trait]
impl ToolGateway for AuthorizedInvoker {
    async fn call(
        &self,
        agent_id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let permission = self
            .authorization
            .check_permission(agent_id, ACTION_TOOL_INVOKE, name)
            .await;
        if !permission.is_allowed() {
            warn!(agent_id, tool = name, "Tool call denied");
            self.audit.log(
                AuditEvent::PermissionDenied {
                    action: ACTION_TOOL_INVOKE.into(),
                },
                agent_id,
                name,
                AuditOutcome::Denied,
                None,
            );
            return Err(ToolError::PermissionDenied {
                tool_name: name.to_string(),
                reason: format!("agent '{agent_id}' may not invoke this tool"),
            });
        }

        let started = Instant::now();
        let result = self.tools.invoke_tool(name, arguments).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, details, success) = match &result {
            Ok(r) if r.success => (AuditOutcome::Success, None, true),
            Ok(r) => (AuditOutcome::Failure, Some(r.output.clone()), false),
            Err(e) => (AuditOutcome::Failure, Some(e.to_string()), false),
        };
        debug!(agent_id, tool = name, duration_ms, success, "Tool executed");
        self.audit.log(
            AuditEvent::ToolExecution {
                tool_name: name.to_string(),
                duration_ms,
            },
            agent_id,
            name,
            outcome,
            details,
        );
        if let Some(events) = &self.events {
            events.emit(
                "tool_gateway",
                DomainEvent::ToolExecuted {
                    tool_name: name.to_string(),
                    agent_id: agent_id.to_string(),
                    success,
                    duration_ms,
                },
            );
        }

        result
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::RuleAuthorizer;
    use std::sync::Mutex;
    use swarmclaw_config::{AuthorizationConfig, AuthorizationRule, Effect};
    use swarmclaw_core::event::topics;
    use swarmclaw_core::tool::{Tool, ToolRegistry};
    use swarmclaw_core::FailureKind;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercases text"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            let text = arguments["text"].as_str().unwrap_or_default();
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: text.to_uppercase(),
                data: None,
            })
        }
    }

    fn gateway(rules: Vec<AuthorizationRule>) -> AuthorizedInvoker {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(UpperTool));
        let authz = RuleAuthorizer::new(&AuthorizationConfig {
            default_effect: Effect::Allow,
            rules,
        });
        AuthorizedInvoker::new(Arc::new(registry), Arc::new(authz), Arc::new(AuditLogger::new()))
    }

    #[tokio::test]
    async fn allowed_call_runs_and_is_audited() {
        let bus = Arc::new(EventBus::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(topics::TOOL_EXECUTED, move |e| {
            sink.lock().unwrap().push(e.payload["tool_name"].clone());
            Ok(())
        });

        let gw = gateway(vec![]).with_events(bus);
        let result = gw
            .call("ada", "upper", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.output, "HI");
        assert_eq!(gw.audit().entries_by_outcome(&AuditOutcome::Success).len(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!("upper")]);
        assert_eq!(gw.definitions().len(), 1);
    }

    #[tokio::test]
    async fn denied_call_never_runs_and_is_permanent() {
        let gw = gateway(vec![AuthorizationRule {
            effect: Effect::Deny,
            agent: Some("intern".into()),
            role: None,
            action: None,
            resource: Some("upper".into()),
        }]);

        let err = gw
            .call("intern", "upper", serde_json::json!({"text": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
        assert_eq!(err.failure_kind(), FailureKind::Permanent);

        let denied = gw.audit().entries_by_outcome(&AuditOutcome::Denied);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].actor, "intern");
        assert!(gw.audit().entries_by_outcome(&AuditOutcome::Success).is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_is_audited_as_failure() {
        let gw = gateway(vec![]);
        let err = gw.call("ada", "missing", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
        assert_eq!(gw.audit().entries_by_outcome(&AuditOutcome::Failure).len(), 1);
    }
}
