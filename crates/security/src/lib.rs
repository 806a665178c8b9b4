//! Security for SwarmClaw: authorization, audit logging, and the
//! authorized tool gateway.
//!
//! Provides:
//! - **Authorization**: ordered allow/deny rules matched on agent, role,
//!   action and resource
//! - **Audit logging**: structured record of permission decisions and tool runs
//! - **Authorized invocation**: the `ToolGateway` every strategy calls tools through

pub mod audit;
pub mod authorization;
pub mod invoker;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use authorization::RuleAuthorizer;
pub use invoker::AuthorizedInvoker;
