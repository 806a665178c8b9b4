//! Context assembly: everything a strategy sees for one invocation.
//!
//! | Part | Source | Limit |
//! |------|--------|-------|
//! | Role block | `<template_dir>/<role>.md` or built-in | Fallback marks the context degraded |
//! | Recruitment sequence | Leadership role + complex goal | Shown before domain content |
//! | Blackboard preview | Latest committed snapshot | Long strings truncated |
//! | Tool schemas | Registry ∩ agent allow-list ∩ subroutine tools | None |
//! | History | Per-swarm message store | Newest messages within the token budget |

pub mod builder;
pub mod catalog;
pub mod message_store;
pub mod templates;
pub mod token;

pub use builder::{ContextBuilder, ContextMetadata, StepContext, SwarmView, blackboard_preview};
pub use catalog::ToolCatalog;
pub use message_store::{HistoryWindow, MessageStore};
pub use templates::{RoleBlock, TemplateLoader};
