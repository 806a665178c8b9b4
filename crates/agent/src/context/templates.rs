//! Role instruction templates.
//!
//! Templates live at `<template_dir>/<role>.md` and may use the
//! placeholders `{{name}}`, `{{role}}` and `{{instructions}}`. When no
//! directory is configured the built-in template is used as-is. When a
//! directory is configured but the role's file cannot be read, the
//! built-in template is used and the result is flagged as degraded.

use std::path::{Path, PathBuf};
use swarmclaw_core::agent::BotParticipant;
use tracing::warn;

const BUILTIN_TEMPLATE: &str = "You are {{name}}, participating in a swarm as its {{role}}.\n{{instructions}}";

/// A rendered role block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBlock {
    pub text: String,
    /// The configured template could not be loaded.
    pub degraded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateLoader {
    dir: Option<PathBuf>,
}

impl TemplateLoader {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn render(&self, agent: &BotParticipant) -> RoleBlock {
        let (template, degraded) = match &self.dir {
            None => (BUILTIN_TEMPLATE.to_string(), false),
            Some(dir) => {
                let path = dir.join(format!("{}.md", agent.role.as_str().to_ascii_lowercase()));
                match std::fs::read_to_string(&path) {
                    Ok(text) => (text, false),
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "Role template unavailable, using built-in template"
                        );
                        (BUILTIN_TEMPLATE.to_string(), true)
                    }
                }
            }
        };

        let text = template
            .replace("{{name}}", &agent.name)
            .replace("{{role}}", agent.role.as_str())
            .replace("{{instructions}}", &agent.instructions);
        RoleBlock {
            text: text.trim_end().to_string(),
            degraded,
        }
    }
}
