//! Swarm goals and the complexity heuristics behind the recruitment rule.

use serde::{Deserialize, Serialize};

/// A goal assigned to a swarm, with the effort estimates supplied by
/// whoever spawned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalSpec {
    pub text: String,
    /// Knowledge domains the goal spans.
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_reasoning_steps: Option<u32>,
}

impl GoalSpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            domains: Vec::new(),
            estimated_duration_minutes: None,
            estimated_reasoning_steps: None,
        }
    }

    pub fn with_domains(mut self, domains: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_duration_minutes(mut self, minutes: u32) -> Self {
        self.estimated_duration_minutes = Some(minutes);
        self
    }

    pub fn with_reasoning_steps(mut self, steps: u32) -> Self {
        self.estimated_reasoning_steps = Some(steps);
        self
    }

    /// Evaluate the goal against the configured thresholds.
    pub fn assess(&self, thresholds: &ComplexityThresholds) -> ComplexityAssessment {
        let mut distinct: Vec<&str> = self.domains.iter().map(|d| d.trim()).collect();
        distinct.sort_unstable();
        distinct.dedup();
        distinct.retain(|d| !d.is_empty());

        ComplexityAssessment {
            multi_domain: distinct.len() >= thresholds.min_domains.max(2),
            long_running: self
                .estimated_duration_minutes
                .is_some_and(|m| m > thresholds.max_duration_minutes),
            deep_reasoning: self
                .estimated_reasoning_steps
                .is_some_and(|s| s > thresholds.max_reasoning_steps),
        }
    }
}

/// Thresholds above which a goal counts as complex. Policy, not invariant:
/// always sourced from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityThresholds {
    /// Distinct domains at which a goal counts as multi-domain (at least 2).
    pub min_domains: usize,
    pub max_duration_minutes: u32,
    pub max_reasoning_steps: u32,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            min_domains: 2,
            max_duration_minutes: 120,
            max_reasoning_steps: 500,
        }
    }
}

/// Which complexity heuristics a goal tripped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    pub multi_domain: bool,
    pub long_running: bool,
    pub deep_reasoning: bool,
}

impl ComplexityAssessment {
    pub fn exceeds_threshold(&self) -> bool {
        self.multi_domain || self.long_running || self.deep_reasoning
    }
}
