//! Event type registry and priority levels.
//!
//! The registry is the single source of truth mapping a logical event type to
//! its broker subject. Adding a new type means adding a variant here and its
//! rows in the `match` tables below; publisher and subscriber internals never
//! change.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compliance tag stamped into every envelope. Opaque to the bus; downstream
/// services cross-check it.
pub const CONSTITUTIONAL_HASH: &str = "cdd01ef066bc6cf2";

/// Root token of every subject owned by this bus.
pub const SUBJECT_ROOT: &str = "dgm";

/// Client-side priority attached to every event. Advisory metadata for
/// backlog triage and dashboards; does not affect broker-level ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl EventPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPriority::Low => "low",
            EventPriority::Normal => "normal",
            EventPriority::High => "high",
            EventPriority::Critical => "critical",
        }
    }
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Normal
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event families, one per autonomous service domain. Subjects group by
/// family so consumers can take `dgm.<family>.*` wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFamily {
    Improvement,
    Performance,
    Constitutional,
    Bandit,
}

impl EventFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFamily::Improvement => "improvement",
            EventFamily::Performance => "performance",
            EventFamily::Constitutional => "constitutional",
            EventFamily::Bandit => "bandit",
        }
    }

    /// Wildcard pattern matching every subject in this family.
    pub fn wildcard(&self) -> String {
        format!("{}.{}.>", SUBJECT_ROOT, self.as_str())
    }
}

impl fmt::Display for EventFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All event types in the DGM system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Improvement lifecycle
    #[serde(rename = "improvement.proposed")]
    ImprovementProposed,
    #[serde(rename = "improvement.validated")]
    ImprovementValidated,
    #[serde(rename = "improvement.executed")]
    ImprovementExecuted,
    #[serde(rename = "improvement.completed")]
    ImprovementCompleted,
    #[serde(rename = "improvement.failed")]
    ImprovementFailed,

    // Performance feedback
    #[serde(rename = "performance.metrics.updated")]
    PerformanceMetricsUpdated,
    #[serde(rename = "performance.degraded")]
    PerformanceDegraded,

    // Constitutional assessment
    #[serde(rename = "constitutional.assessment.completed")]
    ConstitutionalAssessmentCompleted,
    #[serde(rename = "constitutional.violation.detected")]
    ConstitutionalViolationDetected,

    // Bandit feedback
    #[serde(rename = "bandit.arm.selected")]
    BanditArmSelected,
    #[serde(rename = "bandit.reward.recorded")]
    BanditRewardRecorded,
}

impl EventType {
    /// Every registered type, in registration order.
    pub const ALL: [EventType; 11] = [
        EventType::ImprovementProposed,
        EventType::ImprovementValidated,
        EventType::ImprovementExecuted,
        EventType::ImprovementCompleted,
        EventType::ImprovementFailed,
        EventType::PerformanceMetricsUpdated,
        EventType::PerformanceDegraded,
        EventType::ConstitutionalAssessmentCompleted,
        EventType::ConstitutionalViolationDetected,
        EventType::BanditArmSelected,
        EventType::BanditRewardRecorded,
    ];

    /// Logical type name as it appears in the envelope `event_type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ImprovementProposed => "improvement.proposed",
            EventType::ImprovementValidated => "improvement.validated",
            EventType::ImprovementExecuted => "improvement.executed",
            EventType::ImprovementCompleted => "improvement.completed",
            EventType::ImprovementFailed => "improvement.failed",
            EventType::PerformanceMetricsUpdated => "performance.metrics.updated",
            EventType::PerformanceDegraded => "performance.degraded",
            EventType::ConstitutionalAssessmentCompleted => "constitutional.assessment.completed",
            EventType::ConstitutionalViolationDetected => "constitutional.violation.detected",
            EventType::BanditArmSelected => "bandit.arm.selected",
            EventType::BanditRewardRecorded => "bandit.reward.recorded",
        }
    }

    /// Returns the broker subject for this event type.
    pub fn subject(&self) -> String {
        format!("{}.{}", SUBJECT_ROOT, self.as_str())
    }

    pub fn family(&self) -> EventFamily {
        match self {
            EventType::ImprovementProposed
            | EventType::ImprovementValidated
            | EventType::ImprovementExecuted
            | EventType::ImprovementCompleted
            | EventType::ImprovementFailed => EventFamily::Improvement,
            EventType::PerformanceMetricsUpdated | EventType::PerformanceDegraded => {
                EventFamily::Performance
            }
            EventType::ConstitutionalAssessmentCompleted
            | EventType::ConstitutionalViolationDetected => EventFamily::Constitutional,
            EventType::BanditArmSelected | EventType::BanditRewardRecorded => EventFamily::Bandit,
        }
    }

    /// Priority used when the publisher is not given an explicit one.
    pub fn default_priority(&self) -> EventPriority {
        match self {
            EventType::ImprovementProposed => EventPriority::High,
            EventType::ImprovementValidated => EventPriority::Normal,
            EventType::ImprovementExecuted => EventPriority::High,
            EventType::ImprovementCompleted => EventPriority::Normal,
            EventType::ImprovementFailed => EventPriority::Critical,
            EventType::PerformanceMetricsUpdated => EventPriority::Normal,
            EventType::PerformanceDegraded => EventPriority::High,
            EventType::ConstitutionalAssessmentCompleted => EventPriority::High,
            EventType::ConstitutionalViolationDetected => EventPriority::Critical,
            EventType::BanditArmSelected => EventPriority::Normal,
            EventType::BanditRewardRecorded => EventPriority::Normal,
        }
    }

    /// Resolve a type name (`improvement.proposed`) back to its variant.
    pub fn parse(name: &str) -> Result<Self> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| Error::UnknownEventType(name.to_string()))
    }

    /// Resolve a full subject (`dgm.improvement.proposed`) back to its type.
    pub fn from_subject(subject: &str) -> Result<Self> {
        let name = subject
            .strip_prefix(SUBJECT_ROOT)
            .and_then(|s| s.strip_prefix('.'))
            .ok_or_else(|| Error::UnknownEventType(subject.to_string()))?;
        Self::parse(name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
