//! Pattern observation records.
//!
//! Patterns are best-effort observations written append-only to a
//! date-sharded file tree for later offline analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    TaskCompletion,
    ErrorOccurrence,
    AgentUsage,
    UserCorrection,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCompletion => "task_completion",
            Self::ErrorOccurrence => "error_occurrence",
            Self::AgentUsage => "agent_usage",
            Self::UserCorrection => "user_correction",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "task_completion" => Some(Self::TaskCompletion),
            "error_occurrence" => Some(Self::ErrorOccurrence),
            "agent_usage" => Some(Self::AgentUsage),
            "user_correction" => Some(Self::UserCorrection),
            _ => None,
        }
    }
}

/// One observation as serialized to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRecord {
    /// `pat-YYYYMMDD-HHMMSS-NNN`; the suffix is monotonic within a second
    pub pattern_id: String,
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub ts: DateTime<Utc>,
    /// Observation body
    pub data: serde_json::Value,
    /// Ambient context (session, swarm, correlation ids)
    pub context: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            PatternKind::TaskCompletion,
            PatternKind::ErrorOccurrence,
            PatternKind::AgentUsage,
            PatternKind::UserCorrection,
        ] {
            assert_eq!(PatternKind::parse_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_record_serializes_type_field() {
        let record = PatternRecord {
            pattern_id: "pat-20260801-120000-001".to_string(),
            kind: PatternKind::TaskCompletion,
            ts: Utc::now(),
            data: json!({"task_type": "build"}),
            context: json!({}),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], json!("task_completion"));
    }
}
