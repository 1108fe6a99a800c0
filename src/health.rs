use serde::{Deserialize, Serialize};

use crate::types::{RedirectTarget, TargetId};

/// Error rate at or above which a target is in `Warning`.
pub const WARNING_ERROR_RATE: f64 = 0.2;
/// Error rate at or above which a target is `Critical`.
pub const CRITICAL_ERROR_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// No delivery attempted yet.
    Unknown,
    Healthy,
    Warning,
    Critical,
}

/// Derived view of a target's cumulative counters. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub target_id: TargetId,
    pub success_count: u64,
    pub error_count: u64,
    pub total: u64,
    pub error_rate: f64,
    pub health: Health,
}

impl HealthSnapshot {
    pub fn from_counts(target_id: TargetId, success_count: u64, error_count: u64) -> Self {
        let total = success_count + error_count;
        let error_rate = if total == 0 {
            0.0
        } else {
            error_count as f64 / total as f64
        };
        Self {
            target_id,
            success_count,
            error_count,
            total,
            error_rate,
            health: classify(total, error_rate),
        }
    }

    pub fn of(target: &RedirectTarget) -> Self {
        Self::from_counts(target.id.clone(), target.success_count, target.error_count)
    }
}

fn classify(total: u64, error_rate: f64) -> Health {
    if total == 0 {
        Health::Unknown
    } else if error_rate >= CRITICAL_ERROR_RATE {
        Health::Critical
    } else if error_rate >= WARNING_ERROR_RATE {
        Health::Warning
    } else {
        Health::Healthy
    }
}
