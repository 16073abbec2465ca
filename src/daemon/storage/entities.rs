use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence label attached to a description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

/// One capture attempt and its outcome. Never modified after it has been appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    /// Relative to the application directory.
    pub screenshot_path: Option<String>,
    pub description: Option<String>,
    pub confidence: Option<Confidence>,
    pub successful: bool,
    pub error: Option<String>,
}

impl ActivityRecord {
    pub fn succeeded(
        timestamp: DateTime<Utc>,
        screenshot_path: String,
        description: String,
        confidence: Confidence,
    ) -> Self {
        Self {
            timestamp,
            screenshot_path: Some(screenshot_path),
            description: Some(description),
            confidence: Some(confidence),
            successful: true,
            error: None,
        }
    }

    pub fn capture_failed(timestamp: DateTime<Utc>, error: String) -> Self {
        Self {
            timestamp,
            screenshot_path: None,
            description: None,
            confidence: None,
            successful: false,
            error: Some(error),
        }
    }

    pub fn analysis_failed(timestamp: DateTime<Utc>, screenshot_path: String, error: String) -> Self {
        Self {
            timestamp,
            screenshot_path: Some(screenshot_path),
            description: None,
            confidence: Some(Confidence::Low),
            successful: false,
            error: Some(error),
        }
    }

    /// A successful record always points at a screenshot and carries a description.
    pub fn is_consistent(&self) -> bool {
        !self.successful || (self.screenshot_path.is_some() && self.description.is_some())
    }
}

/// The persisted document. Activities are kept in capture order, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub activities: Vec<ActivityRecord>,
}

impl ActivityLog {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            activities: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of successful records, rounded to two decimals.
    pub success_rate: f64,
    pub first_activity: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ActivityStatistics {
    pub fn from_records(records: &[ActivityRecord]) -> Self {
        let total = records.len();
        let successful = records.iter().filter(|v| v.successful).count();
        let success_rate = if total == 0 {
            0.
        } else {
            (successful as f64 / total as f64 * 10000.).round() / 100.
        };
        Self {
            total,
            successful,
            failed: total - successful,
            success_rate,
            first_activity: records.first().map(|v| v.timestamp),
            last_activity: records.last().map(|v| v.timestamp),
        }
    }
}

/// Document written by an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityExport {
    pub exported_at: DateTime<Utc>,
    pub total_activities: usize,
    pub activities: Vec<ActivityRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub removed_records: usize,
    pub removed_screenshots: usize,
}
