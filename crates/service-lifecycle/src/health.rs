//! Health snapshots of a service

use crate::state::ServiceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Extra fields returned by a custom health check
pub type HealthDetails = Map<String, Value>;

/// Point-in-time health of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Service name
    pub name: String,
    /// Lifecycle state, `None` when the service was never constructed
    pub state: Option<ServiceState>,
    /// Combined health
    pub healthy: bool,
    /// Last lifecycle error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure of the custom health check itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_error: Option<String>,
    /// Fields merged in from the custom health check
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: HealthDetails,
    /// When the snapshot was taken
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Synthetic report for a registered service with no instance yet
    pub fn not_created(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: None,
            healthy: false,
            error: Some("service not created".to_string()),
            check_error: None,
            details: Map::new(),
            checked_at: Utc::now(),
        }
    }

    /// Merge custom health check output
    ///
    /// A boolean `healthy` key overrides the lifecycle-derived health; all
    /// other keys land in `details`.
    pub fn merge(&mut self, mut details: HealthDetails) {
        if let Some(Value::Bool(healthy)) = details.remove("healthy") {
            self.healthy = healthy;
        }
        self.details.extend(details);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_created_report() {
        let report = HealthReport::not_created("cache");
        assert_eq!(report.state, None);
        assert!(!report.healthy);
        assert_eq!(report.error.as_deref(), Some("service not created"));
    }

    #[test]
    fn test_merge_overrides_health() {
        let mut report = HealthReport::not_created("cache");
        report.healthy = true;

        let details = json!({ "healthy": false, "connections": 3 });
        report.merge(details.as_object().cloned().unwrap_or_default());

        assert!(!report.healthy);
        assert_eq!(report.details.get("connections"), Some(&json!(3)));
        assert!(!report.details.contains_key("healthy"));
    }

    #[test]
    fn test_report_serializes_without_empty_fields() {
        let mut report = HealthReport::not_created("cache");
        report.error = None;
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["state"], Value::Null);
        assert!(value.get("error").is_none());
        assert!(value.get("details").is_none());
    }
}
