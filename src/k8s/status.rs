//! Job status snapshots
//!
//! Kubernetes status objects report pod counts as optional fields. Absent is
//! not the same as zero, so counts are modeled as [`PodCount`] and collapsed
//! to zero only where a check explicitly wants that reading.

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use serde::Serialize;

/// A pod count that distinguishes "not reported" from an actual count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PodCount {
    Unknown,
    Count(i32),
}

impl PodCount {
    fn from_field(field: Option<i32>) -> Self {
        field.map_or(PodCount::Unknown, PodCount::Count)
    }

    /// Collapse an unreported count to zero. Only for checks that read
    /// absence as "none yet" (e.g. active-pod checks).
    pub fn or_zero(self) -> i32 {
        match self {
            PodCount::Unknown => 0,
            PodCount::Count(n) => n,
        }
    }
}

/// Point-in-time view of a job's status.
#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub name: String,
    pub active: PodCount,
    pub succeeded: PodCount,
    pub failed: PodCount,
    pub created_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn from_job(job: &Job) -> Self {
        let status = job.status.as_ref();
        Self {
            name: job.metadata.name.clone().unwrap_or_default(),
            active: PodCount::from_field(status.and_then(|s| s.active)),
            succeeded: PodCount::from_field(status.and_then(|s| s.succeeded)),
            failed: PodCount::from_field(status.and_then(|s| s.failed)),
            created_at: job.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.or_zero() > 0
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::batch::v1::JobStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    use super::*;

    #[test]
    fn test_counts_distinguish_unknown_from_zero() {
        let job = Job {
            metadata: ObjectMeta {
                name: Some("mcp-proxy-abc123".to_string()),
                ..Default::default()
            },
            status: Some(JobStatus {
                active: Some(1),
                failed: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        let state = JobState::from_job(&job);
        assert_eq!(state.active, PodCount::Count(1));
        assert_eq!(state.failed, PodCount::Count(0));
        assert_eq!(state.succeeded, PodCount::Unknown);
        assert!(state.is_active());
    }

    #[test]
    fn test_missing_status_block() {
        let job = Job::default();
        let state = JobState::from_job(&job);
        assert_eq!(state.active, PodCount::Unknown);
        assert_eq!(state.active.or_zero(), 0);
        assert!(!state.is_active());
        assert_eq!(state.created_at, None);
    }

    #[test]
    fn test_creation_timestamp_carried_over() {
        let now = Utc::now();
        let job = Job {
            metadata: ObjectMeta {
                name: Some("job".to_string()),
                creation_timestamp: Some(Time(now)),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(JobState::from_job(&job).created_at, Some(now));
    }

    #[test]
    fn test_serialized_counts_are_bare_numbers_or_null() {
        let state = JobState {
            name: "job".to_string(),
            active: PodCount::Count(1),
            succeeded: PodCount::Unknown,
            failed: PodCount::Count(0),
            created_at: None,
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["active"], 1);
        assert_eq!(value["succeeded"], serde_json::Value::Null);
        assert_eq!(value["failed"], 0);
    }
}
