use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },
    /// Dispatch was aborted because continuing would waste budget.
    RunHalted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        backend: String,
        reason: String,
    },

    // Episode and job lifecycle
    EpisodeRegistered {
        episode: String,
        required_assets: u32,
        registered_by: String,
    },
    JobEnqueued {
        job_id: String,
        episode: String,
        backend: String,
        dedup_key: String,
        /// True when an active job already held the dedup key.
        deduplicated: bool,
    },
    JobStateChanged {
        job_id: String,
        episode: String,
        from_state: String,
        to_state: String,
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    CancelRequested {
        job_id: String,
        episode: String,
        requested_by: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        previous_state: String,
    },
    JobResubmitted {
        job_id: String,
        episode: String,
        retry_of: String,
        resubmitted_by: String,
    },

    // Backend calls
    /// One external invocation. Logged for every attempt, success or not.
    AdapterInvoked {
        job_id: String,
        episode: String,
        backend: String,
        attempt: u32,
        submission_key: String,
        outcome: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_class: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        credits: u32,
        duration_ms: u64,
    },
    CircuitOpened {
        backend: String,
        failures: u32,
        cooldown_secs: u64,
    },
    CircuitClosed {
        backend: String,
    },
    RecoveryResolved {
        job_id: String,
        episode: String,
        backend: String,
        submission_key: String,
        remote_outcome: String,
    },

    // Artifacts and gate
    ArtifactPersisted {
        job_id: String,
        episode: String,
        stored_path: String,
        content_hash: String,
    },
    GateEvaluated {
        episode: String,
        revision: u32,
        verdict: String,
        score: f64,
        hard_fails: Vec<String>,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::RunHalted { .. } => "run_halted",
            Self::EpisodeRegistered { .. } => "episode_registered",
            Self::JobEnqueued { .. } => "job_enqueued",
            Self::JobStateChanged { .. } => "job_state_changed",
            Self::CancelRequested { .. } => "cancel_requested",
            Self::JobResubmitted { .. } => "job_resubmitted",
            Self::AdapterInvoked { .. } => "adapter_invoked",
            Self::CircuitOpened { .. } => "circuit_opened",
            Self::CircuitClosed { .. } => "circuit_closed",
            Self::RecoveryResolved { .. } => "recovery_resolved",
            Self::ArtifactPersisted { .. } => "artifact_persisted",
            Self::GateEvaluated { .. } => "gate_evaluated",
        }
    }

    /// Extract job_id if this event is job-related
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobEnqueued { job_id, .. }
            | Self::JobStateChanged { job_id, .. }
            | Self::CancelRequested { job_id, .. }
            | Self::JobResubmitted { job_id, .. }
            | Self::AdapterInvoked { job_id, .. }
            | Self::RecoveryResolved { job_id, .. }
            | Self::ArtifactPersisted { job_id, .. } => Some(job_id),
            Self::RunHalted { job_id, .. } => job_id.as_deref(),
            _ => None,
        }
    }

    pub fn episode(&self) -> Option<&str> {
        match self {
            Self::EpisodeRegistered { episode, .. }
            | Self::JobEnqueued { episode, .. }
            | Self::JobStateChanged { episode, .. }
            | Self::CancelRequested { episode, .. }
            | Self::JobResubmitted { episode, .. }
            | Self::AdapterInvoked { episode, .. }
            | Self::RecoveryResolved { episode, .. }
            | Self::ArtifactPersisted { episode, .. }
            | Self::GateEvaluated { episode, .. } => Some(episode),
            _ => None,
        }
    }

    /// Extract the operator if this event was triggered by one
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::EpisodeRegistered { registered_by, .. } => Some(registered_by),
            Self::CancelRequested { requested_by, .. } => Some(requested_by),
            Self::JobResubmitted { resubmitted_by, .. } => Some(resubmitted_by),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub job_id: Option<String>,
    pub episode: Option<String>,
    pub actor: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    /// Build an unsaved record; the store assigns the id.
    pub fn from_event(timestamp: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            job_id: event.job_id().map(String::from),
            episode: event.episode().map(String::from),
            actor: event.actor().map(String::from),
            data: event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoked() -> AuditEvent {
        AuditEvent::AdapterInvoked {
            job_id: "job-1".to_string(),
            episode: "best-air-fryers".to_string(),
            backend: "dzine".to_string(),
            attempt: 2,
            submission_key: "job-1:2".to_string(),
            outcome: "failed".to_string(),
            error_class: Some("transient".to_string()),
            error: Some("rate limited".to_string()),
            credits: 0,
            duration_ms: 1200,
        }
    }

    #[test]
    fn test_event_type_service_started() {
        let event = AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        };
        assert_eq!(event.event_type(), "service_started");
        assert_eq!(event.job_id(), None);
        assert_eq!(event.actor(), None);
    }

    #[test]
    fn test_adapter_invoked_metadata() {
        let event = invoked();
        assert_eq!(event.event_type(), "adapter_invoked");
        assert_eq!(event.job_id(), Some("job-1"));
        assert_eq!(event.episode(), Some("best-air-fryers"));
    }

    #[test]
    fn test_cancel_requested_actor() {
        let event = AuditEvent::CancelRequested {
            job_id: "job-1".to_string(),
            episode: "ep".to_string(),
            requested_by: "alice".to_string(),
            reason: None,
            previous_state: "dispatched".to_string(),
        };
        assert_eq!(event.actor(), Some("alice"));
    }

    #[test]
    fn test_run_halted_optional_job() {
        let event = AuditEvent::RunHalted {
            job_id: None,
            backend: "dzine".to_string(),
            reason: "budget exhausted".to_string(),
        };
        assert_eq!(event.job_id(), None);
        assert_eq!(event.episode(), None);
    }

    #[test]
    fn test_serialize_deserialize_adapter_invoked() {
        let json = serde_json::to_string(&invoked()).unwrap();
        assert!(json.contains("\"type\":\"adapter_invoked\""));
        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, invoked());
    }

    #[test]
    fn test_record_from_event() {
        let record = AuditRecord::from_event(Utc::now(), invoked());
        assert_eq!(record.id, 0);
        assert_eq!(record.event_type, "adapter_invoked");
        assert_eq!(record.job_id.as_deref(), Some("job-1"));
        assert_eq!(record.actor, None);
    }
}
