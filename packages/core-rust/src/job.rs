use serde::{Deserialize, Serialize};

/// Status of asynchronous work as tracked by the job executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Running,
    Success,
    Failed,
}

/// Status code exposed to protocol callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolJobStatus {
    Ready,
    Running,
    Finished,
    Error,
}

impl From<JobStatus> for ProtocolJobStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Submitted => ProtocolJobStatus::Ready,
            JobStatus::Running => ProtocolJobStatus::Running,
            JobStatus::Success => ProtocolJobStatus::Finished,
            JobStatus::Failed => ProtocolJobStatus::Error,
        }
    }
}

/// Handle to work that may run synchronously or asynchronously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub operation_id: String,
    pub status: JobStatus,
    pub message: Option<String>,
    /// Millis since epoch.
    pub created_at: u64,
    /// Millis since epoch.
    pub updated_at: u64,
}

impl JobHandle {
    /// Status as reported to protocol callers.
    #[must_use]
    pub fn protocol_status(&self) -> ProtocolJobStatus {
        self.status.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ProtocolJobStatus::from(JobStatus::Submitted), ProtocolJobStatus::Ready);
        assert_eq!(ProtocolJobStatus::from(JobStatus::Running), ProtocolJobStatus::Running);
        assert_eq!(ProtocolJobStatus::from(JobStatus::Success), ProtocolJobStatus::Finished);
        assert_eq!(ProtocolJobStatus::from(JobStatus::Failed), ProtocolJobStatus::Error);
    }

    #[test]
    fn protocol_status_serializes_uppercase() {
        let json = serde_json::to_string(&ProtocolJobStatus::Finished).unwrap();
        assert_eq!(json, "\"FINISHED\"");
    }

    #[test]
    fn handle_reports_protocol_status() {
        let handle = JobHandle {
            operation_id: "op-1".to_string(),
            status: JobStatus::Submitted,
            message: None,
            created_at: 1,
            updated_at: 1,
        };
        assert_eq!(handle.protocol_status(), ProtocolJobStatus::Ready);
    }
}
