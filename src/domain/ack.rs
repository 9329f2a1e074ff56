use serde::{Deserialize, Serialize};

/// Outcome the remote side reported for a single event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
    Failed,
    /// Any status string the remote side invents later. Counted as success.
    Other(String),
}

impl AckStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "ok" => AckStatus::Ok,
            "error" => AckStatus::Error,
            "failed" => AckStatus::Failed,
            other => AckStatus::Other(other.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, AckStatus::Error | AckStatus::Failed)
    }
}

/// Acknowledgement record returned on the duplex stream.
///
/// Acks arrive asynchronously and are not ordered relative to sends; the
/// `event_id` is the only link back to the event that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub event_id: String,
    pub certificate_id: String,
    pub status: AckStatus,
    pub error: Option<String>,
}

impl Acknowledgement {
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}
