use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for audit entries.
/// Controls retention policies and log filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Long-term retention, never auto-delete
    Critical,
    #[default]
    Important,
    /// Aggressively trimmed (e.g., 7 days)
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Anything that can be written to the audit log.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of event names, e.g. "authz" in "authz.denied".
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "denied" => Severity::Critical,
            "allowed" => self.severity(),
            _ => Severity::Important,
        }
    }
}
