use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::authz::Decision;
use crate::errors::AppError;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Request metadata attached to audit entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_parts(method: &axum::http::Method, uri: &axum::http::Uri, headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self {
            method: Some(method.to_string()),
            path: Some(uri.path().to_string()),
            ip,
            user_agent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPayload {
    pub entry: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    pub severity: Severity,
}

/// Publishes an audit event for any `Loggable`. Fire and forget: a missing
/// listener or a full channel never fails the caller.
pub fn log_activity_with_context<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    context: Option<RequestContext>,
) {
    let payload = AuditPayload {
        entry: serde_json::to_value(entity).unwrap_or_default(),
        context,
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent::new(
        format!("{}.{}", T::entity_type(), action),
        actor_id,
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    if event_bus.send(serde_json::to_value(event).unwrap_or_default()).is_err() {
        tracing::debug!("no audit listener attached; event dropped");
    }
}

/// Receives authorization decisions from the guard.
pub trait AuditSink: Send + Sync {
    /// Best-effort; must not block and must not fail the request.
    fn record(&self, decision: &Decision);

    fn record_request(&self, decision: &Decision, _context: Option<RequestContext>) {
        self.record(decision);
    }
}

/// Audit sink publishing onto the event bus.
#[derive(Clone)]
pub struct EventBusAuditSink {
    bus: EventBus,
}

impl EventBusAuditSink {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl AuditSink for EventBusAuditSink {
    fn record(&self, decision: &Decision) {
        self.record_request(decision, None);
    }

    fn record_request(&self, decision: &Decision, context: Option<RequestContext>) {
        let action = if decision.allowed { "allowed" } else { "denied" };
        log_activity_with_context(&self.bus, action, Some(decision.user_id), decision, context);
    }
}

/// Persists audit events into `authz_audit_log`, chaining each row to the
/// previous one with SHA-256(prev_hash || payload).
pub async fn start_audit_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged; events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if let Err(err) = persist_event(&pool, &event).await {
            tracing::error!("failed to write audit log entry: {}", err);
        }
    }
    tracing::info!("audit listener stopped");
}

async fn persist_event(pool: &SqlitePool, event: &Value) -> Result<(), sqlx::Error> {
    let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
    let actor_id = event
        .get("actor_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());
    let subject_id = event
        .get("subject_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());
    let occurred_at = event
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let payload = event.get("payload");
    let severity = payload
        .and_then(|p| p.get("severity"))
        .and_then(|s| s.as_str())
        .unwrap_or("important");
    let entry = payload.and_then(|p| p.get("entry"));
    let permission = entry.and_then(|e| e.get("permission")).and_then(|v| v.as_str());
    let allowed = entry.and_then(|e| e.get("allowed")).and_then(|v| v.as_bool());
    let reason = entry.and_then(|e| e.get("reason")).and_then(|v| v.as_str());

    let payload_str = serde_json::to_string(event).unwrap_or_default();

    let mut tx = pool.begin().await?;
    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM authz_audit_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
    let hash = chain_hash(prev_hash.as_deref(), &payload_str);

    sqlx::query(
        r#"
        INSERT INTO authz_audit_log
            (id, event_name, occurred_at, actor_id, subject_id, permission, allowed, reason, severity, payload, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(occurred_at)
    .bind(actor_id.map(|u| u.to_string()))
    .bind(subject_id.map(|u| u.to_string()))
    .bind(permission)
    .bind(allowed)
    .bind(reason)
    .bind(severity)
    .bind(&payload_str)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Walks the audit log in insertion order and checks every link.
/// Returns the number of verified rows.
pub async fn verify_audit_chain(pool: &SqlitePool) -> Result<usize, AppError> {
    let rows: Vec<(i64, String, Option<String>, String)> =
        sqlx::query_as("SELECT seq, payload, prev_hash, hash FROM authz_audit_log ORDER BY seq ASC")
            .fetch_all(pool)
            .await?;

    let mut previous: Option<String> = None;
    for (seq, payload, prev_hash, hash) in &rows {
        if prev_hash != &previous || chain_hash(prev_hash.as_deref(), payload) != *hash {
            return Err(AppError::internal(format!("audit chain broken at entry {seq}")));
        }
        previous = Some(hash.clone());
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::DecisionReason;

    fn denial() -> Decision {
        Decision {
            allowed: false,
            reason: DecisionReason::PermissionDenied,
            permission: "contract:update:own".parse().unwrap(),
            matched_permission: None,
            requested: vec!["contract:update:own".parse().unwrap()],
            user_id: Uuid::new_v4(),
            company_id: None,
            user_roles: vec!["viewer".to_string()],
            user_permissions: Vec::new(),
            evaluated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn denials_are_published_as_critical() {
        let (bus, mut rx) = init_event_bus();
        let sink = EventBusAuditSink::new(bus);
        let decision = denial();
        sink.record(&decision);

        let event = rx.recv().await.unwrap();
        assert_eq!(event["name"], "authz.denied");
        assert_eq!(event["subject_id"], decision.user_id.to_string());
        assert_eq!(event["payload"]["severity"], "critical");
        assert_eq!(event["payload"]["entry"]["reason"], "permission_denied");
    }

    #[test]
    fn recording_without_listeners_does_not_fail() {
        let (bus, rx) = init_event_bus();
        drop(rx);
        EventBusAuditSink::new(bus).record(&denial());
    }

    #[test]
    fn chain_hash_depends_on_previous_link() {
        let first = chain_hash(None, "a");
        assert_ne!(chain_hash(Some(&first), "b"), chain_hash(None, "b"));
        assert_eq!(first.len(), 64);
    }
}
