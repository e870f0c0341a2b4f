//! Audit Trail Recorder.
//!
//! Projects raw event context through the redaction policy and persists the
//! result as an immutable row. Writes are best-effort: the recorder owns its
//! own pool connection, never joins the surrounding business transaction,
//! and a failed write logs a warning instead of failing the operation.

pub mod policy;

use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

pub use policy::{build_payload, AuditEventType};

/// System actor recorded on orchestrator- and scheduler-driven events.
pub const ACTOR_SYSTEM: &str = "SYSTEM";

#[derive(Clone)]
pub struct AuditRecorder {
    pool: PgPool,
}

impl AuditRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist one audit event. The context map is projected through the
    /// event type's allow-list before it is written; callers must hash
    /// correlation-sensitive identifiers beforehand.
    pub async fn write_event(
        &self,
        entity_type: &str,
        entity_id: &str,
        event_type: AuditEventType,
        context: Value,
        actor: &str,
    ) {
        let empty = Map::new();
        let payload = match context.as_object() {
            Some(map) => build_payload(event_type, map),
            None => build_payload(event_type, &empty),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO audit_events (id, entity_type, entity_id, event_type, payload_json, actor)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entity_type)
        .bind(entity_id)
        .bind(event_type.as_str())
        .bind(Value::Object(payload))
        .bind(actor)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(
                entity_type = entity_type,
                entity_id = entity_id,
                event_type = %event_type,
                error = %e,
                "Audit write failed (best-effort, not propagated)"
            );
        }
    }
}
