//! Inbound event fingerprints and the poison-message quarantine

use chrono::{DateTime, Duration, Utc};
use flowchat_common::types::Fingerprint;
use sqlx::PgPool;
use uuid::Uuid;

/// Fingerprint repository
#[derive(Clone)]
pub struct FingerprintRepository {
    pool: PgPool,
}

impl FingerprintRepository {
    /// Create a new fingerprint repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a fingerprint if it has not been seen inside the dedup window.
    ///
    /// Returns `true` when the event is fresh and should be processed. A
    /// fingerprint older than the window is refreshed and treated as fresh
    /// again (re-delivery after the window produces a new row by design).
    pub async fn check_and_record(
        &self,
        fp: &Fingerprint,
        window: Duration,
    ) -> Result<bool, sqlx::Error> {
        let cutoff = Utc::now() - window;

        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            INSERT INTO event_fingerprints (instance_id, external_id, event_kind, seen_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (instance_id, external_id, event_kind)
            DO UPDATE SET seen_at = NOW()
                WHERE event_fingerprints.seen_at < $4
            RETURNING seen_at
            "#,
        )
        .bind(fp.instance_id)
        .bind(&fp.external_id)
        .bind(fp.kind.to_string())
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        // RETURNING produces a row only when the insert or the conditional
        // refresh actually wrote; a duplicate inside the window writes nothing.
        Ok(row.is_some())
    }

    /// Drop fingerprints older than the dedup window
    pub async fn purge_older_than(&self, window: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = Utc::now() - window;
        let result = sqlx::query("DELETE FROM event_fingerprints WHERE seen_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Park a malformed event. The event is acknowledged to its transport;
    /// schema errors are never requeued.
    pub async fn quarantine(
        &self,
        instance_hint: Option<&str>,
        reason: &str,
        payload: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO quarantined_events (id, instance_hint, reason, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(instance_hint)
        .bind(reason)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
