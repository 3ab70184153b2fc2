//! Per-provider response log rows and their database writes.

use sqlx::SqlitePool;

/// One provider's outcome within an orchestrated turn.
///
/// All fields are owned types to satisfy `tokio::spawn` `'static` requirement.
#[derive(Debug, Clone)]
pub struct ResponseLog {
    pub turn_id: String,
    pub timestamp: String,
    pub provider: String,
    pub latency_ms: i64,
    pub confidence: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub was_selected: bool,
    pub ensemble_score: Option<f64>,
}

impl ResponseLog {
    /// Insert this log entry into the database.
    pub async fn insert(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO responses (
                turn_id, timestamp, provider, latency_ms, confidence,
                success, error_message, was_selected, ensemble_score
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.turn_id)
        .bind(&self.timestamp)
        .bind(&self.provider)
        .bind(self.latency_ms)
        .bind(self.confidence)
        .bind(self.success)
        .bind(self.error_message.as_deref())
        .bind(self.was_selected)
        .bind(self.ensemble_score)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Spawn a fire-and-forget write of every row of one turn.
///
/// If a write fails, a warning is logged but the error is not propagated.
pub fn spawn_log_write(pool: &SqlitePool, rows: Vec<ResponseLog>) {
    let pool = pool.clone();
    tokio::spawn(async move {
        for row in rows {
            if let Err(e) = row.insert(&pool).await {
                tracing::warn!(
                    turn_id = %row.turn_id,
                    provider = %row.provider,
                    error = %e,
                    "Failed to write response log to database"
                );
            }
        }
    });
}
