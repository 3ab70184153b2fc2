//! Aggregate per-provider statistics over the response log.

use serde::Serialize;
use sqlx::SqlitePool;

/// Per-provider statistics row.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ProviderStatsRow {
    pub provider: String,
    pub usage_count: i64,
    pub selected_count: i64,
    pub success_count: i64,
    pub avg_confidence: f64,
    pub avg_latency_ms: f64,
}

impl ProviderStatsRow {
    /// Percentage of dispatched turns this provider won.
    pub fn selection_rate(&self) -> f64 {
        if self.usage_count > 0 {
            self.selected_count as f64 / self.usage_count as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Query per-provider statistics, optionally bounded below by an RFC 3339 timestamp.
///
/// Uses `COALESCE(AVG(), 0)` so providers with no rows in range never yield NULL.
pub async fn query_provider_stats(
    pool: &SqlitePool,
    since: Option<&str>,
) -> Result<Vec<ProviderStatsRow>, sqlx::Error> {
    let mut sql = String::from(
        "SELECT \
         provider, \
         COUNT(*) as usage_count, \
         COUNT(CASE WHEN was_selected = 1 THEN 1 END) as selected_count, \
         COUNT(CASE WHEN success = 1 THEN 1 END) as success_count, \
         COALESCE(AVG(confidence), 0) as avg_confidence, \
         COALESCE(AVG(latency_ms), 0) as avg_latency_ms \
         FROM responses",
    );

    if since.is_some() {
        sql.push_str(" WHERE timestamp >= ?");
    }

    sql.push_str(" GROUP BY provider ORDER BY provider");

    let mut query = sqlx::query_as::<_, ProviderStatsRow>(&sql);

    if let Some(s) = since {
        query = query.bind(s);
    }

    query.fetch_all(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_rate() {
        let row = ProviderStatsRow {
            provider: "gpt".to_string(),
            usage_count: 8,
            selected_count: 2,
            success_count: 8,
            avg_confidence: 0.87,
            avg_latency_ms: 1200.0,
        };
        assert_eq!(row.selection_rate(), 25.0);

        let idle = ProviderStatsRow {
            usage_count: 0,
            selected_count: 0,
            ..row
        };
        assert_eq!(idle.selection_rate(), 0.0);
    }
}
