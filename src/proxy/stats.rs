//! Provider statistics endpoint and time range resolution.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::server::AppState;
use crate::error::Error;
use crate::storage::stats::{query_provider_stats, ProviderStatsRow};

/// Query parameters for GET /v1/stats/providers.
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub range: Option<String>,
    pub since: Option<String>,
}

/// Preset time range options.
#[derive(Debug, Clone, Copy)]
pub enum RangePreset {
    Last1h,
    Last24h,
    Last7d,
    Last30d,
    All,
}

impl RangePreset {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "last_1h" => Some(Self::Last1h),
            "last_24h" => Some(Self::Last24h),
            "last_7d" => Some(Self::Last7d),
            "last_30d" => Some(Self::Last30d),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// `None` means unbounded.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Last1h => Some(Duration::hours(1)),
            Self::Last24h => Some(Duration::hours(24)),
            Self::Last7d => Some(Duration::days(7)),
            Self::Last30d => Some(Duration::days(30)),
            Self::All => None,
        }
    }
}

/// Resolve the lower bound of the stats window.
///
/// An explicit `since` wins over `range`. With neither, all rows are counted.
pub fn resolve_since(
    range: Option<&str>,
    since: Option<&str>,
) -> Result<Option<DateTime<Utc>>, Error> {
    if let Some(s) = since {
        return DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| Error::BadRequest(format!("Invalid 'since' timestamp: {}", e)));
    }

    let preset = match range {
        Some(r) => RangePreset::parse(r).ok_or_else(|| {
            Error::BadRequest(format!(
                "Invalid range '{}'. Supported: last_1h, last_24h, last_7d, last_30d, all",
                r
            ))
        })?,
        None => RangePreset::All,
    };

    Ok(preset.duration().map(|d| Utc::now() - d))
}

/// One provider in the stats response.
#[derive(Debug, Serialize)]
pub struct ProviderStats {
    pub provider: String,
    pub usage_count: i64,
    pub selected_count: i64,
    pub success_count: i64,
    /// Percentage of turns this provider was dispatched in and won
    pub selection_rate: f64,
    pub avg_confidence: f64,
    pub avg_latency_ms: f64,
}

impl From<ProviderStatsRow> for ProviderStats {
    fn from(row: ProviderStatsRow) -> Self {
        Self {
            selection_rate: row.selection_rate(),
            provider: row.provider,
            usage_count: row.usage_count,
            selected_count: row.selected_count,
            success_count: row.success_count,
            avg_confidence: row.avg_confidence,
            avg_latency_ms: row.avg_latency_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    pub providers: Vec<ProviderStats>,
}

/// Handle GET /v1/stats/providers
pub async fn provider_stats_handler(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Result<impl IntoResponse, Error> {
    let pool = state
        .orchestrator
        .db()
        .ok_or_else(|| Error::Unavailable("response log database not configured".to_string()))?;

    let since = resolve_since(params.range.as_deref(), params.since.as_deref())?
        .map(|dt| dt.to_rfc3339());
    tracing::debug!(since = ?since, "Provider stats query");

    let rows = query_provider_stats(pool, since.as_deref()).await?;

    Ok(Json(StatsResponse {
        since,
        providers: rows.into_iter().map(ProviderStats::from).collect(),
    }))
}
