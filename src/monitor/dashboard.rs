//! 仪表盘视图：健康度判定与优化建议

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::PerformanceThresholds;
use crate::monitor::alerts::{AlertSeverity, PerformanceAlert};
use crate::monitor::metrics::{McpServerStats, PerformanceMetrics};

/// 仪表盘每个会话展示的快照数
pub const DASHBOARD_SNAPSHOTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardData {
    pub generated_at: DateTime<Utc>,
    pub health: HealthStatus,
    pub active_sessions: Vec<String>,
    /// 会话 -> 最近的快照（旧在前）
    pub recent_metrics: BTreeMap<String, Vec<PerformanceMetrics>>,
    pub open_alerts: Vec<PerformanceAlert>,
    pub mcp_servers: BTreeMap<String, McpServerStats>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub snapshots: usize,
    pub avg_memory_mb: f64,
    pub peak_memory_mb: f64,
    pub avg_cpu_percent: f64,
    pub avg_response_time_ms: f64,
    pub alerts: usize,
    pub latest: Option<PerformanceMetrics>,
}

/// 有未确认 critical 告警为 critical；未确认 warning 超过 2 条为 degraded
pub fn health_status(alerts: &[PerformanceAlert]) -> HealthStatus {
    let open = alerts.iter().filter(|a| !a.acknowledged);
    let mut warnings = 0;
    for alert in open {
        match alert.severity {
            AlertSeverity::Critical => return HealthStatus::Critical,
            AlertSeverity::Warning => warnings += 1,
        }
    }
    if warnings > 2 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

pub fn recommendations(
    latest: &[&PerformanceMetrics],
    thresholds: &PerformanceThresholds,
) -> Vec<String> {
    let mut out = Vec::new();
    if latest
        .iter()
        .any(|m| m.memory_mb > thresholds.max_memory_mb * 0.8)
    {
        out.push(
            "Memory usage is close to the limit; lower research.max_concurrent_tasks".to_string(),
        );
    }
    if latest
        .iter()
        .any(|m| m.cpu_percent > thresholds.max_cpu_percent * 0.8)
    {
        out.push("CPU usage is high; spread sessions over time or add workers".to_string());
    }
    if latest
        .iter()
        .any(|m| m.avg_response_time_ms > thresholds.max_response_time_ms)
    {
        out.push("MCP responses are slow; consider caching search results".to_string());
    }
    if latest
        .iter()
        .any(|m| m.success_rate < thresholds.min_success_rate)
    {
        out.push("Tool call success rate is low; check MCP server health and API keys".to_string());
    }
    if latest
        .iter()
        .any(|m| m.activity.failed_tasks > 0)
    {
        out.push("Some research tasks failed; review resilience settings".to_string());
    }
    out
}
