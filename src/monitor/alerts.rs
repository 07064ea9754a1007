//! 告警条件与告警记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PerformanceThresholds;
use crate::monitor::metrics::PerformanceMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOperator {
    GreaterThan,
    LessThan,
}

impl AlertOperator {
    pub fn breached(self, value: f64, threshold: f64) -> bool {
        match self {
            AlertOperator::GreaterThan => value > threshold,
            AlertOperator::LessThan => value < threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            AlertOperator::GreaterThan => ">",
            AlertOperator::LessThan => "<",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// 告警条件：metric 名称对应 PerformanceMetrics::value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCondition {
    pub metric: String,
    pub threshold: f64,
    pub operator: AlertOperator,
    pub severity: AlertSeverity,
}

impl AlertCondition {
    pub fn new(
        metric: impl Into<String>,
        operator: AlertOperator,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            metric: metric.into(),
            threshold,
            operator,
            severity,
        }
    }

    /// 快照越界时返回告警
    pub fn evaluate(&self, metrics: &PerformanceMetrics) -> Option<PerformanceAlert> {
        let value = metrics.value(&self.metric)?;
        if !self.operator.breached(value, self.threshold) {
            return None;
        }
        Some(PerformanceAlert {
            id: format!("alert_{}", uuid::Uuid::new_v4()),
            session_id: metrics.session_id.clone(),
            metric: self.metric.clone(),
            value,
            threshold: self.threshold,
            severity: self.severity,
            message: format!(
                "{} = {:.2} ({} {:.2})",
                self.metric,
                value,
                self.operator.symbol(),
                self.threshold
            ),
            triggered_at: metrics.timestamp,
            acknowledged: false,
        })
    }
}

/// 默认条件：资源与延迟为 warning，成功率与错误率为 critical
pub fn default_conditions(thresholds: &PerformanceThresholds) -> Vec<AlertCondition> {
    vec![
        AlertCondition::new(
            "memory_mb",
            AlertOperator::GreaterThan,
            thresholds.max_memory_mb,
            AlertSeverity::Warning,
        ),
        AlertCondition::new(
            "cpu_percent",
            AlertOperator::GreaterThan,
            thresholds.max_cpu_percent,
            AlertSeverity::Warning,
        ),
        AlertCondition::new(
            "avg_response_time_ms",
            AlertOperator::GreaterThan,
            thresholds.max_response_time_ms,
            AlertSeverity::Warning,
        ),
        AlertCondition::new(
            "success_rate",
            AlertOperator::LessThan,
            thresholds.min_success_rate,
            AlertSeverity::Critical,
        ),
        AlertCondition::new(
            "error_rate",
            AlertOperator::GreaterThan,
            thresholds.max_error_rate,
            AlertSeverity::Critical,
        ),
    ]
}

/// 告警记录，不会自动清除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub id: String,
    pub session_id: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::metrics::SessionActivity;
    use std::collections::BTreeMap;

    fn snapshot(success_rate: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            session_id: "s1".into(),
            timestamp: Utc::now(),
            uptime_ms: 0,
            memory_mb: 100.0,
            cpu_percent: 5.0,
            avg_response_time_ms: 50.0,
            success_rate,
            error_rate: 1.0 - success_rate,
            mcp_latency_ms: BTreeMap::new(),
            mcp_success_rate: BTreeMap::new(),
            activity: SessionActivity::default(),
        }
    }

    #[test]
    fn test_default_conditions_flag_low_success_rate() {
        let conditions = default_conditions(&PerformanceThresholds::default());
        let breached: Vec<PerformanceAlert> = conditions
            .iter()
            .filter_map(|c| c.evaluate(&snapshot(0.5)))
            .collect();
        assert_eq!(breached.len(), 2);
        assert!(breached.iter().all(|a| a.severity == AlertSeverity::Critical));
        assert!(breached.iter().all(|a| !a.acknowledged));

        let healthy = conditions.iter().filter_map(|c| c.evaluate(&snapshot(1.0)));
        assert_eq!(healthy.count(), 0);
    }

    #[test]
    fn test_unknown_metric_never_fires() {
        let condition =
            AlertCondition::new("queue_depth", AlertOperator::GreaterThan, 0.0, AlertSeverity::Warning);
        assert!(condition.evaluate(&snapshot(1.0)).is_none());
    }
}
