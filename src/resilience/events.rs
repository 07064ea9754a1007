//! 弹性层生命周期事件（broadcast 给外部观察者，如 CLI 日志、性能监控）

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::ErrorCategory;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ResilienceEvent {
    #[serde(rename = "operation:success")]
    OperationSuccess {
        operation_id: String,
        attempt: u32,
        duration_ms: u64,
    },
    #[serde(rename = "operation:error")]
    OperationError {
        operation_id: String,
        attempt: u32,
        category: ErrorCategory,
        error: String,
    },
    #[serde(rename = "operation:fallback")]
    OperationFallback { operation_id: String, error: String },
    #[serde(rename = "circuit:opened")]
    CircuitOpened {
        operation_id: String,
        failure_count: u32,
        next_attempt_time: DateTime<Utc>,
    },
    #[serde(rename = "circuit:half_open")]
    CircuitHalfOpen { operation_id: String },
    #[serde(rename = "circuit:closed")]
    CircuitClosed { operation_id: String },
    #[serde(rename = "health:degraded")]
    HealthDegraded { component: String, error: String },
}

impl ResilienceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ResilienceEvent::OperationSuccess { .. } => "operation:success",
            ResilienceEvent::OperationError { .. } => "operation:error",
            ResilienceEvent::OperationFallback { .. } => "operation:fallback",
            ResilienceEvent::CircuitOpened { .. } => "circuit:opened",
            ResilienceEvent::CircuitHalfOpen { .. } => "circuit:half_open",
            ResilienceEvent::CircuitClosed { .. } => "circuit:closed",
            ResilienceEvent::HealthDegraded { .. } => "health:degraded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_matches_name() {
        let event = ResilienceEvent::OperationFallback {
            operation_id: "mcp:web_search:search".into(),
            error: "ECONNRESET".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
    }
}
