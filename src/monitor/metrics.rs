//! 性能指标快照与 MCP 调用采样

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 每个 MCP 服务器保留的最近调用样本数
pub const MCP_SAMPLE_WINDOW: usize = 100;

/// 编排器上报的会话协调与质量计数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionActivity {
    pub active_agents: usize,
    pub completed_tasks: usize,
    pub pending_tasks: usize,
    pub failed_tasks: usize,
    pub confidence_level: f64,
    pub evidence_count: usize,
}

/// 单次采集的不可变快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// 会话开始至今
    pub uptime_ms: i64,
    pub memory_mb: f64,
    pub cpu_percent: f64,
    /// 所有服务器的平均延迟
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub mcp_latency_ms: BTreeMap<String, f64>,
    pub mcp_success_rate: BTreeMap<String, f64>,
    pub activity: SessionActivity,
}

impl PerformanceMetrics {
    /// 按名称读取可告警的指标
    pub fn value(&self, metric: &str) -> Option<f64> {
        match metric {
            "memory_mb" => Some(self.memory_mb),
            "cpu_percent" => Some(self.cpu_percent),
            "avg_response_time_ms" => Some(self.avg_response_time_ms),
            "success_rate" => Some(self.success_rate),
            "error_rate" => Some(self.error_rate),
            "confidence_level" => Some(self.activity.confidence_level),
            "evidence_count" => Some(self.activity.evidence_count as f64),
            "active_agents" => Some(self.activity.active_agents as f64),
            "failed_tasks" => Some(self.activity.failed_tasks as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct McpSample {
    latency_ms: f64,
    success: bool,
}

/// 某个 MCP 服务器的滑动窗口
#[derive(Debug, Default)]
pub struct McpSampleWindow {
    samples: VecDeque<McpSample>,
}

impl McpSampleWindow {
    pub fn push(&mut self, latency_ms: f64, success: bool) {
        if self.samples.len() == MCP_SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(McpSample {
            latency_ms,
            success,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> McpServerStats {
        let calls = self.samples.len();
        if calls == 0 {
            return McpServerStats {
                calls: 0,
                avg_latency_ms: 0.0,
                success_rate: 1.0,
            };
        }
        let total_latency: f64 = self.samples.iter().map(|s| s.latency_ms).sum();
        let successes = self.samples.iter().filter(|s| s.success).count();
        McpServerStats {
            calls,
            avg_latency_ms: total_latency / calls as f64,
            success_rate: successes as f64 / calls as f64,
        }
    }
}

/// 窗口内的移动平均
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McpServerStats {
    pub calls: usize,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
}
