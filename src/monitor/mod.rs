//! PerformanceMonitor：按会话周期采集性能快照、评估告警、汇总仪表盘
//!
//! 每个被监控的会话有一个 tokio interval 任务，通过 CancellationToken 停止。
//! 快照历史是环形缓冲（max_snapshots_per_session），并按 metrics_retention_days 清理；
//! 告警按 alert_retention_days 清理。停止监控的会话保留最多 MAX_FINISHED_SESSIONS 个，
//! 超过 metrics_retention_days 的会话在下一次停止时移除。

pub mod alerts;
pub mod dashboard;
pub mod metrics;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::PerformanceSection;

pub use alerts::{default_conditions, AlertCondition, AlertOperator, AlertSeverity, PerformanceAlert};
pub use dashboard::{DashboardData, HealthStatus, SessionSummary};
pub use metrics::{McpServerStats, PerformanceMetrics, SessionActivity};

use metrics::McpSampleWindow;

/// 告警总数上限（保留期之外的额外保护）
const MAX_ALERTS: usize = 10_000;
/// 已停止会话的保留数量上限
pub const MAX_FINISHED_SESSIONS: usize = 256;

/// 监控事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum MonitorEvent {
    #[serde(rename = "alert:triggered")]
    AlertTriggered { alert: PerformanceAlert },
    #[serde(rename = "metrics:collected")]
    MetricsCollected {
        session_id: String,
        snapshot_count: usize,
    },
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::AlertTriggered { .. } => "alert:triggered",
            MonitorEvent::MetricsCollected { .. } => "metrics:collected",
        }
    }
}

struct SessionRecord {
    started_at: DateTime<Utc>,
    activity: SessionActivity,
    history: VecDeque<PerformanceMetrics>,
    /// Some 表示采集任务在运行
    cancel: Option<CancellationToken>,
    stopped_at: Option<DateTime<Utc>>,
}

struct Inner {
    config: PerformanceSection,
    conditions: Vec<AlertCondition>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    mcp: Mutex<HashMap<String, McpSampleWindow>>,
    alerts: Mutex<VecDeque<PerformanceAlert>>,
    system: Mutex<System>,
    events: broadcast::Sender<MonitorEvent>,
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Monitor mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// 性能监控器（Clone 共享同一份状态）
#[derive(Clone)]
pub struct PerformanceMonitor {
    inner: Arc<Inner>,
}

impl PerformanceMonitor {
    pub fn new(config: PerformanceSection) -> Self {
        let conditions = default_conditions(&config.thresholds);
        Self::with_conditions(config, conditions)
    }

    pub fn with_conditions(config: PerformanceSection, conditions: Vec<AlertCondition>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                config,
                conditions,
                sessions: Mutex::new(HashMap::new()),
                mcp: Mutex::new(HashMap::new()),
                alerts: Mutex::new(VecDeque::new()),
                system: Mutex::new(System::new()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    /// 开始监控会话；已在监控中则忽略。需在 tokio 运行时内调用
    pub fn start_session_monitoring(&self, session_id: &str) {
        let token = CancellationToken::new();
        {
            let mut sessions = lock_recover(&self.inner.sessions);
            let record = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionRecord {
                    started_at: Utc::now(),
                    activity: SessionActivity::default(),
                    history: VecDeque::new(),
                    cancel: None,
                    stopped_at: None,
                });
            if record.cancel.is_some() {
                return;
            }
            record.cancel = Some(token.clone());
            record.stopped_at = None;
        }

        tracing::info!(session_id, "Started performance monitoring");

        let inner = Arc::clone(&self.inner);
        let session_id = session_id.to_string();
        let period = Duration::from_millis(inner.config.collection_interval_ms.max(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval 的第一次 tick 立即完成
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.collect(&session_id, true);
                    }
                }
            }
            tracing::debug!(session_id = %session_id, "Metrics collection task stopped");
        });
    }

    /// 停止监控；历史在保留期内可查询，返回会话汇总
    pub fn stop_session_monitoring(&self, session_id: &str) -> Option<SessionSummary> {
        {
            let mut sessions = lock_recover(&self.inner.sessions);
            let now = Utc::now();
            let record = sessions.get_mut(session_id)?;
            if let Some(token) = record.cancel.take() {
                token.cancel();
                record.stopped_at = Some(now);
            }
            self.inner.prune_finished(&mut sessions, now);
        }
        let summary = self.session_summary(session_id);
        if let Some(s) = &summary {
            tracing::info!(
                session_id,
                duration_ms = s.duration_ms,
                snapshots = s.snapshots,
                alerts = s.alerts,
                "Stopped performance monitoring"
            );
        }
        summary
    }

    /// 记录一次 MCP 调用（延迟与成败），用于滑动窗口统计
    pub fn record_mcp_call(&self, server: &str, latency_ms: f64, success: bool) {
        lock_recover(&self.inner.mcp)
            .entry(server.to_string())
            .or_default()
            .push(latency_ms, success);
    }

    /// 编排器上报的协调/质量计数；未监控的会话忽略
    pub fn update_session_activity(&self, session_id: &str, activity: SessionActivity) {
        if let Some(record) = lock_recover(&self.inner.sessions).get_mut(session_id) {
            record.activity = activity;
        }
    }

    /// 立即采集一次快照；未知会话返回 None
    pub fn collect_metrics(&self, session_id: &str) -> Option<PerformanceMetrics> {
        self.inner.collect(session_id, false)
    }

    pub fn alerts(&self) -> Vec<PerformanceAlert> {
        lock_recover(&self.inner.alerts).iter().cloned().collect()
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> bool {
        let mut alerts = lock_recover(&self.inner.alerts);
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn mcp_stats(&self) -> BTreeMap<String, McpServerStats> {
        lock_recover(&self.inner.mcp)
            .iter()
            .map(|(name, window)| (name.clone(), window.stats()))
            .collect()
    }

    pub fn dashboard_data(&self) -> DashboardData {
        let (active_sessions, recent_metrics) = {
            let sessions = lock_recover(&self.inner.sessions);
            let mut active: Vec<String> = sessions
                .iter()
                .filter(|(_, r)| r.cancel.is_some())
                .map(|(id, _)| id.clone())
                .collect();
            active.sort();
            let recent: BTreeMap<String, Vec<PerformanceMetrics>> = sessions
                .iter()
                .map(|(id, r)| {
                    let skip = r.history.len().saturating_sub(dashboard::DASHBOARD_SNAPSHOTS);
                    (id.clone(), r.history.iter().skip(skip).cloned().collect())
                })
                .collect();
            (active, recent)
        };

        let alerts = self.alerts();
        let health = dashboard::health_status(&alerts);
        let latest: Vec<&PerformanceMetrics> =
            recent_metrics.values().filter_map(|h| h.last()).collect();
        let recommendations = dashboard::recommendations(&latest, &self.inner.config.thresholds);

        DashboardData {
            generated_at: Utc::now(),
            health,
            active_sessions,
            recent_metrics,
            open_alerts: alerts.into_iter().filter(|a| !a.acknowledged).collect(),
            mcp_servers: self.mcp_stats(),
            recommendations,
        }
    }

    pub fn session_summary(&self, session_id: &str) -> Option<SessionSummary> {
        let alert_count = lock_recover(&self.inner.alerts)
            .iter()
            .filter(|a| a.session_id == session_id)
            .count();

        let sessions = lock_recover(&self.inner.sessions);
        let record = sessions.get(session_id)?;
        let n = record.history.len();
        let mean = |f: fn(&PerformanceMetrics) -> f64| -> f64 {
            if n == 0 {
                0.0
            } else {
                record.history.iter().map(f).sum::<f64>() / n as f64
            }
        };

        Some(SessionSummary {
            session_id: session_id.to_string(),
            active: record.cancel.is_some(),
            started_at: record.started_at,
            duration_ms: (Utc::now() - record.started_at).num_milliseconds(),
            snapshots: n,
            avg_memory_mb: mean(|m| m.memory_mb),
            peak_memory_mb: record
                .history
                .iter()
                .map(|m| m.memory_mb)
                .fold(0.0, f64::max),
            avg_cpu_percent: mean(|m| m.cpu_percent),
            avg_response_time_ms: mean(|m| m.avg_response_time_ms),
            alerts: alert_count,
            latest: record.history.back().cloned(),
        })
    }

    /// 停止所有采集任务
    pub fn shutdown(&self) {
        let mut sessions = lock_recover(&self.inner.sessions);
        let now = Utc::now();
        for record in sessions.values_mut() {
            if let Some(token) = record.cancel.take() {
                token.cancel();
                record.stopped_at = Some(now);
            }
        }
        self.inner.prune_finished(&mut sessions, now);
        tracing::info!("Performance monitor stopped");
    }
}

impl Inner {
    /// 移除超出保留期的已停止会话，并把已停止会话数限制在 MAX_FINISHED_SESSIONS 内
    fn prune_finished(&self, sessions: &mut HashMap<String, SessionRecord>, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::days(i64::from(self.config.metrics_retention_days));
        sessions.retain(|_, r| r.stopped_at.map_or(true, |at| at >= cutoff));

        let mut finished: Vec<(DateTime<Utc>, String)> = sessions
            .iter()
            .filter_map(|(id, r)| r.stopped_at.map(|at| (at, id.clone())))
            .collect();
        if finished.len() <= MAX_FINISHED_SESSIONS {
            return;
        }
        finished.sort();
        let excess = finished.len() - MAX_FINISHED_SESSIONS;
        for (_, id) in finished.into_iter().take(excess) {
            sessions.remove(&id);
        }
        tracing::debug!(evicted = excess, "Evicted finished monitoring sessions");
    }

    fn sample_process(&self) -> (f64, f64) {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return (0.0, 0.0);
        };
        let mut system = lock_recover(&self.system);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .map(|p| (p.memory() as f64 / 1024.0 / 1024.0, p.cpu_usage() as f64))
            .unwrap_or((0.0, 0.0))
    }

    /// scheduled 为 true 时（定时任务调用），会话已停止监控则不再写入
    fn collect(&self, session_id: &str, scheduled: bool) -> Option<PerformanceMetrics> {
        let (memory_mb, cpu_percent) = self.sample_process();

        let server_stats: BTreeMap<String, McpServerStats> = lock_recover(&self.mcp)
            .iter()
            .filter(|(_, w)| !w.is_empty())
            .map(|(name, w)| (name.clone(), w.stats()))
            .collect();
        let total_calls: usize = server_stats.values().map(|s| s.calls).sum();
        let (avg_response_time_ms, success_rate) = if total_calls == 0 {
            (0.0, 1.0)
        } else {
            let latency = server_stats
                .values()
                .map(|s| s.avg_latency_ms * s.calls as f64)
                .sum::<f64>()
                / total_calls as f64;
            let success = server_stats
                .values()
                .map(|s| s.success_rate * s.calls as f64)
                .sum::<f64>()
                / total_calls as f64;
            (latency, success)
        };

        let now = Utc::now();
        let snapshot = {
            let mut sessions = lock_recover(&self.sessions);
            let record = sessions.get_mut(session_id)?;
            if scheduled && record.cancel.is_none() {
                return None;
            }
            let snapshot = PerformanceMetrics {
                session_id: session_id.to_string(),
                timestamp: now,
                uptime_ms: (now - record.started_at).num_milliseconds(),
                memory_mb,
                cpu_percent,
                avg_response_time_ms,
                success_rate,
                error_rate: 1.0 - success_rate,
                mcp_latency_ms: server_stats
                    .iter()
                    .map(|(k, s)| (k.clone(), s.avg_latency_ms))
                    .collect(),
                mcp_success_rate: server_stats
                    .iter()
                    .map(|(k, s)| (k.clone(), s.success_rate))
                    .collect(),
                activity: record.activity.clone(),
            };

            record.history.push_back(snapshot.clone());
            let cutoff = now - ChronoDuration::days(i64::from(self.config.metrics_retention_days));
            record.history.retain(|m| m.timestamp >= cutoff);
            let cap = self.config.max_snapshots_per_session.max(1);
            while record.history.len() > cap {
                record.history.pop_front();
            }

            let _ = self.events.send(MonitorEvent::MetricsCollected {
                session_id: session_id.to_string(),
                snapshot_count: record.history.len(),
            });
            snapshot
        };

        self.evaluate_alerts(&snapshot);
        Some(snapshot)
    }

    fn evaluate_alerts(&self, snapshot: &PerformanceMetrics) {
        let triggered: Vec<PerformanceAlert> = self
            .conditions
            .iter()
            .filter_map(|c| c.evaluate(snapshot))
            .collect();

        let mut alerts = lock_recover(&self.alerts);
        for alert in triggered {
            tracing::warn!(
                session_id = %alert.session_id,
                severity = ?alert.severity,
                "Performance alert: {}",
                alert.message
            );
            let _ = self.events.send(MonitorEvent::AlertTriggered {
                alert: alert.clone(),
            });
            alerts.push_back(alert);
        }

        let cutoff = snapshot.timestamp - ChronoDuration::days(i64::from(self.config.alert_retention_days));
        alerts.retain(|a| a.triggered_at >= cutoff);
        while alerts.len() > MAX_ALERTS {
            alerts.pop_front();
        }
    }
}
