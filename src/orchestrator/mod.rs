//! 编排器：市场调研深度代理的入口
//!
//! 每次 process_research_request 创建独立的 ResearchState 与 SessionContext，
//! 运行调研图（plan → delegate → execute → validate → synthesize → report），
//! 结束后清理监控、事件流与会话登记。ResilienceManager、McpServerManager、PerformanceMonitor
//! 在所有会话之间共享。

pub mod agents;
pub mod analysis;
pub mod graph;
pub mod intelligence;
pub mod nodes;
pub mod planning;
pub mod report;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::core::{
    Message, OrchestratorError, ResearchState, SessionContext, ShutdownManager, ShutdownReason,
};
use crate::mcp::McpServerManager;
use crate::monitor::PerformanceMonitor;
use crate::resilience::ResilienceManager;
use crate::stream::{StatusEvent, StatusEventType, StreamManager};
use crate::workflow::{WorkflowContext, WorkflowEngine};

pub use graph::{EndReason, GraphOutcome, Node};
pub use nodes::{compute_validation, decide_next_action, NodeDeps};
pub use planning::{DefaultPlanningStrategy, PlanningStrategy};
pub use report::{DELEGATION_TASKS_FILE, FINAL_REPORT_FILE, RESEARCH_PLAN_FILE};

/// 关闭时等待在途会话结束的上限
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 调研请求的可选背景
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub industry_sector: Option<String>,
    pub target_market: Option<String>,
    /// 为空时以查询本身作为唯一目标
    pub objectives: Vec<String>,
}

pub struct Orchestrator {
    config: AppConfig,
    deps: NodeDeps,
    workflow: WorkflowEngine,
    monitor: PerformanceMonitor,
    shutdown: Arc<ShutdownManager>,
    sessions: RwLock<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Self {
        let monitor = PerformanceMonitor::new(config.performance.clone());
        let mcp = Arc::new(McpServerManager::from_config(&config).with_monitor(monitor.clone()));
        let resilience = Arc::new(ResilienceManager::new(config.resilience.clone()));
        let deps = NodeDeps {
            config: config.research.clone(),
            mcp: Arc::clone(&mcp),
            resilience,
            planner: Arc::new(DefaultPlanningStrategy),
            streams: Arc::new(StreamManager::new()),
            monitor: config
                .research
                .enable_performance_monitoring
                .then(|| monitor.clone()),
        };
        Self {
            workflow: WorkflowEngine::new(mcp),
            config,
            deps,
            monitor,
            shutdown: Arc::new(ShutdownManager::new()),
            sessions: RwLock::new(HashSet::new()),
        }
    }

    /// 替换任务拆解策略
    pub fn with_planning_strategy(mut self, strategy: Arc<dyn PlanningStrategy>) -> Self {
        self.deps.planner = strategy;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn mcp(&self) -> &Arc<McpServerManager> {
        &self.deps.mcp
    }

    pub fn resilience(&self) -> &Arc<ResilienceManager> {
        &self.deps.resilience
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    pub fn streams(&self) -> &Arc<StreamManager> {
        &self.deps.streams
    }

    pub fn workflow(&self) -> &WorkflowEngine {
        &self.workflow
    }

    pub fn shutdown_manager(&self) -> &Arc<ShutdownManager> {
        &self.shutdown
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 运行一次完整调研并返回最终状态
    ///
    /// 工具失败在节点内降级，不会在这里报错；只有编排器已关闭、查询为空、会话 ID 冲突、
    /// 会话被取消或工作流追踪失败时返回 Err。
    pub async fn process_research_request(
        &self,
        query: &str,
        context: RequestContext,
        session_id: Option<String>,
    ) -> Result<ResearchState, OrchestratorError> {
        if self.shutdown.is_shutdown() {
            return Err(OrchestratorError::ShutDown);
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(OrchestratorError::EmptyQuery);
        }

        let session_id =
            session_id.unwrap_or_else(|| format!("session_{}", uuid::Uuid::new_v4()));
        if !self.sessions.write().await.insert(session_id.clone()) {
            return Err(OrchestratorError::SessionAlreadyRunning(session_id));
        }

        tracing::info!(session_id = %session_id, query, "Research request received");
        let result = self.run_session(&session_id, query, context).await;
        self.finish_session(&session_id, &result).await;
        result
    }

    async fn run_session(
        &self,
        session_id: &str,
        query: &str,
        context: RequestContext,
    ) -> Result<ResearchState, OrchestratorError> {
        let objectives = if context.objectives.is_empty() {
            vec![query.to_string()]
        } else {
            context.objectives
        };

        let mut state = ResearchState::new(session_id, query, objectives.clone());
        state.research_context.industry_sector = context.industry_sector.clone();
        state.research_context.target_market = context.target_market.clone();
        state.messages.insert(
            0,
            Message::system(format!(
                "Market research session {} with {} objective(s)",
                session_id,
                objectives.len()
            )),
        );

        let mut session = SessionContext::new(session_id, self.shutdown.session_token());

        if self.config.research.enable_performance_monitoring {
            self.monitor.start_session_monitoring(session_id);
        }

        let tracking = self.config.research.enable_workflow_tracking;
        if tracking {
            self.workflow
                .initialize_session(
                    session_id,
                    objectives,
                    WorkflowContext {
                        query: query.to_string(),
                        industry_sector: context.industry_sector,
                        target_market: context.target_market,
                    },
                )
                .await?;
        }

        let outcome = graph::run_graph(&self.deps, &mut session, &mut state).await;
        if outcome.end == EndReason::Cancelled {
            return Err(OrchestratorError::ShutDown);
        }

        if tracking {
            let transitions = self
                .workflow
                .execute_research_plan(session_id, &state)
                .await?;
            tracing::debug!(session_id, transitions = transitions.len(), "Workflow phases recorded");
            self.workflow.complete_research(session_id).await?;
        }

        tracing::info!(
            session_id,
            steps = outcome.steps,
            evidence = state.evidence.len(),
            confidence = state.validation_status.confidence_level,
            "Research request completed"
        );
        Ok(state)
    }

    /// 无论成功失败都执行的清理
    async fn finish_session(
        &self,
        session_id: &str,
        result: &Result<ResearchState, OrchestratorError>,
    ) {
        if self.config.research.enable_performance_monitoring {
            self.monitor.stop_session_monitoring(session_id);
        }
        if self.config.research.enable_workflow_tracking {
            self.workflow.remove(session_id).await;
        }

        if self.config.research.enable_streaming {
            let event = match result {
                Ok(state) => StatusEvent::new(
                    StatusEventType::Completion,
                    "orchestrator",
                    "completed",
                    format!("Research completed with {} evidence items", state.evidence.len()),
                )
                .with_data(json!({
                    "confidence_level": state.validation_status.confidence_level,
                    "files": state.files.keys().collect::<Vec<_>>(),
                })),
                Err(e) => StatusEvent::new(
                    StatusEventType::Error,
                    "orchestrator",
                    "failed",
                    e.to_string(),
                ),
            };
            self.deps.streams.broadcast(session_id, event);
        }
        self.deps.streams.close(session_id);

        self.sessions.write().await.remove(session_id);
    }

    /// 优雅关闭：取消在途会话并等待其结束，再停止监控与全部工具服务器
    pub async fn shutdown(&self) {
        self.shutdown.shutdown(ShutdownReason::Requested);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        loop {
            let remaining = self.sessions.read().await.len();
            if remaining == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(remaining, "Shutdown drain timed out");
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        self.monitor.shutdown();
        let stopped = self.deps.mcp.stop_all().await;
        tracing::info!(stopped_servers = stopped, "Orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ResearchContext, ResearchPhase, Todo, TodoStatus};

    /// 规划时触发编排器关闭
    struct ShutdownWhilePlanning(Arc<ShutdownManager>);

    impl PlanningStrategy for ShutdownWhilePlanning {
        fn decompose(&self, objectives: &[String], context: &ResearchContext) -> Vec<Todo> {
            self.0.shutdown(ShutdownReason::Requested);
            DefaultPlanningStrategy.decompose(objectives, context)
        }
    }

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.resilience.base_retry_delay_ms = 1;
        config.resilience.max_retry_delay_ms = 2;
        config.performance.collection_interval_ms = 20;
        config
    }

    #[tokio::test]
    async fn test_full_run_produces_report() {
        let orchestrator = Orchestrator::new(fast_config());
        let state = orchestrator
            .process_research_request(
                "Analyze the coffee market",
                RequestContext {
                    industry_sector: Some("Food & Beverage".into()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(state.count_todos(TodoStatus::Completed), 6);
        assert_eq!(state.research_context.phase, ResearchPhase::Reporting);
        assert_eq!(state.business_matrices.len(), 2);
        assert!(state.files.contains_key(FINAL_REPORT_FILE));
        assert!(state.files.contains_key(RESEARCH_PLAN_FILE));
        assert!(state.files.contains_key(DELEGATION_TASKS_FILE));
        assert!(state.validation_status.confidence_level <= 0.9);
        assert_eq!(orchestrator.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_rejects_empty_query_and_duplicate_session() {
        let orchestrator = Orchestrator::new(fast_config());
        let err = orchestrator
            .process_research_request("   ", RequestContext::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::EmptyQuery));

        orchestrator.sessions.write().await.insert("dup".into());
        let err = orchestrator
            .process_research_request("coffee", RequestContext::default(), Some("dup".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionAlreadyRunning(_)));
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_fail() {
        let orchestrator = Orchestrator::new(fast_config());
        orchestrator.shutdown().await;
        let err = orchestrator
            .process_research_request("coffee", RequestContext::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ShutDown));
    }

    #[tokio::test]
    async fn test_shutdown_during_run_returns_shut_down() {
        let orchestrator = Orchestrator::new(fast_config());
        let manager = Arc::clone(orchestrator.shutdown_manager());
        let orchestrator =
            orchestrator.with_planning_strategy(Arc::new(ShutdownWhilePlanning(manager)));
        let mut rx = orchestrator.streams().subscribe("interrupted");

        let err = orchestrator
            .process_research_request("coffee", RequestContext::default(), Some("interrupted".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ShutDown));
        assert_eq!(orchestrator.active_sessions().await, 0);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(last.unwrap().event_type, StatusEventType::Error);
    }

    #[tokio::test]
    async fn test_workflow_tracking_runs_alongside() {
        let mut config = fast_config();
        config.research.enable_workflow_tracking = true;
        let orchestrator = Orchestrator::new(config);
        let state = orchestrator
            .process_research_request("coffee", RequestContext::default(), Some("tracked".into()))
            .await
            .unwrap();
        assert_eq!(state.session_id(), "tracked");
        // 实例在请求结束时移除
        assert!(orchestrator.workflow().instance("tracked").await.is_none());
    }

    #[tokio::test]
    async fn test_stream_receives_completion() {
        let orchestrator = Orchestrator::new(fast_config());
        let mut rx = orchestrator.streams().subscribe("streamed");
        orchestrator
            .process_research_request("coffee", RequestContext::default(), Some("streamed".into()))
            .await
            .unwrap();

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(last.unwrap().event_type, StatusEventType::Completion);
    }
}
