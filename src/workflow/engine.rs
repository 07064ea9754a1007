//! 工作流引擎
//!
//! 按会话维护 WorkflowInstance，依次推进 planning → data_collection → analysis → synthesis，
//! 每个阶段调用 PhaseHook（默认空实现）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::core::{ResearchPhase, ResearchState};
use crate::mcp::config::{REASONING_SERVER, WEB_SEARCH_SERVER};
use crate::mcp::McpServerManager;
use crate::workflow::types::*;

/// execute_research_plan 依次经过的阶段
pub const PLAN_PHASES: [ResearchPhase; 4] = [
    ResearchPhase::Planning,
    ResearchPhase::DataCollection,
    ResearchPhase::Analysis,
    ResearchPhase::Synthesis,
];

/// 阶段钩子 trait
#[async_trait]
pub trait PhaseHook: Send + Sync {
    /// 进入某阶段时调用；返回错误会使工作流失败
    async fn on_phase(
        &self,
        _session_id: &str,
        _phase: ResearchPhase,
        _state: &ResearchState,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 默认钩子：什么都不做
pub struct NoopPhaseHook;

impl PhaseHook for NoopPhaseHook {}

/// 工作流引擎
pub struct WorkflowEngine {
    mcp: Arc<McpServerManager>,
    instances: RwLock<HashMap<String, WorkflowInstance>>,
    hook: Arc<dyn PhaseHook>,
}

impl WorkflowEngine {
    pub fn new(mcp: Arc<McpServerManager>) -> Self {
        Self::with_hook(mcp, Arc::new(NoopPhaseHook))
    }

    pub fn with_hook(mcp: Arc<McpServerManager>, hook: Arc<dyn PhaseHook>) -> Self {
        Self {
            mcp,
            instances: RwLock::new(HashMap::new()),
            hook,
        }
    }

    /// 新建会话并返回生成的 session_id
    pub async fn initialize_research(
        &self,
        objectives: Vec<String>,
        context: WorkflowContext,
    ) -> Result<String, WorkflowError> {
        let session_id = format!("research_{}", uuid::Uuid::new_v4());
        self.initialize_session(&session_id, objectives, context)
            .await?;
        Ok(session_id)
    }

    /// 用调用方给定的 session_id 建立实例，并启动检索与推理服务器
    pub async fn initialize_session(
        &self,
        session_id: &str,
        objectives: Vec<String>,
        context: WorkflowContext,
    ) -> Result<(), WorkflowError> {
        if self.instances.read().await.contains_key(session_id) {
            return Err(WorkflowError::SessionExists(session_id.to_string()));
        }

        for server in [WEB_SEARCH_SERVER, REASONING_SERVER] {
            if !self.mcp.start_server(server).await {
                return Err(WorkflowError::ServerUnavailable(server.to_string()));
            }
        }

        let instance = WorkflowInstance::new(session_id.to_string(), objectives, context);
        self.instances
            .write()
            .await
            .insert(session_id.to_string(), instance);
        tracing::info!(session_id, "Workflow initialized");
        Ok(())
    }

    /// 依次推进四个阶段，返回本次产生的阶段切换
    pub async fn execute_research_plan(
        &self,
        session_id: &str,
        state: &ResearchState,
    ) -> Result<Vec<PhaseTransition>, WorkflowError> {
        let already_recorded = {
            let mut instances = self.instances.write().await;
            let instance = instances
                .get_mut(session_id)
                .ok_or_else(|| WorkflowError::SessionNotFound(session_id.to_string()))?;
            if instance.status == WorkflowStatus::Completed {
                return Err(WorkflowError::AlreadyCompleted(session_id.to_string()));
            }
            instance.status = WorkflowStatus::Running;
            instance.transitions.len()
        };

        for phase in PLAN_PHASES {
            self.set_phase(session_id, phase).await?;
            tracing::debug!(session_id, phase = %phase, "Running phase hook");

            if let Err(e) = self.hook.on_phase(session_id, phase, state).await {
                tracing::warn!(session_id, phase = %phase, error = %e, "Phase hook failed");
                if let Some(instance) = self.instances.write().await.get_mut(session_id) {
                    instance.status = WorkflowStatus::Failed;
                }
                return Err(WorkflowError::PhaseFailed {
                    phase,
                    message: format!("{:#}", e),
                });
            }
        }

        let instances = self.instances.read().await;
        let instance = instances
            .get(session_id)
            .ok_or_else(|| WorkflowError::SessionNotFound(session_id.to_string()))?;
        Ok(instance.transitions[already_recorded..].to_vec())
    }

    /// 进入 reporting 并标记完成
    pub async fn complete_research(&self, session_id: &str) -> Result<WorkflowInstance, WorkflowError> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(session_id)
            .ok_or_else(|| WorkflowError::SessionNotFound(session_id.to_string()))?;
        instance.advance_to(ResearchPhase::Reporting);
        instance.status = WorkflowStatus::Completed;
        instance.completed_at = Some(Utc::now());
        tracing::info!(session_id, "Workflow completed");
        Ok(instance.clone())
    }

    pub async fn instance(&self, session_id: &str) -> Option<WorkflowInstance> {
        self.instances.read().await.get(session_id).cloned()
    }

    /// 移除会话实例（请求结束时调用）
    pub async fn remove(&self, session_id: &str) -> Option<WorkflowInstance> {
        self.instances.write().await.remove(session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.instances.read().await.len()
    }

    async fn set_phase(&self, session_id: &str, phase: ResearchPhase) -> Result<(), WorkflowError> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(session_id)
            .ok_or_else(|| WorkflowError::SessionNotFound(session_id.to_string()))?;
        instance.advance_to(phase);
        Ok(())
    }
}
