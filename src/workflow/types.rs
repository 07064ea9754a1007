//! 工作流类型定义
//!
//! WorkflowInstance 记录单个调研会话的阶段推进情况

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ResearchPhase;

/// 工作流状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// 已创建，等待执行
    Created,
    /// 正在推进阶段
    Running,
    /// 已完成
    Completed,
    /// 某个阶段钩子失败
    Failed,
}

/// 初始化时携带的调研背景
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub query: String,
    pub industry_sector: Option<String>,
    pub target_market: Option<String>,
}

/// 一次阶段切换
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: ResearchPhase,
    pub to: ResearchPhase,
    pub at: DateTime<Utc>,
}

/// 单个会话的工作流实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub session_id: String,
    pub objectives: Vec<String>,
    pub context: WorkflowContext,
    pub phase: ResearchPhase,
    pub status: WorkflowStatus,
    pub transitions: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(session_id: String, objectives: Vec<String>, context: WorkflowContext) -> Self {
        Self {
            session_id,
            objectives,
            context,
            phase: ResearchPhase::Planning,
            status: WorkflowStatus::Created,
            transitions: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// 切换阶段并记录；相同阶段不记录
    pub fn advance_to(&mut self, phase: ResearchPhase) {
        if self.phase == phase {
            return;
        }
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to: phase,
            at: Utc::now(),
        });
        self.phase = phase;
    }
}

/// 工作流错误类型
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow session not found: {0}")]
    SessionNotFound(String),
    #[error("Workflow session already exists: {0}")]
    SessionExists(String),
    #[error("Required MCP server unavailable: {0}")]
    ServerUnavailable(String),
    #[error("Phase '{phase}' failed: {message}")]
    PhaseFailed { phase: ResearchPhase, message: String },
    #[error("Workflow already completed: {0}")]
    AlreadyCompleted(String),
}
