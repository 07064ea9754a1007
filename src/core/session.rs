//! 会话上下文：单次调研请求私有的委派任务表与取消令牌
//!
//! 每次 process_research_request 创建一个 SessionContext，请求结束即丢弃；
//! 不同会话之间不共享 active tasks。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::state::{AgentType, Priority, Todo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Assigned,
    Completed,
    Failed,
}

/// 绑定到某个子代理的在途任务，由 Todo 派生
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationTask {
    pub id: String,
    pub todo_id: String,
    pub agent: AgentType,
    pub description: String,
    pub priority: Priority,
    pub status: DelegationStatus,
    pub dependencies: Vec<AgentType>,
    pub created_at: DateTime<Utc>,
}

impl DelegationTask {
    pub fn from_todo(todo: &Todo, agent: AgentType, dependencies: Vec<AgentType>) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            todo_id: todo.id.clone(),
            agent,
            description: todo.content.clone(),
            priority: todo.priority,
            status: DelegationStatus::Assigned,
            dependencies,
            created_at: Utc::now(),
        }
    }
}

/// 会话级上下文
#[derive(Debug)]
pub struct SessionContext {
    pub session_id: String,
    /// 委派任务 ID -> 任务
    pub delegation_tasks: HashMap<String, DelegationTask>,
    pub started_at: DateTime<Utc>,
    cancel_token: CancellationToken,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, cancel_token: CancellationToken) -> Self {
        Self {
            session_id: session_id.into(),
            delegation_tasks: HashMap::new(),
            started_at: Utc::now(),
            cancel_token,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 按 todo 查找尚在进行的委派任务
    pub fn task_for_todo(&self, todo_id: &str) -> Option<&DelegationTask> {
        self.delegation_tasks
            .values()
            .find(|t| t.todo_id == todo_id && t.status == DelegationStatus::Assigned)
    }

    pub fn set_task_status_for_todo(&mut self, todo_id: &str, status: DelegationStatus) {
        for task in self.delegation_tasks.values_mut() {
            if task.todo_id == todo_id && task.status == DelegationStatus::Assigned {
                task.status = status;
            }
        }
    }

    /// 按创建时间排序的任务列表（导出 delegation_tasks.json 用）
    pub fn tasks_sorted(&self) -> Vec<&DelegationTask> {
        let mut tasks: Vec<&DelegationTask> = self.delegation_tasks.values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_follows_todo() {
        let mut ctx = SessionContext::new("s1", CancellationToken::new());
        let todo = Todo::new("trend scan", Priority::High, Some(AgentType::MarketTrendAgent));
        let task = DelegationTask::from_todo(&todo, AgentType::MarketTrendAgent, vec![]);
        ctx.delegation_tasks.insert(task.id.clone(), task);

        assert!(ctx.task_for_todo(&todo.id).is_some());
        ctx.set_task_status_for_todo(&todo.id, DelegationStatus::Completed);
        assert!(ctx.task_for_todo(&todo.id).is_none());
    }

    #[test]
    fn test_cancel_propagates_from_parent() {
        let parent = CancellationToken::new();
        let ctx = SessionContext::new("s1", parent.child_token());
        assert!(!ctx.is_cancelled());
        parent.cancel();
        assert!(ctx.is_cancelled());
    }
}
