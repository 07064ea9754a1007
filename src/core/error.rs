//! 编排层错误类型与错误分类
//!
//! ErrorCategory 供 ResilienceManager 决定是否重试；OrchestratorError 是 process_research_request 唯一会向外抛出的错误。

use serde::Serialize;
use thiserror::Error;

use crate::workflow::WorkflowError;

/// 错误分类：致命（不重试）/ 可重试（网络、超时、限流）/ 降级（未识别，默认按可重试处理）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Fatal,
    Retryable,
    Degraded,
}

impl ErrorCategory {
    pub fn should_retry(self) -> bool {
        !matches!(self, ErrorCategory::Fatal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Fatal => "fatal",
            ErrorCategory::Retryable => "retryable",
            ErrorCategory::Degraded => "degraded",
        }
    }
}

/// 编排器对外错误：节点内部的工具失败会被降级处理，只有图本身无法运行时才会返回
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Orchestrator is shut down")]
    ShutDown,

    #[error("Session already running: {0}")]
    SessionAlreadyRunning(String),

    #[error("Empty research query")]
    EmptyQuery,

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fatal_is_not_retried() {
        assert!(!ErrorCategory::Fatal.should_retry());
        assert!(ErrorCategory::Retryable.should_retry());
        assert!(ErrorCategory::Degraded.should_retry());
    }

    #[test]
    fn test_duplicate_session_message() {
        let err = OrchestratorError::SessionAlreadyRunning("s1".to_string());
        assert_eq!(err.to_string(), "Session already running: s1");
    }
}
