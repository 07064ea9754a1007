//! 核心层：错误分类、调研状态模型、会话上下文、优雅关闭

pub mod error;
pub mod session;
pub mod shutdown;
pub mod state;

pub use error::{ErrorCategory, OrchestratorError};
pub use session::{DelegationStatus, DelegationTask, SessionContext};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{
    AgentCoordination, AgentStatus, AgentType, BusinessMatrix, CompetitorProfile,
    CoordinationMessage, CoordinationMode, Evidence, IntelligenceItem, MarketIntelligence,
    MarketTrend, MatrixType, Message, NextAction, Priority, ReportSection, ResearchContext,
    ResearchPhase, ResearchPlan, ResearchState, Role, StateUpdate, Todo, TodoStatus,
    ValidationStatus,
};
