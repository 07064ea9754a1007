//! 调研状态定义：ResearchState 及其子记录
//!
//! 每个图节点读取当前 ResearchState，返回 StateUpdate（部分字段），由图运行时合并回状态。
//! agent_coordination / research_context / validation_status 都是非可选字段，任何节点都无法把它们置空。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Agent,
}

/// 消息日志中的一条记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 发出消息的节点或子代理
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            author: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn from_node(node: &str, content: impl Into<String>) -> Self {
        Self {
            author: Some(node.to_string()),
            ..Self::new(Role::Assistant, content)
        }
    }
}

/// 调研阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    Planning,
    DataCollection,
    Analysis,
    Synthesis,
    Reporting,
}

impl ResearchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ResearchPhase::Planning => "planning",
            ResearchPhase::DataCollection => "data_collection",
            ResearchPhase::Analysis => "analysis",
            ResearchPhase::Synthesis => "synthesis",
            ResearchPhase::Reporting => "reporting",
        }
    }
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 子代理类型（固定六种）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentType {
    CompetitorAnalysisAgent,
    MarketTrendAgent,
    ConsumerInsightsAgent,
    FinancialAnalysisAgent,
    TechnologyAssessmentAgent,
    RegulatoryAnalysisAgent,
}

impl AgentType {
    pub const ALL: [AgentType; 6] = [
        AgentType::CompetitorAnalysisAgent,
        AgentType::MarketTrendAgent,
        AgentType::ConsumerInsightsAgent,
        AgentType::FinancialAnalysisAgent,
        AgentType::TechnologyAssessmentAgent,
        AgentType::RegulatoryAnalysisAgent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::CompetitorAnalysisAgent => "CompetitorAnalysisAgent",
            AgentType::MarketTrendAgent => "MarketTrendAgent",
            AgentType::ConsumerInsightsAgent => "ConsumerInsightsAgent",
            AgentType::FinancialAnalysisAgent => "FinancialAnalysisAgent",
            AgentType::TechnologyAssessmentAgent => "TechnologyAssessmentAgent",
            AgentType::RegulatoryAnalysisAgent => "RegulatoryAnalysisAgent",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务优先级；Ord 按紧急程度递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// 资源分配权重
    pub fn weight(self) -> f64 {
        match self {
            Priority::Low => 1.0,
            Priority::Medium => 2.0,
            Priority::High => 3.0,
            Priority::Critical => 4.0,
        }
    }

    /// 任务超时倍数
    pub fn timeout_multiplier(self) -> f64 {
        match self {
            Priority::Low => 0.5,
            Priority::Medium => 1.0,
            Priority::High => 1.5,
            Priority::Critical => 2.0,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// 一个调研子任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub priority: Priority,
    pub assigned_agent: Option<AgentType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    pub fn new(content: impl Into<String>, priority: Priority, agent: Option<AgentType>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("todo_{}", uuid::Uuid::new_v4()),
            content: content.into(),
            status: TodoStatus::Pending,
            priority,
            assigned_agent: agent,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: TodoStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationMode {
    Parallel,
    Sequential,
    Hybrid,
}

impl Default for CoordinationMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

/// 代理间通信日志条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationMessage {
    pub from: String,
    pub to: Option<AgentType>,
    pub kind: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// 代理协调子记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCoordination {
    pub active_agents: Vec<AgentType>,
    pub agent_status: BTreeMap<AgentType, AgentStatus>,
    pub communication_log: Vec<CoordinationMessage>,
    /// 代理 -> 其依赖的代理
    pub dependency_graph: BTreeMap<AgentType, Vec<AgentType>>,
    /// 代理 -> 资源份额（0..=1）
    pub resource_allocation: BTreeMap<AgentType, f64>,
    pub coordination_mode: CoordinationMode,
}

impl AgentCoordination {
    pub fn is_busy(&self, agent: AgentType) -> bool {
        matches!(self.agent_status.get(&agent), Some(AgentStatus::Busy))
    }
}

/// orchestrator 节点的路由决策，直接写入状态供条件边读取
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Plan,
    Delegate,
    Synthesize,
    End,
}

/// 规划节点产出的调研计划
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub methodology: Vec<String>,
    /// 阶段 -> 预计时长描述
    pub timeline: BTreeMap<String, String>,
    pub deliverables: Vec<String>,
    pub success_criteria: Vec<String>,
}

/// 调研上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchContext {
    pub session_id: String,
    pub query: String,
    pub objectives: Vec<String>,
    pub phase: ResearchPhase,
    pub findings: Vec<String>,
    pub industry_sector: Option<String>,
    pub target_market: Option<String>,
    pub next_action: Option<NextAction>,
    pub research_plan: Option<ResearchPlan>,
    /// execute 节点已运行的轮数
    pub execution_rounds: u32,
    /// validate 节点重新排队任务的次数
    pub validation_retries: u32,
}

/// 竞争对手画像
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorProfile {
    pub name: String,
    pub market_position: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub source: String,
}

/// 市场趋势
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTrend {
    pub name: String,
    pub direction: String,
    pub impact: String,
    pub confidence: f64,
    pub source: String,
}

/// 通用情报条目（消费者洞察、财务、技术、监管）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceItem {
    pub topic: String,
    pub summary: String,
    pub source: String,
    pub confidence: f64,
}

/// 市场情报累积器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketIntelligence {
    pub competitors: Vec<CompetitorProfile>,
    pub trends: Vec<MarketTrend>,
    pub consumer_insights: Vec<IntelligenceItem>,
    pub financial_metrics: Vec<IntelligenceItem>,
    pub technology_signals: Vec<IntelligenceItem>,
    pub regulatory_factors: Vec<IntelligenceItem>,
}

impl MarketIntelligence {
    pub fn total_items(&self) -> usize {
        self.competitors.len()
            + self.trends.len()
            + self.consumer_insights.len()
            + self.financial_metrics.len()
            + self.technology_signals.len()
            + self.regulatory_factors.len()
    }
}

/// 带来源与评分的论据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub claim: String,
    pub source: String,
    pub relevance: f64,
    pub credibility: f64,
    pub agent: Option<AgentType>,
    pub todo_id: Option<String>,
    pub collected_at: DateTime<Utc>,
}

/// 校验状态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationStatus {
    /// 始终位于 [0, 0.9]
    pub confidence_level: f64,
    pub completion_rate: f64,
    pub cross_references_checked: bool,
    pub consistency_verified: bool,
    pub sources_verified: bool,
    pub expert_review_required: bool,
    pub validated_at: Option<DateTime<Utc>>,
}

/// 报告章节
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub id: String,
    pub title: String,
    pub content: String,
    pub order: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixType {
    Swot,
    PortersFiveForces,
}

impl MatrixType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatrixType::Swot => "swot",
            MatrixType::PortersFiveForces => "porters_five_forces",
        }
    }
}

impl fmt::Display for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 商业分析矩阵（SWOT、波特五力）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessMatrix {
    pub name: String,
    pub matrix_type: MatrixType,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// 贯穿所有图节点的聚合状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    pub messages: Vec<Message>,
    pub todos: Vec<Todo>,
    /// 虚拟文件系统：逻辑路径 -> 内容
    pub files: BTreeMap<String, String>,
    pub agent_coordination: AgentCoordination,
    pub research_context: ResearchContext,
    pub market_intelligence: MarketIntelligence,
    pub evidence: Vec<Evidence>,
    pub validation_status: ValidationStatus,
    pub report_sections: Vec<ReportSection>,
    pub business_matrices: Vec<BusinessMatrix>,
}

impl ResearchState {
    /// 为一次调研请求创建全新状态
    pub fn new(session_id: impl Into<String>, query: impl Into<String>, objectives: Vec<String>) -> Self {
        let query = query.into();
        Self {
            messages: vec![Message::user(query.clone())],
            todos: Vec::new(),
            files: BTreeMap::new(),
            agent_coordination: AgentCoordination::default(),
            research_context: ResearchContext {
                session_id: session_id.into(),
                query,
                objectives,
                phase: ResearchPhase::Planning,
                findings: Vec::new(),
                industry_sector: None,
                target_market: None,
                next_action: None,
                research_plan: None,
                execution_rounds: 0,
                validation_retries: 0,
            },
            market_intelligence: MarketIntelligence::default(),
            evidence: Vec::new(),
            validation_status: ValidationStatus::default(),
            report_sections: Vec::new(),
            business_matrices: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.research_context.session_id
    }

    pub fn count_todos(&self, status: TodoStatus) -> usize {
        self.todos.iter().filter(|t| t.status == status).count()
    }

    /// 已完成任务占比；没有任务时为 0
    pub fn completion_rate(&self) -> f64 {
        if self.todos.is_empty() {
            return 0.0;
        }
        self.count_todos(TodoStatus::Completed) as f64 / self.todos.len() as f64
    }
}

/// 节点返回的部分状态：Some 字段整体替换，new_messages 追加到消息日志
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub new_messages: Vec<Message>,
    pub todos: Option<Vec<Todo>>,
    pub files: Option<BTreeMap<String, String>>,
    pub agent_coordination: Option<AgentCoordination>,
    pub research_context: Option<ResearchContext>,
    pub market_intelligence: Option<MarketIntelligence>,
    pub evidence: Option<Vec<Evidence>>,
    pub validation_status: Option<ValidationStatus>,
    pub report_sections: Option<Vec<ReportSection>>,
    pub business_matrices: Option<Vec<BusinessMatrix>>,
}

impl StateUpdate {
    /// 合并到状态
    pub fn apply(self, state: &mut ResearchState) {
        state.messages.extend(self.new_messages);
        if let Some(todos) = self.todos {
            state.todos = todos;
        }
        if let Some(files) = self.files {
            state.files = files;
        }
        if let Some(coordination) = self.agent_coordination {
            state.agent_coordination = coordination;
        }
        if let Some(context) = self.research_context {
            state.research_context = context;
        }
        if let Some(intel) = self.market_intelligence {
            state.market_intelligence = intel;
        }
        if let Some(evidence) = self.evidence {
            state.evidence = evidence;
        }
        if let Some(validation) = self.validation_status {
            state.validation_status = validation;
        }
        if let Some(sections) = self.report_sections {
            state.report_sections = sections;
        }
        if let Some(matrices) = self.business_matrices {
            state.business_matrices = matrices;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_starts_in_planning() {
        let state = ResearchState::new("s1", "Analyze the coffee market", vec!["coffee".into()]);
        assert_eq!(state.research_context.phase, ResearchPhase::Planning);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.completion_rate(), 0.0);
    }

    #[test]
    fn test_update_replaces_only_some_fields() {
        let mut state = ResearchState::new("s1", "q", vec![]);
        let mut ctx = state.research_context.clone();
        ctx.phase = ResearchPhase::Synthesis;
        StateUpdate {
            new_messages: vec![Message::from_node("test", "hello")],
            research_context: Some(ctx),
            ..Default::default()
        }
        .apply(&mut state);

        assert_eq!(state.research_context.phase, ResearchPhase::Synthesis);
        assert_eq!(state.messages.len(), 2);
        assert!(state.todos.is_empty());
    }

    #[test]
    fn test_completion_rate() {
        let mut state = ResearchState::new("s1", "q", vec![]);
        let mut done = Todo::new("a", Priority::High, None);
        done.set_status(TodoStatus::Completed);
        state.todos = vec![done, Todo::new("b", Priority::Low, None)];
        assert!((state.completion_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_state_serializes_agent_keyed_maps() {
        let mut state = ResearchState::new("s1", "q", vec![]);
        state
            .agent_coordination
            .agent_status
            .insert(AgentType::MarketTrendAgent, AgentStatus::Busy);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"MarketTrendAgent\":\"busy\""));
        let back: ResearchState = serde_json::from_str(&json).unwrap();
        assert!(back.agent_coordination.is_busy(AgentType::MarketTrendAgent));
    }
}
