//! 调研图运行时
//!
//! 节点固定为 orchestrator / planner / delegate / execute / validate / synthesize / report / end；
//! 条件边只读取状态（next_action、todo 状态、计数器），每条边都有可达的 end 或 continue 默认分支。

use std::fmt;

use serde::Serialize;

use crate::config::ResearchSection;
use crate::core::{
    AgentStatus, DelegationStatus, NextAction, ResearchState, SessionContext, TodoStatus,
};
use crate::monitor::SessionActivity;
use crate::orchestrator::nodes::{self, NodeDeps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Orchestrator,
    Planner,
    Delegate,
    Execute,
    Validate,
    Synthesize,
    Report,
    End,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Node::Orchestrator => "orchestrator",
            Node::Planner => "planner",
            Node::Delegate => "delegate",
            Node::Execute => "execute",
            Node::Validate => "validate",
            Node::Synthesize => "synthesize",
            Node::Report => "report",
            Node::End => "end",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 图结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    StepLimit,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphOutcome {
    pub steps: usize,
    pub visited: Vec<Node>,
    pub end: EndReason,
}

/// orchestrator 节点的出边：读取写入状态的 next_action
pub fn route_from_orchestrator(state: &ResearchState) -> Node {
    match state.research_context.next_action {
        Some(NextAction::Plan) => Node::Planner,
        Some(NextAction::Delegate) => Node::Delegate,
        Some(NextAction::Synthesize) => Node::Synthesize,
        Some(NextAction::End) | None => Node::End,
    }
}

pub fn after_execution(state: &ResearchState, config: &ResearchSection) -> Node {
    let pending = state.count_todos(TodoStatus::Pending);
    let in_progress = state.count_todos(TodoStatus::InProgress);
    if pending == 0 && in_progress == 0 {
        return if config.enable_validation {
            Node::Validate
        } else {
            Node::Synthesize
        };
    }
    if state.research_context.execution_rounds >= config.max_execution_rounds {
        tracing::warn!(
            session_id = state.session_id(),
            pending,
            in_progress,
            "Execution round limit reached, synthesizing partial results"
        );
        return Node::Synthesize;
    }
    Node::Delegate
}

/// validate 重新排队了任务则回到 execute
pub fn after_validation(state: &ResearchState) -> Node {
    if state.count_todos(TodoStatus::InProgress) > 0 {
        Node::Execute
    } else {
        Node::Synthesize
    }
}

pub fn after_synthesis(config: &ResearchSection) -> Node {
    if config.enable_report_generation {
        Node::Report
    } else {
        Node::Orchestrator
    }
}

/// 给定刚运行完的节点，选出下一个节点
pub fn next_node(node: Node, state: &ResearchState, config: &ResearchSection) -> Node {
    match node {
        Node::Orchestrator => route_from_orchestrator(state),
        Node::Planner => Node::Delegate,
        Node::Delegate => Node::Execute,
        Node::Execute => after_execution(state, config),
        Node::Validate => after_validation(state),
        Node::Synthesize => after_synthesis(config),
        Node::Report | Node::End => Node::End,
    }
}

fn session_activity(session: &SessionContext, state: &ResearchState) -> SessionActivity {
    SessionActivity {
        active_agents: state
            .agent_coordination
            .agent_status
            .values()
            .filter(|s| **s == AgentStatus::Busy)
            .count(),
        completed_tasks: state.count_todos(TodoStatus::Completed),
        pending_tasks: state.count_todos(TodoStatus::Pending)
            + state.count_todos(TodoStatus::InProgress),
        failed_tasks: session
            .delegation_tasks
            .values()
            .filter(|t| t.status == DelegationStatus::Failed)
            .count(),
        confidence_level: state.validation_status.confidence_level,
        evidence_count: state.evidence.len(),
    }
}

/// 从 orchestrator 节点开始运行，直到 end、取消或步数上限
pub async fn run_graph(
    deps: &NodeDeps,
    session: &mut SessionContext,
    state: &mut ResearchState,
) -> GraphOutcome {
    let session_id = session.session_id.clone();
    let max_steps = deps.config.max_graph_steps.max(1);
    let mut node = Node::Orchestrator;
    let mut visited = Vec::new();

    let end = loop {
        if node == Node::End {
            break EndReason::Completed;
        }
        if session.is_cancelled() {
            tracing::info!(session_id = %session_id, node = %node, "Session cancelled");
            break EndReason::Cancelled;
        }
        if visited.len() >= max_steps {
            tracing::warn!(session_id = %session_id, max_steps, "Graph step limit reached");
            break EndReason::StepLimit;
        }

        tracing::debug!(session_id = %session_id, node = %node, step = visited.len() + 1, "Running node");
        let update = match node {
            Node::Orchestrator => nodes::orchestrate(state),
            Node::Planner => nodes::plan(deps, state).await,
            Node::Delegate => nodes::delegate(deps, session, state).await,
            Node::Execute => nodes::execute(deps, session, state).await,
            Node::Validate => nodes::validate(deps, state).await,
            Node::Synthesize => nodes::synthesize(deps, state).await,
            Node::Report => nodes::report(deps, state).await,
            Node::End => break EndReason::Completed,
        };
        update.apply(state);
        visited.push(node);

        if let Some(monitor) = &deps.monitor {
            monitor.update_session_activity(&session_id, session_activity(session, state));
        }

        node = next_node(node, state, &deps.config);
    };

    tracing::info!(
        session_id = %session_id,
        steps = visited.len(),
        end = ?end,
        "Research graph finished"
    );
    GraphOutcome {
        steps: visited.len(),
        visited,
        end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use crate::config::AppConfig;
    use crate::core::{Priority, ResearchContext, Todo};
    use crate::mcp::McpServerManager;
    use crate::orchestrator::planning::{DefaultPlanningStrategy, PlanningStrategy};
    use crate::resilience::ResilienceManager;
    use crate::stream::StreamManager;

    /// 拆解完任务后取消会话的策略
    struct CancelAfterPlanning(CancellationToken);

    impl PlanningStrategy for CancelAfterPlanning {
        fn decompose(&self, objectives: &[String], context: &ResearchContext) -> Vec<Todo> {
            self.0.cancel();
            DefaultPlanningStrategy.decompose(objectives, context)
        }
    }

    fn state_with(statuses: &[TodoStatus]) -> ResearchState {
        let mut state = ResearchState::new("s1", "q", vec![]);
        for status in statuses {
            let mut t = Todo::new("t", Priority::Medium, None);
            t.set_status(*status);
            state.todos.push(t);
        }
        state
    }

    #[test]
    fn test_all_done_routes_to_validate() {
        let config = ResearchSection::default();
        let state = state_with(&[TodoStatus::Completed, TodoStatus::Completed]);
        assert_eq!(after_execution(&state, &config), Node::Validate);

        let mut no_validation = config.clone();
        no_validation.enable_validation = false;
        assert_eq!(after_execution(&state, &no_validation), Node::Synthesize);
    }

    #[test]
    fn test_unfinished_work_loops_until_round_limit() {
        let config = ResearchSection::default();
        let mut state = state_with(&[TodoStatus::Completed, TodoStatus::Pending]);
        assert_eq!(after_execution(&state, &config), Node::Delegate);

        state.research_context.execution_rounds = config.max_execution_rounds;
        assert_eq!(after_execution(&state, &config), Node::Synthesize);
    }

    #[test]
    fn test_orchestrator_edges() {
        let mut state = ResearchState::new("s1", "q", vec![]);
        assert_eq!(route_from_orchestrator(&state), Node::End);
        state.research_context.next_action = Some(NextAction::Plan);
        assert_eq!(route_from_orchestrator(&state), Node::Planner);
        state.research_context.next_action = Some(NextAction::Synthesize);
        assert_eq!(route_from_orchestrator(&state), Node::Synthesize);
    }

    #[test]
    fn test_validation_retry_edge() {
        assert_eq!(
            after_validation(&state_with(&[TodoStatus::InProgress])),
            Node::Execute
        );
        assert_eq!(
            after_validation(&state_with(&[TodoStatus::Completed])),
            Node::Synthesize
        );
    }

    #[test]
    fn test_synthesis_without_report_returns_to_orchestrator() {
        let mut config = ResearchSection::default();
        assert_eq!(after_synthesis(&config), Node::Report);
        config.enable_report_generation = false;
        assert_eq!(after_synthesis(&config), Node::Orchestrator);
        assert_eq!(next_node(Node::Report, &ResearchState::new("s", "q", vec![]), &config), Node::End);
    }

    #[tokio::test]
    async fn test_cancellation_stops_at_next_node_boundary() {
        let token = CancellationToken::new();
        let config = AppConfig::default();
        let deps = NodeDeps {
            config: config.research.clone(),
            mcp: Arc::new(McpServerManager::from_config(&config)),
            resilience: Arc::new(ResilienceManager::new(config.resilience.clone())),
            planner: Arc::new(CancelAfterPlanning(token.clone())),
            streams: Arc::new(StreamManager::new()),
            monitor: None,
        };
        let mut session = SessionContext::new("s1", token);
        let mut state = ResearchState::new("s1", "coffee", vec!["coffee".into()]);

        let outcome = run_graph(&deps, &mut session, &mut state).await;
        assert_eq!(outcome.end, EndReason::Cancelled);
        assert_eq!(outcome.visited, vec![Node::Orchestrator, Node::Planner]);
        assert_eq!(state.todos.len(), 6);
        assert!(session.delegation_tasks.is_empty());
        assert!(!state.files.contains_key(crate::orchestrator::FINAL_REPORT_FILE));
    }
}
