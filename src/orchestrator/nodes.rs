//! 图节点实现
//!
//! 每个节点读取当前 ResearchState，返回 StateUpdate；工具调用失败一律在节点内降级处理，
//! 不会让整个图中断。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{json, Value};

use crate::config::ResearchSection;
use crate::core::{
    AgentStatus, AgentType, CoordinationMessage, CoordinationMode, DelegationStatus,
    DelegationTask, Evidence, Message, NextAction, ResearchPhase, ResearchState, Role,
    SessionContext, StateUpdate, Todo, TodoStatus, ValidationStatus,
};
use crate::mcp::config::{REASONING_SERVER, REPORT_SERVER, WEB_SEARCH_SERVER};
use crate::mcp::McpServerManager;
use crate::monitor::PerformanceMonitor;
use crate::orchestrator::agents::{allocate, dependencies_of, infer_agent, infer_mode};
use crate::orchestrator::analysis::{build_porters_five_forces, build_swot};
use crate::orchestrator::intelligence::{
    apply_findings, evidence_from_hits, parse_hits, SEARCH_SOURCE,
};
use crate::orchestrator::planning::{build_research_plan, research_subject, PlanningStrategy};
use crate::orchestrator::report::{
    build_sections, render_markdown, template_summary, DELEGATION_TASKS_FILE, FINAL_REPORT_FILE,
    RESEARCH_PLAN_FILE,
};
use crate::resilience::{ResilienceError, ResilienceManager};
use crate::stream::{StatusEvent, StatusEventType, StreamManager};

/// 每次检索请求的结果数
const SEARCH_MAX_RESULTS: usize = 5;
const ORCHESTRATOR_AGENT_ID: &str = "orchestrator";

/// 节点共享的依赖
#[derive(Clone)]
pub struct NodeDeps {
    pub config: ResearchSection,
    pub mcp: Arc<McpServerManager>,
    pub resilience: Arc<ResilienceManager>,
    pub planner: Arc<dyn PlanningStrategy>,
    pub streams: Arc<StreamManager>,
    pub monitor: Option<PerformanceMonitor>,
}

impl NodeDeps {
    fn emit(&self, session_id: &str, event: StatusEvent) {
        if self.config.enable_streaming {
            self.streams.broadcast(session_id, event);
        }
    }

    /// 经过 ResilienceManager 调用一个 MCP 工具
    async fn call_tool(
        &self,
        state: &ResearchState,
        server: &str,
        operation: &str,
        tool: &str,
        params: Value,
    ) -> Result<Value, ResilienceError> {
        let mcp = self.mcp.as_ref();
        self.resilience
            .execute_mcp_operation(
                server,
                operation,
                move || {
                    let params = params.clone();
                    async move {
                        mcp.execute_tool_call(tool, params, state)
                            .await
                            .map_err(anyhow::Error::from)
                    }
                },
                None,
            )
            .await
    }
}

/// 路由决策（纯函数，只读状态）
pub fn decide_next_action(state: &ResearchState) -> NextAction {
    let ctx = &state.research_context;
    if ctx.phase == ResearchPhase::Reporting {
        return NextAction::End;
    }
    if state.todos.is_empty() {
        // 已规划但没有任何任务时直接结束，避免反复规划
        return if ctx.research_plan.is_none() {
            NextAction::Plan
        } else {
            NextAction::End
        };
    }
    if state
        .todos
        .iter()
        .any(|t| matches!(t.status, TodoStatus::Pending | TodoStatus::InProgress))
    {
        return NextAction::Delegate;
    }
    if !state.evidence.is_empty() && ctx.phase != ResearchPhase::Synthesis {
        return NextAction::Synthesize;
    }
    NextAction::End
}

pub fn orchestrate(state: &ResearchState) -> StateUpdate {
    let action = decide_next_action(state);
    tracing::debug!(session_id = state.session_id(), action = ?action, "Orchestrator decision");
    let mut ctx = state.research_context.clone();
    ctx.next_action = Some(action);
    StateUpdate {
        research_context: Some(ctx),
        ..Default::default()
    }
}

pub async fn plan(deps: &NodeDeps, state: &ResearchState) -> StateUpdate {
    let ctx = &state.research_context;
    let session_id = state.session_id();
    let subject = research_subject(&ctx.objectives, ctx);
    let mut messages = Vec::new();

    if deps.config.enable_deep_thinking {
        let params = json!({
            "prompt": format!("Plan a market research study on: {}", subject),
            "steps": deps.config.thinking_depth.reasoning_steps(),
        });
        match deps
            .call_tool(state, REASONING_SERVER, "plan", "deep_reasoning", params)
            .await
        {
            Ok(_) => tracing::debug!(session_id, "Deep reasoning finished for planning"),
            Err(e) => tracing::warn!(session_id, error = %e, "Deep reasoning failed, planning without it"),
        }
    }

    let todos = deps.planner.decompose(&ctx.objectives, ctx);
    let research_plan = build_research_plan(ctx, deps.config.validation_threshold);
    tracing::info!(session_id, todos = todos.len(), "Research plan created");

    let mut files = state.files.clone();
    let plan_doc = json!({
        "query": ctx.query,
        "objectives": ctx.objectives,
        "plan": research_plan,
        "todos": todos,
    });
    files.insert(
        RESEARCH_PLAN_FILE.to_string(),
        serde_json::to_string_pretty(&plan_doc).unwrap_or_default(),
    );

    let mut new_ctx = ctx.clone();
    new_ctx.research_plan = Some(research_plan);
    new_ctx.phase = ResearchPhase::DataCollection;
    messages.push(Message::from_node(
        "planner",
        format!("Planned {} research tasks for {}", todos.len(), subject),
    ));

    deps.emit(
        session_id,
        StatusEvent::new(
            StatusEventType::TaskProgress,
            ORCHESTRATOR_AGENT_ID,
            "planned",
            format!("Research plan created with {} tasks", todos.len()),
        )
        .with_data(json!({ "tasks": todos.len() })),
    );

    StateUpdate {
        new_messages: messages,
        todos: Some(todos),
        files: Some(files),
        research_context: Some(new_ctx),
        ..Default::default()
    }
}

fn by_priority(todos: &[Todo], status: TodoStatus) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..todos.len())
        .filter(|&i| todos[i].status == status)
        .collect();
    // 稳定排序，同优先级保持创建顺序
    idx.sort_by(|&a, &b| todos[b].priority.cmp(&todos[a].priority));
    idx
}

fn export_tasks(files: &mut BTreeMap<String, String>, session: &SessionContext) {
    files.insert(
        DELEGATION_TASKS_FILE.to_string(),
        serde_json::to_string_pretty(&session.tasks_sorted()).unwrap_or_default(),
    );
}

pub async fn delegate(
    deps: &NodeDeps,
    session: &mut SessionContext,
    state: &ResearchState,
) -> StateUpdate {
    let session_id = state.session_id();
    let mut todos = state.todos.clone();
    let mut coord = state.agent_coordination.clone();
    let parallel = coord.coordination_mode == CoordinationMode::Parallel;
    let mut new_tasks: Vec<DelegationTask> = Vec::new();

    for i in by_priority(&todos, TodoStatus::Pending) {
        let agent = todos[i]
            .assigned_agent
            .unwrap_or_else(|| infer_agent(&todos[i].content));
        let claimed = new_tasks.iter().any(|t| t.agent == agent);
        if !parallel && (coord.is_busy(agent) || claimed) {
            tracing::debug!(session_id, agent = %agent, "Agent busy, deferring task");
            continue;
        }

        let todo = &mut todos[i];
        todo.assigned_agent = Some(agent);
        todo.set_status(TodoStatus::InProgress);

        let dependencies = dependencies_of(agent);
        let task = DelegationTask::from_todo(todo, agent, dependencies.clone());

        coord.agent_status.insert(agent, AgentStatus::Busy);
        if !coord.active_agents.contains(&agent) {
            coord.active_agents.push(agent);
        }
        coord.dependency_graph.insert(agent, dependencies);
        coord.communication_log.push(CoordinationMessage {
            from: ORCHESTRATOR_AGENT_ID.to_string(),
            to: Some(agent),
            kind: "delegation".to_string(),
            content: task.description.clone(),
            timestamp: Utc::now(),
        });

        deps.emit(
            session_id,
            StatusEvent::new(
                StatusEventType::AgentStatus,
                agent.as_str(),
                "busy",
                format!("Delegated: {}", task.description),
            )
            .with_data(json!({
                "task_id": task.id,
                "todo_id": task.todo_id,
                "priority": task.priority,
            })),
        );

        session.delegation_tasks.insert(task.id.clone(), task.clone());
        new_tasks.push(task);
    }

    if let Some(mode) = infer_mode(&new_tasks) {
        coord.coordination_mode = mode;
        coord.resource_allocation = allocate(&new_tasks);
    }
    tracing::info!(
        session_id,
        delegated = new_tasks.len(),
        mode = ?coord.coordination_mode,
        "Tasks delegated"
    );

    let mut files = state.files.clone();
    export_tasks(&mut files, session);

    StateUpdate {
        new_messages: vec![Message::from_node(
            "delegate",
            format!("Delegated {} tasks", new_tasks.len()),
        )],
        todos: Some(todos),
        files: Some(files),
        agent_coordination: Some(coord),
        ..Default::default()
    }
}

/// 按依赖规则挑出本轮可执行的在途任务；非 parallel 模式下依赖代理尚未完成的任务延后
fn select_batch(todos: &[Todo], mode: CoordinationMode, limit: usize) -> Vec<usize> {
    let candidates = by_priority(todos, TodoStatus::InProgress);
    if mode == CoordinationMode::Parallel {
        return candidates.into_iter().take(limit).collect();
    }
    let unfinished = |agent: AgentType| {
        todos
            .iter()
            .any(|t| t.assigned_agent == Some(agent) && t.status != TodoStatus::Completed)
    };
    let ready: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| {
            let agent = todos[i]
                .assigned_agent
                .unwrap_or_else(|| infer_agent(&todos[i].content));
            dependencies_of(agent).into_iter().all(|d| !unfinished(d))
        })
        .collect();
    // 全部被依赖卡住时不再等待
    let batch = if ready.is_empty() { candidates } else { ready };
    batch.into_iter().take(limit).collect()
}

pub async fn execute(
    deps: &NodeDeps,
    session: &mut SessionContext,
    state: &ResearchState,
) -> StateUpdate {
    let session_id = state.session_id();
    let mut todos = state.todos.clone();
    let mut coord = state.agent_coordination.clone();
    let mut intel = state.market_intelligence.clone();
    let mut evidence: Vec<Evidence> = state.evidence.clone();
    let mut ctx = state.research_context.clone();

    let batch = select_batch(
        &todos,
        coord.coordination_mode,
        deps.config.max_concurrent_tasks.max(1),
    );

    // validate 重新排队的任务没有在途委派记录，补一条
    for &i in &batch {
        if session.task_for_todo(&todos[i].id).is_none() {
            let agent = todos[i]
                .assigned_agent
                .unwrap_or_else(|| infer_agent(&todos[i].content));
            let task = DelegationTask::from_todo(&todos[i], agent, dependencies_of(agent));
            session.delegation_tasks.insert(task.id.clone(), task);
        }
    }

    tracing::info!(session_id, tasks = batch.len(), round = ctx.execution_rounds + 1, "Executing tasks");

    let jobs: Vec<(usize, AgentType, Todo)> = batch
        .iter()
        .map(|&i| {
            let agent = todos[i]
                .assigned_agent
                .unwrap_or_else(|| infer_agent(&todos[i].content));
            (i, agent, todos[i].clone())
        })
        .collect();

    let results = join_all(jobs.into_iter().map(move |(i, agent, todo)| async move {
        deps.emit(
            session_id,
            StatusEvent::new(
                StatusEventType::TaskProgress,
                agent.as_str(),
                "running",
                format!("Researching: {}", todo.content),
            ),
        );
        let params = json!({
            "query": todo.content,
            "max_results": SEARCH_MAX_RESULTS,
            "search_depth": "advanced",
        });
        let result = deps
            .call_tool(state, WEB_SEARCH_SERVER, "search", "web_search", params)
            .await;
        (i, agent, result)
    }))
    .await;

    let mut messages = Vec::new();
    for (i, agent, result) in results {
        let todo_id = todos[i].id.clone();
        match result {
            Ok(response) => {
                let hits = parse_hits(&response);
                let collected = evidence_from_hits(agent, &todos[i], &hits);
                apply_findings(&mut intel, agent, &todos[i], &hits);
                ctx.findings.push(format!(
                    "{}: {} evidence item(s) for \"{}\"",
                    agent,
                    collected.len(),
                    todos[i].content
                ));
                let count = collected.len();
                evidence.extend(collected);

                todos[i].set_status(TodoStatus::Completed);
                coord.agent_status.insert(agent, AgentStatus::Completed);
                coord.communication_log.push(CoordinationMessage {
                    from: agent.as_str().to_string(),
                    to: None,
                    kind: "result".to_string(),
                    content: format!("Completed with {} evidence item(s)", count),
                    timestamp: Utc::now(),
                });
                session.set_task_status_for_todo(&todo_id, DelegationStatus::Completed);
                messages.push(Message {
                    author: Some(agent.as_str().to_string()),
                    ..Message::new(Role::Agent, format!("Completed: {}", todos[i].content))
                });
                deps.emit(
                    session_id,
                    StatusEvent::new(
                        StatusEventType::TaskProgress,
                        agent.as_str(),
                        "completed",
                        format!("Completed: {}", todos[i].content),
                    )
                    .with_data(json!({ "todo_id": todo_id, "evidence": count })),
                );
            }
            Err(e) => {
                tracing::warn!(session_id, agent = %agent, todo_id = %todo_id, error = %e, "Task failed, returning to pending");
                todos[i].set_status(TodoStatus::Pending);
                coord.agent_status.insert(agent, AgentStatus::Idle);
                session.set_task_status_for_todo(&todo_id, DelegationStatus::Failed);
                deps.emit(
                    session_id,
                    StatusEvent::new(
                        StatusEventType::Error,
                        agent.as_str(),
                        "failed",
                        e.to_string(),
                    )
                    .with_data(json!({ "todo_id": todo_id })),
                );
            }
        }
    }

    ctx.execution_rounds += 1;
    if !todos.is_empty() && todos.iter().all(|t| t.status == TodoStatus::Completed) {
        ctx.phase = ResearchPhase::Analysis;
    }

    let mut files = state.files.clone();
    export_tasks(&mut files, session);

    StateUpdate {
        new_messages: messages,
        todos: Some(todos),
        files: Some(files),
        agent_coordination: Some(coord),
        research_context: Some(ctx),
        market_intelligence: Some(intel),
        evidence: Some(evidence),
        ..Default::default()
    }
}

/// 置信度 = min(0.9, 论据数 × 0.1 + 完成率 × 0.5)
pub fn compute_validation(state: &ResearchState, threshold: f64) -> ValidationStatus {
    let evidence = &state.evidence;
    let completion_rate = state.completion_rate();
    let confidence_level = (evidence.len() as f64 * 0.1 + completion_rate * 0.5).min(0.9);
    ValidationStatus {
        confidence_level,
        completion_rate,
        cross_references_checked: evidence.len() >= 3,
        consistency_verified: completion_rate > 0.7,
        sources_verified: !evidence.is_empty() && evidence.iter().all(|e| !e.source.is_empty()),
        expert_review_required: confidence_level < threshold,
        validated_at: Some(Utc::now()),
    }
}

pub async fn validate(deps: &NodeDeps, state: &ResearchState) -> StateUpdate {
    let session_id = state.session_id();
    let validation = compute_validation(state, deps.config.validation_threshold);
    let mut ctx = state.research_context.clone();
    let mut todos = None;

    if validation.expert_review_required && ctx.validation_retries < deps.config.max_validation_retries {
        // 只有占位论据（检索无结果）的已完成任务重新执行
        let mut requeued = state.todos.clone();
        let mut count = 0;
        for todo in requeued.iter_mut().filter(|t| t.status == TodoStatus::Completed) {
            let sourced = state.evidence.iter().any(|e| {
                e.todo_id.as_deref() == Some(todo.id.as_str()) && e.source != SEARCH_SOURCE
            });
            if !sourced {
                todo.set_status(TodoStatus::InProgress);
                count += 1;
            }
        }
        if count > 0 {
            ctx.validation_retries += 1;
            tracing::info!(session_id, requeued = count, confidence = validation.confidence_level, "Confidence below threshold, re-queuing tasks");
            todos = Some(requeued);
        }
    }

    tracing::info!(
        session_id,
        confidence = validation.confidence_level,
        expert_review = validation.expert_review_required,
        "Validation finished"
    );
    deps.emit(
        session_id,
        StatusEvent::new(
            StatusEventType::AnalysisResult,
            ORCHESTRATOR_AGENT_ID,
            "validated",
            format!("Confidence level {:.2}", validation.confidence_level),
        )
        .with_data(json!({
            "confidence_level": validation.confidence_level,
            "expert_review_required": validation.expert_review_required,
        })),
    );

    StateUpdate {
        todos,
        research_context: Some(ctx),
        validation_status: Some(validation),
        ..Default::default()
    }
}

pub async fn synthesize(deps: &NodeDeps, state: &ResearchState) -> StateUpdate {
    let session_id = state.session_id();
    let intel = &state.market_intelligence;
    let ctx = &state.research_context;

    let matrices: Vec<_> = [build_swot(intel, ctx), build_porters_five_forces(intel, ctx)]
        .into_iter()
        .flatten()
        .collect();

    let mut summary = None;
    if deps.config.enable_deep_thinking {
        let params = json!({
            "prompt": format!(
                "Summarize market research on \"{}\" from these findings:\n{}",
                ctx.query,
                ctx.findings.join("\n")
            ),
            "steps": deps.config.thinking_depth.reasoning_steps(),
        });
        match deps
            .call_tool(state, REASONING_SERVER, "synthesize", "deep_reasoning", params)
            .await
        {
            Ok(response) => {
                summary = response
                    .get("summary")
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string);
            }
            Err(e) => tracing::warn!(session_id, error = %e, "Deep reasoning failed, using template summary"),
        }
    }
    let summary = summary.unwrap_or_else(|| template_summary(state));
    let sections = build_sections(state, &summary);

    let mut new_ctx = ctx.clone();
    new_ctx.phase = ResearchPhase::Reporting;
    tracing::info!(session_id, matrices = matrices.len(), sections = sections.len(), "Synthesis finished");

    deps.emit(
        session_id,
        StatusEvent::new(
            StatusEventType::AnalysisResult,
            ORCHESTRATOR_AGENT_ID,
            "synthesized",
            format!("Built {} business matrices", matrices.len()),
        )
        .with_data(json!({
            "matrices": matrices.iter().map(|m| m.name.clone()).collect::<Vec<_>>(),
        })),
    );

    StateUpdate {
        new_messages: vec![Message::from_node("synthesize", summary)],
        research_context: Some(new_ctx),
        report_sections: Some(sections),
        business_matrices: Some(matrices),
        ..Default::default()
    }
}

pub async fn report(deps: &NodeDeps, state: &ResearchState) -> StateUpdate {
    let session_id = state.session_id();
    let params = json!({
        "title": format!("Market Research Report: {}", state.research_context.query),
        "format": "markdown",
    });
    if let Err(e) = deps
        .call_tool(state, REPORT_SERVER, "generate", "generate_report", params)
        .await
    {
        tracing::warn!(session_id, error = %e, "Report tool failed, writing template report");
    }

    let markdown = render_markdown(state);
    let mut files = state.files.clone();
    files.insert(FINAL_REPORT_FILE.to_string(), markdown);
    tracing::info!(session_id, "Final report written");

    deps.emit(
        session_id,
        StatusEvent::new(
            StatusEventType::TaskProgress,
            ORCHESTRATOR_AGENT_ID,
            "reported",
            format!("{} written", FINAL_REPORT_FILE),
        ),
    );

    StateUpdate {
        new_messages: vec![Message::from_node("report", "Final report generated")],
        files: Some(files),
        ..Default::default()
    }
}
