//! 子代理规则表：依赖关系、资源分配、协调模式推断

use std::collections::BTreeMap;

use crate::core::{AgentType, CoordinationMode, DelegationTask};

/// 代理之间的固定依赖：财务分析要等竞争与趋势，技术评估要等趋势
pub fn dependencies_of(agent: AgentType) -> Vec<AgentType> {
    match agent {
        AgentType::FinancialAnalysisAgent => vec![
            AgentType::CompetitorAnalysisAgent,
            AgentType::MarketTrendAgent,
        ],
        AgentType::TechnologyAssessmentAgent => vec![AgentType::MarketTrendAgent],
        _ => Vec::new(),
    }
}

/// 没有新任务时返回 None（保持原模式）
pub fn infer_mode(tasks: &[DelegationTask]) -> Option<CoordinationMode> {
    if tasks.is_empty() {
        return None;
    }
    let with_deps = tasks.iter().filter(|t| !t.dependencies.is_empty()).count();
    Some(if with_deps == 0 {
        CoordinationMode::Parallel
    } else if with_deps == tasks.len() {
        CoordinationMode::Sequential
    } else {
        CoordinationMode::Hybrid
    })
}

/// 按优先级权重分配资源份额，总和为 1
pub fn allocate(tasks: &[DelegationTask]) -> BTreeMap<AgentType, f64> {
    let total: f64 = tasks.iter().map(|t| t.priority.weight()).sum();
    if total <= 0.0 {
        return BTreeMap::new();
    }
    let mut shares = BTreeMap::new();
    for task in tasks {
        *shares.entry(task.agent).or_insert(0.0) += task.priority.weight() / total;
    }
    shares
}

/// 给未指派代理的任务按关键词选一个代理
pub fn infer_agent(content: &str) -> AgentType {
    let text = content.to_lowercase();
    let rules: [(AgentType, &[&str]); 5] = [
        (
            AgentType::CompetitorAnalysisAgent,
            &["competitor", "competition", "rival", "market share", "player"],
        ),
        (
            AgentType::ConsumerInsightsAgent,
            &["consumer", "customer", "buyer", "segment", "preference"],
        ),
        (
            AgentType::FinancialAnalysisAgent,
            &["financial", "revenue", "pricing", "price", "margin", "funding"],
        ),
        (
            AgentType::TechnologyAssessmentAgent,
            &["technology", "technical", "innovation", "patent", "platform"],
        ),
        (
            AgentType::RegulatoryAnalysisAgent,
            &["regulat", "compliance", "legal", "policy", "law"],
        ),
    ];
    rules
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(agent, _)| *agent)
        .unwrap_or(AgentType::MarketTrendAgent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Priority, Todo};

    fn task(agent: AgentType, priority: Priority) -> DelegationTask {
        let todo = Todo::new("t", priority, Some(agent));
        DelegationTask::from_todo(&todo, agent, dependencies_of(agent))
    }

    #[test]
    fn test_mode_inference() {
        let independent = vec![
            task(AgentType::CompetitorAnalysisAgent, Priority::High),
            task(AgentType::MarketTrendAgent, Priority::High),
        ];
        assert_eq!(infer_mode(&independent), Some(CoordinationMode::Parallel));

        let dependent = vec![task(AgentType::FinancialAnalysisAgent, Priority::Medium)];
        assert_eq!(infer_mode(&dependent), Some(CoordinationMode::Sequential));

        let mixed = vec![
            task(AgentType::MarketTrendAgent, Priority::High),
            task(AgentType::TechnologyAssessmentAgent, Priority::Medium),
        ];
        assert_eq!(infer_mode(&mixed), Some(CoordinationMode::Hybrid));
        assert_eq!(infer_mode(&[]), None);
    }

    #[test]
    fn test_allocation_follows_priority_weight() {
        let tasks = vec![
            task(AgentType::CompetitorAnalysisAgent, Priority::Critical),
            task(AgentType::RegulatoryAnalysisAgent, Priority::Low),
        ];
        let shares = allocate(&tasks);
        assert!((shares[&AgentType::CompetitorAnalysisAgent] - 0.8).abs() < 1e-9);
        assert!((shares.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_infer_agent_keywords() {
        assert_eq!(
            infer_agent("Map the main competitors"),
            AgentType::CompetitorAnalysisAgent
        );
        assert_eq!(
            infer_agent("Check EU regulations on labeling"),
            AgentType::RegulatoryAnalysisAgent
        );
        assert_eq!(infer_agent("Anything else"), AgentType::MarketTrendAgent);
    }
}
