//! 规划策略：把调研目标拆成 Todo，并生成调研计划

use std::collections::BTreeMap;

use crate::core::{AgentType, Priority, ResearchContext, ResearchPlan, Todo};

/// 可插拔的任务拆解策略
pub trait PlanningStrategy: Send + Sync {
    fn decompose(&self, objectives: &[String], context: &ResearchContext) -> Vec<Todo>;
}

/// 默认策略：六个固定维度，每个预先指派给对应代理
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPlanningStrategy;

impl PlanningStrategy for DefaultPlanningStrategy {
    fn decompose(&self, objectives: &[String], context: &ResearchContext) -> Vec<Todo> {
        let subject = research_subject(objectives, context);
        let templates: [(AgentType, Priority, &str); 6] = [
            (
                AgentType::CompetitorAnalysisAgent,
                Priority::High,
                "Identify key competitors and their market positioning for",
            ),
            (
                AgentType::MarketTrendAgent,
                Priority::High,
                "Analyze market trends, growth drivers and market size for",
            ),
            (
                AgentType::ConsumerInsightsAgent,
                Priority::Medium,
                "Research consumer behavior, preferences and segments for",
            ),
            (
                AgentType::FinancialAnalysisAgent,
                Priority::Medium,
                "Assess pricing, revenue models and financial performance for",
            ),
            (
                AgentType::TechnologyAssessmentAgent,
                Priority::Medium,
                "Evaluate the technology and innovation landscape for",
            ),
            (
                AgentType::RegulatoryAnalysisAgent,
                Priority::Low,
                "Review the regulatory environment and compliance requirements for",
            ),
        ];
        templates
            .iter()
            .map(|(agent, priority, text)| {
                Todo::new(format!("{} {}", text, subject), *priority, Some(*agent))
            })
            .collect()
    }
}

/// 目标 + 行业/市场限定，如 "coffee (Food & Beverage, North America)"
pub fn research_subject(objectives: &[String], context: &ResearchContext) -> String {
    let base = if objectives.is_empty() {
        context.query.clone()
    } else {
        objectives.join("; ")
    };
    let scope: Vec<&str> = [
        context.industry_sector.as_deref(),
        context.target_market.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();
    if scope.is_empty() {
        base
    } else {
        format!("{} ({})", base, scope.join(", "))
    }
}

pub fn build_research_plan(context: &ResearchContext, validation_threshold: f64) -> ResearchPlan {
    let mut timeline = BTreeMap::new();
    timeline.insert("1_planning".to_string(), "objectives decomposed into agent tasks".to_string());
    timeline.insert("2_data_collection".to_string(), "parallel agent research rounds".to_string());
    timeline.insert("3_analysis".to_string(), "evidence validation and cross-referencing".to_string());
    timeline.insert("4_synthesis".to_string(), "SWOT / Porter's Five Forces and summary".to_string());
    timeline.insert("5_reporting".to_string(), "final report generation".to_string());

    let mut methodology = vec![
        "Desk research through web search".to_string(),
        "Competitor benchmarking".to_string(),
        "Trend and consumer signal analysis".to_string(),
        "SWOT analysis".to_string(),
    ];
    if context.industry_sector.is_some() {
        methodology.push("Porter's Five Forces".to_string());
    }

    ResearchPlan {
        methodology,
        timeline,
        deliverables: vec![
            "Executive summary".to_string(),
            "Competitive landscape".to_string(),
            "Business matrices".to_string(),
            "final_report.md".to_string(),
        ],
        success_criteria: vec![
            format!("Confidence level of at least {:.2}", validation_threshold),
            "Every objective addressed in the final report".to_string(),
            "All evidence attributed to a source".to_string(),
        ],
    }
}
