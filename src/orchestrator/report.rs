//! 报告章节与 final_report.md 渲染

use std::fmt::Write as _;

use serde_json::Value;

use crate::core::{IntelligenceItem, ReportSection, ResearchState};

pub const FINAL_REPORT_FILE: &str = "final_report.md";
pub const RESEARCH_PLAN_FILE: &str = "research_plan.json";
pub const DELEGATION_TASKS_FILE: &str = "delegation_tasks.json";

/// 模板化的执行摘要（推理工具没有给出摘要时使用）
pub fn template_summary(state: &ResearchState) -> String {
    let intel = &state.market_intelligence;
    let agents: std::collections::BTreeSet<_> =
        state.evidence.iter().filter_map(|e| e.agent).collect();
    format!(
        "Research on \"{}\" collected {} evidence items from {} agents. \
         It identified {} competitors and {} market trends, with {} additional consumer, \
         financial, technology and regulatory signals.",
        state.research_context.query,
        state.evidence.len(),
        agents.len(),
        intel.competitors.len(),
        intel.trends.len(),
        intel.consumer_insights.len()
            + intel.financial_metrics.len()
            + intel.technology_signals.len()
            + intel.regulatory_factors.len(),
    )
}

fn bullet_items(items: &[IntelligenceItem]) -> String {
    if items.is_empty() {
        return "No findings recorded.".to_string();
    }
    items
        .iter()
        .map(|i| {
            if i.summary.is_empty() {
                format!("- {} (source: {})", i.topic, i.source)
            } else {
                format!("- **{}**: {} (source: {})", i.topic, i.summary, i.source)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_sections(state: &ResearchState, executive_summary: &str) -> Vec<ReportSection> {
    let intel = &state.market_intelligence;

    let trends = if intel.trends.is_empty() {
        "No findings recorded.".to_string()
    } else {
        intel
            .trends
            .iter()
            .map(|t| {
                format!(
                    "- **{}**: {} (impact: {}, confidence {:.2}, source: {})",
                    t.name, t.direction, t.impact, t.confidence, t.source
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let competitors = if intel.competitors.is_empty() {
        "No findings recorded.".to_string()
    } else {
        intel
            .competitors
            .iter()
            .map(|c| format!("- **{}**: {} (source: {})", c.name, c.market_position, c.source))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let sections = [
        ("executive_summary", "Executive Summary", executive_summary.to_string()),
        ("market_trends", "Market Trends", trends),
        ("competitive_landscape", "Competitive Landscape", competitors),
        ("consumer_insights", "Consumer Insights", bullet_items(&intel.consumer_insights)),
        ("financial_analysis", "Financial Analysis", bullet_items(&intel.financial_metrics)),
        ("technology_assessment", "Technology Assessment", bullet_items(&intel.technology_signals)),
        ("regulatory_environment", "Regulatory Environment", bullet_items(&intel.regulatory_factors)),
    ];

    sections
        .into_iter()
        .enumerate()
        .map(|(i, (id, title, content))| ReportSection {
            id: id.to_string(),
            title: title.to_string(),
            content,
            order: i as u32 + 1,
        })
        .collect()
}

fn render_matrix_data(out: &mut String, data: &Value) {
    let Some(map) = data.as_object() else {
        return;
    };
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                let joined: Vec<String> = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect();
                let _ = writeln!(out, "  - {}: {}", key, joined.join("; "));
            }
            Value::Object(obj) => {
                let level = obj.get("level").and_then(Value::as_str).unwrap_or("n/a");
                let _ = writeln!(out, "  - {}: {}", key, level);
            }
            Value::String(s) => {
                let _ = writeln!(out, "  - {}: {}", key, s);
            }
            other => {
                let _ = writeln!(out, "  - {}: {}", key, other);
            }
        }
    }
}

/// 渲染完整 Markdown 报告
pub fn render_markdown(state: &ResearchState) -> String {
    let ctx = &state.research_context;
    let mut out = String::new();

    let _ = writeln!(out, "# Market Research Report: {}\n", ctx.query);
    let _ = writeln!(out, "Session: `{}`", ctx.session_id);
    if let Some(sector) = &ctx.industry_sector {
        let _ = writeln!(out, "Industry: {}", sector);
    }
    if let Some(market) = &ctx.target_market {
        let _ = writeln!(out, "Target market: {}", market);
    }

    let _ = writeln!(out, "\n## Objectives\n");
    for objective in &ctx.objectives {
        let _ = writeln!(out, "- {}", objective);
    }

    let mut sections: Vec<&ReportSection> = state.report_sections.iter().collect();
    sections.sort_by_key(|s| s.order);
    for section in sections {
        let _ = writeln!(out, "\n## {}\n\n{}", section.title, section.content);
    }

    if !state.business_matrices.is_empty() {
        let _ = writeln!(out, "\n## Business Matrices\n");
        for matrix in &state.business_matrices {
            let _ = writeln!(out, "- **{}** ({})", matrix.name, matrix.matrix_type);
            render_matrix_data(&mut out, &matrix.data);
        }
    }

    let _ = writeln!(out, "\n## Evidence\n");
    if state.evidence.is_empty() {
        let _ = writeln!(out, "No evidence collected.");
    } else {
        let _ = writeln!(out, "| # | Claim | Source | Relevance | Credibility |");
        let _ = writeln!(out, "|---|---|---|---|---|");
        for (i, e) in state.evidence.iter().enumerate() {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {:.2} | {:.2} |",
                i + 1,
                e.claim.replace('|', "\\|"),
                e.source,
                e.relevance,
                e.credibility
            );
        }
    }

    let v = &state.validation_status;
    let _ = writeln!(out, "\n## Validation\n");
    let _ = writeln!(out, "- Confidence level: {:.2}", v.confidence_level);
    let _ = writeln!(out, "- Completion rate: {:.0}%", v.completion_rate * 100.0);
    let _ = writeln!(out, "- Cross references checked: {}", v.cross_references_checked);
    let _ = writeln!(out, "- Consistency verified: {}", v.consistency_verified);
    let _ = writeln!(out, "- Sources verified: {}", v.sources_verified);
    let _ = writeln!(out, "- Expert review required: {}", v.expert_review_required);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BusinessMatrix, MatrixType};

    #[test]
    fn test_report_lists_objectives_and_matrices() {
        let mut state = ResearchState::new(
            "s1",
            "Analyze the coffee market",
            vec!["coffee market size".into(), "key competitors".into()],
        );
        state.business_matrices.push(BusinessMatrix {
            name: "SWOT Analysis".into(),
            matrix_type: MatrixType::Swot,
            data: serde_json::json!({ "strengths": ["brand"], "weaknesses": [] }),
            created_at: chrono::Utc::now(),
        });
        let summary = template_summary(&state);
        state.report_sections = build_sections(&state, &summary);

        let md = render_markdown(&state);
        assert!(md.contains("- coffee market size"));
        assert!(md.contains("- key competitors"));
        assert!(md.contains("**SWOT Analysis** (swot)"));
        assert!(md.contains("  - strengths: brand"));
        assert!(md.contains("## Executive Summary"));
        assert!(md.contains("No evidence collected."));
    }

    #[test]
    fn test_sections_are_ordered() {
        let state = ResearchState::new("s1", "q", vec![]);
        let sections = build_sections(&state, "summary");
        assert_eq!(sections.len(), 7);
        assert_eq!(sections[0].id, "executive_summary");
        assert_eq!(sections[0].order, 1);
        assert_eq!(sections[6].order, 7);
    }
}
