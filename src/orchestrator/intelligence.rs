//! 检索结果 -> 论据与市场情报
//!
//! 每种代理类型写入 MarketIntelligence 的一个分区；检索无结果时写入一条以任务为主题的占位条目，
//! 让后续综合阶段仍能看到该维度已被调研。

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{
    AgentType, CompetitorProfile, Evidence, IntelligenceItem, MarketIntelligence, MarketTrend,
    Todo,
};

/// 每个任务最多转成论据的检索结果数
const MAX_EVIDENCE_PER_TASK: usize = 3;
const EVIDENCE_RELEVANCE: f64 = 0.8;
const EVIDENCE_CREDIBILITY: f64 = 0.7;
/// 没有结果时的来源标记
pub const SEARCH_SOURCE: &str = "mcp:web_search";
const PLACEHOLDER_COMPETITOR: &str = "Unidentified market leaders";

/// web_search 返回的单条结果
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

impl SearchHit {
    fn source(&self) -> String {
        if self.url.is_empty() {
            SEARCH_SOURCE.to_string()
        } else {
            self.url.clone()
        }
    }

    fn headline(&self) -> &str {
        if self.title.is_empty() {
            &self.content
        } else {
            &self.title
        }
    }
}

pub fn parse_hits(response: &Value) -> Vec<SearchHit> {
    response
        .get("results")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value::<SearchHit>(v.clone()).ok())
                .filter(|h| !h.title.is_empty() || !h.content.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub fn evidence_from_hits(agent: AgentType, todo: &Todo, hits: &[SearchHit]) -> Vec<Evidence> {
    let make = |claim: String, source: String| Evidence {
        id: format!("evidence_{}", uuid::Uuid::new_v4()),
        claim,
        source,
        relevance: EVIDENCE_RELEVANCE,
        credibility: EVIDENCE_CREDIBILITY,
        agent: Some(agent),
        todo_id: Some(todo.id.clone()),
        collected_at: Utc::now(),
    };

    if hits.is_empty() {
        return vec![make(
            format!("{}: {}", agent, todo.content),
            SEARCH_SOURCE.to_string(),
        )];
    }
    hits.iter()
        .take(MAX_EVIDENCE_PER_TASK)
        .map(|hit| {
            let claim = if hit.content.is_empty() {
                hit.title.clone()
            } else {
                format!("{}: {}", hit.headline(), hit.content)
            };
            make(claim, hit.source())
        })
        .collect()
}

/// 把一个已完成任务的结果并入对应代理的情报分区
pub fn apply_findings(
    intel: &mut MarketIntelligence,
    agent: AgentType,
    todo: &Todo,
    hits: &[SearchHit],
) {
    match agent {
        AgentType::CompetitorAnalysisAgent => update_competitors(intel, todo, hits),
        AgentType::MarketTrendAgent => update_trends(intel, todo, hits),
        AgentType::ConsumerInsightsAgent => {
            push_items(&mut intel.consumer_insights, "Consumer insight", todo, hits)
        }
        AgentType::FinancialAnalysisAgent => {
            push_items(&mut intel.financial_metrics, "Financial metric", todo, hits)
        }
        AgentType::TechnologyAssessmentAgent => {
            push_items(&mut intel.technology_signals, "Technology signal", todo, hits)
        }
        AgentType::RegulatoryAnalysisAgent => {
            push_items(&mut intel.regulatory_factors, "Regulatory factor", todo, hits)
        }
    }
}

fn update_competitors(intel: &mut MarketIntelligence, todo: &Todo, hits: &[SearchHit]) {
    if hits.is_empty() {
        if intel.competitors.iter().any(|c| c.name == PLACEHOLDER_COMPETITOR) {
            return;
        }
        intel.competitors.push(CompetitorProfile {
            name: PLACEHOLDER_COMPETITOR.to_string(),
            market_position: "pending verification".to_string(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            source: format!("{} ({})", SEARCH_SOURCE, todo.id),
        });
        return;
    }
    for hit in hits {
        // 同名对手只保留一份
        if intel.competitors.iter().any(|c| c.name == hit.headline()) {
            continue;
        }
        intel.competitors.push(CompetitorProfile {
            name: hit.headline().to_string(),
            market_position: "identified via search".to_string(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            source: hit.source(),
        });
    }
}

fn update_trends(intel: &mut MarketIntelligence, todo: &Todo, hits: &[SearchHit]) {
    if hits.is_empty() {
        intel.trends.push(MarketTrend {
            name: todo.content.clone(),
            direction: "unknown".to_string(),
            impact: "unassessed".to_string(),
            confidence: 0.3,
            source: SEARCH_SOURCE.to_string(),
        });
        return;
    }
    for hit in hits {
        let text = format!("{} {}", hit.title, hit.content).to_lowercase();
        let direction = if ["declin", "shrink", "drop", "fall"].iter().any(|k| text.contains(k)) {
            "declining"
        } else if ["grow", "rise", "increas", "surge", "expand"].iter().any(|k| text.contains(k)) {
            "growing"
        } else {
            "stable"
        };
        intel.trends.push(MarketTrend {
            name: hit.headline().to_string(),
            direction: direction.to_string(),
            impact: "medium".to_string(),
            confidence: hit.score.unwrap_or(0.5).clamp(0.0, 1.0),
            source: hit.source(),
        });
    }
}

fn push_items(items: &mut Vec<IntelligenceItem>, label: &str, todo: &Todo, hits: &[SearchHit]) {
    if hits.is_empty() {
        items.push(IntelligenceItem {
            topic: label.to_string(),
            summary: format!("No published data found for: {}", todo.content),
            source: SEARCH_SOURCE.to_string(),
            confidence: 0.3,
        });
        return;
    }
    items.extend(hits.iter().map(|hit| IntelligenceItem {
        topic: hit.headline().to_string(),
        summary: hit.content.clone(),
        source: hit.source(),
        confidence: hit.score.unwrap_or(0.5).clamp(0.0, 1.0),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Priority;
    use serde_json::json;

    fn todo(agent: AgentType) -> Todo {
        Todo::new("Look into it", Priority::Medium, Some(agent))
    }

    #[test]
    fn test_parse_hits_skips_empty_entries() {
        let response = json!({
            "results": [
                { "title": "Starbucks", "url": "https://example.com/sbux", "content": "Largest chain", "score": 0.9 },
                { "url": "https://example.com/blank" },
                "not an object"
            ]
        });
        let hits = parse_hits(&response);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, Some(0.9));
        assert!(parse_hits(&json!({ "results": [] })).is_empty());
    }

    #[test]
    fn test_evidence_scores_and_sources() {
        let t = todo(AgentType::MarketTrendAgent);
        let placeholder = evidence_from_hits(AgentType::MarketTrendAgent, &t, &[]);
        assert_eq!(placeholder.len(), 1);
        assert_eq!(placeholder[0].source, SEARCH_SOURCE);
        assert_eq!(placeholder[0].relevance, 0.8);
        assert_eq!(placeholder[0].credibility, 0.7);
        assert_eq!(placeholder[0].todo_id.as_deref(), Some(t.id.as_str()));

        let hits = vec![
            SearchHit {
                title: "A".into(),
                url: "https://a".into(),
                ..Default::default()
            };
            5
        ];
        let evidence = evidence_from_hits(AgentType::MarketTrendAgent, &t, &hits);
        assert_eq!(evidence.len(), MAX_EVIDENCE_PER_TASK);
        assert_eq!(evidence[0].source, "https://a");
    }

    #[test]
    fn test_every_agent_updates_its_partition() {
        let mut intel = MarketIntelligence::default();
        for agent in AgentType::ALL {
            apply_findings(&mut intel, agent, &todo(agent), &[]);
        }
        assert_eq!(intel.competitors.len(), 1);
        assert_eq!(intel.trends.len(), 1);
        assert_eq!(intel.consumer_insights.len(), 1);
        assert_eq!(intel.financial_metrics.len(), 1);
        assert_eq!(intel.technology_signals.len(), 1);
        assert_eq!(intel.regulatory_factors.len(), 1);
    }

    #[test]
    fn test_trend_direction_from_text() {
        let mut intel = MarketIntelligence::default();
        let hit = SearchHit {
            title: "Cold brew sales surge".into(),
            content: "Ready-to-drink coffee continues to grow".into(),
            url: "https://example.com".into(),
            score: Some(0.8),
        };
        apply_findings(&mut intel, AgentType::MarketTrendAgent, &todo(AgentType::MarketTrendAgent), &[hit]);
        assert_eq!(intel.trends[0].direction, "growing");
        assert_eq!(intel.trends[0].confidence, 0.8);
    }

    #[test]
    fn test_duplicate_competitors_are_merged() {
        let mut intel = MarketIntelligence::default();
        let hit = SearchHit {
            title: "Nestle".into(),
            ..Default::default()
        };
        let t = todo(AgentType::CompetitorAnalysisAgent);
        apply_findings(&mut intel, AgentType::CompetitorAnalysisAgent, &t, &[hit.clone()]);
        apply_findings(&mut intel, AgentType::CompetitorAnalysisAgent, &t, &[hit]);
        assert_eq!(intel.competitors.len(), 1);
    }
}
