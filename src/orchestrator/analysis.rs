//! 商业分析矩阵：SWOT 与波特五力

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::{BusinessMatrix, MarketIntelligence, MatrixType, ResearchContext};

fn summaries<'a>(items: impl Iterator<Item = &'a str>, limit: usize) -> Vec<String> {
    items
        .filter(|s| !s.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// 有竞争对手数据时才生成
pub fn build_swot(intel: &MarketIntelligence, context: &ResearchContext) -> Option<BusinessMatrix> {
    if intel.competitors.is_empty() {
        return None;
    }

    let mut strengths = summaries(intel.technology_signals.iter().map(|i| i.topic.as_str()), 3);
    strengths.extend(
        intel
            .competitors
            .iter()
            .flat_map(|c| c.weaknesses.iter())
            .take(3)
            .map(|w| format!("Competitor gap: {}", w)),
    );
    let weaknesses = summaries(intel.financial_metrics.iter().map(|i| i.topic.as_str()), 3);
    let mut opportunities: Vec<String> = intel
        .trends
        .iter()
        .filter(|t| t.direction != "declining")
        .take(3)
        .map(|t| t.name.clone())
        .collect();
    opportunities.extend(summaries(
        intel.consumer_insights.iter().map(|i| i.topic.as_str()),
        3,
    ));
    let mut threats: Vec<String> = intel
        .competitors
        .iter()
        .take(5)
        .map(|c| format!("{} ({})", c.name, c.market_position))
        .collect();
    threats.extend(summaries(
        intel.regulatory_factors.iter().map(|i| i.topic.as_str()),
        3,
    ));

    let subject = context
        .target_market
        .clone()
        .unwrap_or_else(|| context.query.clone());

    Some(BusinessMatrix {
        name: "SWOT Analysis".to_string(),
        matrix_type: MatrixType::Swot,
        data: json!({
            "subject": subject,
            "strengths": strengths,
            "weaknesses": weaknesses,
            "opportunities": opportunities,
            "threats": threats,
        }),
        created_at: Utc::now(),
    })
}

fn force(level: &str, factors: Vec<String>) -> Value {
    json!({ "level": level, "factors": factors })
}

fn level_by_count(count: usize, medium_at: usize, high_at: usize) -> &'static str {
    if count >= high_at {
        "high"
    } else if count >= medium_at {
        "medium"
    } else {
        "low"
    }
}

/// 设置了行业时才生成
pub fn build_porters_five_forces(
    intel: &MarketIntelligence,
    context: &ResearchContext,
) -> Option<BusinessMatrix> {
    let sector = context.industry_sector.as_ref()?;

    let rivalry = force(
        level_by_count(intel.competitors.len(), 2, 4),
        intel.competitors.iter().take(5).map(|c| c.name.clone()).collect(),
    );
    // 监管越多，进入壁垒越高
    let new_entrants = force(
        match intel.regulatory_factors.len() {
            0 => "high",
            1 => "medium",
            _ => "low",
        },
        intel
            .regulatory_factors
            .iter()
            .take(3)
            .map(|r| r.topic.clone())
            .collect(),
    );
    let substitutes = force(
        level_by_count(intel.technology_signals.len(), 1, 3),
        intel
            .technology_signals
            .iter()
            .take(3)
            .map(|t| t.topic.clone())
            .collect(),
    );
    let buyer_power = force(
        level_by_count(intel.consumer_insights.len(), 1, 3),
        intel
            .consumer_insights
            .iter()
            .take(3)
            .map(|c| c.topic.clone())
            .collect(),
    );
    let supplier_power = force(
        "medium",
        intel
            .financial_metrics
            .iter()
            .take(3)
            .map(|f| f.topic.clone())
            .collect(),
    );

    Some(BusinessMatrix {
        name: format!("Porter's Five Forces: {}", sector),
        matrix_type: MatrixType::PortersFiveForces,
        data: json!({
            "industry": sector,
            "competitive_rivalry": rivalry,
            "threat_of_new_entrants": new_entrants,
            "threat_of_substitutes": substitutes,
            "bargaining_power_of_buyers": buyer_power,
            "bargaining_power_of_suppliers": supplier_power,
        }),
        created_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompetitorProfile, ResearchState};

    fn competitor(name: &str) -> CompetitorProfile {
        CompetitorProfile {
            name: name.into(),
            market_position: "leader".into(),
            strengths: vec![],
            weaknesses: vec!["slow delivery".into()],
            source: "https://example.com".into(),
        }
    }

    #[test]
    fn test_swot_requires_competitors() {
        let state = ResearchState::new("s1", "coffee", vec![]);
        assert!(build_swot(&state.market_intelligence, &state.research_context).is_none());

        let mut intel = MarketIntelligence::default();
        intel.competitors.push(competitor("Starbucks"));
        let swot = build_swot(&intel, &state.research_context).unwrap();
        assert_eq!(swot.matrix_type, MatrixType::Swot);
        assert_eq!(swot.data["threats"][0], "Starbucks (leader)");
        assert_eq!(swot.data["strengths"][0], "Competitor gap: slow delivery");
    }

    #[test]
    fn test_porters_requires_sector() {
        let mut state = ResearchState::new("s1", "coffee", vec![]);
        assert!(build_porters_five_forces(&state.market_intelligence, &state.research_context).is_none());

        state.research_context.industry_sector = Some("Food & Beverage".into());
        let mut intel = MarketIntelligence::default();
        for name in ["A", "B", "C", "D"] {
            intel.competitors.push(competitor(name));
        }
        let porters = build_porters_five_forces(&intel, &state.research_context).unwrap();
        assert_eq!(porters.name, "Porter's Five Forces: Food & Beverage");
        assert_eq!(porters.data["competitive_rivalry"]["level"], "high");
        assert_eq!(porters.data["threat_of_new_entrants"]["level"], "high");
    }
}
