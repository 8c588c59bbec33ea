//! Quality Gate (§4.6): an advisory secondary LLM call that annotates a
//! stage result with issues and a suggested feedback template. It never
//! auto-rejects — its output is only surfaced to the human via the
//! `interrupt` event. When the assist call fails, a length heuristic keeps
//! the pipeline running.

use crate::effects::{CompleteOptions, LlmGateway};
use crate::json_extract::extract_json_object;

const MIN_ACCEPTABLE_LENGTH: usize = 200;
const FALLBACK_ISSUE: &str = "응답이 너무 짧아 충분한 검토가 이루어지지 않았을 수 있습니다";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityAssessment {
    pub issues: Vec<String>,
    pub suggestion: String,
}

pub async fn assess_quality(llm: &dyn LlmGateway, stage_name: &str, text: &str) -> QualityAssessment {
    let prompt = format!(
        "Assess the quality of this {stage_name} review output. Respond with JSON: \
         {{\"issues\": [\"...\"], \"suggestion\": \"...\"}}.\n\nOutput:\n{text}"
    );

    match llm.complete(&prompt, CompleteOptions::default()).await {
        Ok(response) => extract_json_object(&response)
            .and_then(parse_assessment)
            .unwrap_or_else(|| heuristic_fallback(text)),
        Err(_) => heuristic_fallback(text),
    }
}

fn parse_assessment(value: serde_json::Value) -> Option<QualityAssessment> {
    let issues = value
        .get("issues")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    let suggestion = value
        .get("suggestion")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some(QualityAssessment { issues, suggestion })
}

fn heuristic_fallback(text: &str) -> QualityAssessment {
    if text.chars().count() >= MIN_ACCEPTABLE_LENGTH {
        QualityAssessment {
            issues: vec![],
            suggestion: String::new(),
        }
    } else {
        QualityAssessment {
            issues: vec![FALLBACK_ISSUE.to_string()],
            suggestion: "더 구체적인 근거와 수치를 포함해 주세요".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::mock::MockLlm;

    #[tokio::test]
    async fn parses_issues_and_suggestion_from_well_formed_response() {
        let llm = MockLlm::new(vec![
            "{\"issues\": [\"목표가 모호함\"], \"suggestion\": \"정량 KPI 추가\"}",
        ]);
        let assessment = assess_quality(&llm, "Objective_Reviewer", "short text").await;
        assert_eq!(assessment.issues, vec!["목표가 모호함".to_string()]);
        assert_eq!(assessment.suggestion, "정량 KPI 추가");
    }

    #[tokio::test]
    async fn falls_back_to_heuristic_on_llm_failure_with_short_text() {
        let llm = MockLlm::failing();
        let assessment = assess_quality(&llm, "Objective_Reviewer", "too short").await;
        assert_eq!(assessment.issues.len(), 1);
    }

    #[tokio::test]
    async fn heuristic_fallback_has_no_issues_for_long_text() {
        let llm = MockLlm::failing();
        let long_text = "x".repeat(250);
        let assessment = assess_quality(&llm, "Objective_Reviewer", &long_text).await;
        assert!(assessment.issues.is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_heuristic_on_unparseable_response() {
        let llm = MockLlm::new(vec!["not structured output"]);
        let long_text = "x".repeat(250);
        let assessment = assess_quality(&llm, "Objective_Reviewer", &long_text).await;
        assert!(assessment.issues.is_empty());
    }
}
