//! Final Decision Classification (C4.9): a bounded LLM call with a strict
//! output schema. On parse failure, defaults to `{on-hold, "자동 판정
//! 실패"}` (§4.9) so the pipeline never blocks on a malformed response.

use crate::effects::{CompleteOptions, LlmGateway};
use crate::job::Decision;
use crate::json_extract::extract_json_object;

pub const DEFAULT_REASON: &str = "자동 판정 실패";

pub async fn classify_final_decision(llm: &dyn LlmGateway, report_html: &str) -> (Decision, String) {
    let prompt = format!(
        "Based on the following review report, classify the outcome. Respond with a \
         JSON object exactly of the shape {{\"decision\": \"approved\"|\"on-hold\", \
         \"reason\": \"...\"}}.\n\nReport:\n{}",
        report_html
    );

    let Ok(text) = llm.complete(&prompt, CompleteOptions::default()).await else {
        return default();
    };

    let Some(value) = extract_json_object(&text) else {
        return default();
    };

    let decision = match value.get("decision").and_then(|d| d.as_str()) {
        Some("approved") => Decision::Approved,
        Some("on-hold") => Decision::OnHold,
        _ => return default(),
    };
    let reason = value
        .get("reason")
        .and_then(|r| r.as_str())
        .unwrap_or(DEFAULT_REASON)
        .to_string();

    (decision, reason)
}

fn default() -> (Decision, String) {
    (Decision::OnHold, DEFAULT_REASON.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::mock::MockLlm;

    #[tokio::test]
    async fn classifies_approved_from_well_formed_response() {
        let llm = MockLlm::new(vec![
            "{\"decision\": \"approved\", \"reason\": \"clear ROI and low risk\"}",
        ]);
        let (decision, reason) = classify_final_decision(&llm, "<html>report</html>").await;
        assert_eq!(decision, Decision::Approved);
        assert_eq!(reason, "clear ROI and low risk");
    }

    #[tokio::test]
    async fn defaults_to_on_hold_on_llm_failure() {
        let llm = MockLlm::failing();
        let (decision, reason) = classify_final_decision(&llm, "<html>report</html>").await;
        assert_eq!(decision, Decision::OnHold);
        assert_eq!(reason, DEFAULT_REASON);
    }

    #[tokio::test]
    async fn defaults_to_on_hold_on_unparseable_response() {
        let llm = MockLlm::new(vec!["I cannot decide."]);
        let (decision, reason) = classify_final_decision(&llm, "<html>report</html>").await;
        assert_eq!(decision, Decision::OnHold);
        assert_eq!(reason, DEFAULT_REASON);
    }

    #[tokio::test]
    async fn defaults_on_unknown_decision_value() {
        let llm = MockLlm::new(vec!["{\"decision\": \"maybe\", \"reason\": \"unsure\"}"]);
        let (decision, reason) = classify_final_decision(&llm, "<html>report</html>").await;
        assert_eq!(decision, Decision::OnHold);
        assert_eq!(reason, DEFAULT_REASON);
    }
}
