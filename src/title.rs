//! Title Inference (C8): one-shot LLM call producing a short human title
//! for a newly submitted job. Title generation failures never block job
//! creation (§4.8) — any error or empty response falls back to the first
//! non-empty line of the proposal, truncated.

use crate::effects::{CompleteOptions, LlmGateway};
use crate::json_extract::extract_json_object;

pub const MAX_TITLE_CHARS: usize = 25;

pub async fn generate_title(llm: &dyn LlmGateway, proposal_content: &str) -> String {
    let fallback = fallback_title(proposal_content);
    let prompt = format!(
        "Summarize the following proposal in a short title of at most {MAX_TITLE_CHARS} \
         display characters. Respond with a JSON object: {{\"title\": \"...\"}}.\n\n{}",
        truncate_chars(proposal_content, 800)
    );

    match llm.complete(&prompt, CompleteOptions::default()).await {
        Ok(text) => extract_json_object(&text)
            .and_then(|v| v.get("title").and_then(|t| t.as_str()).map(str::to_string))
            .map(|t| truncate_chars(t.trim(), MAX_TITLE_CHARS))
            .filter(|t| !t.is_empty())
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn fallback_title(proposal_content: &str) -> String {
    let first_line = proposal_content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("Untitled proposal");
    truncate_chars(first_line, MAX_TITLE_CHARS)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::mock::MockLlm;

    #[tokio::test]
    async fn uses_llm_title_when_well_formed() {
        let llm = MockLlm::new(vec!["```json\n{\"title\": \"운영 효율 개선\"}\n```"]);
        let title = generate_title(&llm, "운영 효율 개선 제안\n상세 내용...").await;
        assert_eq!(title, "운영 효율 개선");
    }

    #[tokio::test]
    async fn falls_back_to_first_line_on_llm_failure() {
        let llm = MockLlm::failing();
        let title = generate_title(&llm, "운영 효율 개선 제안\n상세 내용...").await;
        assert_eq!(title, "운영 효율 개선 제안");
    }

    #[tokio::test]
    async fn falls_back_on_unparseable_response() {
        let llm = MockLlm::new(vec!["not json at all"]);
        let title = generate_title(&llm, "첫 줄 제목\n둘째 줄").await;
        assert_eq!(title, "첫 줄 제목");
    }

    #[test]
    fn title_never_exceeds_max_display_characters() {
        let long = "가".repeat(100);
        assert_eq!(truncate_chars(&long, MAX_TITLE_CHARS).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn fallback_skips_blank_leading_lines() {
        let content = "\n\n   \n실제 제목 줄\n나머지";
        assert_eq!(fallback_title(content), "실제 제목 줄");
    }
}
