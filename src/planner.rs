//! LLM-backed research planning: initial plan synthesis, lightweight query
//! refinement, and plan refinement from critic feedback.
//!
//! Structured-output parsing follows the donor's `adversarial::validator`
//! text-marker convention (`FIELD:` prefixed lines) rather than relying on
//! vendor-specific JSON mode, so any `LLMClient` backend works uniformly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{instrument, warn};

use crate::adapter::SearchOptions;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

/// One proposed search strategy: a query plus the reasoning behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStrategy {
    pub query: String,
    pub reasoning: String,
}

/// A research plan: the question decomposed into sub-questions, a set of
/// search strategies, and the report's expected section outline. Mutable
/// only through the Planner, including refinement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub main_question: String,
    pub sub_questions: Vec<String>,
    pub search_strategies: Vec<SearchStrategy>,
    pub expected_sections: Vec<String>,
}

/// `{ query, filters }` — the smallest refinable unit the Planner hands
/// back to the Coordinator for another search round.
#[derive(Debug, Clone)]
pub struct RefinedQuery {
    pub query: String,
    pub filters: SearchOptions,
}

/// Feedback-driven plan refinement, keyed by which gap each new query targets.
#[derive(Debug, Clone, Default)]
pub struct PlanRefinement {
    pub additional_sub_questions: Vec<String>,
    pub additional_search_strategies: Vec<SearchStrategy>,
    pub refined_sections: Option<Vec<String>>,
    pub reasoning: String,
    pub gap_mappings: HashMap<String, Vec<String>>,
}

/// Minimal context the Planner needs to decide whether refinement is needed
/// at all, mirroring the critic's decision inputs without depending on the
/// critic module directly.
#[derive(Debug, Clone)]
pub struct CriticFeedback {
    pub overall_score: f64,
    pub gaps: Vec<String>,
    pub suggested_searches: Vec<String>,
}

pub struct Planner<C: LLMClient> {
    primary: C,
    fallback: Option<C>,
}

impl<C: LLMClient> Planner<C> {
    pub fn new(primary: C) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: C) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[instrument(skip(self))]
    pub async fn create_research_plan(&self, query: &str) -> Result<ResearchPlan> {
        let prompt = format!(
            "Produce a research plan for the question: \"{query}\".\n\
             Respond using these exact field markers, one per line:\n\
             MAIN_QUESTION: <restated question>\n\
             SUB_QUESTION: <3 to 5 lines, one per sub-question>\n\
             STRATEGY: <query> | <reasoning> (3 to 6 lines)\n\
             SECTION: <expected report section title, ordered>\n"
        );

        let text = self.complete_with_fallback(&prompt, 2).await?;
        parse_plan(query, &text)
    }

    #[instrument(skip(self, context))]
    pub async fn refine_search_query(
        &self,
        original: &str,
        prev_stats: &str,
        context: &str,
    ) -> Result<RefinedQuery> {
        let prompt = format!(
            "The search \"{original}\" returned: {prev_stats}.\n\
             Context: {context}\n\
             Suggest a single improved search query. Respond with only:\n\
             QUERY: <refined query>\n"
        );
        let text = self.primary.complete(request(&prompt)).await?;
        let query = extract_field(&text.content, "QUERY:")
            .unwrap_or_else(|| original.to_string());
        Ok(RefinedQuery {
            query,
            filters: SearchOptions::new(original),
        })
    }

    /// Refine the plan from critic feedback. Short-circuits to an empty
    /// refinement when there are no gaps and the score is already high.
    #[instrument(skip(self, plan, feedback, existing_paper_titles))]
    pub async fn refine_plan_from_feedback(
        &self,
        plan: &ResearchPlan,
        feedback: &CriticFeedback,
        existing_paper_titles: &[String],
    ) -> Result<PlanRefinement> {
        if feedback.gaps.is_empty() && feedback.overall_score >= 80.0 {
            return Ok(PlanRefinement::default());
        }

        let gaps = feedback.gaps.join("; ");
        let known_titles = existing_paper_titles.join("; ");
        let prompt = format!(
            "Main question: {}\n\
             Identified gaps: {gaps}\n\
             Already-known paper titles: {known_titles}\n\
             Propose refinements. Respond using these markers:\n\
             SUB_QUESTION: <new sub-question, one per line, may be empty>\n\
             STRATEGY: <query> | <reasoning>\n\
             GAP_QUERY: <gap text> => <query>\n\
             REASONING: <one paragraph>\n",
            plan.main_question
        );

        let text = self.complete_with_fallback(&prompt, 2).await?;
        parse_refinement(&text)
    }

    async fn complete_with_fallback(&self, prompt: &str, retries: u32) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..=retries {
            match self.primary.complete(request(prompt)).await {
                Ok(resp) => return Ok(resp.content),
                Err(err) => {
                    warn!(attempt, "primary planner model failed: {err}");
                    last_err = Some(err);
                }
            }
        }
        if let Some(fallback) = &self.fallback {
            if let Ok(resp) = fallback.complete(request(prompt)).await {
                return Ok(resp.content);
            }
        }
        Err(to_llm_error(last_err.expect("at least one attempt ran")))
    }
}

fn request(prompt: &str) -> CompletionRequest {
    CompletionRequest::new().with_message(ChatMessage::user(prompt))
}

fn to_llm_error(err: Error) -> Error {
    err
}

fn extract_field(text: &str, marker: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix(marker).map(|rest| rest.trim().to_string()))
}

fn extract_all(text: &str, marker: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix(marker).map(|rest| rest.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_plan(original_query: &str, text: &str) -> Result<ResearchPlan> {
    let main_question = extract_field(text, "MAIN_QUESTION:").unwrap_or_else(|| original_query.to_string());
    let sub_questions = extract_all(text, "SUB_QUESTION:");
    let expected_sections = extract_all(text, "SECTION:");
    let search_strategies = extract_all(text, "STRATEGY:")
        .into_iter()
        .map(|line| {
            let mut parts = line.splitn(2, '|');
            let query = parts.next().unwrap_or_default().trim().to_string();
            let reasoning = parts.next().unwrap_or_default().trim().to_string();
            SearchStrategy { query, reasoning }
        })
        .collect::<Vec<_>>();

    if sub_questions.is_empty() || search_strategies.is_empty() {
        return Err(Error::llm_structural(
            "planner",
            "plan response missing required SUB_QUESTION or STRATEGY markers",
        ));
    }

    Ok(ResearchPlan {
        main_question,
        sub_questions,
        search_strategies,
        expected_sections,
    })
}

fn parse_refinement(text: &str) -> Result<PlanRefinement> {
    let additional_sub_questions = extract_all(text, "SUB_QUESTION:");
    let additional_search_strategies = extract_all(text, "STRATEGY:")
        .into_iter()
        .map(|line| {
            let mut parts = line.splitn(2, '|');
            let query = parts.next().unwrap_or_default().trim().to_string();
            let reasoning = parts.next().unwrap_or_default().trim().to_string();
            SearchStrategy { query, reasoning }
        })
        .collect();
    let reasoning = extract_field(text, "REASONING:").unwrap_or_default();

    let mut gap_mappings: HashMap<String, Vec<String>> = HashMap::new();
    for line in extract_all(text, "GAP_QUERY:") {
        if let Some((gap, query)) = line.split_once("=>") {
            gap_mappings
                .entry(gap.trim().to_string())
                .or_default()
                .push(query.trim().to_string());
        }
    }

    Ok(PlanRefinement {
        additional_sub_questions,
        additional_search_strategies,
        refined_sections: None,
        reasoning,
        gap_mappings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EmbeddingRequest, EmbeddingResponse, CompletionResponse, ModelSpec, Provider, TokenUsage};
    use async_trait::async_trait;

    struct StubClient {
        response: String,
    }

    #[async_trait]
    impl LLMClient for StubClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            let _ = request;
            Ok(CompletionResponse {
                id: "stub".into(),
                model: "stub-model".into(),
                content: self.response.clone(),
                stop_reason: None,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 10,
                    cache_read_tokens: None,
                    cache_creation_tokens: None,
                },
                timestamp: chrono::Utc::now(),
                cost: Some(0.0),
            })
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            Err(Error::llm("embeddings not supported by stub"))
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![]
        }
    }

    #[tokio::test]
    async fn creates_plan_from_marker_response() {
        let response = "MAIN_QUESTION: What causes X?\n\
             SUB_QUESTION: Why does X happen?\n\
             SUB_QUESTION: What mitigates X?\n\
             STRATEGY: x causes | find root-cause literature\n\
             SECTION: Introduction\n\
             SECTION: Conclusion\n";
        let planner = Planner::new(StubClient {
            response: response.to_string(),
        });
        let plan = planner.create_research_plan("What causes X?").await.unwrap();
        assert_eq!(plan.sub_questions.len(), 2);
        assert_eq!(plan.search_strategies[0].query, "x causes");
        assert_eq!(plan.expected_sections.len(), 2);
    }

    #[tokio::test]
    async fn malformed_response_is_llm_structural_error() {
        let planner = Planner::new(StubClient {
            response: "not the expected format".to_string(),
        });
        let err = planner.create_research_plan("anything").await.unwrap_err();
        assert!(matches!(err, Error::LlmStructural { .. }));
    }

    #[tokio::test]
    async fn refinement_short_circuits_when_score_high_and_no_gaps() {
        let planner = Planner::new(StubClient {
            response: String::new(),
        });
        let plan = ResearchPlan {
            main_question: "Q".into(),
            sub_questions: vec![],
            search_strategies: vec![],
            expected_sections: vec![],
        };
        let feedback = CriticFeedback {
            overall_score: 85.0,
            gaps: vec![],
            suggested_searches: vec![],
        };
        let refinement = planner
            .refine_plan_from_feedback(&plan, &feedback, &[])
            .await
            .unwrap();
        assert!(refinement.additional_sub_questions.is_empty());
        assert!(refinement.gap_mappings.is_empty());
    }
}
