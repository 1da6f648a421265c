//! The end-to-end workflow state machine: plan, build a checklist, search
//! in rounds, iterate analyze/write/audit/review until the quality gate
//! passes or gives up, then finalize a report and stream every step.
//!
//! Generalizes the donor's `Orchestrator` trait (its `run()` returning a
//! boxed event stream, its builder-configured limits) from the recursive
//! RLM loop to this crate's staged research workflow.

use async_stream::stream;
use chrono::{Datelike, Utc};
use futures::StreamExt;
use serde_json::json;
use tracing::{instrument, warn};

use crate::adapter::SearchOptions;
use crate::aggregator::Aggregator;
use crate::auditor::{audit_passes_threshold, Auditor};
use crate::checklist::{build_verifiable_checklist, verify_checklist, VerifiableChecklist};
use crate::config::CoordinatorConfig;
use crate::critic::{calculate_quality_metrics, evaluate_quality, Critic, GateDecision};
use crate::enrichment::Enricher;
use crate::error::{Error, Result};
use crate::events::{EventStream, StreamEvent};
use crate::llm::LLMClient;
use crate::memory::{ResearchMemory, SearchRound};
use crate::paper::{DataAvailability, Paper};
use crate::planner::{CriticFeedback, Planner};
use crate::writer::{WriterEvent, Writer};
use uuid::Uuid;

const MIN_GROUNDING_SCORE: f64 = 60.0;
const MAX_CONTRADICTIONS: usize = 2;

/// Owns every staged component for one workflow run. `C` is shared across
/// components by value, so callers typically instantiate this with
/// `Arc<dyn LLMClient>` (itself an `LLMClient`), which is cheap to clone.
pub struct Coordinator<C: LLMClient + Clone> {
    planner: Planner<C>,
    aggregator: Aggregator,
    enricher: Enricher,
    writer: Writer<C>,
    auditor: Auditor<C>,
    critic: Critic<C>,
    checklist_client: C,
    memory: ResearchMemory,
    config: CoordinatorConfig,
}

impl<C: LLMClient + Clone + 'static> Coordinator<C> {
    pub fn new(client: C, aggregator: Aggregator, enricher: Enricher, config: CoordinatorConfig) -> Self {
        Self {
            planner: Planner::new(client.clone()),
            aggregator,
            enricher,
            writer: Writer::new(client.clone()),
            auditor: Auditor::new(client.clone()),
            critic: Critic::new(client.clone()),
            checklist_client: client,
            memory: ResearchMemory::new(),
            config,
        }
    }

    pub fn memory(&self) -> &ResearchMemory {
        &self.memory
    }

    /// Run the full workflow for one query, returning a stream of protocol
    /// events. The stream ends with exactly one terminal event.
    #[instrument(skip(self, query))]
    pub fn run(&self, query: String, session_id: String) -> EventStream {
        let events = stream! {
            yield status_event("planning", "creating research plan");

            let mut plan = match self.planner.create_research_plan(&query).await {
                Ok(plan) => plan,
                Err(err) => {
                    yield session_error_event(&err);
                    return;
                }
            };
            self.memory.set_plan(plan.clone()).await;
            yield StreamEvent::Plan {
                data: json!({ "main_question": plan.main_question, "sub_questions": plan.sub_questions }),
                timestamp: Utc::now(),
            };

            let mut checklist: Option<VerifiableChecklist> = if self.config.enable_verifiable_checklist {
                match build_verifiable_checklist(&self.checklist_client, &plan, &query, session_id.clone()).await {
                    Ok(c) => Some(c),
                    Err(err) => {
                        warn!("checklist build failed, continuing without it: {err}");
                        None
                    }
                }
            } else {
                None
            };

            // Search phase: run rounds until enough papers are gathered or
            // rounds are exhausted.
            let mut round = 0usize;
            let mut current_query = plan
                .search_strategies
                .first()
                .map(|s| s.query.clone())
                .unwrap_or_else(|| query.clone());

            while round < self.config.max_search_rounds {
                yield StreamEvent::SearchStart {
                    data: json!({ "round": round, "query": current_query }),
                    timestamp: Utc::now(),
                };

                let opts = SearchOptions::new(current_query.clone()).with_limit(self.config.max_papers_per_round);
                let concurrency = self.config.parallel_search_concurrency;
                match self.aggregator.search(opts, concurrency, Some(session_id.as_str())).await {
                    Ok(result) => {
                        let paper_ids: Vec<String> = result.papers.iter().map(|p| p.id.clone()).collect();
                        self.memory.add_papers(result.papers).await;
                        self.memory
                            .add_search_round(SearchRound {
                                query: current_query.clone(),
                                sources_queried: result.successful_sources.iter().map(|s| s.to_string()).collect(),
                                paper_ids: paper_ids.clone(),
                                started_at: Utc::now(),
                            })
                            .await;
                        yield StreamEvent::PapersFound {
                            data: json!({ "round": round, "count": paper_ids.len(), "total_hits": result.total_hits }),
                            timestamp: Utc::now(),
                        };
                    }
                    Err(err) => {
                        warn!("search round {round} failed: {err}");
                        yield StreamEvent::DataLogLine {
                            data: json!({ "level": "warn", "message": format!("search round {round} failed: {err}") }),
                            timestamp: Utc::now(),
                        };
                    }
                }

                round += 1;
                let papers_so_far = self.memory.papers().await;
                if !should_continue_searching(papers_so_far.len(), round, &self.config) {
                    break;
                }

                match self
                    .planner
                    .refine_search_query(&current_query, &format!("{} papers so far", papers_so_far.len()), &plan.main_question)
                    .await
                {
                    Ok(refined) => current_query = refined.query,
                    Err(err) => {
                        warn!("query refinement failed, repeating last query: {err}");
                    }
                }
            }

            // Iteration loop: analyze/enrich -> write -> audit -> review -> decide.
            let mut critic_feedback_text: Option<String> = None;
            let mut final_report = None;
            let mut latest_papers: Vec<Paper> = Vec::new();

            loop {
                let iteration = self.memory.increment_iteration().await;
                yield StreamEvent::WritingStart {
                    data: json!({ "iteration": iteration }),
                    timestamp: Utc::now(),
                };

                let mut papers = self.memory.papers().await;
                enrich_top_papers(&self.enricher, &mut papers).await;
                for paper in papers.iter().take(10) {
                    self.memory.update_paper(paper.clone()).await;
                }
                latest_papers = papers.clone();

                let writer_stream = match self
                    .writer
                    .write_report(&plan, &papers, critic_feedback_text.as_deref(), iteration, self.config.citation_style)
                    .await
                {
                    Ok(s) => s,
                    Err(err) => {
                        yield session_error_event(&err);
                        return;
                    }
                };

                let mut report = None;
                futures::pin_mut!(writer_stream);
                while let Some(writer_event) = writer_stream.next().await {
                    match writer_event {
                        WriterEvent::Content { text } => {
                            yield StreamEvent::Content { data: json!({ "text": text }), timestamp: Utc::now() };
                        }
                        WriterEvent::Section { title, level } => {
                            yield StreamEvent::DataLogLine {
                                data: json!({ "section": title, "level": level }),
                                timestamp: Utc::now(),
                            };
                        }
                        WriterEvent::CitationUsed { citation_id } => {
                            yield StreamEvent::Citation { data: json!({ "citation_id": citation_id }), timestamp: Utc::now() };
                        }
                        WriterEvent::Complete { report: r } => report = Some(r),
                    }
                }

                let report = match report {
                    Some(r) => r,
                    None => {
                        yield session_error_event(&Error::invariant("writer stream ended without a Complete event"));
                        return;
                    }
                };
                self.memory.save_report_version(report.title.clone()).await;

                let report_body: String = report.sections.iter().map(|s| s.content.as_str()).collect::<Vec<_>>().join("\n");

                if self.config.enable_evidence_audit {
                    match self.auditor.extract_claims(&report_body).await {
                        Ok(claims) => {
                            let citation_to_paper: std::collections::HashMap<u32, Paper> = report
                                .citations
                                .iter()
                                .filter_map(|c| papers.iter().find(|p| p.id == c.paper_id).map(|p| (c.id, p.clone())))
                                .collect();
                            match self.auditor.audit_evidence(&claims, &citation_to_paper, &papers).await {
                                Ok(audit) => {
                                    yield StreamEvent::DataQuality {
                                        id: "evidence-audit".to_string(),
                                        data: json!({
                                            "grounding_score": audit.overall_grounding_score,
                                            "contradicted": audit.contradicted,
                                            "unsupported": audit.unsupported,
                                        }),
                                        timestamp: Utc::now(),
                                    };
                                    if !audit_passes_threshold(&audit, MIN_GROUNDING_SCORE, MAX_CONTRADICTIONS) {
                                        self.memory.add_gap("evidence audit below threshold".to_string()).await;
                                    }
                                }
                                Err(err) => warn!("evidence audit failed: {err}"),
                            }
                        }
                        Err(err) => warn!("claim extraction failed: {err}"),
                    }
                }

                let cited_open_access: Vec<bool> = report
                    .citations
                    .iter()
                    .filter_map(|c| papers.iter().find(|p| p.id == c.paper_id).map(|p| p.open_access))
                    .collect();
                let metrics = calculate_quality_metrics(
                    &report_body,
                    &report.citations,
                    &cited_open_access,
                    &plan.sub_questions,
                    Utc::now().year(),
                );
                let analysis = match self.critic.analyze_report(&report, &plan.sub_questions).await {
                    Ok(a) => a,
                    Err(err) => {
                        yield session_error_event(&err);
                        return;
                    }
                };
                yield StreamEvent::Analysis {
                    data: json!({ "overall_score": analysis.overall_score, "should_iterate": analysis.should_iterate }),
                    timestamp: Utc::now(),
                };

                let max_iterations = self.config.max_iterations as u32;
                let gate = evaluate_quality(metrics, analysis, iteration, &self.config.quality_gate, max_iterations);

                match gate.decision {
                    GateDecision::Pass => {
                        final_report = Some(report);
                        break;
                    }
                    GateDecision::Fail => {
                        yield session_error_event(&Error::invariant(format!("quality gate failed: {}", gate.reason)));
                        return;
                    }
                    GateDecision::Iterate => {
                        critic_feedback_text = Some(gate.reason.clone());
                        let feedback = CriticFeedback {
                            overall_score: gate.analysis.overall_score,
                            gaps: gate.analysis.gaps_identified.clone(),
                            suggested_searches: gate.analysis.suggested_searches.clone(),
                        };
                        let known_titles: Vec<String> = papers.iter().map(|p| p.title.clone()).collect();
                        if let Ok(refinement) = self.planner.refine_plan_from_feedback(&plan, &feedback, &known_titles).await {
                            for gap in &feedback.gaps {
                                self.memory.add_gap(gap.clone()).await;
                            }

                            plan.sub_questions.extend(refinement.additional_sub_questions.iter().cloned());
                            plan.search_strategies.extend(refinement.additional_search_strategies.iter().cloned());
                            if let Some(sections) = refinement.refined_sections.clone() {
                                plan.expected_sections = sections;
                            }
                            self.memory.set_plan(plan.clone()).await;

                            let gap_queries: Vec<String> = refinement
                                .gap_mappings
                                .values()
                                .flatten()
                                .cloned()
                                .take(3)
                                .collect();
                            for gap_query in gap_queries {
                                yield StreamEvent::SearchStart {
                                    data: json!({ "gap_search": true, "query": gap_query }),
                                    timestamp: Utc::now(),
                                };
                                let opts = SearchOptions::new(gap_query.clone()).with_limit(self.config.max_papers_per_round);
                                match self
                                    .aggregator
                                    .search(opts, self.config.parallel_search_concurrency, Some(session_id.as_str()))
                                    .await
                                {
                                    Ok(result) => {
                                        let paper_ids: Vec<String> = result.papers.iter().map(|p| p.id.clone()).collect();
                                        self.memory.add_papers(result.papers).await;
                                        self.memory
                                            .add_search_round(SearchRound {
                                                query: gap_query.clone(),
                                                sources_queried: result.successful_sources.iter().map(|s| s.to_string()).collect(),
                                                paper_ids,
                                                started_at: Utc::now(),
                                            })
                                            .await;
                                    }
                                    Err(err) => warn!("gap search '{gap_query}' failed: {err}"),
                                }
                            }
                        }
                        continue;
                    }
                }
            }

            let Some(report) = final_report else {
                yield session_error_event(&Error::invariant("iteration loop ended without a final report"));
                return;
            };

            if let Some(checklist) = checklist.as_mut() {
                if let Err(err) = verify_checklist(&self.checklist_client, checklist, &report, &latest_papers).await {
                    warn!("checklist verification failed: {err}");
                }
                yield StreamEvent::DataTodo {
                    id: "verifiable-checklist".to_string(),
                    data: json!({ "progress": checklist.progress, "items": checklist.items.len() }),
                    timestamp: Utc::now(),
                };
            }

            yield StreamEvent::Complete {
                data: json!({
                    "title": report.title,
                    "citation_count": report.citations.len(),
                    "iteration_count": report.iteration_count,
                }),
                timestamp: Utc::now(),
            };
            yield StreamEvent::SessionComplete {
                data: json!({ "session_id": session_id }),
                timestamp: Utc::now(),
            };
        };

        Box::pin(events)
    }
}

/// Generates a fresh session id, as the `start` control endpoint does for a
/// caller that doesn't supply its own.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Enrich the handful of highest-availability papers up to full text so the
/// writer gets richer source material without paying for the whole corpus.
async fn enrich_top_papers(enricher: &Enricher, papers: &mut [Paper]) {
    for paper in papers.iter_mut().take(10) {
        if let Ok(result) = enricher.enrich(paper.clone(), DataAvailability::WithFullText).await {
            *paper = result.paper;
        }
    }
}

/// Heuristic gate on whether another search round is worth running: stop
/// once enough papers are in hand or the round budget is spent.
fn should_continue_searching(papers_so_far: usize, rounds_run: usize, config: &CoordinatorConfig) -> bool {
    rounds_run < config.max_search_rounds && papers_so_far < config.min_papers_required
}

fn status_event(stage: &str, message: &str) -> StreamEvent {
    StreamEvent::Status {
        data: json!({ "stage": stage, "message": message }),
        timestamp: Utc::now(),
    }
}

fn session_error_event(err: &Error) -> StreamEvent {
    StreamEvent::SessionError {
        data: json!({ "message": err.to_string(), "category": format!("{:?}", err.user_category()) }),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterRegistry, SourceName, StaticAdapter};
    use crate::aggregator::AggregatorConfig;
    use crate::config::CoordinatorConfig;
    use crate::error::Result as CrateResult;
    use crate::llm::{CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider, TokenUsage};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Clone)]
    struct ScriptedClient;

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn complete(&self, request: CompletionRequest) -> CrateResult<CompletionResponse> {
            let prompt = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let content = if prompt.contains("Produce a research plan") {
                "MAIN_QUESTION: How do transformers improve summarization?\n\
                 SUB_QUESTION: What architectures are used?\n\
                 STRATEGY: transformer summarization | core query\n\
                 SECTION: Introduction\n\
                 SECTION: Conclusion\n"
                    .to_string()
            } else if prompt.contains("Write an academic report") {
                "# How do transformers improve summarization?\n\n## Abstract\nShort summary.\n\n## Findings\nTransformers help [1].\n"
                    .to_string()
            } else if prompt.contains("checkable item") {
                "covers architectures\ncovers datasets\ncovers baselines\ncovers metrics\ncovers limitations\n\
                 covers future work\ncovers related work\ncovers evaluation"
                    .to_string()
            } else if prompt.contains("Critique this report") {
                "overall_score: 85".to_string()
            } else {
                "verified".to_string()
            };
            Ok(CompletionResponse {
                id: "scripted".into(),
                model: "scripted-model".into(),
                content,
                stop_reason: None,
                usage: TokenUsage::default(),
                timestamp: Utc::now(),
                cost: Some(0.0),
            })
        }

        async fn embed(&self, _request: EmbeddingRequest) -> CrateResult<EmbeddingResponse> {
            Err(Error::llm("embeddings not supported by scripted client"))
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![]
        }
    }

    fn sample_paper(id: &str) -> Paper {
        let mut p = Paper::new(id, "A Transformer Paper");
        p.abstract_text = Some("Transformers improve summarization.".to_string());
        p.year = Some(2022);
        p
    }

    #[tokio::test]
    async fn full_run_ends_with_a_terminal_event() {
        let registry = AdapterRegistry::new().with_adapter(Arc::new(StaticAdapter::new(
            SourceName::SemanticScholar,
            vec![sample_paper("s2-1"), sample_paper("s2-2")],
        )));
        let aggregator = Aggregator::new(registry, AggregatorConfig { min_successful_sources: 1, ..Default::default() });
        let enrich_registry = AdapterRegistry::new();
        let enricher = Enricher::new(enrich_registry, chrono::Duration::minutes(5));

        let config = CoordinatorConfig::new().with_max_iterations(1).with_max_search_rounds(1).with_min_papers_required(1);
        let coordinator = Coordinator::new(ScriptedClient, aggregator, enricher, config);

        let mut events = coordinator.run("transformer summarization".to_string(), "session-1".to_string());
        let mut saw_terminal = false;
        while let Some(event) = events.next().await {
            if event.is_terminal() {
                saw_terminal = true;
            }
        }
        assert!(saw_terminal);
    }

    #[test]
    fn new_session_id_generates_distinct_values() {
        assert_ne!(new_session_id(), new_session_id());
    }

    #[test]
    fn should_continue_searching_stops_at_round_budget() {
        let config = CoordinatorConfig::new().with_max_search_rounds(2);
        assert!(!should_continue_searching(0, 2, &config));
        assert!(should_continue_searching(0, 1, &config));
    }
}
