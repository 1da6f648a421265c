//! # research-coordinator
//!
//! Orchestration engine for staged, evidence-audited deep research: planning,
//! multi-source aggregation, streaming writing, and quality-gated iteration.
//!
//! ## Core Components
//!
//! - **Planner**: decomposes a query into a research plan and refines it
//!   from search results and critic feedback.
//! - **Aggregator**: fans out a query across source adapters, deduplicates,
//!   merges, and caches results.
//! - **Enrichment**: raises a paper's data availability and formats corpora
//!   to a workflow stage's token budget.
//! - **Writer**: streams a cited report from the current corpus.
//! - **Critic / Auditor**: deterministic quality metrics, LLM critique, and
//!   per-claim evidence verification feeding the quality gate.
//! - **Coordinator**: the workflow state machine tying every stage together
//!   and streaming protocol events for the whole run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use research_coordinator::{Coordinator, CoordinatorConfig};
//! use std::sync::Arc;
//!
//! let client: Arc<dyn research_coordinator::LLMClient> = my_client();
//! let coordinator = Coordinator::new(client, aggregator, enricher, CoordinatorConfig::default());
//! let mut events = coordinator.run("How do transformers improve summarization?".into(), "session-1".into());
//! ```

// Self-alias for derive macro support within the crate
extern crate self as research_coordinator;

pub mod adapter;
pub mod aggregator;
pub mod auditor;
pub mod checklist;
pub mod config;
pub mod coordinator;
pub mod critic;
pub mod enrichment;
pub mod error;
pub mod events;
pub mod llm;
pub mod memory;
pub mod paper;
pub mod planner;
pub mod writer;

pub use adapter::{
    AdapterRegistry, SearchOptions, SortBy, SourceAdapter, SourceName, SourceSearchResult,
    StaticAdapter,
};
pub use aggregator::{
    AggregatedSearchResult, Aggregator, AggregatorConfig, Domain, HealthReport, HealthTracker,
    RetryConfig, SourceHealthStatus,
};
pub use auditor::{
    audit_passes_threshold, Auditor, Claim, ClaimAuditEntry, ClaimCategory, ClaimVerification,
    EvidenceAuditResult, HallucinationCategory, HallucinationFlag, VerificationStatus,
};
pub use checklist::{
    build_verifiable_checklist, verify_checklist, verify_checklist_item, ChecklistItem,
    ChecklistStatus, VerifiableChecklist,
};
pub use config::{CitationStyle, CoordinatorConfig, QualityGateConfig};
pub use coordinator::{new_session_id, Coordinator};
pub use critic::{
    calculate_quality_metrics, evaluate_quality, Critic, CriticAnalysis, GateDecision,
    Hallucination, HallucinationSeverity, QualityGateResult, QualityMetrics,
};
pub use enrichment::{
    extract_sections, format_corpus, format_for_stage, EnrichmentResult, Enricher,
    FormattedPaper, HttpPdfFetcher, PdfFetcher, SectionExtractor, Stage, StageBudget,
    StaticPdfFetcher, DEFAULT_SIZE_CAP_BYTES,
};
pub use error::{Error, Result};
pub use events::{reconcile, reconcile_stream, AgentEvent, EventStream, StepStatus, StreamEvent};
pub use llm::{
    AnthropicClient, BatchConfig, BatchExecutor, BatchQueryResult, BatchedLLMQuery,
    BatchedQueryResults, ChatMessage, ClientConfig, CompletionRequest, CompletionResponse,
    CostTracker, DualModelConfig, LLMClient, ModelCallTier, ModelSpec, ModelTier,
    MultiProviderClient, Provider, QueryType, RoutingContext, SmartRouter, SwitchStrategy,
    TierBreakdown, TokenUsage, TrackedClient,
};
#[cfg(feature = "gemini")]
pub use llm::GoogleClient;
pub use memory::{ResearchMemory, SearchRound};
pub use paper::{Author, DataAvailability, Paper, PaperSection, SectionType};
pub use planner::{
    CriticFeedback, Planner, PlanRefinement, RefinedQuery, ResearchPlan, SearchStrategy,
};
pub use writer::{build_citation_registry, Citation, ReportSection, ResearchReport, Writer, WriterEvent};
