//! Per-session research memory: a single-writer, in-process accumulator.
//!
//! This is a plain `Arc<RwLock<...>>`-backed struct, not a SQL-backed store —
//! persistence is explicitly out of scope and a session's memory lives and
//! dies with its session. The donor's `memory::store` evolution/promotion
//! bookkeeping shapes the accessor API here, without the SQL underneath.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::paper::Paper;
use crate::planner::ResearchPlan;

/// One round of search activity: the query issued, sources queried, and
/// the papers the round contributed (by id, resolved against `papers`).
#[derive(Debug, Clone)]
pub struct SearchRound {
    pub query: String,
    pub sources_queried: Vec<String>,
    pub paper_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
}

struct State {
    plan: Option<ResearchPlan>,
    papers: HashMap<String, Paper>,
    search_rounds: Vec<SearchRound>,
    gaps: Vec<String>,
    insights: Vec<String>,
    iteration_count: u32,
    report_versions: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            plan: None,
            papers: HashMap::new(),
            search_rounds: Vec::new(),
            gaps: Vec::new(),
            insights: Vec::new(),
            iteration_count: 0,
            report_versions: Vec::new(),
        }
    }
}

/// Session-scoped research memory. Cheap to clone (shares the inner lock).
#[derive(Clone)]
pub struct ResearchMemory {
    state: Arc<RwLock<State>>,
}

impl ResearchMemory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    pub async fn set_plan(&self, plan: ResearchPlan) {
        self.state.write().await.plan = Some(plan);
    }

    pub async fn plan(&self) -> Option<ResearchPlan> {
        self.state.read().await.plan.clone()
    }

    pub async fn add_search_round(&self, round: SearchRound) {
        self.state.write().await.search_rounds.push(round);
    }

    pub async fn search_rounds(&self) -> Vec<SearchRound> {
        self.state.read().await.search_rounds.clone()
    }

    /// Insert papers by canonical id; re-adding an existing id is a no-op
    /// (callers enrich via the Aggregator/Enricher, not by overwriting here).
    pub async fn add_papers(&self, papers: Vec<Paper>) {
        let mut state = self.state.write().await;
        for paper in papers {
            state.papers.entry(paper.id.clone()).or_insert(paper);
        }
    }

    pub async fn get_paper(&self, id: &str) -> Option<Paper> {
        self.state.read().await.papers.get(id).cloned()
    }

    /// Overwrite an existing paper's record outright — used after enrichment
    /// raises a paper's data availability, so the upgrade is visible to every
    /// subsequent memory read rather than staying local to a transient copy.
    pub async fn update_paper(&self, paper: Paper) {
        self.state.write().await.papers.insert(paper.id.clone(), paper);
    }

    pub async fn papers(&self) -> Vec<Paper> {
        self.state.read().await.papers.values().cloned().collect()
    }

    pub async fn add_gap(&self, gap: impl Into<String>) {
        self.state.write().await.gaps.push(gap.into());
    }

    pub async fn gaps(&self) -> Vec<String> {
        self.state.read().await.gaps.clone()
    }

    pub async fn add_insight(&self, insight: impl Into<String>) {
        self.state.write().await.insights.push(insight.into());
    }

    pub async fn insights(&self) -> Vec<String> {
        self.state.read().await.insights.clone()
    }

    pub async fn increment_iteration(&self) -> u32 {
        let mut state = self.state.write().await;
        state.iteration_count += 1;
        state.iteration_count
    }

    pub async fn iteration_count(&self) -> u32 {
        self.state.read().await.iteration_count
    }

    pub async fn save_report_version(&self, content: impl Into<String>) {
        self.state.write().await.report_versions.push(content.into());
    }

    pub async fn report_versions(&self) -> Vec<String> {
        self.state.read().await.report_versions.clone()
    }
}

impl Default for ResearchMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn papers_are_a_set_by_id() {
        let memory = ResearchMemory::new();
        let p1 = Paper::new("s2-1", "First Version");
        let p2 = Paper::new("s2-1", "Duplicate Id, Different Title");
        memory.add_papers(vec![p1]).await;
        memory.add_papers(vec![p2]).await;

        let papers = memory.papers().await;
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].title, "First Version");
    }

    #[tokio::test]
    async fn search_rounds_are_append_only() {
        let memory = ResearchMemory::new();
        for i in 0..3 {
            memory
                .add_search_round(SearchRound {
                    query: format!("query {i}"),
                    sources_queried: vec!["openalex".into()],
                    paper_ids: vec![],
                    started_at: Utc::now(),
                })
                .await;
        }
        assert_eq!(memory.search_rounds().await.len(), 3);
    }

    #[tokio::test]
    async fn iteration_count_monotonically_increases() {
        let memory = ResearchMemory::new();
        assert_eq!(memory.increment_iteration().await, 1);
        assert_eq!(memory.increment_iteration().await, 2);
        assert_eq!(memory.iteration_count().await, 2);
    }

    #[tokio::test]
    async fn get_paper_is_direct_lookup() {
        let memory = ResearchMemory::new();
        memory.add_papers(vec![Paper::new("oa-1", "A Paper")]).await;
        assert!(memory.get_paper("oa-1").await.is_some());
        assert!(memory.get_paper("oa-2").await.is_none());
    }

    #[tokio::test]
    async fn update_paper_overwrites_the_existing_record() {
        let memory = ResearchMemory::new();
        memory.add_papers(vec![Paper::new("oa-1", "Before Enrichment")]).await;

        let mut enriched = Paper::new("oa-1", "Before Enrichment");
        enriched.full_text = Some("full body text".to_string());
        memory.update_paper(enriched).await;

        let stored = memory.get_paper("oa-1").await.unwrap();
        assert_eq!(stored.full_text.as_deref(), Some("full body text"));
    }
}
