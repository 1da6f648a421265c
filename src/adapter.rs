//! Source adapter contract: the uniform interface every vendor (Semantic
//! Scholar, OpenAlex, arXiv, PubMed, CORE) implements. Concrete per-vendor
//! HTTP clients live outside this crate; here we define the trait plus a
//! `StaticAdapter` fake used by the aggregator's own tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::error::Result;
use crate::paper::Paper;

/// A known vendor, and the id prefix it owns so the aggregator can route
/// `get_paper` without ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceName {
    SemanticScholar,
    OpenAlex,
    Arxiv,
    Pubmed,
    Core,
}

impl SourceName {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::SemanticScholar => "s2-",
            Self::OpenAlex => "oa-",
            Self::Arxiv => "arxiv-",
            Self::Pubmed => "pubmed-",
            Self::Core => "core-",
        }
    }

    pub fn owns_id(&self, id: &str) -> bool {
        id.starts_with(self.id_prefix())
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SemanticScholar => "semantic-scholar",
            Self::OpenAlex => "openalex",
            Self::Arxiv => "arxiv",
            Self::Pubmed => "pubmed",
            Self::Core => "core",
        };
        write!(f, "{s}")
    }
}

/// Sort order requested of a source's native ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Relevance,
    Citations,
    Date,
}

/// Options for a single `search` call against one adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: String,
    pub limit: usize,
    pub offset: usize,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub open_access: Option<bool>,
    pub sort_by: SortBy,
}

impl SearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 20,
            offset: 0,
            year_from: None,
            year_to: None,
            open_access: None,
            sort_by: SortBy::Relevance,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_year_range(mut self, from: Option<i32>, to: Option<i32>) -> Self {
        self.year_from = from;
        self.year_to = to;
        self
    }

    pub fn with_open_access(mut self, open_access: bool) -> Self {
        self.open_access = Some(open_access);
        self
    }

    pub fn with_sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }
}

/// Result of a single adapter's `search` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSearchResult {
    pub papers: Vec<Paper>,
    pub total_hits: u64,
    pub source: SourceName,
    pub next_cursor: Option<String>,
}

/// The contract every source adapter implements. Adapters must not error
/// on "no results" — they return an empty `SourceSearchResult`. They return
/// a typed `Error` only for genuine transport failures, and are
/// responsible for their own inter-request throttling.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> SourceName;

    async fn search(&self, opts: &SearchOptions) -> Result<SourceSearchResult>;

    async fn get_paper(&self, id: &str) -> Result<Option<Paper>>;

    async fn is_available(&self) -> bool;
}

/// In-memory fake adapter backed by a fixed paper corpus. Used to exercise
/// the aggregator's fan-out, retry, dedup, and merge logic without network
/// access. Can be configured to fail a given number of times before
/// succeeding, to exercise the retry path.
pub struct StaticAdapter {
    name: SourceName,
    papers: Vec<Paper>,
    fail_times: Mutex<u32>,
    available: bool,
}

impl StaticAdapter {
    pub fn new(name: SourceName, papers: Vec<Paper>) -> Self {
        Self {
            name,
            papers,
            fail_times: Mutex::new(0),
            available: true,
        }
    }

    /// Make the next N `search` calls fail with a transient error before
    /// succeeding, to exercise `searchWithRetry`.
    pub fn failing_n_times(mut self, n: u32) -> Self {
        self.fail_times = Mutex::new(n);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn into_arc(self) -> Arc<dyn SourceAdapter> {
        Arc::new(self)
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn name(&self) -> SourceName {
        self.name
    }

    async fn search(&self, opts: &SearchOptions) -> Result<SourceSearchResult> {
        {
            let mut remaining = self.fail_times.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(crate::error::Error::transport_transient(format!(
                    "{} temporarily unavailable",
                    self.name
                )));
            }
        }

        let query_lower = opts.query.to_lowercase();
        let mut matches: Vec<Paper> = self
            .papers
            .iter()
            .filter(|p| {
                query_lower.is_empty()
                    || p.title.to_lowercase().contains(&query_lower)
                    || p.abstract_text
                        .as_deref()
                        .is_some_and(|a| a.to_lowercase().contains(&query_lower))
            })
            .filter(|p| opts.year_from.map_or(true, |y| p.year.map_or(false, |py| py >= y)))
            .filter(|p| opts.year_to.map_or(true, |y| p.year.map_or(false, |py| py <= y)))
            .filter(|p| opts.open_access.map_or(true, |oa| p.open_access == oa))
            .cloned()
            .collect();

        match opts.sort_by {
            SortBy::Citations => matches.sort_by(|a, b| b.citation_count.cmp(&a.citation_count)),
            SortBy::Date => matches.sort_by(|a, b| b.year.cmp(&a.year)),
            SortBy::Relevance => {}
        }

        let total_hits = matches.len() as u64;
        matches.truncate(opts.limit);

        Ok(SourceSearchResult {
            papers: matches,
            total_hits,
            source: self.name,
            next_cursor: None,
        })
    }

    async fn get_paper(&self, id: &str) -> Result<Option<Paper>> {
        Ok(self.papers.iter().find(|p| p.id == id).cloned())
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}

/// A registry of source adapters keyed by name, used by the Aggregator to
/// look up the adapter that owns a given paper id (via its prefix).
pub struct AdapterRegistry {
    adapters: HashMap<SourceName, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.name(), adapter);
        self
    }

    pub fn get(&self, name: SourceName) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(&name)
    }

    pub fn adapter_for_id(&self, id: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .find(|(name, _)| name.owns_id(id))
            .map(|(_, adapter)| adapter)
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceName> + '_ {
        self.adapters.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceName, &Arc<dyn SourceAdapter>)> {
        self.adapters.iter()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_papers() -> Vec<Paper> {
        vec![
            Paper::new("s2-1", "Transformer Architectures for Code Summarization"),
            Paper::new("s2-2", "Attention Is All You Need"),
        ]
    }

    #[tokio::test]
    async fn static_adapter_filters_by_query() {
        let adapter = StaticAdapter::new(SourceName::SemanticScholar, sample_papers());
        let result = adapter
            .search(&SearchOptions::new("transformer"))
            .await
            .unwrap();
        assert_eq!(result.papers.len(), 1);
        assert_eq!(result.source, SourceName::SemanticScholar);
    }

    #[tokio::test]
    async fn static_adapter_retries_then_succeeds() {
        let adapter = StaticAdapter::new(SourceName::Arxiv, sample_papers()).failing_n_times(2);
        assert!(adapter.search(&SearchOptions::new("")).await.is_err());
        assert!(adapter.search(&SearchOptions::new("")).await.is_err());
        assert!(adapter.search(&SearchOptions::new("")).await.is_ok());
    }

    #[test]
    fn id_prefixes_route_unambiguously() {
        let registry = AdapterRegistry::new()
            .with_adapter(StaticAdapter::new(SourceName::SemanticScholar, vec![]).into_arc())
            .with_adapter(StaticAdapter::new(SourceName::Arxiv, vec![]).into_arc());

        assert_eq!(
            registry.adapter_for_id("s2-123").unwrap().name(),
            SourceName::SemanticScholar
        );
        assert_eq!(
            registry.adapter_for_id("arxiv-456").unwrap().name(),
            SourceName::Arxiv
        );
    }
}
