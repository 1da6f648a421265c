//! The multi-source search aggregator: smart source selection, a process
//! wide query cache, parallel fan-out with per-source retry and fallback,
//! deduplication, field-level merge, filtering, sorting, and health
//! tracking. Grounded in the LLM layer's `BatchExecutor`/`ProviderRateLimiter`
//! (semaphore-gated fan-out with exponential backoff) and `PromptCache`
//! (TTL-bounded hit/miss tracking).

mod cache;
mod dedup;
mod domain;
mod health;

pub use cache::TtlCache;
pub use dedup::{deduplicate, merge_papers, title_similarity, DedupResult, TITLE_SIMILARITY_THRESHOLD};
pub use domain::Domain;
pub use health::{HealthReport, HealthTracker, SourceHealthStatus};

use chrono::Duration as ChronoDuration;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, warn};

use crate::adapter::{AdapterRegistry, SearchOptions, SourceAdapter, SourceName};
use crate::error::{Error, Result};
use crate::paper::Paper;

/// Retry policy for a single source's search attempts, shaped like the LLM
/// layer's `RetryConfig`: `base_delay_ms * backoff_factor^attempt`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let millis = (self.base_delay_ms as f64 * factor).round().max(0.0) as u64;
        Duration::from_millis(millis)
    }
}

/// Aggregator-level configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub per_source_timeout: Duration,
    pub retry: RetryConfig,
    pub min_successful_sources: usize,
    pub enable_smart_source_selection: bool,
    pub enabled_sources: Vec<SourceName>,
    pub query_cache_ttl: ChronoDuration,
    pub min_citations: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            per_source_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            min_successful_sources: 1,
            enable_smart_source_selection: true,
            enabled_sources: vec![
                SourceName::SemanticScholar,
                SourceName::OpenAlex,
                SourceName::Arxiv,
                SourceName::Pubmed,
                SourceName::Core,
            ],
            query_cache_ttl: ChronoDuration::minutes(10),
            min_citations: 0,
        }
    }
}

/// Result of one source's contribution to a round, successful or not.
struct SourceAttempt {
    source: SourceName,
    outcome: std::result::Result<Vec<Paper>, String>,
}

/// Outcome of an aggregated search across one or more sources.
#[derive(Debug)]
pub struct AggregatedSearchResult {
    pub papers: Vec<Paper>,
    pub total_hits: u64,
    pub per_source_counts: HashMap<SourceName, u64>,
    pub deduped_count: usize,
    pub successful_sources: Vec<SourceName>,
    pub failed_sources: Vec<(SourceName, String)>,
    pub from_cache: bool,
}

type CacheKey = (Option<String>, String, Option<i32>, Option<i32>, Option<bool>);

pub struct Aggregator {
    registry: AdapterRegistry,
    config: AggregatorConfig,
    query_cache: TtlCache<CacheKey, AggregatedSearchResult>,
    health: HealthTracker,
}

impl Aggregator {
    pub fn new(registry: AdapterRegistry, config: AggregatorConfig) -> Self {
        let query_cache = TtlCache::new(config.query_cache_ttl);
        let health = HealthTracker::new(config.min_successful_sources);
        Self {
            registry,
            config,
            query_cache,
            health,
        }
    }

    /// Select which sources to query: smart domain-based top-3 if enabled
    /// and the query is non-empty, otherwise the full configured set.
    fn select_sources(&self, query: &str) -> Vec<SourceName> {
        if self.config.enable_smart_source_selection && !query.trim().is_empty() {
            let domain = Domain::classify(query);
            domain
                .preferred_sources()
                .into_iter()
                .filter(|s| self.registry.get(*s).is_some())
                .collect()
        } else {
            self.config
                .enabled_sources
                .iter()
                .copied()
                .filter(|s| self.registry.get(*s).is_some())
                .collect()
        }
    }

    /// Run one source's search with timeout + non-retryable short-circuit +
    /// exponential backoff, recording failures into the health tracker.
    #[instrument(skip(self, opts), fields(source = %source))]
    async fn search_with_retry(&self, source: SourceName, opts: &SearchOptions) -> SourceAttempt {
        let adapter = match self.registry.get(source) {
            Some(a) => a.clone(),
            None => {
                return SourceAttempt {
                    source,
                    outcome: Err("no adapter registered".to_string()),
                }
            }
        };

        let mut attempt = 0u32;
        loop {
            let call = timeout(self.config.per_source_timeout, adapter.search(opts));
            let outcome = match call.await {
                Ok(Ok(result)) => Ok(result.papers),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(Error::transport_transient(format!(
                    "{source} timed out after {:?}",
                    self.config.per_source_timeout
                ))),
            };

            match outcome {
                Ok(papers) => {
                    return SourceAttempt {
                        source,
                        outcome: Ok(papers),
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    self.health.record_error(source, message.clone(), attempt).await;

                    let retryable = is_retryable(&err);
                    if !retryable || attempt >= self.config.retry.max_retries {
                        return SourceAttempt {
                            source,
                            outcome: Err(message),
                        };
                    }

                    let delay = self.config.retry.delay_for_attempt(attempt);
                    debug!(?delay, attempt, "retrying source after transient failure");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run the fan-out for a fixed set of sources, bounded by a semaphore,
    /// like `BatchExecutor::execute`.
    async fn fan_out(&self, sources: &[SourceName], opts: &SearchOptions, concurrency: usize) -> Vec<SourceAttempt> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let tasks = sources.iter().map(|&source| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.search_with_retry(source, opts).await
            }
        });
        join_all(tasks).await
    }

    /// Run the full aggregated search: cache check, source selection,
    /// fan-out, fallback chain on insufficient successes, dedup, merge,
    /// filter, and sort. `session_id`, when given, scopes the query cache so
    /// two sessions issuing the same query never share a cached result.
    #[instrument(skip(self, opts), fields(query = %opts.query))]
    pub async fn search(
        &self,
        opts: SearchOptions,
        concurrency: usize,
        session_id: Option<&str>,
    ) -> Result<AggregatedSearchResult> {
        let cache_key: CacheKey = (
            session_id.map(|s| s.to_string()),
            opts.query.to_lowercase(),
            opts.year_from,
            opts.year_to,
            opts.open_access,
        );
        if let Some(cached) = self.query_cache.get(&cache_key).await {
            let mut cached = cached;
            cached.from_cache = true;
            return Ok(cached);
        }

        let primary = self.select_sources(&opts.query);
        let mut attempts = self.fan_out(&primary, &opts, concurrency).await;

        let successful = attempts.iter().filter(|a| a.outcome.is_ok()).count();
        if successful < self.config.min_successful_sources {
            let fallback_candidates: Vec<SourceName> = self
                .config
                .enabled_sources
                .iter()
                .copied()
                .filter(|s| !primary.contains(s) && self.registry.get(*s).is_some())
                .collect();

            if !fallback_candidates.is_empty() {
                warn!(
                    successful,
                    required = self.config.min_successful_sources,
                    "primary sources insufficient, trying fallback chain"
                );
                let fallback_attempts = self.fan_out(&fallback_candidates, &opts, concurrency).await;
                attempts.extend(fallback_attempts);
            }
        }

        let total_successful = attempts.iter().filter(|a| a.outcome.is_ok()).count();
        if total_successful == 0 {
            let per_source: HashMap<String, String> = attempts
                .iter()
                .filter_map(|a| a.outcome.as_ref().err().map(|e| (a.source.to_string(), e.clone())))
                .collect();
            return Err(Error::aggregation_insufficient(0, attempts.len(), per_source));
        }

        let mut per_source_counts = HashMap::new();
        let mut successful_sources = Vec::new();
        let mut failed_sources = Vec::new();
        let mut all_papers = Vec::new();

        for attempt in attempts {
            match attempt.outcome {
                Ok(papers) => {
                    per_source_counts.insert(attempt.source, papers.len() as u64);
                    successful_sources.push(attempt.source);
                    all_papers.extend(papers);
                }
                Err(message) => {
                    failed_sources.push((attempt.source, message));
                }
            }
        }

        let total_hits = all_papers.len() as u64;
        let dedup = deduplicate(all_papers);
        let mut papers: Vec<Paper> = dedup
            .papers
            .into_iter()
            .filter(|p| p.citation_count >= self.config.min_citations)
            .collect();
        dedup::sort_papers(&mut papers, opts.sort_by, opts.open_access.unwrap_or(false));

        let result = AggregatedSearchResult {
            papers,
            total_hits,
            per_source_counts,
            deduped_count: dedup.deduped_count,
            successful_sources,
            failed_sources,
            from_cache: false,
        };

        self.query_cache.insert(cache_key, result.clone()).await;
        Ok(result)
    }

    /// Health snapshot across all registered sources.
    pub async fn health_status(&self) -> HealthReport {
        let mut sources = Vec::new();
        let mut available_count = 0usize;
        for (name, adapter) in self.registry.iter() {
            let available = adapter.is_available().await;
            if available {
                available_count += 1;
            }
            sources.push(self.health.status_for(*name, available).await);
        }
        HealthReport {
            sources,
            overall_healthy: self.health.overall_healthy(available_count),
        }
    }
}

fn is_retryable(err: &Error) -> bool {
    if err.is_retryable() {
        return true;
    }
    match err {
        Error::TransportTerminal { status, .. } => {
            !matches!(status, 400 | 401 | 403 | 404)
        }
        _ => true,
    }
}

impl Clone for AggregatedSearchResult {
    fn clone(&self) -> Self {
        Self {
            papers: self.papers.clone(),
            total_hits: self.total_hits,
            per_source_counts: self.per_source_counts.clone(),
            deduped_count: self.deduped_count,
            successful_sources: self.successful_sources.clone(),
            failed_sources: self.failed_sources.clone(),
            from_cache: self.from_cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{SortBy, StaticAdapter};
    use crate::paper::Paper;

    fn registry_with(sources: Vec<(SourceName, Vec<Paper>)>) -> AdapterRegistry {
        let mut registry = AdapterRegistry::new();
        for (name, papers) in sources {
            registry = registry.with_adapter(StaticAdapter::new(name, papers).into_arc());
        }
        registry
    }

    #[tokio::test]
    async fn aggregates_and_dedups_across_sources() {
        let mut p1 = Paper::new("s2-1", "Transformer Architectures for Code");
        p1.doi = Some("10.1/same".into());
        let mut p2 = Paper::new("oa-1", "Transformer Architectures for Code Summarization");
        p2.doi = Some("10.1/same".into());
        let p3 = Paper::new("oa-2", "Attention Is All You Need");

        let registry = registry_with(vec![
            (SourceName::SemanticScholar, vec![p1]),
            (SourceName::OpenAlex, vec![p2, p3]),
        ]);
        let mut config = AggregatorConfig::default();
        config.enable_smart_source_selection = false;
        config.enabled_sources = vec![SourceName::SemanticScholar, SourceName::OpenAlex];
        let aggregator = Aggregator::new(registry, config);

        let opts = SearchOptions::new("transformer").with_sort_by(SortBy::Relevance);
        let result = aggregator.search(opts, 3, None).await.unwrap();

        assert_eq!(result.deduped_count, 1);
        assert_eq!(result.successful_sources.len(), 2);
        assert!(!result.from_cache);
    }

    #[tokio::test]
    async fn fallback_chain_engages_when_primary_fails() {
        let failing = StaticAdapter::new(SourceName::SemanticScholar, vec![]).failing_n_times(10);
        let p = Paper::new("oa-1", "Fallback Paper");
        let registry = AdapterRegistry::new()
            .with_adapter(failing.into_arc())
            .with_adapter(StaticAdapter::new(SourceName::OpenAlex, vec![p]).into_arc());

        let mut config = AggregatorConfig::default();
        config.enable_smart_source_selection = false;
        config.enabled_sources = vec![SourceName::SemanticScholar, SourceName::OpenAlex];
        config.retry.max_retries = 1;
        let aggregator = Aggregator::new(registry, config);

        let opts = SearchOptions::new("fallback");
        let result = aggregator.search(opts, 2, None).await.unwrap();
        assert_eq!(result.papers.len(), 1);
        assert!(result.failed_sources.iter().any(|(s, _)| *s == SourceName::SemanticScholar));
    }

    #[tokio::test]
    async fn total_failure_raises_aggregation_insufficient() {
        let failing = StaticAdapter::new(SourceName::SemanticScholar, vec![]).failing_n_times(10);
        let registry = AdapterRegistry::new().with_adapter(failing.into_arc());

        let mut config = AggregatorConfig::default();
        config.enable_smart_source_selection = false;
        config.enabled_sources = vec![SourceName::SemanticScholar];
        config.retry.max_retries = 1;
        let aggregator = Aggregator::new(registry, config);

        let err = aggregator.search(SearchOptions::new("x"), 1, None).await.unwrap_err();
        assert!(matches!(err, Error::AggregationInsufficient { .. }));
    }

    #[tokio::test]
    async fn second_identical_query_is_served_from_cache() {
        let registry = registry_with(vec![(
            SourceName::OpenAlex,
            vec![Paper::new("oa-1", "Cached Paper")],
        )]);
        let mut config = AggregatorConfig::default();
        config.enable_smart_source_selection = false;
        config.enabled_sources = vec![SourceName::OpenAlex];
        let aggregator = Aggregator::new(registry, config);

        let first = aggregator.search(SearchOptions::new("cached"), 1, None).await.unwrap();
        assert!(!first.from_cache);
        let second = aggregator.search(SearchOptions::new("cached"), 1, None).await.unwrap();
        assert!(second.from_cache);
    }

    #[tokio::test]
    async fn identical_query_under_different_sessions_does_not_share_cache() {
        let registry = registry_with(vec![(
            SourceName::OpenAlex,
            vec![Paper::new("oa-1", "Session Scoped Paper")],
        )]);
        let mut config = AggregatorConfig::default();
        config.enable_smart_source_selection = false;
        config.enabled_sources = vec![SourceName::OpenAlex];
        let aggregator = Aggregator::new(registry, config);

        let a = aggregator
            .search(SearchOptions::new("scoped"), 1, Some("session-a"))
            .await
            .unwrap();
        assert!(!a.from_cache);
        let b = aggregator
            .search(SearchOptions::new("scoped"), 1, Some("session-b"))
            .await
            .unwrap();
        assert!(!b.from_cache);
        let a_again = aggregator
            .search(SearchOptions::new("scoped"), 1, Some("session-a"))
            .await
            .unwrap();
        assert!(a_again.from_cache);
    }
}
