//! Paper enrichment: raising a paper's data-availability level by consulting
//! additional sources, extracting full-text sections, and formatting paper
//! content for the token budget of a given workflow stage.

mod extractor;
mod formatter;
mod pdf;

pub use extractor::{extract_sections, SectionExtractor};
pub use formatter::{format_corpus, format_for_stage, FormattedPaper, Stage, StageBudget};
pub use pdf::{HttpPdfFetcher, PdfFetcher, StaticPdfFetcher, DEFAULT_SIZE_CAP_BYTES};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::{AdapterRegistry, SearchOptions, SourceName};
use crate::aggregator::TtlCache;
use crate::error::Result;
use crate::paper::{DataAvailability, Paper};

/// Result of one enrichment attempt.
#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    pub paper: Paper,
    pub enriched: bool,
    pub previous_level: DataAvailability,
    pub new_level: DataAvailability,
    pub sources: Vec<SourceName>,
    pub errors: Vec<String>,
}

/// Raises a paper's `DataAvailability` toward a target level by walking a
/// fixed strategy chain (cache, CORE, PDF fetch, arXiv, Semantic Scholar),
/// stopping as soon as the target is reached.
pub struct Enricher {
    registry: AdapterRegistry,
    cache: TtlCache<String, Paper>,
    pdf_fetcher: Option<Arc<dyn PdfFetcher>>,
}

impl Enricher {
    pub fn new(registry: AdapterRegistry, cache_ttl: chrono::Duration) -> Self {
        Self {
            registry,
            cache: TtlCache::new(cache_ttl),
            pdf_fetcher: None,
        }
    }

    /// Enables the PDF-fetch step of the enrichment chain.
    pub fn with_pdf_fetcher(mut self, fetcher: Arc<dyn PdfFetcher>) -> Self {
        self.pdf_fetcher = Some(fetcher);
        self
    }

    pub async fn enrich(&self, paper: Paper, target: DataAvailability) -> Result<EnrichmentResult> {
        let previous_level = paper.data_availability;
        if previous_level >= target {
            return Ok(EnrichmentResult {
                paper,
                enriched: false,
                previous_level,
                new_level: previous_level,
                sources: Vec::new(),
                errors: Vec::new(),
            });
        }

        if let Some(cached) = self.cache.get(&paper.id).await {
            if cached.data_availability >= target {
                return Ok(EnrichmentResult {
                    paper: cached,
                    enriched: true,
                    previous_level,
                    new_level: target,
                    sources: Vec::new(),
                    errors: Vec::new(),
                });
            }
        }

        let mut working = paper;
        let mut sources = Vec::new();
        let mut errors = Vec::new();

        // Step 1: CORE by id, then DOI, then exact-title search.
        if working.data_availability < target {
            if let Some(core) = self.registry.get(SourceName::Core) {
                let lookup = core.get_paper(&working.id).await;
                match lookup {
                    Ok(Some(found)) => {
                        crate::aggregator::merge_papers(&mut working, &found);
                        sources.push(SourceName::Core);
                    }
                    Ok(None) => {
                        if let Some(doi) = working.doi.clone() {
                            if let Ok(Some(found)) = core.get_paper(&doi).await {
                                crate::aggregator::merge_papers(&mut working, &found);
                                sources.push(SourceName::Core);
                            }
                        } else {
                            let opts = SearchOptions::new(working.title.clone()).with_limit(1);
                            if let Ok(result) = core.search(&opts).await {
                                if let Some(found) = result.papers.into_iter().next() {
                                    crate::aggregator::merge_papers(&mut working, &found);
                                    sources.push(SourceName::Core);
                                }
                            }
                        }
                    }
                    Err(err) => errors.push(err.to_string()),
                }
            }
        }

        // Step 2: if a PDF URL is known and fetching is enabled, fetch (HEAD
        // first, body on demand) and extract text up to a size cap.
        working.recompute_data_availability();
        if working.data_availability < target {
            if let (Some(fetcher), Some(pdf_url)) = (&self.pdf_fetcher, working.pdf_url.clone()) {
                match fetcher.fetch_text(&pdf_url, DEFAULT_SIZE_CAP_BYTES).await {
                    Ok(Some(text)) => {
                        working.full_text = Some(text);
                    }
                    Ok(None) => {}
                    Err(err) => errors.push(err.to_string()),
                }
            }
        }

        // Step 3: arXiv lookup, mainly to obtain a PDF URL.
        working.recompute_data_availability();
        if working.data_availability < target && is_arxiv(&working) {
            if let Some(arxiv) = self.registry.get(SourceName::Arxiv) {
                match arxiv.get_paper(&working.id).await {
                    Ok(Some(found)) => {
                        crate::aggregator::merge_papers(&mut working, &found);
                        sources.push(SourceName::Arxiv);
                    }
                    Ok(None) => {}
                    Err(err) => errors.push(err.to_string()),
                }
            }
        }

        // Step 4: Semantic Scholar for a richer abstract if the current one is short.
        working.recompute_data_availability();
        if working.data_availability < target
            && working.abstract_text.as_deref().map_or(true, |a| a.len() < 200)
        {
            if let Some(s2) = self.registry.get(SourceName::SemanticScholar) {
                let lookup = if let Some(doi) = &working.doi {
                    s2.get_paper(doi).await
                } else {
                    s2.get_paper(&working.id).await
                };
                match lookup {
                    Ok(Some(found)) => {
                        crate::aggregator::merge_papers(&mut working, &found);
                        sources.push(SourceName::SemanticScholar);
                    }
                    Ok(None) => {}
                    Err(err) => errors.push(err.to_string()),
                }
            }
        }

        // Step 5: extract sections if full text is present but unparsed.
        working.recompute_data_availability();
        if let Some(full_text) = working.full_text.clone() {
            if working.sections.is_none() {
                working.sections = Some(extract_sections(&full_text));
            }
        }

        working.recompute_data_availability();
        working.last_enriched = Some(Utc::now());
        self.cache.insert(working.id.clone(), working.clone()).await;

        let new_level = working.data_availability;
        Ok(EnrichmentResult {
            paper: working,
            enriched: new_level > previous_level,
            previous_level,
            new_level,
            sources,
            errors,
        })
    }
}

fn is_arxiv(paper: &Paper) -> bool {
    paper.id.starts_with("arxiv-")
        || paper.source_origin.contains("arxiv")
        || paper
            .source_url
            .as_deref()
            .is_some_and(|u| u.contains("arxiv.org"))
        || paper.pdf_url.as_deref().is_some_and(|u| u.contains("arxiv.org"))
}

/// Per-stage content view of a corpus, under a global token budget.
#[derive(Debug, Clone)]
pub struct FormattedCorpus {
    pub entries: HashMap<String, FormattedPaper>,
    pub dropped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StaticAdapter;

    #[tokio::test]
    async fn already_at_target_is_a_no_op() {
        let mut paper = Paper::new("oa-1", "A Paper");
        paper.abstract_text = Some("short".into());
        paper.recompute_data_availability();
        let registry = AdapterRegistry::new();
        let enricher = Enricher::new(registry, chrono::Duration::minutes(10));

        let result = enricher
            .enrich(paper, DataAvailability::MetadataOnly)
            .await
            .unwrap();
        assert!(!result.enriched);
    }

    #[tokio::test]
    async fn core_lookup_raises_availability() {
        let mut core_paper = Paper::new("oa-1", "A Paper");
        core_paper.abstract_text = Some("a".repeat(300));
        core_paper.pdf_url = Some("https://example.org/a.pdf".into());
        core_paper.recompute_data_availability();

        let registry = AdapterRegistry::new()
            .with_adapter(StaticAdapter::new(SourceName::Core, vec![core_paper]).into_arc());
        let enricher = Enricher::new(registry, chrono::Duration::minutes(10));

        let stub = Paper::new("oa-1", "A Paper");
        let result = enricher
            .enrich(stub, DataAvailability::WithPdfLink)
            .await
            .unwrap();
        assert!(result.enriched);
        assert_eq!(result.new_level, DataAvailability::WithPdfLink);
        assert!(result.sources.contains(&SourceName::Core));
    }

    #[tokio::test]
    async fn pdf_fetch_step_populates_full_text_when_enabled() {
        let mut paper = Paper::new("oa-2", "A Paper With A Known PDF");
        paper.abstract_text = Some("a".repeat(300));
        paper.pdf_url = Some("https://example.org/known.pdf".into());
        paper.recompute_data_availability();

        let registry = AdapterRegistry::new();
        let enricher = Enricher::new(registry, chrono::Duration::minutes(10))
            .with_pdf_fetcher(pdf::StaticPdfFetcher::new("Full extracted body text.").into_arc());

        let result = enricher
            .enrich(paper, DataAvailability::WithFullText)
            .await
            .unwrap();
        assert_eq!(result.new_level, DataAvailability::WithFullText);
        assert_eq!(result.paper.full_text.as_deref(), Some("Full extracted body text."));
    }

    #[tokio::test]
    async fn pdf_fetch_step_is_a_no_op_without_a_fetcher() {
        let mut paper = Paper::new("oa-3", "A Paper Without A Fetcher");
        paper.abstract_text = Some("a".repeat(300));
        paper.pdf_url = Some("https://example.org/known.pdf".into());
        paper.recompute_data_availability();

        let registry = AdapterRegistry::new();
        let enricher = Enricher::new(registry, chrono::Duration::minutes(10));

        let result = enricher
            .enrich(paper, DataAvailability::WithFullText)
            .await
            .unwrap();
        assert!(result.paper.full_text.is_none());
    }
}
