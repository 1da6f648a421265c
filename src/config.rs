//! Workflow configuration.

use serde::{Deserialize, Serialize};

/// Citation style for in-text references and the generated reference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    Ieee,
    Apa,
    Mla,
    Chicago,
}

impl Default for CitationStyle {
    fn default() -> Self {
        Self::Ieee
    }
}

/// Thresholds the quality gate evaluates a report against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityGateConfig {
    pub min_overall_score: f64,
    pub min_coverage_score: f64,
    pub min_citation_density: f64,
    pub min_unique_sources: usize,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_overall_score: 70.0,
            min_coverage_score: 60.0,
            min_citation_density: 2.0,
            min_unique_sources: 5,
        }
    }
}

/// Full workflow configuration, builder-constructed like the LLM layer's
/// `ClientConfig`. Every field has the default named in the interface table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub max_search_rounds: usize,
    pub max_iterations: usize,
    pub min_papers_required: usize,
    pub max_papers_per_round: usize,
    pub quality_gate: QualityGateConfig,
    pub enable_multi_source: bool,
    pub enable_citation_validation: bool,
    pub enable_context_compression: bool,
    pub enable_verifiable_checklist: bool,
    pub enable_evidence_audit: bool,
    pub enable_semantic_search: bool,
    pub enable_parallel_search: bool,
    pub parallel_search_concurrency: usize,
    pub citation_style: CitationStyle,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_search_rounds: 5,
            max_iterations: 3,
            min_papers_required: 8,
            max_papers_per_round: 20,
            quality_gate: QualityGateConfig::default(),
            enable_multi_source: true,
            enable_citation_validation: true,
            enable_context_compression: true,
            enable_verifiable_checklist: true,
            enable_evidence_audit: true,
            enable_semantic_search: false,
            enable_parallel_search: true,
            parallel_search_concurrency: 3,
            citation_style: CitationStyle::Ieee,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_search_rounds(mut self, n: usize) -> Self {
        self.max_search_rounds = n;
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_min_papers_required(mut self, n: usize) -> Self {
        self.min_papers_required = n;
        self
    }

    pub fn with_max_papers_per_round(mut self, n: usize) -> Self {
        self.max_papers_per_round = n;
        self
    }

    pub fn with_quality_gate(mut self, gate: QualityGateConfig) -> Self {
        self.quality_gate = gate;
        self
    }

    pub fn with_multi_source(mut self, enable: bool) -> Self {
        self.enable_multi_source = enable;
        self
    }

    pub fn with_citation_validation(mut self, enable: bool) -> Self {
        self.enable_citation_validation = enable;
        self
    }

    pub fn with_context_compression(mut self, enable: bool) -> Self {
        self.enable_context_compression = enable;
        self
    }

    pub fn with_verifiable_checklist(mut self, enable: bool) -> Self {
        self.enable_verifiable_checklist = enable;
        self
    }

    pub fn with_evidence_audit(mut self, enable: bool) -> Self {
        self.enable_evidence_audit = enable;
        self
    }

    pub fn with_semantic_search(mut self, enable: bool) -> Self {
        self.enable_semantic_search = enable;
        self
    }

    pub fn with_parallel_search(mut self, enable: bool) -> Self {
        self.enable_parallel_search = enable;
        self
    }

    pub fn with_parallel_search_concurrency(mut self, n: usize) -> Self {
        self.parallel_search_concurrency = n.max(1);
        self
    }

    pub fn with_citation_style(mut self, style: CitationStyle) -> Self {
        self.citation_style = style;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_interface_table() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.max_search_rounds, 5);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.min_papers_required, 8);
        assert_eq!(config.max_papers_per_round, 20);
        assert_eq!(config.parallel_search_concurrency, 3);
        assert_eq!(config.citation_style, CitationStyle::Ieee);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = CoordinatorConfig::new()
            .with_max_iterations(1)
            .with_citation_style(CitationStyle::Apa);
        assert_eq!(config.max_iterations, 1);
        assert_eq!(config.citation_style, CitationStyle::Apa);
    }
}
