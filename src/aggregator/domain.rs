//! Domain classification for smart source selection, grounded in the
//! LLM layer's `QueryType::classify` (compiled-once regex-set) pattern.

use regex::Regex;
use std::sync::OnceLock;

use crate::adapter::SourceName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Biomedical,
    CsAi,
    PhysicsMath,
    General,
}

struct DomainPatterns {
    biomedical: Regex,
    cs_ai: Regex,
    physics_math: Regex,
}

impl DomainPatterns {
    fn new() -> Self {
        Self {
            biomedical: Regex::new(
                r"(?x)
                clinical|patient|disease|drug|therapy|treatment|
                gene|protein|cell|biology|medical|medicine|
                diagnosis|cancer|vaccine|pharma|health
                ",
            )
            .unwrap(),
            cs_ai: Regex::new(
                r"(?x)
                neural|network|algorithm|software|machine\s+learning|
                deep\s+learning|transformer|model|training|dataset|
                programming|code|computer\s+science|artificial\s+intelligence
                ",
            )
            .unwrap(),
            physics_math: Regex::new(
                r"(?x)
                quantum|particle|theorem|proof|equation|physics|
                mathematics|topology|algebra|relativity|cosmology
                ",
            )
            .unwrap(),
        }
    }
}

impl Domain {
    pub fn classify(query: &str) -> Self {
        static PATTERNS: OnceLock<DomainPatterns> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(DomainPatterns::new);

        let lower = query.to_lowercase();
        if patterns.biomedical.is_match(&lower) {
            Self::Biomedical
        } else if patterns.cs_ai.is_match(&lower) {
            Self::CsAi
        } else if patterns.physics_math.is_match(&lower) {
            Self::PhysicsMath
        } else {
            Self::General
        }
    }

    /// Preferred sources in priority order for this domain, capped to three.
    pub fn preferred_sources(&self) -> [SourceName; 3] {
        use SourceName::*;
        match self {
            Self::Biomedical => [Pubmed, SemanticScholar, OpenAlex],
            Self::CsAi => [SemanticScholar, Arxiv, OpenAlex],
            Self::PhysicsMath => [Arxiv, OpenAlex, SemanticScholar],
            Self::General => [OpenAlex, SemanticScholar, Core],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_biomedical_query() {
        assert_eq!(
            Domain::classify("clinical trial outcomes for a new cancer drug"),
            Domain::Biomedical
        );
    }

    #[test]
    fn classifies_cs_ai_query() {
        assert_eq!(
            Domain::classify("transformer neural network training dataset"),
            Domain::CsAi
        );
    }

    #[test]
    fn classifies_physics_math_query() {
        assert_eq!(Domain::classify("quantum field theorem proof"), Domain::PhysicsMath);
    }

    #[test]
    fn falls_back_to_general() {
        assert_eq!(Domain::classify("history of jazz music"), Domain::General);
    }

    #[test]
    fn preferred_sources_are_domain_specific() {
        assert_eq!(
            Domain::Biomedical.preferred_sources()[0],
            SourceName::Pubmed
        );
        assert_eq!(Domain::CsAi.preferred_sources()[0], SourceName::SemanticScholar);
    }
}
