//! Canonical paper entity and the data-availability ladder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How much of a paper's content is known locally. Totally ordered;
/// merging two records never decreases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataAvailability {
    MetadataOnly = 0,
    WithAbstract = 1,
    WithPdfLink = 2,
    WithFullText = 3,
}

impl DataAvailability {
    /// Re-derive the level from a paper's actual fields. Used to check the
    /// "level is a pure function of present fields" invariant.
    pub fn derive(paper: &Paper) -> Self {
        if paper.full_text.as_deref().is_some_and(|t| !t.is_empty()) {
            Self::WithFullText
        } else if paper.pdf_url.is_some() {
            Self::WithPdfLink
        } else if paper.abstract_text.as_deref().is_some_and(|a| !a.is_empty()) {
            Self::WithAbstract
        } else {
            Self::MetadataOnly
        }
    }
}

/// A section type recognized by the content extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Abstract,
    Introduction,
    Background,
    Methods,
    Results,
    Discussion,
    Conclusion,
    References,
    Acknowledgments,
    Other,
}

/// A single extracted section of full text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperSection {
    pub section_type: SectionType,
    pub title: String,
    pub content: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// An author of a paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default)]
    pub affiliations: Vec<String>,
    pub orcid: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affiliations: Vec::new(),
            orcid: None,
        }
    }

    /// Normalized form used for author-union merges: lowercase, trimmed.
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_lowercase()
    }
}

/// Canonical paper entity. Identity (`id`) is stable once assigned;
/// everything else may be enriched over the paper's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub authors: Vec<Author>,
    pub abstract_text: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub source_url: Option<String>,
    pub pdf_url: Option<String>,
    pub open_access: bool,
    pub citation_count: u64,
    pub subjects: HashSet<String>,
    pub journal: Option<String>,
    pub conference: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub language: Option<String>,
    pub full_text: Option<String>,
    pub sections: Option<Vec<PaperSection>>,
    pub data_availability: DataAvailability,
    pub source_origin: HashSet<String>,
    pub last_enriched: Option<DateTime<Utc>>,
}

impl Paper {
    /// Construct a minimal metadata-only paper.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            authors: Vec::new(),
            abstract_text: None,
            year: None,
            doi: None,
            source_url: None,
            pdf_url: None,
            open_access: false,
            citation_count: 0,
            subjects: HashSet::new(),
            journal: None,
            conference: None,
            volume: None,
            issue: None,
            pages: None,
            language: None,
            full_text: None,
            sections: None,
            data_availability: DataAvailability::MetadataOnly,
            source_origin: HashSet::new(),
            last_enriched: None,
        }
    }

    /// Recompute and store the data-availability level from current fields.
    pub fn recompute_data_availability(&mut self) {
        self.data_availability = DataAvailability::derive(self);
    }

    /// Lowercased DOI used as the exact-dedup key, if present.
    pub fn doi_key(&self) -> Option<String> {
        self.doi.as_ref().map(|d| d.trim().to_lowercase())
    }

    /// Normalized title used as the fuzzy-dedup comparison key: lowercase,
    /// non-alphanumerics stripped, whitespace collapsed.
    pub fn normalized_title(&self) -> String {
        let lowered = self.title.to_lowercase();
        let stripped: String = lowered
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_paper_is_metadata_only() {
        let paper = Paper::new("s2-1", "A Study");
        assert_eq!(paper.data_availability, DataAvailability::MetadataOnly);
    }

    #[test]
    fn derive_tracks_present_fields() {
        let mut paper = Paper::new("s2-1", "A Study");
        paper.abstract_text = Some("an abstract".into());
        paper.recompute_data_availability();
        assert_eq!(paper.data_availability, DataAvailability::WithAbstract);

        paper.pdf_url = Some("https://example.com/p.pdf".into());
        paper.recompute_data_availability();
        assert_eq!(paper.data_availability, DataAvailability::WithPdfLink);

        paper.full_text = Some("full body".into());
        paper.recompute_data_availability();
        assert_eq!(paper.data_availability, DataAvailability::WithFullText);
    }

    #[test]
    fn data_availability_is_ordered() {
        assert!(DataAvailability::MetadataOnly < DataAvailability::WithAbstract);
        assert!(DataAvailability::WithAbstract < DataAvailability::WithPdfLink);
        assert!(DataAvailability::WithPdfLink < DataAvailability::WithFullText);
    }

    #[test]
    fn normalized_title_strips_punctuation_and_case() {
        let paper = Paper::new("s2-1", "Deep Learning: A Survey!");
        assert_eq!(paper.normalized_title(), "deep learning a survey");
    }
}
