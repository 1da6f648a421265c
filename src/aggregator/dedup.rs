//! Two-pass deduplication (DOI exact, then fuzzy title) plus field-level merge.

use std::collections::HashMap;

use crate::paper::{DataAvailability, Paper};

/// Minimum normalized-title similarity to treat two papers as duplicates.
pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Levenshtein-based title similarity in `[0, 1]`, per the "1 - dist/max(len)"
/// formula: 1.0 means identical, 0.0 means maximally different.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let dist = strsim::levenshtein(a, b);
    1.0 - (dist as f64 / max_len as f64)
}

/// Merge `incoming` into `existing` in place using the field-level merge
/// rules: longer non-empty text wins, authors/subjects/source_origin union,
/// numeric fields take the max/OR, and data availability never decreases.
pub fn merge_papers(existing: &mut Paper, incoming: &Paper) {
    if incoming.title.len() > existing.title.len() {
        existing.title = incoming.title.clone();
    }

    if longer_or_missing(&existing.abstract_text, &incoming.abstract_text) {
        existing.abstract_text = incoming.abstract_text.clone();
    }
    if longer_or_missing(&existing.journal, &incoming.journal) {
        existing.journal = incoming.journal.clone();
    }
    if longer_or_missing(&existing.conference, &incoming.conference) {
        existing.conference = incoming.conference.clone();
    }
    if existing.full_text.is_none() && incoming.full_text.is_some() {
        existing.full_text = incoming.full_text.clone();
    }
    if existing.pdf_url.is_none() {
        existing.pdf_url = incoming.pdf_url.clone();
    }
    if existing.doi.is_none() {
        existing.doi = incoming.doi.clone();
    }
    if existing.year.is_none() {
        existing.year = incoming.year;
    }

    // Union authors by normalized name, preferring the record with more
    // affiliations for a name seen from both sides.
    let mut by_name: HashMap<String, usize> = existing
        .authors
        .iter()
        .enumerate()
        .map(|(i, a)| (a.normalized_name(), i))
        .collect();
    for author in &incoming.authors {
        let key = author.normalized_name();
        match by_name.get(&key) {
            Some(&idx) => {
                if author.affiliations.len() > existing.authors[idx].affiliations.len() {
                    existing.authors[idx] = author.clone();
                }
            }
            None => {
                by_name.insert(key, existing.authors.len());
                existing.authors.push(author.clone());
            }
        }
    }

    existing.subjects.extend(incoming.subjects.iter().cloned());
    existing
        .source_origin
        .extend(incoming.source_origin.iter().cloned());

    existing.citation_count = existing.citation_count.max(incoming.citation_count);
    existing.open_access = existing.open_access || incoming.open_access;
    existing.data_availability = existing.data_availability.max(incoming.data_availability);

    if existing.last_enriched.is_none() || incoming.last_enriched > existing.last_enriched {
        existing.last_enriched = incoming.last_enriched;
    }
}

fn longer_or_missing(existing: &Option<String>, incoming: &Option<String>) -> bool {
    match (existing.as_deref(), incoming.as_deref()) {
        (None, Some(_)) => true,
        (Some(e), Some(i)) => i.len() > e.len(),
        _ => false,
    }
}

/// Outcome of deduplicating a paper list: the deduplicated papers plus how
/// many were suppressed as duplicates.
pub struct DedupResult {
    pub papers: Vec<Paper>,
    pub deduped_count: usize,
}

/// Two-pass dedup: DOI exact match, then fuzzy title match against the
/// DOI-deduped survivors. A third reconciliation guard refuses to merge
/// two papers with distinct, known DOIs even if their titles are
/// near-identical — see the "dedup precision" design note.
pub fn deduplicate(papers: Vec<Paper>) -> DedupResult {
    let mut by_doi: HashMap<String, usize> = HashMap::new();
    let mut survivors: Vec<Paper> = Vec::new();
    let mut deduped_count = 0usize;

    for paper in papers {
        if let Some(doi) = paper.doi_key() {
            if let Some(&idx) = by_doi.get(&doi) {
                merge_papers(&mut survivors[idx], &paper);
                deduped_count += 1;
                continue;
            }
            by_doi.insert(doi, survivors.len());
        }
        survivors.push(paper);
    }

    // Fuzzy title pass over the DOI-deduped survivors.
    let mut final_papers: Vec<Paper> = Vec::new();
    for paper in survivors {
        let doi = paper.doi_key();
        let normalized = paper.normalized_title();

        let dup_idx = final_papers.iter().position(|existing| {
            // Reconciliation guard: distinct known DOIs are never merged,
            // regardless of title similarity.
            if let (Some(d1), Some(d2)) = (&doi, existing.doi_key()) {
                if *d1 != d2 {
                    return false;
                }
            }
            title_similarity(&normalized, &existing.normalized_title()) >= TITLE_SIMILARITY_THRESHOLD
        });

        match dup_idx {
            Some(idx) => {
                merge_papers(&mut final_papers[idx], &paper);
                deduped_count += 1;
            }
            None => final_papers.push(paper),
        }
    }

    DedupResult {
        papers: final_papers,
        deduped_count,
    }
}

/// Sort papers per the requested criterion with the documented tie-breaks.
pub fn sort_papers(papers: &mut [Paper], sort_by: crate::adapter::SortBy, prefer_open_access: bool) {
    use crate::adapter::SortBy;
    match sort_by {
        SortBy::Citations => papers.sort_by(|a, b| {
            let diff = (b.citation_count as i64 - a.citation_count as i64).abs();
            if diff <= 5 {
                secondary_key(b, prefer_open_access).cmp(&secondary_key(a, prefer_open_access))
            } else {
                b.citation_count.cmp(&a.citation_count)
            }
        }),
        SortBy::Date => papers.sort_by(|a, b| {
            b.year
                .cmp(&a.year)
                .then_with(|| b.data_availability.cmp(&a.data_availability))
        }),
        SortBy::Relevance => papers.sort_by(|a, b| {
            b.data_availability.cmp(&a.data_availability)
        }),
    }
}

fn secondary_key(paper: &Paper, prefer_open_access: bool) -> (DataAvailability, bool) {
    (
        paper.data_availability,
        prefer_open_access && paper.open_access,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::Paper;

    #[test]
    fn exact_doi_duplicates_merge() {
        let mut a = Paper::new("s2-1", "Short Title");
        a.doi = Some("10.1/ABC".into());
        let mut b = Paper::new("oa-1", "A Much Longer And More Descriptive Title");
        b.doi = Some("10.1/abc".into());

        let result = deduplicate(vec![a, b]);
        assert_eq!(result.papers.len(), 1);
        assert_eq!(result.deduped_count, 1);
        assert_eq!(result.papers[0].title, "A Much Longer And More Descriptive Title");
    }

    #[test]
    fn fuzzy_title_duplicates_merge_without_doi() {
        let a = Paper::new("s2-1", "Transformer Architectures for Code Summarization");
        let b = Paper::new("oa-1", "Transformer Architecture for Code Summarization");

        let result = deduplicate(vec![a, b]);
        assert_eq!(result.papers.len(), 1);
        assert_eq!(result.deduped_count, 1);
    }

    #[test]
    fn distinct_dois_never_merge_even_with_similar_titles() {
        let mut a = Paper::new("s2-1", "Transformer Architectures for Code Summarization");
        a.doi = Some("10.1/one".into());
        let mut b = Paper::new("oa-1", "Transformer Architecture for Code Summarization");
        b.doi = Some("10.1/two".into());

        let result = deduplicate(vec![a, b]);
        assert_eq!(result.papers.len(), 2);
        assert_eq!(result.deduped_count, 0);
    }

    #[test]
    fn distinct_papers_do_not_merge() {
        let a = Paper::new("s2-1", "Attention Is All You Need");
        let b = Paper::new("oa-1", "Deep Residual Learning for Image Recognition");

        let result = deduplicate(vec![a, b]);
        assert_eq!(result.papers.len(), 2);
        assert_eq!(result.deduped_count, 0);
    }

    #[test]
    fn merge_unions_source_origin_and_raises_availability() {
        let mut existing = Paper::new("s2-1", "A Study");
        existing.source_origin.insert("semantic-scholar".into());
        existing.data_availability = DataAvailability::MetadataOnly;

        let mut incoming = Paper::new("oa-1", "A Study");
        incoming.source_origin.insert("openalex".into());
        incoming.abstract_text = Some("an abstract".into());
        incoming.data_availability = DataAvailability::WithAbstract;

        merge_papers(&mut existing, &incoming);

        assert!(existing.source_origin.contains("semantic-scholar"));
        assert!(existing.source_origin.contains("openalex"));
        assert_eq!(existing.data_availability, DataAvailability::WithAbstract);
    }
}
