//! Stage-aware content formatting: each workflow stage sees a different,
//! token-budgeted view of a paper. Generalizes the donor's
//! `context::externalize` stage-budgeted formatting from "conversation
//! context" to "paper corpus" — same `chars/4` token estimate, same
//! truncate-with-ellipsis behavior.

use crate::paper::{DataAvailability, Paper, SectionType};

/// A workflow stage that consumes paper content, each with its own
/// minimum availability level, preferred sections, and per-paper token cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Planning,
    Searching,
    Filtering,
    Analyzing,
    Writing,
    Citing,
}

#[derive(Debug, Clone, Copy)]
pub struct StageBudget {
    pub min_level: DataAvailability,
    pub max_tokens_per_paper: usize,
}

impl Stage {
    pub fn budget(&self) -> StageBudget {
        match self {
            Self::Planning => StageBudget {
                min_level: DataAvailability::MetadataOnly,
                max_tokens_per_paper: 100,
            },
            Self::Searching => StageBudget {
                min_level: DataAvailability::WithAbstract,
                max_tokens_per_paper: 500,
            },
            Self::Filtering => StageBudget {
                min_level: DataAvailability::WithAbstract,
                max_tokens_per_paper: 1000,
            },
            Self::Analyzing => StageBudget {
                min_level: DataAvailability::WithFullText,
                max_tokens_per_paper: 4000,
            },
            Self::Writing => StageBudget {
                min_level: DataAvailability::WithAbstract,
                max_tokens_per_paper: 2000,
            },
            Self::Citing => StageBudget {
                min_level: DataAvailability::WithAbstract,
                max_tokens_per_paper: 500,
            },
        }
    }

    fn preferred_sections(&self) -> &'static [SectionType] {
        match self {
            Self::Planning => &[],
            Self::Searching => &[SectionType::Abstract],
            Self::Filtering => &[SectionType::Abstract, SectionType::Introduction, SectionType::Conclusion],
            Self::Analyzing => &[SectionType::Methods, SectionType::Results, SectionType::Discussion],
            Self::Writing => &[SectionType::Abstract, SectionType::Introduction, SectionType::Conclusion],
            Self::Citing => &[SectionType::Abstract],
        }
    }
}

/// Default global budget split across a stage's whole corpus.
pub const DEFAULT_GLOBAL_BUDGET_TOKENS: usize = 16_000;

/// chars/4 token estimate, matching the donor's `Message::approx_tokens` heuristic.
fn approx_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// A paper rendered for a given stage, possibly truncated.
#[derive(Debug, Clone)]
pub struct FormattedPaper {
    pub paper_id: String,
    pub content: String,
    pub estimated_tokens: usize,
    pub truncated: bool,
}

fn section_text(paper: &Paper, stage: Stage) -> String {
    let preferred = stage.preferred_sections();
    if preferred.is_empty() {
        return paper.title.clone();
    }
    match &paper.sections {
        Some(sections) => {
            let mut text = String::new();
            for wanted in preferred {
                if let Some(section) = sections.iter().find(|s| s.section_type == *wanted) {
                    if !text.is_empty() {
                        text.push_str("\n\n");
                    }
                    text.push_str(&section.content);
                }
            }
            if text.is_empty() {
                paper.abstract_text.clone().unwrap_or_else(|| paper.title.clone())
            } else {
                text
            }
        }
        None => paper.abstract_text.clone().unwrap_or_else(|| paper.title.clone()),
    }
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> (String, bool) {
    let max_chars = max_tokens.saturating_mul(4);
    if text.len() <= max_chars {
        (text.to_string(), false)
    } else {
        let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        truncated.push('…');
        (truncated, true)
    }
}

/// Render one paper for a given stage, independent of the global budget.
pub fn format_for_stage(paper: &Paper, stage: Stage) -> FormattedPaper {
    let budget = stage.budget();
    let raw = if paper.data_availability < budget.min_level {
        paper.title.clone()
    } else {
        section_text(paper, stage)
    };
    let (content, truncated) = truncate_to_tokens(&raw, budget.max_tokens_per_paper);
    let estimated_tokens = approx_tokens(&content);
    FormattedPaper {
        paper_id: paper.id.clone(),
        content,
        estimated_tokens,
        truncated,
    }
}

/// Render a whole corpus for a stage under a global token budget.
/// `priority_ids` are served first (in order), then the remainder by
/// descending DataAvailability. Papers that don't fit are dropped and
/// returned by id.
pub fn format_corpus(
    papers: &[Paper],
    stage: Stage,
    global_budget_tokens: usize,
    priority_ids: &[String],
) -> (Vec<FormattedPaper>, Vec<String>) {
    let mut ordered: Vec<&Paper> = Vec::with_capacity(papers.len());
    for id in priority_ids {
        if let Some(p) = papers.iter().find(|p| &p.id == id) {
            ordered.push(p);
        }
    }
    let mut rest: Vec<&Paper> = papers.iter().filter(|p| !priority_ids.contains(&p.id)).collect();
    rest.sort_by(|a, b| b.data_availability.cmp(&a.data_availability));
    ordered.extend(rest);

    let mut remaining = global_budget_tokens;
    let mut formatted = Vec::new();
    let mut dropped = Vec::new();

    for paper in ordered {
        if remaining == 0 {
            dropped.push(paper.id.clone());
            continue;
        }
        let rendered = format_for_stage(paper, stage);
        if rendered.estimated_tokens > remaining {
            dropped.push(paper.id.clone());
            continue;
        }
        remaining -= rendered.estimated_tokens;
        formatted.push(rendered);
    }

    (formatted, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperSection;

    fn paper_with_sections() -> Paper {
        let mut paper = Paper::new("s2-1", "A Study of Things");
        paper.abstract_text = Some("short abstract".into());
        paper.full_text = Some("body".into());
        paper.sections = Some(vec![
            PaperSection {
                section_type: SectionType::Abstract,
                title: "Abstract".into(),
                content: "short abstract".into(),
                char_start: 0,
                char_end: 14,
            },
            PaperSection {
                section_type: SectionType::Methods,
                title: "Methods".into(),
                content: "a".repeat(20_000),
                char_start: 14,
                char_end: 20_014,
            },
        ]);
        paper.recompute_data_availability();
        paper
    }

    #[test]
    fn below_min_level_falls_back_to_title() {
        let paper = Paper::new("s2-1", "Just A Title");
        let rendered = format_for_stage(&paper, Stage::Analyzing);
        assert_eq!(rendered.content, "Just A Title");
    }

    #[test]
    fn analyzing_truncates_to_per_paper_budget() {
        let paper = paper_with_sections();
        let rendered = format_for_stage(&paper, Stage::Analyzing);
        assert!(rendered.truncated);
        assert!(rendered.estimated_tokens <= Stage::Analyzing.budget().max_tokens_per_paper + 1);
    }

    #[test]
    fn corpus_formatting_drops_when_budget_exhausted() {
        let papers = vec![paper_with_sections(), paper_with_sections()];
        let (formatted, dropped) = format_corpus(&papers, Stage::Analyzing, 10, &[]);
        assert!(formatted.is_empty() || !dropped.is_empty());
    }
}
