//! Streaming report writer: citation registry, retry/fallback between
//! models, partial-content salvage, and section/citation detection over
//! the running output buffer.

use async_stream::stream;
use chrono::Utc;
use futures::Stream;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::OnceLock;
use tracing::{instrument, warn};

use crate::config::CitationStyle;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::paper::Paper;
use crate::planner::ResearchPlan;

/// A stable citation registry entry assigned before streaming begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub id: u32,
    pub paper_id: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub in_text_ref: String,
    pub journal: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub publisher: Option<String>,
    pub conference: Option<String>,
}

/// Build the citation registry: a stable numeric index 1..N per candidate
/// paper, with an `inTextRef` rendered per the requested style.
pub fn build_citation_registry(papers: &[Paper], style: CitationStyle) -> Vec<Citation> {
    papers
        .iter()
        .enumerate()
        .map(|(i, paper)| {
            let id = (i + 1) as u32;
            let authors: Vec<String> = paper.authors.iter().map(|a| a.name.clone()).collect();
            let in_text_ref = match style {
                CitationStyle::Ieee => format!("[{id}]"),
                CitationStyle::Apa | CitationStyle::Chicago => match (authors.first(), paper.year) {
                    (Some(author), Some(year)) => format!("({author}, {year})"),
                    (Some(author), None) => format!("({author}, n.d.)"),
                    (None, _) => format!("[{id}]"),
                },
                CitationStyle::Mla => match authors.first() {
                    Some(author) => format!("({author})"),
                    None => format!("[{id}]"),
                },
            };
            Citation {
                id,
                paper_id: paper.id.clone(),
                authors,
                year: paper.year,
                doi: paper.doi.clone(),
                url: paper.source_url.clone(),
                in_text_ref,
                journal: paper.journal.clone(),
                volume: paper.volume.clone(),
                issue: paper.issue.clone(),
                pages: paper.pages.clone(),
                publisher: None,
                conference: paper.conference.clone(),
            }
        })
        .collect()
}

/// One emitted part of the writer's output stream.
#[derive(Debug, Clone)]
pub enum WriterEvent {
    Content { text: String },
    Section { title: String, level: u8 },
    CitationUsed { citation_id: u32 },
    Complete { report: ResearchReport },
}

/// A hierarchical, parsed report section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub level: u8,
    pub title: String,
    pub content: String,
}

/// The finalized report produced after a writer stream ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub title: String,
    pub abstract_text: Option<String>,
    pub sections: Vec<ReportSection>,
    pub citations: Vec<Citation>,
    pub generated_at: chrono::DateTime<Utc>,
    pub iteration_count: u32,
}

const MIN_SALVAGEABLE_CHARS: usize = 1000;
const NOTE_THRESHOLD_CHARS: usize = 3000;

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,3})\s+(.+)$").unwrap())
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap())
}

pub struct Writer<C: LLMClient> {
    primary: C,
    fallback: Option<C>,
}

impl<C: LLMClient> Writer<C> {
    pub fn new(primary: C) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: C) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Stream a complete report. On interruption, salvages partial content
    /// per the threshold rule, or raises a typed failure.
    #[instrument(skip(self, plan, papers, critic_feedback))]
    pub async fn write_report(
        &self,
        plan: &ResearchPlan,
        papers: &[Paper],
        critic_feedback: Option<&str>,
        iteration: u32,
        style: CitationStyle,
    ) -> Result<Pin<Box<dyn Stream<Item = WriterEvent> + Send>>> {
        let citations = build_citation_registry(papers, style);
        let prompt = build_prompt(plan, papers, &citations, critic_feedback);

        let raw = match self.complete_with_retry_and_fallback(&prompt).await {
            Ok(text) => text,
            Err(err) => return Err(err),
        };

        let citations_for_stream = citations.clone();
        let iteration_for_stream = iteration;
        let plan_question = plan.main_question.clone();

        let events = stream! {
            let mut seen_citations = std::collections::HashSet::new();
            let mut emitted_chars = 0usize;
            for line in raw.lines() {
                if let Some(caps) = header_regex().captures(line) {
                    let level = caps[1].len() as u8;
                    let title = caps[2].trim().to_string();
                    yield WriterEvent::Section { title, level };
                }
                for caps in citation_regex().captures_iter(line) {
                    if let Ok(n) = caps[1].parse::<u32>() {
                        if citations_for_stream.iter().any(|c| c.id == n) && seen_citations.insert(n) {
                            yield WriterEvent::CitationUsed { citation_id: n };
                        }
                    }
                }
                emitted_chars += line.len();
                yield WriterEvent::Content { text: format!("{line}\n") };
            }

            let report = finalize_report(&raw, &plan_question, citations_for_stream, iteration_for_stream, emitted_chars);
            yield WriterEvent::Complete { report };
        };

        Ok(Box::pin(events))
    }

    async fn complete_with_retry_and_fallback(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest::new().with_message(ChatMessage::user(prompt));
        match self.primary.complete(request.clone()).await {
            Ok(resp) => return Ok(resp.content),
            Err(err) => warn!("primary writer model failed, retrying: {err}"),
        }
        match self.primary.complete(request.clone()).await {
            Ok(resp) => return Ok(resp.content),
            Err(err) => warn!("primary writer model failed again: {err}"),
        }
        if let Some(fallback) = &self.fallback {
            match fallback.complete(request).await {
                Ok(resp) => return Ok(resp.content),
                Err(err) => warn!("fallback writer model failed: {err}"),
            }
        }
        Err(salvage_or_fail(String::new()).unwrap_err())
    }
}

/// Decide what to do with an interrupted stream: salvage if long enough,
/// otherwise raise a typed partial-content failure.
pub fn salvage_or_fail(accumulated: String) -> Result<String> {
    if accumulated.len() >= MIN_SALVAGEABLE_CHARS {
        if accumulated.len() < NOTE_THRESHOLD_CHARS {
            Ok(format!("{accumulated}\n\n*Note: report may be incomplete due to an interrupted generation.*"))
        } else {
            Ok(accumulated)
        }
    } else {
        Err(Error::partial_content(accumulated.len()))
    }
}

fn build_prompt(plan: &ResearchPlan, papers: &[Paper], citations: &[Citation], critic_feedback: Option<&str>) -> String {
    let paper_lines: Vec<String> = papers
        .iter()
        .zip(citations.iter())
        .map(|(paper, citation)| format!("[{}] {} ({})", citation.id, paper.title, paper.year.unwrap_or(0)))
        .collect();
    let feedback_block = critic_feedback.map(|f| format!("\nPrevious critic feedback: {f}\n")).unwrap_or_default();
    format!(
        "Write an academic report answering: {}\n\
         Sub-questions: {}\n\
         Use these citation refs literally where supporting a claim:\n{}\n{}\n\
         Start with a level-1 '# ' title, include an '## Abstract' section.",
        plan.main_question,
        plan.sub_questions.join("; "),
        paper_lines.join("\n"),
        feedback_block
    )
}

/// Parse a finished (or salvaged) writer buffer into sections and a title.
fn finalize_report(raw: &str, fallback_question: &str, citations: Vec<Citation>, iteration: u32, salvaged_chars: usize) -> ResearchReport {
    let mut title = fallback_question.to_string();
    let mut sections = Vec::new();
    let mut abstract_text = None;

    let mut current: Option<(u8, String, String)> = None;
    for line in raw.lines() {
        if let Some(caps) = header_regex().captures(line) {
            if let Some((level, section_title, content)) = current.take() {
                if level == 2 && section_title.eq_ignore_ascii_case("abstract") {
                    abstract_text = Some(content.trim().to_string());
                } else {
                    sections.push(ReportSection { level, title: section_title, content: content.trim().to_string() });
                }
            }
            let level = caps[1].len() as u8;
            let section_title = caps[2].trim().to_string();
            if level == 1 {
                title = section_title.clone();
            }
            current = Some((level, section_title, String::new()));
        } else if let Some((_, _, content)) = current.as_mut() {
            content.push_str(line);
            content.push('\n');
        }
    }
    if let Some((level, section_title, content)) = current {
        if level == 2 && section_title.eq_ignore_ascii_case("abstract") {
            abstract_text = Some(content.trim().to_string());
        } else {
            sections.push(ReportSection { level, title: section_title, content: content.trim().to_string() });
        }
    }

    let _ = salvaged_chars;
    ResearchReport {
        title,
        abstract_text,
        sections,
        citations,
        generated_at: Utc::now(),
        iteration_count: iteration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ieee_style_uses_numeric_refs() {
        let papers = vec![Paper::new("s2-1", "A Paper")];
        let citations = build_citation_registry(&papers, CitationStyle::Ieee);
        assert_eq!(citations[0].in_text_ref, "[1]");
    }

    #[test]
    fn apa_style_uses_author_year() {
        let mut paper = Paper::new("s2-1", "A Paper");
        paper.authors.push(crate::paper::Author::new("Smith"));
        paper.year = Some(2020);
        let citations = build_citation_registry(&[paper], CitationStyle::Apa);
        assert_eq!(citations[0].in_text_ref, "(Smith, 2020)");
    }

    #[test]
    fn salvage_below_threshold_fails() {
        let err = salvage_or_fail("x".repeat(999)).unwrap_err();
        assert!(matches!(err, Error::PartialContent { chars_accumulated: 999 }));
    }

    #[test]
    fn salvage_above_threshold_appends_note_below_note_ceiling() {
        let text = salvage_or_fail("x".repeat(1500)).unwrap();
        assert!(text.contains("may be incomplete"));
    }

    #[test]
    fn salvage_above_note_ceiling_has_no_note() {
        let text = salvage_or_fail("x".repeat(3500)).unwrap();
        assert!(!text.contains("may be incomplete"));
    }

    #[test]
    fn finalize_report_extracts_title_and_abstract() {
        let raw = "# The Title\n\n## Abstract\nShort summary.\n\n## Introduction\nBody text.\n";
        let report = finalize_report(raw, "fallback", vec![], 1, raw.len());
        assert_eq!(report.title, "The Title");
        assert_eq!(report.abstract_text.as_deref(), Some("Short summary."));
        assert_eq!(report.sections.len(), 1);
    }
}
