//! Section extraction: a line-oriented scan that splits full text into
//! canonical sections using a small fixed set of header regexes.

use regex::Regex;
use std::sync::OnceLock;

use crate::paper::{PaperSection, SectionType};

struct HeaderPatterns {
    abstract_re: Regex,
    introduction: Regex,
    background: Regex,
    methods: Regex,
    results: Regex,
    discussion: Regex,
    conclusion: Regex,
    references: Regex,
    acknowledgments: Regex,
}

impl HeaderPatterns {
    fn new() -> Self {
        Self {
            abstract_re: Regex::new(r"(?i)^\s*(#{1,3}\s*)?abstract\s*$").unwrap(),
            introduction: Regex::new(r"(?i)^\s*(#{1,3}\s*)?(\d+\.?\s*)?introduction\s*$").unwrap(),
            background: Regex::new(
                r"(?i)^\s*(#{1,3}\s*)?(\d+\.?\s*)?(background|related\s+work|literature\s+review)\s*$",
            )
            .unwrap(),
            methods: Regex::new(
                r"(?i)^\s*(#{1,3}\s*)?(\d+\.?\s*)?(methods?|methodology|materials\s+and\s+methods)\s*$",
            )
            .unwrap(),
            results: Regex::new(r"(?i)^\s*(#{1,3}\s*)?(\d+\.?\s*)?results?\s*$").unwrap(),
            discussion: Regex::new(r"(?i)^\s*(#{1,3}\s*)?(\d+\.?\s*)?discussion\s*$").unwrap(),
            conclusion: Regex::new(r"(?i)^\s*(#{1,3}\s*)?(\d+\.?\s*)?(conclusions?|summary)\s*$").unwrap(),
            references: Regex::new(r"(?i)^\s*(#{1,3}\s*)?(references|bibliography)\s*$").unwrap(),
            acknowledgments: Regex::new(r"(?i)^\s*(#{1,3}\s*)?acknowledg[e]?ments?\s*$").unwrap(),
        }
    }

    fn classify(&self, line: &str) -> Option<SectionType> {
        if self.abstract_re.is_match(line) {
            Some(SectionType::Abstract)
        } else if self.introduction.is_match(line) {
            Some(SectionType::Introduction)
        } else if self.background.is_match(line) {
            Some(SectionType::Background)
        } else if self.methods.is_match(line) {
            Some(SectionType::Methods)
        } else if self.results.is_match(line) {
            Some(SectionType::Results)
        } else if self.discussion.is_match(line) {
            Some(SectionType::Discussion)
        } else if self.conclusion.is_match(line) {
            Some(SectionType::Conclusion)
        } else if self.references.is_match(line) {
            Some(SectionType::References)
        } else if self.acknowledgments.is_match(line) {
            Some(SectionType::Acknowledgments)
        } else {
            None
        }
    }
}

/// Thin wrapper so the enricher can hold the compiled pattern set without
/// recompiling per call; `extract_sections` is the usual entry point.
pub struct SectionExtractor;

impl SectionExtractor {
    pub fn extract(text: &str) -> Vec<PaperSection> {
        extract_sections(text)
    }
}

/// Split `text` into sections by scanning for canonical header lines.
/// Text before the first recognized header, or all of it if no header is
/// found, becomes a single `Other` section.
pub fn extract_sections(text: &str) -> Vec<PaperSection> {
    static PATTERNS: OnceLock<HeaderPatterns> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(HeaderPatterns::new);

    let mut sections = Vec::new();
    let mut current_type: Option<SectionType> = None;
    let mut current_title = String::new();
    let mut current_start = 0usize;
    let mut buffer = String::new();
    let mut offset = 0usize;

    let flush = |sections: &mut Vec<PaperSection>,
                 section_type: Option<SectionType>,
                 title: &str,
                 start: usize,
                 end: usize,
                 content: &str| {
        let trimmed = content.trim();
        if trimmed.is_empty() && section_type.is_none() {
            return;
        }
        sections.push(PaperSection {
            section_type: section_type.unwrap_or(SectionType::Other),
            title: title.to_string(),
            content: trimmed.to_string(),
            char_start: start,
            char_end: end,
        });
    };

    for line in text.lines() {
        let line_len = line.len() + 1;
        if let Some(section_type) = patterns.classify(line) {
            flush(
                &mut sections,
                current_type,
                &current_title,
                current_start,
                offset,
                &buffer,
            );
            current_type = Some(section_type);
            current_title = line.trim().to_string();
            current_start = offset;
            buffer.clear();
        } else {
            buffer.push_str(line);
            buffer.push('\n');
        }
        offset += line_len;
    }
    flush(
        &mut sections,
        current_type,
        &current_title,
        current_start,
        offset,
        &buffer,
    );

    if sections.is_empty() && !text.trim().is_empty() {
        sections.push(PaperSection {
            section_type: SectionType::Other,
            title: String::new(),
            content: text.trim().to_string(),
            char_start: 0,
            char_end: text.len(),
        });
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_canonical_headers() {
        let text = "Abstract\nThis paper studies X.\n\nIntroduction\nX matters because Y.\n\nConclusion\nWe showed X.\n";
        let sections = extract_sections(text);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].section_type, SectionType::Abstract);
        assert_eq!(sections[1].section_type, SectionType::Introduction);
        assert_eq!(sections[2].section_type, SectionType::Conclusion);
        assert!(sections[0].content.contains("studies X"));
    }

    #[test]
    fn no_header_yields_single_other_section() {
        let text = "Just a blob of plain text with no headers at all.";
        let sections = extract_sections(text);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].section_type, SectionType::Other);
    }

    #[test]
    fn empty_text_yields_no_sections() {
        assert!(extract_sections("").is_empty());
    }
}
