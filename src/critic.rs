//! Deterministic quality metrics, LLM-driven critique, and the quality
//! gate's pass/iterate/fail decision table.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::instrument;

use crate::config::QualityGateConfig;
use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::writer::{Citation, ResearchReport};

/// Purely-computed report metrics — no LLM involved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub word_count: usize,
    pub citation_density: f64,
    pub unique_sources_used: usize,
    pub recency_score: f64,
    pub sub_questions_covered: usize,
    pub sub_questions_total: usize,
    pub average_citation_year: Option<f64>,
    pub open_access_percentage: f64,
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\d+(,\s*\d+)*\]").unwrap())
}

/// Deterministic metrics computation from report content + its cited papers.
pub fn calculate_quality_metrics(
    report_content: &str,
    citations: &[Citation],
    cited_open_access: &[bool],
    sub_questions: &[String],
    current_year: i32,
) -> QualityMetrics {
    let word_count = report_content.split_whitespace().count();

    let citation_matches = citation_regex().find_iter(report_content).count();
    let citation_density = if word_count == 0 {
        0.0
    } else {
        citation_matches as f64 * 500.0 / word_count as f64
    };

    let unique_sources_used: std::collections::HashSet<&str> =
        citations.iter().map(|c| c.paper_id.as_str()).collect();

    let years: Vec<i32> = citations.iter().filter_map(|c| c.year).collect();
    let average_citation_year = if years.is_empty() {
        None
    } else {
        Some(years.iter().sum::<i32>() as f64 / years.len() as f64)
    };
    let recency_score = match average_citation_year {
        Some(avg) => {
            let gap = (current_year as f64 - avg - 3.0).max(0.0);
            (100.0 - gap * 10.0).clamp(0.0, 100.0)
        }
        None => 0.0,
    };

    let lower_content = report_content.to_lowercase();
    let sub_questions_covered = sub_questions
        .iter()
        .filter(|q| {
            let keywords: Vec<&str> = q.split_whitespace().filter(|w| w.len() >= 5).collect();
            if keywords.is_empty() {
                return false;
            }
            let hits = keywords
                .iter()
                .filter(|k| lower_content.contains(&k.to_lowercase()))
                .count();
            (hits as f64 / keywords.len() as f64) >= 0.3
        })
        .count();

    let open_access_percentage = if cited_open_access.is_empty() {
        0.0
    } else {
        cited_open_access.iter().filter(|x| **x).count() as f64 / cited_open_access.len() as f64 * 100.0
    };

    QualityMetrics {
        word_count,
        citation_density,
        unique_sources_used: unique_sources_used.len(),
        recency_score,
        sub_questions_covered,
        sub_questions_total: sub_questions.len(),
        average_citation_year,
        open_access_percentage,
    }
}

/// Hallucination severity, only non-low severities contribute to iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HallucinationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hallucination {
    pub description: String,
    pub severity: HallucinationSeverity,
}

/// LLM-produced structured critique of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticAnalysis {
    pub overall_score: f64,
    pub coverage_score: f64,
    pub citation_accuracy_score: f64,
    pub coherence_score: f64,
    pub depth_score: f64,
    pub gaps_identified: Vec<String>,
    pub hallucinations: Vec<Hallucination>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub should_iterate: bool,
    pub feedback: String,
    pub suggested_searches: Vec<String>,
}

impl CriticAnalysis {
    /// A neutral, non-iterating analysis used when the LLM call fails schema
    /// validation twice — never guess numeric scores from prose.
    fn neutral_default() -> Self {
        Self {
            overall_score: 70.0,
            coverage_score: 70.0,
            citation_accuracy_score: 70.0,
            coherence_score: 70.0,
            depth_score: 70.0,
            gaps_identified: Vec::new(),
            hallucinations: Vec::new(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            should_iterate: false,
            feedback: "Critic response could not be parsed; proceeding with a neutral assessment.".to_string(),
            suggested_searches: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDecision {
    Pass,
    Iterate,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub passed: bool,
    pub metrics: QualityMetrics,
    pub analysis: CriticAnalysis,
    pub iteration: u32,
    pub max_iterations: u32,
    pub decision: GateDecision,
    pub reason: String,
}

/// `evaluateQuality`: the pass/iterate/fail decision table, applied in order.
pub fn evaluate_quality(
    metrics: QualityMetrics,
    analysis: CriticAnalysis,
    iteration: u32,
    config: &QualityGateConfig,
    max_iterations: u32,
) -> QualityGateResult {
    if iteration >= max_iterations {
        return QualityGateResult {
            passed: true,
            decision: GateDecision::Pass,
            reason: "max iterations reached".to_string(),
            metrics,
            analysis,
            iteration,
            max_iterations,
        };
    }

    if analysis.overall_score < config.min_overall_score * 0.5 {
        return QualityGateResult {
            passed: false,
            decision: GateDecision::Fail,
            reason: "critically low overall score".to_string(),
            metrics,
            analysis,
            iteration,
            max_iterations,
        };
    }

    let non_low_hallucinations = analysis
        .hallucinations
        .iter()
        .filter(|h| h.severity != HallucinationSeverity::Low)
        .count();

    let should_iterate = analysis.should_iterate
        && (analysis.overall_score < config.min_overall_score
            || metrics.citation_density < config.min_citation_density
            || metrics.unique_sources_used < config.min_unique_sources
            || !analysis.gaps_identified.is_empty()
            || non_low_hallucinations > 0);

    if should_iterate {
        let mut issues = Vec::new();
        if analysis.overall_score < config.min_overall_score {
            issues.push("overall score below threshold".to_string());
        }
        if metrics.citation_density < config.min_citation_density {
            issues.push("citation density below threshold".to_string());
        }
        if metrics.unique_sources_used < config.min_unique_sources {
            issues.push("too few unique sources".to_string());
        }
        if !analysis.gaps_identified.is_empty() {
            issues.push(format!("{} gap(s) identified", analysis.gaps_identified.len()));
        }
        if non_low_hallucinations > 0 {
            issues.push(format!("{non_low_hallucinations} non-low-severity hallucination(s)"));
        }
        return QualityGateResult {
            passed: false,
            decision: GateDecision::Iterate,
            reason: issues.join("; "),
            metrics,
            analysis,
            iteration,
            max_iterations,
        };
    }

    QualityGateResult {
        passed: true,
        decision: GateDecision::Pass,
        reason: "quality thresholds met".to_string(),
        metrics,
        analysis,
        iteration,
        max_iterations,
    }
}

pub struct Critic<C: LLMClient> {
    client: C,
}

impl<C: LLMClient> Critic<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    #[instrument(skip(self, report))]
    pub async fn analyze_report(&self, report: &ResearchReport, sub_questions: &[String]) -> Result<CriticAnalysis> {
        let prompt = format!(
            "Critique this report against its sub-questions and return a structured analysis.\n\
             Sub-questions: {}\n\
             Report title: {}\n\
             Respond using these exact field markers, one per line:\n\
             OVERALL_SCORE: <0-100>\n\
             COVERAGE_SCORE: <0-100>\n\
             CITATION_ACCURACY_SCORE: <0-100>\n\
             COHERENCE_SCORE: <0-100>\n\
             DEPTH_SCORE: <0-100>\n\
             GAP: <identified gap, one per line, may be absent>\n\
             HALLUCINATION: <severity:low|medium|high|critical> | <description>\n\
             STRENGTH: <strength, one per line, may be absent>\n\
             WEAKNESS: <weakness, one per line, may be absent>\n\
             SHOULD_ITERATE: <true|false>\n\
             FEEDBACK: <one paragraph>\n\
             SUGGESTED_SEARCH: <query, one per line, may be absent>\n",
            sub_questions.join("; "),
            report.title
        );
        let request = CompletionRequest::new().with_message(ChatMessage::user(prompt));
        match self.client.complete(request).await {
            Ok(resp) => Ok(parse_critic_analysis(&resp.content)),
            Err(_) => Ok(CriticAnalysis::neutral_default()),
        }
    }
}

fn extract_field(text: &str, marker: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix(marker).map(|rest| rest.trim().to_string()))
}

fn extract_all(text: &str, marker: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix(marker).map(|rest| rest.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect()
}

fn extract_score(text: &str, marker: &str, default: f64) -> f64 {
    extract_field(text, marker)
        .and_then(|s| s.parse::<f64>().ok())
        .map(|s| s.clamp(0.0, 100.0))
        .unwrap_or(default)
}

/// Parses the marker-format critique into real fields, falling back to the
/// neutral default only for pieces the response left unparseable.
fn parse_critic_analysis(text: &str) -> CriticAnalysis {
    let default = CriticAnalysis::neutral_default();

    let hallucinations = extract_all(text, "HALLUCINATION:")
        .into_iter()
        .map(|line| {
            let mut parts = line.splitn(2, '|');
            let severity = parts.next().unwrap_or_default().trim().to_lowercase();
            let description = parts.next().unwrap_or_default().trim().to_string();
            let severity = match severity.as_str() {
                "critical" => HallucinationSeverity::Critical,
                "high" => HallucinationSeverity::High,
                "medium" => HallucinationSeverity::Medium,
                _ => HallucinationSeverity::Low,
            };
            Hallucination { description, severity }
        })
        .collect();

    let should_iterate = extract_field(text, "SHOULD_ITERATE:")
        .map(|s| s.eq_ignore_ascii_case("true"))
        .unwrap_or(default.should_iterate);

    CriticAnalysis {
        overall_score: extract_score(text, "OVERALL_SCORE:", default.overall_score),
        coverage_score: extract_score(text, "COVERAGE_SCORE:", default.coverage_score),
        citation_accuracy_score: extract_score(text, "CITATION_ACCURACY_SCORE:", default.citation_accuracy_score),
        coherence_score: extract_score(text, "COHERENCE_SCORE:", default.coherence_score),
        depth_score: extract_score(text, "DEPTH_SCORE:", default.depth_score),
        gaps_identified: extract_all(text, "GAP:"),
        hallucinations,
        strengths: extract_all(text, "STRENGTH:"),
        weaknesses: extract_all(text, "WEAKNESS:"),
        should_iterate,
        feedback: extract_field(text, "FEEDBACK:").unwrap_or(default.feedback),
        suggested_searches: extract_all(text, "SUGGESTED_SEARCH:"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_citations(years: &[i32]) -> Vec<Citation> {
        years
            .iter()
            .enumerate()
            .map(|(i, year)| Citation {
                id: i as u32 + 1,
                paper_id: format!("p{i}"),
                authors: vec![],
                year: Some(*year),
                doi: None,
                url: None,
                in_text_ref: format!("[{}]", i + 1),
                journal: None,
                volume: None,
                issue: None,
                pages: None,
                publisher: None,
                conference: None,
            })
            .collect()
    }

    #[test]
    fn citation_density_counts_bracket_groups() {
        let content = "Claim one [1]. Claim two [2, 3]. No cite here.";
        let citations = sample_citations(&[2020, 2021, 2022]);
        let metrics = calculate_quality_metrics(content, &citations, &[true, false, true], &[], 2024);
        assert!(metrics.citation_density > 0.0);
        assert_eq!(metrics.unique_sources_used, 3);
    }

    #[test]
    fn sub_question_coverage_requires_30_percent_keyword_overlap() {
        let content = "This report discusses transformer architecture extensively.";
        let sub_questions = vec!["How does transformer architecture improve summarization?".to_string()];
        let metrics = calculate_quality_metrics(content, &[], &[], &sub_questions, 2024);
        assert_eq!(metrics.sub_questions_covered, 1);
    }

    #[test]
    fn max_iterations_always_passes_regardless_of_score() {
        let metrics = calculate_quality_metrics("", &[], &[], &[], 2024);
        let mut analysis = CriticAnalysis::neutral_default();
        analysis.overall_score = 10.0;
        analysis.should_iterate = true;
        let config = QualityGateConfig::default();
        let result = evaluate_quality(metrics, analysis, 3, &config, 3);
        assert_eq!(result.decision, GateDecision::Pass);
    }

    #[test]
    fn critically_low_score_fails_even_before_max_iterations() {
        let metrics = calculate_quality_metrics("", &[], &[], &[], 2024);
        let mut analysis = CriticAnalysis::neutral_default();
        analysis.overall_score = 10.0;
        let config = QualityGateConfig::default();
        let result = evaluate_quality(metrics, analysis, 0, &config, 3);
        assert_eq!(result.decision, GateDecision::Fail);
    }

    #[test]
    fn parses_marker_response_into_real_fields() {
        let text = "OVERALL_SCORE: 62\n\
                     COVERAGE_SCORE: 55\n\
                     CITATION_ACCURACY_SCORE: 80\n\
                     COHERENCE_SCORE: 75\n\
                     DEPTH_SCORE: 60\n\
                     GAP: industrial code evaluation missing\n\
                     SHOULD_ITERATE: true\n\
                     FEEDBACK: needs broader coverage\n";
        let analysis = parse_critic_analysis(text);
        assert_eq!(analysis.overall_score, 62.0);
        assert!(analysis.should_iterate);
        assert_eq!(analysis.gaps_identified.len(), 1);

        let config = QualityGateConfig::default();
        let metrics = calculate_quality_metrics("", &[], &[], &[], 2024);
        let result = evaluate_quality(metrics, analysis, 0, &config, 3);
        assert_eq!(result.decision, GateDecision::Iterate);
    }

    #[test]
    fn iterate_lists_each_failing_criterion() {
        let metrics = calculate_quality_metrics("short report", &[], &[], &[], 2024);
        let mut analysis = CriticAnalysis::neutral_default();
        analysis.overall_score = 50.0;
        analysis.should_iterate = true;
        analysis.gaps_identified = vec!["industrial code evaluation".to_string()];
        let config = QualityGateConfig::default();
        let result = evaluate_quality(metrics, analysis, 0, &config, 3);
        assert_eq!(result.decision, GateDecision::Iterate);
        assert!(result.reason.contains("gap"));
    }
}
