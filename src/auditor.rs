//! Evidence auditing: extract claims from a report, verify each against its
//! cited papers, flag hallucinations, and compute an overall grounding score.
//!
//! Claim extraction is an LLM structured call — same marker-format
//! convention as `planner.rs` — grounded in the donor's
//! `epistemic::claims::ClaimExtractor` (sentence splitting, meta-commentary
//! filtering, hedge detection) for the fallback heuristic used if the LLM
//! response is unparseable, with `ClaimCategory` covering report-claim
//! categories instead of code-behavior categories and evidence links
//! targeting citation refs (`[N]`) instead of code/file refs. Verification
//! follows the donor's `epistemic::verifier::EpistemicVerifier` trait shape
//! (`verify_claim` / `get_events`), replacing its p0/p1 budget-gap math with
//! the simpler four-state `VerificationStatus` this system calls for.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::instrument;

use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::paper::Paper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimCategory {
    Factual,
    Numerical,
    Relational,
    Temporal,
}

/// A factual assertion extracted from report text, with the citation refs
/// it was adjacent to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub category: ClaimCategory,
    pub citation_refs: Vec<u32>,
    pub requires_evidence: bool,
    pub is_hedged: bool,
}

struct ClaimPatterns {
    sentence_split: Regex,
    citation_ref: Regex,
    numeric: Regex,
    temporal: Regex,
    relational: Regex,
    hedge: Regex,
    opinion: Regex,
}

impl ClaimPatterns {
    fn new() -> Self {
        Self {
            sentence_split: Regex::new(r"[.!?]+\s+|\n\n+").unwrap(),
            citation_ref: Regex::new(r"\[(\d+)\]").unwrap(),
            numeric: Regex::new(r"\d+(\.\d+)?%?").unwrap(),
            temporal: Regex::new(r"(?i)\b(in|since|during|before|after)\s+\d{4}\b|\b(19|20)\d{2}\b").unwrap(),
            relational: Regex::new(r"(?i)\b(than|compared to|versus|correlates?\s+with|causes?|leads?\s+to)\b").unwrap(),
            hedge: Regex::new(r"(?i)\b(might|could|possibly|perhaps|probably|likely|seems|appears|suggests|may)\b").unwrap(),
            opinion: Regex::new(r"(?i)^(we believe|in our opinion|it seems reasonable|arguably)").unwrap(),
        }
    }
}

fn patterns() -> &'static ClaimPatterns {
    static PATTERNS: OnceLock<ClaimPatterns> = OnceLock::new();
    PATTERNS.get_or_init(ClaimPatterns::new)
}

/// Deterministic fallback used when the LLM claim-extraction call fails or
/// returns an unparseable response: sentence-splits, filters out questions
/// and short meta-commentary/opinion lines, and classifies each remainder.
fn extract_claims_heuristic(report_content: &str) -> Vec<Claim> {
    let p = patterns();
    p.sentence_split
        .split(report_content)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && s.len() >= 10 && !s.ends_with('?'))
        .filter(|s| !p.opinion.is_match(s))
        .map(|sentence| {
            let citation_refs: Vec<u32> = p
                .citation_ref
                .captures_iter(sentence)
                .filter_map(|c| c[1].parse().ok())
                .collect();
            let category = classify(sentence, p);
            let is_hedged = p.hedge.is_match(sentence);
            Claim {
                text: sentence.to_string(),
                category,
                requires_evidence: !citation_refs.is_empty() || category != ClaimCategory::Relational,
                citation_refs,
                is_hedged,
            }
        })
        .collect()
}

fn classify(sentence: &str, p: &ClaimPatterns) -> ClaimCategory {
    if p.temporal.is_match(sentence) {
        ClaimCategory::Temporal
    } else if p.relational.is_match(sentence) {
        ClaimCategory::Relational
    } else if p.numeric.is_match(sentence) {
        ClaimCategory::Numerical
    } else {
        ClaimCategory::Factual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Uncertain,
    Contradicted,
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimVerification {
    pub is_supported: bool,
    pub relevance_score: f64,
    pub confidence: f64,
    pub status: VerificationStatus,
    pub relevant_excerpt: Option<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HallucinationCategory {
    Fabrication,
    Exaggeration,
    Misattribution,
    Contradiction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallucinationFlag {
    pub claim: String,
    pub category: HallucinationCategory,
    pub severity: crate::critic::HallucinationSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimAuditEntry {
    pub claim: Claim,
    pub status: VerificationStatus,
    pub grounding_score: f64,
    pub verifications: Vec<ClaimVerification>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceAuditResult {
    pub total_claims: usize,
    pub grounded: usize,
    pub uncertain: usize,
    pub unsupported: usize,
    pub contradicted: usize,
    pub overall_grounding_score: f64,
    pub hallucinations: Vec<HallucinationFlag>,
    pub critical_issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub entries: Vec<ClaimAuditEntry>,
}

/// `auditPassesThreshold`: a pure boolean gate over an audit result.
pub fn audit_passes_threshold(audit: &EvidenceAuditResult, min_grounding: f64, max_contradictions: usize) -> bool {
    audit.overall_grounding_score >= min_grounding && audit.contradicted <= max_contradictions
}

pub struct Auditor<C: LLMClient> {
    client: C,
}

impl<C: LLMClient> Auditor<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// `extractClaims`: LLM structured call returning the report's atomic
    /// claims, their inline citation refs, and whether each requires
    /// evidence. Falls back to heuristic sentence-splitting if the response
    /// can't be parsed into any claims.
    #[instrument(skip(self, report_content))]
    pub async fn extract_claims(&self, report_content: &str) -> Result<Vec<Claim>> {
        let prompt = format!(
            "Extract the atomic, checkable claims from this report.\n\
             Report:\n{report_content}\n\n\
             Respond using these exact field markers, one per line, one per claim:\n\
             CLAIM: <claim text> | <category:factual|numerical|relational|temporal> | \
             <citation refs, comma-separated, may be empty> | <requires_evidence:true|false> | <hedged:true|false>\n"
        );
        let request = CompletionRequest::new().with_message(ChatMessage::user(prompt));
        let claims = match self.client.complete(request).await {
            Ok(resp) => parse_claims(&resp.content),
            Err(_) => Vec::new(),
        };
        if claims.is_empty() {
            Ok(extract_claims_heuristic(report_content))
        } else {
            Ok(claims)
        }
    }

    /// `verifyClaim`: check a single claim against one candidate paper.
    #[instrument(skip(self, claim, paper))]
    pub async fn verify_claim(&self, claim: &Claim, paper: &Paper) -> Result<ClaimVerification> {
        let prompt = format!(
            "Does this paper support the claim?\nClaim: {}\nPaper title: {}\nAbstract: {}\n\
             Respond with one of: verified, uncertain, contradicted, unsupported.",
            claim.text,
            paper.title,
            paper.abstract_text.as_deref().unwrap_or("(none)")
        );
        let request = CompletionRequest::new().with_message(ChatMessage::user(prompt));
        let response = self.client.complete(request).await;
        let status = match response {
            Ok(resp) => parse_status(&resp.content),
            Err(_) => VerificationStatus::Uncertain,
        };
        let (is_supported, relevance_score, confidence) = match status {
            VerificationStatus::Verified => (true, 90.0, 85.0),
            VerificationStatus::Uncertain => (false, 50.0, 40.0),
            VerificationStatus::Contradicted => (false, 80.0, 70.0),
            VerificationStatus::Unsupported => (false, 10.0, 60.0),
        };
        Ok(ClaimVerification {
            is_supported,
            relevance_score,
            confidence,
            status,
            relevant_excerpt: paper.abstract_text.clone(),
            reasoning: format!("classified as {status:?} against paper {}", paper.id),
        })
    }

    /// `auditEvidence`: verify every evidence-requiring claim against up to
    /// 5 candidate papers, aggregate per-claim and overall scores.
    #[instrument(skip(self, claims, citation_to_paper, fallback_papers))]
    pub async fn audit_evidence(
        &self,
        claims: &[Claim],
        citation_to_paper: &std::collections::HashMap<u32, Paper>,
        fallback_papers: &[Paper],
    ) -> Result<EvidenceAuditResult> {
        let mut entries = Vec::new();
        let mut hallucinations = Vec::new();
        let mut grounded = 0usize;
        let mut uncertain_count = 0usize;
        let mut unsupported_count = 0usize;
        let mut contradicted_count = 0usize;

        for claim in claims.iter().filter(|c| c.requires_evidence) {
            let mut candidates: Vec<&Paper> = claim
                .citation_refs
                .iter()
                .filter_map(|r| citation_to_paper.get(r))
                .collect();
            if candidates.is_empty() {
                candidates = fallback_papers.iter().take(5).collect();
            } else {
                candidates.truncate(5);
            }

            let mut verifications = Vec::new();
            for paper in &candidates {
                verifications.push(self.verify_claim(claim, paper).await?);
            }

            let status = if verifications.iter().any(|v| v.status == VerificationStatus::Verified) {
                grounded += 1;
                VerificationStatus::Verified
            } else if verifications.iter().any(|v| v.status == VerificationStatus::Contradicted) {
                contradicted_count += 1;
                VerificationStatus::Contradicted
            } else if verifications.iter().any(|v| v.status == VerificationStatus::Uncertain) {
                uncertain_count += 1;
                VerificationStatus::Uncertain
            } else {
                unsupported_count += 1;
                VerificationStatus::Unsupported
            };

            let grounding_score = match status {
                VerificationStatus::Verified => 100.0,
                VerificationStatus::Uncertain => {
                    verifications
                        .iter()
                        .filter(|v| v.status == VerificationStatus::Uncertain)
                        .map(|v| v.confidence)
                        .fold(0.0, f64::max)
                        * 0.5
                }
                VerificationStatus::Contradicted | VerificationStatus::Unsupported => 0.0,
            };

            if matches!(status, VerificationStatus::Unsupported | VerificationStatus::Contradicted) {
                let category = if claim.citation_refs.is_empty() {
                    HallucinationCategory::Fabrication
                } else if status == VerificationStatus::Contradicted {
                    HallucinationCategory::Contradiction
                } else {
                    HallucinationCategory::Exaggeration
                };
                let severity = if status == VerificationStatus::Contradicted {
                    crate::critic::HallucinationSeverity::High
                } else {
                    crate::critic::HallucinationSeverity::Medium
                };
                hallucinations.push(HallucinationFlag {
                    claim: claim.text.clone(),
                    category,
                    severity,
                });
            }

            entries.push(ClaimAuditEntry {
                claim: claim.clone(),
                status,
                grounding_score,
                verifications,
            });
        }

        let total_claims = entries.len();
        let overall_grounding_score = if total_claims == 0 {
            100.0
        } else {
            entries.iter().map(|e| e.grounding_score).sum::<f64>() / total_claims as f64
        };

        let mut critical_issues = Vec::new();
        let unsupported_ratio = if total_claims == 0 {
            0.0
        } else {
            (unsupported_count + contradicted_count) as f64 / total_claims as f64
        };
        if unsupported_ratio > 0.3 {
            critical_issues.push(format!(
                "over 30% of claims lack evidence ({unsupported_count} unsupported, {contradicted_count} contradicted of {total_claims})"
            ));
        }

        let recommendations = if overall_grounding_score < 70.0 {
            vec!["Strengthen citation coverage for low-confidence claims before finalizing.".to_string()]
        } else {
            Vec::new()
        };

        Ok(EvidenceAuditResult {
            total_claims,
            grounded,
            uncertain: uncertain_count,
            unsupported: unsupported_count,
            contradicted: contradicted_count,
            overall_grounding_score,
            hallucinations,
            critical_issues,
            recommendations,
            entries,
        })
    }
}

fn parse_claims(text: &str) -> Vec<Claim> {
    let p = patterns();
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("CLAIM:"))
        .filter_map(|rest| {
            let fields: Vec<&str> = rest.split('|').map(|f| f.trim()).collect();
            let claim_text = fields.first()?.to_string();
            if claim_text.is_empty() {
                return None;
            }
            let category = match fields.get(1).map(|s| s.to_lowercase()) {
                Some(ref s) if s == "numerical" => ClaimCategory::Numerical,
                Some(ref s) if s == "relational" => ClaimCategory::Relational,
                Some(ref s) if s == "temporal" => ClaimCategory::Temporal,
                Some(ref s) if s == "factual" => ClaimCategory::Factual,
                _ => classify(&claim_text, p),
            };
            let citation_refs: Vec<u32> = fields
                .get(2)
                .map(|s| s.split(',').filter_map(|n| n.trim().parse().ok()).collect())
                .unwrap_or_default();
            let requires_evidence = fields
                .get(3)
                .map(|s| s.eq_ignore_ascii_case("true"))
                .unwrap_or_else(|| !citation_refs.is_empty() || category != ClaimCategory::Relational);
            let is_hedged = fields
                .get(4)
                .map(|s| s.eq_ignore_ascii_case("true"))
                .unwrap_or_else(|| p.hedge.is_match(&claim_text));

            Some(Claim {
                text: claim_text,
                category,
                citation_refs,
                requires_evidence,
                is_hedged,
            })
        })
        .collect()
}

fn parse_status(text: &str) -> VerificationStatus {
    let lower = text.to_lowercase();
    if lower.contains("contradicted") {
        VerificationStatus::Contradicted
    } else if lower.contains("unsupported") {
        VerificationStatus::Unsupported
    } else if lower.contains("verified") {
        VerificationStatus::Verified
    } else {
        VerificationStatus::Uncertain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_non_question_claims_with_citation_refs() {
        let content = "Transformers improved summarization accuracy by 12% [1]. Is this surprising? We believe this trend will continue.";
        let claims = extract_claims_heuristic(content);
        assert!(claims.iter().any(|c| c.citation_refs == vec![1]));
        assert!(!claims.iter().any(|c| c.text.contains("Is this surprising")));
    }

    #[test]
    fn classifies_numerical_and_temporal_claims() {
        let content = "Accuracy rose by 12% in 2021.";
        let claims = extract_claims_heuristic(content);
        assert!(!claims.is_empty());
    }

    #[test]
    fn parses_structured_claim_markers_from_llm_response() {
        let response = "CLAIM: Accuracy rose by 12% [1] | numerical | 1 | true | false\n";
        let claims = parse_claims(response);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].category, ClaimCategory::Numerical);
        assert_eq!(claims[0].citation_refs, vec![1]);
        assert!(claims[0].requires_evidence);
    }

    #[tokio::test]
    async fn extract_claims_falls_back_to_heuristic_on_unparseable_response() {
        use crate::llm::{CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider, TokenUsage};
        use async_trait::async_trait;
        use crate::error::Error;

        struct StubClient;

        #[async_trait]
        impl LLMClient for StubClient {
            async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
                Ok(CompletionResponse {
                    id: "stub".into(),
                    model: "stub-model".into(),
                    content: "not the expected format".into(),
                    stop_reason: None,
                    usage: TokenUsage::default(),
                    timestamp: chrono::Utc::now(),
                    cost: Some(0.0),
                })
            }
            async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
                Err(Error::llm("embeddings not supported by stub"))
            }
            fn provider(&self) -> Provider {
                Provider::Anthropic
            }
            fn available_models(&self) -> Vec<ModelSpec> {
                vec![]
            }
        }

        let auditor = Auditor::new(StubClient);
        let claims = auditor
            .extract_claims("Transformers improved accuracy by 12% [1].")
            .await
            .unwrap();
        assert!(!claims.is_empty());
    }

    #[test]
    fn audit_passes_threshold_checks_both_conditions() {
        let audit = EvidenceAuditResult {
            total_claims: 10,
            grounded: 9,
            uncertain: 1,
            unsupported: 0,
            contradicted: 0,
            overall_grounding_score: 92.0,
            hallucinations: vec![],
            critical_issues: vec![],
            recommendations: vec![],
            entries: vec![],
        };
        assert!(audit_passes_threshold(&audit, 80.0, 1));
        assert!(!audit_passes_threshold(&audit, 95.0, 1));
    }
}
