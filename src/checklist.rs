//! Verifiable checklist: a per-session list of concrete, checkable claims
//! the finished report must satisfy, built once from the research plan and
//! re-verified once a report exists.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::paper::Paper;
use crate::planner::ResearchPlan;
use crate::writer::ResearchReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistStatus {
    Pending,
    Verified,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub description: String,
    pub is_core: bool,
    pub status: ChecklistStatus,
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiableChecklist {
    pub session_id: String,
    pub items: Vec<ChecklistItem>,
    pub progress: f64,
}

const CORE_ITEMS: [&str; 3] = [
    "The report directly answers the main research question.",
    "Every factual claim that needs a citation has one.",
    "The report includes a references section listing every cited source.",
];

/// `buildVerifiableChecklist`: an LLM-generated 8-15 item list plus the 3
/// fixed core items every report must satisfy regardless of topic.
#[instrument(skip(client, plan))]
pub async fn build_verifiable_checklist<C: LLMClient>(
    client: &C,
    plan: &ResearchPlan,
    query: &str,
    session_id: impl Into<String>,
) -> Result<VerifiableChecklist> {
    let session_id = session_id.into();
    let prompt = format!(
        "Given this research query and plan, list 8 to 15 concrete, checkable items \
         a finished report must satisfy (one per line, no numbering).\n\
         Query: {query}\n\
         Main question: {}\n\
         Sub-questions: {}\n",
        plan.main_question,
        plan.sub_questions.join("; ")
    );
    let request = CompletionRequest::new().with_message(ChatMessage::user(prompt));

    let mut generated: Vec<String> = match client.complete(request).await {
        Ok(resp) => resp
            .content
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*']).trim().to_string())
            .filter(|l| l.len() >= 10)
            .take(15)
            .collect(),
        Err(_) => Vec::new(),
    };
    if generated.len() < 8 {
        generated.extend(plan.sub_questions.iter().map(|q| format!("The report addresses: {q}")));
    }

    let mut items: Vec<ChecklistItem> = generated
        .into_iter()
        .enumerate()
        .map(|(i, description)| ChecklistItem {
            id: format!("gen-{i}"),
            description,
            is_core: false,
            status: ChecklistStatus::Pending,
            evidence: None,
        })
        .collect();

    for (i, description) in CORE_ITEMS.iter().enumerate() {
        items.push(ChecklistItem {
            id: format!("core-{i}"),
            description: description.to_string(),
            is_core: true,
            status: ChecklistStatus::Pending,
            evidence: None,
        });
    }

    Ok(VerifiableChecklist {
        session_id,
        items,
        progress: 0.0,
    })
}

/// `verifyChecklistItem`: a single item's yes/partial/no verdict against the
/// finished report.
#[instrument(skip(client, item, report))]
pub async fn verify_checklist_item<C: LLMClient>(
    client: &C,
    item: &ChecklistItem,
    report: &ResearchReport,
    _papers: &[Paper],
) -> Result<(ChecklistStatus, Option<String>)> {
    let body: String = report
        .sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "Checklist item: {}\nReport title: {}\nReport body:\n{}\n\
         Respond with exactly one word: verified, partial, or failed.",
        item.description,
        report.title,
        body.chars().take(6000).collect::<String>()
    );
    let request = CompletionRequest::new().with_message(ChatMessage::user(prompt));
    match client.complete(request).await {
        Ok(resp) => {
            let lower = resp.content.to_lowercase();
            let status = if lower.contains("verified") {
                ChecklistStatus::Verified
            } else if lower.contains("partial") {
                ChecklistStatus::Partial
            } else {
                ChecklistStatus::Failed
            };
            Ok((status, Some(resp.content)))
        }
        Err(err) => Err(err),
    }
}

/// `verifyChecklist`: verify every pending item, tolerating per-item
/// failures by marking that item failed rather than aborting the pass.
#[instrument(skip(client, checklist, report, papers))]
pub async fn verify_checklist<C: LLMClient>(
    client: &C,
    checklist: &mut VerifiableChecklist,
    report: &ResearchReport,
    papers: &[Paper],
) -> Result<()> {
    for item in checklist.items.iter_mut() {
        if !matches!(item.status, ChecklistStatus::Pending) {
            continue;
        }
        match verify_checklist_item(client, item, report, papers).await {
            Ok((status, evidence)) => {
                item.status = status;
                item.evidence = evidence;
            }
            Err(err) => {
                item.status = ChecklistStatus::Failed;
                item.evidence = Some(format!("verification failed: {err}"));
            }
        }
    }
    checklist.progress = recompute_progress(&checklist.items);
    Ok(())
}

fn recompute_progress(items: &[ChecklistItem]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let total: f64 = items
        .iter()
        .map(|item| match item.status {
            ChecklistStatus::Verified => 1.0,
            ChecklistStatus::Partial => 0.5,
            ChecklistStatus::Pending | ChecklistStatus::Failed => 0.0,
        })
        .sum();
    total / items.len() as f64
}
