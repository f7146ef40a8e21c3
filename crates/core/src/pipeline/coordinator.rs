//! Phase 3 — Coordinator. Merges worker findings, scores them, and produces
//! the final audit report shape (§4.5 Phase 3, §4.5a, §10 supplemented
//! `categoryAssessments`/`seniorDeveloperAssessment`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::scoring::{score_issues, RiskLevel, Severity};
use crate::pipeline::worker::WorkerResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Option<String>,
    pub severity: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub bad_code: Option<String>,
    pub remediation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryAssessment {
    pub category: String,
    pub issue_count: usize,
    pub mean_deduction: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub issues: Vec<Issue>,
    pub health_score: u8,
    pub summary: String,
    pub top_strengths: Vec<String>,
    pub top_issues: Vec<Issue>,
    pub suspicious_files: Vec<String>,
    pub category_assessments: Vec<CategoryAssessment>,
    pub senior_developer_assessment: String,
    pub overall_verdict: String,
    pub production_ready: bool,
    pub risk_level: String,
    pub tier: String,
}

fn parse_severity(raw: &str) -> Severity {
    match raw {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "warning" => Severity::Warning,
        "medium" => Severity::Medium,
        "low" => Severity::Low,
        _ => Severity::Info,
    }
}

fn risk_level_str(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Critical => "critical",
        RiskLevel::High => "high",
        RiskLevel::Medium => "medium",
        RiskLevel::Low => "low",
    }
}

/// Merges worker outputs by `issues` array (deduplicating by `id` when
/// present, otherwise keeping the worker order for a stable result), scores
/// them deterministically, and assembles the report shape. Commutative in
/// worker-result order except for stable tie-breaking by `taskId` (§5).
pub fn coordinate(
    worker_results: &[WorkerResult],
    tier: &str,
    file_count: usize,
) -> (Report, u64) {
    let mut ordered_results = worker_results.to_vec();
    ordered_results.sort_by(|a, b| a.task_id.cmp(&b.task_id));

    let mut seen_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut issues: Vec<Issue> = Vec::new();
    let mut worker_tokens: u64 = 0;

    for result in &ordered_results {
        worker_tokens += result.token_usage;
        let found = result
            .findings
            .get("issues")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for value in found {
            let issue: Issue = match serde_json::from_value(value) {
                Ok(issue) => issue,
                Err(_) => continue,
            };
            if let Some(id) = &issue.id {
                if !seen_ids.insert(id.clone()) {
                    continue;
                }
            }
            issues.push(issue);
        }
    }

    let severities: Vec<Severity> = issues.iter().map(|i| parse_severity(&i.severity)).collect();
    let score = score_issues(&severities);

    let mut category_totals: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for issue in &issues {
        let deduction = parse_severity(&issue.severity) as u8 as f64;
        let entry = category_totals.entry(issue.category.clone()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += deduction;
    }
    let category_assessments: Vec<CategoryAssessment> = category_totals
        .into_iter()
        .map(|(category, (count, total))| CategoryAssessment {
            category,
            issue_count: count,
            mean_deduction: if count > 0 { total / count as f64 } else { 0.0 },
        })
        .collect();

    let mut top_issues: Vec<Issue> = issues.clone();
    top_issues.sort_by_key(|i| parse_severity(&i.severity) as u8);
    top_issues.truncate(5);

    let suspicious_files: Vec<String> = issues
        .iter()
        .filter_map(|i| i.file_path.clone())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let summary = generate_summary(score.health_score, &issues, file_count);
    let senior_developer_assessment = generate_senior_assessment(&top_issues, score.health_score);
    let overall_verdict = if score.production_ready {
        "Ready for production with minor follow-ups.".to_string()
    } else {
        "Not production-ready until the flagged issues are resolved.".to_string()
    };

    let report = Report {
        issues,
        health_score: score.health_score,
        summary,
        top_strengths: Vec::new(),
        top_issues,
        suspicious_files,
        category_assessments,
        senior_developer_assessment,
        overall_verdict,
        production_ready: score.production_ready,
        risk_level: risk_level_str(score.risk_level).to_string(),
        tier: tier.to_string(),
    };

    (report, worker_tokens)
}

fn generate_summary(health_score: u8, issues: &[Issue], file_count: usize) -> String {
    format!(
        "Reviewed {file_count} files and found {count} issue(s); overall health score {health_score}/100.",
        count = issues.len(),
    )
}

/// Deterministic post-processing over the already-scored issue list — not a
/// second LLM call — so the report stays reproducible from the issue list
/// (Testable Property 6) per §10.
fn generate_senior_assessment(top_issues: &[Issue], health_score: u8) -> String {
    if top_issues.is_empty() {
        return "No significant issues surfaced during review.".to_string();
    }
    let headline = &top_issues[0];
    format!(
        "The most pressing concern is '{}' ({}); addressing the top {} issue(s) would raise the health score above {}.",
        headline.title,
        headline.severity,
        top_issues.len(),
        health_score.saturating_add(10).min(100),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(task_id: &str, issues: serde_json::Value) -> WorkerResult {
        WorkerResult {
            task_id: task_id.to_string(),
            findings: serde_json::json!({"issues": issues}),
            token_usage: 10,
        }
    }

    #[test]
    fn tolerates_placeholder_error_results() {
        let results = vec![
            worker("a", serde_json::json!([{"severity":"high","category":"security","title":"t","description":"d"}])),
            WorkerResult {
                task_id: "b".to_string(),
                findings: serde_json::json!({"error": true, "message": "boom"}),
                token_usage: 0,
            },
        ];
        let (report, _) = coordinate(&results, "security", 10);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn deduplicates_by_id() {
        let results = vec![
            worker("a", serde_json::json!([{"id":"x1","severity":"high","category":"security","title":"t","description":"d"}])),
            worker("b", serde_json::json!([{"id":"x1","severity":"high","category":"security","title":"t","description":"d"}])),
        ];
        let (report, _) = coordinate(&results, "security", 10);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn order_of_worker_results_does_not_change_outcome() {
        let a = worker("a", serde_json::json!([{"severity":"critical","category":"x","title":"t1","description":"d"}]));
        let b = worker("b", serde_json::json!([{"severity":"low","category":"y","title":"t2","description":"d"}]));
        let (r1, _) = coordinate(&[a.clone(), b.clone()], "security", 5);
        let (r2, _) = coordinate(&[b, a], "security", 5);
        assert_eq!(r1.health_score, r2.health_score);
        assert_eq!(r1.issues.len(), r2.issues.len());
    }
}
