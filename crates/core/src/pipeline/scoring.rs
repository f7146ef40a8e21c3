//! Deterministic health scoring (§4.5a). Reproducible from the issue list
//! alone, independent of any LLM call, so Testable Property 6 holds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Warning,
    Medium,
    Info,
    Low,
}

impl Severity {
    fn deduction(self) -> f64 {
        match self {
            Severity::Critical => 15.0,
            Severity::High | Severity::Warning => 5.0,
            Severity::Medium => 2.0,
            Severity::Info | Severity::Low => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreResult {
    pub health_score: u8,
    pub risk_level: RiskLevel,
    pub production_ready: bool,
}

/// Computes the health score per §4.5a: start at 100, deduct per severity,
/// cap the total deduction at 100, round to the nearest integer.
pub fn score_issues(severities: &[Severity]) -> ScoreResult {
    let total_deduction: f64 = severities.iter().map(|s| s.deduction()).sum();
    let capped_deduction = total_deduction.min(100.0);
    let health_score = (100.0 - capped_deduction).round().clamp(0.0, 100.0) as u8;

    let risk_level = if health_score < 50 {
        RiskLevel::Critical
    } else if health_score < 70 {
        RiskLevel::High
    } else if health_score < 85 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    ScoreResult {
        health_score,
        risk_level,
        production_ready: health_score > 80,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S1 from §8.
    #[test]
    fn scenario_s1_matches_spec() {
        let severities = vec![
            Severity::Critical,
            Severity::High,
            Severity::High,
            Severity::Low,
        ];
        let result = score_issues(&severities);
        assert_eq!(result.health_score, 75);
        assert!(matches!(result.risk_level, RiskLevel::Medium));
        assert!(!result.production_ready);
    }

    #[test]
    fn no_issues_is_perfect_score() {
        let result = score_issues(&[]);
        assert_eq!(result.health_score, 100);
        assert!(result.production_ready);
        assert!(matches!(result.risk_level, RiskLevel::Low));
    }

    #[test]
    fn deduction_never_drives_score_negative() {
        let severities = vec![Severity::Critical; 20];
        let result = score_issues(&severities);
        assert_eq!(result.health_score, 0);
        assert!(matches!(result.risk_level, RiskLevel::Critical));
    }

    #[test]
    fn scoring_is_deterministic() {
        let severities = vec![Severity::Medium, Severity::Info, Severity::Warning];
        let a = score_issues(&severities);
        let b = score_issues(&severities);
        assert_eq!(a.health_score, b.health_score);
        assert_eq!(a.risk_level as u8, b.risk_level as u8);
    }
}
