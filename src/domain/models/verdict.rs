//! Judge verdict domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verification dimensions the judge can score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    Completeness,
    Correctness,
    Quality,
    Testing,
    Documentation,
    Security,
    Performance,
    Custom,
}

impl CriterionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completeness => "completeness",
            Self::Correctness => "correctness",
            Self::Quality => "quality",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Custom => "custom",
        }
    }
}

/// Configuration of one verification criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionConfig {
    /// Which scoring rules apply
    pub kind: CriterionKind,
    /// Relative weight in the overall score
    pub weight: f64,
    /// Score the criterion must reach to pass
    pub threshold: f64,
    /// Disabled criteria are skipped entirely
    pub enabled: bool,
}

impl CriterionConfig {
    /// Equal-weight criterion with the default 0.7 threshold.
    pub fn new(kind: CriterionKind) -> Self {
        Self {
            kind,
            weight: 1.0,
            threshold: 0.7,
            enabled: true,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

/// Score of a single criterion, with the concrete signals that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// Which criterion was scored
    pub kind: CriterionKind,
    /// Clamped to [0, 1]
    pub score: f64,
    /// Weight used in aggregation
    pub weight: f64,
    /// Pass threshold
    pub threshold: f64,
    /// Whether score >= threshold
    pub passed: bool,
    /// Concrete signals observed while scoring
    pub evidence: Vec<String>,
    /// Feedback line used in rework prompts when the criterion fails
    pub feedback: String,
}

/// The scored outcome of verifying one task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// Task the verdict applies to
    pub task_id: String,
    /// Weighted mean of criterion scores
    pub overall_score: f64,
    /// Overall pass/fail decision
    pub passed: bool,
    /// Confidence in the verdict, in [0, 1]
    pub confidence: f64,
    /// Per-criterion sub-scores
    pub criteria: Vec<CriterionScore>,
    /// Generated rework prompt when the verdict failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rework_instructions: Option<String>,
    /// Low-confidence verdicts are flagged for human approval
    pub requires_human_approval: bool,
    /// When the verdict was produced
    pub created_at: DateTime<Utc>,
}

impl JudgeVerdict {
    /// Auto-pass verdict emitted when the judge is disabled.
    pub fn auto_pass(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            overall_score: 1.0,
            passed: true,
            confidence: 1.0,
            criteria: Vec::new(),
            rework_instructions: None,
            requires_human_approval: false,
            created_at: Utc::now(),
        }
    }

    /// Criteria that failed their threshold.
    pub fn failed_criteria(&self) -> impl Iterator<Item = &CriterionScore> {
        self.criteria.iter().filter(|c| !c.passed)
    }

    /// Whether the verdict carries rework instructions.
    pub fn requires_rework(&self) -> bool {
        !self.passed && self.rework_instructions.is_some()
    }
}
