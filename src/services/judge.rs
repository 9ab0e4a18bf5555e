//! Judge system: rule-based multi-criterion verification.
//!
//! Each criterion scores 0.5 base when the result reports success plus up
//! to 0.5 from concrete signals in the output and metrics. A verdict passes
//! when the weighted mean reaches the pass threshold and no heavily
//! weighted criterion fails. Failed verdicts synthesize a rework prompt.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::models::{
    CriterionConfig, CriterionKind, CriterionScore, HierarchicalTask, JudgeVerdict, SwarmConfig,
    TaskResult, TaskRole,
};

const ERROR_WORDS: &[&str] = &["error", "exception", "failed", "undefined", "null reference"];
const EXPLANATION_WORDS: &[&str] = &["because", "therefore", "this ensures", "this allows"];
const SECURITY_CONCERNS: &[&str] = &[
    "sql injection",
    "xss",
    "csrf",
    "hardcoded password",
    "eval(",
    "exec(",
    "dangerouslysetinnerhtml",
];
const MITIGATION_WORDS: &[&str] = &["sanitize", "validate", "escape"];
const OPTIMIZATION_WORDS: &[&str] = &[
    "optimize",
    "optimized",
    "optimization",
    "cache",
    "caching",
    "efficient",
];
const ANTI_PATTERN_WORDS: &[&str] = &["n+1", "memory leak"];

/// Judge configuration derived from the swarm config.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub enabled: bool,
    pub pass_threshold: f64,
    pub max_retries: u32,
    pub auto_rework_on_failure: bool,
    pub require_human_approval_threshold: f64,
    /// Per-criterion overrides; anything missing defaults to equal weight
    /// with threshold 0.7
    pub criteria: HashMap<CriterionKind, CriterionConfig>,
}

impl JudgeConfig {
    pub fn from_swarm(config: &SwarmConfig) -> Self {
        Self {
            enabled: config.enable_judge,
            pass_threshold: config.judge_pass_threshold,
            max_retries: config.max_judge_retries,
            auto_rework_on_failure: true,
            require_human_approval_threshold: config.require_human_approval_threshold,
            criteria: HashMap::new(),
        }
    }
}

/// Rule-based verification of completed task results.
pub struct Judge {
    config: JudgeConfig,
    /// Verdict history per task id, used for the retry cap
    history: RwLock<HashMap<String, Vec<JudgeVerdict>>>,
}

impl Judge {
    pub fn new(config: &SwarmConfig) -> Self {
        Self::with_config(JudgeConfig::from_swarm(config))
    }

    pub fn with_config(config: JudgeConfig) -> Self {
        Self {
            config,
            history: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Verify a task result. Custom criteria, when supplied, replace the
    /// role-derived selection and are forced enabled.
    pub async fn verify(
        &self,
        task: &HierarchicalTask,
        result: &TaskResult,
        custom_criteria: Option<Vec<CriterionConfig>>,
    ) -> JudgeVerdict {
        if !self.config.enabled {
            return JudgeVerdict::auto_pass(&task.id);
        }

        let configs: Vec<CriterionConfig> = match custom_criteria {
            Some(custom) => custom
                .into_iter()
                .map(|mut c| {
                    c.enabled = true;
                    c
                })
                .collect(),
            None => criteria_for_role(task.role)
                .iter()
                .map(|kind| self.criterion_config(*kind))
                .collect(),
        };
        let configs: Vec<CriterionConfig> = configs.into_iter().filter(|c| c.enabled).collect();

        let scores: Vec<CriterionScore> = configs
            .iter()
            .map(|config| score_criterion(config, task, result))
            .collect();

        let total_weight: f64 = scores.iter().map(|s| s.weight).sum();
        let overall_score = if total_weight > 0.0 {
            scores.iter().map(|s| s.score * s.weight).sum::<f64>() / total_weight
        } else {
            0.0
        };
        let heavy_failure = scores.iter().any(|s| !s.passed && s.weight >= 0.3);
        let passed = overall_score >= self.config.pass_threshold && !heavy_failure;

        let confidence = confidence_of(&scores);
        let rework_instructions = if !passed && self.config.auto_rework_on_failure {
            Some(build_rework_prompt(&task.prompt, &scores))
        } else {
            None
        };

        let verdict = JudgeVerdict {
            task_id: task.id.clone(),
            overall_score,
            passed,
            confidence,
            criteria: scores,
            rework_instructions,
            requires_human_approval: confidence < self.config.require_human_approval_threshold,
            created_at: chrono::Utc::now(),
        };

        debug!(
            task_id = %task.id,
            passed = verdict.passed,
            score = verdict.overall_score,
            confidence = verdict.confidence,
            "Judge verdict issued"
        );

        self.history
            .write()
            .await
            .entry(task.id.clone())
            .or_default()
            .push(verdict.clone());
        verdict
    }

    /// True once the task's verdict history holds at least `max_retries`
    /// failures.
    pub async fn has_exceeded_retries(&self, task_id: &str) -> bool {
        let history = self.history.read().await;
        let failures = history
            .get(task_id)
            .map(|verdicts| verdicts.iter().filter(|v| !v.passed).count())
            .unwrap_or(0);
        failures >= self.config.max_retries as usize
    }

    /// All verdicts issued for a task, oldest first.
    pub async fn verdict_history(&self, task_id: &str) -> Vec<JudgeVerdict> {
        self.history
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    fn criterion_config(&self, kind: CriterionKind) -> CriterionConfig {
        self.config
            .criteria
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| CriterionConfig::new(kind))
    }
}

/// Criteria verified for each task role.
fn criteria_for_role(role: TaskRole) -> &'static [CriterionKind] {
    match role {
        TaskRole::Analysis | TaskRole::Debugging => {
            &[CriterionKind::Completeness, CriterionKind::Correctness]
        }
        TaskRole::Implementation => &[
            CriterionKind::Completeness,
            CriterionKind::Correctness,
            CriterionKind::Quality,
            CriterionKind::Security,
        ],
        TaskRole::Testing => &[
            CriterionKind::Completeness,
            CriterionKind::Correctness,
            CriterionKind::Testing,
        ],
        TaskRole::Documentation => &[CriterionKind::Completeness, CriterionKind::Documentation],
        TaskRole::Planner | TaskRole::Monitor => &[CriterionKind::Completeness],
        TaskRole::Judge => &[CriterionKind::Correctness],
        TaskRole::Synthesizer => &[CriterionKind::Completeness, CriterionKind::Quality],
    }
}

fn score_criterion(
    config: &CriterionConfig,
    task: &HierarchicalTask,
    result: &TaskResult,
) -> CriterionScore {
    let mut evidence = Vec::new();
    let mut score: f64 = 0.0;
    if result.success {
        score += 0.5;
        evidence.push("result reports success".to_string());
    }
    score += match config.kind {
        CriterionKind::Completeness => score_completeness(task, result, &mut evidence),
        CriterionKind::Correctness => score_correctness(result, &mut evidence),
        CriterionKind::Quality => score_quality(result, &mut evidence),
        CriterionKind::Testing => score_testing(result, &mut evidence),
        CriterionKind::Documentation => score_documentation(result, &mut evidence),
        CriterionKind::Security => score_security(result, &mut evidence),
        CriterionKind::Performance => score_performance(result, &mut evidence),
        CriterionKind::Custom => score_custom(result, &mut evidence),
    };
    let score = score.clamp(0.0, 1.0);
    let passed = score >= config.threshold;

    CriterionScore {
        kind: config.kind,
        score,
        weight: config.weight,
        threshold: config.threshold,
        passed,
        evidence,
        feedback: feedback_for(config.kind, score, config.threshold),
    }
}

fn score_completeness(
    task: &HierarchicalTask,
    result: &TaskResult,
    evidence: &mut Vec<String>,
) -> f64 {
    let mut add = 0.0;
    if result.output.len() > 50 {
        add += 0.2;
        evidence.push(format!("substantial output ({} chars)", result.output.len()));
    }
    if result.summary.is_some() {
        add += 0.1;
        evidence.push("summary present".to_string());
    }
    if !result.artifacts.is_empty() {
        add += 0.1;
        evidence.push(format!("{} artifacts produced", result.artifacts.len()));
    }
    let coverage = term_coverage(&task.prompt, &result.output);
    add += 0.1 * coverage;
    evidence.push(format!("prompt term coverage {:.0}%", coverage * 100.0));
    add
}

fn score_correctness(result: &TaskResult, evidence: &mut Vec<String>) -> f64 {
    let mut add = 0.0;
    if result.error.is_none() {
        add += 0.2;
        evidence.push("no error reported".to_string());
    }
    if let Some(rate) = result.metrics.pass_rate() {
        add += 0.2 * rate;
        evidence.push(format!("test pass rate {:.0}%", rate * 100.0));
    }
    let lower = result.output.to_lowercase();
    if !ERROR_WORDS.iter().any(|w| lower.contains(w)) {
        add += 0.1;
        evidence.push("output free of error indicators".to_string());
    }
    add
}

fn score_quality(result: &TaskResult, evidence: &mut Vec<String>) -> f64 {
    let mut add = 0.0;
    if is_well_structured(&result.output) {
        add += 0.15;
        evidence.push("well-structured output".to_string());
    }
    if (100..=50_000).contains(&result.output.len()) {
        add += 0.15;
        evidence.push("output length in expected range".to_string());
    }
    if result.output.contains("```") {
        add += 0.1;
        evidence.push("contains code blocks".to_string());
    }
    let lower = result.output.to_lowercase();
    if EXPLANATION_WORDS.iter().any(|w| lower.contains(w)) {
        add += 0.1;
        evidence.push("contains explanatory language".to_string());
    }
    add
}

fn score_testing(result: &TaskResult, evidence: &mut Vec<String>) -> f64 {
    let mut add = 0.0;
    if result.metrics.tests_run.unwrap_or(0) > 0 {
        add += 0.2;
        evidence.push(format!(
            "{} tests run",
            result.metrics.tests_run.unwrap_or(0)
        ));
    }
    if let Some(rate) = result.metrics.pass_rate() {
        add += 0.3 * rate;
        evidence.push(format!("test pass rate {:.0}%", rate * 100.0));
    }
    let lower = result.output.to_lowercase();
    if ["test", "spec", "expect"].iter().any(|w| lower.contains(w)) {
        add += 0.1;
        evidence.push("output discusses tests".to_string());
    }
    add
}

fn score_documentation(result: &TaskResult, evidence: &mut Vec<String>) -> f64 {
    let mut add = 0.0;
    if result.output.lines().any(|l| l.trim_start().starts_with('#')) {
        add += 0.15;
        evidence.push("contains headers".to_string());
    }
    let lower = result.output.to_lowercase();
    if lower.contains("example") || result.output.contains("```") {
        add += 0.15;
        evidence.push("contains examples".to_string());
    }
    if result.output.len() > 200 {
        add += 0.1;
        evidence.push("substantial documentation length".to_string());
    }
    if ["@param", "parameters:", "args:"].iter().any(|w| lower.contains(w)) {
        add += 0.1;
        evidence.push("documents parameters".to_string());
    }
    add
}

fn score_security(result: &TaskResult, evidence: &mut Vec<String>) -> f64 {
    let lower = result.output.to_lowercase();
    let mut portion: f64 = 0.3;
    let concerns: Vec<&str> = SECURITY_CONCERNS
        .iter()
        .copied()
        .filter(|w| lower.contains(w))
        .collect();
    if concerns.is_empty() {
        portion += 0.2;
        evidence.push("no security concerns detected".to_string());
    } else {
        portion -= 0.1 * concerns.len() as f64;
        evidence.push(format!("security concerns detected: {}", concerns.join(", ")));
    }
    if MITIGATION_WORDS.iter().any(|w| lower.contains(w)) {
        portion += 0.1;
        evidence.push("mentions input validation or sanitization".to_string());
    }
    portion.clamp(0.0, 0.5)
}

fn score_performance(result: &TaskResult, evidence: &mut Vec<String>) -> f64 {
    let mut add = match result.metrics.execution_time_ms {
        Some(ms) if ms < 1_000 => {
            evidence.push(format!("fast execution ({ms} ms)"));
            0.3
        }
        Some(ms) if ms < 10_000 => {
            evidence.push(format!("moderate execution ({ms} ms)"));
            0.2
        }
        _ => 0.1,
    };
    let lower = result.output.to_lowercase();
    if OPTIMIZATION_WORDS.iter().any(|w| lower.contains(w)) {
        add += 0.1;
        evidence.push("mentions optimization".to_string());
    }
    if !ANTI_PATTERN_WORDS.iter().any(|w| lower.contains(w)) {
        add += 0.1;
        evidence.push("no performance anti-patterns mentioned".to_string());
    }
    add
}

fn score_custom(result: &TaskResult, evidence: &mut Vec<String>) -> f64 {
    let mut add = 0.0;
    if !result.output.trim().is_empty() {
        add += 0.3;
        evidence.push("output present".to_string());
    }
    if result.error.is_none() {
        add += 0.2;
        evidence.push("no error reported".to_string());
    }
    add
}

/// Fraction of prompt tokens (length > 4) that appear in the output.
/// Vacuously full when the prompt has no qualifying tokens.
fn term_coverage(prompt: &str, output: &str) -> f64 {
    let lower_output = output.to_lowercase();
    let tokens: std::collections::HashSet<String> = prompt
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 4)
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        return 1.0;
    }
    let matched = tokens.iter().filter(|t| lower_output.contains(t.as_str())).count();
    #[allow(clippy::cast_precision_loss)]
    {
        matched as f64 / tokens.len() as f64
    }
}

fn is_well_structured(output: &str) -> bool {
    output.contains("\n\n")
        || output.lines().any(|l| l.trim_start().starts_with('#'))
        || output.contains("```")
}

fn feedback_for(kind: CriterionKind, score: f64, threshold: f64) -> String {
    let hint = match kind {
        CriterionKind::Completeness => "cover every part of the task prompt in the output",
        CriterionKind::Correctness => "resolve reported errors and failing tests",
        CriterionKind::Quality => "improve the structure and explanation of the output",
        CriterionKind::Testing => "run the relevant tests and report their results",
        CriterionKind::Documentation => "add headers, examples, and parameter documentation",
        CriterionKind::Security => "address the flagged security concerns",
        CriterionKind::Performance => "address the flagged performance concerns",
        CriterionKind::Custom => "satisfy the custom acceptance criterion",
    };
    format!("scored {score:.2} against threshold {threshold:.2}; {hint}")
}

/// Confidence from criterion count, score variance, and evidence density.
fn confidence_of(scores: &[CriterionScore]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = scores.len() as f64;
    let mean = scores.iter().map(|s| s.score).sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s.score - mean).powi(2)).sum::<f64>() / n;
    #[allow(clippy::cast_precision_loss)]
    let evidence_count = scores.iter().map(|s| s.evidence.len()).sum::<usize>() as f64;
    let breadth = (n / 4.0).min(1.0);
    let agreement = 1.0 - variance;
    let density = (evidence_count / (3.0 * n)).min(1.0);
    (0.3 * breadth + 0.4 * agreement + 0.3 * density).clamp(0.0, 1.0)
}

fn build_rework_prompt(original_prompt: &str, scores: &[CriterionScore]) -> String {
    let mut prompt = String::from(original_prompt);
    prompt.push_str("\n\nThe previous attempt was rejected by verification. Address the following:\n");
    for score in scores.iter().filter(|s| !s.passed) {
        prompt.push_str(&format!("- {}: {}\n", score.kind.as_str(), score.feedback));
    }
    prompt.push_str("\nFocus on resolving these issues while keeping the original requirements intact.");
    prompt
}
