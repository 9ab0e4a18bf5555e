//! Hierarchical planner.
//!
//! Classifies a task's prompt into a keyword bucket, emits that bucket's
//! ordered subtask templates, and synthesizes dependencies according to the
//! requested strategy. Decomposition is deterministic up to generated ids.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::domain::errors::PlannerError;
use crate::domain::models::{
    generate_task_id, DecompositionStrategy, HierarchicalTask, SwarmConfig, TaskPriority, TaskRole,
};

/// Keywords that raise the complexity estimate.
const COMPLEX_KEYWORDS: &[&str] = &[
    "architecture",
    "system",
    "integrate",
    "migration",
    "security",
    "performance",
    "scale",
    "distributed",
    "concurrent",
    "real-time",
    "api",
    "database",
];

/// Keywords that lower the complexity estimate.
const SIMPLE_KEYWORDS: &[&str] = &["simple", "basic", "small", "minor", "quick"];

/// Prompt classification buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptBucket {
    Feature,
    Bug,
    Refactor,
    Testing,
    Documentation,
    Generic,
}

/// Whether a template is unconditional or gated on an instruction flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateGate {
    Always,
    RequireTesting,
    RequireDocumentation,
}

struct SubtaskTemplate {
    prompt_prefix: &'static str,
    role: TaskRole,
    priority: TaskPriority,
    tags: &'static [&'static str],
    gate: TemplateGate,
}

/// Per-decomposition instruction.
#[derive(Debug, Clone)]
pub struct DecomposeInstruction {
    /// Dependency-synthesis strategy
    pub strategy: DecompositionStrategy,
    /// Caller-side cap on emitted subtasks
    pub max_tasks: Option<usize>,
    /// Emit testing templates marked as gated
    pub require_testing: bool,
    /// Emit documentation templates marked as gated
    pub require_documentation: bool,
}

impl Default for DecomposeInstruction {
    fn default() -> Self {
        Self {
            strategy: DecompositionStrategy::default(),
            max_tasks: None,
            require_testing: true,
            require_documentation: false,
        }
    }
}

/// Context the planner needs about the surrounding tree.
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    /// Depth cap for the tree
    pub max_depth: u32,
    /// Cap on subtasks per decomposition
    pub max_tasks_per_level: usize,
    /// Ids already present in the tree; generated ids avoid these
    pub existing_task_ids: HashSet<String>,
}

impl PlanningContext {
    /// Context derived from configuration and the ids already in a tree.
    pub fn new(config: &SwarmConfig, existing_task_ids: HashSet<String>) -> Self {
        Self {
            max_depth: config.max_task_depth,
            max_tasks_per_level: config.max_tasks_per_level,
            existing_task_ids,
        }
    }
}

/// Output of one decomposition.
#[derive(Debug, Clone, Default)]
pub struct DecompositionPlan {
    /// Ordered subtasks, dependencies resolved to generated ids
    pub subtasks: Vec<HierarchicalTask>,
    /// True when the task sat at the depth cap and nothing was emitted
    pub max_depth_reached: bool,
}

/// Keyword-driven task decomposition with strategy-based dependency
/// synthesis.
#[derive(Debug, Clone)]
pub struct Planner {
    max_depth: u32,
    auto_decompose_threshold: u32,
    default_strategy: DecompositionStrategy,
}

impl Planner {
    pub fn new(config: &SwarmConfig) -> Self {
        Self {
            max_depth: config.max_task_depth,
            auto_decompose_threshold: config.auto_decompose_threshold,
            default_strategy: config.default_strategy,
        }
    }

    /// The configured default strategy.
    pub fn default_strategy(&self) -> DecompositionStrategy {
        self.default_strategy
    }

    /// Decompose a task into subtasks with synthesized dependencies.
    ///
    /// Every subtask depends on the parent task id in addition to its
    /// strategy-derived siblings. At the depth cap an empty plan is
    /// returned with `max_depth_reached` set.
    pub fn decompose(
        &self,
        task: &HierarchicalTask,
        instruction: &DecomposeInstruction,
        context: &PlanningContext,
    ) -> DecompositionPlan {
        if task.depth >= context.max_depth {
            debug!(task_id = %task.id, depth = task.depth, "Depth cap reached; not decomposing");
            return DecompositionPlan {
                subtasks: Vec::new(),
                max_depth_reached: true,
            };
        }

        let bucket = classify(&task.prompt);
        let templates: Vec<&SubtaskTemplate> = bucket_templates(bucket)
            .iter()
            .filter(|t| match t.gate {
                TemplateGate::Always => true,
                TemplateGate::RequireTesting => instruction.require_testing,
                TemplateGate::RequireDocumentation => instruction.require_documentation,
            })
            .collect();

        let cap = instruction
            .max_tasks
            .unwrap_or(usize::MAX)
            .min(context.max_tasks_per_level);
        let templates = &templates[..templates.len().min(cap)];

        let mut taken_ids = context.existing_task_ids.clone();
        let mut subtasks: Vec<HierarchicalTask> = Vec::with_capacity(templates.len());
        for template in templates {
            let id = generate_task_id(&taken_ids);
            taken_ids.insert(id.clone());
            let mut subtask = HierarchicalTask::new(id, format!("{}{}", template.prompt_prefix, task.prompt))
                .with_parent(&task.id, task.depth)
                .with_role(template.role)
                .with_priority(template.priority)
                .with_work_folder(&task.work_folder)
                .with_return_mode(task.return_mode)
                .with_max_retries(task.max_retries)
                .with_dependency(&task.id);
            for tag in template.tags {
                subtask = subtask.with_tag(*tag);
            }
            subtasks.push(subtask);
        }

        synthesize_dependencies(&mut subtasks, instruction.strategy);
        for subtask in &mut subtasks {
            dedupe_in_place(&mut subtask.dependencies);
        }

        debug!(
            task_id = %task.id,
            bucket = ?bucket,
            strategy = %instruction.strategy.as_str(),
            subtasks = subtasks.len(),
            "Task decomposed"
        );
        DecompositionPlan {
            subtasks,
            max_depth_reached: false,
        }
    }

    /// Complexity estimate in [0, 100] from prompt length and keyword
    /// signals.
    pub fn estimate_complexity(&self, prompt: &str) -> u32 {
        let lower = prompt.to_lowercase();
        #[allow(clippy::cast_precision_loss)]
        let mut score = (prompt.len() as f64 / 20.0).min(20.0);
        for keyword in COMPLEX_KEYWORDS {
            if lower.contains(keyword) {
                score += 5.0;
            }
        }
        if ["all", "entire", "complete"].iter().any(|k| lower.contains(k)) {
            score += 10.0;
        }
        if ["multiple", "several", "various"].iter().any(|k| lower.contains(k)) {
            score += 8.0;
        }
        for keyword in SIMPLE_KEYWORDS {
            if lower.contains(keyword) {
                score -= 10.0;
            }
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            score.clamp(0.0, 100.0).round() as u32
        }
    }

    /// Whether a completed task should be decomposed into children:
    /// below the depth cap, not a terminal-role task, and complex enough.
    pub fn should_auto_decompose(&self, task: &HierarchicalTask) -> bool {
        if task.depth >= self.max_depth {
            return false;
        }
        if matches!(
            task.role,
            TaskRole::Testing | TaskRole::Documentation | TaskRole::Debugging
        ) {
            return false;
        }
        self.estimate_complexity(&task.prompt) >= self.auto_decompose_threshold
    }

    /// Validate an externally supplied task list: every dependency id must
    /// exist in the list and the dependency graph must be acyclic.
    pub fn validate_task_list(tasks: &[HierarchicalTask]) -> Result<(), PlannerError> {
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        for task in tasks {
            task.validate()?;
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(PlannerError::InvalidTask(format!(
                        "task {} references missing dependency {dep}",
                        task.id
                    )));
                }
            }
        }
        if let Some(cycle_member) = detect_cycle(tasks) {
            return Err(PlannerError::DependencyCycle(cycle_member));
        }
        Ok(())
    }
}

fn classify(prompt: &str) -> PromptBucket {
    let lower = prompt.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));
    if contains_any(&["feature", "implement", "add"]) {
        PromptBucket::Feature
    } else if contains_any(&["bug", "fix", "error"]) {
        PromptBucket::Bug
    } else if contains_any(&["refactor", "improve", "optimize"]) {
        PromptBucket::Refactor
    } else if contains_any(&["test", "spec", "coverage"]) {
        PromptBucket::Testing
    } else if contains_any(&["document", "readme", "comment"]) {
        PromptBucket::Documentation
    } else {
        PromptBucket::Generic
    }
}

fn bucket_templates(bucket: PromptBucket) -> &'static [SubtaskTemplate] {
    match bucket {
        PromptBucket::Feature => &[
            SubtaskTemplate {
                prompt_prefix: "Analyze the requirements and affected code paths for: ",
                role: TaskRole::Analysis,
                priority: TaskPriority::High,
                tags: &["analysis"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Implement the core changes for: ",
                role: TaskRole::Implementation,
                priority: TaskPriority::High,
                tags: &["implementation"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Integrate the new functionality with the existing code for: ",
                role: TaskRole::Implementation,
                priority: TaskPriority::Medium,
                tags: &["integration"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Write tests covering the new functionality for: ",
                role: TaskRole::Testing,
                priority: TaskPriority::Medium,
                tags: &["testing"],
                gate: TemplateGate::RequireTesting,
            },
            SubtaskTemplate {
                prompt_prefix: "Document the new functionality for: ",
                role: TaskRole::Documentation,
                priority: TaskPriority::Low,
                tags: &["documentation"],
                gate: TemplateGate::RequireDocumentation,
            },
        ],
        PromptBucket::Bug => &[
            SubtaskTemplate {
                prompt_prefix: "Investigate the root cause of: ",
                role: TaskRole::Debugging,
                priority: TaskPriority::High,
                tags: &["investigate"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Fix the defect identified in: ",
                role: TaskRole::Implementation,
                priority: TaskPriority::High,
                tags: &["fix"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Add a regression test for: ",
                role: TaskRole::Testing,
                priority: TaskPriority::Medium,
                tags: &["regression"],
                gate: TemplateGate::RequireTesting,
            },
        ],
        PromptBucket::Refactor => &[
            SubtaskTemplate {
                prompt_prefix: "Map the current structure and refactoring risks for: ",
                role: TaskRole::Analysis,
                priority: TaskPriority::High,
                tags: &["analysis"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Apply the refactoring for: ",
                role: TaskRole::Implementation,
                priority: TaskPriority::High,
                tags: &["refactor"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Verify behavior is unchanged after refactoring: ",
                role: TaskRole::Testing,
                priority: TaskPriority::High,
                tags: &["verification"],
                gate: TemplateGate::RequireTesting,
            },
        ],
        PromptBucket::Testing => &[
            SubtaskTemplate {
                prompt_prefix: "Write unit tests for: ",
                role: TaskRole::Testing,
                priority: TaskPriority::High,
                tags: &["unit"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Write integration tests for: ",
                role: TaskRole::Testing,
                priority: TaskPriority::Medium,
                tags: &["integration"],
                gate: TemplateGate::Always,
            },
        ],
        PromptBucket::Documentation => &[
            SubtaskTemplate {
                prompt_prefix: "Write API documentation for: ",
                role: TaskRole::Documentation,
                priority: TaskPriority::Medium,
                tags: &["api"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Write usage examples for: ",
                role: TaskRole::Documentation,
                priority: TaskPriority::Low,
                tags: &["examples"],
                gate: TemplateGate::Always,
            },
        ],
        PromptBucket::Generic => &[
            SubtaskTemplate {
                prompt_prefix: "Analyze the requirements for: ",
                role: TaskRole::Analysis,
                priority: TaskPriority::High,
                tags: &["analysis"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Carry out the work for: ",
                role: TaskRole::Implementation,
                priority: TaskPriority::High,
                tags: &["implementation"],
                gate: TemplateGate::Always,
            },
            SubtaskTemplate {
                prompt_prefix: "Write tests validating: ",
                role: TaskRole::Testing,
                priority: TaskPriority::Medium,
                tags: &["testing"],
                gate: TemplateGate::RequireTesting,
            },
        ],
    }
}

/// Execution phase of a role under the phased strategy.
fn phase_of(role: TaskRole) -> u8 {
    match role {
        TaskRole::Analysis | TaskRole::Planner => 0,
        TaskRole::Testing => 2,
        TaskRole::Documentation | TaskRole::Synthesizer => 3,
        _ => 1,
    }
}

fn synthesize_dependencies(subtasks: &mut [HierarchicalTask], strategy: DecompositionStrategy) {
    let roles: Vec<TaskRole> = subtasks.iter().map(|t| t.role).collect();
    let ids: Vec<String> = subtasks.iter().map(|t| t.id.clone()).collect();

    for (i, subtask) in subtasks.iter_mut().enumerate() {
        match strategy {
            DecompositionStrategy::Parallel => {}
            DecompositionStrategy::Sequential => {
                if i > 0 {
                    subtask.dependencies.push(ids[i - 1].clone());
                }
            }
            DecompositionStrategy::Hybrid => {
                let wanted: &[TaskRole] = match subtask.role {
                    TaskRole::Implementation => &[TaskRole::Analysis],
                    TaskRole::Testing => &[TaskRole::Implementation],
                    TaskRole::Documentation => &[TaskRole::Implementation, TaskRole::Testing],
                    _ => &[],
                };
                for (j, role) in roles.iter().enumerate() {
                    if j != i && wanted.contains(role) {
                        subtask.dependencies.push(ids[j].clone());
                    }
                }
            }
            DecompositionStrategy::Phased => {
                let phase = phase_of(subtask.role);
                for (j, role) in roles.iter().enumerate() {
                    if j != i && phase_of(*role) < phase {
                        subtask.dependencies.push(ids[j].clone());
                    }
                }
            }
        }
    }
}

fn dedupe_in_place(deps: &mut Vec<String>) {
    let mut seen = HashSet::new();
    deps.retain(|d| seen.insert(d.clone()));
}

/// DFS cycle detection over the dependency graph. Returns a member of a
/// cycle when one exists.
fn detect_cycle(tasks: &[HierarchicalTask]) -> Option<String> {
    let graph: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.dependencies.as_slice()))
        .collect();

    fn visit<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, &'a [String]>,
        visited: &mut HashSet<&'a str>,
        stack: &mut HashSet<&'a str>,
    ) -> Option<String> {
        visited.insert(node);
        stack.insert(node);
        if let Some(deps) = graph.get(node) {
            for dep in deps.iter() {
                if stack.contains(dep.as_str()) {
                    return Some(dep.clone());
                }
                if !visited.contains(dep.as_str()) {
                    if let Some(found) = visit(dep.as_str(), graph, visited, stack) {
                        return Some(found);
                    }
                }
            }
        }
        stack.remove(node);
        None
    }

    let mut visited = HashSet::new();
    for task in tasks {
        if !visited.contains(task.id.as_str()) {
            let mut stack = HashSet::new();
            if let Some(found) = visit(task.id.as_str(), &graph, &mut visited, &mut stack) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> Planner {
        Planner::new(&SwarmConfig::default())
    }

    fn context() -> PlanningContext {
        PlanningContext::new(&SwarmConfig::default(), HashSet::new())
    }

    fn root(prompt: &str) -> HierarchicalTask {
        HierarchicalTask::new("root", prompt)
    }

    fn roles(plan: &DecompositionPlan) -> Vec<TaskRole> {
        plan.subtasks.iter().map(|t| t.role).collect()
    }

    #[test]
    fn test_classification_order() {
        assert_eq!(classify("implement a new feature"), PromptBucket::Feature);
        // "feature" family wins over "bug" because it is checked first
        assert_eq!(classify("add a fix for the bug"), PromptBucket::Feature);
        assert_eq!(classify("fix the crash"), PromptBucket::Bug);
        assert_eq!(classify("refactor the parser"), PromptBucket::Refactor);
        assert_eq!(classify("increase coverage"), PromptBucket::Testing);
        assert_eq!(classify("update the readme"), PromptBucket::Documentation);
        assert_eq!(classify("rename the project"), PromptBucket::Generic);
    }

    #[test]
    fn test_feature_templates_with_gates() {
        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction {
                require_testing: true,
                require_documentation: true,
                ..DecomposeInstruction::default()
            },
            &context(),
        );
        assert_eq!(
            roles(&plan),
            vec![
                TaskRole::Analysis,
                TaskRole::Implementation,
                TaskRole::Implementation,
                TaskRole::Testing,
                TaskRole::Documentation,
            ]
        );

        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction {
                require_testing: false,
                require_documentation: false,
                ..DecomposeInstruction::default()
            },
            &context(),
        );
        assert_eq!(
            roles(&plan),
            vec![
                TaskRole::Analysis,
                TaskRole::Implementation,
                TaskRole::Implementation,
            ]
        );
    }

    #[test]
    fn test_bug_templates() {
        let plan = planner().decompose(
            &root("fix the login error"),
            &DecomposeInstruction::default(),
            &context(),
        );
        assert_eq!(
            roles(&plan),
            vec![TaskRole::Debugging, TaskRole::Implementation, TaskRole::Testing]
        );
        assert!(plan.subtasks[0].tags.contains(&"investigate".to_string()));
    }

    #[test]
    fn test_depth_cap_returns_empty_plan() {
        let mut task = root("implement everything");
        task.depth = 5;
        let plan = planner().decompose(&task, &DecomposeInstruction::default(), &context());
        assert!(plan.subtasks.is_empty());
        assert!(plan.max_depth_reached);
    }

    #[test]
    fn test_truncation_respects_both_caps() {
        let mut ctx = context();
        ctx.max_tasks_per_level = 2;
        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction::default(),
            &ctx,
        );
        assert_eq!(plan.subtasks.len(), 2);

        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction {
                max_tasks: Some(1),
                ..DecomposeInstruction::default()
            },
            &context(),
        );
        assert_eq!(plan.subtasks.len(), 1);
    }

    #[test]
    fn test_all_subtasks_depend_on_parent() {
        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction::default(),
            &context(),
        );
        assert!(plan
            .subtasks
            .iter()
            .all(|t| t.dependencies.contains(&"root".to_string())));
        assert!(plan.subtasks.iter().all(|t| t.depth == 1));
        assert!(plan
            .subtasks
            .iter()
            .all(|t| t.parent_id.as_deref() == Some("root")));
    }

    #[test]
    fn test_sequential_strategy_chains_predecessors() {
        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction {
                strategy: DecompositionStrategy::Sequential,
                ..DecomposeInstruction::default()
            },
            &context(),
        );
        for window in plan.subtasks.windows(2) {
            assert!(window[1].dependencies.contains(&window[0].id));
        }
    }

    #[test]
    fn test_parallel_strategy_has_only_parent_deps() {
        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction {
                strategy: DecompositionStrategy::Parallel,
                ..DecomposeInstruction::default()
            },
            &context(),
        );
        assert!(plan
            .subtasks
            .iter()
            .all(|t| t.dependencies == vec!["root".to_string()]));
    }

    #[test]
    fn test_hybrid_strategy_layers_roles() {
        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction {
                require_documentation: true,
                ..DecomposeInstruction::default()
            },
            &context(),
        );
        let by_role = |role: TaskRole| -> Vec<&HierarchicalTask> {
            plan.subtasks.iter().filter(|t| t.role == role).collect()
        };
        let analysis_ids: Vec<&String> = by_role(TaskRole::Analysis).iter().map(|t| &t.id).collect();
        let impl_ids: Vec<&String> = by_role(TaskRole::Implementation)
            .iter()
            .map(|t| &t.id)
            .collect();
        let testing_ids: Vec<&String> = by_role(TaskRole::Testing).iter().map(|t| &t.id).collect();

        for task in by_role(TaskRole::Implementation) {
            for id in &analysis_ids {
                assert!(task.dependencies.contains(id));
            }
        }
        for task in by_role(TaskRole::Testing) {
            for id in &impl_ids {
                assert!(task.dependencies.contains(id));
            }
        }
        for task in by_role(TaskRole::Documentation) {
            for id in impl_ids.iter().chain(testing_ids.iter()) {
                assert!(task.dependencies.contains(id));
            }
        }
    }

    #[test]
    fn test_phased_strategy_orders_phases() {
        let plan = planner().decompose(
            &root("fix the login error"),
            &DecomposeInstruction {
                strategy: DecompositionStrategy::Phased,
                ..DecomposeInstruction::default()
            },
            &context(),
        );
        // debugging and implementation share a phase; testing follows both
        let debugging = &plan.subtasks[0];
        let implementation = &plan.subtasks[1];
        let testing = &plan.subtasks[2];
        assert!(!implementation.dependencies.contains(&debugging.id));
        assert!(testing.dependencies.contains(&debugging.id));
        assert!(testing.dependencies.contains(&implementation.id));
    }

    #[test]
    fn test_dependencies_are_deduplicated() {
        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction::default(),
            &context(),
        );
        for task in &plan.subtasks {
            let unique: HashSet<&String> = task.dependencies.iter().collect();
            assert_eq!(unique.len(), task.dependencies.len());
        }
    }

    #[test]
    fn test_generated_ids_avoid_existing() {
        let mut ctx = context();
        ctx.existing_task_ids.insert("root".to_string());
        let plan = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction::default(),
            &ctx,
        );
        let mut seen = ctx.existing_task_ids.clone();
        for task in &plan.subtasks {
            assert!(seen.insert(task.id.clone()), "id {} collided", task.id);
        }
    }

    #[test]
    fn test_decompose_is_pure_up_to_ids() {
        let a = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction::default(),
            &context(),
        );
        let b = planner().decompose(
            &root("implement a greeter"),
            &DecomposeInstruction::default(),
            &context(),
        );
        assert_eq!(roles(&a), roles(&b));
        let prompts_a: Vec<&String> = a.subtasks.iter().map(|t| &t.prompt).collect();
        let prompts_b: Vec<&String> = b.subtasks.iter().map(|t| &t.prompt).collect();
        assert_eq!(prompts_a, prompts_b);
        let dep_counts_a: Vec<usize> = a.subtasks.iter().map(|t| t.dependencies.len()).collect();
        let dep_counts_b: Vec<usize> = b.subtasks.iter().map(|t| t.dependencies.len()).collect();
        assert_eq!(dep_counts_a, dep_counts_b);
    }

    #[test]
    fn test_complexity_estimation() {
        let planner = planner();
        // Short, plain prompt scores by length only
        assert_eq!(planner.estimate_complexity("hello there"), 1);
        // "simple" subtracts 10
        assert_eq!(planner.estimate_complexity("a simple tweak"), 0);
        // Complex keywords add 5 each, "entire" adds 10
        let score = planner.estimate_complexity(
            "Redesign the entire system architecture with a new database layer",
        );
        // len 63 -> 3.15; system+architecture+database -> +15; entire -> +10
        assert_eq!(score, 28);
        // Length contribution caps at 20; each listed keyword counts once
        let long = "architecture system integrate migration security performance scale distributed concurrent real-time api database ".repeat(4);
        assert_eq!(planner.estimate_complexity(&long), 80);
    }

    #[test]
    fn test_auto_decompose_rule() {
        let planner = planner();
        let complex_prompt = "Redesign the entire distributed system architecture, integrate the security layer, migrate the database and api surface for performance and scale";
        assert!(planner.estimate_complexity(complex_prompt) >= 50);

        let task = root(complex_prompt);
        assert!(planner.should_auto_decompose(&task));

        let testing = root(complex_prompt).with_role(TaskRole::Testing);
        assert!(!planner.should_auto_decompose(&testing));

        let mut deep = root(complex_prompt);
        deep.depth = 5;
        assert!(!planner.should_auto_decompose(&deep));

        let trivial = root("quick rename");
        assert!(!planner.should_auto_decompose(&trivial));
    }

    #[test]
    fn test_validate_task_list_detects_cycles() {
        let a = HierarchicalTask::new("a", "task a").with_dependency("b");
        let b = HierarchicalTask::new("b", "task b").with_dependency("a");
        let err = Planner::validate_task_list(&[a, b]).unwrap_err();
        assert!(matches!(err, PlannerError::DependencyCycle(_)));

        let a = HierarchicalTask::new("a", "task a");
        let b = HierarchicalTask::new("b", "task b").with_dependency("a");
        assert!(Planner::validate_task_list(&[a, b]).is_ok());

        let dangling = HierarchicalTask::new("c", "task c").with_dependency("missing");
        assert!(matches!(
            Planner::validate_task_list(&[dangling]),
            Err(PlannerError::InvalidTask(_))
        ));
    }
}
