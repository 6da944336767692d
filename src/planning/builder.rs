//! Request analysis and task graph construction.
//!
//! The builder turns a free-text request into a validated task graph:
//! classify complexity, select roles by keyword, wire precedence
//! dependencies, prune back to budget, and verify the result is an
//! acyclic, fully connected graph.

use crate::core::{DependencyKind, Task, TaskGraph, TaskId};
use crate::error::{Error, Result};
use crate::planning::roles::{RoleSpec, RoleTable};
use crate::{clog, clog_debug, clog_warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Optional facts about the target repository, folded into prompts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub repository_path: Option<String>,
    pub detected_framework: Option<String>,
    pub detected_language: Option<String>,
}

impl RequestContext {
    fn render(&self) -> String {
        let mut lines = Vec::new();
        if let Some(path) = &self.repository_path {
            lines.push(format!("Repository: {}", path));
        }
        if let Some(framework) = &self.detected_framework {
            lines.push(format!("Framework: {}", framework));
        }
        if let Some(language) = &self.detected_language {
            lines.push(format!("Language: {}", language));
        }
        if lines.is_empty() {
            String::new()
        } else {
            format!("Context:\n{}\n", lines.join("\n"))
        }
    }
}

/// Limits applied while building a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConstraints {
    /// Maximum number of tasks in the graph. Must be at least 1.
    pub max_nodes: usize,
}

impl Default for BuildConstraints {
    fn default() -> Self {
        Self { max_nodes: 8 }
    }
}

/// Request complexity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Low => write!(f, "low"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::High => write!(f, "high"),
        }
    }
}

/// What the builder concluded about a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAnalysis {
    pub complexity: Complexity,
    pub estimated_nodes: usize,
    pub matched_roles: Vec<String>,
}

/// A built graph plus the analysis and warnings produced along the way.
#[derive(Debug)]
pub struct BuildResult {
    pub graph: TaskGraph,
    pub analysis: RequestAnalysis,
    pub warnings: Vec<String>,
}

/// Builds task graphs from free-text requests.
pub struct GraphBuilder {
    roles: RoleTable,
}

// Words that signal a request spans several concerns.
const SCOPE_KEYWORDS: &[&str] = &[
    "integrate",
    "refactor",
    "migrate",
    "end-to-end",
    "full",
    "complete",
    "entire",
    "system",
    "pipeline",
];

impl GraphBuilder {
    pub fn new(roles: RoleTable) -> Self {
        Self { roles }
    }

    /// Build a task graph for the request.
    ///
    /// # Errors
    /// Returns `Error::GraphBuild` if `max_nodes` is below 1, if the
    /// role table yields no usable task, or if validation finds a cycle.
    pub fn build_graph(
        &self,
        request: &str,
        context: &RequestContext,
        constraints: &BuildConstraints,
    ) -> Result<BuildResult> {
        if constraints.max_nodes < 1 {
            return Err(Error::GraphBuild(format!(
                "max_nodes must be at least 1, got {}",
                constraints.max_nodes
            )));
        }

        let mut warnings = Vec::new();
        let complexity = classify_complexity(request);
        let estimated = estimate_nodes(complexity).clamp(1, constraints.max_nodes);
        clog_debug!(
            "build_graph: complexity={} estimated_nodes={} max_nodes={}",
            complexity,
            estimated,
            constraints.max_nodes
        );

        let mut selected: Vec<&RoleSpec> = self.roles.matching_roles(request);
        if selected.is_empty() {
            let default = self.roles.default_role().ok_or_else(|| {
                Error::GraphBuild("role table has no default role".to_string())
            })?;
            warnings.push(format!(
                "no role matched the request; falling back to '{}'",
                default.name
            ));
            selected.push(default);
        }

        let mut graph = TaskGraph::new();
        let context_block = context.render();
        let mut role_to_task: HashMap<String, TaskId> = HashMap::new();

        for role in &selected {
            let prompt = role
                .prompt_template
                .replace("{request}", request)
                .replace("{context}", &context_block);
            let mut task = Task::new(&role.title, &role.name, &prompt);
            task.priority = role.priority;
            role_to_task.insert(role.name.clone(), task.id);
            graph.add_task(task);
        }

        // Precedence edges only between roles that were both selected
        for role in &selected {
            let Some(&to) = role_to_task.get(&role.name) else {
                continue;
            };
            for dep_role in &role.depends_on {
                if let Some(&from) = role_to_task.get(dep_role) {
                    graph.add_dependency(&from, &to, DependencyKind::Precedence)?;
                }
            }
        }

        self.prune_to_budget(&mut graph, constraints.max_nodes, &mut warnings);

        validate_acyclic(&graph)?;
        for id in graph.disconnected_tasks() {
            let title = graph
                .get_task(&id)
                .map(|t| t.title.clone())
                .unwrap_or_else(|| id.short());
            warnings.push(format!("task '{}' is unreachable from any root", title));
        }

        let analysis = RequestAnalysis {
            complexity,
            estimated_nodes: estimated,
            matched_roles: graph.all_tasks().iter().map(|t| t.role.clone()).collect(),
        };
        clog!(
            "Built graph {} with {} tasks, {} dependencies",
            graph.id.short(),
            graph.task_count(),
            graph.dependency_count()
        );

        Ok(BuildResult {
            graph,
            analysis,
            warnings,
        })
    }

    /// Drop tasks until the graph fits the node budget. Optional roles
    /// go first, highest prune rank first; if that is not enough,
    /// required roles go next, lowest dispatch priority first. Removal
    /// cleans up dangling references.
    fn prune_to_budget(&self, graph: &mut TaskGraph, max_nodes: usize, warnings: &mut Vec<String>) {
        if graph.task_count() <= max_nodes {
            return;
        }

        let mut optional: Vec<(u32, TaskId, String)> = graph
            .all_tasks()
            .iter()
            .filter_map(|t| {
                let role = self.roles.get(&t.role)?;
                if role.optional {
                    Some((role.prune_rank, t.id, role.name.clone()))
                } else {
                    None
                }
            })
            .collect();
        optional.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, id, role) in optional {
            if graph.task_count() <= max_nodes {
                break;
            }
            graph.remove_task(&id);
            warnings.push(format!("pruned optional role '{}' to fit node budget", role));
        }

        if graph.task_count() <= max_nodes {
            return;
        }

        clog_warn!(
            "pruning required roles to fit node budget: {} tasks, budget {}",
            graph.task_count(),
            max_nodes
        );
        let mut required: Vec<(u32, usize, TaskId, String)> = graph
            .all_tasks()
            .iter()
            .enumerate()
            .map(|(idx, t)| {
                let priority = self
                    .roles
                    .get(&t.role)
                    .map(|r| r.priority)
                    .unwrap_or(t.priority);
                (priority, idx, t.id, t.role.clone())
            })
            .collect();
        // Later table entries go first among equal priorities.
        required.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        for (_, _, id, role) in required {
            if graph.task_count() <= max_nodes {
                break;
            }
            graph.remove_task(&id);
            warnings.push(format!("pruned role '{}' to fit node budget", role));
        }
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(RoleTable::default_roster())
    }
}

/// Classify a request by length and scope keywords.
fn classify_complexity(request: &str) -> Complexity {
    let lower = request.to_lowercase();
    let words = lower.split_whitespace().count();
    let scope_hits = SCOPE_KEYWORDS.iter().filter(|k| lower.contains(**k)).count();
    let conjunctions = lower.matches(" and ").count() + lower.matches(',').count();

    let score = words / 12 + scope_hits * 2 + conjunctions;
    match score {
        0..=1 => Complexity::Low,
        2..=4 => Complexity::Medium,
        _ => Complexity::High,
    }
}

fn estimate_nodes(complexity: Complexity) -> usize {
    match complexity {
        Complexity::Low => 2,
        Complexity::Medium => 4,
        Complexity::High => 6,
    }
}

/// Verify the graph is acyclic with an iterative DFS.
///
/// Uses an explicit stack plus a recursion-path set, so deep graphs
/// cannot overflow the call stack. Independent of the edge-insertion
/// guard in TaskGraph; the builder validates its final product.
fn validate_acyclic(graph: &TaskGraph) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let ids = graph.task_ids();
    let mut color: HashMap<TaskId, Color> = ids.iter().map(|id| (*id, Color::White)).collect();

    for root in &ids {
        if color.get(root) != Some(&Color::White) {
            continue;
        }
        // (node, entered) pairs: entered=false means pre-visit
        let mut stack: Vec<(TaskId, bool)> = vec![(*root, false)];
        while let Some((node, entered)) = stack.pop() {
            if entered {
                color.insert(node, Color::Black);
                continue;
            }
            match color.get(&node) {
                Some(Color::Black) => continue,
                Some(Color::Gray) => continue,
                _ => {}
            }
            color.insert(node, Color::Gray);
            stack.push((node, true));
            for next in graph.dependents_of(&node) {
                match color.get(&next) {
                    Some(Color::Gray) => {
                        let title = graph
                            .get_task(&next)
                            .map(|t| t.title.clone())
                            .unwrap_or_else(|| next.short());
                        return Err(Error::GraphBuild(format!(
                            "cycle detected through task '{}'",
                            title
                        )));
                    }
                    Some(Color::White) | None => stack.push((next, false)),
                    Some(Color::Black) => {}
                }
            }
        }
    }
    Ok(())
}
