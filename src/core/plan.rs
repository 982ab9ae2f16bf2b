//! Task plans: an ordered task list plus a precedence map.
//!
//! A plan is data, not a live graph. The dependency map may reference ids
//! that are not in the task list; the scheduler treats those as
//! unsatisfiable (a deadlock at run time) rather than rejecting the plan up
//! front. [`TaskPlan::validate`] is available for callers who want to catch
//! such mistakes before executing.

use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Tasks plus their dependency (precedence) map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Tasks in dispatch-preference order.
    pub tasks: Vec<Task>,
    /// task id -> ids of tasks that must complete first.
    #[serde(default)]
    pub dependencies: HashMap<TaskId, Vec<TaskId>>,
}

impl TaskPlan {
    /// Create an empty plan.
    pub fn new(name: &str) -> Self {
        Self {
            id: format!("plan-{}", &Uuid::new_v4().simple().to_string()[..12]),
            name: name.to_string(),
            description: String::new(),
            tasks: Vec::new(),
            dependencies: HashMap::new(),
        }
    }

    /// Fallback planner: one task per capability, each depending on the one
    /// before it.
    pub fn linear<S: AsRef<str>>(goal: &str, capabilities: &[S]) -> Self {
        let short_goal: String = goal.chars().take(50).collect();
        let mut plan = Self::new(&format!("Plan for: {}", short_goal));
        plan.description = goal.to_string();

        let mut previous: Option<TaskId> = None;
        for (i, capability) in capabilities.iter().enumerate() {
            let capability = capability.as_ref();
            let id = TaskId(format!(
                "task-{}-{}",
                i,
                &Uuid::new_v4().simple().to_string()[..8]
            ));
            let task = Task::new(
                &format!("Execute {}", capability),
                &format!("Use {} capability", capability),
            )
            .with_id(id.clone())
            .with_capabilities([capability]);
            plan.add_task(task);

            if let Some(prev) = previous.take() {
                plan.add_dependency(&id, &prev);
            }
            previous = Some(id);
        }
        plan
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Append a task and return its id.
    pub fn add_task(&mut self, task: Task) -> TaskId {
        let id = task.id.clone();
        self.tasks.push(task);
        id
    }

    /// Declare that `task` must wait for `prerequisite`.
    ///
    /// Neither id is checked against the task list.
    pub fn add_dependency(&mut self, task: &TaskId, prerequisite: &TaskId) {
        let deps = self.dependencies.entry(task.clone()).or_default();
        if !deps.contains(prerequisite) {
            deps.push(prerequisite.clone());
        }
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    /// Task ids in plan order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    /// Prerequisites declared for a task.
    pub fn dependencies_of(&self, id: &TaskId) -> &[TaskId] {
        self.dependencies
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Reject plans where two tasks share an id.
    ///
    /// Results are keyed by task id, so duplicates make a plan ambiguous.
    pub fn ensure_unique_ids(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(&task.id) {
                return Err(Error::Validation(format!(
                    "Duplicate task id {} in plan {}",
                    task.id, self.id
                )));
            }
        }
        Ok(())
    }

    /// `(task, prerequisite)` pairs whose prerequisite is not in the plan.
    pub fn dangling_dependencies(&self) -> Vec<(TaskId, TaskId)> {
        let known: HashSet<&TaskId> = self.tasks.iter().map(|t| &t.id).collect();
        let mut dangling: Vec<(TaskId, TaskId)> = self
            .tasks
            .iter()
            .flat_map(|t| {
                self.dependencies_of(&t.id)
                    .iter()
                    .filter(|dep| !known.contains(dep))
                    .map(|dep| (t.id.clone(), dep.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        dangling.sort();
        dangling
    }

    /// Build the precedence graph. Edges point from prerequisite to
    /// dependent; dangling references are left out.
    fn graph(&self) -> (DiGraph<TaskId, ()>, HashMap<TaskId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for task in &self.tasks {
            let node = graph.add_node(task.id.clone());
            index.insert(task.id.clone(), node);
        }
        for task in &self.tasks {
            for dep in self.dependencies_of(&task.id) {
                if let (Some(&from), Some(&to)) = (index.get(dep), index.get(&task.id)) {
                    graph.update_edge(from, to, ());
                }
            }
        }
        (graph, index)
    }

    /// Check that the plan can run to completion: unique ids, no dangling
    /// references, no cycles.
    pub fn validate(&self) -> Result<()> {
        self.ensure_unique_ids()?;

        let dangling = self.dangling_dependencies();
        if let Some((task, missing)) = dangling.first() {
            return Err(Error::Validation(format!(
                "Task {} depends on unknown task {} ({} dangling reference(s))",
                task,
                missing,
                dangling.len()
            )));
        }

        self.topological_order().map(|_| ())
    }

    /// Task ids ordered so every task follows its prerequisites.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let (graph, _) = self.graph();
        let sorted = toposort(&graph, None).map_err(|cycle| {
            let task = graph
                .node_weight(cycle.node_id())
                .map(|id| id.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Error::Validation(format!("Cycle detected at task: {}", task))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|node| graph.node_weight(node).cloned())
            .collect())
    }

    /// Group tasks into layers that the scheduler would dispatch together
    /// with an unbounded concurrency cap.
    ///
    /// Layer `n` holds the tasks whose longest prerequisite chain has length
    /// `n`. Within a layer, tasks keep plan order.
    pub fn parallel_groups(&self) -> Result<Vec<Vec<TaskId>>> {
        self.validate()?;
        let (graph, index) = self.graph();

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let order = toposort(&graph, None)
            .map_err(|_| Error::Validation("Cycle detected".to_string()))?;
        for node in order {
            let d = graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|pred| depth.get(&pred))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, d);
        }

        let mut groups: Vec<Vec<TaskId>> = Vec::new();
        for task in &self.tasks {
            let d = index
                .get(&task.id)
                .and_then(|node| depth.get(node))
                .copied()
                .unwrap_or(0);
            if groups.len() <= d {
                groups.resize_with(d + 1, Vec::new);
            }
            groups[d].push(task.id.clone());
        }
        Ok(groups)
    }
}
