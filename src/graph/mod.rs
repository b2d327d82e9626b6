//! Job dependency graph.
//!
//! Nodes come from the workflow's job names, edges from `needs`. The graph
//! is the single shared record of job progress during a run: status
//! transitions are one-directional (`pending -> running -> completed |
//! failed`) and go through explicit `mark_*` calls under a reader/writer
//! lock. Captured outputs live on the node and become visible to dependents
//! only once the node is completed.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::config::Workflow;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug)]
struct JobNode {
    needs: Vec<String>,
    status: JobStatus,
    outputs: HashMap<String, String>,
}

#[derive(Debug)]
pub struct DependencyGraph {
    nodes: RwLock<HashMap<String, JobNode>>,
}

impl DependencyGraph {
    pub fn new(workflow: &Workflow) -> Self {
        let nodes = workflow
            .jobs
            .iter()
            .map(|(name, job)| {
                (
                    name.clone(),
                    JobNode {
                        needs: job.needs.clone(),
                        status: JobStatus::Pending,
                        outputs: HashMap::new(),
                    },
                )
            })
            .collect();
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Check that every `needs` edge targets an existing job and that the
    /// graph is acyclic. Self-loops count as cycles. Runs before any
    /// execution begins.
    pub fn validate_dependencies(&self) -> Result<()> {
        let nodes = self.nodes.read().expect("graph lock poisoned");

        for (name, node) in nodes.iter() {
            for needed in &node.needs {
                if !nodes.contains_key(needed) {
                    return Err(Error::JobNotFound {
                        job: name.clone(),
                        needs: needed.clone(),
                    });
                }
            }
        }

        // DFS with an explicit recursion stack so the reported path is the
        // full cycle, not just the closing edge.
        let mut visited: HashSet<&str> = HashSet::new();
        for start in nodes.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }
            let mut stack: Vec<&str> = Vec::new();
            let mut on_stack: HashSet<&str> = HashSet::new();
            if let Some(cycle) =
                dfs_cycle(start, &nodes, &mut visited, &mut stack, &mut on_stack)
            {
                return Err(Error::CircularDependency { path: cycle });
            }
        }
        Ok(())
    }

    /// Every pending job whose entire `needs` list is completed. Failed
    /// dependencies do not unblock dependents: a failed dependency starves
    /// them permanently.
    pub fn ready_jobs(&self) -> Vec<String> {
        let nodes = self.nodes.read().expect("graph lock poisoned");
        nodes
            .iter()
            .filter(|(_, node)| node.status == JobStatus::Pending)
            .filter(|(_, node)| {
                node.needs.iter().all(|needed| {
                    nodes
                        .get(needed)
                        .is_some_and(|dep| dep.status == JobStatus::Completed)
                })
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn mark_running(&self, name: &str) -> Result<()> {
        self.transition(name, JobStatus::Pending, JobStatus::Running, HashMap::new())
    }

    pub fn mark_completed(&self, name: &str, outputs: HashMap<String, String>) -> Result<()> {
        self.transition(name, JobStatus::Running, JobStatus::Completed, outputs)
    }

    /// Condition-skipped jobs go straight from pending to completed; they
    /// still satisfy downstream `needs` checks.
    pub fn mark_skipped(&self, name: &str) -> Result<()> {
        self.transition(
            name,
            JobStatus::Pending,
            JobStatus::Completed,
            HashMap::new(),
        )
    }

    pub fn mark_failed(&self, name: &str) -> Result<()> {
        self.transition(name, JobStatus::Running, JobStatus::Failed, HashMap::new())
    }

    fn transition(
        &self,
        name: &str,
        from: JobStatus,
        to: JobStatus,
        outputs: HashMap<String, String>,
    ) -> Result<()> {
        let mut nodes = self.nodes.write().expect("graph lock poisoned");
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| Error::Execution(format!("unknown job '{name}'")))?;
        if node.status != from {
            return Err(Error::InvalidTransition {
                job: name.to_string(),
                from: node.status.as_str(),
                to: to.as_str(),
            });
        }
        node.status = to;
        if to == JobStatus::Completed {
            node.outputs = outputs;
        }
        Ok(())
    }

    pub fn status(&self, name: &str) -> Option<JobStatus> {
        let nodes = self.nodes.read().expect("graph lock poisoned");
        nodes.get(name).map(|node| node.status)
    }

    /// A completed job's captured outputs; None until the job completes.
    pub fn outputs_of(&self, name: &str) -> Option<HashMap<String, String>> {
        let nodes = self.nodes.read().expect("graph lock poisoned");
        nodes
            .get(name)
            .filter(|node| node.status == JobStatus::Completed)
            .map(|node| node.outputs.clone())
    }

    /// Names of jobs still pending once scheduling stops (a failed branch
    /// starves its dependents).
    pub fn pending_jobs(&self) -> Vec<String> {
        let nodes = self.nodes.read().expect("graph lock poisoned");
        nodes
            .iter()
            .filter(|(_, node)| node.status == JobStatus::Pending)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn dfs_cycle<'a>(
    current: &'a str,
    nodes: &'a HashMap<String, JobNode>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    on_stack: &mut HashSet<&'a str>,
) -> Option<String> {
    visited.insert(current);
    stack.push(current);
    on_stack.insert(current);

    if let Some(node) = nodes.get(current) {
        for needed in &node.needs {
            let needed = needed.as_str();
            if on_stack.contains(needed) {
                let start = stack.iter().position(|n| *n == needed).unwrap_or(0);
                let mut path: Vec<&str> = stack[start..].to_vec();
                path.push(needed);
                return Some(path.join(" -> "));
            }
            if !visited.contains(needed) {
                if let Some(cycle) = dfs_cycle(needed, nodes, visited, stack, on_stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    on_stack.remove(current);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Workflow;

    fn workflow(yaml: &str) -> Workflow {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn chain() -> Workflow {
        workflow(
            r#"
name: ci
jobs:
  build:
    steps: [{uses: shell@v1}]
  test:
    needs: [build]
    steps: [{uses: shell@v1}]
  deploy:
    needs: [test]
    steps: [{uses: shell@v1}]
"#,
        )
    }

    #[test]
    fn test_ready_frontier_progresses() {
        let graph = DependencyGraph::new(&chain());
        assert_eq!(graph.ready_jobs(), ["build"]);

        graph.mark_running("build").unwrap();
        assert!(graph.ready_jobs().is_empty());
        graph.mark_completed("build", HashMap::new()).unwrap();
        assert_eq!(graph.ready_jobs(), ["test"]);

        graph.mark_running("test").unwrap();
        graph.mark_completed("test", HashMap::new()).unwrap();
        assert_eq!(graph.ready_jobs(), ["deploy"]);

        graph.mark_running("deploy").unwrap();
        graph.mark_completed("deploy", HashMap::new()).unwrap();
        assert!(graph.ready_jobs().is_empty());
    }

    #[test]
    fn test_failed_dependency_starves_dependents() {
        let graph = DependencyGraph::new(&chain());
        graph.mark_running("build").unwrap();
        graph.mark_failed("build").unwrap();
        assert!(graph.ready_jobs().is_empty());
        let mut pending = graph.pending_jobs();
        pending.sort();
        assert_eq!(pending, ["deploy", "test"]);
    }

    #[test]
    fn test_cycle_detection_reports_path() {
        let wf = workflow(
            r#"
name: ci
jobs:
  a:
    needs: [b]
    steps: [{uses: shell@v1}]
  b:
    needs: [c]
    steps: [{uses: shell@v1}]
  c:
    needs: [a]
    steps: [{uses: shell@v1}]
"#,
        );
        let err = DependencyGraph::new(&wf).validate_dependencies().unwrap_err();
        let Error::CircularDependency { path } = err else {
            panic!("expected circular dependency");
        };
        // three jobs plus the closing repeat
        assert_eq!(path.matches(" -> ").count(), 3);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let wf = workflow(
            r#"
name: ci
jobs:
  a:
    needs: [a]
    steps: [{uses: shell@v1}]
"#,
        );
        let err = DependencyGraph::new(&wf).validate_dependencies().unwrap_err();
        let Error::CircularDependency { path } = err else {
            panic!("expected circular dependency");
        };
        assert_eq!(path, "a -> a");
    }

    #[test]
    fn test_unknown_dependency() {
        let wf = workflow(
            r#"
name: ci
jobs:
  a:
    needs: [ghost]
    steps: [{uses: shell@v1}]
"#,
        );
        let err = DependencyGraph::new(&wf).validate_dependencies().unwrap_err();
        assert!(matches!(err, Error::JobNotFound { ref needs, .. } if needs == "ghost"));
    }

    #[test]
    fn test_outputs_only_visible_after_completion() {
        let graph = DependencyGraph::new(&chain());
        assert!(graph.outputs_of("build").is_none());
        graph.mark_running("build").unwrap();
        assert!(graph.outputs_of("build").is_none());
        let mut outputs = HashMap::new();
        outputs.insert("version".to_string(), "v1".to_string());
        graph.mark_completed("build", outputs).unwrap();
        assert_eq!(graph.outputs_of("build").unwrap()["version"], "v1");
    }

    #[test]
    fn test_transitions_are_one_directional() {
        let graph = DependencyGraph::new(&chain());
        graph.mark_running("build").unwrap();
        graph.mark_completed("build", HashMap::new()).unwrap();
        assert!(matches!(
            graph.mark_running("build"),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            graph.mark_failed("build"),
            Err(Error::InvalidTransition { .. })
        ));
    }
}
