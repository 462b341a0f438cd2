//! Job dependency graph validation.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::matrix::ExpandedJob;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    #[error("cycle detected involving job {0:?}")]
    CycleDetected(String),
    #[error("job {job:?} needs unknown job {dependency:?}")]
    UnknownDependency { job: String, dependency: String },
}

impl From<DagError> for bleephub_core::Error {
    fn from(err: DagError) -> Self {
        match err {
            DagError::CycleDetected(job) => bleephub_core::Error::CycleDetected(job),
            DagError::UnknownDependency { job, dependency } => {
                bleephub_core::Error::UnknownDependency { job, dependency }
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Directed graph of jobs; an edge points from a job to each job it needs.
#[derive(Debug)]
pub struct JobGraph {
    graph: DiGraph<String, ()>,
}

impl JobGraph {
    /// Build the graph, rejecting `needs` that name a missing job.
    pub fn build<'a, I, N>(jobs: I) -> Result<Self, DagError>
    where
        I: IntoIterator<Item = (&'a str, N)>,
        N: IntoIterator<Item = &'a String>,
    {
        let jobs: Vec<(&str, Vec<&String>)> = jobs
            .into_iter()
            .map(|(key, needs)| (key, needs.into_iter().collect()))
            .collect();

        let mut graph = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();
        for (key, _) in &jobs {
            index.insert(*key, graph.add_node(key.to_string()));
        }

        for (key, needs) in &jobs {
            let from = index[key];
            for dep in needs {
                let Some(&to) = index.get(dep.as_str()) else {
                    return Err(DagError::UnknownDependency {
                        job: key.to_string(),
                        dependency: dep.to_string(),
                    });
                };
                graph.add_edge(from, to, ());
            }
        }

        Ok(Self { graph })
    }

    /// Three-colour depth-first search; the first node reached while still
    /// on the stack is reported.
    pub fn check_acyclic(&self) -> Result<(), DagError> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        for node in self.graph.node_indices() {
            self.visit(node, &mut marks)?;
        }
        Ok(())
    }

    fn visit(&self, node: NodeIndex, marks: &mut [Mark]) -> Result<(), DagError> {
        match marks[node.index()] {
            Mark::Done => return Ok(()),
            Mark::OnStack => return Err(DagError::CycleDetected(self.graph[node].clone())),
            Mark::Unvisited => {}
        }
        marks[node.index()] = Mark::OnStack;

        // petgraph yields neighbours newest-first; walk them in `needs` order.
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        deps.reverse();
        for dep in deps {
            self.visit(dep, marks)?;
        }

        marks[node.index()] = Mark::Done;
        Ok(())
    }
}

/// Validate an expanded job map: every dependency exists and there are no cycles.
pub fn validate_job_graph(jobs: &BTreeMap<String, ExpandedJob>) -> Result<(), DagError> {
    JobGraph::build(jobs.iter().map(|(key, job)| (key.as_str(), &job.needs)))?.check_acyclic()
}
