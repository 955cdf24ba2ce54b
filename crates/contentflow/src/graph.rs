/*
 *  Copyright 2025-2026 ContentFlow Authors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! # Pipeline Graph
//!
//! Parses a pipeline's YAML definition into a validated directed acyclic
//! graph of executor nodes and answers the structural questions the workers
//! ask: which node is the input executor, what are a node's successors, and
//! what is the topological execution order.
//!
//! ## Definition format
//!
//! ```yaml
//! name: rag-ingestion
//! executors:
//!   - id: landing_zone
//!     type: blob_source
//!     settings:
//!       prefix: "docs/"
//!       polling_interval_seconds: 60
//!   - id: mapper
//!     type: field_mapper
//!     settings:
//!       mappings:
//!         - { from: "path", to: "source_path" }
//! edges:
//!   - { from: landing_zone, to: mapper }
//! max_parallel: 4
//! ```
//!
//! When `edges` is omitted the executors chain in listed order. Exactly one
//! node must be of an input-executor type, and it must have no upstream
//! executors.

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::PipelineError;
use crate::executor::{registry, ExecutorSettings};

fn default_max_parallel() -> usize {
    4
}

#[derive(Debug, Deserialize)]
struct PipelineDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    executors: Vec<NodeDoc>,
    #[serde(default)]
    edges: Vec<EdgeDoc>,
    #[serde(default = "default_max_parallel")]
    max_parallel: usize,
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    id: String,
    #[serde(rename = "type")]
    executor_type: String,
    #[serde(default)]
    settings: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct EdgeDoc {
    from: String,
    to: String,
}

/// One executor node of a parsed pipeline.
#[derive(Debug, Clone)]
pub struct PipelineNode {
    pub id: String,
    pub executor_type: String,
    pub settings: ExecutorSettings,
    pub is_input: bool,
}

/// A validated pipeline DAG.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    name: String,
    nodes: HashMap<String, PipelineNode>,
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    input_node_id: String,
    topo: Vec<String>,
    max_parallel: usize,
}

impl PipelineGraph {
    /// Parses and validates a pipeline definition.
    pub fn parse(yaml: &str) -> Result<Self, PipelineError> {
        let doc: PipelineDoc = serde_yaml::from_str(yaml)?;
        if doc.executors.is_empty() {
            return Err(PipelineError::Empty);
        }

        let mut nodes = HashMap::new();
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let mut input_ids = Vec::new();

        for node_doc in &doc.executors {
            if nodes.contains_key(&node_doc.id) {
                return Err(PipelineError::DuplicateNode(node_doc.id.clone()));
            }
            if !registry::is_registered(&node_doc.executor_type) {
                return Err(PipelineError::UnknownExecutorType(
                    node_doc.executor_type.clone(),
                ));
            }
            let is_input = registry::is_input_type(&node_doc.executor_type);
            if is_input {
                input_ids.push(node_doc.id.clone());
            }

            let settings = parse_settings(&node_doc.id, &node_doc.settings)?;
            let index = graph.add_node(node_doc.id.clone());
            indices.insert(node_doc.id.clone(), index);
            nodes.insert(
                node_doc.id.clone(),
                PipelineNode {
                    id: node_doc.id.clone(),
                    executor_type: node_doc.executor_type.clone(),
                    settings,
                    is_input,
                },
            );
        }

        // Without explicit edges, executors chain in listed order.
        let edges: Vec<(String, String)> = if doc.edges.is_empty() {
            doc.executors
                .windows(2)
                .map(|pair| (pair[0].id.clone(), pair[1].id.clone()))
                .collect()
        } else {
            doc.edges
                .iter()
                .map(|edge| (edge.from.clone(), edge.to.clone()))
                .collect()
        };

        for (from, to) in &edges {
            let from_index = *indices
                .get(from)
                .ok_or_else(|| PipelineError::UnknownEdgeNode(from.clone()))?;
            let to_index = *indices
                .get(to)
                .ok_or_else(|| PipelineError::UnknownEdgeNode(to.clone()))?;
            graph.add_edge(from_index, to_index, ());
        }

        if is_cyclic_directed(&graph) {
            return Err(PipelineError::Cycle);
        }

        let input_node_id = match input_ids.len() {
            0 => return Err(PipelineError::NoInputNode),
            1 => input_ids.remove(0),
            _ => return Err(PipelineError::MultipleInputNodes(input_ids)),
        };

        let input_index = indices[&input_node_id];
        if graph
            .neighbors_directed(input_index, petgraph::Direction::Incoming)
            .next()
            .is_some()
        {
            return Err(PipelineError::InputNodeHasPredecessors(input_node_id));
        }

        // Cycle check above guarantees the sort succeeds.
        let topo = toposort(&graph, None)
            .map_err(|_| PipelineError::Cycle)?
            .into_iter()
            .map(|index| graph[index].clone())
            .collect();

        Ok(Self {
            name: doc.name,
            nodes,
            graph,
            indices,
            input_node_id,
            topo,
            max_parallel: doc.max_parallel.max(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_node(&self) -> &PipelineNode {
        &self.nodes[&self.input_node_id]
    }

    pub fn node(&self, id: &str) -> Option<&PipelineNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node ids in topological order (input node first among its component).
    pub fn topo_order(&self) -> &[String] {
        &self.topo
    }

    pub fn successors(&self, id: &str) -> Vec<&PipelineNode> {
        self.neighbors(id, petgraph::Direction::Outgoing)
    }

    pub fn predecessors(&self, id: &str) -> Vec<&PipelineNode> {
        self.neighbors(id, petgraph::Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: petgraph::Direction) -> Vec<&PipelineNode> {
        let Some(index) = self.indices.get(id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(*index, direction)
            .map(|neighbor| &self.nodes[&self.graph[neighbor]])
            .collect()
    }

    /// Upper bound on concurrently executing branches.
    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Crawl interval from the input executor's `polling_interval_seconds`
    /// setting, or `default` when absent.
    pub fn polling_interval(&self, default: Duration) -> Duration {
        self.input_node()
            .settings
            .u64("polling_interval_seconds")
            .map(Duration::from_secs)
            .unwrap_or(default)
    }
}

fn parse_settings(node_id: &str, value: &serde_yaml::Value) -> Result<ExecutorSettings, PipelineError> {
    if value.is_null() {
        return Ok(ExecutorSettings::default());
    }
    let json = serde_json::to_value(value)
        .map_err(|_| PipelineError::InvalidSettings(node_id.to_string()))?;
    match json {
        serde_json::Value::Object(map) => Ok(ExecutorSettings(map)),
        _ => Err(PipelineError::InvalidSettings(node_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::builtins::register_builtin_executors;

    const LINEAR: &str = r#"
name: linear
executors:
  - id: source
    type: static_source
    settings:
      polling_interval_seconds: 60
  - id: tagger
    type: content_tagger
    settings:
      tags:
        team: ingestion
  - id: sink
    type: blob_sink
"#;

    const BRANCHED: &str = r#"
name: branched
executors:
  - id: source
    type: static_source
  - id: left
    type: content_tagger
  - id: right
    type: content_tagger
  - id: join
    type: blob_sink
edges:
  - { from: source, to: left }
  - { from: source, to: right }
  - { from: left, to: join }
  - { from: right, to: join }
max_parallel: 2
"#;

    #[test]
    fn parses_linear_pipeline_with_implicit_edges() {
        register_builtin_executors();
        let graph = PipelineGraph::parse(LINEAR).unwrap();

        assert_eq!(graph.name(), "linear");
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.input_node().id, "source");
        assert_eq!(graph.polling_interval(Duration::from_secs(300)), Duration::from_secs(60));

        let successors: Vec<_> = graph.successors("source").iter().map(|n| n.id.clone()).collect();
        assert_eq!(successors, vec!["tagger"]);
        assert_eq!(graph.topo_order()[0], "source");
    }

    #[test]
    fn parses_branched_pipeline() {
        register_builtin_executors();
        let graph = PipelineGraph::parse(BRANCHED).unwrap();

        assert_eq!(graph.successors("source").len(), 2);
        assert_eq!(graph.predecessors("join").len(), 2);
        assert_eq!(graph.max_parallel(), 2);
    }

    #[test]
    fn rejects_unknown_executor_type() {
        register_builtin_executors();
        let yaml = r#"
executors:
  - id: a
    type: does_not_exist
"#;
        assert!(matches!(
            PipelineGraph::parse(yaml),
            Err(PipelineError::UnknownExecutorType(_))
        ));
    }

    #[test]
    fn rejects_cycle() {
        register_builtin_executors();
        let yaml = r#"
executors:
  - id: source
    type: static_source
  - id: a
    type: content_tagger
  - id: b
    type: content_tagger
edges:
  - { from: source, to: a }
  - { from: a, to: b }
  - { from: b, to: a }
"#;
        assert!(matches!(PipelineGraph::parse(yaml), Err(PipelineError::Cycle)));
    }

    #[test]
    fn rejects_missing_or_multiple_inputs() {
        register_builtin_executors();
        let no_input = r#"
executors:
  - id: a
    type: content_tagger
"#;
        assert!(matches!(
            PipelineGraph::parse(no_input),
            Err(PipelineError::NoInputNode)
        ));

        let two_inputs = r#"
executors:
  - id: a
    type: static_source
  - id: b
    type: static_source
"#;
        assert!(matches!(
            PipelineGraph::parse(two_inputs),
            Err(PipelineError::MultipleInputNodes(_))
        ));
    }

    #[test]
    fn rejects_input_with_predecessors() {
        register_builtin_executors();
        let yaml = r#"
executors:
  - id: tagger
    type: content_tagger
  - id: source
    type: static_source
edges:
  - { from: tagger, to: source }
"#;
        assert!(matches!(
            PipelineGraph::parse(yaml),
            Err(PipelineError::InputNodeHasPredecessors(_))
        ));
    }

    #[test]
    fn rejects_duplicate_ids_and_unknown_edges() {
        register_builtin_executors();
        let duplicate = r#"
executors:
  - id: source
    type: static_source
  - id: source
    type: content_tagger
"#;
        assert!(matches!(
            PipelineGraph::parse(duplicate),
            Err(PipelineError::DuplicateNode(_))
        ));

        let bad_edge = r#"
executors:
  - id: source
    type: static_source
edges:
  - { from: source, to: ghost }
"#;
        assert!(matches!(
            PipelineGraph::parse(bad_edge),
            Err(PipelineError::UnknownEdgeNode(_))
        ));
    }
}
