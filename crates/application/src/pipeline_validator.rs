//! 流水线校验
//!
//! 在触发与 dry-run 之前执行：检查任务是否存在、后继引用是否有效、
//! 是否有环、是否有多个连通分量，并计算入口/终点节点与最大深度。
//! 多连通分量与超深流水线只告警不拒绝。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline_graph::PipelineGraph;
use pipeweave_domain::{Pipeline, PipelineStructure, TaskRepository};
use pipeweave_errors::OrchestratorResult;

/// 深度超过该值时告警
const MAX_RECOMMENDED_DEPTH: usize = 20;

/// 校验结果
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub entry_tasks: Vec<String>,
    pub end_tasks: Vec<String>,
    pub max_depth: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 流水线校验器
pub struct PipelineValidator {
    tasks: Arc<dyn TaskRepository>,
}

impl PipelineValidator {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }

    pub async fn validate_pipeline(&self, pipeline: &Pipeline) -> OrchestratorResult<ValidationReport> {
        self.validate_structure(&pipeline.structure).await
    }

    /// 对结构快照做全量校验
    pub async fn validate_structure(
        &self,
        structure: &PipelineStructure,
    ) -> OrchestratorResult<ValidationReport> {
        let mut report = ValidationReport::default();

        let mut node_ids: Vec<String> = structure.keys().cloned().collect();
        node_ids.sort();

        // 结构节点与后继引用都必须是数据库里已注册的任务
        let mut requested: Vec<String> = node_ids.clone();
        for node in structure.values() {
            requested.extend(node.allowed_next.iter().cloned());
        }
        requested.sort();
        requested.dedup();
        let known: HashSet<String> = self
            .tasks
            .get_tasks(&requested)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        for id in &node_ids {
            if !known.contains(id) {
                report.errors.push(format!("task not found: {id}"));
            }
        }
        for (task_id, node) in structure {
            for next in &node.allowed_next {
                if !known.contains(next) {
                    report
                        .errors
                        .push(format!("task {task_id} references unknown task: {next}"));
                }
            }
        }

        for cycle in detect_cycles(structure) {
            report.errors.push(format!("cycle detected: {cycle}"));
        }

        let graph = PipelineGraph::from_structure(structure);
        report.entry_tasks = graph.entry_nodes();
        report.end_tasks = graph.end_nodes();

        if report.entry_tasks.is_empty() {
            report
                .errors
                .push("pipeline has no entry tasks (every task has predecessors)".to_string());
        } else {
            report.max_depth = graph.max_depth(&report.entry_tasks);
            if report.max_depth > MAX_RECOMMENDED_DEPTH {
                report.warnings.push(format!(
                    "pipeline depth {} exceeds recommended maximum {MAX_RECOMMENDED_DEPTH}",
                    report.max_depth
                ));
            }
        }

        let components = count_components(structure);
        if components > 1 {
            // 只有从声明入口可达的分量会被执行
            report.warnings.push(format!(
                "pipeline has {components} disconnected components; only the component reachable from the entry tasks will execute"
            ));
        }

        for w in &report.warnings {
            warn!("流水线校验告警: {}", w);
        }

        Ok(report)
    }
}

/// DFS + 递归栈找环；每个环只列出一次（按最小节点旋转去重）
fn detect_cycles(structure: &PipelineStructure) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InStack,
        Done,
    }

    fn dfs(
        node: &str,
        structure: &PipelineStructure,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
        seen: &mut HashSet<Vec<String>>,
        cycles: &mut Vec<String>,
    ) {
        marks.insert(node.to_string(), Mark::InStack);
        stack.push(node.to_string());

        if let Some(n) = structure.get(node) {
            let mut next_ids: Vec<&String> = n.allowed_next.iter().collect();
            next_ids.sort();
            for next in next_ids {
                match marks.get(next.as_str()).copied().unwrap_or(Mark::Unvisited) {
                    Mark::InStack => {
                        let start = stack.iter().position(|s| s == next).expect("on stack");
                        let cycle: Vec<String> = stack[start..].to_vec();
                        let canonical = canonical_rotation(&cycle);
                        if seen.insert(canonical.clone()) {
                            let mut path = canonical.clone();
                            path.push(canonical[0].clone());
                            cycles.push(path.join(" -> "));
                        }
                    }
                    Mark::Unvisited if structure.contains_key(next.as_str()) => {
                        dfs(next, structure, marks, stack, seen, cycles);
                    }
                    _ => {}
                }
            }
        }

        stack.pop();
        marks.insert(node.to_string(), Mark::Done);
    }

    fn canonical_rotation(cycle: &[String]) -> Vec<String> {
        let min_pos = cycle
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| v.as_str())
            .map(|(i, _)| i)
            .unwrap_or(0);
        let mut rotated = Vec::with_capacity(cycle.len());
        rotated.extend_from_slice(&cycle[min_pos..]);
        rotated.extend_from_slice(&cycle[..min_pos]);
        rotated
    }

    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut cycles = Vec::new();
    let mut seen = HashSet::new();
    let mut node_ids: Vec<&String> = structure.keys().collect();
    node_ids.sort();

    for id in node_ids {
        if marks.get(id.as_str()).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            let mut stack = Vec::new();
            dfs(id, structure, &mut marks, &mut stack, &mut seen, &mut cycles);
        }
    }
    cycles.sort();
    cycles
}

/// 把边当作无向边数连通分量
fn count_components(structure: &PipelineStructure) -> usize {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut nodes: HashSet<&str> = structure.keys().map(String::as_str).collect();
    for (id, node) in structure {
        for next in &node.allowed_next {
            nodes.insert(next.as_str());
            adjacency.entry(id.as_str()).or_default().push(next.as_str());
            adjacency.entry(next.as_str()).or_default().push(id.as_str());
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut components = 0;
    for node in &nodes {
        if visited.contains(node) {
            continue;
        }
        components += 1;
        let mut queue = vec![*node];
        while let Some(current) = queue.pop() {
            if visited.insert(current) {
                if let Some(neighbors) = adjacency.get(current) {
                    queue.extend(neighbors.iter().copied());
                }
            }
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeweave_domain::PipelineNode;

    fn structure(edges: &[(&str, &[&str])]) -> PipelineStructure {
        edges
            .iter()
            .map(|(id, next)| {
                (
                    id.to_string(),
                    PipelineNode {
                        allowed_next: next.iter().map(|s| s.to_string()).collect(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_detects_simple_cycle_once() {
        let s = structure(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let cycles = detect_cycles(&s);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], "a -> b -> c -> a");
    }

    #[test]
    fn test_detects_self_loop() {
        let s = structure(&[("a", &["a"])]);
        let cycles = detect_cycles(&s);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], "a -> a");
    }

    #[test]
    fn test_acyclic_has_no_cycles() {
        let s = structure(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"]), ("d", &[])]);
        assert!(detect_cycles(&s).is_empty());
    }

    #[test]
    fn test_component_count() {
        let s = structure(&[("a", &["b"]), ("b", &[]), ("x", &["y"]), ("y", &[])]);
        assert_eq!(count_components(&s), 2);
        let s2 = structure(&[("a", &["b", "c"]), ("b", &[]), ("c", &[])]);
        assert_eq!(count_components(&s2), 1);
    }
}
