//! 流水线图
//!
//! 在结构快照（任务ID → 声明后继）上做的所有图运算：反向邻接、
//! 拓扑分层、join 就绪判断和传递闭包。图只按ID查表，不持有所有权，
//! 复杂度 O(V+E)，流水线规模预期在几十到低几百个任务。

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use pipeweave_domain::PipelineStructure;

/// 执行层类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LevelType {
    #[serde(rename = "entry")]
    Entry,
    #[serde(rename = "parallel")]
    Parallel,
    #[serde(rename = "join")]
    Join,
    #[serde(rename = "end")]
    End,
}

/// 拓扑排序产出的一个执行层
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLevel {
    pub level: usize,
    pub tasks: Vec<String>,
    #[serde(rename = "type")]
    pub level_type: LevelType,
    /// join 层中各任务等待的前驱
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waits_for: Option<HashMap<String, Vec<String>>>,
}

/// 流水线图：正向与反向邻接各建一次
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    nodes: BTreeSet<String>,
    successors: HashMap<String, Vec<String>>,
    predecessors: HashMap<String, Vec<String>>,
}

impl PipelineGraph {
    pub fn from_structure(structure: &PipelineStructure) -> Self {
        let mut nodes: BTreeSet<String> = structure.keys().cloned().collect();
        let mut successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();

        for (task_id, node) in structure {
            for next in &node.allowed_next {
                nodes.insert(next.clone());
                successors
                    .entry(task_id.clone())
                    .or_default()
                    .push(next.clone());
                predecessors
                    .entry(next.clone())
                    .or_default()
                    .push(task_id.clone());
            }
        }
        // 排序保证重复调用产出一致的计划
        for list in successors.values_mut() {
            list.sort();
            list.dedup();
        }
        for list in predecessors.values_mut() {
            list.sort();
            list.dedup();
        }

        Self {
            nodes,
            successors,
            predecessors,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.nodes.contains(task_id)
    }

    pub fn successors(&self, task_id: &str) -> &[String] {
        self.successors.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, task_id: &str) -> &[String] {
        self.predecessors
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 没有入边的节点
    pub fn entry_nodes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| self.predecessors(n).is_empty())
            .cloned()
            .collect()
    }

    /// 没有出边的节点
    pub fn end_nodes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| self.successors(n).is_empty())
            .cloned()
            .collect()
    }

    /// 所有前驱都已完成时任务才可运行
    pub fn is_ready_to_run(&self, task_id: &str, completed: &HashSet<String>) -> bool {
        self.predecessors(task_id)
            .iter()
            .all(|p| completed.contains(p))
    }

    /// 下游传递闭包（不含自身）
    pub fn downstream_of(&self, task_id: &str) -> HashSet<String> {
        self.closure(task_id, |g, n| g.successors(n))
    }

    /// 上游传递闭包（不含自身）
    pub fn upstream_of(&self, task_id: &str) -> HashSet<String> {
        self.closure(task_id, |g, n| g.predecessors(n))
    }

    fn closure<'a, F>(&'a self, start: &str, edges: F) -> HashSet<String>
    where
        F: Fn(&'a Self, &str) -> &'a [String],
    {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<String> = edges(self, start).iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id.clone()) {
                queue.extend(edges(self, &id).iter().cloned());
            }
        }
        seen
    }

    /// 从入口出发可达的节点集合（含入口）
    pub fn reachable_from(&self, entries: &[String]) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = entries.iter().map(String::as_str).collect();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id.to_string()) {
                queue.extend(self.successors(id).iter().map(String::as_str));
            }
        }
        seen
    }

    /// 基于入度计数的BFS分层拓扑排序
    ///
    /// 只覆盖从入口可达的子图；环内节点入度永远到不了零，自然被跳过
    /// （环在校验阶段已经报错）。
    pub fn topological_levels(&self, entries: &[String]) -> Vec<ExecutionLevel> {
        let reachable = self.reachable_from(entries);
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for id in &reachable {
            let degree = self
                .predecessors(id)
                .iter()
                .filter(|p| reachable.contains(*p))
                .count();
            in_degree.insert(id.as_str(), degree);
        }

        let mut current: Vec<String> = entries
            .iter()
            .filter(|e| reachable.contains(*e) && in_degree.get(e.as_str()) == Some(&0))
            .cloned()
            .collect();
        current.sort();
        current.dedup();

        let mut levels = Vec::new();
        let mut level_index = 0usize;
        let mut emitted: HashSet<String> = HashSet::new();

        while !current.is_empty() {
            let mut next: Vec<String> = Vec::new();
            for id in &current {
                emitted.insert(id.clone());
                for succ in self.successors(id) {
                    if !reachable.contains(succ) {
                        continue;
                    }
                    let degree = in_degree.get_mut(succ.as_str()).expect("reachable node");
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(succ.clone());
                    }
                }
            }
            next.sort();
            next.dedup();

            let waits_for: HashMap<String, Vec<String>> = current
                .iter()
                .filter(|t| self.predecessors(t).len() >= 2)
                .map(|t| (t.clone(), self.predecessors(t).to_vec()))
                .collect();

            let level_type = if level_index == 0 {
                LevelType::Entry
            } else if !waits_for.is_empty() {
                LevelType::Join
            } else if next.is_empty()
                && current.iter().any(|t| self.successors(t).is_empty())
            {
                LevelType::End
            } else {
                LevelType::Parallel
            };

            levels.push(ExecutionLevel {
                level: level_index,
                tasks: current.clone(),
                level_type,
                waits_for: if waits_for.is_empty() {
                    None
                } else {
                    Some(waits_for)
                },
            });

            current = next;
            level_index += 1;
        }

        levels
    }

    /// 最大深度（层数）
    pub fn max_depth(&self, entries: &[String]) -> usize {
        self.topological_levels(entries).len()
    }
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
    fn test_linear_levels() {
        let graph = PipelineGraph::from_structure(&structure(&[
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &[]),
        ]));
        let levels = graph.topological_levels(&["a".to_string()]);
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0].tasks, vec!["a"]);
        assert_eq!(levels[0].level_type, LevelType::Entry);
        assert_eq!(levels[1].tasks, vec!["b"]);
        assert_eq!(levels[1].level_type, LevelType::Parallel);
        assert_eq!(levels[2].tasks, vec!["c"]);
        assert_eq!(levels[2].level_type, LevelType::End);
    }

    #[test]
    fn test_diamond_join_level() {
        let graph = PipelineGraph::from_structure(&structure(&[
            ("a", &["b", "c"]),
            ("b", &["d"]),
            ("c", &["d"]),
            ("d", &[]),
        ]));
        let levels = graph.topological_levels(&["a".to_string()]);
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[1].tasks, vec!["b", "c"]);
        assert_eq!(levels[1].level_type, LevelType::Parallel);
        assert_eq!(levels[2].tasks, vec!["d"]);
        assert_eq!(levels[2].level_type, LevelType::Join);
        let waits = levels[2].waits_for.as_ref().unwrap();
        assert_eq!(waits["d"], vec!["b", "c"]);
    }

    #[test]
    fn test_join_readiness() {
        let graph = PipelineGraph::from_structure(&structure(&[
            ("a", &["b", "c"]),
            ("b", &["d"]),
            ("c", &["d"]),
            ("d", &[]),
        ]));
        let mut completed = HashSet::new();
        completed.insert("b".to_string());
        assert!(!graph.is_ready_to_run("d", &completed));
        completed.insert("c".to_string());
        assert!(graph.is_ready_to_run("d", &completed));
    }

    #[test]
    fn test_closures() {
        let graph = PipelineGraph::from_structure(&structure(&[
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &[]),
            ("x", &[]),
        ]));
        let down: HashSet<String> = graph.downstream_of("a");
        assert_eq!(down.len(), 2);
        assert!(down.contains("b") && down.contains("c"));
        let up = graph.upstream_of("c");
        assert!(up.contains("a") && up.contains("b"));
        assert!(graph.downstream_of("x").is_empty());
    }

    #[test]
    fn test_entry_and_end_nodes() {
        let graph = PipelineGraph::from_structure(&structure(&[
            ("a", &["b", "c"]),
            ("b", &[]),
            ("c", &[]),
        ]));
        assert_eq!(graph.entry_nodes(), vec!["a"]);
        assert_eq!(graph.end_nodes(), vec!["b", "c"]);
    }

    #[test]
    fn test_levels_ignore_unreachable_component() {
        let graph = PipelineGraph::from_structure(&structure(&[
            ("a", &["b"]),
            ("b", &[]),
            ("x", &["y"]),
            ("y", &[]),
        ]));
        let levels = graph.topological_levels(&["a".to_string()]);
        let all: Vec<&String> = levels.iter().flat_map(|l| l.tasks.iter()).collect();
        assert!(!all.iter().any(|t| *t == "x" || *t == "y"));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let s = structure(&[("a", &["c", "b"]), ("b", &["d"]), ("c", &["d"]), ("d", &[])]);
        let g1 = PipelineGraph::from_structure(&s);
        let g2 = PipelineGraph::from_structure(&s);
        let entries = vec!["a".to_string()];
        let l1 = serde_json::to_string(&g1.topological_levels(&entries)).unwrap();
        let l2 = serde_json::to_string(&g2.topological_levels(&entries)).unwrap();
        assert_eq!(l1, l2);
    }
}
