use crate::error::{OrchestratorError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Type dependency graph (type -> prerequisite types)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDependencyGraph {
    nodes: BTreeMap<String, BTreeSet<String>>,
}

impl TypeDependencyGraph {
    /// Build from `(type, prerequisites)` pairs
    ///
    /// Every prerequisite must itself be a node. Cycles are not rejected
    /// here; [`waves`](Self::waves) reports them.
    pub fn new<I, S>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<S>)>,
        S: Into<String>,
    {
        let nodes: BTreeMap<String, BTreeSet<String>> = nodes
            .into_iter()
            .map(|(t, prereqs)| (t.into(), prereqs.into_iter().map(Into::into).collect()))
            .collect();

        for (type_name, prereqs) in &nodes {
            for prereq in prereqs {
                if !nodes.contains_key(prereq) {
                    return Err(OrchestratorError::MissingDependency(format!(
                        "Type {} depends on non-existent type {}",
                        type_name, prereq
                    )));
                }
            }
        }

        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.nodes.contains_key(type_name)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn prerequisites(&self, type_name: &str) -> Vec<String> {
        self.nodes
            .get(type_name)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Types whose prerequisites are all in `done`, excluding `done` itself
    pub fn ready(&self, done: &BTreeSet<String>) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(t, prereqs)| !done.contains(*t) && prereqs.is_subset(done))
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Dry-run of wave extraction
    ///
    /// Fails with `UnsatisfiableGraph` when some types never become ready,
    /// which means they sit on or behind a cycle.
    pub fn waves(&self) -> Result<Vec<Vec<String>>> {
        let mut done = BTreeSet::new();
        let mut waves = Vec::new();
        loop {
            let wave = self.ready(&done);
            if wave.is_empty() {
                break;
            }
            done.extend(wave.iter().cloned());
            waves.push(wave);
        }
        let unresolved = self.unresolved(&done);
        if unresolved.is_empty() {
            Ok(waves)
        } else {
            Err(OrchestratorError::UnsatisfiableGraph { unresolved })
        }
    }

    pub fn unresolved(&self, done: &BTreeSet<String>) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|t| !done.contains(*t))
            .cloned()
            .collect()
    }

    /// Execution plan as string (for logging)
    pub fn execution_plan(&self) -> String {
        match self.waves() {
            Ok(waves) => waves
                .iter()
                .enumerate()
                .map(|(i, wave)| {
                    if wave.len() > 1 {
                        format!("Wave {}: {} (parallel)", i + 1, wave.join(" ∥ "))
                    } else {
                        format!("Wave {}: {}", i + 1, wave.join(""))
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("No plan: {}", e),
        }
    }
}
