//! Dependency ordering for a requested set of plugins.
//!
//! Depth-first topological sort with an in-progress marker.  Roots are
//! visited in the graph's stable order (manifest, then registration), so the
//! order in which a caller lists the requested ids never matters.
//!
//! - Registered dependencies that were not requested are pulled in and
//!   ordered before their dependents.
//! - A dependency that is not registered is reported and skipped; the
//!   dependent still takes part.
//! - The edge that closes a cycle is ignored and the cycle is reported once.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};

/// Non-fatal finding produced while resolving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResolutionWarning {
    /// A dependency cycle; members are listed in traversal order.
    Cycle { members: Vec<String> },
    /// `plugin` depends on `dependency`, which is not registered.
    Missing { plugin: String, dependency: String },
    /// A requested id appears in the manifest but is not registered.
    Unregistered { id: String },
    /// A requested id is neither registered nor in the manifest.
    Unknown { id: String },
}

impl ResolutionWarning {
    /// Payload for a `plugin:warning` event.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "kind": "unknown" }))
    }
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cycle { members } => {
                write!(f, "dependency cycle among: {}", members.join(" -> "))
            }
            Self::Missing { plugin, dependency } => {
                write!(f, "plugin '{plugin}' depends on unregistered '{dependency}'")
            }
            Self::Unregistered { id } => write!(f, "plugin '{id}' is in the manifest but not registered"),
            Self::Unknown { id } => write!(f, "plugin '{id}' is unknown"),
        }
    }
}

/// Output of [`DependencyGraph::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Registered ids, every dependency before its dependents.
    pub order: Vec<String>,
    /// Ids in `order` that were not requested.
    pub pulled: Vec<String>,
    /// Requested ids that will not be enabled (unknown or unregistered).
    pub skipped: Vec<String>,
    /// `(dependent, dependency)` edges ignored to break cycles.
    pub broken_edges: HashSet<(String, String)>,
    pub warnings: Vec<ResolutionWarning>,
}

impl Resolution {
    /// Whether the edge `dependent -> dependency` was dropped to break a cycle.
    pub fn is_broken(&self, dependent: &str, dependency: &str) -> bool {
        self.broken_edges
            .contains(&(dependent.to_string(), dependency.to_string()))
    }
}

#[derive(Debug, Clone)]
struct Node {
    deps: Vec<String>,
    registered: bool,
}

/// Dependency graph over every known plugin id.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    nodes: HashMap<String, Node>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id`; the first insertion fixes its position in the stable order.
    pub fn add_node(&mut self, id: impl Into<String>, deps: Vec<String>, registered: bool) {
        let id = id.into();
        if !self.nodes.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.nodes.insert(id, Node { deps, registered });
    }

    /// Orders `requested` and the registered dependencies it needs.
    pub fn resolve(&self, requested: &[String]) -> Resolution {
        let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
        let mut walk = Walk {
            graph: self,
            marks: HashMap::new(),
            path: Vec::new(),
            cycles: HashSet::new(),
            missing: HashSet::new(),
            out: Resolution::default(),
        };

        for id in &self.order {
            if !wanted.contains(id.as_str()) {
                continue;
            }
            match self.nodes.get(id) {
                Some(node) if node.registered => walk.visit(id),
                _ => {
                    walk.out.skipped.push(id.clone());
                    walk.out
                        .warnings
                        .push(ResolutionWarning::Unregistered { id: id.clone() });
                }
            }
        }

        let mut seen = HashSet::new();
        for id in requested {
            if !self.nodes.contains_key(id) && seen.insert(id.as_str()) {
                walk.out.skipped.push(id.clone());
                walk.out
                    .warnings
                    .push(ResolutionWarning::Unknown { id: id.clone() });
            }
        }

        let mut out = walk.out;
        out.pulled = out
            .order
            .iter()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        out
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct Walk<'g> {
    graph: &'g DependencyGraph,
    marks: HashMap<String, Mark>,
    path: Vec<String>,
    /// Sorted member lists of cycles already reported.
    cycles: HashSet<Vec<String>>,
    missing: HashSet<(String, String)>,
    out: Resolution,
}

impl Walk<'_> {
    fn visit(&mut self, id: &str) {
        match self.marks.get(id) {
            Some(Mark::Done) => return,
            Some(Mark::Visiting) => {
                self.close_cycle(id);
                return;
            }
            None => {}
        }

        self.marks.insert(id.to_string(), Mark::Visiting);
        self.path.push(id.to_string());

        let deps = self
            .graph
            .nodes
            .get(id)
            .map(|node| node.deps.clone())
            .unwrap_or_default();
        for dep in deps {
            let registered = self.graph.nodes.get(&dep).is_some_and(|node| node.registered);
            if !registered {
                if self.missing.insert((id.to_string(), dep.clone())) {
                    self.out.warnings.push(ResolutionWarning::Missing {
                        plugin: id.to_string(),
                        dependency: dep,
                    });
                }
                continue;
            }
            if self.marks.get(dep.as_str()) == Some(&Mark::Visiting) {
                self.out.broken_edges.insert((id.to_string(), dep.clone()));
            }
            self.visit(&dep);
        }

        self.path.pop();
        self.marks.insert(id.to_string(), Mark::Done);
        self.out.order.push(id.to_string());
    }

    /// Reports the cycle that runs from `id` to the top of the path.
    fn close_cycle(&mut self, id: &str) {
        let Some(start) = self.path.iter().position(|p| p == id) else {
            return;
        };
        let members: Vec<String> = self.path[start..].to_vec();
        let mut key = members.clone();
        key.sort();
        if self.cycles.insert(key) {
            self.out.warnings.push(ResolutionWarning::Cycle { members });
        }
    }
}
