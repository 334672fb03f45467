//! Cycle-safe closure computation over the tag graph.
//!
//! The tag graph is a set of directed `(tag, parent)` edges and may contain
//! cycles. Closures are computed as a breadth-first fixed point: a tag enters
//! the visited set once and is never expanded again, so a cycle ends the walk
//! instead of looping.
//!
//! [`ClosureWalk`] holds the traversal state only; the caller supplies the
//! neighbors of each frontier. [`TagGraph`] drives it from edges held in
//! memory, and the database layer drives it one frontier query at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::TagNode;

/// Which way to follow tag edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Child to parent.
    Ancestors,
    /// Parent to child.
    Descendants,
}

/// How a closure is computed.
///
/// Both strategies must return the same node set for any graph; they are
/// tested against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureStrategy {
    /// Visited-set walk, one edge query per frontier.
    #[default]
    FixedPoint,
    /// Recursive CTE with a cycle-guard column.
    Recursive,
}

impl fmt::Display for ClosureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedPoint => write!(f, "fixed_point"),
            Self::Recursive => write!(f, "recursive"),
        }
    }
}

impl FromStr for ClosureStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fixed_point" | "memory" => Ok(Self::FixedPoint),
            "recursive" | "sql" => Ok(Self::Recursive),
            _ => Err(Error::InvalidInput(format!(
                "Unknown closure strategy: {}",
                s
            ))),
        }
    }
}

/// A directed edge: `tag` is a child of `parent`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagEdge {
    pub tag: String,
    pub parent: String,
}

impl TagEdge {
    pub fn new(tag: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            parent: parent.into(),
        }
    }
}

/// State of a breadth-first closure walk.
#[derive(Debug, Clone)]
pub struct ClosureWalk {
    visited: BTreeSet<String>,
    frontier: Vec<String>,
}

impl ClosureWalk {
    /// Start a walk from one or more tags. The starts are part of the closure.
    pub fn new<I, S>(starts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut visited = BTreeSet::new();
        let mut frontier = Vec::new();
        for start in starts {
            let start = start.into();
            if visited.insert(start.clone()) {
                frontier.push(start);
            }
        }
        Self { visited, frontier }
    }

    /// Tags reached in the last step that still need expanding.
    pub fn frontier(&self) -> &[String] {
        &self.frontier
    }

    /// True once no unexpanded tags remain.
    pub fn is_done(&self) -> bool {
        self.frontier.is_empty()
    }

    /// Record the neighbors of the current frontier.
    ///
    /// Already visited tags are dropped, which is what terminates cycles.
    pub fn advance<I, S>(&mut self, reached: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = Vec::new();
        for id in reached {
            let id = id.into();
            if self.visited.insert(id.clone()) {
                next.push(id);
            }
        }
        self.frontier = next;
    }

    pub fn visited(&self) -> &BTreeSet<String> {
        &self.visited
    }

    pub fn into_visited(self) -> BTreeSet<String> {
        self.visited
    }
}

/// The tag graph held in memory.
#[derive(Debug, Clone, Default)]
pub struct TagGraph {
    parents: BTreeMap<String, BTreeSet<String>>,
    children: BTreeMap<String, BTreeSet<String>>,
}

impl TagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = TagEdge>,
    {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_edge(edge.tag, edge.parent);
        }
        graph
    }

    /// Add a child to parent edge. Returns false if it was already present.
    pub fn add_edge(&mut self, tag: impl Into<String>, parent: impl Into<String>) -> bool {
        let tag = tag.into();
        let parent = parent.into();
        self.children
            .entry(parent.clone())
            .or_default()
            .insert(tag.clone());
        self.parents.entry(tag).or_default().insert(parent)
    }

    pub fn edge_count(&self) -> usize {
        self.parents.values().map(BTreeSet::len).sum()
    }

    /// Direct neighbors of `tag` in the given direction.
    pub fn neighbors<'a>(
        &'a self,
        tag: &str,
        direction: Direction,
    ) -> impl Iterator<Item = &'a String> + 'a {
        let index = match direction {
            Direction::Ancestors => &self.parents,
            Direction::Descendants => &self.children,
        };
        index.get(tag).into_iter().flat_map(|set| set.iter())
    }

    /// Every tag reachable from `starts`, the starts included.
    pub fn closure<I, S>(&self, starts: I, direction: Direction) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut walk = ClosureWalk::new(starts);
        while !walk.is_done() {
            let reached: Vec<String> = walk
                .frontier()
                .iter()
                .flat_map(|id| self.neighbors(id, direction))
                .cloned()
                .collect();
            walk.advance(reached);
        }
        walk.into_visited()
    }

    pub fn ancestors(&self, tag: &str) -> BTreeSet<String> {
        self.closure([tag], Direction::Ancestors)
    }

    pub fn descendants(&self, tag: &str) -> BTreeSet<String> {
        self.closure([tag], Direction::Descendants)
    }

    /// Edges whose endpoints both lie in `nodes`.
    pub fn edges_within(&self, nodes: &BTreeSet<String>) -> Vec<TagEdge> {
        self.parents
            .iter()
            .filter(|(tag, _)| nodes.contains(*tag))
            .flat_map(|(tag, parents)| {
                parents
                    .iter()
                    .filter(move |p| nodes.contains(*p))
                    .map(move |p| TagEdge::new(tag.clone(), p.clone()))
            })
            .collect()
    }

    /// Nested tree of the descendants of `root`.
    ///
    /// Each child is attached under every parent it has in the descendant
    /// subgraph. An edge leading back to a tag already on the path from the
    /// root closes a cycle and is not followed.
    ///
    /// A tag appears once per distinct path from `root`, so the tree grows
    /// with the number of root-to-node paths. On a layered DAG that is
    /// exponential in the depth; use [`TagGraph::edges_within`] for a bounded
    /// view.
    pub fn tree(&self, root: &str) -> TagNode {
        let mut path = Vec::new();
        self.build_node(root, &mut path)
    }

    fn build_node(&self, tag: &str, path: &mut Vec<String>) -> TagNode {
        path.push(tag.to_string());

        let next: Vec<String> = self
            .neighbors(tag, Direction::Descendants)
            .filter(|child| !path.contains(*child))
            .cloned()
            .collect();

        let mut children = BTreeMap::new();
        for child in next {
            let node = self.build_node(&child, path);
            children.insert(child, node);
        }

        path.pop();
        TagNode::with_children(tag, children)
    }
}
