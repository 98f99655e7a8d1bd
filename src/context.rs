//! The context tree.
//!
//! Every container and every destination living in a container gets a
//! context. Contexts form a tree rooted at the navigation itself: a
//! container's parent is the root or the destination that hosts it, a
//! destination's parent is its container. The tree is kept in an arena and
//! parent links are edges, so nothing in it owns anything else.

use std::collections::HashMap;

use petgraph::Direction as Edge;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;

use crate::engine::ContainerKey;
use crate::error::NavigationError;
use crate::instance::InstanceId;

/// Index of a context in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(NodeIndex);

impl ContextId {
    pub fn index(self) -> usize {
        self.0.index()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextKind {
    Root,
    Container(ContainerKey),
    Destination(InstanceId),
}

#[derive(Debug)]
struct ContextNode {
    kind: ContextKind,
    /// The child container which currently has focus.
    active_child: Option<ContextId>,
}

#[derive(Debug)]
pub struct ContextTree {
    graph: StableGraph<ContextNode, ()>,
    root: NodeIndex,
    destinations: HashMap<InstanceId, NodeIndex>,
    containers: HashMap<ContainerKey, NodeIndex>,
}

impl ContextTree {
    pub fn new() -> Self {
        let mut graph = StableGraph::new();
        let root = graph.add_node(ContextNode {
            kind: ContextKind::Root,
            active_child: None,
        });

        Self {
            graph,
            root,
            destinations: HashMap::new(),
            containers: HashMap::new(),
        }
    }

    pub fn root(&self) -> ContextId {
        ContextId(self.root)
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.graph.contains_node(id.0)
    }

    pub fn kind(&self, id: ContextId) -> Option<&ContextKind> {
        self.graph.node_weight(id.0).map(|node| &node.kind)
    }

    pub fn parent(&self, id: ContextId) -> Option<ContextId> {
        self.graph
            .neighbors_directed(id.0, Edge::Incoming)
            .next()
            .map(ContextId)
    }

    pub fn children(&self, id: ContextId) -> Vec<ContextId> {
        let mut children: Vec<_> = self
            .graph
            .neighbors_directed(id.0, Edge::Outgoing)
            .map(ContextId)
            .collect();
        children.sort();
        children
    }

    /// Whether `id` is `ancestor` or lies somewhere below it.
    pub fn is_descendant(&self, id: ContextId, ancestor: ContextId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub fn destination(&self, id: &InstanceId) -> Option<ContextId> {
        self.destinations.get(id).copied().map(ContextId)
    }

    pub fn container(&self, key: &ContainerKey) -> Option<ContextId> {
        self.containers.get(key).copied().map(ContextId)
    }

    /// The instance hosting a context, found by walking up to the nearest
    /// destination.
    pub fn owning_instance(&self, id: ContextId) -> Option<&InstanceId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if let Some(ContextKind::Destination(instance)) = self.kind(current) {
                return Some(instance);
            }
            cursor = self.parent(current);
        }
        None
    }

    pub(crate) fn add_container(
        &mut self,
        parent: ContextId,
        key: ContainerKey,
    ) -> Result<ContextId, NavigationError> {
        if !self.contains(parent) {
            return Err(NavigationError::UnknownContext(parent));
        }
        if self.containers.contains_key(&key) {
            return Err(NavigationError::DuplicateContainer(key));
        }

        let index = self.graph.add_node(ContextNode {
            kind: ContextKind::Container(key.clone()),
            active_child: None,
        });
        self.graph.add_edge(parent.0, index, ());
        self.containers.insert(key, index);

        Ok(ContextId(index))
    }

    /// Creates the context of a destination, or returns the existing one.
    pub(crate) fn add_destination(&mut self, container: ContextId, id: &InstanceId) -> ContextId {
        if let Some(&index) = self.destinations.get(id) {
            return ContextId(index);
        }

        let index = self.graph.add_node(ContextNode {
            kind: ContextKind::Destination(id.clone()),
            active_child: None,
        });
        self.graph.add_edge(container.0, index, ());
        self.destinations.insert(id.clone(), index);

        ContextId(index)
    }

    /// Removes a context with everything below it. Returns the removed
    /// contexts, deepest first.
    pub(crate) fn remove_subtree(&mut self, id: ContextId) -> Vec<ContextKind> {
        if id.0 == self.root || !self.contains(id) {
            return Vec::new();
        }

        let mut order = Vec::new();
        let mut dfs = petgraph::visit::Dfs::new(&self.graph, id.0);
        while let Some(index) = dfs.next(&self.graph) {
            order.push(index);
        }

        for node in self.graph.node_weights_mut() {
            if node.active_child.is_some_and(|child| order.contains(&child.0)) {
                node.active_child = None;
            }
        }

        let mut removed = Vec::with_capacity(order.len());
        for index in order.into_iter().rev() {
            if let Some(node) = self.graph.remove_node(index) {
                match &node.kind {
                    ContextKind::Destination(instance) => {
                        self.destinations.remove(instance);
                    }
                    ContextKind::Container(key) => {
                        self.containers.remove(key);
                    }
                    ContextKind::Root => {}
                }
                removed.push(node.kind);
            }
        }

        removed
    }

    pub fn active_child(&self, id: ContextId) -> Option<ContextId> {
        self.graph.node_weight(id.0)?.active_child
    }

    /// Marks a container as active in its parent, then its parent's
    /// container in the grandparent, and so on up to the root.
    pub(crate) fn activate(&mut self, container: ContextId) {
        let mut child = container;
        while let Some(parent) = self.parent(child) {
            if matches!(self.kind(child), Some(ContextKind::Container(_)))
                && let Some(node) = self.graph.node_weight_mut(parent.0)
            {
                node.active_child = Some(child);
            }
            child = parent;
        }
    }

    /// Follows active children down from the root and returns the deepest
    /// active container.
    pub fn active_container(&self) -> Option<&ContainerKey> {
        let mut cursor = self.root();
        let mut found = None;

        loop {
            let Some(container) = self.active_child(cursor) else {
                return found;
            };
            let Some(ContextKind::Container(key)) = self.kind(container) else {
                return found;
            };
            found = Some(key);

            // Newest destination with an active nested container.
            match self
                .children(container)
                .into_iter()
                .rev()
                .find(|destination| self.active_child(*destination).is_some())
            {
                Some(destination) => cursor = destination,
                None => return found,
            }
        }
    }
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph TD")?;

        for index in self.graph.node_indices() {
            let label = match &self.graph[index].kind {
                ContextKind::Root => "root".to_string(),
                ContextKind::Container(key) => format!("container {key}"),
                ContextKind::Destination(id) => format!("destination {id}"),
            };
            writeln!(f, "    {}[\"{}\"]", index.index(), label.replace('"', "\\\""))?;
        }

        for edge in self.graph.edge_indices() {
            let Some((source, target)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let arrow = match self.graph[source].active_child {
                Some(active) if active.0 == target => "==>",
                _ => "-->",
            };
            writeln!(f, "    {} {} {}", source.index(), arrow, target.index())?;
        }

        Ok(())
    }
}
