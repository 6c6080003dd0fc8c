//! Cycle-safe walk over the component graph exported from the page.
//!
//! The page hands back a flat node table whose child references are ids. Nothing about that
//! table is trusted: ids may repeat, point nowhere, or form cycles. The walk keeps a visited set
//! and a hard node cap, and produces a [`ComponentIndex`] that lives only as long as one scan.

use std::collections::{HashMap, HashSet};

use a11yscope_core_types::{ComponentDescriptor, ElementHandle, NodeKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawGraphNode {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub children: Vec<u64>,
    #[serde(default)]
    pub element: Option<ElementHandle>,
}

/// Read access to a component graph by node id.
pub trait ComponentGraph {
    fn root(&self) -> Option<u64>;
    fn node(&self, id: u64) -> Option<&RawGraphNode>;
}

#[derive(Clone, Debug, Default)]
pub struct RawComponentGraph {
    root: Option<u64>,
    nodes: HashMap<u64, RawGraphNode>,
}

impl RawComponentGraph {
    /// Later duplicates of an id are dropped.
    pub fn new(root: Option<u64>, nodes: Vec<RawGraphNode>) -> Self {
        let mut map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            map.entry(node.id).or_insert(node);
        }
        Self { root, nodes: map }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl ComponentGraph for RawComponentGraph {
    fn root(&self) -> Option<u64> {
        self.root
    }

    fn node(&self, id: u64) -> Option<&RawGraphNode> {
        self.nodes.get(&id)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct WalkOptions {
    pub max_nodes: usize,
    pub include_host_elements: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_nodes: 50_000,
            include_host_elements: false,
        }
    }
}

/// Lookup tables built from one traversal.
#[derive(Clone, Debug, Default)]
pub struct ComponentIndex {
    descriptors: Vec<ComponentDescriptor>,
    /// Host element handle -> nearest owning composite descriptor.
    by_element: HashMap<ElementHandle, usize>,
    /// Composite graph node id -> its descriptor.
    by_node: HashMap<u64, usize>,
    names: HashSet<String>,
}

impl ComponentIndex {
    pub fn descriptors(&self) -> &[ComponentDescriptor] {
        &self.descriptors
    }

    pub fn into_descriptors(self) -> Vec<ComponentDescriptor> {
        self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn by_node(&self, id: u64) -> Option<&ComponentDescriptor> {
        self.by_node.get(&id).map(|idx| &self.descriptors[*idx])
    }

    pub fn by_element(&self, handle: ElementHandle) -> Option<&ComponentDescriptor> {
        self.by_element.get(&handle).map(|idx| &self.descriptors[*idx])
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn push(&mut self, descriptor: ComponentDescriptor) -> usize {
        self.names.insert(descriptor.name.clone());
        self.descriptors.push(descriptor);
        self.descriptors.len() - 1
    }
}

#[derive(Debug, Default)]
pub struct Traversal {
    pub index: ComponentIndex,
    pub visited: usize,
    pub truncated: bool,
}

/// Named means non-empty, not `Anonymous`, and not prefixed with an internal marker.
pub fn is_named(name: &str) -> bool {
    let name = name.trim();
    !(name.is_empty() || name == "Anonymous" || name.starts_with('_') || name.starts_with('$'))
}

struct Frame {
    id: u64,
    /// Nearest emitted ancestor, used for paths.
    parent: Option<usize>,
    /// Nearest emitted composite, used for element ownership.
    owner: Option<usize>,
}

pub struct ComponentTreeWalker {
    options: WalkOptions,
}

impl ComponentTreeWalker {
    pub fn new(options: WalkOptions) -> Self {
        Self { options }
    }

    /// Depth-first walk from `root` (or the graph's own root).
    pub fn traverse(&self, graph: &dyn ComponentGraph, root: Option<u64>) -> Traversal {
        let mut traversal = Traversal::default();
        let Some(root) = root.or_else(|| graph.root()) else {
            debug!(target: "scan-kernel::tree", "no component root; nothing to walk");
            return traversal;
        };

        let mut visited: HashSet<u64> = HashSet::new();
        let mut stack = vec![Frame {
            id: root,
            parent: None,
            owner: None,
        }];

        while let Some(frame) = stack.pop() {
            if visited.contains(&frame.id) {
                continue;
            }
            if visited.len() >= self.options.max_nodes {
                traversal.truncated = true;
                warn!(
                    target: "scan-kernel::tree",
                    max_nodes = self.options.max_nodes,
                    pending = stack.len() + 1,
                    "component traversal hit the node cap; stopping early"
                );
                break;
            }
            visited.insert(frame.id);

            let Some(node) = graph.node(frame.id) else {
                debug!(target: "scan-kernel::tree", id = frame.id, "dangling child reference");
                continue;
            };

            let (parent, owner) = self.visit(node, &frame, &mut traversal.index);

            for child in node.children.iter().rev() {
                if !visited.contains(child) {
                    stack.push(Frame {
                        id: *child,
                        parent,
                        owner,
                    });
                }
            }
        }

        traversal.visited = visited.len();
        debug!(
            target: "scan-kernel::tree",
            visited = traversal.visited,
            components = traversal.index.len(),
            "component traversal finished"
        );
        traversal
    }

    fn visit(
        &self,
        node: &RawGraphNode,
        frame: &Frame,
        index: &mut ComponentIndex,
    ) -> (Option<usize>, Option<usize>) {
        let mut parent = frame.parent;
        let mut owner = frame.owner;

        match node.kind {
            NodeKind::CompositeComponent if is_named(&node.name) => {
                let idx = index.push(ComponentDescriptor {
                    name: node.name.clone(),
                    kind: NodeKind::CompositeComponent,
                    path: path_with(index, frame.parent, &node.name),
                    element: None,
                });
                index.by_node.insert(node.id, idx);
                parent = Some(idx);
                owner = Some(idx);
            }
            NodeKind::HostElement => {
                if let Some(handle) = node.element {
                    if let Some(owner_idx) = frame.owner {
                        index.by_element.entry(handle).or_insert(owner_idx);
                        let descriptor = &mut index.descriptors[owner_idx];
                        if descriptor.element.is_none() {
                            descriptor.element = Some(handle);
                        }
                    }
                }
                if self.options.include_host_elements && is_named(&node.name) {
                    let idx = index.push(ComponentDescriptor {
                        name: node.name.clone(),
                        kind: NodeKind::HostElement,
                        path: path_with(index, frame.parent, &node.name),
                        element: node.element,
                    });
                    parent = Some(idx);
                }
            }
            NodeKind::CompositeComponent => {}
        }

        (parent, owner)
    }
}

fn path_with(index: &ComponentIndex, parent: Option<usize>, name: &str) -> Vec<String> {
    let mut path = parent
        .map(|idx| index.descriptors[idx].path.clone())
        .unwrap_or_default();
    path.push(name.to_string());
    path
}
