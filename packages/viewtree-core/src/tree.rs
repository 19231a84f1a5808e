use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::ids::{NodeId, ViewId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Z-order direction for reorder operations. Children are stored
/// front-to-back; `Above` moves a node directly in front of its sibling.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    Above,
    Below,
}

#[derive(Clone, Debug)]
struct NodeState {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    bounds: Rect,
    view: Option<ViewId>,
}

impl NodeState {
    fn detached() -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            bounds: Rect::ZERO,
            view: None,
        }
    }
}

#[derive(Clone, Debug)]
struct ViewState {
    node: Option<NodeId>,
    contents: Vec<u8>,
}

/// Record of a parent change. The arena returns these instead of invoking
/// delegates, so it depends on neither connections nor the service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HierarchyChange {
    pub node: NodeId,
    pub new_parent: Option<NodeId>,
    pub old_parent: Option<NodeId>,
}

/// Record of a view attachment change on a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ViewChange {
    pub node: NodeId,
    pub new_view: Option<ViewId>,
    pub old_view: Option<ViewId>,
}

/// Record of a bounds change on a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BoundsChange {
    pub node: NodeId,
    pub old: Rect,
    pub new: Rect,
}

/// Arena of all live nodes, keyed by composite id. Parent/child/view
/// relations are id references; exclusive ownership of an id stays with
/// the connection that created it.
pub struct NodeArena {
    nodes: HashMap<NodeId, NodeState>,
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeArena {
    /// Creates an arena holding only the well-known root node.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::ROOT, NodeState::detached());
        Self { nodes }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(&node).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> Option<&[NodeId]> {
        self.nodes.get(&node).map(|n| n.children.as_slice())
    }

    pub fn bounds(&self, node: NodeId) -> Option<Rect> {
        self.nodes.get(&node).map(|n| n.bounds)
    }

    pub fn view(&self, node: NodeId) -> Option<ViewId> {
        self.nodes.get(&node).and_then(|n| n.view)
    }

    /// Whether `ancestor` appears on `node`'s parent chain (a node is not
    /// its own ancestor).
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    /// `node` plus every descendant, front-to-back depth-first.
    pub fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if !self.contains(n) {
                continue;
            }
            out.push(n);
            if let Some(children) = self.children(n) {
                for child in children.iter().rev() {
                    stack.push(*child);
                }
            }
        }
        out
    }

    /// Inserts a new, detached node.
    pub fn insert(&mut self, node: NodeId) -> Result<()> {
        if self.nodes.contains_key(&node) {
            return Err(Error::InvalidOperation(format!(
                "node {:?} already exists",
                node
            )));
        }
        self.nodes.insert(node, NodeState::detached());
        Ok(())
    }

    /// Removes a single node: detaches it from its parent and detaches its
    /// children (children stay alive, parentless). Does not touch views;
    /// the caller clears any attachment through [`NodeArena::set_view`].
    pub fn remove(&mut self, node: NodeId) -> Result<Vec<HierarchyChange>> {
        if !self.contains(node) {
            return Err(Error::UnknownId(format!("node {:?}", node)));
        }
        let mut changes = Vec::new();
        if self.parent(node).is_some() {
            changes.push(self.detach(node)?);
        }
        let children: Vec<NodeId> = self
            .children(node)
            .map(|c| c.to_vec())
            .unwrap_or_default();
        for child in children {
            changes.push(self.detach(child)?);
        }
        self.nodes.remove(&node);
        Ok(changes)
    }

    /// Attaches `child` to the back of `parent`'s children, detaching it
    /// from any previous parent. Rejects cycles and self-parenting.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<HierarchyChange> {
        if !self.contains(parent) {
            return Err(Error::UnknownId(format!("node {:?}", parent)));
        }
        if !self.contains(child) {
            return Err(Error::UnknownId(format!("node {:?}", child)));
        }
        if parent == child || self.is_ancestor(child, parent) {
            return Err(Error::InvalidOperation(
                "attach would create a cycle".into(),
            ));
        }
        let old_parent = self.parent(child);
        if old_parent == Some(parent) {
            return Err(Error::InvalidOperation(
                "child is already attached to parent".into(),
            ));
        }
        if let Some(old) = old_parent {
            if let Some(state) = self.nodes.get_mut(&old) {
                state.children.retain(|c| *c != child);
            }
        }
        if let Some(state) = self.nodes.get_mut(&parent) {
            state.children.push(child);
        }
        if let Some(state) = self.nodes.get_mut(&child) {
            state.parent = Some(parent);
        }
        Ok(HierarchyChange {
            node: child,
            new_parent: Some(parent),
            old_parent,
        })
    }

    /// Detaches `node` from its parent. Fails if it has none.
    pub fn detach(&mut self, node: NodeId) -> Result<HierarchyChange> {
        let parent = self
            .parent(node)
            .ok_or_else(|| Error::InvalidOperation(format!("node {:?} has no parent", node)))?;
        if let Some(state) = self.nodes.get_mut(&parent) {
            state.children.retain(|c| *c != node);
        }
        if let Some(state) = self.nodes.get_mut(&node) {
            state.parent = None;
        }
        Ok(HierarchyChange {
            node,
            new_parent: None,
            old_parent: Some(parent),
        })
    }

    /// Moves `node` directly above or below `relative` among its siblings.
    /// A move that would leave the order unchanged is rejected, not
    /// silently absorbed.
    pub fn reorder(&mut self, node: NodeId, relative: NodeId, direction: Direction) -> Result<()> {
        if node == relative {
            return Err(Error::InvalidOperation(
                "cannot reorder a node relative to itself".into(),
            ));
        }
        let parent = self
            .parent(node)
            .ok_or_else(|| Error::InvalidOperation(format!("node {:?} has no parent", node)))?;
        if self.parent(relative) != Some(parent) {
            return Err(Error::InvalidOperation(
                "reorder nodes must share a parent".into(),
            ));
        }
        let children = match self.children(parent) {
            Some(c) => c,
            None => return Err(Error::UnknownId(format!("node {:?}", parent))),
        };
        let node_idx = children.iter().position(|c| *c == node).ok_or_else(|| {
            Error::InvalidOperation("node is not a child of its parent".into())
        })?;
        let rel_idx = children.iter().position(|c| *c == relative).ok_or_else(|| {
            Error::InvalidOperation("relative node is not a child of the parent".into())
        })?;
        let is_noop = match direction {
            Direction::Above => node_idx + 1 == rel_idx,
            Direction::Below => rel_idx + 1 == node_idx,
        };
        if is_noop {
            return Err(Error::InvalidOperation("reorder is a no-op".into()));
        }
        let state = self
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| Error::UnknownId(format!("node {:?}", parent)))?;
        state.children.retain(|c| *c != node);
        let rel_idx = state
            .children
            .iter()
            .position(|c| *c == relative)
            .ok_or_else(|| Error::InvalidOperation("relative vanished during reorder".into()))?;
        let insert_at = match direction {
            Direction::Above => rel_idx,
            Direction::Below => rel_idx + 1,
        };
        state.children.insert(insert_at, node);
        Ok(())
    }

    pub fn set_bounds(&mut self, node: NodeId, bounds: Rect) -> Result<BoundsChange> {
        let state = self
            .nodes
            .get_mut(&node)
            .ok_or_else(|| Error::UnknownId(format!("node {:?}", node)))?;
        let old = state.bounds;
        state.bounds = bounds;
        Ok(BoundsChange {
            node,
            old,
            new: bounds,
        })
    }

    /// Attaches `view` to `node` (or clears with `None`), keeping both
    /// arenas consistent. A view attaches to at most one node, so a view
    /// already attached elsewhere is detached from that node first; the
    /// extra change record is returned alongside the primary one.
    pub fn set_view(
        &mut self,
        node: NodeId,
        view: Option<ViewId>,
        views: &mut ViewArena,
    ) -> Result<Vec<ViewChange>> {
        if !self.contains(node) {
            return Err(Error::UnknownId(format!("node {:?}", node)));
        }
        if let Some(v) = view {
            if !views.contains(v) {
                return Err(Error::UnknownId(format!("view {:?}", v)));
            }
        }
        let mut changes = Vec::new();
        if let Some(v) = view {
            if let Some(prior_node) = views.node_of(v) {
                if prior_node != node {
                    let old = self.nodes.get_mut(&prior_node).and_then(|s| s.view.take());
                    views.set_node(v, None);
                    changes.push(ViewChange {
                        node: prior_node,
                        new_view: None,
                        old_view: old,
                    });
                }
            }
        }
        let state = self.nodes.get_mut(&node).expect("checked above");
        let old_view = state.view;
        if old_view == view {
            return Ok(changes);
        }
        state.view = view;
        if let Some(old) = old_view {
            views.set_node(old, None);
        }
        if let Some(new) = view {
            views.set_node(new, Some(node));
        }
        changes.push(ViewChange {
            node,
            new_view: view,
            old_view,
        });
        Ok(changes)
    }

    /// Clears the view slot without a full `set_view` round; used while a
    /// node or view is being destroyed.
    pub fn clear_view(&mut self, node: NodeId, views: &mut ViewArena) -> Option<ViewChange> {
        let state = self.nodes.get_mut(&node)?;
        let old = state.view.take()?;
        views.set_node(old, None);
        Some(ViewChange {
            node,
            new_view: None,
            old_view: Some(old),
        })
    }
}

/// Arena of all live views. The back-reference to the attached node is
/// informational; a node never owns a view's lifetime.
#[derive(Default)]
pub struct ViewArena {
    views: HashMap<ViewId, ViewState>,
}

impl ViewArena {
    pub fn contains(&self, view: ViewId) -> bool {
        self.views.contains_key(&view)
    }

    pub fn node_of(&self, view: ViewId) -> Option<NodeId> {
        self.views.get(&view).and_then(|v| v.node)
    }

    pub fn contents(&self, view: ViewId) -> Option<&[u8]> {
        self.views.get(&view).map(|v| v.contents.as_slice())
    }

    pub fn insert(&mut self, view: ViewId) -> Result<()> {
        if self.views.contains_key(&view) {
            return Err(Error::InvalidOperation(format!(
                "view {:?} already exists",
                view
            )));
        }
        self.views.insert(
            view,
            ViewState {
                node: None,
                contents: Vec::new(),
            },
        );
        Ok(())
    }

    /// Removes the view, returning the node it was attached to (if any) so
    /// the caller can clear that node's slot.
    pub fn remove(&mut self, view: ViewId) -> Result<Option<NodeId>> {
        match self.views.remove(&view) {
            Some(state) => Ok(state.node),
            None => Err(Error::UnknownId(format!("view {:?}", view))),
        }
    }

    pub fn set_contents(&mut self, view: ViewId, contents: Vec<u8>) -> Result<()> {
        let state = self
            .views
            .get_mut(&view)
            .ok_or_else(|| Error::UnknownId(format!("view {:?}", view)))?;
        state.contents = contents;
        Ok(())
    }

    fn set_node(&mut self, view: ViewId, node: Option<NodeId>) {
        if let Some(state) = self.views.get_mut(&view) {
            state.node = node;
        }
    }
}
