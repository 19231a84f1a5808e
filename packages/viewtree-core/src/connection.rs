use std::collections::HashSet;

use tracing::trace;

use crate::error::{Error, Result};
use crate::events::NodeRecord;
use crate::geometry::Rect;
use crate::ids::{ConnectionId, NodeId, ViewId};
use crate::tree::NodeArena;

/// Outcome of the per-connection visibility filter for one hierarchy
/// change. Decides what, if anything, the client is told.
#[derive(Clone, Debug, PartialEq)]
pub enum HierarchyVisibility {
    /// Send full details, with parents outside the receiver's visibility
    /// nulled out and first-time nodes disclosed.
    Notify {
        new_parent: Option<NodeId>,
        old_parent: Option<NodeId>,
        disclosed: Vec<NodeRecord>,
    },
    /// The node left the receiver's visible subtree: report it as deleted
    /// so the client's mirror stays consistent.
    SyntheticDelete,
    /// Nothing visible happened; only the change counter moved.
    CounterOnly,
}

/// One client's authority scope over the shared tree: what it owns, what
/// it has been told about, and the roots bounding what it may see.
pub struct Connection {
    id: ConnectionId,
    creator_id: Option<ConnectionId>,
    creator_url: String,
    owned_nodes: HashSet<u16>,
    owned_views: HashSet<u16>,
    known_nodes: HashSet<NodeId>,
    roots: HashSet<NodeId>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        creator_id: Option<ConnectionId>,
        creator_url: impl Into<String>,
        roots: HashSet<NodeId>,
    ) -> Self {
        Self {
            id,
            creator_id,
            creator_url: creator_url.into(),
            owned_nodes: HashSet::new(),
            owned_views: HashSet::new(),
            known_nodes: HashSet::new(),
            roots,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn creator_id(&self) -> Option<ConnectionId> {
        self.creator_id
    }

    pub fn creator_url(&self) -> &str {
        &self.creator_url
    }

    /// Drops the creator reference once that connection is gone.
    pub fn clear_creator(&mut self) {
        self.creator_id = None;
    }

    pub fn roots(&self) -> &HashSet<NodeId> {
        &self.roots
    }

    pub fn add_root(&mut self, node: NodeId) {
        self.roots.insert(node);
    }

    /// Whether this connection created the node (exclusive-owner rule).
    pub fn owns_node(&self, node: NodeId) -> bool {
        node.connection == self.id
    }

    pub fn owns_view(&self, view: ViewId) -> bool {
        view.connection == self.id
    }

    pub fn knows(&self, node: NodeId) -> bool {
        self.known_nodes.contains(&node)
    }

    pub fn mark_known(&mut self, node: NodeId) {
        self.known_nodes.insert(node);
    }

    pub fn register_node(&mut self, node: NodeId) {
        debug_assert!(self.owns_node(node));
        self.owned_nodes.insert(node.local);
        self.known_nodes.insert(node);
    }

    pub fn unregister_node(&mut self, node: NodeId) {
        self.owned_nodes.remove(&node.local);
        self.known_nodes.remove(&node);
    }

    pub fn register_view(&mut self, view: ViewId) {
        debug_assert!(self.owns_view(view));
        self.owned_views.insert(view.local);
    }

    pub fn unregister_view(&mut self, view: ViewId) {
        self.owned_views.remove(&view.local);
    }

    pub fn has_local_node(&self, local: u16) -> bool {
        self.owned_nodes.contains(&local)
    }

    pub fn has_local_view(&self, local: u16) -> bool {
        self.owned_views.contains(&local)
    }

    /// Ids of every node this connection owns, in stable order.
    pub fn owned_node_ids(&self) -> Vec<NodeId> {
        let mut locals: Vec<u16> = self.owned_nodes.iter().copied().collect();
        locals.sort_unstable();
        locals
            .into_iter()
            .map(|l| NodeId::new(self.id, l))
            .collect()
    }

    pub fn owned_view_ids(&self) -> Vec<ViewId> {
        let mut locals: Vec<u16> = self.owned_views.iter().copied().collect();
        locals.sort_unstable();
        locals
            .into_iter()
            .map(|l| ViewId::new(self.id, l))
            .collect()
    }

    /// Visibility: unrestricted connections see everything; restricted
    /// ones see their own nodes plus anything inside a granted root.
    pub fn sees(&self, arena: &NodeArena, node: NodeId) -> bool {
        if self.roots.is_empty() {
            return true;
        }
        if self.owns_node(node) {
            return true;
        }
        self.roots
            .iter()
            .any(|root| *root == node || arena.is_ancestor(*root, node))
    }

    // ---- authorization predicates (pure; no side effects) ----

    pub fn can_add(&self, arena: &NodeArena, parent: NodeId, child: NodeId) -> Result<()> {
        // the cycle check alone does not cover a detached parent
        if child == NodeId::ROOT {
            return Err(Error::InvalidOperation(
                "the root node cannot be reparented".into(),
            ));
        }
        if !arena.contains(parent) {
            return Err(Error::UnknownId(format!("node {:?}", parent)));
        }
        if !arena.contains(child) {
            return Err(Error::UnknownId(format!("node {:?}", child)));
        }
        if parent == child || arena.is_ancestor(child, parent) {
            return Err(Error::InvalidOperation("add would create a cycle".into()));
        }
        if arena.parent(child) == Some(parent) {
            return Err(Error::InvalidOperation(
                "child is already attached to parent".into(),
            ));
        }
        if !self.roots.is_empty() {
            if !self.sees(arena, parent) {
                return Err(Error::AccessDenied(format!(
                    "connection {:?} cannot see parent {:?}",
                    self.id, parent
                )));
            }
            if !self.sees(arena, child) && !self.knows(child) {
                return Err(Error::AccessDenied(format!(
                    "connection {:?} cannot see child {:?}",
                    self.id, child
                )));
            }
        }
        Ok(())
    }

    pub fn can_remove_from_parent(&self, arena: &NodeArena, node: NodeId) -> Result<()> {
        if node == NodeId::ROOT {
            return Err(Error::InvalidOperation(
                "the root node cannot be detached".into(),
            ));
        }
        let parent = match arena.parent(node) {
            Some(p) => p,
            None => {
                return Err(Error::InvalidOperation(format!(
                    "node {:?} has no parent",
                    node
                )))
            }
        };
        if !self.roots.is_empty()
            && !self.sees(arena, parent)
            && !(self.owns_node(node) && self.owns_node(parent))
        {
            return Err(Error::AccessDenied(format!(
                "connection {:?} cannot detach {:?}",
                self.id, node
            )));
        }
        Ok(())
    }

    pub fn can_reorder(&self, arena: &NodeArena, node: NodeId, relative: NodeId) -> Result<()> {
        if !self.owns_node(node) || !self.owns_node(relative) {
            return Err(Error::AccessDenied(
                "reorder is limited to nodes this connection owns".into(),
            ));
        }
        if !arena.contains(node) || !arena.contains(relative) {
            return Err(Error::UnknownId("reorder target does not exist".into()));
        }
        let parent = match arena.parent(node) {
            Some(p) => p,
            None => {
                return Err(Error::InvalidOperation(format!(
                    "node {:?} has no parent",
                    node
                )))
            }
        };
        if arena.parent(relative) != Some(parent) {
            return Err(Error::InvalidOperation(
                "reorder nodes must share a parent".into(),
            ));
        }
        if !self.knows(parent) {
            return Err(Error::AccessDenied(format!(
                "parent {:?} was never disclosed to connection {:?}",
                parent, self.id
            )));
        }
        Ok(())
    }

    pub fn can_delete_node(&self, node: NodeId) -> Result<()> {
        if !self.owns_node(node) {
            return Err(Error::AccessDenied(format!(
                "node {:?} is not owned by connection {:?}",
                node, self.id
            )));
        }
        Ok(())
    }

    pub fn can_delete_view(&self, view: ViewId) -> Result<()> {
        if !self.owns_view(view) {
            return Err(Error::AccessDenied(format!(
                "view {:?} is not owned by connection {:?}",
                view, self.id
            )));
        }
        Ok(())
    }

    pub fn can_set_view(
        &self,
        arena: &NodeArena,
        node: NodeId,
        view: Option<ViewId>,
    ) -> Result<()> {
        if !arena.contains(node) {
            return Err(Error::UnknownId(format!("node {:?}", node)));
        }
        if !self.sees(arena, node) && !self.knows(node) {
            return Err(Error::AccessDenied(format!(
                "connection {:?} cannot see node {:?}",
                self.id, node
            )));
        }
        if let Some(view) = view {
            if !self.owns_view(view) {
                return Err(Error::AccessDenied(format!(
                    "view {:?} is not owned by connection {:?}",
                    view, self.id
                )));
            }
        }
        Ok(())
    }

    pub fn can_get_node_tree(&self, arena: &NodeArena, node: NodeId) -> Result<()> {
        if !arena.contains(node) {
            return Err(Error::UnknownId(format!("node {:?}", node)));
        }
        if !self.sees(arena, node) && !self.owns_node(node) {
            return Err(Error::AccessDenied(format!(
                "connection {:?} cannot see node {:?}",
                self.id, node
            )));
        }
        Ok(())
    }

    pub fn can_embed(&self, nodes: &[NodeId]) -> Result<()> {
        if nodes.is_empty() {
            return Err(Error::InvalidOperation(
                "embed requires at least one node".into(),
            ));
        }
        if let Some(node) = nodes.iter().find(|n| !self.owns_node(**n)) {
            return Err(Error::AccessDenied(format!(
                "node {:?} is not owned by connection {:?}",
                node, self.id
            )));
        }
        Ok(())
    }

    // ---- visibility bookkeeping ----

    /// Builds a disclosure record, nulling the parent when it has not been
    /// disclosed to this connection.
    fn record(&self, arena: &NodeArena, node: NodeId) -> NodeRecord {
        let parent = arena.parent(node).filter(|p| self.knows(*p));
        NodeRecord {
            node,
            parent,
            view: arena.view(node),
            bounds: arena.bounds(node).unwrap_or(Rect::ZERO),
        }
    }

    /// Depth-first disclosure: collects `node` and its descendants that
    /// this connection has never been told about, marking them known as it
    /// goes. Stops at already-known nodes.
    pub fn unknown_nodes_from(&mut self, arena: &NodeArena, node: NodeId) -> Vec<NodeRecord> {
        let mut out = Vec::new();
        self.collect_unknown(arena, node, &mut out);
        out
    }

    fn collect_unknown(&mut self, arena: &NodeArena, node: NodeId, out: &mut Vec<NodeRecord>) {
        if self.knows(node) || !arena.contains(node) {
            return;
        }
        self.mark_known(node);
        out.push(self.record(arena, node));
        let children: Vec<NodeId> = arena.children(node).map(|c| c.to_vec()).unwrap_or_default();
        for child in children {
            self.collect_unknown(arena, child, out);
        }
    }

    /// Drops one node from the disclosure ledger after its deletion.
    pub fn forget_node(&mut self, node: NodeId) {
        self.known_nodes.remove(&node);
    }

    /// `node` and every visible descendant as disclosure records, marking
    /// the whole result known. Backs `GetNodeTree`.
    pub fn visible_tree(&mut self, arena: &NodeArena, node: NodeId) -> Vec<NodeRecord> {
        let mut out = Vec::new();
        for n in arena.subtree(node) {
            if !self.sees(arena, n) {
                continue;
            }
            self.mark_known(n);
            out.push(self.record(arena, n));
        }
        out
    }

    /// Forgets a subtree after it left this connection's visibility. Owned
    /// nodes are never forgotten.
    pub fn forget_subtree(&mut self, arena: &NodeArena, node: NodeId) {
        for n in arena.subtree(node) {
            if !self.owns_node(n) {
                self.known_nodes.remove(&n);
            }
        }
    }

    /// The filtering decision for one committed hierarchy change.
    /// Visibility is evaluated against the post-mutation tree only.
    pub fn hierarchy_filter(
        &mut self,
        arena: &NodeArena,
        node: NodeId,
        new_parent: Option<NodeId>,
        old_parent: Option<NodeId>,
    ) -> HierarchyVisibility {
        let visible = arena.contains(node) && self.sees(arena, node);
        let was_known = self.knows(node);
        trace!(
            connection = self.id.0,
            node = node.to_transport(),
            visible,
            was_known,
            "hierarchy filter"
        );
        if !visible {
            if was_known && !self.owns_node(node) {
                self.forget_subtree(arena, node);
                return HierarchyVisibility::SyntheticDelete;
            }
            if was_known {
                // Own node drifting outside the granted roots: still known,
                // report the move with parents nulled as needed.
                return HierarchyVisibility::Notify {
                    new_parent: new_parent.filter(|p| self.knows(*p)),
                    old_parent: old_parent.filter(|p| self.knows(*p)),
                    disclosed: Vec::new(),
                };
            }
            return HierarchyVisibility::CounterOnly;
        }
        let filtered_new = new_parent.filter(|p| self.knows(*p));
        let filtered_old = old_parent.filter(|p| self.knows(*p));
        let disclosed = if was_known {
            Vec::new()
        } else {
            self.unknown_nodes_from(arena, node)
        };
        HierarchyVisibility::Notify {
            new_parent: filtered_new,
            old_parent: filtered_old,
            disclosed,
        }
    }
}
