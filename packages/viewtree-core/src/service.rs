use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::connection::{Connection, HierarchyVisibility};
use crate::error::{Error, Result};
use crate::events::{
    ClientChannel, ClientConnector, ClientEvent, FocusHost, InputEvent, NodeRecord,
};
use crate::geometry::Rect;
use crate::ids::{ChangeId, ConnectionId, NodeId, ViewId};
use crate::tree::{BoundsChange, Direction, HierarchyChange, NodeArena, ViewArena, ViewChange};

/// Whether a transaction moves the global change counter when it commits.
/// Only structural mutations (and connection teardown) advance; bounds,
/// view, and content changes do not.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdvancePolicy {
    Advance,
    Retain,
}

struct Transaction {
    origin: ConnectionId,
    advance: AdvancePolicy,
    /// Node currently being destroyed; hierarchy fan-out for it is
    /// suppressed because the deletion notice supersedes it.
    deleting: Option<NodeId>,
    /// Connections already sent a counter-advanced notice this
    /// transaction, to suppress duplicates.
    notified: HashSet<ConnectionId>,
}

struct ConnectionEntry {
    state: Connection,
    channel: Box<dyn ClientChannel>,
}

/// The single authoritative owner of the view tree: connection registry,
/// global change clock, transaction gate, and change fan-out.
///
/// All mutation runs on the caller's thread; the at-most-one-transaction
/// invariant is what makes the model single-writer, not a lock.
pub struct ViewTreeService {
    nodes: NodeArena,
    views: ViewArena,
    connections: BTreeMap<ConnectionId, ConnectionEntry>,
    connector: Box<dyn ClientConnector>,
    focus_host: Box<dyn FocusHost>,
    next_connection_id: u16,
    next_change_id: ChangeId,
    transaction: Option<Transaction>,
    window_manager: Option<ConnectionId>,
    focused_node: Option<NodeId>,
}

impl ViewTreeService {
    pub fn new(connector: Box<dyn ClientConnector>, focus_host: Box<dyn FocusHost>) -> Self {
        Self {
            nodes: NodeArena::new(),
            views: ViewArena::default(),
            connections: BTreeMap::new(),
            connector,
            focus_host,
            next_connection_id: 1,
            next_change_id: 1,
            transaction: None,
            window_manager: None,
            focused_node: None,
        }
    }

    /// The change id a client must present with its next structural call.
    pub fn next_change_id(&self) -> ChangeId {
        self.next_change_id
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn has_connection(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn node_exists(&self, node: NodeId) -> bool {
        self.nodes.contains(node)
    }

    pub fn node_parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.parent(node)
    }

    pub fn node_children(&self, node: NodeId) -> Option<&[NodeId]> {
        self.nodes.children(node)
    }

    pub fn node_bounds(&self, node: NodeId) -> Option<Rect> {
        self.nodes.bounds(node)
    }

    pub fn node_view(&self, node: NodeId) -> Option<ViewId> {
        self.nodes.view(node)
    }

    pub fn view_exists(&self, view: ViewId) -> bool {
        self.views.contains(view)
    }

    pub fn view_contents(&self, view: ViewId) -> Option<&[u8]> {
        self.views.contents(view)
    }

    pub fn focused_node(&self) -> Option<NodeId> {
        self.focused_node
    }

    // ---- embedding ----

    /// Bootstraps the first connection with unrestricted visibility. This
    /// connection becomes the privileged window manager. Must run before
    /// any other connection exists; a second call is protocol misuse.
    pub fn embed_root(&mut self, url: &str) -> ConnectionId {
        assert!(
            self.connections.is_empty(),
            "embed_root requires no existing connections"
        );
        let channel = self.connector.connect(url);
        let id = self.allocate_connection_id();
        let state = Connection::new(id, None, url, HashSet::new());
        self.window_manager = Some(id);
        self.register_connection(state, channel, vec![NodeId::ROOT]);
        info!(connection = id.0, url, "window manager connection embedded");
        id
    }

    /// Hands authority over `nodes` to the client at `url`. Re-embedding
    /// the same creator/url pair grows the existing connection's roots
    /// instead of creating a duplicate.
    pub fn embed(&mut self, origin: ConnectionId, url: &str, nodes: &[NodeId]) -> Result<ConnectionId> {
        self.connection(origin)?.can_embed(nodes)?;
        for node in nodes {
            if !self.nodes.contains(*node) {
                return Err(Error::UnknownId(format!("node {:?}", node)));
            }
        }
        let existing = self
            .connections
            .iter()
            .find(|(_, e)| e.state.creator_id() == Some(origin) && e.state.creator_url() == url)
            .map(|(id, _)| *id);
        if let Some(id) = existing {
            let entry = self.connections.get_mut(&id).expect("looked up above");
            let mut tree = Vec::new();
            for node in nodes {
                entry.state.add_root(*node);
                tree.extend(entry.state.unknown_nodes_from(&self.nodes, *node));
            }
            entry.channel.deliver(ClientEvent::RootsAdded { tree });
            debug!(connection = id.0, url, roots = nodes.len(), "roots added to existing embed");
            return Ok(id);
        }
        let channel = self.connector.connect(url);
        let id = self.allocate_connection_id();
        let state = Connection::new(id, Some(origin), url, nodes.iter().copied().collect());
        self.register_connection(state, channel, nodes.to_vec());
        info!(connection = id.0, creator = origin.0, url, "connection embedded");
        Ok(id)
    }

    fn allocate_connection_id(&mut self) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id = self
            .next_connection_id
            .checked_add(1)
            .expect("connection id space exhausted");
        ConnectionId(id)
    }

    fn register_connection(
        &mut self,
        mut state: Connection,
        mut channel: Box<dyn ClientChannel>,
        disclose_from: Vec<NodeId>,
    ) {
        let mut tree = Vec::new();
        for node in disclose_from {
            tree.extend(state.unknown_nodes_from(&self.nodes, node));
        }
        channel.deliver(ClientEvent::ConnectionEstablished {
            connection: state.id(),
            creator_url: state.creator_url().to_string(),
            change_id: self.next_change_id,
            tree,
        });
        self.connections
            .insert(state.id(), ConnectionEntry { state, channel });
    }

    // ---- transaction gate ----

    fn begin_transaction(
        &mut self,
        origin: ConnectionId,
        advance: AdvancePolicy,
        deleting: Option<NodeId>,
    ) {
        assert!(
            self.transaction.is_none(),
            "transactions never nest; a previous one was not ended"
        );
        self.transaction = Some(Transaction {
            origin,
            advance,
            deleting,
            notified: HashSet::new(),
        });
    }

    fn end_transaction(&mut self, committed: bool) {
        let tx = self
            .transaction
            .take()
            .expect("end_transaction without begin_transaction");
        if committed && tx.advance == AdvancePolicy::Advance {
            self.next_change_id += 1;
            debug!(change_id = self.next_change_id, "change counter advanced");
        }
    }

    /// Runs `f` inside the single in-flight transaction, guaranteeing the
    /// end call on every exit path.
    fn with_transaction<T>(
        &mut self,
        origin: ConnectionId,
        advance: AdvancePolicy,
        deleting: Option<NodeId>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.begin_transaction(origin, advance, deleting);
        let result = f(self);
        self.end_transaction(result.is_ok());
        result
    }

    /// The counter value clients will see once the open transaction
    /// commits; this is the id carried on all fan-out notifications.
    fn pending_change_id(&self) -> ChangeId {
        match self.transaction.as_ref().map(|t| t.advance) {
            Some(AdvancePolicy::Advance) => self.next_change_id + 1,
            _ => self.next_change_id,
        }
    }

    fn check_change_id(&self, expected: ChangeId) -> Result<()> {
        if expected != self.next_change_id {
            return Err(Error::StaleChangeId {
                expected,
                current: self.next_change_id,
            });
        }
        Ok(())
    }

    fn connection(&self, id: ConnectionId) -> Result<&Connection> {
        self.connections
            .get(&id)
            .map(|e| &e.state)
            .ok_or_else(|| Error::UnknownId(format!("connection {:?}", id)))
    }

    fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection> {
        self.connections
            .get_mut(&id)
            .map(|e| &mut e.state)
            .ok_or_else(|| Error::UnknownId(format!("connection {:?}", id)))
    }

    // ---- client-facing operations ----

    pub fn create_node(&mut self, origin: ConnectionId, id: NodeId) -> Result<()> {
        let conn = self.connection(origin)?;
        if id.connection != origin {
            return Err(Error::AccessDenied(format!(
                "node {:?} is outside connection {:?}'s namespace",
                id, origin
            )));
        }
        if id.local == 0 {
            return Err(Error::InvalidOperation("local id 0 is reserved".into()));
        }
        if conn.has_local_node(id.local) {
            return Err(Error::InvalidOperation(format!(
                "node {:?} already exists",
                id
            )));
        }
        self.nodes.insert(id)?;
        self.connection_mut(origin)?.register_node(id);
        Ok(())
    }

    pub fn delete_node(&mut self, origin: ConnectionId, id: NodeId, expected: ChangeId) -> Result<()> {
        self.check_change_id(expected)?;
        self.connection(origin)?.can_delete_node(id)?;
        if !self.nodes.contains(id) {
            return Err(Error::UnknownId(format!("node {:?}", id)));
        }
        self.with_transaction(origin, AdvancePolicy::Advance, Some(id), |svc| {
            svc.delete_node_locked(id)
        })
    }

    pub fn add_node(
        &mut self,
        origin: ConnectionId,
        parent: NodeId,
        child: NodeId,
        expected: ChangeId,
    ) -> Result<()> {
        self.check_change_id(expected)?;
        self.connection(origin)?.can_add(&self.nodes, parent, child)?;
        // The caller named both ids, so they count as disclosed to it.
        let conn = self.connection_mut(origin)?;
        conn.mark_known(parent);
        conn.mark_known(child);
        self.with_transaction(origin, AdvancePolicy::Advance, None, |svc| {
            let change = svc.nodes.attach(parent, child)?;
            svc.fan_out_hierarchy(change);
            Ok(())
        })
    }

    pub fn remove_node_from_parent(
        &mut self,
        origin: ConnectionId,
        node: NodeId,
        expected: ChangeId,
    ) -> Result<()> {
        self.check_change_id(expected)?;
        self.connection(origin)?
            .can_remove_from_parent(&self.nodes, node)?;
        self.connection_mut(origin)?.mark_known(node);
        self.with_transaction(origin, AdvancePolicy::Advance, None, |svc| {
            let change = svc.nodes.detach(node)?;
            svc.fan_out_hierarchy(change);
            Ok(())
        })
    }

    pub fn reorder_node(
        &mut self,
        origin: ConnectionId,
        node: NodeId,
        relative: NodeId,
        direction: Direction,
        expected: ChangeId,
    ) -> Result<()> {
        self.check_change_id(expected)?;
        self.connection(origin)?
            .can_reorder(&self.nodes, node, relative)?;
        self.with_transaction(origin, AdvancePolicy::Advance, None, |svc| {
            svc.nodes.reorder(node, relative, direction)?;
            svc.fan_out_reordered(node, relative, direction);
            Ok(())
        })
    }

    /// Returns `node` and its visible descendants, disclosing them to the
    /// caller as a side effect. A subtree the caller cannot see at all
    /// yields an empty list rather than an error.
    pub fn get_node_tree(&mut self, origin: ConnectionId, node: NodeId) -> Result<Vec<NodeRecord>> {
        match self.connection(origin)?.can_get_node_tree(&self.nodes, node) {
            Ok(()) => {}
            Err(Error::AccessDenied(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        let entry = self
            .connections
            .get_mut(&origin)
            .expect("validated above");
        Ok(entry.state.visible_tree(&self.nodes, node))
    }

    pub fn create_view(&mut self, origin: ConnectionId, id: ViewId) -> Result<()> {
        let conn = self.connection(origin)?;
        if id.connection != origin {
            return Err(Error::AccessDenied(format!(
                "view {:?} is outside connection {:?}'s namespace",
                id, origin
            )));
        }
        if id.local == 0 {
            return Err(Error::InvalidOperation("local id 0 is reserved".into()));
        }
        if conn.has_local_view(id.local) {
            return Err(Error::InvalidOperation(format!(
                "view {:?} already exists",
                id
            )));
        }
        self.views.insert(id)?;
        self.connection_mut(origin)?.register_view(id);
        Ok(())
    }

    pub fn delete_view(&mut self, origin: ConnectionId, id: ViewId) -> Result<()> {
        self.connection(origin)?.can_delete_view(id)?;
        if !self.views.contains(id) {
            return Err(Error::UnknownId(format!("view {:?}", id)));
        }
        self.with_transaction(origin, AdvancePolicy::Retain, None, |svc| {
            svc.delete_view_locked(id)
        })
    }

    /// Attaches a view to a node. `ViewId::NONE` clears the slot.
    pub fn set_view(&mut self, origin: ConnectionId, node: NodeId, view: ViewId) -> Result<()> {
        let view = (view != ViewId::NONE).then_some(view);
        self.connection(origin)?
            .can_set_view(&self.nodes, node, view)?;
        self.with_transaction(origin, AdvancePolicy::Retain, None, |svc| {
            let changes = svc.nodes.set_view(node, view, &mut svc.views)?;
            for change in changes {
                svc.fan_out_view_replaced(change);
            }
            Ok(())
        })
    }

    pub fn set_view_contents(
        &mut self,
        origin: ConnectionId,
        view: ViewId,
        contents: Vec<u8>,
    ) -> Result<()> {
        if !self.connection(origin)?.owns_view(view) {
            return Err(Error::AccessDenied(format!(
                "view {:?} is not owned by connection {:?}",
                view, origin
            )));
        }
        self.views.set_contents(view, contents)
    }

    /// Forwards a focus request to the platform viewport.
    pub fn set_focus(&mut self, origin: ConnectionId, node: NodeId) -> Result<()> {
        let conn = self.connection(origin)?;
        if !self.nodes.contains(node) {
            return Err(Error::UnknownId(format!("node {:?}", node)));
        }
        if !conn.sees(&self.nodes, node) && !conn.knows(node) {
            return Err(Error::AccessDenied(format!(
                "connection {:?} cannot focus node {:?}",
                origin, node
            )));
        }
        self.focused_node = Some(node);
        self.focus_host.focus(node);
        Ok(())
    }

    pub fn set_node_bounds(&mut self, origin: ConnectionId, node: NodeId, bounds: Rect) -> Result<()> {
        if node.connection != origin {
            return Err(Error::AccessDenied(format!(
                "node {:?} is not owned by connection {:?}",
                node, origin
            )));
        }
        self.connection(origin)?;
        if !self.nodes.contains(node) {
            return Err(Error::UnknownId(format!("node {:?}", node)));
        }
        self.with_transaction(origin, AdvancePolicy::Retain, None, |svc| {
            let change = svc.nodes.set_bounds(node, bounds)?;
            svc.fan_out_bounds(change);
            Ok(())
        })
    }

    /// Routes an input event to the connection owning the target view.
    /// Only the window-manager connection may call this.
    pub fn dispatch_view_input_event(
        &mut self,
        origin: ConnectionId,
        view: ViewId,
        event: InputEvent,
    ) -> Result<()> {
        if self.window_manager != Some(origin) {
            return Err(Error::AccessDenied(
                "input dispatch is limited to the window manager".into(),
            ));
        }
        if !self.views.contains(view) {
            return Err(Error::UnknownId(format!("view {:?}", view)));
        }
        let entry = self
            .connections
            .get_mut(&view.connection)
            .ok_or_else(|| Error::UnknownId(format!("connection {:?}", view.connection)))?;
        entry
            .channel
            .deliver(ClientEvent::ViewInputEvent { view, event });
        Ok(())
    }

    /// Tears down a disconnected client: its views are deleted, its nodes
    /// removed from the tree, all inside one final transaction; then the
    /// registry entry goes away and survivors drop their creator links.
    pub fn close_connection(&mut self, id: ConnectionId) -> Result<()> {
        let conn = self.connection(id)?;
        let views = conn.owned_view_ids();
        let nodes = conn.owned_node_ids();
        info!(
            connection = id.0,
            views = views.len(),
            nodes = nodes.len(),
            "closing connection"
        );
        self.with_transaction(id, AdvancePolicy::Advance, None, |svc| {
            for view in views {
                svc.delete_view_locked(view)?;
            }
            for node in nodes {
                svc.delete_node_locked(node)?;
            }
            Ok(())
        })?;
        self.connections.remove(&id);
        for entry in self.connections.values_mut() {
            if entry.state.creator_id() == Some(id) {
                entry.state.clear_creator();
            }
            entry
                .channel
                .deliver(ClientEvent::ConnectionClosed { connection: id });
        }
        if self.window_manager == Some(id) {
            self.window_manager = None;
        }
        Ok(())
    }

    // ---- mutation under an open transaction ----

    fn delete_node_locked(&mut self, id: NodeId) -> Result<()> {
        if let Some(tx) = self.transaction.as_mut() {
            tx.deleting = Some(id);
        }
        if self.focused_node == Some(id) {
            self.focused_node = None;
        }
        if let Some(change) = self.nodes.clear_view(id, &mut self.views) {
            self.fan_out_view_replaced(change);
        }
        let changes = self.nodes.remove(id)?;
        for change in changes {
            self.fan_out_hierarchy(change);
        }
        if let Some(entry) = self.connections.get_mut(&id.connection) {
            entry.state.unregister_node(id);
        }
        self.fan_out_node_deleted(id);
        Ok(())
    }

    fn delete_view_locked(&mut self, id: ViewId) -> Result<()> {
        let attached = self.views.remove(id)?;
        if let Some(node) = attached {
            if let Some(change) = self.nodes.clear_view(node, &mut self.views) {
                self.fan_out_view_replaced(change);
            }
        }
        if let Some(entry) = self.connections.get_mut(&id.connection) {
            entry.state.unregister_view(id);
        }
        self.fan_out_view_deleted(id, attached);
        Ok(())
    }

    // ---- fan-out ----

    fn fan_out_hierarchy(&mut self, change: HierarchyChange) {
        let pending = self.pending_change_id();
        let tx = self
            .transaction
            .as_mut()
            .expect("hierarchy fan-out outside a transaction");
        if tx.deleting == Some(change.node) {
            return;
        }
        for (id, entry) in self.connections.iter_mut() {
            let originated = *id == tx.origin;
            let decision = entry.state.hierarchy_filter(
                &self.nodes,
                change.node,
                change.new_parent,
                change.old_parent,
            );
            if originated {
                // Bookkeeping above still ran; the originator applied the
                // change locally and is never re-notified.
                continue;
            }
            match decision {
                HierarchyVisibility::Notify {
                    new_parent,
                    old_parent,
                    disclosed,
                } => {
                    // a detail notice carries the id; no separate counter
                    // notice is owed for this transaction
                    tx.notified.insert(*id);
                    entry.channel.deliver(ClientEvent::NodeHierarchyChanged {
                        node: change.node,
                        new_parent,
                        old_parent,
                        change_id: pending,
                        disclosed,
                    })
                }
                HierarchyVisibility::SyntheticDelete => {
                    tx.notified.insert(*id);
                    entry.channel.deliver(ClientEvent::NodeDeleted {
                        node: change.node,
                        change_id: pending,
                    })
                }
                HierarchyVisibility::CounterOnly => {
                    if tx.advance == AdvancePolicy::Advance && tx.notified.insert(*id) {
                        entry
                            .channel
                            .deliver(ClientEvent::ChangeIdAdvanced { change_id: pending });
                    }
                }
            }
        }
    }

    fn fan_out_reordered(&mut self, node: NodeId, relative: NodeId, direction: Direction) {
        let pending = self.pending_change_id();
        let tx = self
            .transaction
            .as_mut()
            .expect("reorder fan-out outside a transaction");
        for (id, entry) in self.connections.iter_mut() {
            if *id == tx.origin {
                continue;
            }
            if entry.state.knows(node) && entry.state.knows(relative) {
                tx.notified.insert(*id);
                entry.channel.deliver(ClientEvent::NodeReordered {
                    node,
                    relative,
                    direction,
                    change_id: pending,
                });
            } else if tx.advance == AdvancePolicy::Advance && tx.notified.insert(*id) {
                entry
                    .channel
                    .deliver(ClientEvent::ChangeIdAdvanced { change_id: pending });
            }
        }
    }

    fn fan_out_node_deleted(&mut self, node: NodeId) {
        let pending = self.pending_change_id();
        let tx = self
            .transaction
            .as_mut()
            .expect("delete fan-out outside a transaction");
        for (id, entry) in self.connections.iter_mut() {
            if *id == tx.origin {
                continue;
            }
            if entry.state.knows(node) {
                entry.state.forget_node(node);
                tx.notified.insert(*id);
                entry.channel.deliver(ClientEvent::NodeDeleted {
                    node,
                    change_id: pending,
                });
            } else if tx.advance == AdvancePolicy::Advance && tx.notified.insert(*id) {
                entry
                    .channel
                    .deliver(ClientEvent::ChangeIdAdvanced { change_id: pending });
            }
        }
    }

    fn fan_out_view_deleted(&mut self, view: ViewId, attached: Option<NodeId>) {
        let tx = self
            .transaction
            .as_ref()
            .expect("view fan-out outside a transaction");
        let origin = tx.origin;
        for (id, entry) in self.connections.iter_mut() {
            if *id == origin {
                continue;
            }
            let saw_attachment = attached.is_some_and(|n| entry.state.knows(n));
            if entry.state.owns_view(view) || saw_attachment {
                entry.channel.deliver(ClientEvent::ViewDeleted { view });
            }
        }
    }

    fn fan_out_view_replaced(&mut self, change: ViewChange) {
        let tx = self
            .transaction
            .as_ref()
            .expect("view fan-out outside a transaction");
        let origin = tx.origin;
        for (id, entry) in self.connections.iter_mut() {
            if *id == origin {
                continue;
            }
            if entry.state.knows(change.node) {
                entry.channel.deliver(ClientEvent::NodeViewReplaced {
                    node: change.node,
                    new_view: change.new_view,
                    old_view: change.old_view,
                });
            }
        }
    }

    fn fan_out_bounds(&mut self, change: BoundsChange) {
        let tx = self
            .transaction
            .as_ref()
            .expect("bounds fan-out outside a transaction");
        let origin = tx.origin;
        for (id, entry) in self.connections.iter_mut() {
            if *id == origin {
                continue;
            }
            if entry.state.knows(change.node) {
                entry.channel.deliver(ClientEvent::NodeBoundsChanged {
                    node: change.node,
                    old: change.old,
                    new: change.new,
                });
            }
        }
    }
}
