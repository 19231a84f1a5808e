use crate::geometry::Rect;
use crate::ids::{ChangeId, ConnectionId, NodeId, ViewId};
use crate::tree::Direction;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One disclosed node: the record a client receives the first time it is
/// told about a node, and the row shape of `GetNodeTree` results. The
/// parent is nulled out when it lies outside the receiver's visibility.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeRecord {
    pub node: NodeId,
    pub parent: Option<NodeId>,
    pub view: Option<ViewId>,
    pub bounds: Rect,
}

/// Opaque input event payload. Decoding the platform wire format happens
/// outside the service.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InputEvent(pub Vec<u8>);

/// Server-to-client notifications, one variant per wire message.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClientEvent {
    /// Handshake for a freshly embedded connection.
    ConnectionEstablished {
        connection: ConnectionId,
        creator_url: String,
        change_id: ChangeId,
        tree: Vec<NodeRecord>,
    },
    /// The embedder granted additional roots to an existing connection.
    RootsAdded { tree: Vec<NodeRecord> },
    /// A structural change happened somewhere the receiver cannot see.
    ChangeIdAdvanced { change_id: ChangeId },
    NodeBoundsChanged {
        node: NodeId,
        old: Rect,
        new: Rect,
    },
    /// Full hierarchy change, with any nodes disclosed to the receiver for
    /// the first time as a consequence of the move.
    NodeHierarchyChanged {
        node: NodeId,
        new_parent: Option<NodeId>,
        old_parent: Option<NodeId>,
        change_id: ChangeId,
        disclosed: Vec<NodeRecord>,
    },
    NodeReordered {
        node: NodeId,
        relative: NodeId,
        direction: Direction,
        change_id: ChangeId,
    },
    NodeDeleted { node: NodeId, change_id: ChangeId },
    ViewDeleted { view: ViewId },
    NodeViewReplaced {
        node: NodeId,
        new_view: Option<ViewId>,
        old_view: Option<ViewId>,
    },
    ViewInputEvent { view: ViewId, event: InputEvent },
    /// A peer connection went away; receivers clear dangling creator ids.
    ConnectionClosed { connection: ConnectionId },
}

/// Outbound half of one client's message channel. Transport framing is
/// assumed reliable and ordered; the service just hands events over.
pub trait ClientChannel {
    fn deliver(&mut self, event: ClientEvent);
}

/// Opens the client channel for an embed target. This is the boundary to
/// the platform's application loader.
pub trait ClientConnector {
    fn connect(&mut self, url: &str) -> Box<dyn ClientChannel>;
}

/// Platform viewport hook for focus requests.
pub trait FocusHost {
    fn focus(&mut self, node: NodeId);
}

/// Drops every event; useful when a test only exercises server state.
#[derive(Default)]
pub struct DiscardChannel;

impl ClientChannel for DiscardChannel {
    fn deliver(&mut self, _event: ClientEvent) {}
}

/// Connector producing [`DiscardChannel`]s.
#[derive(Default)]
pub struct DiscardConnector;

impl ClientConnector for DiscardConnector {
    fn connect(&mut self, _url: &str) -> Box<dyn ClientChannel> {
        Box::new(DiscardChannel)
    }
}

/// Focus host that ignores requests; stands in for the native viewport.
#[derive(Default)]
pub struct NullFocusHost;

impl FocusHost for NullFocusHost {
    fn focus(&mut self, _node: NodeId) {}
}
