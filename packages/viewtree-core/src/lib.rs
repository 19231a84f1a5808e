#![forbid(unsafe_code)]
//! Multi-client view-tree synchronization service.
//!
//! A single authoritative [`ViewTreeService`] owns a hierarchical tree of
//! nodes and their attachable content views, and exposes it to many
//! mutually-distrusting client connections. Each connection mutates only
//! what it owns or was granted, sees a filtered slice of the rest, and is
//! kept ordered by a global change counter with optimistic-concurrency
//! checks. Platform concerns (viewport, transport, input decoding) stay
//! behind the traits in [`events`].

pub mod connection;
pub mod error;
pub mod events;
pub mod geometry;
pub mod ids;
pub mod service;
pub mod tree;

pub use connection::{Connection, HierarchyVisibility};
pub use error::{Error, Result};
pub use events::{
    ClientChannel, ClientConnector, ClientEvent, DiscardChannel, DiscardConnector, FocusHost,
    InputEvent, NodeRecord, NullFocusHost,
};
pub use geometry::Rect;
pub use ids::{ChangeId, ConnectionId, NodeId, ViewId};
pub use service::{AdvancePolicy, ViewTreeService};
pub use tree::{BoundsChange, Direction, HierarchyChange, NodeArena, ViewArena, ViewChange};
