#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Global monotonic counter ordering structural mutations. Starts at 1.
pub type ChangeId = u64;

/// Identifier for one client connection. Id 0 is reserved for the root
/// authority itself; real connections start at 1 and are never reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectionId(pub u16);

impl ConnectionId {
    pub const RESERVED: ConnectionId = ConnectionId(0);
}

/// Unique identifier for a node in the shared tree: the connection that
/// created it plus a connection-local id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId {
    pub connection: ConnectionId,
    pub local: u16,
}

impl NodeId {
    /// The well-known root of the whole tree.
    pub const ROOT: NodeId = NodeId {
        connection: ConnectionId::RESERVED,
        local: 1,
    };
    /// Sentinel for "no node" on the wire.
    pub const INVALID: NodeId = NodeId {
        connection: ConnectionId::RESERVED,
        local: 0,
    };

    pub fn new(connection: ConnectionId, local: u16) -> Self {
        Self { connection, local }
    }

    /// Packed wire form: high 16 bits connection id, low 16 bits local id.
    pub fn to_transport(self) -> u32 {
        (u32::from(self.connection.0) << 16) | u32::from(self.local)
    }

    pub fn from_transport(raw: u32) -> Self {
        Self {
            connection: ConnectionId((raw >> 16) as u16),
            local: (raw & 0xffff) as u16,
        }
    }
}

/// Unique identifier for a view. Same packing as [`NodeId`] but an
/// independent namespace.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewId {
    pub connection: ConnectionId,
    pub local: u16,
}

impl ViewId {
    /// Sentinel meaning "clear the view" in `SetView`.
    pub const NONE: ViewId = ViewId {
        connection: ConnectionId::RESERVED,
        local: 0,
    };

    pub fn new(connection: ConnectionId, local: u16) -> Self {
        Self { connection, local }
    }

    pub fn to_transport(self) -> u32 {
        (u32::from(self.connection.0) << 16) | u32::from(self.local)
    }

    pub fn from_transport(raw: u32) -> Self {
        Self {
            connection: ConnectionId((raw >> 16) as u16),
            local: (raw & 0xffff) as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_transport_round_trip() {
        let id = NodeId::new(ConnectionId(3), 17);
        assert_eq!(id.to_transport(), (3 << 16) | 17);
        assert_eq!(NodeId::from_transport(id.to_transport()), id);
    }

    #[test]
    fn well_known_ids() {
        assert_eq!(NodeId::ROOT.to_transport(), 1);
        assert_eq!(NodeId::INVALID.to_transport(), 0);
        assert_eq!(ViewId::NONE.to_transport(), 0);
    }

    #[test]
    fn node_and_view_namespaces_pack_identically() {
        let raw = 0x0004_0009;
        assert_eq!(NodeId::from_transport(raw).local, 9);
        assert_eq!(ViewId::from_transport(raw).connection, ConnectionId(4));
    }
}
