use crate::node_id::NodeId;

use std::collections::BTreeSet;

/// Services the arbiter borrows from the rest of the node.
pub trait MeshAide {
    /// The last transaction known to be safe for transactions initiated by `initiator`.
    fn newest_safe_transaction_for_initiator(&self, initiator: NodeId) -> i64;

    /// Pings `targets` so that a quiet network is not mistaken for a partitioned one.
    fn send_heartbeats(&self, targets: &BTreeSet<NodeId>);
}
