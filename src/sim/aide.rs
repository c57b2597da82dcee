use crate::agreement::MeshAide;
use crate::mailbox::PostOffice;
use crate::message::{Heartbeat, MeshMessage};
use crate::node_id::NodeId;

use super::mesh::InMemoryMesh;

use parking_lot::RwLock;
use tracing::trace;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Safe transaction ids shared by every node of a simulated cluster.
pub type SafeTxnTable = Arc<RwLock<BTreeMap<NodeId, i64>>>;

pub struct SimAide {
    self_id: NodeId,
    safe_txn_ids: SafeTxnTable,
    mesh: Arc<InMemoryMesh>,
}

impl SimAide {
    pub fn new(self_id: NodeId, safe_txn_ids: SafeTxnTable, mesh: Arc<InMemoryMesh>) -> SimAide {
        SimAide { self_id, safe_txn_ids, mesh }
    }
}

impl MeshAide for SimAide {
    fn newest_safe_transaction_for_initiator(&self, initiator: NodeId) -> i64 {
        self.safe_txn_ids.read().get(&initiator).cloned().unwrap_or(0)
    }

    fn send_heartbeats(&self, targets: &BTreeSet<NodeId>) {
        let last_safe_txn_id = self.newest_safe_transaction_for_initiator(self.self_id);
        for target in targets.iter().filter(|id| **id != self.self_id) {
            let heartbeat = Heartbeat { source: self.self_id, last_safe_txn_id };
            if let Err(err) = self.mesh.post(self.self_id, *target, MeshMessage::Heartbeat(heartbeat))
            {
                trace!("heartbeat to {} failed: {}", target, err);
            }
        }
    }
}
