//! Live membership of the cluster as seen by one node.
use crate::node_id::{ids_to_string, NodeId};

use actix::{Actor, Context, Handler};
use tracing::{debug, info};

use std::collections::{BTreeMap, BTreeSet};

/// An arbitration round evicted these nodes, with their last safe transaction id.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Evicted {
    pub decision: BTreeMap<NodeId, i64>,
}

#[derive(Debug, Clone, Message)]
#[rtype(result = "Members")]
pub struct GetMembers;

#[derive(Debug, Clone, PartialEq, Eq, MessageResponse)]
pub struct Members {
    pub members: BTreeSet<NodeId>,
    /// Hosts that lost at least one site.
    pub dropped_hosts: BTreeSet<u32>,
    /// Every evicted site with the cutoff its recovery must respect.
    pub evicted: BTreeMap<NodeId, i64>,
}

pub struct MembershipView {
    self_id: NodeId,
    members: BTreeSet<NodeId>,
    dropped_hosts: BTreeSet<u32>,
    evicted: BTreeMap<NodeId, i64>,
}

impl MembershipView {
    pub fn new(self_id: NodeId, members: BTreeSet<NodeId>) -> Self {
        MembershipView {
            self_id,
            members,
            dropped_hosts: BTreeSet::new(),
            evicted: BTreeMap::new(),
        }
    }
}

impl Actor for MembershipView {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("view {}: started", self.self_id);
    }
}

impl Handler<Evicted> for MembershipView {
    type Result = ();

    fn handle(&mut self, msg: Evicted, _ctx: &mut Context<Self>) -> Self::Result {
        for (id, safe_txn_id) in msg.decision.into_iter() {
            if self.members.remove(&id) {
                let _ = self.dropped_hosts.insert(id.host_id());
            }
            let _ = self.evicted.insert(id, safe_txn_id);
        }
        info!("view {}: members {}", self.self_id, ids_to_string(&self.members));
    }
}

impl Handler<GetMembers> for MembershipView {
    type Result = Members;

    fn handle(&mut self, _msg: GetMembers, _ctx: &mut Context<Self>) -> Self::Result {
        Members {
            members: self.members.clone(),
            dropped_hosts: self.dropped_hosts.clone(),
            evicted: self.evicted.clone(),
        }
    }
}
