use crate::mailbox::{self, Inbox, LocalMailbox, PostOffice};
use crate::message::{FaultObservation, MeshMessage};
use crate::node_id::NodeId;

use parking_lot::RwLock;
use tracing::{debug, trace};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Predicate telling whether traffic from the first node to the second is lost.
pub type LinkFailure = Box<dyn Fn(NodeId, NodeId) -> bool + Send + Sync>;

/// In-process network connecting the [LocalMailbox]es of a simulated cluster.
///
/// Killing a node or severing a link behaves like the transport would: traffic over the broken
/// path is silently lost and every endpoint that loses a peer observes a witnessed fault.
#[derive(Default)]
pub struct InMemoryMesh {
    inboxes: RwLock<BTreeMap<NodeId, Arc<Inbox>>>,
    dead: RwLock<BTreeSet<NodeId>>,
    link_failures: RwLock<Vec<LinkFailure>>,
}

impl InMemoryMesh {
    pub fn new() -> Arc<InMemoryMesh> {
        Arc::new(InMemoryMesh::default())
    }

    /// Registers `id` and returns its mailbox.
    pub fn join(self: &Arc<Self>, id: NodeId) -> LocalMailbox {
        let inbox = Arc::new(Inbox::new());
        let _ = self.inboxes.write().insert(id, inbox.clone());
        let post_office: Arc<dyn PostOffice> = self.clone();
        LocalMailbox::new(id, inbox, post_office)
    }

    pub fn members(&self) -> BTreeSet<NodeId> {
        self.inboxes.read().keys().cloned().collect()
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.inboxes.read().contains_key(&id) && !self.dead.read().contains(&id)
    }

    /// Crashes `id`: its inbox is closed and every live peer still linked to it sees the fault.
    pub fn kill(&self, id: NodeId) {
        if !self.dead.write().insert(id) {
            return;
        }
        debug!("mesh: killing {}", id);
        let inboxes: Vec<(NodeId, Arc<Inbox>)> =
            self.inboxes.read().iter().map(|(peer, inbox)| (*peer, inbox.clone())).collect();
        for (peer, inbox) in inboxes.iter() {
            if *peer == id {
                inbox.close();
            }
        }
        for (peer, inbox) in inboxes.iter() {
            if *peer != id && self.is_alive(*peer) && !self.is_link_down(id, *peer) {
                inbox.push_back(MeshMessage::Fault(FaultObservation::witnessed(*peer, id)));
            }
        }
    }

    /// Breaks the link between `a` and `b`; both ends observe the other fail.
    pub fn sever(&self, a: NodeId, b: NodeId) {
        debug!("mesh: severing {} <-> {}", a, b);
        self.add_link_failure(Box::new(move |x, y| (x == a && y == b) || (x == b && y == a)));
        self.inject(a, MeshMessage::Fault(FaultObservation::witnessed(a, b)));
        self.inject(b, MeshMessage::Fault(FaultObservation::witnessed(b, a)));
    }

    /// Installs a one-way link predicate without notifying anybody.
    pub fn add_link_failure(&self, link_failure: LinkFailure) {
        self.link_failures.write().push(link_failure)
    }

    /// Queues a message straight into the inbox of `to`, bypassing links.
    pub fn inject(&self, to: NodeId, message: MeshMessage) {
        if let Some(inbox) = self.inboxes.read().get(&to) {
            inbox.push_back(message);
        }
    }

    /// Shuts every inbox down; blocked receivers wake with an error.
    pub fn close_all(&self) {
        for inbox in self.inboxes.read().values() {
            inbox.close();
        }
    }

    fn is_link_down(&self, a: NodeId, b: NodeId) -> bool {
        self.link_failures.read().iter().any(|failure| failure(a, b))
    }

    fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        self.is_alive(from) && !self.is_link_down(from, to)
    }
}

impl PostOffice for InMemoryMesh {
    fn post(&self, from: NodeId, to: NodeId, message: MeshMessage) -> mailbox::Result<()> {
        let inbox = match self.inboxes.read().get(&to) {
            Some(inbox) => inbox.clone(),
            None => return Err(mailbox::Error::UnknownDestination(to)),
        };
        if !self.is_alive(to) || !self.is_reachable(from, to) {
            trace!("mesh: lost {} -> {}: {}", from, to, message);
            return Ok(());
        }
        inbox.push_back(message);
        Ok(())
    }
}
